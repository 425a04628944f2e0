//! # Pipeline Orchestrator
//!
//! Drives one utterance through downmix → transcribe → generate → synthesize and
//! reports what happened as a [`PipelineOutcome`].
//!
//! ## Error recovery:
//! Every stage failure is logged with the session and participant and turned into
//! `PipelineOutcome::Dropped`. Nothing is retried. `process` never writes history:
//! the exchange travels back inside the `Reply`, and the session that owns the turn
//! records it once the reply actually starts playing. A failed or abandoned turn
//! leaves no trace in the conversation.
//!
//! ## Sharing:
//! The orchestrator is cheap to clone (every collaborator sits behind an `Arc`), so
//! each session clones it into the future that processes its utterance.

use crate::audio::buffer::Utterance;
use crate::audio::codec::to_mono;
use crate::config::GenerationConfig;
use crate::conversation::ConversationHistory;
use crate::error::VoiceError;
use crate::pipeline::{DropReason, Participant, PipelineOutcome, Reply};
use crate::services::{GenerationRequest, ResponseGenerator, SpeechSynthesizer, Transcriber};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Persona and sampling settings applied to every generated reply.
#[derive(Debug, Clone)]
pub struct PersonaSettings {
    pub persona_name: String,
    pub system_template: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PersonaSettings {
    /// Fill the system template for one participant.
    pub fn system_instruction(&self, participant: &Participant) -> String {
        self.system_template
            .replace("{persona}", &self.persona_name)
            .replace("{participant}", participant.display_name())
    }
}

impl From<&GenerationConfig> for PersonaSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            persona_name: config.persona_name.clone(),
            system_template: config.system_template.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    history: Arc<ConversationHistory>,
    persona: PersonaSettings,
}

impl Orchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        history: Arc<ConversationHistory>,
        persona: PersonaSettings,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
            history,
            persona,
        }
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    /// Process one admitted utterance.
    ///
    /// The caller owns the session gate and must release it on `Dropped`, or once
    /// playback of the `Reply` reaches a terminal state.
    pub async fn process(
        &self,
        session_id: &str,
        utterance: Utterance,
        participant: &Participant,
    ) -> PipelineOutcome {
        let started = Instant::now();

        // 1. Downmix
        let mono = to_mono(&utterance.pcm, utterance.channels);
        if mono.is_empty() {
            debug!(session_id, "Utterance empty after downmix, dropping");
            return PipelineOutcome::Dropped(DropReason::EmptyAudio);
        }

        // 2. Transcribe
        let transcript = match self.transcriber.transcribe(&mono, utterance.sample_rate).await {
            Ok(text) => text,
            Err(err) => return self.dropped(session_id, participant, err),
        };
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            debug!(session_id, participant = %participant.id, "Blank transcript, dropping utterance");
            return PipelineOutcome::Dropped(DropReason::EmptyTranscript);
        }
        info!(session_id, participant = %participant.id, "Heard: {}", transcript);

        // 3. Generate
        let reply_text = match self.generate_reply(participant, &transcript).await {
            Ok(text) => text,
            Err(err) => return self.dropped(session_id, participant, err),
        };

        // 4. Synthesize
        let audio = match self.synthesizer.synthesize(&reply_text).await {
            Ok(audio) => audio,
            Err(err) => return self.dropped(session_id, participant, err),
        };

        info!(
            session_id,
            participant = %participant.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            audio_ms = audio.duration.as_millis() as u64,
            "Reply ready: {}",
            reply_text
        );

        PipelineOutcome::Reply(Reply {
            transcript,
            reply_text,
            audio,
        })
    }

    /// Generate a reply to `text` and persist the exchange. Used by text chat,
    /// where there is nothing to synthesize. Nothing is written when generation fails.
    pub async fn respond_text(&self, participant: &Participant, text: &str) -> Result<String, VoiceError> {
        let reply = self.generate_reply(participant, text).await?;
        self.history.record_exchange(&participant.id, text, reply.as_str());
        Ok(reply)
    }

    /// Generate a reply against the prior context without touching history.
    async fn generate_reply(&self, participant: &Participant, text: &str) -> Result<String, VoiceError> {
        let request = GenerationRequest {
            system_instruction: self.persona.system_instruction(participant),
            context: self.history.render_context(&participant.id),
            user_text: text.to_string(),
            temperature: self.persona.temperature,
            max_tokens: self.persona.max_tokens,
        };

        let reply = self.generator.generate(&request).await?;
        Ok(reply.trim().to_string())
    }

    fn dropped(&self, session_id: &str, participant: &Participant, err: VoiceError) -> PipelineOutcome {
        warn!(
            session_id,
            participant = %participant.id,
            stage = err.stage(),
            "Utterance dropped: {}",
            err
        );
        PipelineOutcome::Dropped(DropReason::Failed(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::FlushReason;
    use crate::conversation::{Message, Role};
    use crate::pipeline::testing::{FakeServices, Call};

    fn utterance(pcm: Vec<u8>) -> Utterance {
        Utterance {
            pcm,
            channels: 2,
            sample_rate: 48_000,
            frame_count: 1,
            reason: FlushReason::Silence,
        }
    }

    fn alice() -> Participant {
        Participant::new("alice", Some("Alice".to_string()))
    }

    #[tokio::test]
    async fn test_happy_path_runs_stages_in_order() {
        let fakes = FakeServices::new().transcript("hello").reply("hi there!");
        let orchestrator = fakes.orchestrator(10);

        // Two stereo sample pairs: (2, 4) and (-3, -4)
        let pcm = vec![2, 0, 4, 0, 0xFD, 0xFF, 0xFC, 0xFF];
        let outcome = orchestrator.process("s-1", utterance(pcm), &alice()).await;

        let reply = match outcome {
            PipelineOutcome::Reply(reply) => reply,
            other => panic!("expected reply, got {:?}", other),
        };
        assert_eq!(reply.transcript, "hello");
        assert_eq!(reply.reply_text, "hi there!");

        assert_eq!(
            fakes.calls(),
            vec![
                Call::Transcribe { mono: vec![3, 0, 0xFC, 0xFF] },
                Call::Generate {
                    prompt: format!(
                        "{}\n\nUser: hello",
                        orchestrator.persona.system_instruction(&alice()).trim()
                    )
                },
                Call::Synthesize { text: "hi there!".to_string() },
            ]
        );

        // Recording the exchange is left to the session that plays the reply
        assert!(orchestrator.history().get_conversation("alice").is_empty());
    }

    #[tokio::test]
    async fn test_blank_transcript_stops_before_generation() {
        let fakes = FakeServices::new().transcript("   ");
        let orchestrator = fakes.orchestrator(10);

        let outcome = orchestrator.process("s-1", utterance(vec![0; 8]), &alice()).await;
        assert!(matches!(outcome, PipelineOutcome::Dropped(DropReason::EmptyTranscript)));
        assert_eq!(fakes.calls().len(), 1);
        assert!(orchestrator.history().get_conversation("alice").is_empty());
    }

    #[tokio::test]
    async fn test_tiny_pcm_is_dropped_without_service_calls() {
        let fakes = FakeServices::new();
        let orchestrator = fakes.orchestrator(10);

        let outcome = orchestrator.process("s-1", utterance(vec![1, 2, 3]), &alice()).await;
        assert!(matches!(outcome, PipelineOutcome::Dropped(DropReason::EmptyAudio)));
        assert!(fakes.calls().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_writes_no_history() {
        let fakes = FakeServices::new().transcript("hello").fail_generation();
        let orchestrator = fakes.orchestrator(10);

        let outcome = orchestrator.process("s-1", utterance(vec![0; 8]), &alice()).await;
        match outcome {
            PipelineOutcome::Dropped(DropReason::Failed(err)) => assert_eq!(err.stage(), "generation"),
            other => panic!("expected generation failure, got {:?}", other),
        }
        assert!(orchestrator.history().get_conversation("alice").is_empty());
        assert!(!fakes.calls().iter().any(|call| matches!(call, Call::Synthesize { .. })));
    }

    #[tokio::test]
    async fn test_synthesis_failure_writes_no_history() {
        let fakes = FakeServices::new().transcript("hello").reply("hey").fail_synthesis();
        let orchestrator = fakes.orchestrator(10);

        let outcome = orchestrator.process("s-1", utterance(vec![0; 8]), &alice()).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Dropped(DropReason::Failed(VoiceError::Synthesis(_)))
        ));
        assert!(orchestrator.history().get_conversation("alice").is_empty());
    }

    #[tokio::test]
    async fn test_text_reply_records_exchange() {
        let fakes = FakeServices::new().reply("hey");
        let orchestrator = fakes.orchestrator(10);

        assert_eq!(orchestrator.respond_text(&alice(), "hello").await.unwrap(), "hey");
        assert_eq!(
            orchestrator.history().get_conversation("alice"),
            vec![Message::new(Role::User, "hello"), Message::new(Role::Assistant, "hey")]
        );
    }

    #[tokio::test]
    async fn test_context_is_read_before_new_turn() {
        let fakes = FakeServices::new().reply("fine, thanks");
        let orchestrator = fakes.orchestrator(10);
        orchestrator.history().record_exchange("alice", "good morning", "morning!");

        orchestrator.respond_text(&alice(), "how are you?").await.unwrap();

        let prompt = fakes
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Generate { prompt } => Some(prompt),
                _ => None,
            })
            .unwrap();
        assert!(prompt.ends_with("User: good morning\nAssistant: morning!\nUser: how are you?"));
        assert_eq!(prompt.matches("how are you?").count(), 1);
    }

    #[test]
    fn test_system_instruction_names_persona_and_participant() {
        let persona = PersonaSettings {
            persona_name: "Pipi".to_string(),
            system_template: "I am {persona}, talking to {participant}.".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
        };
        assert_eq!(
            persona.system_instruction(&Participant::new("u-9", None)),
            "I am Pipi, talking to u-9."
        );
    }
}
