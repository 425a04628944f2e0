//! In-crate fakes for the pipeline's collaborators.
//!
//! Every fake appends to one shared call log so tests can assert on stage order.

use crate::conversation::ConversationHistory;
use crate::error::VoiceError;
use crate::pipeline::orchestrator::{Orchestrator, PersonaSettings};
use crate::pipeline::playback::AudioSink;
use crate::services::{
    GenerationRequest, ResponseGenerator, SpeechSynthesizer, SynthesizedAudio, Transcriber,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Transcribe { mono: Vec<u8> },
    Generate { prompt: String },
    Synthesize { text: String },
}

type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn sample_audio() -> SynthesizedAudio {
    SynthesizedAudio::wav(b"RIFF....WAVE".to_vec(), Duration::from_millis(1200))
}

struct FakeTranscriber {
    log: CallLog,
    transcript: String,
    fail: bool,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, mono_pcm: &[u8], _sample_rate: u32) -> Result<String, VoiceError> {
        self.log.lock().unwrap().push(Call::Transcribe { mono: mono_pcm.to_vec() });
        if self.fail {
            return Err(VoiceError::Transcription("fake transcription outage".to_string()));
        }
        Ok(self.transcript.clone())
    }
}

struct FakeGenerator {
    log: CallLog,
    reply: String,
    fail: bool,
}

#[async_trait]
impl ResponseGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, VoiceError> {
        self.log.lock().unwrap().push(Call::Generate { prompt: request.prompt_text() });
        if self.fail {
            return Err(VoiceError::Generation("fake generation outage".to_string()));
        }
        Ok(self.reply.clone())
    }
}

struct FakeSynthesizer {
    log: CallLog,
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, VoiceError> {
        self.log.lock().unwrap().push(Call::Synthesize { text: text.to_string() });
        if self.fail {
            return Err(VoiceError::Synthesis("fake synthesis outage".to_string()));
        }
        Ok(sample_audio())
    }
}

/// Builder for a fully faked orchestrator.
pub struct FakeServices {
    log: CallLog,
    transcript: String,
    reply: String,
    fail_transcription: bool,
    fail_generation: bool,
    fail_synthesis: bool,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            transcript: "hello".to_string(),
            reply: "hi!".to_string(),
            fail_transcription: false,
            fail_generation: false,
            fail_synthesis: false,
        }
    }

    pub fn transcript(mut self, text: &str) -> Self {
        self.transcript = text.to_string();
        self
    }

    pub fn reply(mut self, text: &str) -> Self {
        self.reply = text.to_string();
        self
    }

    pub fn fail_transcription(mut self) -> Self {
        self.fail_transcription = true;
        self
    }

    pub fn fail_generation(mut self) -> Self {
        self.fail_generation = true;
        self
    }

    pub fn fail_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    pub fn orchestrator(&self, max_messages: usize) -> Orchestrator {
        Orchestrator::new(
            Arc::new(FakeTranscriber {
                log: self.log.clone(),
                transcript: self.transcript.clone(),
                fail: self.fail_transcription,
            }),
            Arc::new(FakeGenerator {
                log: self.log.clone(),
                reply: self.reply.clone(),
                fail: self.fail_generation,
            }),
            Arc::new(FakeSynthesizer {
                log: self.log.clone(),
                fail: self.fail_synthesis,
            }),
            Arc::new(ConversationHistory::new(max_messages)),
            PersonaSettings {
                persona_name: "Pipi".to_string(),
                system_template: "You are {persona}. You are talking with {participant}.".to_string(),
                temperature: 0.7,
                max_tokens: 2048,
            },
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }
}

/// Sink that remembers what it was asked to play.
#[derive(Default)]
pub struct RecordingSink {
    attached: Vec<Uuid>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            attached: Vec::new(),
            fail: true,
        }
    }

    pub fn attached(&self) -> Vec<Uuid> {
        self.attached.clone()
    }
}

impl AudioSink for RecordingSink {
    fn attach(&mut self, playback_id: Uuid, _audio: SynthesizedAudio) -> Result<(), VoiceError> {
        if self.fail {
            return Err(VoiceError::Playback("sink disconnected".to_string()));
        }
        self.attached.push(playback_id);
        Ok(())
    }
}
