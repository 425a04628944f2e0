use crate::state::{AppState, PipelineMetrics};
use crate::session::manager::SessionManagerSummary;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let sessions = state.sessions.summary();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "pipeline": {
            "utterances_admitted": metrics.utterances_admitted,
            "utterances_skipped": metrics.utterances_skipped,
            "replies_played": metrics.replies_played,
            "turns_dropped": metrics.turns_dropped
        },
        "services": {
            "transcription": {
                "endpoint": config.transcription.endpoint,
                "configured": !config.transcription.api_key.is_empty()
            },
            "generation": {
                "model": config.generation.model,
                "configured": !config.generation.api_key.is_empty()
            },
            "synthesis": {
                "base_url": config.synthesis.base_url
            }
        },
        "memory": get_memory_info(),
        "system": get_system_status(&sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = state.sessions.summary();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "active": sessions.total_sessions,
            "max": sessions.max_sessions,
            "by_phase": sessions.phase_counts,
            "opened": metrics.sessions_opened,
            "rejected": metrics.sessions_rejected
        },
        "pipeline": pipeline_json(&metrics),
        "chat": {
            "requests": metrics.chat_requests,
            "errors": metrics.chat_errors
        },
        "memory": get_memory_info()
    }))
}

fn pipeline_json(metrics: &PipelineMetrics) -> serde_json::Value {
    let offered = metrics.utterances_admitted + metrics.utterances_skipped;
    json!({
        "utterances_admitted": metrics.utterances_admitted,
        "utterances_skipped": metrics.utterances_skipped,
        "skip_rate": if offered > 0 {
            metrics.utterances_skipped as f64 / offered as f64
        } else {
            0.0
        },
        "gate_resets": metrics.gate_resets,
        "replies_ready": metrics.replies_ready,
        "replies_played": metrics.replies_played,
        "playback_failures": metrics.playback_failures,
        "turns_dropped": metrics.turns_dropped,
        "dropped_by_reason": metrics.dropped_by_reason,
        "average_pipeline_ms": metrics.average_pipeline_ms()
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available (pid {})", process::id())
    })
}

fn get_system_status(sessions: &SessionManagerSummary) -> serde_json::Value {
    let session_usage = if sessions.max_sessions > 0 {
        sessions.total_sessions as f64 / sessions.max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": sessions.max_sessions,
        "current_sessions": sessions.total_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing session.max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
