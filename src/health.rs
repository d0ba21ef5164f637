use crate::audio::session::SessionManager;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(
    state: web::Data<AppState>,
    session_manager: web::Data<SessionManager>,
) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let sessions = session_manager.summary();

    let memory_info = get_memory_info();
    let system_status = get_system_status(&config, &metrics);

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "audio-ingest-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions
        },
        "ingest": {
            "chunks_received": metrics.chunks_received,
            "audio_bytes_received": metrics.audio_bytes_received,
            "flushes_completed": metrics.flushes_completed,
            "audio_bytes_flushed": metrics.audio_bytes_flushed,
            "flush_failures": metrics.flush_failures
        },
        "sessions": {
            "total": sessions.total_sessions,
            "max": sessions.max_sessions,
            "by_status": sessions.status_counts,
            "live_chunks": sessions.total_chunks,
            "live_bytes": sessions.total_bytes,
            "live_flushes": sessions.total_flushes,
            "live_flush_failures": sessions.total_flush_failures
        },
        "audio_profile": {
            "sample_rate": config.audio.sample_rate,
            "channels": config.audio.channels,
            "bit_depth": config.audio.bit_depth
        },
        "storage": {
            "output_dir": config.storage.output_dir
        },
        "memory": memory_info,
        "system": system_status
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "ingest": {
            "chunks_received": metrics.chunks_received,
            "audio_bytes_received": metrics.audio_bytes_received,
            "flushes_completed": metrics.flushes_completed,
            "audio_bytes_flushed": metrics.audio_bytes_flushed,
            "flush_failures": metrics.flush_failures
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "performance": {
            "max_concurrent_sessions": state.get_config().performance.max_concurrent_sessions,
            "flush_threshold_chunks": state.get_config().buffering.flush_threshold_chunks
        }
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let status_path = format!("/proc/{}/status", process::id());
        if let Ok(status) = std::fs::read_to_string(status_path) {
            let field_kb = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_kb("VmRSS:") * 1024,
                "virtual_memory_bytes": field_kb("VmSize:") * 1024,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

fn get_system_status(config: &crate::config::AppConfig, metrics: &crate::state::AppMetrics) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let usage = if max_sessions > 0 {
        metrics.active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = match usage {
        u if u > 0.9 => "high_load",
        u if u > 0.7 => "moderate_load",
        _ => "normal",
    };

    json!({
        "status": status,
        "session_usage_percent": (usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": metrics.active_sessions,
        "load_warnings": if usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
