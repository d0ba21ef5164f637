//! # Ingest Session Management
//!
//! Manages the lifecycle of audio ingest sessions. Each session represents one
//! accepted WebSocket connection and owns its own accumulator, flush sink, and
//! raw-message log, all rooted at `<output_dir>/<session_id>/`. Scoping these
//! per connection keeps audio from unrelated clients out of each other's
//! artifacts and lets artifact numbering restart cleanly per session.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: connection accepted, session resources being set up
//! 2. **Active**: receive and keepalive loops running, chunks accumulating
//! 3. **Closing**: transport closed or errored, teardown in progress
//! 4. **Closed**: keepalive cancelled, session removed from the manager
//!
//! Chunks below the flush threshold at disconnect are dropped, with a log
//! line recording the loss. There is no forced partial flush.

use crate::audio::accumulator::{AccumulatorConfig, Chunk, ChunkAccumulator};
use crate::audio::flush::{FlushReceipt, FlushSink, PcmProfile};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Current status of an ingest session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// Connection accepted, session resources being prepared
    Connecting,
    /// Receiving messages and accumulating chunks
    Active,
    /// Transport gone, teardown in progress
    Closing,
    /// Fully torn down
    Closed,
}

impl SessionStatus {
    /// Convert status to string for logs and API responses.
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Closing => "closing",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Append-only line log of every successfully parsed inbound message.
///
/// The raw envelope text is recorded verbatim, one message per line, in the
/// session directory. Retention is left to operators; the file is opened in
/// append mode so an existing log is extended, never truncated.
pub struct MessageLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl MessageLog {
    pub fn open(path: PathBuf) -> Result<Self, String> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open message log {}: {}", path.display(), e))?;

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Append one raw message as a line.
    pub fn append_line(&self, raw: &str) -> Result<(), String> {
        let mut file = self.file.lock().unwrap();
        file.write_all(raw.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| format!("Failed to append to message log {}: {}", self.path.display(), e))
    }
}

/// Ingest counters for a single session.
#[derive(Debug, Default, Clone)]
pub struct IngestStats {
    /// Chunks accepted into the accumulator
    pub chunks_received: u64,

    /// Total decoded audio bytes accepted
    pub bytes_received: u64,

    /// Flushes committed (both artifacts written)
    pub flushes_completed: u64,

    /// Flush attempts that failed after the retry
    pub flush_failures: u64,
}

/// Settings shared by all sessions, derived from the application config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Root directory; each session gets its own subdirectory
    pub output_dir: PathBuf,

    /// Accumulator behavior (flush threshold)
    pub accumulator: AccumulatorConfig,

    /// PCM profile declared by flushed WAV artifacts
    pub profile: PcmProfile,

    /// Upper bound on one decoded chunk
    pub max_chunk_bytes: usize,
}

/// Represents one accepted connection and its buffering state.
///
/// ## Thread Safety:
/// Status and stats sit behind RwLocks so the WebSocket actor and HTTP
/// summary endpoints can read concurrently; the accumulator and sink carry
/// their own internal synchronization.
pub struct IngestSession {
    /// Unique identifier for this session
    pub session_id: String,

    /// Current lifecycle state
    status: Arc<RwLock<SessionStatus>>,

    /// Ordered chunk buffer for this session
    pub accumulator: ChunkAccumulator,

    /// Artifact writer for this session
    pub sink: FlushSink,

    /// Raw-message log for this session
    pub message_log: MessageLog,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Ingest counters
    stats: Arc<RwLock<IngestStats>>,

    /// Upper bound on one decoded chunk
    max_chunk_bytes: usize,
}

impl IngestSession {
    /// Create a new session rooted at `<output_dir>/<session_id>/`.
    pub fn new(session_id: String, settings: &SessionSettings) -> Result<Self, String> {
        let session_dir = settings.output_dir.join(&session_id);
        let sink = FlushSink::new(session_dir.clone(), settings.profile.clone())?;
        let message_log = MessageLog::open(session_dir.join("messages.log"))?;

        Ok(Self {
            session_id,
            status: Arc::new(RwLock::new(SessionStatus::Connecting)),
            accumulator: ChunkAccumulator::new(settings.accumulator.clone()),
            sink,
            message_log,
            created_at: Utc::now(),
            stats: Arc::new(RwLock::new(IngestStats::default())),
            max_chunk_bytes: settings.max_chunk_bytes,
        })
    }

    /// Get the current session status.
    pub fn status(&self) -> SessionStatus {
        self.status.read().unwrap().clone()
    }

    fn set_status(&self, new_status: SessionStatus) {
        *self.status.write().unwrap() = new_status;
    }

    /// Mark the session live.
    ///
    /// ## State Transition:
    /// Connecting → Active
    pub fn activate(&self) -> Result<(), String> {
        let current = self.status();
        match current {
            SessionStatus::Connecting => {
                self.set_status(SessionStatus::Active);
                Ok(())
            }
            _ => Err(format!("Cannot activate from status: {:?}", current)),
        }
    }

    /// Tear the session down after transport close or error.
    ///
    /// ## State Transition:
    /// Connecting/Active → Closing → Closed
    ///
    /// ## Returns:
    /// The number of sub-threshold chunks dropped with the session. These are
    /// never flushed; the loss is the documented disconnect behavior.
    pub fn close(&self) -> usize {
        let current = self.status();
        if current == SessionStatus::Closed {
            return 0;
        }

        self.set_status(SessionStatus::Closing);
        let dropped = self.accumulator.chunk_count();
        if !self.accumulator.is_empty() {
            warn!(
                session_id = %self.session_id,
                dropped_chunks = dropped,
                dropped_bytes = self.accumulator.pending_bytes(),
                "Session closed below flush threshold, pending audio dropped"
            );
        }
        self.set_status(SessionStatus::Closed);

        let lifetime_secs = Utc::now()
            .signed_duration_since(self.created_at)
            .num_seconds();
        info!(session_id = %self.session_id, lifetime_secs, "Ingest session closed");

        dropped
    }

    /// Check if the session can accept more audio data.
    pub fn can_accept_audio(&self) -> bool {
        matches!(self.status(), SessionStatus::Active)
    }

    /// Validate one decoded chunk against the session bounds.
    ///
    /// ## Validation Checks:
    /// 1. Non-empty payload
    /// 2. Even byte count (whole 16-bit samples)
    /// 3. At most `max_chunk_bytes`
    pub fn validate_chunk(&self, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("Audio payload is empty".to_string());
        }

        if data.len() % 2 != 0 {
            return Err("Audio payload length must be even for 16-bit samples".to_string());
        }

        if data.len() > self.max_chunk_bytes {
            return Err(format!(
                "Audio payload of {} bytes exceeds the {} byte chunk limit",
                data.len(),
                self.max_chunk_bytes
            ));
        }

        Ok(())
    }

    /// Accept one decoded chunk: validate, append, and flush if ready.
    ///
    /// ## Returns:
    /// - **Ok(Some(receipt))**: the append reached the threshold and the
    ///   drained batch was committed as a numbered artifact pair
    /// - **Ok(None)**: chunk buffered, below threshold
    /// - **Err(message)**: chunk rejected, or the triggered flush failed
    ///   after its retry (the drained batch is lost; the error is surfaced)
    pub fn ingest_chunk(&self, chunk: Chunk) -> Result<Option<FlushReceipt>, String> {
        if !self.can_accept_audio() {
            return Err(format!(
                "Session {} is not accepting audio (status: {})",
                self.session_id,
                self.status().as_str()
            ));
        }

        self.validate_chunk(&chunk)?;

        {
            let mut stats = self.stats.write().unwrap();
            stats.chunks_received += 1;
            stats.bytes_received += chunk.len() as u64;
        }

        self.accumulator.append(chunk);

        let Some(batch) = self.accumulator.drain_if_ready() else {
            return Ok(None);
        };

        match self.sink.write(&batch) {
            Ok(receipt) => {
                self.stats.write().unwrap().flushes_completed += 1;
                info!(
                    session_id = %self.session_id,
                    sequence = receipt.sequence,
                    bytes = receipt.byte_len,
                    "Flushed audio batch"
                );
                Ok(Some(receipt))
            }
            Err(err) => {
                self.stats.write().unwrap().flush_failures += 1;
                Err(err)
            }
        }
    }

    /// Record one successfully parsed raw message in the session log.
    pub fn log_message(&self, raw: &str) -> Result<(), String> {
        self.message_log.append_line(raw)
    }

    /// Get a copy of the current ingest counters.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().unwrap().clone()
    }

    /// Chunks currently buffered below the threshold.
    pub fn pending_chunks(&self) -> usize {
        self.accumulator.chunk_count()
    }
}

/// Manages the set of live ingest sessions.
///
/// ## Thread Safety:
/// RwLock over the session map allows concurrent lookups from the WebSocket
/// actors and HTTP summary endpoints, with exclusive access for create/remove.
///
/// ## Resource Management:
/// Enforces the configured concurrent-session ceiling; a connection arriving
/// at the ceiling is refused before any session resources are allocated.
pub struct SessionManager {
    /// Live sessions mapped by session ID
    sessions: RwLock<HashMap<String, Arc<IngestSession>>>,

    /// Maximum number of concurrent sessions allowed
    max_concurrent_sessions: usize,
}

impl SessionManager {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Create a new session with a generated ID.
    ///
    /// Settings are passed per call, so sessions created after a runtime
    /// config update pick up the new values while live sessions keep the
    /// settings they started with.
    ///
    /// ## Returns:
    /// - **Ok(session)**: session created and registered
    /// - **Err(message)**: session ceiling reached, or session resources
    ///   (directory, log) could not be created
    pub fn create_session(&self, settings: &SessionSettings) -> Result<Arc<IngestSession>, String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = Arc::new(IngestSession::new(session_id.clone(), settings)?);
        sessions.insert(session_id, Arc::clone(&session));

        Ok(session)
    }

    /// Remove a session from the registry.
    pub fn remove_session(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    /// Number of live sessions.
    pub fn active_session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Aggregate view of all live sessions for the health endpoints.
    pub fn summary(&self) -> SessionManagerSummary {
        let sessions = self.sessions.read().unwrap();

        let mut status_counts = HashMap::new();
        let mut total_chunks = 0u64;
        let mut total_bytes = 0u64;
        let mut total_flushes = 0u64;
        let mut total_flush_failures = 0u64;

        for session in sessions.values() {
            *status_counts
                .entry(session.status().as_str().to_string())
                .or_insert(0usize) += 1;

            let stats = session.stats();
            total_chunks += stats.chunks_received;
            total_bytes += stats.bytes_received;
            total_flushes += stats.flushes_completed;
            total_flush_failures += stats.flush_failures;
        }

        SessionManagerSummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_concurrent_sessions,
            status_counts,
            total_chunks,
            total_bytes,
            total_flushes,
            total_flush_failures,
        }
    }
}

/// Summary of session manager state.
#[derive(Debug)]
pub struct SessionManagerSummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub status_counts: HashMap<String, usize>,
    pub total_chunks: u64,
    pub total_bytes: u64,
    pub total_flushes: u64,
    pub total_flush_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_settings(threshold: usize) -> (SessionSettings, PathBuf) {
        let dir = std::env::temp_dir().join(format!("audio-ingest-session-{}", Uuid::new_v4()));
        let settings = SessionSettings {
            output_dir: dir.clone(),
            accumulator: AccumulatorConfig {
                flush_threshold_chunks: threshold,
            },
            profile: PcmProfile::default(),
            max_chunk_bytes: 1024,
        };
        (settings, dir)
    }

    #[test]
    fn test_status_transitions() {
        let (settings, dir) = test_settings(50);
        let session = IngestSession::new("s1".to_string(), &settings).unwrap();

        assert_eq!(session.status(), SessionStatus::Connecting);
        assert!(!session.can_accept_audio());

        session.activate().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.can_accept_audio());

        // A second activate is a protocol violation
        assert!(session.activate().is_err());

        session.close();
        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(!session.can_accept_audio());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_chunk_validation() {
        let (settings, dir) = test_settings(50);
        let session = IngestSession::new("s1".to_string(), &settings).unwrap();

        assert!(session.validate_chunk(&[1, 2]).is_ok());
        assert!(session.validate_chunk(&[]).is_err());
        assert!(session.validate_chunk(&[1, 2, 3]).is_err());
        assert!(session.validate_chunk(&vec![0u8; 1026]).is_err());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_ingest_flushes_at_threshold() {
        let (settings, dir) = test_settings(5);
        let session = IngestSession::new("s1".to_string(), &settings).unwrap();
        session.activate().unwrap();

        for i in 0..4u16 {
            assert!(session.ingest_chunk(i.to_le_bytes().to_vec()).unwrap().is_none());
        }

        let receipt = session
            .ingest_chunk(4u16.to_le_bytes().to_vec())
            .unwrap()
            .expect("fifth chunk triggers the flush");
        assert_eq!(receipt.sequence, 0);

        let expected: Vec<u8> = (0..5u16).flat_map(|i| i.to_le_bytes()).collect();
        assert_eq!(fs::read(&receipt.pcm_path).unwrap(), expected);

        // Fresh accumulation after the flush
        assert_eq!(session.pending_chunks(), 0);
        assert!(session.ingest_chunk(vec![9, 9]).unwrap().is_none());
        assert_eq!(session.pending_chunks(), 1);

        let stats = session.stats();
        assert_eq!(stats.chunks_received, 6);
        assert_eq!(stats.flushes_completed, 1);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_disconnect_mid_buffer_drops_without_flush() {
        let (settings, dir) = test_settings(50);
        let session = IngestSession::new("s1".to_string(), &settings).unwrap();
        session.activate().unwrap();

        for i in 0..10u16 {
            session.ingest_chunk(i.to_le_bytes().to_vec()).unwrap();
        }

        let dropped = session.close();
        assert_eq!(dropped, 10);
        assert_eq!(session.sink.next_sequence(), 0);

        // No artifacts were written for the sub-threshold chunks
        let session_dir = settings.output_dir.join("s1");
        let artifacts: Vec<_> = fs::read_dir(&session_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("output"))
            .collect();
        assert!(artifacts.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_manager_enforces_session_ceiling() {
        let (settings, dir) = test_settings(50);
        let manager = SessionManager::new(2);

        let first = manager.create_session(&settings).unwrap();
        let _second = manager.create_session(&settings).unwrap();
        assert!(manager.create_session(&settings).is_err());
        assert_eq!(manager.active_session_count(), 2);

        let summary = manager.summary();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.max_sessions, 2);
        assert_eq!(summary.status_counts.get("connecting"), Some(&2));

        assert!(manager.remove_session(&first.session_id));
        assert_eq!(manager.active_session_count(), 1);
        let _third = manager.create_session(&settings).unwrap();

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_message_log_appends_lines() {
        let (settings, dir) = test_settings(50);
        let session = IngestSession::new("s1".to_string(), &settings).unwrap();

        session.log_message(r#"{"type":"ping"}"#).unwrap();
        session.log_message(r#"{"type":"other"}"#).unwrap();

        let log_path = settings.output_dir.join("s1").join("messages.log");
        let contents = fs::read_to_string(log_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![r#"{"type":"ping"}"#, r#"{"type":"other"}"#]);

        let _ = fs::remove_dir_all(dir);
    }
}
