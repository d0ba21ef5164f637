//! # Audio Ingest Module
//!
//! Implements the buffering-and-flush pipeline behind the WebSocket endpoint.
//!
//! ## Key Components:
//! - **Chunk Accumulator**: ordered append-only buffer with an atomic
//!   threshold drain
//! - **Flush Sink**: writes each drained batch as a numbered artifact pair
//!   (`output{n}.pcm` + `output{n}.wav`) with gap-free sequencing
//! - **Ingest Session**: per-connection ownership of accumulator, sink, and
//!   raw-message log, plus the connection lifecycle state machine
//!
//! ## Audio Format:
//! - **Sample Rate**: 22500 Hz
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: little-endian signed integers, base64 over the wire

// WebSocket handler is in src/websocket.rs at the root level
pub mod accumulator;  // Ordered chunk buffer with atomic drain
pub mod flush;        // Artifact writer and sequence numbering
pub mod session;      // Session lifecycle and registry
