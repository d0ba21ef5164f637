//! # Chunk Accumulator
//!
//! Implements the ordered, append-only chunk buffer that sits between the
//! WebSocket intake path and the flush sink. Audio arrives as discrete decoded
//! chunks; the accumulator collects them until a configured count threshold is
//! reached and then hands the whole batch over in one atomic step.
//!
//! ## Key Features:
//! - **Arrival order preserved**: chunks are appended to the tail and drained
//!   front-to-back, so the flushed artifact plays back in receive order
//! - **Atomic drain**: the ready-check and the take happen under one lock,
//!   so an append racing a drain can never split a batch or double-drain it
//! - **Thread safety**: safe for concurrent access from the WebSocket intake
//!   and a flush in progress

use std::sync::{Arc, Mutex};

/// One decoded unit of raw audio bytes from a single inbound append message.
///
/// Chunks are created by the WebSocket handler after base64 decoding and are
/// never mutated afterwards; the accumulator takes ownership on append.
pub type Chunk = Vec<u8>;

/// Configuration for accumulator behavior.
///
/// ## Rust Concepts:
/// - **#[derive(Debug, Clone)]**: Automatically implements debug printing and cloning
/// - **usize**: Platform-specific unsigned integer for counts and sizes
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Number of chunks that must be collected before a drain becomes ready
    pub flush_threshold_chunks: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            flush_threshold_chunks: 50,  // One flush per 50 append messages
        }
    }
}

/// Internal accumulator state, always accessed under the lock.
///
/// Invariant: the chunk count reported to callers is always the length of
/// `chunks`; both are reset together by a drain.
#[derive(Debug, Default)]
struct AccumulatorInner {
    /// Collected chunks in arrival order
    chunks: Vec<Chunk>,

    /// Total bytes across `chunks` (kept alongside for cheap stats reads)
    total_bytes: usize,
}

/// Ordered chunk buffer with an atomic check-and-take drain.
///
/// ## Thread Safety:
/// Uses Arc<Mutex<AccumulatorInner>> to safely share the pending batch between
/// the intake path and a flush in progress. Every mutating operation holds the
/// lock for its whole critical section, so append and drain are each
/// indivisible with respect to concurrent callers.
pub struct ChunkAccumulator {
    /// The pending batch, shared behind a lock
    inner: Arc<Mutex<AccumulatorInner>>,

    /// Configuration settings for this accumulator
    config: AccumulatorConfig,
}

impl ChunkAccumulator {
    /// Create a new, empty accumulator with the given configuration.
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AccumulatorInner::default())),
            config,
        }
    }

    /// Append one decoded chunk to the tail of the pending batch.
    ///
    /// ## Parameters:
    /// - **chunk**: Decoded audio bytes; ownership moves into the accumulator
    ///
    /// Never fails for a well-formed chunk — payload validation (length,
    /// size bound) happens upstream in the session before append is called.
    pub fn append(&self, chunk: Chunk) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_bytes += chunk.len();
        inner.chunks.push(chunk);
    }

    /// Atomically take the full pending batch if the threshold is reached.
    ///
    /// ## Returns:
    /// - **Some(batch)**: count reached `flush_threshold_chunks`; the whole
    ///   ordered batch is returned and the accumulator is reset to empty in
    ///   the same critical section
    /// - **None**: below threshold; nothing is mutated
    ///
    /// Because the check and the take share one lock acquisition, a chunk can
    /// never be drained twice or skipped while counted: any append not yet in
    /// the drained batch lands in the fresh accumulation that follows it.
    pub fn drain_if_ready(&self) -> Option<Vec<Chunk>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.chunks.len() < self.config.flush_threshold_chunks {
            return None;
        }

        inner.total_bytes = 0;
        Some(std::mem::take(&mut inner.chunks))
    }

    /// Number of chunks currently pending.
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    /// Total bytes currently pending across all chunks.
    pub fn pending_bytes(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }

    /// Check if the accumulator holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn accumulator(threshold: usize) -> ChunkAccumulator {
        ChunkAccumulator::new(AccumulatorConfig {
            flush_threshold_chunks: threshold,
        })
    }

    #[test]
    fn test_below_threshold_never_drains() {
        let acc = accumulator(50);

        for i in 0..49 {
            acc.append(vec![i as u8, (i + 1) as u8]);
            assert!(acc.drain_if_ready().is_none());
        }

        assert_eq!(acc.chunk_count(), 49);
        assert_eq!(acc.pending_bytes(), 98);
    }

    #[test]
    fn test_threshold_append_drains_exactly_once_in_order() {
        let acc = accumulator(50);

        // 50 distinct 2-byte chunks, appended one at a time
        for i in 0..50u16 {
            acc.append(i.to_le_bytes().to_vec());
        }

        let batch = acc.drain_if_ready().expect("threshold reached");
        assert_eq!(batch.len(), 50);
        for (i, chunk) in batch.iter().enumerate() {
            assert_eq!(chunk, &(i as u16).to_le_bytes().to_vec());
        }

        // The drain reset the accumulation: the next append starts fresh
        assert!(acc.is_empty());
        acc.append(vec![0xAA, 0xBB]);
        assert_eq!(acc.chunk_count(), 1);
        assert!(acc.drain_if_ready().is_none());
    }

    #[test]
    fn test_drain_takes_everything_collected() {
        let acc = accumulator(3);

        for i in 0..5u8 {
            acc.append(vec![i]);
        }

        // Count exceeded the threshold before the drain; the drain still
        // takes the full ordered sequence, not just the first 3
        let batch = acc.drain_if_ready().unwrap();
        assert_eq!(batch.len(), 5);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_concurrent_appends_and_drains_lose_nothing() {
        let acc = Arc::new(accumulator(10));
        let writers = 4usize;
        let per_writer = 250usize;

        let mut handles = Vec::new();

        // Writers append tagged chunks while drainers race them
        for w in 0..writers {
            let acc = Arc::clone(&acc);
            handles.push(thread::spawn(move || {
                for i in 0..per_writer {
                    acc.append(vec![w as u8, (i % 256) as u8]);
                }
            }));
        }

        let mut drained: Vec<Vec<Chunk>> = Vec::new();
        for handle in handles {
            handle.join().unwrap();
            if let Some(batch) = acc.drain_if_ready() {
                drained.push(batch);
            }
        }
        // Take whatever is left below threshold for the accounting check
        let mut remainder_count = acc.chunk_count();
        while let Some(batch) = acc.drain_if_ready() {
            remainder_count -= batch.len();
            drained.push(batch);
        }

        let drained_count: usize = drained.iter().map(|b| b.len()).sum();
        assert_eq!(drained_count + remainder_count, writers * per_writer);

        // Per-writer ordering survives interleaving: within each writer's
        // tag, chunk payloads appear in append order across the batches
        for w in 0..writers as u8 {
            let sequence: Vec<u8> = drained
                .iter()
                .flatten()
                .filter(|c| c[0] == w)
                .map(|c| c[1])
                .collect();
            let expected: Vec<u8> = (0..per_writer).map(|i| (i % 256) as u8).collect();
            assert_eq!(&sequence[..], &expected[..sequence.len()]);
        }
    }
}
