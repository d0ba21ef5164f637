//! # Flush Sink and Artifact Sequencing
//!
//! Persists drained chunk batches as numbered audio artifacts. Every completed
//! flush produces two files derived from the same byte concatenation:
//!
//! - `output{n}.pcm` — the raw byte stream exactly as received
//! - `output{n}.wav` — the same bytes wrapped in a RIFF/WAVE container that
//!   declares the fixed PCM profile (mono, 16-bit, 22500 Hz by default)
//!
//! Sequence numbers start at 0 and are gap-free: a number is consumed only
//! when both representations were written, so a failed attempt can be retried
//! under the same name and artifacts from one run never collide.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::audio::accumulator::Chunk;

/// Fixed audio profile stamped into the framed container.
///
/// The server does not negotiate formats; clients are expected to send PCM
/// matching this profile and the WAV header simply declares it.
#[derive(Debug, Clone)]
pub struct PcmProfile {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for PcmProfile {
    fn default() -> Self {
        Self {
            sample_rate: 22500,  // Matches the client capture cadence
            channels: 1,         // Mono
            bit_depth: 16,       // 16-bit little-endian samples
        }
    }
}

/// Outcome of one completed flush.
#[derive(Debug)]
pub struct FlushReceipt {
    /// Sequence number used to derive the artifact names
    pub sequence: u64,

    /// Total audio bytes committed in this flush
    pub byte_len: usize,

    /// Path of the raw artifact
    pub pcm_path: PathBuf,

    /// Path of the framed artifact
    pub wav_path: PathBuf,
}

/// Monotonic, gap-free artifact numbering.
///
/// ## Contract:
/// Numbers start at 0 and strictly increase in flush-completion order.
/// The lock is held across the caller's commit closure, so concurrent flushes
/// serialize and can never observe the same number; the counter advances only
/// when the commit succeeds, so failed attempts leave no gaps.
pub struct ArtifactSequence {
    next: Mutex<u64>,
}

impl ArtifactSequence {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(0),
        }
    }

    /// Run `commit` with the next sequence number, advancing only on success.
    ///
    /// ## Returns:
    /// - **Ok(sequence)**: the commit succeeded under this number
    /// - **Err(message)**: the commit failed; the number remains available
    ///   for the next attempt
    pub fn commit<F>(&self, commit: F) -> Result<u64, String>
    where
        F: FnOnce(u64) -> Result<(), String>,
    {
        let mut next = self.next.lock().unwrap();
        let sequence = *next;
        commit(sequence)?;
        *next += 1;
        Ok(sequence)
    }

    /// The number the next successful commit will use.
    pub fn peek(&self) -> u64 {
        *self.next.lock().unwrap()
    }
}

impl Default for ArtifactSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable writer for flushed chunk batches.
pub struct FlushSink {
    /// Directory the numbered artifacts land in
    output_dir: PathBuf,

    /// Audio profile declared by the framed container
    profile: PcmProfile,

    /// Artifact numbering for this sink
    sequence: ArtifactSequence,
}

impl FlushSink {
    /// Create a sink rooted at `output_dir`, creating the directory if needed.
    pub fn new(output_dir: PathBuf, profile: PcmProfile) -> Result<Self, String> {
        fs::create_dir_all(&output_dir)
            .map_err(|e| format!("Failed to create output directory {}: {}", output_dir.display(), e))?;

        Ok(Self {
            output_dir,
            profile,
            sequence: ArtifactSequence::new(),
        })
    }

    /// Persist one drained batch as the next numbered artifact pair.
    ///
    /// The chunks are concatenated in order and written twice (raw + framed).
    /// A failed attempt is retried once before the error is surfaced; in that
    /// case the batch is gone from the accumulator but the sequence number
    /// was not consumed, so the next flush reuses it.
    pub fn write(&self, chunks: &[Chunk]) -> Result<FlushReceipt, String> {
        let bytes: Vec<u8> = chunks.concat();

        let sequence = self.sequence.commit(|seq| {
            match self.persist(seq, &bytes) {
                Ok(()) => Ok(()),
                Err(first) => {
                    warn!(sequence = seq, error = %first, "Flush attempt failed, retrying once");
                    self.persist(seq, &bytes)
                        .map_err(|second| format!("Flush retry failed: {} (first attempt: {})", second, first))
                }
            }
        })?;

        debug!(
            sequence,
            bytes = bytes.len(),
            chunks = chunks.len(),
            "Flush committed"
        );

        Ok(FlushReceipt {
            sequence,
            byte_len: bytes.len(),
            pcm_path: self.pcm_path(sequence),
            wav_path: self.wav_path(sequence),
        })
    }

    /// The number the next successful flush will use.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.peek()
    }

    fn pcm_path(&self, sequence: u64) -> PathBuf {
        self.output_dir.join(format!("output{}.pcm", sequence))
    }

    fn wav_path(&self, sequence: u64) -> PathBuf {
        self.output_dir.join(format!("output{}.wav", sequence))
    }

    /// Write both representations for one sequence number.
    ///
    /// Both files are synced before the attempt counts as complete; failing
    /// either write fails the whole attempt.
    fn persist(&self, sequence: u64, bytes: &[u8]) -> Result<(), String> {
        // Raw container first
        let pcm_path = self.pcm_path(sequence);
        let mut pcm_file = File::create(&pcm_path)
            .map_err(|e| format!("Failed to create {}: {}", pcm_path.display(), e))?;
        pcm_file
            .write_all(bytes)
            .map_err(|e| format!("Failed to write {}: {}", pcm_path.display(), e))?;
        pcm_file
            .sync_all()
            .map_err(|e| format!("Failed to sync {}: {}", pcm_path.display(), e))?;

        // Framed container with the declared PCM profile
        let samples = decode_samples(bytes);
        let header = wav::Header::new(
            wav::header::WAV_FORMAT_PCM,
            self.profile.channels,
            self.profile.sample_rate,
            self.profile.bit_depth,
        );

        let wav_path = self.wav_path(sequence);
        let mut wav_file = File::create(&wav_path)
            .map_err(|e| format!("Failed to create {}: {}", wav_path.display(), e))?;
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut wav_file)
            .map_err(|e| format!("Failed to write {}: {}", wav_path.display(), e))?;
        wav_file
            .sync_all()
            .map_err(|e| format!("Failed to sync {}: {}", wav_path.display(), e))?;

        Ok(())
    }
}

/// Convert raw little-endian PCM bytes to 16-bit samples.
///
/// Chunk validation upstream guarantees an even byte count, so every byte
/// pair maps to exactly one sample.
fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    fn temp_sink_dir() -> PathBuf {
        std::env::temp_dir().join(format!("audio-ingest-flush-{}", Uuid::new_v4()))
    }

    fn two_byte_chunks(count: u16) -> Vec<Chunk> {
        (0..count).map(|i| i.to_le_bytes().to_vec()).collect()
    }

    #[test]
    fn test_monotonic_gap_free_numbering() {
        let dir = temp_sink_dir();
        let sink = FlushSink::new(dir.clone(), PcmProfile::default()).unwrap();

        for expected in 0..3u64 {
            let receipt = sink.write(&two_byte_chunks(4)).unwrap();
            assert_eq!(receipt.sequence, expected);
            assert!(receipt.pcm_path.exists());
            assert!(receipt.wav_path.exists());
        }

        assert_eq!(sink.next_sequence(), 3);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_artifact_pairing_raw_equals_unwrapped_wav() {
        let dir = temp_sink_dir();
        let sink = FlushSink::new(dir.clone(), PcmProfile::default()).unwrap();

        let chunks = two_byte_chunks(50);
        let receipt = sink.write(&chunks).unwrap();

        let raw = fs::read(&receipt.pcm_path).unwrap();
        assert_eq!(raw, chunks.concat());

        let mut wav_file = File::open(&receipt.wav_path).unwrap();
        let (header, data) = wav::read(&mut wav_file).unwrap();
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 22500);
        assert_eq!(header.bits_per_sample, 16);

        let samples = match data {
            wav::BitDepth::Sixteen(samples) => samples,
            other => panic!("Unexpected sample format: {:?}", other),
        };
        let unwrapped: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(unwrapped, raw);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_failed_flush_does_not_consume_a_number() {
        let dir = temp_sink_dir();
        let sink = FlushSink::new(dir.clone(), PcmProfile::default()).unwrap();

        // Pull the directory out from under the sink so both attempts fail
        fs::remove_dir_all(&dir).unwrap();
        assert!(sink.write(&two_byte_chunks(2)).is_err());
        assert_eq!(sink.next_sequence(), 0);

        // Once the directory is back, the same number is used
        fs::create_dir_all(&dir).unwrap();
        let receipt = sink.write(&two_byte_chunks(2)).unwrap();
        assert_eq!(receipt.sequence, 0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_concurrent_commits_never_share_a_number() {
        let sequence = Arc::new(ArtifactSequence::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let sequence = Arc::clone(&sequence);
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    seen.push(sequence.commit(|_| Ok(())).unwrap());
                }
                seen
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<u64> = (0..200).collect();
        assert_eq!(all, expected);
    }
}
