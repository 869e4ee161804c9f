//! Stateful sample-rate converter built on `rubato`'s FFT-based resampler.
//!
//! Wire-level chunks (20ms PBX frames, one TTS sentence at a time) almost
//! never land on `rubato`'s internal chunk boundary, so this keeps one
//! `FftFixedIn` instance alive for the life of a call and buffers whatever
//! doesn't divide evenly into a full chunk, carrying it into the next
//! `resample` call instead of resetting the filter at every chunk boundary.

use rubato::{FftFixedIn, Resampler as _};
use tracing::warn;

/// Samples per channel fed to the inner resampler per `process` call.
/// Matches the chunk size used for file-level FFT resampling elsewhere in
/// the example pack; large enough for the FFT resampler's window to do
/// useful work, small enough to keep streaming latency in the tens of ms.
const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Converts between two fixed sample rates, carrying both the unprocessed
/// input tail and `rubato`'s own filter state across calls to `resample`.
pub struct Resampler {
    inner: FftFixedIn<f32>,
    in_rate: u32,
    out_rate: u32,
    pending: Vec<f32>,
}

impl Resampler {
    /// A resampler converting `in_rate` Hz PCM to `out_rate` Hz PCM.
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        let inner = FftFixedIn::<f32>::new(in_rate as usize, out_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .expect("telephony sample rates are always valid rubato resampler parameters");
        Self { inner, in_rate, out_rate, pending: Vec::new() }
    }

    pub fn upsampler_8k_to_16k() -> Self {
        Self::new(8_000, 16_000)
    }

    pub fn downsampler_to_8k(source_rate: u32) -> Self {
        Self::new(source_rate, 8_000)
    }

    /// Resample one chunk. `input` and the returned chunk are 16-bit mono
    /// PCM. Input that doesn't fill a full `CHUNK_SIZE` block is buffered
    /// and combined with the next call's input rather than padded or
    /// dropped, so the resampler's FFT window never sees an artificial
    /// boundary at every caller-chosen chunk size.
    pub fn resample(&mut self, input: &[i16]) -> Vec<i16> {
        self.pending.extend(input.iter().map(|&s| s as f32 / i16::MAX as f32));

        let mut out = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            self.process_chunk(&chunk, &mut out);
        }
        out
    }

    /// Flush whatever partial chunk remains (e.g. at call teardown), zero-padding
    /// it to a full chunk and keeping only the proportional share of the
    /// output, the same tail handling a one-shot batch resample would use.
    pub fn flush(&mut self) -> Vec<i16> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let remaining = self.pending.len();
        let mut padded = vec![0.0f32; CHUNK_SIZE];
        padded[..remaining].copy_from_slice(&self.pending);
        self.pending.clear();

        let mut out = Vec::new();
        let produced = self.process_chunk(&padded, &mut out);
        let keep = ((remaining as f64 * self.out_rate as f64 / self.in_rate as f64).ceil() as usize).min(produced);
        out.truncate(keep);
        out
    }

    fn process_chunk(&mut self, chunk: &[f32], out: &mut Vec<i16>) -> usize {
        match self.inner.process(&[chunk], None) {
            Ok(result) => {
                let Some(channel) = result.first() else { return 0 };
                let start = out.len();
                out.extend(channel.iter().map(|&s| {
                    (s * i16::MAX as f32).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
                }));
                out.len() - start
            }
            Err(e) => {
                warn!(error = %e, "resampler error, emitting silence for this window");
                0
            }
        }
    }

    /// Resample from little-endian PCM16 bytes to little-endian PCM16 bytes.
    pub fn resample_bytes(&mut self, input: &[u8]) -> Vec<u8> {
        let samples: Vec<i16> = input
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        let out = self.resample(&samples);
        let mut bytes = Vec::with_capacity(out.len() * 2);
        for s in out {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }
}
