//! Energy-gated voice activity detection, endpointing, and barge-in.
//!
//! Each 16kHz frame is pre-emphasized, energy-gated, and only then handed
//! to the injected [`VadEngine`] classifier. The endpointer turns the
//! resulting per-frame speech/silence decisions into utterance boundaries;
//! the barge-in detector runs the same decisions through a separate
//! counter armed only while the agent is speaking.

use tracing::warn;

use crate::collaborators::VadEngine;

/// Exact sample count of one 32ms 16kHz VAD frame.
pub const VAD_FRAME_SAMPLES: usize = 512;

/// Pre-emphasis + energy gate in front of a black-box speech classifier.
pub struct SpeechEnergyVad {
    preemphasis_alpha: f64,
    min_audio_energy: f64,
    prev_raw_sample: i16,
}

impl SpeechEnergyVad {
    pub fn new(preemphasis_alpha: f64, min_audio_energy: f64) -> Self {
        Self {
            preemphasis_alpha,
            min_audio_energy,
            prev_raw_sample: 0,
        }
    }

    /// Apply `y[n] = x[n] - alpha*x[n-1]` across the frame, carrying the
    /// last raw sample of the previous frame as x[-1].
    fn pre_emphasize(&mut self, frame: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(frame.len());
        let mut prev = self.prev_raw_sample as f64;
        for &x in frame {
            let y = x as f64 - self.preemphasis_alpha * prev;
            out.push(y.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            prev = x as f64;
        }
        if let Some(&last) = frame.last() {
            self.prev_raw_sample = last;
        }
        out
    }

    /// Normalized RMS energy of a frame, in [-1, 1] sample space.
    fn rms_energy(frame: &[i16]) -> f64 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: f64 = frame
            .iter()
            .map(|&s| {
                let n = s as f64 / i16::MAX as f64;
                n * n
            })
            .sum();
        (sum / frame.len() as f64).sqrt()
    }

    /// Classify one frame. Energy below the floor is silence regardless of
    /// the classifier; classifier errors fail safe to non-speech.
    pub fn classify(&mut self, frame: &[i16], vad_engine: &dyn VadEngine) -> bool {
        let filtered = self.pre_emphasize(frame);
        let energy = Self::rms_energy(&filtered);
        if energy < self.min_audio_energy {
            return false;
        }
        match vad_engine.is_speech(&filtered) {
            Ok(speech) => speech,
            Err(e) => {
                warn!(error = %e, "vad classifier failed, treating frame as non-speech");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointState {
    Idle,
    Speaking,
}

/// An utterance boundary decision returned from [`Endpointer::push_frame`].
#[derive(Debug, PartialEq, Eq)]
pub enum EndpointDecision {
    /// No state change this frame.
    None,
    /// Speech began; a new utterance buffer was opened.
    Started,
    /// Enough silence followed enough speech: `speech_chunks >=
    /// min_speech_frames`. Carries the accumulated utterance PCM.
    UtteranceReady(Vec<u8>),
    /// Enough silence followed too little speech; the utterance is dropped.
    Dropped,
}

/// Endpointing state machine over a stream of (frame, is_speech) pairs.
pub struct Endpointer {
    state: EndpointState,
    silent_frames_needed: usize,
    min_speech_frames: usize,
    buffer: Vec<u8>,
    speech_chunks: usize,
    silent_chunks: usize,
}

impl Endpointer {
    /// `frame_ms` is the duration of one VAD frame (32ms at 16kHz/512
    /// samples); the timeout/duration configs are expressed in
    /// milliseconds and converted to frame counts here.
    pub fn new(silence_timeout_ms: u64, min_speech_duration_ms: u64, frame_ms: u64) -> Self {
        Self {
            state: EndpointState::Idle,
            silent_frames_needed: silence_timeout_ms.div_ceil(frame_ms) as usize,
            min_speech_frames: min_speech_duration_ms.div_ceil(frame_ms) as usize,
            buffer: Vec::new(),
            speech_chunks: 0,
            silent_chunks: 0,
        }
    }

    pub fn push_frame(&mut self, frame_pcm: &[u8], is_speech: bool) -> EndpointDecision {
        match self.state {
            EndpointState::Idle => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(frame_pcm);
                    self.speech_chunks = 1;
                    self.silent_chunks = 0;
                    EndpointDecision::Started
                } else {
                    EndpointDecision::None
                }
            }
            EndpointState::Speaking => {
                self.buffer.extend_from_slice(frame_pcm);
                if is_speech {
                    self.speech_chunks += 1;
                    self.silent_chunks = 0;
                    EndpointDecision::None
                } else {
                    self.silent_chunks += 1;
                    if self.silent_chunks >= self.silent_frames_needed {
                        self.state = EndpointState::Idle;
                        let speech_chunks = self.speech_chunks;
                        let utterance = std::mem::take(&mut self.buffer);
                        self.speech_chunks = 0;
                        self.silent_chunks = 0;
                        if speech_chunks >= self.min_speech_frames {
                            EndpointDecision::UtteranceReady(utterance)
                        } else {
                            EndpointDecision::Dropped
                        }
                    } else {
                        EndpointDecision::None
                    }
                }
            }
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.state == EndpointState::Speaking
    }
}

/// Barge-in detection: a separate counter from endpointing, armed only
/// while the agent is speaking, disarmed (and reset) the instant that flag
/// clears so accidental noise can't interrupt across turns.
pub struct BargeInDetector {
    min_chunks: usize,
    counter: usize,
    armed: bool,
}

impl BargeInDetector {
    pub fn new(min_chunks: usize) -> Self {
        Self {
            min_chunks,
            counter: 0,
            armed: false,
        }
    }

    pub fn set_armed(&mut self, armed: bool) {
        if !armed {
            self.counter = 0;
        }
        self.armed = armed;
    }

    /// Feed one frame's speech decision. Returns `true` exactly once, the
    /// frame at which `bargein_chunks` reaches the threshold.
    pub fn push(&mut self, is_speech: bool) -> bool {
        if !self.armed {
            self.counter = 0;
            return false;
        }
        if is_speech {
            self.counter += 1;
        } else {
            self.counter = 0;
        }
        if self.counter >= self.min_chunks {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSpeech;
    impl VadEngine for AlwaysSpeech {
        fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct AlwaysError;
    impl VadEngine for AlwaysError {
        fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("model unavailable"))
        }
    }

    #[test]
    fn test_energy_gate_overrides_classifier_below_floor() {
        let mut vad = SpeechEnergyVad::new(0.95, 0.001);
        let silence = vec![0i16; VAD_FRAME_SAMPLES];
        assert!(!vad.classify(&silence, &AlwaysSpeech));
    }

    #[test]
    fn test_classifier_error_fails_safe_to_non_speech() {
        let mut vad = SpeechEnergyVad::new(0.95, 0.0);
        let loud = vec![5000i16; VAD_FRAME_SAMPLES];
        assert!(!vad.classify(&loud, &AlwaysError));
    }

    #[test]
    fn test_classifier_accepted_above_energy_floor() {
        let mut vad = SpeechEnergyVad::new(0.95, 0.0);
        let loud = vec![5000i16; VAD_FRAME_SAMPLES];
        assert!(vad.classify(&loud, &AlwaysSpeech));
    }

    #[test]
    fn test_endpointer_emits_utterance_after_sufficient_speech_and_silence() {
        // frame_ms=32, silence_timeout=1500 -> ceil(1500/32)=47 frames,
        // min_speech_duration=300 -> ceil(300/32)=10 frames.
        let mut ep = Endpointer::new(1500, 300, 32);
        let frame = vec![0u8; 1024];

        for _ in 0..15 {
            let d = ep.push_frame(&frame, true);
            assert!(matches!(d, EndpointDecision::None | EndpointDecision::Started));
        }
        let mut ready = None;
        for _ in 0..47 {
            let d = ep.push_frame(&frame, false);
            if let EndpointDecision::UtteranceReady(u) = d {
                ready = Some(u);
                break;
            }
        }
        assert!(ready.is_some());
    }

    #[test]
    fn test_endpointer_drops_utterance_shorter_than_min_speech_duration() {
        let mut ep = Endpointer::new(1500, 300, 32);
        let frame = vec![0u8; 1024];

        ep.push_frame(&frame, true); // 1 speech frame, well below the 10 needed
        let mut decision = EndpointDecision::None;
        for _ in 0..47 {
            decision = ep.push_frame(&frame, false);
            if !matches!(decision, EndpointDecision::None) {
                break;
            }
        }
        assert!(matches!(decision, EndpointDecision::Dropped));
    }

    #[test]
    fn test_barge_in_fires_once_then_requires_new_speech_run() {
        let mut detector = BargeInDetector::new(3);
        detector.set_armed(true);
        assert!(!detector.push(true));
        assert!(!detector.push(true));
        assert!(detector.push(true));
        assert!(!detector.push(true));
    }

    #[test]
    fn test_barge_in_disarmed_ignores_speech() {
        let mut detector = BargeInDetector::new(1);
        detector.set_armed(false);
        assert!(!detector.push(true));
    }

    #[test]
    fn test_barge_in_silence_resets_counter() {
        let mut detector = BargeInDetector::new(3);
        detector.set_armed(true);
        assert!(!detector.push(true));
        assert!(!detector.push(false));
        assert!(!detector.push(true));
        assert!(!detector.push(true));
    }
}
