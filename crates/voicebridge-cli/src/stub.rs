//! Placeholder collaborator implementations wired in until a real STT/TTS/
//! policy/VAD backend is plugged in. These are black-box external services —
//! no dialogue-policy design or model loading belongs in this workspace — so
//! this module exists only to make `voicebridge serve` runnable standalone
//! for smoke-testing the relay and turn pipeline.

use async_trait::async_trait;
use futures::stream;
use tracing::warn;

use voicebridge_media::collaborators::{
    ConversationalPolicy, PolicyEvent, PolicyRequest, PolicyStream, SttEngine, TtsAudio, TtsEngine, VadEngine,
};

/// Greets once, then echoes the caller's transcript back. Good enough to
/// drive the turn pipeline end to end without a real conversational policy.
pub struct EchoPolicy;

#[async_trait]
impl ConversationalPolicy for EchoPolicy {
    async fn stream(&self, request: PolicyRequest) -> anyhow::Result<PolicyStream> {
        let text = if request.user_text.is_empty() {
            "Hello, this is Nationwide Screening calling. How can I help you today? ".to_string()
        } else {
            format!("You said: {}. Is there anything else? ", request.user_text.trim())
        };
        let events = vec![PolicyEvent::TextDelta(text), PolicyEvent::Done];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// No speech-to-text backend wired in; every utterance transcribes empty,
/// which the turn pipeline treats as a skipped turn.
pub struct UnconfiguredStt;

impl SttEngine for UnconfiguredStt {
    fn transcribe(&self, _pcm16k: &[u8]) -> anyhow::Result<String> {
        warn!("no STT backend configured; returning empty transcript");
        Ok(String::new())
    }
}

/// No text-to-speech backend wired in; synthesizes silence proportional to
/// the sentence length so pacing and barge-in remain exercisable.
pub struct SilenceTts;

impl TtsEngine for SilenceTts {
    fn synthesize(&self, text: &str) -> anyhow::Result<TtsAudio> {
        let words = text.split_whitespace().count().max(1) as u64;
        let samples = words * 200 * 16; // ~200ms/word at 16kHz
        Ok(TtsAudio {
            pcm: vec![0u8; (samples * 2) as usize],
            sample_rate: 16_000,
        })
    }
}

/// No VAD model wired in; the energy gate in `SpeechEnergyVad` already does
/// real signal work in front of this, so the classifier itself just defers
/// to it by always reporting speech above the energy floor.
pub struct PassThroughVad;

impl VadEngine for PassThroughVad {
    fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
        Ok(true)
    }
}
