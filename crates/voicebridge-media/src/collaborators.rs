//! Black-box collaborator interfaces: the conversational policy, STT, TTS,
//! and VAD engines. These are injected at startup; nothing here loads a
//! model or designs a dialogue policy.

use async_trait::async_trait;
use futures::stream::BoxStream;
use voicebridge_core::call::{PatientInfo, Role, TurnRecord};

/// One entry of conversation history passed to the policy on each turn.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl From<&TurnRecord> for HistoryTurn {
    fn from(t: &TurnRecord) -> Self {
        Self {
            role: t.role,
            content: t.content.clone(),
        }
    }
}

/// What the producer hands the policy to start a turn: the trailing history
/// (bounded to `LLM_MAX_HISTORY` turns by the caller), the user's
/// transcript (empty for the bootstrap greeting), and the current extracted
/// facts so the policy can reference what it already knows.
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    pub history: Vec<HistoryTurn>,
    pub user_text: String,
    pub patient_info: PatientInfo,
}

/// One increment of a policy's streamed response.
#[derive(Debug, Clone)]
pub enum PolicyEvent {
    TextDelta(String),
    ToolInvocation { name: String, args: serde_json::Value },
    Done,
}

pub type PolicyStream = BoxStream<'static, PolicyEvent>;

/// The dialogue policy: given history and user text, streams token deltas
/// and tool invocations. Opaque — no prompt construction or dialogue state
/// lives in this crate.
#[async_trait]
pub trait ConversationalPolicy: Send + Sync {
    async fn stream(&self, request: PolicyRequest) -> anyhow::Result<PolicyStream>;
}

/// A blocking speech-to-text engine. Errors are the model-error disposition
/// of the turn pipeline's caller: treated as an empty transcript so the
/// turn is skipped rather than aborted.
pub trait SttEngine: Send + Sync {
    fn transcribe(&self, pcm16k: &[u8]) -> anyhow::Result<String>;
}

/// Synthesized audio at a given sample rate.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

/// A blocking text-to-speech engine. On error, callers substitute silence
/// proportional to the input text's length so the conversation continues.
pub trait TtsEngine: Send + Sync {
    fn synthesize(&self, text: &str) -> anyhow::Result<TtsAudio>;
}

/// The voice-activity classifier. A shared, lazily-initialized handle (one
/// per model, not per call) invoked through [`crate::vad::SpeechEnergyVad`],
/// which applies the energy gate and pre-emphasis in front of it. Errors
/// are fail-safe: treated as non-speech so the caller is never perpetually
/// flagged as barging in.
pub trait VadEngine: Send + Sync {
    fn is_speech(&self, frame: &[i16]) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_core::call::Role;

    struct AlwaysSpeechVad;
    impl VadEngine for AlwaysSpeechVad {
        fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_vad_engine_trait_object_is_usable() {
        let vad: Box<dyn VadEngine> = Box::new(AlwaysSpeechVad);
        assert!(vad.is_speech(&[0; 512]).unwrap());
    }

    #[test]
    fn test_history_turn_from_turn_record() {
        let record = TurnRecord {
            role: Role::User,
            content: "hello".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let turn: HistoryTurn = (&record).into();
        assert_eq!(turn.content, "hello");
    }
}
