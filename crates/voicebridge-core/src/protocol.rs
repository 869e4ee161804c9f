//! Wire protocols: the PBX binary framing and the agent-service JSON messages.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceGatewayError};

/// PBX frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Hangup,
    Uuid,
    Audio,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Hangup),
            0x01 => Some(Self::Uuid),
            0x10 => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Hangup => 0x00,
            Self::Uuid => 0x01,
            Self::Audio => 0x10,
        }
    }
}

/// A decoded PBX frame: `{type: u8, length: u16 BE, payload}`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn hangup() -> Self {
        Self {
            frame_type: FrameType::Hangup,
            payload: Vec::new(),
        }
    }

    pub fn audio(pcm8k: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Audio,
            payload: pcm8k,
        }
    }

    /// Encode the 3-byte header + payload.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut out = Vec::with_capacity(3 + self.payload.len());
        out.push(self.frame_type.as_byte());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a header (3 bytes) into `(frame_type, length)`. Returns a
    /// protocol error for an unrecognized type byte.
    pub fn decode_header(header: &[u8; 3]) -> Result<(FrameType, u16)> {
        let frame_type = FrameType::from_byte(header[0])
            .ok_or_else(|| VoiceGatewayError::Protocol(format!("unknown frame type {:#x}", header[0])))?;
        let length = u16::from_be_bytes([header[1], header[2]]);
        Ok((frame_type, length))
    }
}

/// Exact byte size of one 20ms 8kHz mono PCM16 frame on the PBX wire.
pub const PBX_FRAME_BYTES: usize = 320;

/// Exact sample count of one 32ms 16kHz mono PCM16 VAD window.
pub const VAD_FRAME_SAMPLES: usize = 512;
pub const VAD_FRAME_BYTES: usize = VAD_FRAME_SAMPLES * 2;

/// Messages the relay sends to the remote agent service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentInbound {
    #[serde(rename = "audio_data")]
    AudioData {
        audio: String, // base64 pcm16k
        format: String,
    },
    #[serde(rename = "hangup")]
    Hangup,
}

impl AgentInbound {
    pub fn audio_data(pcm16k: &[u8]) -> Self {
        use base64::Engine;
        Self::AudioData {
            audio: base64::engine::general_purpose::STANDARD.encode(pcm16k),
            format: "pcm16k".to_string(),
        }
    }
}

/// Messages the remote agent service sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentOutbound {
    #[serde(rename = "audio_response")]
    AudioResponse {
        audio: String, // base64 pcm at `sample_rate`
        format: String,
        sample_rate: u32,
    },
    #[serde(rename = "transcript")]
    Transcript { text: String },
    #[serde(rename = "interrupt")]
    Interrupt,
    #[serde(rename = "hangup")]
    Hangup,
}

impl AgentOutbound {
    /// Decode the base64 audio payload, if this is an `AudioResponse`.
    pub fn decode_audio(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        match self {
            Self::AudioResponse { audio, .. } => base64::engine::general_purpose::STANDARD.decode(audio).ok(),
            _ => None,
        }
    }
}
