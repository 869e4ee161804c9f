//! PBX wire framing: reading/writing the 3-byte-header frame, and the
//! pacing buffer that turns a downsampled audio stream into 320-byte
//! 20ms frames released at wall-clock rate.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use voicebridge_core::protocol::{Frame, FrameType, PBX_FRAME_BYTES};

/// Read one frame from the PBX socket. Returns `Ok(None)` on a clean EOF
/// before any header bytes arrive (the connection simply closed).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<Frame>> {
    let mut header = [0u8; 3];
    match reader.read_exact(&mut header).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let (frame_type, length) = Frame::decode_header(&header)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let mut payload = vec![0u8; length as usize];
    if length > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok(Some(Frame { frame_type, payload }))
}

/// Write one frame to the PBX socket.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> std::io::Result<()> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await
}

pub async fn write_hangup<W: AsyncWrite + Unpin>(writer: &mut W) -> std::io::Result<()> {
    write_frame(writer, &Frame::hangup()).await
}

/// A byte queue feeding fixed `PBX_FRAME_BYTES` chunks at pacing ticks.
///
/// Downsampled 8kHz audio is pushed as it arrives; a timer elsewhere pops
/// one frame per tick. An `interrupt` clears everything queued so far and
/// further pushes are rejected until `reset` is called on the next
/// `audio_response`.
pub struct PacingBuffer {
    bytes: VecDeque<u8>,
    interrupted: bool,
}

impl PacingBuffer {
    pub fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
            interrupted: false,
        }
    }

    /// Queue downsampled 8kHz PCM. A no-op while interrupted.
    pub fn push(&mut self, pcm8k: &[u8]) {
        if self.interrupted {
            return;
        }
        self.bytes.extend(pcm8k);
    }

    /// Discard everything queued and start rejecting pushes.
    pub fn interrupt(&mut self) {
        self.bytes.clear();
        self.interrupted = true;
    }

    /// A new `audio_response` arrived: resume accepting audio.
    pub fn reset(&mut self) {
        self.interrupted = false;
    }

    /// Pop exactly one `PBX_FRAME_BYTES` frame if enough bytes are queued.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        if self.bytes.len() < PBX_FRAME_BYTES {
            return None;
        }
        Some(self.bytes.drain(..PBX_FRAME_BYTES).collect())
    }

    /// Flush any remaining partial frame, padded with silence, on hangup.
    pub fn flush_partial(&mut self) -> Option<Vec<u8>> {
        if self.bytes.is_empty() {
            return None;
        }
        let mut frame: Vec<u8> = self.bytes.drain(..).collect();
        frame.resize(PBX_FRAME_BYTES, 0);
        Some(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for PacingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn audio_frame(pcm8k: Vec<u8>) -> Frame {
    Frame {
        frame_type: FrameType::Audio,
        payload: pcm8k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_frame_roundtrip() {
        let payload = vec![7u8; PBX_FRAME_BYTES];
        let frame = audio_frame(payload.clone());
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::Audio);
        assert_eq!(decoded.payload, payload);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_read_frame_unknown_type_is_error() {
        let mut cursor = std::io::Cursor::new(vec![0x42, 0x00, 0x00]);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_pacing_buffer_emits_frames_in_order() {
        let mut pacing = PacingBuffer::new();
        pacing.push(&[1u8; PBX_FRAME_BYTES]);
        pacing.push(&[2u8; PBX_FRAME_BYTES]);

        let f1 = pacing.pop_frame().unwrap();
        assert_eq!(f1, vec![1u8; PBX_FRAME_BYTES]);
        let f2 = pacing.pop_frame().unwrap();
        assert_eq!(f2, vec![2u8; PBX_FRAME_BYTES]);
        assert!(pacing.pop_frame().is_none());
    }

    #[test]
    fn test_pacing_buffer_partial_frame_waits_for_more_bytes() {
        let mut pacing = PacingBuffer::new();
        pacing.push(&[9u8; 100]);
        assert!(pacing.pop_frame().is_none());
        pacing.push(&[9u8; PBX_FRAME_BYTES - 100]);
        assert!(pacing.pop_frame().is_some());
    }

    #[test]
    fn test_interrupt_drops_queued_bytes_and_rejects_pushes_until_reset() {
        let mut pacing = PacingBuffer::new();
        pacing.push(&[5u8; PBX_FRAME_BYTES]);
        pacing.interrupt();
        assert!(pacing.is_empty());
        pacing.push(&[5u8; PBX_FRAME_BYTES]);
        assert!(pacing.is_empty(), "pushes while interrupted must be dropped");

        pacing.reset();
        pacing.push(&[5u8; PBX_FRAME_BYTES]);
        assert!(pacing.pop_frame().is_some());
    }

    #[test]
    fn test_flush_partial_pads_with_silence() {
        let mut pacing = PacingBuffer::new();
        pacing.push(&[3u8; 10]);
        let flushed = pacing.flush_partial().unwrap();
        assert_eq!(flushed.len(), PBX_FRAME_BYTES);
        assert_eq!(&flushed[..10], &[3u8; 10]);
        assert!(flushed[10..].iter().all(|&b| b == 0));
    }
}
