//! Per-call session orchestrator: PBX handshake, the agent link (embedded
//! turn engine or a real remote agent service), the two pumps that bridge
//! them, and teardown/persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use voicebridge_core::call::{CallSession, CallStatus};
use voicebridge_core::persistence::CallStore;
use voicebridge_core::protocol::{AgentOutbound, FrameType};
use voicebridge_core::registry::{ActiveCall, ActiveCallRegistry};
use voicebridge_media::resampler::Resampler;

use crate::agent_ws::AgentConnection;
use crate::frame::{self, audio_frame, write_hangup, PacingBuffer};
use crate::local_agent::{self, Collaborators, LocalAgent};

/// Shared, process-wide dependencies every call session needs.
pub struct SessionDeps {
    pub config: Arc<voicebridge_core::config::Config>,
    pub collaborators: Arc<Collaborators>,
    pub call_store: Arc<dyn CallStore>,
    pub registry: ActiveCallRegistry,
}

enum PumpExit {
    Hangup,
    Eof,
    Error(String),
}

/// Either an embedded agent or a live WebSocket connection to a genuinely
/// remote one, unified behind the same outbound-message/inbound-audio
/// surface so the PBX-facing pumps don't care which backend is in play.
enum AgentLink {
    Embedded(LocalAgent),
    Remote(AgentConnection),
}

impl AgentLink {
    async fn send_audio(&self, pcm16k: &[u8]) -> anyhow::Result<()> {
        match self {
            Self::Embedded(agent) => agent.send_audio(pcm16k).await,
            Self::Remote(conn) => {
                conn.send(&voicebridge_core::protocol::AgentInbound::audio_data(pcm16k))
                    .await
            }
        }
    }

    async fn send_hangup(&self) {
        if let Self::Remote(conn) = self {
            let _ = conn.send(&voicebridge_core::protocol::AgentInbound::Hangup).await;
            conn.close().await;
        }
    }

    fn outbound(&mut self) -> &mut tokio::sync::mpsc::Receiver<AgentOutbound> {
        match self {
            Self::Embedded(agent) => &mut agent.outbound_rx,
            Self::Remote(conn) => &mut conn.inbound,
        }
    }
}

pub async fn handle_connection(stream: TcpStream, deps: Arc<SessionDeps>) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();

    let caller_id = match read_handshake(&mut reader).await {
        Some(id) => id,
        None => {
            debug!(?peer, "handshake failed or connection closed before UUID frame");
            return;
        }
    };

    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, %caller_id, ?peer, "call connected");

    let active = Arc::new(ActiveCall::new(session_id.clone()));
    deps.registry.insert(active.clone()).await;

    let mut agent = connect_agent(&deps, &session_id, active.patient_info.clone(), active.turns.clone()).await;

    let started_at = Utc::now();
    let (exit, mut downsampler) = run_pumps(&mut reader, &mut writer, &mut agent, active.shutdown.clone()).await;

    if let Some(ds) = downsampler.as_mut() {
        let tail = ds.flush();
        if !tail.is_empty() {
            let bytes: Vec<u8> = tail.iter().flat_map(|s| s.to_le_bytes()).collect();
            let _ = frame::write_frame(&mut writer, &audio_frame(bytes)).await;
        }
    }

    agent.send_hangup().await;
    let _ = write_hangup(&mut writer).await;
    let _ = writer.shutdown().await;

    let status = match &exit {
        PumpExit::Hangup => CallStatus::Completed,
        PumpExit::Eof => CallStatus::Disconnected,
        PumpExit::Error(msg) => {
            warn!(session_id = %session_id, error = %msg, "call ended with an error");
            CallStatus::Error
        }
    };

    let turns = active.turns.lock().await.clone();
    let patient_info = active.patient_info.lock().await.clone();
    let mut call = CallSession::new(session_id.clone(), caller_id);
    call.started_at = started_at;
    call.turns = turns;
    call.patient_info = patient_info;
    call.finish(status);

    if let Err(e) = deps.call_store.save(&call).await {
        warn!(session_id = %session_id, error = %e, "failed to persist call record");
    }
    deps.registry.remove(&session_id).await;
    info!(session_id = %session_id, "call torn down");
}

async fn read_handshake(reader: &mut OwnedReadHalf) -> Option<Uuid> {
    let mut handshake = [0u8; 19];
    reader.read_exact(&mut handshake).await.ok()?;

    if FrameType::from_byte(handshake[0]) != Some(FrameType::Uuid) {
        return None;
    }
    let length = u16::from_be_bytes([handshake[1], handshake[2]]);
    if length != 16 {
        return None;
    }
    Some(Uuid::from_slice(&handshake[3..19]).ok()?)
}

async fn connect_agent(
    deps: &Arc<SessionDeps>,
    session_id: &str,
    patient_info: Arc<Mutex<voicebridge_core::call::PatientInfo>>,
    turns: Arc<Mutex<Vec<voicebridge_core::call::TurnRecord>>>,
) -> AgentLink {
    if let Some(svc) = &deps.config.agent_service {
        let ping = Duration::from_secs(svc.ping_interval_secs);
        match AgentConnection::connect(&svc.url, session_id, ping).await {
            Ok(conn) => return AgentLink::Remote(conn),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to reach remote agent service, falling back to embedded agent");
            }
        }
    }

    let vad_cfg = deps.config.vad();
    let sentence_cfg = deps.config.sentence();
    AgentLink::Embedded(local_agent::spawn(
        deps.collaborators.clone(),
        turns,
        patient_info,
        vad_cfg.preemphasis_alpha,
        vad_cfg.min_audio_energy,
        vad_cfg.silence_timeout_ms,
        vad_cfg.min_speech_duration_ms,
        vad_cfg.min_bargein_speech_chunks,
        sentence_cfg.min_words,
        16_000,
    ))
}

async fn run_pumps(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    agent: &mut AgentLink,
    shutdown: tokio_util::sync::CancellationToken,
) -> (PumpExit, Option<Resampler>) {
    let mut upsampler = Resampler::upsampler_8k_to_16k();
    let mut downsampler: Option<Resampler> = None;
    let mut pacing = PacingBuffer::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(20));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return (PumpExit::Hangup, downsampler),

            frame = frame::read_frame(reader) => {
                match frame {
                    Ok(None) => return (PumpExit::Eof, downsampler),
                    Err(e) => return (PumpExit::Error(e.to_string()), downsampler),
                    Ok(Some(f)) => match f.frame_type {
                        voicebridge_core::protocol::FrameType::Hangup => return (PumpExit::Hangup, downsampler),
                        voicebridge_core::protocol::FrameType::Audio => {
                            let samples: Vec<i16> = f
                                .payload
                                .chunks_exact(2)
                                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                                .collect();
                            let upsampled = upsampler.resample(&samples);
                            let bytes: Vec<u8> = upsampled.iter().flat_map(|s| s.to_le_bytes()).collect();
                            if let Err(e) = agent.send_audio(&bytes).await {
                                return (PumpExit::Error(e.to_string()), downsampler);
                            }
                        }
                        voicebridge_core::protocol::FrameType::Uuid => {
                            debug!("unexpected mid-call UUID frame, ignoring");
                        }
                    },
                }
            }

            msg = agent.outbound().recv() => {
                match msg {
                    None => return (PumpExit::Eof, downsampler),
                    Some(AgentOutbound::AudioResponse { audio, sample_rate, .. }) => {
                        let pcm = match decode_audio(&audio) {
                            Some(p) => p,
                            None => continue,
                        };
                        pacing.reset();
                        let ds = downsampler.get_or_insert_with(|| Resampler::downsampler_to_8k(sample_rate));
                        let samples: Vec<i16> = pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
                        let down = ds.resample(&samples);
                        let bytes: Vec<u8> = down.iter().flat_map(|s| s.to_le_bytes()).collect();
                        pacing.push(&bytes);
                    }
                    Some(AgentOutbound::Transcript { text }) => {
                        debug!(text = %text, "agent transcript");
                    }
                    Some(AgentOutbound::Interrupt) => {
                        pacing.interrupt();
                    }
                    Some(AgentOutbound::Hangup) => return (PumpExit::Hangup, downsampler),
                }
            }

            _ = ticker.tick() => {
                if let Some(chunk) = pacing.pop_frame() {
                    if let Err(e) = frame::write_frame(writer, &audio_frame(chunk)).await {
                        return (PumpExit::Error(e.to_string()), downsampler);
                    }
                }
            }
        }
    }
}

fn decode_audio(b64: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(b64).ok()
}
