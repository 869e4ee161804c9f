//! The embedded conversational agent: VAD/endpointing over inbound PBX
//! audio, STT, and the turn pipeline, all running in-process rather than
//! over a real network hop. Speaks the same [`AgentOutbound`]/[`AgentInbound`]
//! vocabulary a genuinely remote agent service would, so the session
//! orchestrator's PBX-facing pumps don't need to know which backend they're
//! talking to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voicebridge_core::call::{PatientInfo, Role, TurnRecord};
use voicebridge_core::protocol::{AgentOutbound, VAD_FRAME_SAMPLES};
use voicebridge_media::collaborators::{ConversationalPolicy, HistoryTurn, PolicyRequest, SttEngine, TtsEngine, VadEngine};
use voicebridge_media::vad::{BargeInDetector, Endpointer, EndpointDecision, SpeechEnergyVad};
use voicebridge_turn::pipeline::{run_turn, AudioItem, TurnOutcome};
use voicebridge_turn::Interrupt;

const LLM_MAX_HISTORY: usize = 6;

/// Collaborators injected for the embedded agent. One instance per process,
/// shared across calls; STT/TTS/VAD are invoked on the blocking pool.
pub struct Collaborators {
    pub policy: Arc<dyn ConversationalPolicy>,
    pub stt: Arc<dyn SttEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub vad: Arc<dyn VadEngine>,
}

/// A running embedded agent for one call. Outbound messages (audio,
/// transcripts, interrupts) arrive on `outbound_rx`; inbound 16kHz PCM is
/// pushed in with `ingest`.
pub struct LocalAgent {
    pub outbound_rx: mpsc::Receiver<AgentOutbound>,
    ingest_tx: mpsc::Sender<Vec<u8>>,
    _driver: JoinHandle<()>,
}

impl LocalAgent {
    pub async fn send_audio(&self, pcm16k: &[u8]) -> anyhow::Result<()> {
        self.ingest_tx.send(pcm16k.to_vec()).await?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    collaborators: Arc<Collaborators>,
    turns: Arc<Mutex<Vec<TurnRecord>>>,
    patient_info: Arc<Mutex<PatientInfo>>,
    preemphasis_alpha: f64,
    min_audio_energy: f64,
    silence_timeout_ms: u64,
    min_speech_duration_ms: u64,
    min_bargein_chunks: u32,
    sentence_min_words: usize,
    tts_fallback_sample_rate: u32,
) -> LocalAgent {
    let (ingest_tx, ingest_rx) = mpsc::channel::<Vec<u8>>(64);
    let (outbound_tx, outbound_rx) = mpsc::channel::<AgentOutbound>(32);
    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioItem>(5);

    // Session-owned audio sender, per the sender-persistence rule: it
    // outlives every individual turn and is never closed by one.
    let forwarder_tx = outbound_tx.clone();
    let forwarder_turns = turns.clone();
    let speaking = Arc::new(AtomicBool::new(false));
    let forwarder_speaking = speaking.clone();
    tokio::spawn(async move {
        let mut assistant_text = String::new();
        while let Some(item) = audio_rx.recv().await {
            match item {
                AudioItem::Audio { interrupt, text, audio } => {
                    if interrupt.is_raised() {
                        // Queued before the turn was interrupted; the PBX
                        // must never hear it.
                        continue;
                    }
                    forwarder_speaking.store(true, Ordering::SeqCst);
                    if !assistant_text.is_empty() {
                        assistant_text.push(' ');
                    }
                    assistant_text.push_str(&text);

                    let msg = AgentOutbound::AudioResponse {
                        audio: encode_audio(&audio.pcm),
                        format: "pcm16k".to_string(),
                        sample_rate: audio.sample_rate,
                    };
                    if forwarder_tx.send(msg).await.is_err() {
                        break;
                    }
                    if forwarder_tx
                        .send(AgentOutbound::Transcript { text: text.clone() })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                AudioItem::End => {
                    forwarder_speaking.store(false, Ordering::SeqCst);
                    if !assistant_text.is_empty() {
                        forwarder_turns.lock().await.push(TurnRecord {
                            role: Role::Agent,
                            content: std::mem::take(&mut assistant_text),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                AudioItem::Interrupted => {
                    // The turn that owned `assistant_text` never completed;
                    // drop its partial transcript rather than let it merge
                    // into the next turn's recorded content.
                    forwarder_speaking.store(false, Ordering::SeqCst);
                    assistant_text.clear();
                }
            }
        }
    });

    let driver = tokio::spawn(run_ingest_loop(
        collaborators,
        turns,
        patient_info,
        audio_tx,
        outbound_tx,
        speaking,
        ingest_rx,
        preemphasis_alpha,
        min_audio_energy,
        silence_timeout_ms,
        min_speech_duration_ms,
        min_bargein_chunks,
        sentence_min_words,
        tts_fallback_sample_rate,
    ));

    LocalAgent {
        outbound_rx,
        ingest_tx,
        _driver: driver,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_ingest_loop(
    collaborators: Arc<Collaborators>,
    turns: Arc<Mutex<Vec<TurnRecord>>>,
    patient_info: Arc<Mutex<PatientInfo>>,
    audio_tx: mpsc::Sender<AudioItem>,
    outbound_tx: mpsc::Sender<AgentOutbound>,
    speaking: Arc<AtomicBool>,
    mut ingest_rx: mpsc::Receiver<Vec<u8>>,
    preemphasis_alpha: f64,
    min_audio_energy: f64,
    silence_timeout_ms: u64,
    min_speech_duration_ms: u64,
    min_bargein_chunks: u32,
    sentence_min_words: usize,
    tts_fallback_sample_rate: u32,
) {
    const FRAME_MS: u64 = 32;
    let mut vad = SpeechEnergyVad::new(preemphasis_alpha, min_audio_energy);
    let mut endpointer = Endpointer::new(silence_timeout_ms, min_speech_duration_ms, FRAME_MS);
    let mut bargein = BargeInDetector::new(min_bargein_chunks as usize);
    let mut sample_buf: Vec<i16> = Vec::new();

    // Bootstrap: the greeting is an empty-transcript turn fired immediately,
    // before any PBX audio has arrived.
    let mut current_turn: Option<(JoinHandle<TurnOutcome>, Interrupt)> = Some(
        start_turn(
            String::new(),
            &collaborators,
            &turns,
            &patient_info,
            &audio_tx,
            sentence_min_words,
            tts_fallback_sample_rate,
        )
        .await,
    );

    while let Some(chunk) = ingest_rx.recv().await {
        for byte_pair in chunk.chunks_exact(2) {
            sample_buf.push(i16::from_le_bytes([byte_pair[0], byte_pair[1]]));
        }

        while sample_buf.len() >= VAD_FRAME_SAMPLES {
            let frame: Vec<i16> = sample_buf.drain(..VAD_FRAME_SAMPLES).collect();
            let frame_bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();

            let is_speech = vad.classify(&frame, collaborators.vad.as_ref());

            bargein.set_armed(speaking.load(Ordering::SeqCst));
            if bargein.push(is_speech) {
                if let Some((handle, interrupt)) = &current_turn {
                    if !handle.is_finished() {
                        info!("barge-in detected, raising interruption signal");
                        interrupt.raise();
                        let _ = outbound_tx.send(AgentOutbound::Interrupt).await;
                    }
                }
            }

            match endpointer.push_frame(&frame_bytes, is_speech) {
                EndpointDecision::None | EndpointDecision::Started => {}
                EndpointDecision::Dropped => {
                    debug!("utterance dropped: below minimum speech duration");
                }
                EndpointDecision::UtteranceReady(utterance_pcm16k) => {
                    if let Some((handle, _)) = current_turn.take() {
                        let _ = handle.await;
                    }

                    let stt = collaborators.stt.clone();
                    let transcribe_result =
                        tokio::task::spawn_blocking(move || stt.transcribe(&utterance_pcm16k)).await;
                    let text = match transcribe_result {
                        Ok(Ok(text)) => text,
                        Ok(Err(e)) => {
                            warn!(error = %e, "stt failed, skipping turn");
                            String::new()
                        }
                        Err(join_err) => {
                            warn!(error = %join_err, "stt worker panicked, skipping turn");
                            String::new()
                        }
                    };

                    if text.trim().is_empty() {
                        continue;
                    }

                    turns.lock().await.push(TurnRecord {
                        role: Role::User,
                        content: text.clone(),
                        timestamp: chrono::Utc::now(),
                    });
                    let _ = outbound_tx
                        .send(AgentOutbound::Transcript { text: text.clone() })
                        .await;

                    current_turn = Some(
                        start_turn(
                            text,
                            &collaborators,
                            &turns,
                            &patient_info,
                            &audio_tx,
                            sentence_min_words,
                            tts_fallback_sample_rate,
                        )
                        .await,
                    );
                }
            }
        }
    }

    if let Some((handle, interrupt)) = current_turn.take() {
        interrupt.raise();
        let _ = handle.await;
    }
}

async fn start_turn(
    user_text: String,
    collaborators: &Arc<Collaborators>,
    turns: &Arc<Mutex<Vec<TurnRecord>>>,
    patient_info: &Arc<Mutex<PatientInfo>>,
    audio_tx: &mpsc::Sender<AudioItem>,
    sentence_min_words: usize,
    tts_fallback_sample_rate: u32,
) -> (JoinHandle<TurnOutcome>, Interrupt) {
    let history: Vec<HistoryTurn> = {
        let guard = turns.lock().await;
        let start = guard.len().saturating_sub(LLM_MAX_HISTORY);
        guard[start..].iter().map(HistoryTurn::from).collect()
    };
    let info_snapshot = patient_info.lock().await.clone();
    let request = PolicyRequest {
        history,
        user_text,
        patient_info: info_snapshot,
    };

    let interrupt = Interrupt::new();
    let handle = tokio::spawn(run_turn(
        collaborators.policy.clone(),
        collaborators.tts.clone(),
        request,
        patient_info.clone(),
        sentence_min_words,
        audio_tx.clone(),
        tts_fallback_sample_rate,
        interrupt.clone(),
    ));

    (handle, interrupt)
}

fn encode_audio(pcm: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(pcm)
}

/// Run one turn of the conversation from typed text rather than PBX audio,
/// synchronously collecting the assistant's sentences into one string. Used
/// by the admin HTTP surface's text-message endpoint; bypasses VAD/STT
/// entirely but otherwise drives the same turn pipeline a live call does.
pub async fn text_message(
    collaborators: &Arc<Collaborators>,
    turns: &Arc<Mutex<Vec<TurnRecord>>>,
    patient_info: &Arc<Mutex<PatientInfo>>,
    user_text: String,
    sentence_min_words: usize,
    tts_fallback_sample_rate: u32,
) -> anyhow::Result<String> {
    turns.lock().await.push(TurnRecord {
        role: Role::User,
        content: user_text.clone(),
        timestamp: chrono::Utc::now(),
    });

    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioItem>(5);
    let (handle, _interrupt) = start_turn(
        user_text,
        collaborators,
        turns,
        patient_info,
        &audio_tx,
        sentence_min_words,
        tts_fallback_sample_rate,
    )
    .await;
    drop(audio_tx);

    let mut sentences = Vec::new();
    while let Some(item) = audio_rx.recv().await {
        if let AudioItem::Audio { text, .. } = item {
            sentences.push(text);
        }
    }
    handle.await?;

    let reply = sentences.join(" ");
    if !reply.is_empty() {
        turns.lock().await.push(TurnRecord {
            role: Role::Agent,
            content: reply.clone(),
            timestamp: chrono::Utc::now(),
        });
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use voicebridge_media::collaborators::{PolicyEvent, PolicyStream, TtsAudio};

    struct GreetingPolicy;
    #[async_trait]
    impl ConversationalPolicy for GreetingPolicy {
        async fn stream(&self, request: PolicyRequest) -> anyhow::Result<PolicyStream> {
            let text = if request.user_text.is_empty() {
                "Hello, thanks for calling Nationwide Screening today. "
            } else {
                "Thanks for sharing that, one moment please. "
            };
            let events = vec![PolicyEvent::TextDelta(text.to_string()), PolicyEvent::Done];
            Ok(Box::pin(stream::iter(events)))
        }
    }

    struct SilentTts;
    impl TtsEngine for SilentTts {
        fn synthesize(&self, _text: &str) -> anyhow::Result<TtsAudio> {
            Ok(TtsAudio { pcm: vec![0u8; 640], sample_rate: 16_000 })
        }
    }

    struct EmptyStt;
    impl SttEngine for EmptyStt {
        fn transcribe(&self, _pcm16k: &[u8]) -> anyhow::Result<String> {
            Ok("I have a question about my results".to_string())
        }
    }

    struct NeverSpeechVad;
    impl VadEngine for NeverSpeechVad {
        fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_bootstrap_greeting_is_emitted_without_any_inbound_audio() {
        let collaborators = Arc::new(Collaborators {
            policy: Arc::new(GreetingPolicy),
            stt: Arc::new(EmptyStt),
            tts: Arc::new(SilentTts),
            vad: Arc::new(NeverSpeechVad),
        });

        let mut agent = spawn(
            collaborators,
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Mutex::new(PatientInfo::default())),
            0.95,
            0.001,
            1500,
            300,
            3,
            3,
            16_000,
        );

        let mut saw_greeting_audio = false;
        for _ in 0..4 {
            match agent.outbound_rx.recv().await {
                Some(AgentOutbound::AudioResponse { .. }) => saw_greeting_audio = true,
                Some(AgentOutbound::Transcript { text }) => {
                    assert!(text.contains("Nationwide Screening"));
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_greeting_audio);
    }

    #[tokio::test]
    async fn test_text_message_returns_joined_sentences_and_records_turns() {
        let collaborators = Arc::new(Collaborators {
            policy: Arc::new(GreetingPolicy),
            stt: Arc::new(EmptyStt),
            tts: Arc::new(SilentTts),
            vad: Arc::new(NeverSpeechVad),
        });
        let turns = Arc::new(Mutex::new(Vec::new()));
        let patient_info = Arc::new(Mutex::new(PatientInfo::default()));

        let reply = text_message(
            &collaborators,
            &turns,
            &patient_info,
            "Can you tell me about my results?".to_string(),
            3,
            16_000,
        )
        .await
        .unwrap();

        assert!(reply.contains("one moment"));
        let recorded = turns.lock().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].role, Role::User);
        assert_eq!(recorded[1].role, Role::Agent);
    }
}
