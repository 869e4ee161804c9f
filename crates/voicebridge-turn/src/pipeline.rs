//! The per-turn producer/consumer pipeline: LLM tokens -> sentences ->
//! synthesized audio, torn down atomically by a shared [`Interrupt`].

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use voicebridge_core::call::PatientInfo;
use voicebridge_media::collaborators::{ConversationalPolicy, PolicyEvent, PolicyRequest, TtsAudio, TtsEngine};
use voicebridge_media::segmenter::SentenceSegmenter;

use crate::interrupt::Interrupt;

/// Tool names the producer treats as call-ending rather than state updates.
const UPDATE_PATIENT_INFO: &str = "update_patient_info";

#[derive(Debug, Clone)]
enum SentenceItem {
    Sentence(String),
    End,
}

/// One item carried on the session-owned audio channel.
#[derive(Debug, Clone)]
pub enum AudioItem {
    /// Synthesized audio plus the sentence it was synthesized from, so a
    /// caller can record the transcript alongside the bytes it plays out.
    /// Tagged with the turn's own [`Interrupt`] so a consumer reading this
    /// channel after the fact can tell a queued chunk belongs to a turn that
    /// has since been interrupted and must not be forwarded or played.
    Audio { interrupt: Interrupt, text: String, audio: TtsAudio },
    /// The turn finished normally; never sent for an interrupted turn.
    End,
    /// The turn that produced any preceding `Audio` items was interrupted.
    /// Sent by the orchestrator once the producer and consumer have both
    /// wound down, so whatever consumes this channel can drop the turn's
    /// partial state (transcript-in-progress, speaking flag) instead of
    /// waiting for an `End` sentinel that will never arrive.
    Interrupted,
}

/// How a turn concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Interrupted,
    ToolTerminated(String),
}

struct ProducerOutcome {
    tool_terminated: Option<String>,
}

enum NextEvent {
    Event(PolicyEvent),
    StreamEnded,
    Interrupted,
}

async fn run_producer(
    policy: Arc<dyn ConversationalPolicy>,
    mut request: PolicyRequest,
    interrupt: Interrupt,
    sentence_tx: mpsc::Sender<SentenceItem>,
    min_words: usize,
    patient_info: Arc<Mutex<PatientInfo>>,
) -> ProducerOutcome {
    let mut tool_terminated = None;

    'turn: loop {
        let stream = match policy.stream(request.clone()).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "conversational policy stream failed");
                break 'turn;
            }
        };
        let mut stream = std::pin::pin!(stream);
        let mut segmenter = SentenceSegmenter::new(min_words);
        let mut reinvoke = false;

        loop {
            let next = tokio::select! {
                _ = interrupt.raised() => NextEvent::Interrupted,
                ev = stream.next() => match ev {
                    Some(e) => NextEvent::Event(e),
                    None => NextEvent::StreamEnded,
                },
            };

            match next {
                NextEvent::Interrupted => break 'turn,
                NextEvent::StreamEnded => break,
                NextEvent::Event(PolicyEvent::Done) => break,
                NextEvent::Event(PolicyEvent::TextDelta(delta)) => {
                    if let Some(sentence) = segmenter.add_token(&delta) {
                        if sentence_tx.send(SentenceItem::Sentence(sentence)).await.is_err() {
                            break 'turn;
                        }
                    }
                }
                NextEvent::Event(PolicyEvent::ToolInvocation { name, args }) => {
                    debug!(tool = %name, "producer received tool invocation");
                    if name == UPDATE_PATIENT_INFO {
                        let mut info = patient_info.lock().await;
                        info.merge(&args);
                        reinvoke = true;
                    } else {
                        tool_terminated = Some(name);
                    }
                }
            }
        }

        if let Some(sentence) = segmenter.finalize() {
            if sentence_tx.send(SentenceItem::Sentence(sentence)).await.is_err() {
                break 'turn;
            }
        }

        if reinvoke && tool_terminated.is_none() {
            request.patient_info = patient_info.lock().await.clone();
            continue 'turn;
        }
        break 'turn;
    }

    let _ = sentence_tx.send(SentenceItem::End).await;
    ProducerOutcome { tool_terminated }
}

/// Roughly 200ms of silence per word, a crude but monotonic stand-in for a
/// failed synthesis call so the conversation doesn't go mute for a beat
/// disproportionate to what the agent meant to say.
fn silence_for(text: &str, sample_rate: u32) -> TtsAudio {
    let words = text.split_whitespace().count().max(1) as u64;
    let duration_ms = words * 200;
    let samples = (duration_ms * sample_rate as u64) / 1000;
    TtsAudio {
        pcm: vec![0u8; (samples * 2) as usize],
        sample_rate,
    }
}

async fn run_consumer(
    tts: Arc<dyn TtsEngine>,
    interrupt: Interrupt,
    mut sentence_rx: mpsc::Receiver<SentenceItem>,
    audio_tx: mpsc::Sender<AudioItem>,
    fallback_sample_rate: u32,
) {
    loop {
        let item = sentence_rx.recv().await;
        match item {
            None | Some(SentenceItem::End) => {
                if !interrupt.is_raised() {
                    let _ = audio_tx.send(AudioItem::End).await;
                }
                return;
            }
            Some(SentenceItem::Sentence(text)) => {
                if interrupt.is_raised() {
                    continue;
                }

                let tts = tts.clone();
                let text_for_worker = text.clone();
                let synth = tokio::task::spawn_blocking(move || tts.synthesize(&text_for_worker)).await;

                if interrupt.is_raised() {
                    continue;
                }

                let audio = match synth {
                    Ok(Ok(audio)) => audio,
                    Ok(Err(e)) => {
                        warn!(error = %e, "tts synthesis failed, substituting silence");
                        silence_for(&text, fallback_sample_rate)
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "tts worker panicked, substituting silence");
                        silence_for(&text, fallback_sample_rate)
                    }
                };

                let item = AudioItem::Audio { interrupt: interrupt.clone(), text, audio };
                if audio_tx.send(item).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Runs one turn to completion: spawns the producer and consumer, races the
/// producer against the interruption signal, and returns how the turn
/// concluded. `audio_tx` is owned by the session, not this turn, per the
/// sender-persistence rule: this function never closes it, only ever sends
/// on it (including, on the interrupted path, the `Interrupted` notice once
/// the producer and consumer have both stopped).
#[allow(clippy::too_many_arguments)]
pub async fn run_turn(
    policy: Arc<dyn ConversationalPolicy>,
    tts: Arc<dyn TtsEngine>,
    request: PolicyRequest,
    patient_info: Arc<Mutex<PatientInfo>>,
    sentence_min_words: usize,
    audio_tx: mpsc::Sender<AudioItem>,
    tts_fallback_sample_rate: u32,
    interrupt: Interrupt,
) -> TurnOutcome {
    let (sentence_tx, sentence_rx) = mpsc::channel(10);
    let interrupted_notice_tx = audio_tx.clone();

    let mut producer_handle = tokio::spawn(run_producer(
        policy,
        request,
        interrupt.clone(),
        sentence_tx,
        sentence_min_words,
        patient_info,
    ));
    let mut consumer_handle = tokio::spawn(run_consumer(
        tts,
        interrupt.clone(),
        sentence_rx,
        audio_tx,
        tts_fallback_sample_rate,
    ));

    tokio::select! {
        result = &mut producer_handle => {
            let _ = (&mut consumer_handle).await;
            match result {
                Ok(ProducerOutcome { tool_terminated: Some(name) }) => TurnOutcome::ToolTerminated(name),
                Ok(ProducerOutcome { tool_terminated: None }) => TurnOutcome::Completed,
                Err(join_err) => {
                    warn!(error = %join_err, "producer task panicked");
                    TurnOutcome::Completed
                }
            }
        }
        _ = interrupt.raised() => {
            info!("turn interrupted, awaiting producer/consumer wind-down");
            let _ = (&mut producer_handle).await;
            let _ = (&mut consumer_handle).await;
            let _ = interrupted_notice_tx.send(AudioItem::Interrupted).await;
            TurnOutcome::Interrupted
        }
    }
}
