//! Axum router: health, a synchronous text-message probe, patient-info
//! snapshots, and forced end-call, all keyed by session id against the
//! shared [`ActiveCallRegistry`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use voicebridge_core::registry::ActiveCallRegistry;
use voicebridge_relay::Collaborators;

/// Shared state for the admin router.
pub struct AdminState {
    pub registry: ActiveCallRegistry,
    pub collaborators: Arc<Collaborators>,
    pub sentence_min_words: usize,
    pub tts_fallback_sample_rate: u32,
}

pub async fn serve(bind: &str, port: u16, state: Arc<AdminState>) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "admin http listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/text-message", post(text_message_handler))
        .route("/api/patient-info/{session_id}", get(patient_info_handler))
        .route("/api/end-call/{session_id}", post(end_call_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_calls = state.registry.len().await;
    Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": active_calls,
    }))
}

#[derive(Deserialize)]
struct TextMessageRequest {
    session_id: String,
    message: String,
}

#[derive(Serialize)]
struct TextMessageResponse {
    reply: String,
}

async fn text_message_handler(
    State(state): State<Arc<AdminState>>,
    Json(req): Json<TextMessageRequest>,
) -> impl IntoResponse {
    let Some(call) = state.registry.get(&req.session_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown session_id"}))).into_response();
    };

    match voicebridge_relay::text_message(
        &state.collaborators,
        &call.turns,
        &call.patient_info,
        req.message,
        state.sentence_min_words,
        state.tts_fallback_sample_rate,
    )
    .await
    {
        Ok(reply) => Json(TextMessageResponse { reply }).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn patient_info_handler(
    State(state): State<Arc<AdminState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(call) = state.registry.get(&session_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown session_id"}))).into_response();
    };
    let snapshot = call.patient_info.lock().await.clone();
    Json(snapshot).into_response()
}

async fn end_call_handler(
    State(state): State<Arc<AdminState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(call) = state.registry.get(&session_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown session_id"}))).into_response();
    };
    call.shutdown.cancel();
    Json(json!({"status": "ending"})).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Arc;
    use voicebridge_core::registry::ActiveCall;
    use voicebridge_media::collaborators::{
        ConversationalPolicy, PolicyEvent, PolicyRequest, PolicyStream, SttEngine, TtsAudio, TtsEngine, VadEngine,
    };

    struct EchoPolicy;
    #[async_trait]
    impl ConversationalPolicy for EchoPolicy {
        async fn stream(&self, request: PolicyRequest) -> anyhow::Result<PolicyStream> {
            let text = format!("you said: {} ", request.user_text);
            Ok(Box::pin(stream::iter(vec![PolicyEvent::TextDelta(text), PolicyEvent::Done])))
        }
    }

    struct SilentTts;
    impl TtsEngine for SilentTts {
        fn synthesize(&self, _text: &str) -> anyhow::Result<TtsAudio> {
            Ok(TtsAudio { pcm: vec![0u8; 32], sample_rate: 16_000 })
        }
    }

    struct EmptyStt;
    impl SttEngine for EmptyStt {
        fn transcribe(&self, _pcm16k: &[u8]) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    struct NeverSpeechVad;
    impl VadEngine for NeverSpeechVad {
        fn is_speech(&self, _frame: &[i16]) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn test_state() -> Arc<AdminState> {
        Arc::new(AdminState {
            registry: ActiveCallRegistry::new(),
            collaborators: Arc::new(Collaborators {
                policy: Arc::new(EchoPolicy),
                stt: Arc::new(EmptyStt),
                tts: Arc::new(SilentTts),
                vad: Arc::new(NeverSpeechVad),
            }),
            sentence_min_words: 1,
            tts_fallback_sample_rate: 16_000,
        })
    }

    #[tokio::test]
    async fn test_text_message_against_unknown_session_is_not_found() {
        let state = test_state();
        let resp = text_message_handler(
            State(state),
            Json(TextMessageRequest { session_id: "missing".to_string(), message: "hi".to_string() }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_end_call_cancels_shutdown_token() {
        let state = test_state();
        let call = Arc::new(ActiveCall::new("call-1".to_string()));
        state.registry.insert(call.clone()).await;

        let resp = end_call_handler(State(state), Path("call-1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(call.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_patient_info_returns_snapshot() {
        let state = test_state();
        let call = Arc::new(ActiveCall::new("call-2".to_string()));
        call.patient_info.lock().await.patient_name = Some("Jane Doe".to_string());
        state.registry.insert(call.clone()).await;

        let resp = patient_info_handler(State(state), Path("call-2".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
