//! Cross-task registry of in-flight calls, shared between the relay (which
//! populates it) and the admin surface (which reads and acts on it). Entries
//! never touch the session's own tasks directly; they expose only the
//! narrow surface those two roles need.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::call::{PatientInfo, TurnRecord};

/// A live call's shared, admin-visible state.
pub struct ActiveCall {
    pub session_id: String,
    pub patient_info: Arc<Mutex<PatientInfo>>,
    pub turns: Arc<Mutex<Vec<TurnRecord>>>,
    /// Cancelled by the admin surface's forced end-call, or by the relay
    /// itself on normal teardown (so both paths converge on one signal).
    pub shutdown: CancellationToken,
}

impl ActiveCall {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            patient_info: Arc::new(Mutex::new(PatientInfo::default())),
            turns: Arc::new(Mutex::new(Vec::new())),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Registry of calls currently in progress, keyed by session id.
#[derive(Clone, Default)]
pub struct ActiveCallRegistry {
    calls: Arc<Mutex<HashMap<String, Arc<ActiveCall>>>>,
}

impl ActiveCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call: Arc<ActiveCall>) {
        self.calls.lock().await.insert(call.session_id.clone(), call);
    }

    pub async fn remove(&self, session_id: &str) {
        self.calls.lock().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<ActiveCall>> {
        self.calls.lock().await.get(session_id).cloned()
    }

    pub async fn active_session_ids(&self) -> Vec<String> {
        self.calls.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_remove_roundtrip() {
        let registry = ActiveCallRegistry::new();
        let call = Arc::new(ActiveCall::new("call-1".to_string()));
        registry.insert(call.clone()).await;

        assert_eq!(registry.len().await, 1);
        assert!(registry.get("call-1").await.is_some());

        registry.remove("call-1").await;
        assert!(registry.get("call-1").await.is_none());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_token_is_observable_through_registry() {
        let registry = ActiveCallRegistry::new();
        let call = Arc::new(ActiveCall::new("call-2".to_string()));
        registry.insert(call.clone()).await;

        let fetched = registry.get("call-2").await.unwrap();
        fetched.shutdown.cancel();
        assert!(call.shutdown.is_cancelled());
    }
}
