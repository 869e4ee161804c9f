//! Call record persistence: an atomic-write JSON store keyed by session id.
//!
//! The on-disk shape flattens [`CallSession`] the way the original
//! `conversations` table did: a `turns_json` list of
//! `{turn_number, role, content, timestamp_iso}`, a derived `total_turns`,
//! the first agent/user turns pulled out as `greeting`/`first_user_response`,
//! and patient-info columns flattened alongside them with list-valued facts
//! (`medical_conditions`) comma-joined rather than nested as an array.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::call::{CallSession, CallStatus, PatientInfo, Role, TurnRecord};
use crate::error::{Result, VoiceGatewayError};

/// One entry of [`PersistedRecord::turns_json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedTurn {
    turn_number: usize,
    role: Role,
    content: String,
    timestamp_iso: DateTime<Utc>,
}

/// The flattened, on-disk shape of a call record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRecord {
    session_id: String,
    caller_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: CallStatus,
    turns_json: Vec<PersistedTurn>,
    total_turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    greeting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_user_response: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    patient_name: Option<String>,
    /// Comma-joined, matching the original's list-to-string conversion.
    #[serde(skip_serializing_if = "Option::is_none")]
    medical_conditions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_visit_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interested: Option<bool>,

    #[serde(default, flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl From<&CallSession> for PersistedRecord {
    fn from(session: &CallSession) -> Self {
        let turns_json = session
            .turns
            .iter()
            .enumerate()
            .map(|(i, t)| PersistedTurn {
                turn_number: i + 1,
                role: t.role,
                content: t.content.clone(),
                timestamp_iso: t.timestamp,
            })
            .collect();

        let PatientInfo { patient_name, medical_conditions, last_visit_date, interested, extra } =
            session.patient_info.clone();

        Self {
            session_id: session.session_id.clone(),
            caller_id: session.caller_id,
            started_at: session.started_at,
            ended_at: session.ended_at,
            status: session.status,
            turns_json,
            total_turns: session.turns.len(),
            greeting: session.greeting().map(str::to_string),
            first_user_response: session.first_user_response().map(str::to_string),
            patient_name,
            medical_conditions: (!medical_conditions.is_empty()).then(|| medical_conditions.join(", ")),
            last_visit_date,
            interested,
            extra,
        }
    }
}

impl From<PersistedRecord> for CallSession {
    fn from(record: PersistedRecord) -> Self {
        let turns = record
            .turns_json
            .into_iter()
            .map(|t| TurnRecord { role: t.role, content: t.content, timestamp: t.timestamp_iso })
            .collect();

        let medical_conditions = record
            .medical_conditions
            .map(|joined| joined.split(", ").map(str::to_string).collect())
            .unwrap_or_default();

        CallSession {
            session_id: record.session_id,
            caller_id: record.caller_id,
            started_at: record.started_at,
            ended_at: record.ended_at,
            status: record.status,
            turns,
            patient_info: PatientInfo {
                patient_name: record.patient_name,
                medical_conditions,
                last_visit_date: record.last_visit_date,
                interested: record.interested,
                extra: record.extra,
            },
        }
    }
}

/// Storage for completed (and in-flight) call records.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn save(&self, session: &CallSession) -> Result<()>;
    async fn load(&self, session_id: &str) -> Result<Option<CallSession>>;
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// One JSON file per call, written atomically (temp file + rename) plus a
/// flat `index.json` listing known session ids, so a reader never observes a
/// half-written record.
pub struct JsonCallStore {
    dir: PathBuf,
}

impl JsonCallStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_index(&self) -> Result<Vec<String>> {
        match fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(VoiceGatewayError::Io(e)),
        }
    }

    async fn append_index(&self, session_id: &str) -> Result<()> {
        let mut ids = self.read_index().await?;
        if !ids.iter().any(|id| id == session_id) {
            ids.push(session_id.to_string());
            let bytes = serde_json::to_vec_pretty(&ids)?;
            self.write_atomic(&self.index_path(), &bytes).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CallStore for JsonCallStore {
    async fn save(&self, session: &CallSession) -> Result<()> {
        self.ensure_dir().await?;
        let record = PersistedRecord::from(session);
        let bytes = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&self.record_path(&session.session_id), &bytes)
            .await?;
        self.append_index(&session.session_id).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<CallSession>> {
        match fs::read(self.record_path(session_id)).await {
            Ok(bytes) => {
                let record: PersistedRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(CallSession::from(record)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VoiceGatewayError::Io(e)),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.read_index().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallStatus;
    use uuid::Uuid;

    fn session(id: &str) -> CallSession {
        CallSession::new(id.to_string(), Uuid::nil())
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCallStore::new(dir.path());
        let mut s = session("call-a");
        s.finish(CallStatus::Completed);
        store.save(&s).await.unwrap();

        let loaded = store.load("call-a").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "call-a");
        assert_eq!(loaded.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCallStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ids_tracks_saved_sessions_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCallStore::new(dir.path());
        store.save(&session("call-a")).await.unwrap();
        store.save(&session("call-b")).await.unwrap();
        store.save(&session("call-a")).await.unwrap();

        let mut ids = store.list_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["call-a".to_string(), "call-b".to_string()]);
    }

    #[tokio::test]
    async fn test_persisted_record_flattens_turns_greeting_and_facts() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCallStore::new(dir.path());
        let mut s = session("call-c");
        s.push_turn(crate::call::Role::Agent, "Hello, this is Nationwide Screening.");
        s.push_turn(crate::call::Role::User, "Hi, I have asthma and diabetes.");
        s.patient_info.merge(&serde_json::json!({
            "medical_conditions": ["asthma", "diabetes"],
            "patient_name": "Jane Doe",
        }));
        s.finish(CallStatus::Completed);
        store.save(&s).await.unwrap();

        let raw = fs::read(dir.path().join("call-c.json")).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["total_turns"], 2);
        assert_eq!(value["greeting"], "Hello, this is Nationwide Screening.");
        assert_eq!(value["first_user_response"], "Hi, I have asthma and diabetes.");
        assert_eq!(value["medical_conditions"], "asthma, diabetes");
        assert_eq!(value["turns_json"][0]["turn_number"], 1);
        assert_eq!(value["turns_json"][1]["turn_number"], 2);

        let loaded = store.load("call-c").await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.patient_info.medical_conditions, vec!["asthma", "diabetes"]);
        assert_eq!(loaded.patient_info.patient_name.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn test_no_partial_file_left_behind_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCallStore::new(dir.path());
        store.save(&session("call-a")).await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"));
        }
    }
}
