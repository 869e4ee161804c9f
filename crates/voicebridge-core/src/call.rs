//! Call session model — the per-call record mutated by the session orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Running,
    Completed,
    Disconnected,
    Error,
}

/// Who produced a turn's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// One entry in a call's ordered turn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Structured facts extracted by the agent via tool calls during the call.
///
/// The canonical minimal schema: `patient_name`, `medical_conditions`,
/// `last_visit_date`, `interested`, plus an extension map for
/// forward-compatible keys a future tool might add.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medical_conditions: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interested: Option<bool>,

    /// Forward-compatible keys from tool calls this struct doesn't name yet.
    #[serde(default, flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl PatientInfo {
    /// Merge a partial update (e.g. the JSON arguments of an
    /// `update_patient_info` tool call) into this record. Only keys present
    /// in `update` are overwritten; `medical_conditions` is additive and
    /// de-duplicated rather than replaced, since conditions accumulate
    /// across turns of the conversation.
    pub fn merge(&mut self, update: &serde_json::Value) {
        let Some(obj) = update.as_object() else { return };

        if let Some(name) = obj.get("patient_name").and_then(|v| v.as_str()) {
            self.patient_name = Some(name.to_string());
        }
        if let Some(conditions) = obj.get("medical_conditions").and_then(|v| v.as_array()) {
            for c in conditions {
                if let Some(s) = c.as_str() {
                    if !self.medical_conditions.iter().any(|existing| existing == s) {
                        self.medical_conditions.push(s.to_string());
                    }
                }
            }
        }
        if let Some(date) = obj.get("last_visit_date").and_then(|v| v.as_str()) {
            self.last_visit_date = Some(date.to_string());
        }
        if let Some(interested) = obj.get("interested").and_then(|v| v.as_bool()) {
            self.interested = Some(interested);
        }

        for (k, v) in obj {
            if !matches!(
                k.as_str(),
                "patient_name" | "medical_conditions" | "last_visit_date" | "interested"
            ) {
                self.extra.insert(k.clone(), v.clone());
            }
        }
    }
}

/// A single call's full lifecycle record, mutated only by the session
/// orchestrator task and snapshotted to persistence on teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: String,
    pub caller_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CallStatus,
    pub turns: Vec<TurnRecord>,
    pub patient_info: PatientInfo,
}

impl CallSession {
    pub fn new(session_id: String, caller_id: Uuid) -> Self {
        Self {
            session_id,
            caller_id,
            started_at: Utc::now(),
            ended_at: None,
            status: CallStatus::Running,
            turns: Vec::new(),
            patient_info: PatientInfo::default(),
        }
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(TurnRecord {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// Mark the call ended with the given status and stamp `ended_at`.
    pub fn finish(&mut self, status: CallStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// The first agent turn, i.e. the greeting.
    pub fn greeting(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::Agent)
            .map(|t| t.content.as_str())
    }

    /// The first user turn.
    pub fn first_user_response(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CallSession {
        CallSession::new("call-1".into(), Uuid::nil())
    }

    #[test]
    fn test_merge_overwrites_only_present_keys() {
        let mut info = PatientInfo {
            patient_name: Some("Jane Doe".into()),
            ..Default::default()
        };
        info.merge(&serde_json::json!({ "last_visit_date": "2024-01-01" }));
        assert_eq!(info.patient_name.as_deref(), Some("Jane Doe"));
        assert_eq!(info.last_visit_date.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_merge_medical_conditions_accumulates_and_dedupes() {
        let mut info = PatientInfo::default();
        info.merge(&serde_json::json!({ "medical_conditions": ["asthma"] }));
        info.merge(&serde_json::json!({ "medical_conditions": ["asthma", "diabetes"] }));
        assert_eq!(info.medical_conditions, vec!["asthma", "diabetes"]);
    }

    #[test]
    fn test_merge_unknown_key_goes_to_extra() {
        let mut info = PatientInfo::default();
        info.merge(&serde_json::json!({ "preferred_callback_time": "evening" }));
        assert_eq!(
            info.extra.get("preferred_callback_time").and_then(|v| v.as_str()),
            Some("evening")
        );
    }

    #[test]
    fn test_greeting_and_first_user_response() {
        let mut s = session();
        s.push_turn(Role::Agent, "Hello, this is Nationwide Screening.");
        s.push_turn(Role::User, "Hi there.");
        s.push_turn(Role::Agent, "Great, let's get started.");
        assert_eq!(s.greeting(), Some("Hello, this is Nationwide Screening."));
        assert_eq!(s.first_user_response(), Some("Hi there."));
    }

    #[test]
    fn test_finish_sets_ended_at_after_started_at() {
        let mut s = session();
        s.finish(CallStatus::Completed);
        assert!(s.ended_at.unwrap() >= s.started_at);
        assert_eq!(s.status, CallStatus::Completed);
    }
}
