use crate::classifier::LeadQuality;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

pub mod repository;

pub use repository::SqliteCallRecordRepository;

/// Upper bound on rows returned by a single history query.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    #[serde(alias = "inbound")]
    Incoming,
    #[serde(alias = "outbound")]
    Outgoing,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "incoming",
            CallDirection::Outgoing => "outgoing",
        }
    }

    /// Label used by the dashboard tables.
    pub fn label(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "Inbound",
            CallDirection::Outgoing => "Outbound",
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incoming" | "inbound" => Ok(CallDirection::Incoming),
            "outgoing" | "outbound" => Ok(CallDirection::Outgoing),
            _ => Err(anyhow::anyhow!("unknown call direction: {}", s)),
        }
    }
}

/// A finalized call, one per call-control id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_control_id: String,
    #[serde(default)]
    pub call_session_id: Option<String>,
    #[serde(default)]
    pub call_leg_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub direction: CallDirection,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub answer_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: i64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub hangup_cause: Option<String>,
    #[serde(default)]
    pub hangup_source: Option<String>,
    #[serde(default)]
    pub ai_assistant_used: bool,
    #[serde(default)]
    pub ai_assistant_id: Option<String>,
    #[serde(default)]
    pub ai_sentiment: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub lead_quality: Option<LeadQuality>,
    #[serde(default)]
    pub appointment_booked: bool,
    #[serde(default)]
    pub follow_up_required: bool,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_id: Option<String>,
    #[serde(default)]
    pub recording_duration_seconds: Option<i64>,
    #[serde(default)]
    pub recording_status: Option<String>,
    #[serde(default)]
    pub recording_available: bool,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub transcript_available: bool,
    #[serde(default)]
    pub raw_event: Option<serde_json::Value>,
    /// Set by storage.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Set by storage.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> String {
    "completed".to_string()
}

impl CallRecord {
    pub fn new(
        call_control_id: impl Into<String>,
        from_number: impl Into<String>,
        to_number: impl Into<String>,
        direction: CallDirection,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            call_control_id: call_control_id.into(),
            call_session_id: None,
            call_leg_id: None,
            from_number: from_number.into(),
            to_number: to_number.into(),
            direction,
            start_time,
            answer_time: None,
            end_time: None,
            duration_seconds: 0,
            status: default_status(),
            hangup_cause: None,
            hangup_source: None,
            ai_assistant_used: false,
            ai_assistant_id: None,
            ai_sentiment: None,
            ai_summary: None,
            lead_quality: None,
            appointment_booked: false,
            follow_up_required: false,
            recording_url: None,
            recording_id: None,
            recording_duration_seconds: None,
            recording_status: None,
            recording_available: false,
            transcript: None,
            transcript_available: false,
            raw_event: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Sparse update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallRecordPatch {
    pub status: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_sentiment: Option<String>,
    pub lead_quality: Option<LeadQuality>,
    pub appointment_booked: Option<bool>,
    pub follow_up_required: Option<bool>,
    pub recording_url: Option<String>,
    pub recording_id: Option<String>,
    pub recording_duration_seconds: Option<i64>,
    pub recording_status: Option<String>,
    pub recording_available: Option<bool>,
    pub transcript: Option<String>,
    pub transcript_available: Option<bool>,
}

impl CallRecordPatch {
    pub fn recording(url: impl Into<String>, recording_id: Option<String>) -> Self {
        Self {
            recording_url: Some(url.into()),
            recording_id,
            recording_status: Some("available".to_string()),
            recording_available: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallRecordFilter {
    pub direction: Option<CallDirection>,
    pub lead_quality: Option<LeadQuality>,
    pub has_recording: bool,
    pub has_transcript: bool,
    pub assistant_id: Option<String>,
    pub limit: Option<u32>,
}

impl CallRecordFilter {
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Durable call storage. Every write must be safe under at-least-once delivery.
#[async_trait]
pub trait CallRecordRepository: Send + Sync {
    /// Insert, or merge into the existing row for the same call-control id.
    async fn upsert(&self, record: &CallRecord) -> Result<CallRecord>;
    /// Returns `None` when no row exists for `call_control_id`.
    async fn update_by_control_id(
        &self,
        call_control_id: &str,
        patch: &CallRecordPatch,
    ) -> Result<Option<CallRecord>>;
    async fn get_by_control_id(&self, call_control_id: &str) -> Result<Option<CallRecord>>;
    /// Newest first, at most [`MAX_PAGE_SIZE`] rows.
    async fn find(&self, filter: &CallRecordFilter) -> Result<Vec<CallRecord>>;
}

pub type CallRecordRepositoryRef = Arc<dyn CallRecordRepository>;
