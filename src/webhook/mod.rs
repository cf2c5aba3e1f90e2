//! Telephony webhook events and the pipeline that turns them into call records.
//!
//! The HTTP layer only parses the envelope and queues [`WebhookData`]; all
//! correlation, classification and storage happens in [`WebhookProcessor`],
//! which runs after the sender has already been acknowledged.
use crate::callrecord::{CallDirection, CallRecord};
use crate::classifier::Classification;
use crate::correlation::CallLeg;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

mod processor;

pub use processor::WebhookProcessor;

pub type WebhookSender = tokio::sync::mpsc::UnboundedSender<WebhookData>;
pub type WebhookReceiver = tokio::sync::mpsc::UnboundedReceiver<WebhookData>;

pub const EVENT_CALL_INITIATED: &str = "call.initiated";
pub const EVENT_CALL_ANSWERED: &str = "call.answered";
pub const EVENT_CALL_HANGUP: &str = "call.hangup";
pub const EVENT_RECORDING_SAVED: &str = "call.recording.saved";
pub const EVENT_RECORDING_AVAILABLE: &str = "call.recording.available";

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub data: Option<WebhookData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub event_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingUrls {
    pub mp3: Option<String>,
    pub wav: Option<String>,
}

/// Fields shared by all call lifecycle payloads; each event fills a subset.
#[derive(Debug, Clone, Deserialize)]
pub struct CallPayload {
    pub call_control_id: String,
    #[serde(default)]
    pub call_session_id: Option<String>,
    #[serde(default)]
    pub call_leg_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub hangup_cause: Option<String>,
    #[serde(default)]
    pub hangup_source: Option<String>,
    #[serde(default)]
    pub ai_assistant_id: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub recording_id: Option<String>,
    #[serde(default)]
    pub recording_urls: Option<RecordingUrls>,
    #[serde(default)]
    pub public_recording_urls: Option<RecordingUrls>,
}

pub(crate) fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl CallPayload {
    pub fn assistant_id(&self) -> Option<&str> {
        self.ai_assistant_id
            .as_deref()
            .or(self.assistant_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn direction(&self) -> Option<CallDirection> {
        self.direction
            .as_deref()
            .and_then(|d| CallDirection::from_str(d).ok())
    }

    pub fn leg(&self) -> CallLeg {
        CallLeg {
            from: self.from.clone(),
            to: self.to.clone(),
            direction: self.direction(),
            session_id: self.call_session_id.clone(),
            leg_id: self.call_leg_id.clone(),
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.start_time.as_deref())
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.end_time.as_deref())
    }

    /// mp3 before wav; the public link before the private one.
    pub fn preferred_recording_url(&self) -> Option<String> {
        let public = self.public_recording_urls.as_ref();
        let private = self.recording_urls.as_ref();
        public
            .and_then(|u| u.mp3.as_ref())
            .or_else(|| private.and_then(|u| u.mp3.as_ref()))
            .or_else(|| public.and_then(|u| u.wav.as_ref()))
            .or_else(|| private.and_then(|u| u.wav.as_ref()))
            .filter(|url| !url.is_empty())
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PhoneNumber,
    Assistant,
}

/// What the processor did with one event.
#[derive(Debug, Clone)]
pub enum Processed {
    Tracked,
    Skipped(SkipReason),
    Finalized {
        record: CallRecord,
        classification: Classification,
        reconstructed: bool,
    },
    RecordingAttached(CallRecord),
    /// Recording arrived before the hangup; kept on the in-flight call.
    RecordingStashed,
    RecordingDropped,
    Unhandled(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("malformed {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage failure for {call_control_id}: {message}")]
    Storage {
        call_control_id: String,
        message: String,
    },
    #[error("storage timed out for {call_control_id}")]
    Timeout { call_control_id: String },
}
