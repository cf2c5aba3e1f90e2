//! Reconciliation pass against the provider's recording list.
//!
//! Webhooks can be lost, so the sync job re-reads recordings from the provider
//! and upserts one call record per recording. Each item is isolated: a failed
//! save is counted and the batch moves on.
use crate::callrecord::{CallDirection, CallRecord, CallRecordRepositoryRef};
use crate::classifier;
use crate::scope::CallScope;
use crate::telephony::{ProviderRecording, TelephonyClient};
use crate::webhook::parse_timestamp;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::{str::FromStr, sync::Arc, time::Duration, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

static ASSISTANT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"assistant-[a-f0-9-]+").unwrap());

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("telephony api is not configured")]
    NotConfigured,
    #[error("failed to list recordings on page {page}: {message}")]
    Listing { page: u32, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub total: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub message: String,
}

enum ItemResult {
    Saved,
    Skipped,
    Failed,
}

/// Assistant id embedded in the conference id, metadata or tags.
pub fn extract_assistant_id(recording: &ProviderRecording) -> Option<String> {
    if let Some(found) = recording
        .conference_id
        .as_deref()
        .and_then(|id| ASSISTANT_ID.find(id))
    {
        return Some(found.as_str().to_string());
    }
    if let Some(id) = recording
        .metadata
        .as_ref()
        .and_then(|m| m.get("assistant_id"))
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
    {
        return Some(id.to_string());
    }
    recording
        .tags
        .iter()
        .flatten()
        .find(|tag| tag.contains("assistant-"))
        .cloned()
}

/// Builds the call record a recording stands for. Classification uses the
/// duration only, since recordings carry no hangup cause.
pub fn recording_to_record(recording: &ProviderRecording, assistant_id: Option<String>) -> CallRecord {
    let duration_secs = recording.duration_millis.unwrap_or(0) / 1000;
    let direction = recording
        .direction
        .as_deref()
        .and_then(|d| CallDirection::from_str(d).ok())
        .unwrap_or(CallDirection::Incoming);
    let start_time = parse_timestamp(recording.recording_started_at.as_deref())
        .or_else(|| parse_timestamp(recording.started_at.as_deref()))
        .or_else(|| parse_timestamp(recording.created_at.as_deref()))
        .unwrap_or_else(Utc::now);
    let end_time = parse_timestamp(recording.recording_ended_at.as_deref())
        .or_else(|| parse_timestamp(recording.completed_at.as_deref()));
    let classification = classifier::classify(duration_secs, None);

    let control_id = recording
        .call_control_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| recording.id.clone());
    let mut record = CallRecord::new(
        control_id,
        recording.from.clone().unwrap_or_else(|| "Unknown".to_string()),
        recording.to.clone().unwrap_or_else(|| "Unknown".to_string()),
        direction,
        start_time,
    );
    record.call_session_id = recording.call_session_id.clone();
    record.call_leg_id = recording.call_leg_id.clone();
    record.answer_time = parse_timestamp(recording.started_at.as_deref());
    record.end_time = end_time;
    record.duration_seconds = duration_secs as i64;
    record.ai_assistant_used = assistant_id.is_some();
    record.ai_assistant_id = assistant_id;
    record.lead_quality = Some(classification.lead_quality);
    record.appointment_booked = classification.appointment_booked();
    record.follow_up_required = classification.follow_up_required();
    record.recording_id = Some(recording.id.clone()).filter(|id| !id.is_empty());
    record.recording_duration_seconds = Some(duration_secs as i64);
    record.recording_status = recording.status.clone();
    if let Some(url) = recording.recording_url() {
        record.recording_url = Some(url.to_string());
        record.recording_available = true;
    }
    record.raw_event = serde_json::to_value(recording).ok();
    record
}

pub struct RecordingSyncJob {
    client: Arc<dyn TelephonyClient>,
    repository: CallRecordRepositoryRef,
    scope: CallScope,
    page_size: u32,
    max_pages: u32,
    storage_timeout: Duration,
}

impl RecordingSyncJob {
    pub fn new(
        client: Arc<dyn TelephonyClient>,
        repository: CallRecordRepositoryRef,
        scope: CallScope,
    ) -> Self {
        Self {
            client,
            repository,
            scope,
            page_size: 50,
            max_pages: 20,
            storage_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.clamp(1, 250);
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let start_time = Instant::now();
        info!(
            phone = self.scope.phone_digits().unwrap_or_default(),
            assistant_id = self.scope.assistant_id().unwrap_or_default(),
            "syncing call history from recordings"
        );
        let mut report = SyncReport::default();
        let mut page_number = 1;
        loop {
            let page = self
                .client
                .list_recordings(page_number, self.page_size)
                .await
                .map_err(|e| SyncError::Listing {
                    page: page_number,
                    message: format!("{:#}", e),
                })?;

            report.total += page.data.len();
            for recording in &page.data {
                match self.sync_one(recording).await {
                    ItemResult::Saved => report.saved += 1,
                    ItemResult::Skipped => report.skipped += 1,
                    ItemResult::Failed => report.failed += 1,
                }
            }

            if page.is_last(page_number) || page_number >= self.max_pages {
                break;
            }
            page_number += 1;
        }

        report.success = true;
        report.message = format!(
            "Successfully synced {} call recordings ({} skipped, {} failed)",
            report.saved, report.skipped, report.failed
        );
        info!(
            total = report.total,
            saved = report.saved,
            skipped = report.skipped,
            failed = report.failed,
            pages = page_number,
            elapsed = ?start_time.elapsed(),
            "recording sync finished"
        );
        Ok(report)
    }

    async fn sync_one(&self, recording: &ProviderRecording) -> ItemResult {
        let recording_id = recording.id.as_str();
        let from = recording.from.as_deref();
        let to = recording.to.as_deref();
        if !self.scope.matches_phone(from, to) {
            info!(
                recording_id,
                from = from.unwrap_or_default(),
                to = to.unwrap_or_default(),
                "skip recording, phone number out of scope"
            );
            return ItemResult::Skipped;
        }

        let assistant_id = match extract_assistant_id(recording) {
            Some(id) => Some(id),
            None => {
                let configured = self.scope.assistant_id().map(str::to_string);
                if let Some(ref id) = configured {
                    info!(recording_id, assistant_id = id, "no assistant id on recording, using configured");
                }
                configured
            }
        };
        if !self.scope.matches_assistant(assistant_id.as_deref()) {
            info!(
                recording_id,
                assistant_id = assistant_id.as_deref().unwrap_or_default(),
                "skip recording from another assistant"
            );
            return ItemResult::Skipped;
        }

        let record = recording_to_record(recording, assistant_id);
        match tokio::time::timeout(self.storage_timeout, self.repository.upsert(&record)).await {
            Ok(Ok(_)) => {
                info!(
                    recording_id,
                    call_control_id = record.call_control_id,
                    duration_secs = record.duration_seconds,
                    "recording synced"
                );
                ItemResult::Saved
            }
            Ok(Err(e)) => {
                warn!(recording_id, "failed to save recording: {:#}", e);
                ItemResult::Failed
            }
            Err(_) => {
                warn!(recording_id, "saving recording timed out");
                ItemResult::Failed
            }
        }
    }
}
