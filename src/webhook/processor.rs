use super::{
    parse_timestamp, CallPayload, ProcessError, Processed, SkipReason, WebhookData,
    WebhookReceiver, EVENT_CALL_ANSWERED, EVENT_CALL_HANGUP, EVENT_CALL_INITIATED,
    EVENT_RECORDING_AVAILABLE, EVENT_RECORDING_SAVED,
};
use crate::callrecord::{CallRecord, CallRecordPatch, CallRecordRepositoryRef};
use crate::classifier;
use crate::correlation::CorrelationStoreRef;
use crate::scope::CallScope;
use chrono::{DateTime, Utc};
use std::{future::Future, sync::Arc, time::Duration, time::Instant};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct WebhookProcessor {
    correlation: CorrelationStoreRef,
    repository: CallRecordRepositoryRef,
    scope: CallScope,
    storage_timeout: Duration,
}

impl WebhookProcessor {
    pub fn new(
        correlation: CorrelationStoreRef,
        repository: CallRecordRepositoryRef,
        scope: CallScope,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            correlation,
            repository,
            scope,
            storage_timeout,
        }
    }

    /// Drains the queue in arrival order until cancelled or every sender is gone.
    pub async fn serve(self: Arc<Self>, mut receiver: WebhookReceiver, token: CancellationToken) {
        loop {
            let data = select! {
                _ = token.cancelled() => {
                    info!("webhook processor cancelled");
                    break;
                }
                data = receiver.recv() => match data {
                    Some(data) => data,
                    None => {
                        info!("webhook queue closed");
                        break;
                    }
                }
            };
            let event_type = data.event_type.clone();
            let event_id = data.id.clone().unwrap_or_default();
            let start_time = Instant::now();
            match self.process(data).await {
                Ok(processed) => {
                    debug!(
                        event_type,
                        event_id,
                        elapsed = ?start_time.elapsed(),
                        ?processed,
                        "webhook event processed"
                    );
                }
                Err(e) => {
                    // already acknowledged; nothing will retry this event
                    error!(
                        event_type,
                        event_id,
                        elapsed = ?start_time.elapsed(),
                        "webhook event failed: {}",
                        e
                    );
                }
            }
        }
    }

    pub async fn process(&self, data: WebhookData) -> Result<Processed, ProcessError> {
        let known = matches!(
            data.event_type.as_str(),
            EVENT_CALL_INITIATED
                | EVENT_CALL_ANSWERED
                | EVENT_CALL_HANGUP
                | EVENT_RECORDING_SAVED
                | EVENT_RECORDING_AVAILABLE
        );
        if !known {
            info!(event_type = data.event_type, "unhandled webhook event type");
            return Ok(Processed::Unhandled(data.event_type));
        }

        let payload: CallPayload =
            serde_json::from_value(data.payload.clone()).map_err(|source| {
                ProcessError::Malformed {
                    event_type: data.event_type.clone(),
                    source,
                }
            })?;

        match data.event_type.as_str() {
            EVENT_CALL_INITIATED => {
                info!(
                    call_control_id = payload.call_control_id,
                    from = payload.from.as_deref().unwrap_or_default(),
                    to = payload.to.as_deref().unwrap_or_default(),
                    "call initiated"
                );
                self.correlation
                    .on_initiated(&payload.call_control_id, payload.leg())
                    .await;
                Ok(Processed::Tracked)
            }
            EVENT_CALL_ANSWERED => {
                self.correlation.on_answered(&payload.call_control_id).await;
                Ok(Processed::Tracked)
            }
            EVENT_CALL_HANGUP => {
                let occurred_at = parse_timestamp(data.occurred_at.as_deref());
                self.finalize_call(payload, data.payload, occurred_at).await
            }
            _ => self.attach_recording(payload).await,
        }
    }

    pub async fn finalize_call(
        &self,
        payload: CallPayload,
        raw: serde_json::Value,
        occurred_at: Option<DateTime<Utc>>,
    ) -> Result<Processed, ProcessError> {
        let call_control_id = payload.call_control_id.as_str();
        let assistant_id = payload.assistant_id().map(str::to_string);

        if !self
            .scope
            .matches_phone(payload.from.as_deref(), payload.to.as_deref())
        {
            info!(
                call_control_id,
                from = payload.from.as_deref().unwrap_or_default(),
                to = payload.to.as_deref().unwrap_or_default(),
                "skipping call, phone number out of scope"
            );
            self.correlation.discard(call_control_id).await;
            return Ok(Processed::Skipped(SkipReason::PhoneNumber));
        }
        if !self.scope.matches_assistant(assistant_id.as_deref()) {
            info!(
                call_control_id,
                assistant_id = assistant_id.as_deref().unwrap_or_default(),
                "skipping call from another assistant"
            );
            self.correlation.discard(call_control_id).await;
            return Ok(Processed::Skipped(SkipReason::Assistant));
        }

        let call = self
            .correlation
            .on_hangup(call_control_id, payload.leg())
            .await;
        let reconstructed = call.is_reconstructed();
        let mut direction = call.direction;
        let mut start_time = call.start_time;
        let mut end_time = payload.end_time().or(occurred_at);
        if reconstructed {
            // a redelivered hangup reuses the timing of the first delivery, so
            // every derived field comes out the same
            let finalized = self
                .storage(
                    call_control_id,
                    self.repository.get_by_control_id(call_control_id),
                )
                .await?
                .filter(|existing| existing.hangup_cause.is_some());
            match finalized {
                Some(existing) => {
                    direction = existing.direction;
                    start_time = existing.start_time;
                    end_time = existing.end_time.or(end_time);
                }
                None => {
                    if let Some(started) = payload.start_time() {
                        start_time = started;
                    }
                }
            }
        }
        let end_time = end_time.unwrap_or_else(Utc::now);

        let duration_secs =
            ((end_time - start_time).num_milliseconds().max(0) as f64 / 1000.0).round() as u64;
        let classification = classifier::classify(duration_secs, payload.hangup_cause.as_deref());

        let mut record = CallRecord::new(
            call_control_id,
            call.from_number,
            call.to_number,
            direction,
            start_time,
        );
        record.call_session_id = payload.call_session_id.clone().or(call.session_id);
        record.call_leg_id = payload.call_leg_id.clone().or(call.leg_id);
        record.answer_time = call.answered_time;
        record.end_time = Some(end_time);
        record.duration_seconds = duration_secs as i64;
        record.hangup_cause = payload.hangup_cause.clone();
        record.hangup_source = payload.hangup_source.clone();
        record.ai_assistant_used = assistant_id.is_some();
        record.ai_assistant_id = assistant_id;
        record.lead_quality = Some(classification.lead_quality);
        record.appointment_booked = classification.appointment_booked();
        record.follow_up_required = classification.follow_up_required();
        if let Some(url) = call.pending_recording_url {
            record.recording_url = Some(url);
            record.recording_status = Some("available".to_string());
            record.recording_available = true;
        }
        record.raw_event = Some(raw);

        let stored = self
            .storage(call_control_id, self.repository.upsert(&record))
            .await?;
        info!(
            call_control_id,
            duration_secs,
            outcome = %classification.outcome,
            interest = %classification.interest,
            lead_quality = %classification.lead_quality,
            reconstructed,
            "call finalized"
        );
        Ok(Processed::Finalized {
            record: stored,
            classification,
            reconstructed,
        })
    }

    pub async fn attach_recording(&self, payload: CallPayload) -> Result<Processed, ProcessError> {
        let call_control_id = payload.call_control_id.as_str();
        let Some(url) = payload.preferred_recording_url() else {
            warn!(call_control_id, "recording event without a usable url");
            return Ok(Processed::RecordingDropped);
        };

        let patch = CallRecordPatch::recording(url.clone(), payload.recording_id.clone());
        let updated = self
            .storage(
                call_control_id,
                self.repository.update_by_control_id(call_control_id, &patch),
            )
            .await?;
        if let Some(record) = updated {
            info!(call_control_id, url, "recording attached");
            return Ok(Processed::RecordingAttached(record));
        }

        if self.correlation.stash_recording(call_control_id, &url).await {
            info!(call_control_id, url, "recording arrived before hangup, kept for finalize");
            Ok(Processed::RecordingStashed)
        } else {
            warn!(call_control_id, url, "recording for unknown call dropped");
            Ok(Processed::RecordingDropped)
        }
    }

    async fn storage<T>(
        &self,
        call_control_id: &str,
        op: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ProcessError> {
        match tokio::time::timeout(self.storage_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ProcessError::Storage {
                call_control_id: call_control_id.to_string(),
                message: format!("{:#}", e),
            }),
            Err(_) => Err(ProcessError::Timeout {
                call_control_id: call_control_id.to_string(),
            }),
        }
    }
}
