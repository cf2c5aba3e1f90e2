use crate::callrecord::CallDirection;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InFlightStatus {
    Initiated,
    InProgress,
    Reconstructed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightCall {
    pub control_id: String,
    pub from_number: String,
    pub to_number: String,
    pub direction: CallDirection,
    pub start_time: DateTime<Utc>,
    pub answered_time: Option<DateTime<Utc>>,
    pub status: InFlightStatus,
    pub session_id: Option<String>,
    pub leg_id: Option<String>,
    pub pending_recording_url: Option<String>,
    #[serde(skip)]
    touched_at: Option<DateTime<Utc>>,
}

/// Leg details taken from an event payload.
#[derive(Debug, Clone, Default)]
pub struct CallLeg {
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<CallDirection>,
    pub session_id: Option<String>,
    pub leg_id: Option<String>,
}

impl InFlightCall {
    fn new(control_id: &str, leg: CallLeg, start_time: DateTime<Utc>, status: InFlightStatus) -> Self {
        Self {
            control_id: control_id.to_string(),
            from_number: leg.from.unwrap_or_else(|| "Unknown".to_string()),
            to_number: leg.to.unwrap_or_else(|| "Unknown".to_string()),
            direction: leg.direction.unwrap_or(CallDirection::Incoming),
            start_time,
            answered_time: None,
            status,
            session_id: leg.session_id,
            leg_id: leg.leg_id,
            pending_recording_url: None,
            touched_at: Some(start_time),
        }
    }

    pub fn is_reconstructed(&self) -> bool {
        self.status == InFlightStatus::Reconstructed
    }
}

/// Tracks calls between `call.initiated` and `call.hangup`.
///
/// Events for one call may arrive in any order, so no operation here fails:
/// missing entries are either ignored or synthesized.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    async fn on_initiated(&self, control_id: &str, leg: CallLeg);
    async fn on_answered(&self, control_id: &str);
    /// Removes the entry, or reconstructs one from `fallback` when it is unknown.
    async fn on_hangup(&self, control_id: &str, fallback: CallLeg) -> InFlightCall;
    /// Keeps a recording URL on an in-flight call; false when the call is unknown.
    async fn stash_recording(&self, control_id: &str, url: &str) -> bool;
    async fn discard(&self, control_id: &str);
    async fn active(&self) -> Vec<InFlightCall>;
    async fn evict_expired(&self, now: DateTime<Utc>) -> usize;
}

pub type CorrelationStoreRef = Arc<dyn CorrelationStore>;

pub struct MemoryCorrelationStore {
    calls: Mutex<HashMap<String, InFlightCall>>,
    ttl: ChronoDuration,
    lookback: ChronoDuration,
}

impl MemoryCorrelationStore {
    pub fn new(ttl: Duration, lookback: Duration) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::hours(4)),
            lookback: ChronoDuration::from_std(lookback).unwrap_or(ChronoDuration::seconds(60)),
        }
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }
}

impl Default for MemoryCorrelationStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(4 * 3600), Duration::from_secs(60))
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn on_initiated(&self, control_id: &str, leg: CallLeg) {
        let call = InFlightCall::new(control_id, leg, Utc::now(), InFlightStatus::Initiated);
        if let Some(stale) = self
            .calls
            .lock()
            .await
            .insert(control_id.to_string(), call)
        {
            debug!(
                call_control_id = control_id,
                started = %stale.start_time,
                "replaced stale in-flight call"
            );
        }
    }

    async fn on_answered(&self, control_id: &str) {
        let mut calls = self.calls.lock().await;
        match calls.get_mut(control_id) {
            Some(call) => {
                let now = Utc::now();
                call.status = InFlightStatus::InProgress;
                call.answered_time = Some(now);
                call.touched_at = Some(now);
            }
            None => {
                debug!(call_control_id = control_id, "answered before initiated, ignoring");
            }
        }
    }

    async fn on_hangup(&self, control_id: &str, fallback: CallLeg) -> InFlightCall {
        if let Some(call) = self.calls.lock().await.remove(control_id) {
            return call;
        }
        info!(
            call_control_id = control_id,
            "call not tracked, reconstructing from hangup payload"
        );
        InFlightCall::new(
            control_id,
            fallback,
            Utc::now() - self.lookback,
            InFlightStatus::Reconstructed,
        )
    }

    async fn stash_recording(&self, control_id: &str, url: &str) -> bool {
        match self.calls.lock().await.get_mut(control_id) {
            Some(call) => {
                call.pending_recording_url = Some(url.to_string());
                true
            }
            None => false,
        }
    }

    async fn discard(&self, control_id: &str) {
        self.calls.lock().await.remove(control_id);
    }

    async fn active(&self) -> Vec<InFlightCall> {
        let mut calls: Vec<_> = self.calls.lock().await.values().cloned().collect();
        calls.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        calls
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let deadline = now - self.ttl;
        let mut calls = self.calls.lock().await;
        let before = calls.len();
        calls.retain(|_, call| call.touched_at.unwrap_or(call.start_time) > deadline);
        before - calls.len()
    }
}

/// Periodically drops calls that never received a hangup.
pub async fn run_sweeper(store: CorrelationStoreRef, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("correlation sweeper cancelled");
                break;
            }
            _ = ticker.tick() => {
                let evicted = store.evict_expired(Utc::now()).await;
                if evicted > 0 {
                    info!(evicted, "evicted expired in-flight calls");
                }
            }
        }
    }
}
