use crate::app::{serve, AppState, AppStateBuilder};
use crate::config::Config;
use crate::insights::{InsightError, InsightGenerator};
use crate::telephony::{DownloadUrls, MockTelephonyClient, PageMeta, ProviderRecording, RecordingPage};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

struct TestServer {
    base: String,
    state: AppState,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    /// Polls call history until `count` rows exist.
    async fn wait_for_history(&self, count: usize) -> Vec<Value> {
        for _ in 0..50 {
            let calls: Vec<Value> = self.get("/api/calls/history").await.json().await.unwrap();
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("call history never reached {} rows", count);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.token.cancel();
    }
}

fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        ..Default::default()
    }
}

async fn start(builder: AppStateBuilder) -> TestServer {
    let state = builder.config(test_config()).build().await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(state.clone(), listener));
    TestServer {
        base: format!("http://{}", addr),
        state,
        client: reqwest::Client::new(),
    }
}

fn hangup(id: &str) -> Value {
    json!({
        "data": {
            "event_type": "call.hangup",
            "payload": {
                "call_control_id": id,
                "from": "+14035550123",
                "to": "+18255550100",
                "direction": "incoming",
                "hangup_cause": "normal",
                "start_time": "2025-03-10T15:00:00Z",
                "end_time": "2025-03-10T15:02:30Z",
            }
        }
    })
}

enum FakeReply {
    Ok(Value),
    Quota,
    Broken,
}

struct FakeGenerator(FakeReply);

#[async_trait]
impl InsightGenerator for FakeGenerator {
    async fn generate_text(&self, _prompt: &str) -> Result<String, InsightError> {
        match &self.0 {
            FakeReply::Ok(v) => Ok(v.as_str().unwrap_or_default().to_string()),
            FakeReply::Quota => Err(InsightError::QuotaExceeded),
            FakeReply::Broken => Err(InsightError::Unavailable("connection refused".to_string())),
        }
    }

    async fn generate_json(&self, _prompt: &str) -> Result<Value, InsightError> {
        match &self.0 {
            FakeReply::Ok(v) => Ok(v.clone()),
            FakeReply::Quota => Err(InsightError::QuotaExceeded),
            FakeReply::Broken => Err(InsightError::Unavailable("connection refused".to_string())),
        }
    }
}

#[tokio::test]
async fn test_health() {
    let server = start(AppStateBuilder::new()).await;
    let resp = server.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["telephonyConfigured"], false);
    assert_eq!(body["insightsConfigured"], false);
    assert_eq!(body["activeCalls"], 0);
}

#[tokio::test]
async fn test_malformed_webhook_is_acknowledged() {
    let server = start(AppStateBuilder::new()).await;
    for body in ["not json", "", "{\"data\": 42}", "{}"] {
        let resp = server
            .client
            .post(server.url("/api/telnyx/webhook"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "body {:?}", body);
        let ack: Value = resp.json().await.unwrap();
        assert_eq!(ack, json!({ "received": true }));
    }
}

#[tokio::test]
async fn test_webhook_aliases_share_one_pipeline() {
    let server = start(AppStateBuilder::new()).await;
    let paths = [
        "/webhook",
        "/api/telnyx/webhook",
        "/api/telnyx/webhook/failover",
        "/api/webhooks/telnyx",
    ];
    let responses = futures::future::join_all(
        paths
            .iter()
            .enumerate()
            .map(|(i, path)| server.post(path, hangup(&format!("alias-{}", i)))),
    )
    .await;
    for resp in responses {
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let calls = server.wait_for_history(paths.len()).await;
    assert_eq!(calls.len(), paths.len());
    for call in &calls {
        assert_eq!(call["durationSeconds"], 150);
        assert_eq!(call["leadQuality"], "Hot");
        assert_eq!(call["appointmentBooked"], true);
    }
}

#[tokio::test]
async fn test_active_calls_follow_lifecycle() {
    let server = start(AppStateBuilder::new()).await;
    server
        .post(
            "/webhook",
            json!({
                "data": {
                    "event_type": "call.initiated",
                    "payload": {
                        "call_control_id": "live-1",
                        "from": "+14035550123",
                        "to": "+18255550100",
                        "direction": "incoming",
                        "start_time": "2025-03-10T15:00:00Z",
                    }
                }
            }),
        )
        .await;

    let mut active: Vec<Value> = Vec::new();
    for _ in 0..50 {
        active = server.get("/api/calls/active").await.json().await.unwrap();
        if !active.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(active.len(), 1);

    server.post("/webhook", hangup("live-1")).await;
    server.wait_for_history(1).await;
    let active: Vec<Value> = server.get("/api/calls/active").await.json().await.unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn test_history_filters() {
    let server = start(AppStateBuilder::new()).await;
    server.post("/webhook", hangup("hist-1")).await;
    server.wait_for_history(1).await;

    let resp = server.get("/api/calls/history?direction=sideways").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let calls: Vec<Value> = server
        .get("/api/calls/history?direction=all&leadQuality=all")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(calls.len(), 1);

    let calls: Vec<Value> = server
        .get("/api/calls/history?leadQuality=Cold")
        .await
        .json()
        .await
        .unwrap();
    assert!(calls.is_empty());

    let calls: Vec<Value> = server
        .get("/api/calls/history?hasRecording=true")
        .await
        .json()
        .await
        .unwrap();
    assert!(calls.is_empty());
}

#[tokio::test]
async fn test_call_record_endpoints() {
    let server = start(AppStateBuilder::new()).await;

    let resp = server.get("/api/calls/recording/missing").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = server
        .client
        .put(server.url("/api/calls/recording/missing"))
        .json(&json!({ "transcript": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .post(
            "/api/calls/recording",
            json!({
                "callControlId": "manual-1",
                "fromNumber": "+14035550123",
                "toNumber": "+18255550100",
                "direction": "outgoing",
                "startTime": "2025-03-10T15:00:00Z",
                "durationSeconds": 42,
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = server
        .client
        .put(server.url("/api/calls/recording/manual-1"))
        .json(&json!({ "transcript": "hello", "transcriptAvailable": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let call: Value = server
        .get("/api/calls/recording/manual-1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(call["transcript"], "hello");
    assert_eq!(call["transcriptAvailable"], true);
    assert_eq!(call["durationSeconds"], 42);
}

#[tokio::test]
async fn test_sync_requires_telephony_client() {
    let server = start(AppStateBuilder::new()).await;
    let resp = server.post("/api/sync/recordings", json!({})).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_sync_saves_recordings() {
    let mut client = MockTelephonyClient::new();
    client.expect_list_recordings().times(1).returning(|_, _| {
        Ok(RecordingPage {
            data: vec![ProviderRecording {
                id: "rec-1".to_string(),
                call_control_id: Some("synced-1".to_string()),
                from: Some("+14035550123".to_string()),
                to: Some("+18255550100".to_string()),
                direction: Some("inbound".to_string()),
                duration_millis: Some(45_000),
                download_urls: Some(DownloadUrls {
                    mp3: Some("https://r/1.mp3".to_string()),
                    wav: None,
                }),
                recording_started_at: Some("2025-03-10T15:00:00Z".to_string()),
                ..Default::default()
            }],
            meta: PageMeta {
                total_pages: Some(1),
                ..Default::default()
            },
        })
    });
    let server = start(AppStateBuilder::new().telephony(Arc::new(client))).await;

    let resp = server.get("/api/telnyx/calls").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["saved"], 1);

    let call: Value = server
        .get("/api/calls/recording/synced-1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(call["recordingUrl"], "https://r/1.mp3");
    assert_eq!(call["leadQuality"], "Cold");
}

#[tokio::test]
async fn test_dashboard_endpoints_on_empty_store() {
    let server = start(AppStateBuilder::new()).await;
    let cards: Vec<Value> = server.get("/api/metrics").await.json().await.unwrap();
    assert!(!cards.is_empty());
    for path in [
        "/api/agent-outcomes",
        "/api/outcome-data",
        "/api/volume-data?days=3",
        "/api/recent-calls?limit=5",
        "/api/territories",
    ] {
        let resp = server.get(path).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        let body: Value = resp.json().await.unwrap();
        assert!(body.is_array(), "{}", path);
    }
}

#[tokio::test]
async fn test_ai_metrics_cards() {
    let server = start(AppStateBuilder::new()).await;
    let cards: Vec<Value> = server.get("/api/ai-metrics").await.json().await.unwrap();
    let labels: Vec<&str> = cards.iter().filter_map(|c| c["label"].as_str()).collect();
    assert_eq!(
        labels,
        ["Total Conversations", "Avg Duration", "Satisfaction Rate", "Appointments Set"]
    );
    assert_eq!(cards[0]["value"], "0");
    assert_eq!(cards[2]["value"], "0%");
}

#[tokio::test]
async fn test_log_call() {
    let server = start(AppStateBuilder::new()).await;
    let resp = server.post("/api/calls/log", json!({ "duration": 30 })).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .post(
            "/api/calls/log",
            json!({ "phoneNumber": "+14035550123", "duration": 150, "notes": "wants a quote" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["interest"], "High");
    let id = body["callControlId"].as_str().unwrap().to_string();

    let call: Value = server
        .get(&format!("/api/calls/recording/{}", id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(call["fromNumber"], "+14035550123");
    assert_eq!(call["direction"], "incoming");
    assert_eq!(call["durationSeconds"], 150);
    assert_eq!(call["status"], "Follow Up");
    assert_eq!(call["aiSummary"], "wants a quote");
    assert_eq!(call["leadQuality"], "Hot");

    let recent: Vec<Value> = server.get("/api/recent-calls").await.json().await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["interest"], "High");
    assert_eq!(recent[0]["type"], "Inbound");
}

#[tokio::test]
async fn test_analyze_without_generator() {
    let server = start(AppStateBuilder::new()).await;
    let resp = server.post("/api/analyze", json!({})).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["header"], "Analysis Unavailable");
}

#[tokio::test]
async fn test_analyze_with_generator() {
    let reply = json!({
        "header": "Based on the latest data:",
        "items": [{ "icon": "check", "label": "Volume", "value": "No calls yet." }],
        "followUp": "What changed last week?",
    });
    let server = start(
        AppStateBuilder::new().insights(Arc::new(FakeGenerator(FakeReply::Ok(reply.clone())))),
    )
    .await;
    let resp = server
        .post("/api/analyze", json!({ "userQuery": "how are we doing?" }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, reply);
}

#[tokio::test]
async fn test_analyze_quota_sets_retry_after() {
    let server =
        start(AppStateBuilder::new().insights(Arc::new(FakeGenerator(FakeReply::Quota)))).await;
    let resp = server.post("/api/analyze", json!({})).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()["retry-after"], "60");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["retryAfter"], 60);
}

#[tokio::test]
async fn test_analyze_failure_returns_fallback_panel() {
    let server =
        start(AppStateBuilder::new().insights(Arc::new(FakeGenerator(FakeReply::Broken)))).await;
    let resp = server.post("/api/analyze", json!({})).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["header"], "Analysis Unavailable");
    assert!(body["items"].is_array());
}

#[tokio::test]
async fn test_summarize_call_stores_summary() {
    let server = start(AppStateBuilder::new().insights(Arc::new(FakeGenerator(FakeReply::Ok(
        json!("  Caller booked a roof inspection.  "),
    )))))
    .await;

    let resp = server
        .post("/api/summarize-call", json!({ "callControlId": "nope" }))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.post("/webhook", hangup("sum-1")).await;
    server.wait_for_history(1).await;

    let resp = server
        .post("/api/summarize-call", json!({ "callControlId": "sum-1" }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["summary"], "Caller booked a roof inspection.");

    let call: Value = server
        .get("/api/calls/recording/sum-1")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(call["aiSummary"], "Caller booked a roof inspection.");
}
