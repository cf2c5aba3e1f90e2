//! Read-only client for the telephony provider's recording list.
use crate::config::TelephonyConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadUrls {
    pub mp3: Option<String>,
    pub wav: Option<String>,
}

impl DownloadUrls {
    pub fn preferred(&self) -> Option<&str> {
        self.mp3
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.wav.as_deref().filter(|u| !u.is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRecording {
    pub id: String,
    pub call_control_id: Option<String>,
    pub call_session_id: Option<String>,
    pub call_leg_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
    pub duration_millis: Option<u64>,
    pub status: Option<String>,
    pub download_urls: Option<DownloadUrls>,
    pub started_at: Option<String>,
    pub created_at: Option<String>,
    pub completed_at: Option<String>,
    pub recording_started_at: Option<String>,
    pub recording_ended_at: Option<String>,
    pub conference_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
}

impl ProviderRecording {
    pub fn recording_url(&self) -> Option<&str> {
        self.download_urls.as_ref().and_then(DownloadUrls::preferred)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageMeta {
    pub total_pages: Option<u32>,
    pub total_results: Option<u32>,
    pub page_number: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordingPage {
    pub data: Vec<ProviderRecording>,
    pub meta: PageMeta,
}

impl RecordingPage {
    /// True when no page after `page_number` can hold more items.
    pub fn is_last(&self, page_number: u32) -> bool {
        if self.data.is_empty() {
            return true;
        }
        match self.meta.total_pages {
            Some(total) => page_number >= total,
            None => false,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    /// Pages are numbered from 1.
    async fn list_recordings(&self, page_number: u32, page_size: u32) -> Result<RecordingPage>;
}

pub struct TelnyxClient {
    client: reqwest::Client,
    api_key: String,
    recordings_url: String,
}

impl TelnyxClient {
    pub fn new(config: &TelephonyConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("telephony api_key is not configured"))?;
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid telephony base_url: {}", config.base_url))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(crate::version::get_useragent())
            .build()?;
        Ok(Self {
            client,
            api_key,
            recordings_url: format!("{}/recordings", base.as_str().trim_end_matches('/')),
        })
    }

    fn page_url(&self, page_number: u32, page_size: u32) -> Result<Url> {
        let url = Url::parse_with_params(
            &self.recordings_url,
            &[
                ("page[size]", page_size.to_string()),
                ("page[number]", page_number.to_string()),
            ],
        )?;
        Ok(url)
    }
}

#[async_trait]
impl TelephonyClient for TelnyxClient {
    async fn list_recordings(&self, page_number: u32, page_size: u32) -> Result<RecordingPage> {
        let url = self.page_url(page_number, page_size)?;
        let start_time = Instant::now();
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .context("failed to reach telephony api")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(page_number, status = %status, body, "recording list rejected");
            return Err(anyhow!("telephony api returned {}: {}", status, body));
        }
        let page: RecordingPage = response
            .json()
            .await
            .context("invalid recording list response")?;
        debug!(
            page_number,
            items = page.data.len(),
            elapsed = start_time.elapsed().as_millis(),
            "fetched recording page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        let config = TelephonyConfig {
            api_key: Some("KEY".to_string()),
            base_url: "https://api.telnyx.com/v2/".to_string(),
            ..Default::default()
        };
        let client = TelnyxClient::new(&config).unwrap();
        let url = client.page_url(3, 50).unwrap();
        assert_eq!(url.path(), "/v2/recordings");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("page[size]".to_string(), "50".to_string()),
                ("page[number]".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_api_key() {
        assert!(TelnyxClient::new(&TelephonyConfig::default()).is_err());
    }

    #[test]
    fn test_parse_recording_page() {
        let page: RecordingPage = serde_json::from_value(serde_json::json!({
            "data": [{
                "id": "rec-1",
                "call_control_id": "cc-1",
                "from": "+14035550123",
                "to": "+18255550100",
                "duration_millis": 95400,
                "download_urls": {"wav": "https://r/rec-1.wav"},
                "conference_id": "conf-assistant-3f2a-11",
                "channels": "dual"
            }],
            "meta": {"total_pages": 2, "page_number": 1}
        }))
        .unwrap();
        assert_eq!(page.data.len(), 1);
        let rec = &page.data[0];
        assert_eq!(rec.duration_millis, Some(95400));
        assert_eq!(rec.recording_url(), Some("https://r/rec-1.wav"));
        assert!(rec.tags.is_none());
        assert!(!page.is_last(1));
        assert!(page.is_last(2));
        assert!(RecordingPage::default().is_last(1));
    }
}
