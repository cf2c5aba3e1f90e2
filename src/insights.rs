//! Natural-language summaries over call data.
//!
//! The text generator sits behind [`InsightGenerator`] so the dashboard keeps
//! working (with a fallback panel) when no model is configured or reachable.
use crate::callrecord::CallRecord;
use crate::classifier::LeadQuality;
use crate::config::LlmConfig;
use crate::dashboard::{format_duration, format_phone_number};
use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Seconds a caller should wait after [`InsightError::QuotaExceeded`].
pub const RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("insight generator unavailable: {0}")]
    Unavailable(String),
    #[error("insight generator quota exceeded")]
    QuotaExceeded,
    #[error("insight generator timed out")]
    Timeout,
    #[error("invalid insight response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightItem {
    pub icon: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightData {
    pub header: String,
    pub items: Vec<InsightItem>,
    pub follow_up: String,
}

impl InsightData {
    /// Panel shown when analysis cannot be produced.
    pub fn unavailable() -> Self {
        Self {
            header: "Analysis Unavailable".to_string(),
            items: vec![InsightItem {
                icon: "alert".to_string(),
                label: "Connection Error".to_string(),
                value: "Unable to connect to the analysis server.".to_string(),
            }],
            follow_up: "Try again later".to_string(),
        }
    }
}

#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, InsightError>;
    /// The model is asked for a single JSON object.
    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, InsightError>;
}

const SYSTEM_PROMPT: &str =
    "You are a concise analyst for a sales team that handles inbound and outbound phone leads.";

const ANALYSIS_SCHEMA: &str = r#"{
  "header": "short context header, e.g. 'Based on the latest data:'",
  "items": [
    {
      "icon": "one of 'trending-up', 'users', 'alert', 'check', 'clock'",
      "label": "bold topic title, e.g. 'Conversion Rate'",
      "value": "the detailed explanation"
    }
  ],
  "followUp": "a suggested next question for the user to ask"
}"#;

pub fn call_summary_prompt(record: &CallRecord) -> String {
    let lead_quality = record.lead_quality.unwrap_or(LeadQuality::NotQualified);
    format!(
        "Based on the following call details, generate a 1-sentence professional summary for a business log. \
Highlight the primary outcome and the key point discussed.\n\n\
Call Data:\n\
- Caller: {}\n\
- Duration: {}\n\
- Status: {}\n\
- Interest: {}\n\
- Direction: {}",
        format_phone_number(&record.from_number),
        format_duration(record.duration_seconds),
        lead_quality,
        lead_quality.implied_interest(),
        record.direction.label(),
    )
}

pub fn analysis_prompt(context: &serde_json::Value, user_query: Option<&str>) -> String {
    let data = context.to_string();
    match user_query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => format!(
            "Data context: {}\nUser Question: {}\n\
Provide 3 specific data points or insights that answer the question, and one follow-up question.\n\
Respond with a JSON object shaped like:\n{}",
            data, query, ANALYSIS_SCHEMA
        ),
        None => format!(
            "Analyze the following business call analytics data.\n\nData:\n{}\n\n\
Task:\nProvide 3 key insights about performance, opportunities, and risks.\n\
Suggest a relevant follow-up question.\n\n\
Respond with a JSON object shaped like:\n{}",
            data, ANALYSIS_SCHEMA
        ),
    }
}

pub async fn summarize_call(
    generator: &dyn InsightGenerator,
    record: &CallRecord,
) -> Result<String, InsightError> {
    let summary = generator.generate_text(&call_summary_prompt(record)).await?;
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(InsightError::InvalidResponse("empty summary".to_string()));
    }
    Ok(summary.to_string())
}

pub async fn analyze(
    generator: &dyn InsightGenerator,
    context: &serde_json::Value,
    user_query: Option<&str>,
) -> Result<InsightData, InsightError> {
    let value = generator
        .generate_json(&analysis_prompt(context, user_query))
        .await?;
    let data: InsightData = serde_json::from_value(value)
        .map_err(|e| InsightError::InvalidResponse(e.to_string()))?;
    if data.items.is_empty() {
        return Err(InsightError::InvalidResponse("no insight items".to_string()));
    }
    Ok(data)
}

pub struct OpenAiInsightGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiInsightGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("llm api_key is not configured"))?;
        let mut openai = OpenAIConfig::new().with_api_key(api_key);
        if let Some(ref base_url) = config.base_url {
            openai = openai.with_api_base(base_url);
        }
        Ok(Self {
            client: Client::with_config(openai),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, InsightError> {
        let invalid = |e: OpenAIError| InsightError::InvalidResponse(e.to_string());
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(invalid)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(invalid)?
                .into(),
        ])
    }

    async fn complete(&self, prompt: &str, json: bool) -> Result<String, InsightError> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(self.messages(prompt)?);
        if let Some(temperature) = self.temperature {
            request.temperature(temperature);
        }
        if json {
            request.response_format(ResponseFormat::JsonObject);
        }
        let request = request
            .build()
            .map_err(|e| InsightError::InvalidResponse(e.to_string()))?;

        let start_time = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| InsightError::Timeout)?
            .map_err(map_openai_error)?;
        debug!(
            model = self.model,
            elapsed = start_time.elapsed().as_millis(),
            "insight generated"
        );
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InsightError::InvalidResponse("no completion returned".to_string()))
    }
}

fn map_openai_error(e: OpenAIError) -> InsightError {
    if let OpenAIError::ApiError(ref api) = e {
        let code = api.code.as_deref().unwrap_or_default();
        let kind = api.r#type.as_deref().unwrap_or_default();
        if [code, kind]
            .iter()
            .any(|s| s.contains("rate_limit") || s.contains("quota"))
        {
            warn!(code, kind, "insight generator rate limited");
            return InsightError::QuotaExceeded;
        }
    }
    InsightError::Unavailable(e.to_string())
}

#[async_trait]
impl InsightGenerator for OpenAiInsightGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, InsightError> {
        self.complete(prompt, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, InsightError> {
        let text = self.complete(prompt, true).await?;
        serde_json::from_str(&text).map_err(|e| InsightError::InvalidResponse(e.to_string()))
    }
}
