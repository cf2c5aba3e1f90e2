use anyhow::Error;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TELNYX_BASE_URL: &str = "https://api.telnyx.com/v2";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(long, default_value = "callinsights.toml")]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub database_url: String,
    pub storage_timeout_secs: u64,
    pub telephony: TelephonyConfig,
    pub correlation: CorrelationConfig,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TelephonyConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Calls neither from nor to this number are ignored.
    pub phone_number: Option<String>,
    /// Calls handled by another AI assistant are ignored.
    pub assistant_id: Option<String>,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CorrelationConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Assumed call length when a hangup arrives for a call never seen initiating.
    pub lookback_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:3000".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            database_url: "sqlite://callinsights.db".to_string(),
            storage_timeout_secs: 10,
            telephony: TelephonyConfig::default(),
            correlation: CorrelationConfig::default(),
            llm: None,
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_TELNYX_BASE_URL.to_string(),
            phone_number: None,
            assistant_id: None,
            page_size: 50,
            max_pages: 20,
            timeout_secs: 15,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 4 * 3600,
            sweep_interval_secs: 60,
            lookback_secs: 60,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: Some(0.4),
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Fill unset fields from the process environment (and `.env`).
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT") {
            self.http_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        let telephony = &mut self.telephony;
        if telephony.api_key.is_none() {
            telephony.api_key = lookup("TELNYX_API_KEY");
        }
        if telephony.phone_number.is_none() {
            telephony.phone_number = lookup("TELNYX_PHONE_NUMBER");
        }
        if telephony.assistant_id.is_none() {
            telephony.assistant_id = lookup("TELNYX_AI_ASSISTANT_ID");
        }
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            let llm = self.llm.get_or_insert_with(LlmConfig::default);
            if llm.api_key.is_none() {
                llm.api_key = Some(api_key);
            }
        }
        if let Some(llm) = self.llm.as_mut() {
            if llm.base_url.is_none() {
                llm.base_url = lookup("OPENAI_BASE_URL");
            }
        }
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs.max(1))
    }
}

impl TelephonyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
http_addr = "127.0.0.1:8088"
database_url = "sqlite::memory:"

[telephony]
phone_number = "+18255550100"
page_size = 25

[correlation]
ttl_secs = 600
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:8088");
        assert_eq!(config.telephony.phone_number.as_deref(), Some("+18255550100"));
        assert_eq!(config.telephony.page_size, 25);
        assert_eq!(config.telephony.base_url, DEFAULT_TELNYX_BASE_URL);
        assert_eq!(config.correlation.ttl_secs, 600);
        assert_eq!(config.correlation.lookback_secs, 60);
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/callinsights.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/callinsights.toml"));
    }

    #[test]
    fn test_env_overrides_only_fill_unset_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELNYX_API_KEY", "KEY123"),
            ("TELNYX_PHONE_NUMBER", "+15550000000"),
            ("TELNYX_AI_ASSISTANT_ID", "assistant-abc"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);
        let mut config = Config::default();
        config.telephony.phone_number = Some("+18255550100".to_string());
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.telephony.api_key.as_deref(), Some("KEY123"));
        assert_eq!(config.telephony.phone_number.as_deref(), Some("+18255550100"));
        assert_eq!(config.telephony.assistant_id.as_deref(), Some("assistant-abc"));
        let llm = config.llm.unwrap();
        assert_eq!(llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(llm.model, DEFAULT_LLM_MODEL);
    }
}
