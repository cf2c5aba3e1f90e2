use crate::config::TelephonyConfig;

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Restricts ingestion to calls that involve our number and our AI assistant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallScope {
    phone_digits: Option<String>,
    assistant_id: Option<String>,
}

impl CallScope {
    pub fn new(phone_number: Option<&str>, assistant_id: Option<&str>) -> Self {
        Self {
            phone_digits: phone_number.map(digits_only).filter(|d| !d.is_empty()),
            assistant_id: assistant_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }
    }

    pub fn from_config(config: &TelephonyConfig) -> Self {
        Self::new(config.phone_number.as_deref(), config.assistant_id.as_deref())
    }

    pub fn phone_digits(&self) -> Option<&str> {
        self.phone_digits.as_deref()
    }

    pub fn assistant_id(&self) -> Option<&str> {
        self.assistant_id.as_deref()
    }

    /// True when no number is configured or either endpoint contains it.
    pub fn matches_phone(&self, from: Option<&str>, to: Option<&str>) -> bool {
        let Some(target) = &self.phone_digits else {
            return true;
        };
        [from, to]
            .into_iter()
            .flatten()
            .any(|number| digits_only(number).contains(target.as_str()))
    }

    /// A call without an assistant id is never excluded.
    pub fn matches_assistant(&self, assistant_id: Option<&str>) -> bool {
        match (&self.assistant_id, assistant_id) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}
