//! Lead classification heuristics.
//!
//! Everything here is derived from the call duration and the provider's hangup
//! cause only. AI sentiment stored on the record is not consulted.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hangup cause the provider reports for a clean, mutually ended call.
pub const NORMAL_HANGUP: &str = "normal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Outcome {
    NotInterested,
    CallBack,
    Interested,
    FollowUp,
    Booked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InterestLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadQuality {
    Hot,
    Warm,
    Cold,
    #[serde(rename = "Not Qualified")]
    NotQualified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub outcome: Outcome,
    pub interest: InterestLevel,
    pub lead_quality: LeadQuality,
}

impl Classification {
    pub fn appointment_booked(&self) -> bool {
        self.outcome == Outcome::Booked
    }

    pub fn follow_up_required(&self) -> bool {
        matches!(self.outcome, Outcome::FollowUp | Outcome::CallBack)
    }
}

fn is_normal(hangup_cause: Option<&str>) -> bool {
    hangup_cause == Some(NORMAL_HANGUP)
}

pub fn classify_outcome(duration_secs: u64, hangup_cause: Option<&str>) -> Outcome {
    if duration_secs < 10 {
        return Outcome::NotInterested;
    }
    if is_normal(hangup_cause) {
        if duration_secs > 120 {
            Outcome::Booked
        } else if duration_secs > 60 {
            Outcome::FollowUp
        } else {
            Outcome::Interested
        }
    } else {
        Outcome::CallBack
    }
}

pub fn classify_interest(duration_secs: u64) -> InterestLevel {
    if duration_secs > 120 {
        InterestLevel::High
    } else if duration_secs > 60 {
        InterestLevel::Medium
    } else {
        InterestLevel::Low
    }
}

pub fn classify_lead_quality(
    duration_secs: u64,
    hangup_cause: Option<&str>,
    outcome: Outcome,
) -> LeadQuality {
    if outcome == Outcome::Booked || duration_secs > 180 {
        LeadQuality::Hot
    } else if outcome == Outcome::FollowUp || (duration_secs > 60 && is_normal(hangup_cause)) {
        LeadQuality::Warm
    } else if duration_secs > 30 {
        LeadQuality::Cold
    } else {
        LeadQuality::NotQualified
    }
}

pub fn classify(duration_secs: u64, hangup_cause: Option<&str>) -> Classification {
    let outcome = classify_outcome(duration_secs, hangup_cause);
    Classification {
        outcome,
        interest: classify_interest(duration_secs),
        lead_quality: classify_lead_quality(duration_secs, hangup_cause, outcome),
    }
}

impl LeadQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadQuality::Hot => "Hot",
            LeadQuality::Warm => "Warm",
            LeadQuality::Cold => "Cold",
            LeadQuality::NotQualified => "Not Qualified",
        }
    }

    /// Interest shown on dashboard rows, which only carry the stored lead quality.
    pub fn implied_interest(&self) -> InterestLevel {
        match self {
            LeadQuality::Hot => InterestLevel::High,
            LeadQuality::Warm => InterestLevel::Medium,
            LeadQuality::Cold | LeadQuality::NotQualified => InterestLevel::Low,
        }
    }
}

impl fmt::Display for LeadQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadQuality {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "hot" => Ok(LeadQuality::Hot),
            "warm" => Ok(LeadQuality::Warm),
            "cold" => Ok(LeadQuality::Cold),
            "notqualified" => Ok(LeadQuality::NotQualified),
            _ => Err(anyhow::anyhow!("unknown lead quality: {}", s)),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::NotInterested => "Not Interested",
            Outcome::CallBack => "Call Back",
            Outcome::Interested => "Interested",
            Outcome::FollowUp => "Follow Up",
            Outcome::Booked => "Booked",
        };
        f.write_str(label)
    }
}

impl fmt::Display for InterestLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InterestLevel::Low => "Low",
            InterestLevel::Medium => "Medium",
            InterestLevel::High => "High",
        };
        f.write_str(label)
    }
}
