//! Read-only aggregates behind the dashboard endpoints.
use crate::callrecord::{CallRecordFilter, CallRecordRepository, SqliteCallRecordRepository};
use crate::classifier::{InterestLevel, LeadQuality};
use crate::scope::digits_only;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;

pub const MAX_VOLUME_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy)]
struct Location {
    name: &'static str,
    coordinates: Coordinates,
}

const fn location(name: &'static str, lat: f64, lng: f64) -> Location {
    Location {
        name,
        coordinates: Coordinates { lat, lng },
    }
}

static AREA_CODES: Lazy<HashMap<&'static str, Location>> = Lazy::new(|| {
    let calgary = location("Calgary, AB", 51.0447, -114.0719);
    let edmonton = location("Edmonton, AB", 53.5461, -113.4938);
    let vancouver = location("Vancouver, BC", 49.2827, -123.1207);
    let toronto = location("Toronto, ON", 43.6532, -79.3832);
    HashMap::from([
        ("825", calgary),
        ("403", calgary),
        ("587", edmonton),
        ("780", edmonton),
        ("604", vancouver),
        ("778", vancouver),
        ("416", toronto),
        ("647", toronto),
        ("306", location("Saskatchewan", 50.4452, -104.6189)),
    ])
});

/// North-American area code of a phone number, if it has one.
pub fn area_code(number: &str) -> Option<String> {
    let digits = digits_only(number);
    match digits.len() {
        11 if digits.starts_with('1') => Some(digits[1..4].to_string()),
        10 => Some(digits[0..3].to_string()),
        _ => None,
    }
}

/// `+1 (AAA) BBB-CCCC` for NANP numbers, anything else unchanged.
pub fn format_phone_number(raw: &str) -> String {
    let digits = digits_only(raw);
    let national = match digits.len() {
        11 if digits.starts_with('1') => &digits[1..],
        10 => digits.as_str(),
        _ => return raw.to_string(),
    };
    format!(
        "+1 ({}) {}-{}",
        &national[0..3],
        &national[3..6],
        &national[6..]
    )
}

pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}m {}s", seconds / 60, seconds % 60)
}

pub fn lead_quality_color(name: &str) -> &'static str {
    match name {
        "Hot" => "#ef4444",
        "Warm" => "#f59e0b",
        "Cold" => "#3b82f6",
        _ => "#6b7280",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    pub total_calls: i64,
    pub appointments_booked: i64,
    /// Whole percent of calls that booked.
    pub conversion_rate: i64,
    pub qualified_leads: i64,
    pub average_duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCard {
    pub label: String,
    pub value: String,
    pub subtext: String,
    pub change: i64,
    pub trend: String,
    pub icon: String,
}

fn card(label: &str, value: String, subtext: String, trend: &str, icon: &str) -> MetricCard {
    MetricCard {
        label: label.to_string(),
        value,
        subtext,
        change: 0,
        trend: trend.to_string(),
        icon: icon.to_string(),
    }
}

impl CallMetrics {
    pub fn average_duration(&self) -> String {
        format_duration(self.average_duration_seconds)
    }

    pub fn cards(&self) -> Vec<MetricCard> {
        vec![
            card(
                "Total Inbound Calls",
                self.total_calls.to_string(),
                "This month".to_string(),
                "up",
                "Phone",
            ),
            card(
                "Appointments Booked",
                self.appointments_booked.to_string(),
                format!("{}% conversion", self.conversion_rate),
                "up",
                "Calendar",
            ),
            card(
                "Qualified Leads",
                self.qualified_leads.to_string(),
                "Hot & Warm leads".to_string(),
                "up",
                "TrendingUp",
            ),
            card(
                "Avg Call Duration",
                self.average_duration(),
                "Per conversation".to_string(),
                "neutral",
                "Clock",
            ),
        ]
    }
}

/// Conversation stats for calls handled by the AI assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAgentMetrics {
    pub total_conversations: i64,
    pub average_duration_seconds: i64,
    pub positive_conversations: i64,
    pub appointments_set: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiMetricCard {
    pub label: String,
    pub value: String,
    pub icon: String,
}

impl AiAgentMetrics {
    /// Whole percent of conversations with a positive sentiment.
    pub fn satisfaction_rate(&self) -> i64 {
        if self.total_conversations == 0 {
            return 0;
        }
        ((self.positive_conversations as f64 / self.total_conversations as f64) * 100.0).round()
            as i64
    }

    pub fn cards(&self) -> Vec<AiMetricCard> {
        let card = |label: &str, value: String, icon: &str| AiMetricCard {
            label: label.to_string(),
            value,
            icon: icon.to_string(),
        };
        vec![
            card(
                "Total Conversations",
                self.total_conversations.to_string(),
                "MessageSquare",
            ),
            card(
                "Avg Duration",
                format!("{}m", self.average_duration_seconds.max(0) / 60),
                "Clock",
            ),
            card(
                "Satisfaction Rate",
                format!("{}%", self.satisfaction_rate()),
                "ThumbsUp",
            ),
            card("Appointments Set", self.appointments_set.to_string(), "Calendar"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeadQualitySlice {
    pub name: String,
    pub value: i64,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyVolume {
    pub date: String,
    pub leads: i64,
    pub booked: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentCall {
    pub id: String,
    pub caller: String,
    pub phone: String,
    pub duration: String,
    pub outcome: String,
    pub interest: InterestLevel,
    #[serde(rename = "type")]
    pub call_type: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Territory {
    pub id: String,
    pub name: String,
    pub clients: i64,
    pub revenue: i64,
    pub growth: i64,
    pub status: String,
    pub coordinates: Coordinates,
    pub history: Vec<i64>,
}

/// Aggregates over stored call records, scoped to one assistant when configured.
#[derive(Clone)]
pub struct DashboardQueries {
    repository: SqliteCallRecordRepository,
    assistant_id: Option<String>,
}

impl DashboardQueries {
    pub fn new(repository: SqliteCallRecordRepository, assistant_id: Option<String>) -> Self {
        Self {
            repository,
            assistant_id,
        }
    }

    fn select<'a>(&'a self, columns: &str) -> QueryBuilder<'a, Sqlite> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(columns);
        qb.push(" FROM call_records WHERE 1 = 1");
        if let Some(ref assistant_id) = self.assistant_id {
            qb.push(" AND ai_assistant_id = ");
            qb.push_bind(assistant_id.as_str());
        }
        qb
    }

    pub async fn metrics(&self) -> Result<CallMetrics> {
        let mut qb = self.select(
            "COUNT(*), \
             COALESCE(SUM(CASE WHEN appointment_booked THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN lead_quality IN ('Hot', 'Warm') THEN 1 ELSE 0 END), 0), \
             CAST(ROUND(COALESCE(AVG(duration_seconds), 0)) AS INTEGER)",
        );
        let (total_calls, booked, qualified, average): (i64, i64, i64, i64) = qb
            .build_query_as()
            .fetch_one(self.repository.pool())
            .await
            .context("failed to compute call metrics")?;
        let conversion_rate = if total_calls > 0 {
            ((booked as f64 / total_calls as f64) * 100.0).round() as i64
        } else {
            0
        };
        Ok(CallMetrics {
            total_calls,
            appointments_booked: booked,
            conversion_rate,
            qualified_leads: qualified,
            average_duration_seconds: average,
        })
    }

    /// Without a configured assistant, every call an assistant handled counts.
    pub async fn ai_agent_metrics(&self) -> Result<AiAgentMetrics> {
        let mut qb = self.select(
            "COUNT(*), \
             CAST(ROUND(COALESCE(AVG(duration_seconds), 0)) AS INTEGER), \
             COALESCE(SUM(CASE WHEN ai_sentiment = 'positive' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN appointment_booked THEN 1 ELSE 0 END), 0)",
        );
        if self.assistant_id.is_none() {
            qb.push(" AND ai_assistant_used = 1");
        }
        let (total, average, positive, appointments): (i64, i64, i64, i64) = qb
            .build_query_as()
            .fetch_one(self.repository.pool())
            .await
            .context("failed to compute ai agent metrics")?;
        Ok(AiAgentMetrics {
            total_conversations: total,
            average_duration_seconds: average,
            positive_conversations: positive,
            appointments_set: appointments,
        })
    }

    pub async fn lead_quality_distribution(&self) -> Result<Vec<LeadQualitySlice>> {
        let mut qb = self.select("lead_quality, COUNT(*) AS total");
        qb.push(" AND lead_quality IS NOT NULL GROUP BY lead_quality ORDER BY total DESC, lead_quality");
        let rows: Vec<(String, i64)> = qb
            .build_query_as()
            .fetch_all(self.repository.pool())
            .await
            .context("failed to group lead quality")?;
        Ok(rows
            .into_iter()
            .map(|(name, value)| LeadQualitySlice {
                color: lead_quality_color(&name),
                name,
                value,
            })
            .collect())
    }

    /// Calls per day over the last `days` days, oldest first.
    pub async fn daily_volume(&self, days: u32) -> Result<Vec<DailyVolume>> {
        let days = days.clamp(1, MAX_VOLUME_DAYS);
        let since = Utc::now() - Duration::days(days as i64);
        let mut qb = self.select(
            "DATE(start_time) AS day, COUNT(*), \
             COALESCE(SUM(CASE WHEN appointment_booked THEN 1 ELSE 0 END), 0)",
        );
        qb.push(" AND julianday(start_time) >= julianday(");
        qb.push_bind(since);
        qb.push(") GROUP BY day ORDER BY day ASC");
        let rows: Vec<(Option<String>, i64, i64)> = qb
            .build_query_as()
            .fetch_all(self.repository.pool())
            .await
            .context("failed to compute daily volume")?;
        Ok(rows
            .into_iter()
            .filter_map(|(date, leads, booked)| {
                date.map(|date| DailyVolume {
                    date,
                    leads,
                    booked,
                })
            })
            .collect())
    }

    pub async fn recent_calls(&self, limit: u32) -> Result<Vec<RecentCall>> {
        let filter = CallRecordFilter {
            assistant_id: self.assistant_id.clone(),
            limit: Some(limit),
            ..Default::default()
        };
        let records = self.repository.find(&filter).await?;
        Ok(records
            .into_iter()
            .map(|record| RecentCall {
                caller: format_phone_number(&record.from_number),
                duration: format_duration(record.duration_seconds),
                outcome: record
                    .lead_quality
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                interest: record
                    .lead_quality
                    .unwrap_or(LeadQuality::NotQualified)
                    .implied_interest(),
                call_type: record.direction.label().to_string(),
                time: record.start_time,
                phone: record.from_number,
                id: record.call_control_id,
            })
            .collect())
    }

    /// Callers grouped by number and placed by area code; unknown codes get a
    /// synthetic position so the map still renders them.
    pub async fn territories(&self) -> Result<Vec<Territory>> {
        let mut qb = self.select("from_number, COUNT(*) AS total");
        qb.push(" AND from_number <> 'Unknown' GROUP BY from_number ORDER BY total DESC, from_number");
        let rows: Vec<(String, i64)> = qb
            .build_query_as()
            .fetch_all(self.repository.pool())
            .await
            .context("failed to group callers")?;

        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(index, (number, calls))| {
                let code = area_code(&number);
                let (name, coordinates) = match code.as_deref().and_then(|c| AREA_CODES.get(c)) {
                    Some(loc) => (loc.name.to_string(), loc.coordinates),
                    None => (
                        format!("Area {}", code.as_deref().unwrap_or("unknown")),
                        Coordinates {
                            lat: 45.0 + index as f64 * 2.0,
                            lng: -100.0 + index as f64 * 3.0,
                        },
                    ),
                };
                Territory {
                    id: (index + 1).to_string(),
                    name,
                    clients: calls,
                    revenue: 0,
                    growth: 0,
                    status: if calls > 2 { "High" } else { "Low" }.to_string(),
                    coordinates,
                    history: vec![calls],
                }
            })
            .collect())
    }

    /// Aggregates handed to the insight generator.
    pub async fn analysis_context(&self) -> Result<serde_json::Value> {
        let metrics = self.metrics().await?;
        Ok(serde_json::json!({
            "metrics": metrics,
            "averageDuration": metrics.average_duration(),
            "leadQuality": self.lead_quality_distribution().await?,
            "weeklyVolume": self.daily_volume(7).await?,
            "territories": self.territories().await?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callrecord::{CallDirection, CallRecord};

    #[test]
    fn test_format_phone_number() {
        assert_eq!(format_phone_number("+14035550123"), "+1 (403) 555-0123");
        assert_eq!(format_phone_number("403.555.0123"), "+1 (403) 555-0123");
        assert_eq!(format_phone_number("+442071234567"), "+442071234567");
        assert_eq!(format_phone_number("Unknown"), "Unknown");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(150), "2m 30s");
        assert_eq!(format_duration(59), "0m 59s");
        assert_eq!(format_duration(-3), "0m 0s");
    }

    #[test]
    fn test_area_code_mapping() {
        assert_eq!(area_code("+1 (825) 555-0100").as_deref(), Some("825"));
        assert_eq!(area_code("6045550199").as_deref(), Some("604"));
        assert_eq!(area_code("12345"), None);
        assert_eq!(AREA_CODES.get("403").map(|l| l.name), Some("Calgary, AB"));
        assert_eq!(AREA_CODES.get("647").map(|l| l.name), Some("Toronto, ON"));
    }

    async fn seeded(assistant_id: Option<&str>) -> DashboardQueries {
        let repo = SqliteCallRecordRepository::connect("sqlite::memory:")
            .await
            .unwrap();
        let now = Utc::now();
        let rows = [
            ("cc-1", "+14035550123", 150, Some(LeadQuality::Hot), true, "assistant-1", 0),
            ("cc-2", "+14035550123", 90, Some(LeadQuality::Warm), false, "assistant-1", 1),
            ("cc-3", "+16045550199", 40, Some(LeadQuality::Cold), false, "assistant-1", 2),
            ("cc-4", "+19995550100", 5, Some(LeadQuality::NotQualified), false, "assistant-1", 30),
            ("cc-5", "+14165550111", 300, Some(LeadQuality::Hot), true, "assistant-2", 0),
        ];
        for (id, from, duration, quality, booked, assistant, days_ago) in rows {
            let mut record = CallRecord::new(
                id,
                from,
                "+18255550100",
                CallDirection::Incoming,
                now - Duration::days(days_ago),
            );
            record.duration_seconds = duration;
            record.lead_quality = quality;
            record.appointment_booked = booked;
            record.ai_assistant_id = Some(assistant.to_string());
            record.ai_assistant_used = true;
            record.ai_sentiment = match id {
                "cc-1" | "cc-2" => Some("positive".to_string()),
                "cc-3" => Some("negative".to_string()),
                _ => None,
            };
            repo.upsert(&record).await.unwrap();
        }
        DashboardQueries::new(repo, assistant_id.map(str::to_string))
    }

    #[tokio::test]
    async fn test_metrics_scoped_to_assistant() {
        let dashboard = seeded(Some("assistant-1")).await;
        let metrics = dashboard.metrics().await.unwrap();
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.appointments_booked, 1);
        assert_eq!(metrics.conversion_rate, 25);
        assert_eq!(metrics.qualified_leads, 2);
        assert_eq!(metrics.average_duration_seconds, 71);
        assert_eq!(metrics.average_duration(), "1m 11s");
        let cards = metrics.cards();
        assert_eq!(cards[1].subtext, "25% conversion");

        let all = seeded(None).await.metrics().await.unwrap();
        assert_eq!(all.total_calls, 5);
    }

    #[tokio::test]
    async fn test_ai_agent_metrics() {
        let metrics = seeded(Some("assistant-1")).await.ai_agent_metrics().await.unwrap();
        assert_eq!(metrics.total_conversations, 4);
        assert_eq!(metrics.average_duration_seconds, 71);
        assert_eq!(metrics.positive_conversations, 2);
        assert_eq!(metrics.satisfaction_rate(), 50);
        assert_eq!(metrics.appointments_set, 1);
        let cards = metrics.cards();
        assert_eq!(cards[0].value, "4");
        assert_eq!(cards[1].value, "1m");
        assert_eq!(cards[2].value, "50%");
        assert_eq!(cards[3].label, "Appointments Set");

        let repo = SqliteCallRecordRepository::connect("sqlite::memory:")
            .await
            .unwrap();
        let mut manual = CallRecord::new(
            "manual-1",
            "+14035550123",
            "+18255550100",
            CallDirection::Incoming,
            Utc::now(),
        );
        manual.ai_sentiment = Some("positive".to_string());
        repo.upsert(&manual).await.unwrap();
        let unscoped = DashboardQueries::new(repo, None).ai_agent_metrics().await.unwrap();
        assert_eq!(unscoped, AiAgentMetrics::default());
        assert_eq!(unscoped.satisfaction_rate(), 0);
    }

    #[tokio::test]
    async fn test_empty_metrics() {
        let repo = SqliteCallRecordRepository::connect("sqlite::memory:")
            .await
            .unwrap();
        let metrics = DashboardQueries::new(repo, None).metrics().await.unwrap();
        assert_eq!(metrics, CallMetrics::default());
    }

    #[tokio::test]
    async fn test_lead_quality_distribution() {
        let dashboard = seeded(None).await;
        let slices = dashboard.lead_quality_distribution().await.unwrap();
        assert_eq!(slices[0].name, "Hot");
        assert_eq!(slices[0].value, 2);
        assert_eq!(slices[0].color, "#ef4444");
        let not_qualified = slices.iter().find(|s| s.name == "Not Qualified").unwrap();
        assert_eq!(not_qualified.color, "#6b7280");
    }

    #[tokio::test]
    async fn test_daily_volume_window() {
        let dashboard = seeded(Some("assistant-1")).await;
        let volume = dashboard.daily_volume(7).await.unwrap();
        let leads: i64 = volume.iter().map(|v| v.leads).sum();
        assert_eq!(leads, 3);
        assert!(volume.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[tokio::test]
    async fn test_recent_calls_and_territories() {
        let dashboard = seeded(Some("assistant-1")).await;
        let recent = dashboard.recent_calls(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "cc-1");
        assert_eq!(recent[0].caller, "+1 (403) 555-0123");
        assert_eq!(recent[0].duration, "2m 30s");
        assert_eq!(recent[0].interest, InterestLevel::High);
        assert_eq!(recent[0].call_type, "Inbound");

        let territories = dashboard.territories().await.unwrap();
        assert_eq!(territories.len(), 3);
        assert_eq!(territories[0].name, "Calgary, AB");
        assert_eq!(territories[0].clients, 2);
        let unknown = territories.iter().find(|t| t.name == "Area 999").unwrap();
        assert_eq!(unknown.coordinates.lat, 45.0 + 2.0 * 2.0);
    }
}
