use super::{CallDirection, CallRecord, CallRecordFilter, CallRecordPatch, CallRecordRepository};
use crate::classifier::LeadQuality;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
    FromRow, QueryBuilder, Sqlite, SqlitePool,
};
use std::str::FromStr;
use tracing::info;

const CREATE_CALL_RECORDS: &str = "CREATE TABLE IF NOT EXISTS call_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    call_control_id TEXT NOT NULL UNIQUE,
    call_session_id TEXT,
    call_leg_id TEXT,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('incoming', 'outgoing')),
    start_time TEXT NOT NULL,
    answer_time TEXT,
    end_time TEXT,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'completed',
    hangup_cause TEXT,
    hangup_source TEXT,
    ai_assistant_used INTEGER NOT NULL DEFAULT 0,
    ai_assistant_id TEXT,
    ai_sentiment TEXT,
    ai_summary TEXT,
    lead_quality TEXT,
    appointment_booked INTEGER NOT NULL DEFAULT 0,
    follow_up_required INTEGER NOT NULL DEFAULT 0,
    recording_url TEXT,
    recording_id TEXT,
    recording_duration_seconds INTEGER,
    recording_status TEXT,
    recording_available INTEGER NOT NULL DEFAULT 0,
    transcript TEXT,
    transcript_available INTEGER NOT NULL DEFAULT 0,
    raw_event TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const CREATE_INDICES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_call_records_start_time ON call_records(start_time)",
    "CREATE INDEX IF NOT EXISTS idx_call_records_assistant ON call_records(ai_assistant_id, start_time)",
    "CREATE INDEX IF NOT EXISTS idx_call_records_lead_quality ON call_records(lead_quality)",
];

// Optional columns coalesce so a later event never blanks an earlier value.
// Flags only ever go from false to true. Timing, direction and derived fields
// from a real hangup are kept when the incoming row was built without a
// hangup cause (backfill).
const UPSERT_CALL_RECORD: &str = "INSERT INTO call_records (
    call_control_id, call_session_id, call_leg_id,
    from_number, to_number, direction,
    start_time, answer_time, end_time, duration_seconds,
    status, hangup_cause, hangup_source,
    ai_assistant_used, ai_assistant_id, ai_sentiment, ai_summary,
    lead_quality, appointment_booked, follow_up_required,
    recording_url, recording_id, recording_duration_seconds, recording_status, recording_available,
    transcript, transcript_available,
    raw_event, created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(call_control_id) DO UPDATE SET
    call_session_id = COALESCE(excluded.call_session_id, call_records.call_session_id),
    call_leg_id = COALESCE(excluded.call_leg_id, call_records.call_leg_id),
    from_number = CASE WHEN excluded.from_number = 'Unknown'
        THEN call_records.from_number ELSE excluded.from_number END,
    to_number = CASE WHEN excluded.to_number = 'Unknown'
        THEN call_records.to_number ELSE excluded.to_number END,
    direction = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.direction ELSE excluded.direction END,
    start_time = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.start_time ELSE excluded.start_time END,
    answer_time = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.answer_time ELSE COALESCE(excluded.answer_time, call_records.answer_time) END,
    end_time = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.end_time ELSE COALESCE(excluded.end_time, call_records.end_time) END,
    duration_seconds = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.duration_seconds ELSE excluded.duration_seconds END,
    status = excluded.status,
    hangup_cause = COALESCE(excluded.hangup_cause, call_records.hangup_cause),
    hangup_source = COALESCE(excluded.hangup_source, call_records.hangup_source),
    ai_assistant_used = MAX(excluded.ai_assistant_used, call_records.ai_assistant_used),
    ai_assistant_id = COALESCE(excluded.ai_assistant_id, call_records.ai_assistant_id),
    ai_sentiment = COALESCE(excluded.ai_sentiment, call_records.ai_sentiment),
    ai_summary = COALESCE(excluded.ai_summary, call_records.ai_summary),
    lead_quality = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.lead_quality ELSE COALESCE(excluded.lead_quality, call_records.lead_quality) END,
    appointment_booked = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.appointment_booked ELSE excluded.appointment_booked END,
    follow_up_required = CASE WHEN excluded.hangup_cause IS NULL AND call_records.hangup_cause IS NOT NULL
        THEN call_records.follow_up_required ELSE excluded.follow_up_required END,
    recording_url = COALESCE(excluded.recording_url, call_records.recording_url),
    recording_id = COALESCE(excluded.recording_id, call_records.recording_id),
    recording_duration_seconds = COALESCE(excluded.recording_duration_seconds, call_records.recording_duration_seconds),
    recording_status = COALESCE(excluded.recording_status, call_records.recording_status),
    recording_available = MAX(excluded.recording_available, call_records.recording_available),
    transcript = COALESCE(excluded.transcript, call_records.transcript),
    transcript_available = MAX(excluded.transcript_available, call_records.transcript_available),
    raw_event = COALESCE(excluded.raw_event, call_records.raw_event),
    updated_at = excluded.updated_at
RETURNING *";

#[derive(Debug, FromRow)]
struct CallRecordRow {
    #[allow(dead_code)]
    id: i64,
    call_control_id: String,
    call_session_id: Option<String>,
    call_leg_id: Option<String>,
    from_number: String,
    to_number: String,
    direction: String,
    start_time: DateTime<Utc>,
    answer_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    duration_seconds: i64,
    status: String,
    hangup_cause: Option<String>,
    hangup_source: Option<String>,
    ai_assistant_used: bool,
    ai_assistant_id: Option<String>,
    ai_sentiment: Option<String>,
    ai_summary: Option<String>,
    lead_quality: Option<String>,
    appointment_booked: bool,
    follow_up_required: bool,
    recording_url: Option<String>,
    recording_id: Option<String>,
    recording_duration_seconds: Option<i64>,
    recording_status: Option<String>,
    recording_available: bool,
    transcript: Option<String>,
    transcript_available: bool,
    raw_event: Option<Json<serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallRecordRow> for CallRecord {
    type Error = anyhow::Error;

    fn try_from(row: CallRecordRow) -> Result<Self> {
        let lead_quality = row
            .lead_quality
            .as_deref()
            .map(LeadQuality::from_str)
            .transpose()?;
        Ok(CallRecord {
            direction: CallDirection::from_str(&row.direction)?,
            call_control_id: row.call_control_id,
            call_session_id: row.call_session_id,
            call_leg_id: row.call_leg_id,
            from_number: row.from_number,
            to_number: row.to_number,
            start_time: row.start_time,
            answer_time: row.answer_time,
            end_time: row.end_time,
            duration_seconds: row.duration_seconds,
            status: row.status,
            hangup_cause: row.hangup_cause,
            hangup_source: row.hangup_source,
            ai_assistant_used: row.ai_assistant_used,
            ai_assistant_id: row.ai_assistant_id,
            ai_sentiment: row.ai_sentiment,
            ai_summary: row.ai_summary,
            lead_quality,
            appointment_booked: row.appointment_booked,
            follow_up_required: row.follow_up_required,
            recording_url: row.recording_url,
            recording_id: row.recording_id,
            recording_duration_seconds: row.recording_duration_seconds,
            recording_status: row.recording_status,
            recording_available: row.recording_available,
            transcript: row.transcript,
            transcript_available: row.transcript_available,
            raw_event: row.raw_event.map(|Json(v)| v),
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

pub fn prepare_sqlite_database(database_url: &str) -> Result<()> {
    let Some(path_part) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };

    let (path_str, _) = path_part.split_once('?').unwrap_or((path_part, ""));
    if path_str.is_empty() || path_str.starts_with(':') {
        return Ok(());
    }

    let path = std::path::Path::new(path_str);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create directory for call database at {}",
                    parent.display()
                )
            })?;
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteCallRecordRepository {
    pool: SqlitePool,
}

impl SqliteCallRecordRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        prepare_sqlite_database(database_url)?;
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url: {}", database_url))?
            .create_if_missing(true);
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            // each connection would otherwise see its own empty database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect call database: {}", database_url))?;
        let repo = Self::new(pool);
        repo.migrate().await?;
        info!(database_url, "call record repository ready");
        Ok(repo)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_CALL_RECORDS)
            .execute(&self.pool)
            .await
            .context("failed to create call_records table")?;
        for statement in CREATE_INDICES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CallRecordRepository for SqliteCallRecordRepository {
    async fn upsert(&self, record: &CallRecord) -> Result<CallRecord> {
        let now = Utc::now();
        let row: CallRecordRow = sqlx::query_as(UPSERT_CALL_RECORD)
            .bind(&record.call_control_id)
            .bind(&record.call_session_id)
            .bind(&record.call_leg_id)
            .bind(&record.from_number)
            .bind(&record.to_number)
            .bind(record.direction.as_str())
            .bind(record.start_time)
            .bind(record.answer_time)
            .bind(record.end_time)
            .bind(record.duration_seconds.max(0))
            .bind(&record.status)
            .bind(&record.hangup_cause)
            .bind(&record.hangup_source)
            .bind(record.ai_assistant_used)
            .bind(&record.ai_assistant_id)
            .bind(&record.ai_sentiment)
            .bind(&record.ai_summary)
            .bind(record.lead_quality.map(|q| q.as_str()))
            .bind(record.appointment_booked)
            .bind(record.follow_up_required)
            .bind(&record.recording_url)
            .bind(&record.recording_id)
            .bind(record.recording_duration_seconds)
            .bind(&record.recording_status)
            .bind(record.recording_available)
            .bind(&record.transcript)
            .bind(record.transcript_available)
            .bind(record.raw_event.as_ref().map(Json))
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("upsert call record {}", record.call_control_id))?;
        row.try_into()
    }

    async fn update_by_control_id(
        &self,
        call_control_id: &str,
        patch: &CallRecordPatch,
    ) -> Result<Option<CallRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE call_records SET ");
        {
            let mut fields = qb.separated(", ");
            macro_rules! set_if_some {
                ($column:literal, $value:expr) => {
                    if let Some(value) = $value {
                        fields.push(concat!($column, " = "));
                        fields.push_bind_unseparated(value);
                    }
                };
            }
            set_if_some!("status", patch.status.clone());
            set_if_some!("ai_summary", patch.ai_summary.clone());
            set_if_some!("ai_sentiment", patch.ai_sentiment.clone());
            set_if_some!("lead_quality", patch.lead_quality.map(|q| q.as_str()));
            set_if_some!("appointment_booked", patch.appointment_booked);
            set_if_some!("follow_up_required", patch.follow_up_required);
            set_if_some!("recording_url", patch.recording_url.clone());
            set_if_some!("recording_id", patch.recording_id.clone());
            set_if_some!("recording_duration_seconds", patch.recording_duration_seconds);
            set_if_some!("recording_status", patch.recording_status.clone());
            set_if_some!("recording_available", patch.recording_available);
            set_if_some!("transcript", patch.transcript.clone());
            set_if_some!("transcript_available", patch.transcript_available);
            fields.push("updated_at = ");
            fields.push_bind_unseparated(Utc::now());
        }
        qb.push(" WHERE call_control_id = ");
        qb.push_bind(call_control_id);
        qb.push(" RETURNING *");

        let row: Option<CallRecordRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("update call record {}", call_control_id))?;
        row.map(CallRecord::try_from).transpose()
    }

    async fn get_by_control_id(&self, call_control_id: &str) -> Result<Option<CallRecord>> {
        let row: Option<CallRecordRow> =
            sqlx::query_as("SELECT * FROM call_records WHERE call_control_id = ?")
                .bind(call_control_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(CallRecord::try_from).transpose()
    }

    async fn find(&self, filter: &CallRecordFilter) -> Result<Vec<CallRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM call_records WHERE 1=1");
        if let Some(assistant_id) = &filter.assistant_id {
            qb.push(" AND ai_assistant_id = ");
            qb.push_bind(assistant_id.clone());
        }
        if let Some(direction) = filter.direction {
            qb.push(" AND direction = ");
            qb.push_bind(direction.as_str());
        }
        if let Some(quality) = filter.lead_quality {
            qb.push(" AND lead_quality = ");
            qb.push_bind(quality.as_str());
        }
        if filter.has_recording {
            qb.push(" AND recording_available = 1");
        }
        if filter.has_transcript {
            qb.push(" AND transcript_available = 1");
        }
        qb.push(" ORDER BY start_time DESC LIMIT ");
        qb.push_bind(filter.page_size() as i64);

        let rows: Vec<CallRecordRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(CallRecord::try_from).collect()
    }
}
