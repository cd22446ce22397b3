//! Scan schedule settings persistence
//!
//! One fixed record holds the schedule. Each field gets its own column; the
//! weekday list is stored as JSON text.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::sqlite_helpers::{bool_to_int, datetime_to_str, decode_err, int_to_bool, json_to_vec, vec_to_json};
use crate::services::scan::settings::{ExecutionTime, ScheduleInterval, ScheduleSettings};

const SCHEDULE_ID: &str = "scan_schedule_settings";

struct ScheduleRow(ScheduleSettings);

impl sqlx::FromRow<'_, SqliteRow> for ScheduleRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let interval: String = row.try_get("schedule_interval")?;
        let weekly_days: String = row.try_get("weekly_days")?;
        let hour: i64 = row.try_get("execution_hour")?;
        let minute: i64 = row.try_get("execution_minute")?;
        let interval_hours: i64 = row.try_get("interval_hours")?;
        let monthly_day: i64 = row.try_get("monthly_day")?;
        let max_minutes: i64 = row.try_get("max_execution_time_minutes")?;

        Ok(Self(ScheduleSettings {
            enabled: int_to_bool(row.try_get("enabled")?),
            interval: ScheduleInterval::parse(&interval).ok_or_else(|| {
                decode_err(anyhow::anyhow!("Unknown schedule interval '{}'", interval))
            })?,
            interval_hours: interval_hours.clamp(1, u32::MAX as i64) as u32,
            execution_time: ExecutionTime {
                hour: hour.clamp(0, 23) as u8,
                minute: minute.clamp(0, 59) as u8,
            },
            weekly_days: json_to_vec(&weekly_days),
            monthly_day: monthly_day.clamp(1, 31) as u8,
            skip_if_running: int_to_bool(row.try_get("skip_if_running")?),
            max_execution_time_minutes: max_minutes.clamp(1, u32::MAX as i64) as u32,
            only_when_idle: int_to_bool(row.try_get("only_when_idle")?),
        }))
    }
}

pub struct ScheduleSettingsRepository {
    pool: SqlitePool,
}

impl ScheduleSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored settings, or `None` when nothing was saved yet
    pub async fn get(&self) -> Result<Option<ScheduleSettings>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT * FROM scan_schedule_settings WHERE id = ?1",
        )
        .bind(SCHEDULE_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    pub async fn save(&self, settings: &ScheduleSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_schedule_settings (
                id, enabled, schedule_interval, interval_hours, execution_hour, execution_minute,
                weekly_days, monthly_day, skip_if_running, max_execution_time_minutes,
                only_when_idle, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                schedule_interval = excluded.schedule_interval,
                interval_hours = excluded.interval_hours,
                execution_hour = excluded.execution_hour,
                execution_minute = excluded.execution_minute,
                weekly_days = excluded.weekly_days,
                monthly_day = excluded.monthly_day,
                skip_if_running = excluded.skip_if_running,
                max_execution_time_minutes = excluded.max_execution_time_minutes,
                only_when_idle = excluded.only_when_idle,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(SCHEDULE_ID)
        .bind(bool_to_int(settings.enabled))
        .bind(settings.interval.as_str())
        .bind(settings.interval_hours as i64)
        .bind(settings.execution_time.hour as i64)
        .bind(settings.execution_time.minute as i64)
        .bind(vec_to_json(&settings.weekly_days))
        .bind(settings.monthly_day as i64)
        .bind(bool_to_int(settings.skip_if_running))
        .bind(settings.max_execution_time_minutes as i64)
        .bind(bool_to_int(settings.only_when_idle))
        .bind(datetime_to_str(chrono::Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
