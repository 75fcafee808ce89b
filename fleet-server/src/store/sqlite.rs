//! SQLite persistence, per §4.4. One writer connection pool in WAL mode;
//! the data store owns write-through, readers use the same pool (sqlx
//! pools interior-serialize writes against a single SQLite file).

use chrono::{DateTime, Utc};
use fleet_core::{Command, CommandResult, CommandStatus, CommandType, Machine, SpeedTestResult};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub async fn connect(path: &str) -> Result<SqlitePool, sqlx::Error> {
    if path != ":memory:" && !path.starts_with("sqlite::memory:") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Test-only in-memory pool with migrations applied.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

// ── machines ────────────────────────────────────────────────────────────────

pub async fn upsert_machine(pool: &SqlitePool, machine: &Machine) -> Result<(), sqlx::Error> {
    let info = serde_json::to_string(machine).expect("Machine serializes");
    sqlx::query(
        "INSERT INTO machines (machine_id, info, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(machine_id) DO UPDATE SET info = ?2, last_seen = ?4",
    )
    .bind(&machine.machine_id)
    .bind(info)
    .bind(machine.first_seen.to_rfc3339())
    .bind(machine.last_seen.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_last_seen(
    pool: &SqlitePool,
    machine_id: &str,
    last_seen: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE machines SET last_seen = ?1 WHERE machine_id = ?2")
        .bind(last_seen.to_rfc3339())
        .bind(machine_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_machine_if_absent(
    pool: &SqlitePool,
    machine_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let placeholder = serde_json::json!({ "machine_id": machine_id }).to_string();
    sqlx::query(
        "INSERT INTO machines (machine_id, info, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(machine_id) DO NOTHING",
    )
    .bind(machine_id)
    .bind(placeholder)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

// ── metrics_history ──────────────────────────────────────────────────────────

pub async fn insert_metrics_history(
    pool: &SqlitePool,
    machine_id: &str,
    timestamp: DateTime<Utc>,
    payload: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO metrics_history (machine_id, timestamp, payload) VALUES (?1, ?2, ?3)")
        .bind(machine_id)
        .bind(timestamp.to_rfc3339())
        .bind(payload.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete rows older than `retention_days`; run from the nightly background
/// task, never from the request path (§5).
pub async fn prune_metrics_history(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<u64, sqlx::Error> {
    let cutoff = now - chrono::Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM metrics_history WHERE timestamp < ?1")
        .bind(cutoff.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ── speedtest_results ────────────────────────────────────────────────────────

pub async fn insert_speedtest(
    pool: &SqlitePool,
    result: &SpeedTestResult,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO speedtest_results
         (machine_id, timestamp, download, upload, ping, jitter, loss, server, isp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&result.machine_id)
    .bind(result.timestamp.to_rfc3339())
    .bind(result.download_mbps)
    .bind(result.upload_mbps)
    .bind(result.ping_ms)
    .bind(result.jitter_ms)
    .bind(result.packet_loss_pct)
    .bind(&result.server)
    .bind(&result.isp)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct SpeedtestRow {
    pub machine_id: String,
    pub timestamp: DateTime<Utc>,
    pub download: f64,
    pub upload: f64,
    pub ping: f64,
}

fn row_to_speedtest(row: &sqlx::sqlite::SqliteRow) -> SpeedtestRow {
    let ts: String = row.get("timestamp");
    SpeedtestRow {
        machine_id: row.get("machine_id"),
        timestamp: DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        download: row.get("download"),
        upload: row.get("upload"),
        ping: row.get("ping"),
    }
}

pub async fn recent_speedtests(
    pool: &SqlitePool,
    machine_id: &str,
    limit: i64,
) -> Result<Vec<SpeedtestRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT machine_id, timestamp, download, upload, ping FROM speedtest_results
         WHERE machine_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
    )
    .bind(machine_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_speedtest).collect())
}

pub async fn speedtests_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<Vec<SpeedtestRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT machine_id, timestamp, download, upload, ping FROM speedtest_results
         WHERE timestamp >= ?1 ORDER BY timestamp ASC",
    )
    .bind(since.to_rfc3339())
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_speedtest).collect())
}

pub async fn distinct_machine_ids_with_speedtests(
    pool: &SqlitePool,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT DISTINCT machine_id FROM speedtest_results")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("machine_id")).collect())
}

// ── commands ─────────────────────────────────────────────────────────────────

fn command_type_str(kind: CommandType) -> &'static str {
    match kind {
        CommandType::SpeedtestNow => "speedtest_now",
        CommandType::ReloadConfig => "reload_config",
        CommandType::Quiesce => "quiesce",
        CommandType::CollectDiag => "collect_diag",
    }
}

fn parse_command_type(s: &str) -> CommandType {
    match s {
        "speedtest_now" => CommandType::SpeedtestNow,
        "reload_config" => CommandType::ReloadConfig,
        "quiesce" => CommandType::Quiesce,
        _ => CommandType::CollectDiag,
    }
}

fn command_status_str(status: CommandStatus) -> &'static str {
    match status {
        CommandStatus::Pending => "pending",
        CommandStatus::Delivered => "delivered",
        CommandStatus::Done => "done",
    }
}

fn parse_command_status(s: &str) -> CommandStatus {
    match s {
        "delivered" => CommandStatus::Delivered,
        "done" => CommandStatus::Done,
        _ => CommandStatus::Pending,
    }
}

fn row_to_command(row: &sqlx::sqlite::SqliteRow) -> Command {
    let created_at: String = row.get("created_at");
    let delivered_at: Option<String> = row.get("delivered_at");
    let args: String = row.get("args");
    let result: Option<String> = row.get("result");
    let command_id: String = row.get("command_id");
    let type_str: String = row.get("type");
    let status_str: String = row.get("status");
    Command {
        command_id: Uuid::parse_str(&command_id).unwrap_or_else(|_| Uuid::new_v4()),
        machine_id: row.get("machine_id"),
        kind: parse_command_type(&type_str),
        args: serde_json::from_str(&args).unwrap_or(Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        delivered_at: delivered_at.and_then(|d| {
            DateTime::parse_from_rfc3339(&d)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        status: parse_command_status(&status_str),
    }
}

pub async fn enqueue_command(
    pool: &SqlitePool,
    machine_id: &str,
    kind: CommandType,
    args: Value,
) -> Result<Uuid, sqlx::Error> {
    let command_id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO commands (command_id, machine_id, type, args, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
    )
    .bind(command_id.to_string())
    .bind(machine_id)
    .bind(command_type_str(kind))
    .bind(args.to_string())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(command_id)
}

pub async fn pending_commands(
    pool: &SqlitePool,
    machine_id: &str,
) -> Result<Vec<Command>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM commands WHERE machine_id = ?1 AND status = 'pending' ORDER BY created_at ASC",
    )
    .bind(machine_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_command).collect())
}

pub async fn mark_delivered(
    pool: &SqlitePool,
    command_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    for id in command_ids {
        sqlx::query(
            "UPDATE commands SET status = 'delivered', delivered_at = ?1 WHERE command_id = ?2",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Apply a `CommandResult`. Idempotent: a command already `done` is left
/// untouched (§4.9, §8 round-trip law).
pub async fn complete_command(
    pool: &SqlitePool,
    result: &CommandResult,
) -> Result<(), sqlx::Error> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT status FROM commands WHERE command_id = ?1")
            .bind(result.command_id.to_string())
            .fetch_optional(pool)
            .await?;

    match existing {
        Some((status,)) if status == "done" => Ok(()),
        Some(_) => {
            sqlx::query("UPDATE commands SET status = 'done', result = ?1 WHERE command_id = ?2")
                .bind(serde_json::to_string(result).unwrap_or_default())
                .bind(result.command_id.to_string())
                .execute(pool)
                .await?;
            Ok(())
        }
        None => Ok(()),
    }
}

// ── users ────────────────────────────────────────────────────────────────────

pub struct UserRow {
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
}

pub async fn get_user(pool: &SqlitePool, username: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query("SELECT username, password_hash, password_salt FROM users WHERE username = ?1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| UserRow {
        username: r.get("username"),
        password_hash: r.get("password_hash"),
        password_salt: r.get("password_salt"),
    }))
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
    password_salt: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (username, password_hash, password_salt, created_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(username)
    .bind(password_hash)
    .bind(password_salt)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_password_hash(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET password_hash = ?1 WHERE username = ?2")
        .bind(password_hash)
        .bind(username)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn touch_last_login(pool: &SqlitePool, username: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login = ?1 WHERE username = ?2")
        .bind(Utc::now().to_rfc3339())
        .bind(username)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) as n FROM users")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

// ── sessions ─────────────────────────────────────────────────────────────────

pub struct SessionRow {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn create_session(
    pool: &SqlitePool,
    token: &str,
    username: &str,
    ttl_seconds: i64,
) -> Result<DateTime<Utc>, sqlx::Error> {
    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(ttl_seconds);
    sqlx::query(
        "INSERT INTO sessions (token, username, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(token)
    .bind(username)
    .bind(now.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(expires_at)
}

pub async fn get_session(pool: &SqlitePool, token: &str) -> Result<Option<SessionRow>, sqlx::Error> {
    let row = sqlx::query("SELECT token, username, expires_at FROM sessions WHERE token = ?1")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| {
        let expires_at: String = r.get("expires_at");
        SessionRow {
            token: r.get("token"),
            username: r.get("username"),
            expires_at: DateTime::parse_from_rfc3339(&expires_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }))
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Purge expired sessions; run every 10 minutes from the background task (§5).
pub async fn gc_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
