//! Append-only cost ledger.
//!
//! Every successful AI call records exactly one immutable [`CostEvent`].
//! Events are written durably to sqlite before the recording call returns;
//! running per-period counters sit in front of the event log as a warm cache
//! and are re-seeded from the log whenever they are cold. The log is the
//! source of truth, the counters never are.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

use super::pricing::round6;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cost amount must be non-negative, got {0}")]
    NegativeAmount(f64),

    #[error("invalid timezone offset")]
    InvalidOffset,
}

/// Optional context attached to a cost event.
#[derive(Debug, Clone, Default)]
pub struct CostMetadata {
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// One immutable spend fact.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CostEvent {
    pub service: String,
    pub operation: String,
    pub amount: f64,
    pub occurred_at: DateTime<FixedOffset>,
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Durable cost accumulator with period-aggregate reads.
///
/// # Thread Safety
/// All state sits behind one mutex: concurrent recorders and readers
/// serialize, which keeps the counter cache exactly consistent with the
/// event log.
pub struct CostLedger {
    state: Mutex<LedgerState>,
    offset: FixedOffset,
}

struct LedgerState {
    conn: Connection,
    counters: HashMap<String, f64>,
}

impl CostLedger {
    /// Open (or create) the ledger database. Pass `:memory:` for tests.
    pub fn open(path: &str, timezone_offset_hours: i32) -> Result<Self, LedgerError> {
        let offset = FixedOffset::east_opt(timezone_offset_hours * 3600)
            .ok_or(LedgerError::InvalidOffset)?;
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)?;
            // WAL keeps recording durable without blocking readers.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cost_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service TEXT NOT NULL,
                operation TEXT NOT NULL,
                amount REAL NOT NULL,
                occurred_at TEXT NOT NULL,
                local_date TEXT NOT NULL,
                model TEXT,
                input_tokens INTEGER,
                output_tokens INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_cost_events_local_date
                ON cost_events(local_date);",
        )?;
        Ok(Self {
            state: Mutex::new(LedgerState {
                conn,
                counters: HashMap::new(),
            }),
            offset,
        })
    }

    fn now_local(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Record a cost event at the current time.
    pub fn record(
        &self,
        service: &str,
        operation: &str,
        amount: f64,
        metadata: CostMetadata,
    ) -> Result<(), LedgerError> {
        self.record_at(service, operation, amount, metadata, self.now_local())
    }

    /// Record a cost event with an explicit timestamp (backfill, tests).
    pub fn record_at(
        &self,
        service: &str,
        operation: &str,
        amount: f64,
        metadata: CostMetadata,
        occurred_at: DateTime<FixedOffset>,
    ) -> Result<(), LedgerError> {
        if amount < 0.0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let amount = round6(amount);
        let local_date = occurred_at.format("%Y-%m-%d").to_string();
        let month = occurred_at.format("%Y-%m").to_string();

        let mut state = self.state.lock().expect("ledger lock poisoned");
        state.conn.execute(
            "INSERT INTO cost_events
                (service, operation, amount, occurred_at, local_date,
                 model, input_tokens, output_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                service,
                operation,
                amount,
                occurred_at.to_rfc3339(),
                local_date,
                metadata.model,
                metadata.input_tokens.map(|t| t as i64),
                metadata.output_tokens.map(|t| t as i64),
            ],
        )?;

        // Bump only warm counters; cold ones are seeded from the log on read.
        for key in [
            format!("d:{local_date}"),
            format!("d:{local_date}:{service}"),
            format!("m:{month}"),
            format!("m:{month}:{service}"),
        ] {
            if let Some(total) = state.counters.get_mut(&key) {
                *total = round6(*total + amount);
            }
        }
        debug!(service, operation, amount, %local_date, "cost recorded");
        Ok(())
    }

    fn counter_or_seed(
        &self,
        key: String,
        aggregate: impl Fn(&Connection) -> Result<f64, rusqlite::Error>,
    ) -> Result<f64, LedgerError> {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        if let Some(total) = state.counters.get(&key) {
            return Ok(*total);
        }
        let total = round6(aggregate(&state.conn)?);
        state.counters.insert(key, total);
        Ok(total)
    }

    /// Total recorded today, optionally for one service.
    pub fn daily_cost(&self, service: Option<&str>) -> Result<f64, LedgerError> {
        let date = self.now_local().format("%Y-%m-%d").to_string();
        let key = match service {
            Some(svc) => format!("d:{date}:{svc}"),
            None => format!("d:{date}"),
        };
        let service = service.map(str::to_string);
        self.counter_or_seed(key, move |conn| match &service {
            Some(svc) => conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events
                 WHERE local_date = ?1 AND service = ?2",
                rusqlite::params![date, svc],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events WHERE local_date = ?1",
                rusqlite::params![date],
                |row| row.get(0),
            ),
        })
    }

    /// Total recorded this calendar month, optionally for one service.
    pub fn monthly_cost(&self, service: Option<&str>) -> Result<f64, LedgerError> {
        let month = self.now_local().format("%Y-%m").to_string();
        let key = match service {
            Some(svc) => format!("m:{month}:{svc}"),
            None => format!("m:{month}"),
        };
        let prefix = format!("{month}-%");
        let service = service.map(str::to_string);
        self.counter_or_seed(key, move |conn| match &service {
            Some(svc) => conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events
                 WHERE local_date LIKE ?1 AND service = ?2",
                rusqlite::params![prefix, svc],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events WHERE local_date LIKE ?1",
                rusqlite::params![prefix],
                |row| row.get(0),
            ),
        })
    }

    /// Total over the trailing 7 days including today. Always aggregated
    /// from the event log; rolling windows are not counter-cached.
    pub fn weekly_cost(&self, service: Option<&str>) -> Result<f64, LedgerError> {
        let today = self.now_local().date_naive();
        let cutoff = (today - Duration::days(6)).format("%Y-%m-%d").to_string();
        let today = today.format("%Y-%m-%d").to_string();
        let state = self.state.lock().expect("ledger lock poisoned");
        let total: f64 = match service {
            Some(svc) => state.conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events
                 WHERE local_date BETWEEN ?1 AND ?2 AND service = ?3",
                rusqlite::params![cutoff, today, svc],
                |row| row.get(0),
            )?,
            None => state.conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM cost_events
                 WHERE local_date BETWEEN ?1 AND ?2",
                rusqlite::params![cutoff, today],
                |row| row.get(0),
            )?,
        };
        Ok(round6(total))
    }

    /// Today's spend grouped by service.
    pub fn daily_by_service(&self) -> Result<HashMap<String, f64>, LedgerError> {
        self.grouped_today("service")
    }

    /// Today's spend grouped by operation.
    pub fn daily_by_operation(&self) -> Result<HashMap<String, f64>, LedgerError> {
        self.grouped_today("operation")
    }

    fn grouped_today(&self, column: &str) -> Result<HashMap<String, f64>, LedgerError> {
        let date = self.now_local().format("%Y-%m-%d").to_string();
        let state = self.state.lock().expect("ledger lock poisoned");
        let sql = format!(
            "SELECT {column}, COALESCE(SUM(amount), 0) FROM cost_events
             WHERE local_date = ?1 GROUP BY {column}"
        );
        let mut stmt = state.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![date], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut grouped = HashMap::new();
        for row in rows {
            let (group, total) = row?;
            grouped.insert(group, round6(total));
        }
        Ok(grouped)
    }

    /// Per-day totals for the trailing `days` days, oldest first. Days with
    /// no events appear with a zero total.
    pub fn daily_trend(&self, days: u32) -> Result<Vec<(String, f64)>, LedgerError> {
        let today = self.now_local().date_naive();
        let start = today - Duration::days(days.saturating_sub(1) as i64);
        let state = self.state.lock().expect("ledger lock poisoned");
        let mut stmt = state.conn.prepare(
            "SELECT local_date, COALESCE(SUM(amount), 0) FROM cost_events
             WHERE local_date BETWEEN ?1 AND ?2 GROUP BY local_date",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                start.format("%Y-%m-%d").to_string(),
                today.format("%Y-%m-%d").to_string()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?;
        let mut by_date: HashMap<String, f64> = HashMap::new();
        for row in rows {
            let (date, total) = row?;
            by_date.insert(date, round6(total));
        }
        let mut trend = Vec::with_capacity(days as usize);
        let mut day = start;
        while day <= today {
            let key = day.format("%Y-%m-%d").to_string();
            let total = by_date.get(&key).copied().unwrap_or(0.0);
            trend.push((key, total));
            day += Duration::days(1);
        }
        Ok(trend)
    }

    /// Most recent events, newest first. Used by the reporting API.
    pub fn recent_events(&self, limit: u32) -> Result<Vec<CostEvent>, LedgerError> {
        let state = self.state.lock().expect("ledger lock poisoned");
        let mut stmt = state.conn.prepare(
            "SELECT service, operation, amount, occurred_at,
                    model, input_tokens, output_tokens
             FROM cost_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (service, operation, amount, occurred_at, model, input, output) = row?;
            let occurred_at = DateTime::parse_from_rfc3339(&occurred_at)
                .unwrap_or_else(|_| self.now_local());
            events.push(CostEvent {
                service,
                operation,
                amount,
                occurred_at,
                model,
                input_tokens: input.map(|t| t as u64),
                output_tokens: output.map(|t| t as u64),
            });
        }
        Ok(events)
    }

    /// Linear month-end projection from the elapsed-day average.
    pub fn month_end_projection(&self) -> Result<f64, LedgerError> {
        let now = self.now_local();
        let spent = self.monthly_cost(None)?;
        let elapsed = now.day().max(1) as f64;
        let days_in_month = days_in_month(now.year(), now.month()) as f64;
        Ok(round6(spent / elapsed * days_in_month))
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}
