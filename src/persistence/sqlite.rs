use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::data::types::{MarketKind, MarketSnapshot};
use crate::persistence::store::{EventResolver, MarketStore, StoreError};

const UPSERT_SQL: &str = r#"
    INSERT INTO market_detail (
        market_id, event_id, half_type, wager_type,
        home_hdp, away_hdp, hdp_pos, home_hdp_odds, away_hdp_odds,
        ou_line, over_odds, under_odds,
        home_odds, draw_odds, away_odds,
        status, changed, source_time, last_update, last_change
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
    ON CONFLICT(market_id) DO UPDATE SET
        home_hdp = excluded.home_hdp,
        away_hdp = excluded.away_hdp,
        hdp_pos = excluded.hdp_pos,
        home_hdp_odds = excluded.home_hdp_odds,
        away_hdp_odds = excluded.away_hdp_odds,
        ou_line = excluded.ou_line,
        over_odds = excluded.over_odds,
        under_odds = excluded.under_odds,
        home_odds = excluded.home_odds,
        draw_odds = excluded.draw_odds,
        away_odds = excluded.away_odds,
        status = excluded.status,
        changed = excluded.changed,
        source_time = excluded.source_time,
        last_update = excluded.last_update,
        last_change = CASE WHEN excluded.changed = 1
                           THEN excluded.last_update
                           ELSE market_detail.last_change END
"#;

/// Stored form of a market row, read back for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMarket {
    pub market_id: u32,
    pub event_id: i64,
    pub kind: MarketKind,
    pub home_hdp: String,
    pub away_hdp: String,
    pub hdp_pos: u8,
    pub home_hdp_odds: Decimal,
    pub away_hdp_odds: Decimal,
    pub ou_line: String,
    pub over_odds: Decimal,
    pub home_odds: Decimal,
    pub status: i16,
    pub changed: bool,
    pub last_update: DateTime<Utc>,
    pub last_change: DateTime<Utc>,
}

/// SQLite-backed market store and event resolver.
///
/// The connection sits behind a mutex and every call runs on the blocking
/// pool so the async callers never stall a runtime worker on disk I/O.
#[derive(Clone)]
pub struct SqliteMarketStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMarketStore {
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS event_map (
                source_match_id TEXT PRIMARY KEY,
                event_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS market_detail (
                market_id INTEGER PRIMARY KEY,
                event_id INTEGER NOT NULL,
                half_type INTEGER NOT NULL,
                wager_type INTEGER NOT NULL,
                home_hdp TEXT NOT NULL DEFAULT '-',
                away_hdp TEXT NOT NULL DEFAULT '-',
                hdp_pos INTEGER NOT NULL DEFAULT 0,
                home_hdp_odds TEXT NOT NULL DEFAULT '0',
                away_hdp_odds TEXT NOT NULL DEFAULT '0',
                ou_line TEXT NOT NULL DEFAULT '-',
                over_odds TEXT NOT NULL DEFAULT '0',
                under_odds TEXT NOT NULL DEFAULT '0',
                home_odds TEXT NOT NULL DEFAULT '0',
                draw_odds TEXT NOT NULL DEFAULT '0',
                away_odds TEXT NOT NULL DEFAULT '0',
                status INTEGER NOT NULL DEFAULT 1,
                changed INTEGER NOT NULL DEFAULT 0,
                source_time TIMESTAMP NOT NULL,
                last_update TIMESTAMP NOT NULL,
                last_change TIMESTAMP NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_market_detail_event ON market_detail(event_id);
            CREATE INDEX IF NOT EXISTS idx_market_detail_status ON market_detail(status);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record which internal event a feed match id belongs to
    pub async fn register_event(&self, source_match_id: &str, event_id: i64) -> Result<(), StoreError> {
        let source_match_id = source_match_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO event_map (source_match_id, event_id) VALUES (?1, ?2)
                 ON CONFLICT(source_match_id) DO UPDATE SET event_id = excluded.event_id",
                params![source_match_id, event_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count_markets(&self) -> Result<usize, StoreError> {
        self.blocking(|conn| conn.query_row("SELECT COUNT(*) FROM market_detail", [], |row| row.get(0)))
            .await
    }

    pub async fn get_market(&self, market_id: u32) -> Result<Option<StoredMarket>, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT market_id, event_id, wager_type, home_hdp, away_hdp, hdp_pos,
                        home_hdp_odds, away_hdp_odds, ou_line, over_odds, home_odds,
                        status, changed, last_update, last_change
                 FROM market_detail WHERE market_id = ?1",
                params![market_id],
                |row| {
                    Ok(StoredMarket {
                        market_id: row.get(0)?,
                        event_id: row.get(1)?,
                        kind: kind_column(row, 2)?,
                        home_hdp: row.get(3)?,
                        away_hdp: row.get(4)?,
                        hdp_pos: row.get(5)?,
                        home_hdp_odds: decimal_column(row, 6)?,
                        away_hdp_odds: decimal_column(row, 7)?,
                        ou_line: row.get(8)?,
                        over_odds: decimal_column(row, 9)?,
                        home_odds: decimal_column(row, 10)?,
                        status: row.get(11)?,
                        changed: row.get(12)?,
                        last_update: time_column(row, 13)?,
                        last_change: time_column(row, 14)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?;
        Ok(result?)
    }
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn kind_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<MarketKind> {
    let code: i16 = row.get(idx)?;
    MarketKind::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, format!("unknown wager type {}", code).into())
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn write_snapshot(stmt: &mut rusqlite::Statement<'_>, m: &MarketSnapshot) -> rusqlite::Result<usize> {
    stmt.execute(params![
        m.id,
        m.event_id,
        m.half.code(),
        m.kind.code(),
        m.home_hdp.as_deref().unwrap_or("-"),
        m.away_hdp.as_deref().unwrap_or("-"),
        m.hdp_side,
        m.home_hdp_odds.to_string(),
        m.away_hdp_odds.to_string(),
        m.ou_line.as_deref().unwrap_or("-"),
        m.over_odds.to_string(),
        m.under_odds.to_string(),
        m.home_odds.to_string(),
        m.draw_odds.to_string(),
        m.away_odds.to_string(),
        m.status.code(),
        m.dirty,
        m.source_time.to_rfc3339(),
        m.local_update.to_rfc3339(),
    ])
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError> {
        let snapshot = snapshot.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO market_detail (
                    market_id, event_id, half_type, wager_type,
                    home_hdp, away_hdp, hdp_pos, home_hdp_odds, away_hdp_odds,
                    ou_line, over_odds, under_odds,
                    home_odds, draw_odds, away_odds,
                    status, changed, source_time, last_update, last_change
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
            )?;
            write_snapshot(&mut stmt, &snapshot)?;
            debug!(id = snapshot.id, event_id = snapshot.event_id, "Market row inserted");
            Ok(())
        })
        .await
    }

    async fn bulk_upsert(&self, snapshots: &[Arc<MarketSnapshot>]) -> Result<(), StoreError> {
        let snapshots = snapshots.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                for snapshot in &snapshots {
                    write_snapshot(&mut stmt, snapshot)?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn execute(&self, statements: &[String]) -> Result<(), StoreError> {
        if statements.is_empty() {
            return Ok(());
        }
        let batch = statements.join("\n");
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(&batch)?;
            tx.commit()
        })
        .await
    }

    fn close_statement(&self, market_id: u32) -> String {
        format!(
            "UPDATE market_detail SET status = -1, last_update = '{}' WHERE market_id = {} AND status = 1;",
            Utc::now().to_rfc3339(),
            market_id
        )
    }
}

#[async_trait]
impl EventResolver for SqliteMarketStore {
    async fn resolve(&self, source_match_id: &str) -> Result<Option<i64>, StoreError> {
        let source_match_id = source_match_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT event_id FROM event_map WHERE source_match_id = ?1",
                params![source_match_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }
}
