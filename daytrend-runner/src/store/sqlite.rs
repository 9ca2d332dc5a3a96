//! SQLite driver for the `LiveStore` seam.
//!
//! Stands in for the deployment database behind the same interface. Dates
//! are ISO-8601 TEXT, fixed-point scalars are TEXT (exact round-trip),
//! ratios are REAL. `database.name` from the config doubles as the file
//! path; `:memory:` backs the test suites.

use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use rust_decimal::Decimal;
use tracing::debug;

use daytrend_core::domain::{Bar, Instrument};

use super::{
    EquityPoint, ExecutionRow, LiveResultRow, LiveStore, PositionRow, RunMetadataRow, SignalRow,
    StoreError,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS futures_data_contract_specs (
    symbol                  TEXT PRIMARY KEY,
    multiplier              REAL NOT NULL,
    tick_size               REAL NOT NULL,
    initial_margin          REAL NOT NULL,
    maintenance_margin      REAL NOT NULL,
    commission_per_contract REAL NOT NULL,
    trading_hours           TEXT NOT NULL,
    expiry                  TEXT
);

CREATE TABLE IF NOT EXISTS futures_data_ohlcv_daily (
    symbol TEXT NOT NULL,
    date   TEXT NOT NULL,
    open   REAL NOT NULL,
    high   REAL NOT NULL,
    low    REAL NOT NULL,
    close  REAL NOT NULL,
    volume INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS trading_positions (
    strategy_id    TEXT NOT NULL,
    strategy_name  TEXT NOT NULL,
    portfolio_id   TEXT NOT NULL,
    symbol         TEXT NOT NULL,
    date           TEXT NOT NULL,
    quantity       TEXT NOT NULL,
    average_price  TEXT NOT NULL,
    realized_pnl   TEXT NOT NULL,
    unrealized_pnl TEXT NOT NULL,
    PRIMARY KEY (strategy_id, strategy_name, portfolio_id, symbol, date)
);

CREATE TABLE IF NOT EXISTS trading_executions (
    order_id                TEXT PRIMARY KEY,
    strategy_id             TEXT NOT NULL,
    strategy_name           TEXT NOT NULL,
    portfolio_id            TEXT NOT NULL,
    symbol                  TEXT NOT NULL,
    side                    TEXT NOT NULL,
    filled_quantity         TEXT NOT NULL,
    fill_price              TEXT NOT NULL,
    commission              TEXT NOT NULL,
    total_transaction_costs TEXT NOT NULL,
    execution_time          TEXT NOT NULL,
    date                    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_day
    ON trading_executions (strategy_id, portfolio_id, date);

CREATE TABLE IF NOT EXISTS trading_signals (
    strategy_id   TEXT NOT NULL,
    strategy_name TEXT NOT NULL,
    portfolio_id  TEXT NOT NULL,
    symbol        TEXT NOT NULL,
    date          TEXT NOT NULL,
    forecast      REAL NOT NULL,
    PRIMARY KEY (strategy_id, strategy_name, portfolio_id, symbol, date)
);

CREATE TABLE IF NOT EXISTS trading_live_results (
    strategy_id             TEXT NOT NULL,
    portfolio_id            TEXT NOT NULL,
    date                    TEXT NOT NULL,
    daily_pnl               TEXT NOT NULL,
    daily_realized_pnl      TEXT NOT NULL,
    daily_unrealized_pnl    TEXT NOT NULL,
    daily_transaction_costs TEXT NOT NULL,
    daily_return            REAL NOT NULL,
    total_pnl               TEXT NOT NULL,
    total_realized_pnl      TEXT NOT NULL,
    total_transaction_costs TEXT NOT NULL,
    total_cumulative_return REAL NOT NULL,
    total_annualized_return REAL NOT NULL,
    current_portfolio_value TEXT NOT NULL,
    portfolio_leverage      REAL NOT NULL,
    equity_to_margin_ratio  REAL NOT NULL,
    margin_cushion          REAL NOT NULL,
    gross_notional          TEXT NOT NULL,
    net_notional            TEXT NOT NULL,
    margin_posted           TEXT NOT NULL,
    cash_available          TEXT NOT NULL,
    active_positions        INTEGER NOT NULL,
    PRIMARY KEY (strategy_id, portfolio_id, date)
);

CREATE TABLE IF NOT EXISTS trading_equity_curve (
    strategy_id  TEXT NOT NULL,
    portfolio_id TEXT NOT NULL,
    date         TEXT NOT NULL,
    equity       TEXT NOT NULL,
    PRIMARY KEY (strategy_id, portfolio_id, date)
);

CREATE TABLE IF NOT EXISTS trading_live_run_metadata (
    strategy_id      TEXT NOT NULL,
    date             TEXT NOT NULL,
    portfolio_id     TEXT NOT NULL,
    allocations      TEXT NOT NULL,
    portfolio_config TEXT NOT NULL,
    strategy_configs TEXT NOT NULL,
    PRIMARY KEY (strategy_id, date)
);

CREATE TABLE IF NOT EXISTS trading_strategy_days_metadata (
    strategy_id     TEXT PRIMARY KEY,
    live_start_date TEXT NOT NULL
);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        debug!("store schema bootstrapped");
        Ok(Self { conn })
    }
}

fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_sql(text: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| StoreError::Other(format!("bad date '{text}': {e}")))
}

fn datetime_to_sql(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn datetime_from_sql(text: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| StoreError::Other(format!("bad timestamp '{text}': {e}")))
}

fn dec_from_sql(text: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(text).map_err(|e| StoreError::Other(format!("bad decimal '{text}': {e}")))
}

impl LiveStore for SqliteStore {
    fn load_instruments(&self) -> Result<Vec<Instrument>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, multiplier, tick_size, initial_margin, maintenance_margin, \
             commission_per_contract, trading_hours, expiry \
             FROM futures_data_contract_specs ORDER BY symbol",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut instruments = Vec::new();
        for row in rows {
            let (symbol, multiplier, tick, im, mm, commission, hours, expiry) = row?;
            instruments.push(Instrument {
                symbol,
                multiplier,
                tick_size: tick,
                initial_margin: im,
                maintenance_margin: mm,
                commission_per_contract: commission,
                trading_hours: hours,
                expiry: expiry.as_deref().map(date_from_sql).transpose()?,
            });
        }
        Ok(instruments)
    }

    fn insert_instruments(&self, instruments: &[Instrument]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for inst in instruments {
            tx.execute(
                "INSERT OR REPLACE INTO futures_data_contract_specs \
                 (symbol, multiplier, tick_size, initial_margin, maintenance_margin, \
                  commission_per_contract, trading_hours, expiry) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    inst.symbol,
                    inst.multiplier,
                    inst.tick_size,
                    inst.initial_margin,
                    inst.maintenance_margin,
                    inst.commission_per_contract,
                    inst.trading_hours,
                    inst.expiry.map(date_to_sql),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_bars(&self, bars: &[Bar]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO futures_data_ohlcv_daily \
                 (symbol, date, open, high, low, close, volume) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bar.symbol,
                    date_to_sql(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_bars(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, StoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; symbols.len()].join(", ");
        let query = format!(
            "SELECT symbol, date, open, high, low, close, volume \
             FROM futures_data_ohlcv_daily \
             WHERE symbol IN ({placeholders}) AND date >= ? AND date <= ? \
             ORDER BY symbol, date"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let mut args: Vec<String> = symbols.to_vec();
        args.push(date_to_sql(start));
        args.push(date_to_sql(end));

        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (symbol, date, open, high, low, close, volume) = row?;
            bars.push(Bar {
                symbol,
                date: date_from_sql(&date)?,
                open,
                high,
                low,
                close,
                volume: volume.max(0) as u64,
            });
        }
        Ok(bars)
    }

    fn delete_positions(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM trading_positions \
             WHERE strategy_id = ?1 AND strategy_name = ?2 AND portfolio_id = ?3 AND date = ?4",
            params![strategy_id, strategy_name, portfolio_id, date_to_sql(date)],
        )?;
        Ok(())
    }

    fn store_positions(&self, rows: &[PositionRow]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO trading_positions \
                 (strategy_id, strategy_name, portfolio_id, symbol, date, \
                  quantity, average_price, realized_pnl, unrealized_pnl) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.strategy_id,
                    row.strategy_name,
                    row.portfolio_id,
                    row.symbol,
                    date_to_sql(row.date),
                    row.quantity.to_string(),
                    row.average_price.to_string(),
                    row.realized_pnl.to_string(),
                    row.unrealized_pnl.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_positions(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<PositionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, quantity, average_price, realized_pnl, unrealized_pnl \
             FROM trading_positions \
             WHERE strategy_id = ?1 AND strategy_name = ?2 AND portfolio_id = ?3 AND date = ?4 \
             ORDER BY symbol",
        )?;
        let rows = stmt.query_map(
            params![strategy_id, strategy_name, portfolio_id, date_to_sql(date)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )?;

        let mut positions = Vec::new();
        for row in rows {
            let (symbol, quantity, average_price, realized, unrealized) = row?;
            positions.push(PositionRow {
                strategy_id: strategy_id.to_string(),
                strategy_name: strategy_name.to_string(),
                portfolio_id: portfolio_id.to_string(),
                symbol,
                date,
                quantity: dec_from_sql(&quantity)?,
                average_price: dec_from_sql(&average_price)?,
                realized_pnl: dec_from_sql(&realized)?,
                unrealized_pnl: dec_from_sql(&unrealized)?,
            });
        }
        Ok(positions)
    }

    fn delete_executions_by_order_ids(
        &self,
        order_ids: &[String],
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        if order_ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; order_ids.len()].join(", ");
        let query = format!(
            "DELETE FROM trading_executions WHERE order_id IN ({placeholders}) AND date = ?"
        );
        let mut args: Vec<String> = order_ids.to_vec();
        args.push(date_to_sql(date));
        self.conn.execute(&query, params_from_iter(args.iter()))?;
        Ok(())
    }

    fn store_executions(&self, rows: &[ExecutionRow]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO trading_executions \
                 (order_id, strategy_id, strategy_name, portfolio_id, symbol, side, \
                  filled_quantity, fill_price, commission, total_transaction_costs, \
                  execution_time, date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.order_id,
                    row.strategy_id,
                    row.strategy_name,
                    row.portfolio_id,
                    row.symbol,
                    row.side,
                    row.filled_quantity.to_string(),
                    row.fill_price.to_string(),
                    row.commission.to_string(),
                    row.total_transaction_costs.to_string(),
                    datetime_to_sql(row.execution_time),
                    date_to_sql(row.date),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_executions(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ExecutionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT order_id, strategy_name, symbol, side, filled_quantity, fill_price, \
             commission, total_transaction_costs, execution_time \
             FROM trading_executions \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date = ?3 \
             ORDER BY strategy_name, symbol, order_id",
        )?;
        let rows = stmt.query_map(
            params![strategy_id, portfolio_id, date_to_sql(date)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )?;

        let mut executions = Vec::new();
        for row in rows {
            let (order_id, strategy_name, symbol, side, qty, price, commission, costs, time) =
                row?;
            executions.push(ExecutionRow {
                order_id,
                strategy_id: strategy_id.to_string(),
                strategy_name,
                portfolio_id: portfolio_id.to_string(),
                symbol,
                side,
                filled_quantity: dec_from_sql(&qty)?,
                fill_price: dec_from_sql(&price)?,
                commission: dec_from_sql(&commission)?,
                total_transaction_costs: dec_from_sql(&costs)?,
                execution_time: datetime_from_sql(&time)?,
                date,
            });
        }
        Ok(executions)
    }

    fn delete_signals(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM trading_signals \
             WHERE strategy_id = ?1 AND strategy_name = ?2 AND portfolio_id = ?3 AND date = ?4",
            params![strategy_id, strategy_name, portfolio_id, date_to_sql(date)],
        )?;
        Ok(())
    }

    fn store_signals(&self, rows: &[SignalRow]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO trading_signals \
                 (strategy_id, strategy_name, portfolio_id, symbol, date, forecast) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.strategy_id,
                    row.strategy_name,
                    row.portfolio_id,
                    row.symbol,
                    date_to_sql(row.date),
                    row.forecast,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_signals(
        &self,
        strategy_id: &str,
        strategy_name: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<SignalRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, forecast FROM trading_signals \
             WHERE strategy_id = ?1 AND strategy_name = ?2 AND portfolio_id = ?3 AND date = ?4 \
             ORDER BY symbol",
        )?;
        let rows = stmt.query_map(
            params![strategy_id, strategy_name, portfolio_id, date_to_sql(date)],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?;

        let mut signals = Vec::new();
        for row in rows {
            let (symbol, forecast) = row?;
            signals.push(SignalRow {
                strategy_id: strategy_id.to_string(),
                strategy_name: strategy_name.to_string(),
                portfolio_id: portfolio_id.to_string(),
                symbol,
                date,
                forecast,
            });
        }
        Ok(signals)
    }

    fn delete_live_result(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM trading_live_results \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date = ?3",
            params![strategy_id, portfolio_id, date_to_sql(date)],
        )?;
        Ok(())
    }

    fn store_live_result(&self, row: &LiveResultRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO trading_live_results \
             (strategy_id, portfolio_id, date, daily_pnl, daily_realized_pnl, \
              daily_unrealized_pnl, daily_transaction_costs, daily_return, total_pnl, \
              total_realized_pnl, total_transaction_costs, total_cumulative_return, \
              total_annualized_return, current_portfolio_value, portfolio_leverage, \
              equity_to_margin_ratio, margin_cushion, gross_notional, net_notional, \
              margin_posted, cash_available, active_positions) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                row.strategy_id,
                row.portfolio_id,
                date_to_sql(row.date),
                row.daily_pnl.to_string(),
                row.daily_realized_pnl.to_string(),
                row.daily_unrealized_pnl.to_string(),
                row.daily_transaction_costs.to_string(),
                row.daily_return,
                row.total_pnl.to_string(),
                row.total_realized_pnl.to_string(),
                row.total_transaction_costs.to_string(),
                row.total_cumulative_return,
                row.total_annualized_return,
                row.current_portfolio_value.to_string(),
                row.portfolio_leverage,
                row.equity_to_margin_ratio,
                row.margin_cushion,
                row.gross_notional.to_string(),
                row.net_notional.to_string(),
                row.margin_posted.to_string(),
                row.cash_available.to_string(),
                row.active_positions,
            ],
        )?;
        Ok(())
    }

    fn load_live_result(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<LiveResultRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT daily_pnl, daily_realized_pnl, daily_unrealized_pnl, \
             daily_transaction_costs, daily_return, total_pnl, total_realized_pnl, \
             total_transaction_costs, total_cumulative_return, total_annualized_return, \
             current_portfolio_value, portfolio_leverage, equity_to_margin_ratio, \
             margin_cushion, gross_notional, net_notional, margin_posted, cash_available, \
             active_positions \
             FROM trading_live_results \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date = ?3",
        )?;
        let mut rows = stmt.query(params![strategy_id, portfolio_id, date_to_sql(date)])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(LiveResultRow {
            strategy_id: strategy_id.to_string(),
            portfolio_id: portfolio_id.to_string(),
            date,
            daily_pnl: dec_from_sql(&row.get::<_, String>(0)?)?,
            daily_realized_pnl: dec_from_sql(&row.get::<_, String>(1)?)?,
            daily_unrealized_pnl: dec_from_sql(&row.get::<_, String>(2)?)?,
            daily_transaction_costs: dec_from_sql(&row.get::<_, String>(3)?)?,
            daily_return: row.get(4)?,
            total_pnl: dec_from_sql(&row.get::<_, String>(5)?)?,
            total_realized_pnl: dec_from_sql(&row.get::<_, String>(6)?)?,
            total_transaction_costs: dec_from_sql(&row.get::<_, String>(7)?)?,
            total_cumulative_return: row.get(8)?,
            total_annualized_return: row.get(9)?,
            current_portfolio_value: dec_from_sql(&row.get::<_, String>(10)?)?,
            portfolio_leverage: row.get(11)?,
            equity_to_margin_ratio: row.get(12)?,
            margin_cushion: row.get(13)?,
            gross_notional: dec_from_sql(&row.get::<_, String>(14)?)?,
            net_notional: dec_from_sql(&row.get::<_, String>(15)?)?,
            margin_posted: dec_from_sql(&row.get::<_, String>(16)?)?,
            cash_available: dec_from_sql(&row.get::<_, String>(17)?)?,
            active_positions: row.get(18)?,
        }))
    }

    fn previous_aggregates(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<(Decimal, Decimal, Decimal)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT current_portfolio_value, total_pnl, total_transaction_costs \
             FROM trading_live_results \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date < ?3 \
             ORDER BY date DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![strategy_id, portfolio_id, date_to_sql(date)])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some((
            dec_from_sql(&row.get::<_, String>(0)?)?,
            dec_from_sql(&row.get::<_, String>(1)?)?,
            dec_from_sql(&row.get::<_, String>(2)?)?,
        )))
    }

    fn delete_equity_point(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM trading_equity_curve \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date = ?3",
            params![strategy_id, portfolio_id, date_to_sql(date)],
        )?;
        Ok(())
    }

    fn store_equity_point(&self, point: &EquityPoint) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO trading_equity_curve \
             (strategy_id, portfolio_id, date, equity) VALUES (?1, ?2, ?3, ?4)",
            params![
                point.strategy_id,
                point.portfolio_id,
                date_to_sql(point.date),
                point.equity.to_string(),
            ],
        )?;
        Ok(())
    }

    fn load_equity_point(
        &self,
        strategy_id: &str,
        portfolio_id: &str,
        date: NaiveDate,
    ) -> Result<Option<EquityPoint>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT equity FROM trading_equity_curve \
             WHERE strategy_id = ?1 AND portfolio_id = ?2 AND date = ?3",
        )?;
        let mut rows = stmt.query(params![strategy_id, portfolio_id, date_to_sql(date)])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(EquityPoint {
            strategy_id: strategy_id.to_string(),
            portfolio_id: portfolio_id.to_string(),
            date,
            equity: dec_from_sql(&row.get::<_, String>(0)?)?,
        }))
    }

    fn store_run_metadata(&self, row: &RunMetadataRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO trading_live_run_metadata \
             (strategy_id, date, portfolio_id, allocations, portfolio_config, strategy_configs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.strategy_id,
                date_to_sql(row.date),
                row.portfolio_id,
                serde_json::to_string(&row.allocations)?,
                serde_json::to_string(&row.portfolio_config)?,
                serde_json::to_string(&row.strategy_configs)?,
            ],
        )?;
        Ok(())
    }

    fn ensure_live_start_date(
        &self,
        strategy_id: &str,
        date: NaiveDate,
    ) -> Result<NaiveDate, StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO trading_strategy_days_metadata \
             (strategy_id, live_start_date) VALUES (?1, ?2)",
            params![strategy_id, date_to_sql(date)],
        )?;
        Ok(self
            .live_start_date(strategy_id)?
            .expect("row inserted above"))
    }

    fn live_start_date(&self, strategy_id: &str) -> Result<Option<NaiveDate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT live_start_date FROM trading_strategy_days_metadata WHERE strategy_id = ?1",
        )?;
        let mut rows = stmt.query(params![strategy_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        date_from_sql(&row.get::<_, String>(0)?).map(Some)
    }
}
