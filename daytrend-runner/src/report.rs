//! CSV position reports and the report-delivery seam.
//!
//! Two files per run under `<results_dir>/<portfolio_id>/`: today's
//! positions with per-strategy breakdown, and yesterday's finalized
//! positions (entry at the T-2 close, exit at the T-1 close). Report
//! transport (email) is a collaborator behind `ReportSink`; the default
//! sink logs the summary.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of today's position file.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentPositionRecord {
    pub date: NaiveDate,
    pub strategy: String,
    pub symbol: String,
    pub quantity: i64,
    pub market_price: f64,
    pub notional: f64,
    pub forecast: f64,
}

/// One row of yesterday's finalized position file.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedPositionRecord {
    pub date: NaiveDate,
    pub strategy: String,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub realized_pnl: f64,
}

pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    /// Create the exporter, making the output directory if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReportError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn export_current_positions(
        &self,
        date: NaiveDate,
        records: &[CurrentPositionRecord],
    ) -> Result<PathBuf, ReportError> {
        let path = self.output_dir.join(format!("positions_{date}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = records.len(), "wrote current positions");
        Ok(path)
    }

    pub fn export_finalized_positions(
        &self,
        previous_date: NaiveDate,
        records: &[FinalizedPositionRecord],
    ) -> Result<PathBuf, ReportError> {
        let path = self
            .output_dir
            .join(format!("finalized_positions_{previous_date}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = records.len(), "wrote finalized positions");
        Ok(path)
    }
}

/// Summary handed to the report sink at the end of a run.
#[derive(Debug, Clone)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub strategy_id: String,
    pub portfolio_id: String,
    pub portfolio_value: f64,
    pub daily_pnl: f64,
    pub daily_transaction_costs: f64,
    pub finalized_yesterday_pnl: Option<f64>,
    pub active_positions: usize,
    pub attachments: Vec<PathBuf>,
}

/// Delivery seam. Transport is out of scope for the core; deployments plug
/// in an SMTP sink built from the email config.
pub trait ReportSink {
    fn deliver(&self, report: &DailyReport) -> Result<(), ReportError>;
}

/// Default sink: structured log only.
#[derive(Debug, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn deliver(&self, report: &DailyReport) -> Result<(), ReportError> {
        info!(
            date = %report.date,
            strategy = %report.strategy_id,
            portfolio = %report.portfolio_id,
            portfolio_value = report.portfolio_value,
            daily_pnl = report.daily_pnl,
            costs = report.daily_transaction_costs,
            finalized_yesterday = ?report.finalized_yesterday_pnl,
            positions = report.active_positions,
            "daily trading report"
        );
        Ok(())
    }
}
