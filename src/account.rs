use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::types::AccountId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub group: Option<String>,
    pub name: Option<String>,
    pub current_revenue: f64,
    pub previous_revenue: f64,
    pub historical_rate: Option<f64>,
}

impl Account {
    pub fn new(id: u64, current_revenue: f64, previous_revenue: f64) -> Self {
        Account {
            id: AccountId(id),
            group: None,
            name: None,
            current_revenue,
            previous_revenue,
            historical_rate: None,
        }
    }

    pub fn with_historical_rate(mut self, rate: f64) -> Self {
        self.historical_rate = Some(rate);
        self
    }

    /// Period-over-period growth. `None` when previous revenue is zero.
    pub fn growth(&self) -> Option<f64> {
        if self.previous_revenue == 0.0 {
            None
        } else {
            Some((self.current_revenue - self.previous_revenue) / self.previous_revenue)
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: Option<u64>,
    rfp_group: Option<String>,
    rfp_name: Option<String>,
    curryr_rev: f64,
    prevyr_rev: f64,
    rebate_rate: Option<f64>,
}

/// Load accounts from a CSV reader.
///
/// Header names are case-insensitive. `curryr_rev` and `prevyr_rev` are
/// required; `id`, `rfp_group`, `rfp_name` and `rebate_rate` are optional.
/// `rebate_rate` only feeds the learned elasticity fit.
pub fn load_accounts<R: Read>(reader: R) -> Result<Vec<Account>, LoadError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: csv::StringRecord =
        csv_reader.headers()?.iter().map(|h| h.to_lowercase()).collect();
    csv_reader.set_headers(headers);

    let mut accounts = Vec::new();
    for (row, result) in csv_reader.deserialize().enumerate() {
        let rec: AccountRecord = result?;
        accounts.push(Account {
            id: AccountId(rec.id.unwrap_or(row as u64 + 1)),
            group: rec.rfp_group.filter(|s| !s.is_empty()),
            name: rec.rfp_name.filter(|s| !s.is_empty()),
            current_revenue: rec.curryr_rev,
            previous_revenue: rec.prevyr_rev,
            historical_rate: rec.rebate_rate,
        });
    }
    Ok(accounts)
}

/// Load accounts from a CSV file path.
pub fn load_accounts_file(path: &Path) -> Result<Vec<Account>, LoadError> {
    let file = std::fs::File::open(path)
        .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    load_accounts(file)
}

/// Write accounts back out in the same column layout `load_accounts` reads.
pub fn write_accounts<W: std::io::Write>(writer: W, accounts: &[Account]) -> Result<(), LoadError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(["id", "rfp_group", "rfp_name", "curryr_rev", "prevyr_rev", "rebate_rate"])?;
    for a in accounts {
        w.write_record([
            a.id.0.to_string(),
            a.group.clone().unwrap_or_default(),
            a.name.clone().unwrap_or_default(),
            a.current_revenue.to_string(),
            a.previous_revenue.to_string(),
            a.historical_rate.map(|r| r.to_string()).unwrap_or_default(),
        ])?;
    }
    w.flush().map_err(|source| LoadError::Io { path: "<output>".into(), source })?;
    Ok(())
}
