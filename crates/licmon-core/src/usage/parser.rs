//! Parse `show license-usage` / `show license summary` output.
//!
//! The `showcommand` endpoint answers with one JSON document per command.
//! The parser accepts those documents concatenated, in any order, and picks
//! out the sections it understands:
//!
//! ```text
//! {"License Clients License Usage for pool /": [
//!     {"Hostname": "mc-site-a", "IP Address": "10.0.0.2", "AP": "40", "PEF": "40"},
//!     {"Hostname": "TOTAL", "AP": "40", "PEF": "40"}
//! ]}
//! {"License Summary": [
//!     {"License Type": "AP", "Installed": "100", "Used": "40"}
//! ]}
//! {"_data": ["AP        100   40   60"]}
//! ```
//!
//! Anything else in the documents is ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{LicenseCount, LicenseSnapshot, HEADLINE_TYPES};

/// Prefix of the per-pool client usage tables
const POOL_TABLE_PREFIX: &str = "License Clients License Usage for pool";

/// Row name the appliance uses for per-pool aggregates
const TOTAL_ROW: &str = "TOTAL";

const TYPE_COLUMNS: &[&str] = &["License Type", "Type", "License"];
const INSTALLED_COLUMNS: &[&str] = &["Installed", "Total", "Total Installed", "Licenses"];
const USED_COLUMNS: &[&str] = &["Used", "Consumed", "In Use"];

/// Column names that look like license codes: "AP", "MC-VA-RW", "WebCC"
static LICENSE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9-]*$").expect("Invalid LICENSE_CODE regex"));

/// Text summary line: "<TYPE> <installed> <used> ..."
static SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<kind>[A-Z][A-Za-z0-9-]*)\s*:?\s+(?P<installed>\d+)\s+(?P<used>\d+)\b")
        .expect("Invalid SUMMARY_LINE regex")
});

/// Error for output that cannot be interpreted at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not a single JSON document could be read
    #[error("appliance output is not JSON: {0}")]
    NotJson(String),

    /// JSON was read but none of the known sections were present
    #[error("no license sections recognized in appliance output")]
    Unrecognized,
}

/// Parse raw output, stamping the snapshot with the current time
pub fn parse(raw: &str) -> Result<LicenseSnapshot, ParseError> {
    parse_at(raw, Utc::now())
}

/// Parse raw output into a snapshot taken at `taken_at`.
///
/// Deterministic: identical input yields an identical snapshot.
pub fn parse_at(raw: &str, taken_at: DateTime<Utc>) -> Result<LicenseSnapshot, ParseError> {
    let documents = read_documents(raw)?;

    let mut acc = Accumulator::default();
    for doc in &documents {
        if let Value::Object(map) = doc {
            acc.absorb_document(map);
        }
    }

    if !acc.recognized {
        return Err(ParseError::Unrecognized);
    }

    Ok(acc.into_snapshot(taken_at))
}

/// Read every JSON value in the text, stopping at the first malformed one
fn read_documents(raw: &str) -> Result<Vec<Value>, ParseError> {
    let mut documents = Vec::new();
    let stream = serde_json::Deserializer::from_str(raw).into_iter::<Value>();
    for item in stream {
        match item {
            Ok(value) => documents.push(value),
            Err(e) if documents.is_empty() => return Err(ParseError::NotJson(e.to_string())),
            Err(e) => {
                tracing::debug!("Ignoring trailing unparseable appliance output: {}", e);
                break;
            }
        }
    }
    if documents.is_empty() {
        return Err(ParseError::NotJson("empty output".to_string()));
    }
    Ok(documents)
}

#[derive(Default)]
struct Accumulator {
    /// Installed/used from summary sections
    summary: BTreeMap<String, LicenseCount>,
    /// Used counts from pool TOTAL rows (fallback when no summary is present)
    pool_totals: BTreeMap<String, u64>,
    clients: BTreeMap<String, BTreeMap<String, u64>>,
    recognized: bool,
}

impl Accumulator {
    fn absorb_document(&mut self, map: &Map<String, Value>) {
        for (key, value) in map {
            if key.starts_with(POOL_TABLE_PREFIX) {
                if let Value::Array(rows) = value {
                    self.recognized = true;
                    self.absorb_pool_table(rows);
                }
            } else if key == "_data" {
                if let Value::Array(items) = value {
                    self.absorb_data_list(items);
                }
            } else if let Value::Array(rows) = value {
                self.absorb_summary_table(rows);
            }
        }
    }

    fn absorb_pool_table(&mut self, rows: &[Value]) {
        for row in rows.iter().filter_map(Value::as_object) {
            let Some(hostname) = row.get("Hostname").and_then(Value::as_str) else {
                continue;
            };
            let hostname = hostname.trim();
            if hostname.is_empty() {
                continue;
            }

            let counts = license_columns(row);
            if hostname.eq_ignore_ascii_case(TOTAL_ROW) {
                for (license_type, used) in counts {
                    *self.pool_totals.entry(license_type).or_insert(0) += used;
                }
            } else {
                let entry = self.clients.entry(hostname.to_string()).or_default();
                for (license_type, used) in counts {
                    *entry.entry(license_type).or_insert(0) += used;
                }
            }
        }
    }

    fn absorb_summary_table(&mut self, rows: &[Value]) {
        for row in rows.iter().filter_map(Value::as_object) {
            let license_type = first_str(row, TYPE_COLUMNS);
            let installed = first_count(row, INSTALLED_COLUMNS);
            let used = first_count(row, USED_COLUMNS);
            if let (Some(license_type), Some(installed), Some(used)) =
                (license_type, installed, used)
            {
                self.recognized = true;
                self.summary
                    .insert(license_type, LicenseCount::new(installed, used));
            }
        }
    }

    fn absorb_data_list(&mut self, items: &[Value]) {
        for item in items {
            match item {
                // {"License": {"Type": "AP", "Used": "40", "Total": "100"}}
                Value::Object(obj) => {
                    if let Some(Value::Object(license)) = obj.get("License") {
                        self.absorb_summary_table(&[Value::Object(license.clone())]);
                    }
                }
                Value::String(line) => {
                    if let Some(caps) = SUMMARY_LINE.captures(line) {
                        let installed = caps["installed"].parse::<u64>().ok();
                        let used = caps["used"].parse::<u64>().ok();
                        if let (Some(installed), Some(used)) = (installed, used) {
                            self.recognized = true;
                            self.summary.insert(
                                caps["kind"].to_string(),
                                LicenseCount::new(installed, used),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn into_snapshot(self, taken_at: DateTime<Utc>) -> LicenseSnapshot {
        let mut licenses = self.summary;
        for (license_type, used) in self.pool_totals {
            licenses
                .entry(license_type)
                .or_insert_with(|| LicenseCount::new(0, used));
        }
        for license_type in HEADLINE_TYPES {
            licenses.entry(license_type.to_string()).or_default();
        }
        LicenseSnapshot::new(taken_at, licenses, self.clients)
    }
}

/// Columns of a pool row that look like license codes with numeric values
fn license_columns(row: &Map<String, Value>) -> Vec<(String, u64)> {
    row.iter()
        .filter(|(k, _)| k.as_str() != "Hostname" && LICENSE_CODE.is_match(k))
        .filter_map(|(k, v)| as_count(v).map(|n| (k.clone(), n)))
        .collect()
}

fn first_str(row: &Map<String, Value>, columns: &[&str]) -> Option<String> {
    columns
        .iter()
        .filter_map(|c| row.get(*c))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_count(row: &Map<String, Value>, columns: &[&str]) -> Option<u64> {
    columns.iter().filter_map(|c| row.get(*c)).find_map(as_count)
}

/// Accept JSON numbers and numeric strings ("40", " 40 ")
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}
