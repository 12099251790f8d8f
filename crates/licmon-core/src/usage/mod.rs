//! License usage model and parser for appliance `show license-*` output.

pub mod parser;
pub mod types;

pub use parser::{parse, parse_at, ParseError};
pub use types::{LicenseCount, LicenseSnapshot, LicenseSummaryItem, HEADLINE_TYPES};
