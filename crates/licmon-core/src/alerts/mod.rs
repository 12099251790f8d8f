//! Per-entity alert thresholds and their evaluation.

mod evaluator;
mod types;

pub use evaluator::evaluate;
pub use types::{
    validate_entity_id, AlertEvent, EntityThreshold, Severity, ThresholdConfig, AP_USED_METRIC,
};
