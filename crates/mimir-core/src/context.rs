//! Agent-type-scoped projection of task contexts.
//!
//! PM agents see the full context; worker and qc agents get an explicit
//! allow-list projection that cuts payload size by an order of magnitude.

use crate::AgentType;
use serde::Serialize;
use serde_json::{Map, Value};

/// Fields a worker agent is allowed to see, with per-field caps on the two
/// list-valued entries.
const WORKER_FIELDS: &[&str] = &[
    "taskId",
    "title",
    "requirements",
    "description",
    "files",
    "dependencies",
    "status",
    "priority",
    "workerRole",
    "attemptNumber",
    "maxRetries",
    "errorContext",
];

/// QC extends the worker scope with verification-oriented fields.
const QC_EXTRA_FIELDS: &[&str] = &[
    "originalRequirements",
    "workerOutput",
    "verificationCriteria",
    "qcRole",
];

pub const WORKER_FILES_CAP: usize = 10;
pub const WORKER_DEPENDENCIES_CAP: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ContextMetrics {
    #[serde(rename = "originalSize")]
    pub original_size: usize,
    #[serde(rename = "filteredSize")]
    pub filtered_size: usize,
    #[serde(rename = "reductionPercent")]
    pub reduction_percent: f64,
    #[serde(rename = "fieldsRemoved")]
    pub fields_removed: usize,
    #[serde(rename = "fieldsRetained")]
    pub fields_retained: usize,
}

/// Project `full` down to the given agent scope and measure the reduction.
/// Sizes are UTF-8 bytes of the canonical JSON encoding.
pub fn project(full: &Map<String, Value>, agent: AgentType) -> (Map<String, Value>, ContextMetrics) {
    let filtered = match agent {
        AgentType::Pm => full.clone(),
        AgentType::Worker => project_fields(full, WORKER_FIELDS, &[]),
        AgentType::Qc => project_fields(full, WORKER_FIELDS, QC_EXTRA_FIELDS),
    };

    let original_size = canonical_size(full);
    let filtered_size = canonical_size(&filtered);
    let reduction_percent = if original_size == 0 {
        0.0
    } else {
        (1.0 - filtered_size as f64 / original_size as f64) * 100.0
    };

    let metrics = ContextMetrics {
        original_size,
        filtered_size,
        reduction_percent,
        fields_removed: full.len().saturating_sub(filtered.len()),
        fields_retained: filtered.len(),
    };
    (filtered, metrics)
}

fn project_fields(
    full: &Map<String, Value>,
    allowed: &[&str],
    extra: &[&str],
) -> Map<String, Value> {
    let mut out = Map::new();
    for field in allowed.iter().chain(extra.iter()) {
        if let Some(value) = full.get(*field) {
            let value = match *field {
                "files" => cap_array(value, WORKER_FILES_CAP),
                "dependencies" => cap_array(value, WORKER_DEPENDENCIES_CAP),
                _ => value.clone(),
            };
            out.insert((*field).to_string(), value);
        }
    }
    out
}

fn cap_array(value: &Value, cap: usize) -> Value {
    match value {
        Value::Array(items) if items.len() > cap => {
            Value::Array(items.iter().take(cap).cloned().collect())
        }
        other => other.clone(),
    }
}

fn canonical_size(map: &Map<String, Value>) -> usize {
    serde_json::to_vec(&Value::Object(map.clone()))
        .map(|v| v.len())
        .unwrap_or(0)
}
