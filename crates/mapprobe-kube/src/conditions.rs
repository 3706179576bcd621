//! Readiness evaluation over Knative-style status conditions.
//!
//! A resource is ready when its controller has observed the latest
//! generation and its `Ready` condition is `"True"`.

use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;

/// Condition type that summarises overall readiness.
pub const READY: &str = "Ready";

/// One entry of `status.conditions`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

fn status(obj: &DynamicObject) -> Option<&Value> {
    obj.data.get("status")
}

/// Parse `status.conditions`, skipping malformed entries.
pub fn conditions(obj: &DynamicObject) -> Vec<Condition> {
    status(obj)
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

pub fn condition(obj: &DynamicObject, type_: &str) -> Option<Condition> {
    conditions(obj).into_iter().find(|c| c.type_ == type_)
}

pub fn observed_generation(obj: &DynamicObject) -> Option<i64> {
    status(obj)
        .and_then(|s| s.get("observedGeneration"))
        .and_then(Value::as_i64)
}

/// Whether the status reflects the current spec.
pub fn is_current(obj: &DynamicObject) -> bool {
    match obj.metadata.generation {
        Some(generation) => observed_generation(obj) == Some(generation),
        None => true,
    }
}

pub fn is_ready(obj: &DynamicObject) -> bool {
    is_current(obj) && condition(obj, READY).is_some_and(|c| c.is_true())
}

/// One-line summary of readiness for error messages.
pub fn describe_readiness(obj: &DynamicObject) -> String {
    let mut parts = Vec::new();

    match condition(obj, READY) {
        Some(ready) => {
            parts.push(format!("{}={}", READY, ready.status));
            if let Some(reason) = ready.reason.filter(|r| !r.is_empty()) {
                parts.push(format!("reason={}", reason));
            }
            if let Some(message) = ready.message.filter(|m| !m.is_empty()) {
                parts.push(format!("message={:?}", message));
            }
        }
        None => parts.push(format!("{} condition missing", READY)),
    }

    if !is_current(obj) {
        parts.push(format!(
            "observedGeneration={} generation={}",
            observed_generation(obj).map_or_else(|| "-".to_string(), |g| g.to_string()),
            obj.metadata.generation.unwrap_or_default()
        ));
    }

    let pending: Vec<String> = conditions(obj)
        .into_iter()
        .filter(|c| c.type_ != READY && !c.is_true())
        .map(|c| format!("{}={}", c.type_, c.status))
        .collect();
    if !pending.is_empty() {
        parts.push(format!("pending=[{}]", pending.join(",")));
    }

    parts.join(" ")
}
