use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::AppError;

fn context_to_json(context: &HashMap<String, String>) -> Option<Value> {
    if context.is_empty() {
        None
    } else {
        let mut map = Map::with_capacity(context.len());
        for (key, value) in context {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        Some(Value::Object(map))
    }
}

fn wrap_details(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "value": value })
    }
}

/// Brackets one user-facing operation with enter/exit log lines.
pub struct LogScope {
    area: &'static str,
    cmd: &'static str,
    household: Option<String>,
    person_id: Option<i64>,
    start: Instant,
}

impl LogScope {
    pub fn new(
        area: &'static str,
        cmd: &'static str,
        household: Option<String>,
        person_id: Option<i64>,
    ) -> Self {
        let scope = Self {
            area,
            cmd,
            household,
            person_id,
            start: Instant::now(),
        };
        debug!(
            target: "kinledger",
            area = scope.area,
            cmd = scope.cmd,
            household = scope.household.as_deref(),
            person_id = scope.person_id,
            details = %json!({ "stage": "enter" })
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, details: Value) {
        info!(
            target: "kinledger",
            area = self.area,
            cmd = self.cmd,
            household = self.household.as_deref(),
            person_id = self.person_id,
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn warn(&self, details: Value) {
        warn!(
            target: "kinledger",
            area = self.area,
            cmd = self.cmd,
            household = self.household.as_deref(),
            person_id = self.person_id,
            duration_ms = self.elapsed_ms(),
            details = %wrap_details(details)
        );
    }

    pub fn fail(&self, err: &AppError) {
        let mut map = Map::new();
        map.insert("code".into(), Value::String(err.code().to_string()));
        map.insert("message".into(), Value::String(err.message().to_string()));
        if let Some(context) = context_to_json(err.context()) {
            map.insert("context".into(), context);
        }

        if err.is_validation() {
            self.warn(Value::Object(map));
            return;
        }

        let details = Value::Object(map);
        error!(
            target: "kinledger",
            area = self.area,
            cmd = self.cmd,
            household = self.household.as_deref(),
            person_id = self.person_id,
            duration_ms = self.elapsed_ms(),
            details = %details
        );
    }
}
