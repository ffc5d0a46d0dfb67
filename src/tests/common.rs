// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared fixtures for the mapping test cases.

use crate::*;

use core::cell::RefCell;

use anyhow::{bail, Result};
use serde_json::Value;

/// Definitions shared by all test cases: core types, a few resources and a legacy
/// logical model used as the source of most mappings.
pub const DEFINITIONS: &str = "tests/definitions/core.json";

pub fn context() -> Result<MemoryContext> {
    let mut ctx = MemoryContext::new();
    ctx.add_file(DEFINITIONS)?;
    Ok(ctx)
}

/// Services that record progress messages.
#[derive(Debug, Default)]
pub struct RecordingServices {
    logs: RefCell<Vec<String>>,
}

impl RecordingServices {
    pub fn take_logs(&self) -> Vec<String> {
        self.logs.take()
    }
}

impl TransformerServices for RecordingServices {
    fn log(&self, message: &str) {
        self.logs.borrow_mut().push(message.to_string());
    }
}

fn is_uuid(text: &str) -> bool {
    text.len() == 36 && uuid::Uuid::parse_str(text).is_ok()
}

/// Replace generated identifiers in `computed` with the placeholders `expected` uses.
///
/// A string ending in `#uuid` in the expected value matches any string with the same
/// prefix followed by a uuid.
pub fn process_value(computed: &Value, expected: &Value) -> Value {
    match (computed, expected) {
        (Value::String(c), Value::String(e)) => match e.strip_suffix("#uuid") {
            Some(prefix) if c.strip_prefix(prefix).is_some_and(is_uuid) => expected.clone(),
            _ => computed.clone(),
        },
        (Value::Array(c), Value::Array(e)) => Value::Array(
            c.iter()
                .enumerate()
                .map(|(i, v)| match e.get(i) {
                    Some(ev) => process_value(v, ev),
                    None => v.clone(),
                })
                .collect(),
        ),
        (Value::Object(c), Value::Object(e)) => Value::Object(
            c.iter()
                .map(|(k, v)| {
                    let v = match e.get(k) {
                        Some(ev) => process_value(v, ev),
                        None => v.clone(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        _ => computed.clone(),
    }
}

pub fn match_values(computed: &Value, expected: &Value) -> Result<()> {
    let computed = process_value(computed, expected);
    if computed != *expected {
        let expected_yaml = serde_yaml::to_string(expected)?;
        let computed_yaml = serde_yaml::to_string(&computed)?;
        std::println!(
            "{}",
            prettydiff::diff_lines(&expected_yaml, &computed_yaml)
        );
        bail!("expected:\n{}computed:\n{}", expected_yaml, computed_yaml);
    }
    Ok(())
}
