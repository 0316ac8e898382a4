//! Output schema validation for structured agent artifacts (JSON Schema 2020-12).

use std::fmt;
use std::marker::PhantomData;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One reason an artifact was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Compiled schema paired with the type a valid artifact deserializes into.
pub struct OutputSchema<T> {
    validator: Validator,
    _output: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for OutputSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema").finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> OutputSchema<T> {
    pub fn compile(schema_raw: &str) -> Result<Self> {
        let schema: Value = serde_json::from_str(schema_raw).context("parse json schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile json schema")?;
        Ok(Self {
            validator,
            _output: PhantomData,
        })
    }

    /// Accept or reject `instance`. Schema violations are listed in validator
    /// order; a schema-valid value that still fails to deserialize yields a
    /// single error.
    pub fn validate(&self, instance: &Value) -> Result<T, Vec<FieldError>> {
        let errors: Vec<FieldError> = self
            .validator
            .iter_errors(instance)
            .map(|err| FieldError {
                message: err.to_string(),
            })
            .collect();
        if !errors.is_empty() {
            return Err(errors);
        }
        serde_json::from_value(instance.clone()).map_err(|err| {
            vec![FieldError {
                message: format!("deserialize artifact: {err}"),
            }]
        })
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}

/// Join field errors into one line for logs and error messages.
pub fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|err| err.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
