//! Literal scalar values.

use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// A literal value embedded in a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    /// SQL `NULL`.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// The type a literal gets when none is declared.
    pub fn default_dtype(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int(_) => DataType::Int64,
            ScalarValue::Float(_) => DataType::Float64,
            ScalarValue::String(_) => DataType::String,
            ScalarValue::Binary(_) => DataType::Binary,
        }
    }

    /// Returns `true` for the literal `TRUE`.
    pub fn is_true(&self) -> bool {
        matches!(self, ScalarValue::Boolean(true))
    }
}
