use thiserror::Error;

use crate::field::{Field, FieldGroup};

/// Why a spec string could not produce a value for its field.
///
/// None of these abort a batch: callers log them and move on to the next
/// field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("malformed range for `{field}`: {reason}")]
    MalformedRange { field: Field, reason: RangeFault },
    #[error("unknown value `{token}` for `{field}`")]
    UnknownToken { field: Field, token: String },
    #[error("value `{token}` has the wrong type for `{field}`")]
    TypeMismatch { field: Field, token: String },
    #[error("no known values to pick from for `{field}`")]
    EmptyInventory { field: Field },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeFault {
    #[error("bounds must be numbers")]
    NonNumericBound,
    #[error("bounds must be finite")]
    NonFinite,
    #[error("step must be greater than zero")]
    NonPositiveStep,
    #[error("stop is smaller than start")]
    Inverted,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("cannot assign {value} to `{field}` (expected {expected})")]
    TypeMismatch {
        field: Field,
        expected: &'static str,
        value: String,
    },
    #[error("`{0}` is not a job attribute")]
    NotAJobField(Field),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("unknown field `{0}`")]
    Unknown(String),
    #[error("field `{field}` belongs in the `{expected}` section")]
    WrongGroup { field: Field, expected: FieldGroup },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported config extension for {0} (expected .yaml, .yml or .json)")]
    UnsupportedExtension(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}
