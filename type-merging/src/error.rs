//! Errors raised while registering, planning and resolving merged types.
//!
//! Registration problems are reported once, as a [`ConfigError`], and are fatal to startup.
//! Everything that can go wrong while a request is resolved is attached to the field it affects
//! (see [`FieldError`]) so that sibling fields still resolve.
use displaydoc::Display;
use thiserror::Error;

/// Errors raised while registering merged type configuration.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// subservice '{subservice}' is registered twice for type '{type_name}'
    DuplicateSubservice {
        type_name: String,
        subservice: String,
    },

    /// entry points '{first}' and '{second}' of subservice '{subservice}' for type '{type_name}' share the key {selection_set} but build different arguments
    AmbiguousEntryPoints {
        type_name: String,
        subservice: String,
        selection_set: String,
        first: String,
        second: String,
    },

    /// entry point '{field_name}' of subservice '{subservice}' for type '{type_name}' has an empty key
    EmptyEntryPointKey {
        type_name: String,
        subservice: String,
        field_name: String,
    },

    /// entry point '{field_name}' of subservice '{subservice}' for type '{type_name}': {reason}
    InvalidArgsBuilder {
        type_name: String,
        subservice: String,
        field_name: String,
        reason: &'static str,
    },

    /// computed field '{type_name}.{field}' of subservice '{subservice}' declares no selection set
    ComputedWithoutSelectionSet {
        type_name: String,
        subservice: String,
        field: String,
    },

    /// type '{type_name}' is marked canonical by both '{first}' and '{second}'
    MultipleCanonicalTypes {
        type_name: String,
        first: String,
        second: String,
    },

    /// field '{type_name}.{field}' is marked canonical by both '{first}' and '{second}'
    MultipleCanonicalFields {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// dependency cycle for type '{type_name}' between subservices {subservices}
    DependencyCycle {
        type_name: String,
        subservices: String,
    },

    /// subservice '{0}' has no executor attached
    UnknownSubservice(String),

    /// invalid selection set '{selection_set}': {reason}
    InvalidSelectionSet {
        selection_set: String,
        reason: &'static str,
    },

    /// could not deserialize configuration: {0}
    Deserialize(#[from] serde_yaml::Error),
}

/// Errors raised while planning the merge steps of one entity.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlanError {
    /// type '{type_name}' has no merge configuration
    UnknownType { type_name: String },

    /// no subservice can provide field '{type_name}.{field}' from the available fields
    Unsatisfiable { type_name: String, field: String },

    /// call to '{subservice}.{field_name}' is missing required fields {missing}
    MissingRequirements {
        subservice: String,
        field_name: String,
        missing: String,
    },

    /// call to '{subservice}.{field_name}' was skipped because a step it depends on did not resolve
    DependencyFailed {
        subservice: String,
        field_name: String,
    },

    /// call to '{subservice}.{field_name}' could not extract a key from the entity
    MissingKey {
        subservice: String,
        field_name: String,
    },
}

/// call to '{subservice}.{field_name}' failed: {cause}
///
/// Retries are left to the subservice executor; this is reported once per affected step.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[ignore_extra_doc_attributes]
pub struct DelegationError {
    /// The subservice that was called.
    pub subservice: String,
    /// The entry point field that was called.
    pub field_name: String,
    /// The failure reported by the executor.
    pub cause: String,
}

/// Errors raised while folding a step result into the entity being assembled.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MergeError {
    /// null was returned for non-nullable field '{field}'
    NullForNonNullable { field: String },

    /// result for field '{field}' was not an object
    UnexpectedShape { field: String },

    /// batched call returned {received} results for {expected} keys
    BatchSizeMismatch { expected: usize, received: usize },

    /// no result of the batched call correlates with key {key}
    UnmatchedKey { key: String },

    /// batched call did not return a list
    MalformedBatchResult,
}

/// Any failure that leaves a requested field unresolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Delegation(#[from] DelegationError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// An error attached to one field of one entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("field '{field}': {error}")]
pub struct FieldError {
    pub field: String,
    pub error: ResolutionError,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: impl Into<ResolutionError>) -> Self {
        Self {
            field: field.into(),
            error: error.into(),
        }
    }
}

/// Stable machine readable codes, for the request layer to put in error extensions.
pub trait ErrorExtension {
    fn extension_code(&self) -> String;
}

impl ErrorExtension for PlanError {
    fn extension_code(&self) -> String {
        match self {
            PlanError::UnknownType { .. } => "UNKNOWN_MERGED_TYPE",
            PlanError::Unsatisfiable { .. } => "UNSATISFIABLE_FIELD",
            PlanError::MissingRequirements { .. } => "MISSING_REQUIREMENTS",
            PlanError::DependencyFailed { .. } => "DEPENDENCY_FAILED",
            PlanError::MissingKey { .. } => "MISSING_KEY",
        }
        .to_string()
    }
}

impl ErrorExtension for DelegationError {
    fn extension_code(&self) -> String {
        "SUBSERVICE_CALL_FAILED".to_string()
    }
}

impl ErrorExtension for MergeError {
    fn extension_code(&self) -> String {
        match self {
            MergeError::NullForNonNullable { .. } => "NULL_FOR_NON_NULLABLE",
            MergeError::UnexpectedShape { .. } => "UNEXPECTED_RESULT_SHAPE",
            MergeError::BatchSizeMismatch { .. } => "BATCH_SIZE_MISMATCH",
            MergeError::UnmatchedKey { .. } => "UNMATCHED_KEY",
            MergeError::MalformedBatchResult => "MALFORMED_BATCH_RESULT",
        }
        .to_string()
    }
}

impl ErrorExtension for ResolutionError {
    fn extension_code(&self) -> String {
        match self {
            ResolutionError::Plan(error) => error.extension_code(),
            ResolutionError::Delegation(error) => error.extension_code(),
            ResolutionError::Merge(error) => error.extension_code(),
        }
    }
}

impl ErrorExtension for FieldError {
    fn extension_code(&self) -> String {
        self.error.extension_code()
    }
}
