//! Error types shared across the system

use thiserror::Error;

/// Validation failures for process specifications and execution requests.
///
/// These never cause a job state change: they are raised before a job record
/// exists and surface to the caller as 4xx responses.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("process id '{0}' must be a non-empty lowercase identifier")]
    InvalidProcessId(String),

    #[error("process '{id}': {field} is required")]
    MissingField { id: String, field: &'static str },

    #[error("process '{id}': duplicate process id")]
    DuplicateProcessId { id: String },

    #[error("process '{id}': container image is required for container host type")]
    MissingImage { id: String },

    #[error("process '{id}': jobDefinition and jobQueue are required for remote-batch host type")]
    MissingBatchTarget { id: String },

    #[error("process '{id}': no base command configured")]
    MissingCommand { id: String },

    #[error("process '{id}': env variable '{var}' does not start with '{prefix}'")]
    EnvVarPrefix {
        id: String,
        var: String,
        prefix: String,
    },

    #[error("process '{id}': env variables not set: {vars:?}; restart the server with these in place")]
    EnvVarsMissing { id: String, vars: Vec<String> },

    #[error("process '{id}': requested {requested} {what} exceeds the local limit of {limit}")]
    ResourcesOverLimit {
        id: String,
        what: &'static str,
        requested: f64,
        limit: f64,
    },

    #[error("process '{id}': invalid volume specification '{spec}'")]
    InvalidVolume { id: String, spec: String },

    #[error("process '{id}': volumes are only supported for the container host type")]
    VolumesNotSupported { id: String },

    #[error("process '{id}': input {index} is missing an id")]
    InputMissingId { id: String, index: usize },

    #[error("process '{id}': output {index} is missing an id")]
    OutputMissingId { id: String, index: usize },

    #[error("'{input}' is not a valid input for process '{id}'")]
    UnknownInput { id: String, input: String },

    #[error("wrong number of occurrences of input '{0}'")]
    InputOccurrence(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
