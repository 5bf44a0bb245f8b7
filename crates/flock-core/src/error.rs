use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlockError {
    #[error("not initialized: run 'flock init'")]
    NotInitialized,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// What was being named (`repository`, `secret`, `topic`), the name, and why.
    #[error("invalid {0} name '{1}': {2}")]
    InvalidName(&'static str, String, String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("checkpoint for run '{run_id}' is malformed: {message}")]
    CheckpointParse { run_id: String, message: String },

    /// Writing a checkpoint failed. Fatal to the run that hit it.
    #[error("failed to persist checkpoint: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("http client error: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlockError>;
