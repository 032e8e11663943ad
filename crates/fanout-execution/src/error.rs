use datafusion::arrow::error::ArrowError;
use datafusion::common::DataFusionError;
use fanout_common::credential::CredentialError;
use thiserror::Error;
use tokio::task::JoinError;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("credential error: {0}")]
    CredentialError(#[from] CredentialError),
    #[error("schema inference error: {0}")]
    SchemaInferenceError(String),
    #[error("error in DataFusion: {0}")]
    DataFusionError(#[from] DataFusionError),
    #[error("error in Arrow: {0}")]
    ArrowError(#[from] ArrowError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ExecutionError {
    pub fn schema_inference(message: impl Into<String>) -> Self {
        ExecutionError::SchemaInferenceError(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ExecutionError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecutionError::InternalError(message.into())
    }
}

impl From<JoinError> for ExecutionError {
    fn from(error: JoinError) -> Self {
        ExecutionError::InternalError(error.to_string())
    }
}

impl From<ExecutionError> for DataFusionError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::DataFusionError(e) => e,
            ExecutionError::ArrowError(e) => DataFusionError::ArrowError(e, None),
            ExecutionError::InvalidArgument(message) => DataFusionError::Plan(message),
            ExecutionError::InternalError(message) => DataFusionError::Internal(message),
            e => DataFusionError::External(Box::new(e)),
        }
    }
}
