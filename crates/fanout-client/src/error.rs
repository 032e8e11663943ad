use arrow::error::ArrowError;
use arrow_flight::error::FlightError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("error in Arrow: {0}")]
    ArrowError(#[from] ArrowError),
    #[error("error in Arrow Flight: {0}")]
    FlightError(#[from] FlightError),
    #[error("error in Tonic transport: {0}")]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl ClientError {
    pub fn connection(message: impl Into<String>) -> Self {
        ClientError::ConnectionError(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        ClientError::QueryError(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ClientError::ProtocolError(message.into())
    }
}
