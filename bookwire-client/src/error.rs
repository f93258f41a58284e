use bookwire::BookwireError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client is not connected")]
    NotConnected,

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<BookwireError> for ClientError {
    fn from(err: BookwireError) -> Self {
        match err {
            BookwireError::Serialization(msg) => ClientError::Serialization(msg),
            other => ClientError::Broker(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
