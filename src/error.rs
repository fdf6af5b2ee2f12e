//! Error types for subscription synchronization.

use crate::saga::SagaState;
use crate::types::CorrelationId;
use std::time::Duration;
use thiserror::Error;

/// Main error type for subscription service operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Saga not found: {0}")]
    SagaNotFound(CorrelationId),

    #[error("Saga already exists: {0}")]
    SagaExists(CorrelationId),

    #[error("Illegal saga transition for {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: CorrelationId,
        from: SagaState,
        to: SagaState,
    },

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Send to {address} failed: {reason}")]
    SendFailed { address: String, reason: String },

    #[error("Sequencer is stopped")]
    SequencerStopped,

    #[error("Sequencer shutdown timed out after {timeout:?}; {abandoned} work item(s) abandoned")]
    ShutdownTimeout { abandoned: usize, timeout: Duration },

    #[error("Shutdown failed: {0}")]
    Shutdown(#[source] Box<SyncError>),

    #[error("Invalid service state: expected {expected}, got {got}")]
    InvalidState { expected: String, got: String },

    #[error("Bus has been disposed")]
    BusDisposed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Saga store is locked by another process")]
    Locked,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Wrap a failure raised while shutting down into the shutdown error.
    pub fn shutdown(cause: SyncError) -> Self {
        match cause {
            SyncError::Shutdown(_) => cause,
            other => SyncError::Shutdown(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for subscription service operations.
pub type Result<T> = std::result::Result<T, SyncError>;
