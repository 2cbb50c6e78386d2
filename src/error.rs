use std::time::Duration;
use thiserror::Error;

/// How the worker pool should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff; only attempt counters change.
    Transient,
    /// Never retried automatically; surfaced to an operator.
    Permanent,
    /// Illegal state-transition request; the entity is left unchanged.
    Invariant,
    /// Lock busy. A control signal, the job is rescheduled.
    Contention,
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("illegal {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("lock {0} is held by another worker")]
    LockBusy(String),
    #[error("lock {0} was lost before the operation completed")]
    LockLost(String),
    #[error("{operation} exceeded its time limit of {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
    #[error("Processor error: {0}")]
    ProcessorError(String),
    #[error("Charge rejected: {0}")]
    ChargeRejected(String),
    #[error("Render error: {0}")]
    RenderError(String),
    #[error("Unknown payment processor: {0}")]
    UnknownProcessor(String),
    #[cfg(feature = "lock-redis")]
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BillingError::LockBusy(_) => ErrorClass::Contention,
            BillingError::InvalidTransition { .. } => ErrorClass::Invariant,
            BillingError::IoError(_)
            | BillingError::Conflict(_)
            | BillingError::LockLost(_)
            | BillingError::Timeout { .. }
            | BillingError::ProcessorError(_)
            | BillingError::RenderError(_)
            | BillingError::InternalError(_) => ErrorClass::Transient,
            #[cfg(feature = "lock-redis")]
            BillingError::RedisError(_) => ErrorClass::Transient,
            #[cfg(feature = "storage-rocksdb")]
            BillingError::RocksDBError(_) => ErrorClass::Transient,
            BillingError::CsvError(_)
            | BillingError::SerializationError(_)
            | BillingError::ValidationError(_)
            | BillingError::ConfigError(_)
            | BillingError::NotFound { .. }
            | BillingError::ChargeRejected(_)
            | BillingError::UnknownProcessor(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
