use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-replygram-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-replygram-config-2 Version not available")]
    VersionNotAvailable,

    #[error("error-replygram-config-3 Invalid port number: {port}")]
    InvalidPortNumber { port: String },

    #[error("error-replygram-config-4 Invalid timeout value: {value}")]
    InvalidTimeout { value: String },

    #[error("error-replygram-config-5 Invalid numeric value: {details}")]
    InvalidNumber { details: String },
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("error-replygram-match-1 Invalid regex pattern for rule {rule_id}: {pattern}: {details}")]
    InvalidPattern {
        rule_id: i64,
        pattern: String,
        details: String,
    },

    #[error("error-replygram-match-2 Unknown match mode: {mode}")]
    UnknownMode { mode: String },
}

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("error-replygram-ingress-1 Malformed webhook payload: {details}")]
    MalformedPayload { details: String },

    #[error("error-replygram-ingress-2 Event persistence failed: {source}")]
    PersistenceFailed {
        #[source]
        source: StorageError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("error-replygram-processor-1 Rule lookup failed for account {account_id}: {source}")]
    RuleLookupFailed {
        account_id: i64,
        #[source]
        source: StorageError,
    },

    #[error("error-replygram-processor-2 Event finalization failed for event {event_id}: {source}")]
    FinalizeFailed {
        event_id: i64,
        #[source]
        source: StorageError,
    },

    #[error("error-replygram-processor-3 Action record persistence failed: {source}")]
    ExecutionPersistFailed {
        #[source]
        source: StorageError,
    },
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("error-replygram-sweep-1 Retry candidate query failed: {source}")]
    CandidateQueryFailed {
        #[source]
        source: StorageError,
    },

    #[error("error-replygram-sweep-2 Retry bookkeeping failed for execution {execution_id}: {source}")]
    BookkeepingFailed {
        execution_id: i64,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("error-replygram-storage-200 Database connection failed: {source}")]
    ConnectionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-replygram-storage-201 Transaction failed: {source}")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-replygram-storage-202 Query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-replygram-storage-204 Invalid input data: {details}")]
    InvalidInput { details: String },
}
