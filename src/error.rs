/// Error types shared by the ingestion and publishing pipelines
use thiserror::Error;

/// Why a manufacturer data record could not be turned into a reading.
///
/// Always recoverable: the event is dropped and the next advertisement
/// from the same node is decoded instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("advertisement too short: {len} bytes")]
    TooShort { len: usize },
    #[error("unrecognized vendor id 0x{0:04X}")]
    UnrecognizedVendor(u16),
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("invalid stored value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: i64 },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink connection failed: {0}")]
    Connection(String),
    #[error("sink disconnected")]
    Disconnected,
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Per-event failure of the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no manufacturer data in advertisement")]
    MissingPayload,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
    #[error("MQTT_USERNAME and MQTT_PASSWORD must be set together")]
    PartialCredentials,
}
