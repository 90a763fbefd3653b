use thiserror::Error;

/// Failures surfaced by the store layer.
///
/// Callers that use the legacy sentinel operations never see these; the
/// `try_*` operations expose them so "not found" (an `Ok` with an empty
/// payload) stays distinguishable from an actual failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reconnect attempts hit the retry ceiling. The connector stays in
    /// this state until the connection recovers on its own or the process
    /// is restarted.
    #[error("store connection retries exhausted")]
    ConnectionExhausted,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A write reported an unexpected number of affected rows.
    #[error("expected exactly one row to be written, got {0}")]
    RowCount(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
