//! Unified error types for graphcache.
//!
//! Variants fall into two classes: invariant violations, which signal a broken
//! caller or payload contract and must never be recovered from silently, and
//! runtime failures (deferred fetches, the persistent cache) that callers are
//! expected to handle.

use tokio_rusqlite::rusqlite;

use crate::record::DataId;

/// Unified error type for the record store, query writer and trackers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record was read or written before it was created.
    #[error("RECORD_MISSING: record `{0}` does not exist")]
    RecordMissing(DataId),

    /// A link was written whose source or target record does not exist.
    #[error("LINK_TARGET_MISSING: cannot link `{record}`.`{field}` to `{target}`; both records must exist")]
    LinkTargetMissing { record: DataId, field: String, target: DataId },

    /// The payload was missing a value where the query expected one.
    #[error("UNDEFINED_VALUE: unexpectedly encountered undefined for `{0}`")]
    UndefinedValue(String),

    /// A single-valued root call received more than one payload entry.
    #[error("AMBIGUOUS_PAYLOAD: expected a single result for root call `{root_call}`, received {count}")]
    AmbiguousPayload { root_call: String, count: usize },

    /// A range operation targeted a record without a range.
    #[error("RANGE_MISSING: record `{0}` has no range")]
    RangeMissing(DataId),

    /// Pagination arguments could not be interpreted.
    #[error("INVALID_RANGE_CALLS: {0}")]
    InvalidRangeCalls(String),

    /// `node`/`nodes` called without an argument.
    #[error("MISSING_NODE_ARGUMENT: root call `{0}` requires an id argument")]
    MissingNodeArgument(String),

    /// Ranges can only be created or filled in the base layer.
    #[error("QUEUED_RANGE_WRITE: cannot write range edges for `{0}` in a queued layer")]
    QueuedRangeWrite(DataId),

    /// The payload did not have the shape the query describes.
    #[error("INVALID_PAYLOAD: {0}")]
    InvalidPayload(String),

    /// A listener subscription was removed more than once.
    #[error("LISTENER_REMOVED: remove() can only be called once")]
    ListenerRemoved,

    /// The same query was recorded twice.
    #[error("QUERY_ALREADY_TRACKED: query `{0}` is already tracked")]
    QueryAlreadyTracked(String),

    /// A query was resolved or rejected without being pending.
    #[error("QUERY_NOT_PENDING: query `{0}` is not pending")]
    QueryNotPending(String),

    /// The garbage collector may only be initialized once.
    #[error("GC_INITIALIZED: garbage collector is already initialized")]
    GarbageCollectorInitialized,

    /// A deferred query failed to fetch.
    #[error("QUERY_FAILED: {0}")]
    QueryFailed(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A cached record could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error reports a broken caller or payload contract.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(
            self,
            Error::QueryFailed(_) | Error::Database(_) | Error::MigrationFailed(_) | Error::Serialization(_)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
