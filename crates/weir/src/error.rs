use thiserror::Error;
use weir_store::StoreError;

pub type Result<T> = std::result::Result<T, QueueError>;

/// The failure modes the protocol distinguishes. Store driver faults pass
/// through unmodified.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store did not answer the liveness probe with PONG")]
    PongFailure,

    #[error("queue already exists")]
    QueueAlreadyExists,

    #[error("queue does not exist")]
    QueueDoesNotExist,

    #[error("queue is closed")]
    QueueIsClosed,

    #[error("unexpected state while seeding a new queue")]
    CreationFailure,

    #[error("another client holds the {0} slot")]
    QueueInUse(&'static str),

    #[error("queue is full")]
    QueueFull,

    #[error(transparent)]
    Store(#[from] StoreError),
}
