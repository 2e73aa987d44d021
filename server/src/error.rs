//! Error taxonomy shared by the storage core and the metadata store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid offset: {0}")]
    InvalidOffset(i64),
    #[error("unsupported backend type: {0}")]
    UnsupportedType(String),
    #[error("insufficient capacity: need {needed} bytes, backend {backend_id} has {available}")]
    InsufficientCapacity {
        backend_id: String,
        needed: i64,
        available: i64,
    },
    #[error("inconsistent chunk layout: {0}")]
    InconsistentChunkLayout(String),
    #[error("item can't be downloaded, current status: {0}")]
    WrongStatus(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("update of {0} abandoned after {1} contended attempts")]
    Contention(String, u32),
    #[error("operation cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed backend parameters: {0}")]
    Params(#[from] serde_json::Error),
}

impl From<ssh2::Error> for StoreError {
    fn from(err: ssh2::Error) -> Self {
        StoreError::TransportFailure(format!("ssh: {}", err))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::TransportFailure(format!("http: {}", err))
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

impl From<StoreError> for std::io::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => e,
            StoreError::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
