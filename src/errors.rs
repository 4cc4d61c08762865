use std::ffi::NulError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BindingError>;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Failed to load native library: {0}")]
    Load(String),
    #[error("Failed to open remote process group: {0}")]
    Connection(String),
    #[error("Failed to build flow: {0}")]
    FlowCreation(String),
    #[error("Property rejected: {0}")]
    Property(String),
    #[error("Malformed flow file: {0}")]
    Retrieval(String),
    #[error("Failed to transmit flow file: {0}")]
    Transmission(String),
    #[error("{0} has already been disposed")]
    UseAfterDispose(&'static str),
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("Native library does not export `{0}`")]
    Unsupported(&'static str),
    #[error("String contains an interior NUL byte: {0:?}")]
    InvalidString(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<NulError> for BindingError {
    fn from(e: NulError) -> Self {
        let bytes = e.into_vec();
        Self::InvalidString(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl From<serde_json::Error> for BindingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl BindingError {
    /// Re-labels a boundary string failure as the taxonomy variant of the
    /// operation that was being attempted.
    pub(crate) fn relabel(self, wrap: fn(String) -> Self) -> Self {
        match self {
            Self::InvalidString(s) => {
                wrap(format!("argument contains a NUL byte: {:?}", s))
            }
            other => other,
        }
    }
}
