use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("aria2 error: {0}")]
    Aria2(String),

    #[error("aria2 not running")]
    Aria2NotRunning,

    #[error("aria2 connection failed: {0}")]
    Aria2Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("process error: {0}")]
    Process(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::Aria2(_) => -1,
            Error::Aria2NotRunning => -2,
            Error::Aria2Connection(_) => -3,
            Error::Io(_) => -4,
            Error::Serialization(_) => -5,
            Error::Process(_) => -6,
            Error::InvalidInput(_) => -7,
            Error::Config(_) => -8,
        }
    }

    /// Message suitable for showing to the user as-is.
    ///
    /// Daemon rejections carry only the text aria2 reported; everything else
    /// uses the full display string.
    pub fn user_message(&self) -> String {
        match self {
            Error::Aria2(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<aria2_ws::Error> for Error {
    fn from(err: aria2_ws::Error) -> Self {
        match err {
            // A JSON-RPC error object from the daemon itself
            aria2_ws::Error::Aria2 { source, .. } => Error::Aria2(source.message),
            other => Error::Aria2(rpc_message(&other.to_string())),
        }
    }
}

/// Pull the daemon's own message out of an RPC error string.
///
/// The text between `message:` and the next `]` is returned trimmed. If
/// either marker is missing the input comes back unchanged.
pub fn rpc_message(raw: &str) -> String {
    const MARKER: &str = "message:";

    if let Some(start) = raw.find(MARKER) {
        let rest = &raw[start + MARKER.len()..];
        if let Some(end) = rest.find(']') {
            return rest[..end].trim().to_string();
        }
    }
    raw.to_string()
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
