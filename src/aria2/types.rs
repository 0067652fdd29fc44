use serde::{Deserialize, Deserializer, Serialize};

/// Type-safe wrapper for aria2 GID (Global ID)
/// GIDs are 16-character hexadecimal strings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gid(String);

impl Gid {
    /// Validate a GID coming from the front end
    pub fn new(s: impl Into<String>) -> Result<Self, GidError> {
        let s = s.into();
        if s.is_empty() {
            return Err(GidError::Empty);
        }
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s))
        } else {
            Err(GidError::InvalidFormat(s))
        }
    }

    /// Create a Gid without validation (use when coming from aria2)
    pub fn from_aria2(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Gid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GidError {
    Empty,
    InvalidFormat(String),
}

impl std::fmt::Display for GidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GidError::Empty => write!(f, "invalid GID"),
            GidError::InvalidFormat(s) => write!(f, "invalid GID: {}", s),
        }
    }
}

impl std::error::Error for GidError {}

impl From<GidError> for crate::Error {
    fn from(err: GidError) -> Self {
        crate::Error::InvalidInput(err.to_string())
    }
}

/// The subset of a `tellStatus` reply the shell reads.
///
/// aria2 sends integers as decimal strings; the client library may already
/// have converted them, so both forms are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub gid: String,
    pub status: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_length: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub download_speed: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) if s.is_empty() => Ok(0),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Progress snapshot handed to the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressInfo {
    /// Percent complete, 0.0 to 100.0
    pub progress: f64,
    /// Bytes per second
    pub download_speed: f64,
    pub total_size: u64,
    pub completed_size: u64,
    pub status: String,
}

/// `completed / total * 100`, or 0 while the total is still unknown.
pub fn progress_percent(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}

impl From<&DownloadStatus> for DownloadProgressInfo {
    fn from(status: &DownloadStatus) -> Self {
        Self {
            progress: progress_percent(status.completed_length, status.total_length),
            download_speed: status.download_speed as f64,
            total_size: status.total_length,
            completed_size: status.completed_length,
            status: status.status.clone(),
        }
    }
}
