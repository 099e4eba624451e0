//! Supervisor error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Supervisor error that can be serialized for UI consumers.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Service name is not registered with the supervisor
    UnknownService,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Launch command does not exist
    ExecutableNotFound,
    /// Launch command exists but may not be executed
    SpawnDenied,
    /// Process spawn failed for another reason
    SpawnFailed,
    /// Best-effort termination did not succeed
    TerminationFailed,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::UnknownService => 1001,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::ExecutableNotFound => 3001,
            Self::SpawnDenied => 3002,
            Self::SpawnFailed => 3003,
            Self::TerminationFailed => 3004,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn unknown_service(name: &str) -> Self {
        Self::new(
            ErrorKind::UnknownService,
            HashMap::from([("service".to_string(), name.to_string())]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn executable_not_found(command: &str) -> Self {
        Self::new(
            ErrorKind::ExecutableNotFound,
            HashMap::from([("command".to_string(), command.to_string())]),
        )
    }

    pub fn spawn_denied(command: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SpawnDenied,
            HashMap::from([
                ("command".to_string(), command.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::SpawnFailed, message)
    }

    pub fn termination_failed(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::TerminationFailed, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_code_and_payload() {
        let err = AppError::unknown_service("rag");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], 1001);
        assert_eq!(value["payload"]["service"], "rag");
    }

    #[test]
    fn display_includes_kind_and_payload() {
        let err = AppError::executable_not_found("scripts/start_asr.sh");
        let text = err.to_string();
        assert!(text.contains("ExecutableNotFound"));
        assert!(text.contains("scripts/start_asr.sh"));
    }
}
