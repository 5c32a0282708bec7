use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::services::extraction::ExtractionError;
use crate::services::generator::GenerationError;
use crate::store::StoreError;

/// Uniform command result: `{success, ...fields, error?, code?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: Map::new(),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Map::new(),
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }

    /// Adds a field. Values that fail to serialize are stored as `null`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    /// Non-fatal detail on a successful response (partial bundle failures).
    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No chunks available. Please extract content from a file first.")]
    NoChunks,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Failed to persist learner state: {0}")]
    Persistence(#[from] StoreError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoChunks => "NO_CHUNKS",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::UnknownMode(_) => "UNKNOWN_MODE",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::Extraction(_) => "EXTRACTION_FAILED",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Persistence(_) => "PERSISTENCE_FAILED",
        }
    }

    /// Collaborator failures are worth an error log; bad input is not.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Self::NoChunks | Self::UnknownAction(_) | Self::UnknownMode(_) | Self::InvalidParams(_)
        )
    }
}

impl From<GenerationError> for CommandError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err.to_string())
    }
}

impl From<CommandError> for CommandResponse {
    fn from(err: CommandError) -> Self {
        CommandResponse::failure(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_flattened() {
        let json = CommandResponse::ok().with("mode", "quiz").to_json();
        assert_eq!(json["success"], true);
        assert_eq!(json["mode"], "quiz");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_carries_code() {
        let response: CommandResponse = CommandError::UnknownAction("dance".into()).into();
        assert!(!response.success);
        assert_eq!(response.code.as_deref(), Some("UNKNOWN_ACTION"));
        assert_eq!(response.error.as_deref(), Some("Unknown action: dance"));
    }
}
