//! Commands decoded once from `(action, params, session_id)`.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::engine::analytics::chunk_key;
use crate::engine::types::{ContentType, LearningPreference, ModeId};
use crate::response::CommandError;
use crate::services::extraction::ExtractionRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Extract {
        request: ExtractionRequest,
        file_name: Option<String>,
    },
    Generate {
        content_type: ContentType,
        chunks: Vec<String>,
        /// Used only when neither `chunks` nor the session has any.
        extracted_chunks: Vec<String>,
        num_items: Option<u32>,
        context: Option<String>,
    },
    UpdateFeedback {
        mode: ModeId,
        value: f64,
    },
    Recommend,
    Survey {
        preference: LearningPreference,
    },
    ResetPreferences,
    RecordAnswer {
        chunk_key: String,
        is_correct: bool,
        question_text: String,
        source_label: String,
    },
    Analytics {
        weak_threshold: Option<f64>,
        strong_threshold: Option<f64>,
        min_attempts: Option<u32>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ExtractParams {
    file_path: Option<PathBuf>,
    #[serde(alias = "text")]
    file_content: Option<String>,
    file_type: Option<String>,
    file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateParams {
    content_type: Option<String>,
    chunks: Option<Vec<String>>,
    extracted_chunks: Option<Vec<String>>,
    num_items: Option<u32>,
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    mode: String,
    #[serde(alias = "value")]
    feedback: f64,
}

#[derive(Debug, Default, Deserialize)]
struct SurveyParams {
    preference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordAnswerParams {
    chunk_key: Option<String>,
    source_reference: Option<String>,
    file_name: Option<String>,
    is_correct: bool,
    #[serde(default)]
    question_text: String,
    source_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsParams {
    weak_threshold: Option<f64>,
    strong_threshold: Option<f64>,
    min_attempts: Option<u32>,
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Extract { .. } => "extract",
            Self::Generate { .. } => "generate",
            Self::UpdateFeedback { .. } => "update_rl",
            Self::Recommend => "recommend",
            Self::Survey { .. } => "survey",
            Self::ResetPreferences => "reset_preferences",
            Self::RecordAnswer { .. } => "record_answer",
            Self::Analytics { .. } => "analytics",
        }
    }

    pub fn decode(action: &str, params: &Value) -> Result<Self, CommandError> {
        match action.trim() {
            "extract" => {
                let p: ExtractParams = parse_params(params)?;
                if p.file_path.is_none() && p.file_content.is_none() {
                    return Err(CommandError::InvalidParams(
                        "extract needs file_path or file_content".into(),
                    ));
                }
                let file_name = p.file_name.or_else(|| {
                    p.file_path
                        .as_deref()
                        .and_then(|path| path.file_name())
                        .map(|name| name.to_string_lossy().into_owned())
                });
                Ok(Self::Extract {
                    request: ExtractionRequest {
                        file_path: p.file_path,
                        content: p.file_content.map(String::into_bytes),
                        file_type: p.file_type,
                    },
                    file_name,
                })
            }
            "generate" => {
                let p: GenerateParams = parse_params(params)?;
                let content_type = match p.content_type.as_deref() {
                    None => ContentType::default(),
                    Some(raw) => ContentType::parse(raw)
                        .ok_or_else(|| CommandError::UnknownMode(raw.to_string()))?,
                };
                Ok(Self::Generate {
                    content_type,
                    chunks: p.chunks.unwrap_or_default(),
                    extracted_chunks: p.extracted_chunks.unwrap_or_default(),
                    num_items: p.num_items.filter(|n| *n > 0),
                    context: p.context,
                })
            }
            "update_rl" => {
                let p: UpdateParams = parse_required(params)?;
                let mode = ModeId::parse(&p.mode).ok_or(CommandError::UnknownMode(p.mode))?;
                if !p.feedback.is_finite() {
                    return Err(CommandError::InvalidParams(
                        "feedback must be a finite number".into(),
                    ));
                }
                Ok(Self::UpdateFeedback {
                    mode,
                    value: p.feedback,
                })
            }
            "recommend" => Ok(Self::Recommend),
            "survey" => {
                let p: SurveyParams = parse_params(params)?;
                let preference = match p.preference.as_deref() {
                    None => LearningPreference::Unknown,
                    Some(raw) => LearningPreference::parse(raw).ok_or_else(|| {
                        CommandError::InvalidParams(format!("unknown preference: {raw}"))
                    })?,
                };
                Ok(Self::Survey { preference })
            }
            "reset_preferences" | "reset" => Ok(Self::ResetPreferences),
            "record_answer" => {
                let p: RecordAnswerParams = parse_required(params)?;
                let reference = p.source_reference.unwrap_or_default();
                let key = match p.chunk_key.filter(|k| !k.trim().is_empty()) {
                    Some(key) => key,
                    None if !reference.trim().is_empty() => {
                        chunk_key(&reference, p.file_name.as_deref())
                    }
                    None => {
                        return Err(CommandError::InvalidParams(
                            "record_answer needs chunk_key or source_reference".into(),
                        ))
                    }
                };
                Ok(Self::RecordAnswer {
                    chunk_key: key,
                    is_correct: p.is_correct,
                    question_text: p.question_text,
                    source_label: p.source_label.unwrap_or(reference),
                })
            }
            "analytics" => {
                let p: AnalyticsParams = parse_params(params)?;
                Ok(Self::Analytics {
                    weak_threshold: p.weak_threshold,
                    strong_threshold: p.strong_threshold,
                    min_attempts: p.min_attempts,
                })
            }
            other => Err(CommandError::UnknownAction(other.to_string())),
        }
    }
}

/// Missing params (`null`) decode as the all-defaults value.
fn parse_params<T: DeserializeOwned + Default>(params: &Value) -> Result<T, CommandError> {
    if params.is_null() {
        return Ok(T::default());
    }
    parse_required(params)
}

fn parse_required<T: DeserializeOwned>(params: &Value) -> Result<T, CommandError> {
    serde_json::from_value(params.clone()).map_err(|e| CommandError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_action() {
        let err = Command::decode("dance", &json!({})).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_ACTION");
    }

    #[test]
    fn test_update_rl_unknown_mode() {
        let err = Command::decode("update_rl", &json!({"mode": "podcast", "feedback": 1.0}))
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MODE");
    }

    #[test]
    fn test_generate_keeps_chunk_sources_apart() {
        let cmd = Command::decode(
            "generate",
            &json!({"content_type": "flashcards", "chunks": [], "extracted_chunks": ["a"]}),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Generate {
                content_type: ContentType::Flashcard,
                chunks: Vec::new(),
                extracted_chunks: vec!["a".into()],
                num_items: None,
                context: None,
            }
        );
    }

    #[test]
    fn test_record_answer_derives_key() {
        let cmd = Command::decode(
            "record_answer",
            &json!({"source_reference": "Chunk 4 - Cells", "is_correct": true}),
        )
        .unwrap();
        match cmd {
            Command::RecordAnswer { chunk_key, source_label, .. } => {
                assert_eq!(chunk_key, "chunk_4");
                assert_eq!(source_label, "Chunk 4 - Cells");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_recommend_accepts_null_params() {
        assert_eq!(Command::decode("recommend", &Value::Null).unwrap(), Command::Recommend);
        assert!(matches!(
            Command::decode("survey", &Value::Null).unwrap(),
            Command::Survey { preference: LearningPreference::Unknown }
        ));
    }
}
