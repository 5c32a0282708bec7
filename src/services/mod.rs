pub mod advisor;
pub mod bundle;
pub mod extraction;
pub mod generator;
pub mod llm_provider;

pub use advisor::{ModeMix, PreferenceAdvisor};
pub use bundle::{BundleGenerator, BundleOutcome};
pub use extraction::{
    Extraction, ExtractionError, ExtractionRequest, PlainTextExtractor, TextExtractor,
};
pub use generator::{ContentGenerator, GenerationError, GenerationRequest, LlmContentGenerator};
pub use llm_provider::{LLMConfig, LLMError, LLMProvider};
