//! Document classification through an OpenAI-compatible chat completions API.
//!
//! The agent hands extracted document text to a [`Classifier`] and receives a
//! [`Classification`] with a prose summary, a structured-data flag and notes.

mod errors;
mod openai;
mod prompt;

use serde::{Deserialize, Serialize};

pub use errors::ClassifierError;
pub use openai::{OpenAiClassifier, OpenAiConfig, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
pub use prompt::{parse_classification, SYSTEM_PROMPT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub summary: String,
    pub contains_structured_data: bool,
    #[serde(default)]
    pub notes: String,
    /// Only present when the model volunteers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub trait Classifier {
    fn classify(&self, filename: &str, text: &str) -> Result<Classification, ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn classify(&self, filename: &str, text: &str) -> Result<Classification, ClassifierError> {
        (**self).classify(filename, text)
    }
}
