//! Provider implementations.
//!
//! Each provider implements [`ProviderAdapter`]. [`ProviderConfig`] picks and validates
//! one when the agent is configured.

pub mod openai;

pub use openai::OpenAiAdapter;

use crate::llm::ProviderAdapter;
use crate::types::AgentError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Chat Completions API, or any compatible endpoint.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
}

/// Connection settings for a model provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl ProviderConfig {
    #[must_use]
    pub fn openai(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Validate the settings and construct the adapter.
    ///
    /// # Errors
    /// Returns a configuration error if the api key, base url, or model is blank.
    pub fn build(&self) -> Result<Arc<dyn ProviderAdapter>, AgentError> {
        for (field, value) in [
            ("api_key", &self.api_key),
            ("base_url", &self.base_url),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::configuration(format!(
                    "{field} is required for the {} provider",
                    self.kind.as_str()
                )));
            }
        }

        match self.kind {
            ProviderKind::OpenAi => Ok(Arc::new(OpenAiAdapter::with_base_url(
                self.api_key.clone(),
                self.model.clone(),
                self.base_url.clone(),
            ))),
        }
    }
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
        }
    }
}
