use crate::context::CompactionConfig;
use crate::llm::ProviderAdapter;
use crate::providers::ProviderConfig;
use crate::stores::{InMemoryStore, JsonFileStore, SessionStore};
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, AgentError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::AgentLoop;
use super::types::StorageMode;

/// Builder for constructing an `AgentLoop`.
///
/// # Example
///
/// ```no_run
/// use veloca_agent::{AgentConfig, AgentLoop, ProviderConfig, StorageMode, ToolRegistry};
///
/// # fn main() -> Result<(), veloca_agent::AgentError> {
/// let agent = AgentLoop::builder()
///     .provider_config(ProviderConfig::openai("sk-...", "https://api.openai.com/v1", "gpt-4o"))
///     .tools(ToolRegistry::new())
///     .local_file_store(".veloca/storage/veloca-storage.json")
///     .config(AgentConfig::default().with_stream(true))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct AgentLoopBuilder {
    provider: Option<Arc<dyn ProviderAdapter>>,
    provider_config: Option<ProviderConfig>,
    tools: Option<ToolRegistry>,
    stores: HashMap<StorageMode, Arc<dyn SessionStore>>,
    config: Option<AgentConfig>,
    compaction_config: Option<CompactionConfig>,
}

impl AgentLoopBuilder {
    /// Create a new builder with no components set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model provider.
    #[must_use]
    pub fn provider(mut self, provider: impl ProviderAdapter + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set a shared model provider.
    #[must_use]
    pub fn shared_provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the provider from connection settings when the loop is built.
    #[must_use]
    pub fn provider_config(mut self, config: ProviderConfig) -> Self {
        self.provider_config = Some(config);
        self
    }

    /// Set the tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Register the store used for `mode`, replacing any earlier one.
    #[must_use]
    pub fn store(mut self, mode: StorageMode, store: impl SessionStore + 'static) -> Self {
        self.stores.insert(mode, Arc::new(store));
        self
    }

    /// Register a shared store for `mode`.
    #[must_use]
    pub fn shared_store(mut self, mode: StorageMode, store: Arc<dyn SessionStore>) -> Self {
        self.stores.insert(mode, store);
        self
    }

    /// Register a [`JsonFileStore`] at `path` for [`StorageMode::LocalFile`].
    #[must_use]
    pub fn local_file_store(self, path: impl Into<PathBuf>) -> Self {
        self.store(StorageMode::LocalFile, JsonFileStore::new(path))
    }

    /// Set the agent configuration.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the compaction settings of the agent configuration.
    #[must_use]
    pub const fn with_compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction_config = Some(config);
        self
    }

    /// Build the agent loop.
    ///
    /// With no store registered, an [`InMemoryStore`] serves [`StorageMode::Database`].
    ///
    /// # Errors
    /// Returns a configuration error if no provider was set or the provider settings are
    /// invalid.
    pub fn build(self) -> Result<AgentLoop, AgentError> {
        let provider = match (self.provider, self.provider_config) {
            (Some(provider), _) => provider,
            (None, Some(config)) => config.build()?,
            (None, None) => return Err(AgentError::configuration("a model provider is required")),
        };

        let mut stores = self.stores;
        if stores.is_empty() {
            stores.insert(StorageMode::Database, Arc::new(InMemoryStore::new()));
        }

        let mut config = self.config.unwrap_or_default();
        if let Some(compaction) = self.compaction_config {
            config.compaction = compaction;
        }

        Ok(AgentLoop {
            provider,
            tools: Arc::new(self.tools.unwrap_or_default()),
            stores,
            config,
        })
    }
}
