//! # Provider Registry
//!
//! Maps provider names used in pod annotations to [`SecretProvider`]
//! implementations.
//!
//! The registry is built once at startup and then shared behind an `Arc`; it is
//! never mutated afterwards, so concurrent reconciliations read it without locks.

use super::SecretProvider;
use crate::config::ControllerConfig;
use crate::provider::aws::AwsSecretsManager;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available secret providers
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SecretProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider under its own name
    ///
    /// A provider registered under an existing name replaces the previous one.
    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SecretProvider>> {
        self.providers.get(name).map(Arc::clone)
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build the registry with every provider compiled into the controller
///
/// # Errors
///
/// Returns an error if a provider client cannot be constructed.
pub async fn default_registry(config: &ControllerConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    let aws = AwsSecretsManager::new(config.aws_region.as_deref())
        .await
        .context("Failed to create AWS Secrets Manager provider")?;
    registry.register(Arc::new(aws));

    Ok(registry)
}
