//! Resolved ECU targets

use std::sync::Arc;

use crate::catalog::{Catalog, CatalogConfig};
use crate::config::{ConfigError, EcuTargetConfig, SessionConfig, TimingConfig, TransportConfig};
use crate::session::{KeyDerivation, KeyRegistry};
use crate::uds::ServiceIds;

/// One diagnosable ECU, immutable after configuration load
#[derive(Clone)]
pub struct EcuTarget {
    pub id: String,
    pub name: Option<String>,
    pub transport: TransportConfig,
    pub timing: TimingConfig,
    pub sessions: SessionConfig,
    pub catalog: Arc<Catalog>,
    pub key: Arc<dyn KeyDerivation>,
}

impl EcuTarget {
    /// Build the runtime target: merge catalogs, apply service overrides
    /// and pick the key derivation algorithm.
    pub fn resolve(
        config: &EcuTargetConfig,
        shared: &CatalogConfig,
        keys: &KeyRegistry,
    ) -> Result<Self, ConfigError> {
        let services = ServiceIds::from_overrides(&config.service_overrides);
        let catalog = Catalog::build(shared, &config.catalog, services)
            .map_err(|e| ConfigError::Invalid(format!("target '{}': {}", config.id, e)))?;
        let key = keys.resolve(&config.security).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "target '{}': unknown key algorithm '{}'",
                config.id, config.security.algorithm
            ))
        })?;

        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            transport: config.transport.clone(),
            timing: config.timing.clone(),
            sessions: config.sessions.clone(),
            catalog: Arc::new(catalog),
            key,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl std::fmt::Debug for EcuTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcuTarget")
            .field("id", &self.id)
            .field("transport", &self.transport.kind())
            .finish_non_exhaustive()
    }
}
