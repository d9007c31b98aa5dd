//! Translation engine - the single entry point for symbolic requests
//!
//! `execute` resolves the request against the component's catalog, waits
//! for the component's session, brings it into the required session and
//! security state, runs the exchange and converts the payload. Transient
//! negative responses are retried with the target's backoff policy; every
//! other failure surfaces unchanged.

mod plan;

pub use plan::{ActuatorAction, ResetType, RoutineAction};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sovd2uds_core::{SovdExecutor, SovdRequest, SovdResponse, SovdValue};
use tokio::time::Instant;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::{BridgeConfig, ConfigError};
use crate::error::{DiagError, Result};
use crate::pool::{ConnectionPool, SessionSnapshot};
use crate::session::{KeyDerivation, KeyRegistry};
use crate::target::EcuTarget;
use crate::transport::sim::SimulatedNetwork;
use crate::transport::{DefaultConnector, LinkConnector};
use plan::Plan;

/// Builder for [`TranslationEngine`]
pub struct EngineBuilder {
    config: BridgeConfig,
    connector: Option<Arc<dyn LinkConnector>>,
    keys: KeyRegistry,
}

impl EngineBuilder {
    /// Use a custom link connector instead of the default backends
    pub fn connector(mut self, connector: Arc<dyn LinkConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Register a key derivation algorithm selectable by
    /// `security.algorithm` in target configuration
    pub fn key_algorithm(
        mut self,
        name: impl Into<String>,
        algorithm: Arc<dyn KeyDerivation>,
    ) -> Self {
        self.keys.register(name, algorithm);
        self
    }

    /// Validate the configuration, resolve every target and start the pool.
    ///
    /// Must be called from within a tokio runtime for idle expiry and
    /// tester-present to run.
    pub fn build(self) -> std::result::Result<TranslationEngine, ConfigError> {
        self.config.validate()?;

        let targets = self
            .config
            .targets
            .iter()
            .map(|t| EcuTarget::resolve(t, &self.config.catalog, &self.keys).map(Arc::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (connector, simulated): (Arc<dyn LinkConnector>, _) = match self.connector {
            Some(connector) => (connector, None),
            None => {
                let connector = DefaultConnector::default();
                let simulated = connector.simulated().clone();
                (Arc::new(connector), Some(simulated))
            }
        };

        if let Some(network) = &simulated {
            for target in &targets {
                network.attach(target);
            }
        }

        let pool = ConnectionPool::new(targets.iter().cloned(), connector, self.config.pool.clone());
        info!(
            targets = targets.len(),
            max_connections = self.config.pool.max_connections,
            "Translation engine ready"
        );

        Ok(TranslationEngine {
            inner: Arc::new(EngineInner {
                targets: targets.into_iter().map(|t| (t.id.clone(), t)).collect(),
                pool,
                simulated,
            }),
        })
    }
}

struct EngineInner {
    targets: BTreeMap<String, Arc<EcuTarget>>,
    pool: ConnectionPool,
    simulated: Option<Arc<SimulatedNetwork>>,
}

/// Translates symbolic SOVD requests into UDS exchanges
#[derive(Clone)]
pub struct TranslationEngine {
    inner: Arc<EngineInner>,
}

impl TranslationEngine {
    pub fn builder(config: BridgeConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            connector: None,
            keys: KeyRegistry::default(),
        }
    }

    /// Configured targets, ordered by id
    pub fn components(&self) -> Vec<Arc<EcuTarget>> {
        self.inner.targets.values().cloned().collect()
    }

    pub fn target(&self, id: &str) -> Option<&Arc<EcuTarget>> {
        self.inner.targets.get(id)
    }

    /// Simulated ECUs behind the default connector
    pub fn simulated(&self) -> Option<&Arc<SimulatedNetwork>> {
        self.inner.simulated.as_ref()
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.inner.pool.snapshot()
    }

    pub fn open_connections(&self) -> usize {
        self.inner.pool.open_connections()
    }

    /// Execute one request. `Ok(None)` is a success without payload.
    #[instrument(
        name = "execute",
        skip_all,
        fields(
            component = %request.component_id,
            operation = %request.operation_kind,
            identifier = %request.identifier
        )
    )]
    pub async fn execute(&self, request: &SovdRequest) -> Result<Option<SovdValue>> {
        let target = self
            .inner
            .targets
            .get(&request.component_id)
            .ok_or_else(|| DiagError::NotFound(format!("component '{}'", request.component_id)))?
            .clone();
        let plan = Plan::build(&target.catalog, request)?;
        let deadline =
            Instant::now() + request.timeout().unwrap_or_else(|| target.timing.request_deadline());

        let timing = target.timing.clone();
        self.inner
            .pool
            .with_session(&target.id, deadline, move |manager, session| {
                async move {
                    let mut attempt = 0;
                    loop {
                        match plan.run(manager, session).await {
                            Err(DiagError::NegativeResponse { service_id, nrc })
                                if nrc.is_transient() && attempt < timing.max_retries =>
                            {
                                let delay = timing.backoff.delay(attempt);
                                attempt += 1;
                                warn!(
                                    service = format!("0x{service_id:02X}"),
                                    %nrc,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    "Transient negative response, retrying"
                                );
                                tokio::time::sleep(delay).await;
                            }
                            other => return other,
                        }
                    }
                }
                .boxed()
            })
            .await
    }

    /// Close every session
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }
}

#[async_trait]
impl SovdExecutor for TranslationEngine {
    async fn execute_request(&self, request: SovdRequest) -> SovdResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", %request_id);
        match self.execute(&request).instrument(span).await {
            Ok(data) => {
                debug!(%request_id, "Request succeeded");
                SovdResponse::success(request_id, data)
            }
            Err(e) => {
                warn!(%request_id, kind = e.kind().as_str(), error = %e, "Request failed");
                SovdResponse::failure(request_id, e.kind(), e.detail())
            }
        }
    }

    fn component_ids(&self) -> Vec<String> {
        self.inner.targets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sovd2uds_core::{ErrorKind, OperationKind};
    use pretty_assertions::assert_eq;

    fn engine(extra: &str) -> TranslationEngine {
        let config = BridgeConfig::from_toml_str(&format!(
            r#"
            [[targets]]
            id = "engine"
            transport = {{ type = "simulated" }}
            {extra}
            "#
        ))
        .unwrap();
        TranslationEngine::builder(config).build().unwrap()
    }

    #[tokio::test]
    async fn test_builder_rejects_unknown_algorithm() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [[targets]]
            id = "engine"
            transport = { type = "simulated" }
            security = { algorithm = "oem-v2" }
            "#,
        )
        .unwrap();
        assert!(TranslationEngine::builder(config.clone()).build().is_err());

        let engine = TranslationEngine::builder(config)
            .key_algorithm("oem-v2", Arc::new(crate::session::IdentityKey))
            .build()
            .unwrap();
        assert_eq!(engine.component_ids(), vec!["engine".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_nrc_retried() {
        let engine = engine("timing = { max_retries = 2, backoff = { base_delay_ms = 1 } }");
        let ecu = engine.simulated().unwrap().ecu("engine").unwrap();
        ecu.push_exchange([0x22, 0xF1, 0x90], vec![vec![0x7F, 0x22, 0x21]]);
        ecu.push_exchange([0x22, 0xF1, 0x90], vec![vec![0x7F, 0x22, 0x21]]);

        let value = engine
            .execute(&SovdRequest::new("engine", OperationKind::ReadData, "vin"))
            .await
            .unwrap();
        assert_eq!(value, Some(SovdValue::from("WVWZZZ1KZBW123456")));
        assert_eq!(ecu.request_count(0x22), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let engine = engine("timing = { max_retries = 1, backoff = { base_delay_ms = 1 } }");
        let ecu = engine.simulated().unwrap().ecu("engine").unwrap();
        ecu.set_response([0x22, 0xF1, 0x90], vec![vec![0x7F, 0x22, 0x21]]);

        let response = engine
            .execute_request(SovdRequest::new("engine", OperationKind::ReadData, "vin"))
            .await;
        assert_eq!(response.error_kind, Some(ErrorKind::NegativeResponse));
        assert_eq!(response.error_detail.unwrap().nrc, Some(0x21));
        assert_eq!(ecu.request_count(0x22), 2);
    }

    #[tokio::test]
    async fn test_session_and_security_operations() {
        let engine = engine("");
        let ecu = engine.simulated().unwrap().ecu("engine").unwrap();

        let value = engine
            .execute(&SovdRequest::new("engine", OperationKind::SessionControl, "extended"))
            .await
            .unwrap();
        assert_eq!(
            value,
            Some(SovdValue::object([("session", SovdValue::from("extended"))]))
        );
        assert_eq!(ecu.session(), 0x03);

        let value = engine
            .execute(&SovdRequest::new("engine", OperationKind::SecurityAccess, "1"))
            .await
            .unwrap();
        assert_eq!(
            value,
            Some(SovdValue::object([
                ("level", SovdValue::Integer(1)),
                ("unlocked", SovdValue::Bool(true)),
            ]))
        );
        assert_eq!(ecu.security_level(), Some(1));

        engine.shutdown().await;
        assert_eq!(ecu.links_closed(), 1);
    }
}
