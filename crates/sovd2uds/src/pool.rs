//! Connection pool
//!
//! One [`Session`] per ECU target behind a fair (FIFO) async mutex, so
//! requests for the same target queue in arrival order while different
//! targets proceed in parallel. A semaphore caps the number of open links
//! across all targets; each connected session holds one permit.
//!
//! A request waiting for capacity retries eviction each time another
//! target's session is released, so an idle link never blocks it.
//!
//! A background maintenance task closes idle sessions and sends
//! tester-present for sessions outside the default session.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{DiagError, Result};
use crate::session::{SecurityState, Session, SessionManager, SessionState};
use crate::target::EcuTarget;
use crate::transport::{LinkConnector, TransportError};

/// Point-in-time view of one target's session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub target: String,
    /// `None` while a request holds the session
    pub state: Option<SessionState>,
    pub security: Option<SecurityState>,
    pub idle: Option<Duration>,
}

struct PoolInner {
    slots: HashMap<String, Arc<Mutex<Session>>>,
    connections: Arc<Semaphore>,
    /// Signalled whenever a caller hands a session back
    released: Notify,
    manager: SessionManager,
    config: PoolConfig,
}

pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    maintenance: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Create the pool and start its maintenance task on the current runtime
    pub fn new(
        targets: impl IntoIterator<Item = Arc<EcuTarget>>,
        connector: Arc<dyn LinkConnector>,
        config: PoolConfig,
    ) -> Self {
        let slots = targets
            .into_iter()
            .map(|t| (t.id.clone(), Arc::new(Mutex::new(Session::new(t)))))
            .collect();
        let inner = Arc::new(PoolInner {
            slots,
            connections: Arc::new(Semaphore::new(config.max_connections)),
            released: Notify::new(),
            manager: SessionManager::new(connector, config.max_frame_size),
            config,
        });

        let maintenance = match tokio::runtime::Handle::try_current() {
            Ok(rt) => Some(rt.spawn(maintain(
                Arc::downgrade(&inner),
                inner.config.maintenance_interval(),
            ))),
            Err(_) => {
                warn!("No tokio runtime, session maintenance disabled");
                None
            }
        };

        Self {
            inner,
            maintenance: parking_lot::Mutex::new(maintenance),
        }
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.inner.slots.contains_key(target_id)
    }

    /// Number of links currently open
    pub fn open_connections(&self) -> usize {
        self.inner.config.max_connections - self.inner.connections.available_permits()
    }

    /// Run `f` with exclusive use of the target's session.
    ///
    /// Callers for the same target are served in arrival order. The deadline
    /// covers queueing, connection setup and `f` itself. If it expires while
    /// an exchange is on the wire, the session is closed since the link
    /// state is unknown.
    pub async fn with_session<T, F>(&self, target_id: &str, deadline: Instant, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s SessionManager, &'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        let slot = self
            .inner
            .slots
            .get(target_id)
            .ok_or_else(|| DiagError::NotFound(format!("component '{target_id}'")))?;

        let run = async {
            let mut session = slot.lock().await;
            if session.is_exchange_open() {
                self.inner.manager.close(&mut session).await;
            }
            if !session.has_permit() {
                let permit = self.inner.reserve(target_id).await?;
                session.set_permit(permit);
            }
            session.touch();
            let result = f(&self.inner.manager, &mut session).await;
            session.touch();
            result
        };

        let outcome = tokio::time::timeout_at(deadline, run).await;
        // the slot lock is free again; waiters may now evict this session
        self.inner.released.notify_waiters();

        match outcome {
            Ok(result) => result,
            Err(_) => {
                if let Ok(mut session) = slot.try_lock() {
                    if session.is_exchange_open() {
                        self.inner.manager.close(&mut session).await;
                    }
                }
                Err(DiagError::Timeout(format!(
                    "operation on '{target_id}' exceeded its deadline"
                )))
            }
        }
    }

    /// State of every session that is not currently in use
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut out: Vec<_> = self
            .inner
            .slots
            .iter()
            .map(|(id, slot)| match slot.try_lock() {
                Ok(session) => SessionSnapshot {
                    target: id.clone(),
                    state: Some(session.state()),
                    security: Some(session.security()),
                    idle: session.is_connected().then(|| session.idle_for()),
                },
                Err(_) => SessionSnapshot {
                    target: id.clone(),
                    state: None,
                    security: None,
                    idle: None,
                },
            })
            .collect();
        out.sort_by(|a, b| a.target.cmp(&b.target));
        out
    }

    /// Close every session and refuse new connections
    pub async fn shutdown(&self) {
        if let Some(task) = self.maintenance.lock().take() {
            task.abort();
        }
        self.inner.connections.close();
        for slot in self.inner.slots.values() {
            let mut session = slot.lock().await;
            self.inner.manager.close(&mut session).await;
        }
        info!("Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(task) = self.maintenance.get_mut().take() {
            task.abort();
        }
    }
}

impl PoolInner {
    /// Take a connection permit, evicting the least recently used idle
    /// session of another target when at capacity.
    ///
    /// While waiting, eviction is retried every time a session is released,
    /// since a busy session that goes idle keeps its permit.
    async fn reserve(&self, target_id: &str) -> Result<OwnedSemaphorePermit> {
        let mut waiting = false;
        loop {
            // registered before the checks so a release in between is not lost
            let released = self.released.notified();

            if let Ok(permit) = self.connections.clone().try_acquire_owned() {
                return Ok(permit);
            }
            if self.evict_idle(target_id).await {
                if let Ok(permit) = self.connections.clone().try_acquire_owned() {
                    return Ok(permit);
                }
            }
            if !self.config.wait_for_capacity {
                return Err(DiagError::ConnectionPoolExhausted {
                    max: self.config.max_connections,
                });
            }

            if !waiting {
                debug!(target = %target_id, "Waiting for connection capacity");
                waiting = true;
            }
            tokio::select! {
                permit = self.connections.clone().acquire_owned() => {
                    return permit
                        .map_err(|_| DiagError::Transport(TransportError::ConnectionClosed));
                }
                _ = released => {}
            }
        }
    }

    async fn evict_idle(&self, except: &str) -> bool {
        let mut idle: Vec<_> = self
            .slots
            .iter()
            .filter(|(id, _)| id.as_str() != except)
            .filter_map(|(_, slot)| slot.try_lock().ok())
            .filter(|session| session.has_permit())
            .collect();
        idle.sort_by_key(|session| std::cmp::Reverse(session.idle_for()));

        let Some(mut victim) = idle.into_iter().next() else {
            return false;
        };
        info!(target = %victim.target().id, requested_by = %except, "Evicting idle session");
        self.manager.close(&mut victim).await;
        true
    }

    async fn maintain_once(&self) {
        for slot in self.slots.values() {
            // busy sessions are being used; skip them this round
            let Ok(mut session) = slot.try_lock() else {
                continue;
            };
            if session.is_exchange_open() {
                self.manager.close(&mut session).await;
            } else if session.is_idle_expired() {
                info!(
                    target = %session.target().id,
                    idle_ms = session.idle_for().as_millis() as u64,
                    "Closing idle session"
                );
                self.manager.close(&mut session).await;
            } else if session.needs_keepalive() {
                self.manager.keep_alive(&mut session).await;
            }
        }
    }
}

async fn maintain(inner: Weak<PoolInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.maintain_once().await;
    }
}
