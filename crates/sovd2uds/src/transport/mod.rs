//! Boundary to the UDS client library
//!
//! A [`UdsLink`] is one open connection of the byte-oriented client library:
//! a blocking request/response call, a follow-up read for delayed responses,
//! and close. Links are not safe for concurrent use; the session manager
//! guarantees a single exchange in flight per link.
//!
//! [`ConnectionHandle`] moves the link onto tokio's blocking pool for every
//! call, so a slow ECU never stalls the runtime threads serving other
//! targets. It also bounds frame sizes in both directions.
//!
//! Backends:
//! - `native` (feature `native`): the linked C client for CAN and DoIP
//! - [`sim`]: an in-process simulated ECU for tests and demos

pub mod error;
#[cfg(feature = "native")]
mod native;
pub mod sim;

pub use error::TransportError;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::target::EcuTarget;

/// One open connection to an ECU
pub trait UdsLink: Send {
    /// Send a request frame and block until the first response frame
    fn send_receive(&mut self, request: &[u8], timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Read the next response frame of the current exchange without sending
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the connection. Implementations also close on drop.
    fn close(&mut self);
}

/// Opens links to targets
pub trait LinkConnector: Send + Sync {
    /// `max_frame_size` bounds the receive buffer of the link
    fn open(
        &self,
        target: &EcuTarget,
        max_frame_size: usize,
    ) -> Result<Box<dyn UdsLink>, TransportError>;
}

/// Selects the backend by the target's transport type
pub struct DefaultConnector {
    simulated: Arc<sim::SimulatedNetwork>,
}

impl DefaultConnector {
    pub fn new(simulated: Arc<sim::SimulatedNetwork>) -> Self {
        Self { simulated }
    }

    pub fn simulated(&self) -> &Arc<sim::SimulatedNetwork> {
        &self.simulated
    }
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self::new(Arc::new(sim::SimulatedNetwork::default()))
    }
}

impl LinkConnector for DefaultConnector {
    fn open(
        &self,
        target: &EcuTarget,
        max_frame_size: usize,
    ) -> Result<Box<dyn UdsLink>, TransportError> {
        match &target.transport {
            TransportConfig::Simulated(_) => self.simulated.open(target, max_frame_size),
            #[cfg(feature = "native")]
            TransportConfig::Can(_) | TransportConfig::Doip(_) => {
                native::open(&target.transport, max_frame_size)
            }
            #[cfg(not(feature = "native"))]
            other => Err(TransportError::Unsupported(format!(
                "{} transport requires the 'native' feature",
                other.kind()
            ))),
        }
    }
}

/// Async wrapper around a [`UdsLink`]
///
/// If a call is cancelled while the link is on the blocking pool, the link
/// is dropped (and closed) when that call finishes and this handle reports
/// [`TransportError::ConnectionClosed`] from then on.
pub struct ConnectionHandle {
    target: String,
    link: Option<Box<dyn UdsLink>>,
    max_frame_size: usize,
}

impl ConnectionHandle {
    pub async fn open(
        connector: Arc<dyn LinkConnector>,
        target: Arc<EcuTarget>,
        max_frame_size: usize,
    ) -> Result<Self, TransportError> {
        let id = target.id.clone();
        let link = tokio::task::spawn_blocking(move || connector.open(&target, max_frame_size))
            .await
            .map_err(|e| TransportError::Worker(e.to_string()))??;
        debug!(target = %id, "Link opened");
        Ok(Self {
            target: id,
            link: Some(link),
            max_frame_size,
        })
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub async fn send_receive(
        &mut self,
        request: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if request.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: request.len(),
                max: self.max_frame_size,
            });
        }
        debug!(target = %self.target, request = %hex::encode_upper(&request), "UDS >>");
        let response = self
            .run(move |link| link.send_receive(&request, timeout))
            .await?;
        debug!(target = %self.target, response = %hex::encode_upper(&response), "UDS <<");
        Ok(response)
    }

    pub async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let response = self.run(move |link| link.receive(timeout)).await?;
        debug!(target = %self.target, response = %hex::encode_upper(&response), "UDS << (delayed)");
        Ok(response)
    }

    async fn run<F>(&mut self, call: F) -> Result<Vec<u8>, TransportError>
    where
        F: FnOnce(&mut dyn UdsLink) -> Result<Vec<u8>, TransportError> + Send + 'static,
    {
        let mut link = self.link.take().ok_or(TransportError::ConnectionClosed)?;
        let (link, result) = tokio::task::spawn_blocking(move || {
            let result = call(link.as_mut());
            (link, result)
        })
        .await
        .map_err(|e| TransportError::Worker(e.to_string()))?;
        self.link = Some(link);

        let response = result?;
        if response.len() > self.max_frame_size {
            return Err(TransportError::ResponseTooLarge {
                max: self.max_frame_size,
            });
        }
        Ok(response)
    }

    pub async fn close(mut self) {
        if let Some(mut link) = self.link.take() {
            let target = self.target.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || link.close()).await {
                warn!(target = %target, error = %e, "Link close failed");
            }
            debug!(target = %self.target, "Link closed");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn_blocking(move || link.close());
                }
                Err(_) => link.close(),
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish()
    }
}
