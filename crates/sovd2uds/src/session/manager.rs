//! Session manager for UDS communication

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use super::{SecurityState, SessionState, SessionType};
use crate::error::{DiagError, SecurityDenial};
use crate::target::EcuTarget;
use crate::transport::{ConnectionHandle, LinkConnector, TransportError};
use crate::uds::{decode_response, NrcCategory, UdsRequest, UdsResponse};

/// Session type an operation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequirement {
    /// Whatever session is active
    Any,
    Exactly(SessionType),
    /// Any non-default session; extended is entered from default
    NonDefault,
}

impl SessionRequirement {
    pub fn from_declared(session: Option<SessionType>, security_level: u8) -> Self {
        match session {
            Some(t) => SessionRequirement::Exactly(t),
            None if security_level > 0 => SessionRequirement::NonDefault,
            None => SessionRequirement::Any,
        }
    }
}

/// Diagnostic session with one ECU target.
///
/// Owned by the connection pool; at most one caller holds it at a time, so
/// at most one exchange is ever in flight on its connection.
pub struct Session {
    target: Arc<EcuTarget>,
    state: SessionState,
    security: SecurityState,
    handle: Option<ConnectionHandle>,
    permit: Option<OwnedSemaphorePermit>,
    last_activity: Instant,
    last_exchange: Instant,
    exchange_open: bool,
}

impl Session {
    pub fn new(target: Arc<EcuTarget>) -> Self {
        let now = Instant::now();
        Self {
            target,
            state: SessionState::Disconnected,
            security: SecurityState::Locked,
            handle: None,
            permit: None,
            last_activity: now,
            last_exchange: now,
            exchange_open: false,
        }
    }

    pub fn target(&self) -> &Arc<EcuTarget> {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn security(&self) -> SecurityState {
        self.security
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(ConnectionHandle::is_open)
    }

    /// An exchange was started and never completed (cancelled mid-flight);
    /// the connection must not be reused.
    pub fn is_exchange_open(&self) -> bool {
        self.exchange_open
    }

    /// Mark caller activity for idle expiry
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn is_idle_expired(&self) -> bool {
        self.is_connected() && self.idle_for() >= self.target.timing.idle_timeout()
    }

    /// Non-default session with no traffic for a tester-present interval
    pub fn needs_keepalive(&self) -> bool {
        self.is_connected()
            && matches!(self.state, SessionState::Active(t) if t != SessionType::Default)
            && self.last_exchange.elapsed() >= self.target.timing.tester_present_interval()
    }

    pub(crate) fn has_permit(&self) -> bool {
        self.permit.is_some()
    }

    pub(crate) fn set_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target.id)
            .field("state", &self.state)
            .field("security", &self.security)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Bounded wait on an exchange answered with response-pending (NRC 0x78).
///
/// No new request is sent while pending; the final answer is read from the
/// same exchange. The cumulative wait never exceeds the ceiling.
#[derive(Debug)]
pub struct PendingOperation {
    started: Instant,
    ceiling: Duration,
    poll_interval: Duration,
    polls: u32,
}

impl PendingOperation {
    pub fn new(ceiling: Duration, poll_interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            ceiling,
            poll_interval,
            polls: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.ceiling.saturating_sub(self.elapsed())
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Sleep one poll interval, or fail if that would cross the ceiling
    pub async fn wait(&mut self) -> Result<(), DiagError> {
        if self.elapsed() + self.poll_interval > self.ceiling {
            return Err(DiagError::Timeout(format!(
                "response pending for {} ms after {} polls, ceiling {} ms",
                self.elapsed().as_millis(),
                self.polls,
                self.ceiling.as_millis()
            )));
        }
        tokio::time::sleep(self.poll_interval).await;
        self.polls += 1;
        Ok(())
    }
}

/// Drives the per-target session state machine:
/// `Disconnected -> Connecting -> Active(default) -> Active(other)`,
/// with the security state as an orthogonal axis.
pub struct SessionManager {
    connector: Arc<dyn LinkConnector>,
    max_frame_size: usize,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn LinkConnector>, max_frame_size: usize) -> Self {
        Self {
            connector,
            max_frame_size,
        }
    }

    /// Send one request and return the final response, waiting through
    /// response-pending. Transport failures and timeouts tear the session
    /// down; the next request reconnects.
    pub async fn exchange(
        &self,
        session: &mut Session,
        request: &UdsRequest,
    ) -> Result<UdsResponse, DiagError> {
        session.exchange_open = true;
        let result = self.exchange_inner(session, request).await;
        session.exchange_open = false;
        session.last_exchange = Instant::now();

        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.teardown(session, &e.to_string()).await;
            }
        }
        result
    }

    async fn exchange_inner(
        &self,
        session: &mut Session,
        request: &UdsRequest,
    ) -> Result<UdsResponse, DiagError> {
        let target = session.target.clone();
        let timing = &target.timing;
        let handle = session
            .handle
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        let raw = handle
            .send_receive(request.encode(), timing.request_timeout())
            .await?;
        let response = decode_response(request.service_id, &raw)?;
        if !response.is_pending() {
            return Ok(response);
        }

        let mut pending =
            PendingOperation::new(timing.pending_ceiling(), timing.pending_poll_interval());
        loop {
            debug!(
                target = %target.id,
                service = format!("0x{:02X}", request.service_id),
                polls = pending.polls(),
                "Response pending"
            );
            pending.wait().await?;

            let read_timeout = timing
                .request_timeout()
                .min(pending.remaining())
                .max(Duration::from_millis(1));
            match handle.receive(read_timeout).await {
                Ok(raw) => {
                    let response = decode_response(request.service_id, &raw)?;
                    if !response.is_pending() {
                        return Ok(response);
                    }
                }
                // nothing yet, keep waiting
                Err(TransportError::Timeout(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Connect if needed and enter the session type `requirement` asks for
    pub async fn ensure_session(
        &self,
        session: &mut Session,
        requirement: SessionRequirement,
    ) -> Result<(), DiagError> {
        if !session.is_connected() || session.state.session_type().is_none() {
            self.connect(session).await?;
        }
        let current = session.state.session_type().unwrap_or_default();

        let wanted = match requirement {
            SessionRequirement::Any => return Ok(()),
            SessionRequirement::Exactly(t) if t == current => return Ok(()),
            SessionRequirement::Exactly(t) => t,
            SessionRequirement::NonDefault if current != SessionType::Default => return Ok(()),
            SessionRequirement::NonDefault => SessionType::Extended,
        };
        self.transition(session, wanted).await
    }

    async fn connect(&self, session: &mut Session) -> Result<(), DiagError> {
        if let Some(handle) = session.handle.take() {
            handle.close().await;
        }
        session.state = SessionState::Connecting;
        session.security = SecurityState::Locked;

        let handle = match ConnectionHandle::open(
            self.connector.clone(),
            session.target.clone(),
            self.max_frame_size,
        )
        .await
        {
            Ok(handle) => handle,
            Err(e) => {
                session.state = SessionState::Disconnected;
                session.permit = None;
                return Err(e.into());
            }
        };
        session.handle = Some(handle);
        info!(target = %session.target.id, transport = session.target.transport.kind(), "Connected");

        if let Err(e) = self.transition(session, SessionType::Default).await {
            self.teardown(session, &e.to_string()).await;
            return Err(e);
        }
        Ok(())
    }

    /// DiagnosticSessionControl to `wanted`. Resets security to locked.
    async fn transition(&self, session: &mut Session, wanted: SessionType) -> Result<(), DiagError> {
        let target = session.target.clone();
        let template = target
            .catalog
            .resolve_operation(crate::catalog::ServiceKind::SessionControl);
        let sub = target.sessions.sub_function(wanted);
        let request = UdsRequest::new(template.service_id).with_sub_function(sub);

        match self.exchange(session, &request).await? {
            UdsResponse::Positive { payload, .. } => {
                if payload.first() != Some(&sub) {
                    return Err(DiagError::MalformedResponse(format!(
                        "session control echoed {:02X?}, expected 0x{sub:02X}",
                        payload.first()
                    )));
                }
                let previous = session.state;
                session.state = SessionState::Active(wanted);
                session.security = SecurityState::Locked;
                info!(target = %target.id, ?previous, session = %wanted, "Session changed (security locked)");
                Ok(())
            }
            UdsResponse::Negative { service_id, nrc } => {
                if nrc.denies_session_transition() {
                    Err(DiagError::SessionTransitionDenied {
                        requested: wanted,
                        nrc,
                    })
                } else {
                    Err(DiagError::negative(service_id, nrc))
                }
            }
        }
    }

    /// Unlock security access at `level` or above via seed/key. Refusals
    /// are surfaced, never retried.
    pub async fn ensure_security(&self, session: &mut Session, level: u8) -> Result<(), DiagError> {
        if session.security.satisfies(level) {
            return Ok(());
        }
        if level > 0x3F {
            return Err(DiagError::InvalidRequest(format!(
                "security level {level} is out of range"
            )));
        }
        let target = session.target.clone();
        let sid = target
            .catalog
            .resolve_operation(crate::catalog::ServiceKind::SecurityAccess)
            .service_id;
        let seed_sub = level * 2 - 1;
        let key_sub = level * 2;

        let seed_request = UdsRequest::new(sid).with_sub_function(seed_sub);
        let seed = match self.exchange(session, &seed_request).await? {
            UdsResponse::Positive { payload, .. } => {
                if payload.first() != Some(&seed_sub) {
                    return Err(DiagError::MalformedResponse(format!(
                        "seed response echoed {:02X?}, expected 0x{seed_sub:02X}",
                        payload.first()
                    )));
                }
                payload[1..].to_vec()
            }
            UdsResponse::Negative { service_id, nrc } => {
                return Err(security_error(level, service_id, nrc))
            }
        };

        if seed.is_empty() {
            return Err(DiagError::MalformedResponse(format!(
                "seed response for level {level} carries no seed"
            )));
        }
        if seed.iter().all(|&b| b == 0) {
            debug!(target = %target.id, level, "Zero seed, already unlocked");
            session.security = SecurityState::Unlocked(level);
            return Ok(());
        }

        let key = target.key.derive_key(level, &seed);
        let key_request = UdsRequest::new(sid)
            .with_sub_function(key_sub)
            .with_payload(key);
        match self.exchange(session, &key_request).await? {
            UdsResponse::Positive { payload, .. } if payload.first() == Some(&key_sub) => {
                session.security = SecurityState::Unlocked(level);
                info!(target = %target.id, level, "Security access granted");
                Ok(())
            }
            UdsResponse::Positive { payload, .. } => Err(DiagError::MalformedResponse(format!(
                "key response echoed {:02X?}, expected 0x{key_sub:02X}",
                payload.first()
            ))),
            UdsResponse::Negative { service_id, nrc } => {
                warn!(target = %target.id, level, %nrc, "Security access refused");
                Err(security_error(level, service_id, nrc))
            }
        }
    }

    /// ECUReset with the given reset type. The ECU restarts in its default
    /// session with security locked; the link itself stays open.
    pub async fn ecu_reset(&self, session: &mut Session, reset_type: u8) -> Result<(), DiagError> {
        let target = session.target.clone();
        let sid = target
            .catalog
            .resolve_operation(crate::catalog::ServiceKind::EcuReset)
            .service_id;
        let request = UdsRequest::new(sid).with_sub_function(reset_type);

        match self.exchange(session, &request).await? {
            UdsResponse::Positive { payload, .. } if payload.first() == Some(&reset_type) => {
                session.state = SessionState::Active(SessionType::Default);
                session.security = SecurityState::Locked;
                warn!(target = %target.id, reset_type = format!("0x{reset_type:02X}"), "ECU reset executed");
                Ok(())
            }
            UdsResponse::Positive { payload, .. } => Err(DiagError::MalformedResponse(format!(
                "ECU reset echoed {:02X?}, expected 0x{reset_type:02X}",
                payload.first()
            ))),
            UdsResponse::Negative { service_id, nrc } => Err(DiagError::negative(service_id, nrc)),
        }
    }

    /// TesterPresent for sessions outside default. A failure closes the
    /// session quietly; the next request reconnects.
    pub async fn keep_alive(&self, session: &mut Session) {
        if !session.needs_keepalive() {
            return;
        }
        let template = session
            .target
            .catalog
            .resolve_operation(crate::catalog::ServiceKind::TesterPresent);
        let request = UdsRequest::new(template.service_id)
            .with_sub_function(template.sub_function.unwrap_or(0x00));

        match self.exchange(session, &request).await {
            Ok(UdsResponse::Positive { .. }) => {
                debug!(target = %session.target.id, "Tester present OK");
            }
            Ok(UdsResponse::Negative { nrc, .. }) => {
                self.teardown(session, &format!("tester present refused: {nrc}"))
                    .await;
            }
            // exchange already tore the session down
            Err(_) => {}
        }
    }

    /// Close the connection and return to `Disconnected`
    pub async fn close(&self, session: &mut Session) {
        if session.handle.is_some() {
            info!(target = %session.target.id, "Closing session");
        }
        self.reset(session).await;
    }

    async fn teardown(&self, session: &mut Session, reason: &str) {
        warn!(target = %session.target.id, reason, "Tearing down session");
        self.reset(session).await;
    }

    async fn reset(&self, session: &mut Session) {
        session.state = SessionState::Disconnected;
        session.security = SecurityState::Locked;
        session.exchange_open = false;
        session.permit = None;
        if let Some(handle) = session.handle.take() {
            handle.close().await;
        }
    }
}

fn security_error(level: u8, service_id: u8, nrc: crate::uds::NegativeResponseCode) -> DiagError {
    if nrc.category() == NrcCategory::Security {
        DiagError::SecurityAccessDenied {
            level,
            reason: SecurityDenial::from_nrc(nrc),
            nrc: Some(nrc),
        }
    } else {
        DiagError::negative(service_id, nrc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::session::{KeyRegistry, XorKey};
    use crate::transport::sim::{SimulatedEcu, SimulatedNetwork};
    use pretty_assertions::assert_eq;

    fn setup(timing: &str) -> (SessionManager, Session, Arc<SimulatedEcu>) {
        let config = BridgeConfig::from_toml_str(&format!(
            r#"
            [[targets]]
            id = "engine"
            transport = {{ type = "simulated" }}
            timing = {{ {timing} }}
            "#
        ))
        .unwrap();
        let target = Arc::new(
            EcuTarget::resolve(&config.targets[0], &config.catalog, &KeyRegistry::default())
                .unwrap(),
        );
        let network = SimulatedNetwork::new();
        let ecu = network.attach(&target);
        let manager = SessionManager::new(network, 4096);
        (manager, Session::new(target), ecu)
    }

    #[tokio::test]
    async fn test_connect_enters_default_session() {
        let (manager, mut session, ecu) = setup("");
        manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Active(SessionType::Default));
        assert_eq!(ecu.requests(), vec![vec![0x10, 0x01]]);

        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Active(SessionType::Extended));

        // already satisfied: no traffic
        manager
            .ensure_session(&mut session, SessionRequirement::Exactly(SessionType::Extended))
            .await
            .unwrap();
        assert_eq!(ecu.request_count(0x10), 2);
    }

    #[tokio::test]
    async fn test_transition_denied() {
        let (manager, mut session, ecu) = setup("");
        ecu.set_response([0x10, 0x02], vec![vec![0x7F, 0x10, 0x7E]]);

        let err = manager
            .ensure_session(
                &mut session,
                SessionRequirement::Exactly(SessionType::Programming),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiagError::SessionTransitionDenied {
                requested: SessionType::Programming,
                ..
            }
        ));
        // still usable in default
        assert_eq!(session.state(), SessionState::Active(SessionType::Default));
        assert_eq!(ecu.request_count(0x10), 2);
    }

    #[tokio::test]
    async fn test_security_unlock_once() {
        let (manager, mut session, ecu) = setup("");
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        manager.ensure_security(&mut session, 1).await.unwrap();
        manager.ensure_security(&mut session, 1).await.unwrap();

        assert_eq!(session.security(), SecurityState::Unlocked(1));
        assert_eq!(ecu.request_count(0x27), 2);
        assert_eq!(ecu.security_level(), Some(1));

        // a session change locks again
        manager
            .ensure_session(&mut session, SessionRequirement::Exactly(SessionType::Safety))
            .await
            .unwrap();
        assert_eq!(session.security(), SecurityState::Locked);
    }

    #[tokio::test]
    async fn test_zero_seed_skips_key() {
        let (manager, mut session, ecu) = setup("");
        ecu.set_seed([0, 0, 0, 0]);
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        manager.ensure_security(&mut session, 1).await.unwrap();
        assert_eq!(session.security(), SecurityState::Unlocked(1));
        assert_eq!(ecu.request_count(0x27), 1);
    }

    #[tokio::test]
    async fn test_empty_seed_is_malformed() {
        let (manager, mut session, ecu) = setup("");
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        ecu.set_response([0x27, 0x01], vec![vec![0x67, 0x01]]);

        let err = manager.ensure_security(&mut session, 1).await.unwrap_err();
        assert!(matches!(err, DiagError::MalformedResponse(_)));
        assert_eq!(session.security(), SecurityState::Locked);
        // no key was sent
        assert_eq!(ecu.request_count(0x27), 1);
    }

    #[tokio::test]
    async fn test_failed_open_releases_permit() {
        let (manager, mut session, ecu) = setup("");
        let permits = Arc::new(tokio::sync::Semaphore::new(1));
        session.set_permit(permits.clone().try_acquire_owned().unwrap());
        ecu.set_offline(true);

        let err = manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::Transport(TransportError::Open(_))));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_permit());
        assert_eq!(permits.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_ecu_reset_returns_to_default_locked() {
        let (manager, mut session, ecu) = setup("");
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        manager.ensure_security(&mut session, 1).await.unwrap();

        manager.ecu_reset(&mut session, 0x01).await.unwrap();
        assert_eq!(session.state(), SessionState::Active(SessionType::Default));
        assert_eq!(session.security(), SecurityState::Locked);
        assert!(session.is_connected());
        assert_eq!(ecu.session(), 0x01);
        assert_eq!(ecu.security_level(), None);

        let err = manager.ecu_reset(&mut session, 0x05).await.unwrap_err();
        assert!(matches!(err, DiagError::NegativeResponse { .. }));
    }

    #[tokio::test]
    async fn test_invalid_key_not_retried() {
        let (manager, mut session, ecu) = setup("");
        ecu.set_key_algorithm(Arc::new(XorKey { mask: 0x55 }));
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();

        let err = manager.ensure_security(&mut session, 1).await.unwrap_err();
        assert!(matches!(
            err,
            DiagError::SecurityAccessDenied {
                reason: SecurityDenial::InvalidKey,
                ..
            }
        ));
        assert_eq!(session.security(), SecurityState::Locked);
        assert_eq!(ecu.request_count(0x27), 2);
    }

    #[tokio::test]
    async fn test_pending_then_positive() {
        let (manager, mut session, ecu) =
            setup("pending_poll_interval_ms = 5, pending_ceiling_ms = 500");
        manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap();
        ecu.push_pending([0x22, 0xF1, 0x90], 3, vec![0x62, 0xF1, 0x90, 0x41]);

        let response = manager
            .exchange(&mut session, &UdsRequest::new(0x22).with_id(0xF190))
            .await
            .unwrap();
        assert_eq!(
            response,
            UdsResponse::Positive {
                service_id: 0x62,
                payload: vec![0xF1, 0x90, 0x41]
            }
        );
        // one request on the wire despite three pending frames
        assert_eq!(ecu.request_count(0x22), 1);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_pending_ceiling() {
        let (manager, mut session, ecu) =
            setup("pending_poll_interval_ms = 10, pending_ceiling_ms = 100");
        manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap();
        ecu.push_pending([0x31, 0x01, 0xFF, 0x00], 1000, vec![0x71]);

        let started = Instant::now();
        let err = manager
            .exchange(
                &mut session,
                &UdsRequest::new(0x31).with_sub_function(0x01).with_id(0xFF00),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::Timeout(_)));
        assert!(started.elapsed() <= Duration::from_millis(100 + 10 + 50));
        // indeterminate exchange: connection dropped
        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_transport_error_tears_down() {
        let (manager, mut session, ecu) = setup("");
        manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap();
        ecu.set_offline(true);

        let err = manager
            .exchange(&mut session, &UdsRequest::new(0x22).with_id(0xF190))
            .await
            .unwrap_err();
        assert!(matches!(err, DiagError::Transport(TransportError::ConnectionClosed)));
        assert_eq!(session.state(), SessionState::Disconnected);

        ecu.set_offline(false);
        manager
            .ensure_session(&mut session, SessionRequirement::Any)
            .await
            .unwrap();
        assert_eq!(ecu.links_opened(), 2);
    }

    #[tokio::test]
    async fn test_keep_alive_failure_degrades_quietly() {
        let (manager, mut session, ecu) = setup("tester_present_interval_ms = 1");
        manager
            .ensure_session(&mut session, SessionRequirement::NonDefault)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(session.needs_keepalive());

        manager.keep_alive(&mut session).await;
        assert_eq!(ecu.request_count(0x3E), 1);
        assert!(session.is_connected());

        tokio::time::sleep(Duration::from_millis(5)).await;
        ecu.set_response([0x3E, 0x00], vec![vec![0x7F, 0x3E, 0x7F]]);
        manager.keep_alive(&mut session).await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
