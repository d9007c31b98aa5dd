//! Simulated ECUs
//!
//! An in-process stand-in for the client library and the ECU behind it.
//! Each simulated ECU emulates the services the bridge uses against a
//! small data model seeded from the target's catalog, and can be scripted
//! with exact response frames (including response-pending sequences).
//!
//! Every request frame is logged, and concurrent calls on the same ECU are
//! counted so tests can assert the single-exchange-in-flight invariant.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{TransportError, UdsLink};
use crate::catalog::DataType;
use crate::config::{SessionConfig, TransportConfig};
use crate::session::KeyDerivation;
use crate::target::EcuTarget;
use crate::uds::dtc::{self, Dtc};
use crate::uds::frame::{NEGATIVE_RESPONSE, POSITIVE_RESPONSE_OFFSET};
use crate::uds::{standard_did, NegativeResponseCode as Nrc, ServiceIds};

const DEFAULT_SEED: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
const MAX_KEY_ATTEMPTS: u8 = 3;

/// Frame `[0x7F, sid, 0x78]`
pub fn pending_frame(service_id: u8) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE, service_id, Nrc::ResponsePending.code()]
}

fn negative(service_id: u8, nrc: Nrc) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE, service_id, nrc.code()]
}

fn positive(service_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET)];
    frame.extend_from_slice(payload);
    frame
}

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len, 0);
    bytes
}

struct DidSlot {
    data: Vec<u8>,
    writable: bool,
    security_level: u8,
}

struct RoutineSlot {
    security_level: u8,
    result: Vec<u8>,
}

struct OutputSlot {
    security_level: u8,
    default: Vec<u8>,
    current: Vec<u8>,
}

struct EcuState {
    services: ServiceIds,
    sessions: SessionConfig,
    session: u8,
    security: Option<u8>,
    /// Level whose seed was handed out and awaits a key
    seed_level: Option<u8>,
    seed: Vec<u8>,
    key: Arc<dyn KeyDerivation>,
    failed_attempts: u8,
    lockout: Duration,
    lockout_until: Option<Instant>,
    dids: BTreeMap<u16, DidSlot>,
    dtcs: Vec<Dtc>,
    snapshots: HashMap<[u8; 3], Vec<u8>>,
    extended: HashMap<[u8; 3], Vec<u8>>,
    clear_security_level: u8,
    routines: BTreeMap<u16, RoutineSlot>,
    outputs: BTreeMap<u16, OutputSlot>,
}

#[derive(Default)]
struct Scripts {
    once: VecDeque<(Vec<u8>, Vec<Vec<u8>>)>,
    sticky: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

impl Scripts {
    fn take(&mut self, request: &[u8]) -> Option<Vec<Vec<u8>>> {
        if let Some(pos) = self.once.iter().position(|(req, _)| req == request) {
            return self.once.remove(pos).map(|(_, frames)| frames);
        }
        self.sticky.get(request).cloned()
    }
}

/// One simulated ECU, shared by every link opened to its target
pub struct SimulatedEcu {
    id: String,
    state: Mutex<EcuState>,
    scripts: Mutex<Scripts>,
    log: Mutex<Vec<Vec<u8>>>,
    latency: Mutex<Duration>,
    offline: AtomicBool,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl SimulatedEcu {
    /// ECU seeded from the target's catalog: standard identification
    /// values, zeroed custom DIDs, three DTCs, routines and outputs.
    pub fn from_target(target: &EcuTarget) -> Self {
        let catalog = &target.catalog;

        let dids = catalog
            .data()
            .map(|m| {
                let len = m.data_type.fixed_len().unwrap_or(4);
                let data = match (m.did, &m.data_type) {
                    (standard_did::VIN, _) => padded("WVWZZZ1KZBW123456", len),
                    (standard_did::ECU_SERIAL_NUMBER, DataType::String { .. }) => {
                        padded("SN0042000017", len)
                    }
                    (standard_did::ECU_HARDWARE_NUMBER, DataType::String { .. }) => {
                        padded("HW-0100", len)
                    }
                    (standard_did::SUPPLIER_SW_NUMBER, DataType::String { .. }) => {
                        padded("SW-2.4.1", len)
                    }
                    (standard_did::SYSTEM_SUPPLIER_ID, DataType::String { .. }) => {
                        padded("SIMSUPPLY", len)
                    }
                    (standard_did::ECU_MANUFACTURING_DATE, _) if len == 3 => vec![0x24, 0x03, 0x15],
                    _ => vec![0; len],
                };
                (
                    m.did,
                    DidSlot {
                        data,
                        writable: m.writable,
                        security_level: m.security_level,
                    },
                )
            })
            .collect();

        let routines = catalog
            .routines()
            .map(|r| {
                let len = r.result_type.as_ref().and_then(DataType::fixed_len).unwrap_or(1);
                (
                    r.rid,
                    RoutineSlot {
                        security_level: r.security_level,
                        result: vec![0; len],
                    },
                )
            })
            .collect();

        let outputs = catalog
            .actuators()
            .map(|a| {
                let len = a.data_type.fixed_len().unwrap_or(1);
                (
                    a.ioid,
                    OutputSlot {
                        security_level: a.security_level,
                        default: vec![0; len],
                        current: vec![0; len],
                    },
                )
            })
            .collect();

        let p0101 = Dtc::new(0x01, 0x01, 0x00, 0x09);
        let c0420 = Dtc::new(0x44, 0x20, 0x00, 0x04);
        let u0100 = Dtc::new(0xC1, 0x00, 0x00, 0x28);

        let state = EcuState {
            services: *catalog.services(),
            session: target.sessions.default_session,
            sessions: target.sessions.clone(),
            security: None,
            seed_level: None,
            seed: DEFAULT_SEED.to_vec(),
            key: target.key.clone(),
            failed_attempts: 0,
            lockout: Duration::from_secs(10),
            lockout_until: None,
            dids,
            // one snapshot record: 1 identifier, DID 0xF40C = 0x0BB8
            snapshots: HashMap::from([(p0101.code, vec![0x01, 0x01, 0xF4, 0x0C, 0x0B, 0xB8])]),
            // one extended record: occurrence counter
            extended: HashMap::from([(p0101.code, vec![0x01, 0x03])]),
            dtcs: vec![p0101, c0420, u0100],
            clear_security_level: catalog.dtc_policy().clear_security_level,
            routines,
            outputs,
        };

        let latency = match &target.transport {
            TransportConfig::Simulated(sim) => Duration::from_millis(sim.latency_ms),
            _ => Duration::ZERO,
        };

        Self {
            id: target.id.clone(),
            state: Mutex::new(state),
            scripts: Mutex::new(Scripts::default()),
            log: Mutex::new(Vec::new()),
            latency: Mutex::new(latency),
            offline: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Always answer `request` with `frames`: the first from the exchange
    /// itself, the rest from follow-up reads
    pub fn set_response(&self, request: impl Into<Vec<u8>>, frames: Vec<Vec<u8>>) {
        self.scripts.lock().sticky.insert(request.into(), frames);
    }

    /// Answer the next matching `request` once with `frames`
    pub fn push_exchange(&self, request: impl Into<Vec<u8>>, frames: Vec<Vec<u8>>) {
        self.scripts.lock().once.push_back((request.into(), frames));
    }

    /// Answer the next matching `request` with `polls` response-pending
    /// frames followed by `response`
    pub fn push_pending(&self, request: impl Into<Vec<u8>>, polls: usize, response: Vec<u8>) {
        let request = request.into();
        let sid = request.first().copied().unwrap_or_default();
        let mut frames = vec![pending_frame(sid); polls];
        frames.push(response);
        self.push_exchange(request, frames);
    }

    pub fn clear_scripts(&self) {
        *self.scripts.lock() = Scripts::default();
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// While offline, opens fail and open links report a closed connection
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_did(&self, did: u16, data: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        let data = data.into();
        state
            .dids
            .entry(did)
            .and_modify(|slot| slot.data = data.clone())
            .or_insert(DidSlot {
                data,
                writable: false,
                security_level: 0,
            });
    }

    pub fn did(&self, did: u16) -> Option<Vec<u8>> {
        self.state.lock().dids.get(&did).map(|s| s.data.clone())
    }

    pub fn set_dtcs(&self, dtcs: Vec<Dtc>) {
        self.state.lock().dtcs = dtcs;
    }

    pub fn dtcs(&self) -> Vec<Dtc> {
        self.state.lock().dtcs.clone()
    }

    pub fn set_routine_result(&self, rid: u16, result: impl Into<Vec<u8>>) {
        if let Some(slot) = self.state.lock().routines.get_mut(&rid) {
            slot.result = result.into();
        }
    }

    pub fn output(&self, ioid: u16) -> Option<Vec<u8>> {
        self.state.lock().outputs.get(&ioid).map(|s| s.current.clone())
    }

    /// Algorithm the ECU uses to check keys; defaults to the target's
    pub fn set_key_algorithm(&self, key: Arc<dyn KeyDerivation>) {
        self.state.lock().key = key;
    }

    /// Seed handed out on a locked request; all-zero means "already unlocked"
    pub fn set_seed(&self, seed: impl Into<Vec<u8>>) {
        self.state.lock().seed = seed.into();
    }

    pub fn set_lockout(&self, lockout: Duration) {
        self.state.lock().lockout = lockout;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Current DiagnosticSessionControl sub-function
    pub fn session(&self) -> u8 {
        self.state.lock().session
    }

    pub fn security_level(&self) -> Option<u8> {
        self.state.lock().security
    }

    /// Every request frame received, in order
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.log.lock().clone()
    }

    /// Number of received requests with service ID `sid`
    pub fn request_count(&self, sid: u8) -> usize {
        self.log.lock().iter().filter(|r| r.first() == Some(&sid)).count()
    }

    pub fn clear_requests(&self) {
        self.log.lock().clear();
    }

    /// Calls that started while another call on this ECU was in flight
    pub fn overlapping_calls(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn links_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn links_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        InFlight(self)
    }

    // -------------------------------------------------------------------------
    // Emulation
    // -------------------------------------------------------------------------

    fn exchange(&self, request: &[u8]) -> Vec<Vec<u8>> {
        self.log.lock().push(request.to_vec());
        if let Some(frames) = self.scripts.lock().take(request) {
            return frames;
        }
        let response = self.state.lock().respond(request);
        if response.is_empty() {
            vec![]
        } else {
            vec![response]
        }
    }
}

struct InFlight<'a>(&'a SimulatedEcu);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EcuState {
    fn in_default_session(&self) -> bool {
        self.session == self.sessions.default_session
    }

    fn security_ok(&self, level: u8) -> bool {
        level == 0 || self.security.is_some_and(|l| l >= level)
    }

    fn respond(&mut self, request: &[u8]) -> Vec<u8> {
        let Some((&sid, rest)) = request.split_first() else {
            return vec![];
        };
        let s = self.services;
        match sid {
            x if x == s.diagnostic_session_control => self.session_control(sid, rest),
            x if x == s.ecu_reset => self.ecu_reset(sid, rest),
            x if x == s.tester_present => match rest {
                [0x80] => vec![],
                [sub] => positive(sid, &[*sub]),
                _ => negative(sid, Nrc::IncorrectMessageLengthOrFormat),
            },
            x if x == s.security_access => self.security_access(sid, rest),
            x if x == s.read_data_by_id => self.read_did(sid, rest),
            x if x == s.write_data_by_id => self.write_did(sid, rest),
            x if x == s.read_dtc_info => self.read_dtc(sid, rest),
            x if x == s.clear_diagnostic_info => self.clear_dtc(sid, rest),
            x if x == s.routine_control => self.routine(sid, rest),
            x if x == s.io_control_by_id => self.io_control(sid, rest),
            _ => negative(sid, Nrc::ServiceNotSupported),
        }
    }

    fn session_control(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        let [sub] = rest else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        let known = [
            self.sessions.default_session,
            self.sessions.programming_session,
            self.sessions.extended_session,
            self.sessions.safety_session,
        ];
        if !known.contains(sub) {
            return negative(sid, Nrc::SubFunctionNotSupported);
        }
        self.session = *sub;
        self.security = None;
        self.seed_level = None;
        // P2 = 50 ms, P2* = 5000 ms
        positive(sid, &[*sub, 0x00, 0x32, 0x01, 0xF4])
    }

    /// Hard, key-off-on and soft resets all restart into the default
    /// session, lock security and hand outputs back to the ECU
    fn ecu_reset(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        use crate::uds::reset_type::*;
        let [sub] = rest else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        if !matches!(*sub, HARD_RESET | KEY_OFF_ON_RESET | SOFT_RESET) {
            return negative(sid, Nrc::SubFunctionNotSupported);
        }
        self.session = self.sessions.default_session;
        self.security = None;
        self.seed_level = None;
        for slot in self.outputs.values_mut() {
            slot.current = slot.default.clone();
        }
        positive(sid, &[*sub])
    }

    fn security_access(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        let Some((&sub, key)) = rest.split_first() else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        if self.in_default_session() {
            return negative(sid, Nrc::ServiceNotSupportedInActiveSession);
        }
        let level = sub.div_ceil(2);

        if sub % 2 == 1 {
            if let Some(until) = self.lockout_until {
                if Instant::now() < until {
                    return negative(sid, Nrc::RequiredTimeDelayNotExpired);
                }
                self.lockout_until = None;
                self.failed_attempts = 0;
            }
            if self.security_ok(level) {
                let zeros = vec![0; self.seed.len()];
                return positive(sid, &[&[sub][..], &zeros[..]].concat());
            }
            self.seed_level = Some(level);
            return positive(sid, &[&[sub][..], &self.seed[..]].concat());
        }

        if self.seed_level != Some(level) {
            return negative(sid, Nrc::RequestSequenceError);
        }
        self.seed_level = None;
        if key == self.key.derive_key(level, &self.seed).as_slice() {
            self.failed_attempts = 0;
            self.security = Some(level);
            return positive(sid, &[sub]);
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_KEY_ATTEMPTS {
            self.lockout_until = Some(Instant::now() + self.lockout);
            negative(sid, Nrc::ExceededNumberOfAttempts)
        } else {
            negative(sid, Nrc::InvalidKey)
        }
    }

    fn read_did(&self, sid: u8, rest: &[u8]) -> Vec<u8> {
        let [hi, lo] = rest else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        let did = u16::from_be_bytes([*hi, *lo]);
        if did == standard_did::ACTIVE_DIAGNOSTIC_SESSION {
            return positive(sid, &[*hi, *lo, self.session]);
        }
        match self.dids.get(&did) {
            Some(slot) => positive(sid, &[rest, &slot.data[..]].concat()),
            None => negative(sid, Nrc::RequestOutOfRange),
        }
    }

    fn write_did(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 3 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let did = u16::from_be_bytes([rest[0], rest[1]]);
        let security = self.security;
        let Some(slot) = self.dids.get_mut(&did) else {
            return negative(sid, Nrc::RequestOutOfRange);
        };
        if !slot.writable {
            return negative(sid, Nrc::RequestOutOfRange);
        }
        if slot.security_level > 0 && !security.is_some_and(|l| l >= slot.security_level) {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        if rest.len() - 2 != slot.data.len() {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        slot.data = rest[2..].to_vec();
        positive(sid, &rest[..2])
    }

    fn read_dtc(&self, sid: u8, rest: &[u8]) -> Vec<u8> {
        use dtc::sub_function::*;
        let Some((&report, args)) = rest.split_first() else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        match (report, args) {
            (REPORT_NUMBER_OF_DTC_BY_STATUS_MASK, [mask]) => {
                let count = self.dtcs.iter().filter(|d| d.status.matches_mask(*mask)).count() as u16;
                let [hi, lo] = count.to_be_bytes();
                positive(sid, &[report, 0xFF, 0x01, hi, lo])
            }
            (REPORT_DTC_BY_STATUS_MASK, [mask]) => {
                let matching: Vec<Dtc> = self
                    .dtcs
                    .iter()
                    .filter(|d| d.status.matches_mask(*mask))
                    .copied()
                    .collect();
                positive(sid, &dtc::encode_by_status_mask(0xFF, &matching))
            }
            (
                REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER
                | REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER,
                [a, b, c, record],
            ) => {
                let code = [*a, *b, *c];
                let Some(found) = self.dtcs.iter().find(|d| d.code == code) else {
                    return negative(sid, Nrc::RequestOutOfRange);
                };
                let records = if report == REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER {
                    &self.snapshots
                } else {
                    &self.extended
                };
                let mut payload = vec![report, *a, *b, *c, found.status.0];
                if let Some(data) = records.get(&code) {
                    if *record == 0xFF || data.first() == Some(record) {
                        payload.extend_from_slice(data);
                    }
                }
                positive(sid, &payload)
            }
            (
                REPORT_NUMBER_OF_DTC_BY_STATUS_MASK
                | REPORT_DTC_BY_STATUS_MASK
                | REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER
                | REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER,
                _,
            ) => negative(sid, Nrc::IncorrectMessageLengthOrFormat),
            _ => negative(sid, Nrc::SubFunctionNotSupported),
        }
    }

    fn clear_dtc(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        let [a, b, c] = rest else {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        };
        if !self.security_ok(self.clear_security_level) {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        let group = u32::from_be_bytes([0, *a, *b, *c]);
        if group == dtc::dtc_group::ALL {
            self.dtcs.clear();
        } else {
            let before = self.dtcs.len();
            self.dtcs.retain(|d| d.code != [*a, *b, *c]);
            if self.dtcs.len() == before {
                return negative(sid, Nrc::RequestOutOfRange);
            }
        }
        positive(sid, &[])
    }

    fn routine(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 3 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let sub = rest[0];
        if !(0x01..=0x03).contains(&sub) {
            return negative(sid, Nrc::SubFunctionNotSupported);
        }
        let rid = u16::from_be_bytes([rest[1], rest[2]]);
        let Some(slot) = self.routines.get(&rid) else {
            return negative(sid, Nrc::RequestOutOfRange);
        };
        if !self.security_ok(slot.security_level) {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        positive(sid, &[&rest[..3], &slot.result[..]].concat())
    }

    fn io_control(&mut self, sid: u8, rest: &[u8]) -> Vec<u8> {
        use crate::uds::io_control_option::*;
        if rest.len() < 3 {
            return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
        }
        let ioid = u16::from_be_bytes([rest[0], rest[1]]);
        let option = rest[2];
        let security = self.security;
        let Some(slot) = self.outputs.get_mut(&ioid) else {
            return negative(sid, Nrc::RequestOutOfRange);
        };
        if slot.security_level > 0 && !security.is_some_and(|l| l >= slot.security_level) {
            return negative(sid, Nrc::SecurityAccessDenied);
        }
        match option {
            RETURN_CONTROL_TO_ECU | RESET_TO_DEFAULT => slot.current = slot.default.clone(),
            FREEZE_CURRENT_STATE => {}
            SHORT_TERM_ADJUSTMENT => {
                let value = &rest[3..];
                if value.len() != slot.current.len() {
                    return negative(sid, Nrc::IncorrectMessageLengthOrFormat);
                }
                slot.current = value.to_vec();
            }
            _ => return negative(sid, Nrc::RequestOutOfRange),
        }
        positive(sid, &[&rest[..3], &slot.current[..]].concat())
    }
}

/// Link to a [`SimulatedEcu`]
struct SimLink {
    ecu: Arc<SimulatedEcu>,
    queued: VecDeque<Vec<u8>>,
    open: bool,
}

impl UdsLink for SimLink {
    fn send_receive(
        &mut self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let _guard = self.ecu.enter();
        if !self.open || self.ecu.offline.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let latency = *self.ecu.latency.lock();
        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(TransportError::Timeout(timeout.as_millis() as u64));
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        self.queued = self.ecu.exchange(request).into();
        self.queued
            .pop_front()
            .ok_or(TransportError::Timeout(timeout.as_millis() as u64))
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let _guard = self.ecu.enter();
        if !self.open || self.ecu.offline.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.queued
            .pop_front()
            .ok_or(TransportError::Timeout(timeout.as_millis() as u64))
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.ecu.closed.fetch_add(1, Ordering::SeqCst);
            debug!(ecu = %self.ecu.id, "Simulated link closed");
        }
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// All simulated ECUs of one engine, keyed by target id
#[derive(Default)]
pub struct SimulatedNetwork {
    ecus: Mutex<HashMap<String, Arc<SimulatedEcu>>>,
}

impl SimulatedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The ECU behind `target`, created from its catalog on first use
    pub fn attach(&self, target: &EcuTarget) -> Arc<SimulatedEcu> {
        self.ecus
            .lock()
            .entry(target.id.clone())
            .or_insert_with(|| Arc::new(SimulatedEcu::from_target(target)))
            .clone()
    }

    pub fn ecu(&self, id: &str) -> Option<Arc<SimulatedEcu>> {
        self.ecus.lock().get(id).cloned()
    }

    pub(super) fn open(
        &self,
        target: &EcuTarget,
        _max_frame_size: usize,
    ) -> Result<Box<dyn UdsLink>, TransportError> {
        let ecu = self.attach(target);
        if ecu.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Open(format!("simulated ECU '{}' is offline", ecu.id)));
        }
        {
            // a new tester connection starts in the default session
            let mut state = ecu.state.lock();
            state.session = state.sessions.default_session;
            state.security = None;
            state.seed_level = None;
        }
        ecu.opened.fetch_add(1, Ordering::SeqCst);
        debug!(ecu = %ecu.id, "Simulated link opened");
        Ok(Box::new(SimLink {
            ecu,
            queued: VecDeque::new(),
            open: true,
        }))
    }
}

impl super::LinkConnector for SimulatedNetwork {
    fn open(
        &self,
        target: &EcuTarget,
        max_frame_size: usize,
    ) -> Result<Box<dyn UdsLink>, TransportError> {
        SimulatedNetwork::open(self, target, max_frame_size)
    }
}
