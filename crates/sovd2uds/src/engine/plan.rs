//! Resolution of symbolic requests into UDS exchanges
//!
//! A [`Plan`] is built synchronously from the request and the target's
//! catalog, so unknown identifiers and bad parameters are rejected before
//! any connection is touched. Running a plan needs the target's session.

use std::str::FromStr;

use sovd2uds_core::{OperationKind, SovdRequest, SovdValue};
use tracing::{info, warn};

use crate::catalog::{Catalog, DataType, ServiceKind};
use crate::error::{DiagError, Result};
use crate::session::{Session, SessionManager, SessionRequirement, SessionType};
use crate::uds::dtc::{self, dtc_group, sub_function as report, Dtc};
use crate::uds::{
    decode_value, encode_value, io_control_option, reset_type, routine_sub_function, UdsRequest,
    UdsResponse,
};

const DEFAULT_STATUS_MASK: u8 = 0xFF;
const ALL_RECORDS: u8 = 0xFF;

/// Routine control action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineAction {
    Start,
    Stop,
    Results,
}

impl RoutineAction {
    fn sub_function(&self) -> u8 {
        match self {
            RoutineAction::Start => routine_sub_function::START_ROUTINE,
            RoutineAction::Stop => routine_sub_function::STOP_ROUTINE,
            RoutineAction::Results => routine_sub_function::REQUEST_ROUTINE_RESULTS,
        }
    }
}

impl FromStr for RoutineAction {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(RoutineAction::Start),
            "stop" => Ok(RoutineAction::Stop),
            "results" => Ok(RoutineAction::Results),
            other => Err(DiagError::InvalidRequest(format!(
                "unknown routine action '{other}' (expected start, stop or results)"
            ))),
        }
    }
}

/// IO control action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorAction {
    ReturnControl,
    ResetToDefault,
    Freeze,
    ShortTermAdjustment,
}

impl ActuatorAction {
    fn option(&self) -> u8 {
        match self {
            ActuatorAction::ReturnControl => io_control_option::RETURN_CONTROL_TO_ECU,
            ActuatorAction::ResetToDefault => io_control_option::RESET_TO_DEFAULT,
            ActuatorAction::Freeze => io_control_option::FREEZE_CURRENT_STATE,
            ActuatorAction::ShortTermAdjustment => io_control_option::SHORT_TERM_ADJUSTMENT,
        }
    }
}

impl FromStr for ActuatorAction {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "return_control" => Ok(ActuatorAction::ReturnControl),
            "reset_to_default" => Ok(ActuatorAction::ResetToDefault),
            "freeze" => Ok(ActuatorAction::Freeze),
            "short_term_adjustment" => Ok(ActuatorAction::ShortTermAdjustment),
            other => Err(DiagError::InvalidRequest(format!(
                "unknown actuator action '{other}'"
            ))),
        }
    }
}

/// ECUReset type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    Hard,
    KeyOffOn,
    Soft,
}

impl ResetType {
    fn sub_function(&self) -> u8 {
        match self {
            ResetType::Hard => reset_type::HARD_RESET,
            ResetType::KeyOffOn => reset_type::KEY_OFF_ON_RESET,
            ResetType::Soft => reset_type::SOFT_RESET,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResetType::Hard => "hard",
            ResetType::KeyOffOn => "key_off_on",
            ResetType::Soft => "soft",
        }
    }
}

impl FromStr for ResetType {
    type Err = DiagError;

    /// Accepts the name or the raw reset type (`1`, `0x02`, ...)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "hard" => return Ok(ResetType::Hard),
            "key_off_on" => return Ok(ResetType::KeyOffOn),
            "soft" => return Ok(ResetType::Soft),
            _ => {}
        }
        match crate::config::parse_number(s) {
            Some(1) => Ok(ResetType::Hard),
            Some(2) => Ok(ResetType::KeyOffOn),
            Some(3) => Ok(ResetType::Soft),
            _ => Err(DiagError::InvalidRequest(format!(
                "unknown reset type '{s}' (expected hard, key_off_on or soft)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    ReadData {
        sid: u8,
        did: u16,
        data_type: DataType,
    },
    WriteData {
        sid: u8,
        did: u16,
        data: Vec<u8>,
    },
    DtcList {
        sid: u8,
        mask: u8,
    },
    DtcCount {
        sid: u8,
        mask: u8,
    },
    DtcRecords {
        sid: u8,
        report: u8,
        code: [u8; 3],
        record: u8,
    },
    ClearDtc {
        sid: u8,
        read_sid: u8,
        group: u32,
        filter: Option<Vec<String>>,
    },
    Routine {
        sid: u8,
        rid: u16,
        action: RoutineAction,
        data: Vec<u8>,
        result_type: Option<DataType>,
    },
    Actuator {
        sid: u8,
        ioid: u16,
        action: ActuatorAction,
        value: Vec<u8>,
        data_type: DataType,
    },
    Session(SessionType),
    Security(u8),
    Reset(ResetType),
}

/// Everything needed to run one request against its target
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    requirement: SessionRequirement,
    security_level: u8,
    step: Step,
}

impl Plan {
    /// Resolve `request` against the target's catalog
    pub(crate) fn build(catalog: &Catalog, request: &SovdRequest) -> Result<Self> {
        let id = request.identifier.as_str();
        let plan = match request.operation_kind {
            OperationKind::ReadData => {
                let m = catalog.resolve(id)?;
                Plan::open(Step::ReadData {
                    sid: catalog.resolve_operation(ServiceKind::ReadData).service_id,
                    did: m.did,
                    data_type: m.data_type.clone(),
                })
            }
            OperationKind::WriteData => {
                let m = catalog.resolve(id)?;
                if !m.writable {
                    return Err(DiagError::InvalidRequest(format!(
                        "data item '{}' is read-only",
                        m.name
                    )));
                }
                let value = required(request, "value")?;
                let data = encode_value(&m.data_type, value)
                    .map_err(|e| DiagError::InvalidRequest(format!("'{}': {e}", m.name)))?;
                Plan {
                    requirement: SessionRequirement::from_declared(m.session, m.security_level),
                    security_level: m.security_level,
                    step: Step::WriteData {
                        sid: catalog.resolve_operation(ServiceKind::WriteData).service_id,
                        did: m.did,
                        data,
                    },
                }
            }
            OperationKind::ReadDtc => Plan::open(dtc_read_step(catalog, request)?),
            OperationKind::ClearDtc => {
                let policy = catalog.dtc_policy();
                let group = match (id, request.param("group")) {
                    (_, Some(value)) => parse_group(value)?,
                    ("all", None) => dtc_group::ALL,
                    (other, None) => {
                        return Err(DiagError::NotFound(format!("DTC group '{other}'")))
                    }
                };
                let filter = request.param("dtcs").map(parse_code_list).transpose()?;
                Plan {
                    requirement: SessionRequirement::from_declared(
                        policy.clear_session,
                        policy.clear_security_level,
                    ),
                    security_level: policy.clear_security_level,
                    step: Step::ClearDtc {
                        sid: catalog.resolve_operation(ServiceKind::ClearDtc).service_id,
                        read_sid: catalog.resolve_operation(ServiceKind::ReadDtc).service_id,
                        group,
                        filter,
                    },
                }
            }
            OperationKind::ExecuteRoutine => {
                let r = catalog.resolve_routine(id)?;
                let action = match request.param("action") {
                    Some(v) => text(v, "action")?.parse()?,
                    None => RoutineAction::Start,
                };
                let data = match request.param("data") {
                    Some(v) => bytes(v, "data")?,
                    None => Vec::new(),
                };
                Plan {
                    requirement: SessionRequirement::from_declared(r.session, r.security_level),
                    security_level: r.security_level,
                    step: Step::Routine {
                        sid: catalog.resolve_operation(ServiceKind::RoutineControl).service_id,
                        rid: r.rid,
                        action,
                        data,
                        result_type: r.result_type.clone(),
                    },
                }
            }
            OperationKind::ControlActuator => {
                let a = catalog.resolve_actuator(id)?;
                let value = request.param("value");
                let action = match (request.param("action"), value) {
                    (Some(v), _) => text(v, "action")?.parse()?,
                    (None, Some(_)) => ActuatorAction::ShortTermAdjustment,
                    (None, None) => {
                        return Err(DiagError::InvalidRequest(format!(
                            "actuator '{}' needs an 'action' or a 'value'",
                            a.name
                        )))
                    }
                };
                let value = match (action, value) {
                    (ActuatorAction::ShortTermAdjustment, Some(v)) => encode_value(&a.data_type, v)
                        .map_err(|e| DiagError::InvalidRequest(format!("'{}': {e}", a.name)))?,
                    (ActuatorAction::ShortTermAdjustment, None) => {
                        return Err(DiagError::InvalidRequest(
                            "short_term_adjustment needs a 'value'".into(),
                        ))
                    }
                    _ => Vec::new(),
                };
                Plan {
                    requirement: SessionRequirement::from_declared(a.session, a.security_level),
                    security_level: a.security_level,
                    step: Step::Actuator {
                        sid: catalog.resolve_operation(ServiceKind::IoControl).service_id,
                        ioid: a.ioid,
                        action,
                        value,
                        data_type: a.data_type.clone(),
                    },
                }
            }
            OperationKind::SessionControl => {
                let session: SessionType = id.parse().map_err(DiagError::InvalidRequest)?;
                Plan {
                    requirement: SessionRequirement::Exactly(session),
                    security_level: 0,
                    step: Step::Session(session),
                }
            }
            OperationKind::SecurityAccess => {
                let level = id
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .filter(|l| (1..=0x3F).contains(l))
                    .ok_or_else(|| {
                        DiagError::InvalidRequest(format!("invalid security level '{id}'"))
                    })?;
                Plan {
                    requirement: SessionRequirement::NonDefault,
                    security_level: level,
                    step: Step::Security(level),
                }
            }
            OperationKind::EcuReset => {
                // the reset type may also come as a parameter, as in
                // { identifier: "ecu", parameters: { reset_type: 1 } }
                let reset = match request.param("reset_type") {
                    Some(SovdValue::String(s)) => s.parse()?,
                    Some(v) => number(v, "reset_type")?.to_string().parse()?,
                    None => id.parse()?,
                };
                Plan::open(Step::Reset(reset))
            }
        };
        Ok(plan)
    }

    fn open(step: Step) -> Self {
        Plan {
            requirement: SessionRequirement::Any,
            security_level: 0,
            step,
        }
    }

    /// Session setup, security access, then the exchange itself
    pub(crate) async fn run(
        &self,
        manager: &SessionManager,
        session: &mut Session,
    ) -> Result<Option<SovdValue>> {
        manager.ensure_session(session, self.requirement).await?;
        if self.security_level > 0 {
            manager.ensure_security(session, self.security_level).await?;
        }

        match &self.step {
            Step::ReadData { sid, did, data_type } => {
                let request = UdsRequest::new(*sid).with_id(*did);
                let payload = positive(manager.exchange(session, &request).await?)?;
                let data = strip_echo(&payload, &did.to_be_bytes(), "DID")?;
                Ok(Some(decode_value(data_type, data)?))
            }
            Step::WriteData { sid, did, data } => {
                let request =
                    UdsRequest::new(*sid).with_payload([&did.to_be_bytes()[..], data].concat());
                let payload = positive(manager.exchange(session, &request).await?)?;
                strip_echo(&payload, &did.to_be_bytes(), "DID")?;
                info!(target = %session.target().id, did = format!("0x{did:04X}"), "Data written");
                Ok(None)
            }
            Step::DtcList { sid, mask } => {
                let dtcs = read_dtcs(manager, session, *sid, *mask).await?;
                Ok(Some(SovdValue::Array(
                    dtcs.iter().map(Dtc::to_value).collect(),
                )))
            }
            Step::DtcCount { sid, mask } => {
                let request = UdsRequest::new(*sid)
                    .with_sub_function(report::REPORT_NUMBER_OF_DTC_BY_STATUS_MASK)
                    .with_payload(vec![*mask]);
                let payload = positive(manager.exchange(session, &request).await?)?;
                Ok(Some(dtc::parse_count(&payload)?.to_value()))
            }
            Step::DtcRecords {
                sid,
                report,
                code,
                record,
            } => {
                let request = UdsRequest::new(*sid)
                    .with_sub_function(*report)
                    .with_payload([&code[..], &[*record]].concat());
                let payload = positive(manager.exchange(session, &request).await?)?;
                Ok(Some(dtc::parse_records(*report, &payload)?.to_value()))
            }
            Step::ClearDtc {
                sid,
                read_sid,
                group,
                filter,
            } => clear_dtcs(manager, session, *sid, *read_sid, *group, filter.as_deref()).await,
            Step::Routine {
                sid,
                rid,
                action,
                data,
                result_type,
            } => {
                let sub = action.sub_function();
                let request = UdsRequest::new(*sid)
                    .with_sub_function(sub)
                    .with_payload([&rid.to_be_bytes()[..], data].concat());
                let payload = positive(manager.exchange(session, &request).await?)?;
                let [hi, lo] = rid.to_be_bytes();
                let status = strip_echo(&payload, &[sub, hi, lo], "routine")?;
                let value = match result_type {
                    Some(t) if !status.is_empty() => decode_value(t, status)?,
                    _ => SovdValue::Bytes(status.to_vec()),
                };
                Ok(Some(value))
            }
            Step::Actuator {
                sid,
                ioid,
                action,
                value,
                data_type,
            } => {
                let option = action.option();
                let request = UdsRequest::new(*sid).with_payload(
                    [&ioid.to_be_bytes()[..], &[option], value].concat(),
                );
                let payload = positive(manager.exchange(session, &request).await?)?;
                let [hi, lo] = ioid.to_be_bytes();
                let rest = strip_echo(&payload, &[hi, lo], "IO identifier")?;
                // control status record: echoed option, then the state
                let state = rest.get(1..).unwrap_or_default();
                if state.is_empty() {
                    return Ok(None);
                }
                Ok(Some(decode_value(data_type, state)?))
            }
            Step::Session(t) => Ok(Some(SovdValue::object([(
                "session",
                SovdValue::from(t.as_str()),
            )]))),
            Step::Security(level) => Ok(Some(SovdValue::object([
                ("level", SovdValue::Integer(i64::from(*level))),
                ("unlocked", SovdValue::Bool(true)),
            ]))),
            Step::Reset(reset) => {
                manager.ecu_reset(session, reset.sub_function()).await?;
                Ok(Some(SovdValue::object([(
                    "reset_type",
                    SovdValue::from(reset.as_str()),
                )])))
            }
        }
    }
}

fn dtc_read_step(catalog: &Catalog, request: &SovdRequest) -> Result<Step> {
    let sid = catalog.resolve_operation(ServiceKind::ReadDtc).service_id;
    let mask = match request.param("status_mask") {
        Some(v) => byte(v, "status_mask")?,
        None => DEFAULT_STATUS_MASK,
    };
    let records = |report: u8| -> Result<Step> {
        let dtc = text(required(request, "dtc")?, "dtc")?;
        let code = Dtc::parse_code(dtc)
            .ok_or_else(|| DiagError::InvalidRequest(format!("invalid DTC '{dtc}'")))?;
        let record = match request.param("record") {
            Some(v) => byte(v, "record")?,
            None => ALL_RECORDS,
        };
        Ok(Step::DtcRecords {
            sid,
            report,
            code,
            record,
        })
    };

    match request.identifier.as_str() {
        "all" => Ok(Step::DtcList { sid, mask }),
        "count" => Ok(Step::DtcCount { sid, mask }),
        "snapshot" => records(report::REPORT_DTC_SNAPSHOT_RECORD_BY_DTC_NUMBER),
        "extended" => records(report::REPORT_DTC_EXTENDED_DATA_RECORD_BY_DTC_NUMBER),
        other => Err(DiagError::NotFound(format!("DTC report '{other}'"))),
    }
}

async fn read_dtcs(
    manager: &SessionManager,
    session: &mut Session,
    sid: u8,
    mask: u8,
) -> Result<Vec<Dtc>> {
    let request = UdsRequest::new(sid)
        .with_sub_function(report::REPORT_DTC_BY_STATUS_MASK)
        .with_payload(vec![mask]);
    let payload = positive(manager.exchange(session, &request).await?)?;
    let (_, dtcs) = dtc::parse_by_status_mask(&payload)?;
    Ok(dtcs)
}

/// ClearDiagnosticInformation only clears whole groups. A `dtcs` filter is
/// applied on our side: the stored DTCs are read first, and the clear is
/// skipped when none of the requested codes is present.
async fn clear_dtcs(
    manager: &SessionManager,
    session: &mut Session,
    sid: u8,
    read_sid: u8,
    group: u32,
    filter: Option<&[String]>,
) -> Result<Option<SovdValue>> {
    let mut summary = None;
    if let Some(codes) = filter {
        let stored = read_dtcs(manager, session, read_sid, DEFAULT_STATUS_MASK).await?;
        let (present, missing): (Vec<&String>, Vec<&String>) = codes
            .iter()
            .partition(|code| stored.iter().any(|d| d.matches(code)));
        let missing = SovdValue::Array(missing.into_iter().map(|c| c.as_str().into()).collect());

        if present.is_empty() {
            return Ok(Some(SovdValue::object([
                ("cleared", SovdValue::Array(vec![])),
                ("not_present", missing),
            ])));
        }
        if stored.len() > present.len() {
            warn!(
                target = %session.target().id,
                requested = present.len(),
                stored = stored.len(),
                "ECU clears DTCs by group; DTCs outside the filter are cleared too"
            );
        }
        summary = Some(SovdValue::object([
            (
                "cleared",
                SovdValue::Array(stored.iter().map(|d| d.to_code_string().into()).collect()),
            ),
            ("not_present", missing),
        ]));
    }

    let [_, a, b, c] = group.to_be_bytes();
    let request = UdsRequest::new(sid).with_payload(vec![a, b, c]);
    positive(manager.exchange(session, &request).await?)?;
    info!(target = %session.target().id, group = format!("0x{group:06X}"), "DTCs cleared");
    Ok(summary)
}

fn positive(response: UdsResponse) -> Result<Vec<u8>> {
    match response {
        UdsResponse::Positive { payload, .. } => Ok(payload),
        UdsResponse::Negative { service_id, nrc } => Err(DiagError::negative(service_id, nrc)),
    }
}

fn strip_echo<'a>(payload: &'a [u8], echo: &[u8], what: &str) -> Result<&'a [u8]> {
    payload.strip_prefix(echo).ok_or_else(|| {
        DiagError::MalformedResponse(format!(
            "{what} echo mismatch: expected {}, got {}",
            hex::encode_upper(echo),
            hex::encode_upper(&payload[..payload.len().min(echo.len())])
        ))
    })
}

fn required<'a>(request: &'a SovdRequest, key: &str) -> Result<&'a SovdValue> {
    request
        .param(key)
        .ok_or_else(|| DiagError::InvalidRequest(format!("missing parameter '{key}'")))
}

fn text<'a>(value: &'a SovdValue, key: &str) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        DiagError::InvalidRequest(format!(
            "parameter '{key}' must be a string, got {}",
            value.type_name()
        ))
    })
}

fn bytes(value: &SovdValue, key: &str) -> Result<Vec<u8>> {
    value.to_bytes().ok_or_else(|| {
        DiagError::InvalidRequest(format!(
            "parameter '{key}' must be a hex string or a byte array"
        ))
    })
}

fn number(value: &SovdValue, key: &str) -> Result<u64> {
    match value {
        SovdValue::String(s) => crate::config::parse_number(s),
        other => other.as_i64().and_then(|i| u64::try_from(i).ok()),
    }
    .ok_or_else(|| DiagError::InvalidRequest(format!("parameter '{key}' must be a number")))
}

fn byte(value: &SovdValue, key: &str) -> Result<u8> {
    u8::try_from(number(value, key)?)
        .map_err(|_| DiagError::InvalidRequest(format!("parameter '{key}' exceeds 0xFF")))
}

fn parse_group(value: &SovdValue) -> Result<u32> {
    u32::try_from(number(value, "group")?)
        .ok()
        .filter(|g| *g <= dtc_group::ALL)
        .ok_or_else(|| DiagError::InvalidRequest("parameter 'group' exceeds 0xFFFFFF".into()))
}

fn parse_code_list(value: &SovdValue) -> Result<Vec<String>> {
    let SovdValue::Array(items) = value else {
        return Err(DiagError::InvalidRequest(
            "parameter 'dtcs' must be an array of DTC codes".into(),
        ));
    };
    items
        .iter()
        .map(|item| {
            let code = text(item, "dtcs")?;
            Dtc::parse_code(code)
                .map(|_| code.trim().to_ascii_uppercase())
                .ok_or_else(|| DiagError::InvalidRequest(format!("invalid DTC '{code}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogConfig;
    use crate::uds::ServiceIds;
    use rstest::rstest;

    fn catalog() -> Catalog {
        let local: CatalogConfig = toml::from_str(
            r#"
            [[data]]
            name = "idle_rpm"
            did = "0x0101"
            data_type = { type = "number", kind = "u16" }
            writable = true
            security_level = 1

            [[routines]]
            name = "self_test"
            rid = "0xFF00"

            [[actuators]]
            name = "fan"
            ioid = "0x0200"
            data_type = { type = "number", kind = "u8" }
            "#,
        )
        .unwrap();
        Catalog::build(&CatalogConfig::default(), &local, ServiceIds::default()).unwrap()
    }

    fn build(request: SovdRequest) -> Result<Plan> {
        Plan::build(&catalog(), &request)
    }

    #[test]
    fn test_write_requires_security_and_extended() {
        let plan = build(
            SovdRequest::new("engine", OperationKind::WriteData, "idle_rpm")
                .with_parameter("value", 800i64),
        )
        .unwrap();
        assert_eq!(plan.requirement, SessionRequirement::NonDefault);
        assert_eq!(plan.security_level, 1);
        assert!(matches!(plan.step, Step::WriteData { did: 0x0101, ref data, .. } if data == &[0x03, 0x20]));
    }

    #[test]
    fn test_read_is_open() {
        let plan = build(SovdRequest::new("engine", OperationKind::ReadData, "vin")).unwrap();
        assert_eq!(plan.requirement, SessionRequirement::Any);
        assert_eq!(plan.security_level, 0);
    }

    #[rstest]
    #[case(SovdRequest::new("e", OperationKind::ReadData, "odometer"), "not_found")]
    #[case(SovdRequest::new("e", OperationKind::WriteData, "vin").with_parameter("value", "X"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::WriteData, "idle_rpm"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::WriteData, "idle_rpm").with_parameter("value", 70000i64), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::ReadDtc, "freeze_frames"), "not_found")]
    #[case(SovdRequest::new("e", OperationKind::ReadDtc, "snapshot"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::ClearDtc, "body"), "not_found")]
    #[case(SovdRequest::new("e", OperationKind::ExecuteRoutine, "self_test").with_parameter("action", "pause"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::ControlActuator, "fan"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::SessionControl, "boot"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::SecurityAccess, "0"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::EcuReset, "power_cycle"), "invalid_request")]
    #[case(SovdRequest::new("e", OperationKind::EcuReset, "ecu").with_parameter("reset_type", 4i64), "invalid_request")]
    fn test_rejected_before_io(#[case] request: SovdRequest, #[case] kind: &str) {
        let err = build(request).unwrap_err();
        assert_eq!(err.kind().as_str(), kind);
    }

    #[test]
    fn test_clear_filter() {
        let plan = build(
            SovdRequest::new("engine", OperationKind::ClearDtc, "all").with_parameter(
                "dtcs",
                SovdValue::Array(vec!["p0101".into(), "C0420".into()]),
            ),
        )
        .unwrap();
        match plan.step {
            Step::ClearDtc { group, filter, .. } => {
                assert_eq!(group, 0xFFFFFF);
                assert_eq!(filter, Some(vec!["P0101".to_string(), "C0420".to_string()]));
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_actuator_defaults_to_adjustment() {
        let plan = build(
            SovdRequest::new("engine", OperationKind::ControlActuator, "fan")
                .with_parameter("value", 42i64),
        )
        .unwrap();
        assert!(matches!(
            plan.step,
            Step::Actuator { action: ActuatorAction::ShortTermAdjustment, ref value, .. } if value == &[42]
        ));
    }

    #[test]
    fn test_security_level_parsing() {
        let plan = build(SovdRequest::new("engine", OperationKind::SecurityAccess, "3")).unwrap();
        assert_eq!(plan.requirement, SessionRequirement::NonDefault);
        assert_eq!(plan.security_level, 3);
    }

    #[rstest]
    #[case("hard", ResetType::Hard)]
    #[case("key_off_on", ResetType::KeyOffOn)]
    #[case("soft", ResetType::Soft)]
    #[case("0x01", ResetType::Hard)]
    #[case("3", ResetType::Soft)]
    fn test_reset_type(#[case] id: &str, #[case] expected: ResetType) {
        let plan = build(SovdRequest::new("engine", OperationKind::EcuReset, id)).unwrap();
        assert_eq!(plan.requirement, SessionRequirement::Any);
        assert!(matches!(plan.step, Step::Reset(t) if t == expected));
    }

    #[test]
    fn test_reset_type_parameter() {
        let plan = build(
            SovdRequest::new("engine", OperationKind::EcuReset, "ecu")
                .with_parameter("reset_type", 2i64),
        )
        .unwrap();
        assert!(matches!(plan.step, Step::Reset(ResetType::KeyOffOn)));
    }
}
