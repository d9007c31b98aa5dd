//! Linked C UDS client (`libudsclient`)
//!
//! This is the only module containing `unsafe`. Every call passes
//! caller-owned buffers with explicit capacities; the library writes the
//! received frame length into an out-parameter that is checked against the
//! capacity before the buffer is read.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::NonNull;
use std::time::Duration;

use libc::size_t;
use tracing::error;

use super::{TransportError, UdsLink};
use crate::config::TransportConfig;

const STATUS_OK: c_int = 0;
const STATUS_TIMEOUT: c_int = -1;
const STATUS_BUFFER_TOO_SMALL: c_int = -2;

#[link(name = "udsclient")]
extern "C" {
    fn uds_conn_open_can(interface: *const c_char, tx_id: u32, rx_id: u32) -> *mut c_void;

    fn uds_conn_open_doip(
        host: *const c_char,
        port: u16,
        source_address: u16,
        target_address: u16,
    ) -> *mut c_void;

    fn uds_conn_send_receive(
        conn: *mut c_void,
        request: *const u8,
        request_len: size_t,
        response: *mut u8,
        response_cap: size_t,
        response_len: *mut size_t,
        timeout_ms: u32,
    ) -> c_int;

    fn uds_conn_receive(
        conn: *mut c_void,
        response: *mut u8,
        response_cap: size_t,
        response_len: *mut size_t,
        timeout_ms: u32,
    ) -> c_int;

    fn uds_conn_close(conn: *mut c_void);

    fn uds_last_error() -> *const c_char;
}

fn last_error() -> String {
    // SAFETY: the library returns either NULL or a NUL-terminated string
    // owned by the library that stays valid until the next call.
    unsafe {
        let msg = uds_last_error();
        if msg.is_null() {
            "unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

fn c_string(s: &str) -> Result<CString, TransportError> {
    CString::new(s).map_err(|_| TransportError::Open(format!("'{s}' contains a NUL byte")))
}

pub(super) fn open(
    transport: &TransportConfig,
    max_frame_size: usize,
) -> Result<Box<dyn UdsLink>, TransportError> {
    let raw = match transport {
        TransportConfig::Can(can) => {
            let interface = c_string(&can.interface)?;
            // SAFETY: `interface` outlives the call; the library copies it.
            unsafe { uds_conn_open_can(interface.as_ptr(), can.tx_id, can.rx_id) }
        }
        TransportConfig::Doip(doip) => {
            let host = c_string(&doip.host)?;
            // SAFETY: `host` outlives the call; the library copies it.
            unsafe {
                uds_conn_open_doip(
                    host.as_ptr(),
                    doip.port,
                    doip.source_address,
                    doip.target_address,
                )
            }
        }
        TransportConfig::Simulated(_) => {
            return Err(TransportError::Unsupported(
                "simulated targets have no native link".into(),
            ))
        }
    };

    let conn = NonNull::new(raw).ok_or_else(|| TransportError::Open(last_error()))?;
    Ok(Box::new(NativeLink {
        conn: Some(conn),
        buffer: vec![0u8; max_frame_size],
    }))
}

struct NativeLink {
    conn: Option<NonNull<c_void>>,
    buffer: Vec<u8>,
}

// SAFETY: the connection is only used from one thread at a time; the
// session manager never issues concurrent calls on one link.
unsafe impl Send for NativeLink {}

fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

impl NativeLink {
    fn conn(&self) -> Result<NonNull<c_void>, TransportError> {
        self.conn.ok_or(TransportError::ConnectionClosed)
    }

    fn finish(&self, status: c_int, len: size_t, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match status {
            STATUS_OK if len <= self.buffer.len() => Ok(self.buffer[..len].to_vec()),
            STATUS_OK | STATUS_BUFFER_TOO_SMALL => Err(TransportError::ResponseTooLarge {
                max: self.buffer.len(),
            }),
            STATUS_TIMEOUT => Err(TransportError::Timeout(timeout.as_millis() as u64)),
            code => {
                let message = last_error();
                error!(code, %message, "UDS client library failure");
                Err(TransportError::Foreign { code, message })
            }
        }
    }
}

impl UdsLink for NativeLink {
    fn send_receive(
        &mut self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let conn = self.conn()?;
        let mut len: size_t = 0;
        // SAFETY: `request` and `buffer` are valid for their stated lengths
        // for the duration of the call, and `len` is a valid out-pointer.
        let status = unsafe {
            uds_conn_send_receive(
                conn.as_ptr(),
                request.as_ptr(),
                request.len(),
                self.buffer.as_mut_ptr(),
                self.buffer.len(),
                &mut len,
                timeout_ms(timeout),
            )
        };
        self.finish(status, len, timeout)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let conn = self.conn()?;
        let mut len: size_t = 0;
        // SAFETY: as in `send_receive`.
        let status = unsafe {
            uds_conn_receive(
                conn.as_ptr(),
                self.buffer.as_mut_ptr(),
                self.buffer.len(),
                &mut len,
                timeout_ms(timeout),
            )
        };
        self.finish(status, len, timeout)
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            // SAFETY: `conn` came from a successful open and is closed once.
            unsafe { uds_conn_close(conn.as_ptr()) }
        }
    }
}

impl Drop for NativeLink {
    fn drop(&mut self) {
        self.close();
    }
}
