// Licensed under the Apache-2.0 license

//! API crate for the secure enclave services channel.
//!
//! Everything in here is part of the contract with the enclave firmware:
//! service identifiers, the packet header, and the per-service packet
//! layouts. The enclave decodes raw memory, so field order, width and
//! alignment are the wire format. Any change to a numeric value or a
//! layout must bump [`PROTOCOL_VERSION`].
//!
//! Two independent error channels come back from every call:
//!
//! - [`ServicesError`]: did the request make it to the enclave and back?
//! - [`ErrorCode`]: what did the enclave-side operation report?
//!
//! Callers have to look at both.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use num_derive::FromPrimitive;

pub mod cryptocell;

pub use cryptocell::{Layout, LifecycleState, ServiceId, ServicePacket};
pub use lib_addr_xlate::{GlobalAddr, LocalAddr};

/// Version of the service id table and packet layouts.
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the shared packet buffer in bytes.
pub const PACKET_BUFFER_SIZE: usize = 256;

/// Bytes of random data carried by one `GetRnd` response.
pub const MAX_RND_LENGTH: usize = 32;

/// Set by the enclave in [`ServiceHeader::flags`] once the response is
/// written.
pub const FLAG_RESPONSE: u16 = 1 << 0;

/// Timeout applied by the service call wrappers.
pub const DEFAULT_TIMEOUT: Timeout = Timeout::Millis(1000);

/// Transport status value for success, for C-style status reporting.
pub const STATUS_OK: u32 = 0;

/// How long a caller is willing to block on one request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Millis(u32),
    Infinite,
}

impl Timeout {
    /// Returns true once `elapsed_ms` has reached the limit.
    pub fn expired(self, elapsed_ms: u64) -> bool {
        match self {
            Timeout::Millis(ms) => elapsed_ms >= u64::from(ms),
            Timeout::Infinite => false,
        }
    }
}

/// Header at offset 0 of every packet.
///
/// The host fills `service_id` and `sequence`. The enclave sets
/// [`FLAG_RESPONSE`] when it has written the response, leaves `sequence`
/// as it found it, and puts a non-zero value in `error` if it refused
/// the packet outright (unknown service, bad address, ...).
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
)]
#[repr(C)]
pub struct ServiceHeader {
    pub service_id: u16,
    pub flags: u16,
    pub error: u16,
    pub reserved: u16,
    pub sequence: u32,
}

impl ServiceHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }
}

/// Transport-level failures.
///
/// None of these say anything about the operation itself: on any of them
/// the packet contents are undefined and no [`ErrorCode`] is available.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ServicesError {
    /// The enclave did not complete the request in time.
    Timeout = 1,

    /// The packet does not fit the shared buffer.
    PacketTooLarge = 2,

    /// The packet type does not match the service's layout.
    LayoutMismatch = 3,

    /// A length argument exceeds what the packet can carry.
    InvalidLength = 4,

    /// The doorbell could not be rung.
    DoorbellFailed = 5,

    /// The enclave refused the packet.
    Rejected = 6,

    /// The request is not in a state that allows this call.
    InvalidState = 7,

    /// A late response to an earlier request landed on this request's
    /// packet, so the enclave may have acted on the wrong arguments.
    Stale = 8,
}

impl ServicesError {
    /// Stable numeric status, never equal to [`STATUS_OK`].
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ServicesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ServicesError::Timeout => "request timed out",
            ServicesError::PacketTooLarge => "packet exceeds shared buffer",
            ServicesError::LayoutMismatch => "packet layout does not match service",
            ServicesError::InvalidLength => "length exceeds packet capacity",
            ServicesError::DoorbellFailed => "doorbell failed",
            ServicesError::Rejected => "request rejected by enclave",
            ServicesError::InvalidState => "request in wrong state",
            ServicesError::Stale => "request overwritten by a late response",
        };
        f.write_str(msg)
    }
}

/// Flattens a call result into the C-style transport status.
pub fn status_code<T>(result: &Result<T, ServicesError>) -> u32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.code(),
    }
}

/// Operation-level status reported by the enclave.
///
/// The value is opaque to the transport; for the cryptocell services it
/// is the library's native (negative on failure) error code.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const OK: Self = Self(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enclave error {}", self.0)
    }
}

/// The outcome of a request that completed at the transport level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Reply<T = ()> {
    pub error_code: ErrorCode,
    pub value: T,
}

impl<T> Reply<T> {
    pub fn new(error_code: ErrorCode, value: T) -> Self {
        Self { error_code, value }
    }

    /// Folds the operation-level error code into a `Result`.
    pub fn into_result(self) -> Result<T, ErrorCode> {
        if self.error_code.is_ok() {
            Ok(self.value)
        } else {
            Err(self.error_code)
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        Reply {
            error_code: self.error_code,
            value: f(self.value),
        }
    }
}
