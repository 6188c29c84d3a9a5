use crate::error::CocoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Raw value of the `fw_err` slot of a guest request.
///
/// The upper 32 bits carry the VMM error, the lower 32 bits the error reported
/// by the AMD Secure Processor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmwareStatus(pub u64);

/// The hypervisor rejected the certificate buffer length of an extended report request.
pub const GUEST_REQUEST_INVALID_LENGTH: FirmwareStatus = FirmwareStatus(1 << 32);

impl FirmwareStatus {
    pub const SUCCESS: FirmwareStatus = FirmwareStatus(0);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    pub fn vmm(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn firmware(&self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for FirmwareStatus {
    fn from(raw: u64) -> Self {
        FirmwareStatus(raw)
    }
}

impl From<FirmwareStatus> for (u32, u32) {
    fn from(status: FirmwareStatus) -> Self {
        (status.vmm(), status.firmware())
    }
}

impl fmt::Display for FirmwareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Errors raised by the hypervisor while forwarding a guest request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    #[error("invalid certificate page length")]
    InvalidCertificatePageLength,
    #[error("rate limited, retry the request")]
    RateLimitRetryRequest,
    #[error("unknown VMM error {0}")]
    Unknown(u32),
}

impl From<u32> for VmmError {
    fn from(value: u32) -> Self {
        match value {
            1 => VmmError::InvalidCertificatePageLength,
            2 => VmmError::RateLimitRetryRequest,
            other => VmmError::Unknown(other),
        }
    }
}

impl From<FirmwareStatus> for VmmError {
    fn from(status: FirmwareStatus) -> Self {
        status.vmm().into()
    }
}

/// Status codes of the AMD Secure Processor.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("invalid platform state")]
    InvalidPlatformState,
    #[error("invalid guest state")]
    InvalidGuestState,
    #[error("invalid config")]
    InvalidConfig,
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid address")]
    InvalidAddress,
    #[error("bad signature")]
    BadSignature,
    #[error("bad measurement")]
    BadMeasurement,
    #[error("invalid guest")]
    InvalidGuest,
    #[error("invalid command")]
    InvalidCommand,
    #[error("unsupported")]
    Unsupported,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("resource limit")]
    ResourceLimit,
    #[error("AEAD overflow")]
    AeadOverflow,
    #[error("bad SVN")]
    BadSvn,
    #[error("bad version")]
    BadVersion,
    #[error("invalid key")]
    InvalidKey,
    #[error("unknown SEV error {0}")]
    UnknownSevError(u32),
}

impl From<u32> for FirmwareError {
    fn from(value: u32) -> Self {
        match value {
            0x01 => FirmwareError::InvalidPlatformState,
            0x02 => FirmwareError::InvalidGuestState,
            0x03 => FirmwareError::InvalidConfig,
            0x04 => FirmwareError::InvalidLength,
            0x09 => FirmwareError::InvalidAddress,
            0x0A => FirmwareError::BadSignature,
            0x0B => FirmwareError::BadMeasurement,
            0x10 => FirmwareError::InvalidGuest,
            0x11 => FirmwareError::InvalidCommand,
            0x15 => FirmwareError::Unsupported,
            0x16 => FirmwareError::InvalidParameter,
            0x17 => FirmwareError::ResourceLimit,
            0x1D => FirmwareError::AeadOverflow,
            0x21 => FirmwareError::BadSvn,
            0x22 => FirmwareError::BadVersion,
            0x27 => FirmwareError::InvalidKey,
            other => FirmwareError::UnknownSevError(other),
        }
    }
}

/// Turns the `fw_err` slot of a failed guest request into an error, preferring
/// the VMM half when it is set.
pub fn map_fw_err(raw_error: FirmwareStatus) -> CocoError {
    let (upper, lower): (u32, u32) = raw_error.into();

    if upper != 0 {
        return VmmError::from(upper).into();
    }

    if lower != 0 {
        return FirmwareError::from(lower).into();
    }

    FirmwareError::UnknownSevError(lower).into()
}
