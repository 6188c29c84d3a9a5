use crate::snp::abi::EsResult;
use crate::snp::error::{FirmwareError, FirmwareStatus, VmmError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CocoError>;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CocoError {
    #[error("device already open")]
    AlreadyOpen,
    #[error("device already closed")]
    AlreadyClosed,
    #[error("device is not open")]
    NotOpen,
    /// No canned response is registered for the (hex-encoded) report data.
    #[error("test error: no response for {0}")]
    NoResponse(String),
    #[error("test error: no keys")]
    NoKeys,
    #[error("test error: unmapped key request {0}")]
    UnmappedKey(String),
    #[error("invalid command 0x{0:x}")]
    InvalidCommand(u64),
    /// Simulated EIO from the guest driver. The security-processor result code
    /// is meaningful on this path too.
    #[error("input/output error (es_result: {es_result:?}, fw_err: {fw_err})")]
    Io {
        es_result: EsResult,
        fw_err: FirmwareStatus,
    },
    #[error("test failure: cert buffer too small: {provided} < {required}")]
    CertBufferTooSmall { provided: usize, required: usize },
    #[error("mock SevProduct must not be nil")]
    ProductRequired,
    #[error("Signing: {0}")]
    Signing(String),
    #[error("Report: {0}")]
    Report(String),
    #[error("CertTable: {0}")]
    CertTable(String),
    #[error("Firmware: {0}")]
    Firmware(String),
    #[error("IO: {0}")]
    IO(String),
}

impl CocoError {
    /// Security-processor result code carried by a simulated I/O failure.
    pub fn es_result(&self) -> Option<EsResult> {
        match self {
            CocoError::Io { es_result, .. } => Some(*es_result),
            _ => None,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, CocoError::Io { .. })
    }
}

impl From<uuid::Error> for CocoError {
    fn from(err: uuid::Error) -> Self {
        CocoError::CertTable(format!("{err:?}"))
    }
}

impl From<hex::FromHexError> for CocoError {
    fn from(err: hex::FromHexError) -> Self {
        CocoError::IO(format!("{err:?}"))
    }
}

impl From<serde_json::Error> for CocoError {
    fn from(err: serde_json::Error) -> Self {
        CocoError::IO(format!("{err}"))
    }
}

impl From<FirmwareError> for CocoError {
    fn from(err: FirmwareError) -> Self {
        CocoError::Firmware(format!("{err}"))
    }
}

impl From<VmmError> for CocoError {
    fn from(err: VmmError) -> Self {
        CocoError::Firmware(format!("{err}"))
    }
}
