//! Request and response records exchanged with the `sev-guest` driver.
//!
//! The layouts mirror `include/uapi/linux/sev-guest.h`. Buffers that the real
//! driver passes by address are owned values here, and the untyped request
//! pointer of the ioctl is replaced by [`GuestPayload`], one variant per command.

use super::report::REPORT_SIZE;
use super::types::DerivedKey;
use crate::error::{CocoError, Result};
use crate::snp::error::FirmwareStatus;
use serde::{Deserialize, Serialize};

const MAX_VMPL: u32 = 3;

pub const REPORT_DATA_SIZE: usize = 64;
pub const DERIVED_KEY_SIZE: usize = 32;

/// Size of `struct snp_guest_request_ioctl`, encoded into every command number.
const GUEST_REQUEST_SIZE: u64 = 32;
const IOC_WRITE_READ: u64 = 3 << 30;
const SEV_IOC_TYPE: u8 = b'S';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GuestIoctl {
    GetReport = 0x0,
    GetDerivedKey = 0x1,
    GetExtReport = 0x2,
}

impl GuestIoctl {
    /// The `_IOWR('S', nr, struct snp_guest_request_ioctl)` command number.
    pub const fn command(self) -> u64 {
        IOC_WRITE_READ | (GUEST_REQUEST_SIZE << 16) | ((SEV_IOC_TYPE as u64) << 8) | self as u64
    }

    pub fn from_command(command: u64) -> Option<Self> {
        [
            GuestIoctl::GetReport,
            GuestIoctl::GetDerivedKey,
            GuestIoctl::GetExtReport,
        ]
        .into_iter()
        .find(|ioctl| ioctl.command() == command)
    }
}

pub const SNP_GET_REPORT: u64 = GuestIoctl::GetReport.command();
pub const SNP_GET_DERIVED_KEY: u64 = GuestIoctl::GetDerivedKey.command();
pub const SNP_GET_EXT_REPORT: u64 = GuestIoctl::GetExtReport.command();

/// Result of the exit to the security processor, reported next to the ioctl error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum EsResult {
    #[default]
    Ok = 0,
    Unsupported = 1,
    VmmError = 2,
    DecodeFailed = 3,
    Exception = 4,
    Retry = 5,
}

impl From<EsResult> for u64 {
    fn from(value: EsResult) -> Self {
        value as u64
    }
}

/// Information provided by the guest owner for requesting an attestation
/// report from the AMD Secure Processor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(C)]
pub struct ReportReq {
    /// Guest-provided data to be included in the attestation report
    report_data: [u8; REPORT_DATA_SIZE],

    /// The VMPL to put into the attestation report. Must be greater than or
    /// equal to the current VMPL and at most three.
    vmpl: u32,

    /// Reserved memory slot, must be zero.
    _reserved: [u8; 28],
}

impl Default for ReportReq {
    fn default() -> Self {
        Self {
            report_data: [0; REPORT_DATA_SIZE],
            vmpl: 1,
            _reserved: Default::default(),
        }
    }
}

impl ReportReq {
    /// Builds a request for `report_data` at privilege level `vmpl`.
    /// Missing values keep their defaults (zeroed data, VMPL 1).
    pub fn new(report_data: Option<[u8; REPORT_DATA_SIZE]>, vmpl: Option<u32>) -> Result<Self> {
        let mut request = Self::default();

        if let Some(report_data) = report_data {
            request.report_data = report_data;
        }

        if let Some(vmpl) = vmpl {
            if vmpl > MAX_VMPL {
                return Err(CocoError::Firmware(format!("VMPL {vmpl} out of range")));
            }
            request.vmpl = vmpl;
        }

        Ok(request)
    }

    pub fn report_data(&self) -> &[u8; REPORT_DATA_SIZE] {
        &self.report_data
    }

    pub fn vmpl(&self) -> u32 {
        self.vmpl
    }
}

/// Extended report request: a [ReportReq] plus the caller's certificate buffer.
///
/// `certs_len` is the length the caller claims for `certs`. A zero length asks
/// the device how large the buffer has to be.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtReportReq {
    pub data: ReportReq,
    pub certs: Vec<u8>,
    pub certs_len: u32,
}

impl ExtReportReq {
    pub fn new(data: &ReportReq) -> Self {
        Self {
            data: *data,
            certs: Vec::new(),
            certs_len: 0,
        }
    }

    /// Replaces the certificate buffer with a zeroed one of `len` bytes.
    pub fn resize_certs(&mut self, len: u32) {
        self.certs = vec![0u8; len as usize];
        self.certs_len = len;
    }
}

/// The response from the PSP containing the generated attestation report,
/// padded to 4000 bytes like the kernel's message buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ReportRsp {
    /// 0h on success.
    pub status: u32,
    /// Size in bytes of the report.
    pub report_size: u32,
    reserved_0: [u8; 24],
    /// The attestation report generated by the firmware.
    pub report: [u8; REPORT_SIZE],
    reserved_1: [u8; 4000
        - (REPORT_SIZE + (std::mem::size_of::<u32>() * 2) + std::mem::size_of::<[u8; 24]>())],
}

impl Default for ReportRsp {
    fn default() -> Self {
        Self {
            status: Default::default(),
            report_size: Default::default(),
            reserved_0: Default::default(),
            report: [0u8; REPORT_SIZE],
            reserved_1: [0u8; 4000
                - (REPORT_SIZE
                    + (std::mem::size_of::<u32>() * 2)
                    + std::mem::size_of::<[u8; 24]>())],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct DerivedKeyReq {
    /// Selects the root key to derive the key from.
    /// 0: Indicates VCEK.
    /// 1: Indicates VMRK.
    root_key_select: u32,

    /// Reserved, must be zero
    reserved_0: u32,

    /// What data will be mixed into the derived key.
    pub guest_field_select: u64,

    /// The VMPL to mix into the derived key.
    pub vmpl: u32,

    /// The guest SVN to mix into the key.
    pub guest_svn: u32,

    /// The TCB version to mix into the derived key.
    pub tcb_version: u64,
}

impl DerivedKeyReq {
    pub fn new(
        root_key_select: u32,
        guest_field_select: u64,
        vmpl: u32,
        guest_svn: u32,
        tcb_version: u64,
    ) -> Self {
        Self {
            root_key_select,
            reserved_0: Default::default(),
            guest_field_select,
            vmpl,
            guest_svn,
            tcb_version,
        }
    }

    pub fn root_key_select(&self) -> u32 {
        self.root_key_select
    }

    /// Canonical map key for this request, see [derived_key_request_to_string].
    pub fn lookup_key(&self) -> String {
        derived_key_request_to_string(self)
    }
}

impl From<DerivedKey> for DerivedKeyReq {
    fn from(value: DerivedKey) -> Self {
        Self::new(
            value.get_root_key_select(),
            value.guest_field_select.0,
            value.vmpl,
            value.guest_svn,
            value.tcb_version,
        )
    }
}

/// Formats the fields that select a derived key as fixed-width hex, so that two
/// requests share a key string exactly when all five fields are equal.
pub fn derived_key_request_to_string(req: &DerivedKeyReq) -> String {
    format!(
        "{:08x} {:016x} {:08x} {:08x} {:016x}",
        req.root_key_select, req.guest_field_select, req.vmpl, req.guest_svn, req.tcb_version
    )
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[repr(C)]
/// A raw representation of the PSP Report Response after calling SNP_GET_DERIVED_KEY.
pub struct DerivedKeyRsp {
    /// 0h: Success.
    /// 16h: Invalid parameters
    pub status: u32,

    reserved_0: [u8; 28],

    /// The requested derived key if `status` is 0h.
    pub key: [u8; DERIVED_KEY_SIZE],
}

/// Typed request/response pair carried by a [GuestRequest].
#[derive(Debug)]
pub enum GuestPayload<'a> {
    Report {
        req: &'a ReportReq,
        rsp: &'a mut ReportRsp,
    },
    ExtReport {
        req: &'a mut ExtReportReq,
        rsp: &'a mut ReportRsp,
    },
    DerivedKey {
        req: &'a DerivedKeyReq,
        rsp: &'a mut DerivedKeyRsp,
    },
}

/// The structure handed to the driver for every guest command.
#[derive(Debug)]
pub struct GuestRequest<'a> {
    /// Message version number (must be non-zero)
    pub message_version: u32,
    pub payload: GuestPayload<'a>,
    /// Written by the device when the firmware or VMM reports an error.
    pub fw_err: FirmwareStatus,
}

impl<'a> GuestRequest<'a> {
    /// Creates a new request. The message version defaults to `1`.
    pub fn new(ver: Option<u32>, payload: GuestPayload<'a>) -> Self {
        Self {
            message_version: ver.unwrap_or(1),
            payload,
            fw_err: FirmwareStatus::default(),
        }
    }

    /// The command this payload belongs to.
    pub fn command(&self) -> GuestIoctl {
        match self.payload {
            GuestPayload::Report { .. } => GuestIoctl::GetReport,
            GuestPayload::ExtReport { .. } => GuestIoctl::GetExtReport,
            GuestPayload::DerivedKey { .. } => GuestIoctl::GetDerivedKey,
        }
    }
}
