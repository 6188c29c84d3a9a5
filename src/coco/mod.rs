pub mod client;
pub mod mock;
pub mod quote;

use crate::error::Result;
use crate::product::SevProduct;
use crate::snp::abi::{EsResult, GuestRequest, REPORT_DATA_SIZE};
use std::fmt::Debug;

pub const SEV_GUEST_PATH: &str = "/dev/sev-guest";

/// A `sev-guest` style command channel.
pub trait GuestDevice: Debug {
    /// Open the channel at `path`.
    fn open(&mut self, path: &str) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Issue the raw ioctl `command` with `request`.
    ///
    /// ## Returns:
    /// * `EsResult` - the security-processor result of the guest exit.
    /// * `Error` - on failure. A simulated I/O failure still carries the
    ///   `EsResult` and leaves the firmware status in `request.fw_err`.
    fn ioctl(&mut self, command: u64, request: &mut GuestRequest<'_>) -> Result<EsResult>;

    /// The product the device reports to run on.
    fn product(&self) -> SevProduct;
}

/// A configfs-tsm style provider returning a report and its certificates in one blob.
pub trait QuoteProvider: Debug {
    fn is_supported(&self) -> bool;

    /// Signed report followed by the extended certificate table.
    fn get_raw_quote(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>>;

    fn product(&self) -> SevProduct;
}
