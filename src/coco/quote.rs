use crate::coco::mock::MockDevice;
use crate::coco::{GuestDevice, QuoteProvider};
use crate::error::{CocoError, Result};
use crate::product::SevProduct;
use crate::snp::abi::REPORT_DATA_SIZE;
use crate::snp::report::REPORT_SIZE;
use crate::snp::types::{extend_platform_cert_table, ExtraPlatformInfo};
use log::{debug, warn};

/// What the configfs `provider` attribute reads for SEV-SNP guests.
pub const SEV_GUEST_PROVIDER: &str = "sev_guest";

/// A configfs-tsm style quote provider backed by a [MockDevice].
///
/// It shares the device's response map, signer and certificates but skips the
/// ioctl framing, so the device does not need to be open.
#[derive(Clone, Debug)]
pub struct MockQuoteProvider {
    pub device: MockDevice,
}

impl MockQuoteProvider {
    pub fn new(device: MockDevice) -> Self {
        Self { device }
    }

    /// Returns the provider of the report.
    pub fn get_provider(&self) -> &'static str {
        SEV_GUEST_PROVIDER
    }
}

impl QuoteProvider for MockQuoteProvider {
    fn is_supported(&self) -> bool {
        true
    }

    fn get_raw_quote(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>> {
        let mock_rsp = self.device.lookup(report_data)?;
        if !mock_rsp.fw_err.is_success() {
            warn!("injecting firmware error {} for quote", mock_rsp.fw_err);
            return Err(CocoError::Io {
                es_result: mock_rsp.es_result,
                fw_err: mock_rsp.fw_err,
            });
        }
        let report = self.device.sign_report(&mock_rsp.report)?;
        let product = self.device.sev_product.ok_or(CocoError::ProductRequired)?;
        let extended = extend_platform_cert_table(
            &self.device.certs,
            &ExtraPlatformInfo::from_product(&product),
        )?;
        debug!(
            "quote: {} report bytes, {} cert bytes",
            report.len(),
            extended.len()
        );

        let mut quote = Vec::with_capacity(REPORT_SIZE + extended.len());
        quote.extend_from_slice(&report);
        quote.extend_from_slice(&extended);
        Ok(quote)
    }

    fn product(&self) -> SevProduct {
        self.device.product()
    }
}

/// Splits a raw quote into the report and the certificate table.
pub fn split_quote(quote: &[u8]) -> Result<(&[u8], &[u8])> {
    if quote.len() < REPORT_SIZE {
        return Err(CocoError::Report(format!(
            "quote is {} bytes, shorter than a report",
            quote.len()
        )));
    }
    Ok(quote.split_at(REPORT_SIZE))
}
