use crate::coco::GuestDevice;
use crate::error::{CocoError, Result};
use crate::product::{SevProduct, DEFAULT_SEV_PRODUCT};
use crate::signer::ReportSigner;
use crate::snp::abi::{
    DerivedKeyReq, DerivedKeyRsp, EsResult, ExtReportReq, GuestIoctl, GuestPayload, GuestRequest,
    ReportReq, ReportRsp, REPORT_DATA_SIZE,
};
use crate::snp::error::{FirmwareStatus, GUEST_REQUEST_INVALID_LENGTH};
use crate::snp::report::{self, REPORT_SIZE};
use crate::utils::report_data_key;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Length of a certificate blob as the `u32` the extended report carries.
fn certs_len_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        CocoError::IO(format!("certificate blob of {len} bytes exceeds the length field"))
    })
}

/// Pre-programmed answer to a report request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetReportResponse {
    /// Report body. The signature area is overwritten when the report is served.
    pub report: [u8; REPORT_SIZE],
    pub es_result: EsResult,
    /// A non-zero status makes the request fail with a simulated I/O error.
    pub fw_err: FirmwareStatus,
}

impl GetReportResponse {
    pub fn new(report: [u8; REPORT_SIZE]) -> Self {
        Self {
            report,
            es_result: EsResult::Ok,
            fw_err: FirmwareStatus::SUCCESS,
        }
    }

    pub fn with_es_result(mut self, es_result: EsResult) -> Self {
        self.es_result = es_result;
        self
    }

    pub fn with_fw_err(mut self, fw_err: impl Into<FirmwareStatus>) -> Self {
        self.fw_err = fw_err.into();
        self
    }
}

/// A `sev-guest` device with pre-programmed responses to commands.
///
/// Report responses are keyed by the hex encoding of the request's report
/// data, derived keys by [DerivedKeyReq::lookup_key].
#[derive(Clone, Debug)]
pub struct MockDevice {
    is_open: bool,
    pub report_data_rsp: HashMap<String, GetReportResponse>,
    pub keys: HashMap<String, Vec<u8>>,
    pub certs: Vec<u8>,
    pub signer: Arc<dyn ReportSigner>,
    pub sev_product: Option<SevProduct>,
}

impl MockDevice {
    pub fn new(signer: impl ReportSigner + 'static) -> Self {
        Self {
            is_open: false,
            report_data_rsp: HashMap::new(),
            keys: HashMap::new(),
            certs: Vec::new(),
            signer: Arc::new(signer),
            sev_product: None,
        }
    }

    pub fn with_report(
        mut self,
        report_data: &[u8; REPORT_DATA_SIZE],
        response: GetReportResponse,
    ) -> Self {
        self.report_data_rsp
            .insert(report_data_key(report_data), response);
        self
    }

    pub fn with_key(mut self, request: &DerivedKeyReq, key: Vec<u8>) -> Self {
        self.keys.insert(request.lookup_key(), key);
        self
    }

    pub fn with_certs(mut self, certs: Vec<u8>) -> Self {
        self.certs = certs;
        self
    }

    pub fn with_product(mut self, product: SevProduct) -> Self {
        self.sev_product = Some(product);
        self
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub(crate) fn lookup(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<&GetReportResponse> {
        let key = report_data_key(report_data);
        match self.report_data_rsp.get(&key) {
            Some(response) => Ok(response),
            None => Err(CocoError::NoResponse(key)),
        }
    }

    /// Copy of `template` with a fresh signature over its signed component.
    pub(crate) fn sign_report(&self, template: &[u8; REPORT_SIZE]) -> Result<[u8; REPORT_SIZE]> {
        let mut report = *template;
        let signature = self.signer.sign(report::signed_component(&report)?)?;
        report::set_signature(&signature, &mut report)?;
        Ok(report)
    }

    fn get_report(
        &self,
        req: &ReportReq,
        rsp: &mut ReportRsp,
        fw_err: &mut FirmwareStatus,
    ) -> Result<EsResult> {
        let mock_rsp = self.lookup(req.report_data())?;
        if !mock_rsp.fw_err.is_success() {
            warn!("injecting firmware error {} for report request", mock_rsp.fw_err);
            *fw_err = mock_rsp.fw_err;
            return Err(CocoError::Io {
                es_result: mock_rsp.es_result,
                fw_err: mock_rsp.fw_err,
            });
        }
        let report = self.sign_report(&mock_rsp.report)?;
        rsp.status = 0;
        rsp.report_size = REPORT_SIZE as u32;
        rsp.report = report;
        Ok(mock_rsp.es_result)
    }

    fn get_ext_report(
        &self,
        req: &mut ExtReportReq,
        rsp: &mut ReportRsp,
        fw_err: &mut FirmwareStatus,
    ) -> Result<EsResult> {
        if req.certs_len == 0 {
            debug!("extended report size probe, {} cert bytes", self.certs.len());
            let certs_len = certs_len_field(self.certs.len())?;
            *fw_err = GUEST_REQUEST_INVALID_LENGTH;
            req.certs_len = certs_len;
            return Err(CocoError::Io {
                es_result: EsResult::Ok,
                fw_err: GUEST_REQUEST_INVALID_LENGTH,
            });
        }
        let es_result = self.get_report(&req.data, rsp, fw_err)?;
        if (req.certs_len as usize) < self.certs.len() {
            return Err(CocoError::CertBufferTooSmall {
                provided: req.certs_len as usize,
                required: self.certs.len(),
            });
        }
        let provided = req.certs.len();
        let Some(out) = req.certs.get_mut(..self.certs.len()) else {
            return Err(CocoError::CertBufferTooSmall {
                provided,
                required: self.certs.len(),
            });
        };
        out.copy_from_slice(&self.certs);
        Ok(es_result)
    }

    fn get_derived_key(&self, req: &DerivedKeyReq, rsp: &mut DerivedKeyRsp) -> Result<EsResult> {
        if self.keys.is_empty() {
            return Err(CocoError::NoKeys);
        }
        let lookup = req.lookup_key();
        let Some(key) = self.keys.get(&lookup) else {
            return Err(CocoError::UnmappedKey(lookup));
        };
        let len = key.len().min(rsp.key.len());
        rsp.key[..len].copy_from_slice(&key[..len]);
        rsp.status = 0;
        Ok(EsResult::Ok)
    }

    /// Answers `request` according to its payload.
    pub fn dispatch(&mut self, request: &mut GuestRequest<'_>) -> Result<EsResult> {
        if !self.is_open {
            return Err(CocoError::NotOpen);
        }
        debug!("dispatching {:?}", request.command());
        let fw_err = &mut request.fw_err;
        match &mut request.payload {
            GuestPayload::Report { req, rsp } => self.get_report(req, rsp, fw_err),
            GuestPayload::ExtReport { req, rsp } => self.get_ext_report(req, rsp, fw_err),
            GuestPayload::DerivedKey { req, rsp } => self.get_derived_key(req, rsp),
        }
    }
}

impl GuestDevice for MockDevice {
    fn open(&mut self, path: &str) -> Result<()> {
        if self.is_open {
            return Err(CocoError::AlreadyOpen);
        }
        debug!("opening mock device in place of {path}");
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(CocoError::AlreadyClosed);
        }
        self.is_open = false;
        Ok(())
    }

    fn ioctl(&mut self, command: u64, request: &mut GuestRequest<'_>) -> Result<EsResult> {
        match GuestIoctl::from_command(command) {
            Some(ioctl) if ioctl == request.command() => self.dispatch(request),
            _ => Err(CocoError::InvalidCommand(command)),
        }
    }

    fn product(&self) -> SevProduct {
        self.sev_product.unwrap_or(DEFAULT_SEV_PRODUCT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certs_len_field() {
        assert_eq!(certs_len_field(0), Ok(0));
        assert_eq!(certs_len_field(u32::MAX as usize), Ok(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_certs_len_field_rejects_overflow() {
        assert!(matches!(
            certs_len_field(u32::MAX as usize + 1),
            Err(CocoError::IO(_))
        ));
    }
}
