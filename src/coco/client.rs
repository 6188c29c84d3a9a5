//! Guest-side driver of a [GuestDevice], issuing requests the way attestation
//! client libraries do against `/dev/sev-guest`.

use crate::coco::{GuestDevice, SEV_GUEST_PATH};
use crate::error::{CocoError, Result};
use crate::snp::abi::{
    DerivedKeyReq, DerivedKeyRsp, ExtReportReq, GuestPayload, GuestRequest, ReportReq, ReportRsp,
    DERIVED_KEY_SIZE, REPORT_DATA_SIZE, SNP_GET_DERIVED_KEY, SNP_GET_EXT_REPORT, SNP_GET_REPORT,
};
use crate::snp::error::{map_fw_err, FirmwareStatus, VmmError};
use crate::snp::report::REPORT_SIZE;
use crate::snp::types::{parse_cert_table, CertTableEntry, DerivedKey};

/// Keeps the simulated I/O error unless the firmware status says more.
fn map_ioctl_err(err: CocoError, fw_err: FirmwareStatus) -> CocoError {
    match err {
        CocoError::Io { .. } if !fw_err.is_success() => map_fw_err(fw_err),
        other => other,
    }
}

#[derive(Debug)]
pub struct GuestClient<D: GuestDevice> {
    device: D,
    message_version: Option<u32>,
}

impl<D: GuestDevice> GuestClient<D> {
    /// Opens `device` at the standard `sev-guest` path.
    pub fn open(mut device: D) -> Result<Self> {
        device.open(SEV_GUEST_PATH)?;
        Ok(Self {
            device,
            message_version: None,
        })
    }

    /// Message version used for every request. Defaults to `1`.
    pub fn with_message_version(mut self, version: u32) -> Self {
        self.message_version = Some(version);
        self
    }

    /// Closes the device and hands it back.
    pub fn close(mut self) -> Result<D> {
        self.device.close()?;
        Ok(self.device)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Requests an attestation report.
    pub fn get_report(
        &mut self,
        data: Option<[u8; REPORT_DATA_SIZE]>,
        vmpl: Option<u32>,
    ) -> Result<[u8; REPORT_SIZE]> {
        let input = ReportReq::new(data, vmpl)?;
        let mut response = ReportRsp::default();

        let mut request = GuestRequest::new(
            self.message_version,
            GuestPayload::Report {
                req: &input,
                rsp: &mut response,
            },
        );
        self.device
            .ioctl(SNP_GET_REPORT, &mut request)
            .map_err(|e| map_ioctl_err(e, request.fw_err))?;

        // Make sure response status is successful
        if response.status != 0 {
            return Err(CocoError::Firmware(format!(
                "SEV error code: {}",
                response.status
            )));
        }

        Ok(response.report)
    }

    /// Requests an extended attestation report and the host's certificate table.
    ///
    /// Sizes the certificate buffer with a zero-length probe first, then retries
    /// with a buffer of the length the device asked for.
    pub fn get_ext_report(
        &mut self,
        data: Option<[u8; REPORT_DATA_SIZE]>,
        vmpl: Option<u32>,
    ) -> Result<([u8; REPORT_SIZE], Option<Vec<CertTableEntry>>)> {
        let report_request = ReportReq::new(data, vmpl)?;
        let mut ext_report_request = ExtReportReq::new(&report_request);
        let mut report_response = ReportRsp::default();

        let probe = {
            let mut guest_request = GuestRequest::new(
                self.message_version,
                GuestPayload::ExtReport {
                    req: &mut ext_report_request,
                    rsp: &mut report_response,
                },
            );
            self.device
                .ioctl(SNP_GET_EXT_REPORT, &mut guest_request)
                .map_err(|e| (e, guest_request.fw_err))
        };

        match probe {
            Ok(_) => {}
            Err((CocoError::Io { .. }, fw_err))
                if VmmError::from(fw_err) == VmmError::InvalidCertificatePageLength =>
            {
                if ext_report_request.certs_len == 0 {
                    // Nothing loaded by the host, a plain report is all there is.
                    return Ok((self.get_report(data, vmpl)?, None));
                }
                ext_report_request.resize_certs(ext_report_request.certs_len);
                let mut guest_request_retry = GuestRequest::new(
                    self.message_version,
                    GuestPayload::ExtReport {
                        req: &mut ext_report_request,
                        rsp: &mut report_response,
                    },
                );
                self.device
                    .ioctl(SNP_GET_EXT_REPORT, &mut guest_request_retry)
                    .map_err(|e| map_ioctl_err(e, guest_request_retry.fw_err))?;
            }
            Err((err, fw_err)) => return Err(map_ioctl_err(err, fw_err)),
        }

        if report_response.status != 0 {
            return Err(CocoError::Firmware(format!(
                "SEV error code: {}",
                report_response.status
            )));
        }

        if ext_report_request.certs_len == 0 {
            return Ok((report_response.report, None));
        }

        let mut certificates = parse_cert_table(&ext_report_request.certs)?;
        certificates.sort();

        Ok((report_response.report, Some(certificates)))
    }

    /// Fetches the certificates the host loaded. The report requested over
    /// `report_data` along the way is discarded.
    pub fn get_certificates(
        &mut self,
        report_data: [u8; REPORT_DATA_SIZE],
    ) -> Result<Vec<CertTableEntry>> {
        let (_, certificates) = self.get_ext_report(Some(report_data), None)?;

        certificates.ok_or(CocoError::Firmware(
            "No certificates were loaded by the host!".to_string(),
        ))
    }

    /// Fetches a derived key.
    pub fn get_derived_key(
        &mut self,
        derived_key_request: DerivedKey,
    ) -> Result<[u8; DERIVED_KEY_SIZE]> {
        let ffi_derived_key_request: DerivedKeyReq = derived_key_request.into();
        let mut ffi_derived_key_response = DerivedKeyRsp::default();

        let mut request = GuestRequest::new(
            self.message_version,
            GuestPayload::DerivedKey {
                req: &ffi_derived_key_request,
                rsp: &mut ffi_derived_key_response,
            },
        );
        self.device
            .ioctl(SNP_GET_DERIVED_KEY, &mut request)
            .map_err(|e| map_ioctl_err(e, request.fw_err))?;

        if ffi_derived_key_response.status != 0 {
            return Err(CocoError::Firmware(format!(
                "SEV Error code: {}",
                ffi_derived_key_response.status
            )));
        }

        Ok(ffi_derived_key_response.key)
    }
}
