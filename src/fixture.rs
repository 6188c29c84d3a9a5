//! JSON descriptions of a programmed device or getter.
//!
//! Byte strings are hex encoded. Everything but the report data of a report
//! and the key of a derived key may be left out.

use crate::coco::mock::{GetReportResponse, MockDevice};
use crate::error::{CocoError, Result};
use crate::getter::{GetResponse, MockGetter, Uses};
use crate::product::SevProduct;
use crate::signer::ReportSigner;
use crate::snp::abi::{DerivedKeyReq, EsResult, REPORT_DATA_SIZE};
use crate::snp::error::FirmwareStatus;
use crate::snp::report::{report_template, REPORT_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFixture {
    #[serde(default)]
    pub reports: Vec<ReportFixture>,
    #[serde(default)]
    pub keys: Vec<KeyFixture>,
    #[serde(default)]
    pub certs: String,
    #[serde(default)]
    pub product: Option<SevProduct>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFixture {
    pub report_data: String,
    /// Full report body. A template carrying the report data is used when absent.
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub es_result: EsResult,
    #[serde(default)]
    pub fw_err: FirmwareStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFixture {
    #[serde(default)]
    pub root_key_select: u32,
    #[serde(default)]
    pub guest_field_select: u64,
    #[serde(default)]
    pub vmpl: u32,
    #[serde(default)]
    pub guest_svn: u32,
    #[serde(default)]
    pub tcb_version: u64,
    pub key: String,
}

fn decode_array<const N: usize>(what: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CocoError::IO(format!("{what} is {len} bytes, expected {N}")))
}

impl ReportFixture {
    pub fn response(&self) -> Result<([u8; REPORT_DATA_SIZE], GetReportResponse)> {
        let report_data = decode_array::<REPORT_DATA_SIZE>("report data", &self.report_data)?;
        let report = match &self.report {
            Some(report) => decode_array::<REPORT_SIZE>("report", report)?,
            None => report_template(&report_data),
        };
        let response = GetReportResponse::new(report)
            .with_es_result(self.es_result)
            .with_fw_err(self.fw_err);
        Ok((report_data, response))
    }
}

impl KeyFixture {
    pub fn request(&self) -> DerivedKeyReq {
        DerivedKeyReq::new(
            self.root_key_select,
            self.guest_field_select,
            self.vmpl,
            self.guest_svn,
            self.tcb_version,
        )
    }
}

impl DeviceFixture {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Programs a closed [MockDevice] signing with `signer`.
    pub fn build(&self, signer: impl ReportSigner + 'static) -> Result<MockDevice> {
        let mut device = MockDevice::new(signer).with_certs(hex::decode(&self.certs)?);
        for report in &self.reports {
            let (report_data, response) = report.response()?;
            device = device.with_report(&report_data, response);
        }
        for key in &self.keys {
            device = device.with_key(&key.request(), hex::decode(&key.key)?);
        }
        device.sev_product = self.product;
        Ok(device)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetterFixture {
    pub responses: BTreeMap<String, Vec<ResponseFixture>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFixture {
    /// How often the response is served. Absent means forever.
    #[serde(default)]
    pub occurrences: Option<u64>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ResponseFixture {
    pub fn response(&self) -> Result<GetResponse> {
        Ok(GetResponse {
            uses: self.occurrences.map_or(Uses::Forever, Uses::Times),
            body: hex::decode(&self.body)?,
            error: self.error.clone(),
        })
    }
}

impl GetterFixture {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn build(&self) -> Result<MockGetter> {
        let mut getter = MockGetter::new();
        for (url, responses) in &self.responses {
            for response in responses {
                getter = getter.with_response(url.as_str(), response.response()?);
            }
        }
        Ok(getter)
    }
}
