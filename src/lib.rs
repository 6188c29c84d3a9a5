//! Deterministic SEV-SNP test doubles for attestation clients.
//!
//! * [MockDevice] stands in for `/dev/sev-guest`: canned reports keyed by
//!   their report data, signed on the fly, plus certificates and derived keys.
//! * [MockQuoteProvider] serves the same reports as one configfs-style quote.
//! * [MockGetter] stands in for the HTTPS endpoints (AMD KDS and the like).
//!
//! None of the doubles lock internally. Each belongs to the test that built it.

pub mod coco;
pub mod error;
pub mod fixture;
pub mod getter;
pub mod kds;
pub mod product;
pub mod signer;
pub mod snp;
pub mod utils;

pub use coco::client::GuestClient;
pub use coco::mock::{GetReportResponse, MockDevice};
pub use coco::quote::MockQuoteProvider;
pub use coco::{GuestDevice, QuoteProvider};
pub use error::{CocoError, Result};
pub use getter::{
    ContextHttpsGetter, FetchContext, GetError, GetResponse, HttpsGetter, MockGetter, Uses,
};
pub use product::{SevProduct, SevProductName, DEFAULT_SEV_PRODUCT};
pub use signer::{AmdSigner, ReportSigner};

#[cfg(test)]
#[path = "./tests/device-test.rs"]
mod device_tests;

#[cfg(test)]
#[path = "./tests/getter-test.rs"]
mod getter_tests;
