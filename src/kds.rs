//! AMD Key Distribution Service paths, fetched through any [HttpsGetter].
//!
//! Tests program a [MockGetter](crate::getter::MockGetter) with these URLs to
//! stand in for `kdsintf.amd.com`.

use crate::getter::{GetError, HttpsGetter};
use crate::product::{SevProduct, SevProductName};
use log::debug;
use pem::{parse_many, Pem};
use thiserror::Error;

pub const KDS_CERT_SITE: &str = "https://kdsintf.amd.com";
pub const KDS_VCEK: &str = "/vcek/v1";
pub const KDS_CERT_CHAIN: &str = "cert_chain";

#[derive(Error, Debug)]
pub enum KdsError {
    #[error("PEM parsing error: {0}")]
    Pem(#[from] pem::PemError),
    #[error("Http error: {0}")]
    Get(#[from] GetError),
    #[error("Certificate chain parsing error: expected 2 certificates, found {0}")]
    InvalidChainLength(usize),
    #[error("no KDS path for product {0:?}")]
    UnsupportedProduct(SevProductName),
}

/// Security patch levels that select a VCEK.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcbParts {
    pub bl_spl: u8,
    pub tee_spl: u8,
    pub snp_spl: u8,
    pub ucode_spl: u8,
}

impl TcbParts {
    /// Splits a raw TCB_VERSION in the Milan/Genoa layout: bootloader in byte 0,
    /// TEE in byte 1, SNP in byte 6 and microcode in byte 7.
    pub fn from_raw(tcb_version: u64) -> Self {
        let bytes = tcb_version.to_le_bytes();
        Self {
            bl_spl: bytes[0],
            tee_spl: bytes[1],
            snp_spl: bytes[6],
            ucode_spl: bytes[7],
        }
    }
}

/// ASK and ARK of a product, in the order KDS serves them.
#[derive(Clone, Debug, PartialEq)]
pub struct AmdChainPem {
    pub ask: Pem,
    pub ark: Pem,
}

fn product_name(product: &SevProduct) -> Result<&'static str, KdsError> {
    product
        .name
        .kds_name()
        .ok_or(KdsError::UnsupportedProduct(product.name))
}

pub fn cert_chain_url(product: &SevProduct) -> Result<String, KdsError> {
    let name = product_name(product)?;
    Ok(format!("{KDS_CERT_SITE}{KDS_VCEK}/{name}/{KDS_CERT_CHAIN}"))
}

pub fn vcek_url(product: &SevProduct, chip_id: &[u8], tcb: &TcbParts) -> Result<String, KdsError> {
    let name = product_name(product)?;
    let hw_id = hex::encode(chip_id);
    Ok(format!(
        "{KDS_CERT_SITE}{KDS_VCEK}/{name}/{hw_id}?blSPL={:02}&teeSPL={:02}&snpSPL={:02}&ucodeSPL={:02}",
        tcb.bl_spl, tcb.tee_spl, tcb.snp_spl, tcb.ucode_spl
    ))
}

/// Retrieve the AMD chain of trust (ASK & ARK) for `product`.
pub fn fetch_cert_chain(
    getter: &mut impl HttpsGetter,
    product: &SevProduct,
) -> Result<AmdChainPem, KdsError> {
    let url = cert_chain_url(product)?;
    let bytes = getter.get(&url)?;

    let pem_objects = parse_many(&bytes)?;
    let [ask, ark]: [Pem; 2] = pem_objects
        .try_into()
        .map_err(|objects: Vec<Pem>| KdsError::InvalidChainLength(objects.len()))?;

    Ok(AmdChainPem { ask, ark })
}

/// Retrieve the DER-encoded VCEK for a chip at the given TCB.
pub fn fetch_vcek(
    getter: &mut impl HttpsGetter,
    product: &SevProduct,
    chip_id: &[u8],
    tcb: &TcbParts,
) -> Result<Vec<u8>, KdsError> {
    let url = vcek_url(product, chip_id, tcb)?;
    debug!("Fetching VCEK from URL: {url}");
    let bytes = getter.get(&url)?;
    debug!("Received {} bytes from KDS", bytes.len());
    Ok(bytes)
}
