//! Report signing capability and a VCEK-like P-384 implementation of it.

use crate::error::{CocoError, Result};
use crate::snp::report::{self, ReportSignature, SCALAR_SIZE};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha384};
use signature::{DigestSigner, DigestVerifier};
use std::fmt::Debug;

/// Signs the signed component of attestation reports.
pub trait ReportSigner: Debug + Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<ReportSignature>;
}

/// ECDSA P-384 / SHA-384 signer standing in for the chip's VCEK.
#[derive(Clone)]
pub struct AmdSigner {
    vcek: SigningKey,
}

impl Debug for AmdSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmdSigner")
            .field("vcek", &self.verifying_key())
            .finish()
    }
}

impl AmdSigner {
    /// Deterministic signer from a big-endian P-384 secret scalar.
    pub fn new(secret: &[u8; SCALAR_SIZE]) -> Result<Self> {
        let vcek = SigningKey::from_slice(secret)
            .map_err(|e| CocoError::Signing(format!("invalid VCEK secret: {e}")))?;
        Ok(Self { vcek })
    }

    pub fn random() -> Self {
        Self {
            vcek: SigningKey::random(&mut OsRng),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.vcek)
    }
}

impl ReportSigner for AmdSigner {
    fn sign(&self, message: &[u8]) -> Result<ReportSignature> {
        let digest = Sha384::new_with_prefix(message);
        let signature: Signature = self
            .vcek
            .try_sign_digest(digest)
            .map_err(|e| CocoError::Signing(format!("could not sign report: {e}")))?;
        // r || s, big-endian
        let bytes = signature.to_bytes();
        let mut embedded = ReportSignature {
            r: [0u8; SCALAR_SIZE],
            s: [0u8; SCALAR_SIZE],
        };
        embedded.r.copy_from_slice(&bytes[..SCALAR_SIZE]);
        embedded.s.copy_from_slice(&bytes[SCALAR_SIZE..]);
        Ok(embedded)
    }
}

/// Checks the signature embedded in `report` against `vcek`.
pub fn verify_report(report: &[u8], vcek: &VerifyingKey) -> Result<()> {
    let embedded = report::signature_of(report)?;
    let mut raw = [0u8; 2 * SCALAR_SIZE];
    raw[..SCALAR_SIZE].copy_from_slice(&embedded.r);
    raw[SCALAR_SIZE..].copy_from_slice(&embedded.s);
    let signature = Signature::from_slice(&raw)
        .map_err(|e| CocoError::Signing(format!("malformed report signature: {e}")))?;

    let digest = Sha384::new_with_prefix(report::signed_component(report)?);
    vcek.verify_digest(digest, &signature)
        .map_err(|_| CocoError::Signing("report signature does not verify".to_string()))
}
