//! Attestation report layout: the signed component and the embedded ECDSA signature.

use super::abi::REPORT_DATA_SIZE;
use crate::error::{CocoError, Result};

pub const REPORT_SIZE: usize = 0x4A0;

/// Bytes `[0, SIGNATURE_OFFSET)` are what the VCEK signs.
pub const SIGNATURE_OFFSET: usize = 0x2A0;

const SIGNATURE_COMPONENT_SIZE: usize = 72;
const SIGNATURE_R_OFFSET: usize = SIGNATURE_OFFSET;
const SIGNATURE_S_OFFSET: usize = SIGNATURE_R_OFFSET + SIGNATURE_COMPONENT_SIZE;

const VERSION_OFFSET: usize = 0x00;
const SIGNATURE_ALGO_OFFSET: usize = 0x34;
const REPORT_DATA_OFFSET: usize = 0x50;

pub const REPORT_VERSION: u32 = 2;
pub const ECDSA_P384_SHA384: u32 = 1;

/// P-384 scalar length in bytes.
pub const SCALAR_SIZE: usize = 48;

/// An ECDSA signature as big-endian `r` and `s` scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportSignature {
    pub r: [u8; SCALAR_SIZE],
    pub s: [u8; SCALAR_SIZE],
}

fn check_len(report: &[u8]) -> Result<()> {
    if report.len() < REPORT_SIZE {
        return Err(CocoError::Report(format!(
            "report is {} bytes, expected at least {REPORT_SIZE}",
            report.len()
        )));
    }
    Ok(())
}

/// The portion of the report covered by the signature.
pub fn signed_component(report: &[u8]) -> Result<&[u8]> {
    check_len(report)?;
    Ok(&report[..SIGNATURE_OFFSET])
}

/// Writes `signature` into the report. Each scalar is stored little-endian and
/// zero-padded to 72 bytes.
pub fn set_signature(signature: &ReportSignature, report: &mut [u8]) -> Result<()> {
    check_len(report)?;
    write_component(&signature.r, &mut report[SIGNATURE_R_OFFSET..SIGNATURE_S_OFFSET]);
    write_component(
        &signature.s,
        &mut report[SIGNATURE_S_OFFSET..SIGNATURE_S_OFFSET + SIGNATURE_COMPONENT_SIZE],
    );
    Ok(())
}

/// Reads the embedded signature back out of a report.
pub fn signature_of(report: &[u8]) -> Result<ReportSignature> {
    check_len(report)?;
    let r = read_component(&report[SIGNATURE_R_OFFSET..SIGNATURE_S_OFFSET])?;
    let s = read_component(
        &report[SIGNATURE_S_OFFSET..SIGNATURE_S_OFFSET + SIGNATURE_COMPONENT_SIZE],
    )?;
    Ok(ReportSignature { r, s })
}

pub fn report_data_of(report: &[u8]) -> Result<[u8; REPORT_DATA_SIZE]> {
    check_len(report)?;
    let mut data = [0u8; REPORT_DATA_SIZE];
    data.copy_from_slice(&report[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_SIZE]);
    Ok(data)
}

/// A minimal unsigned version 2 report carrying `report_data`, suitable as a
/// canned response body.
pub fn report_template(report_data: &[u8; REPORT_DATA_SIZE]) -> [u8; REPORT_SIZE] {
    let mut report = [0u8; REPORT_SIZE];
    report[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&REPORT_VERSION.to_le_bytes());
    report[SIGNATURE_ALGO_OFFSET..SIGNATURE_ALGO_OFFSET + 4]
        .copy_from_slice(&ECDSA_P384_SHA384.to_le_bytes());
    report[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_SIZE].copy_from_slice(report_data);
    report
}

fn write_component(scalar: &[u8; SCALAR_SIZE], out: &mut [u8]) {
    out.fill(0);
    for (dst, src) in out.iter_mut().zip(scalar.iter().rev()) {
        *dst = *src;
    }
}

fn read_component(field: &[u8]) -> Result<[u8; SCALAR_SIZE]> {
    if field[SCALAR_SIZE..].iter().any(|b| *b != 0) {
        return Err(CocoError::Report(
            "signature component exceeds 48 bytes".to_string(),
        ));
    }
    let mut scalar = [0u8; SCALAR_SIZE];
    for (dst, src) in scalar.iter_mut().zip(field[..SCALAR_SIZE].iter().rev()) {
        *dst = *src;
    }
    Ok(scalar)
}
