use crate::coco::client::GuestClient;
use crate::coco::mock::{GetReportResponse, MockDevice};
use crate::coco::{GuestDevice, SEV_GUEST_PATH};
use crate::error::{CocoError, Result};
use crate::signer::{verify_report, AmdSigner, ReportSigner};
use crate::snp::abi::{
    DerivedKeyReq, DerivedKeyRsp, EsResult, ExtReportReq, GuestPayload, GuestRequest, ReportReq,
    ReportRsp, REPORT_DATA_SIZE, SNP_GET_DERIVED_KEY, SNP_GET_EXT_REPORT, SNP_GET_REPORT,
};
use crate::snp::error::{FirmwareStatus, GUEST_REQUEST_INVALID_LENGTH};
use crate::snp::report::{report_data_of, report_template, ReportSignature, REPORT_SIZE};
use crate::snp::types::{build_cert_table, CertTableEntry, CertType, DerivedKey, GuestFieldSelect};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DATA_A: [u8; REPORT_DATA_SIZE] = [0xAA; REPORT_DATA_SIZE];
const DATA_B: [u8; REPORT_DATA_SIZE] = [0xBB; REPORT_DATA_SIZE];
const DATA_FAIL: [u8; REPORT_DATA_SIZE] = [0xFF; REPORT_DATA_SIZE];

/// Counts signatures so tests can tell whether a request signed anything.
#[derive(Debug, Clone)]
struct CountingSigner {
    inner: AmdSigner,
    count: Arc<AtomicUsize>,
}

impl ReportSigner for CountingSigner {
    fn sign(&self, message: &[u8]) -> Result<ReportSignature> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(message)
    }
}

fn signer() -> AmdSigner {
    AmdSigner::new(&[0x07; 48]).unwrap()
}

fn certs() -> Vec<u8> {
    build_cert_table(&[
        CertTableEntry::new(CertType::VCEK, b"vcek-der".to_vec()),
        CertTableEntry::new(CertType::ARK, b"ark-der".to_vec()),
        CertTableEntry::new(CertType::ASK, b"ask-der".to_vec()),
    ])
    .unwrap()
}

fn device() -> (MockDevice, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let signer = CountingSigner {
        inner: signer(),
        count: count.clone(),
    };
    let mut device = MockDevice::new(signer)
        .with_report(&DATA_A, GetReportResponse::new(report_template(&DATA_A)))
        .with_report(
            &DATA_FAIL,
            GetReportResponse::new(report_template(&DATA_FAIL))
                .with_es_result(EsResult::VmmError)
                .with_fw_err(0x16u64),
        )
        .with_certs(certs());
    device.open(SEV_GUEST_PATH).unwrap();
    (device, count)
}

fn report_request(
    device: &mut MockDevice,
    data: [u8; REPORT_DATA_SIZE],
) -> (Result<EsResult>, ReportRsp, FirmwareStatus) {
    let req = ReportReq::new(Some(data), None).unwrap();
    let mut rsp = ReportRsp::default();
    let mut request = GuestRequest::new(None, GuestPayload::Report { req: &req, rsp: &mut rsp });
    let result = device.ioctl(SNP_GET_REPORT, &mut request);
    let fw_err = request.fw_err;
    (result, rsp, fw_err)
}

#[test]
fn test_registered_report_is_signed_then_unregistered_fails() {
    let (mut device, count) = device();

    let (result, rsp, fw_err) = report_request(&mut device, DATA_A);
    assert_eq!(result, Ok(EsResult::Ok));
    assert!(fw_err.is_success());
    assert_eq!(rsp.status, 0);
    assert_eq!(rsp.report_size, REPORT_SIZE as u32);
    assert_eq!(report_data_of(&rsp.report).unwrap(), DATA_A);
    verify_report(&rsp.report, &signer().verifying_key()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let (result, _, _) = report_request(&mut device, DATA_B);
    assert!(matches!(result, Err(CocoError::NoResponse(_))));
}

#[test]
fn test_configured_es_result_is_returned() {
    let (device, _) = device();
    let mut device = device.with_report(
        &DATA_B,
        GetReportResponse::new(report_template(&DATA_B)).with_es_result(EsResult::Retry),
    );
    let (result, rsp, _) = report_request(&mut device, DATA_B);
    assert_eq!(result, Ok(EsResult::Retry));
    verify_report(&rsp.report, &signer().verifying_key()).unwrap();
}

#[test]
fn test_canned_report_is_not_modified_by_signing() {
    let (mut device, _) = device();
    let (_, rsp, _) = report_request(&mut device, DATA_A);
    assert_ne!(rsp.report, report_template(&DATA_A));
    assert_eq!(
        device.report_data_rsp[&hex::encode(DATA_A)].report,
        report_template(&DATA_A)
    );
}

#[test]
fn test_firmware_error_leaves_response_untouched() {
    let (mut device, count) = device();
    let (result, rsp, fw_err) = report_request(&mut device, DATA_FAIL);

    let err = result.unwrap_err();
    assert!(err.is_io());
    assert_eq!(err.es_result(), Some(EsResult::VmmError));
    assert_eq!(fw_err, FirmwareStatus(0x16));
    assert_eq!(rsp, ReportRsp::default());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_ext_report_firmware_error_leaves_buffers_untouched() {
    let (mut device, count) = device();
    let req = ReportReq::new(Some(DATA_FAIL), None).unwrap();
    let mut ext = ExtReportReq::new(&req);
    ext.certs = vec![0xEE; certs().len()];
    ext.certs_len = certs().len() as u32;
    let mut rsp = ReportRsp::default();

    let mut request = GuestRequest::new(
        None,
        GuestPayload::ExtReport {
            req: &mut ext,
            rsp: &mut rsp,
        },
    );
    let err = device.ioctl(SNP_GET_EXT_REPORT, &mut request).unwrap_err();
    assert_eq!(request.fw_err, FirmwareStatus(0x16));

    assert!(err.is_io());
    assert_eq!(err.es_result(), Some(EsResult::VmmError));
    assert!(ext.certs.iter().all(|b| *b == 0xEE));
    assert_eq!(rsp, ReportRsp::default());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dispatch_serves_typed_request() {
    let (mut device, count) = device();
    let req = ReportReq::new(Some(DATA_A), None).unwrap();
    let mut rsp = ReportRsp::default();
    let mut request = GuestRequest::new(None, GuestPayload::Report { req: &req, rsp: &mut rsp });

    assert_eq!(device.dispatch(&mut request), Ok(EsResult::Ok));
    assert!(request.fw_err.is_success());
    assert_eq!(rsp.status, 0);
    assert_eq!(report_data_of(&rsp.report).unwrap(), DATA_A);
    verify_report(&rsp.report, &signer().verifying_key()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ext_report_probe_returns_length_without_signing() {
    let (mut device, count) = device();
    let req = ReportReq::new(Some(DATA_A), None).unwrap();
    let mut ext = ExtReportReq::new(&req);
    let mut rsp = ReportRsp::default();

    let mut request = GuestRequest::new(
        None,
        GuestPayload::ExtReport {
            req: &mut ext,
            rsp: &mut rsp,
        },
    );
    let err = device.ioctl(SNP_GET_EXT_REPORT, &mut request).unwrap_err();
    assert_eq!(request.fw_err, GUEST_REQUEST_INVALID_LENGTH);

    assert_eq!(err.es_result(), Some(EsResult::Ok));
    assert_eq!(ext.certs_len as usize, certs().len());
    assert_eq!(rsp, ReportRsp::default());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_ext_report_small_buffer_is_not_copied() {
    let (mut device, _) = device();
    let req = ReportReq::new(Some(DATA_A), None).unwrap();
    let short = certs().len() as u32 - 1;
    let mut ext = ExtReportReq::new(&req);
    ext.certs = vec![0xEE; short as usize];
    ext.certs_len = short;
    let mut rsp = ReportRsp::default();

    let mut request = GuestRequest::new(
        None,
        GuestPayload::ExtReport {
            req: &mut ext,
            rsp: &mut rsp,
        },
    );
    let result = device.ioctl(SNP_GET_EXT_REPORT, &mut request);
    assert!(matches!(
        result,
        Err(CocoError::CertBufferTooSmall { provided, required })
            if provided == short as usize && required == short as usize + 1
    ));
    assert!(ext.certs.iter().all(|b| *b == 0xEE));
}

#[test]
fn test_ext_report_copies_certs() {
    let (mut device, _) = device();
    let req = ReportReq::new(Some(DATA_A), None).unwrap();
    let mut ext = ExtReportReq::new(&req);
    ext.resize_certs(certs().len() as u32 + 16);
    let mut rsp = ReportRsp::default();

    let mut request = GuestRequest::new(
        None,
        GuestPayload::ExtReport {
            req: &mut ext,
            rsp: &mut rsp,
        },
    );
    assert_eq!(device.ioctl(SNP_GET_EXT_REPORT, &mut request), Ok(EsResult::Ok));
    assert_eq!(&ext.certs[..certs().len()], certs().as_slice());
    verify_report(&rsp.report, &signer().verifying_key()).unwrap();
}

fn derive(device: &mut MockDevice, req: DerivedKeyReq) -> Result<DerivedKeyRsp> {
    let mut rsp = DerivedKeyRsp::default();
    let mut request = GuestRequest::new(
        None,
        GuestPayload::DerivedKey {
            req: &req,
            rsp: &mut rsp,
        },
    );
    device.ioctl(SNP_GET_DERIVED_KEY, &mut request)?;
    Ok(rsp)
}

#[test]
fn test_derived_key_lookup_is_exact() {
    let (mut device, _) = device();
    assert_eq!(
        derive(&mut device, DerivedKeyReq::default()),
        Err(CocoError::NoKeys)
    );

    let mapped = DerivedKeyReq::new(1, 0x3f, 2, 3, 0x1503_0000_0000_0204);
    device = device.with_key(&mapped, vec![0x5A; 32]);
    assert_eq!(derive(&mut device, mapped).unwrap().key, [0x5A; 32]);

    let neighbours = [
        DerivedKeyReq::new(0, 0x3f, 2, 3, 0x1503_0000_0000_0204),
        DerivedKeyReq::new(1, 0x3e, 2, 3, 0x1503_0000_0000_0204),
        DerivedKeyReq::new(1, 0x3f, 1, 3, 0x1503_0000_0000_0204),
        DerivedKeyReq::new(1, 0x3f, 2, 4, 0x1503_0000_0000_0204),
        DerivedKeyReq::new(1, 0x3f, 2, 3, 0x1503_0000_0000_0205),
    ];
    for req in neighbours {
        assert!(matches!(
            derive(&mut device, req),
            Err(CocoError::UnmappedKey(_))
        ));
    }
}

#[test]
fn test_open_close_and_command_checks() {
    let (mut device, _) = device();
    assert_eq!(device.open(SEV_GUEST_PATH), Err(CocoError::AlreadyOpen));

    let req = DerivedKeyReq::default();
    let mut rsp = DerivedKeyRsp::default();
    let mut request = GuestRequest::new(
        None,
        GuestPayload::DerivedKey {
            req: &req,
            rsp: &mut rsp,
        },
    );
    assert_eq!(
        device.ioctl(SNP_GET_REPORT, &mut request),
        Err(CocoError::InvalidCommand(SNP_GET_REPORT))
    );
    assert_eq!(
        device.ioctl(0xC020_5303, &mut request),
        Err(CocoError::InvalidCommand(0xC020_5303))
    );

    device.close().unwrap();
    assert_eq!(device.close(), Err(CocoError::AlreadyClosed));
    assert_eq!(device.dispatch(&mut request), Err(CocoError::NotOpen));
    assert_eq!(
        device.ioctl(SNP_GET_DERIVED_KEY, &mut request),
        Err(CocoError::NotOpen)
    );
}

#[test]
fn test_client_ext_report_and_certificates() {
    let (mut device, _) = device();
    device.close().unwrap();
    let mut client = GuestClient::open(device).unwrap();

    let (report, certificates) = client.get_ext_report(Some(DATA_A), Some(0)).unwrap();
    verify_report(&report, &signer().verifying_key()).unwrap();
    let certificates = certificates.unwrap();
    let types: Vec<CertType> = certificates.iter().map(|c| c.cert_type.clone()).collect();
    assert_eq!(types, vec![CertType::ARK, CertType::VCEK, CertType::ASK]);
    assert_eq!(certificates[1].data(), b"vcek-der");

    assert_eq!(client.get_certificates(DATA_A).unwrap(), certificates);
    assert!(matches!(
        client.get_certificates(DATA_B),
        Err(CocoError::NoResponse(_))
    ));

    let device = client.close().unwrap();
    assert!(!device.is_open());
}

#[test]
fn test_client_without_certs_falls_back_to_report() {
    let (device, count) = device();
    let mut device = device.with_certs(Vec::new());
    device.close().unwrap();
    let mut client = GuestClient::open(device).unwrap().with_message_version(2);

    let (report, certificates) = client.get_ext_report(Some(DATA_A), None).unwrap();
    assert!(certificates.is_none());
    verify_report(&report, &signer().verifying_key()).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(matches!(
        client.get_certificates(DATA_A),
        Err(CocoError::Firmware(_))
    ));
}

#[test]
fn test_client_maps_firmware_status() {
    let (mut device, _) = device();
    device.close().unwrap();
    let mut client = GuestClient::open(device).unwrap();
    assert!(matches!(
        client.get_report(Some(DATA_FAIL), None),
        Err(CocoError::Firmware(_))
    ));
    assert!(matches!(
        client.get_report(Some(DATA_B), None),
        Err(CocoError::NoResponse(_))
    ));
    assert!(matches!(
        client.get_report(Some(DATA_A), Some(4)),
        Err(CocoError::Firmware(_))
    ));
    let report = client.get_report(Some(DATA_A), Some(1)).unwrap();
    assert_eq!(report_data_of(&report).unwrap(), DATA_A);
}

#[test]
fn test_client_derived_key() {
    let (device, _) = device();
    let mut device = device.with_key(&DerivedKeyReq::new(0, 1, 1, 0, 0), vec![0x11; 32]);
    device.close().unwrap();
    let mut client = GuestClient::open(device).unwrap();

    let request = DerivedKey::new(false, GuestFieldSelect(1), 1, 0, 0);
    assert_eq!(client.get_derived_key(request).unwrap(), [0x11; 32]);

    let other = DerivedKey::new(true, GuestFieldSelect(1), 1, 0, 0);
    assert!(matches!(
        client.get_derived_key(other),
        Err(CocoError::UnmappedKey(_))
    ));
    assert_eq!(client.device().keys.len(), 1);

    let other_req = DerivedKeyReq::from(other);
    client
        .device_mut()
        .keys
        .insert(other_req.lookup_key(), vec![0x22; 32]);
    assert_eq!(client.get_derived_key(other).unwrap(), [0x22; 32]);
    assert_eq!(client.device().keys.len(), 2);
}
