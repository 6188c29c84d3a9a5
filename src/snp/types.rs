use crate::error::{CocoError::CertTable, Result};
use crate::product::SevProduct;
use bitfield::bitfield;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ARK_GUID: Uuid = Uuid::from_u128(0xc0b406a4_a803_4952_9743_3fb6014cd0ae);
const ASK_GUID: Uuid = Uuid::from_u128(0x4ab7b379_bbac_4fe4_a02f_05aef327c782);
const VCEK_GUID: Uuid = Uuid::from_u128(0x63da758d_e664_4564_adc5_f4b93be8accd);
const VLEK_GUID: Uuid = Uuid::from_u128(0xa8074bc2_a25a_483e_aae6_39c045a0b8a1);
const CRL_GUID: Uuid = Uuid::from_u128(0x92f81bc3_5811_4d3d_97ff_d19f88dc67ea);

/// GUID under which the extra platform info record is stored in a cert table.
pub const EXTRA_PLATFORM_INFO_GUID: Uuid = Uuid::from_u128(0xecae0c0f_9502_43b1_afa2_0ae2e0d565b6);

/// Size of one `(guid, offset, length)` row of the cert table.
const CERT_TABLE_ENTRY_SIZE: usize = 24;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
/// Certificates which are accepted for [CertTableEntry](self::CertTableEntry)
pub enum CertType {
    /// Empty or closing entry for the CertTable
    Empty,

    /// AMD Root Signing Key (ARK) certificate
    ARK,

    /// AMD SEV Signing Key (ASK) certificate
    ASK,

    /// Versioned Chip Endorsement Key (VCEK) certificate
    VCEK,

    /// Versioned Loaded Endorsement Key (VLEK) certificate
    VLEK,

    /// Certificate Revocation List (CRLs) certificate(s)
    CRL,

    /// [ExtraPlatformInfo] record
    ExtraPlatformInfo,

    /// Other (Specify GUID)
    OTHER(Uuid),
}

impl CertType {
    pub fn guid(&self) -> Uuid {
        match self {
            CertType::Empty => Uuid::nil(),
            CertType::ARK => ARK_GUID,
            CertType::ASK => ASK_GUID,
            CertType::VCEK => VCEK_GUID,
            CertType::VLEK => VLEK_GUID,
            CertType::CRL => CRL_GUID,
            CertType::ExtraPlatformInfo => EXTRA_PLATFORM_INFO_GUID,
            CertType::OTHER(guid) => *guid,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CertType::ARK => 0,
            CertType::VCEK => 1,
            CertType::VLEK => 2,
            CertType::ASK => 3,
            CertType::CRL => 4,
            CertType::ExtraPlatformInfo => 5,
            CertType::OTHER(_) => 6,
            CertType::Empty => 7,
        }
    }
}

impl From<&Uuid> for CertType {
    fn from(value: &Uuid) -> Self {
        [
            CertType::Empty,
            CertType::ARK,
            CertType::ASK,
            CertType::VCEK,
            CertType::VLEK,
            CertType::CRL,
            CertType::ExtraPlatformInfo,
        ]
        .into_iter()
        .find(|known| known.guid() == *value)
        .unwrap_or(CertType::OTHER(*value))
    }
}

impl std::fmt::Display for CertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.guid())
    }
}

impl Ord for CertType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::OTHER(left), Self::OTHER(right)) => left.cmp(right),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for CertType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
/// An entry with information regarding a specific certificate.
pub struct CertTableEntry {
    /// A Specific certificate type.
    pub cert_type: CertType,

    /// The raw data of the certificate.
    pub data: Vec<u8>,
}

impl CertTableEntry {
    pub fn guid_string(&self) -> String {
        self.cert_type.to_string()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn from_guid(guid: &Uuid, data: Vec<u8>) -> Self {
        Self {
            cert_type: guid.into(),
            data,
        }
    }

    pub fn new(cert_type: CertType, data: Vec<u8>) -> Self {
        Self { cert_type, data }
    }
}

impl Ord for CertTableEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cert_type
            .cmp(&other.cert_type)
            .then_with(|| self.data.cmp(&other.data))
    }
}

impl PartialOrd for CertTableEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// Parses a GUID table of the form
///
/// ```C
/// struct cert_table {
///    struct {
///       unsigned char guid[16];
///       uint32 offset;
///       uint32 length;
///    } cert_table_entry[];
/// };
/// ```
///
/// terminated by an all-zero row. Offsets are relative to the start of the
/// table. An empty buffer is an empty table.
pub fn parse_cert_table(bytes: &[u8]) -> Result<Vec<CertTableEntry>> {
    let mut entries = vec![];
    if bytes.is_empty() {
        return Ok(entries);
    }

    for row in bytes.chunks(CERT_TABLE_ENTRY_SIZE) {
        if row.len() < CERT_TABLE_ENTRY_SIZE {
            break;
        }
        let guid = Uuid::from_slice(&row[..16])?;
        // Once we find a zeroed GUID, we are done.
        if guid.is_nil() {
            return Ok(entries);
        }
        let offset = read_u32(&row[16..20]) as usize;
        let length = read_u32(&row[20..24]) as usize;
        let data = offset
            .checked_add(length)
            .and_then(|end| bytes.get(offset..end))
            .ok_or_else(|| {
                CertTable(format!(
                    "entry {guid} ({offset}+{length}) exceeds table of {} bytes",
                    bytes.len()
                ))
            })?;
        entries.push(CertTableEntry::from_guid(&guid, data.to_vec()));
    }

    Err(CertTable("missing terminating entry".to_string()))
}

/// Serializes entries into a GUID table, data blobs following the header in
/// entry order.
pub fn build_cert_table(entries: &[CertTableEntry]) -> Result<Vec<u8>> {
    let header_len = (entries.len() + 1) * CERT_TABLE_ENTRY_SIZE;
    let mut header = Vec::with_capacity(header_len);
    let mut body = Vec::new();

    for entry in entries {
        if entry.cert_type == CertType::Empty {
            return Err(CertTable("the nil GUID terminates the table".to_string()));
        }
        let offset = u32::try_from(header_len + body.len())
            .map_err(|_| CertTable("cert table exceeds 4GiB".to_string()))?;
        let length = u32::try_from(entry.data.len())
            .map_err(|_| CertTable("certificate exceeds 4GiB".to_string()))?;
        header.extend_from_slice(entry.cert_type.guid().as_bytes());
        header.extend_from_slice(&offset.to_le_bytes());
        header.extend_from_slice(&length.to_le_bytes());
        body.extend_from_slice(&entry.data);
    }
    header.resize(header_len, 0);
    header.extend_from_slice(&body);
    Ok(header)
}

pub const EXTRA_PLATFORM_INFO_V0_SIZE: u32 = 8;

/// Platform details appended to the certificate blob of a quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtraPlatformInfo {
    /// Size of this record in bytes.
    pub size: u32,
    /// CPUID(1).EAX of the platform, masked to family and model.
    pub cpuid1_eax: u32,
}

impl ExtraPlatformInfo {
    pub fn from_product(product: &SevProduct) -> Self {
        Self {
            size: EXTRA_PLATFORM_INFO_V0_SIZE,
            cpuid1_eax: product.masked_cpuid1_eax(),
        }
    }

    pub fn to_bytes(&self) -> [u8; EXTRA_PLATFORM_INFO_V0_SIZE as usize] {
        let mut out = [0u8; EXTRA_PLATFORM_INFO_V0_SIZE as usize];
        out[..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..].copy_from_slice(&self.cpuid1_eax.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EXTRA_PLATFORM_INFO_V0_SIZE as usize {
            return Err(CertTable(format!(
                "extra platform info is {} bytes, expected {EXTRA_PLATFORM_INFO_V0_SIZE}",
                bytes.len()
            )));
        }
        let size = read_u32(&bytes[..4]);
        if size < EXTRA_PLATFORM_INFO_V0_SIZE {
            return Err(CertTable(format!("extra platform info size {size} too small")));
        }
        Ok(Self {
            size,
            cpuid1_eax: read_u32(&bytes[4..8]),
        })
    }
}

/// Returns `certs` with `info` stored under [EXTRA_PLATFORM_INFO_GUID],
/// replacing any record already present.
pub fn extend_platform_cert_table(certs: &[u8], info: &ExtraPlatformInfo) -> Result<Vec<u8>> {
    let mut entries: Vec<CertTableEntry> = parse_cert_table(certs)?
        .into_iter()
        .filter(|entry| entry.cert_type != CertType::ExtraPlatformInfo)
        .collect();
    entries.push(CertTableEntry::new(
        CertType::ExtraPlatformInfo,
        info.to_bytes().to_vec(),
    ));
    build_cert_table(&entries)
}

/// Structure of required data for fetching the derived key.
#[derive(Copy, Clone, Debug)]
pub struct DerivedKey {
    /// Selects the root key to derive the key from.
    /// 0: Indicates VCEK.
    /// 1: Indicates VMRK.
    root_key_select: u32,

    /// What data will be mixed into the derived key.
    pub guest_field_select: GuestFieldSelect,

    /// The VMPL to mix into the derived key. Must be greater than or equal
    /// to the current VMPL.
    pub vmpl: u32,

    /// The guest SVN to mix into the key. Must not exceed the guest SVN
    /// provided at launch in the ID block.
    pub guest_svn: u32,

    /// The TCB version to mix into the derived key. Must not
    /// exceed CommittedTcb.
    pub tcb_version: u64,
}

impl DerivedKey {
    pub fn new(
        root_key_select: bool,
        guest_field_select: GuestFieldSelect,
        vmpl: u32,
        guest_svn: u32,
        tcb_version: u64,
    ) -> Self {
        Self {
            root_key_select: u32::from(root_key_select),
            guest_field_select,
            vmpl,
            guest_svn,
            tcb_version,
        }
    }

    pub fn get_root_key_select(&self) -> u32 {
        self.root_key_select
    }
}

bitfield! {
    /// Data which will be mixed into the derived key.
    ///
    /// | Bit(s) | Name | Description |
    /// |--------|------|-------------|
    /// |0|GUEST_POLICY|Indicates that the guest policy will be mixed into the key.|
    /// |1|IMAGE_ID|Indicates that the image ID of the guest will be mixed into the key.|
    /// |2|FAMILY_ID|Indicates the family ID of the guest will be mixed into the key.|
    /// |3|MEASUREMENT|Indicates the measurement of the guest during launch will be mixed into the key.|
    /// |4|GUEST_SVN|Indicates that the guest-provided SVN will be mixed into the key.|
    /// |5|TCB_VERSION|Indicates that the guest-provided TCB_VERSION will be mixed into the key.|
    /// |63:6|\-|Reserved. Must be zero.|
    #[repr(C)]
    #[derive(Default, Copy, Clone, PartialEq, Eq)]
    pub struct GuestFieldSelect(u64);
    impl Debug;
    pub get_guest_policy, set_guest_policy: 0, 0;
    pub get_image_id, set_image_id: 1, 1;
    pub get_family_id, set_family_id: 2, 2;
    pub get_measurement, set_measurement: 3, 3;
    pub get_svn, set_svn: 4, 4;
    pub get_tcb_version, set_tcb_version: 5, 5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CocoError;
    use crate::product::{SevProduct, SevProductName};

    fn sample_table() -> Vec<CertTableEntry> {
        vec![
            CertTableEntry::new(CertType::VCEK, b"vcek-der".to_vec()),
            CertTableEntry::new(CertType::ASK, b"ask".to_vec()),
            CertTableEntry::new(CertType::ARK, b"ark-cert".to_vec()),
        ]
    }

    #[test]
    fn test_cert_table_layout() {
        let bytes = build_cert_table(&sample_table()).unwrap();
        // three rows plus terminator
        assert_eq!(&bytes[..16], VCEK_GUID.as_bytes());
        assert_eq!(read_u32(&bytes[16..20]), 4 * 24);
        assert_eq!(read_u32(&bytes[20..24]), 8);
        assert!(bytes[72..96].iter().all(|b| *b == 0));
        assert_eq!(parse_cert_table(&bytes).unwrap(), sample_table());
    }

    #[test]
    fn test_parse_rejects_out_of_bounds_entry() {
        let mut bytes = build_cert_table(&sample_table()).unwrap();
        bytes[20..24].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            parse_cert_table(&bytes),
            Err(CocoError::CertTable(_))
        ));
    }

    #[test]
    fn test_parse_requires_terminator() {
        let bytes = build_cert_table(&sample_table()).unwrap();
        assert!(parse_cert_table(&bytes[..48]).is_err());
        assert!(parse_cert_table(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_extend_replaces_existing_platform_info() {
        let milan = ExtraPlatformInfo::from_product(&SevProduct::new(SevProductName::Milan, None));
        let genoa = ExtraPlatformInfo::from_product(&SevProduct::new(SevProductName::Genoa, None));
        let base = build_cert_table(&sample_table()).unwrap();

        let once = extend_platform_cert_table(&base, &milan).unwrap();
        let twice = extend_platform_cert_table(&once, &genoa).unwrap();
        let entries = parse_cert_table(&twice).unwrap();

        assert_eq!(entries.len(), 4);
        let info = entries
            .iter()
            .find(|e| e.cert_type == CertType::ExtraPlatformInfo)
            .unwrap();
        assert_eq!(ExtraPlatformInfo::from_bytes(info.data()).unwrap(), genoa);
    }

    #[test]
    fn test_cert_types_sort_ark_first_and_empty_last() {
        let mut types = vec![
            CertType::Empty,
            CertType::OTHER(Uuid::from_u128(7)),
            CertType::ASK,
            CertType::ARK,
            CertType::VCEK,
        ];
        types.sort();
        assert_eq!(types.first(), Some(&CertType::ARK));
        assert_eq!(types.last(), Some(&CertType::Empty));
        assert_eq!(CertType::from(&VCEK_GUID), CertType::VCEK);
    }

    #[test]
    fn test_guest_field_select_bits() {
        let mut select = GuestFieldSelect::default();
        select.set_measurement(1);
        select.set_tcb_version(1);
        assert_eq!(select.0, 0b10_1000);
    }
}
