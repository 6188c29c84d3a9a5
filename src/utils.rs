use crate::snp::abi::REPORT_DATA_SIZE;

/// Map key under which canned responses for `report_data` are stored.
pub fn report_data_key(report_data: &[u8; REPORT_DATA_SIZE]) -> String {
    hex::encode(report_data)
}
