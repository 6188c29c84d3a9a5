pub mod abi;
pub mod error;
pub mod report;
pub mod types;
