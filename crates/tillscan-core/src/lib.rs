pub mod barcode;
pub use barcode::{Barcode, BarcodeError};
pub mod config;
pub use config::ScanConfig;
pub mod scan;
pub use scan::{ScanSubmission, SubmitResponse};
