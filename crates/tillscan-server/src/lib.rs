//! Embeddable scan ingestion service.
//!
//! A checkout application creates a [`ScanService`], calls `start` with a
//! preferred port and a scan callback, and shows the returned URL (or a QR
//! of it) on the till display. Staff phones open the page, the browser
//! reads barcodes, and every accepted code arrives at the callback in
//! order, one at a time.

pub mod addr;
pub use addr::AdvertisedAddr;
pub mod dispatch;
pub use dispatch::ScanHandler;
pub mod page;
pub mod port;
pub use port::PortError;
pub mod routes;
pub use routes::{SCAN_PATH, SUBMIT_PATH};
pub mod service;
pub use service::{ScanService, Scheme, ServiceState, ServiceStatus, StartError};
pub mod tls;
pub use tls::{CredentialStrategy, ProvisionError};
