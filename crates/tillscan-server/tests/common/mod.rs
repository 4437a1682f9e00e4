//! Shared fixtures for tests that drive a live listener.
#![allow(dead_code)]

use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tillscan_core::ScanConfig;
use tillscan_server::ScanHandler;

/// Config that skips provisioning entirely. Most tests want plain HTTP so
/// they exercise the lifecycle, not the certificate machinery.
pub fn plaintext_config(dir: &Path) -> ScanConfig {
    ScanConfig {
        force_plaintext: true,
        credential_dir: Some(dir.join("certs")),
        ..Default::default()
    }
}

pub fn tls_config(dir: &Path) -> ScanConfig {
    ScanConfig {
        credential_dir: Some(dir.join("certs")),
        ..Default::default()
    }
}

/// A port that was free a moment ago. Racy by nature, close enough for
/// tests that immediately bind it.
pub fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub type Collected = Arc<Mutex<Vec<String>>>;

/// Scan handler that appends every delivered code to a shared vector.
pub fn collector() -> (ScanHandler, Collected) {
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let handler: ScanHandler = Box::new(move |submission| {
        sink.lock().unwrap().push(submission.code);
    });
    (handler, collected)
}

/// Polls `predicate` for up to two seconds. Scan delivery crosses a
/// channel and a dispatcher task, so assertions on the collector need a
/// little patience.
pub async fn wait_for(predicate: impl Fn() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}

pub fn submit_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/scan/submit")
}
