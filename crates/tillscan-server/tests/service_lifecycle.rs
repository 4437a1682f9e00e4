//! Tests for the start/stop/restart lifecycle against real sockets.

mod common;

use std::net::{Ipv4Addr, TcpListener};

use common::{collector, free_port, plaintext_config, submit_url, wait_for};
use tempfile::TempDir;
use tillscan_core::ScanConfig;
use tillscan_server::port::PortError;
use tillscan_server::{ScanService, Scheme, ServiceState, StartError};

/// Binds `count` consecutive localhost ports and keeps the listeners
/// alive, retrying from a fresh base until a whole run is available.
fn occupy_consecutive(count: u16) -> (u16, Vec<TcpListener>) {
    'search: for _ in 0..50 {
        let anchor = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let base = anchor.local_addr().unwrap().port();
        let mut held = vec![anchor];
        for offset in 1..count {
            let Some(port) = base.checked_add(offset) else {
                continue 'search;
            };
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                Ok(listener) => held.push(listener),
                Err(_) => continue 'search,
            }
        }
        return (base, held);
    }
    panic!("could not reserve {count} consecutive ports");
}

#[tokio::test]
async fn start_reports_running_and_stop_releases_the_port() {
    let dir = TempDir::new().unwrap();
    let service = ScanService::new(plaintext_config(dir.path()));
    let (handler, _collected) = collector();

    let status = service.start(free_port(), handler).await.unwrap();
    assert_eq!(service.state().await, ServiceState::Running);
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(
        service.status().await.unwrap().state,
        ServiceState::Running
    );
    assert_eq!(status.scheme, Scheme::Http);
    assert!(status.advertised_url.starts_with("http://"), "{}", status.advertised_url);
    assert!(status.advertised_url.ends_with("/scan"), "{}", status.advertised_url);
    assert!(
        status.advertised_url.contains(&format!(":{}", status.port)),
        "{}",
        status.advertised_url
    );

    // The wildcard socket is held, so an outside bind must fail.
    assert!(TcpListener::bind((Ipv4Addr::UNSPECIFIED, status.port)).is_err());

    service.stop().await;
    assert_eq!(service.state().await, ServiceState::Stopped);
    assert!(service.status().await.is_none());

    // And released the moment stop() returns.
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, status.port)).unwrap();
}

#[tokio::test]
async fn restart_without_stop_reuses_the_preferred_port() {
    let dir = TempDir::new().unwrap();
    let service = ScanService::new(plaintext_config(dir.path()));
    let preferred = free_port();

    let (handler, _collected) = collector();
    let first = service.start(preferred, handler).await.unwrap();

    // Second start tears the listener down first, so the very same port
    // must be free again for the new one.
    let (handler, _collected) = collector();
    let second = service.start(preferred, handler).await.unwrap();
    assert_eq!(second.port, first.port);
    assert_eq!(service.state().await, ServiceState::Running);

    // Exactly one listener: the port is held now, free after stop.
    assert!(TcpListener::bind((Ipv4Addr::UNSPECIFIED, second.port)).is_err());
    service.stop().await;
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, second.port)).unwrap();
}

#[tokio::test]
async fn stop_is_a_no_op_when_already_stopped() {
    let dir = TempDir::new().unwrap();
    let service = ScanService::new(plaintext_config(dir.path()));
    assert_eq!(service.state().await, ServiceState::Stopped);

    service.stop().await;
    assert_eq!(service.state().await, ServiceState::Stopped);

    let (handler, _collected) = collector();
    service.start(free_port(), handler).await.unwrap();
    service.stop().await;
    service.stop().await;
    assert_eq!(service.state().await, ServiceState::Stopped);
}

#[tokio::test]
async fn occupied_preferred_ports_shift_the_allocation() {
    let dir = TempDir::new().unwrap();
    let config = ScanConfig {
        max_port_attempts: 5,
        ..plaintext_config(dir.path())
    };
    let service = ScanService::new(config);

    let (base, _held) = occupy_consecutive(2);
    let (handler, collected) = collector();
    let status = service.start(base, handler).await.unwrap();
    assert!(status.port >= base + 2, "landed on held port {}", status.port);
    assert!(status.port < base + 5, "outside the probe window: {}", status.port);
    assert!(
        status.advertised_url.contains(&format!(":{}", status.port)),
        "{}",
        status.advertised_url
    );

    // The shifted listener is the live one.
    let response = reqwest::Client::new()
        .post(submit_url(status.port))
        .body("2000000420509")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    wait_for(|| collected.lock().unwrap().len() == 1).await;

    service.stop().await;
}

#[tokio::test]
async fn exhausted_port_range_fails_start_and_stays_stopped() {
    let dir = TempDir::new().unwrap();
    let config = ScanConfig {
        max_port_attempts: 3,
        ..plaintext_config(dir.path())
    };
    let service = ScanService::new(config);

    let (base, _held) = occupy_consecutive(3);
    let (handler, _collected) = collector();
    let err = service.start(base, handler).await.unwrap_err();
    match err {
        StartError::Ports(PortError::Exhausted {
            first,
            last,
            attempts,
        }) => {
            assert_eq!(first, base);
            assert_eq!(last, base + 2);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(service.state().await, ServiceState::Stopped);
    assert!(service.status().await.is_none());
}
