//! Drives `ScanSystem` against the `mock-scan-head` binary over a real UDP
//! socket: discovery, start/stop scanning, and profile delivery.
//!
//! Requires a non-loopback network interface to be present (the discovery
//! broadcast is sent per-interface); skips itself when none is found rather
//! than failing a sandbox with no LAN.

use std::process::{Child, Command};
use std::time::Duration;

use scanhead::error::ScanError;
use scanhead::profile::DataFormat;
use scanhead::session::ScanSystem;

struct MockHead(Child);

impl Drop for MockHead {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn has_broadcast_interface() -> bool {
    pnet::datalink::interfaces().iter().any(|iface| {
        iface.ips.iter().any(|ip| match ip {
            pnet::ipnetwork::IpNetwork::V4(v4) => !v4.ip().is_loopback(),
            _ => false,
        })
    })
}

fn spawn_mock_head(serial: u32, id: u32) -> MockHead {
    spawn_mock_head_with_version(serial, id, None)
}

fn spawn_mock_head_with_version(serial: u32, id: u32, version_major: Option<u32>) -> MockHead {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mock-scan-head"));
    cmd.arg("--serial").arg(serial.to_string()).arg("--id").arg(id.to_string());
    if let Some(major) = version_major {
        cmd.arg("--version-major").arg(major.to_string());
    }
    let child = cmd.spawn().expect("spawn mock-scan-head");
    std::thread::sleep(Duration::from_millis(300));
    MockHead(child)
}

#[test]
fn connect_scan_and_stop_against_mock_head() {
    if !has_broadcast_interface() {
        eprintln!("skipping: no non-loopback interface available in this environment");
        return;
    }

    let _mock = spawn_mock_head(42, 0);

    let system = ScanSystem::new().expect("create system");
    system.create_head(42, 0).expect("register head");

    system.connect(Duration::from_secs(10)).expect("connect");
    assert!(system.max_scan_rate_hz() > 0.0);

    system.start_scanning(200.0, DataFormat::XyFullLmFull).expect("start scanning");

    let available = system.wait_until_profiles(0, 3, Duration::from_secs(5)).expect("wait for profiles");
    assert!(available >= 3, "expected at least 3 profiles, got {available}");

    let profiles = system.take_profiles(0, available).expect("take profiles");
    assert!(
        profiles.iter().any(|p| p.valid_geometry_count > 0),
        "expected at least one profile with real geometry"
    );

    system.stop_scanning().expect("stop scanning");
    system.disconnect().expect("disconnect");
}

#[test]
fn connect_times_out_with_no_listener() {
    if !has_broadcast_interface() {
        eprintln!("skipping: no non-loopback interface available in this environment");
        return;
    }

    // Serial 9999 has no mock head answering, so discovery must time out.
    let system = ScanSystem::new().expect("create system");
    system.create_head(9999, 0).expect("register head");
    let err = system.connect(Duration::from_millis(700)).unwrap_err();
    assert!(err.to_string().contains("did not respond"));
}

#[test]
fn connect_aborts_on_version_mismatch() {
    if !has_broadcast_interface() {
        eprintln!("skipping: no non-loopback interface available in this environment");
        return;
    }

    let _mock = spawn_mock_head_with_version(43, 0, Some(3));

    let system = ScanSystem::new().expect("create system");
    system.create_head(43, 0).expect("register head");
    let err = system.connect(Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, ScanError::VersionIncompatible { remote_major: 3, .. }));
    assert_eq!(system.state(), scanhead::session::SystemState::Disconnected);
}
