//! A synthetic scan head: answers broadcast discovery with a status message
//! and, once scanning starts, emits single-fragment XY+brightness profiles
//! at the requested rate. Used by integration tests and manual runs against
//! the rest of the fleet runtime without real hardware.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng as _;
use scanhead::wire::command::{BroadcastConnect, ScanRequest};
use scanhead::wire::header::{
    DatagramHeader, InfoHeader, MAGIC_STATUS_OR_COMMAND, MSG_TYPE_BROADCAST_CONNECT, MSG_TYPE_DISCONNECT,
    MSG_TYPE_SCAN_REQUEST, MSG_TYPE_SET_WINDOW, MSG_TYPE_STATUS, SCAN_HEAD_COMMAND_PORT,
};
use scanhead::wire::status::{StatusMessage, VersionInformation};
use scanhead::wire::{data_packet::fragment_column, data_type};
use tracing::{info, warn};

const NUM_COLUMNS: u16 = 100;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial number this mock head reports.
    #[arg(long, default_value_t = 1)]
    serial: u32,

    /// `scan_head_id` this mock head reports.
    #[arg(long, default_value_t = 0)]
    id: u8,

    /// Local port to listen for commands on (defaults to the real command port).
    #[arg(long, default_value_t = SCAN_HEAD_COMMAND_PORT)]
    port: u16,

    /// Major version reported in status replies. Defaults to the host's
    /// expected version; set to something else to simulate an incompatible head.
    #[arg(long)]
    version_major: Option<u32>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let socket = UdpSocket::bind(("0.0.0.0", args.port)).expect("bind command socket");
    socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    info!(serial = args.serial, id = args.id, port = args.port, "mock scan head listening");

    let scanning = Arc::new(AtomicBool::new(false));
    let data_socket = Arc::new(socket.try_clone().expect("clone socket for data sender"));
    let mut data_thread: Option<std::thread::JoinHandle<()>> = None;
    let mut buf = [0u8; 1500];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!(error = %e, "recv failed");
                continue;
            }
        };
        let Some(header) = InfoHeader::from_bytes(&buf[..len]) else { continue };
        if header.magic() != MAGIC_STATUS_OR_COMMAND {
            continue;
        }
        match header.kind() {
            MSG_TYPE_BROADCAST_CONNECT => {
                let Ok(connect) = BroadcastConnect::decode(&buf[..len]) else { continue };
                let reply_to: SocketAddr = (connect.client_ip, connect.client_port).into();
                let status = build_status(&args, reply_to);
                let _ = socket.send_to(&status.encode(), reply_to);
                info!(%peer, %reply_to, "answered broadcast connect");
            }
            MSG_TYPE_SET_WINDOW => {
                info!(%peer, "received set window");
            }
            MSG_TYPE_SCAN_REQUEST => {
                let Ok(req) = ScanRequest::decode(&buf[..len]) else { continue };
                if let Some(handle) = data_thread.take() {
                    scanning.store(false, Ordering::SeqCst);
                    let _ = handle.join();
                }
                scanning.store(true, Ordering::SeqCst);
                let target: SocketAddr = (req.client_ip, req.client_port).into();
                let interval = Duration::from_micros(req.scan_interval_us.max(1) as u64);
                let scanning = scanning.clone();
                let socket = data_socket.clone();
                let scan_head_id = args.id;
                data_thread = Some(std::thread::spawn(move || {
                    send_profiles(&socket, target, scan_head_id, interval, &scanning)
                }));
                info!(%target, interval_us = req.scan_interval_us, "scan request accepted");
            }
            MSG_TYPE_DISCONNECT => {
                scanning.store(false, Ordering::SeqCst);
                if let Some(handle) = data_thread.take() {
                    let _ = handle.join();
                }
                info!("disconnected");
            }
            MSG_TYPE_STATUS => {}
            other => {
                warn!(kind = other, "unhandled message kind");
            }
        }
    }
}

fn build_status(args: &Args, reply_to: SocketAddr) -> StatusMessage {
    let client_ip = match reply_to.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };
    StatusMessage {
        version: VersionInformation {
            major: args.version_major.unwrap_or(scanhead::session::LOCAL_VERSION_MAJOR),
            minor: 0,
            patch: 0,
            commit: 0,
            product: 1,
            flags: 0,
        },
        serial: args.serial,
        max_scan_rate: 4_000,
        scan_head_ip: Ipv4Addr::new(127, 0, 0, 1),
        client_ip,
        client_port: reply_to.port(),
        scan_sync_id: 1,
        global_time: now_millis(),
        num_packets_sent: 0,
        num_profiles_sent: 0,
        encoders: vec![0],
        pixels_in_window: vec![NUM_COLUMNS as i32, NUM_COLUMNS as i32],
        camera_temp: vec![25, 25],
    }
}

fn now_millis() -> u64 {
    Instant::now().elapsed().as_millis() as u64 + 1
}

fn send_profiles(socket: &UdpSocket, target: SocketAddr, scan_head_id: u8, interval: Duration, scanning: &AtomicBool) {
    let mut rng = rand::rng();
    let mut timestamp: u64 = 0;
    while scanning.load(Ordering::SeqCst) {
        let mask = data_type::XY_DATA | data_type::BRIGHTNESS;
        let payload_len = NUM_COLUMNS as usize * 5;
        let header = DatagramHeader::new(
            100,
            scan_head_id,
            0,
            0,
            0,
            timestamp,
            50,
            mask,
            payload_len as u16,
            1,
            0,
            1,
            0,
            NUM_COLUMNS - 1,
        );
        let mut datagram = header.to_bytes().to_vec();
        datagram.extend_from_slice(&1u16.to_be_bytes()); // XY step
        datagram.extend_from_slice(&1u16.to_be_bytes()); // brightness step
        datagram.extend_from_slice(&0i64.to_be_bytes()); // one encoder reading
        for j in 0..NUM_COLUMNS as usize {
            let col = fragment_column(0, 1, j, 0, 1);
            let x: i16 = col as i16 - (NUM_COLUMNS / 2) as i16;
            let y: i16 = rng.random_range(-50..50);
            datagram.extend_from_slice(&x.to_be_bytes());
            datagram.extend_from_slice(&y.to_be_bytes());
            datagram.push(rng.random_range(0..=255));
        }
        let _ = socket.send_to(&datagram, target);
        timestamp += interval.as_nanos() as u64;
        std::thread::sleep(interval);
    }
}
