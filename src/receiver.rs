//! Per-head receiver task (C4, §4.4): one thread per connected scan head,
//! classifying inbound datagrams by magic and feeding the assembler or the
//! head's status store.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tracing::{debug, info, instrument, trace, warn};

use crate::assembler::ProfileAssembler;
use crate::error::Result;
use crate::head::{ReceiverState, ScanHead};
use crate::wire::{header, DataPacketView, StatusMessage};

/// Requested (best-effort) receive buffer size; real-time ingestion at full
/// fleet rate needs headroom the OS default rarely provides.
const RECV_BUFFER_BYTES: usize = 256 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Largest datagram a scan head ever sends (§4.1's data packet table).
const MAX_DATAGRAM_BYTES: usize = 6_144;

/// Binds a fresh ephemeral UDP socket for one head's inbound data/status
/// traffic, tuning its buffer size and read timeout.
pub fn bind_receiver_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        if e.raw_os_error() == Some(libc::EPERM) {
            warn!("insufficient privilege to raise recv buffer size, using OS default");
        } else {
            warn!(error = %e, "failed to set recv buffer size, using OS default");
        }
    }
    let bind_addr: std::net::SocketAddr = ([0, 0, 0, 0], 0).into();
    socket.bind(&bind_addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(socket)
}

/// Spawns the receiver thread for one connected head. `scan_head_id` is the
/// small host-assigned numeric id packed into [`crate::profile::SourceId`].
/// `core_index`, if given, pins the thread to that CPU for steadier latency
/// under load from many simultaneous heads.
pub fn spawn(
    head: Arc<ScanHead>,
    scan_head_id: u32,
    socket: UdpSocket,
    core_index: Option<usize>,
) -> Result<JoinHandle<()>> {
    let name = format!("scanhead-recv-{scan_head_id}");
    let handle = thread::Builder::new().name(name).spawn(move || {
        if let Some(core) = core_index.and_then(|i| core_affinity::get_core_ids().and_then(|ids| ids.get(i).copied())) {
            core_affinity::set_for_current(core);
        }
        if let Err(e) = thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max) {
            debug!(error = ?e, "could not raise receiver thread priority, continuing at default");
        }

        head.set_receiver_state(ReceiverState::Running);
        info!(scan_head_id, "receiver started");
        run(head.clone(), scan_head_id, socket);
        head.set_receiver_state(ReceiverState::Stopped);
        info!(scan_head_id, "receiver stopped");
    })?;
    Ok(handle)
}

#[instrument(skip(head, socket), fields(scan_head_id))]
fn run(head: Arc<ScanHead>, scan_head_id: u32, socket: UdpSocket) {
    let mut assembler = ProfileAssembler::new(scan_head_id);
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

    loop {
        if head.receiver_state() == ReceiverState::ShuttingDown {
            break;
        }
        match socket.recv_from(&mut buf) {
            Ok((n, _src)) => handle_datagram(&head, &mut assembler, &buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!(scan_head_id, error = %e, "receive error, continuing");
                continue;
            }
        }
    }

    if let Some(lost) = assembler.flush() {
        head.queue.push(lost);
    }
}

fn handle_datagram(head: &Arc<ScanHead>, assembler: &mut ProfileAssembler, bytes: &[u8]) {
    let Some(hdr) = header::InfoHeader::from_bytes(bytes) else {
        trace!("datagram too short for a header, dropping");
        return;
    };
    match hdr.magic() {
        header::MAGIC_DATA => {
            let view = match DataPacketView::parse(bytes) {
                Ok(view) => view,
                Err(e) => {
                    trace!(error = %e, "malformed data packet, dropping");
                    return;
                }
            };
            let alignments = *head.alignments.lock().unwrap();
            for profile in assembler.on_data_packet(&view, &alignments) {
                head.queue.push(profile);
            }
        }
        header::MAGIC_STATUS_OR_COMMAND if hdr.kind() == header::MSG_TYPE_STATUS => match StatusMessage::decode(bytes) {
            Ok(status) => head.set_status(status),
            Err(e) => warn!(error = %e, "malformed status message, dropping"),
        },
        _ => trace!(magic = hdr.magic(), kind = hdr.kind(), "unrecognized datagram, dropping"),
    }
}

/// Requests the receiver thread shut down and joins it. No-op if already stopped.
pub fn stop_and_join(head: &Arc<ScanHead>) {
    if head.receiver_state() == ReceiverState::Stopped {
        return;
    }
    head.set_receiver_state(ReceiverState::ShuttingDown);
    if let Some(handle) = head.take_receiver_thread() {
        let _ = handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::header::{MAGIC_STATUS_OR_COMMAND, MSG_TYPE_STATUS};
    use crate::wire::status::VersionInformation;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn sample_status() -> StatusMessage {
        StatusMessage {
            version: VersionInformation { major: 1, minor: 0, patch: 0, commit: 0, product: 0, flags: 0 },
            serial: 1,
            max_scan_rate: 1000,
            scan_head_ip: Ipv4Addr::new(10, 0, 0, 1),
            client_ip: Ipv4Addr::new(10, 0, 0, 2),
            client_port: 9000,
            scan_sync_id: 0,
            global_time: 0,
            num_packets_sent: 0,
            num_profiles_sent: 0,
            encoders: vec![],
            pixels_in_window: vec![],
            camera_temp: vec![],
        }
    }

    #[test]
    fn status_datagram_updates_head_status() {
        let head = Arc::new(ScanHead::new(42, 0));
        let mut assembler = ProfileAssembler::new(1);
        let bytes = sample_status().encode();
        assert_eq!(bytes[3], MSG_TYPE_STATUS);
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), MAGIC_STATUS_OR_COMMAND);
        handle_datagram(&head, &mut assembler, &bytes);
        assert!(head.snapshot_status().is_some());
    }

    #[test]
    fn garbage_datagram_is_dropped_without_panic() {
        let head = Arc::new(ScanHead::new(1, 0));
        let mut assembler = ProfileAssembler::new(1);
        handle_datagram(&head, &mut assembler, &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(head.snapshot_status().is_none());
    }

    #[test]
    fn end_to_end_loopback_status_roundtrip() {
        let head = Arc::new(ScanHead::new(7, 0));
        let socket = bind_receiver_socket().unwrap();
        let local_addr = socket.local_addr().unwrap();
        head.set_receiver_state(ReceiverState::Running);
        let head2 = head.clone();
        let t = thread::spawn(move || run(head2, 7, socket));

        let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
        let bytes = sample_status().encode();
        sender.send_to(&bytes, local_addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while head.snapshot_status().is_none() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(head.snapshot_status().is_some());

        head.set_receiver_state(ReceiverState::ShuttingDown);
        t.join().unwrap();
    }
}
