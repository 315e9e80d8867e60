//! Session / lifecycle (C7, §4.7): the `{Disconnected, Connected, Scanning}`
//! state machine, discovery/connect, and scan start/stop.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pnet::datalink;
use socket2::{Domain, Socket, Type};
use tracing::{info, instrument, warn};

use crate::alignment::Alignment;
use crate::config::Config;
use crate::error::{Result, ScanError};
use crate::head::{ReceiverState, ScanHead};
use crate::profile::{CameraId, DataFormat, Profile};
use crate::receiver;
use crate::sender::CommandBus;
use crate::window::ScanWindow;
use crate::wire::{
    BroadcastConnect, ConnectionKind, Disconnect, ScanRequest, SetWindow, SCAN_HEAD_COMMAND_PORT,
};

/// Local product version this implementation reports/expects (§4.7).
pub const LOCAL_VERSION_MAJOR: u32 = 2;
/// Upper bound on requested scan rate (§6), independent of any per-head limit.
const HARD_RATE_CAP_HZ: f64 = 4_000.0;
const MIN_RATE_HZ: f64 = 0.2;
const CONNECT_POLL_PERIOD: Duration = Duration::from_millis(500);
const WINDOW_PROPAGATION_DELAY: Duration = Duration::from_millis(500);
const DISCONNECT_SETTLE_DELAY: Duration = Duration::from_millis(100);
const STATUS_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Disconnected,
    Connected,
    Scanning,
}

struct HeadEntry {
    head: Arc<ScanHead>,
    scan_head_id: u32,
    connected: bool,
}

/// The top-level scan system: owns every registered head, the shared command
/// bus, and the state machine governing which operations are legal.
pub struct ScanSystem {
    state: Mutex<SystemState>,
    heads: Mutex<HashMap<u32, HeadEntry>>,
    bus: CommandBus,
    session_id: Mutex<u8>,
    max_scan_rate_hz: Mutex<f64>,
}

impl ScanSystem {
    pub fn new() -> Result<Self> {
        Ok(ScanSystem {
            state: Mutex::new(SystemState::Disconnected),
            heads: Mutex::new(HashMap::new()),
            bus: CommandBus::new()?,
            session_id: Mutex::new(0),
            max_scan_rate_hz: Mutex::new(HARD_RATE_CAP_HZ),
        })
    }

    pub fn state(&self) -> SystemState {
        *self.state.lock().unwrap()
    }

    fn require_state(&self, expected: SystemState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(state_error(actual));
        }
        Ok(())
    }

    fn require_not_scanning(&self) -> Result<()> {
        if self.state() == SystemState::Scanning {
            return Err(ScanError::Scanning);
        }
        Ok(())
    }

    /// Registers a new head. `serial` and `scan_head_id` must both be unused.
    pub fn create_head(&self, serial: u32, scan_head_id: u32) -> Result<Arc<ScanHead>> {
        self.require_state(SystemState::Disconnected)?;
        let mut heads = self.heads.lock().unwrap();
        if heads.contains_key(&scan_head_id) {
            return Err(ScanError::DuplicateHead(serial, scan_head_id));
        }
        if heads.values().any(|e| e.head.serial == serial) {
            return Err(ScanError::DuplicateHead(serial, scan_head_id));
        }
        let head = Arc::new(ScanHead::new(serial, scan_head_id));
        heads.insert(scan_head_id, HeadEntry { head: head.clone(), scan_head_id, connected: false });
        Ok(head)
    }

    pub fn remove_head(&self, scan_head_id: u32) -> Result<()> {
        self.require_state(SystemState::Disconnected)?;
        let mut heads = self.heads.lock().unwrap();
        heads
            .remove(&scan_head_id)
            .map(|_| ())
            .ok_or(ScanError::UnknownHead(scan_head_id))
    }

    pub fn head(&self, scan_head_id: u32) -> Result<Arc<ScanHead>> {
        self.heads
            .lock()
            .unwrap()
            .get(&scan_head_id)
            .map(|e| e.head.clone())
            .ok_or(ScanError::UnknownHead(scan_head_id))
    }

    /// Discovery/connect (§4.7): binds per-interface broadcast sockets, spins
    /// up every head's receiver, and polls for fresh, version-compatible
    /// status until all heads respond or `timeout` elapses.
    #[instrument(skip(self))]
    pub fn connect(&self, timeout: Duration) -> Result<()> {
        self.require_state(SystemState::Disconnected)?;
        {
            let heads = self.heads.lock().unwrap();
            if heads.is_empty() {
                return Err(ScanError::Internal("no scan heads registered".into()));
            }
        }

        let broadcast_sockets = open_broadcast_sockets()?;
        if broadcast_sockets.is_empty() {
            return Err(ScanError::NoBroadcastInterfaces);
        }

        let scan_head_ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        let mut receiver_ports: HashMap<u32, u16> = HashMap::new();
        for id in &scan_head_ids {
            let head = self.head(*id)?;
            let socket = receiver::bind_receiver_socket()?;
            let port = socket.local_addr()?.port();
            let handle = receiver::spawn(head.clone(), *id, socket, None)?;
            head.set_receiver_thread(Some(handle));
            receiver_ports.insert(*id, port);
        }

        let session_id = {
            let mut s = self.session_id.lock().unwrap();
            *s = s.wrapping_add(1);
            *s
        };

        let start = Instant::now();
        let deadline = start + timeout;
        let mut remaining: Vec<u32> = scan_head_ids.clone();

        while !remaining.is_empty() && Instant::now() < deadline {
            let wave_start = Instant::now();
            for id in &remaining {
                let head = self.head(*id)?;
                head.clear_status();
                let client_port = receiver_ports[id];
                for (iface_ip, sock) in &broadcast_sockets {
                    let cmd = BroadcastConnect {
                        client_ip: *iface_ip,
                        client_port,
                        session_id,
                        scan_head_id: (*id & 0xFF) as u8,
                        connection_kind: ConnectionKind::Normal,
                        serial: head.serial,
                    };
                    let _ = sock.send_to(&cmd.encode(), (Ipv4Addr::BROADCAST, SCAN_HEAD_COMMAND_PORT));
                }
            }

            let mut still_waiting = Vec::new();
            for id in &remaining {
                let head = self.head(*id)?;
                let wait = CONNECT_POLL_PERIOD.min(deadline.saturating_duration_since(Instant::now()));
                match head.wait_for_fresh_status(wave_start, wait) {
                    Some(status) if status.version.major == LOCAL_VERSION_MAJOR => {
                        *head.ip.lock().unwrap() = Some(status.scan_head_ip);
                        *head.client_addr.lock().unwrap() = Some((status.client_ip, status.client_port));
                        let mut heads = self.heads.lock().unwrap();
                        if let Some(entry) = heads.get_mut(id) {
                            entry.connected = true;
                        }
                        info!(scan_head_id = id, ip = %status.scan_head_ip, "head connected");
                    }
                    Some(status) => {
                        warn!(scan_head_id = id, remote_major = status.version.major, "version incompatible, aborting connect");
                        drop(broadcast_sockets);
                        for other_id in &scan_head_ids {
                            let head = self.head(*other_id)?;
                            receiver::stop_and_join(&head);
                        }
                        return Err(ScanError::VersionIncompatible {
                            local_major: LOCAL_VERSION_MAJOR,
                            remote_major: status.version.major,
                        });
                    }
                    None => still_waiting.push(*id),
                }
            }
            remaining = still_waiting;
        }

        drop(broadcast_sockets);

        if !remaining.is_empty() {
            for id in &scan_head_ids {
                let head = self.head(*id)?;
                receiver::stop_and_join(&head);
            }
            return Err(ScanError::Internal(format!("{} head(s) did not respond before timeout", remaining.len())));
        }

        *self.state.lock().unwrap() = SystemState::Connected;
        self.push_windows_and_wait()?;
        self.recompute_max_scan_rate()?;
        Ok(())
    }

    fn push_windows_and_wait(&self) -> Result<()> {
        let ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        for id in &ids {
            let head = self.head(*id)?;
            let ip = head.ip.lock().unwrap().ok_or(ScanError::NotConnected)?;
            let window = *head.window.lock().unwrap();
            let Some(window) = window else { continue };
            let alignments = *head.alignments.lock().unwrap();
            let cameras = head.snapshot_status().map(|s| s.valid_cameras()).unwrap_or(0);
            for camera_idx in 0..cameras {
                let camera = if camera_idx == 0 { CameraId::A } else { CameraId::B };
                let alignment = &alignments[camera.to_wire() as usize];
                let constraints = window.for_camera(alignment);
                let msg = SetWindow {
                    camera_id: camera.to_wire(),
                    constraints: constraints.iter().map(|c| c.to_wire()).collect(),
                };
                self.bus.enqueue(ip, msg.encode());
            }
        }

        std::thread::sleep(WINDOW_PROPAGATION_DELAY);

        for id in &ids {
            let head = self.head(*id)?;
            if head.window.lock().unwrap().is_none() {
                continue;
            }
            let since = Instant::now();
            head.clear_status();
            head.wait_for_fresh_status(since, STATUS_WAIT_TIMEOUT);
        }
        Ok(())
    }

    fn recompute_max_scan_rate(&self) -> Result<()> {
        let ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        let mut rate = HARD_RATE_CAP_HZ;
        for id in &ids {
            let head = self.head(*id)?;
            let cfg = *head.config.lock().unwrap();
            if cfg.laser_on_time_max_us > 0 {
                rate = rate.min(1_000_000.0 / cfg.laser_on_time_max_us as f64);
            }
            if let Some(status) = head.snapshot_status() {
                rate = rate.min(status.max_scan_rate as f64);
            }
        }
        *self.max_scan_rate_hz.lock().unwrap() = rate;
        Ok(())
    }

    pub fn max_scan_rate_hz(&self) -> f64 {
        *self.max_scan_rate_hz.lock().unwrap()
    }

    /// Disconnect (§4.7): sends Disconnect to every head, stops its receiver,
    /// stops the command bus's keepalive, and clears cached status.
    pub fn disconnect(&self) -> Result<()> {
        self.require_state(SystemState::Connected)?;
        let ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        for id in &ids {
            let head = self.head(*id)?;
            if let Some(ip) = *head.ip.lock().unwrap() {
                self.bus.enqueue(ip, Disconnect.encode());
            }
            receiver::stop_and_join(&head);
        }
        self.bus.clear_scan_requests();
        std::thread::sleep(DISCONNECT_SETTLE_DELAY);
        for id in &ids {
            let head = self.head(*id)?;
            head.clear_status();
            *head.ip.lock().unwrap() = None;
            *head.client_addr.lock().unwrap() = None;
            let mut heads = self.heads.lock().unwrap();
            if let Some(entry) = heads.get_mut(id) {
                entry.connected = false;
            }
        }
        *self.state.lock().unwrap() = SystemState::Disconnected;
        Ok(())
    }

    /// Start scanning (§4.7). Rejects rates outside `[0.2, dynamic_max]` and
    /// the image format (continuous image scanning is not supported).
    pub fn start_scanning(&self, rate_hz: f64, format: DataFormat) -> Result<()> {
        self.require_state(SystemState::Connected)?;
        if format.is_image() {
            return Err(ScanError::InvalidArgument("continuous scanning of the image format is rejected".into()));
        }
        let max_rate = self.max_scan_rate_hz();
        if !(MIN_RATE_HZ..=max_rate).contains(&rate_hz) {
            return Err(ScanError::InvalidArgument(format!(
                "rate {rate_hz} Hz outside [{MIN_RATE_HZ}, {max_rate}]"
            )));
        }

        let interval_us = (1_000_000.0 / rate_hz).round() as u32;
        let session_id = *self.session_id.lock().unwrap();
        let ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        let mut requests = Vec::new();

        for id in &ids {
            let head = self.head(*id)?;
            let ip = head.ip.lock().unwrap().ok_or(ScanError::NotConnected)?;
            let (client_ip, client_port) = head.client_addr.lock().unwrap().ok_or(ScanError::NotConnected)?;
            let cfg: Config = *head.config.lock().unwrap();
            *head.data_format.lock().unwrap() = format;
            head.queue.clear();
            head.set_receiver_state(ReceiverState::Running);

            let req = ScanRequest {
                client_ip,
                client_port,
                request_sequence: session_id,
                scan_head_id: (*id & 0xFF) as u8,
                camera_id: 0,
                laser_id: 0,
                flags: 0,
                laser_exposure_min_us: cfg.laser_on_time_min_us,
                laser_exposure_def_us: cfg.laser_on_time_def_us,
                laser_exposure_max_us: cfg.laser_on_time_max_us,
                camera_exposure_min_us: cfg.camera_exposure_time_min_us,
                camera_exposure_def_us: cfg.camera_exposure_time_def_us,
                camera_exposure_max_us: cfg.camera_exposure_time_max_us,
                laser_detection_threshold: cfg.laser_detection_threshold,
                saturation_threshold: cfg.saturation_threshold,
                saturation_percentage: cfg.saturation_percentage,
                target_average_intensity: 50,
                scan_interval_us: interval_us,
                scan_offset_us: cfg.scan_offset_us,
                number_of_scans: 0xFFFF_FFFF,
                data_type_mask: format.data_type_mask(),
                start_column: 0,
                end_column: (crate::profile::PROFILE_POINT_COUNT - 1) as u16,
                steps: format.steps(),
            };
            requests.push((ip, req.encode()));
        }

        self.bus.set_scan_requests(requests);
        *self.state.lock().unwrap() = SystemState::Scanning;
        info!(rate_hz, ?format, "scanning started");
        Ok(())
    }

    /// Stop scanning (§4.7). Does not close sockets or disconnect heads.
    pub fn stop_scanning(&self) -> Result<()> {
        self.require_state(SystemState::Scanning)?;
        self.bus.clear_scan_requests();
        *self.state.lock().unwrap() = SystemState::Connected;
        info!("scanning stopped");
        Ok(())
    }

    pub fn wait_until_profiles(&self, scan_head_id: u32, n: usize, timeout: Duration) -> Result<usize> {
        let head = self.head(scan_head_id)?;
        Ok(head.queue.wait_until_available(n, timeout))
    }

    pub fn take_profiles(&self, scan_head_id: u32, n: usize) -> Result<Vec<Profile>> {
        let head = self.head(scan_head_id)?;
        Ok(head.queue.pop(n))
    }

    pub fn set_alignment(&self, scan_head_id: u32, camera: CameraId, alignment: Alignment) -> Result<()> {
        self.require_state(SystemState::Disconnected)?;
        let head = self.head(scan_head_id)?;
        head.alignments.lock().unwrap()[camera.to_wire() as usize] = alignment;
        Ok(())
    }

    pub fn set_window(&self, scan_head_id: u32, window: ScanWindow) -> Result<()> {
        self.require_state(SystemState::Disconnected)?;
        let head = self.head(scan_head_id)?;
        *head.window.lock().unwrap() = Some(window);
        Ok(())
    }

    pub fn set_configuration(&self, scan_head_id: u32, config: Config) -> Result<()> {
        self.require_not_scanning()?;
        let head = self.head(scan_head_id)?;
        *head.config.lock().unwrap() = config;
        Ok(())
    }

    pub fn status(&self, scan_head_id: u32) -> Result<crate::wire::StatusMessage> {
        self.require_state(SystemState::Connected)?;
        let head = self.head(scan_head_id)?;
        head.snapshot_status().ok_or(ScanError::NotConnected)
    }

    /// Captures one image-format frame per camera on `scan_head_id` (§4.8):
    /// overrides the laser-on bounds to zero, forces the image format, runs a
    /// short start/stop cycle, then restores the caller's configuration.
    pub fn capture_camera_image(&self, scan_head_id: u32, camera: CameraId) -> Result<Profile> {
        self.require_state(SystemState::Connected)?;
        let head = self.head(scan_head_id)?;
        let saved_config = *head.config.lock().unwrap();
        let saved_format = *head.data_format.lock().unwrap();

        let image_config = Config { laser_on_time_min_us: 0, laser_on_time_def_us: 0, laser_on_time_max_us: 0, ..saved_config };
        *head.config.lock().unwrap() = image_config;

        let restore = |head: &Arc<ScanHead>, cfg: Config, fmt: DataFormat| {
            *head.config.lock().unwrap() = cfg;
            *head.data_format.lock().unwrap() = fmt;
        };

        if let Err(e) = self.start_scanning_for_image(scan_head_id, DataFormat::CameraImageFull) {
            restore(&head, saved_config, saved_format);
            return Err(e);
        }

        head.queue.clear();
        let got = head.queue.wait_until_available(1, Duration::from_secs(5));
        let _ = self.stop_scanning();
        restore(&head, saved_config, saved_format);

        if got == 0 {
            return Err(ScanError::Internal("timed out waiting for an image frame".into()));
        }
        head.queue
            .pop(1)
            .into_iter()
            .find(|p| p.camera == camera)
            .ok_or_else(|| ScanError::Internal("captured frame was for the other camera".into()))
    }

    /// Image-format variant of [`start_scanning`](Self::start_scanning) that
    /// bypasses the "no continuous image scanning" rejection for the single
    /// short burst `capture_camera_image` needs.
    fn start_scanning_for_image(&self, scan_head_id: u32, format: DataFormat) -> Result<()> {
        self.require_state(SystemState::Connected)?;
        let head = self.head(scan_head_id)?;
        let ip = head.ip.lock().unwrap().ok_or(ScanError::NotConnected)?;
        let (client_ip, client_port) = head.client_addr.lock().unwrap().ok_or(ScanError::NotConnected)?;
        let cfg = *head.config.lock().unwrap();
        *head.data_format.lock().unwrap() = format;
        head.queue.clear();

        let session_id = *self.session_id.lock().unwrap();
        let req = ScanRequest {
            client_ip,
            client_port,
            request_sequence: session_id,
            scan_head_id: (scan_head_id & 0xFF) as u8,
            camera_id: 0,
            laser_id: 0,
            flags: 0,
            laser_exposure_min_us: cfg.laser_on_time_min_us,
            laser_exposure_def_us: cfg.laser_on_time_def_us,
            laser_exposure_max_us: cfg.laser_on_time_max_us,
            camera_exposure_min_us: cfg.camera_exposure_time_min_us,
            camera_exposure_def_us: cfg.camera_exposure_time_def_us,
            camera_exposure_max_us: cfg.camera_exposure_time_max_us,
            laser_detection_threshold: cfg.laser_detection_threshold,
            saturation_threshold: cfg.saturation_threshold,
            saturation_percentage: cfg.saturation_percentage,
            target_average_intensity: 50,
            scan_interval_us: 1_000_000,
            scan_offset_us: cfg.scan_offset_us,
            number_of_scans: 1,
            data_type_mask: format.data_type_mask(),
            start_column: 0,
            end_column: (crate::profile::PROFILE_POINT_COUNT - 1) as u16,
            steps: format.steps(),
        };
        self.bus.set_scan_requests(vec![(ip, req.encode())]);
        *self.state.lock().unwrap() = SystemState::Scanning;
        Ok(())
    }
}

impl Drop for ScanSystem {
    fn drop(&mut self) {
        let ids: Vec<u32> = self.heads.lock().unwrap().keys().copied().collect();
        for id in ids {
            if let Ok(head) = self.head(id) {
                receiver::stop_and_join(&head);
            }
        }
    }
}

fn state_error(actual: SystemState) -> ScanError {
    match actual {
        SystemState::Disconnected => ScanError::NotConnected,
        SystemState::Connected => ScanError::Connected,
        SystemState::Scanning => ScanError::Scanning,
    }
}

/// Enumerates non-loopback IPv4 interfaces and opens one broadcast-capable
/// UDP socket per interface, generalizing the teacher's
/// `get_interface_addreses_with_prefix`.
fn open_broadcast_sockets() -> Result<Vec<(Ipv4Addr, std::net::UdpSocket)>> {
    let mut addrs: Vec<Ipv4Addr> = datalink::interfaces()
        .iter()
        .flat_map(|iface| &iface.ips)
        .filter_map(|ip| match ip {
            pnet::ipnetwork::IpNetwork::V4(v4) => Some(v4.ip()),
            _ => None,
        })
        .filter(|ip| !ip.is_loopback())
        .collect();
    addrs.sort();
    addrs.dedup();

    let mut sockets = Vec::new();
    for addr in addrs {
        let socket = match Socket::new(Domain::IPV4, Type::DGRAM, None) {
            Ok(s) => s,
            Err(e) => {
                warn!(%addr, error = %e, "failed to open broadcast socket on interface, skipping");
                continue;
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            warn!(%addr, error = %e, "failed to enable broadcast on socket, skipping");
            continue;
        }
        let bind_addr: std::net::SocketAddr = (addr, 0).into();
        if let Err(e) = socket.bind(&bind_addr.into()) {
            warn!(%addr, error = %e, "failed to bind broadcast socket, skipping");
            continue;
        }
        sockets.push((addr, socket.into()));
    }
    Ok(sockets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_head_rejects_duplicate_serial_and_id() {
        let sys = ScanSystem::new().unwrap();
        sys.create_head(1, 0).unwrap();
        assert!(sys.create_head(1, 1).is_err());
        assert!(sys.create_head(2, 0).is_err());
    }

    #[test]
    fn operations_reject_wrong_state() {
        let sys = ScanSystem::new().unwrap();
        assert!(matches!(sys.disconnect().unwrap_err(), ScanError::NotConnected));
        assert!(matches!(sys.stop_scanning().unwrap_err(), ScanError::NotConnected));
    }

    #[test]
    fn connect_with_no_heads_fails() {
        let sys = ScanSystem::new().unwrap();
        assert!(sys.connect(Duration::from_millis(50)).is_err());
        assert_eq!(sys.state(), SystemState::Disconnected);
    }
}
