//! Per-scan-head shared state (§3, §5's "shared head state" design note): one
//! type whose mutable interior is guarded by a single mutex and condition
//! variable, shared between the host-calling threads and the head's
//! receiver task.

use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alignment::Alignment;
use crate::config::Config;
use crate::profile::DataFormat;
use crate::queue::ProfileQueue;
use crate::window::ScanWindow;
use crate::wire::StatusMessage;

/// Drives the per-head receiver's UDP loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Running,
    ShuttingDown,
}

struct HeadInner {
    status: Option<StatusMessage>,
    last_status_at: Option<Instant>,
    receiver_state: ReceiverState,
}

/// One managed scan head. Owns its completed-profile ring, its in-flight
/// receiver thread handle, and the configuration the host has set for it.
pub struct ScanHead {
    pub serial: u32,
    pub scan_head_id: u32,
    pub queue: ProfileQueue,
    pub config: Mutex<Config>,
    /// Indexed by [`crate::profile::CameraId`] as `0`/`1`.
    pub alignments: Mutex<[Alignment; 2]>,
    pub window: Mutex<Option<ScanWindow>>,
    pub data_format: Mutex<DataFormat>,
    pub ip: Mutex<Option<Ipv4Addr>>,
    /// The `(client_ip, client_port)` the head itself reported back in its
    /// status reply during connect — where it expects scan data addressed.
    pub client_addr: Mutex<Option<(Ipv4Addr, u16)>>,
    pub product_type: Mutex<Option<u16>>,
    inner: Mutex<HeadInner>,
    condvar: Condvar,
    receiver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ScanHead {
    pub fn new(serial: u32, scan_head_id: u32) -> Self {
        ScanHead {
            serial,
            scan_head_id,
            queue: ProfileQueue::new(),
            config: Mutex::new(Config::default()),
            alignments: Mutex::new([Alignment::new(0.0, 0.0, 0.0, false); 2]),
            window: Mutex::new(None),
            data_format: Mutex::new(DataFormat::XyFullLmFull),
            ip: Mutex::new(None),
            client_addr: Mutex::new(None),
            product_type: Mutex::new(None),
            inner: Mutex::new(HeadInner { status: None, last_status_at: None, receiver_state: ReceiverState::Stopped }),
            condvar: Condvar::new(),
            receiver_thread: Mutex::new(None),
        }
    }

    pub fn clear_status(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = None;
        inner.last_status_at = None;
    }

    pub fn set_status(&self, status: StatusMessage) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = Some(status);
        inner.last_status_at = Some(Instant::now());
        self.condvar.notify_all();
    }

    pub fn snapshot_status(&self) -> Option<StatusMessage> {
        self.inner.lock().unwrap().status.clone()
    }

    /// Blocks until a status has been received strictly after `since`, the
    /// receiver stops, or `timeout` elapses. Returns the fresh snapshot, if any.
    pub fn wait_for_fresh_status(&self, since: Instant, timeout: Duration) -> Option<StatusMessage> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(at) = inner.last_status_at {
                if at >= since {
                    return inner.status.clone();
                }
            }
            if inner.receiver_state == ReceiverState::Stopped {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.condvar.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    pub fn set_receiver_state(&self, state: ReceiverState) {
        let mut inner = self.inner.lock().unwrap();
        inner.receiver_state = state;
        self.condvar.notify_all();
        if state == ReceiverState::Stopped {
            self.queue.mark_stopped();
        } else if state == ReceiverState::Running {
            self.queue.mark_running();
        }
    }

    pub fn receiver_state(&self) -> ReceiverState {
        self.inner.lock().unwrap().receiver_state
    }

    /// Parks the calling thread until the receiver state is no longer
    /// `Stopped`, used by the receiver loop itself while idling.
    pub fn wait_while_stopped(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.receiver_state == ReceiverState::Stopped {
            inner = self.condvar.wait(inner).unwrap();
        }
    }

    pub fn set_receiver_thread(&self, handle: Option<JoinHandle<()>>) {
        *self.receiver_thread.lock().unwrap() = handle;
    }

    pub fn take_receiver_thread(&self) -> Option<JoinHandle<()>> {
        self.receiver_thread.lock().unwrap().take()
    }
}
