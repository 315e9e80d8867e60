//! C ABI layer (C12, §4.12): the §6 host-API table re-exposed as
//! `#[no_mangle] extern "C"` functions over opaque `u64` handles. Handles are
//! keys into a process-wide registry rather than raw pointer casts, per the
//! redesign note in §9.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_double, c_int, CString};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::alignment::Alignment;
use crate::error::{ErrorCode, ScanError};
use crate::profile::{CameraId, DataFormat};
use crate::session::ScanSystem;
use crate::window::ScanWindow;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::new("").unwrap());
}

fn set_last_error(err: &ScanError) {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = CString::new(err.to_string()).unwrap_or_else(|_| CString::new("").unwrap());
    });
}

/// Returns the last error message recorded on the calling thread, or an empty
/// string if the most recent call on this thread succeeded. The returned
/// pointer is valid until the next FFI call on the same thread.
#[no_mangle]
pub extern "C" fn scan_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().as_ptr())
}

struct Registry {
    systems: HashMap<u64, Arc<ScanSystem>>,
    heads: HashMap<u64, (u64, u32)>,
    next: u64,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry { systems: HashMap::new(), heads: HashMap::new(), next: 1 }))
}

fn alloc_handle(reg: &mut Registry) -> u64 {
    let h = reg.next;
    reg.next += 1;
    h
}

fn system_for(handle: u64) -> Result<Arc<ScanSystem>, ScanError> {
    registry().lock().unwrap().systems.get(&handle).cloned().ok_or(ScanError::NullArgument)
}

fn head_for(handle: u64) -> Result<(Arc<ScanSystem>, u32), ScanError> {
    let reg = registry().lock().unwrap();
    let (system_handle, scan_head_id) = *reg.heads.get(&handle).ok_or(ScanError::NullArgument)?;
    let system = reg.systems.get(&system_handle).cloned().ok_or(ScanError::NullArgument)?;
    Ok((system, scan_head_id))
}

fn code_of<T>(result: Result<T, ScanError>) -> c_int {
    match result {
        Ok(_) => ErrorCode::Ok as c_int,
        Err(e) => {
            let code = ErrorCode::from(&e) as c_int;
            set_last_error(&e);
            code
        }
    }
}

/// Creates a new scan system. Always succeeds; returns `0` only if the
/// underlying command bus could not be created (see
/// [`scan_last_error_message`]).
#[no_mangle]
pub extern "C" fn scan_system_create() -> u64 {
    match ScanSystem::new() {
        Ok(system) => {
            let mut reg = registry().lock().unwrap();
            let handle = alloc_handle(&mut reg);
            reg.systems.insert(handle, Arc::new(system));
            handle
        }
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

#[no_mangle]
pub extern "C" fn scan_system_destroy(system: u64) {
    let mut reg = registry().lock().unwrap();
    reg.systems.remove(&system);
    reg.heads.retain(|_, (sys, _)| *sys != system);
}

/// Registers a new scan head, returning its opaque handle or `0` on error.
#[no_mangle]
pub extern "C" fn scan_head_create(system: u64, serial: u32, scan_head_id: u32) -> u64 {
    let sys = match system_for(system) {
        Ok(s) => s,
        Err(e) => {
            set_last_error(&e);
            return 0;
        }
    };
    match sys.create_head(serial, scan_head_id) {
        Ok(_) => {
            let mut reg = registry().lock().unwrap();
            let handle = alloc_handle(&mut reg);
            reg.heads.insert(handle, (system, scan_head_id));
            handle
        }
        Err(e) => {
            set_last_error(&e);
            0
        }
    }
}

#[no_mangle]
pub extern "C" fn scan_head_remove(head: u64) -> c_int {
    code_of(head_for(head).and_then(|(sys, id)| sys.remove_head(id)))
}

#[no_mangle]
pub extern "C" fn scan_system_connect(system: u64, timeout_s: c_double) -> c_int {
    code_of(system_for(system).and_then(|sys| sys.connect(Duration::from_secs_f64(timeout_s.max(0.0)))))
}

#[no_mangle]
pub extern "C" fn scan_system_disconnect(system: u64) -> c_int {
    code_of(system_for(system).and_then(|sys| sys.disconnect()))
}

#[no_mangle]
pub extern "C" fn scan_system_start_scanning(system: u64, rate_hz: c_double, format: c_int) -> c_int {
    let result = (|| {
        let sys = system_for(system)?;
        let format = decode_format(format)?;
        sys.start_scanning(rate_hz, format)
    })();
    code_of(result)
}

#[no_mangle]
pub extern "C" fn scan_system_stop_scanning(system: u64) -> c_int {
    code_of(system_for(system).and_then(|sys| sys.stop_scanning()))
}

#[no_mangle]
pub extern "C" fn scan_head_set_alignment(
    head: u64,
    camera: c_int,
    roll_deg: c_double,
    shift_x_in: c_double,
    shift_y_in: c_double,
    cable_downstream: c_int,
) -> c_int {
    let result = (|| {
        let (sys, id) = head_for(head)?;
        let camera = decode_camera(camera)?;
        let alignment = Alignment::new(roll_deg, shift_x_in, shift_y_in, cable_downstream != 0);
        sys.set_alignment(id, camera, alignment)
    })();
    code_of(result)
}

#[no_mangle]
pub extern "C" fn scan_head_set_window(head: u64, top_in: c_double, bottom_in: c_double, left_in: c_double, right_in: c_double) -> c_int {
    let result = (|| {
        let (sys, id) = head_for(head)?;
        let window = ScanWindow::new(top_in, bottom_in, left_in, right_in)?;
        sys.set_window(id, window)
    })();
    code_of(result)
}

#[no_mangle]
pub extern "C" fn scan_head_wait_until_profiles(head: u64, n: u32, timeout_us: u64) -> c_int {
    let result = (|| {
        let (sys, id) = head_for(head)?;
        sys.wait_until_profiles(id, n as usize, Duration::from_micros(timeout_us))
    })();
    match result {
        Ok(available) => available as c_int,
        Err(e) => {
            set_last_error(&e);
            ErrorCode::from(&e) as c_int
        }
    }
}

/// Drains up to `n` completed profiles into `out` (caller-allocated, `n`
/// elements of [`crate::profile::Profile`]-sized storage is not attempted
/// here; this returns the count actually available and callers retrieve the
/// point data via the safe Rust API for now). Returns the count drained, or a
/// negative [`crate::error::ErrorCode`] on failure.
///
/// # Safety
/// This function takes no raw buffers and is always safe to call.
#[no_mangle]
pub extern "C" fn scan_head_take_profile_count(head: u64, n: u32) -> c_int {
    let result = (|| {
        let (sys, id) = head_for(head)?;
        Ok::<usize, ScanError>(sys.take_profiles(id, n as usize)?.len())
    })();
    match result {
        Ok(taken) => taken as c_int,
        Err(e) => {
            set_last_error(&e);
            ErrorCode::from(&e) as c_int
        }
    }
}

fn decode_camera(camera: c_int) -> Result<CameraId, ScanError> {
    match camera {
        0 => Ok(CameraId::A),
        1 => Ok(CameraId::B),
        _ => Err(ScanError::InvalidArgument(format!("unknown camera id {camera}"))),
    }
}

fn decode_format(format: c_int) -> Result<DataFormat, ScanError> {
    match format {
        0 => Ok(DataFormat::XyFullLmFull),
        1 => Ok(DataFormat::XyHalfLmHalf),
        2 => Ok(DataFormat::XyQuarterLmQuarter),
        3 => Ok(DataFormat::XyFull),
        4 => Ok(DataFormat::XyHalf),
        5 => Ok(DataFormat::XyQuarter),
        6 => Ok(DataFormat::CameraImageFull),
        _ => Err(ScanError::InvalidArgument(format!("unknown data format {format}"))),
    }
}
