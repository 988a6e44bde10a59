//! C-compatible interface for video hosts.
//!
//! # Memory Ownership Rules
//!
//! - `qntx_detect_new()` allocates on the Rust heap, caller owns the pointer
//! - `qntx_detect_free()` must be called to deallocate; it joins the worker
//!   before the model is released
//! - Strings returned by `qntx_detect_update()` and `qntx_detect_last_object()`
//!   are owned by the caller and freed with `qntx_detect_string_free()`
//!
//! # Threading
//!
//! `push_frame`, `tick` and `render` are meant for the host's render thread.
//! `update` may block while a model loads.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use tracing::error;

use crate::capture::PushSource;
use crate::config::FilterConfig;
use crate::engine::Detector;
use crate::pipeline::{DetectFilter, RenderOutput};

// Frames larger than this are rejected outright
const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Opaque filter handle
pub struct DetectFilterHandle {
    filter: DetectFilter<PushSource, Detector>,
    source: PushSource,
}

unsafe fn parse_config(config_json: *const c_char) -> Result<FilterConfig, String> {
    if config_json.is_null() {
        return Ok(FilterConfig::default());
    }
    let json = unsafe { CStr::from_ptr(config_json) }
        .to_str()
        .map_err(|_| "invalid UTF-8".to_string())?;
    FilterConfig::from_json_str(json).map_err(|e| e.to_string())
}

fn cstring_or_empty(s: &str) -> *mut c_char {
    CString::new(s).unwrap_or_default().into_raw()
}

/// Create a filter from a JSON configuration (NULL = defaults).
///
/// # Returns
/// Handle pointer, or NULL if the configuration is invalid or the worker
/// thread could not be started. A model that fails to load still yields a
/// handle, with inference paused.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_new(config_json: *const c_char) -> *mut DetectFilterHandle {
    crate::logging::init();

    let config = match unsafe { parse_config(config_json) } {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid filter configuration: {}", e);
            return ptr::null_mut();
        }
    };

    let source = PushSource::new();
    match DetectFilter::with_onnx(source.clone(), config) {
        Ok(filter) => Box::into_raw(Box::new(DetectFilterHandle { filter, source })),
        Err(e) => {
            error!("Failed to create detection filter: {}", e);
            ptr::null_mut()
        }
    }
}

/// Apply a new JSON configuration.
///
/// # Returns
/// NULL on success, otherwise an error message owned by the caller.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_update(
    handle: *const DetectFilterHandle,
    config_json: *const c_char,
) -> *mut c_char {
    if handle.is_null() {
        return cstring_or_empty("null handle");
    }
    if config_json.is_null() {
        return cstring_or_empty("null configuration");
    }
    let handle = unsafe { &*handle };
    let json = unsafe { CStr::from_ptr(config_json) }.to_bytes();

    match handle.filter.on_configuration_json(json) {
        Ok(()) => ptr::null_mut(),
        Err(e) => cstring_or_empty(&e.to_string()),
    }
}

/// Host activation (source shown/hidden).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_set_active(handle: *const DetectFilterHandle, active: bool) {
    if handle.is_null() {
        return;
    }
    unsafe { &*handle }.filter.set_active(active);
}

/// Copy the host's current BGRA surface into the filter.
///
/// # Returns
/// 0 on success, -1 on invalid arguments.
///
/// # Safety
/// `data` must point to at least `stride * height` bytes.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_push_frame(
    handle: *const DetectFilterHandle,
    data: *const u8,
    width: u32,
    height: u32,
    stride: u32,
) -> i32 {
    if handle.is_null() || data.is_null() {
        return -1;
    }
    let len = (stride as usize).saturating_mul(height as usize);
    if len == 0 || len > MAX_FRAME_SIZE {
        return -1;
    }
    let handle = unsafe { &*handle };
    let data = unsafe { slice::from_raw_parts(data, len) };

    match handle.source.push(data, width, height, stride as usize) {
        Ok(()) => 0,
        Err(e) => {
            error!("Rejected frame {}x{} (stride {}): {}", width, height, stride, e);
            -1
        }
    }
}

/// Run one tick: capture the pushed surface and maybe enqueue it.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_tick(handle: *const DetectFilterHandle) {
    if handle.is_null() {
        return;
    }
    unsafe { &*handle }.filter.on_tick();
}

/// Render the current output frame into `out` as tightly packed BGRA.
///
/// `out_width`/`out_height` are written whenever a frame is available, so a
/// host can size its buffer after a failed call.
///
/// # Returns
/// 1 when a frame was written, 0 when the host should draw its source
/// unmodified, -1 on invalid arguments or a too small buffer.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_render(
    handle: *const DetectFilterHandle,
    out: *mut u8,
    out_len: usize,
    out_width: *mut u32,
    out_height: *mut u32,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let handle = unsafe { &*handle };

    let frame = match handle.filter.on_render() {
        RenderOutput::Passthrough => return 0,
        RenderOutput::Frame(frame) => frame,
    };

    let (width, height) = frame.dimensions();
    if !out_width.is_null() {
        unsafe { *out_width = width };
    }
    if !out_height.is_null() {
        unsafe { *out_height = height };
    }

    let bytes = frame.image.as_raw();
    if out.is_null() || out_len < bytes.len() {
        return -1;
    }
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len()) };
    1
}

/// Name of the last detected object, empty when none. Caller frees.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_last_object(handle: *const DetectFilterHandle) -> *mut c_char {
    if handle.is_null() {
        return cstring_or_empty("");
    }
    cstring_or_empty(&unsafe { &*handle }.filter.last_detected_object())
}

/// Free a string returned by this library. NULL is a no-op.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

/// Stop the worker and free the filter. NULL is a no-op.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn qntx_detect_free(handle: *mut DetectFilterHandle) {
    if handle.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(handle) };
    handle.filter.shutdown();
}
