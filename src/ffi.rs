//! C FFI layer for vive-tracker.
//!
//! Provides opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/vive_tracker.h` by cbindgen.

use crate::error::LastError;
use crate::tracker::Tracker;
use std::ffi::{c_char, c_int, CString};

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque tracker handle for C consumers.
pub struct VtTracker {
    tracker: Tracker,
    /// NUL-terminated copy of the device name handed out to C.
    name: Option<CString>,
}

impl VtTracker {
    fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            name: None,
        }
    }
}

/// Tracker state in C-compatible layout, canonical Y-up frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VtPose {
    /// Position [x, y, z] in meters.
    pub position: [f32; 3],
    /// Orientation quaternion [x, y, z, w].
    pub orientation: [f32; 4],
    /// 4x4 transform, column-major (16 elements).
    pub matrix: [f32; 16],
    /// Linear velocity in m/s.
    pub velocity: [f32; 3],
    /// Angular velocity in rad/s.
    pub angular_velocity: [f32; 3],
    /// True if the pose was refreshed by the last update.
    pub tracking: bool,
}

/// Create a tracker over the compiled-in backend, configured from the
/// environment. Does not connect; call `vt_tracker_setup`.
/// Returns NULL on error (check vt_last_error()).
#[no_mangle]
pub extern "C" fn vt_tracker_new() -> *mut VtTracker {
    match Tracker::new() {
        Ok(tracker) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(VtTracker::new(tracker)))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Close the tracker and free its resources.
///
/// # Safety
/// `tracker` must be a pointer returned by `vt_tracker_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_free(tracker: *mut VtTracker) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Initial connect. Returns 1 if a tracker was found, 0 otherwise.
/// With auto-reconnect on, a failed setup keeps retrying from update.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_setup(tracker: *mut VtTracker) -> c_int {
    if tracker.is_null() {
        return 0;
    }
    let tracker = &mut *tracker;
    tracker.tracker.setup() as c_int
}

/// Advance the tracker by one tick. Call once per frame.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_update(tracker: *mut VtTracker) {
    if tracker.is_null() {
        return;
    }
    let tracker = &mut *tracker;
    tracker.tracker.update();
}

/// Release the backend session. The handle stays valid.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_close(tracker: *mut VtTracker) {
    if tracker.is_null() {
        return;
    }
    let tracker = &mut *tracker;
    tracker.tracker.close();
}

/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_is_connected(tracker: *const VtTracker) -> bool {
    if tracker.is_null() {
        return false;
    }
    let tracker = &*tracker;
    tracker.tracker.is_connected()
}

/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_is_tracking(tracker: *const VtTracker) -> bool {
    if tracker.is_null() {
        return false;
    }
    let tracker = &*tracker;
    tracker.tracker.is_tracking()
}

/// Copy the cached state into `out`. Returns 0 on success, -1 if either
/// pointer is null.
///
/// # Safety
/// `tracker` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_get_pose(
    tracker: *const VtTracker,
    out: *mut VtPose,
) -> c_int {
    if tracker.is_null() || out.is_null() {
        return -1;
    }
    let tracker = &(*tracker).tracker;
    let pose = tracker.pose();
    out.write(VtPose {
        position: pose.position().to_array(),
        orientation: pose.orientation().to_array(),
        matrix: pose.transform().to_cols_array(),
        velocity: tracker.velocity().to_array(),
        angular_velocity: tracker.angular_velocity().to_array(),
        tracking: tracker.is_tracking(),
    });
    0
}

/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_set_auto_reconnect(tracker: *mut VtTracker, enable: bool) {
    if tracker.is_null() {
        return;
    }
    let tracker = &mut *tracker;
    tracker.tracker.set_auto_reconnect(enable);
}

/// Negative or non-finite values are treated as 0.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_set_reconnect_interval(
    tracker: *mut VtTracker,
    seconds: f32,
) {
    if tracker.is_null() {
        return;
    }
    let tracker = &mut *tracker;
    tracker.tracker.set_reconnect_interval(seconds);
}

/// Name of the located tracker, or NULL while none is located.
/// The returned pointer is valid until the next call on this handle.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vt_tracker_device_name(tracker: *mut VtTracker) -> *const c_char {
    if tracker.is_null() {
        return std::ptr::null();
    }
    let tracker = &mut *tracker;
    // Interior NULs cannot come from a runtime serial; such a name is dropped.
    tracker.name = tracker
        .tracker
        .device_name()
        .and_then(|name| CString::new(name).ok());
    match &tracker.name {
        Some(name) => name.as_ptr(),
        None => std::ptr::null(),
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next vive-tracker API call.
#[no_mangle]
pub extern "C" fn vt_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::mock::{valid_at, MockRuntime};
    use crate::types::Capabilities;
    use std::ffi::CStr;

    fn handle(runtime: &MockRuntime) -> *mut VtTracker {
        let tracker = Tracker::with_backend(
            runtime.backend(Capabilities::DEVICE_NAME),
            TrackerConfig::default(),
        )
        .with_clock(Box::new(runtime.clock()));
        Box::into_raw(Box::new(VtTracker::new(tracker)))
    }

    #[test]
    fn null_handles_are_ignored() {
        unsafe {
            assert_eq!(vt_tracker_setup(std::ptr::null_mut()), 0);
            vt_tracker_update(std::ptr::null_mut());
            vt_tracker_close(std::ptr::null_mut());
            vt_tracker_set_auto_reconnect(std::ptr::null_mut(), false);
            vt_tracker_set_reconnect_interval(std::ptr::null_mut(), 1.0);
            assert!(!vt_tracker_is_connected(std::ptr::null()));
            assert!(!vt_tracker_is_tracking(std::ptr::null()));
            assert!(vt_tracker_device_name(std::ptr::null_mut()).is_null());
            let mut pose = std::mem::MaybeUninit::<VtPose>::uninit();
            assert_eq!(vt_tracker_get_pose(std::ptr::null(), pose.as_mut_ptr()), -1);
            vt_tracker_free(std::ptr::null_mut());
        }
    }

    #[test]
    fn pose_round_trip_through_handle() {
        let runtime = MockRuntime::new();
        let tracker = handle(&runtime);
        unsafe {
            assert_eq!(vt_tracker_setup(tracker), 1);
            assert!(vt_tracker_is_connected(tracker));

            let name = vt_tracker_device_name(tracker);
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "LHR-TRACKER1");

            runtime.push([valid_at([1.0, 2.0, 3.0])]);
            vt_tracker_update(tracker);
            assert!(vt_tracker_is_tracking(tracker));

            let mut pose = std::mem::MaybeUninit::<VtPose>::uninit();
            assert_eq!(vt_tracker_get_pose(tracker, pose.as_mut_ptr()), 0);
            let pose = pose.assume_init();
            assert!(pose.tracking);
            // Mock runtime is Z-up: (1, 2, 3) -> (1, 3, -2).
            assert!((pose.position[0] - 1.0).abs() < 1e-6);
            assert!((pose.position[1] - 3.0).abs() < 1e-6);
            assert!((pose.position[2] + 2.0).abs() < 1e-6);
            assert_eq!(&pose.matrix[12..15], &pose.position[..]);
            assert_eq!(pose.matrix[15], 1.0);

            vt_tracker_close(tracker);
            assert!(!vt_tracker_is_connected(tracker));
            assert!(vt_tracker_device_name(tracker).is_null());
            vt_tracker_free(tracker);
        }
        assert_eq!(runtime.with(|s| s.open_sessions), 0);
    }

    #[test]
    fn free_releases_the_session() {
        let runtime = MockRuntime::new();
        let tracker = handle(&runtime);
        unsafe {
            vt_tracker_set_reconnect_interval(tracker, 1e30);
            vt_tracker_set_reconnect_interval(tracker, f32::NAN);
            assert_eq!(vt_tracker_setup(tracker), 1);
            vt_tracker_free(tracker);
        }
        assert_eq!(runtime.with(|s| s.closes), 1);
    }

    #[cfg(not(any(feature = "lighthouse", feature = "steamvr")))]
    #[test]
    fn new_without_backend_sets_last_error() {
        assert!(vt_tracker_new().is_null());
        let message = unsafe { CStr::from_ptr(vt_last_error()) };
        assert!(message.to_str().unwrap().contains("No tracking backend"));
    }
}
