use std::fmt;

/// Errors raised while bringing up a tracking backend.
///
/// None of these are fatal to the caller: the tracker logs them and keeps
/// retrying on its reconnect interval.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracking runtime is not running")]
    RuntimeNotRunning,

    #[error("Runtime init failed: {0}")]
    Init(String),

    #[error("No device table available from the runtime")]
    NoDeviceTable,

    #[error("No tracking backend compiled in (enable `lighthouse` or `steamvr`)")]
    NoBackend,

    #[error("Backend error: {0}")]
    Native(String),
}

/// Failure of `Backend::connect`. Always means "try again later".
pub type ConnectError = TrackerError;

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &TrackerError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn last_error_is_nul_terminated() {
        let last = LastError::new();
        assert!(last.as_ptr().is_null());

        last.set(&TrackerError::Init("HmdNotFound".into()));
        let text = unsafe { CStr::from_ptr(last.as_ptr()) };
        assert_eq!(
            text.to_str().unwrap(),
            "Runtime init failed: HmdNotFound"
        );

        last.clear();
        assert!(last.as_ptr().is_null());
    }
}
