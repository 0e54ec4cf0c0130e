use crate::config::TrackerConfig;
use crate::error::ConnectError;
use crate::types::{BackendKind, Capabilities, DeviceEntry, DeviceHandle, Liveness, SampleResult};

/// A live connection to one tracking runtime.
///
/// Created by [`Backend::connect`] and given back exactly once through
/// [`Session::close`]. Because `close` consumes the session, a second close
/// cannot be expressed.
pub trait Session: Send {
    fn kind(&self) -> BackendKind;

    /// Whether the runtime behind this session is still serving data.
    fn poll_liveness(&mut self) -> Liveness;

    /// The runtime's device table, in scan order.
    fn devices(&mut self) -> Vec<DeviceEntry>;

    /// Latest pose and velocity of `device`, with backend validity flags applied.
    fn sample(&mut self, device: &DeviceHandle) -> SampleResult;

    /// Release native resources. Must tolerate a runtime that already died.
    /// May block when the backend advertises [`Capabilities::BLOCKING_CLOSE`].
    fn close(self: Box<Self>);
}

/// Factory for sessions against one kind of runtime.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Open a session. Failure means "try again later", never a crash.
    fn connect(&mut self, config: &TrackerConfig) -> Result<Box<dyn Session>, ConnectError>;
}

/// Backends compiled into this build, most preferred first.
///
/// macOS prefers libsurvive; elsewhere OpenVR wins when both are present.
pub fn compiled_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    if cfg!(feature = "lighthouse") {
        kinds.push(BackendKind::Lighthouse);
    }
    if cfg!(feature = "steamvr") {
        if cfg!(target_os = "macos") {
            kinds.push(BackendKind::SteamVr);
        } else {
            kinds.insert(0, BackendKind::SteamVr);
        }
    }
    kinds
}

/// The build-configured backend, honoring `config.backend` when that kind
/// is compiled in. `None` when no backend feature is enabled.
pub fn default_backend(config: &TrackerConfig) -> Option<Box<dyn Backend>> {
    let compiled = compiled_backends();
    let kind = match config.backend {
        Some(wanted) if compiled.contains(&wanted) => wanted,
        Some(wanted) => {
            log::warn!("{} backend requested but not compiled in", wanted);
            *compiled.first()?
        }
        None => *compiled.first()?,
    };

    log::info!("Using {} backend", kind);

    #[allow(unreachable_patterns)]
    match kind {
        #[cfg(feature = "lighthouse")]
        BackendKind::Lighthouse => Some(Box::new(crate::lighthouse::LighthouseBackend::native())),
        #[cfg(feature = "steamvr")]
        BackendKind::SteamVr => Some(Box::new(crate::steamvr::SteamVrBackend::native())),
        _ => None,
    }
}
