use crate::backend::{self, Backend, Session};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{self, TrackerConfig};
use crate::frame::FrameConverter;
use crate::locator::locate_tracker;
use crate::sampler;
use crate::teardown::{ReleaseMode, ReleaseStats, Releaser};
use crate::types::{
    BackendKind, Capabilities, ConnectionStatus, DeviceHandle, Liveness, Pose, SampleResult,
    TrackerStatus, TrackingSnapshot,
};
use crate::{Result, TrackerError};
use glam::{Mat4, Quat, Vec3};
use std::time::{Duration, Instant};

/// Detached closes allowed in flight before reconnects pause. A native close
/// that hangs must not turn every retry into another stuck thread.
const MAX_OUTSTANDING_RELEASES: usize = 4;

/// A session together with the tracker located in it. They are created and
/// dropped as one, so a handle never outlives its session.
struct Link {
    session: Box<dyn Session>,
    device: DeviceHandle,
}

/// A fresh session of an asynchronously discovering backend that has not
/// shown a tracker yet. The tracker stays disconnected while it is scanned.
struct Discovery {
    session: Box<dyn Session>,
    started: Duration,
    last_scan: Duration,
}

/// What one tick of a connected link produced.
enum Tick {
    Lost(Liveness),
    Sampled(SampleResult),
}

/// Live pose of one tracker puck, independent of the runtime behind it.
///
/// Drive it with [`update`](Self::update) once per frame from one thread,
/// then read the cached state through the accessors. All mutation happens
/// inside `update`, `setup`, `retry_now` and `close`; the accessors are pure
/// reads of the last completed update.
///
/// Reading the accessors before [`setup`](Self::setup) is allowed and yields
/// the initial state: disconnected, not tracking, identity pose, zero
/// velocities. Calling accessors from another thread while `update` runs is
/// not supported; wrap the tracker in a lock if you need that.
pub struct Tracker {
    backend: Box<dyn Backend>,
    converter: FrameConverter,
    clock: Box<dyn Clock>,
    config: TrackerConfig,
    link: Option<Link>,
    discovery: Option<Discovery>,
    tracking: bool,
    pose: Pose,
    velocity: Vec3,
    angular_velocity: Vec3,
    last_reconnect_attempt: Option<Duration>,
    releaser: Releaser,
}

impl Tracker {
    /// Tracker over the build-configured backend, configured from the
    /// environment.
    pub fn new() -> Result<Tracker> {
        let config = TrackerConfig::from_env();
        let backend = backend::default_backend(&config).ok_or(TrackerError::NoBackend)?;
        Ok(Self::with_backend(backend, config))
    }

    pub fn with_backend(backend: Box<dyn Backend>, config: TrackerConfig) -> Tracker {
        let converter = FrameConverter::for_backend(backend.kind());
        Tracker {
            backend,
            converter,
            clock: Box::new(MonotonicClock::new()),
            config,
            link: None,
            discovery: None,
            tracking: false,
            pose: Pose::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            last_reconnect_attempt: None,
            releaser: Releaser::new(),
        }
    }

    /// Replace the time source used by the reconnect throttle.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Tracker {
        self.clock = clock;
        self
    }

    /// Initial connect. On failure the tracker stays usable and, with
    /// auto-reconnect on, keeps retrying from `update()`. Calling it while
    /// connected starts over with a fresh session.
    ///
    /// This is the only call that blocks on device discovery: for backends
    /// that find devices asynchronously it waits up to the discovery window.
    pub fn setup(&mut self) -> bool {
        if self.link.is_some() || self.discovery.is_some() {
            self.close();
        }
        let connected = self.try_connect(true);
        self.last_reconnect_attempt = Some(self.clock.now());
        connected
    }

    /// Advance the state machine by one tick.
    pub fn update(&mut self) {
        let tick = match self.link.as_mut() {
            None => None,
            Some(link) => Some(Self::tick(link)),
        };

        match tick {
            None => {
                self.tracking = false;
                if self.discovery.is_some() {
                    self.scan_for_tracker();
                } else if self.config.auto_reconnect && self.reconnect_due() {
                    self.reconnect();
                    self.last_reconnect_attempt = Some(self.clock.now());
                }
            }
            Some(Tick::Lost(liveness)) => {
                match liveness {
                    Liveness::ShutdownRequested => {
                        log::warn!("{} runtime is shutting down", self.backend.kind())
                    }
                    _ => log::warn!("{} runtime stopped running", self.backend.kind()),
                }
                self.disconnect();
            }
            Some(Tick::Sampled(SampleResult::Valid(raw_pose, raw_velocity))) => {
                match self.converter.to_canonical(&raw_pose) {
                    Some(pose) => {
                        let (velocity, angular_velocity) =
                            self.converter.velocity_to_canonical(&raw_velocity);
                        self.pose = pose;
                        self.velocity = velocity;
                        self.angular_velocity = angular_velocity;
                        self.tracking = true;
                    }
                    None => {
                        log::debug!("Unusable raw pose {:?}", raw_pose);
                        self.tracking = false;
                    }
                }
            }
            Some(Tick::Sampled(SampleResult::Invalid)) => {
                log::trace!("Pose not valid this frame");
                self.tracking = false;
            }
            Some(Tick::Sampled(SampleResult::DeviceDisconnected)) => {
                log::warn!("Tracker disconnected");
                self.disconnect();
            }
        }
    }

    /// Liveness first; a session that is going away is never sampled.
    fn tick(link: &mut Link) -> Tick {
        match link.session.poll_liveness() {
            Liveness::Alive => Tick::Sampled(sampler::sample(link.session.as_mut(), &link.device)),
            lost => Tick::Lost(lost),
        }
    }

    /// Connect attempt outside the throttle. This is how a caller retries
    /// after failures when auto-reconnect is off. No-op while connected.
    ///
    /// Never blocks on discovery. When the backend finds devices
    /// asynchronously, the following `update()` calls keep scanning the new
    /// session, so `false` here does not mean the attempt is over.
    pub fn retry_now(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }
        if self.discovery.is_none() {
            self.try_connect(false);
        }
        self.last_reconnect_attempt = Some(self.clock.now());
        self.link.is_some()
    }

    /// Release every native resource. Safe in any state. The tracker stays
    /// usable; `update()` will reconnect if auto-reconnect is on.
    pub fn close(&mut self) {
        if self.link.is_some() || self.discovery.is_some() {
            log::info!("Closing {} session", self.backend.kind());
        }
        self.disconnect();
    }

    fn reconnect_due(&self) -> bool {
        match self.last_reconnect_attempt {
            None => true,
            Some(last) => {
                self.clock.now().saturating_sub(last) >= self.config.reconnect_interval
            }
        }
    }

    /// Throttled attempt from `update()`.
    fn reconnect(&mut self) {
        let outstanding = self.releaser.outstanding();
        if outstanding >= MAX_OUTSTANDING_RELEASES {
            log::warn!(
                "{} earlier {} sessions still closing, not reconnecting yet",
                outstanding,
                self.backend.kind()
            );
            return;
        }
        self.try_connect(false);
    }

    /// Open a session and look for the tracker. With `wait`, a backend that
    /// discovers asynchronously is polled here for the discovery window;
    /// without it, such a session is parked in `discovery` for `update()`.
    fn try_connect(&mut self, wait: bool) -> bool {
        self.tracking = false;

        let mut session = match self.backend.connect(&self.config) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("{} connect failed: {}", self.backend.kind(), e);
                return false;
            }
        };

        if let Some(device) = locate_tracker(session.as_mut()) {
            self.attach(session, device);
            return true;
        }

        let discovers = self
            .backend
            .capabilities()
            .contains(Capabilities::ASYNC_DISCOVERY);
        if !discovers || self.config.discovery_window.is_zero() {
            log::warn!("No tracker found, will keep looking...");
            self.release(session);
            return false;
        }

        if wait {
            return self.wait_for_tracker(session);
        }

        log::debug!(
            "No tracker yet, scanning for up to {:?}",
            self.config.discovery_window
        );
        let now = self.clock.now();
        self.discovery = Some(Discovery {
            session,
            started: now,
            last_scan: now,
        });
        false
    }

    /// Blocking discovery, used by `setup()` only.
    fn wait_for_tracker(&mut self, mut session: Box<dyn Session>) -> bool {
        let started = Instant::now();
        loop {
            let remaining = self.config.discovery_window.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(self.config.discovery_poll.min(remaining));

            if session.poll_liveness() != Liveness::Alive {
                log::warn!("{} runtime stopped during discovery", self.backend.kind());
                break;
            }
            if let Some(device) = locate_tracker(session.as_mut()) {
                self.attach(session, device);
                return true;
            }
        }

        log::warn!("No tracker found during initial scan, will keep looking...");
        self.release(session);
        false
    }

    /// One non-blocking step of a parked discovery.
    fn scan_for_tracker(&mut self) {
        let Some(mut discovery) = self.discovery.take() else {
            return;
        };
        let now = self.clock.now();

        if discovery.session.poll_liveness() != Liveness::Alive {
            log::warn!("{} runtime stopped during discovery", self.backend.kind());
            self.release(discovery.session);
            self.last_reconnect_attempt = Some(now);
            return;
        }

        if now.saturating_sub(discovery.last_scan) >= self.config.discovery_poll {
            discovery.last_scan = now;
            if let Some(device) = locate_tracker(discovery.session.as_mut()) {
                self.attach(discovery.session, device);
                return;
            }
        }

        if now.saturating_sub(discovery.started) >= self.config.discovery_window {
            log::warn!(
                "No tracker found within {:?}, will keep looking...",
                self.config.discovery_window
            );
            self.release(discovery.session);
            // The next attempt is one interval after this one gave up.
            self.last_reconnect_attempt = Some(now);
            return;
        }

        self.discovery = Some(discovery);
    }

    fn attach(&mut self, session: Box<dyn Session>, device: DeviceHandle) {
        match device.name() {
            Some(name) => log::info!("Connected to tracker: {}", name),
            None => log::info!("Connected to tracker at index {}", device.index()),
        }
        self.link = Some(Link { session, device });
    }

    /// Drop the device handle and release the session in one step. Also
    /// releases a session still under discovery.
    fn disconnect(&mut self) {
        self.tracking = false;
        if let Some(Link { session, device }) = self.link.take() {
            log::debug!("Releasing device handle {}", device.index());
            drop(device);
            self.release(session);
        }
        if let Some(discovery) = self.discovery.take() {
            self.release(discovery.session);
        }
    }

    fn release(&mut self, session: Box<dyn Session>) {
        let mode = if self
            .backend
            .capabilities()
            .contains(Capabilities::BLOCKING_CLOSE)
        {
            ReleaseMode::Detached
        } else {
            ReleaseMode::Inline
        };
        self.releaser.release(session, mode);
    }

    pub fn set_auto_reconnect(&mut self, enable: bool) {
        self.config.auto_reconnect = enable;
    }

    /// Minimum seconds between automatic connect attempts. Negative or
    /// non-finite values mean "no throttle".
    pub fn set_reconnect_interval(&mut self, seconds: f32) {
        self.config.reconnect_interval = config::seconds(seconds);
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        if self.link.is_some() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// True only if the last `update()` produced a fresh valid pose.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn status(&self) -> TrackerStatus {
        match (self.is_connected(), self.tracking) {
            (false, _) => TrackerStatus::NotConnected,
            (true, false) => TrackerStatus::ConnectedNotTracking,
            (true, true) => TrackerStatus::Tracking,
        }
    }

    /// Last good pose. Still holds the previous value while not tracking.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn position(&self) -> Vec3 {
        self.pose.position()
    }

    pub fn orientation(&self) -> Quat {
        self.pose.orientation()
    }

    pub fn matrix(&self) -> Mat4 {
        self.pose.transform()
    }

    /// Stale unless [`is_tracking`](Self::is_tracking).
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Stale unless [`is_tracking`](Self::is_tracking).
    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Name or serial of the connected tracker, when the backend reports one.
    pub fn device_name(&self) -> Option<&str> {
        self.link.as_ref().and_then(|link| link.device.name())
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            status: self.connection_status(),
            tracking: self.tracking,
            pose: self.pose,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
        }
    }

    pub fn release_stats(&self) -> ReleaseStats {
        self.releaser.stats()
    }

    /// Wait up to `timeout` for detached session releases to finish.
    /// Returns true when none are outstanding.
    pub fn wait_for_releases(&self, timeout: Duration) -> bool {
        self.releaser.wait_idle(timeout)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.close();
    }
}
