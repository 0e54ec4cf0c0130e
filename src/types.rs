use glam::{EulerRot, Mat4, Quat, Vec3};
use std::fmt;

/// Native runtime a session talks to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// libsurvive, the open lighthouse driver. Native frame is Z-up.
    Lighthouse = 0,
    /// OpenVR / SteamVR. Native frame is already Y-up.
    SteamVr = 1,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Lighthouse => f.write_str("lighthouse"),
            BackendKind::SteamVr => f.write_str("steamvr"),
        }
    }
}

/// Pose in the canonical frame: right-handed, Y-up, meters.
///
/// The transform is always recomposed from position and orientation, so the
/// three stay consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    position: Vec3,
    orientation: Quat,
    transform: Mat4,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
        transform: Mat4::IDENTITY,
    };

    /// Build a pose, normalizing the orientation and recomposing the transform
    /// as translation * rotation.
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        let orientation = orientation.normalize();
        Self {
            position,
            orientation,
            transform: Mat4::from_rotation_translation(orientation, position),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    /// Column-major homogeneous transform.
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Euler angles [pitch, yaw, roll] in degrees about X, Y and Z.
    ///
    /// Same decomposition as `glm::eulerAngles`: the orientation equals
    /// `Rz(roll) * Ry(yaw) * Rx(pitch)`, with yaw limited to [-90, 90].
    pub fn euler_degrees(&self) -> [f32; 3] {
        let (roll, yaw, pitch) = self.orientation.to_euler(EulerRot::ZYX);
        [pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees()]
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Native rotation encoding as handed out by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawRotation {
    /// Quaternion [w, x, y, z], not necessarily normalized.
    Quaternion([f64; 4]),
    /// 3x3 row-major rotation block.
    Matrix([[f64; 3]; 3]),
}

/// Pose exactly as the backend reported it, in the backend's own axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    pub position: [f64; 3],
    pub rotation: RawRotation,
}

/// First-derivative terms in the backend's own axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawVelocity {
    /// Linear velocity, m/s.
    pub linear: [f64; 3],
    /// Angular velocity as an axis-angle rate vector, rad/s.
    pub angular: [f64; 3],
}

/// Outcome of asking a session for the latest pose of one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleResult {
    Valid(RawPose, RawVelocity),
    /// A pose exists but the backend does not vouch for it this frame.
    Invalid,
    /// The device left the session's device table.
    DeviceDisconnected,
}

/// Result of a session liveness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    ShutdownRequested,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

/// Role tag of an entry in a session's device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    GenericTracker,
    Controller,
    HeadMounted,
    TrackingReference,
    Other,
}

/// One row of a session's device table, in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Position in the session's table. Sessions resolve handles by it.
    pub index: usize,
    pub connected: bool,
    pub class: DeviceClass,
    pub name: Option<String>,
}

/// Weak reference into a live session's device table.
///
/// Only the locator creates these, and the tracker drops a handle in the
/// same step that releases its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    index: usize,
    name: Option<String>,
}

impl DeviceHandle {
    pub(crate) fn new(index: usize, name: Option<String>) -> Self {
        Self { index, name }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

bitflags::bitflags! {
    /// What a backend can provide or requires.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct Capabilities: u32 {
        /// Devices report a human-readable name or serial.
        const DEVICE_NAME    = 1 << 0;
        /// Samples carry linear and angular velocity.
        const VELOCITY       = 1 << 1;
        /// Closing a session may stall on hardware I/O; release it detached.
        const BLOCKING_CLOSE = 1 << 2;
        /// Devices show up some time after connect, not at connect.
        const ASYNC_DISCOVERY = 1 << 3;
    }
}

/// Coarse status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    NotConnected,
    ConnectedNotTracking,
    Tracking,
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerStatus::NotConnected => f.write_str("Not connected"),
            TrackerStatus::ConnectedNotTracking => f.write_str("Connected (not tracking)"),
            TrackerStatus::Tracking => f.write_str("Tracking"),
        }
    }
}

/// Copy of everything a consumer may read after `update()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingSnapshot {
    pub status: ConnectionStatus,
    pub tracking: bool,
    pub pose: Pose,
    /// Canonical-frame m/s. Stale unless `tracking`.
    pub velocity: Vec3,
    /// Canonical-frame rad/s. Stale unless `tracking`.
    pub angular_velocity: Vec3,
}
