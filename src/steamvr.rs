//! OpenVR / SteamVR backend (vendor runtime).
//!
//! The app registers as a background application, so it never launches
//! SteamVR by itself and fails to connect until the runtime is up.

use crate::backend::{Backend, Session};
use crate::config::TrackerConfig;
use crate::types::{
    BackendKind, Capabilities, DeviceClass, DeviceEntry, DeviceHandle, Liveness, RawPose,
    RawRotation, RawVelocity, SampleResult,
};
use crate::Result;

/// Size of the OpenVR device table.
pub const MAX_TRACKED_DEVICE_COUNT: usize = 64;

/// One entry of `GetDeviceToAbsoluteTrackingPose`, standing universe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VrDevicePose {
    pub device_is_connected: bool,
    pub pose_is_valid: bool,
    /// Row-major 3x4 device-to-absolute transform.
    pub device_to_absolute: [[f32; 4]; 3],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
}

/// The part of `IVRSystem` a session uses.
pub trait VrRuntime: Send {
    fn device_count(&self) -> usize;

    fn is_device_connected(&self, index: usize) -> bool;

    fn device_class(&self, index: usize) -> DeviceClass;

    fn serial_number(&self, index: usize) -> Option<String>;

    /// Drain queued events; true when one of them asked the app to quit.
    fn poll_quit(&mut self) -> bool;

    fn device_pose(&mut self, index: usize) -> Option<VrDevicePose>;

    /// `VR_Shutdown`.
    fn shutdown(self: Box<Self>);
}

/// Split a row-major 3x4 transform into translation and rotation block.
pub fn split_transform(m: &[[f32; 4]; 3]) -> RawPose {
    let mut rows = [[0.0f64; 3]; 3];
    for (r, row) in m.iter().enumerate() {
        for c in 0..3 {
            rows[r][c] = row[c] as f64;
        }
    }
    RawPose {
        position: [m[0][3] as f64, m[1][3] as f64, m[2][3] as f64],
        rotation: RawRotation::Matrix(rows),
    }
}

type RuntimeFactory = Box<dyn FnMut() -> Result<Box<dyn VrRuntime>> + Send>;

pub struct SteamVrBackend {
    open: RuntimeFactory,
}

impl SteamVrBackend {
    /// Backend over any IVRSystem-shaped runtime source.
    pub fn with_runtime_factory(
        open: impl FnMut() -> Result<Box<dyn VrRuntime>> + Send + 'static,
    ) -> Self {
        Self {
            open: Box::new(open),
        }
    }

    /// Backend over the OpenVR runtime.
    #[cfg(feature = "steamvr")]
    pub fn native() -> Self {
        Self::with_runtime_factory(native::NativeRuntime::open)
    }
}

impl Backend for SteamVrBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SteamVr
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DEVICE_NAME | Capabilities::VELOCITY
    }

    fn connect(&mut self, _config: &TrackerConfig) -> Result<Box<dyn Session>> {
        let runtime = (self.open)()?;
        Ok(Box::new(SteamVrSession {
            runtime,
            quitting: false,
        }))
    }
}

struct SteamVrSession {
    runtime: Box<dyn VrRuntime>,
    /// Sticky once a quit event was seen.
    quitting: bool,
}

impl Session for SteamVrSession {
    fn kind(&self) -> BackendKind {
        BackendKind::SteamVr
    }

    fn poll_liveness(&mut self) -> Liveness {
        if !self.quitting && self.runtime.poll_quit() {
            self.quitting = true;
        }
        if self.quitting {
            Liveness::ShutdownRequested
        } else {
            Liveness::Alive
        }
    }

    fn devices(&mut self) -> Vec<DeviceEntry> {
        (0..self.runtime.device_count())
            .map(|index| {
                let connected = self.runtime.is_device_connected(index);
                DeviceEntry {
                    index,
                    connected,
                    class: self.runtime.device_class(index),
                    name: if connected {
                        self.runtime.serial_number(index)
                    } else {
                        None
                    },
                }
            })
            .collect()
    }

    fn sample(&mut self, device: &DeviceHandle) -> SampleResult {
        if self.quitting {
            return SampleResult::Invalid;
        }
        let Some(pose) = self.runtime.device_pose(device.index()) else {
            return SampleResult::DeviceDisconnected;
        };
        if !pose.device_is_connected {
            return SampleResult::DeviceDisconnected;
        }
        if !pose.pose_is_valid {
            return SampleResult::Invalid;
        }

        SampleResult::Valid(
            split_transform(&pose.device_to_absolute),
            RawVelocity {
                linear: pose.velocity.map(f64::from),
                angular: pose.angular_velocity.map(f64::from),
            },
        )
    }

    fn close(self: Box<Self>) {
        self.runtime.shutdown();
    }
}

#[cfg(feature = "steamvr")]
mod native {
    use super::{VrDevicePose, VrRuntime};
    use crate::types::DeviceClass;
    use crate::{Result, TrackerError};
    use openvr::{ApplicationType, TrackedDeviceClass, TrackingUniverseOrigin};

    pub(super) struct NativeRuntime {
        context: openvr::Context,
        system: openvr::System,
    }

    // SAFETY: OpenVR interfaces are process-global function tables; the
    // runtime is used by one thread at a time and moved only as a whole.
    unsafe impl Send for NativeRuntime {}

    impl NativeRuntime {
        pub(super) fn open() -> Result<Box<dyn VrRuntime>> {
            let context = unsafe { openvr::init(ApplicationType::Background) }
                .map_err(|e| TrackerError::Init(e.to_string()))?;
            let system = match context.system() {
                Ok(system) => system,
                Err(e) => {
                    log::debug!("IVRSystem unavailable: {}", e);
                    unsafe { context.shutdown() };
                    return Err(TrackerError::NoDeviceTable);
                }
            };
            Ok(Box::new(NativeRuntime { context, system }))
        }
    }

    impl VrRuntime for NativeRuntime {
        fn device_count(&self) -> usize {
            openvr::MAX_TRACKED_DEVICE_COUNT
        }

        fn is_device_connected(&self, index: usize) -> bool {
            self.system.is_tracked_device_connected(index as u32)
        }

        fn device_class(&self, index: usize) -> DeviceClass {
            match self.system.tracked_device_class(index as u32) {
                TrackedDeviceClass::GenericTracker => DeviceClass::GenericTracker,
                TrackedDeviceClass::Controller => DeviceClass::Controller,
                TrackedDeviceClass::HMD => DeviceClass::HeadMounted,
                TrackedDeviceClass::TrackingReference => DeviceClass::TrackingReference,
                _ => DeviceClass::Other,
            }
        }

        fn serial_number(&self, index: usize) -> Option<String> {
            self.system
                .string_tracked_device_property(index as u32, openvr::property::SerialNumber_String)
                .ok()
                .map(|s| s.to_string_lossy().into_owned())
        }

        fn poll_quit(&mut self) -> bool {
            let mut quit = false;
            while let Some((info, _)) = self
                .system
                .poll_next_event_with_pose(TrackingUniverseOrigin::Standing)
            {
                if let openvr::system::Event::Quit(_) = info.event {
                    quit = true;
                }
            }
            quit
        }

        fn device_pose(&mut self, index: usize) -> Option<VrDevicePose> {
            let poses = self
                .system
                .device_to_absolute_tracking_pose(TrackingUniverseOrigin::Standing, 0.0);
            let pose = poses.get(index)?;
            Some(VrDevicePose {
                device_is_connected: pose.device_is_connected(),
                pose_is_valid: pose.pose_is_valid(),
                device_to_absolute: *pose.device_to_absolute_tracking(),
                velocity: *pose.velocity(),
                angular_velocity: *pose.angular_velocity(),
            })
        }

        fn shutdown(self: Box<Self>) {
            unsafe { self.context.shutdown() };
            log::debug!("OpenVR shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Table {
        classes: Vec<(bool, DeviceClass)>,
        pose: Option<VrDevicePose>,
        quit_pending: bool,
        shutdowns: usize,
        pose_reads: usize,
    }

    struct FakeRuntime(Arc<Mutex<Table>>);

    impl VrRuntime for FakeRuntime {
        fn device_count(&self) -> usize {
            self.0.lock().unwrap().classes.len()
        }

        fn is_device_connected(&self, index: usize) -> bool {
            self.0.lock().unwrap().classes[index].0
        }

        fn device_class(&self, index: usize) -> DeviceClass {
            self.0.lock().unwrap().classes[index].1
        }

        fn serial_number(&self, index: usize) -> Option<String> {
            Some(format!("LHR-{:04}", index))
        }

        fn poll_quit(&mut self) -> bool {
            std::mem::take(&mut self.0.lock().unwrap().quit_pending)
        }

        fn device_pose(&mut self, _index: usize) -> Option<VrDevicePose> {
            let mut table = self.0.lock().unwrap();
            table.pose_reads += 1;
            table.pose
        }

        fn shutdown(self: Box<Self>) {
            self.0.lock().unwrap().shutdowns += 1;
        }
    }

    fn backend(table: &Arc<Mutex<Table>>) -> SteamVrBackend {
        let table = table.clone();
        SteamVrBackend::with_runtime_factory(move || {
            Ok(Box::new(FakeRuntime(table.clone())) as Box<dyn VrRuntime>)
        })
    }

    fn standing_pose() -> VrDevicePose {
        // Quarter turn about +Y, one meter up.
        VrDevicePose {
            device_is_connected: true,
            pose_is_valid: true,
            device_to_absolute: [
                [0.0, 0.0, 1.0, 0.5],
                [0.0, 1.0, 0.0, 1.0],
                [-1.0, 0.0, 0.0, -2.0],
            ],
            velocity: [0.0, 0.5, 0.0],
            angular_velocity: [0.0, 1.0, 0.0],
        }
    }

    fn table_with_tracker() -> Arc<Mutex<Table>> {
        Arc::new(Mutex::new(Table {
            classes: vec![
                (true, DeviceClass::HeadMounted),
                (true, DeviceClass::TrackingReference),
                (false, DeviceClass::GenericTracker),
                (true, DeviceClass::GenericTracker),
            ],
            pose: Some(standing_pose()),
            ..Table::default()
        }))
    }

    #[test]
    fn split_transform_reads_translation_column() {
        let raw = split_transform(&standing_pose().device_to_absolute);
        assert_eq!(raw.position, [0.5, 1.0, -2.0]);
        assert_eq!(
            raw.rotation,
            RawRotation::Matrix([[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]])
        );
    }

    #[test]
    fn locator_skips_disconnected_tracker() {
        let table = table_with_tracker();
        let mut session = backend(&table).connect(&TrackerConfig::default()).unwrap();

        let handle = crate::locator::locate_tracker(session.as_mut()).unwrap();
        assert_eq!(handle.index(), 3);
        assert_eq!(handle.name(), Some("LHR-0003"));
        session.close();
        assert_eq!(table.lock().unwrap().shutdowns, 1);
    }

    #[test]
    fn pose_flags_map_to_sample_results() {
        let table = table_with_tracker();
        let mut session = backend(&table).connect(&TrackerConfig::default()).unwrap();
        let handle = crate::locator::locate_tracker(session.as_mut()).unwrap();

        assert!(matches!(session.sample(&handle), SampleResult::Valid(..)));

        table.lock().unwrap().pose.as_mut().unwrap().pose_is_valid = false;
        assert_eq!(session.sample(&handle), SampleResult::Invalid);

        table.lock().unwrap().pose.as_mut().unwrap().device_is_connected = false;
        assert_eq!(session.sample(&handle), SampleResult::DeviceDisconnected);

        table.lock().unwrap().pose = None;
        assert_eq!(session.sample(&handle), SampleResult::DeviceDisconnected);
        session.close();
    }

    #[test]
    fn quit_event_is_sticky_and_blocks_reads() {
        let table = table_with_tracker();
        let mut session = backend(&table).connect(&TrackerConfig::default()).unwrap();
        let handle = crate::locator::locate_tracker(session.as_mut()).unwrap();
        assert_eq!(session.poll_liveness(), Liveness::Alive);

        table.lock().unwrap().quit_pending = true;
        assert_eq!(session.poll_liveness(), Liveness::ShutdownRequested);
        assert_eq!(session.poll_liveness(), Liveness::ShutdownRequested);

        let reads = table.lock().unwrap().pose_reads;
        assert_eq!(session.sample(&handle), SampleResult::Invalid);
        assert_eq!(table.lock().unwrap().pose_reads, reads);
        session.close();
    }

    #[test]
    fn tracker_over_steamvr() {
        let table = table_with_tracker();
        let mut tracker =
            crate::Tracker::with_backend(Box::new(backend(&table)), TrackerConfig::default());

        assert!(tracker.setup());
        tracker.update();
        assert!(tracker.is_tracking());
        assert!(tracker
            .position()
            .abs_diff_eq(glam::Vec3::new(0.5, 1.0, -2.0), 1e-6));
        let expected = glam::Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        assert!(tracker.orientation().dot(expected).abs() > 1.0 - 1e-6);
        assert!(tracker
            .velocity()
            .abs_diff_eq(glam::Vec3::new(0.0, 0.5, 0.0), 1e-6));

        table.lock().unwrap().quit_pending = true;
        tracker.update();
        assert!(!tracker.is_connected());
        assert_eq!(tracker.release_stats().inline, 1);
        assert_eq!(table.lock().unwrap().shutdowns, 1);
    }
}
