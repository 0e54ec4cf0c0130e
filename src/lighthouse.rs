//! libsurvive backend (open lighthouse driver).
//!
//! libsurvive runs its own tracking thread and discovers devices some time
//! after init, hence [`Capabilities::ASYNC_DISCOVERY`]: `connect` returns as
//! soon as the thread runs and the tracker scans the session for a while.
//! Its close call joins that thread and can hang on USB I/O, hence
//! [`Capabilities::BLOCKING_CLOSE`].

use crate::backend::{Backend, Session};
use crate::config::TrackerConfig;
use crate::types::{
    BackendKind, Capabilities, DeviceClass, DeviceEntry, DeviceHandle, Liveness, RawPose,
    RawRotation, RawVelocity, SampleResult,
};
use crate::{Result, TrackerError};

// -- SurviveSimpleObject_type --
pub const OBJECT_TYPE_UNKNOWN: i32 = 0;
pub const OBJECT_TYPE_LIGHTHOUSE: i32 = 1;
pub const OBJECT_TYPE_OBJECT: i32 = 2;
pub const OBJECT_TYPE_HMD: i32 = 3;

// -- SurviveSimpleSubobject_type --
pub const SUBTYPE_GENERIC: i32 = 0;
pub const SUBTYPE_INDEX_HMD: i32 = 1;
pub const SUBTYPE_VIVE_HMD: i32 = 2;
pub const SUBTYPE_KNUCKLES_R: i32 = 3;
pub const SUBTYPE_KNUCKLES_L: i32 = 4;
pub const SUBTYPE_WAND: i32 = 5;
pub const SUBTYPE_TRACKER: i32 = 6;
pub const SUBTYPE_TRACKER_GEN2: i32 = 7;

/// `SurvivePose`: position then [w, x, y, z] rotation, Z-up world.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurvivePose {
    pub pos: [f64; 3],
    pub rot: [f64; 4],
}

/// `SurviveVelocity`: linear velocity and axis-angle angular rate.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurviveVelocity {
    pub pos: [f64; 3],
    pub axis_angle_rot: [f64; 3],
}

/// One object reported by libsurvive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurviveObject {
    pub object_type: i32,
    pub subtype: i32,
    pub name: String,
}

/// The part of the libsurvive simple API a session uses.
pub trait SurviveContext: Send {
    fn is_running(&self) -> bool;

    /// Objects in libsurvive's iteration order. Indices into this list are
    /// what [`latest_pose`](Self::latest_pose) takes.
    fn objects(&mut self) -> Vec<SurviveObject>;

    /// Timecode and pose of object `index`; `None` if it no longer exists.
    fn latest_pose(&mut self, index: usize) -> Option<(f64, SurvivePose)>;

    fn latest_velocity(&mut self, index: usize) -> Option<SurviveVelocity>;

    /// `survive_simple_close`. May block.
    fn close(self: Box<Self>);
}

/// Map a libsurvive type/subtype pair to a device class.
pub fn classify(object_type: i32, subtype: i32) -> DeviceClass {
    match (object_type, subtype) {
        (OBJECT_TYPE_OBJECT, SUBTYPE_TRACKER | SUBTYPE_TRACKER_GEN2) => {
            DeviceClass::GenericTracker
        }
        (OBJECT_TYPE_OBJECT, SUBTYPE_WAND | SUBTYPE_KNUCKLES_L | SUBTYPE_KNUCKLES_R) => {
            DeviceClass::Controller
        }
        (OBJECT_TYPE_HMD, _) => DeviceClass::HeadMounted,
        (OBJECT_TYPE_LIGHTHOUSE, _) => DeviceClass::TrackingReference,
        _ => DeviceClass::Other,
    }
}

type ContextFactory = Box<dyn FnMut() -> Result<Box<dyn SurviveContext>> + Send>;

pub struct LighthouseBackend {
    open: ContextFactory,
}

impl LighthouseBackend {
    /// Backend over any libsurvive-shaped context source.
    pub fn with_context_factory(
        open: impl FnMut() -> Result<Box<dyn SurviveContext>> + Send + 'static,
    ) -> Self {
        Self {
            open: Box::new(open),
        }
    }

    /// Backend over the linked libsurvive.
    #[cfg(feature = "lighthouse")]
    pub fn native() -> Self {
        Self::with_context_factory(native::NativeContext::open)
    }
}

impl Backend for LighthouseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Lighthouse
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DEVICE_NAME
            | Capabilities::VELOCITY
            | Capabilities::BLOCKING_CLOSE
            | Capabilities::ASYNC_DISCOVERY
    }

    fn connect(&mut self, _config: &TrackerConfig) -> Result<Box<dyn Session>> {
        let context = (self.open)()?;
        if !context.is_running() {
            // The tracking thread already exited, so this close has nothing to join.
            context.close();
            return Err(TrackerError::RuntimeNotRunning);
        }
        Ok(Box::new(LighthouseSession { context }))
    }
}

struct LighthouseSession {
    context: Box<dyn SurviveContext>,
}

impl Session for LighthouseSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Lighthouse
    }

    fn poll_liveness(&mut self) -> Liveness {
        if self.context.is_running() {
            Liveness::Alive
        } else {
            Liveness::Crashed
        }
    }

    fn devices(&mut self) -> Vec<DeviceEntry> {
        self.context
            .objects()
            .into_iter()
            .enumerate()
            .map(|(index, object)| DeviceEntry {
                index,
                connected: true,
                class: classify(object.object_type, object.subtype),
                name: Some(object.name),
            })
            .collect()
    }

    fn sample(&mut self, device: &DeviceHandle) -> SampleResult {
        let Some((timecode, pose)) = self.context.latest_pose(device.index()) else {
            return SampleResult::DeviceDisconnected;
        };
        // A non-positive timecode means no solve has landed yet.
        if timecode.is_nan() || timecode <= 0.0 {
            return SampleResult::Invalid;
        }
        let velocity = self
            .context
            .latest_velocity(device.index())
            .unwrap_or_default();

        SampleResult::Valid(
            RawPose {
                position: pose.pos,
                rotation: RawRotation::Quaternion(pose.rot),
            },
            RawVelocity {
                linear: velocity.pos,
                angular: velocity.axis_angle_rot,
            },
        )
    }

    fn close(self: Box<Self>) {
        self.context.close();
    }
}

#[cfg(feature = "lighthouse")]
mod native {
    use super::{SurviveContext, SurviveObject, SurvivePose, SurviveVelocity};
    use crate::{Result, TrackerError};
    use std::ffi::{c_char, c_int, CStr, CString};
    use std::ptr::NonNull;

    #[repr(C)]
    struct SurviveSimpleContext {
        _private: [u8; 0],
    }

    #[repr(C)]
    struct SurviveSimpleObject {
        _private: [u8; 0],
    }

    extern "C" {
        fn survive_simple_init(
            argc: c_int,
            argv: *const *mut c_char,
        ) -> *mut SurviveSimpleContext;
        fn survive_simple_start_thread(ctx: *mut SurviveSimpleContext);
        fn survive_simple_is_running(ctx: *mut SurviveSimpleContext) -> bool;
        fn survive_simple_close(ctx: *mut SurviveSimpleContext);
        fn survive_simple_get_first_object(
            ctx: *mut SurviveSimpleContext,
        ) -> *const SurviveSimpleObject;
        fn survive_simple_get_next_object(
            ctx: *mut SurviveSimpleContext,
            curr: *const SurviveSimpleObject,
        ) -> *const SurviveSimpleObject;
        fn survive_simple_object_get_type(obj: *const SurviveSimpleObject) -> c_int;
        fn survive_simple_object_get_subtype(obj: *const SurviveSimpleObject) -> c_int;
        fn survive_simple_object_name(obj: *const SurviveSimpleObject) -> *const c_char;
        fn survive_simple_object_get_latest_pose(
            obj: *const SurviveSimpleObject,
            pose: *mut SurvivePose,
        ) -> f64;
        fn survive_simple_object_get_latest_velocity(
            obj: *const SurviveSimpleObject,
            velocity: *mut SurviveVelocity,
        ) -> f64;
    }

    /// Owned `SurviveSimpleContext` plus the object pointers from the last scan.
    pub(super) struct NativeContext {
        ctx: NonNull<SurviveSimpleContext>,
        objects: Vec<*const SurviveSimpleObject>,
    }

    // SAFETY: the context is owned by exactly one session at a time; the
    // session moves to the release thread only as a whole, after the
    // tracker stopped using it. libsurvive guards its own state internally.
    unsafe impl Send for NativeContext {}

    impl NativeContext {
        pub(super) fn open() -> Result<Box<dyn SurviveContext>> {
            let program = CString::new("vive-tracker")
                .map_err(|e| TrackerError::Native(e.to_string()))?;
            let argv = [program.as_ptr() as *mut c_char, std::ptr::null_mut()];

            let raw = unsafe { survive_simple_init(1, argv.as_ptr()) };
            let ctx = NonNull::new(raw)
                .ok_or_else(|| TrackerError::Init("survive_simple_init returned null".into()))?;

            unsafe { survive_simple_start_thread(ctx.as_ptr()) };
            log::info!("libsurvive context started");

            Ok(Box::new(NativeContext {
                ctx,
                objects: Vec::new(),
            }))
        }

        fn object(&self, index: usize) -> Option<*const SurviveSimpleObject> {
            self.objects.get(index).copied().filter(|p| !p.is_null())
        }
    }

    impl SurviveContext for NativeContext {
        fn is_running(&self) -> bool {
            unsafe { survive_simple_is_running(self.ctx.as_ptr()) }
        }

        fn objects(&mut self) -> Vec<SurviveObject> {
            self.objects.clear();
            let mut out = Vec::new();
            unsafe {
                let mut obj = survive_simple_get_first_object(self.ctx.as_ptr());
                while !obj.is_null() {
                    let name = survive_simple_object_name(obj);
                    let name = if name.is_null() {
                        String::new()
                    } else {
                        CStr::from_ptr(name).to_string_lossy().into_owned()
                    };
                    out.push(SurviveObject {
                        object_type: survive_simple_object_get_type(obj),
                        subtype: survive_simple_object_get_subtype(obj),
                        name,
                    });
                    self.objects.push(obj);
                    obj = survive_simple_get_next_object(self.ctx.as_ptr(), obj);
                }
            }
            out
        }

        fn latest_pose(&mut self, index: usize) -> Option<(f64, SurvivePose)> {
            let obj = self.object(index)?;
            let mut pose = SurvivePose::default();
            let timecode = unsafe { survive_simple_object_get_latest_pose(obj, &mut pose) };
            Some((timecode, pose))
        }

        fn latest_velocity(&mut self, index: usize) -> Option<SurviveVelocity> {
            let obj = self.object(index)?;
            let mut velocity = SurviveVelocity::default();
            unsafe { survive_simple_object_get_latest_velocity(obj, &mut velocity) };
            Some(velocity)
        }

        fn close(self: Box<Self>) {
            unsafe { survive_simple_close(self.ctx.as_ptr()) };
            log::debug!("libsurvive context closed");
        }
    }
}
