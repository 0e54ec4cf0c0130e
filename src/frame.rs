//! Backend-native poses to the canonical frame.
//!
//! The canonical frame is right-handed and Y-up. A backend whose native
//! frame differs by a proper rotation is described by an [`AxisRemap`]:
//! positions and velocities are permuted exactly, and orientations are
//! conjugated by the same basis change (scalar part kept, vector part
//! remapped like a position). A per-backend mount correction is then
//! applied in the body frame.

use crate::types::{BackendKind, Pose, RawPose, RawRotation, RawVelocity};
use glam::{DMat3, DQuat, DVec3, Vec3};

/// Signed axis permutation: `out[i] = sign[i] * v[source[i]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRemap {
    source: [usize; 3],
    sign: [f64; 3],
}

impl AxisRemap {
    pub const IDENTITY: AxisRemap = AxisRemap {
        source: [0, 1, 2],
        sign: [1.0, 1.0, 1.0],
    };

    /// Z-up to Y-up, a -90 degree turn about X: (x, y, z) -> (x, z, -y).
    pub const Z_UP_TO_Y_UP: AxisRemap = AxisRemap {
        source: [0, 2, 1],
        sign: [1.0, 1.0, -1.0],
    };

    /// Returns `None` unless `source` is a permutation of 0..3, every sign is
    /// +-1, and the result is a proper rotation (determinant +1).
    pub fn new(source: [usize; 3], sign: [f64; 3]) -> Option<Self> {
        let mut seen = [false; 3];
        for &s in &source {
            if s > 2 || seen[s] {
                return None;
            }
            seen[s] = true;
        }
        if sign.iter().any(|&s| s != 1.0 && s != -1.0) {
            return None;
        }
        let remap = Self { source, sign };
        (remap.determinant() == 1.0).then_some(remap)
    }

    pub fn apply(&self, v: [f64; 3]) -> [f64; 3] {
        [
            self.sign[0] * v[self.source[0]],
            self.sign[1] * v[self.source[1]],
            self.sign[2] * v[self.source[2]],
        ]
    }

    pub fn apply_inverse(&self, v: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for i in 0..3 {
            out[self.source[i]] = self.sign[i] * v[i];
        }
        out
    }

    /// Orientation remap: conjugation `B * q * B^-1` of a [w, x, y, z]
    /// quaternion by the basis change `B`.
    pub fn conjugate(&self, q: [f64; 4]) -> [f64; 4] {
        let [x, y, z] = self.apply([q[1], q[2], q[3]]);
        [q[0], x, y, z]
    }

    pub fn conjugate_inverse(&self, q: [f64; 4]) -> [f64; 4] {
        let [x, y, z] = self.apply_inverse([q[1], q[2], q[3]]);
        [q[0], x, y, z]
    }

    /// The remap as a rotation matrix (row i has `sign[i]` in column `source[i]`).
    pub fn matrix(&self) -> DMat3 {
        let mut cols = [[0.0; 3]; 3];
        for i in 0..3 {
            cols[self.source[i]][i] = self.sign[i];
        }
        DMat3::from_cols_array_2d(&cols)
    }

    pub fn determinant(&self) -> f64 {
        self.matrix().determinant()
    }

    /// Quaternion form of the basis change.
    pub fn basis(&self) -> DQuat {
        DQuat::from_mat3(&self.matrix()).normalize()
    }
}

/// Which rotation encoding a backend speaks natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationEncoding {
    Quaternion,
    Matrix,
}

/// Fixed conversion between one backend's native frame and the canonical one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameConverter {
    remap: AxisRemap,
    /// Right-multiplied body-frame correction.
    mount: DQuat,
    encoding: RotationEncoding,
}

impl FrameConverter {
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Lighthouse => Self::lighthouse(),
            BackendKind::SteamVr => Self::steamvr(),
        }
    }

    /// libsurvive: Z-up world, tracker body axes turned -90 degrees about X
    /// relative to the canonical device frame.
    pub fn lighthouse() -> Self {
        Self {
            remap: AxisRemap::Z_UP_TO_Y_UP,
            mount: DQuat::from_rotation_x(-std::f64::consts::FRAC_PI_2),
            encoding: RotationEncoding::Quaternion,
        }
    }

    /// OpenVR: already right-handed Y-up, rotation given as a matrix.
    pub fn steamvr() -> Self {
        Self {
            remap: AxisRemap::IDENTITY,
            mount: DQuat::IDENTITY,
            encoding: RotationEncoding::Matrix,
        }
    }

    pub fn remap(&self) -> AxisRemap {
        self.remap
    }

    /// Convert a native pose. `None` when the raw data cannot describe a
    /// pose (non-finite values, zero quaternion, singular matrix).
    pub fn to_canonical(&self, raw: &RawPose) -> Option<Pose> {
        if !raw.position.iter().all(|v| v.is_finite()) {
            return None;
        }
        let native = native_quat(&raw.rotation)?;

        let [w, x, y, z] = self
            .remap
            .conjugate([native.w, native.x, native.y, native.z]);
        let orientation = (DQuat::from_xyzw(x, y, z, w) * self.mount).normalize();
        let position = DVec3::from_array(self.remap.apply(raw.position));

        Some(Pose::new(position.as_vec3(), orientation.as_quat()))
    }

    /// Linear and angular velocity in the canonical frame. Rotation only.
    pub fn velocity_to_canonical(&self, raw: &RawVelocity) -> (Vec3, Vec3) {
        (
            DVec3::from_array(self.remap.apply(raw.linear)).as_vec3(),
            DVec3::from_array(self.remap.apply(raw.angular)).as_vec3(),
        )
    }

    /// Inverse of [`to_canonical`](Self::to_canonical), in this backend's
    /// native rotation encoding.
    pub fn to_native(&self, pose: &Pose) -> RawPose {
        let canonical = pose.orientation().as_dquat() * self.mount.inverse();
        let [w, x, y, z] = self
            .remap
            .conjugate_inverse([canonical.w, canonical.x, canonical.y, canonical.z]);
        let native = DQuat::from_xyzw(x, y, z, w).normalize();

        let rotation = match self.encoding {
            RotationEncoding::Quaternion => {
                RawRotation::Quaternion([native.w, native.x, native.y, native.z])
            }
            RotationEncoding::Matrix => {
                RawRotation::Matrix(DMat3::from_quat(native).transpose().to_cols_array_2d())
            }
        };

        RawPose {
            position: self.remap.apply_inverse(pose.position().as_dvec3().to_array()),
            rotation,
        }
    }
}

/// Convert a native pose with the fixed converter for `kind`.
pub fn to_canonical(raw: &RawPose, kind: BackendKind) -> Option<Pose> {
    FrameConverter::for_backend(kind).to_canonical(raw)
}

/// Unit quaternion for a native rotation, if it is usable.
fn native_quat(rotation: &RawRotation) -> Option<DQuat> {
    match rotation {
        RawRotation::Quaternion(q) => {
            if !q.iter().all(|v| v.is_finite()) {
                return None;
            }
            let quat = DQuat::from_xyzw(q[1], q[2], q[3], q[0]);
            let len = quat.length();
            (len > 1e-9).then(|| quat / len)
        }
        RawRotation::Matrix(rows) => {
            if !rows.iter().flatten().all(|v| v.is_finite()) {
                return None;
            }
            // Rows in, columns for glam.
            let m = DMat3::from_cols_array_2d(rows).transpose();
            if m.determinant() <= 1e-6 {
                return None;
            }
            Some(DQuat::from_mat3(&m).normalize())
        }
    }
}
