use crate::backend::Session;
use crate::types::{DeviceHandle, RawPose, RawRotation, RawVelocity, SampleResult};

/// Pull the latest sample for `device`.
///
/// Backends apply their own validity flags (timecode, pose-valid bit).
/// On top of that, a sample carrying non-finite numbers is downgraded to
/// `Invalid` so it can never reach the cached pose.
pub fn sample(session: &mut dyn Session, device: &DeviceHandle) -> SampleResult {
    match session.sample(device) {
        SampleResult::Valid(pose, velocity) if !is_finite(&pose, &velocity) => {
            log::debug!("Dropping non-finite sample for device {}", device.index());
            SampleResult::Invalid
        }
        other => other,
    }
}

fn is_finite(pose: &RawPose, velocity: &RawVelocity) -> bool {
    let rotation_finite = match &pose.rotation {
        RawRotation::Quaternion(q) => q.iter().all(|v| v.is_finite()),
        RawRotation::Matrix(m) => m.iter().flatten().all(|v| v.is_finite()),
    };
    rotation_finite
        && pose.position.iter().all(|v| v.is_finite())
        && velocity.linear.iter().all(|v| v.is_finite())
        && velocity.angular.iter().all(|v| v.is_finite())
}
