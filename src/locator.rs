use crate::backend::Session;
use crate::types::{DeviceClass, DeviceHandle};

/// First connected generic tracker in the session's device table.
///
/// Scan order decides when several trackers are visible; there is no other
/// ranking.
pub fn locate_tracker(session: &mut dyn Session) -> Option<DeviceHandle> {
    let devices = session.devices();
    let mut trackers = devices
        .into_iter()
        .filter(|d| d.connected && d.class == DeviceClass::GenericTracker);

    let first = trackers.next()?;
    let others = trackers.count();
    if others > 0 {
        log::debug!(
            "{} more tracker(s) visible, using the first at index {}",
            others,
            first.index
        );
    }
    Some(DeviceHandle::new(first.index, first.name))
}
