//! Scoped device affinity for the calling thread.
//!
//! Every engine entry point enters the device of its primary input before touching a backend and
//! leaves it on every exit path through `Drop`, so an early `?` return cannot leak affinity into the
//! caller's next operation.

use std::cell::Cell;

use crate::tensor::Device;

thread_local! {
    static CURRENT_DEVICE: Cell<Option<Device>> = const { Cell::new(None) };
}

/// Device made current by the innermost live [`DeviceScope`] on this thread, if any.
pub fn current_device() -> Option<Device> {
    CURRENT_DEVICE.with(Cell::get)
}

/// RAII guard making a device current until dropped.
#[must_use = "the device is released as soon as the scope is dropped"]
pub struct DeviceScope {
    previous: Option<Device>,
}

impl DeviceScope {
    pub fn enter(device: Device) -> Self {
        let previous = CURRENT_DEVICE.with(|current| current.replace(Some(device)));
        log::trace!("entered device scope {device}");
        DeviceScope { previous }
    }
}

impl Drop for DeviceScope {
    fn drop(&mut self) {
        CURRENT_DEVICE.with(|current| current.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_restore_previous_device() {
        assert_eq!(current_device(), None);
        {
            let _outer = DeviceScope::enter(Device::cpu(0));
            {
                let _inner = DeviceScope::enter(Device::cuda(1));
                assert_eq!(current_device(), Some(Device::cuda(1)));
            }
            assert_eq!(current_device(), Some(Device::cpu(0)));
        }
        assert_eq!(current_device(), None);
    }
}
