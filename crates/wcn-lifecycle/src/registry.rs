use std::sync::{Arc, Mutex};

use crate::device::Device;
use crate::error::{LifecycleError, Result};
use crate::events::LifecycleEvent;

/// Index handle into a [`Registry`]. Stays valid until the slot is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(usize);

/// Arena of attached devices. Slots are reused after removal, lookups by
/// stale handle simply miss.
pub struct Registry<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Option<T>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, value: T) -> DeviceHandle {
        let mut slots = self.lock();
        if let Some(index) = slots.iter().position(Option::is_none) {
            slots[index] = Some(value);
            return DeviceHandle(index);
        }
        slots.push(Some(value));
        DeviceHandle(slots.len() - 1)
    }

    pub fn remove(&self, handle: DeviceHandle) -> Option<T> {
        self.lock().get_mut(handle.0).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Registry<T> {
    pub fn get(&self, handle: DeviceHandle) -> Option<T> {
        self.lock().get(handle.0).and_then(Clone::clone)
    }
}

/// Slot-addressed entry points for callers that hold a handle rather than a
/// device reference. A stale or never-issued handle fails with `NotFound`
/// instead of silently missing.
impl Registry<Arc<Device>> {
    pub fn device(&self, handle: DeviceHandle) -> Result<Arc<Device>> {
        self.get(handle).ok_or(LifecycleError::NotFound)
    }

    pub fn post_event(&self, handle: DeviceHandle, event: LifecycleEvent) -> Result<()> {
        self.device(handle)?.post_event(event)
    }

    pub fn post_event_sync(&self, handle: DeviceHandle, event: LifecycleEvent) -> Result<()> {
        self.device(handle)?.post_event_sync(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused_after_removal() {
        let registry = Registry::new();
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_ne!(a, b);

        assert_eq!(registry.remove(a), Some("a"));
        assert_eq!(registry.get(a), None);

        let c = registry.insert("c");
        assert_eq!(c, a);
        assert_eq!(registry.get(c), Some("c"));
        assert_eq!(registry.get(b), Some("b"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn stale_handles_miss_quietly() {
        let registry: Registry<&str> = Registry::new();
        let handle = registry.insert("x");
        registry.remove(handle);
        assert_eq!(registry.get(handle), None);
        assert_eq!(registry.remove(handle), None);
    }
}
