use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use wcn_regs::LinkProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// PCI device power states the sequencer moves between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePowerState {
    D0,
    D3Hot,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port operation timed out")]
    Timeout,
    #[error("port failure: {0}")]
    Failed(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("failed to {op}: {source}")]
    Port {
        op: &'static str,
        source: PortError,
    },
}

impl LinkError {
    fn port(op: &'static str, source: PortError) -> Self {
        LinkError::Port { op, source }
    }
}

/// Host PCI port operations the sequencer drives, as provided by the platform.
pub trait PciPort: Send + Sync {
    fn set_bus_master(&self, enable: bool);
    fn enable_device(&self) -> Result<(), PortError>;
    fn disable_device(&self);
    fn save_config(&self) -> Result<(), PortError>;
    fn restore_config(&self);
    fn set_power_state(&self, state: DevicePowerState) -> Result<(), PortError>;
    /// Asks the platform to train the link up or force it down.
    fn set_link(&self, up: bool) -> Result<(), PortError>;
    fn power_rail(&self, on: bool) -> Result<(), PortError>;
}

struct Inner {
    state: LinkState,
    /// A config snapshot was taken on the way down and must be restored.
    config_saved: bool,
}

/// Walks the link through suspend/resume and tracks whether an asynchronous
/// link-down has been reported.
pub struct LinkSequencer {
    port: Box<dyn PciPort>,
    inner: Mutex<Inner>,
    // Held only long enough to test-and-set; never across a port call.
    link_down_indicated: Mutex<bool>,
}

impl LinkSequencer {
    pub fn new(port: Box<dyn PciPort>) -> Self {
        Self {
            port,
            inner: Mutex::new(Inner {
                state: LinkState::Up,
                config_saved: false,
            }),
            link_down_indicated: Mutex::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn link_down_indicated(&self) -> bool {
        *self
            .link_down_indicated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Records an asynchronous link-down report. Returns `true` for the first
    /// report since the last successful resume; overlapping reports are
    /// dropped so only one recovery gets scheduled.
    pub fn indicate_link_down(&self) -> bool {
        let mut indicated = self
            .link_down_indicated
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *indicated {
            debug!("link-down already indicated, dropping duplicate report");
            return false;
        }
        *indicated = true;
        warn!("link down reported by platform");
        true
    }

    /// Quiesces the device and takes the link down.
    ///
    /// The config snapshot is skipped when the link is already dead or a
    /// recovery is in flight; the device side of the snapshot would be stale.
    pub fn suspend_link(&self, skip_config_save: bool) -> Result<(), LinkError> {
        let mut inner = self.lock();
        if inner.state == LinkState::Down {
            debug!("link already suspended");
            return Ok(());
        }

        self.port.set_bus_master(false);

        if skip_config_save || self.link_down_indicated() {
            debug!("skipping config snapshot on the way down");
        } else {
            self.port
                .save_config()
                .map_err(|e| LinkError::port("save config space", e))?;
            inner.config_saved = true;
        }

        self.port.disable_device();
        self.port
            .set_power_state(DevicePowerState::D3Hot)
            .map_err(|e| LinkError::port("enter D3hot", e))?;
        self.port
            .set_link(false)
            .map_err(|e| LinkError::port("bring link down", e))?;

        inner.state = LinkState::Down;
        info!("link suspended");
        Ok(())
    }

    /// Trains the link back up and re-enables the device. Clears the
    /// link-down indicator on success.
    pub fn resume_link(&self) -> Result<(), LinkError> {
        let mut inner = self.lock();
        if inner.state == LinkState::Up {
            debug!("link already resumed");
            return Ok(());
        }

        self.port
            .set_link(true)
            .map_err(|e| LinkError::port("bring link up", e))?;
        self.port
            .set_power_state(DevicePowerState::D0)
            .map_err(|e| LinkError::port("enter D0", e))?;
        self.port
            .enable_device()
            .map_err(|e| LinkError::port("enable device", e))?;

        if inner.config_saved {
            self.port.restore_config();
            inner.config_saved = false;
        }
        self.port.set_bus_master(true);

        inner.state = LinkState::Up;
        *self
            .link_down_indicated
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = false;
        info!("link resumed");
        Ok(())
    }

    /// Turns the device power rail on or off.
    pub fn set_power_rail(&self, on: bool) -> Result<(), LinkError> {
        self.port
            .power_rail(on)
            .map_err(|e| LinkError::port(if on { "rail on" } else { "rail off" }, e))
    }
}

impl LinkProbe for LinkSequencer {
    fn is_accessible(&self) -> bool {
        self.state() == LinkState::Up && !self.link_down_indicated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct PortCounts {
        save_config: AtomicUsize,
        restore_config: AtomicUsize,
        link_down: AtomicUsize,
        link_up: AtomicUsize,
    }

    #[derive(Default)]
    struct FakePort {
        counts: Arc<PortCounts>,
    }

    impl PciPort for FakePort {
        fn set_bus_master(&self, _enable: bool) {}
        fn enable_device(&self) -> Result<(), PortError> {
            Ok(())
        }
        fn disable_device(&self) {}
        fn save_config(&self) -> Result<(), PortError> {
            self.counts.save_config.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn restore_config(&self) {
            self.counts.restore_config.fetch_add(1, Ordering::SeqCst);
        }
        fn set_power_state(&self, _state: DevicePowerState) -> Result<(), PortError> {
            Ok(())
        }
        fn set_link(&self, up: bool) -> Result<(), PortError> {
            if up {
                self.counts.link_up.fetch_add(1, Ordering::SeqCst);
            } else {
                self.counts.link_down.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
        fn power_rail(&self, _on: bool) -> Result<(), PortError> {
            Ok(())
        }
    }

    fn sequencer() -> (LinkSequencer, Arc<PortCounts>) {
        let counts = Arc::new(PortCounts::default());
        let seq = LinkSequencer::new(Box::new(FakePort {
            counts: Arc::clone(&counts),
        }));
        (seq, counts)
    }

    #[test]
    fn config_snapshot_restored_exactly_once() {
        let (seq, counts) = sequencer();
        seq.suspend_link(false).unwrap();
        seq.resume_link().unwrap();
        assert_eq!(counts.save_config.load(Ordering::SeqCst), 1);
        assert_eq!(counts.restore_config.load(Ordering::SeqCst), 1);

        // No snapshot on the way down means no restore on the way up.
        seq.suspend_link(true).unwrap();
        seq.resume_link().unwrap();
        assert_eq!(counts.save_config.load(Ordering::SeqCst), 1);
        assert_eq!(counts.restore_config.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_skipped_when_link_down_indicated() {
        let (seq, counts) = sequencer();
        assert!(seq.indicate_link_down());
        seq.suspend_link(false).unwrap();
        assert_eq!(counts.save_config.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resume_clears_link_down_indicator() {
        let (seq, _) = sequencer();
        seq.indicate_link_down();
        seq.suspend_link(true).unwrap();
        assert!(!seq.is_accessible());
        seq.resume_link().unwrap();
        assert!(!seq.link_down_indicated());
        assert!(seq.is_accessible());
    }
}
