use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

/// Byte offset below which the BAR decodes directly, without the remap window.
pub const MAX_UNWINDOWED_ADDRESS: u32 = 0x8_0000;
/// Aperture through which windowed offsets are accessed.
pub const WINDOW_START: u32 = MAX_UNWINDOWED_ADDRESS;
pub const WINDOW_RANGE_MASK: u32 = 0x7_FFFF;
pub const WINDOW_SHIFT: u32 = 19;
pub const WINDOW_VALUE_MASK: u32 = 0x3F;
pub const WINDOW_ENABLE_BIT: u32 = 0x4000_0000;
/// Offset of the remap window control register inside the BAR.
pub const REMAP_WINDOW_CTRL_OFFSET: u32 = 0x310C;

/// Raw 32-bit MMIO access to the mapped BAR.
pub trait Bar: Send + Sync {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
}

/// Answers whether the bus is currently safe to touch.
///
/// Register access is refused while the link is suspended or a link-down
/// notification is pending; poking a dead link can wedge the root complex.
pub trait LinkProbe: Send + Sync {
    fn is_accessible(&self) -> bool;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegError {
    #[error("register access refused: PCI link is down or suspended")]
    LinkDown,
}

/// Windowed register accessor for one device BAR.
pub struct RegisterWindow {
    bar: Arc<dyn Bar>,
    link: Arc<dyn LinkProbe>,
    /// Devices whose register space fits the aperture skip the remap entirely.
    windowed: bool,
    /// Guards the shared remap register and the access depending on it.
    window_lock: Mutex<()>,
}

impl RegisterWindow {
    pub fn new(bar: Arc<dyn Bar>, link: Arc<dyn LinkProbe>, windowed: bool) -> Self {
        Self {
            bar,
            link,
            windowed,
            window_lock: Mutex::new(()),
        }
    }

    fn check_link(&self) -> Result<(), RegError> {
        if self.link.is_accessible() {
            Ok(())
        } else {
            Err(RegError::LinkDown)
        }
    }

    /// Retargets the remap window for `offset`. Caller holds `window_lock`.
    ///
    /// Only the low window-select bits change; the other windows configured in
    /// the same register are preserved. The write is skipped when the register
    /// already selects the right window.
    fn select_window(&self, offset: u32) {
        let window = (offset >> WINDOW_SHIFT) & WINDOW_VALUE_MASK;
        let prev = self.bar.read32(REMAP_WINDOW_CTRL_OFFSET);
        let curr = (prev & !WINDOW_VALUE_MASK) | window;
        if curr == prev {
            return;
        }
        debug!(window, "retargeting register remap window");
        self.bar.write32(REMAP_WINDOW_CTRL_OFFSET, WINDOW_ENABLE_BIT | curr);
    }

    pub fn read(&self, offset: u32) -> Result<u32, RegError> {
        self.check_link()?;

        if !self.windowed || offset < MAX_UNWINDOWED_ADDRESS {
            return Ok(self.bar.read32(offset));
        }

        let _guard = self.window_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.select_window(offset);
        Ok(self.bar.read32(WINDOW_START + (offset & WINDOW_RANGE_MASK)))
    }

    pub fn write(&self, offset: u32, value: u32) -> Result<(), RegError> {
        self.check_link()?;

        if !self.windowed || offset < MAX_UNWINDOWED_ADDRESS {
            self.bar.write32(offset, value);
            return Ok(());
        }

        let _guard = self.window_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.select_window(offset);
        self.bar.write32(WINDOW_START + (offset & WINDOW_RANGE_MASK), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeBar {
        window_reg: AtomicU32,
        log: StdMutex<Vec<(char, u32, u32)>>,
    }

    impl Bar for FakeBar {
        fn read32(&self, offset: u32) -> u32 {
            if offset == REMAP_WINDOW_CTRL_OFFSET {
                return self.window_reg.load(Ordering::SeqCst);
            }
            self.log.lock().unwrap().push(('r', offset, 0));
            0xA5A5_A5A5
        }

        fn write32(&self, offset: u32, value: u32) {
            if offset == REMAP_WINDOW_CTRL_OFFSET {
                self.window_reg.store(value, Ordering::SeqCst);
            }
            self.log.lock().unwrap().push(('w', offset, value));
        }
    }

    struct AlwaysUp;
    impl LinkProbe for AlwaysUp {
        fn is_accessible(&self) -> bool {
            true
        }
    }

    struct Down(AtomicBool);
    impl LinkProbe for Down {
        fn is_accessible(&self) -> bool {
            !self.0.load(Ordering::SeqCst)
        }
    }

    fn window_writes(bar: &FakeBar) -> usize {
        bar.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, offset, _)| *op == 'w' && *offset == REMAP_WINDOW_CTRL_OFFSET)
            .count()
    }

    #[test]
    fn low_offsets_bypass_the_window() {
        let bar = Arc::new(FakeBar::default());
        let regs = RegisterWindow::new(bar.clone(), Arc::new(AlwaysUp), true);
        regs.read(0x1000).unwrap();
        assert_eq!(window_writes(&bar), 0);
    }

    #[test]
    fn high_offsets_select_then_access_through_the_aperture() {
        let bar = Arc::new(FakeBar::default());
        let regs = RegisterWindow::new(bar.clone(), Arc::new(AlwaysUp), true);
        let offset = 0x1B3_0040;
        regs.write(offset, 7).unwrap();

        let expected_window = (offset >> WINDOW_SHIFT) & WINDOW_VALUE_MASK;
        assert_eq!(
            bar.window_reg.load(Ordering::SeqCst),
            WINDOW_ENABLE_BIT | expected_window
        );
        let log = bar.log.lock().unwrap();
        let last = log.last().unwrap();
        assert_eq!(*last, ('w', WINDOW_START + (offset & WINDOW_RANGE_MASK), 7));
    }

    #[test]
    fn redundant_window_select_is_skipped() {
        let bar = Arc::new(FakeBar::default());
        let regs = RegisterWindow::new(bar.clone(), Arc::new(AlwaysUp), true);
        regs.read(0x1B3_0040).unwrap();
        regs.read(0x1B3_0080).unwrap(); // same window
        assert_eq!(window_writes(&bar), 1);
        regs.read(0x0A0_0000).unwrap(); // different window
        assert_eq!(window_writes(&bar), 2);
    }

    #[test]
    fn unwindowed_device_never_touches_the_remap_register() {
        let bar = Arc::new(FakeBar::default());
        let regs = RegisterWindow::new(bar.clone(), Arc::new(AlwaysUp), false);
        regs.read(0x1B3_0040).unwrap();
        assert_eq!(window_writes(&bar), 0);
    }

    #[test]
    fn access_refused_while_link_down() {
        let bar = Arc::new(FakeBar::default());
        let down = Arc::new(Down(AtomicBool::new(true)));
        let regs = RegisterWindow::new(bar, down, true);
        assert_eq!(regs.read(0x1000).unwrap_err(), RegError::LinkDown);
        assert_eq!(regs.write(0x1000, 1).unwrap_err(), RegError::LinkDown);
    }
}
