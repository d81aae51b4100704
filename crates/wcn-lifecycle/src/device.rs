use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use wcn_dump::{DumpCollector, DumpInfo, DumpMetaInfo, DumpSegment, FwMemSegment};
use wcn_events::{Completion, EventWorker, Mailbox, PostMode};
use wcn_link::{LinkSequencer, PciPort};
use wcn_mhi::{MhiBus, MhiController, MhiState, MhiStatus, MhiTransition};
use wcn_regs::{Bar, LinkProbe, RegisterWindow};

use crate::config::ControlParams;
use crate::error::{LifecycleError, Result};
use crate::events::{CalStatus, LifecycleEvent, RecoveryReason};
use crate::family::DeviceFamily;
use crate::msi::MsiAssignment;
use crate::state::{DriverState, Quirks};
use crate::timer::EventTimer;
use crate::traits::{
    BoardDataKind, ClientError, DriverStatus, FirmwareMessenger, FwMode, MessengerError,
    WirelessDriver,
};

type HandlerResult = std::result::Result<(), LifecycleError>;

const MESSENGER_RETRIES: u32 = 3;

/// One attached wireless co-processor and its lifecycle worker.
///
/// All state mutation happens on the worker thread; the public methods either
/// post events (with an optional bounded wait on a completion latch) or read
/// snapshots.
pub struct Device {
    shared: Arc<Shared>,
    worker: Mutex<Option<EventWorker>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("family", &self.shared.family)
            .finish_non_exhaustive()
    }
}

struct Shared {
    family: DeviceFamily,
    params: ControlParams,
    msi: MsiAssignment,
    state: Mutex<DriverState>,
    mhi: Option<Mutex<MhiController>>,
    link: Arc<LinkSequencer>,
    regs: Option<RegisterWindow>,
    dump: Mutex<DumpInfo>,
    fw_mem: Mutex<Vec<FwMemSegment>>,
    driver: Mutex<Option<Arc<dyn WirelessDriver>>>,
    messenger: Arc<dyn FirmwareMessenger>,
    mailbox: Mailbox<LifecycleEvent, HandlerResult>,
    collector: DumpCollector,
    recovery_count: AtomicU32,
    recovery_enabled: AtomicBool,
    cal_done: AtomicBool,
    power_up_complete: Completion,
    cal_complete: Completion,
    recovery_complete: Completion,
    rddm_complete: Completion,
    fw_boot_timer: EventTimer,
    rddm_timer: EventTimer,
}

/// Preconditions for starting a recovery. Returns the state bits the handler
/// should set, or the rejection.
fn recovery_gate(
    state: DriverState,
    self_recovery_family: bool,
) -> std::result::Result<DriverState, LifecycleError> {
    if state.is_empty() {
        return Err(LifecycleError::ProtocolViolation(
            "recovery requested while driver state is empty",
        ));
    }
    if state.contains(DriverState::RECOVERY) {
        return Err(LifecycleError::InvalidTransition {
            requested: "start recovery",
            state,
        });
    }
    if state.intersects(DriverState::UNLOADING | DriverState::IDLE_SHUTDOWN) {
        return Err(LifecycleError::InvalidTransition {
            requested: "start recovery",
            state,
        });
    }

    let mut bits = DriverState::RECOVERY;
    if self_recovery_family {
        if state.intersects(DriverState::LOADING | DriverState::IDLE_RESTART) {
            return Err(LifecycleError::InvalidTransition {
                requested: "start recovery",
                state,
            });
        }
    } else if !state.contains(DriverState::FW_READY) {
        bits |= DriverState::FW_BOOT_RECOVERY;
    }
    Ok(bits)
}

impl Device {
    /// Attaches a device: builds the link sequencer and register window,
    /// computes the MSI assignment, and spawns the lifecycle worker.
    pub fn attach(
        family: DeviceFamily,
        params: ControlParams,
        port: Box<dyn PciPort>,
        mhi_bus: Option<Box<dyn MhiBus>>,
        bar: Option<Arc<dyn Bar>>,
        messenger: Arc<dyn FirmwareMessenger>,
    ) -> Result<Arc<Self>> {
        if family.has_mhi && mhi_bus.is_none() {
            return Err(LifecycleError::ResourceUnavailable("MHI bus controller"));
        }

        let link = Arc::new(LinkSequencer::new(port));
        let regs = bar.map(|bar| {
            let probe = Arc::clone(&link) as Arc<dyn LinkProbe>;
            RegisterWindow::new(bar, probe, family.has_mhi)
        });
        let msi = MsiAssignment::from_override(params.msi_override);

        let shared = Arc::new(Shared {
            family,
            params,
            msi,
            state: Mutex::new(DriverState::default()),
            mhi: mhi_bus.map(|bus| Mutex::new(MhiController::new(bus))),
            link,
            regs,
            dump: Mutex::new(DumpInfo::default()),
            fw_mem: Mutex::new(Vec::new()),
            driver: Mutex::new(None),
            messenger,
            mailbox: Mailbox::new(),
            collector: DumpCollector,
            recovery_count: AtomicU32::new(0),
            recovery_enabled: AtomicBool::new(false),
            cal_done: AtomicBool::new(false),
            power_up_complete: Completion::new(),
            cal_complete: Completion::new(),
            recovery_complete: Completion::new(),
            rddm_complete: Completion::new(),
            fw_boot_timer: EventTimer::new("fw-boot"),
            rddm_timer: EventTimer::new("rddm"),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = EventWorker::spawn(shared.mailbox.clone(), move |event| {
            worker_shared.handle(event)
        });

        info!(
            family = family.name,
            total_vectors = msi.total_vectors(),
            "device attached"
        );
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Stops the worker after draining what is already queued.
    pub fn detach(&self) {
        self.shared.fw_boot_timer.disarm();
        self.shared.rddm_timer.disarm();
        self.shared.mailbox.close();
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            worker.join();
        }
    }

    fn post_sync(&self, event: LifecycleEvent) -> Result<()> {
        match self.shared.mailbox.post(event, PostMode::SyncBlocking)? {
            Some(result) => result,
            None => Ok(()),
        }
    }

    /// Enqueues an externally observed indication without waiting for it.
    pub fn post_event(&self, event: LifecycleEvent) -> Result<()> {
        self.shared.mailbox.post(event, PostMode::Async)?;
        Ok(())
    }

    /// Enqueues an indication and waits for the handler's verdict.
    pub fn post_event_sync(&self, event: LifecycleEvent) -> Result<()> {
        self.post_sync(event)
    }

    /// MHI status callback, invoked by the bus glue from any context.
    pub fn on_mhi_status(&self, status: MhiStatus) {
        let shared = &self.shared;
        match status {
            MhiStatus::Idle => {}
            MhiStatus::FatalError => {
                error!(family = shared.family.name, "target asserted (fatal error)");
                if shared.recovery_enabled() {
                    shared.notify_fw_down();
                }
                shared.state().insert(DriverState::DEV_ERR_NOTIFIED);
                shared.fw_boot_timer.disarm();
                let _ = shared.schedule_recovery(RecoveryReason::Default);
            }
            MhiStatus::SysError => {
                error!(family = shared.family.name, "target reported system error");
                if shared.recovery_enabled() {
                    shared.notify_fw_down();
                }
                shared.state().insert(DriverState::DEV_ERR_NOTIFIED);
                shared.fw_boot_timer.disarm();
                // Recovery waits for the RAM-dump entry notification; the
                // timer promotes a silent device to a timeout recovery.
                shared.arm_rddm_timer();
            }
            MhiStatus::EnteredRddm => {
                shared.state().insert(DriverState::DEV_ERR_NOTIFIED);
                shared.fw_boot_timer.disarm();
                shared.rddm_timer.disarm();
                let _ = shared.schedule_recovery(RecoveryReason::Rddm);
            }
        }
    }

    /// Asynchronous link-down report from the platform. Only the first report
    /// since the last resume schedules a recovery.
    pub fn on_link_down(&self) {
        if self.shared.link.indicate_link_down() {
            let _ = self.shared.schedule_recovery(RecoveryReason::LinkDown);
        }
    }

    pub fn schedule_recovery(&self, reason: RecoveryReason) -> Result<()> {
        self.shared.schedule_recovery(reason)
    }

    /// Powers the device up and waits for the firmware to come alive.
    pub fn power_up(&self) -> Result<()> {
        debug!("powering up device");
        self.shared.power_up_complete.reset();
        self.post_sync(LifecycleEvent::PowerUp)?;
        if !self.shared.family.has_mhi {
            return Ok(());
        }
        self.wait_power_up("power up")
    }

    pub fn power_down(&self) -> Result<()> {
        debug!("powering down device");
        self.post_sync(LifecycleEvent::PowerDown)
    }

    /// Registers the client driver, waiting for an in-flight cold boot
    /// calibration first.
    pub fn register_driver(&self, driver: Arc<dyn WirelessDriver>) -> Result<()> {
        if self.shared.state().contains(DriverState::COLD_BOOT_CAL) {
            debug!("waiting for calibration before registering client");
            if !self
                .shared
                .cal_complete
                .wait_timeout(self.shared.params.cal_timeout)
            {
                warn!("calibration did not finish in time");
                self.post_sync(LifecycleEvent::CalDone(CalStatus::Timeout))?;
            }
        }
        self.post_sync(LifecycleEvent::RegisterDriver(driver))
    }

    /// Unregisters the client driver, letting an in-flight recovery finish
    /// first so the client is not torn down mid-reinit.
    pub fn unregister_driver(&self) -> Result<()> {
        let state = *self.shared.state();
        if state.intersects(DriverState::RECOVERY | DriverState::DEV_ERR_NOTIFIED)
            && !self
                .shared
                .recovery_complete
                .wait_timeout(self.shared.params.recovery_timeout)
        {
            error!("timeout waiting for recovery before unregister, tearing down anyway");
        }
        self.post_sync(LifecycleEvent::UnregisterDriver)
    }

    pub fn idle_restart(&self) -> Result<()> {
        debug!("idle restart requested");
        self.shared.power_up_complete.reset();
        self.post_sync(LifecycleEvent::IdleRestart)?;
        if !self.shared.family.has_mhi {
            return Ok(());
        }
        self.wait_power_up("idle restart")
    }

    pub fn idle_shutdown(&self) -> Result<()> {
        let state = *self.shared.state();
        if state.contains(DriverState::IN_SUSPEND_RESUME) {
            return Err(LifecycleError::ResourceUnavailable(
                "device during system suspend or resume",
            ));
        }
        if state.intersects(DriverState::RECOVERY | DriverState::DEV_ERR_NOTIFIED)
            && !self
                .shared
                .recovery_complete
                .wait_timeout(self.shared.params.recovery_timeout)
        {
            error!("timeout waiting for recovery before idle shutdown");
            return Err(LifecycleError::HardwareTimeout(
                "recovery before idle shutdown",
            ));
        }
        self.post_sync(LifecycleEvent::IdleShutdown)
    }

    /// Asks the firmware to assert itself so a RAM dump can be pulled.
    pub fn force_fw_assert(&self) -> Result<()> {
        if !self.shared.family.supports_force_assert {
            info!("forced firmware assert is not supported on this family");
            return Err(LifecycleError::ResourceUnavailable(
                "forced firmware assert",
            ));
        }
        if self.shared.is_device_down() {
            info!("device is already in a bad state, ignoring forced assert");
            return Ok(());
        }
        if self.shared.state().contains(DriverState::RECOVERY) {
            info!("recovery already in progress, ignoring forced assert");
            return Ok(());
        }
        self.post_sync(LifecycleEvent::ForceFwAssert)
    }

    /// Forces an assert and waits until the resulting dump is collected.
    pub fn force_collect_rddm(&self) -> Result<()> {
        if !self.shared.family.supports_force_assert {
            return Err(LifecycleError::ResourceUnavailable(
                "forced dump collection",
            ));
        }
        let state = *self.shared.state();
        if self.shared.is_device_down() || state.contains(DriverState::RECOVERY) {
            info!("device busy or down, ignoring forced dump collection");
            return Ok(());
        }
        if state.intersects(DriverState::TRANSITION) {
            info!("load or unload in progress, ignoring forced dump collection");
            return Ok(());
        }

        self.shared.rddm_complete.reset();
        self.post_sync(LifecycleEvent::ForceFwAssert)?;
        if !self
            .shared
            .rddm_complete
            .wait_timeout(self.shared.params.rddm_timeout)
        {
            return Err(LifecycleError::HardwareTimeout("RAM dump collection"));
        }
        Ok(())
    }

    /// Blocks the caller until cold boot calibration finishes.
    pub fn wait_for_cal_done(&self) -> Result<()> {
        if !self.shared.state().contains(DriverState::COLD_BOOT_CAL) {
            return Ok(());
        }
        info!("waiting for cold boot calibration to finish");
        if !self
            .shared
            .cal_complete
            .wait_timeout(self.shared.params.cal_timeout)
        {
            error!("cold boot calibration timed out");
            return Err(LifecycleError::HardwareTimeout("cold boot calibration"));
        }
        Ok(())
    }

    pub fn system_suspend(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            let snapshot = *state;
            if snapshot.contains(DriverState::IN_SUSPEND_RESUME) {
                return Err(LifecycleError::InvalidTransition {
                    requested: "system suspend",
                    state: snapshot,
                });
            }
            state.insert(DriverState::IN_SUSPEND_RESUME);
        }

        if let Some(Err(err)) = self.shared.with_mhi(|mhi| {
            if mhi.state().contains(MhiState::POWER_ON)
                && !mhi.state().contains(MhiState::SUSPEND)
            {
                mhi.request(MhiTransition::Suspend)
            } else {
                Ok(())
            }
        }) {
            self.shared.state().remove(DriverState::IN_SUSPEND_RESUME);
            return Err(err.into());
        }

        if let Err(err) = self
            .shared
            .link
            .suspend_link(self.shared.link_down_or_recovery())
        {
            self.shared.state().remove(DriverState::IN_SUSPEND_RESUME);
            return Err(err.into());
        }
        Ok(())
    }

    pub fn system_resume(&self) -> Result<()> {
        self.shared.link.resume_link()?;
        if let Some(Err(err)) = self.shared.with_mhi(|mhi| {
            if mhi.state().contains(MhiState::SUSPEND) {
                mhi.request(MhiTransition::Resume)
            } else {
                Ok(())
            }
        }) {
            return Err(err.into());
        }
        self.shared.state().remove(DriverState::IN_SUSPEND_RESUME);
        Ok(())
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        debug!(enabled, "setting recovery policy");
        self.shared
            .recovery_enabled
            .store(enabled, Ordering::SeqCst);
    }

    pub fn recovery_enabled(&self) -> bool {
        self.shared.recovery_enabled()
    }

    pub fn recovery_count(&self) -> u32 {
        self.shared.recovery_count.load(Ordering::SeqCst)
    }

    pub fn is_cal_done(&self) -> bool {
        self.shared.cal_done.load(Ordering::SeqCst)
    }

    pub fn driver_state(&self) -> DriverState {
        *self.shared.state()
    }

    pub fn mhi_state(&self) -> Option<MhiState> {
        self.shared.with_mhi(|mhi| mhi.state())
    }

    pub fn msi(&self) -> &MsiAssignment {
        &self.shared.msi
    }

    pub fn regs(&self) -> Option<&RegisterWindow> {
        self.shared.regs.as_ref()
    }

    /// The meta header for the currently held dump, if one is valid.
    pub fn dump_meta(&self) -> Option<DumpMetaInfo> {
        let dump = self.shared.lock_dump();
        if !dump.is_valid() {
            return None;
        }
        Some(DumpMetaInfo::from_dump(&dump, self.shared.family.chipset))
    }

    /// Hands the collected dump to the caller and discards it. When a
    /// recovery or a shutdown was deferred on the dump, this also releases
    /// the held restart or teardown.
    pub fn consume_dump(&self) -> Option<(DumpMetaInfo, Vec<DumpSegment>)> {
        let (meta, segments) = {
            let mut dump = self.shared.lock_dump();
            if !dump.is_valid() {
                return None;
            }
            let meta = DumpMetaInfo::from_dump(&dump, self.shared.family.chipset);
            let segments = dump.entries().to_vec();
            dump.clear();
            (meta, segments)
        };
        info!(entries = meta.total_entries, "crash dump consumed");

        let state = *self.shared.state();
        if state.contains(DriverState::RECOVERY) {
            let _ = self
                .shared
                .mailbox
                .post(LifecycleEvent::PowerDown, PostMode::Async);
            let _ = self
                .shared
                .mailbox
                .post(LifecycleEvent::PowerUp, PostMode::Async);
        } else if state.intersects(DriverState::UNLOADING | DriverState::IDLE_SHUTDOWN) {
            // A shutdown that deferred on this dump is still holding its
            // transition bit; let it run to completion now.
            let _ = self
                .shared
                .mailbox
                .post(LifecycleEvent::PowerDown, PostMode::Async);
        }
        Some((meta, segments))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Device {
    fn wait_power_up(&self, what: &'static str) -> Result<()> {
        if !self
            .shared
            .power_up_complete
            .wait_timeout(self.shared.params.fw_boot_timeout * 4)
        {
            error!(what, "timeout waiting for device to come up");
            return Err(LifecycleError::HardwareTimeout(what));
        }
        Ok(())
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DriverState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_dump(&self) -> MutexGuard<'_, DumpInfo> {
        match self.dump.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_fw_mem(&self) -> MutexGuard<'_, Vec<FwMemSegment>> {
        match self.fw_mem.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<Arc<dyn WirelessDriver>>> {
        match self.driver.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn driver(&self) -> Option<Arc<dyn WirelessDriver>> {
        self.lock_driver().clone()
    }

    fn with_mhi<T>(&self, f: impl FnOnce(&mut MhiController) -> T) -> Option<T> {
        self.mhi.as_ref().map(|mhi| {
            let mut mhi = match mhi.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut mhi)
        })
    }

    fn recovery_enabled(&self) -> bool {
        self.recovery_enabled.load(Ordering::SeqCst)
    }

    fn link_down_or_recovery(&self) -> bool {
        self.link.link_down_indicated() || self.state().contains(DriverState::RECOVERY)
    }

    fn is_device_down(&self) -> bool {
        self.link.link_down_indicated() || self.state().contains(DriverState::DEV_ERR_NOTIFIED)
    }

    fn notify_fw_down(&self) {
        if let Some(driver) = self.driver() {
            driver.update_status(DriverStatus::FwDown);
        }
    }

    fn schedule_recovery(&self, reason: RecoveryReason) -> HandlerResult {
        let state = *self.state();
        if state.intersects(DriverState::UNLOADING | DriverState::IDLE_SHUTDOWN) {
            warn!(
                ?reason,
                ?state,
                "unload or idle shutdown in progress, dropping recovery request"
            );
            return Err(LifecycleError::InvalidTransition {
                requested: "schedule recovery",
                state,
            });
        }
        self.mailbox
            .post(LifecycleEvent::Recovery(reason), PostMode::Async)?;
        Ok(())
    }

    fn arm_fw_boot_timer(&self, after: Duration) {
        let mailbox = self.mailbox.clone();
        self.fw_boot_timer.arm(after, move || {
            error!("timeout waiting for firmware ready indication");
            let _ = mailbox.post(
                LifecycleEvent::Recovery(RecoveryReason::Timeout),
                PostMode::Async,
            );
        });
    }

    fn arm_rddm_timer(&self) {
        let mailbox = self.mailbox.clone();
        self.rddm_timer.arm(self.params.rddm_timeout, move || {
            error!("timeout waiting for RAM dump entry notification");
            let _ = mailbox.post(
                LifecycleEvent::Recovery(RecoveryReason::Timeout),
                PostMode::Async,
            );
        });
    }

    // Worker-side dispatch. Runs on the lifecycle thread only.
    fn handle(&self, event: LifecycleEvent) -> HandlerResult {
        let name = event.name();
        let result = match event {
            LifecycleEvent::ServerArrive => {
                debug!("firmware message server arrived");
                Ok(())
            }
            LifecycleEvent::ServerExit => {
                warn!("firmware message server exited");
                self.state()
                    .remove(DriverState::FW_READY | DriverState::FW_MEM_READY);
                Ok(())
            }
            LifecycleEvent::RequestMem(segments) => self.request_mem(segments),
            LifecycleEvent::FwMemReady => self.fw_mem_ready(),
            LifecycleEvent::FwReady => self.fw_ready(),
            LifecycleEvent::CalStart => self.cal_start(),
            LifecycleEvent::CalDone(status) => self.cal_done(status),
            LifecycleEvent::RegisterDriver(driver) => self.register_driver_hdlr(driver),
            LifecycleEvent::UnregisterDriver => self.unregister_driver_hdlr(),
            LifecycleEvent::Recovery(reason) => self.recovery_hdlr(reason),
            LifecycleEvent::ForceFwAssert => self.force_fw_assert_hdlr(),
            LifecycleEvent::PowerUp => self.power_up_hdlr(),
            LifecycleEvent::PowerDown => self.device_shutdown(),
            LifecycleEvent::IdleRestart => self.idle_restart_hdlr(),
            LifecycleEvent::IdleShutdown => self.idle_shutdown_hdlr(),
        };
        if let Err(err) = &result {
            error!(event = name, %err, "lifecycle event failed");
        }
        result
    }

    /// Retries a firmware message a few times, then promotes the failure to a
    /// recovery.
    fn with_retries(
        &self,
        what: &'static str,
        mut op: impl FnMut() -> std::result::Result<(), MessengerError>,
    ) -> HandlerResult {
        for attempt in 1..MESSENGER_RETRIES {
            match op() {
                Ok(()) => return Ok(()),
                Err(err) => warn!(what, attempt, %err, "firmware message failed, retrying"),
            }
        }
        match op() {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(what, %err, "firmware message failed, giving up");
                let _ = self.schedule_recovery(RecoveryReason::Default);
                Err(err.into())
            }
        }
    }

    fn request_mem(&self, segments: Vec<FwMemSegment>) -> HandlerResult {
        debug!(count = segments.len(), "firmware requested memory regions");
        *self.lock_fw_mem() = segments.clone();
        self.with_retries("memory response", || {
            self.messenger.respond_memory(&segments)
        })
    }

    fn fw_mem_ready(&self) -> HandlerResult {
        self.state().insert(DriverState::FW_MEM_READY);

        self.with_retries("target capability exchange", || {
            self.messenger.send_target_capability()
        })?;

        let board = self.params.board_data;
        if board.hds {
            self.with_retries("HDS board data", || {
                self.messenger.download_board_data(BoardDataKind::Hds)
            })?;
        }
        if board.regdb {
            self.with_retries("regulatory board data", || {
                self.messenger.download_board_data(BoardDataKind::Regdb)
            })?;
        }
        self.with_retries("board data", || {
            self.messenger.download_board_data(BoardDataKind::Bdf)
        })?;
        if board.caldata {
            self.with_retries("calibration data", || {
                self.messenger.download_board_data(BoardDataKind::Caldata)
            })?;
        }

        if self.family.has_mhi && !self.params.quirks.contains(Quirks::FBC_BYPASS) {
            self.with_retries("M3 firmware transfer", || self.messenger.send_m3())?;
        }
        Ok(())
    }

    fn fw_ready(&self) -> HandlerResult {
        self.fw_boot_timer.disarm();
        {
            let mut state = self.state();
            state.insert(DriverState::FW_READY);
            state.remove(DriverState::DEV_ERR_NOTIFIED);
            if state.contains(DriverState::FW_BOOT_RECOVERY) {
                state.remove(DriverState::FW_BOOT_RECOVERY | DriverState::RECOVERY);
            }
        }

        if self.state().contains(DriverState::COLD_BOOT_CAL) {
            return self.with_retries("calibration mode", || {
                self.messenger.send_mode(FwMode::Calibration)
            });
        }

        match self.call_driver_probe() {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(%err, "client handoff failed, rolling back power-up");
                self.device_shutdown()?;
                self.state()
                    .remove(DriverState::FW_READY | DriverState::FW_MEM_READY);
                Err(err)
            }
        }
    }

    /// Resolves firmware-ready into the matching client callback.
    fn call_driver_probe(&self) -> HandlerResult {
        {
            let mut state = self.state();
            if state.contains(DriverState::DRIVER_DEBUG) {
                state.remove(DriverState::RECOVERY);
                debug!("debug mode, skipping client probe");
                return Ok(());
            }
        }

        let snapshot = *self.state();
        if snapshot.contains(DriverState::RECOVERY) && snapshot.contains(DriverState::PROBED) {
            let driver = self
                .driver()
                .ok_or(LifecycleError::ResourceUnavailable("client driver"))?;
            driver.reinit()?;
            self.state().remove(DriverState::RECOVERY);
            self.recovery_complete.complete();
            info!("client reinitialized after recovery");
        } else if snapshot.contains(DriverState::LOADING) {
            let driver = self
                .driver()
                .ok_or(LifecycleError::ResourceUnavailable("client driver"))?;
            driver.probe()?;
            let mut state = self.state();
            state.remove(DriverState::RECOVERY | DriverState::LOADING);
            state.insert(DriverState::PROBED);
            info!("client probed");
        } else if snapshot.contains(DriverState::IDLE_RESTART) {
            let driver = self
                .driver()
                .ok_or(LifecycleError::ResourceUnavailable("client driver"))?;
            driver.idle_restart()?;
            self.state()
                .remove(DriverState::RECOVERY | DriverState::IDLE_RESTART);
            self.power_up_complete.complete();
        } else {
            self.power_up_complete.complete();
        }
        Ok(())
    }

    fn cal_start(&self) -> HandlerResult {
        let snapshot = *self.state();
        if snapshot
            .intersects(DriverState::FW_READY | DriverState::LOADING | DriverState::PROBED)
        {
            debug!("device already active, skipping cold boot calibration");
            return Ok(());
        }

        info!("starting cold boot calibration");
        self.state().insert(DriverState::COLD_BOOT_CAL);
        self.cal_complete.reset();
        if let Err(err) = self.device_power_up() {
            self.cal_complete.complete();
            self.state().remove(DriverState::COLD_BOOT_CAL);
            return Err(err);
        }
        Ok(())
    }

    fn cal_done(&self, status: CalStatus) -> HandlerResult {
        if !self.state().contains(DriverState::COLD_BOOT_CAL) {
            return Ok(());
        }

        match status {
            CalStatus::Done => {
                info!("cold boot calibration completed");
                self.cal_done.store(true, Ordering::SeqCst);
            }
            CalStatus::Timeout => warn!("calibration timed out, forcing shutdown"),
        }

        if let Err(err) = self.messenger.send_mode(FwMode::Off) {
            warn!(%err, "failed to take firmware out of calibration mode");
        }
        let result = self.device_shutdown();
        self.cal_complete.complete();
        self.state().remove(DriverState::COLD_BOOT_CAL);
        result
    }

    fn register_driver_hdlr(&self, driver: Arc<dyn WirelessDriver>) -> HandlerResult {
        if self.lock_driver().is_some() {
            return Err(LifecycleError::ResourceUnavailable(
                "client slot (already registered)",
            ));
        }
        {
            let mut state = self.state();
            let snapshot = *state;
            if state.begin_transition(DriverState::LOADING).is_err() {
                return Err(LifecycleError::InvalidTransition {
                    requested: "register client driver",
                    state: snapshot,
                });
            }
        }

        *self.lock_driver() = Some(driver);

        if let Err(err) = self.device_power_up() {
            self.state().remove(DriverState::LOADING);
            *self.lock_driver() = None;
            return Err(err);
        }
        Ok(())
    }

    fn unregister_driver_hdlr(&self) -> HandlerResult {
        {
            let mut state = self.state();
            let snapshot = *state;
            if state.begin_transition(DriverState::UNLOADING).is_err() {
                return Err(LifecycleError::InvalidTransition {
                    requested: "unregister client driver",
                    state: snapshot,
                });
            }
        }
        let result = self.device_shutdown();
        *self.lock_driver() = None;
        result
    }

    fn recovery_hdlr(&self, reason: RecoveryReason) -> HandlerResult {
        {
            let mut state = self.state();
            let snapshot = *state;
            let bits = match recovery_gate(snapshot, self.family.supports_self_recovery) {
                Ok(bits) => bits,
                Err(err) => {
                    error!(?reason, state = ?snapshot, %err, "recovery request rejected");
                    return Err(err);
                }
            };
            state.insert(bits);
        }
        self.recovery_complete.reset();
        self.do_recovery(reason)
    }

    fn do_recovery(&self, reason: RecoveryReason) -> HandlerResult {
        let count = self.recovery_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(?reason, count, "starting device recovery");

        if self.family.supports_self_recovery {
            return self.self_recovery();
        }
        if self.params.quirks.contains(Quirks::SKIP_RECOVERY) {
            debug!("recovery disabled by quirk, leaving device down");
            return Ok(());
        }

        match reason {
            RecoveryReason::LinkDown => {
                if self.params.quirks.contains(Quirks::LINK_DOWN_PANIC) {
                    error!("link went down on a platform that cannot survive it");
                }
                if self
                    .params
                    .quirks
                    .contains(Quirks::LINK_DOWN_SELF_RECOVERY)
                {
                    return self.self_recovery();
                }
            }
            RecoveryReason::Rddm => {
                if let Err(err) = self.collect_dump(false) {
                    error!(%err, "failed to collect crash dump");
                }
            }
            RecoveryReason::Default | RecoveryReason::Timeout => {}
        }

        // With recovery enabled the client was told at fault time; otherwise
        // it learns now, with the dump already on the host side.
        if !self.recovery_enabled() {
            self.notify_fw_down();
        }

        if self.lock_dump().is_valid() {
            info!("restart deferred until the crash dump is consumed");
            return Ok(());
        }

        self.device_shutdown()?;
        self.device_power_up()
    }

    /// Bare power-cycle without dump collection or fatal notification.
    fn self_recovery(&self) -> HandlerResult {
        info!("performing self recovery");
        self.device_shutdown()?;
        self.device_power_up()
    }

    fn collect_dump(&self, in_panic: bool) -> HandlerResult {
        let Some(mhi) = self.mhi.as_ref() else {
            return Ok(());
        };
        let mut mhi = match mhi.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let fw_mem = self.lock_fw_mem().clone();
        let mut dump = self.lock_dump();
        let collected =
            self.collector
                .collect(&mut mhi, self.link.as_ref(), &fw_mem, &mut dump, in_panic)?;
        drop(dump);
        if collected {
            self.rddm_complete.complete();
        }
        Ok(())
    }

    fn force_fw_assert_hdlr(&self) -> HandlerResult {
        if !self.family.supports_force_assert {
            return Err(LifecycleError::ResourceUnavailable(
                "forced firmware assert",
            ));
        }
        match self.with_mhi(|mhi| mhi.request(MhiTransition::TriggerRddm)) {
            Some(Ok(())) => {
                if !self.state().contains(DriverState::DEV_ERR_NOTIFIED) {
                    self.arm_rddm_timer();
                }
                Ok(())
            }
            Some(Err(err)) => {
                error!(%err, "failed to trigger RAM dump mode");
                let _ = self.schedule_recovery(RecoveryReason::Default);
                Err(err.into())
            }
            None => Err(LifecycleError::ResourceUnavailable("MHI bus controller")),
        }
    }

    fn power_up_hdlr(&self) -> HandlerResult {
        let result = self.device_power_up();
        if result.is_err() {
            self.state().remove(DriverState::IDLE_RESTART);
        }
        result
    }

    fn idle_restart_hdlr(&self) -> HandlerResult {
        {
            let mut state = self.state();
            let snapshot = *state;
            if state.begin_transition(DriverState::IDLE_RESTART).is_err() {
                return Err(LifecycleError::InvalidTransition {
                    requested: "idle restart",
                    state: snapshot,
                });
            }
        }
        let result = self.device_power_up();
        if result.is_err() {
            self.state().remove(DriverState::IDLE_RESTART);
        }
        result
    }

    fn idle_shutdown_hdlr(&self) -> HandlerResult {
        {
            let mut state = self.state();
            let snapshot = *state;
            if state.begin_transition(DriverState::IDLE_SHUTDOWN).is_err() {
                return Err(LifecycleError::InvalidTransition {
                    requested: "idle shutdown",
                    state: snapshot,
                });
            }
        }
        self.device_shutdown()
    }

    /// Powers the device up: rail, link, MHI, firmware-boot deadline.
    fn device_power_up(&self) -> HandlerResult {
        let recovering = self.state().contains(DriverState::RECOVERY);
        if recovering || self.lock_dump().is_valid() {
            debug!("clearing stale dump and bus state before power-up");
            self.lock_dump().clear();
            let link_down = self.link.link_down_indicated();
            self.with_mhi(|mhi| {
                if !mhi.state().is_empty() {
                    mhi.power_off_sequence(link_down);
                    mhi.deinit_sequence();
                }
            });
        }

        self.link.set_power_rail(true)?;
        if let Err(err) = self.link.resume_link() {
            error!(%err, "failed to resume link, powering rail back off");
            let _ = self.link.set_power_rail(false);
            return Err(err.into());
        }

        if !self.family.has_mhi {
            // The legacy family boots straight into the client.
            return self.call_driver_probe();
        }

        if let Some(Err(err)) = self.with_mhi(MhiController::start) {
            error!(%err, "failed to start MHI");
            let state = *self.state();
            if !state.contains(DriverState::DEV_ERR_NOTIFIED) && !self.link.link_down_indicated()
            {
                // Half the boot budget: either the device comes alive on its
                // own or the timeout recovery restarts it.
                self.arm_fw_boot_timer(self.params.fw_boot_timeout / 2);
            }
            return Ok(());
        }

        if self.params.quirks.contains(Quirks::USE_CORE_ONLY_FW) {
            self.state()
                .remove(DriverState::FW_BOOT_RECOVERY | DriverState::RECOVERY);
            return Ok(());
        }

        self.arm_fw_boot_timer(self.params.fw_boot_timeout);
        Ok(())
    }

    /// Tears the device down: client callback, pending dump, MHI, link, rail.
    fn device_shutdown(&self) -> HandlerResult {
        if self.lock_dump().is_valid() {
            info!("dump not yet consumed, deferring shutdown");
            return Ok(());
        }

        let snapshot = *self.state();
        if !snapshot.intersects(
            DriverState::COLD_BOOT_CAL | DriverState::FW_BOOT_RECOVERY | DriverState::DRIVER_DEBUG,
        ) {
            if let Some(driver) = self.driver() {
                if snapshot.contains(DriverState::RECOVERY)
                    && snapshot.contains(DriverState::PROBED)
                {
                    driver.crash_shutdown();
                } else if snapshot.contains(DriverState::UNLOADING) {
                    driver.remove();
                    self.state()
                        .remove(DriverState::PROBED | DriverState::DEV_ERR_NOTIFIED);
                } else if snapshot.contains(DriverState::IDLE_SHUTDOWN) {
                    match driver.idle_shutdown() {
                        Ok(()) => {
                            self.state().remove(DriverState::DEV_ERR_NOTIFIED);
                        }
                        Err(ClientError::Busy) => {
                            debug!("client vetoed idle shutdown");
                            self.state().remove(DriverState::IDLE_SHUTDOWN);
                            return Err(LifecycleError::ResourceUnavailable(
                                "client (busy, idle shutdown vetoed)",
                            ));
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        let snapshot = *self.state();
        if snapshot.intersects(DriverState::TRANSITION)
            && snapshot.contains(DriverState::DEV_ERR_NOTIFIED)
        {
            // The device died mid-transition; grab the dump before the power
            // goes away.
            self.rddm_timer.disarm();
            if let Err(err) = self.collect_dump(false) {
                error!(%err, "failed to collect pending crash dump");
            }
        }

        let link_down = self.link.link_down_indicated();
        self.with_mhi(|mhi| mhi.power_off_sequence(link_down));
        if let Err(err) = self.link.suspend_link(self.link_down_or_recovery()) {
            error!(%err, "failed to suspend link");
        }
        self.with_mhi(MhiController::deinit_sequence);
        if let Err(err) = self.link.set_power_rail(false) {
            error!(%err, "failed to power the rail off");
        }

        self.state().remove(
            DriverState::FW_READY
                | DriverState::FW_MEM_READY
                | DriverState::UNLOADING
                | DriverState::IDLE_SHUTDOWN,
        );
        info!("device shut down");
        Ok(())
    }
}
