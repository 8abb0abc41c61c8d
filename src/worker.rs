//! The reactor thread: one `mpsc` queue of tagged work items driving every
//! collaborator, mirroring the original's single worker thread pulling off
//! a `fixed_queue_t` of `reactor_event_t`/callback pairs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::assembler::InboundAssembler;
use crate::collaborators::{
    Allocator, BdAddr, Collaborators, Controller, Fragmenter, FragmenterSink, Hal, LowPower,
    Logger, Vendor, VendorAsyncResult, VendorOp,
};
use crate::config::HciConfig;
use crate::event_filter::filter_incoming_event;
use crate::packet::{Channel, EventTag, Packet, INBOUND_CHANNELS};
use crate::registry::{PendingCommands, WaitingCommand};

/// Thread-safe FIFO, standing in for the original's `fixed_queue_t`.
pub struct Queue<T>(Arc<Mutex<VecDeque<T>>>);

impl<T> Queue<T> {
    pub fn new() -> Self {
        Queue(Arc::new(Mutex::new(VecDeque::new())))
    }

    pub fn push(&self, item: T) {
        self.0.lock().unwrap().push_back(item);
    }

    /// Like [`Queue::push`] but fails instead of aborting the process when
    /// the backing `VecDeque` can't grow to hold one more entry (§7,
    /// "allocation failure for a waiting-command entry at transmit_command").
    pub fn try_push(&self, item: T) -> bool {
        let mut queue = self.0.lock().unwrap();
        if queue.len() == queue.capacity() && queue.try_reserve(1).is_err() {
            return false;
        }
        queue.push_back(item);
        true
    }

    pub fn pop(&self) -> Option<T> {
        self.0.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<T> {
        self.0.lock().unwrap().drain(..).collect()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue(self.0.clone())
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Work items posted to the reactor. Grounded on the `event_*`/`command_*`
/// free functions `hci_layer.c` posts onto its own thread via
/// `thread_post`.
pub enum WorkItem {
    Preload,
    Postload,
    DataReady(Channel),
    CommandQueued,
    PacketQueued,
    FirmwareConfigured(bool),
    ScoConfigured(bool),
    AclSizeFetched,
    Epilog,
    EpilogFinished,
    EpilogTimedOut,
    SetLogging(bool, Option<std::path::PathBuf>),
    ChipPower(bool),
    LowPowerCommand(crate::collaborators::LowPowerCommand),
    Shutdown,
}

/// Cheap, cloneable handle collaborators use to post work back onto the
/// reactor thread from whatever thread they actually run callbacks on.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: Sender<WorkItem>,
}

impl WorkerHandle {
    pub fn data_ready(&self, channel: Channel) {
        let _ = self.sender.send(WorkItem::DataReady(channel));
    }

    pub fn command_queued(&self) {
        let _ = self.sender.send(WorkItem::CommandQueued);
    }

    pub fn packet_queued(&self) {
        let _ = self.sender.send(WorkItem::PacketQueued);
    }

    pub fn firmware_configured(&self, success: bool) {
        let _ = self.sender.send(WorkItem::FirmwareConfigured(success));
    }

    pub fn sco_configured(&self, success: bool) {
        let _ = self.sender.send(WorkItem::ScoConfigured(success));
    }

    pub fn acl_size_fetched(&self) {
        let _ = self.sender.send(WorkItem::AclSizeFetched);
    }

    pub fn epilog_finished(&self) {
        let _ = self.sender.send(WorkItem::EpilogFinished);
    }

    fn epilog_timed_out(&self) {
        let _ = self.sender.send(WorkItem::EpilogTimedOut);
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(WorkItem::Shutdown);
    }

    pub(crate) fn preload(&self) {
        let _ = self.sender.send(WorkItem::Preload);
    }

    pub(crate) fn postload(&self) {
        let _ = self.sender.send(WorkItem::Postload);
    }

    fn epilog(&self) {
        let _ = self.sender.send(WorkItem::Epilog);
    }

    pub(crate) fn enable_logging(&self, path: std::path::PathBuf) {
        let _ = self.sender.send(WorkItem::SetLogging(true, Some(path)));
    }

    pub(crate) fn disable_logging(&self) {
        let _ = self.sender.send(WorkItem::SetLogging(false, None));
    }

    pub(crate) fn set_chip_power_on(&self, on: bool) {
        let _ = self.sender.send(WorkItem::ChipPower(on));
    }

    pub(crate) fn low_power_command(&self, cmd: crate::collaborators::LowPowerCommand) {
        let _ = self.sender.send(WorkItem::LowPowerCommand(cmd));
    }
}

/// `thread::sleep`-backed one-shot watchdog, standing in for the original's
/// `alarm_t` used by `epilog_wait_timer_expired` (§4.5 postlude watchdog).
pub struct OneShotTimer {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    pub fn start(duration: Duration, on_fire: impl FnOnce() + Send + 'static) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let handle = thread::spawn(move || {
            thread::sleep(duration);
            if !flag.load(Ordering::SeqCst) {
                on_fire();
            }
        });
        OneShotTimer { cancelled, handle: Some(handle) }
    }

    pub fn cancel(mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// The reactor itself. Owns every collaborator for the lifetime of one
/// `start_up`/`shut_down` cycle.
pub struct Worker {
    local_addr: BdAddr,
    hal: Box<dyn Hal>,
    fragmenter: Option<Box<dyn Fragmenter>>,
    vendor: Box<dyn Vendor>,
    controller: Box<dyn Controller>,
    low_power: Box<dyn LowPower>,
    logger: Box<dyn Logger>,
    logging_enabled: bool,
    allocator: Box<dyn Allocator>,
    upper: Box<dyn crate::collaborators::UpperCallbacks>,
    dispatcher: Box<dyn crate::collaborators::UpwardDispatcher>,

    pending: Arc<PendingCommands>,
    assembler: InboundAssembler,
    command_queue: Queue<WaitingCommand>,
    packet_queue: Queue<Packet>,
    credits: u8,
    config: HciConfig,

    handle: WorkerHandle,
    receiver: Receiver<WorkItem>,
    epilog_timer: Option<OneShotTimer>,
    firmware_configured: bool,
}

impl Worker {
    pub fn spawn(
        local_addr: BdAddr,
        collaborators: Collaborators,
        upper: Box<dyn crate::collaborators::UpperCallbacks>,
        dispatcher: Box<dyn crate::collaborators::UpwardDispatcher>,
        command_queue: Queue<WaitingCommand>,
        packet_queue: Queue<Packet>,
        config: HciConfig,
    ) -> (WorkerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel();
        let handle = WorkerHandle { sender };
        let pending = PendingCommands::new(config.command_pending_timeout, collaborators.fault_reporter.clone());

        let mut worker = Worker {
            local_addr,
            hal: collaborators.hal,
            fragmenter: Some(collaborators.fragmenter),
            vendor: collaborators.vendor,
            controller: collaborators.controller,
            low_power: collaborators.low_power,
            logger: collaborators.logger,
            logging_enabled: false,
            allocator: collaborators.allocator,
            upper,
            dispatcher,
            pending,
            assembler: InboundAssembler::new(),
            command_queue,
            packet_queue,
            credits: config.initial_credits,
            config,
            handle: handle.clone(),
            receiver,
            epilog_timer: None,
            firmware_configured: false,
        };

        let join = thread::spawn(move || worker.run());
        (handle, join)
    }

    fn run(&mut self) {
        self.hal.init(self.handle.clone());
        self.low_power.init(self.handle.clone());
        if let Err(err) = self.hal.open() {
            log::error!("hal failed to open: {err}");
            return;
        }
        self.vendor.open(self.local_addr, self.handle.clone());

        while let Ok(item) = self.receiver.recv() {
            match item {
                WorkItem::Preload => self.on_preload(),
                WorkItem::Postload => self.on_postload(),
                WorkItem::DataReady(channel) => self.on_data_ready(channel),
                WorkItem::CommandQueued => self.drain_command_queue(),
                WorkItem::PacketQueued => self.on_packet_queued(),
                WorkItem::FirmwareConfigured(ok) => self.on_firmware_configured(ok),
                WorkItem::ScoConfigured(ok) => self.on_sco_configured(ok),
                WorkItem::AclSizeFetched => log::debug!("acl data size fetch complete"),
                WorkItem::SetLogging(enabled, path) => self.on_set_logging(enabled, path),
                WorkItem::Epilog => self.begin_epilog(),
                WorkItem::EpilogFinished | WorkItem::EpilogTimedOut => {
                    self.finish_epilog();
                    break;
                }
                WorkItem::Shutdown => {
                    if self.firmware_configured {
                        self.handle.epilog();
                    } else {
                        break;
                    }
                }
                WorkItem::ChipPower(on) => self.on_chip_power(on),
                WorkItem::LowPowerCommand(cmd) => self.low_power.post_command(cmd),
            }
        }

        self.teardown();
    }

    fn on_preload(&mut self) {
        log::info!("preload: configuring firmware");
        match self.vendor.send_async_command(VendorOp::ConfigureFirmware) {
            VendorAsyncResult::Scheduled => {}
            VendorAsyncResult::NotApplicable => self.handle.firmware_configured(true),
        }
    }

    /// The original always reports `preload_finished(true)` here regardless
    /// of the vendor's reported success — preserved verbatim (see DESIGN.md).
    fn on_firmware_configured(&mut self, success: bool) {
        log::info!("firmware configuration finished (vendor reported success={success})");
        self.firmware_configured = true;
        self.upper.preload_finished(true);
    }

    fn on_chip_power(&mut self, on: bool) {
        log::info!("setting chip power: {on}");
        let arg = [on as u8];
        self.vendor.send_command(VendorOp::ChipPowerControl, Some(&arg));
    }

    fn on_postload(&mut self) {
        log::info!("postload: fetching controller acl buffer size");
        self.controller.begin_acl_size_fetch(self.handle.clone());
        match self.vendor.send_async_command(VendorOp::ConfigureSco) {
            VendorAsyncResult::Scheduled => {}
            VendorAsyncResult::NotApplicable => self.handle.sco_configured(true),
        }
    }

    fn on_sco_configured(&mut self, success: bool) {
        log::info!("sco configuration finished (success={success})");
    }

    fn on_set_logging(&mut self, enabled: bool, path: Option<std::path::PathBuf>) {
        if enabled {
            let path = match path {
                Some(p) => p,
                None => {
                    log::warn!("ignoring request to enable logging with no path");
                    return;
                }
            };
            match self.logger.open(&path) {
                Ok(()) => self.logging_enabled = true,
                Err(err) => log::error!("failed to open btsnoop log at {}: {err}", path.display()),
            }
        } else if self.logging_enabled {
            self.logger.close();
            self.logging_enabled = false;
        }
    }

    fn begin_epilog(&mut self) {
        log::info!("beginning epilog");
        match self.vendor.send_async_command(VendorOp::Epilog) {
            VendorAsyncResult::Scheduled => {
                let handle = self.handle.clone();
                self.epilog_timer =
                    Some(OneShotTimer::start(self.config.epilog_timeout, move || {
                        log::warn!("epilog timed out; proceeding with teardown anyway");
                        handle.epilog_timed_out();
                    }));
            }
            VendorAsyncResult::NotApplicable => self.handle.epilog_finished(),
        }
    }

    fn finish_epilog(&mut self) {
        if let Some(timer) = self.epilog_timer.take() {
            timer.cancel();
        }
        log::info!("epilog finished");
    }

    fn teardown(&mut self) {
        log::info!("tearing down hci worker");
        self.pending.shut_down();
        if let Some(mut fragmenter) = self.fragmenter.take() {
            fragmenter.cleanup();
        }
        self.low_power.cleanup();
        self.vendor.close();
        self.hal.close();
        if self.logging_enabled {
            self.logger.close();
        }
        self.command_queue.drain();
        self.packet_queue.drain();
    }

    /// Pumps the assembler for `channel` at most once and dispatches at most
    /// one completed packet, per §4.1's "return after one packet" contract
    /// (testable property #5) — this bounds per-notification CPU and keeps
    /// one busy stream from starving the others sharing the worker.
    fn on_data_ready(&mut self, channel: Channel) {
        if let Some(packet) = self.assembler.pump(channel, &mut *self.hal, &mut *self.allocator) {
            self.handle_inbound(channel, packet);
        }
    }

    fn handle_inbound(&mut self, channel: Channel, packet: Packet) {
        if self.logging_enabled {
            self.logger.capture(&packet, true);
        }
        match channel {
            Channel::Event => {
                if let Some(n) = num_completed_packets(&packet) {
                    self.credits = n;
                }
                match filter_incoming_event(packet, &self.pending, &mut *self.allocator) {
                    Some(packet) => self.dispatcher.dispatch(EventTag::EventIn, packet),
                    None => {}
                }
                self.drain_command_queue();
            }
            Channel::Acl | Channel::Sco => {
                let mut fragmenter = self.fragmenter.take().expect("fragmenter present");
                fragmenter.reassemble_and_dispatch(packet, self);
                self.fragmenter = Some(fragmenter);
            }
            Channel::Command => unreachable!("command channel is outbound-only"),
        }
    }

    /// Drains queued outbound commands while command credits remain,
    /// matching `transmit_command`/credit bookkeeping in the original.
    fn drain_command_queue(&mut self) {
        while self.credits > 0 {
            let waiting = match self.command_queue.pop() {
                Some(w) => w,
                None => break,
            };
            self.credits -= 1;
            let transmit_copy = waiting.command_buffer.clone();
            self.low_power.wake_assert();
            let mut fragmenter = self.fragmenter.take().expect("fragmenter present");
            fragmenter.fragment_and_dispatch(transmit_copy, self);
            self.fragmenter = Some(fragmenter);
            self.low_power.transmit_done();
            self.pending.push(waiting);
        }
    }

    fn on_packet_queued(&mut self) {
        while let Some(packet) = self.packet_queue.pop() {
            self.low_power.wake_assert();
            let mut fragmenter = self.fragmenter.take().expect("fragmenter present");
            fragmenter.fragment_and_dispatch(packet, self);
            self.fragmenter = Some(fragmenter);
            self.low_power.transmit_done();
        }
    }
}

impl FragmenterSink for Worker {
    fn transmit_fragment(&mut self, packet: Packet, _last_fragment: bool) {
        let channel = outbound_channel_for(&packet);
        if self.logging_enabled {
            self.logger.capture(&packet, false);
        }
        self.hal.transmit_data(channel, packet.as_bytes());
    }

    fn dispatch_reassembled(&mut self, packet: Packet) {
        self.dispatcher.dispatch(packet.tag(), packet);
    }

    fn transmit_finished(&mut self, packet: Packet, all_fragments_sent: bool) {
        self.upper.transmit_finished(packet, all_fragments_sent);
    }
}

/// Resolves the wire channel for an outbound packet, best-effort, per §7
/// ("unknown event tag on outbound: log error ... attempt send").
fn outbound_channel_for(packet: &Packet) -> Channel {
    packet.tag().outbound_channel().unwrap_or_else(|| {
        log::error!("packet tagged {:?} has no outbound channel; sending on ACL anyway", packet.tag());
        Channel::Acl
    })
}

fn num_completed_packets(event: &Packet) -> Option<u8> {
    let bytes = event.as_bytes();
    match bytes.first()? {
        0x0E => bytes.get(2).copied(),
        0x0F => bytes.get(3).copied(),
        _ => None,
    }
}

/// All inbound channels the reactor should notice once the HAL announces
/// data is ready on at least one of them. Exposed for the production HAL
/// to iterate when it can't tell which specific channel woke it up.
pub fn inbound_channels() -> &'static [Channel] {
    &INBOUND_CHANNELS
}
