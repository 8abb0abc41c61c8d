//! Host Controller Interface transport core.
//!
//! Owns command-credit scheduling, inbound packet reassembly, and
//! lifecycle sequencing (startup/shutdown epilog) for a Bluetooth host
//! stack, sitting directly above the transport (HAL) and directly below
//! the upper protocol layers (L2CAP and friends). See `SPEC_FULL.md` for
//! the full component breakdown; this module is the facade (`C6`) that the
//! rest of the crate is built to support.

pub mod assembler;
pub mod bluez;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event_filter;
pub mod packet;
pub mod registry;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub use collaborators::{
    Allocator, BdAddr, Collaborators, Controller, FatalFaultReporter, Fragmenter, FragmenterSink,
    Hal, LowPower, LowPowerCommand, Logger, StdAllocator, UpperCallbacks, UpwardDispatcher,
    Vendor, VendorAsyncResult, VendorOp,
};
pub use config::HciConfig;
pub use error::HciError;
pub use packet::{Channel, EventTag, Packet};
pub use registry::{PendingCommands, ProcessTerminator, WaitingCommand};

use registry::{CompleteCallback, StatusCallback};
use worker::{Queue, Worker, WorkerHandle};

/// Entry point the rest of the host stack drives (§4.6 / C6).
///
/// Construction only records collaborators and configuration; the reactor
/// thread isn't spawned until [`HciLayer::start_up`] is called, matching
/// `init_layer_interface` vs. `start_up` being distinct steps in the
/// original.
pub struct HciLayer {
    collaborators: Option<Collaborators>,
    upper: Option<Box<dyn UpperCallbacks>>,
    dispatcher: Option<Box<dyn UpwardDispatcher>>,
    config: HciConfig,

    command_queue: Queue<WaitingCommand>,
    packet_queue: Queue<Packet>,
    handle: Option<WorkerHandle>,
    worker_thread: Option<JoinHandle<()>>,
    has_shut_down: Arc<AtomicBool>,
}

impl HciLayer {
    /// Production construction: the caller supplies every collaborator
    /// (`bluez::BlueZHal`, a real fragmenter, vendor driver, etc).
    pub fn new(
        collaborators: Collaborators,
        upper: Box<dyn UpperCallbacks>,
        dispatcher: Box<dyn UpwardDispatcher>,
    ) -> Self {
        Self::new_with(collaborators, upper, dispatcher, HciConfig::default())
    }

    /// Test/alternate construction taking an explicit [`HciConfig`] — the
    /// analogue of `hci_layer_get_test_interface` handing back the same
    /// struct shape as `hci_layer_get_interface` but wired for injection.
    pub fn new_with(
        collaborators: Collaborators,
        upper: Box<dyn UpperCallbacks>,
        dispatcher: Box<dyn UpwardDispatcher>,
        config: HciConfig,
    ) -> Self {
        HciLayer {
            collaborators: Some(collaborators),
            upper: Some(upper),
            dispatcher: Some(dispatcher),
            config,
            command_queue: Queue::new(),
            packet_queue: Queue::new(),
            handle: None,
            worker_thread: None,
            has_shut_down: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawns the reactor thread, opens the hardware and vendor driver for
    /// `local_addr`, and kicks off preload. Returns an error if called twice
    /// without an intervening [`HciLayer::shut_down`] (§6:
    /// `start_up(local_addr, upper_callbacks)`).
    pub fn start_up(&mut self, local_addr: BdAddr) -> Result<(), HciError> {
        let collaborators = self
            .collaborators
            .take()
            .ok_or_else(|| HciError::Startup("hci layer already started".into()))?;
        let upper = self.upper.take().expect("upper callbacks present alongside collaborators");
        let dispatcher =
            self.dispatcher.take().expect("dispatcher present alongside collaborators");

        let (handle, join) = Worker::spawn(
            local_addr,
            collaborators,
            upper,
            dispatcher,
            self.command_queue.clone(),
            self.packet_queue.clone(),
            self.config.clone(),
        );

        self.handle = Some(handle);
        self.worker_thread = Some(join);
        self.has_shut_down.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Same as [`HciLayer::start_up`] but returns `Ok(false)` instead of an
    /// error when already running, for callers that treat double-start as
    /// benign.
    pub fn try_start_up(&mut self, local_addr: BdAddr) -> Result<bool, HciError> {
        if self.handle.is_some() {
            return Ok(false);
        }
        self.start_up(local_addr)?;
        Ok(true)
    }

    /// Requests the preload handshake (vendor firmware configuration).
    /// Only meaningful after [`HciLayer::start_up`].
    pub fn do_preload(&self) {
        if let Some(handle) = &self.handle {
            handle.preload();
        }
    }

    /// Requests the postload handshake (ACL buffer size fetch, SCO vendor
    /// configuration).
    pub fn do_postload(&self) {
        if let Some(handle) = &self.handle {
            handle.postload();
        }
    }

    /// Idempotent: returns immediately if already shut down or never
    /// started. A single `AtomicBool` swap checked on the caller's thread
    /// stands in for the original's mutex-guarded flag (see DESIGN.md).
    pub fn shut_down(&mut self) {
        if self.has_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
        if let Some(join) = self.worker_thread.take() {
            let _ = join.join();
        }
    }

    pub fn turn_on_logging(&self, path: &Path) {
        if let Some(handle) = &self.handle {
            handle.enable_logging(PathBuf::from(path));
        }
    }

    pub fn turn_off_logging(&self) {
        if let Some(handle) = &self.handle {
            handle.disable_logging();
        }
    }

    /// Requests the vendor driver turn chip power on or off (§6).
    pub fn set_chip_power_on(&self, on: bool) {
        if let Some(handle) = &self.handle {
            handle.set_chip_power_on(on);
        }
    }

    /// Sets a vendor-specific low power command asynchronously; fire and
    /// forget from the caller's perspective — the worker owns the actual
    /// `LowPower` collaborator.
    pub fn send_low_power_command(&self, command: LowPowerCommand) {
        if let Some(handle) = &self.handle {
            handle.low_power_command(command);
        }
    }

    /// Queues an outbound command. `on_complete`/`on_status` are invoked on
    /// the reactor thread once the matching Command Complete/Status event
    /// arrives (§4.2/§4.3).
    ///
    /// If the command queue can't grow to hold one more entry, the request
    /// is logged and dropped without invoking either callback (§7).
    pub fn transmit_command(
        &self,
        opcode: u16,
        command_buffer: Vec<u8>,
        on_complete: Option<CompleteCallback>,
        on_status: Option<StatusCallback>,
    ) {
        let packet = Packet::new(EventTag::Command, command_buffer);
        let mut waiting = WaitingCommand::new(opcode, packet);
        waiting.on_complete = on_complete;
        waiting.on_status = on_status;
        if !self.command_queue.try_push(waiting) {
            log::error!(
                "failed to allocate a queue slot for command opcode 0x{opcode:04x}; dropping it",
            );
            return;
        }
        if let Some(handle) = &self.handle {
            handle.command_queued();
        }
    }

    /// Legacy downward path (§6): enqueues an ACL/SCO payload for
    /// transmission, fragmenting ACL payloads larger than the controller's
    /// buffer size. A caller that routes a command through here instead of
    /// [`HciLayer::transmit_command`] gets a logged warning and no
    /// completion callbacks, since this entry point carries no opcode or
    /// callback arguments of its own.
    pub fn transmit_downward(&self, tag: EventTag, payload: Vec<u8>) {
        if tag == EventTag::Command {
            log::warn!("transmit_downward called with EventTag::Command; routing to transmit_command with no callbacks");
            let opcode = match (payload.first(), payload.get(1)) {
                (Some(&lo), Some(&hi)) => u16::from_le_bytes([lo, hi]),
                _ => {
                    log::error!("command buffer too short to contain an opcode; sending as-is");
                    0
                }
            };
            self.transmit_command(opcode, payload, None, None);
            return;
        }

        let packet = Packet::new(tag, payload);
        self.packet_queue.push(packet);
        if let Some(handle) = &self.handle {
            handle.packet_queued();
        }
    }
}

impl Drop for HciLayer {
    fn drop(&mut self) {
        self.shut_down();
    }
}
