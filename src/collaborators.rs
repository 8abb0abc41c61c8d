//! Capability boundary between the core and everything around it (§6).
//!
//! Each trait here stands in for a function-pointer table in the original:
//! `hci_hal_t`, `packet_fragmenter_t`, `vendor_t`, `low_power_manager_t`,
//! `btsnoop_t`, `controller_t` (just the one method the core actually calls,
//! `begin_acl_size_fetch`). Production and test code differ only in which
//! implementations they hand to [`crate::HciLayer::start_up`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::HciError;
use crate::packet::{Channel, Packet};
use crate::worker::WorkerHandle;

/// `bdaddr_t`: a Bluetooth device address, big-endian-agnostic 48 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Hardware abstraction: a serial-like channel carrying the four streams.
///
/// `read_data` is specified as non-blocking at `block = false`; the
/// assembler only ever calls it that way (§4.1). `init` hands the HAL a
/// [`WorkerHandle`] so it can post `data_ready` notifications from whatever
/// thread actually reads the wire.
pub trait Hal: Send {
    fn init(&mut self, handle: WorkerHandle);
    fn open(&mut self) -> Result<(), HciError>;
    fn close(&mut self);
    fn read_data(&mut self, channel: Channel, dst: &mut [u8], block: bool) -> usize;
    fn transmit_data(&mut self, channel: Channel, bytes: &[u8]);
    fn packet_finished(&mut self, channel: Channel);
}

/// Receives the three fragmenter upcalls for one `fragment_and_dispatch` or
/// `reassemble_and_dispatch` call. Implemented by [`crate::worker::Worker`].
pub trait FragmenterSink {
    fn transmit_fragment(&mut self, packet: Packet, last_fragment: bool);
    fn dispatch_reassembled(&mut self, packet: Packet);
    fn transmit_finished(&mut self, packet: Packet, all_fragments_sent: bool);
}

/// Splits oversized outbound payloads into controller-sized fragments and
/// reassembles inbound fragments — explicitly out of scope for this crate
/// (§1); only the contract the core drives it through is modeled.
pub trait Fragmenter: Send {
    fn fragment_and_dispatch(&mut self, packet: Packet, sink: &mut dyn FragmenterSink);
    fn reassemble_and_dispatch(&mut self, packet: Packet, sink: &mut dyn FragmenterSink);
    fn cleanup(&mut self);
}

/// Vendor driver operations the lifecycle coordinator drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorOp {
    ConfigureFirmware,
    ConfigureSco,
    Epilog,
    ChipPowerControl,
}

/// Result of `vendor->send_async_command`: negative in the original means
/// "not applicable for this controller."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorAsyncResult {
    Scheduled,
    NotApplicable,
}

pub trait Vendor: Send {
    fn open(&mut self, local_addr: BdAddr, handle: WorkerHandle);
    fn close(&mut self);
    fn send_command(&mut self, op: VendorOp, arg: Option<&[u8]>);
    fn send_async_command(&mut self, op: VendorOp) -> VendorAsyncResult;
}

/// The one controller operation the core calls directly (§4.5, postload).
pub trait Controller: Send {
    fn begin_acl_size_fetch(&mut self, handle: WorkerHandle);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LowPowerCommand {
    WakeLockAcquire,
    WakeLockRelease,
}

pub trait LowPower: Send {
    fn init(&mut self, handle: WorkerHandle);
    fn cleanup(&mut self);
    fn wake_assert(&mut self);
    fn transmit_done(&mut self);
    fn post_command(&mut self, cmd: LowPowerCommand);
}

/// btsnoop-style packet capture hook.
pub trait Logger: Send {
    fn open(&mut self, path: &Path) -> Result<(), HciError>;
    fn close(&mut self);
    fn capture(&mut self, packet: &Packet, is_received: bool);
}

/// Upper-layer callbacks the core invokes (§6, "Upper callbacks").
pub trait UpperCallbacks: Send {
    fn preload_finished(&mut self, success: bool);
    fn transmit_finished(&mut self, packet: Packet, all_sent: bool);
}

/// Tagged dispatcher reassembled inbound packets are delivered to.
pub trait UpwardDispatcher: Send {
    fn dispatch(&mut self, tag: crate::packet::EventTag, packet: Packet);
}

/// Abstraction over "a wedged controller is fatal" (§4.3, §9 Design Note 3).
/// Production wires this to process termination; tests substitute an
/// observable recorder.
pub trait FatalFaultReporter: Send + Sync {
    fn report(&self, opcode: u16);
}

/// Fallible buffer source for inbound packet reassembly (§4.1, §7).
/// Only the inbound assembler uses this — `transmit_command`'s allocation
/// failure path (§7) is handled with `Queue::try_push`'s own
/// `try_reserve` directly, since it runs on the caller's thread and
/// doesn't need a pluggable collaborator (see DESIGN.md).
pub trait Allocator: Send {
    fn alloc(&mut self, size: usize) -> Option<Vec<u8>>;
}

pub struct StdAllocator;

impl Allocator for StdAllocator {
    fn alloc(&mut self, size: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(buf)
    }
}

/// The full set of collaborators the worker owns for its lifetime.
/// Mirrors `hci_layer_get_interface` (production) vs.
/// `hci_layer_get_test_interface` (test) from the original: one struct,
/// two ways to build it.
pub struct Collaborators {
    pub hal: Box<dyn Hal>,
    pub fragmenter: Box<dyn Fragmenter>,
    pub vendor: Box<dyn Vendor>,
    pub controller: Box<dyn Controller>,
    pub low_power: Box<dyn LowPower>,
    pub logger: Box<dyn Logger>,
    pub allocator: Box<dyn Allocator>,
    pub fault_reporter: Arc<dyn FatalFaultReporter>,
}
