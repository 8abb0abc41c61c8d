//! End-to-end exercise of the command/event path (§8 scenarios S1-S3) and
//! the shutdown epilog, wired with fake collaborators instead of a real
//! controller — the same shape as the teacher's own unit tests, just
//! spanning the whole [`HciLayer`] instead of one module.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hci_transport::{
    BdAddr, Channel, Collaborators, Controller, Fragmenter, FragmenterSink, HciConfig, HciError,
    HciLayer, Logger, LowPower, LowPowerCommand, Packet, StdAllocator, UpperCallbacks,
    UpwardDispatcher, Vendor, VendorAsyncResult, VendorOp,
};
use hci_transport::registry::ProcessTerminator;
use hci_transport::collaborators::Hal;
use hci_transport::worker::WorkerHandle;

struct FakeHal {
    handle: Option<WorkerHandle>,
    inbound: Arc<Mutex<std::collections::VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
    poller: Option<std::thread::JoinHandle<()>>,
}

impl Hal for FakeHal {
    fn init(&mut self, handle: WorkerHandle) {
        // The real HAL notifies `data_ready` once per chunk a UART interrupt
        // or socket read hands it; this fake has no such event source, so a
        // poll thread stands in for it, nudging the worker whenever the test
        // pushes bytes into `inbound` directly.
        let inbound = self.inbound.clone();
        let worker_handle = handle.clone();
        self.poller = Some(std::thread::spawn(move || {
            for _ in 0..2_000 {
                if !inbound.lock().unwrap().is_empty() {
                    worker_handle.data_ready(Channel::Event);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }));
        self.handle = Some(handle);
    }
    fn open(&mut self) -> Result<(), HciError> {
        Ok(())
    }
    fn close(&mut self) {}
    fn read_data(&mut self, _channel: Channel, dst: &mut [u8], _block: bool) -> usize {
        let mut queue = self.inbound.lock().unwrap();
        let n = dst.len().min(queue.len());
        for slot in dst.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        n
    }
    fn transmit_data(&mut self, channel: Channel, bytes: &[u8]) {
        assert_eq!(channel, Channel::Command);
        self.outbound.lock().unwrap().extend_from_slice(bytes);
    }
    fn packet_finished(&mut self, _channel: Channel) {}
}

struct NoopFragmenter;
impl Fragmenter for NoopFragmenter {
    fn fragment_and_dispatch(&mut self, packet: Packet, sink: &mut dyn FragmenterSink) {
        sink.transmit_fragment(packet.clone(), true);
        sink.transmit_finished(packet, true);
    }
    fn reassemble_and_dispatch(&mut self, packet: Packet, sink: &mut dyn FragmenterSink) {
        sink.dispatch_reassembled(packet);
    }
    fn cleanup(&mut self) {}
}

struct NoopVendor;
impl Vendor for NoopVendor {
    fn open(&mut self, _local_addr: BdAddr, _handle: WorkerHandle) {}
    fn close(&mut self) {}
    fn send_command(&mut self, _op: VendorOp, _arg: Option<&[u8]>) {}
    fn send_async_command(&mut self, _op: VendorOp) -> VendorAsyncResult {
        VendorAsyncResult::NotApplicable
    }
}

struct NoopController;
impl Controller for NoopController {
    fn begin_acl_size_fetch(&mut self, _handle: WorkerHandle) {}
}

struct NoopLowPower;
impl LowPower for NoopLowPower {
    fn init(&mut self, _handle: WorkerHandle) {}
    fn cleanup(&mut self) {}
    fn wake_assert(&mut self) {}
    fn transmit_done(&mut self) {}
    fn post_command(&mut self, _cmd: LowPowerCommand) {}
}

struct NoopLogger;
impl Logger for NoopLogger {
    fn open(&mut self, _path: &Path) -> Result<(), HciError> {
        Ok(())
    }
    fn close(&mut self) {}
    fn capture(&mut self, _packet: &Packet, _is_received: bool) {}
}

struct NoopUpper;
impl UpperCallbacks for NoopUpper {
    fn preload_finished(&mut self, _success: bool) {}
    fn transmit_finished(&mut self, _packet: Packet, _all_sent: bool) {}
}

struct NoopDispatcher;
impl UpwardDispatcher for NoopDispatcher {
    fn dispatch(&mut self, _tag: hci_transport::EventTag, _packet: Packet) {}
}

fn build_layer(
    inbound: Arc<Mutex<std::collections::VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
    config: HciConfig,
) -> HciLayer {
    let collaborators = Collaborators {
        hal: Box::new(FakeHal { handle: None, inbound, outbound, poller: None }),
        fragmenter: Box::new(NoopFragmenter),
        vendor: Box::new(NoopVendor),
        controller: Box::new(NoopController),
        low_power: Box::new(NoopLowPower),
        logger: Box::new(NoopLogger),
        allocator: Box::new(StdAllocator),
        fault_reporter: Arc::new(ProcessTerminator),
    };
    HciLayer::new_with(collaborators, Box::new(NoopUpper), Box::new(NoopDispatcher), config)
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn command_complete_invokes_on_complete_and_frees_the_slot() {
    let _ = env_logger::try_init();
    let inbound = Arc::new(Mutex::new(std::collections::VecDeque::new()));
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let mut layer =
        build_layer(inbound.clone(), outbound.clone(), HciConfig::default());
    layer.start_up(BdAddr([0, 0, 0, 0, 0, 0])).unwrap();

    let completed = Arc::new(AtomicBool::new(false));
    let completed2 = completed.clone();
    layer.transmit_command(
        0x0C03,
        vec![0x03, 0x0C, 0x00],
        Some(Box::new(move |_packet| completed2.store(true, Ordering::SeqCst))),
        None,
    );

    assert!(wait_until(|| !outbound.lock().unwrap().is_empty(), Duration::from_secs(2)));
    assert_eq!(&*outbound.lock().unwrap(), &[0x03, 0x0C, 0x00]);

    // Simulate the controller replying with Command Complete for 0x0C03.
    inbound
        .lock()
        .unwrap()
        .extend([0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00]);

    assert!(wait_until(|| completed.load(Ordering::SeqCst), Duration::from_secs(2)));

    layer.shut_down();
}

#[test]
fn second_command_waits_for_credit_before_transmitting() {
    let inbound = Arc::new(Mutex::new(std::collections::VecDeque::new()));
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let mut config = HciConfig::default();
    config.initial_credits = 1;
    let mut layer = build_layer(inbound.clone(), outbound.clone(), config);
    layer.start_up(BdAddr([0, 0, 0, 0, 0, 0])).unwrap();

    let a_done = Arc::new(AtomicU8::new(0));
    let b_done = Arc::new(AtomicU8::new(0));
    let (a2, b2) = (a_done.clone(), b_done.clone());

    layer.transmit_command(0x0C03, vec![0x03, 0x0C, 0x00], Some(Box::new(move |_| {
        a2.store(1, Ordering::SeqCst);
    })), None);
    layer.transmit_command(0x0C04, vec![0x04, 0x0C, 0x00], Some(Box::new(move |_| {
        b2.store(1, Ordering::SeqCst);
    })), None);

    assert!(wait_until(|| !outbound.lock().unwrap().is_empty(), Duration::from_secs(2)));
    // Only the first command's bytes should have gone out so far.
    assert_eq!(&*outbound.lock().unwrap(), &[0x03, 0x0C, 0x00]);

    inbound.lock().unwrap().extend([0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00]);
    assert!(wait_until(|| a_done.load(Ordering::SeqCst) == 1, Duration::from_secs(2)));

    assert!(wait_until(
        || outbound.lock().unwrap().len() == 6,
        Duration::from_secs(2)
    ));
    assert_eq!(&outbound.lock().unwrap()[3..], &[0x04, 0x0C, 0x00]);

    inbound.lock().unwrap().extend([0x0E, 0x04, 0x01, 0x04, 0x0C, 0x00]);
    assert!(wait_until(|| b_done.load(Ordering::SeqCst) == 1, Duration::from_secs(2)));

    layer.shut_down();
}

#[test]
fn shut_down_is_idempotent() {
    let inbound = Arc::new(Mutex::new(std::collections::VecDeque::new()));
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let mut layer = build_layer(inbound, outbound, HciConfig::default());
    layer.start_up(BdAddr([0, 0, 0, 0, 0, 0])).unwrap();
    layer.shut_down();
    layer.shut_down();
}
