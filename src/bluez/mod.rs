//! Production [`Hal`] backed by a BlueZ raw HCI socket.
//!
//! `hciN` raw sockets are framed: each `read` returns exactly one HCI
//! packet prefixed with its `serial_data_type_t` byte (command/ACL/SCO/
//! event), the same framing a UART transport's H4 byte stream encodes
//! inline. The assembler (`crate::assembler`) expects a continuous
//! per-channel byte stream instead, the way a real UART HAL would present
//! it, so a background reader thread demuxes each datagram by its leading
//! type byte into a per-channel queue and `read_data` drains from there.

mod filter;
mod socket;

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::collaborators::Hal;
use crate::error::HciError;
use crate::packet::Channel;
use crate::worker::WorkerHandle;

use filter::HciFilter;
use socket::Socket;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_ACLDATA_PKT: u8 = 0x02;
const HCI_SCODATA_PKT: u8 = 0x03;
const HCI_EVENT_PKT: u8 = 0x04;

/// Largest single read the reader thread issues; an HCI event tops out at
/// 2 (preamble) + 255 bytes, ACL/SCO frames can run larger.
const READ_BUF_SIZE: usize = 4096;

fn channel_for_type(byte: u8) -> Option<Channel> {
    match byte {
        HCI_ACLDATA_PKT => Some(Channel::Acl),
        HCI_SCODATA_PKT => Some(Channel::Sco),
        HCI_EVENT_PKT => Some(Channel::Event),
        _ => None,
    }
}

fn type_byte_for(channel: Channel) -> u8 {
    match channel {
        Channel::Command => HCI_COMMAND_PKT,
        Channel::Acl => HCI_ACLDATA_PKT,
        Channel::Sco => HCI_SCODATA_PKT,
        Channel::Event => HCI_EVENT_PKT,
    }
}

struct ChannelQueues {
    acl: Mutex<VecDeque<u8>>,
    sco: Mutex<VecDeque<u8>>,
    event: Mutex<VecDeque<u8>>,
}

impl ChannelQueues {
    fn new() -> Self {
        ChannelQueues {
            acl: Mutex::new(VecDeque::new()),
            sco: Mutex::new(VecDeque::new()),
            event: Mutex::new(VecDeque::new()),
        }
    }

    fn queue_for(&self, channel: Channel) -> &Mutex<VecDeque<u8>> {
        match channel {
            Channel::Acl => &self.acl,
            Channel::Sco => &self.sco,
            Channel::Event => &self.event,
            Channel::Command => unreachable!("command channel has no inbound queue"),
        }
    }
}

pub struct BlueZHal {
    device_id: u16,
    socket: Option<Socket>,
    queues: Arc<ChannelQueues>,
    reader_running: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    handle: Option<WorkerHandle>,
}

impl BlueZHal {
    pub fn new(device_id: u16) -> Self {
        BlueZHal {
            device_id,
            socket: None,
            queues: Arc::new(ChannelQueues::new()),
            reader_running: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            handle: None,
        }
    }

    fn build_filter() -> HciFilter {
        let mut filter = HciFilter::default();
        // accept events and data from every opcode/type this transport
        // carries; opcode filtering happens in the event filter component.
        filter.set_type(HCI_EVENT_PKT).expect("event type in range");
        filter.set_type(HCI_ACLDATA_PKT).expect("acl type in range");
        filter.set_type(HCI_SCODATA_PKT).expect("sco type in range");
        filter.set_event_mask(u64::MAX);
        filter
    }
}

impl Hal for BlueZHal {
    fn init(&mut self, handle: WorkerHandle) {
        self.handle = Some(handle);
    }

    fn open(&mut self) -> Result<(), HciError> {
        let socket = Socket::open(self.device_id)?;
        socket.set_filter(&Self::build_filter())?;
        let reader_socket = socket.try_clone()?;

        self.reader_running.store(true, Ordering::SeqCst);
        let running = self.reader_running.clone();
        let queues = self.queues.clone();
        let handle = self.handle.clone().expect("init called before open");

        self.reader_thread = Some(thread::spawn(move || {
            reader_loop(reader_socket, queues, running, handle);
        }));
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        self.reader_running.store(false, Ordering::SeqCst);
        self.socket = None;
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }

    fn read_data(&mut self, channel: Channel, dst: &mut [u8], _block: bool) -> usize {
        let queue = self.queues.queue_for(channel);
        let mut queue = queue.lock().unwrap();
        let n = dst.len().min(queue.len());
        for slot in dst.iter_mut().take(n) {
            *slot = queue.pop_front().expect("checked length above");
        }
        n
    }

    fn transmit_data(&mut self, channel: Channel, bytes: &[u8]) {
        let Some(socket) = &self.socket else {
            log::error!("attempted to transmit on {channel} with no open socket");
            return;
        };
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(type_byte_for(channel));
        frame.extend_from_slice(bytes);
        if let Err(err) = socket.send(&frame) {
            log::error!("failed to transmit {channel} frame: {err}");
        }
    }

    fn packet_finished(&mut self, _channel: Channel) {}
}

fn reader_loop(
    mut socket: Socket,
    queues: Arc<ChannelQueues>,
    running: Arc<AtomicBool>,
    handle: WorkerHandle,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    while running.load(Ordering::SeqCst) {
        let n = match socket.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    log::warn!("hci socket read failed: {err}");
                }
                break;
            }
        };

        let Some((&type_byte, body)) = buf[..n].split_first() else {
            continue;
        };
        let Some(channel) = channel_for_type(type_byte) else {
            log::warn!("dropping frame with unrecognized type byte 0x{type_byte:02x}");
            continue;
        };

        {
            let mut queue = queues.queue_for(channel).lock().unwrap();
            queue.extend(body.iter().copied());
        }
        handle.data_ready(channel);
    }
}
