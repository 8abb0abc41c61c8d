//! C1: inbound byte-stream reassembly.
//!
//! Grounded on `hci_packet_parser.c`'s `STREAM_ASSEMBLER` pattern as used
//! through `hal_says_data_ready`/`read_data` in `hci_layer.c`: one small
//! state machine per inbound channel (ACL, SCO, Event), fed one
//! non-blocking read at a time, producing a complete [`Packet`] only when
//! the whole preamble + body has arrived.

use crate::collaborators::{Allocator, Hal};
use crate::packet::{Channel, EventTag, Packet};

#[derive(Debug)]
enum State {
    /// Waiting for the first preamble byte (nothing read yet this packet).
    Idle,
    /// Reading the fixed-size preamble into `header`.
    Preamble { header: Vec<u8> },
    /// Preamble complete; reading `remaining` more body bytes into `body`.
    Body { header: Vec<u8>, body: Vec<u8>, remaining: usize },
    /// Buffer allocation failed; discarding `remaining` body bytes with
    /// nowhere to put them (§4.1, §7 "degrade to ignore").
    Ignore { remaining: usize },
}

/// Per-channel reassembly state, named the way the original names its
/// per-stream bookkeeping (`hci_hal_h4_preload_context` and friends),
/// generalized to the three inbound channels.
pub struct ReceiveContext {
    state: State,
}

impl ReceiveContext {
    pub fn new() -> Self {
        ReceiveContext { state: State::Idle }
    }
}

/// Drives all three inbound [`ReceiveContext`]s off one `Hal`.
pub struct InboundAssembler {
    contexts: [ReceiveContext; 3],
}

impl InboundAssembler {
    pub fn new() -> Self {
        InboundAssembler {
            contexts: [ReceiveContext::new(), ReceiveContext::new(), ReceiveContext::new()],
        }
    }

    /// Pumps the context for `channel` until the HAL has no more bytes
    /// ready (`read_data(.., block = false)` returns 0) or a full packet
    /// has been reassembled. Returns at most one packet per call; the
    /// worker loops calling this until it gets `None` (§4.1).
    pub fn pump(
        &mut self,
        channel: Channel,
        hal: &mut dyn Hal,
        allocator: &mut dyn Allocator,
    ) -> Option<Packet> {
        let idx = channel.inbound_index().expect("inbound channel");
        let ctx = &mut self.contexts[idx];

        loop {
            match &mut ctx.state {
                State::Idle => {
                    let preamble_size = channel.preamble_size();
                    ctx.state = State::Preamble { header: Vec::with_capacity(preamble_size) };
                }
                State::Preamble { header } => {
                    let preamble_size = channel.preamble_size();
                    let want = preamble_size - header.len();
                    let mut buf = vec![0u8; want];
                    let n = hal.read_data(channel, &mut buf, false);
                    if n == 0 {
                        return None;
                    }
                    header.extend_from_slice(&buf[..n]);
                    if header.len() < preamble_size {
                        continue;
                    }
                    let body_len = body_length(channel, header);
                    if body_len == 0 {
                        let header = std::mem::take(header);
                        hal.packet_finished(channel);
                        let packet = Packet::new(EventTag::inbound_for(channel), header);
                        ctx.state = State::Idle;
                        return Some(packet);
                    }
                    match allocator.alloc(header.len() + body_len) {
                        Some(mut body) => {
                            body.truncate(0);
                            let header = std::mem::take(header);
                            ctx.state = State::Body { header, body, remaining: body_len };
                        }
                        None => {
                            log::warn!(
                                "failed to allocate {} bytes reassembling a {channel} packet; \
                                 discarding it",
                                header.len() + body_len,
                            );
                            ctx.state = State::Ignore { remaining: body_len };
                        }
                    }
                }
                State::Body { header, body, remaining } => {
                    let mut buf = vec![0u8; *remaining];
                    let n = hal.read_data(channel, &mut buf, false);
                    if n == 0 {
                        return None;
                    }
                    body.extend_from_slice(&buf[..n]);
                    *remaining -= n;
                    if *remaining > 0 {
                        continue;
                    }
                    let mut data = std::mem::take(header);
                    data.extend_from_slice(body);
                    hal.packet_finished(channel);
                    let packet = Packet::new(EventTag::inbound_for(channel), data);
                    ctx.state = State::Idle;
                    return Some(packet);
                }
                State::Ignore { remaining } => {
                    let mut buf = vec![0u8; *remaining];
                    let n = hal.read_data(channel, &mut buf, false);
                    if n == 0 {
                        return None;
                    }
                    *remaining -= n;
                    if *remaining > 0 {
                        continue;
                    }
                    hal.packet_finished(channel);
                    ctx.state = State::Idle;
                    continue;
                }
            }
        }
    }
}

impl Default for InboundAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Body length encoded in a channel's preamble (Bluetooth Core, Vol 2 Part E, 5.4).
fn body_length(channel: Channel, header: &[u8]) -> usize {
    match channel {
        Channel::Acl => {
            let lo = header[2] as usize;
            let hi = header[3] as usize;
            lo | (hi << 8)
        }
        Channel::Sco => header[2] as usize,
        Channel::Event => header[1] as usize,
        Channel::Command => unreachable!("command channel is outbound-only"),
    }
}
