//! Packet and stream-type primitives shared by every layer of the core.
//!
//! Mirrors `BT_HDR` and `serial_data_type_t` from the original hci_layer, but
//! as owned Rust types: a [`Packet`] carries its own buffer instead of an
//! `offset`/`len` pair into a pooled allocation.

use std::fmt;

/// One of the four byte-streams a controller link carries.
///
/// `Command` only ever flows outbound; inbound reassembly only ever runs
/// over [`INBOUND_CHANNELS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Command,
    Acl,
    Sco,
    Event,
}

impl Channel {
    /// Fixed preamble size for this channel (Bluetooth Core, Vol 2 Part E, 5.4).
    pub const fn preamble_size(self) -> usize {
        match self {
            Channel::Command => 3,
            Channel::Acl => 4,
            Channel::Sco => 3,
            Channel::Event => 2,
        }
    }

    /// Index into a 3-slot per-channel table of inbound-only state.
    pub(crate) const fn inbound_index(self) -> Option<usize> {
        match self {
            Channel::Acl => Some(0),
            Channel::Sco => Some(1),
            Channel::Event => Some(2),
            Channel::Command => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Command => "command",
            Channel::Acl => "acl",
            Channel::Sco => "sco",
            Channel::Event => "event",
        };
        f.write_str(s)
    }
}

/// The three channels the inbound assembler keeps a [`ReceiveContext`] for.
///
/// [`ReceiveContext`]: crate::assembler::ReceiveContext
pub const INBOUND_CHANNELS: [Channel; 3] = [Channel::Acl, Channel::Sco, Channel::Event];

/// Direction/class tag carried by every [`Packet`] (the original's `event` field).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventTag {
    Command,
    AclOut,
    ScoOut,
    EventIn,
    AclIn,
    ScoIn,
    ErrorIn,
}

impl EventTag {
    /// The wire channel a tag is transmitted on, for outbound tags.
    ///
    /// Returns `None` for inbound-only tags; nothing in this crate ever
    /// constructs a `Packet` with an inbound tag and hands it to the
    /// scheduler, so this is a belt-and-suspenders check rather than a
    /// reachable error path (see DESIGN.md).
    pub fn outbound_channel(self) -> Option<Channel> {
        match self {
            EventTag::Command => Some(Channel::Command),
            EventTag::AclOut => Some(Channel::Acl),
            EventTag::ScoOut => Some(Channel::Sco),
            EventTag::EventIn | EventTag::AclIn | EventTag::ScoIn | EventTag::ErrorIn => None,
        }
    }

    /// The tag a freshly reassembled inbound packet on `channel` receives.
    pub fn inbound_for(channel: Channel) -> EventTag {
        match channel {
            Channel::Acl => EventTag::AclIn,
            Channel::Sco => EventTag::ScoIn,
            Channel::Event => EventTag::EventIn,
            Channel::Command => unreachable!("command channel is outbound-only"),
        }
    }
}

/// A variable-length HCI packet buffer.
///
/// `offset`/`len` slide within `data` the way the original's `BT_HDR` does,
/// so a fragmenter can consume a prefix without reallocating. Ownership is
/// value semantics: whoever holds the `Packet` owns the buffer, and it is
/// released by being dropped.
#[derive(Clone, Debug)]
pub struct Packet {
    data: Vec<u8>,
    offset: usize,
    len: usize,
    tag: EventTag,
}

impl Packet {
    pub fn new(tag: EventTag, data: Vec<u8>) -> Self {
        let len = data.len();
        Packet { data, offset: 0, len, tag }
    }

    pub fn tag(&self) -> EventTag {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Slides `offset` forward by `n`, shrinking the visible length.
    /// Used by a fragmenter to consume a header before dispatching the rest.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.offset += n;
        self.len -= n;
    }

    /// Consumes the packet, returning the raw backing buffer (offset/len applied).
    pub fn into_bytes(self) -> Vec<u8> {
        if self.offset == 0 && self.len == self.data.len() {
            self.data
        } else {
            self.data[self.offset..self.offset + self.len].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_slides_the_visible_window() {
        let mut p = Packet::new(EventTag::AclIn, vec![1, 2, 3, 4, 5]);
        p.advance(2);
        assert_eq!(p.as_bytes(), &[3, 4, 5]);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn outbound_channel_mapping() {
        assert_eq!(EventTag::Command.outbound_channel(), Some(Channel::Command));
        assert_eq!(EventTag::AclOut.outbound_channel(), Some(Channel::Acl));
        assert_eq!(EventTag::EventIn.outbound_channel(), None);
    }
}
