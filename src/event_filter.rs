//! C2: interception of Command Complete / Command Status events.
//!
//! Grounded on `filter_incoming_event` in the original: peek the event
//! code, and for the two command-response events, pull the matching
//! [`WaitingCommand`](crate::registry::WaitingCommand) out of the registry
//! and hand the packet to its callback instead of letting it flow upward.
//! Everything else passes through untouched.

use crate::collaborators::Allocator;
use crate::packet::Packet;
use crate::registry::PendingCommands;

const EVT_CMD_COMPLETE: u8 = 0x0E;
const EVT_CMD_STATUS: u8 = 0x0F;

/// HCI event header: 1 byte event code, 1 byte length, then parameters.
/// Command Complete parameters begin with num_hci_command_packets (1) then
/// opcode (2, LE); Command Status begins with status (1), then the same.
fn event_code(packet: &Packet) -> Option<u8> {
    packet.as_bytes().first().copied()
}

fn opcode_in_complete(params: &[u8]) -> Option<u16> {
    let lo = *params.get(1)?;
    let hi = *params.get(2)?;
    Some(u16::from_le_bytes([lo, hi]))
}

fn opcode_in_status(params: &[u8]) -> Option<u16> {
    let lo = *params.get(2)?;
    let hi = *params.get(3)?;
    Some(u16::from_le_bytes([lo, hi]))
}

/// Consumes `packet` if it is a Command Complete/Status matching a command
/// the registry is waiting on, invoking that command's callback. Returns
/// `Some(packet)` untouched for anything else, so the caller dispatches it
/// upward as a normal event.
///
/// `allocator` is accepted for symmetry with the inbound assembler's
/// signature but unused here; this step never allocates.
pub fn filter_incoming_event(
    packet: Packet,
    pending: &PendingCommands,
    _allocator: &mut dyn Allocator,
) -> Option<Packet> {
    let code = match event_code(&packet) {
        Some(c) => c,
        None => return Some(packet),
    };

    let params = &packet.as_bytes()[2.min(packet.len())..];

    let opcode = match code {
        EVT_CMD_COMPLETE => opcode_in_complete(params),
        EVT_CMD_STATUS => opcode_in_status(params),
        _ => None,
    };

    let opcode = match opcode {
        Some(op) => op,
        None => return Some(packet),
    };

    let waiting = match pending.take_by_opcode(opcode) {
        Some(w) => w,
        None => {
            log::warn!(
                "received a command response for opcode 0x{opcode:04x} with no matching \
                 pending command; releasing it",
            );
            return None;
        }
    };

    match code {
        EVT_CMD_COMPLETE => {
            if let Some(cb) = waiting.on_complete {
                cb(packet);
            }
        }
        EVT_CMD_STATUS => {
            let status = packet.as_bytes().get(2).copied().unwrap_or(0xFF);
            if let Some(cb) = waiting.on_status {
                cb(status, packet);
            }
        }
        _ => unreachable!(),
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StdAllocator;
    use crate::packet::EventTag;
    use crate::registry::{ProcessTerminator, WaitingCommand};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn registry() -> Arc<PendingCommands> {
        PendingCommands::new(Duration::from_secs(60), Arc::new(ProcessTerminator))
    }

    #[test]
    fn intercepts_command_complete_for_a_pending_opcode() {
        let reg = registry();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let mut cmd = WaitingCommand::new(0x0C03, Packet::new(EventTag::Command, vec![0; 4]));
        cmd.on_complete = Some(Box::new(move |p| *seen2.lock().unwrap() = Some(p.len())));
        reg.push(cmd);

        let event = Packet::new(
            EventTag::EventIn,
            vec![EVT_CMD_COMPLETE, 0x04, 0x01, 0x03, 0x0C, 0x00],
        );
        let mut allocator = StdAllocator;
        let result = filter_incoming_event(event, &reg, &mut allocator);
        assert!(result.is_none());
        assert_eq!(*seen.lock().unwrap(), Some(6));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn passes_through_events_that_are_not_command_responses() {
        let reg = registry();
        let event = Packet::new(EventTag::EventIn, vec![0x13, 0x01, 0x01]);
        let mut allocator = StdAllocator;
        let result = filter_incoming_event(event, &reg, &mut allocator);
        assert!(result.is_some());
    }

    #[test]
    fn intercepts_command_status_and_hands_the_command_buffer_to_its_callback() {
        // S3: LE Create Connection (0x200B), status 0x12.
        let reg = registry();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        let mut cmd = WaitingCommand::new(0x200B, Packet::new(EventTag::Command, vec![0x0B, 0x20, 0x00]));
        cmd.on_status = Some(Box::new(move |status, buf| {
            *seen2.lock().unwrap() = Some((status, buf.as_bytes().to_vec()))
        }));
        reg.push(cmd);

        let event =
            Packet::new(EventTag::EventIn, vec![EVT_CMD_STATUS, 0x04, 0x12, 0x01, 0x0B, 0x20]);
        let mut allocator = StdAllocator;
        let result = filter_incoming_event(event, &reg, &mut allocator);
        assert!(result.is_none());
        assert_eq!(*seen.lock().unwrap(), Some((0x12, vec![0x0B, 0x20, 0x00])));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn releases_a_response_with_no_matching_pending_command() {
        let reg = registry();
        let event = Packet::new(
            EventTag::EventIn,
            vec![EVT_CMD_COMPLETE, 0x04, 0x01, 0x99, 0x99, 0x00],
        );
        let mut allocator = StdAllocator;
        let result = filter_incoming_event(event, &reg, &mut allocator);
        assert!(result.is_none());
    }
}
