//! `HCI_FILTER` sockopt bitmask, adapted near-verbatim from the teacher
//! crate's `filter.rs`. Ranges are unchanged; errors are remapped onto
//! [`HciError::FilterRange`] instead of raw `io::Error` so filter misuse
//! reads as a domain error rather than an I/O failure.

use crate::error::HciError;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct HciFilter {
    type_mask: u32,
    event_mask: u64,
    opcode: u16,
}

impl HciFilter {
    pub fn get_type_mask(&self) -> u32 {
        self.type_mask
    }

    pub fn set_type_mask(&mut self, type_mask: u32) {
        self.type_mask = type_mask
    }

    pub fn clear_type_mask(&mut self) {
        self.type_mask = 0;
    }

    pub fn set_type(&mut self, t: u8) -> Result<(), HciError> {
        if t < 32 {
            self.type_mask |= 1 << t;
            Ok(())
        } else {
            Err(HciError::FilterRange("packet type out of range"))
        }
    }

    pub fn unset_type(&mut self, t: u8) -> Result<(), HciError> {
        if t < 32 {
            self.type_mask &= !(1 << t);
            Ok(())
        } else {
            Err(HciError::FilterRange("packet type out of range"))
        }
    }

    pub fn get_event_mask(&self) -> u64 {
        self.event_mask
    }

    pub fn set_event_mask(&mut self, event_mask: u64) {
        self.event_mask = event_mask
    }

    pub fn clear_event_mask(&mut self) {
        self.event_mask = 0;
    }

    pub fn set_event(&mut self, event: u8) -> Result<(), HciError> {
        if event < 64 {
            self.event_mask |= 1 << event;
            Ok(())
        } else {
            Err(HciError::FilterRange("event code out of range"))
        }
    }

    pub fn unset_event(&mut self, event: u8) -> Result<(), HciError> {
        if event < 64 {
            self.event_mask &= !(1 << event);
            Ok(())
        } else {
            Err(HciError::FilterRange("event code out of range"))
        }
    }

    pub fn get_opcode(&self) -> u16 {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: u16) {
        self.opcode = opcode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_type() {
        let mut filter = HciFilter::default();
        assert!(filter.set_type(32).is_err());
        assert!(filter.set_type(31).is_ok());
        assert_eq!(filter.get_type_mask(), 1 << 31);
    }

    #[test]
    fn rejects_out_of_range_event() {
        let mut filter = HciFilter::default();
        assert!(filter.set_event(64).is_err());
        assert!(filter.set_event(0x0E).is_ok());
        assert_eq!(filter.get_event_mask(), 1 << 0x0E);
    }
}
