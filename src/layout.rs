use crate::consts::*;
use crate::error::{PmpError, PmpResult};

/// Register layout of one protection table.
///
/// The CPU PMP and the IO-PMP differ only in these constants; the engine in
/// [`crate::ProtectionTable`] is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Used in log messages.
    pub name: &'static str,
    /// Offset of the first configuration word in the register window.
    pub cfg_base: usize,
    /// Offset of slot 0's address register in the register window.
    pub addr_base: usize,
    /// Number of protection entries.
    pub num_slots: usize,
    /// Right shift applied to byte addresses before they are written.
    pub addr_shift: u32,
}

/// The hart's PMP, reached through [`crate::RegisterFile`] CSR offsets.
pub const PMP_LAYOUT: TableLayout = TableLayout {
    name: "PMP",
    cfg_base: PMP_CFG_OFFSET,
    addr_base: PMP_ADDR_OFFSET,
    num_slots: PMP_NUM_SLOTS,
    addr_shift: PMP_ADDR_SHIFT,
};

/// The memory-mapped IO-PMP guarding the DMA engine.
pub const IOPMP_LAYOUT: TableLayout = TableLayout {
    name: "IO-PMP",
    cfg_base: IOPMP_CFG_OFFSET,
    addr_base: IOPMP_ADDR_OFFSET,
    num_slots: IOPMP_NUM_SLOTS,
    addr_shift: PMP_ADDR_SHIFT,
};

impl TableLayout {
    /// Rejects slots outside `[0, num_slots)`.
    pub fn check_slot(&self, slot: usize) -> PmpResult {
        if slot < self.num_slots {
            Ok(())
        } else {
            Err(PmpError::InvalidSlot {
                slot,
                num_slots: self.num_slots,
            })
        }
    }

    /// Offset of the configuration word holding `slot`'s byte.
    pub const fn cfg_offset(&self, slot: usize) -> usize {
        self.cfg_base + (slot / SLOTS_PER_CFG_WORD) * REG_STRIDE
    }

    /// Bit position of `slot`'s byte lane inside its configuration word.
    pub const fn lane_shift(slot: usize) -> usize {
        (slot % SLOTS_PER_CFG_WORD) * 8
    }

    /// Offset of `slot`'s address register.
    pub const fn addr_offset(&self, slot: usize) -> usize {
        self.addr_base + slot * REG_STRIDE
    }

    /// Number of configuration words used by the table.
    pub const fn cfg_words(&self) -> usize {
        self.num_slots.div_ceil(SLOTS_PER_CFG_WORD)
    }

    /// Size in bytes of the register window covering both register banks.
    pub const fn window_size(&self) -> usize {
        let cfg_end = self.cfg_base + self.cfg_words() * REG_STRIDE;
        let addr_end = self.addr_base + self.num_slots * REG_STRIDE;
        if cfg_end > addr_end {
            cfg_end
        } else {
            addr_end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_offsets() {
        let l = IOPMP_LAYOUT;
        assert_eq!(l.addr_offset(0), 0x00);
        assert_eq!(l.addr_offset(15), 0x78);
        assert_eq!(l.cfg_offset(0), 0x80);
        assert_eq!(l.cfg_offset(7), 0x80);
        assert_eq!(l.cfg_offset(8), 0x88);
        assert_eq!(l.cfg_offset(15), 0x88);
        assert_eq!(TableLayout::lane_shift(0), 0);
        assert_eq!(TableLayout::lane_shift(9), 8);
        assert_eq!(TableLayout::lane_shift(15), 56);
        assert_eq!(l.cfg_words(), 2);
        assert_eq!(l.window_size(), 0x90);
    }

    #[test]
    fn slot_bounds() {
        assert!(PMP_LAYOUT.check_slot(0).is_ok());
        assert!(PMP_LAYOUT.check_slot(15).is_ok());
        assert_eq!(
            PMP_LAYOUT.check_slot(16),
            Err(PmpError::InvalidSlot {
                slot: 16,
                num_slots: 16
            })
        );
    }
}
