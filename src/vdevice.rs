use axaddrspace::{device::AccessWidth, GuestPhysAddr, GuestPhysAddrRange};
use axdevice_base::{BaseDeviceOps, EmuDeviceType};
use axerrno::{ax_err, AxResult};
use log::{trace, warn};
use spin::Mutex;

use crate::consts::*;
use crate::layout::{TableLayout, IOPMP_LAYOUT};
use crate::region::AddressMode;
use crate::regs::RegisterFile;

const LAYOUT: TableLayout = IOPMP_LAYOUT;
const WINDOW_WORDS: usize = LAYOUT.window_size() / REG_STRIDE;

/// Reserved bits (5-6) of every lane read as zero.
const CFG_WORD_MASK: usize = usize::from_ne_bytes([pmpcfg::VALID_BITS; core::mem::size_of::<usize>()]);

/// An emulated IO-PMP register window.
///
/// Address registers behave like the hardware's WARL fields for the configured
/// granule: with the entry OFF or TOR the low `G` bits read as zero, with NAPOT
/// the low `G - 1` bits read as one. Bits above 53 are not implemented.
/// Locked lanes ignore writes.
pub struct VIoPmp {
    /// The address of the VIoPmp in the guest physical address space.
    pub addr: GuestPhysAddr,
    /// The size of the VIoPmp in bytes.
    pub size: usize,
    /// log2(granule) - 2
    g: u32,
    regs: Mutex<[usize; WINDOW_WORDS]>,
}

impl VIoPmp {
    pub fn new(addr: GuestPhysAddr, size: Option<usize>, granule: usize) -> Self {
        let size = size.unwrap_or(LAYOUT.window_size());
        assert!(
            size >= LAYOUT.window_size(),
            "Region [0x{:x}, 0x{:x}) too small for the IO-PMP window",
            addr.as_usize(),
            addr.as_usize() + size,
        );
        assert!(
            granule.is_power_of_two() && granule >= 4,
            "Invalid granule {:#x}",
            granule
        );
        Self {
            addr,
            size,
            g: granule.trailing_zeros() - PMP_ADDR_SHIFT,
            regs: Mutex::new([0; WINDOW_WORDS]),
        }
    }

    /// A device at the IO-PMP's physical base.
    pub fn with_granule(granule: usize) -> Self {
        Self::new(GuestPhysAddr::from_usize(IOPMP_BASE), None, granule)
    }

    pub fn granule(&self) -> usize {
        1 << (self.g + PMP_ADDR_SHIFT)
    }

    fn index(offset: usize) -> Option<usize> {
        if offset % REG_STRIDE != 0 || offset >= LAYOUT.window_size() {
            return None;
        }
        Some(offset / REG_STRIDE)
    }

    /// Slot whose address register sits at `offset`, if any.
    fn addr_slot(offset: usize) -> Option<usize> {
        let slot = offset.checked_sub(LAYOUT.addr_base)? / REG_STRIDE;
        (slot < LAYOUT.num_slots).then_some(slot)
    }

    fn cfg_byte(regs: &[usize; WINDOW_WORDS], slot: usize) -> u8 {
        let word = regs[LAYOUT.cfg_offset(slot) / REG_STRIDE];
        (word >> TableLayout::lane_shift(slot)) as u8
    }

    fn read_reg(&self, offset: usize) -> Option<usize> {
        let idx = Self::index(offset)?;
        let regs = self.regs.lock();
        let raw = regs[idx];
        let Some(slot) = Self::addr_slot(offset) else {
            return Some(raw);
        };
        let g = self.g;
        let val = match AddressMode::from_cfg(Self::cfg_byte(&regs, slot)) {
            AddressMode::Napot if g >= 2 => raw | ((1 << (g - 1)) - 1),
            AddressMode::Off | AddressMode::Tor if g >= 1 => raw & !((1 << g) - 1),
            _ => raw,
        };
        Some(val)
    }

    fn write_reg(&self, offset: usize, val: usize) -> Option<()> {
        let idx = Self::index(offset)?;
        let mut regs = self.regs.lock();
        if let Some(slot) = Self::addr_slot(offset) {
            if Self::cfg_byte(&regs, slot) & pmpcfg::L == 0 {
                regs[idx] = val & PMP_ADDR_MASK;
            }
            return Some(());
        }

        // Configuration word: keep locked lanes.
        let mut locked = 0usize;
        for lane in 0..SLOTS_PER_CFG_WORD {
            if (regs[idx] >> (lane * 8)) as u8 & pmpcfg::L != 0 {
                locked |= 0xff << (lane * 8);
            }
        }
        regs[idx] = (regs[idx] & locked) | (val & CFG_WORD_MASK & !locked);
        Some(())
    }
}

impl BaseDeviceOps<GuestPhysAddrRange> for VIoPmp {
    fn emu_type(&self) -> axdevice_base::EmuDeviceType {
        EmuDeviceType::Dummy
    }

    fn address_range(&self) -> GuestPhysAddrRange {
        GuestPhysAddrRange::from_start_size(self.addr, self.size)
    }

    fn handle_read(
        &self,
        addr: <GuestPhysAddrRange as axaddrspace::device::DeviceAddrRange>::Addr,
        width: axaddrspace::device::AccessWidth,
    ) -> axerrno::AxResult<usize> {
        if width != AccessWidth::Qword {
            return ax_err!(Unsupported, "vIoPmp only supports 64-bit accesses");
        }
        let reg = addr - self.addr;
        trace!("vIoPmp read reg {reg:#x}");
        match self.read_reg(reg) {
            Some(val) => Ok(val),
            None => ax_err!(InvalidInput, "vIoPmp read outside the register window"),
        }
    }

    fn handle_write(
        &self,
        addr: <GuestPhysAddrRange as axaddrspace::device::DeviceAddrRange>::Addr,
        width: axaddrspace::device::AccessWidth,
        val: usize,
    ) -> AxResult {
        if width != AccessWidth::Qword {
            return ax_err!(Unsupported, "vIoPmp only supports 64-bit accesses");
        }
        let reg = addr - self.addr;
        trace!("vIoPmp write reg {reg:#x} val {val:#x}");
        match self.write_reg(reg, val) {
            Some(()) => Ok(()),
            None => ax_err!(InvalidInput, "vIoPmp write outside the register window"),
        }
    }
}

impl RegisterFile for &VIoPmp {
    fn read_word(&self, offset: usize) -> usize {
        self.read_reg(offset).unwrap_or_else(|| {
            warn!("vIoPmp: read of unmapped offset {offset:#x}");
            0
        })
    }

    fn write_word(&mut self, offset: usize, value: usize) {
        if self.write_reg(offset, value).is_none() {
            warn!("vIoPmp: write to unmapped offset {offset:#x} dropped");
        }
    }
}
