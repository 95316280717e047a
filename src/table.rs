use bitmaps::Bitmap;
use log::{debug, warn};
use spin::Mutex;

use crate::consts::{pmpcfg, MAX_SLOTS};
use crate::detect::{detect_granule, self_test};
use crate::error::PmpResult;
use crate::layout::TableLayout;
use crate::region::{Access, AddressMode, ProtectionContext, Region, RegisterPair};
use crate::regs::RegisterFile;

/// A PMP or IO-PMP table.
///
/// Hardware is the only copy of the configuration: nothing about applied
/// regions is cached here. The register file sits behind a lock so that each
/// read-modify-write of a shared configuration word is exclusive.
pub struct ProtectionTable<R: RegisterFile> {
    ctx: ProtectionContext,
    regs: Mutex<R>,
}

impl<R: RegisterFile> ProtectionTable<R> {
    /// Runs the self-test and granule detection, then takes over the table.
    ///
    /// Must be called at boot: detection clobbers the first configuration
    /// word and slot 0's address register.
    pub fn init(mut regs: R, layout: TableLayout) -> PmpResult<Self> {
        self_test(&mut regs, &layout)?;
        let ctx = detect_granule(&mut regs, &layout)?;
        Ok(Self::with_context(regs, ctx))
    }

    /// Takes over a table whose properties are already known.
    pub fn with_context(regs: R, ctx: ProtectionContext) -> Self {
        Self {
            ctx,
            regs: Mutex::new(regs),
        }
    }

    pub fn context(&self) -> &ProtectionContext {
        &self.ctx
    }

    pub fn into_inner(self) -> R {
        self.regs.into_inner()
    }

    /// Programs `slot` with an already encoded address and configuration byte.
    ///
    /// The slot's byte lane is cleared before the address register is written,
    /// so the new address is never matched with stale permissions. Other lanes
    /// of the configuration word are written back unchanged.
    pub fn apply(&self, slot: usize, addr: usize, cfg: u8) -> PmpResult {
        let layout = self.ctx.layout();
        if let Err(err) = layout.check_slot(slot) {
            warn!("{}: {}", layout.name, err);
            return Err(err);
        }
        let cfg = cfg & pmpcfg::VALID_BITS;
        let cfg_offset = layout.cfg_offset(slot);
        let shift = TableLayout::lane_shift(slot);
        let mask = 0xffusize << shift;

        let mut regs = self.regs.lock();
        let others = regs.read_word(cfg_offset) & !mask;
        regs.write_word(cfg_offset, others);
        regs.write_word(layout.addr_offset(slot), addr);
        regs.write_word(cfg_offset, others | ((cfg as usize) << shift));
        regs.fence();

        debug!(
            "{}: slot {} addr {:#x} cfg {:#04x}",
            layout.name, slot, addr, cfg
        );
        Ok(())
    }

    /// Writes an encoded pair to its slot.
    pub fn apply_pair(&self, pair: RegisterPair) -> PmpResult {
        self.apply(pair.slot, pair.addr, pair.cfg)
    }

    /// Encodes `(base, size, access)` and programs it into `slot`.
    pub fn protect(
        &self,
        base: usize,
        size: usize,
        access: Access,
        slot: usize,
    ) -> PmpResult<RegisterPair> {
        let pair = self.ctx.encode(base, size, access, slot)?;
        self.apply_pair(pair)?;
        Ok(pair)
    }

    /// Grants read, write and execute access to `[base, base + size)`.
    pub fn allow(&self, base: usize, size: usize, slot: usize) -> PmpResult<RegisterPair> {
        self.protect(base, size, Access::RWX, slot)
    }

    /// Makes `slot` match every address with full access.
    pub fn allow_all(&self, slot: usize) -> PmpResult<RegisterPair> {
        let pair = self.ctx.encode_allow_all(slot)?;
        self.apply_pair(pair)?;
        Ok(pair)
    }

    /// Turns `slot` off.
    pub fn clear(&self, slot: usize) -> PmpResult {
        self.apply(slot, 0, pmpcfg::OFF)
    }

    /// Zeroes slot 0's address register, leaving its configuration alone.
    pub fn zero_first_address(&self) {
        let mut regs = self.regs.lock();
        regs.write_word(self.ctx.layout().addr_offset(0), 0);
        regs.fence();
    }

    /// Reads back the configuration byte and address register of `slot`.
    pub fn read_slot(&self, slot: usize) -> PmpResult<RegisterPair> {
        let layout = self.ctx.layout();
        layout.check_slot(slot)?;
        let regs = self.regs.lock();
        Ok(Self::read_locked(&regs, layout, slot))
    }

    /// Decodes the region currently matched by `slot`, `None` when it is off.
    pub fn region(&self, slot: usize) -> PmpResult<Option<Region>> {
        let layout = self.ctx.layout();
        layout.check_slot(slot)?;
        let regs = self.regs.lock();
        let pair = Self::read_locked(&regs, layout, slot);
        let prev_addr = match slot {
            0 => 0,
            _ => regs.read_word(layout.addr_offset(slot - 1)),
        };
        Ok(pair.decode(layout.addr_shift, prev_addr))
    }

    /// Slots whose address-matching mode is not OFF.
    pub fn active_slots(&self) -> Bitmap<MAX_SLOTS> {
        let layout = self.ctx.layout();
        let regs = self.regs.lock();
        let mut active = Bitmap::new();
        for slot in 0..layout.num_slots.min(MAX_SLOTS) {
            if Self::read_locked(&regs, layout, slot).mode() != AddressMode::Off {
                active.set(slot, true);
            }
        }
        active
    }

    fn read_locked(regs: &R, layout: &TableLayout, slot: usize) -> RegisterPair {
        let word = regs.read_word(layout.cfg_offset(slot));
        RegisterPair {
            slot,
            addr: regs.read_word(layout.addr_offset(slot)),
            cfg: (word >> TableLayout::lane_shift(slot)) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PmpError;
    use crate::layout::IOPMP_LAYOUT;
    use crate::vdevice::VIoPmp;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Write(usize, usize),
        Fence,
    }

    /// Records writes and fences on their way to the emulated device.
    struct Recording<'a> {
        dev: &'a VIoPmp,
        ops: Vec<Op>,
    }

    impl<'a> Recording<'a> {
        fn new(dev: &'a VIoPmp) -> Self {
            Self {
                dev,
                ops: Vec::new(),
            }
        }
    }

    impl RegisterFile for Recording<'_> {
        fn read_word(&self, offset: usize) -> usize {
            self.dev.read_word(offset)
        }

        fn write_word(&mut self, offset: usize, value: usize) {
            self.ops.push(Op::Write(offset, value));
            self.dev.write_word(offset, value)
        }

        fn fence(&mut self) {
            self.ops.push(Op::Fence);
        }
    }

    fn table(dev: &VIoPmp) -> ProtectionTable<&VIoPmp> {
        ProtectionTable::init(dev, IOPMP_LAYOUT).unwrap()
    }

    #[test]
    fn init_detects_granule() {
        let dev = VIoPmp::with_granule(4096);
        let table = table(&dev);
        assert_eq!(table.context().granule(), 4096);
    }

    #[test]
    fn neighbours_untouched() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        let n = IOPMP_LAYOUT.num_slots;

        for s2 in 0..n {
            table
                .protect(0x10_0000 * (s2 + 1), 0x1000, Access::R | Access::X, s2)
                .unwrap();
            let before = table.read_slot(s2).unwrap();
            for s1 in (0..n).filter(|&s1| s1 != s2) {
                table.allow(0x8000_0000, 0x100, s1).unwrap();
                assert_eq!(table.read_slot(s2).unwrap(), before, "s1 {} s2 {}", s1, s2);
                table.clear(s1).unwrap();
                assert_eq!(table.read_slot(s2).unwrap(), before, "s1 {} s2 {}", s1, s2);
            }
            table.clear(s2).unwrap();
        }
    }

    #[test]
    fn permissions_survive_neighbour() {
        let dev = VIoPmp::with_granule(4096);
        let table = table(&dev);
        table.protect(0x1000, 0x1000, Access::RWX, 0).unwrap();
        table.protect(0x2000, 0x1000, Access::NONE, 1).unwrap();

        let slot0 = table.read_slot(0).unwrap();
        assert_eq!(slot0.access(), Access::RWX);
        let slot1 = table.read_slot(1).unwrap();
        assert_eq!(slot1.access(), Access::NONE);
        assert_ne!(slot1.mode(), AddressMode::Off);
    }

    #[test]
    fn invalid_slot_writes_nothing() {
        let dev = VIoPmp::with_granule(4096);
        let ctx = ProtectionContext::with_granule(IOPMP_LAYOUT, 4096);
        let table = ProtectionTable::with_context(Recording::new(&dev), ctx);

        let err = PmpError::InvalidSlot {
            slot: 99,
            num_slots: 16,
        };
        assert_eq!(table.protect(0x1000, 0x1000, Access::RWX, 99), Err(err));
        assert_eq!(table.apply(99, 0x400, pmpcfg::RWX), Err(err));
        assert_eq!(table.allow_all(16), Err(PmpError::InvalidSlot { slot: 16, num_slots: 16 }));
        assert!(table.into_inner().ops.is_empty());
    }

    #[test]
    fn apply_write_sequence() {
        let dev = VIoPmp::with_granule(8);
        let ctx = ProtectionContext::with_granule(IOPMP_LAYOUT, 8);
        let cfg = IOPMP_LAYOUT.cfg_offset(3);
        let neighbour = ((pmpcfg::RWX | pmpcfg::NAPOT) as usize) << 16;
        let stale = ((pmpcfg::R | pmpcfg::X | pmpcfg::TOR) as usize) << 24;
        let mut regs = &dev;
        regs.write_word(cfg, neighbour | stale);

        let table = ProtectionTable::with_context(Recording::new(&dev), ctx);
        table.apply(3, 0x5ff, pmpcfg::RWX | pmpcfg::NAPOT).unwrap();

        let new = ((pmpcfg::RWX | pmpcfg::NAPOT) as usize) << 24;
        assert_eq!(
            table.into_inner().ops,
            vec![
                Op::Write(cfg, neighbour),
                Op::Write(IOPMP_LAYOUT.addr_offset(3), 0x5ff),
                Op::Write(cfg, neighbour | new),
                Op::Fence,
            ]
        );
    }

    #[test]
    fn upper_slots_use_second_word() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        table.allow(0x4000, 0x1000, 9).unwrap();
        let mut regs = &dev;
        assert_eq!(regs.read_word(IOPMP_LAYOUT.cfg_offset(0)), 0);
        assert_eq!(
            regs.read_word(IOPMP_LAYOUT.cfg_offset(9)),
            ((pmpcfg::RWX | pmpcfg::NAPOT) as usize) << 8
        );
        regs.write_word(IOPMP_LAYOUT.cfg_offset(9), 0);
        assert_eq!(table.region(9).unwrap(), None);
    }

    #[test]
    fn decode_applied_regions() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        table.protect(0x8000_0000, 0x10_0000, Access::R, 4).unwrap();
        let region = table.region(4).unwrap().unwrap();
        assert_eq!(region.base, 0x8000_0000);
        assert_eq!(region.size, 0x10_0000);
        assert_eq!(region.access, Access::R);
        assert!(region.contains(0x8000_1234));
        assert!(!region.contains(0x8010_0000));

        // Only 54 address bits are implemented: all ones covers 2^56 and up.
        table.allow_all(15).unwrap();
        let region = table.region(15).unwrap().unwrap();
        assert_eq!(region.base, 0);
        assert!(region.contains((1 << 56) - 1));
    }

    #[test]
    fn guest_written_tor_decodes() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        let mut regs = &dev;
        regs.write_word(IOPMP_LAYOUT.addr_offset(4), 0x100);
        regs.write_word(IOPMP_LAYOUT.addr_offset(5), 1 << 62);
        regs.write_word(
            IOPMP_LAYOUT.cfg_offset(5),
            ((pmpcfg::R | pmpcfg::TOR) as usize) << 40,
        );
        assert_eq!(table.region(5).unwrap(), None);

        regs.write_word(IOPMP_LAYOUT.addr_offset(5), 0x400);
        let region = table.region(5).unwrap().unwrap();
        assert_eq!((region.base, region.size), (0x400, 0xc00));
    }

    #[test]
    fn active_slots_follow_hardware() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        assert!(table.active_slots().is_empty());

        table.allow(0x1000, 0x1000, 1).unwrap();
        table.allow(0x2000, 0x1000, 2).unwrap();
        table.allow_all(12).unwrap();
        let active = table.active_slots();
        assert_eq!(active.len(), 3);
        assert!(active.get(1) && active.get(2) && active.get(12));

        table.clear(2).unwrap();
        assert!(!table.active_slots().get(2));
        assert_eq!(table.read_slot(2).unwrap().addr, 0);
    }

    #[test]
    fn zero_first_address_keeps_cfg() {
        let dev = VIoPmp::with_granule(8);
        let table = table(&dev);
        table.allow(0x1000, 0x1000, 0).unwrap();
        table.zero_first_address();
        let slot0 = table.read_slot(0).unwrap();
        assert_eq!(slot0.addr, 0);
        assert_eq!(slot0.cfg, pmpcfg::RWX | pmpcfg::NAPOT);
    }
}
