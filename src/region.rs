//! Region encoding.
//!
//! Turns a `(base, size, access, slot)` request into the configuration byte and
//! address register value the hardware expects, and back.

use bitflags::bitflags;
use log::warn;

use crate::consts::pmpcfg;
use crate::error::PmpResult;
use crate::layout::TableLayout;

bitflags! {
    /// Permission bits of a configuration byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const R = pmpcfg::R;
        const W = pmpcfg::W;
        const X = pmpcfg::X;
        const RWX = pmpcfg::RWX;
        /// Entry is immutable until reset. Never set by the encoder.
        const L = pmpcfg::L;
    }
}

impl Access {
    /// No access at all.
    pub const NONE: Self = Self::empty();
}

/// Address-matching mode, bits 3-4 of a configuration byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Off,
    Tor,
    Na4,
    Napot,
}

impl AddressMode {
    pub const fn bits(self) -> u8 {
        match self {
            Self::Off => pmpcfg::OFF,
            Self::Tor => pmpcfg::TOR,
            Self::Na4 => pmpcfg::NA4,
            Self::Napot => pmpcfg::NAPOT,
        }
    }

    pub const fn from_cfg(cfg: u8) -> Self {
        match cfg & pmpcfg::A_MASK {
            pmpcfg::TOR => Self::Tor,
            pmpcfg::NA4 => Self::Na4,
            pmpcfg::NAPOT => Self::Napot,
            _ => Self::Off,
        }
    }
}

/// The values to program into one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPair {
    pub slot: usize,
    /// Address register value, already shifted.
    pub addr: usize,
    /// Configuration byte.
    pub cfg: u8,
}

impl RegisterPair {
    pub fn mode(&self) -> AddressMode {
        AddressMode::from_cfg(self.cfg)
    }

    pub fn access(&self) -> Access {
        Access::from_bits_truncate(self.cfg)
    }

    /// Recovers the byte range matched by this entry.
    ///
    /// `prev_addr` is the address register of the previous slot, only used by
    /// TOR entries (0 for slot 0). Returns `None` for entries that match
    /// nothing.
    pub fn decode(&self, addr_shift: u32, prev_addr: usize) -> Option<Region> {
        let (base, size) = match self.mode() {
            AddressMode::Off => return None,
            AddressMode::Tor => {
                if prev_addr >= self.addr {
                    return None;
                }
                let scale = 1usize.checked_shl(addr_shift)?;
                let start = prev_addr.checked_mul(scale)?;
                let end = self.addr.checked_mul(scale)?;
                (start, end - start)
            }
            AddressMode::Na4 => (self.addr << addr_shift, 1 << addr_shift),
            AddressMode::Napot => {
                let ones = self.addr.trailing_ones();
                let low = if ones >= usize::BITS {
                    usize::MAX
                } else {
                    (1 << ones) - 1
                };
                let exp = ones + 1 + addr_shift;
                let size = if exp >= usize::BITS {
                    usize::MAX
                } else {
                    1 << exp
                };
                ((self.addr & !low) << addr_shift, size)
            }
        };
        Some(Region {
            base,
            size,
            access: self.access(),
        })
    }
}

/// A decoded protection region. A size of `usize::MAX` stands for the whole
/// address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: usize,
    pub size: usize,
    pub access: Access,
}

impl Region {
    pub fn contains(&self, addr: usize) -> bool {
        if self.size == usize::MAX {
            return true;
        }
        addr >= self.base && addr - self.base < self.size
    }
}

/// Detected properties of one protection table.
///
/// Only built by [`crate::detect_granule`] (or by a platform that
/// knows its granule), then handed to every encode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionContext {
    layout: TableLayout,
    granule: usize,
}

impl ProtectionContext {
    /// Builds a context for hardware whose granule is known up front.
    pub const fn with_granule(layout: TableLayout, granule: usize) -> Self {
        Self { layout, granule }
    }

    pub const fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Minimum region size in bytes.
    pub const fn granule(&self) -> usize {
        self.granule
    }

    /// Encodes a region for `slot`.
    ///
    /// Sizes up to the granule select NA4 and end up protecting one whole
    /// granule. Larger sizes are rounded up to a power of two and the base is
    /// aligned down to it, so the NAPOT region always contains `base`. A size
    /// of `usize::MAX`, or one with no power of two above it, selects the
    /// whole address space.
    pub fn encode(
        &self,
        base: usize,
        size: usize,
        access: Access,
        slot: usize,
    ) -> PmpResult<RegisterPair> {
        self.layout.check_slot(slot)?;
        let access = access.difference(Access::L);

        let whole_space = RegisterPair {
            slot,
            addr: usize::MAX,
            cfg: access.bits() | AddressMode::Napot.bits(),
        };
        if size == usize::MAX {
            return Ok(whole_space);
        }

        if size <= self.granule {
            if size < self.granule {
                warn!(
                    "{}: slot {} size {:#x} below granule {:#x}, protecting a full granule",
                    self.layout.name, slot, size, self.granule
                );
            }
            let addr = base.wrapping_add((size / 2).wrapping_sub(1)) >> self.layout.addr_shift;
            return Ok(RegisterPair {
                slot,
                addr,
                cfg: access.bits() | AddressMode::Na4.bits(),
            });
        }

        let Some(napot_size) = size.checked_next_power_of_two() else {
            return Ok(whole_space);
        };
        if napot_size != size {
            warn!(
                "{}: slot {} size {:#x} rounded up to {:#x}",
                self.layout.name, slot, size, napot_size
            );
        }
        let aligned = base & !(napot_size - 1);
        let addr = (aligned + (napot_size / 2 - 1)) >> self.layout.addr_shift;

        Ok(RegisterPair {
            slot,
            addr,
            cfg: access.bits() | AddressMode::Napot.bits(),
        })
    }

    /// Encodes a slot matching every address with full access.
    pub fn encode_allow_all(&self, slot: usize) -> PmpResult<RegisterPair> {
        self.encode(0, usize::MAX, Access::RWX, slot)
    }
}
