//! Boot-time probing: register presence and granule size.
//!
//! Both checks clobber the first configuration word and slot 0's address
//! register, so they must run before any region is protected.

use log::{error, info};

use crate::consts::{SENTINEL_ADDR, SENTINEL_CFG};
use crate::error::{PmpError, PmpResult};
use crate::layout::TableLayout;
use crate::regs::RegisterFile;
use crate::region::ProtectionContext;

/// Checks that the register window holds written values, then restores it.
pub fn self_test<R: RegisterFile>(regs: &mut R, layout: &TableLayout) -> PmpResult {
    let cfg = layout.cfg_offset(0);
    let addrs = [layout.addr_offset(0), layout.addr_offset(1)];

    let old_cfg = regs.read_word(cfg);
    let old_addrs = addrs.map(|addr| regs.read_word(addr));

    regs.write_word(cfg, SENTINEL_CFG);
    for &addr in &addrs {
        regs.write_word(addr, SENTINEL_ADDR);
    }
    let present = regs.read_word(cfg) == SENTINEL_CFG
        && addrs.iter().all(|&addr| regs.read_word(addr) == SENTINEL_ADDR);

    for (&addr, &old) in addrs.iter().zip(old_addrs.iter()) {
        regs.write_word(addr, old);
    }
    regs.write_word(cfg, old_cfg);

    if present {
        info!("{}: detected", layout.name);
        Ok(())
    } else {
        error!("{}: register read/write failed", layout.name);
        Err(PmpError::HardwareAbsent)
    }
}

/// Finds the minimum region size the hardware can encode.
///
/// With the entry off, an all-ones address register reads back with its low
/// `G` bits cleared, and the granule is `2^(G + 2)` bytes.
pub fn detect_granule<R: RegisterFile>(
    regs: &mut R,
    layout: &TableLayout,
) -> PmpResult<ProtectionContext> {
    regs.write_word(layout.cfg_offset(0), 0);
    regs.write_word(layout.addr_offset(0), usize::MAX);
    let ret = regs.read_word(layout.addr_offset(0));
    if ret == 0 {
        error!("{}: address register reads back zero", layout.name);
        return Err(PmpError::HardwareAbsent);
    }

    let g = ret.trailing_zeros() + layout.addr_shift;
    let Some(granule) = 1usize.checked_shl(g) else {
        error!("{}: address register reads back {:#x}", layout.name, ret);
        return Err(PmpError::HardwareAbsent);
    };
    info!("{}: granule {:#x}", layout.name, granule);
    Ok(ProtectionContext::with_granule(*layout, granule))
}
