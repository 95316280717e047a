#![cfg_attr(not(test), no_std)]

mod consts;
mod detect;
mod error;
mod guard;
mod layout;
mod region;
mod regs;
mod table;
mod utils;
mod vdevice;

pub use consts::*;
pub use detect::{detect_granule, self_test};
pub use error::{PmpError, PmpResult};
pub use guard::{checked_status, read_checked_with, width_from_bytes, CheckedScope, StatusRegister};
#[cfg(target_arch = "riscv64")]
pub use guard::{read_checked, MachineStatus};
pub use layout::{TableLayout, IOPMP_LAYOUT, PMP_LAYOUT};
pub use region::{Access, AddressMode, ProtectionContext, Region, RegisterPair};
#[cfg(target_arch = "riscv64")]
pub use regs::CsrRegisters;
pub use regs::{MmioRegisters, RegisterFile};
pub use table::ProtectionTable;
pub use vdevice::VIoPmp;

use axaddrspace::HostPhysAddr;

/// The PMP of the current hart.
#[cfg(target_arch = "riscv64")]
pub type Pmp = ProtectionTable<CsrRegisters>;

/// The IO-PMP guarding DMA masters.
pub type IoPmp = ProtectionTable<MmioRegisters>;

/// Probes the hart's PMP.
///
/// # Safety
///
/// Must run in M-mode at boot, once per hart.
#[cfg(target_arch = "riscv64")]
pub unsafe fn init_pmp() -> PmpResult<Pmp> {
    ProtectionTable::init(CsrRegisters::new(), PMP_LAYOUT)
}

/// Probes the IO-PMP at its default physical base.
///
/// # Safety
///
/// Must run at boot, before any DMA master is released, and only once.
pub unsafe fn init_iopmp() -> PmpResult<IoPmp> {
    ProtectionTable::init(
        MmioRegisters::new(HostPhysAddr::from_usize(IOPMP_BASE)),
        IOPMP_LAYOUT,
    )
}
