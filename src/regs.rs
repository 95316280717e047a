//! Register-file backends.
//!
//! The protection engine never touches hardware directly: configuration words
//! and address registers are reached through a [`RegisterFile`], addressed by
//! byte offset inside the table's register window.

use core::sync::atomic::{fence, Ordering};

use axaddrspace::HostPhysAddr;

use crate::utils::{perform_mmio_read, perform_mmio_write};

/// A window of XLEN-wide protection registers.
pub trait RegisterFile {
    /// Reads the register at `offset` bytes into the window.
    fn read_word(&self, offset: usize) -> usize;

    /// Writes the register at `offset` bytes into the window.
    fn write_word(&mut self, offset: usize, value: usize);

    /// Makes prior register writes visible to subsequent memory accesses.
    fn fence(&mut self) {
        fence(Ordering::SeqCst);
    }
}

/// Memory-mapped registers, e.g. the IO-PMP in front of a DMA engine.
pub struct MmioRegisters {
    base: HostPhysAddr,
}

impl MmioRegisters {
    /// # Safety
    ///
    /// `base` must be the physical address of a protection register window
    /// that nothing else accesses for the lifetime of the value.
    pub const unsafe fn new(base: HostPhysAddr) -> Self {
        Self { base }
    }

    fn reg(&self, offset: usize) -> HostPhysAddr {
        HostPhysAddr::from_usize(self.base.as_usize() + offset)
    }
}

impl RegisterFile for MmioRegisters {
    fn read_word(&self, offset: usize) -> usize {
        perform_mmio_read(self.reg(offset))
    }

    fn write_word(&mut self, offset: usize, value: usize) {
        perform_mmio_write(self.reg(offset), value)
    }
}

#[cfg(target_arch = "riscv64")]
pub use csr::CsrRegisters;

#[cfg(target_arch = "riscv64")]
mod csr {
    use core::arch::asm;

    use super::RegisterFile;
    use crate::consts::{PMP_ADDR_OFFSET, PMP_CFG_OFFSET, REG_STRIDE};

    macro_rules! csr_read {
        ($csr:ident) => {{
            let value: usize;
            unsafe { asm!(concat!("csrr {x}, ", stringify!($csr)), x = out(reg) value) };
            value
        }};
    }

    macro_rules! csr_write {
        ($csr:ident, $value:expr) => {
            unsafe { asm!(concat!("csrw ", stringify!($csr), ", {x}"), x = in(reg) $value) }
        };
    }

    /// The hart's own PMP CSRs, seen through the PMP offset window.
    ///
    /// On RV64 only even-numbered `pmpcfg` CSRs exist: word 0 is `pmpcfg0`
    /// and word 1 is `pmpcfg2`.
    pub struct CsrRegisters {
        _private: (),
    }

    impl CsrRegisters {
        /// # Safety
        ///
        /// Must run in M-mode, and only one instance may exist per hart.
        pub const unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    impl RegisterFile for CsrRegisters {
        fn read_word(&self, offset: usize) -> usize {
            if offset >= PMP_CFG_OFFSET {
                match (offset - PMP_CFG_OFFSET) / REG_STRIDE {
                    0 => csr_read!(pmpcfg0),
                    1 => csr_read!(pmpcfg2),
                    w => unreachable!("pmpcfg word {} not implemented", w),
                }
            } else {
                match (offset - PMP_ADDR_OFFSET) / REG_STRIDE {
                    0 => csr_read!(pmpaddr0),
                    1 => csr_read!(pmpaddr1),
                    2 => csr_read!(pmpaddr2),
                    3 => csr_read!(pmpaddr3),
                    4 => csr_read!(pmpaddr4),
                    5 => csr_read!(pmpaddr5),
                    6 => csr_read!(pmpaddr6),
                    7 => csr_read!(pmpaddr7),
                    8 => csr_read!(pmpaddr8),
                    9 => csr_read!(pmpaddr9),
                    10 => csr_read!(pmpaddr10),
                    11 => csr_read!(pmpaddr11),
                    12 => csr_read!(pmpaddr12),
                    13 => csr_read!(pmpaddr13),
                    14 => csr_read!(pmpaddr14),
                    15 => csr_read!(pmpaddr15),
                    idx => unreachable!("pmpaddr{} not implemented", idx),
                }
            }
        }

        fn write_word(&mut self, offset: usize, value: usize) {
            if offset >= PMP_CFG_OFFSET {
                match (offset - PMP_CFG_OFFSET) / REG_STRIDE {
                    0 => csr_write!(pmpcfg0, value),
                    1 => csr_write!(pmpcfg2, value),
                    w => unreachable!("pmpcfg word {} not implemented", w),
                }
            } else {
                match (offset - PMP_ADDR_OFFSET) / REG_STRIDE {
                    0 => csr_write!(pmpaddr0, value),
                    1 => csr_write!(pmpaddr1, value),
                    2 => csr_write!(pmpaddr2, value),
                    3 => csr_write!(pmpaddr3, value),
                    4 => csr_write!(pmpaddr4, value),
                    5 => csr_write!(pmpaddr5, value),
                    6 => csr_write!(pmpaddr6, value),
                    7 => csr_write!(pmpaddr7, value),
                    8 => csr_write!(pmpaddr8, value),
                    9 => csr_write!(pmpaddr9, value),
                    10 => csr_write!(pmpaddr10, value),
                    11 => csr_write!(pmpaddr11, value),
                    12 => csr_write!(pmpaddr12, value),
                    13 => csr_write!(pmpaddr13, value),
                    14 => csr_write!(pmpaddr14, value),
                    15 => csr_write!(pmpaddr15, value),
                    idx => unreachable!("pmpaddr{} not implemented", idx),
                }
            }
        }

        fn fence(&mut self) {
            unsafe { asm!("sfence.vma", options(nostack)) };
        }
    }
}
