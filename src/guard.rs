//! Loads performed under the protection they are meant to check.
//!
//! M-mode accesses bypass unlocked PMP entries. Setting `mstatus.MPRV` with
//! `MPP = S` makes the hart check loads and stores as if they came from
//! S-mode, so a load issued in that window is subject to exactly the entries
//! just installed. A denied load raises an access fault that is left to the
//! trap handler.
//!
//! On hardware, [`read_checked`] switches `mstatus`, loads and switches back
//! inside one `asm!` block, so no compiled stack access runs with `MPRV` set.
//! [`CheckedScope`] and [`read_checked_with`] express the same sequence over
//! any [`StatusRegister`] and are what host builds exercise.

use core::sync::atomic::{compiler_fence, Ordering};

use axaddrspace::device::AccessWidth;

use crate::consts::mstatus::{MPP, MPRV};
use crate::error::{PmpError, PmpResult};
use crate::utils::load_width;

/// The privilege-context register consulted by the protection checks.
pub trait StatusRegister {
    fn read(&self) -> usize;

    /// Atomically replaces the register, returning its previous value.
    ///
    /// # Safety
    ///
    /// Changes the privilege under which subsequent accesses are checked.
    unsafe fn swap(&mut self, value: usize) -> usize;
}

/// `mstatus` of the current hart.
#[cfg(target_arch = "riscv64")]
pub struct MachineStatus;

#[cfg(target_arch = "riscv64")]
impl StatusRegister for MachineStatus {
    fn read(&self) -> usize {
        let value: usize;
        unsafe { core::arch::asm!("csrr {x}, mstatus", x = out(reg) value) };
        value
    }

    unsafe fn swap(&mut self, value: usize) -> usize {
        let old: usize;
        core::arch::asm!("csrrw {old}, mstatus, {new}", old = out(reg) old, new = in(reg) value);
        old
    }
}

/// Status value with `MPP = S` and `MPRV` set, other fields untouched.
pub const fn checked_status(status: usize) -> usize {
    (status & !MPP) | (MPP & (MPP >> 1)) | MPRV
}

/// Keeps the hart in the checked context until dropped.
pub struct CheckedScope<'a, S: StatusRegister> {
    status: &'a mut S,
    saved: usize,
}

impl<'a, S: StatusRegister> CheckedScope<'a, S> {
    /// # Safety
    ///
    /// Every access made while the scope is alive goes through the
    /// protection checks and may fault.
    pub unsafe fn enter(status: &'a mut S) -> Self {
        let new = checked_status(status.read());
        let saved = status.swap(new);
        compiler_fence(Ordering::SeqCst);
        Self { status, saved }
    }

    /// The value restored on drop.
    pub fn saved(&self) -> usize {
        self.saved
    }

    pub fn current(&self) -> usize {
        self.status.read()
    }
}

impl<S: StatusRegister> Drop for CheckedScope<'_, S> {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        unsafe {
            self.status.swap(self.saved);
        }
    }
}

/// Maps a byte count to a load width.
pub fn width_from_bytes(bytes: usize) -> PmpResult<AccessWidth> {
    match bytes {
        1 => Ok(AccessWidth::Byte),
        2 => Ok(AccessWidth::Word),
        4 => Ok(AccessWidth::Dword),
        8 => Ok(AccessWidth::Qword),
        _ => Err(PmpError::UnsupportedWidth(bytes)),
    }
}

/// Loads `width` bytes at `addr` inside a [`CheckedScope`] over `status`.
///
/// # Safety
///
/// `addr` must be aligned to `width`. If the active entries deny the read,
/// the hart takes a load access fault.
pub unsafe fn read_checked_with<S: StatusRegister>(
    status: &mut S,
    addr: usize,
    width: AccessWidth,
) -> usize {
    let _scope = CheckedScope::enter(status);
    load_width(addr as *const u8, width)
}

#[cfg(target_arch = "riscv64")]
macro_rules! checked_load {
    ($insn:literal, $status:expr, $addr:expr) => {{
        let value: usize;
        core::arch::asm!(
            "csrrw {s}, mstatus, {s}",
            concat!($insn, " {v}, 0({a})"),
            "csrw mstatus, {s}",
            s = inout(reg) $status => _,
            a = in(reg) $addr,
            v = out(reg) value,
            options(nostack),
        );
        value
    }};
}

/// Loads `width` bytes at `addr` as the current PMP configuration sees it.
///
/// The status switch, the load and the restore are one instruction sequence:
/// the load is the only access made with `MPRV` set.
///
/// # Safety
///
/// See [`read_checked_with`]. Must run in M-mode.
#[cfg(target_arch = "riscv64")]
pub unsafe fn read_checked(addr: usize, width: AccessWidth) -> usize {
    let status = checked_status(MachineStatus.read());
    match width {
        AccessWidth::Byte => checked_load!("lbu", status, addr),
        AccessWidth::Word => checked_load!("lhu", status, addr),
        AccessWidth::Dword => checked_load!("lwu", status, addr),
        AccessWidth::Qword => checked_load!("ld", status, addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIE: usize = 1 << 3;

    struct FakeStatus {
        value: usize,
        writes: Vec<usize>,
    }

    impl FakeStatus {
        fn machine() -> Self {
            Self {
                value: MPP | MIE,
                writes: Vec::new(),
            }
        }
    }

    impl StatusRegister for FakeStatus {
        fn read(&self) -> usize {
            self.value
        }

        unsafe fn swap(&mut self, value: usize) -> usize {
            self.writes.push(value);
            core::mem::replace(&mut self.value, value)
        }
    }

    #[test]
    fn status_value() {
        assert_eq!(checked_status(MPP | MIE), (1 << 11) | MPRV | MIE);
        assert_eq!(checked_status(0), (1 << 11) | MPRV);
        assert_eq!(checked_status(MPRV | (1 << 11)), MPRV | (1 << 11));
    }

    #[test]
    fn scope_restores() {
        let mut status = FakeStatus::machine();
        {
            let scope = unsafe { CheckedScope::enter(&mut status) };
            assert_eq!(scope.saved(), MPP | MIE);
            assert_eq!(scope.current(), checked_status(MPP | MIE));
        }
        assert_eq!(status.value, MPP | MIE);
        assert_eq!(status.writes, vec![checked_status(MPP | MIE), MPP | MIE]);
    }

    #[test]
    fn checked_load() {
        let mut status = FakeStatus::machine();
        let data: [u64; 2] = [42, 0xdead_beef_cafe_f00d];
        let addr = data.as_ptr() as usize;

        let val = unsafe { read_checked_with(&mut status, addr, AccessWidth::Qword) };
        assert_eq!(val, 42);
        let val = unsafe { read_checked_with(&mut status, addr + 8, AccessWidth::Word) };
        assert_eq!(val, 0xf00d);

        assert_eq!(status.value, MPP | MIE);
        assert_eq!(status.writes.len(), 4);
    }

    #[test]
    fn widths() {
        assert_eq!(width_from_bytes(1), Ok(AccessWidth::Byte));
        assert_eq!(width_from_bytes(2), Ok(AccessWidth::Word));
        assert_eq!(width_from_bytes(4), Ok(AccessWidth::Dword));
        assert_eq!(width_from_bytes(8), Ok(AccessWidth::Qword));
        assert_eq!(width_from_bytes(3), Err(PmpError::UnsupportedWidth(3)));
        assert_eq!(width_from_bytes(16), Err(PmpError::UnsupportedWidth(16)));
    }
}
