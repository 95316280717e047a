use axaddrspace::{device::AccessWidth, HostPhysAddr};

/// Loads `width` bytes from `addr`, zero-extended.
///
/// # Safety
///
/// `addr` must be valid for a read of `width` bytes and aligned to it.
#[inline(always)]
pub(crate) unsafe fn load_width(addr: *const u8, width: AccessWidth) -> usize {
    match width {
        AccessWidth::Byte => addr.read_volatile() as _,
        AccessWidth::Word => (addr as *const u16).read_volatile() as _,
        AccessWidth::Dword => (addr as *const u32).read_volatile() as _,
        AccessWidth::Qword => (addr as *const u64).read_volatile() as _,
    }
}

pub(crate) fn perform_mmio_read(addr: HostPhysAddr) -> usize {
    let addr = axvisor_api::memory::phys_to_virt(addr).as_ptr();
    unsafe { (addr as *const usize).read_volatile() }
}

pub(crate) fn perform_mmio_write(addr: HostPhysAddr, val: usize) {
    let addr = axvisor_api::memory::phys_to_virt(addr).as_mut_ptr();
    unsafe { (addr as *mut usize).write_volatile(val) }
}
