// Follows the RISC-V privileged spec (PMP) and the CVA6 IO-PMP memory map.

/// Width in bytes of every configuration word and address register.
pub const REG_STRIDE: usize = 8;

/// Number of per-slot configuration bytes packed into one configuration word.
pub const SLOTS_PER_CFG_WORD: usize = 8;

/// Upper bound on the slot count of any table, used to size slot bitmaps.
pub const MAX_SLOTS: usize = 64;

/// Address registers hold byte addresses shifted right by this many bits.
pub const PMP_ADDR_SHIFT: u32 = 2;

/// Implemented bits of an RV64 address register (bits 53:0, i.e. 56-bit
/// physical addresses). Upper bits read as zero.
pub const PMP_ADDR_MASK: usize = usize::MAX >> 10;

// --- IO-PMP Memory Map ---

/// Physical base address of the IO-PMP register window.
pub const IOPMP_BASE: usize = 0x5001_0000;

/// Offset to the address register of slot 0.
/// Address register for slot N is at: IOPMP_ADDR_OFFSET + N * REG_STRIDE
pub const IOPMP_ADDR_OFFSET: usize = 0x00;

/// Offset to the first configuration word (slots 0-7).
/// Slots 8-15 live in the next word, at IOPMP_CFG_OFFSET + REG_STRIDE.
pub const IOPMP_CFG_OFFSET: usize = 0x80;

/// Number of protection entries implemented by the IO-PMP.
pub const IOPMP_NUM_SLOTS: usize = 16;

// --- PMP CSR window ---
//
// The CPU PMP lives in CSRs rather than memory. `CsrRegisters` exposes them
// through the same offset window as the IO-PMP so both share one engine.

/// Offset of `pmpaddr0` in the CSR window.
pub const PMP_ADDR_OFFSET: usize = 0x00;

/// Offset of `pmpcfg0` in the CSR window; `pmpcfg2` follows at + REG_STRIDE.
pub const PMP_CFG_OFFSET: usize = 0x80;

/// Number of PMP entries handled on the CPU side.
pub const PMP_NUM_SLOTS: usize = 16;

// --- Self-test sentinels ---

/// Written to the first configuration word during the self-test.
/// Lane 0 only: R | W | TOR, a combination every implementation must retain.
pub const SENTINEL_CFG: usize = 0x0b;

/// Written to slot 0's address register during the self-test. Its lowest set
/// bit is high enough to survive granule masking up to 4 MiB.
pub const SENTINEL_ADDR: usize = 0x2a << 20;

/// PMP configuration byte layout.
///
/// Single definition shared by the encoder, the decoder and the emulated
/// device.
pub mod pmpcfg {
    /// Read access
    pub const R: u8 = 0b0000_0001;
    /// Write access
    pub const W: u8 = 0b0000_0010;
    /// Execute access
    pub const X: u8 = 0b0000_0100;
    /// Read, Write, and Execute access
    pub const RWX: u8 = R | W | X;

    /// Position of the two address-matching bits.
    pub const A_SHIFT: u8 = 3;
    /// Bit mask for the A attributes of pmpcfg
    pub const A_MASK: u8 = 0b11 << A_SHIFT;
    /// Entry disabled
    pub const OFF: u8 = 0b00 << A_SHIFT;
    /// Address is Top Of Range (TOR)
    pub const TOR: u8 = 0b01 << A_SHIFT;
    /// Naturally aligned four-byte region
    pub const NA4: u8 = 0b10 << A_SHIFT;
    /// Naturally aligned power of two
    pub const NAPOT: u8 = 0b11 << A_SHIFT;

    /// Locked
    pub const L: u8 = 0b1000_0000;

    /// Valid bits for pmpcfg
    pub const VALID_BITS: u8 = RWX | A_MASK | L;
}

/// Machine status register fields used by the guarded accessor.
pub mod mstatus {
    /// Previous privilege mode field.
    pub const MPP: usize = 0b11 << 11;
    /// Modify PRiVilege: loads and stores use the MPP privilege.
    pub const MPRV: usize = 1 << 17;
}
