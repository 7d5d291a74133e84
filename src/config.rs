//! Construction-time parameters for a [`Core`](crate::core::Core).

/// Parameters fixed for the lifetime of a [`Core`](crate::core::Core), mirroring the small,
/// immutable `Config` struct the reference simulator threads through its core type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Value the program counter is initialized to on reset.
    pub reset_vector: u32,
    /// Value reported by the read-only `mhartid` CSR.
    pub hart_id: u32,
    /// When `false` (the default), a load/store whose address is not naturally aligned to its
    /// width raises `LoadAddressMisaligned`/`StoreAddressMisaligned` instead of being issued to
    /// the bus. See `SPEC_FULL.md` §9 for the rationale behind defaulting to `false`.
    pub support_misaligned_memory_access: bool,
    /// When `true`, Fetch consults the 2-bit BHT + direct-mapped BTB described in §4.L instead of
    /// always predicting not-taken.
    pub enable_predictor: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reset_vector: 0x8000_0000,
            hart_id: 0,
            support_misaligned_memory_access: false,
            enable_predictor: false,
        }
    }
}

impl Config {
    pub fn new(reset_vector: u32) -> Self {
        Self {
            reset_vector,
            ..Self::default()
        }
    }
}
