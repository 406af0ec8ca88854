pub mod ram_config {
    pub const BASE_ADDR: u32 = 0x8000_0000;

    #[cfg(feature = "big-ram")]
    pub const SIZE: usize = 0x0800_0000; // 128 MiB
    #[cfg(not(feature = "big-ram"))]
    pub const SIZE: usize = 0x0010_0000; // 1 MiB

    pub const WORDS: usize = SIZE / 4;

    pub const STACK_TOP: u32 = BASE_ADDR + SIZE as u32 - 1;
    pub const DEFAULT_PC_VALUE: u32 = BASE_ADDR;

    /// Where a flat kernel image expects its device tree blob.
    pub const DTB_ADDR: u32 = 0x8080_0000;

    /// Default HTIF mailbox, overridden by the `.tohost` section when the
    /// image carries one.
    pub const TOHOST_ADDR: u32 = BASE_ADDR + 0x1000;
}

pub mod mmio_config {
    pub const UART_BASE: u32 = 0x1000_0000;
    pub const UART_SIZE: u32 = 0x1000;

    pub const CLINT_MTIMECMP: u32 = 0x0200_4000;
    pub const CLINT_MTIMECMP_HI: u32 = 0x0200_4004;
    pub const CLINT_MTIME: u32 = 0x0200_bff8;
    pub const CLINT_MTIME_HI: u32 = 0x0200_bffc;
}

/// Runtime knobs of one core instance. Everything else is a build constant.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub entry_pc: u32,
    pub dtb_addr: u32,
    /// M-extension opcodes trap as illegal when false.
    pub enable_m: bool,
    /// A-extension opcodes trap as illegal when false.
    pub enable_a: bool,
    pub tohost_addr: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            entry_pc: ram_config::DEFAULT_PC_VALUE,
            dtb_addr: ram_config::DTB_ADDR,
            enable_m: true,
            enable_a: true,
            tohost_addr: ram_config::TOHOST_ADDR,
        }
    }
}
