#![cfg_attr(debug_assertions, allow(dead_code))]

pub mod config;
pub mod cpu;
pub mod device;
pub mod load;
pub mod logging;
pub mod ram;

mod utils;

use std::path::Path;

use crate::config::{ram_config, CoreConfig};
use crate::cpu::Rv32Core;
use crate::load::LoadError;
use crate::ram::{Ram, WordBus};

/// One simulated machine: a core plus the host-owned DRAM it executes
/// against.
pub struct Emulator {
    core: Rv32Core,
    ram: Ram,
    tohost_addr: u32,
}

impl Emulator {
    pub fn from_elf(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut ram = Ram::new();
        let image = load::load_elf(&mut ram, &bytes)?;
        let tohost_addr = image.tohost_addr.unwrap_or(ram_config::TOHOST_ADDR);
        log::info!(
            "loaded {}: entry = {:#x}, tohost = {:#x}",
            path.display(),
            image.entry,
            tohost_addr
        );

        let config = CoreConfig {
            entry_pc: image.entry,
            tohost_addr,
            ..CoreConfig::default()
        };
        Ok(Self {
            core: Rv32Core::new(config),
            ram,
            tohost_addr,
        })
    }

    /// Raw kernel image at the DRAM base, optional DTB at the configured
    /// address (passed to the guest in a1).
    pub fn from_kernel(kernel: &Path, dtb: Option<&Path>) -> Result<Self, LoadError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })
        };

        let kernel_bytes = read(kernel)?;
        let dtb_bytes = dtb.map(read).transpose()?;

        let config = CoreConfig::default();
        let mut ram = Ram::new();
        let image = load::load_kernel(
            &mut ram,
            &kernel_bytes,
            dtb_bytes.as_deref(),
            config.dtb_addr,
        );

        let tohost_addr = config.tohost_addr;
        let config = CoreConfig {
            entry_pc: image.entry,
            ..config
        };
        Ok(Self {
            core: Rv32Core::new(config),
            ram,
            tohost_addr,
        })
    }

    /// Run until the guest exits or the cycle budget is spent (0 = no
    /// budget). Returns the cycle count.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        self.core.run(&mut self.ram, max_cycles)
    }

    /// HTIF exit status: bit 0 of `tohost` flags completion, the upper
    /// bits carry the exit code (0 = pass).
    pub fn exit_status(&mut self) -> Option<u32> {
        let idx = self.tohost_addr.wrapping_sub(ram_config::BASE_ADDR) >> 2;
        let tohost = self.ram.read_word(idx);
        if tohost & 1 == 1 {
            Some(tohost >> 1)
        } else {
            None
        }
    }

    pub fn core(&self) -> &Rv32Core {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Rv32Core {
        &mut self.core
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }
}
