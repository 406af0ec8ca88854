use crate::config::{mmio_config, ram_config};
use crate::cpu::executor::{AmoOp, ExecOut};
use crate::cpu::Rv32Core;
use crate::ram::WordBus;
use crate::utils::{concat_to_u64, sign_extend};

/// Memory-stage result: the writeback value and whether writeback still
/// happens (a load with an undecodable width suppresses it).
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemOut {
    pub value: u32,
    pub reg_write: bool,
}

fn dram_index(addr: u32) -> u32 {
    addr.wrapping_sub(ram_config::BASE_ADDR) >> 2
}

fn is_mmio(addr: u32) -> bool {
    let uart = addr.wrapping_sub(mmio_config::UART_BASE) < mmio_config::UART_SIZE;
    uart
        || matches!(
            addr,
            mmio_config::CLINT_MTIMECMP
                | mmio_config::CLINT_MTIMECMP_HI
                | mmio_config::CLINT_MTIME
                | mmio_config::CLINT_MTIME_HI
        )
}

impl Rv32Core {
    /// Memory stage. MMIO windows are matched on the effective address
    /// before any DRAM range check.
    pub(crate) fn memory_stage<B: WordBus>(&mut self, bus: &mut B, ex: &ExecOut) -> MemOut {
        if let Some(op) = ex.amo {
            return MemOut {
                value: self.amo_stage(bus, op, ex.alu_result, ex.store_val),
                reg_write: ex.reg_write,
            };
        }

        if ex.mem_read {
            return self.load_stage(bus, ex);
        }

        if ex.mem_write {
            self.store_stage(bus, ex);
        }

        MemOut {
            value: ex.alu_result,
            reg_write: ex.reg_write,
        }
    }

    fn load_stage<B: WordBus>(&mut self, bus: &mut B, ex: &ExecOut) -> MemOut {
        let ea = ex.alu_result;

        let window = if is_mmio(ea) {
            self.mmio_read_word(ea)
        } else {
            // Assemble a naturally rotated 32-bit window from the two
            // words the access may straddle; out-of-range words read zero.
            let idx = dram_index(ea);
            let off = ea & 3;
            let w0 = bus.read_word(idx) as u64;
            let w1 = bus.read_word(idx.wrapping_add(1)) as u64;
            (((w1 << 32) | w0) >> (off * 8)) as u32
        };

        let (value, reg_write) = match ex.funct3 {
            0x0 => (sign_extend(window & 0xFF, 8), true),    // LB
            0x1 => (sign_extend(window & 0xFFFF, 16), true), // LH
            0x2 => (window, true),                           // LW
            0x4 => (window & 0xFF, true),                    // LBU
            0x5 => (window & 0xFFFF, true),                  // LHU
            _ => (0, false),
        };

        MemOut { value, reg_write }
    }

    fn store_stage<B: WordBus>(&mut self, bus: &mut B, ex: &ExecOut) {
        // A store of any kind invalidates the reservation.
        self.lr_valid = false;

        let ea = ex.alu_result;
        if is_mmio(ea) {
            self.mmio_write_word(ea, ex.store_val);
            return;
        }

        let mask: u64 = match ex.funct3 {
            0x0 => 0xFF,
            0x1 => 0xFFFF,
            0x2 => 0xFFFF_FFFF,
            _ => return,
        };

        let idx = dram_index(ea);
        let off = ea & 3;
        let wide_mask = mask << (off * 8);
        let wide_val = (ex.store_val as u64) << (off * 8);

        let mask0 = wide_mask as u32;
        let w0 = bus.read_word(idx);
        bus.write_word(idx, (w0 & !mask0) | (wide_val as u32 & mask0));
        self.htif_check(bus, idx);

        let mask1 = (wide_mask >> 32) as u32;
        if mask1 != 0 {
            let idx1 = idx.wrapping_add(1);
            let w1 = bus.read_word(idx1);
            bus.write_word(idx1, (w1 & !mask1) | ((wide_val >> 32) as u32 & mask1));
            self.htif_check(bus, idx1);
        }
    }

    /// HTIF mailbox: acknowledge a committed `tohost` store so self-hosted
    /// tests polling `fromhost` do not deadlock on their syscall path.
    fn htif_check<B: WordBus>(&mut self, bus: &mut B, idx: u32) {
        let tohost_idx = dram_index(self.config.tohost_addr);
        if idx == tohost_idx {
            bus.write_word(tohost_idx + 16, 1);
        }
    }

    fn amo_stage<B: WordBus>(&mut self, bus: &mut B, op: AmoOp, ea: u32, rhs: u32) -> u32 {
        match op {
            AmoOp::Lr => {
                let val = self.bus_read_word(bus, ea);
                self.lr_valid = true;
                self.lr_addr = ea;
                val
            }
            AmoOp::Sc => {
                let success = self.lr_valid && self.lr_addr == ea;
                self.lr_valid = false;
                if success {
                    self.bus_write_word(bus, ea, rhs);
                    0
                } else {
                    1
                }
            }
            _ => {
                let old = self.bus_read_word(bus, ea);
                let new = match op {
                    AmoOp::Swap => rhs,
                    AmoOp::Add => old.wrapping_add(rhs),
                    AmoOp::Xor => old ^ rhs,
                    AmoOp::And => old & rhs,
                    AmoOp::Or => old | rhs,
                    AmoOp::Min => old.cast_signed().min(rhs.cast_signed()).cast_unsigned(),
                    AmoOp::Max => old.cast_signed().max(rhs.cast_signed()).cast_unsigned(),
                    AmoOp::Minu => old.min(rhs),
                    AmoOp::Maxu => old.max(rhs),
                    AmoOp::Lr | AmoOp::Sc => unreachable!(),
                };
                self.lr_valid = false;
                self.bus_write_word(bus, ea, new);
                old
            }
        }
    }

    fn bus_read_word<B: WordBus>(&mut self, bus: &mut B, addr: u32) -> u32 {
        if is_mmio(addr) {
            self.mmio_read_word(addr)
        } else {
            bus.read_word(dram_index(addr))
        }
    }

    fn bus_write_word<B: WordBus>(&mut self, bus: &mut B, addr: u32, data: u32) {
        if is_mmio(addr) {
            self.mmio_write_word(addr, data);
        } else {
            bus.write_word(dram_index(addr), data);
        }
    }

    fn mmio_read_word(&mut self, addr: u32) -> u32 {
        match addr {
            mmio_config::CLINT_MTIMECMP => self.csr.mtimecmp as u32,
            mmio_config::CLINT_MTIMECMP_HI => (self.csr.mtimecmp >> 32) as u32,
            // mtime advances in lock-step with mcycle.
            mmio_config::CLINT_MTIME => self.csr.mcycle as u32,
            mmio_config::CLINT_MTIME_HI => (self.csr.mcycle >> 32) as u32,
            _ => self.uart.read(addr - mmio_config::UART_BASE),
        }
    }

    fn mmio_write_word(&mut self, addr: u32, data: u32) {
        match addr {
            mmio_config::CLINT_MTIMECMP => {
                self.csr.mtimecmp = concat_to_u64((self.csr.mtimecmp >> 32) as u32, data);
            }
            mmio_config::CLINT_MTIMECMP_HI => {
                self.csr.mtimecmp = concat_to_u64(data, self.csr.mtimecmp as u32);
            }
            mmio_config::CLINT_MTIME | mmio_config::CLINT_MTIME_HI => {
                // Read-only aliases of mcycle.
            }
            _ => self.uart.write(addr - mmio_config::UART_BASE, data),
        }
    }
}
