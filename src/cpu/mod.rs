pub mod csr_reg;
pub mod decoder;
pub mod executor;
pub mod reg_file;
pub mod trap;

mod cpu_tester;
mod mem;

use crate::config::{ram_config, CoreConfig};
use crate::cpu::csr_reg::CsrRegFile;
use crate::cpu::decoder::decode;
use crate::cpu::reg_file::{RegFile, REGFILE_CNT, REG_NAME};
use crate::cpu::trap::{Interrupt, TrapController};
use crate::device::Uart;
use crate::ram::WordBus;

/// One RV32IMA hart. All architectural state lives here; memory is reached
/// through the [`WordBus`] handle passed into each step.
pub struct Rv32Core {
    pub(crate) reg_file: RegFile,
    pub(crate) pc: u32,
    pub(crate) csr: CsrRegFile,
    pub(crate) lr_valid: bool,
    pub(crate) lr_addr: u32,
    pub(crate) uart: Uart,
    pub(crate) finished: bool,
    pub(crate) config: CoreConfig,
}

impl Rv32Core {
    pub fn new(config: CoreConfig) -> Self {
        let mut core = Self {
            reg_file: RegFile::new(),
            pc: 0,
            csr: CsrRegFile::new(),
            lr_valid: false,
            lr_addr: 0,
            uart: Uart::new(),
            finished: false,
            config,
        };
        core.reset();
        core
    }

    /// Architectural reset: zeroed registers apart from the return-address
    /// sentinel, the stack pointer, and the Linux boot convention in
    /// a0/a1 (hart id, DTB pointer).
    pub fn reset(&mut self) {
        self.reg_file = RegFile::new();
        self.reg_file.write(1, 0xDEAD_BEEF);
        self.reg_file.write(2, ram_config::STACK_TOP);
        self.reg_file.write(10, 0);
        self.reg_file.write(11, self.config.dtb_addr);

        self.pc = self.config.entry_pc;
        self.csr = CsrRegFile::new();
        self.lr_valid = false;
        self.lr_addr = 0;
        self.finished = false;

        log::debug!(
            "core reset: pc = {:#x}, sp = {:#x}",
            self.pc,
            ram_config::STACK_TOP
        );
    }

    /// One simulation iteration: poll the timer, then fetch, decode,
    /// execute, touch memory, and write back. Interrupt delivery consumes
    /// the whole iteration without retiring an instruction.
    pub fn step<B: WordBus>(&mut self, bus: &mut B) {
        self.csr.mcycle += 1;

        let timer_pending = self.csr.mcycle >= self.csr.mtimecmp;
        self.csr.set_mip_mtip(timer_pending);
        if timer_pending && TrapController::timer_interrupt_ready(self) {
            TrapController::enter_interrupt(self, Interrupt::MachineTimer);
            return;
        }

        // Fetch is a plain word read; a wild pc reads as zero and decodes
        // into an illegal instruction.
        let idx = self.pc.wrapping_sub(ram_config::BASE_ADDR) >> 2;
        let raw = bus.read_word(idx);
        log::trace!("fetch {:#010x} at pc {:#x}", raw, self.pc);

        let d = decode(raw);
        let ex = self.execute(&d);

        if let Some(exception) = ex.trap {
            TrapController::enter_exception(self, exception);
        } else {
            let mem = self.memory_stage(bus, &ex);
            if mem.reg_write {
                self.reg_file.write(ex.rd, mem.value);
            }
            self.reg_file[0] = 0;
            self.pc = if ex.branch_taken {
                ex.next_pc
            } else {
                self.pc.wrapping_add(4)
            };
        }

        self.csr.minstret += 1;
        if ex.finished {
            self.finished = true;
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", self.debug_reg_string());
        }
    }

    /// Run until the core signals completion or the cycle budget is spent;
    /// a budget of zero means run forever. Returns the cycle count.
    pub fn run<B: WordBus>(&mut self, bus: &mut B, max_cycles: u64) -> u64 {
        while !self.finished {
            self.step(bus);
            if max_cycles > 0 && self.csr.mcycle >= max_cycles {
                break;
            }
        }
        self.csr.mcycle
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn read_reg(&self, idx: u8) -> u32 {
        self.reg_file.read(idx, 0).0
    }

    pub fn write_reg(&mut self, idx: u8, value: u32) {
        self.reg_file.write(idx, value);
        self.reg_file[0] = 0;
    }

    pub fn read_csr(&self, addr: u32) -> u32 {
        self.csr.read(addr)
    }

    pub fn write_csr(&mut self, addr: u32, value: u32) {
        self.csr.write(addr, value);
    }

    pub fn set_mtimecmp(&mut self, value: u64) {
        self.csr.mtimecmp = value;
    }

    pub fn cycles(&self) -> u64 {
        self.csr.mcycle
    }

    pub fn instructions_retired(&self) -> u64 {
        self.csr.minstret
    }

    fn debug_reg_string(&self) -> String {
        let mut s = String::new();
        for i in 0..REGFILE_CNT {
            if self.reg_file[i] == 0 {
                continue;
            }
            if !s.is_empty() {
                s.push_str(", ");
            }
            s.push_str(&format!("{}: {:#x}", REG_NAME[i], self.reg_file[i]));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::cpu_tester::*;
    use crate::cpu::csr_reg::csr_index;
    use crate::ram::Ram;

    const BASE_ADDR: u32 = ram_config::BASE_ADDR;

    #[test]
    fn test_reset_state() {
        let core = Rv32Core::new(CoreConfig::default());
        assert_eq!(core.pc, ram_config::DEFAULT_PC_VALUE);
        assert_eq!(core.read_reg(1), 0xDEAD_BEEF);
        assert_eq!(core.read_reg(2), ram_config::STACK_TOP);
        assert_eq!(core.read_reg(10), 0);
        assert_eq!(core.read_reg(11), ram_config::DTB_ADDR);
        assert_eq!(core.csr.mtimecmp, u64::MAX);
        assert!(!core.is_finished());
    }

    #[test]
    fn test_x0_stays_zero() {
        // addi x0, x1, 7 writes through, then the slot is re-cleared.
        run_test_step(
            &[encode_i(7, 1, 0x0, 0, 0x13)],
            |builder| builder.reg(1, 1),
            |checker| checker.reg(0, 0),
        );
    }

    #[test]
    fn test_counters_track_retirement() {
        let mut test = TestCoreBuilder::new()
            .program(&[
                encode_i(1, 0, 0x0, 1, 0x13), // addi x1, x0, 1
                encode_i(2, 1, 0x0, 2, 0x13), // addi x2, x1, 2
                encode_i(3, 2, 0x0, 3, 0x13), // addi x3, x2, 3
            ])
            .build();
        test.step_n(3);
        CoreChecker::new(&mut test).customized(|c| {
            assert_eq!(c.test.core.cycles(), 3);
            assert_eq!(c.test.core.instructions_retired(), 3);
            c
        });
    }

    #[test]
    fn test_fetch_out_of_range_traps_illegal() {
        let mut test = TestCoreBuilder::new()
            .pc(0x4000_0000)
            .csr(csr_index::mtvec, 0x8000_0100)
            .build();
        test.step_n(1);
        CoreChecker::new(&mut test)
            .pc(0x8000_0100)
            .csr(csr_index::mcause, 2)
            .csr(csr_index::mepc, 0x4000_0000);
    }

    #[test]
    fn test_run_stops_on_exit_ecall() {
        let mut core = Rv32Core::new(CoreConfig::default());
        let mut ram = Ram::new();
        for (i, instr) in [
            encode_i(93, 0, 0x0, 17, 0x13), // addi x17, x0, 93
            ECALL,
        ]
        .iter()
        .enumerate()
        {
            ram.write_word(i as u32, *instr);
        }
        let cycles = core.run(&mut ram, 0);
        assert!(core.is_finished());
        assert_eq!(cycles, 2);
        assert_eq!(core.instructions_retired(), 2);
    }

    #[test]
    fn test_run_stops_on_cycle_budget() {
        let mut core = Rv32Core::new(CoreConfig::default());
        let mut ram = Ram::new();
        ram.write_word(0, 0x0000_006F); // j .
        let cycles = core.run(&mut ram, 1000);
        assert!(!core.is_finished());
        assert_eq!(cycles, 1000);
        assert_eq!(core.pc(), BASE_ADDR);
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut core = Rv32Core::new(CoreConfig::default());
        let mut ram = Ram::new();
        ram.write_word(0, encode_i(93, 0, 0x0, 17, 0x13));
        ram.write_word(1, ECALL);
        core.run(&mut ram, 0);
        assert!(core.is_finished());

        core.reset();
        assert!(!core.is_finished());
        assert_eq!(core.cycles(), 0);
        assert_eq!(core.pc(), BASE_ADDR);
        assert_eq!(core.read_reg(17), 0);
    }
}
