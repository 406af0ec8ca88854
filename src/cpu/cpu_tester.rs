#![cfg(test)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

use crate::config::{ram_config, CoreConfig};
use crate::cpu::Rv32Core;
use crate::ram::{Ram, WordBus};

pub(crate) struct TestCore {
    pub core: Rv32Core,
    pub ram: Ram,
}

impl TestCore {
    pub fn step_n(&mut self, n: usize) {
        for _ in 0..n {
            self.core.step(&mut self.ram);
        }
    }
}

pub(crate) struct TestCoreBuilder {
    test: TestCore,
}

impl TestCoreBuilder {
    pub fn new() -> Self {
        Self {
            test: TestCore {
                core: Rv32Core::new(CoreConfig::default()),
                ram: Ram::new(),
            },
        }
    }

    pub fn config(config: CoreConfig) -> Self {
        Self {
            test: TestCore {
                core: Rv32Core::new(config),
                ram: Ram::new(),
            },
        }
    }

    pub fn reg(mut self, idx: u8, value: u32) -> Self {
        self.test.core.write_reg(idx, value);
        self
    }

    pub fn pc(mut self, value: u32) -> Self {
        self.test.core.pc = value;
        self
    }

    pub fn csr(mut self, addr: u32, value: u32) -> Self {
        self.test.core.csr.write(addr, value);
        self
    }

    pub fn mtimecmp(mut self, value: u64) -> Self {
        self.test.core.csr.mtimecmp = value;
        self
    }

    pub fn mem_word(mut self, addr: u32, value: u32) -> Self {
        let idx = addr.wrapping_sub(ram_config::BASE_ADDR) >> 2;
        self.test.ram.write_word(idx, value);
        self
    }

    pub fn program(mut self, instrs: &[u32]) -> Self {
        for (i, instr) in instrs.iter().enumerate() {
            self.test.ram.write_word(i as u32, *instr);
        }
        self
    }

    pub fn build(self) -> TestCore {
        self.test
    }
}

pub(crate) struct CoreChecker<'a> {
    pub test: &'a mut TestCore,
}

impl<'a> CoreChecker<'a> {
    pub fn new(test: &'a mut TestCore) -> Self {
        Self { test }.reg(0, 0) // x0 is always 0
    }

    pub fn reg(self, idx: u8, value: u32) -> Self {
        assert_eq!(
            self.test.core.read_reg(idx),
            value,
            "register x{} incorrect",
            idx,
        );
        self
    }

    pub fn pc(self, value: u32) -> Self {
        assert_eq!(self.test.core.pc, value, "pc incorrect");
        self
    }

    pub fn csr(self, addr: u32, value: u32) -> Self {
        assert_eq!(
            self.test.core.csr.read(addr),
            value,
            "csr {:#x} incorrect",
            addr
        );
        self
    }

    pub fn mem_word(self, addr: u32, value: u32) -> Self {
        let idx = addr.wrapping_sub(ram_config::BASE_ADDR) >> 2;
        assert_eq!(
            self.test.ram.read_word(idx),
            value,
            "memory word incorrect at {:#x}",
            addr
        );
        self
    }

    pub fn finished(self, expected: bool) -> Self {
        assert_eq!(self.test.core.finished, expected, "finish flag incorrect");
        self
    }

    pub fn customized<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }
}

/// Write a program at the DRAM base and step it to completion, then run
/// the checks.
pub(crate) fn run_test_step<F, G>(raw_instrs: &[u32], build: F, check: G)
where
    F: FnOnce(TestCoreBuilder) -> TestCoreBuilder,
    G: FnOnce(CoreChecker) -> CoreChecker,
{
    let mut test = build(TestCoreBuilder::new().program(raw_instrs)).build();
    test.step_n(raw_instrs.len());
    check(CoreChecker::new(&mut test));
}

// ---------------------------------------------------------------
// Instruction encoders, used by the randomized testers below and
// by the module tests that need an odd encoding.
// ---------------------------------------------------------------

pub(crate) fn encode_r(funct7: u8, rs2: u8, rs1: u8, funct3: u8, rd: u8, op: u8) -> u32 {
    ((funct7 as u32) << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | ((rd as u32) << 7)
        | op as u32
}

pub(crate) fn encode_i(imm: u32, rs1: u8, funct3: u8, rd: u8, op: u8) -> u32 {
    ((imm & 0xFFF) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | ((rd as u32) << 7)
        | op as u32
}

pub(crate) fn encode_s(imm: u32, rs2: u8, rs1: u8, funct3: u8, op: u8) -> u32 {
    (((imm >> 5) & 0x7F) << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | ((imm & 0x1F) << 7)
        | op as u32
}

pub(crate) fn encode_b(imm: u32, rs2: u8, rs1: u8, funct3: u8, op: u8) -> u32 {
    (((imm >> 12) & 1) << 31)
        | (((imm >> 5) & 0x3F) << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | (((imm >> 1) & 0xF) << 8)
        | (((imm >> 11) & 1) << 7)
        | op as u32
}

pub(crate) fn encode_amo(funct5: u8, rs2: u8, rs1: u8, rd: u8) -> u32 {
    encode_r(funct5 << 2, rs2, rs1, 0x2, rd, 0x2F)
}

pub(crate) const ECALL: u32 = 0x0000_0073;
pub(crate) const EBREAK: u32 = 0x0010_0073;
pub(crate) const MRET: u32 = 0x3020_0073;
pub(crate) const WFI: u32 = 0x1050_0073;

/// Randomized single-instruction tester with a fixed seed, so failures
/// reproduce.
pub(crate) struct ExecTester {
    rng: ChaCha12Rng,
}

impl ExecTester {
    pub fn new() -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(0721),
        }
    }

    pub fn rand_word(&mut self) -> u32 {
        self.rng.random()
    }

    pub fn rand_imm12(&mut self) -> u32 {
        self.rng.random_range(0..=0xFFF)
    }

    fn rand_reg_idx(&mut self) -> u8 {
        self.rng.random_range(1..32) as u8
    }

    fn rand_unique_reg_idx2(&mut self) -> (u8, u8) {
        let idx1 = self.rand_reg_idx();
        let mut idx2 = self.rand_reg_idx();
        while idx1 == idx2 {
            idx2 = self.rand_reg_idx();
        }
        (idx1, idx2)
    }

    pub fn test_r_with(&mut self, funct7: u8, funct3: u8, lhs: u32, rhs: u32, expected: u32) {
        let rd = self.rand_reg_idx();
        let (rs1, rs2) = self.rand_unique_reg_idx2();
        run_test_step(
            &[encode_r(funct7, rs2, rs1, funct3, rd, 0x33)],
            |builder| builder.reg(rs1, lhs).reg(rs2, rhs),
            |checker| {
                checker
                    .reg(rd, expected)
                    .pc(crate::config::ram_config::BASE_ADDR + 4)
            },
        );
    }

    pub fn test_rand_r<F>(&mut self, funct7: u8, funct3: u8, calc: F)
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let (lhs, rhs) = (self.rand_word(), self.rand_word());
        self.test_r_with(funct7, funct3, lhs, rhs, calc(lhs, rhs));
    }

    pub fn test_rand_i<F>(&mut self, funct3: u8, calc: F)
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let lhs = self.rand_word();
        let imm = self.rand_imm12();
        let rd = self.rand_reg_idx();
        let rs1 = self.rand_reg_idx();
        let expected = calc(lhs, crate::utils::sign_extend(imm, 12));
        run_test_step(
            &[encode_i(imm, rs1, funct3, rd, 0x13)],
            |builder| builder.reg(rs1, lhs),
            |checker| checker.reg(rd, expected),
        );
    }
}
