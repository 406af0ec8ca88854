use crate::cpu::{
    decoder::{opcode, DecodeOut},
    trap::{Exception, TrapController},
    Rv32Core,
};
use crate::cpu::csr_reg::csr_index;

/// Syscall number that terminates the simulation when `ecall` fires.
const SYS_EXIT: u32 = 93;

/// Memory read-modify-write operations under opcode 0x2F, keyed by
/// `funct7[6:2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmoOp {
    Lr,
    Sc,
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

impl AmoOp {
    pub fn from_funct5(funct5: u8) -> Option<Self> {
        match funct5 {
            0x02 => Some(AmoOp::Lr),
            0x03 => Some(AmoOp::Sc),
            0x01 => Some(AmoOp::Swap),
            0x00 => Some(AmoOp::Add),
            0x04 => Some(AmoOp::Xor),
            0x0C => Some(AmoOp::And),
            0x08 => Some(AmoOp::Or),
            0x10 => Some(AmoOp::Min),
            0x14 => Some(AmoOp::Max),
            0x18 => Some(AmoOp::Minu),
            0x1C => Some(AmoOp::Maxu),
            _ => None,
        }
    }
}

/// Execute-stage result handed to the memory stage and writeback.
///
/// `alu_result` doubles as the effective address for loads, stores, and
/// AMOs. A set `trap` suppresses every downstream effect of the
/// instruction except retirement counting.
#[derive(Debug, Clone, Copy)]
pub struct ExecOut {
    pub alu_result: u32,
    pub rd: u8,
    pub funct3: u8,
    pub mem_read: bool,
    pub mem_write: bool,
    pub reg_write: bool,
    pub store_val: u32,
    pub amo: Option<AmoOp>,
    pub branch_taken: bool,
    pub next_pc: u32,
    pub trap: Option<Exception>,
    pub finished: bool,
}

impl ExecOut {
    fn new(d: &DecodeOut) -> Self {
        Self {
            alu_result: 0,
            rd: d.rd,
            funct3: d.funct3,
            mem_read: false,
            mem_write: false,
            reg_write: false,
            store_val: 0,
            amo: None,
            branch_taken: false,
            next_pc: 0,
            trap: None,
            finished: false,
        }
    }

    fn illegal(mut self) -> Self {
        self.reg_write = false;
        self.trap = Some(Exception::IllegalInstruction);
        self
    }
}

fn mul_high_signed(a: u32, b: u32) -> u32 {
    (((a as i32 as i64).wrapping_mul(b as i32 as i64)) >> 32) as u32
}

fn mul_high_signed_unsigned(a: u32, b: u32) -> u32 {
    // rs1 signed, rs2 zero-extended.
    (((a as i32 as i64).wrapping_mul(b as i64)) >> 32) as u32
}

fn mul_high_unsigned(a: u32, b: u32) -> u32 {
    (((a as u64).wrapping_mul(b as u64)) >> 32) as u32
}

fn div_signed(a: u32, b: u32) -> u32 {
    if b == 0 {
        return u32::MAX;
    }
    (a.cast_signed().wrapping_div(b.cast_signed())).cast_unsigned()
}

fn div_unsigned(a: u32, b: u32) -> u32 {
    if b == 0 {
        return u32::MAX;
    }
    a / b
}

fn rem_signed(a: u32, b: u32) -> u32 {
    if b == 0 {
        return a;
    }
    (a.cast_signed().wrapping_rem(b.cast_signed())).cast_unsigned()
}

fn rem_unsigned(a: u32, b: u32) -> u32 {
    if b == 0 {
        return a;
    }
    a % b
}

impl Rv32Core {
    /// Execute stage: one instruction against the architectural state.
    /// CSR side effects and MRET happen here; memory effects are deferred
    /// to the record.
    pub(crate) fn execute(&mut self, d: &DecodeOut) -> ExecOut {
        let (rs1_val, rs2_val) = self.reg_file.read(d.rs1, d.rs2);
        let mut ex = ExecOut::new(d);
        ex.store_val = rs2_val;

        match d.opcode {
            opcode::OP => {
                let shamt = rs2_val & 0x1F;
                ex.reg_write = true;
                ex.alu_result = match (d.funct7, d.funct3) {
                    (0x00, 0x0) => rs1_val.wrapping_add(rs2_val),
                    (0x00, 0x1) => rs1_val << shamt,
                    (0x00, 0x2) => (rs1_val.cast_signed() < rs2_val.cast_signed()) as u32,
                    (0x00, 0x3) => (rs1_val < rs2_val) as u32,
                    (0x00, 0x4) => rs1_val ^ rs2_val,
                    (0x00, 0x5) => rs1_val >> shamt,
                    (0x00, 0x6) => rs1_val | rs2_val,
                    (0x00, 0x7) => rs1_val & rs2_val,
                    (0x20, 0x0) => rs1_val.wrapping_sub(rs2_val),
                    (0x20, 0x5) => (rs1_val.cast_signed() >> shamt).cast_unsigned(),
                    (0x01, funct3) => {
                        if !self.config.enable_m {
                            return ex.illegal();
                        }
                        match funct3 {
                            0x0 => rs1_val.wrapping_mul(rs2_val),
                            0x1 => mul_high_signed(rs1_val, rs2_val),
                            0x2 => mul_high_signed_unsigned(rs1_val, rs2_val),
                            0x3 => mul_high_unsigned(rs1_val, rs2_val),
                            0x4 => div_signed(rs1_val, rs2_val),
                            0x5 => div_unsigned(rs1_val, rs2_val),
                            0x6 => rem_signed(rs1_val, rs2_val),
                            0x7 => rem_unsigned(rs1_val, rs2_val),
                            _ => unreachable!(),
                        }
                    }
                    _ => return ex.illegal(),
                };
            }

            opcode::OP_IMM => {
                // The canonical NOP performs no writeback at all.
                ex.reg_write = !(d.rd == 0 && d.rs1 == 0 && d.imm == 0);
                let shamt = d.imm & 0x1F;
                ex.alu_result = match d.funct3 {
                    0x0 => rs1_val.wrapping_add(d.imm),
                    0x1 => rs1_val << shamt,
                    0x2 => (rs1_val.cast_signed() < d.imm.cast_signed()) as u32,
                    0x3 => (rs1_val < d.imm) as u32,
                    0x4 => rs1_val ^ d.imm,
                    0x5 => {
                        if d.raw & (1 << 30) == 0 {
                            rs1_val >> shamt
                        } else {
                            (rs1_val.cast_signed() >> shamt).cast_unsigned()
                        }
                    }
                    0x6 => rs1_val | d.imm,
                    0x7 => rs1_val & d.imm,
                    _ => unreachable!(),
                };
            }

            opcode::AUIPC => {
                ex.alu_result = self.pc.wrapping_add(d.raw & 0xFFFF_F000);
                ex.reg_write = d.rd != 0;
            }

            opcode::LUI => {
                ex.alu_result = d.raw & 0xFFFF_F000;
                ex.reg_write = d.rd != 0;
            }

            opcode::LOAD => {
                ex.alu_result = rs1_val.wrapping_add(d.imm);
                ex.mem_read = true;
                ex.reg_write = true;
            }

            opcode::STORE => {
                ex.alu_result = rs1_val.wrapping_add(d.imm);
                ex.mem_write = true;
            }

            opcode::BRANCH => {
                let taken = match d.funct3 {
                    0x0 => rs1_val == rs2_val,
                    0x1 => rs1_val != rs2_val,
                    0x4 => rs1_val.cast_signed() < rs2_val.cast_signed(),
                    0x5 => rs1_val.cast_signed() >= rs2_val.cast_signed(),
                    0x6 => rs1_val < rs2_val,
                    0x7 => rs1_val >= rs2_val,
                    _ => false,
                };
                if taken {
                    ex.next_pc = self.pc.wrapping_add(d.imm);
                    ex.branch_taken = true;
                }
            }

            opcode::JAL => {
                ex.alu_result = self.pc.wrapping_add(4);
                ex.reg_write = d.rd != 0;
                ex.next_pc = self.pc.wrapping_add(d.imm);
                ex.branch_taken = true;
            }

            opcode::JALR => {
                ex.alu_result = self.pc.wrapping_add(4);
                ex.reg_write = d.rd != 0;
                ex.next_pc = rs1_val.wrapping_add(d.imm) & !1;
                ex.branch_taken = true;
            }

            opcode::AMO => {
                if !self.config.enable_a || d.funct3 != 0x2 {
                    return ex.illegal();
                }
                match AmoOp::from_funct5(d.funct7 >> 2) {
                    Some(op) => {
                        ex.amo = Some(op);
                        ex.alu_result = rs1_val;
                        ex.reg_write = true;
                    }
                    None => return ex.illegal(),
                }
            }

            opcode::MISC_MEM => {
                // FENCE / FENCE.I: architectural no-ops for one in-order hart.
            }

            opcode::SYSTEM => return self.execute_system(d, rs1_val, ex),

            _ => return ex.illegal(),
        }

        ex
    }

    fn execute_system(&mut self, d: &DecodeOut, rs1_val: u32, mut ex: ExecOut) -> ExecOut {
        if d.funct3 == 0 {
            match d.raw >> 20 {
                0x000 => {
                    // ECALL; exit(93) additionally terminates the run.
                    ex.trap = Some(Exception::MachineEnvCall);
                    ex.finished = self.reg_file.read(17, 0).0 == SYS_EXIT;
                }
                0x001 => ex.trap = Some(Exception::Breakpoint),
                0x105 => {
                    // WFI: the step loop polls the timer anyway.
                }
                0x302 => {
                    TrapController::mret(self);
                    ex.next_pc = self.csr.read(csr_index::mepc);
                    ex.branch_taken = true;
                }
                _ => return ex.illegal(),
            }
            return ex;
        }

        // Zicsr. The rs1 field doubles as a 5-bit immediate for the *I forms.
        let addr = d.imm & 0xFFF;
        let uimm = d.rs1 as u32;
        let old = self.csr.read(addr);
        ex.alu_result = old;
        ex.reg_write = d.rd != 0;

        match d.funct3 {
            0x1 => self.csr.write(addr, rs1_val),
            0x2 => {
                if d.rs1 != 0 {
                    self.csr.write(addr, old | rs1_val);
                }
            }
            0x3 => {
                if d.rs1 != 0 {
                    self.csr.write(addr, old & !rs1_val);
                }
            }
            0x5 => self.csr.write(addr, uimm),
            0x6 => {
                if uimm != 0 {
                    self.csr.write(addr, old | uimm);
                }
            }
            0x7 => {
                if uimm != 0 {
                    self.csr.write(addr, old & !uimm);
                }
            }
            _ => return ex.illegal(),
        }

        ex
    }
}
