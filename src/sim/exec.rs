//! Instruction semantics.
//!
//! An [`Executor`] borrows the register file and a bus for the duration of one instruction.
//! Instructions which stop the run (`TEST`, `STOP`, `WAI`, and `SWI` when it is not allowed)
//! report it through [`StepBreak::Halt`].

use crate::alu::{self, CC_C, CC_I, CC_V, CC_X, CC_Z};
use crate::isa::{Instr, Op, Operand};

use super::debug::BranchForce;
use super::mem::Bus;
use super::regs::RegFile;
use super::{Halt, SimErr, StepBreak};

/// The SWI vector.
pub(super) const SWI_VECTOR: u16 = 0xFFF6;

/// Pushes the machine state (PC, Y, X, A, B, CC, in that order) for an interrupt.
pub(super) fn push_state(regs: &mut RegFile, bus: &mut impl Bus) {
    regs.push16(bus, regs.pc());
    regs.push16(bus, regs.y());
    regs.push16(bus, regs.x());
    regs.push8(bus, regs.a());
    regs.push8(bus, regs.b());
    regs.push8(bus, regs.cc());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acc {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unary {
    Neg, Com, Lsr, Ror, Asr, Asl, Rol, Dec, Inc, Tst, Clr
}
impl Unary {
    /// The unary operation and its target (`None` is memory).
    fn of(op: Op) -> Option<(Unary, Option<Acc>)> {
        use Op::*;
        let kind = match op {
            NEGA | NEGB | NEG => Unary::Neg,
            COMA | COMB | COM => Unary::Com,
            LSRA | LSRB | LSR => Unary::Lsr,
            RORA | RORB | ROR => Unary::Ror,
            ASRA | ASRB | ASR => Unary::Asr,
            ASLA | ASLB | ASL => Unary::Asl,
            ROLA | ROLB | ROL => Unary::Rol,
            DECA | DECB | DEC => Unary::Dec,
            INCA | INCB | INC => Unary::Inc,
            TSTA | TSTB | TST => Unary::Tst,
            CLRA | CLRB | CLR => Unary::Clr,
            _ => return None
        };
        let acc = match op {
            NEGA | COMA | LSRA | RORA | ASRA | ASLA | ROLA | DECA | INCA | TSTA | CLRA => Some(Acc::A),
            NEGB | COMB | LSRB | RORB | ASRB | ASLB | ROLB | DECB | INCB | TSTB | CLRB => Some(Acc::B),
            _ => None
        };
        Some((kind, acc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binary {
    Sub, Cmp, Sbc, And, Bit, Ld, St, Eor, Adc, Or, Add
}
impl Binary {
    fn of(op: Op) -> Option<(Binary, Acc)> {
        use Op::*;
        let entry = match op {
            SUBA => (Binary::Sub, Acc::A), SUBB => (Binary::Sub, Acc::B),
            CMPA => (Binary::Cmp, Acc::A), CMPB => (Binary::Cmp, Acc::B),
            SBCA => (Binary::Sbc, Acc::A), SBCB => (Binary::Sbc, Acc::B),
            ANDA => (Binary::And, Acc::A), ANDB => (Binary::And, Acc::B),
            BITA => (Binary::Bit, Acc::A), BITB => (Binary::Bit, Acc::B),
            LDAA => (Binary::Ld,  Acc::A), LDAB => (Binary::Ld,  Acc::B),
            STAA => (Binary::St,  Acc::A), STAB => (Binary::St,  Acc::B),
            EORA => (Binary::Eor, Acc::A), EORB => (Binary::Eor, Acc::B),
            ADCA => (Binary::Adc, Acc::A), ADCB => (Binary::Adc, Acc::B),
            ORAA => (Binary::Or,  Acc::A), ORAB => (Binary::Or,  Acc::B),
            ADDA => (Binary::Add, Acc::A), ADDB => (Binary::Add, Acc::B),
            _ => return None
        };
        Some(entry)
    }
}

/// Executes one instruction against the register file and a bus.
pub(super) struct Executor<'a, B> {
    pub(super) regs: &'a mut RegFile,
    pub(super) bus: B,
    /// Override for this instruction's branch decision.
    pub(super) force: Option<BranchForce>,
    /// Whether SWI takes its vector (otherwise it halts the run).
    pub(super) allow_swi: bool,
}

fn bad_operand() -> SimErr {
    SimErr::InternalError("operand does not match the addressing mode")
}

impl<B: Bus> Executor<'_, B> {
    fn acc(&self, acc: Acc) -> u8 {
        match acc {
            Acc::A => self.regs.a(),
            Acc::B => self.regs.b(),
        }
    }
    fn set_acc(&mut self, acc: Acc, val: u8) {
        match acc {
            Acc::A => self.regs.set_a(val),
            Acc::B => self.regs.set_b(val),
        }
    }

    fn ea(operand: Operand) -> Result<u16, SimErr> {
        match operand {
            Operand::Memory { addr, .. } => Ok(addr),
            _ => Err(bad_operand())
        }
    }
    fn load8(&mut self, operand: Operand) -> Result<u8, SimErr> {
        match operand {
            Operand::Immediate(v) => Ok(v as u8),
            Operand::Memory { addr, .. } => Ok(self.bus.read_u8(addr)),
            _ => Err(bad_operand())
        }
    }
    fn load16(&mut self, operand: Operand) -> Result<u16, SimErr> {
        match operand {
            Operand::Immediate(v) => Ok(v),
            Operand::Memory { addr, .. } => Ok(self.bus.read_u16(addr)),
            _ => Err(bad_operand())
        }
    }

    fn branch(&mut self, cond: bool, target: u16) {
        if BranchForce::decide(self.force, cond) {
            self.regs.set_pc(target);
        }
    }

    /// The condition of a conditional branch.
    fn condition(&self, op: Op) -> Option<bool> {
        use Op::*;
        let r = &*self.regs;
        let (n, z, v, c) = (r.is_negative_set(), r.is_zero_set(), r.is_overflow_set(), r.is_carry_set());
        let cond = match op {
            BRA => true,
            BRN => false,
            BHI => !(c || z),
            BLS => c || z,
            BHS => !c,
            BLO => c,
            BNE => !z,
            BEQ => z,
            BVC => !v,
            BVS => v,
            BPL => !n,
            BMI => n,
            BGE => !(n ^ v),
            BLT => n ^ v,
            BGT => !(z || n ^ v),
            BLE => z || n ^ v,
            _ => return None
        };
        Some(cond)
    }

    /// Executes an instruction.
    ///
    /// The PC is moved past the instruction before its semantics apply.
    pub(super) fn execute(&mut self, instr: &Instr) -> Result<(), StepBreak> {
        let op = instr.info.op;
        let operand = instr.operand;
        self.regs.set_pc(instr.next_addr());

        if let Some((kind, acc)) = Unary::of(op) {
            return self.unary(kind, acc, operand).map_err(Into::into);
        }
        if let Some((kind, acc)) = Binary::of(op) {
            return self.binary(kind, acc, operand).map_err(Into::into);
        }
        if let Some(cond) = self.condition(op) {
            let Operand::Relative(target) = operand else { return Err(bad_operand().into()) };
            self.branch(cond, target);
            return Ok(());
        }

        use Op::*;
        match op {
            TEST => return Err(StepBreak::Halt(Halt::Test)),
            NOP => {},
            IDIV => self.idiv(),
            FDIV => self.fdiv(),
            LSRD => {
                let (d, flags) = alu::lsr16(self.regs.d());
                self.regs.set_d(d);
                self.regs.set_nzvc(flags);
            },
            LSLD => {
                let (d, flags) = alu::asl16(self.regs.d());
                self.regs.set_d(d);
                self.regs.set_nzvc(flags);
            },
            TAP => {
                // X may be cleared, but not set
                let (a, old) = (self.regs.a(), self.regs.cc());
                self.regs.set_cc(a & !CC_X | a & old & CC_X);
            },
            TPA => self.regs.set_a(self.regs.cc()),
            INX => {
                let x = self.regs.x().wrapping_add(1);
                self.regs.set_x(x);
                self.regs.set_z(zero16(x));
            },
            DEX => {
                let x = self.regs.x().wrapping_sub(1);
                self.regs.set_x(x);
                self.regs.set_z(zero16(x));
            },
            INY => {
                let y = self.regs.y().wrapping_add(1);
                self.regs.set_y(y);
                self.regs.set_z(zero16(y));
            },
            DEY => {
                let y = self.regs.y().wrapping_sub(1);
                self.regs.set_y(y);
                self.regs.set_z(zero16(y));
            },
            CLV => self.regs.set_v(0),
            SEV => self.regs.set_v(CC_V),
            CLC => self.regs.set_c(0),
            SEC => self.regs.set_c(CC_C),
            CLI => self.regs.set_i(0),
            SEI => self.regs.set_i(CC_I),
            SBA => {
                let (a, flags) = alu::sub8(self.regs.a(), self.regs.b());
                self.regs.set_a(a);
                self.regs.set_nzvc(flags);
            },
            CBA => {
                let (_, flags) = alu::sub8(self.regs.a(), self.regs.b());
                self.regs.set_nzvc(flags);
            },
            ABA => {
                let (a, flags) = alu::add8(self.regs.a(), self.regs.b());
                self.regs.set_a(a);
                self.regs.set_hnzvc(flags);
            },
            TAB => {
                self.regs.set_b(self.regs.a());
                self.regs.set_nzv(alu::test_nz8(self.regs.b()));
            },
            TBA => {
                self.regs.set_a(self.regs.b());
                self.regs.set_nzv(alu::test_nz8(self.regs.a()));
            },
            DAA => self.daa(),
            TSX => self.regs.set_x(self.regs.sp().wrapping_add(1)),
            TSY => self.regs.set_y(self.regs.sp().wrapping_add(1)),
            TXS => self.regs.set_sp(self.regs.x().wrapping_sub(1)),
            TYS => self.regs.set_sp(self.regs.y().wrapping_sub(1)),
            INS => self.regs.set_sp(self.regs.sp().wrapping_add(1)),
            DES => self.regs.set_sp(self.regs.sp().wrapping_sub(1)),
            PSHA => self.regs.push8(&mut self.bus, self.regs.a()),
            PSHB => self.regs.push8(&mut self.bus, self.regs.b()),
            PSHX => self.regs.push16(&mut self.bus, self.regs.x()),
            PSHY => self.regs.push16(&mut self.bus, self.regs.y()),
            PULA => {
                let a = self.regs.pull8(&mut self.bus);
                self.regs.set_a(a);
            },
            PULB => {
                let b = self.regs.pull8(&mut self.bus);
                self.regs.set_b(b);
            },
            PULX => {
                let x = self.regs.pull16(&mut self.bus);
                self.regs.set_x(x);
            },
            PULY => {
                let y = self.regs.pull16(&mut self.bus);
                self.regs.set_y(y);
            },
            RTS => {
                let pc = self.regs.pull16(&mut self.bus);
                self.regs.set_pc(pc);
            },
            RTI => self.rti(),
            ABX => self.regs.set_x(self.regs.x().wrapping_add(self.regs.b().into())),
            ABY => self.regs.set_y(self.regs.y().wrapping_add(self.regs.b().into())),
            MUL => {
                let d = u16::from(self.regs.a()) * u16::from(self.regs.b());
                self.regs.set_d(d);
                self.regs.set_c(if d & 0x0080 != 0 { CC_C } else { 0 });
            },
            WAI => {
                push_state(self.regs, &mut self.bus);
                return Err(StepBreak::Halt(Halt::Wai));
            },
            SWI => {
                if !self.allow_swi {
                    return Err(StepBreak::Halt(Halt::Swi));
                }
                push_state(self.regs, &mut self.bus);
                self.regs.set_i(CC_I);
                let pc = self.bus.read_u16(SWI_VECTOR);
                self.regs.set_pc(pc);
            },
            XGDX => {
                let d = self.regs.d();
                self.regs.set_d(self.regs.x());
                self.regs.set_x(d);
            },
            XGDY => {
                let d = self.regs.d();
                self.regs.set_d(self.regs.y());
                self.regs.set_y(d);
            },
            STOP => {
                // with S set, STOP is a NOP
                if !self.regs.is_stop_set() {
                    return Err(StepBreak::Halt(Halt::Stop));
                }
            },

            JMP => self.regs.set_pc(Self::ea(operand)?),
            JSR => {
                let target = Self::ea(operand)?;
                self.regs.push16(&mut self.bus, self.regs.pc());
                self.regs.set_pc(target);
            },
            BSR => {
                let Operand::Relative(target) = operand else { return Err(bad_operand().into()) };
                if BranchForce::decide(self.force, true) {
                    self.regs.push16(&mut self.bus, self.regs.pc());
                    self.regs.set_pc(target);
                }
            },

            BSET | BCLR => {
                let Operand::BitMask { addr, mask, .. } = operand else { return Err(bad_operand().into()) };
                let m = self.bus.read_u8(addr);
                let m = match op {
                    BSET => m | mask,
                    _ => m & !mask,
                };
                self.bus.write_u8(addr, m);
                self.regs.set_nzv(alu::test_nz8(m));
            },
            BRSET | BRCLR => {
                let Operand::BitBranch { addr, mask, target, .. } = operand else { return Err(bad_operand().into()) };
                let m = self.bus.read_u8(addr);
                let cond = match op {
                    BRSET => !m & mask == 0,
                    _ => m & mask == 0,
                };
                self.branch(cond, target);
            },

            SUBD | ADDD | CPD => {
                let m = self.load16(operand)?;
                let d = self.regs.d();
                let (r, flags) = match op {
                    ADDD => alu::add16(d, m),
                    _ => alu::sub16(d, m),
                };
                if op != CPD {
                    self.regs.set_d(r);
                }
                self.regs.set_nzvc(flags);
            },
            CPX | CPY => {
                let m = self.load16(operand)?;
                let idx = match op {
                    CPX => self.regs.x(),
                    _ => self.regs.y(),
                };
                self.regs.set_nzvc(alu::sub16(idx, m).1);
            },
            LDD | LDX | LDY | LDS => {
                let m = self.load16(operand)?;
                match op {
                    LDD => self.regs.set_d(m),
                    LDX => self.regs.set_x(m),
                    LDY => self.regs.set_y(m),
                    _ => self.regs.set_sp(m),
                }
                self.regs.set_nzv(alu::test_nz16(m));
            },
            STD | STX | STY | STS => {
                let addr = Self::ea(operand)?;
                let val = match op {
                    STD => self.regs.d(),
                    STX => self.regs.x(),
                    STY => self.regs.y(),
                    _ => self.regs.sp(),
                };
                self.bus.write_u16(addr, val);
                self.regs.set_nzv(alu::test_nz16(val));
            },

            _ => return Err(SimErr::InternalError("operation has no semantics").into()),
        }
        Ok(())
    }

    fn unary(&mut self, kind: Unary, acc: Option<Acc>, operand: Operand) -> Result<(), SimErr> {
        // CLR does not read its operand
        let val = match (acc, kind) {
            (Some(acc), _) => self.acc(acc),
            (None, Unary::Clr) => 0,
            (None, _) => {
                let addr = Self::ea(operand)?;
                self.bus.read_u8(addr)
            }
        };

        let carry = self.regs.is_carry_set();
        let result = match kind {
            Unary::Neg => Some(self.nzvc(alu::neg8(val))),
            Unary::Com => {
                let r = !val;
                self.regs.set_nzvc(alu::test_nz8(r) | CC_C);
                Some(r)
            },
            Unary::Lsr => Some(self.nzvc(alu::lsr8(val))),
            Unary::Ror => Some(self.nzvc(alu::ror8(val, carry))),
            Unary::Asr => Some(self.nzvc(alu::asr8(val))),
            Unary::Asl => Some(self.nzvc(alu::asl8(val))),
            Unary::Rol => Some(self.nzvc(alu::rol8(val, carry))),
            Unary::Dec => {
                let (r, flags) = alu::sub8(val, 1);
                self.regs.set_nzv(flags);
                Some(r)
            },
            Unary::Inc => {
                let (r, flags) = alu::add8(val, 1);
                self.regs.set_nzv(flags);
                Some(r)
            },
            Unary::Tst => {
                self.regs.set_nzvc(alu::test_nz8(val));
                None
            },
            Unary::Clr => {
                self.regs.set_nzvc(CC_Z);
                Some(0)
            },
        };

        if let Some(r) = result {
            match acc {
                Some(acc) => self.set_acc(acc, r),
                None => self.bus.write_u8(Self::ea(operand)?, r),
            }
        }
        Ok(())
    }

    fn nzvc(&mut self, (r, flags): (u8, u8)) -> u8 {
        self.regs.set_nzvc(flags);
        r
    }

    fn binary(&mut self, kind: Binary, acc: Acc, operand: Operand) -> Result<(), SimErr> {
        let a = self.acc(acc);
        if kind == Binary::St {
            self.bus.write_u8(Self::ea(operand)?, a);
            self.regs.set_nzv(alu::test_nz8(a));
            return Ok(());
        }

        let m = self.load8(operand)?;
        let carry = self.regs.is_carry_set();
        match kind {
            Binary::Sub => {
                let r = self.nzvc(alu::sub8(a, m));
                self.set_acc(acc, r);
            },
            Binary::Sbc => {
                let r = self.nzvc(alu::sbc8(a, m, carry));
                self.set_acc(acc, r);
            },
            Binary::Cmp => {
                self.nzvc(alu::sub8(a, m));
            },
            Binary::And | Binary::Eor | Binary::Or | Binary::Bit => {
                let (r, flags) = match kind {
                    Binary::Eor => alu::eor8(a, m),
                    Binary::Or => alu::or8(a, m),
                    _ => alu::and8(a, m),
                };
                self.regs.set_nzv(flags);
                if kind != Binary::Bit {
                    self.set_acc(acc, r);
                }
            },
            Binary::Ld => {
                self.set_acc(acc, m);
                self.regs.set_nzv(alu::test_nz8(m));
            },
            Binary::Add | Binary::Adc => {
                let (r, flags) = match kind {
                    Binary::Adc => alu::adc8(a, m, carry),
                    _ => alu::add8(a, m),
                };
                self.set_acc(acc, r);
                self.regs.set_hnzvc(flags);
            },
            Binary::St => unreachable!("handled above"),
        }
        Ok(())
    }

    fn rti(&mut self) {
        let cc = self.regs.pull8(&mut self.bus);
        let b = self.regs.pull8(&mut self.bus);
        self.regs.set_b(b);
        let a = self.regs.pull8(&mut self.bus);
        self.regs.set_a(a);
        let x = self.regs.pull16(&mut self.bus);
        self.regs.set_x(x);
        let y = self.regs.pull16(&mut self.bus);
        self.regs.set_y(y);
        let pc = self.regs.pull16(&mut self.bus);
        self.regs.set_pc(pc);

        // X may go from 1 to 0, but not from 0 to 1
        let old = self.regs.cc();
        self.regs.set_cc(old & cc & CC_X | cc & !CC_X);
    }

    fn idiv(&mut self) {
        let (d, x) = (self.regs.d(), self.regs.x());
        let mut flags = 0;
        let (q, r) = match x {
            0 => {
                flags |= CC_C;
                (0xFFFF, 0)
            },
            _ => (d / x, d % x),
        };
        if x != 0 && q == 0 {
            flags |= CC_Z;
        }
        self.regs.set_x(q);
        self.regs.set_d(r);
        self.regs.set_zvc(flags);
    }

    fn fdiv(&mut self) {
        let (d, x) = (self.regs.d(), self.regs.x());
        let mut flags = 0;
        let (q, r) = if x == 0 || x <= d {
            flags |= CC_V;
            if x == 0 { flags |= CC_C };
            (0xFFFF, 0)
        } else {
            let num = u32::from(d) << 16;
            let q = (num / u32::from(x)) as u16;
            if q == 0 { flags |= CC_Z };
            (q, (num % u32::from(x)) as u16)
        };
        self.regs.set_x(q);
        self.regs.set_d(r);
        self.regs.set_zvc(flags);
    }

    fn daa(&mut self) {
        let (c, h) = (self.regs.is_carry_set(), self.regs.is_half_set());
        let a = self.regs.a();
        let (uhb, lhb) = (a >> 4, a & 0x0F);

        let (offset, cout) = match (c, h) {
            (false, false) => {
                if uhb <= 9 && lhb <= 9 { (0x00, false) }
                else if uhb <= 8 && lhb >= 10 { (0x06, false) }
                else if uhb >= 10 && lhb <= 9 { (0x60, true) }
                else if uhb >= 9 && lhb >= 10 { (0x66, true) }
                else { (0x00, false) }
            },
            (false, true) => {
                if uhb <= 9 && lhb <= 3 { (0x06, false) }
                else if uhb >= 10 && lhb <= 3 { (0x66, true) }
                else { (0x00, false) }
            },
            (true, false) => {
                if uhb <= 2 && lhb <= 9 { (0x60, true) }
                else if uhb <= 2 && lhb >= 10 { (0x66, true) }
                else { (0x00, false) }
            },
            (true, true) => {
                if uhb <= 3 && lhb <= 3 { (0x66, true) }
                else { (0x00, false) }
            },
        };

        let r = a.wrapping_add(offset);
        self.regs.set_a(r);
        self.regs.set_nzvc(alu::test_nz8(r) | if cout { CC_C } else { 0 });
    }
}

fn zero16(val: u16) -> u8 {
    match val {
        0 => CC_Z,
        _ => 0
    }
}

#[cfg(test)]
mod tests {
    use crate::alu::{CC_H, CC_N};
    use crate::isa::decode;
    use crate::sim::mem::RawMemory;

    use super::*;

    struct Cpu {
        regs: RegFile,
        mem: RawMemory,
    }
    impl Cpu {
        fn new() -> Self {
            let mut regs = RegFile::new();
            regs.set_cc(0x00);
            regs.set_sp(0x00FF);
            regs.set_pc(0xC000);
            Self { regs, mem: RawMemory::new(&mut 0u8) }
        }
        fn load(&mut self, addr: u16, bytes: &[u8]) {
            for (i, &b) in bytes.iter().enumerate() {
                self.mem.write_u8(addr.wrapping_add(i as u16), b);
            }
        }
        fn step_with(&mut self, force: Option<BranchForce>, allow_swi: bool) -> Result<(), StepBreak> {
            let (pc, x, y) = (self.regs.pc(), self.regs.x(), self.regs.y());
            let mem = &self.mem;
            let instr = decode(pc, x, y, |a| mem.read_u8(a)).expect("legal opcode");
            Executor { regs: &mut self.regs, bus: &mut self.mem, force, allow_swi }.execute(&instr)
        }
        fn step(&mut self) {
            assert!(self.step_with(None, false).is_ok());
        }
        fn run(&mut self, code: &[u8], n: usize) {
            self.load(0xC000, code);
            self.regs.set_pc(0xC000);
            for _ in 0..n {
                self.step();
            }
        }
    }

    #[test]
    fn load_and_decrement() {
        let mut cpu = Cpu::new();
        // LDAA #$05, DECA
        cpu.run(&[0x86, 0x05, 0x4A], 2);
        assert_eq!(cpu.regs.a(), 4);
        assert!(!cpu.regs.is_zero_set());
        assert!(!cpu.regs.is_negative_set());
        assert_eq!(cpu.regs.pc(), 0xC003);
    }

    #[test]
    fn arithmetic_flags() {
        let mut cpu = Cpu::new();
        // LDAA #$7F, ADDA #$01
        cpu.run(&[0x86, 0x7F, 0x8B, 0x01], 2);
        assert_eq!(cpu.regs.a(), 0x80);
        assert_eq!(cpu.regs.cc(), CC_H | CC_N | CC_V);

        // SEC, LDAB #$10, SBCB #$0F: 0x10 - 0x0F - 1 = 0
        cpu.run(&[0x0D, 0xC6, 0x10, 0xC2, 0x0F], 3);
        assert_eq!(cpu.regs.b(), 0);
        assert!(cpu.regs.is_zero_set() && !cpu.regs.is_carry_set());

        // LDD #$FFFF, ADDD #$0001
        cpu.run(&[0xCC, 0xFF, 0xFF, 0xC3, 0x00, 0x01], 2);
        assert_eq!(cpu.regs.d(), 0);
        assert!(cpu.regs.is_zero_set() && cpu.regs.is_carry_set());
    }

    #[test]
    fn memory_operands() {
        let mut cpu = Cpu::new();
        cpu.load(0x0040, &[0x0F]);
        cpu.regs.set_x(0x0030);
        // INC $40, COM $10,X, TST $40, CLR $40
        cpu.run(&[0x7C, 0x00, 0x40, 0x63, 0x10, 0x7D, 0x00, 0x40], 2);
        assert_eq!(cpu.mem.read_u8(0x0040), 0xEF);
        assert!(cpu.regs.is_carry_set() && cpu.regs.is_negative_set());

        cpu.step();
        assert_eq!(cpu.regs.cc() & (CC_N | CC_Z | CC_V | CC_C), CC_N);

        // STAA $41 with A = 0
        cpu.run(&[0x97, 0x41, 0x7F, 0x00, 0x40], 2);
        assert_eq!(cpu.mem.read_u8(0x0040), 0x00);
        assert!(cpu.regs.is_zero_set());
    }

    #[test]
    fn stack_and_subroutines() {
        let mut cpu = Cpu::new();
        // JSR $C010 / at $C010: LDX #$1234, PSHX, PULY, RTS
        cpu.load(0xC010, &[0xCE, 0x12, 0x34, 0x3C, 0x18, 0x38, 0x39]);
        cpu.run(&[0xBD, 0xC0, 0x10], 1);
        assert_eq!(cpu.regs.pc(), 0xC010);
        assert_eq!(cpu.regs.sp(), 0x00FD);
        assert_eq!(cpu.mem.read_u16(0x00FE), 0xC003);

        for _ in 0..4 {
            cpu.step();
        }
        assert_eq!(cpu.regs.y(), 0x1234);
        assert_eq!(cpu.regs.pc(), 0xC003);
        assert_eq!(cpu.regs.sp(), 0x00FF);

        // TSX points at the last pushed byte
        cpu.run(&[0x30, 0x35], 2);
        assert_eq!(cpu.regs.x(), 0x0100);
        assert_eq!(cpu.regs.sp(), 0x00FF);
    }

    #[test]
    fn branches() {
        let mut cpu = Cpu::new();
        // CLRA, BEQ +2, NOP, NOP, (target)
        cpu.run(&[0x4F, 0x27, 0x02, 0x01, 0x01], 2);
        assert_eq!(cpu.regs.pc(), 0xC005);

        // BRA is not taken when forced never, BRN is taken when forced always
        cpu.load(0xC000, &[0x20, 0x10]);
        cpu.regs.set_pc(0xC000);
        assert!(cpu.step_with(Some(BranchForce::Never), false).is_ok());
        assert_eq!(cpu.regs.pc(), 0xC002);

        cpu.load(0xC000, &[0x21, 0x10]);
        cpu.regs.set_pc(0xC000);
        assert!(cpu.step_with(Some(BranchForce::Always), false).is_ok());
        assert_eq!(cpu.regs.pc(), 0xC012);

        // BSR forced never neither pushes nor jumps
        cpu.load(0xC000, &[0x8D, 0x10]);
        cpu.regs.set_pc(0xC000);
        assert!(cpu.step_with(Some(BranchForce::Never), false).is_ok());
        assert_eq!((cpu.regs.pc(), cpu.regs.sp()), (0xC002, 0x00FF));
    }

    #[test]
    fn signed_branches() {
        let mut cpu = Cpu::new();
        // LDAA #$80, CMPA #$01 (-128 < 1), BLT +2
        cpu.run(&[0x86, 0x80, 0x81, 0x01, 0x2D, 0x02], 3);
        assert_eq!(cpu.regs.pc(), 0xC008);
        // same, but BHI (unsigned 0x80 > 0x01) is taken too
        cpu.run(&[0x86, 0x80, 0x81, 0x01, 0x22, 0x02], 3);
        assert_eq!(cpu.regs.pc(), 0xC008);
    }

    #[test]
    fn bit_operations() {
        let mut cpu = Cpu::new();
        cpu.load(0x0010, &[0x81]);
        // BSET $10 #$02, BCLR $10 #$80, BRSET $10 #$03 *
        cpu.run(&[0x14, 0x10, 0x02, 0x15, 0x10, 0x80, 0x12, 0x10, 0x03, 0xFC], 2);
        assert_eq!(cpu.mem.read_u8(0x0010), 0x03);

        cpu.step();
        assert_eq!(cpu.regs.pc(), 0xC006);

        // BRCLR $10 #$04 skips
        cpu.run(&[0x13, 0x10, 0x04, 0x05], 1);
        assert_eq!(cpu.regs.pc(), 0xC009);
    }

    #[test]
    fn multiply_and_divide() {
        let mut cpu = Cpu::new();
        // LDAA #$10, LDAB #$18, MUL
        cpu.run(&[0x86, 0x10, 0xC6, 0x18, 0x3D], 3);
        assert_eq!(cpu.regs.d(), 0x0180);
        assert!(cpu.regs.is_carry_set());

        // LDD #100, LDX #7, IDIV
        cpu.run(&[0xCC, 0x00, 0x64, 0xCE, 0x00, 0x07, 0x02], 3);
        assert_eq!((cpu.regs.x(), cpu.regs.d()), (14, 2));
        assert!(!cpu.regs.is_zero_set() && !cpu.regs.is_carry_set());

        // divide by zero
        cpu.run(&[0xCC, 0x00, 0x64, 0xCE, 0x00, 0x00, 0x02], 3);
        assert_eq!((cpu.regs.x(), cpu.regs.d()), (0xFFFF, 0));
        assert!(cpu.regs.is_carry_set());

        // LDD #1, LDX #4, FDIV: 1/4 = 0x4000
        cpu.run(&[0xCC, 0x00, 0x01, 0xCE, 0x00, 0x04, 0x03], 3);
        assert_eq!((cpu.regs.x(), cpu.regs.d()), (0x4000, 0));
        assert!(!cpu.regs.is_overflow_set());

        // FDIV overflows when X <= D
        cpu.run(&[0xCC, 0x00, 0x04, 0xCE, 0x00, 0x04, 0x03], 3);
        assert_eq!(cpu.regs.x(), 0xFFFF);
        assert!(cpu.regs.is_overflow_set() && !cpu.regs.is_carry_set());
    }

    #[test]
    fn decimal_adjust() {
        let mut cpu = Cpu::new();
        // LDAA #$19, ADDA #$28, DAA: 19 + 28 = 47
        cpu.run(&[0x86, 0x19, 0x8B, 0x28, 0x19], 3);
        assert_eq!(cpu.regs.a(), 0x47);
        assert!(!cpu.regs.is_carry_set());

        // LDAA #$99, ADDA #$01, DAA: 99 + 1 = 100
        cpu.run(&[0x86, 0x99, 0x8B, 0x01, 0x19], 3);
        assert_eq!(cpu.regs.a(), 0x00);
        assert!(cpu.regs.is_carry_set() && cpu.regs.is_zero_set());
    }

    #[test]
    fn condition_code_transfers() {
        let mut cpu = Cpu::new();
        cpu.regs.set_cc(CC_X);
        // LDAA #$FF, TAP: X stays set (it can't be set by TAP, but it can stay)
        cpu.run(&[0x86, 0xFF, 0x06], 2);
        assert_eq!(cpu.regs.cc(), 0xFF);

        // LDAA #$00, TAP: X is cleared
        cpu.run(&[0x86, 0x00, 0x06], 2);
        assert_eq!(cpu.regs.cc(), 0x00);

        // LDAA #$40, TAP: X cannot be set
        cpu.run(&[0x86, 0x40, 0x06, 0x07], 3);
        assert_eq!(cpu.regs.cc(), 0x00);
        assert_eq!(cpu.regs.a(), 0x00);
    }

    #[test]
    fn interrupt_instructions() {
        let mut cpu = Cpu::new();
        cpu.load(SWI_VECTOR, &[0xD0, 0x00]);
        cpu.load(0xC000, &[0x3F]);
        cpu.regs.set_d(0x0102);
        cpu.regs.set_x(0x0304);
        cpu.regs.set_y(0x0506);

        assert!(matches!(cpu.step_with(None, false), Err(StepBreak::Halt(Halt::Swi))));
        assert_eq!(cpu.regs.sp(), 0x00FF);

        cpu.regs.set_pc(0xC000);
        assert!(cpu.step_with(None, true).is_ok());
        assert_eq!(cpu.regs.pc(), 0xD000);
        assert_eq!(cpu.regs.sp(), 0x00F6);
        assert!(cpu.regs.is_i_set());
        assert_eq!(cpu.mem.read_u8(0x00F7), 0x00); // CC
        assert_eq!(cpu.mem.read_u8(0x00F8), 0x02); // B
        assert_eq!(cpu.mem.read_u8(0x00F9), 0x01); // A
        assert_eq!(cpu.mem.read_u16(0x00FA), 0x0304);
        assert_eq!(cpu.mem.read_u16(0x00FC), 0x0506);
        assert_eq!(cpu.mem.read_u16(0x00FE), 0xC001);

        // RTI restores everything
        cpu.regs.set_d(0);
        cpu.regs.set_x(0);
        cpu.load(0xD000, &[0x3B]);
        cpu.step();
        assert_eq!(cpu.regs.pc(), 0xC001);
        assert_eq!((cpu.regs.d(), cpu.regs.x(), cpu.regs.y()), (0x0102, 0x0304, 0x0506));
        assert_eq!(cpu.regs.sp(), 0x00FF);
        assert!(!cpu.regs.is_i_set());
    }

    #[test]
    fn halting_instructions() {
        let mut cpu = Cpu::new();
        cpu.load(0xC000, &[0x00, 0xCF, 0x3E]);
        assert!(matches!(cpu.step_with(None, false), Err(StepBreak::Halt(Halt::Test))));
        assert!(matches!(cpu.step_with(None, false), Err(StepBreak::Halt(Halt::Stop))));

        // STOP with S set is a NOP
        cpu.regs.set_pc(0xC001);
        cpu.regs.set_cc(0x80);
        cpu.step();
        assert_eq!(cpu.regs.pc(), 0xC002);

        // WAI stacks the state, then halts
        assert!(matches!(cpu.step_with(None, false), Err(StepBreak::Halt(Halt::Wai))));
        assert_eq!(cpu.regs.sp(), 0x00F6);
        assert_eq!(cpu.mem.read_u16(0x00FE), 0xC003);
    }
}
