//! The 68HC11 instruction set.
//!
//! This module holds the static decode table of the simulator:
//! - [`Op`]: every operation the CPU can execute,
//! - [`Mode`]: every addressing mode,
//! - [`lookup`]: the table mapping an [`Opcode`] to its ([`Op`], [`Mode`], base cycle count).
//! - [`decode`]: reads a whole instruction (prebyte, opcode, operand bytes) into an [`Instr`].
//!
//! It also defines [`Operand`], the decoded operand of an instruction,
//! which is produced by the simulator's decode stage and consumed by
//! the executor and the disassembler ([`crate::dasm`]).

/// Opcode bytes which select an extended table page.
pub const PREBYTES: [u8; 3] = [0x18, 0x1A, 0xCD];

macro_rules! ops {
    ($($name:ident),+ $(,)?) => {
        /// An operation (mnemonic) of the 68HC11.
        ///
        /// Accumulator-specific variants (e.g., `LDAA`, `LDAB`) are separate operations,
        /// as they are in the manufacturer's instruction tables.
        #[allow(clippy::upper_case_acronyms, missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op {
            $($name),+
        }
        impl Op {
            /// The assembler mnemonic of this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name)),+
                }
            }
        }
    }
}
ops! {
    // inherent
    TEST, NOP, IDIV, FDIV, LSRD, LSLD, TAP, TPA, INX, DEX, CLV, SEV, CLC, SEC, CLI, SEI,
    SBA, CBA, TAB, TBA, DAA, ABA, TSX, INS, PULA, PULB, DES, TXS, PSHA, PSHB, PULX, RTS,
    ABX, RTI, PSHX, MUL, WAI, SWI, XGDX, STOP, INY, DEY, TSY, TYS, PULY, ABY, PSHY, XGDY,
    NEGA, COMA, LSRA, RORA, ASRA, ASLA, ROLA, DECA, INCA, TSTA, CLRA,
    NEGB, COMB, LSRB, RORB, ASRB, ASLB, ROLB, DECB, INCB, TSTB, CLRB,
    // read-modify-write memory
    NEG, COM, LSR, ROR, ASR, ASL, ROL, DEC, INC, TST, JMP, CLR,
    // branches
    BRA, BRN, BHI, BLS, BHS, BLO, BNE, BEQ, BVC, BVS, BPL, BMI, BGE, BLT, BGT, BLE, BSR,
    // bit manipulation
    BRSET, BRCLR, BSET, BCLR,
    // accumulator A
    SUBA, CMPA, SBCA, ANDA, BITA, LDAA, STAA, EORA, ADCA, ORAA, ADDA,
    // accumulator B
    SUBB, CMPB, SBCB, ANDB, BITB, LDAB, STAB, EORB, ADCB, ORAB, ADDB,
    // 16-bit
    SUBD, ADDD, CPD, CPX, CPY, LDD, STD, LDX, STX, LDY, STY, LDS, STS, JSR,
}
impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.mnemonic())
    }
}

/// An addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No operand.
    Inherent,
    /// One literal byte.
    Imm8,
    /// One literal word.
    Imm16,
    /// One address byte in page zero.
    Direct,
    /// Two address bytes.
    Extended,
    /// Unsigned offset byte added to X.
    IndexedX,
    /// Unsigned offset byte added to Y.
    IndexedY,
    /// Signed displacement from the PC after fetch.
    Relative,
    /// Direct address and a mask.
    Bit2Dir,
    /// X-indexed address and a mask.
    Bit2IndX,
    /// Y-indexed address and a mask.
    Bit2IndY,
    /// Direct address, a mask and a relative branch target.
    Bit3Dir,
    /// X-indexed address, a mask and a relative branch target.
    Bit3IndX,
    /// Y-indexed address, a mask and a relative branch target.
    Bit3IndY,
}
impl Mode {
    /// Number of operand bytes following the opcode.
    pub fn operand_len(self) -> u16 {
        match self {
            Mode::Inherent => 0,
            Mode::Imm8 | Mode::Direct | Mode::IndexedX | Mode::IndexedY | Mode::Relative => 1,
            Mode::Imm16 | Mode::Extended => 2,
            Mode::Bit2Dir | Mode::Bit2IndX | Mode::Bit2IndY => 2,
            Mode::Bit3Dir | Mode::Bit3IndX | Mode::Bit3IndY => 3,
        }
    }
}

/// An opcode as fetched: an optional prebyte and the opcode byte proper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode {
    /// One of [`PREBYTES`], if present.
    pub page: Option<u8>,
    /// The opcode byte.
    pub byte: u8,
}
impl Opcode {
    /// The raw bytes of this opcode.
    pub fn bytes(&self) -> impl Iterator<Item = u8> {
        self.page.into_iter().chain(std::iter::once(self.byte))
    }
}
impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page {
            Some(p) => write!(f, "${p:02X} ${:02X}", self.byte),
            None => write!(f, "${:02X}", self.byte),
        }
    }
}

/// A table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpInfo {
    /// The operation.
    pub op: Op,
    /// The addressing mode.
    pub mode: Mode,
    /// Base cycle count.
    pub cycles: u8,
}

/// A decoded operand.
///
/// Indexed addresses keep the raw offset byte for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// [`Mode::Inherent`].
    None,
    /// [`Mode::Imm8`] and [`Mode::Imm16`].
    Immediate(u16),
    /// [`Mode::Direct`], [`Mode::Extended`], [`Mode::IndexedX`] and [`Mode::IndexedY`].
    Memory {
        /// Effective address.
        addr: u16,
        /// Index offset byte (indexed modes only).
        offset: Option<u8>
    },
    /// [`Mode::Relative`]: the branch target.
    Relative(u16),
    /// The `Bit2*` modes.
    BitMask {
        /// Effective address.
        addr: u16,
        /// Index offset byte (indexed modes only).
        offset: Option<u8>,
        /// Bit mask.
        mask: u8
    },
    /// The `Bit3*` modes.
    BitBranch {
        /// Effective address.
        addr: u16,
        /// Index offset byte (indexed modes only).
        offset: Option<u8>,
        /// Bit mask.
        mask: u8,
        /// Branch target.
        target: u16
    },
}

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instr {
    /// Address of the first opcode byte.
    pub addr: u16,
    /// The opcode.
    pub opcode: Opcode,
    /// The table entry of the opcode.
    pub info: OpInfo,
    /// The decoded operand.
    pub operand: Operand,
    raw: [u8; 5],
    len: u8,
}
impl Instr {
    /// The raw bytes of the instruction (opcode and operand bytes).
    pub fn bytes(&self) -> &[u8] {
        &self.raw[..usize::from(self.len)]
    }
    /// The address of the following instruction.
    pub fn next_addr(&self) -> u16 {
        self.addr.wrapping_add(self.len.into())
    }
}

// Reads instruction bytes, keeping a copy of them.
struct Cursor<F> {
    addr: u16,
    raw: [u8; 5],
    len: u8,
    read: F,
}
impl<F: FnMut(u16) -> u8> Cursor<F> {
    fn pc(&self) -> u16 {
        self.addr.wrapping_add(self.len.into())
    }
    fn next(&mut self) -> u8 {
        let pc = self.pc();
        let byte = (self.read)(pc);
        self.raw[usize::from(self.len)] = byte;
        self.len += 1;
        byte
    }
    fn next16(&mut self) -> u16 {
        u16::from_be_bytes([self.next(), self.next()])
    }
    // Relative displacements are the last operand byte,
    // so the target is relative to the PC after the whole instruction.
    fn rel(&mut self) -> u16 {
        let disp = self.next() as i8;
        self.pc().wrapping_add(disp as u16)
    }
    // The address byte of a direct or indexed operand.
    fn addr(&mut self, index: Option<u16>) -> (u16, Option<u8>) {
        let byte = self.next();
        match index {
            Some(base) => (base.wrapping_add(byte.into()), Some(byte)),
            None => (byte.into(), None),
        }
    }
}

/// Decodes the instruction at `addr`, reading bytes with `read`.
///
/// `x` and `y` are the index registers used to compute indexed addresses.
/// Unassigned opcodes are returned as the error.
pub fn decode(addr: u16, x: u16, y: u16, read: impl FnMut(u16) -> u8) -> Result<Instr, Opcode> {
    let mut cur = Cursor { addr, raw: [0; 5], len: 0, read };

    let first = cur.next();
    let opcode = match PREBYTES.contains(&first) {
        true  => Opcode { page: Some(first), byte: cur.next() },
        false => Opcode { page: None, byte: first },
    };
    let info = lookup(opcode).ok_or(opcode)?;

    let operand = match info.mode {
        Mode::Inherent => Operand::None,
        Mode::Imm8 => Operand::Immediate(cur.next().into()),
        Mode::Imm16 => Operand::Immediate(cur.next16()),
        Mode::Extended => Operand::Memory { addr: cur.next16(), offset: None },
        Mode::Direct | Mode::IndexedX | Mode::IndexedY => {
            let (addr, offset) = cur.addr(index_of(info.mode, x, y));
            Operand::Memory { addr, offset }
        },
        Mode::Relative => Operand::Relative(cur.rel()),
        Mode::Bit2Dir | Mode::Bit2IndX | Mode::Bit2IndY => {
            let (addr, offset) = cur.addr(index_of(info.mode, x, y));
            Operand::BitMask { addr, offset, mask: cur.next() }
        },
        Mode::Bit3Dir | Mode::Bit3IndX | Mode::Bit3IndY => {
            let (addr, offset) = cur.addr(index_of(info.mode, x, y));
            let mask = cur.next();
            Operand::BitBranch { addr, offset, mask, target: cur.rel() }
        },
    };

    let Cursor { raw, len, .. } = cur;
    Ok(Instr { addr, opcode, info, operand, raw, len })
}

fn index_of(mode: Mode, x: u16, y: u16) -> Option<u16> {
    match mode {
        Mode::IndexedX | Mode::Bit2IndX | Mode::Bit3IndX => Some(x),
        Mode::IndexedY | Mode::Bit2IndY | Mode::Bit3IndY => Some(y),
        _ => None
    }
}

use Mode::*;
use Op::*;

const BRANCHES: [Op; 16] = [BRA, BRN, BHI, BLS, BHS, BLO, BNE, BEQ, BVC, BVS, BPL, BMI, BGE, BLT, BGT, BLE];
const UNARY_A: [Option<Op>; 16] = [
    Some(NEGA), None, None, Some(COMA), Some(LSRA), None, Some(RORA), Some(ASRA),
    Some(ASLA), Some(ROLA), Some(DECA), None, Some(INCA), Some(TSTA), None, Some(CLRA),
];
const UNARY_B: [Option<Op>; 16] = [
    Some(NEGB), None, None, Some(COMB), Some(LSRB), None, Some(RORB), Some(ASRB),
    Some(ASLB), Some(ROLB), Some(DECB), None, Some(INCB), Some(TSTB), None, Some(CLRB),
];
const UNARY_MEM: [Option<Op>; 16] = [
    Some(NEG), None, None, Some(COM), Some(LSR), None, Some(ROR), Some(ASR),
    Some(ASL), Some(ROL), Some(DEC), None, Some(INC), Some(TST), Some(JMP), Some(CLR),
];
const ACC_A: [Op; 12] = [SUBA, CMPA, SBCA, SUBD, ANDA, BITA, LDAA, STAA, EORA, ADCA, ORAA, ADDA];
const ACC_B: [Op; 12] = [SUBB, CMPB, SBCB, ADDD, ANDB, BITB, LDAB, STAB, EORB, ADCB, ORAB, ADDB];

/// Looks up an opcode in the instruction table.
///
/// Returns `None` for unassigned encodings (the CPU treats these as illegal operations).
pub fn lookup(opcode: Opcode) -> Option<OpInfo> {
    let (op, mode, cycles) = match opcode.page {
        None       => page0(opcode.byte)?,
        Some(0x18) => page18(opcode.byte)?,
        Some(0x1A) => page1a(opcode.byte)?,
        Some(0xCD) => pagecd(opcode.byte)?,
        Some(_)    => return None,
    };
    Some(OpInfo { op, mode, cycles })
}

// Rows 0x6x/0x7x (and their 0x18-page counterparts).
fn unary_mem(byte: u8, mode: Mode, cycles: u8, jmp_cycles: u8) -> Option<(Op, Mode, u8)> {
    let op = UNARY_MEM[usize::from(byte & 0x0F)]?;
    Some((op, mode, if op == JMP { jmp_cycles } else { cycles }))
}

// Columns 0x0-0xB of rows 0x8x-0xFx.
// `mode` is the row's memory mode; `None` for the immediate row.
fn accumulator(byte: u8, mode: Option<Mode>, cycles: u8, wide_cycles: u8) -> Option<(Op, Mode, u8)> {
    let lo = usize::from(byte & 0x0F);
    let op = match byte >= 0xC0 {
        false => ACC_A.get(lo),
        true  => ACC_B.get(lo),
    }.copied()?;

    match (op, mode) {
        (STAA | STAB, None) => None,
        (SUBD | ADDD, m) => Some((op, m.unwrap_or(Imm16), wide_cycles)),
        (_, m) => Some((op, m.unwrap_or(Imm8), cycles)),
    }
}

fn page0(byte: u8) -> Option<(Op, Mode, u8)> {
    let lo = usize::from(byte & 0x0F);
    let entry = match byte {
        0x00 => (TEST, Inherent, 1),
        0x01 => (NOP,  Inherent, 2),
        0x02 => (IDIV, Inherent, 41),
        0x03 => (FDIV, Inherent, 41),
        0x04 => (LSRD, Inherent, 3),
        0x05 => (LSLD, Inherent, 3),
        0x06 => (TAP,  Inherent, 2),
        0x07 => (TPA,  Inherent, 2),
        0x08 => (INX,  Inherent, 3),
        0x09 => (DEX,  Inherent, 3),
        0x0A => (CLV,  Inherent, 2),
        0x0B => (SEV,  Inherent, 2),
        0x0C => (CLC,  Inherent, 2),
        0x0D => (SEC,  Inherent, 2),
        0x0E => (CLI,  Inherent, 2),
        0x0F => (SEI,  Inherent, 2),
        0x10 => (SBA,  Inherent, 2),
        0x11 => (CBA,  Inherent, 2),
        0x12 => (BRSET, Bit3Dir, 6),
        0x13 => (BRCLR, Bit3Dir, 6),
        0x14 => (BSET, Bit2Dir, 6),
        0x15 => (BCLR, Bit2Dir, 6),
        0x16 => (TAB,  Inherent, 2),
        0x17 => (TBA,  Inherent, 2),
        0x19 => (DAA,  Inherent, 2),
        0x1B => (ABA,  Inherent, 2),
        0x1C => (BSET, Bit2IndX, 7),
        0x1D => (BCLR, Bit2IndX, 7),
        0x1E => (BRSET, Bit3IndX, 7),
        0x1F => (BRCLR, Bit3IndX, 7),
        0x20..=0x2F => (BRANCHES[lo], Relative, 3),
        0x30 => (TSX,  Inherent, 3),
        0x31 => (INS,  Inherent, 3),
        0x32 => (PULA, Inherent, 4),
        0x33 => (PULB, Inherent, 4),
        0x34 => (DES,  Inherent, 3),
        0x35 => (TXS,  Inherent, 3),
        0x36 => (PSHA, Inherent, 3),
        0x37 => (PSHB, Inherent, 3),
        0x38 => (PULX, Inherent, 5),
        0x39 => (RTS,  Inherent, 5),
        0x3A => (ABX,  Inherent, 3),
        0x3B => (RTI,  Inherent, 12),
        0x3C => (PSHX, Inherent, 4),
        0x3D => (MUL,  Inherent, 10),
        0x3E => (WAI,  Inherent, 1),
        0x3F => (SWI,  Inherent, 14),
        0x40..=0x4F => (UNARY_A[lo]?, Inherent, 2),
        0x50..=0x5F => (UNARY_B[lo]?, Inherent, 2),
        0x60..=0x6F => unary_mem(byte, IndexedX, 6, 3)?,
        0x70..=0x7F => unary_mem(byte, Extended, 6, 3)?,
        0x8C => (CPX,  Imm16, 4),
        0x8D => (BSR,  Relative, 6),
        0x8E => (LDS,  Imm16, 3),
        0x8F => (XGDX, Inherent, 3),
        0x9C => (CPX,  Direct, 5),
        0x9D => (JSR,  Direct, 5),
        0x9E => (LDS,  Direct, 4),
        0x9F => (STS,  Direct, 4),
        0xAC => (CPX,  IndexedX, 6),
        0xAD => (JSR,  IndexedX, 6),
        0xAE => (LDS,  IndexedX, 5),
        0xAF => (STS,  IndexedX, 5),
        0xBC => (CPX,  Extended, 6),
        0xBD => (JSR,  Extended, 6),
        0xBE => (LDS,  Extended, 5),
        0xBF => (STS,  Extended, 5),
        0xCC => (LDD,  Imm16, 3),
        0xCE => (LDX,  Imm16, 3),
        0xCF => (STOP, Inherent, 2),
        0xDC => (LDD,  Direct, 4),
        0xDD => (STD,  Direct, 4),
        0xDE => (LDX,  Direct, 4),
        0xDF => (STX,  Direct, 4),
        0xEC => (LDD,  IndexedX, 5),
        0xED => (STD,  IndexedX, 5),
        0xEE => (LDX,  IndexedX, 5),
        0xEF => (STX,  IndexedX, 5),
        0xFC => (LDD,  Extended, 5),
        0xFD => (STD,  Extended, 5),
        0xFE => (LDX,  Extended, 5),
        0xFF => (STX,  Extended, 5),
        0x80..=0x8B | 0xC0..=0xCB => accumulator(byte, None, 2, 4)?,
        0x90..=0x9B | 0xD0..=0xDB => accumulator(byte, Some(Direct), 3, 5)?,
        0xA0..=0xAB | 0xE0..=0xEB => accumulator(byte, Some(IndexedX), 4, 6)?,
        0xB0..=0xBB | 0xF0..=0xFB => accumulator(byte, Some(Extended), 4, 6)?,
        _ => return None,
    };
    Some(entry)
}

fn page18(byte: u8) -> Option<(Op, Mode, u8)> {
    let entry = match byte {
        0x08 => (INY,  Inherent, 4),
        0x09 => (DEY,  Inherent, 4),
        0x1C => (BSET, Bit2IndY, 8),
        0x1D => (BCLR, Bit2IndY, 8),
        0x1E => (BRSET, Bit3IndY, 8),
        0x1F => (BRCLR, Bit3IndY, 8),
        0x30 => (TSY,  Inherent, 4),
        0x35 => (TYS,  Inherent, 4),
        0x38 => (PULY, Inherent, 6),
        0x3A => (ABY,  Inherent, 4),
        0x3C => (PSHY, Inherent, 5),
        0x60..=0x6F => unary_mem(byte, IndexedY, 7, 4)?,
        0x8C => (CPY,  Imm16, 5),
        0x8F => (XGDY, Inherent, 4),
        0x9C => (CPY,  Direct, 6),
        0xA0..=0xAB | 0xE0..=0xEB => accumulator(byte, Some(IndexedY), 5, 7)?,
        0xAC => (CPY,  IndexedY, 7),
        0xAD => (JSR,  IndexedY, 7),
        0xAE => (LDS,  IndexedY, 6),
        0xAF => (STS,  IndexedY, 6),
        0xBC => (CPY,  Extended, 7),
        0xCE => (LDY,  Imm16, 4),
        0xDE => (LDY,  Direct, 5),
        0xDF => (STY,  Direct, 5),
        0xEC => (LDD,  IndexedY, 6),
        0xED => (STD,  IndexedY, 6),
        0xEE => (LDY,  IndexedY, 6),
        0xEF => (STY,  IndexedY, 6),
        0xFE => (LDY,  Extended, 6),
        0xFF => (STY,  Extended, 6),
        _ => return None,
    };
    Some(entry)
}

fn page1a(byte: u8) -> Option<(Op, Mode, u8)> {
    let entry = match byte {
        0x83 => (CPD, Imm16, 5),
        0x93 => (CPD, Direct, 6),
        0xA3 => (CPD, IndexedX, 7),
        0xAC => (CPY, IndexedX, 7),
        0xB3 => (CPD, Extended, 7),
        0xEE => (LDY, IndexedX, 6),
        0xEF => (STY, IndexedX, 6),
        _ => return None,
    };
    Some(entry)
}

fn pagecd(byte: u8) -> Option<(Op, Mode, u8)> {
    let entry = match byte {
        0xA3 => (CPD, IndexedY, 7),
        0xAC => (CPX, IndexedY, 7),
        0xEE => (LDX, IndexedY, 6),
        0xEF => (STX, IndexedY, 6),
        _ => return None,
    };
    Some(entry)
}
