//! Unit Format Specification
//!
//! Register-machine instructions grouped into compiled units.
//!
//! # Instruction Encoding
//!
//! Every instruction is 8 bytes:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┬────────┬──────────────────────┐
//! │  Opcode  │  RegDst  │  RegSrc1 │  RegSrc2 │   Mode   │ spare  │  32-bit Immediate    │
//! │  6 bits  │  5 bits  │  5 bits  │  5 bits  │  8 bits  │ 3 bits │  32 bits             │
//! └──────────┴──────────┴──────────┴──────────┴──────────┴────────┴──────────────────────┘
//! ```
//!
//! Immediates index the owning unit's symbol table for string operands
//! (`str`, `gget`, `gset`, `call`, `def`), hold the target instruction index
//! for jumps, and hold the literal for `int`/`bool`.

use std::fmt;

/// Number of registers in every frame
pub const NUM_REGISTERS: usize = 32;

/// Size of one encoded instruction in bytes
pub const INSTRUCTION_SIZE: usize = 8;

/// Opcode definitions (fits in 6 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,
    /// rd = rs1
    Mov = 0x01,
    /// rd = imm
    LoadInt = 0x02,
    /// rd = nil
    LoadNil = 0x03,
    /// rd = (imm != 0)
    LoadBool = 0x04,
    /// rd = symbols[imm]
    LoadStr = 0x05,
    /// rd = receiver of the current frame
    LoadSelf = 0x06,
    /// rd = rs1 <op> rs2
    Alu = 0x07,
    /// rd = globals[symbols[imm]]
    GetGlobal = 0x08,
    /// globals[symbols[imm]] = rs1
    SetGlobal = 0x09,
    /// rd = symbols[imm](rs1 .. rs1 + mode)
    Call = 0x0A,
    /// functions[symbols[imm]] = unit at children[mode]
    Def = 0x0B,
    /// pc = imm
    Jump = 0x0C,
    /// if rs1 is truthy: pc = imm
    JumpIf = 0x0D,
    /// if rs1 is falsy: pc = imm
    JumpUnless = 0x0E,
    /// Raise rs1 as a RuntimeError
    Raise = 0x0F,
    /// Return rs1 to the caller
    Ret = 0x10,
    /// Stop the host
    Halt = 0x11,
}

impl Opcode {
    /// Convert from u8, returning None for invalid opcodes
    pub fn from_u8(val: u8) -> Option<Self> {
        if val <= 0x11 {
            Some(unsafe { std::mem::transmute::<u8, Opcode>(val) })
        } else {
            None
        }
    }

    /// Get the mnemonic for this opcode
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Mov => "mov",
            Opcode::LoadInt => "int",
            Opcode::LoadNil => "nil",
            Opcode::LoadBool => "bool",
            Opcode::LoadStr => "str",
            Opcode::LoadSelf => "self",
            Opcode::Alu => "alu",
            Opcode::GetGlobal => "gget",
            Opcode::SetGlobal => "gset",
            Opcode::Call => "call",
            Opcode::Def => "def",
            Opcode::Jump => "jmp",
            Opcode::JumpIf => "jt",
            Opcode::JumpUnless => "jf",
            Opcode::Raise => "raise",
            Opcode::Ret => "ret",
            Opcode::Halt => "halt",
        }
    }

    /// Whether the immediate is an index into the unit's symbol table
    pub fn has_symbol_operand(&self) -> bool {
        matches!(
            self,
            Opcode::LoadStr | Opcode::GetGlobal | Opcode::SetGlobal | Opcode::Call | Opcode::Def
        )
    }
}

/// ALU operation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AluOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Eq = 3,
    Lt = 4,
}

impl AluOp {
    pub fn from_u8(val: u8) -> Option<Self> {
        if val <= 4 {
            Some(unsafe { std::mem::transmute::<u8, AluOp>(val) })
        } else {
            None
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Mul => "mul",
            AluOp::Eq => "eq",
            AluOp::Lt => "lt",
        }
    }
}

/// Decoded instruction representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub rd: u8,   // Destination register
    pub rs1: u8,  // Source register 1
    pub rs2: u8,  // Source register 2
    pub mode: u8, // ALU op, argument count, child index
    pub imm: i32,
}

impl Instruction {
    /// Create a new instruction without immediate
    pub fn new(opcode: Opcode, rd: u8, rs1: u8, rs2: u8, mode: u8) -> Self {
        Self {
            opcode,
            rd,
            rs1,
            rs2,
            mode,
            imm: 0,
        }
    }

    /// Create a new instruction with immediate
    pub fn with_imm(opcode: Opcode, rd: u8, rs1: u8, mode: u8, imm: i32) -> Self {
        Self {
            opcode,
            rd,
            rs1,
            rs2: 0,
            mode,
            imm,
        }
    }

    /// Instruction with no operands (`nop`, `halt`)
    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0, 0, 0)
    }

    /// Encode to bytes
    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let word1 = ((self.opcode as u32) << 26)
            | (((self.rd as u32) & 0x1F) << 21)
            | (((self.rs1 as u32) & 0x1F) << 16)
            | (((self.rs2 as u32) & 0x1F) << 11)
            | ((self.mode as u32) << 3);

        let mut bytes = [0u8; INSTRUCTION_SIZE];
        bytes[..4].copy_from_slice(&word1.to_le_bytes());
        bytes[4..].copy_from_slice(&self.imm.to_le_bytes());
        bytes
    }

    /// Decode from bytes
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < INSTRUCTION_SIZE {
            return None;
        }

        let word1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        let opcode = Opcode::from_u8(((word1 >> 26) & 0x3F) as u8)?;
        let rd = ((word1 >> 21) & 0x1F) as u8;
        let rs1 = ((word1 >> 16) & 0x1F) as u8;
        let rs2 = ((word1 >> 11) & 0x1F) as u8;
        let mode = ((word1 >> 3) & 0xFF) as u8;
        let imm = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        Some(Self {
            opcode,
            rd,
            rs1,
            rs2,
            mode,
            imm,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Opcode::Alu => {
                let op = AluOp::from_u8(self.mode).map_or("alu.?", |op| op.mnemonic());
                write!(f, "{} r{}, r{}, r{}", op, self.rd, self.rs1, self.rs2)
            }
            Opcode::Mov => write!(f, "mov r{}, r{}", self.rd, self.rs1),
            Opcode::LoadInt => write!(f, "int r{}, {}", self.rd, self.imm),
            Opcode::LoadNil | Opcode::LoadSelf => {
                write!(f, "{} r{}", self.opcode.mnemonic(), self.rd)
            }
            Opcode::LoadBool => write!(f, "bool r{}, {}", self.rd, self.imm != 0),
            Opcode::LoadStr | Opcode::GetGlobal => {
                write!(f, "{} r{}, @{}", self.opcode.mnemonic(), self.rd, self.imm)
            }
            Opcode::SetGlobal => write!(f, "gset @{}, r{}", self.imm, self.rs1),
            Opcode::Call => write!(
                f,
                "call r{}, @{}, r{}, {}",
                self.rd, self.imm, self.rs1, self.mode
            ),
            Opcode::Def => write!(f, "def @{}, child{}", self.imm, self.mode),
            Opcode::Jump => write!(f, "jmp {}", self.imm),
            Opcode::JumpIf | Opcode::JumpUnless => {
                write!(f, "{} r{}, {}", self.opcode.mnemonic(), self.rs1, self.imm)
            }
            Opcode::Raise | Opcode::Ret => {
                write!(f, "{} r{}", self.opcode.mnemonic(), self.rs1)
            }
            Opcode::Nop | Opcode::Halt => write!(f, "{}", self.opcode.mnemonic()),
        }
    }
}

/// A compiled unit: one executable body plus the tables it refers to.
///
/// Units are stored contiguously in the runtime's unit table. `children`
/// holds offsets relative to the unit's own index, so a group of units keeps
/// its internal references when it is appended at a different position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Attribution path reported in backtraces
    pub filename: Option<String>,
    pub instructions: Vec<Instruction>,
    /// Source line of each instruction (parallel to `instructions`)
    pub lines: Vec<u32>,
    pub symbols: Vec<String>,
    pub children: Vec<u32>,
}

impl CompiledUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction that came from `line`
    pub fn push(&mut self, instruction: Instruction, line: u32) {
        self.instructions.push(instruction);
        self.lines.push(line);
    }

    /// Index of `symbol` in the symbol table, adding it if needed
    pub fn intern(&mut self, symbol: &str) -> u32 {
        if let Some(idx) = self.symbols.iter().position(|s| s == symbol) {
            return idx as u32;
        }
        self.symbols.push(symbol.to_string());
        (self.symbols.len() - 1) as u32
    }

    /// Look up a symbol by immediate operand
    pub fn symbol(&self, idx: i32) -> Option<&str> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.symbols.get(i))
            .map(String::as_str)
    }

    /// Source line for the instruction at `pc`
    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }

    /// Rewrite a trailing `halt` into `nil r0; ret r0`.
    ///
    /// Top-level units end in `halt` so they can run standalone; a unit that
    /// is invoked as a procedure has to hand control back instead. Returns
    /// whether the unit was rewritten.
    pub fn finalize_for_invocation(&mut self) -> bool {
        let Some(last) = self.instructions.last_mut() else {
            return false;
        };
        if last.opcode != Opcode::Halt {
            return false;
        }

        *last = Instruction::new(Opcode::LoadNil, 0, 0, 0, 0);
        let line = self.lines.last().copied().unwrap_or(0);
        self.push(Instruction::new(Opcode::Ret, 0, 0, 0, 0), line);
        true
    }
}
