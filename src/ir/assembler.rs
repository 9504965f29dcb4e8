//! Assembler and Disassembler for unit source
//!
//! Converts `.nl` source text into compiled units.
//!
//! ```text
//! ; comments start with ';' or '#'
//! .def greet            ; function body, becomes its own unit
//!     str r1, "hello"
//!     call r0, print, r1, 1
//!     ret r0
//! .end
//!     str r1, "util"
//!     call r0, require, r1, 1
//!     jf r0, done
//!     call r0, greet
//! done:
//! ```
//!
//! Top-level code ends with an implicit `halt`; a function body without a
//! trailing `ret` ends with an implicit `nil r0; ret r0`.

use std::collections::HashMap;

use thiserror::Error;

use super::compiler::{CompileError, CompileMode, Compiler};
use super::format::{AluOp, CompiledUnit, Instruction, Opcode, NUM_REGISTERS};
use crate::interp::{self, Proc};
use crate::runtime::Runtime;

#[derive(Debug, Error)]
pub enum AsmError {
    #[error("Invalid opcode at line {line}: {mnemonic}")]
    InvalidOpcode { line: usize, mnemonic: String },
    #[error("Invalid register at line {line}: {operand}")]
    InvalidRegister { line: usize, operand: String },
    #[error("Invalid immediate value at line {line}: {operand}")]
    InvalidImmediate { line: usize, operand: String },
    #[error("Missing operand at line {0}")]
    MissingOperand(usize),
    #[error("Undefined label at line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },
    #[error("Duplicate label at line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },
}

/// One unit under construction
struct UnitBuilder {
    unit: CompiledUnit,
    labels: HashMap<String, usize>,
    pending_labels: Vec<(usize, String, usize)>, // (instruction index, label, line)
    /// Set for `.def` bodies
    function: Option<String>,
    last_line: usize,
}

impl UnitBuilder {
    fn new(filename: &str, function: Option<String>) -> Self {
        let unit = CompiledUnit {
            filename: Some(filename.to_string()),
            ..CompiledUnit::default()
        };
        Self {
            unit,
            labels: HashMap::new(),
            pending_labels: Vec::new(),
            function,
            last_line: 0,
        }
    }

    fn emit(&mut self, instr: Instruction, line: usize) {
        self.unit.push(instr, line as u32);
        self.last_line = line;
    }

    fn emit_jump(&mut self, instr: Instruction, label: &str, line: usize) {
        self.pending_labels
            .push((self.unit.instructions.len(), label.to_string(), line));
        self.emit(instr, line);
    }

    fn define_label(&mut self, label: &str, line: usize) -> Result<(), AsmError> {
        if self.labels.contains_key(label) {
            return Err(AsmError::DuplicateLabel {
                line,
                label: label.to_string(),
            });
        }
        self.labels
            .insert(label.to_string(), self.unit.instructions.len());
        self.last_line = line;
        Ok(())
    }

    fn finish(mut self) -> Result<CompiledUnit, AsmError> {
        for (idx, label, line) in std::mem::take(&mut self.pending_labels) {
            let target = *self
                .labels
                .get(&label)
                .ok_or(AsmError::UndefinedLabel { line, label })?;
            self.unit.instructions[idx].imm = target as i32;
        }

        let last = self.unit.instructions.last().map(|i| i.opcode);
        let line = self.last_line;
        if self.function.is_none() {
            if last != Some(Opcode::Halt) {
                self.emit(Instruction::bare(Opcode::Halt), line);
            }
        } else if last != Some(Opcode::Ret) {
            self.emit(Instruction::new(Opcode::LoadNil, 0, 0, 0, 0), line);
            self.emit(Instruction::new(Opcode::Ret, 0, 0, 0, 0), line);
        }

        Ok(self.unit)
    }
}

/// Assembler for unit source
#[derive(Debug, Clone, Default)]
pub struct Assembler;

impl Assembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble source text into units.
    ///
    /// The first unit is the top-level body; `.def` bodies follow in order of
    /// appearance and are listed as its children.
    pub fn assemble(&self, source: &str, filename: &str) -> Result<Vec<CompiledUnit>, AsmError> {
        let mut top = UnitBuilder::new(filename, None);
        let mut functions: Vec<CompiledUnit> = Vec::new();
        let mut current: Option<UnitBuilder> = None;
        let mut line_count = 0;

        for (idx, raw) in source.lines().enumerate() {
            let line_num = idx + 1;
            line_count = line_num;
            let line = strip_comment(raw).trim();

            if line.is_empty() {
                continue;
            }

            if let Some(directive) = line.strip_prefix('.') {
                let mut parts = directive.split_whitespace();
                match parts.next() {
                    Some("def") => {
                        if current.is_some() {
                            return Err(AsmError::ParseError {
                                line: line_num,
                                message: "nested .def".to_string(),
                            });
                        }
                        let name = parts.next().ok_or(AsmError::MissingOperand(line_num))?;
                        let name = identifier(name, line_num)?;
                        let child = u8::try_from(functions.len()).map_err(|_| {
                            AsmError::ParseError {
                                line: line_num,
                                message: "too many functions in one file".to_string(),
                            }
                        })?;
                        let sym = top.unit.intern(name);
                        top.emit(
                            Instruction::with_imm(Opcode::Def, 0, 0, child, sym as i32),
                            line_num,
                        );
                        current = Some(UnitBuilder::new(filename, Some(name.to_string())));
                    }
                    Some("end") => {
                        let builder = current.take().ok_or(AsmError::ParseError {
                            line: line_num,
                            message: ".end without .def".to_string(),
                        })?;
                        functions.push(builder.finish()?);
                    }
                    _ => {
                        return Err(AsmError::InvalidOpcode {
                            line: line_num,
                            mnemonic: line.to_string(),
                        })
                    }
                }
                continue;
            }

            let builder = match current.as_mut() {
                Some(builder) => builder,
                None => &mut top,
            };

            if let Some(label) = line.strip_suffix(':') {
                if is_identifier(label) {
                    builder.define_label(label, line_num)?;
                    continue;
                }
            }

            parse_instruction(builder, line, line_num)?;
        }

        if let Some(builder) = current {
            return Err(AsmError::ParseError {
                line: line_count,
                message: format!(
                    "unterminated .def {}",
                    builder.function.unwrap_or_default()
                ),
            });
        }

        let mut root = top.finish()?;
        root.children = (1..=functions.len() as u32).collect();

        let mut units = Vec::with_capacity(functions.len() + 1);
        units.push(root);
        units.extend(functions);
        Ok(units)
    }
}

impl Compiler for Assembler {
    fn compile(
        &self,
        rt: &mut Runtime,
        source: &str,
        filename: &str,
        mode: CompileMode,
    ) -> Result<usize, CompileError> {
        let units = self.assemble(source, filename)?;
        let root = rt.append_units(units);

        if mode == CompileMode::Execute {
            let receiver = rt.top_self();
            interp::invoke(rt, &Proc::top_level(root), &[], receiver)
                .map_err(CompileError::Raised)?;
        }

        Ok(root)
    }
}

fn parse_instruction(b: &mut UnitBuilder, line: &str, line_num: usize) -> Result<(), AsmError> {
    let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
        Some((m, r)) => (m, r.trim()),
        None => (line, ""),
    };
    let ops = split_operands(rest, line_num)?;
    let op = |i: usize| {
        ops.get(i)
            .map(String::as_str)
            .ok_or(AsmError::MissingOperand(line_num))
    };

    let instr = match mnemonic.to_ascii_lowercase().as_str() {
        "nop" => Instruction::bare(Opcode::Nop),
        "halt" => Instruction::bare(Opcode::Halt),
        "mov" => {
            let rd = register(op(0)?, line_num)?;
            let rs = register(op(1)?, line_num)?;
            Instruction::new(Opcode::Mov, rd, rs, 0, 0)
        }
        "int" => {
            let rd = register(op(0)?, line_num)?;
            let imm = immediate(op(1)?, line_num)?;
            Instruction::with_imm(Opcode::LoadInt, rd, 0, 0, imm)
        }
        "nil" => Instruction::new(Opcode::LoadNil, register(op(0)?, line_num)?, 0, 0, 0),
        "self" => Instruction::new(Opcode::LoadSelf, register(op(0)?, line_num)?, 0, 0, 0),
        "bool" => {
            let rd = register(op(0)?, line_num)?;
            let value = match op(1)? {
                "true" => 1,
                "false" => 0,
                other => {
                    return Err(AsmError::InvalidImmediate {
                        line: line_num,
                        operand: other.to_string(),
                    })
                }
            };
            Instruction::with_imm(Opcode::LoadBool, rd, 0, 0, value)
        }
        "str" => {
            let rd = register(op(0)?, line_num)?;
            let text = string_literal(op(1)?, line_num)?;
            let sym = b.unit.intern(&text);
            Instruction::with_imm(Opcode::LoadStr, rd, 0, 0, sym as i32)
        }
        alu @ ("add" | "sub" | "mul" | "eq" | "lt") => {
            let mode = match alu {
                "add" => AluOp::Add,
                "sub" => AluOp::Sub,
                "mul" => AluOp::Mul,
                "eq" => AluOp::Eq,
                _ => AluOp::Lt,
            };
            let rd = register(op(0)?, line_num)?;
            let rs1 = register(op(1)?, line_num)?;
            let rs2 = register(op(2)?, line_num)?;
            Instruction::new(Opcode::Alu, rd, rs1, rs2, mode as u8)
        }
        "gget" => {
            let rd = register(op(0)?, line_num)?;
            let sym = b.unit.intern(identifier(op(1)?, line_num)?);
            Instruction::with_imm(Opcode::GetGlobal, rd, 0, 0, sym as i32)
        }
        "gset" => {
            let name = identifier(op(0)?, line_num)?;
            let rs = register(op(1)?, line_num)?;
            let sym = b.unit.intern(name);
            Instruction::with_imm(Opcode::SetGlobal, 0, rs, 0, sym as i32)
        }
        "call" => {
            let rd = register(op(0)?, line_num)?;
            let name = identifier(op(1)?, line_num)?;
            let base = ops
                .get(2)
                .map(|s| register(s, line_num))
                .transpose()?;
            let argc = match ops.get(3) {
                Some(s) => s.parse::<u8>().map_err(|_| AsmError::InvalidImmediate {
                    line: line_num,
                    operand: s.clone(),
                })?,
                None => u8::from(base.is_some()),
            };
            let base = base.unwrap_or(0);
            if base as usize + argc as usize > NUM_REGISTERS {
                return Err(AsmError::ParseError {
                    line: line_num,
                    message: format!("arguments r{}..+{} exceed the register file", base, argc),
                });
            }
            let sym = b.unit.intern(name);
            Instruction::with_imm(Opcode::Call, rd, base, argc, sym as i32)
        }
        "jmp" => {
            let label = identifier(op(0)?, line_num)?;
            b.emit_jump(Instruction::with_imm(Opcode::Jump, 0, 0, 0, 0), label, line_num);
            return Ok(());
        }
        cond @ ("jt" | "jf") => {
            let opcode = if cond == "jt" {
                Opcode::JumpIf
            } else {
                Opcode::JumpUnless
            };
            let rs = register(op(0)?, line_num)?;
            let label = identifier(op(1)?, line_num)?;
            b.emit_jump(Instruction::with_imm(opcode, 0, rs, 0, 0), label, line_num);
            return Ok(());
        }
        "raise" => Instruction::new(Opcode::Raise, 0, register(op(0)?, line_num)?, 0, 0),
        "ret" => {
            let rs = match ops.first() {
                Some(s) => register(s, line_num)?,
                None => 0,
            };
            Instruction::new(Opcode::Ret, 0, rs, 0, 0)
        }
        _ => {
            return Err(AsmError::InvalidOpcode {
                line: line_num,
                mnemonic: mnemonic.to_string(),
            })
        }
    };

    b.emit(instr, line_num);
    Ok(())
}

/// Drop a trailing `;`/`#` comment, ignoring markers inside string literals
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else {
            match c {
                '"' => in_string = true,
                ';' | '#' => return &line[..i],
                _ => {}
            }
        }
    }
    line
}

/// Split on commas outside string literals
fn split_operands(rest: &str, line: usize) -> Result<Vec<String>, AsmError> {
    let mut ops = Vec::new();
    if rest.is_empty() {
        return Ok(ops);
    }

    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in rest.chars() {
        if in_string {
            current.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            ',' => ops.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }

    if in_string {
        return Err(AsmError::ParseError {
            line,
            message: "unterminated string literal".to_string(),
        });
    }
    ops.push(current.trim().to_string());
    Ok(ops)
}

fn register(s: &str, line: usize) -> Result<u8, AsmError> {
    let invalid = || AsmError::InvalidRegister {
        line,
        operand: s.to_string(),
    };
    let num = s
        .strip_prefix('r')
        .or_else(|| s.strip_prefix('R'))
        .ok_or_else(invalid)?;
    match num.parse::<u8>() {
        Ok(n) if (n as usize) < NUM_REGISTERS => Ok(n),
        _ => Err(invalid()),
    }
}

fn immediate(s: &str, line: usize) -> Result<i32, AsmError> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, s),
    };
    let value = match body.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => body.parse::<i64>().ok(),
    };
    value
        .map(|v| if negative { -v } else { v })
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| AsmError::InvalidImmediate {
            line,
            operand: s.to_string(),
        })
}

fn string_literal(s: &str, line: usize) -> Result<String, AsmError> {
    let inner = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| s.len() >= 2)
        .ok_or_else(|| AsmError::ParseError {
            line,
            message: format!("expected string literal, found {}", s),
        })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            other => {
                return Err(AsmError::ParseError {
                    line,
                    message: format!("unknown escape \\{}", other.unwrap_or(' ')),
                })
            }
        }
    }
    Ok(out)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '?' | '!'))
}

fn identifier(s: &str, line: usize) -> Result<&str, AsmError> {
    if is_identifier(s) {
        Ok(s)
    } else {
        Err(AsmError::ParseError {
            line,
            message: format!("invalid name: {}", s),
        })
    }
}

/// Disassembler for compiled units
pub struct Disassembler {
    show_lines: bool,
}

impl Disassembler {
    pub fn new() -> Self {
        Self { show_lines: true }
    }

    /// Show source line numbers
    pub fn with_lines(mut self, show: bool) -> Self {
        self.show_lines = show;
        self
    }

    /// Disassemble a group of units as read from one file
    pub fn disassemble(&self, units: &[CompiledUnit]) -> String {
        let mut output = String::new();
        for (idx, unit) in units.iter().enumerate() {
            output.push_str(&format!(
                "; unit {} ({})\n",
                idx,
                unit.filename.as_deref().unwrap_or("-")
            ));
            output.push_str(&self.disassemble_unit(unit));
        }
        output
    }

    pub fn disassemble_unit(&self, unit: &CompiledUnit) -> String {
        let mut output = String::new();
        for (pc, instr) in unit.instructions.iter().enumerate() {
            if self.show_lines {
                output.push_str(&format!("{:4} {:4}  ", pc, unit.line_at(pc)));
            } else {
                output.push_str(&format!("{:4}  ", pc));
            }
            output.push_str(&instr.to_string());
            if instr.opcode.has_symbol_operand() {
                if let Some(sym) = unit.symbol(instr.imm) {
                    output.push_str(&format!("  ; @{} = {:?}", instr.imm, sym));
                }
            }
            output.push('\n');
        }
        output
    }
}

impl Default for Disassembler {
    fn default() -> Self {
        Self::new()
    }
}
