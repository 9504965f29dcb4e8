//! Bytecode files
//!
//! Writes a contiguous range of compiled units to a byte stream and reads
//! it back. Layout (little endian):
//!
//! ```text
//! "NLBC" | version: u16 | unit_count: u32 | unit*
//! unit  = filename: str | n: u32 | n × instruction | n × line: u32
//!         | m: u32 | m × symbol: str | k: u32 | k × child_offset: u32
//! str   = len: u32 | UTF-8 bytes
//! ```

use std::io::{self, Read, Write};

use thiserror::Error;

use super::format::{CompiledUnit, Instruction, INSTRUCTION_SIZE};

/// File magic for compiled units
pub const MAGIC: &[u8; 4] = b"NLBC";

/// Current bytecode format version
pub const FORMAT_VERSION: u16 = 1;

/// Upper bound for any single length field, so a corrupt header cannot
/// trigger a huge allocation.
const MAX_LEN: u32 = 1 << 24;

/// Errors produced while reading a bytecode stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a compiled unit file (bad magic)")]
    BadMagic,

    #[error("unsupported bytecode version {found} (expected {})", FORMAT_VERSION)]
    UnsupportedVersion { found: u16 },

    #[error("file contains no units")]
    Empty,

    #[error("invalid instruction {index} in unit {unit}")]
    InvalidInstruction { unit: usize, index: usize },

    #[error("unit {unit} refers to child offset {offset} outside the file")]
    InvalidChild { unit: usize, offset: u32 },

    #[error("length field {0} exceeds limit")]
    TooLarge(u32),

    #[error("invalid UTF-8 in string table")]
    InvalidUtf8,
}

/// Write `units` as one bytecode stream.
///
/// The first unit is the root: it is what gets invoked after reading.
pub fn dump_units<W: Write>(units: &[CompiledUnit], writer: &mut W) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    write_len(writer, units.len())?;

    for unit in units {
        write_str(writer, unit.filename.as_deref().unwrap_or(""))?;

        write_len(writer, unit.instructions.len())?;
        for instr in &unit.instructions {
            writer.write_all(&instr.encode())?;
        }
        for pc in 0..unit.instructions.len() {
            writer.write_all(&unit.line_at(pc).to_le_bytes())?;
        }

        write_len(writer, unit.symbols.len())?;
        for symbol in &unit.symbols {
            write_str(writer, symbol)?;
        }

        write_len(writer, unit.children.len())?;
        for child in &unit.children {
            writer.write_all(&child.to_le_bytes())?;
        }
    }

    Ok(())
}

/// Encode `units` into a fresh buffer
pub fn dump_to_vec(units: &[CompiledUnit]) -> Vec<u8> {
    let mut bytes = Vec::new();
    // Writing into a Vec cannot fail
    let _ = dump_units(units, &mut bytes);
    bytes
}

/// Read a whole bytecode stream.
///
/// Either every unit decodes or none is returned.
pub fn read_units<R: Read>(reader: &mut R) -> Result<Vec<CompiledUnit>, DecodeError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let count = read_len(reader)?;
    if count == 0 {
        return Err(DecodeError::Empty);
    }

    let mut units = Vec::with_capacity(count);
    for unit_idx in 0..count {
        let filename = read_str(reader)?;

        let n = read_len(reader)?;
        let mut instructions = Vec::with_capacity(n);
        let mut buf = [0u8; INSTRUCTION_SIZE];
        for index in 0..n {
            reader.read_exact(&mut buf)?;
            let instr = Instruction::decode(&buf).ok_or(DecodeError::InvalidInstruction {
                unit: unit_idx,
                index,
            })?;
            instructions.push(instr);
        }

        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            lines.push(read_u32(reader)?);
        }

        let m = read_len(reader)?;
        let mut symbols = Vec::with_capacity(m);
        for _ in 0..m {
            symbols.push(read_str(reader)?);
        }

        let k = read_len(reader)?;
        let mut children = Vec::with_capacity(k);
        for _ in 0..k {
            let offset = read_u32(reader)?;
            if offset == 0 || unit_idx + offset as usize >= count {
                return Err(DecodeError::InvalidChild {
                    unit: unit_idx,
                    offset,
                });
            }
            children.push(offset);
        }

        units.push(CompiledUnit {
            filename: (!filename.is_empty()).then_some(filename),
            instructions,
            lines,
            symbols,
            children,
        });
    }

    Ok(units)
}

fn write_len<W: Write>(writer: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "table too large"))?;
    writer.write_all(&len.to_le_bytes())
}

fn write_str<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_len(writer, s.len())?;
    writer.write_all(s.as_bytes())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, DecodeError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R) -> Result<usize, DecodeError> {
    let len = read_u32(reader)?;
    if len > MAX_LEN {
        return Err(DecodeError::TooLarge(len));
    }
    Ok(len as usize)
}

fn read_str<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let len = read_len(reader)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}
