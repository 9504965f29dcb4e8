//! Executor for compiled units
//!
//! Runs one unit per frame with a fresh register file. Calls to user
//! functions recurse through [`invoke`], so module bodies that call
//! `require`/`load` re-enter the same runtime on the Rust call stack.

use super::stack::ensure_sufficient_stack;
use crate::ir::{AluOp, Instruction, Opcode, NUM_REGISTERS};
use crate::runtime::{Exception, Runtime, Value};

/// Maximum nesting of invoked frames before `SystemStackError`
pub const MAX_CALL_DEPTH: usize = 256;

/// Where a proc runs, as shown in backtraces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Module or script body
    TopLevel,
    /// Body of a `.def` function
    Function(String),
}

impl Scope {
    fn label(&self) -> &str {
        match self {
            Scope::TopLevel => "<main>",
            Scope::Function(name) => name,
        }
    }
}

/// A unit bound to the scope it executes in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proc {
    pub unit: usize,
    pub scope: Scope,
}

impl Proc {
    pub fn top_level(unit: usize) -> Self {
        Self {
            unit,
            scope: Scope::TopLevel,
        }
    }

    pub fn function(unit: usize, name: impl Into<String>) -> Self {
        Self {
            unit,
            scope: Scope::Function(name.into()),
        }
    }
}

/// Invoke `proc` with `args` in r1.. and `receiver` as `self`.
///
/// Returns the value of the `ret` that ended the frame, or nil if execution
/// ran off the end. A `halt` stops the host: the runtime is marked halted and
/// every active frame returns nil.
pub fn invoke(
    rt: &mut Runtime,
    proc: &Proc,
    args: &[Value],
    receiver: Value,
) -> Result<Value, Exception> {
    if rt.depth() >= MAX_CALL_DEPTH {
        return Err(Exception::new("SystemStackError", "stack level too deep"));
    }

    rt.enter_frame();
    let result = ensure_sufficient_stack(|| Frame::new(proc, args, receiver).run(rt));
    rt.leave_frame();
    result
}

enum Step {
    Continue,
    Return(Value),
}

struct Frame<'a> {
    proc: &'a Proc,
    registers: Vec<Value>,
    receiver: Value,
    pc: usize,
}

impl<'a> Frame<'a> {
    fn new(proc: &'a Proc, args: &[Value], receiver: Value) -> Self {
        let mut registers = vec![Value::Nil; NUM_REGISTERS];
        for (slot, arg) in registers.iter_mut().skip(1).zip(args) {
            *slot = arg.clone();
        }
        Self {
            proc,
            registers,
            receiver,
            pc: 0,
        }
    }

    fn run(&mut self, rt: &mut Runtime) -> Result<Value, Exception> {
        loop {
            let instr = {
                let unit = rt.unit(self.proc.unit).ok_or_else(|| {
                    Exception::runtime_error(format!("no unit at index {}", self.proc.unit))
                })?;
                match unit.instructions.get(self.pc) {
                    Some(instr) => *instr,
                    None => return Ok(Value::Nil),
                }
            };

            let pc = self.pc;
            self.pc += 1;

            match self.step(rt, instr) {
                Ok(Step::Continue) => {}
                Ok(Step::Return(value)) => return Ok(value),
                Err(mut exc) => {
                    exc.push_frame(self.location(rt, pc));
                    return Err(exc);
                }
            }
        }
    }

    fn step(&mut self, rt: &mut Runtime, instr: Instruction) -> Result<Step, Exception> {
        let rd = instr.rd as usize;
        let rs1 = instr.rs1 as usize;

        match instr.opcode {
            Opcode::Nop => {}
            Opcode::Mov => self.registers[rd] = self.registers[rs1].clone(),
            Opcode::LoadInt => self.registers[rd] = Value::Int(instr.imm as i64),
            Opcode::LoadNil => self.registers[rd] = Value::Nil,
            Opcode::LoadBool => self.registers[rd] = Value::Bool(instr.imm != 0),
            Opcode::LoadStr => {
                let value = Value::Str(self.symbol(rt, instr.imm)?);
                rt.arena_push(value.clone());
                self.registers[rd] = value;
            }
            Opcode::LoadSelf => self.registers[rd] = self.receiver.clone(),
            Opcode::Alu => {
                let op = AluOp::from_u8(instr.mode).ok_or_else(|| {
                    Exception::runtime_error(format!("invalid ALU mode {}", instr.mode))
                })?;
                let rs2 = instr.rs2 as usize;
                self.registers[rd] = alu(op, &self.registers[rs1], &self.registers[rs2])?;
            }
            Opcode::GetGlobal => {
                let name = self.symbol(rt, instr.imm)?;
                self.registers[rd] = rt.global(&name).cloned().unwrap_or_default();
            }
            Opcode::SetGlobal => {
                let name = self.symbol(rt, instr.imm)?;
                rt.set_global(name, self.registers[rs1].clone());
            }
            Opcode::Call => {
                let name = self.symbol(rt, instr.imm)?;
                let end = rs1 + instr.mode as usize;
                let args = self.registers.get(rs1..end).ok_or_else(|| {
                    Exception::runtime_error(format!("call arguments r{}..r{} out of range", rs1, end))
                })?;
                let args = args.to_vec();

                let result = if let Some(unit) = rt.function(&name) {
                    let callee = Proc::function(unit, name);
                    invoke(rt, &callee, &args, self.receiver.clone())?
                } else if let Some(builtin) = rt.builtin(&name) {
                    builtin(rt, &args)?
                } else {
                    return Err(Exception::new(
                        "NoMethodError",
                        format!("undefined method '{}' for {}", name, self.receiver),
                    ));
                };

                if rt.is_halted() {
                    return Ok(Step::Return(Value::Nil));
                }
                self.registers[rd] = result;
            }
            Opcode::Def => {
                let name = self.symbol(rt, instr.imm)?;
                let offset = rt
                    .unit(self.proc.unit)
                    .and_then(|unit| unit.children.get(instr.mode as usize))
                    .copied()
                    .ok_or_else(|| {
                        Exception::runtime_error(format!("missing child unit for '{}'", name))
                    })?;
                rt.define_function(name, self.proc.unit + offset as usize);
            }
            Opcode::Jump => self.jump(instr.imm)?,
            Opcode::JumpIf => {
                if self.registers[rs1].is_truthy() {
                    self.jump(instr.imm)?;
                }
            }
            Opcode::JumpUnless => {
                if !self.registers[rs1].is_truthy() {
                    self.jump(instr.imm)?;
                }
            }
            Opcode::Raise => {
                return Err(Exception::runtime_error(self.registers[rs1].to_string()));
            }
            Opcode::Ret => return Ok(Step::Return(self.registers[rs1].clone())),
            Opcode::Halt => {
                rt.halt();
                return Ok(Step::Return(Value::Nil));
            }
        }

        Ok(Step::Continue)
    }

    fn jump(&mut self, target: i32) -> Result<(), Exception> {
        self.pc = usize::try_from(target)
            .map_err(|_| Exception::runtime_error(format!("invalid jump target {}", target)))?;
        Ok(())
    }

    fn symbol(&self, rt: &Runtime, idx: i32) -> Result<String, Exception> {
        rt.unit(self.proc.unit)
            .and_then(|unit| unit.symbol(idx))
            .map(str::to_string)
            .ok_or_else(|| Exception::runtime_error(format!("invalid symbol index {}", idx)))
    }

    /// `file:line:in scope` for the instruction at `pc`
    fn location(&self, rt: &Runtime, pc: usize) -> String {
        let (file, line) = rt
            .unit(self.proc.unit)
            .map(|unit| (unit.filename.as_deref().unwrap_or("-"), unit.line_at(pc)))
            .unwrap_or(("-", 0));
        format!("{}:{}:in {}", file, line, self.proc.scope.label())
    }
}

fn alu(op: AluOp, a: &Value, b: &Value) -> Result<Value, Exception> {
    let value = match (op, a, b) {
        (AluOp::Eq, a, b) => Value::Bool(a == b),
        (AluOp::Add, Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        (AluOp::Sub, Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(*y)),
        (AluOp::Mul, Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(*y)),
        (AluOp::Lt, Value::Int(x), Value::Int(y)) => Value::Bool(x < y),
        (AluOp::Add, Value::Str(x), Value::Str(y)) => Value::Str(format!("{}{}", x, y)),
        (op, a, b) => {
            return Err(Exception::type_error(format!(
                "{} {} {} is not supported",
                a.type_name(),
                op.mnemonic(),
                b.type_name()
            )))
        }
    };
    Ok(value)
}
