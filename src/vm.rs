//! The YAL stack virtual machine.
//!
//! The VM is a fetch-decode-execute loop over a fixed-size value stack, an
//! indexed globals array, and a stack of call frames. It consumes the
//! instruction stream and constant pool produced by [`crate::compiler`] and
//! never mutates either.
//!
//! # Execution model
//!
//! - The top-level instructions are wrapped in a synthetic main closure
//!   installed as frame 0; the loop runs until that frame's instruction
//!   pointer falls off the end of its stream.
//! - `sp` always points at the next free stack slot. Statement results are
//!   deliberately left on the stack; [`StackVm::top`] after a run is the
//!   program's value.
//! - Calling a closure pushes a frame whose base pointer `bp` addresses the
//!   callee value itself; locals (parameters first) live at `bp + 1 + idx`.
//!   The caller's `ip` has already advanced past the `Call` when the frame
//!   is installed, so returning needs no separate return address.
//!   `ReturnValue` pops the result, resets `sp` to `bp` (discarding the
//!   callee and the whole activation record), pops the frame, and pushes the
//!   result on the caller's stack.
//! - `JumpIfFalse` *peeks* at the tested value rather than popping it; the
//!   compiler accounts for the extra stack entry.
//!
//! Every runtime fault is surfaced as a [`RuntimeError`] return from
//! [`StackVm::run`]; nothing panics across the API boundary. A failed run
//! leaves the stack observable but the VM is not meant to be resumed.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::builtins;
use crate::bytecode::{read_u16, Op};
use crate::compiler::Bytecode;
use crate::value::{Closure, CompiledFunction, HashKey, Value};

/// Maximum operand stack depth.
pub const STACK_SIZE: usize = 2048;
/// Number of global variable slots.
pub const GLOBALS_SIZE: usize = 65536;
/// Maximum call depth.
pub const FRAMES_SIZE: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Runtime error
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime fault surfaced by [`StackVm::run`].
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeError {}

type VmResult<T> = Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// One activation record: the closure being executed, its instruction
/// pointer, and the stack index of the callee value just below its locals.
struct Frame {
    closure: Rc<Closure>,
    ip: usize,
    bp: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// StackVm
// ─────────────────────────────────────────────────────────────────────────────

/// The YAL virtual machine.
pub struct StackVm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    /// Next free stack slot.
    sp: usize,
    globals: Vec<Value>,
    /// Active frames, innermost last. Frame 0 is the synthetic main closure.
    frames: Vec<Frame>,
}

impl StackVm {
    /// Create a VM for the given compiler output with a fresh globals array.
    pub fn new(code: Bytecode) -> Self {
        Self::with_globals(code, vec![Value::Null; GLOBALS_SIZE])
    }

    /// Create a VM that reuses an existing globals array (REPL mode).
    pub fn with_globals(code: Bytecode, globals: Vec<Value>) -> Self {
        let main_fn = CompiledFunction {
            instructions: code.instructions,
            num_locals: 0,
        };
        let main_closure = Rc::new(Closure {
            func: Rc::new(main_fn),
            free: Vec::new(),
        });
        StackVm {
            constants: code.constants,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames: vec![Frame {
                closure: main_closure,
                ip: 0,
                bp: 0,
            }],
        }
    }

    /// Hand the globals array back for the next incremental run.
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The value currently on top of the stack, if any.
    pub fn top(&self) -> Option<&Value> {
        if self.sp == 0 {
            None
        } else {
            Some(&self.stack[self.sp - 1])
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch-decode-execute until the main frame runs off the end of its
    /// instructions. Returns on the first fault.
    pub fn run(&mut self) -> VmResult<()> {
        loop {
            {
                let frame = self.frame();
                if frame.ip >= frame.closure.func.instructions.len() {
                    return Ok(());
                }
            }

            let byte = {
                let frame = self.frame_mut();
                let byte = frame.closure.func.instructions[frame.ip];
                frame.ip += 1;
                byte
            };
            let op = Op::try_from(byte)
                .map_err(|b| RuntimeError::new(format!("unknown opcode: {b}")))?;

            match op {
                // ── Constants and singletons ─────────────────────────────────
                Op::Push => {
                    let idx = self.read_u16_operand() as usize;
                    let value = match self.constants.get(idx) {
                        Some(value) => value.clone(),
                        None => {
                            return Err(RuntimeError::new(format!(
                                "constant index {idx} out of range"
                            )))
                        }
                    };
                    self.push(value)?;
                }
                Op::PushTrue => self.push(Value::Bool(true))?,
                Op::PushFalse => self.push(Value::Bool(false))?,
                Op::PushNull => self.push(Value::Null)?,

                // ── Arithmetic and comparison ────────────────────────────────
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Equal
                | Op::NotEqual
                | Op::GreaterThan => self.execute_binary(op)?,

                Op::NegateBool => {
                    let operand = self.pop()?;
                    self.push(Value::Bool(!operand.is_truthy()))?;
                }
                Op::NegateNum => {
                    let operand = self.pop()?;
                    match operand {
                        Value::Int(n) => self.push(Value::Int(-n))?,
                        other => {
                            return Err(RuntimeError::new(format!(
                                "invalid type {} with operator '-'",
                                other.type_name()
                            )))
                        }
                    }
                }

                // ── Jumps ────────────────────────────────────────────────────
                Op::JumpIfFalse => {
                    let target = self.read_u16_operand() as usize;
                    // Peek, do not pop: the tested value stays on the stack.
                    let truthy = self.top().map(Value::is_truthy).unwrap_or(false);
                    if !truthy {
                        self.frame_mut().ip = target;
                    }
                }
                Op::Jump => {
                    let target = self.read_u16_operand() as usize;
                    self.frame_mut().ip = target;
                }

                // ── Globals ──────────────────────────────────────────────────
                Op::SetGlobal => {
                    let idx = self.read_u16_operand() as usize;
                    let value = self.pop()?;
                    self.globals[idx] = value;
                }
                Op::GetGlobal => {
                    let idx = self.read_u16_operand() as usize;
                    let value = self.globals[idx].clone();
                    self.push(value)?;
                }

                // ── Locals ───────────────────────────────────────────────────
                Op::SetLocal => {
                    let idx = self.read_u16_operand() as usize;
                    let slot = self.frame().bp + 1 + idx;
                    let value = self.pop()?;
                    self.stack[slot] = value;
                }
                Op::GetLocal => {
                    let idx = self.read_u16_operand() as usize;
                    let slot = self.frame().bp + 1 + idx;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }

                // ── Builtins and free variables ──────────────────────────────
                Op::GetBuiltin => {
                    let idx = self.read_u8_operand() as usize;
                    let builtin = builtins::by_index(idx).ok_or_else(|| {
                        RuntimeError::new(format!("builtin index {idx} out of range"))
                    })?;
                    self.push(Value::Builtin(builtin))?;
                }
                Op::GetFree => {
                    let idx = self.read_u8_operand() as usize;
                    let value = match self.frame().closure.free.get(idx) {
                        Some(value) => value.clone(),
                        None => {
                            return Err(RuntimeError::new(format!(
                                "free variable index {idx} out of range"
                            )))
                        }
                    };
                    self.push(value)?;
                }

                // ── Composite construction ───────────────────────────────────
                Op::MakeArray => {
                    let count = self.read_u16_operand() as usize;
                    let elements = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Value::array(elements))?;
                }
                Op::MakeHash => {
                    let items = self.read_u16_operand() as usize;
                    let hash = self.build_hash(items)?;
                    self.push(hash)?;
                }
                Op::Index => {
                    let index = self.pop()?;
                    let iterable = self.pop()?;
                    let value = execute_index(iterable, index)?;
                    self.push(value)?;
                }

                // ── Closures ─────────────────────────────────────────────────
                Op::MakeClosure => {
                    let const_idx = self.read_u16_operand() as usize;
                    let free_count = self.read_u8_operand() as usize;
                    let func = match self.constants.get(const_idx) {
                        Some(Value::Fn(func)) => func.clone(),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "constant {const_idx} is not a compiled function: {other:?}"
                            )))
                        }
                    };
                    // The captures sit on the stack in free-index order.
                    let mut free = vec![Value::Null; free_count];
                    for slot in free.iter_mut().rev() {
                        *slot = self.pop()?;
                    }
                    self.push(Value::Closure(Rc::new(Closure { func, free })))?;
                }
                Op::GetCurrentClosure => {
                    let closure = self.frame().closure.clone();
                    self.push(Value::Closure(closure))?;
                }

                // ── Calls and returns ────────────────────────────────────────
                Op::Call => {
                    let argc = self.read_u8_operand() as usize;
                    self.call_value(argc)?;
                }
                Op::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.len() == 1 {
                        return Err(RuntimeError::new("return outside of a function"));
                    }
                    let bp = self.frame().bp;
                    // Drop the whole activation record, callee included.
                    for slot in &mut self.stack[bp..self.sp] {
                        *slot = Value::Null;
                    }
                    self.sp = bp;
                    self.frames.pop();
                    self.push(value)?;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call dispatch
    // ─────────────────────────────────────────────────────────────────────────

    fn call_value(&mut self, argc: usize) -> VmResult<()> {
        let callee = self.stack[self.sp - 1 - argc].clone();
        match callee {
            Value::Closure(closure) => {
                if self.frames.len() >= FRAMES_SIZE {
                    return Err(RuntimeError::new("frames overflow"));
                }
                let bp = self.sp - 1 - argc;
                let num_locals = closure.func.num_locals;
                // Reserve the local slots. Parameters already sit at
                // bp+1..bp+1+argc because arguments were pushed in order.
                if self.sp + num_locals > STACK_SIZE {
                    return Err(RuntimeError::new("stack overflow"));
                }
                self.sp += num_locals;
                self.frames.push(Frame { closure, ip: 0, bp });
                Ok(())
            }
            Value::Builtin(builtin) => {
                let args = self.stack[self.sp - argc..self.sp].to_vec();
                // Discard the arguments and the callee.
                for _ in 0..argc + 1 {
                    self.pop()?;
                }
                let result = (builtin.func)(&args);
                if let Value::Error(message) = result {
                    return Err(RuntimeError::new(message.to_string()));
                }
                self.push(result)
            }
            other => Err(RuntimeError::new(format!(
                "type: {} not a callable object",
                other.type_name()
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binary operations
    // ─────────────────────────────────────────────────────────────────────────

    fn execute_binary(&mut self, op: Op) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        if left.type_name() != right.type_name() {
            return Err(RuntimeError::new(format!(
                "incompatible types: {} and {}",
                left.type_name(),
                right.type_name()
            )));
        }

        let result = match op {
            Op::Add => binary_add(left, right)?,
            Op::Sub => int_binary(left, right, "-", |a, b| Value::Int(a - b))?,
            Op::Mul => int_binary(left, right, "*", |a, b| Value::Int(a * b))?,
            Op::Div => {
                if matches!(right, Value::Int(0)) {
                    return Err(RuntimeError::new("division by zero"));
                }
                int_binary(left, right, "/", |a, b| Value::Int(a / b))?
            }
            Op::Equal => binary_equal(&left, &right, "==")?,
            Op::NotEqual => match binary_equal(&left, &right, "!=")? {
                Value::Bool(eq) => Value::Bool(!eq),
                _ => unreachable!("equality produces a boolean"),
            },
            Op::GreaterThan => int_binary(left, right, ">", |a, b| Value::Bool(a > b))?,
            _ => unreachable!("not a binary opcode: {op}"),
        };
        self.push(result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Composite helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Consume `items` stack entries (a key atop each value) and build a
    /// hash.
    fn build_hash(&mut self, items: usize) -> VmResult<Value> {
        let mut pairs = HashMap::with_capacity(items / 2);
        for _ in 0..items / 2 {
            let key = self.pop()?;
            let value = self.pop()?;
            let Some(hash_key) = key.hash_key() else {
                return Err(RuntimeError::new(format!(
                    "key type {} is not hashable",
                    key.type_name()
                )));
            };
            pairs.insert(hash_key, value);
        }
        Ok(Value::Hash(Rc::new(pairs)))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack and frame helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn frame(&self) -> &Frame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn read_u8_operand(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.func.instructions[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16_operand(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = read_u16(&frame.closure.func.instructions, frame.ip);
        frame.ip += 2;
        value
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::new("stack overflow"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        if self.sp == 0 {
            return Err(RuntimeError::new("stack underflow"));
        }
        self.sp -= 1;
        Ok(std::mem::replace(&mut self.stack[self.sp], Value::Null))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator implementations
// ─────────────────────────────────────────────────────────────────────────────

fn binary_add(left: Value, right: Value) -> VmResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (left, _) => Err(RuntimeError::new(format!(
            "unsupported operand type {} with '+'",
            left.type_name()
        ))),
    }
}

/// Apply an integer-only operator; both operands are known to share a type.
fn int_binary(
    left: Value,
    right: Value,
    op: &str,
    apply: impl Fn(i64, i64) -> Value,
) -> VmResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(apply(a, b)),
        (left, _) => Err(RuntimeError::new(format!(
            "unsupported operand type {} with '{op}'",
            left.type_name()
        ))),
    }
}

/// Equality for the comparable kinds. Integers and strings compare by
/// value; booleans compare as the canonical singletons.
fn binary_equal(left: &Value, right: &Value, op: &str) -> VmResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a == b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a == b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
        _ => Err(RuntimeError::new(format!(
            "unsupported operand type {} with '{op}'",
            left.type_name()
        ))),
    }
}

fn execute_index(iterable: Value, index: Value) -> VmResult<Value> {
    match iterable {
        Value::Array(elements) => {
            let Value::Int(idx) = index else {
                return Err(RuntimeError::new(
                    "index must be an integer for index expression in arrays",
                ));
            };
            if idx < 0 || idx >= elements.len() as i64 {
                return Err(RuntimeError::new(format!(
                    "index {idx} out of bounds for arr length {}",
                    elements.len()
                )));
            }
            Ok(elements[idx as usize].clone())
        }
        Value::Hash(pairs) => {
            let Some(key) = index.hash_key() else {
                return Err(RuntimeError::new(format!(
                    "key type {} is not hashable",
                    index.type_name()
                )));
            };
            Ok(pairs.get(&key).cloned().unwrap_or(Value::Null))
        }
        other => Err(RuntimeError::new(format!(
            "index expression not supported for type: {}",
            other.type_name()
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
