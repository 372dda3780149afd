//! Host-backed builtin functions.
//!
//! The builtin table is fixed and ordered: the position of a function in
//! [`BUILTINS`] is its index in `OpGetBuiltin` operands, so entries must
//! never be reordered. Name resolution happens in the symbol table, only at
//! the root scope and only after the outer chain is exhausted.
//!
//! A builtin returns a plain [`Value`]; failures are reported as
//! [`Value::Error`], which the executing engine converts into a hard error
//! when it surfaces.

use crate::value::Value;

/// The signature of a builtin function.
pub type BuiltinFn = fn(&[Value]) -> Value;

/// One entry in the builtin table.
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "builtin {}", self.name)
    }
}

/// The builtin table. Index order is part of the bytecode contract.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        func: builtin_len,
    },
    Builtin {
        name: "first",
        func: builtin_first,
    },
    Builtin {
        name: "last",
        func: builtin_last,
    },
    Builtin {
        name: "rest",
        func: builtin_rest,
    },
    Builtin {
        name: "push",
        func: builtin_push,
    },
    Builtin {
        name: "puts",
        func: builtin_puts,
    },
];

/// The table index for `name`, if it names a builtin.
pub fn position(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|b| b.name == name)
}

/// The builtin at `index`, if any.
pub fn by_index(index: usize) -> Option<&'static Builtin> {
    BUILTINS.get(index)
}

/// The builtin named `name`, if any.
pub fn by_name(name: &str) -> Option<&'static Builtin> {
    position(name).map(|i| &BUILTINS[i])
}

// ─────────────────────────────────────────────────────────────────────────────
// Implementations
// ─────────────────────────────────────────────────────────────────────────────

fn builtin_len(args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::error(format!("len() requires 1 argument. got {}", args.len()));
    }
    match &args[0] {
        Value::Str(s) => Value::Int(s.len() as i64),
        Value::Array(elements) => Value::Int(elements.len() as i64),
        other => Value::error(format!("len(): type {} not supported", other.type_name())),
    }
}

fn builtin_first(args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::error(format!("first() requires 1 argument. got {}", args.len()));
    }
    match &args[0] {
        Value::Array(elements) => match elements.first() {
            Some(first) => first.clone(),
            None => Value::error("empty array"),
        },
        other => Value::error(format!(
            "first(): type {} not supported",
            other.type_name()
        )),
    }
}

fn builtin_last(args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::error(format!("last() requires 1 argument. got {}", args.len()));
    }
    match &args[0] {
        Value::Array(elements) => match elements.last() {
            Some(last) => last.clone(),
            None => Value::error("empty array"),
        },
        other => Value::error(format!("last(): type {} not supported", other.type_name())),
    }
}

/// Everything but the first element, as a fresh array. The input array is
/// never mutated.
fn builtin_rest(args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::error(format!("rest() requires 1 argument. got {}", args.len()));
    }
    match &args[0] {
        Value::Array(elements) => {
            if elements.is_empty() {
                return Value::error("empty array");
            }
            Value::array(elements[1..].to_vec())
        }
        other => Value::error(format!("rest(): type {} not supported", other.type_name())),
    }
}

/// A copy of the array with `args[1]` appended. The input array is never
/// mutated.
fn builtin_push(args: &[Value]) -> Value {
    if args.len() != 2 {
        return Value::error(format!("push() requires 2 arguments. got {}", args.len()));
    }
    match &args[0] {
        Value::Array(elements) => {
            let mut extended = Vec::with_capacity(elements.len() + 1);
            extended.extend(elements.iter().cloned());
            extended.push(args[1].clone());
            Value::array(extended)
        }
        other => Value::error(format!("push(): type {} not supported", other.type_name())),
    }
}

fn builtin_puts(args: &[Value]) -> Value {
    for arg in args {
        print!("{arg}");
    }
    println!();
    Value::Null
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
