//! Runtime values for the YAL engines.
//!
//! The [`Value`] enum is the central representation of all data at runtime,
//! shared by the VM and the tree-walking evaluator. Scalars (`Int`, `Bool`,
//! `Null`) are stored inline; strings, arrays, hashes and function objects
//! sit behind `Rc` so that cloning a value during stack shuffling is cheap.
//! There are no reference cycles at runtime (closure captures are snapshots,
//! not back-pointers), so reference counting is all the collection needed.
//!
//! The last four variants (`Function`, `Macro`, `Quote`, `Return`) belong to
//! the tree-walking evaluator and the macro expander; compiled code never
//! produces them. `Error` is produced by builtins and converted into a hard
//! error by whichever engine observes it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BlockStmt, Expr, Ident};
use crate::builtins::Builtin;
use crate::bytecode::Instructions;

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// An immutable string.
    Str(Rc<str>),
    /// Boolean. `true`/`false` compare canonically.
    Bool(bool),
    /// The null value.
    Null,
    /// An ordered sequence of values.
    Array(Rc<Vec<Value>>),
    /// A hash map keyed by the canonical [`HashKey`] form of a value.
    Hash(Rc<HashMap<HashKey, Value>>),
    /// A compiled function (lives in the constant pool).
    Fn(Rc<CompiledFunction>),
    /// A compiled function paired with its captured free values.
    Closure(Rc<Closure>),
    /// A host-backed builtin function.
    Builtin(&'static Builtin),
    /// An error produced by a builtin; converted to a hard error by the
    /// engine that observes it.
    Error(Rc<str>),
    /// A user function in the tree-walking evaluator.
    Function(Rc<FunctionValue>),
    /// A macro definition held in the macro environment.
    Macro(Rc<MacroValue>),
    /// A deferred AST fragment produced by `quote`.
    Quote(Rc<Expr>),
    /// A bubbling `return` wrapper, stripped at call boundaries.
    Return(Box<Value>),
}

/// A compiled function: its bytecode plus the number of local slots
/// (parameters included) its frame needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
}

/// A closure: a compiled function plus the snapshot of its free variables,
/// in the order the compiler recorded them.
#[derive(Debug, Clone)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

/// A user function value in the tree-walking evaluator.
#[derive(Debug)]
pub struct FunctionValue {
    pub parameters: Vec<Ident>,
    pub body: BlockStmt,
    pub env: Env,
}

/// A macro definition: parameters, body, and the environment captured at the
/// definition site.
#[derive(Debug)]
pub struct MacroValue {
    pub parameters: Vec<Ident>,
    pub body: BlockStmt,
    pub env: Env,
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// Build an error value.
    pub fn error(message: impl AsRef<str>) -> Value {
        Value::Error(Rc::from(message.as_ref()))
    }

    /// Build an array value.
    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(elements))
    }

    /// `true` unless the value is `Null` or `false`. Zero is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The type tag used in error messages and hash keys.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INTEGER",
            Value::Str(_) => "STRING",
            Value::Bool(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Fn(_) => "COMPILED_FUNCTION",
            Value::Closure(_) => "CLOSURE",
            Value::Builtin(_) => "BUILTIN_FUNCTION",
            Value::Error(_) => "ERROR",
            Value::Function(_) => "FUNCTION",
            Value::Macro(_) => "MACRO",
            Value::Quote(_) => "QUOTE",
            Value::Return(_) => "RETURN_VALUE",
        }
    }

    /// The canonical hash key for this value, or `None` if the type is not
    /// hashable. Only integers, strings and booleans hash.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(n) => Some(HashKey {
                kind: self.type_name(),
                repr: n.to_string(),
            }),
            Value::Str(s) => Some(HashKey {
                kind: self.type_name(),
                repr: s.to_string(),
            }),
            Value::Bool(b) => Some(HashKey {
                kind: self.type_name(),
                repr: b.to_string(),
            }),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// The canonical inspect string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{value}", key.repr)?;
                }
                write!(f, "}}")
            }
            Value::Fn(_) => write!(f, "compiled function"),
            Value::Closure(_) => write!(f, "closure"),
            Value::Builtin(_) => write!(f, "builtin function"),
            Value::Error(message) => write!(f, "ERROR: {message}"),
            Value::Function(func) => {
                write!(f, "fn (")?;
                for (i, param) in func.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") {}", func.body)
            }
            Value::Macro(mac) => {
                write!(f, "macro (")?;
                for (i, param) in mac.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") {}", mac.body)
            }
            Value::Quote(node) => write!(f, "QUOTE({node})"),
            Value::Return(value) => write!(f, "{value}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HashKey
// ─────────────────────────────────────────────────────────────────────────────

/// The canonical key form of a hashable value: its type tag plus its
/// rendered content. Two values collide exactly when they are the same kind
/// with the same canonical rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: &'static str,
    pub repr: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// A shared, mutable evaluation environment.
pub type Env = Rc<RefCell<Environment>>;

/// A name→value binding scope with an optional link to its enclosing scope.
/// Used by the tree-walking evaluator and as the macro environment.
#[derive(Debug, Default)]
pub struct Environment {
    store: HashMap<String, Value>,
    outer: Option<Env>,
}

impl Environment {
    /// Create a fresh root environment.
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment::default()))
    }

    /// Create an environment enclosed by `outer`.
    pub fn enclosed(outer: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            store: HashMap::new(),
            outer: Some(outer),
        }))
    }

    /// Look `name` up in this scope, then outward along the chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.store.get(name) {
            return Some(value.clone());
        }
        self.outer.as_ref().and_then(|o| o.borrow().get(name))
    }

    /// Bind `name` in this scope.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.store.insert(name.into(), value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
