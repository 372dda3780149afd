//! The YAL language compiler and runtime library.
//!
//! This crate provides the complete YAL pipeline:
//!
//! 1. **Lexer** (`lexer`) — tokenises source text into a flat `Vec<Token>`.
//! 2. **Parser** (`parser`) — builds an [`ast::Program`] from the tokens.
//! 3. **Macro expander** (`expander`) — rewrites macro definitions and call
//!    sites before anything is executed.
//! 4. **Bytecode** (`bytecode`) — `Op` definitions and instruction encoding.
//! 5. **Symbols** (`symbols`) — lexical scope resolution with free-variable
//!    promotion.
//! 6. **Compiler** (`compiler`) — lowers the AST to bytecode plus a constant
//!    pool.
//! 7. **VM** (`vm`) — stack machine that executes the compiled form.
//! 8. **Evaluator** (`evaluator`) — tree-walking reference engine, also the
//!    machinery behind macro expansion.
//! 9. **Builtins** (`builtins`) — host functions exposed to YAL programs.
//!
//! # Entry point
//!
//! The simplest way to run a YAL program from Rust is:
//!
//! ```rust,ignore
//! use yal::{run_source, Engine};
//! let result = run_source("1 + 2", Engine::Vm)?;
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod evaluator;
pub mod expander;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod symbols;
pub mod token;
pub mod value;
pub mod vm;

use crate::compiler::{Compiler, CompileError};
use crate::evaluator::EvalError;
use crate::expander::ExpandError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::value::{Env, Environment, Value};
use crate::vm::{RuntimeError, StackVm};

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

/// The unified error type for all YAL pipeline stages.
///
/// Each variant wraps errors from the corresponding stage so that callers
/// can handle them uniformly or match on the specific stage.
#[derive(Debug, thiserror::Error)]
pub enum YalError {
    /// One or more lexical errors.
    #[error("Lex error at {}: {}", .0.first().map(|e| e.span.to_string()).unwrap_or_default(), .0.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; "))]
    Lex(Vec<LexError>),

    /// One or more parse errors.
    #[error("Parse error at {}: {}", .0.first().map(|e| e.span.to_string()).unwrap_or_default(), .0.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; "))]
    Parse(Vec<ParseError>),

    /// A macro expansion failure (already carries its own prefix).
    #[error("{0}")]
    Expand(#[from] ExpandError),

    /// A compile-time error (name resolution, unknown operators, etc.).
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A runtime error raised by the VM.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// A runtime error raised by the tree-walking evaluator.
    #[error("{0}")]
    Eval(#[from] EvalError),

    /// An I/O error (file reading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all YAL operations.
pub type YalResult<T> = Result<T, YalError>;

// ─────────────────────────────────────────────────────────────────────────────
// Execution engine selection
// ─────────────────────────────────────────────────────────────────────────────

/// Which backend executes the (expanded) program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Compile to bytecode and run on the stack VM (default).
    Vm,
    /// Walk the tree directly with the reference evaluator.
    Eval,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Engine::Vm => "vm",
            Engine::Eval => "eval",
        })
    }
}

impl std::str::FromStr for Engine {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vm" => Ok(Engine::Vm),
            "eval" => Ok(Engine::Eval),
            other => Err(format!("unknown engine {other:?} (expected vm or eval)")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Lex and parse a YAL source string.
///
/// Both lex errors and parse errors are promoted to [`YalError`] if
/// non-empty, preferring lex errors when both appear.
pub fn parse_source(src: &str) -> YalResult<ast::Program> {
    let (tokens, lex_errors) = lexer::lex(src);
    if !lex_errors.is_empty() {
        return Err(YalError::Lex(lex_errors));
    }
    let (program, parse_errors) = parser::parse_tokens(tokens);
    if !parse_errors.is_empty() {
        return Err(YalError::Parse(parse_errors));
    }
    Ok(program)
}

/// Parse and macro-expand a source string against a fresh macro environment.
pub fn expand_source(src: &str) -> YalResult<ast::Program> {
    let program = parse_source(src)?;
    let macro_env = Environment::new();
    Ok(expander::expand_macros(program, &macro_env)?)
}

/// Full pipeline: lex → parse → expand → execute on the chosen engine.
///
/// Returns the program's result value: the top of the VM stack, or the last
/// evaluated value. `None` means the run left nothing observable (an empty
/// program, or one ending in a definition in VM mode).
pub fn run_source(src: &str, engine: Engine) -> YalResult<Option<Value>> {
    let expanded = expand_source(src)?;
    match engine {
        Engine::Eval => {
            let env: Env = Environment::new();
            let value = evaluator::eval_program(&expanded, &env)?;
            Ok(Some(value))
        }
        Engine::Vm => {
            let mut compiler = Compiler::new();
            compiler.compile(&expanded)?;
            let mut machine = StackVm::new(compiler.output());
            machine.run()?;
            Ok(machine.top().cloned())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
