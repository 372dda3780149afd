//! The interactive YAL REPL.
//!
//! State persists across lines: in VM mode the symbol table, constant pool
//! and globals array carry over (the compiler and VM both support being
//! handed prior state for exactly this), in eval mode the environment does.
//! The macro environment is shared either way, so a macro defined on one
//! line expands on the next.
//!
//! Line editing comes from `rustyline`; Ctrl-C, Ctrl-D or `quit` end the
//! session.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::compiler::Compiler;
use crate::evaluator;
use crate::expander;
use crate::symbols::SymbolTable;
use crate::value::{Env, Environment, Value};
use crate::vm::{StackVm, GLOBALS_SIZE};
use crate::{parse_source, Engine};

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One REPL session: the engine choice plus all state that outlives a line.
pub struct Session {
    engine: Engine,
    macro_env: Env,
    /// Evaluator bindings (eval mode).
    eval_env: Env,
    /// Compiler state carried between lines (VM mode).
    symbols: SymbolTable,
    constants: Vec<Value>,
    /// VM globals carried between lines (VM mode).
    globals: Vec<Value>,
}

impl Session {
    pub fn new(engine: Engine) -> Self {
        Session {
            engine,
            macro_env: Environment::new(),
            eval_env: Environment::new(),
            symbols: SymbolTable::new(),
            constants: Vec::new(),
            globals: vec![Value::Null; GLOBALS_SIZE],
        }
    }

    /// Process one input line, returning the text to display (if any).
    pub fn eval_line(&mut self, src: &str) -> Option<String> {
        let program = match parse_source(src) {
            Ok(program) => program,
            Err(e) => return Some(e.to_string()),
        };
        let expanded = match expander::expand_macros(program, &self.macro_env) {
            Ok(expanded) => expanded,
            Err(e) => return Some(e.to_string()),
        };

        match self.engine {
            Engine::Eval => match evaluator::eval_program(&expanded, &self.eval_env) {
                Ok(value) => Some(value.to_string()),
                Err(e) => Some(format!("ERROR: {e}")),
            },
            Engine::Vm => self.run_compiled(&expanded),
        }
    }

    fn run_compiled(&mut self, program: &crate::ast::Program) -> Option<String> {
        let symbols = std::mem::take(&mut self.symbols);
        let constants = std::mem::take(&mut self.constants);
        let mut compiler = Compiler::with_state(symbols, constants);
        let compiled = compiler.compile(program);
        let output = compiler.output();
        // Always reclaim the state, even after an error: definitions made
        // before the failure stay visible, matching eval mode.
        let (symbols, constants) = compiler.into_state();
        self.symbols = symbols;
        self.constants = constants;
        if let Err(e) = compiled {
            return Some(e.to_string());
        }

        let globals = std::mem::take(&mut self.globals);
        let mut machine = StackVm::with_globals(output, globals);
        let outcome = machine.run();
        let top = machine.top().map(|v| v.to_string());
        self.globals = machine.into_globals();
        match outcome {
            Ok(()) => top,
            Err(e) => Some(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interactive loop
// ─────────────────────────────────────────────────────────────────────────────

/// Run the interactive loop on stdin/stdout until EOF or `quit`.
pub fn start(engine: Engine) -> rustyline::Result<()> {
    let user = std::env::var("USER").unwrap_or_else(|_| "there".to_string());
    println!("Hello {user}. Welcome to the yal language REPL. Executing in {engine} mode");
    println!("To quit the REPL, say quit.");

    let mut editor = DefaultEditor::new()?;
    let mut session = Session::new(engine);

    loop {
        match editor.readline(">> ") {
            Ok(line) => {
                if line.trim().eq_ignore_ascii_case("quit") {
                    return Ok(());
                }
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if let Some(text) = session.eval_line(&line) {
                    println!("{text}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
