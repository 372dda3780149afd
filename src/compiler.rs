//! AST-to-bytecode compiler.
//!
//! The compiler performs a single recursive walk of the (macro-expanded)
//! AST, emitting instructions into the active [`CompilationScope`] and
//! appending literals to a constant pool shared by every function compiled
//! in the session.
//!
//! # Scope model
//!
//! The compiler keeps a stack of compilation scopes, one per function body
//! being compiled (index 0 is the top-level script). Entering a function
//! literal pushes a fresh scope *and* a fresh symbol table enclosed by the
//! current one; exiting pops both, wraps the emitted body in a
//! `CompiledFunction` constant, and then emits — in the *enclosing* scope —
//! a load for every free variable the body captured, followed by
//! `MakeClosure`. Because those loads are resolved against the enclosing
//! symbol table, a capture from further out is itself promoted to a free
//! variable there, which propagates captures through arbitrarily deep
//! nesting.
//!
//! # Control flow
//!
//! Jumps are emitted with a `9999` placeholder operand and back-patched once
//! the target offset is known. `JumpIfFalse` peeks rather than pops, so an
//! `if` without an `else` compensates by emitting `PushNull` for the absent
//! arm, keeping both paths one value tall.
//!
//! # REPL mode
//!
//! [`Compiler::with_state`] accepts the symbol table and constant pool of a
//! previous compilation so a REPL can accumulate definitions across lines;
//! [`Compiler::into_state`] hands them back afterwards.

use std::fmt;
use std::rc::Rc;

use crate::ast::*;
use crate::bytecode::{self, Instructions, Op};
use crate::symbols::{Symbol, SymbolScope, SymbolTable};
use crate::token::Span;
use crate::value::{CompiledFunction, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time error.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
}

impl CompileError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.span, self.message)
    }
}

impl std::error::Error for CompileError {}

type CompileResult<T> = Result<T, CompileError>;

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// The compiler's output: the top-level instruction stream plus the constant
/// pool it references.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compilation scope
// ─────────────────────────────────────────────────────────────────────────────

/// The instruction stream of one function body under compilation.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    /// Byte offset of the most recently emitted instruction.
    last_emit_offset: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// The YAL bytecode compiler.
pub struct Compiler {
    /// Active compilation scopes, innermost last. Index 0 is the script.
    scopes: Vec<CompilationScope>,
    symbols: SymbolTable,
    constants: Vec<Value>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// Create a compiler with a fresh symbol table and constant pool.
    pub fn new() -> Self {
        Compiler {
            scopes: vec![CompilationScope::default()],
            symbols: SymbolTable::new(),
            constants: Vec::new(),
        }
    }

    /// Create a compiler that continues from earlier state (REPL mode).
    pub fn with_state(symbols: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler {
            scopes: vec![CompilationScope::default()],
            symbols,
            constants,
        }
    }

    /// Hand back the symbol table and constant pool for the next
    /// incremental compilation.
    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    /// Compile a whole program into the active scope.
    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// The finished instruction stream and constant pool.
    pub fn output(&self) -> Bytecode {
        Bytecode {
            instructions: self.scope().instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    // ── Scope helpers ────────────────────────────────────────────────────────

    fn scope(&self) -> &CompilationScope {
        self.scopes.last().unwrap()
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().unwrap()
    }

    fn current_offset(&self) -> usize {
        self.scope().instructions.len()
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbols);
        self.symbols = SymbolTable::enclosed(outer);
    }

    /// Pop the innermost scope and symbol table.
    ///
    /// Returns the emitted instructions, the free symbols the body captured
    /// (in recorded order, resolved against the now-active outer table), and
    /// the body's local slot count.
    fn exit_scope(&mut self) -> (Instructions, Vec<Symbol>, usize) {
        let scope = self.scopes.pop().unwrap();
        let inner = std::mem::take(&mut self.symbols);
        let (inner, outer) = inner.split_outer();
        self.symbols = outer.unwrap_or_default();
        let num_locals = inner.len();
        (scope.instructions, inner.free_symbols().to_vec(), num_locals)
    }

    // ── Emission helpers ─────────────────────────────────────────────────────

    fn add_instruction(&mut self, ins: Vec<u8>) {
        let scope = self.scope_mut();
        scope.last_emit_offset = scope.instructions.len();
        scope.instructions.extend(ins);
    }

    fn emit(&mut self, op: Op) {
        self.add_instruction(bytecode::make(op));
    }

    fn emit_u16(&mut self, op: Op, operand: u16) {
        self.add_instruction(bytecode::make_u16(op, operand));
    }

    fn emit_u8(&mut self, op: Op, operand: u8) {
        self.add_instruction(bytecode::make_u8(op, operand));
    }

    /// Emit a jump with a placeholder target; returns the instruction offset
    /// for later patching.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_u16(op, 9999);
        self.scope().last_emit_offset
    }

    /// Point the jump emitted at `instruction_offset` at the current end of
    /// the stream.
    fn patch_jump(&mut self, instruction_offset: usize) {
        let target = self.current_offset() as u16;
        bytecode::put_u16(
            &mut self.scope_mut().instructions,
            instruction_offset + 1,
            target,
        );
    }

    /// Append `value` to the constant pool, returning its index.
    fn add_constant(&mut self, value: Value) -> u16 {
        let idx = self.constants.len();
        assert!(idx < 0x1_0000, "constant pool overflow");
        self.constants.push(value);
        idx as u16
    }

    // ── Symbol emission ──────────────────────────────────────────────────────

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit_u16(Op::GetGlobal, symbol.index as u16),
            SymbolScope::Local => self.emit_u16(Op::GetLocal, symbol.index as u16),
            SymbolScope::Builtin => self.emit_u8(Op::GetBuiltin, symbol.index as u8),
            SymbolScope::Free => self.emit_u8(Op::GetFree, symbol.index as u8),
            SymbolScope::Function => self.emit(Op::GetCurrentClosure),
        }
    }

    fn store_symbol(&mut self, symbol: &Symbol) {
        if symbol.scope == SymbolScope::Global {
            self.emit_u16(Op::SetGlobal, symbol.index as u16);
        } else {
            self.emit_u16(Op::SetLocal, symbol.index as u16);
        }
    }

    // ── Statements ───────────────────────────────────────────────────────────

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Let(s) => self.compile_let(s),
            Stmt::Return(s) => {
                self.compile_expr(&s.value)?;
                self.emit(Op::ReturnValue);
                Ok(())
            }
            Stmt::Expr(s) => self.compile_expr(&s.expr),
        }
    }

    fn compile_let(&mut self, stmt: &LetStmt) -> CompileResult<()> {
        let symbol = if let Expr::Function(lit) = &stmt.value {
            // Define the name before compiling the body so recursive
            // references inside the literal resolve.
            let symbol = self.symbols.define(&stmt.name.name);
            self.compile_function(lit, Some(&stmt.name.name))?;
            symbol
        } else {
            self.compile_expr(&stmt.value)?;
            self.symbols.define(&stmt.name.name)
        };
        self.store_symbol(&symbol);
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStmt) -> CompileResult<()> {
        for stmt in &block.statements {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Int(value, _) => {
                let idx = self.add_constant(Value::Int(*value));
                self.emit_u16(Op::Push, idx);
            }
            Expr::Str(value, _) => {
                let idx = self.add_constant(Value::str(value));
                self.emit_u16(Op::Push, idx);
            }
            Expr::Bool(value, _) => {
                self.emit(if *value { Op::PushTrue } else { Op::PushFalse });
            }
            Expr::Null(_) => self.emit(Op::PushNull),
            Expr::Ident(ident) => {
                let Some(symbol) = self.symbols.lookup(&ident.name) else {
                    return Err(CompileError::new(
                        format!("unknown identifier {}", ident.name),
                        ident.span,
                    ));
                };
                self.load_symbol(&symbol);
            }
            Expr::Prefix { op, right, span } => {
                self.compile_expr(right)?;
                match op.as_str() {
                    "!" => self.emit(Op::NegateBool),
                    "-" => self.emit(Op::NegateNum),
                    other => {
                        return Err(CompileError::new(
                            format!("unknown operator {other}"),
                            *span,
                        ))
                    }
                }
            }
            Expr::Infix {
                left,
                op,
                right,
                span,
            } => self.compile_infix(left, op, right, *span)?,
            Expr::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                self.compile_expr(condition)?;
                // Placeholder target, patched to the start of the else arm.
                let conditional_jump = self.emit_jump(Op::JumpIfFalse);
                self.compile_block(consequence)?;
                let end_jump = self.emit_jump(Op::Jump);
                self.patch_jump(conditional_jump);
                match alternative {
                    Some(alt) => self.compile_block(alt)?,
                    // JumpIfFalse leaves the condition on the stack, so the
                    // absent arm still has to contribute one value.
                    None => self.emit(Op::PushNull),
                }
                self.patch_jump(end_jump);
            }
            Expr::Function(lit) => self.compile_function(lit, None)?,
            Expr::Macro(lit) => {
                return Err(CompileError::new(
                    "macro literal must be expanded before compilation",
                    lit.span,
                ))
            }
            Expr::Call {
                function,
                arguments,
                ..
            } => {
                self.compile_expr(function)?;
                for arg in arguments {
                    self.compile_expr(arg)?;
                }
                self.emit_u8(Op::Call, arguments.len() as u8);
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit_u16(Op::MakeArray, elements.len() as u16);
            }
            Expr::Hash { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expr(value)?;
                    self.compile_expr(key)?;
                }
                // Operand counts stack items, two per pair.
                self.emit_u16(Op::MakeHash, (pairs.len() * 2) as u16);
            }
            Expr::Index { left, index, .. } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(Op::Index);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        left: &Expr,
        op: &str,
        right: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        // `<` is canonicalized to `>` by compiling the operands swapped.
        if op == "<" {
            self.compile_expr(right)?;
            self.compile_expr(left)?;
            self.emit(Op::GreaterThan);
            return Ok(());
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        match op {
            "+" => self.emit(Op::Add),
            "-" => self.emit(Op::Sub),
            "*" => self.emit(Op::Mul),
            "/" => self.emit(Op::Div),
            "==" => self.emit(Op::Equal),
            "!=" => self.emit(Op::NotEqual),
            ">" => self.emit(Op::GreaterThan),
            other => {
                return Err(CompileError::new(
                    format!("unknown operator {other}"),
                    span,
                ))
            }
        }
        Ok(())
    }

    /// Compile a function literal into a `CompiledFunction` constant and emit
    /// the `MakeClosure` that materializes it.
    ///
    /// `self_name` is the `let` binding the literal is being assigned to, if
    /// any; it is defined as the function-self symbol so the body can refer
    /// to the closure currently executing.
    fn compile_function(
        &mut self,
        lit: &FunctionLit,
        self_name: Option<&str>,
    ) -> CompileResult<()> {
        self.enter_scope();

        for param in &lit.parameters {
            self.symbols.define(&param.name);
        }
        if let Some(name) = self_name {
            self.symbols.define_function_self(name);
        }

        self.compile_block(&lit.body)?;

        if self.scope().instructions.is_empty() {
            // Empty body: return null.
            self.emit(Op::PushNull);
            self.emit(Op::ReturnValue);
        }
        let last_offset = self.scope().last_emit_offset;
        if self.scope().instructions[last_offset] != Op::ReturnValue as u8 {
            // Implicit return of the last expression value.
            self.emit(Op::ReturnValue);
        }

        let (instructions, free_symbols, num_locals) = self.exit_scope();

        let func = CompiledFunction {
            instructions,
            num_locals,
        };
        let idx = self.add_constant(Value::Fn(Rc::new(func)));

        // Load the captures in recorded order; resolved against the
        // enclosing table, which may promote them further outward.
        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }
        self.add_instruction(bytecode::make_closure(idx, free_symbols.len() as u8));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{make, make_closure, make_u16, make_u8};
    use crate::lexer::lex;
    use crate::parser::parse_tokens;

    fn parse(src: &str) -> Program {
        let (tokens, lex_errors) = lex(src);
        assert!(lex_errors.is_empty(), "lex errors: {lex_errors:?}");
        let (program, parse_errors) = parse_tokens(tokens);
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:?}");
        program
    }

    fn compile_src(src: &str) -> Bytecode {
        let mut compiler = Compiler::new();
        compiler
            .compile(&parse(src))
            .unwrap_or_else(|e| panic!("compile error for {src:?}: {e}"));
        compiler.output()
    }

    fn compile_err(src: &str) -> CompileError {
        let mut compiler = Compiler::new();
        compiler
            .compile(&parse(src))
            .expect_err("expected a compile error")
    }

    /// Concatenate encoded instructions into one stream.
    fn concat(parts: Vec<Vec<u8>>) -> Instructions {
        parts.into_iter().flatten().collect()
    }

    #[test]
    fn test_compile_integer_arithmetic() {
        let code = compile_src("1 + 2");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::Push, 1),
                make(Op::Add),
            ])
        );
        assert_eq!(code.constants, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_compile_constant_pool_appends_in_order() {
        let code = compile_src("1; 2; 1");
        // The pool is append-only: no deduplication, stable indices.
        assert_eq!(
            code.constants,
            vec![Value::Int(1), Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn test_compile_booleans_have_no_constants() {
        let code = compile_src("true; false");
        assert_eq!(
            code.instructions,
            concat(vec![make(Op::PushTrue), make(Op::PushFalse)])
        );
        assert!(code.constants.is_empty());
    }

    #[test]
    fn test_compile_less_than_swaps_operands() {
        let less = compile_src("1 < 2");
        assert_eq!(
            less.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::Push, 1),
                make(Op::GreaterThan),
            ])
        );
        // Operands are emitted right-then-left: constant 0 is the 2.
        assert_eq!(less.constants, vec![Value::Int(2), Value::Int(1)]);

        let greater = compile_src("2 > 1");
        assert_eq!(less.instructions, greater.instructions);
    }

    #[test]
    fn test_compile_prefix_operators() {
        let code = compile_src("-5; !true");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make(Op::NegateNum),
                make(Op::PushTrue),
                make(Op::NegateBool),
            ])
        );
    }

    #[test]
    fn test_compile_string_literal() {
        let code = compile_src(r#""yal" + "!""#);
        assert_eq!(code.constants, vec![Value::str("yal"), Value::str("!")]);
    }

    #[test]
    fn test_compile_if_without_else_pushes_null() {
        let code = compile_src("if (true) { 10 }; 3333");
        assert_eq!(
            code.instructions,
            concat(vec![
                // 0000
                make(Op::PushTrue),
                // 0001, patched to the start of the null arm
                make_u16(Op::JumpIfFalse, 10),
                // 0004
                make_u16(Op::Push, 0),
                // 0007, patched past the null arm
                make_u16(Op::Jump, 11),
                // 0010
                make(Op::PushNull),
                // 0011
                make_u16(Op::Push, 1),
            ])
        );
    }

    #[test]
    fn test_compile_if_with_else() {
        let code = compile_src("if (true) { 10 } else { 20 }; 3333");
        assert_eq!(
            code.instructions,
            concat(vec![
                make(Op::PushTrue),
                make_u16(Op::JumpIfFalse, 10),
                make_u16(Op::Push, 0),
                make_u16(Op::Jump, 13),
                make_u16(Op::Push, 1),
                make_u16(Op::Push, 2),
            ])
        );
    }

    #[test]
    fn test_compile_global_let() {
        let code = compile_src("let one = 1; let two = 2; one");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::SetGlobal, 0),
                make_u16(Op::Push, 1),
                make_u16(Op::SetGlobal, 1),
                make_u16(Op::GetGlobal, 0),
            ])
        );
    }

    #[test]
    fn test_compile_let_rebinding_reuses_slot() {
        let code = compile_src("let x = 1; let x = 2; x");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::SetGlobal, 0),
                make_u16(Op::Push, 1),
                make_u16(Op::SetGlobal, 0),
                make_u16(Op::GetGlobal, 0),
            ])
        );
    }

    #[test]
    fn test_compile_arrays() {
        let code = compile_src("[1, 2 + 3]");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::Push, 1),
                make_u16(Op::Push, 2),
                make(Op::Add),
                make_u16(Op::MakeArray, 2),
            ])
        );
        assert_eq!(compile_src("[]").instructions, make_u16(Op::MakeArray, 0));
    }

    #[test]
    fn test_compile_hash_operand_counts_items_not_pairs() {
        let code = compile_src("{1: 2, 3: 4}");
        // Per pair: value first, then key.
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::Push, 1),
                make_u16(Op::Push, 2),
                make_u16(Op::Push, 3),
                make_u16(Op::MakeHash, 4),
            ])
        );
        assert_eq!(
            code.constants,
            vec![Value::Int(2), Value::Int(1), Value::Int(4), Value::Int(3)]
        );
    }

    #[test]
    fn test_compile_index_expression() {
        let code = compile_src("[1][0]");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::MakeArray, 1),
                make_u16(Op::Push, 1),
                make(Op::Index),
            ])
        );
    }

    #[test]
    fn test_compile_function_with_implicit_return() {
        let code = compile_src("fn() { 5 + 10 }");
        let Value::Fn(func) = &code.constants[2] else {
            panic!("expected compiled function, got {:?}", code.constants[2]);
        };
        assert_eq!(
            func.instructions,
            concat(vec![
                make_u16(Op::Push, 0),
                make_u16(Op::Push, 1),
                make(Op::Add),
                make(Op::ReturnValue),
            ])
        );
        assert_eq!(func.num_locals, 0);
        assert_eq!(code.instructions, make_closure(2, 0));
    }

    #[test]
    fn test_compile_function_explicit_return_not_doubled() {
        let code = compile_src("fn() { return 99; }");
        let Value::Fn(func) = &code.constants[1] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            func.instructions,
            concat(vec![make_u16(Op::Push, 0), make(Op::ReturnValue)])
        );
    }

    #[test]
    fn test_compile_empty_function_returns_null() {
        let code = compile_src("fn() { }");
        let Value::Fn(func) = &code.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            func.instructions,
            concat(vec![make(Op::PushNull), make(Op::ReturnValue)])
        );
    }

    #[test]
    fn test_compile_function_locals_and_params() {
        let code = compile_src("fn(a, b) { let c = a + b; c }");
        let Value::Fn(func) = &code.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(func.num_locals, 3);
        assert_eq!(
            func.instructions,
            concat(vec![
                make_u16(Op::GetLocal, 0),
                make_u16(Op::GetLocal, 1),
                make(Op::Add),
                make_u16(Op::SetLocal, 2),
                make_u16(Op::GetLocal, 2),
                make(Op::ReturnValue),
            ])
        );
    }

    #[test]
    fn test_compile_call_with_arguments() {
        let code = compile_src("let f = fn(x) { x }; f(24)");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_closure(0, 0),
                make_u16(Op::SetGlobal, 0),
                make_u16(Op::GetGlobal, 0),
                make_u16(Op::Push, 1),
                make_u8(Op::Call, 1),
            ])
        );
    }

    #[test]
    fn test_compile_builtin_load() {
        let code = compile_src("len([]); puts(1)");
        assert_eq!(
            code.instructions,
            concat(vec![
                make_u8(Op::GetBuiltin, 0),
                make_u16(Op::MakeArray, 0),
                make_u8(Op::Call, 1),
                make_u8(Op::GetBuiltin, 5),
                make_u16(Op::Push, 0),
                make_u8(Op::Call, 1),
            ])
        );
    }

    #[test]
    fn test_compile_closure_captures_free_variable() {
        let code = compile_src("fn(a) { fn(b) { a + b } }");
        let Value::Fn(inner) = &code.constants[0] else {
            panic!("expected inner function first in the pool");
        };
        assert_eq!(
            inner.instructions,
            concat(vec![
                make_u8(Op::GetFree, 0),
                make_u16(Op::GetLocal, 0),
                make(Op::Add),
                make(Op::ReturnValue),
            ])
        );
        let Value::Fn(outer) = &code.constants[1] else {
            panic!("expected outer function second in the pool");
        };
        // The outer scope loads its local `a` then materializes the closure.
        assert_eq!(
            outer.instructions,
            concat(vec![
                make_u16(Op::GetLocal, 0),
                make_closure(0, 1),
                make(Op::ReturnValue),
            ])
        );
        assert_eq!(code.instructions, make_closure(1, 0));
    }

    #[test]
    fn test_compile_closure_capture_propagates_through_scopes() {
        let code = compile_src("fn(a) { fn(b) { fn(c) { a + b + c } } }");
        let Value::Fn(innermost) = &code.constants[0] else {
            panic!("expected innermost function first");
        };
        assert_eq!(
            innermost.instructions,
            concat(vec![
                make_u8(Op::GetFree, 0),
                make_u8(Op::GetFree, 1),
                make(Op::Add),
                make_u16(Op::GetLocal, 0),
                make(Op::Add),
                make(Op::ReturnValue),
            ])
        );
        let Value::Fn(middle) = &code.constants[1] else {
            panic!("expected middle function second");
        };
        // `a` arrives via the middle scope's own free store; `b` is its local.
        assert_eq!(
            middle.instructions,
            concat(vec![
                make_u8(Op::GetFree, 0),
                make_u16(Op::GetLocal, 0),
                make_closure(0, 2),
                make(Op::ReturnValue),
            ])
        );
    }

    #[test]
    fn test_compile_recursive_function_uses_current_closure() {
        let code = compile_src("let wrap = fn(x) { wrap(x) }; wrap(1)");
        let Value::Fn(func) = &code.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            func.instructions,
            concat(vec![
                make(Op::GetCurrentClosure),
                make_u16(Op::GetLocal, 0),
                make_u8(Op::Call, 1),
                make(Op::ReturnValue),
            ])
        );
    }

    #[test]
    fn test_compile_unknown_identifier() {
        let err = compile_err("foobar");
        assert_eq!(err.message, "unknown identifier foobar");
    }

    #[test]
    fn test_compile_unknown_identifier_inside_function() {
        let err = compile_err("fn() { undefined_name }");
        assert_eq!(err.message, "unknown identifier undefined_name");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let src = r#"
            let fib = fn(n) { if (n < 2) { n } else { fib(n - 1) + fib(n - 2) } };
            let table = {"answer": fib(10), "question": "?"};
            puts(table["answer"]);
        "#;
        let first = compile_src(src);
        let second = compile_src(src);
        assert_eq!(first.instructions, second.instructions);
        assert_eq!(first.constants.len(), second.constants.len());
    }

    #[test]
    fn test_compiled_constant_indices_stay_in_pool_range() {
        let code = compile_src(r#"let a = [1, "x", 3]; {"k": a}; fn() { 7 }()"#);
        let ins = &code.instructions;
        let mut offset = 0;
        while offset < ins.len() {
            let op = Op::try_from(ins[offset]).expect("valid opcode");
            if matches!(op, Op::Push | Op::MakeClosure) {
                let idx = bytecode::read_u16(ins, offset + 1) as usize;
                assert!(idx < code.constants.len(), "constant index out of range");
            }
            offset += bytecode::instruction_size(op);
        }
    }

    #[test]
    fn test_compiled_jumps_land_on_opcode_boundaries() {
        let sources = [
            "if (1 < 2) { 10 } else { 20 }",
            "if (true) { 1 }; if (false) { 2 } else { 3 }",
            "fn(n) { if (n > 0) { n } else { 0 - n } }",
        ];
        for src in sources {
            let code = compile_src(src);
            let mut streams = vec![code.instructions.clone()];
            for constant in &code.constants {
                if let Value::Fn(func) = constant {
                    streams.push(func.instructions.clone());
                }
            }
            for ins in streams {
                // Collect every opcode boundary, then check each jump target.
                let mut boundaries = std::collections::HashSet::new();
                let mut offset = 0;
                while offset < ins.len() {
                    boundaries.insert(offset);
                    let op = Op::try_from(ins[offset]).expect("valid opcode");
                    offset += bytecode::instruction_size(op);
                }
                boundaries.insert(ins.len());

                let mut offset = 0;
                while offset < ins.len() {
                    let op = Op::try_from(ins[offset]).expect("valid opcode");
                    if matches!(op, Op::Jump | Op::JumpIfFalse) {
                        let target = bytecode::read_u16(&ins, offset + 1) as usize;
                        assert!(
                            boundaries.contains(&target),
                            "jump target {target} is not an opcode boundary in {src:?}"
                        );
                    }
                    offset += bytecode::instruction_size(op);
                }
            }
        }
    }

    #[test]
    fn test_compile_with_state_keeps_pool_and_symbols() {
        let mut compiler = Compiler::new();
        compiler.compile(&parse("let x = 41;")).unwrap();
        let first = compiler.output();
        let (symbols, constants) = compiler.into_state();

        let mut next = Compiler::with_state(symbols, constants);
        next.compile(&parse("x + 1")).unwrap();
        let second = next.output();

        // The earlier constant is still at index 0; the new one appended.
        assert_eq!(second.constants[0], Value::Int(41));
        assert_eq!(second.constants[1], Value::Int(1));
        assert_eq!(first.constants.len(), 1);
        // `x` still resolves to global slot 0.
        assert_eq!(
            second.instructions,
            concat(vec![
                make_u16(Op::GetGlobal, 0),
                make_u16(Op::Push, 1),
                make(Op::Add),
            ])
        );
    }

    #[test]
    fn test_compile_macro_literal_is_rejected() {
        let err = compile_err("let m = macro(x) { x };");
        assert!(err.message.contains("expanded before compilation"));
    }
}
