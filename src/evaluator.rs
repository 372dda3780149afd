//! Tree-walking evaluator.
//!
//! This is the reference engine: it executes the AST directly against an
//! [`Environment`] chain. It exists for two reasons — it is the alternative
//! `--engine eval` backend, and it is the machinery the macro expander runs
//! at compile time (macro bodies are *evaluated*, with `quote`/`unquote`
//! controlling what stays syntax).
//!
//! `return` bubbles as a [`Value::Return`] wrapper that block evaluation
//! passes through untouched; call boundaries and the program root strip it.
//! Runtime faults are [`EvalError`]s propagated with `?`. Builtins report
//! failure as [`Value::Error`], which is converted to an `EvalError` at the
//! call site.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{self, BlockStmt, Expr, Modifier, Program, Stmt};
use crate::builtins;
use crate::token::Span;
use crate::value::{Env, Environment, FunctionValue, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime fault in the tree-walking engine.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

type EvalResult = Result<Value, EvalError>;

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluate a whole program. A bubbling `return` is unwrapped here.
pub fn eval_program(program: &Program, env: &Env) -> EvalResult {
    let mut result = Value::Null;
    for stmt in &program.statements {
        result = eval_stmt(stmt, env)?;
        if let Value::Return(value) = result {
            return Ok(*value);
        }
    }
    Ok(result)
}

/// Evaluate a single expression (used by the macro expander).
pub fn eval_expr(expr: &Expr, env: &Env) -> EvalResult {
    match expr {
        Expr::Int(value, _) => Ok(Value::Int(*value)),
        Expr::Str(value, _) => Ok(Value::str(value)),
        Expr::Bool(value, _) => Ok(Value::Bool(*value)),
        Expr::Null(_) => Ok(Value::Null),
        Expr::Ident(ident) => lookup_name(&ident.name, env),
        Expr::Prefix { op, right, .. } => {
            let operand = eval_expr(right, env)?;
            eval_prefix(op, operand)
        }
        Expr::Infix {
            left, op, right, ..
        } => {
            let left = eval_expr(left, env)?;
            let right = eval_expr(right, env)?;
            eval_infix(op, left, right)
        }
        Expr::If {
            condition,
            consequence,
            alternative,
            ..
        } => {
            let condition = eval_expr(condition, env)?;
            if condition.is_truthy() {
                eval_block(consequence, env)
            } else {
                match alternative {
                    Some(alt) => eval_block(alt, env),
                    None => Ok(Value::Null),
                }
            }
        }
        Expr::Function(lit) => Ok(Value::Function(Rc::new(FunctionValue {
            parameters: lit.parameters.clone(),
            body: lit.body.clone(),
            env: env.clone(),
        }))),
        Expr::Macro(_) => Err(EvalError::new(
            "macro literal is only valid on the right side of a let statement",
        )),
        Expr::Call {
            function,
            arguments,
            ..
        } => eval_call(function, arguments, env),
        Expr::Array { elements, .. } => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(eval_expr(element, env)?);
            }
            Ok(Value::array(values))
        }
        Expr::Hash { pairs, .. } => {
            let mut map = HashMap::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = eval_expr(key, env)?;
                let value = eval_expr(value, env)?;
                let Some(hash_key) = key.hash_key() else {
                    return Err(EvalError::new(format!(
                        "key type {} is not hashable",
                        key.type_name()
                    )));
                };
                map.insert(hash_key, value);
            }
            Ok(Value::Hash(Rc::new(map)))
        }
        Expr::Index { left, index, .. } => {
            let iterable = eval_expr(left, env)?;
            let index = eval_expr(index, env)?;
            eval_index(iterable, index)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements and blocks
// ─────────────────────────────────────────────────────────────────────────────

fn eval_stmt(stmt: &Stmt, env: &Env) -> EvalResult {
    match stmt {
        Stmt::Let(s) => {
            let value = eval_expr(&s.value, env)?;
            env.borrow_mut().set(s.name.name.clone(), value);
            Ok(Value::Null)
        }
        Stmt::Return(s) => {
            let value = eval_expr(&s.value, env)?;
            Ok(Value::Return(Box::new(value)))
        }
        Stmt::Expr(s) => eval_expr(&s.expr, env),
    }
}

/// Evaluate a block. A bubbling `return` is passed through unstripped so it
/// reaches the enclosing call boundary.
fn eval_block(block: &BlockStmt, env: &Env) -> EvalResult {
    let mut result = Value::Null;
    for stmt in &block.statements {
        result = eval_stmt(stmt, env)?;
        if matches!(result, Value::Return(_)) {
            return Ok(result);
        }
    }
    Ok(result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Names
// ─────────────────────────────────────────────────────────────────────────────

fn lookup_name(name: &str, env: &Env) -> EvalResult {
    if let Some(value) = env.borrow().get(name) {
        return Ok(value);
    }
    if let Some(builtin) = builtins::by_name(name) {
        return Ok(Value::Builtin(builtin));
    }
    Err(EvalError::new(format!("Undefined variable {name:?}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Operators
// ─────────────────────────────────────────────────────────────────────────────

fn eval_prefix(op: &str, operand: Value) -> EvalResult {
    match op {
        "!" => Ok(Value::Bool(!operand.is_truthy())),
        "-" => match operand {
            Value::Int(n) => Ok(Value::Int(-n)),
            other => Err(EvalError::new(format!(
                "Invalid type {} with operator '-'",
                other.type_name()
            ))),
        },
        other => Err(EvalError::new(format!("Unknown operator: {other}"))),
    }
}

fn eval_infix(op: &str, left: Value, right: Value) -> EvalResult {
    if left.type_name() != right.type_name() {
        return Err(EvalError::new(format!(
            "Incompatible types: {} and {}",
            left.type_name(),
            right.type_name()
        )));
    }

    match op {
        "+" => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
            _ => Err(EvalError::new(format!(
                "unsupported operand type {} with '+'",
                left.type_name()
            ))),
        },
        "-" => int_op(&left, &right, |a, b| Value::Int(a - b)),
        "*" => int_op(&left, &right, |a, b| Value::Int(a * b)),
        "/" => match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => Err(EvalError::new("Division by zero")),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
            _ => Ok(Value::Null),
        },
        "==" => Ok(eval_equality(&left, &right)),
        "!=" => match eval_equality(&left, &right) {
            Value::Bool(eq) => Ok(Value::Bool(!eq)),
            _ => Ok(Value::Null),
        },
        "<" => int_op(&left, &right, |a, b| Value::Bool(a < b)),
        ">" => int_op(&left, &right, |a, b| Value::Bool(a > b)),
        _ => Ok(Value::Null),
    }
}

/// Integer-only operators degrade to null on other operand kinds.
fn int_op(left: &Value, right: &Value, apply: impl Fn(i64, i64) -> Value) -> EvalResult {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(apply(*a, *b)),
        _ => Ok(Value::Null),
    }
}

/// Equality over the comparable kinds; null for everything else.
fn eval_equality(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Value::Bool(a == b),
        (Value::Str(a), Value::Str(b)) => Value::Bool(a == b),
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(a == b),
        _ => Value::Null,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Calls
// ─────────────────────────────────────────────────────────────────────────────

fn eval_call(function: &Expr, arguments: &[Expr], env: &Env) -> EvalResult {
    // `quote` is not a function: its argument must stay unevaluated.
    if let Expr::Ident(ident) = function {
        if ident.name == "quote" {
            if arguments.len() != 1 {
                return Err(EvalError::new("quote supports only 1 argument"));
            }
            return quote(&arguments[0], env);
        }
    }

    let callee = eval_expr(function, env)?;

    // Macro arguments are passed as quoted syntax, never evaluated.
    let args = if matches!(callee, Value::Macro(_)) {
        arguments
            .iter()
            .map(|arg| Value::Quote(Rc::new(arg.clone())))
            .collect()
    } else {
        let mut args = Vec::with_capacity(arguments.len());
        for arg in arguments {
            args.push(eval_expr(arg, env)?);
        }
        args
    };

    apply(callee, args)
}

/// Invoke a callable with already-prepared arguments.
pub fn apply(callee: Value, args: Vec<Value>) -> EvalResult {
    match callee {
        Value::Function(func) => {
            if func.parameters.len() != args.len() {
                return Err(EvalError::new(format!(
                    "expected {} parameters, got {} args",
                    func.parameters.len(),
                    args.len()
                )));
            }
            let extended = Environment::enclosed(func.env.clone());
            for (param, arg) in func.parameters.iter().zip(args) {
                extended.borrow_mut().set(param.name.clone(), arg);
            }
            let result = eval_block(&func.body, &extended)?;
            match result {
                Value::Return(value) => Ok(*value),
                other => Ok(other),
            }
        }
        Value::Macro(mac) => {
            if mac.parameters.len() != args.len() {
                return Err(EvalError::new(format!(
                    "expected {} parameters, got {} args",
                    mac.parameters.len(),
                    args.len()
                )));
            }
            let extended = Environment::enclosed(mac.env.clone());
            for (param, arg) in mac.parameters.iter().zip(args) {
                extended.borrow_mut().set(param.name.clone(), arg);
            }
            let result = eval_block(&mac.body, &extended)?;
            match result {
                Value::Return(value) => Ok(*value),
                other => Ok(other),
            }
        }
        Value::Builtin(builtin) => {
            let result = (builtin.func)(&args);
            if let Value::Error(message) = result {
                return Err(EvalError::new(message.to_string()));
            }
            Ok(result)
        }
        other => Err(EvalError::new(format!(
            "not a function: {}",
            other.type_name()
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Indexing
// ─────────────────────────────────────────────────────────────────────────────

fn eval_index(iterable: Value, index: Value) -> EvalResult {
    match iterable {
        Value::Array(elements) => {
            let Value::Int(idx) = index else {
                return Err(EvalError::new(
                    "index must be an integer for index expression in arrays",
                ));
            };
            if idx < 0 || idx >= elements.len() as i64 {
                return Err(EvalError::new(format!(
                    "index out of bounds for arr length {}",
                    elements.len()
                )));
            }
            Ok(elements[idx as usize].clone())
        }
        Value::Hash(pairs) => {
            let Some(key) = index.hash_key() else {
                return Err(EvalError::new(format!(
                    "key type {} is not hashable",
                    index.type_name()
                )));
            };
            Ok(pairs.get(&key).cloned().unwrap_or(Value::Null))
        }
        other => Err(EvalError::new(format!(
            "index expression not supported for type: {}",
            other.type_name()
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Quote / unquote
// ─────────────────────────────────────────────────────────────────────────────

/// Defer `node` as syntax, after splicing in every `unquote(…)` inside it.
fn quote(node: &Expr, env: &Env) -> EvalResult {
    let processed = process_unquotes(node.clone(), env)?;
    Ok(Value::Quote(Rc::new(processed)))
}

/// Replace every `unquote(e)` in `expr` with the syntax form of evaluating
/// `e` in the current environment.
fn process_unquotes(expr: Expr, env: &Env) -> Result<Expr, EvalError> {
    struct Unquoter<'a> {
        env: &'a Env,
    }

    impl Modifier for Unquoter<'_> {
        type Error = EvalError;

        fn modify_expr(&mut self, expr: Expr) -> Result<Expr, EvalError> {
            match expr {
                Expr::Call {
                    function,
                    arguments,
                    span,
                } => {
                    let is_unquote =
                        matches!(&*function, Expr::Ident(ident) if ident.name == "unquote");
                    if !is_unquote {
                        return Ok(Expr::Call {
                            function,
                            arguments,
                            span,
                        });
                    }
                    if arguments.len() != 1 {
                        return Err(EvalError::new("unquote() supports only 1 argument"));
                    }
                    let value = eval_expr(&arguments[0], self.env)?;
                    Ok(value_to_node(value))
                }
                other => Ok(other),
            }
        }
    }

    ast::walk_expr(expr, &mut Unquoter { env })
}

/// Convert an evaluated value back into syntax. Integers become integer
/// literals and quotes splice their carried node; everything else becomes
/// the null literal.
fn value_to_node(value: Value) -> Expr {
    match value {
        Value::Int(n) => Expr::Int(n, Span::dummy()),
        Value::Quote(node) => (*node).clone(),
        _ => Expr::Null(Span::dummy()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse_tokens;

    fn eval_src(src: &str) -> EvalResult {
        let (tokens, lex_errors) = lex(src);
        assert!(lex_errors.is_empty(), "lex errors: {lex_errors:?}");
        let (program, parse_errors) = parse_tokens(tokens);
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:?}");
        eval_program(&program, &Environment::new())
    }

    fn expect(src: &str, expected: &str) {
        match eval_src(src) {
            Ok(value) => assert_eq!(value.to_string(), expected, "input: {src}"),
            Err(e) => panic!("eval error for {src:?}: {e}"),
        }
    }

    fn expect_err(src: &str, expected: &str) {
        match eval_src(src) {
            Ok(value) => panic!("expected error for {src:?}, got {value}"),
            Err(e) => assert_eq!(e.message, expected, "input: {src}"),
        }
    }

    #[test]
    fn test_eval_arithmetic() {
        expect("1 + 2 * 3", "7");
        expect("(1 + 2) * 3", "9");
        expect("10 / 2 - 3", "2");
        expect("-5 + 10", "5");
    }

    #[test]
    fn test_eval_comparisons_and_prefix() {
        expect("1 < 2", "true");
        expect("2 < 1", "false");
        expect("3 > 1", "true");
        expect("1 == 1", "true");
        expect("1 != 1", "false");
        expect("!true", "false");
        expect("!!0", "true");
        expect(r#""a" + "b" == "ab""#, "true");
    }

    #[test]
    fn test_eval_conditionals() {
        expect("if (true) { 10 }", "10");
        expect("if (false) { 10 }", "null");
        expect("if (1 < 2) { 10 } else { 20 }", "10");
        expect("if (1 > 2) { 10 } else { 20 }", "20");
    }

    #[test]
    fn test_eval_let_and_functions() {
        expect("let x = 5; x + 5", "10");
        expect("let f = fn(x, y) { x + y }; f(3, 4)", "7");
        expect("let f = fn(x) { return x * 2; 99 }; f(4)", "8");
        expect(
            "let adder = fn(x) { fn(y) { x + y } }; adder(2)(3)",
            "5",
        );
        expect(
            "let fib = fn(n){ if (n < 2) { n } else { fib(n-1) + fib(n-2) } }; fib(10)",
            "55",
        );
    }

    #[test]
    fn test_eval_return_bubbles_through_blocks() {
        expect(
            "let f = fn() { if (true) { if (true) { return 1; } } return 2; }; f()",
            "1",
        );
        // A top-level return unwraps at the program boundary.
        expect("return 7; 8", "7");
    }

    #[test]
    fn test_eval_arrays_and_hashes() {
        expect("[1, 2 + 3][1]", "5");
        expect(r#"{"a": 1, "b": 2}["b"]"#, "2");
        expect(r#"{1: "one"}[1]"#, "one");
        expect(r#"{"a": 1}["zzz"]"#, "null");
        expect("len([1, 2, 3])", "3");
        expect("push([1], 2)", "[1, 2]");
    }

    #[test]
    fn test_eval_errors() {
        expect_err("1 / 0", "Division by zero");
        expect_err("-true", "Invalid type BOOLEAN with operator '-'");
        expect_err("1 + true", "Incompatible types: INTEGER and BOOLEAN");
        expect_err("foo", "Undefined variable \"foo\"");
        expect_err("5(1)", "not a function: INTEGER");
        expect_err(
            "let f = fn(x) { x }; f(1, 2)",
            "expected 1 parameters, got 2 args",
        );
        expect_err("first([])", "empty array");
        expect_err("[1][3]", "index out of bounds for arr length 1");
        expect_err("{[1]: 2}", "key type ARRAY is not hashable");
    }

    // ── Quote / unquote ──────────────────────────────────────────────────────

    fn expect_quote(src: &str, expected_node: &str) {
        match eval_src(src) {
            Ok(Value::Quote(node)) => assert_eq!(node.to_string(), expected_node),
            Ok(other) => panic!("expected a quote for {src:?}, got {other}"),
            Err(e) => panic!("eval error for {src:?}: {e}"),
        }
    }

    #[test]
    fn test_quote_defers_evaluation() {
        expect_quote("quote(5)", "5");
        expect_quote("quote(5 + 8)", "( 5 + 8 )");
        expect_quote("quote(foobar)", "foobar");
        expect_quote("quote(foobar + barfoo)", "( foobar + barfoo )");
    }

    #[test]
    fn test_unquote_splices_values() {
        expect_quote("quote(unquote(4))", "4");
        expect_quote("quote(unquote(4 + 4))", "8");
        expect_quote("quote(8 + unquote(4 + 4))", "( 8 + 8 )");
        expect_quote("quote(unquote(4 + 4) + 8)", "( 8 + 8 )");
        expect_quote(
            "let foobar = 8; quote(unquote(foobar) + unquote(foobar))",
            "( 8 + 8 )",
        );
    }

    #[test]
    fn test_unquote_splices_quoted_nodes() {
        expect_quote(
            "let quotedInfix = quote(4 + 4); quote(unquote(4 + 4) + unquote(quotedInfix))",
            "( 8 + ( 4 + 4 ) )",
        );
        expect_quote("quote(unquote(quote(4 + 4)))", "( 4 + 4 )");
    }

    #[test]
    fn test_unquote_of_non_representable_value_is_null_node() {
        // Booleans have no syntax conversion: they become the null literal.
        expect_quote("quote(unquote(true))", "null");
    }

    #[test]
    fn test_quote_argument_count_is_checked() {
        expect_err("quote()", "quote supports only 1 argument");
        expect_err("quote(1, 2)", "quote supports only 1 argument");
        expect_err("quote(unquote())", "unquote() supports only 1 argument");
    }

    #[test]
    fn test_unquote_evaluates_in_current_environment() {
        expect_quote("let x = 3; quote(unquote(x * 2))", "6");
        expect_err("quote(unquote(missing))", "Undefined variable \"missing\"");
    }
}
