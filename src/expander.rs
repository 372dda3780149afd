//! Macro expansion.
//!
//! Expansion is a single depth-first rewrite of the AST, run between parsing
//! and compilation:
//!
//! 1. Every `let NAME = macro(params) { body }` statement registers a
//!    [`Value::Macro`] (capturing the macro environment) under `NAME` and is
//!    removed from the tree — macros do not exist at runtime.
//! 2. Every call whose callee is an identifier bound to a macro in the macro
//!    environment is *evaluated at expansion time*: the arguments are passed
//!    as quoted syntax, the body runs in the tree-walking evaluator, and the
//!    resulting quote's carried AST replaces the call site.
//!
//! Because the walk is post-order, macro calls nested inside the arguments
//! of other macro calls are expanded innermost-first, and a call site before
//! its macro's definition is simply not recognized as a macro call.

use std::fmt;
use std::rc::Rc;

use crate::ast::{self, Expr, Modifier, Program, Stmt};
use crate::evaluator;
use crate::value::{Env, MacroValue, Value};

/// A failure while evaluating a macro body at expansion time.
#[derive(Debug, Clone)]
pub struct ExpandError {
    pub message: String,
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExpandError {}

/// Expand all macros in `program`, collecting definitions into `env`.
///
/// The environment is shared with any later expansion (REPL lines reuse it,
/// so a macro defined on one line is callable on the next).
pub fn expand_macros(program: Program, env: &Env) -> Result<Program, ExpandError> {
    ast::walk_program(program, &mut MacroExpander { env })
}

struct MacroExpander<'a> {
    env: &'a Env,
}

impl MacroExpander<'_> {
    /// The macro bound to `name`, if there is one.
    fn macro_named(&self, name: &str) -> Option<Value> {
        match self.env.borrow().get(name) {
            Some(value @ Value::Macro(_)) => Some(value),
            _ => None,
        }
    }
}

impl Modifier for MacroExpander<'_> {
    type Error = ExpandError;

    fn modify_stmt(&mut self, stmt: Stmt) -> Result<Option<Stmt>, ExpandError> {
        // A macro definition is registered and elided from the output.
        if let Stmt::Let(let_stmt) = &stmt {
            if let Expr::Macro(lit) = &let_stmt.value {
                let value = Value::Macro(Rc::new(MacroValue {
                    parameters: lit.parameters.clone(),
                    body: lit.body.clone(),
                    env: self.env.clone(),
                }));
                self.env
                    .borrow_mut()
                    .set(let_stmt.name.name.clone(), value);
                return Ok(None);
            }
        }
        Ok(Some(stmt))
    }

    fn modify_expr(&mut self, expr: Expr) -> Result<Expr, ExpandError> {
        // Only calls to identifiers currently bound to a macro are expanded.
        let is_macro_call = match &expr {
            Expr::Call { function, .. } => match &**function {
                Expr::Ident(ident) => self.macro_named(&ident.name).is_some(),
                _ => false,
            },
            _ => false,
        };
        if !is_macro_call {
            return Ok(expr);
        }

        // Evaluate the call: the evaluator quotes macro arguments itself.
        match evaluator::eval_expr(&expr, self.env) {
            Ok(Value::Quote(node)) => Ok((*node).clone()),
            // A macro that produces a non-quote value leaves the call site
            // untouched.
            Ok(_) => Ok(expr),
            Err(e) => Err(ExpandError {
                message: format!("macro expansion error: {e}"),
            }),
        }
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
    use crate::value::Environment;

    fn parse(src: &str) -> Program {
        let (tokens, lex_errors) = lex(src);
        assert!(lex_errors.is_empty(), "lex errors: {lex_errors:?}");
        let (program, parse_errors) = parse_tokens(tokens);
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:?}");
        program
    }

    /// Expand and render the resulting program.
    fn expand_src(src: &str) -> Result<String, ExpandError> {
        let env = Environment::new();
        expand_macros(parse(src), &env).map(|p| p.to_string())
    }

    fn expect_expansion(src: &str, expected: &str) {
        match expand_src(src) {
            Ok(rendered) => assert_eq!(rendered, expected, "input: {src}"),
            Err(e) => panic!("expansion error for {src:?}: {e}"),
        }
    }

    #[test]
    fn test_macro_definitions_are_removed() {
        expect_expansion(
            "let m = macro(x,y){x-y};
             2",
            "2",
        );
        expect_expansion(
            "let m = macro(x,y){x-y};
             let n = macro(y,z){z-y};
             4
             let p = macro(a,b){a+b};",
            "4",
        );
    }

    #[test]
    fn test_macro_definitions_removed_inside_blocks() {
        expect_expansion(
            "if ( 5 > 2 ) {
             let x = macro(x,y){x*y};
             1
             let y = macro(x,y){x*y};
             }else{
                 let x = macro(x,y){x*y};
                 0
                 let y = macro(x,y){x*y};
             };",
            "if ( 5 > 2 ){ 1 } else { 0 }",
        );
        expect_expansion(
            "let add = fn(a,b){
                let x = macro(a,b){a-b};
                a+b
            };
            add(10,5)",
            "let add = fn (a, b) { ( a + b ) };add(10, 5)",
        );
    }

    #[test]
    fn test_macro_expansion_basic() {
        expect_expansion(
            "let minus = macro(x,y) { quote(unquote(x) - unquote(y)) };
             minus(4, 2)",
            "( 4 - 2 )",
        );
    }

    #[test]
    fn test_macro_expansion_conditional() {
        expect_expansion(
            "let conditional = macro(a, b) { quote(if (unquote(a) > 0) {unquote(a)} else{ unquote(b)}) };
             conditional(5, 10)",
            "if ( 5 > 0 ){ 5 } else { 10 }",
        );
    }

    #[test]
    fn test_macro_arguments_are_not_evaluated() {
        // `double` is undefined: if arguments were evaluated this would
        // fail, but they are passed as syntax.
        expect_expansion(
            "let callMacro = macro(f, arg) { quote(unquote(f)(unquote(arg))) };
             callMacro(double, 4)",
            "double(4)",
        );
    }

    #[test]
    fn test_macro_expanding_to_function_literal() {
        expect_expansion(
            "let makeAdder = macro(x) { quote(fn(y) { unquote(x) + y }) };
             makeAdder(5);",
            "fn (y) { ( 5 + y ) }",
        );
    }

    #[test]
    fn test_macro_without_parameters() {
        expect_expansion(
            "let constant = macro() { quote(42) };
             constant()",
            "42",
        );
        expect_expansion(
            "let ignoreArg = macro(x) { quote(100) };
             ignoreArg(50)",
            "100",
        );
    }

    #[test]
    fn test_macro_expansion_error_is_prefixed() {
        let err = expand_src(
            "let empty = macro(x) { quote() };
             empty(5)",
        )
        .expect_err("expected expansion failure");
        assert_eq!(
            err.message,
            "macro expansion error: quote supports only 1 argument"
        );
    }

    #[test]
    fn test_undefined_macro_call_is_left_alone() {
        expect_expansion("undefinedMacro(5)", "undefinedMacro(5)");
    }

    #[test]
    fn test_ternary_macro_expands_at_each_call_site() {
        expect_expansion(
            "let ternary = macro(condition, trueExpr, falseExpr) {
                quote(if (unquote(condition)) { unquote(trueExpr) } else { unquote(falseExpr) })
            };
            ternary(true,1,0)
            ternary(false,1,0)",
            "if true{ 1 } else { 0 }if false{ 1 } else { 0 }",
        );
    }

    #[test]
    fn test_unless_macro_rewrites_to_inverted_if() {
        expect_expansion(
            "let unless = macro(c, t, e){ quote(if (!(unquote(c))) { unquote(t) } else { unquote(e) }) };
             unless(10 > 5, 2, 3)",
            "if ( !( 10 > 5 ) ){ 2 } else { 3 }",
        );
    }

    #[test]
    fn test_macro_env_persists_across_expansions() {
        // As in the REPL: a macro defined in one expansion pass is visible
        // to the next one through the shared environment.
        let env = Environment::new();
        let first = expand_macros(
            parse("let minus = macro(x,y) { quote(unquote(x) - unquote(y)) };"),
            &env,
        )
        .unwrap();
        assert_eq!(first.to_string(), "");
        let second = expand_macros(parse("minus(9, 3)"), &env).unwrap();
        assert_eq!(second.to_string(), "( 9 - 3 )");
    }

    #[test]
    fn test_nested_macro_calls_expand_innermost_first() {
        expect_expansion(
            "let minus = macro(x,y) { quote(unquote(x) - unquote(y)) };
             minus(minus(10, 4), 2)",
            "( ( 10 - 4 ) - 2 )",
        );
    }
}
