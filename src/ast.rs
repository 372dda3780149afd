//! Abstract Syntax Tree (AST) node types for the YAL language.
//!
//! The AST is the output of the parser and the input to the macro expander
//! and both execution engines. Every node carries a [`Span`] so diagnostics
//! can point back into the original source text.
//!
//! Besides the node types this module provides:
//!
//! - `Display` impls that render a node back to canonical source form. The
//!   rendering is stable and is what the macro expansion tests assert on.
//! - A structure-sharing depth-first transform ([`walk_program`]) driven by a
//!   [`Modifier`], used by the macro expander to rewrite the tree without
//!   mutating the input.
//!
//! All strings are owned so the tree can be freely moved and stored without
//! tying its lifetime to the source text.

use std::fmt;

use crate::token::Span;

// ─────────────────────────────────────────────────────────────────────────────
// Program
// ─────────────────────────────────────────────────────────────────────────────

/// The root node: a parsed YAL program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{stmt}")?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// A single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name = expr;`
    Let(LetStmt),
    /// `return expr;`
    Return(ReturnStmt),
    /// A bare expression used as a statement.
    Expr(ExprStmt),
}

/// `let name = expr;`
#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

/// `return expr;`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Expr,
    pub span: Span,
}

/// An expression statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let(s) => write!(f, "let {} = {};", s.name, s.value),
            Stmt::Return(s) => write!(f, "return {};", s.value),
            Stmt::Expr(s) => write!(f, "{}", s.expr),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blocks
// ─────────────────────────────────────────────────────────────────────────────

/// A `{ … }` block: function bodies and conditional branches.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl fmt::Display for BlockStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for stmt in &self.statements {
            write!(f, "{stmt} ")?;
        }
        write!(f, "}}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// An identifier with its source span. Used for names in `let` statements,
/// parameter lists, and identifier expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

/// A single expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// An integer literal.
    Int(i64, Span),
    /// A string literal.
    Str(String, Span),
    /// `true` / `false`.
    Bool(bool, Span),
    /// The null literal. The parser never produces this node; it only enters
    /// the tree when `unquote` converts a non-representable value back to
    /// syntax.
    Null(Span),
    /// A name reference.
    Ident(Ident),
    /// `!expr` or `-expr`.
    Prefix {
        /// The operator lexeme (`"!"` or `"-"`).
        op: String,
        right: Box<Expr>,
        span: Span,
    },
    /// `left OP right` for the seven binary operators.
    Infix {
        left: Box<Expr>,
        /// The operator lexeme (`"+"`, `"=="`, `"<"`, …).
        op: String,
        right: Box<Expr>,
        span: Span,
    },
    /// `if (cond) { … } else { … }` — the `else` arm is optional.
    If {
        condition: Box<Expr>,
        consequence: BlockStmt,
        alternative: Option<BlockStmt>,
        span: Span,
    },
    /// `fn(params) { body }`.
    Function(FunctionLit),
    /// `macro(params) { body }`.
    Macro(MacroLit),
    /// `callee(args…)`.
    Call {
        function: Box<Expr>,
        arguments: Vec<Expr>,
        span: Span,
    },
    /// `[e1, e2, …]`.
    Array { elements: Vec<Expr>, span: Span },
    /// `{k1: v1, k2: v2, …}`. Pairs are kept in source order so compilation
    /// is deterministic.
    Hash {
        pairs: Vec<(Expr, Expr)>,
        span: Span,
    },
    /// `left[index]`.
    Index {
        left: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
}

/// `fn(params) { body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub parameters: Vec<Ident>,
    pub body: BlockStmt,
    pub span: Span,
}

/// `macro(params) { body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroLit {
    pub parameters: Vec<Ident>,
    pub body: BlockStmt,
    pub span: Span,
}

impl Expr {
    /// The source span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, span)
            | Expr::Str(_, span)
            | Expr::Bool(_, span)
            | Expr::Null(span)
            | Expr::Prefix { span, .. }
            | Expr::Infix { span, .. }
            | Expr::If { span, .. }
            | Expr::Call { span, .. }
            | Expr::Array { span, .. }
            | Expr::Hash { span, .. }
            | Expr::Index { span, .. } => *span,
            Expr::Ident(ident) => ident.span,
            Expr::Function(lit) => lit.span,
            Expr::Macro(lit) => lit.span,
        }
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Ident]) -> fmt::Result {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{param}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(value, _) => write!(f, "{value}"),
            Expr::Str(value, _) => write!(f, "\"{value}\""),
            Expr::Bool(value, _) => write!(f, "{value}"),
            Expr::Null(_) => write!(f, "null"),
            Expr::Ident(ident) => write!(f, "{ident}"),
            Expr::Prefix { op, right, .. } => write!(f, "( {op}{right} )"),
            Expr::Infix {
                left, op, right, ..
            } => write!(f, "( {left} {op} {right} )"),
            Expr::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                write!(f, "if {condition}{consequence}")?;
                if let Some(alt) = alternative {
                    write!(f, " else {alt}")?;
                }
                Ok(())
            }
            Expr::Function(lit) => {
                write!(f, "fn (")?;
                write_params(f, &lit.parameters)?;
                write!(f, ") {}", lit.body)
            }
            Expr::Macro(lit) => {
                write!(f, "macro (")?;
                write_params(f, &lit.parameters)?;
                write!(f, ") {}", lit.body)
            }
            Expr::Call {
                function,
                arguments,
                ..
            } => {
                write!(f, "{function}(")?;
                for (i, arg) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Array { elements, .. } => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Expr::Hash { pairs, .. } => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Expr::Index { left, index, .. } => write!(f, "{left}[{index}]"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree transformation
// ─────────────────────────────────────────────────────────────────────────────

/// A depth-first AST transform. Child nodes are rebuilt before the modifier
/// sees their parent, so a modifier observes fully-transformed subtrees.
///
/// The default implementations keep every node unchanged; implementors
/// override only the hooks they care about.
pub trait Modifier {
    type Error;

    /// Transform a statement after its children have been rebuilt.
    ///
    /// Returning `Ok(None)` removes the statement from its enclosing block.
    fn modify_stmt(&mut self, stmt: Stmt) -> Result<Option<Stmt>, Self::Error> {
        Ok(Some(stmt))
    }

    /// Transform an expression after its children have been rebuilt.
    fn modify_expr(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        Ok(expr)
    }
}

/// Rebuild `program` through `modifier`, depth-first.
///
/// The input is consumed; unchanged subtrees are moved, not cloned.
pub fn walk_program<M: Modifier>(program: Program, modifier: &mut M) -> Result<Program, M::Error> {
    let mut statements = Vec::with_capacity(program.statements.len());
    for stmt in program.statements {
        if let Some(stmt) = walk_stmt(stmt, modifier)? {
            statements.push(stmt);
        }
    }
    Ok(Program { statements })
}

fn walk_stmt<M: Modifier>(stmt: Stmt, modifier: &mut M) -> Result<Option<Stmt>, M::Error> {
    let rebuilt = match stmt {
        Stmt::Let(s) => Stmt::Let(LetStmt {
            name: s.name,
            value: walk_expr(s.value, modifier)?,
            span: s.span,
        }),
        Stmt::Return(s) => Stmt::Return(ReturnStmt {
            value: walk_expr(s.value, modifier)?,
            span: s.span,
        }),
        Stmt::Expr(s) => Stmt::Expr(ExprStmt {
            expr: walk_expr(s.expr, modifier)?,
            span: s.span,
        }),
    };
    modifier.modify_stmt(rebuilt)
}

fn walk_block<M: Modifier>(block: BlockStmt, modifier: &mut M) -> Result<BlockStmt, M::Error> {
    let mut statements = Vec::with_capacity(block.statements.len());
    for stmt in block.statements {
        if let Some(stmt) = walk_stmt(stmt, modifier)? {
            statements.push(stmt);
        }
    }
    Ok(BlockStmt {
        statements,
        span: block.span,
    })
}

fn walk_exprs<M: Modifier>(exprs: Vec<Expr>, modifier: &mut M) -> Result<Vec<Expr>, M::Error> {
    exprs
        .into_iter()
        .map(|e| walk_expr(e, modifier))
        .collect()
}

/// Rebuild a single expression tree through `modifier`, depth-first. Used by
/// `quote` to splice `unquote` results into a quoted fragment.
pub fn walk_expr<M: Modifier>(expr: Expr, modifier: &mut M) -> Result<Expr, M::Error> {
    let rebuilt = match expr {
        Expr::Prefix { op, right, span } => Expr::Prefix {
            op,
            right: Box::new(walk_expr(*right, modifier)?),
            span,
        },
        Expr::Infix {
            left,
            op,
            right,
            span,
        } => Expr::Infix {
            left: Box::new(walk_expr(*left, modifier)?),
            op,
            right: Box::new(walk_expr(*right, modifier)?),
            span,
        },
        Expr::If {
            condition,
            consequence,
            alternative,
            span,
        } => Expr::If {
            condition: Box::new(walk_expr(*condition, modifier)?),
            consequence: walk_block(consequence, modifier)?,
            alternative: alternative
                .map(|alt| walk_block(alt, modifier))
                .transpose()?,
            span,
        },
        Expr::Function(lit) => Expr::Function(FunctionLit {
            parameters: lit.parameters,
            body: walk_block(lit.body, modifier)?,
            span: lit.span,
        }),
        Expr::Call {
            function,
            arguments,
            span,
        } => Expr::Call {
            function: Box::new(walk_expr(*function, modifier)?),
            arguments: walk_exprs(arguments, modifier)?,
            span,
        },
        Expr::Array { elements, span } => Expr::Array {
            elements: walk_exprs(elements, modifier)?,
            span,
        },
        Expr::Hash { pairs, span } => Expr::Hash {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| Ok((walk_expr(k, modifier)?, walk_expr(v, modifier)?)))
                .collect::<Result<_, M::Error>>()?,
            span,
        },
        Expr::Index { left, index, span } => Expr::Index {
            left: Box::new(walk_expr(*left, modifier)?),
            index: Box::new(walk_expr(*index, modifier)?),
            span,
        },
        // Leaves, and macro literals. Macro bodies are deliberately opaque to
        // the walker: their contents only become live code after expansion.
        other => other,
    };
    modifier.modify_expr(rebuilt)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
