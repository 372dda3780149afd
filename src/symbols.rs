//! Lexically scoped symbol resolution for the compiler.
//!
//! A [`SymbolTable`] maps names to [`Symbol`]s within one compilation scope
//! and links outward to its enclosing scope. Resolution distinguishes five
//! symbol kinds:
//!
//! - `Global` — defined at the root table; loaded with `OpGetGlobal`.
//! - `Local` — defined in a nested table; loaded with `OpGetLocal`.
//! - `Builtin` — resolved from the fixed builtin table, only at the root and
//!   only after the outer chain is exhausted.
//! - `Free` — a name that resolved to a local (or free) of an *enclosing*
//!   function. Lookup promotes such symbols into the current table and
//!   records the original in `free_symbols`; the compiler later emits loads
//!   for them in the enclosing scope, which is what propagates captures
//!   outward through arbitrarily deep nesting.
//! - `Function` — the name a function literal was bound to, visible inside
//!   its own body; loaded with `OpGetCurrentClosure`.
//!
//! Index allocation is scope-local: the root counts global slots, each
//! nested table counts frame-local slots (parameters included).

use std::collections::HashMap;

use crate::builtins;

/// The resolution kind of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The current function's own name.
    Function,
}

/// A resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One scope's name→symbol store, linked to its enclosing scope.
#[derive(Debug, Default)]
pub struct SymbolTable {
    store: HashMap<String, Symbol>,
    outer: Option<Box<SymbolTable>>,
    /// Originals of promoted free symbols, in promotion order. The i-th
    /// entry corresponds to free index i.
    free_symbols: Vec<Symbol>,
    /// Count of locally allocated slots (globals at the root, locals
    /// elsewhere; free promotions do not count).
    definitions: usize,
}

impl SymbolTable {
    /// Create a root table. Definitions made here become `Global`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table enclosed by `outer`. Definitions made here become
    /// `Local`.
    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            store: HashMap::new(),
            outer: Some(Box::new(outer)),
            free_symbols: Vec::new(),
            definitions: 0,
        }
    }

    /// Detach this table from its enclosing scope.
    ///
    /// Returns `(inner, outer)`; `outer` is `None` when called on the root.
    pub fn split_outer(mut self) -> (SymbolTable, Option<SymbolTable>) {
        let outer = self.outer.take().map(|b| *b);
        (self, outer)
    }

    /// `true` for the root table.
    pub fn is_root(&self) -> bool {
        self.outer.is_none()
    }

    /// The promoted free symbols, in promotion order.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// Number of slots allocated in this scope (parameters included; free
    /// and builtin symbols excluded). Used as `num_locals` for compiled
    /// functions.
    pub fn len(&self) -> usize {
        self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.definitions == 0
    }

    /// Define `name` in this scope, or return the existing symbol if the
    /// name is already bound *in this scope* (repeated `let` rebinds the
    /// same slot).
    pub fn define(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.store.get(name) {
            return existing.clone();
        }
        let scope = if self.is_root() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.definitions += 1;
        symbol
    }

    /// Bind `name` as the current function's self-reference.
    pub fn define_function_self(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: self.definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.definitions += 1;
        symbol
    }

    /// Record `original` (a local or free of an enclosing scope) as captured
    /// by this scope, and return the `Free` symbol it resolves to here.
    fn define_free(&mut self, original: Symbol) -> Symbol {
        let name = original.name.clone();
        self.free_symbols.push(original);
        let symbol = Symbol {
            name: name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(name, symbol.clone());
        symbol
    }

    /// Resolve `name`, searching this scope then outward.
    ///
    /// A hit in an enclosing *function* scope (`Local` or `Free`) is
    /// promoted to a `Free` symbol here. At the root, after the chain is
    /// exhausted, the builtin table is consulted.
    pub fn lookup(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let outer_hit = match self.outer.as_mut() {
            Some(outer) => outer.lookup(name),
            None => {
                return builtins::position(name).map(|index| Symbol {
                    name: name.to_string(),
                    scope: SymbolScope::Builtin,
                    index,
                })
            }
        };
        let symbol = outer_hit?;
        match symbol.scope {
            SymbolScope::Local | SymbolScope::Free => Some(self.define_free(symbol)),
            _ => Some(symbol),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
