//! String interning for identifiers and attribute names.
//!
//! Every variable, parameter, and attribute name the lexer produces is
//! interned into a [`Symbol`] during lexing/parsing. Interning keeps name
//! comparisons (capture analysis, attribute lookup, `global`/`nonlocal`
//! resolution) down to an integer compare instead of repeated string
//! hashing, and lets the compiler and executor pass names around as `Copy`
//! values.
//!
//! Runtime string *values* (literals the script constructs or manipulates)
//! are not interned here and live on the heap as ordinary `String`s
//! instead, since unlike identifiers they are mutated, concatenated, and
//! exposed to the host as plain string objects.

use ahash::AHashMap;

/// An interned identifier or attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pre-interned attribute name constants used by the compiler and dunder
/// dispatch so hot paths (`__init__`, `__iadd__`, iteration protocol) never
/// need to re-intern.
pub mod sym {
    use super::Symbol;

    pub const NAMES: &[&str] = &[
        "__init__",
        "__iter__",
        "__next__",
        "__contains__",
        "__len__",
        "__repr__",
        "__str__",
        "__eq__",
        "__add__",
        "__iadd__",
        "__sub__",
        "__name__",
        "__class__",
        "__bases__",
        "__module__",
        "_message",
        "__mul__",
        "__truediv__",
        "__floordiv__",
        "__mod__",
        "__pow__",
        "__and__",
        "__or__",
        "__xor__",
        "__lshift__",
        "__rshift__",
        "__lt__",
        "__le__",
        "__ne__",
        "__gt__",
        "__ge__",
        "__neg__",
        "__pos__",
        "__invert__",
        "__hash__",
        "__bool__",
        "__int__",
        "__float__",
        "__index__",
        "__getitem__",
        "__setitem__",
        "__call__",
        "__enter__",
        "__exit__",
        "__doc__",
        "__new__",
    ];

    pub const INIT: Symbol = Symbol(0);
    pub const ITER: Symbol = Symbol(1);
    pub const NEXT: Symbol = Symbol(2);
    pub const CONTAINS: Symbol = Symbol(3);
    pub const LEN: Symbol = Symbol(4);
    pub const REPR: Symbol = Symbol(5);
    pub const STR: Symbol = Symbol(6);
    pub const EQ: Symbol = Symbol(7);
    pub const ADD: Symbol = Symbol(8);
    pub const IADD: Symbol = Symbol(9);
    pub const SUB: Symbol = Symbol(10);
    pub const NAME: Symbol = Symbol(11);
    pub const CLASS: Symbol = Symbol(12);
    pub const BASES: Symbol = Symbol(13);
    pub const MODULE: Symbol = Symbol(14);
    pub const MESSAGE: Symbol = Symbol(15);
    pub const MUL: Symbol = Symbol(16);
    pub const TRUEDIV: Symbol = Symbol(17);
    pub const FLOORDIV: Symbol = Symbol(18);
    pub const MOD: Symbol = Symbol(19);
    pub const POW: Symbol = Symbol(20);
    pub const AND: Symbol = Symbol(21);
    pub const OR: Symbol = Symbol(22);
    pub const XOR: Symbol = Symbol(23);
    pub const LSHIFT: Symbol = Symbol(24);
    pub const RSHIFT: Symbol = Symbol(25);
    pub const LT: Symbol = Symbol(26);
    pub const LE: Symbol = Symbol(27);
    pub const NE: Symbol = Symbol(28);
    pub const GT: Symbol = Symbol(29);
    pub const GE: Symbol = Symbol(30);
    pub const NEG: Symbol = Symbol(31);
    pub const POS: Symbol = Symbol(32);
    pub const INVERT: Symbol = Symbol(33);
    pub const HASH: Symbol = Symbol(34);
    pub const BOOL: Symbol = Symbol(35);
    pub const INT: Symbol = Symbol(36);
    pub const FLOAT: Symbol = Symbol(37);
    pub const INDEX: Symbol = Symbol(38);
    pub const GETITEM: Symbol = Symbol(39);
    pub const SETITEM: Symbol = Symbol(40);
    pub const CALL: Symbol = Symbol(41);
    pub const ENTER: Symbol = Symbol(42);
    pub const EXIT: Symbol = Symbol(43);
    pub const DOC: Symbol = Symbol(44);
    pub const NEW: Symbol = Symbol(45);
}

/// A deduplicated, append-only table of interned names.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    names: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Self::default();
        for &name in sym::NAMES {
            interner.intern(name);
        }
        interner
    }

    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(&id) = self.lookup.get(text) {
            return id;
        }
        let id = Symbol(self.names.len() as u32);
        self.names.push(text.into());
        self.lookup.insert(text.into(), id);
        id
    }

    pub fn resolve(&self, symbol: Symbol) -> &str {
        &self.names[symbol.index()]
    }

    /// Looks up an already-interned name without creating a new one.
    pub fn lookup(&self, text: &str) -> Option<Symbol> {
        self.lookup.get(text).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinterning_same_text_returns_same_symbol() {
        let mut interner = Interner::new();
        let a = interner.intern("frobnicate");
        let b = interner.intern("frobnicate");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "frobnicate");
    }

    #[test]
    fn well_known_symbols_resolve_to_their_names() {
        let interner = Interner::new();
        assert_eq!(interner.resolve(sym::INIT), "__init__");
        assert_eq!(interner.resolve(sym::MESSAGE), "_message");
    }
}
