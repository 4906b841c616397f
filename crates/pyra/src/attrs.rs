//! Attribute tables: the per-object namespace that backs every heap value's
//! attribute access, class bodies, and instance state.
//!
//! An attribute table here is just the *own entries* of one heap object --
//! name to value, in insertion order. The parent chain (a class's bases, or
//! an instance's class) is **not** stored here; it lives on
//! [`crate::heap::HeapObject::parents`] as a list of [`crate::heap::HeapId`]s,
//! because every parent in the chain is itself a heap object that the
//! garbage collector must be able to trace and the refcounter must be able
//! to pin. [`crate::heap::Heap::get_attr`] walks `attrs` then `parents`
//! depth-first to perform a full lookup.
//!
//! Tables are copy-on-write: cloning an `AttrTable` is an `Rc` bump, and the
//! first write through a cloned handle forks a private copy via
//! [`Rc::make_mut`]. This is how a class's instances can start out sharing
//! the class's own table (e.g. a default-filled record) and only pay for a
//! private copy once one of them actually sets an attribute of its own.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::intern::Symbol;
use crate::value::Value;

/// A copy-on-write map of a single heap object's own attributes.
#[derive(Debug, Clone, Default)]
pub struct AttrTable(Rc<IndexMap<Symbol, Value>>);

impl AttrTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Symbol) -> Option<Value> {
        self.0.get(&name).copied()
    }

    pub fn contains(&self, name: Symbol) -> bool {
        self.0.contains_key(&name)
    }

    /// Sets `name` to `value`, forking a private copy of the underlying map
    /// first if it is currently shared with another table (copy-on-write).
    /// Returns the previous value, if any.
    pub fn set(&mut self, name: Symbol, value: Value) -> Option<Value> {
        Rc::make_mut(&mut self.0).insert(name, value)
    }

    pub fn remove(&mut self, name: Symbol) -> Option<Value> {
        Rc::make_mut(&mut self.0).shift_remove(&name)
    }

    pub fn keys(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pushes every `Value::Ref` held directly in this table's own entries
    /// onto `out`. Used by the collector's mark pass and by the refcount
    /// teardown path to find a heap object's direct children.
    pub fn collect_ref_children(&self, out: &mut Vec<crate::heap::HeapId>) {
        for v in self.0.values() {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn cow_write_does_not_mutate_the_shared_original() {
        let mut interner = Interner::new();
        let x = interner.intern("x");

        let original = AttrTable::new();
        let mut shared = original.clone();
        shared.set(x, Value::Int(2));

        assert_eq!(shared.get(x), Some(Value::Int(2)));
        assert_eq!(original.get(x), None);
    }

    #[test]
    fn write_through_sole_owner_mutates_in_place() {
        let mut interner = Interner::new();
        let y = interner.intern("y");

        let mut table = AttrTable::new();
        table.set(y, Value::Int(1));
        table.set(y, Value::Int(2));
        assert_eq!(table.get(y), Some(Value::Int(2)));
    }
}
