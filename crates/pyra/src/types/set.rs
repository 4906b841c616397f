//! The `set` builtin type, built the same way as [`crate::types::dict::Dict`]
//! but storing only keys.

use indexmap::IndexMap;

use crate::heap::{Heap, HeapId};
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Set {
    buckets: IndexMap<u64, Vec<Value>>,
    len: usize,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `value`, returning `false` if an equal value was already
    /// present (in which case the caller still owns the refcount on
    /// `value` and must drop it).
    pub fn insert(&mut self, heap: &Heap, value: Value) -> bool {
        let hash = heap.py_hash(value);
        let bucket = self.buckets.entry(hash).or_default();
        if bucket.iter().any(|v| heap.py_eq(*v, value)) {
            return false;
        }
        bucket.push(value);
        self.len += 1;
        true
    }

    pub fn contains(&self, heap: &Heap, value: Value) -> bool {
        let hash = heap.py_hash(value);
        self.buckets
            .get(&hash)
            .is_some_and(|bucket| bucket.iter().any(|v| heap.py_eq(*v, value)))
    }

    pub fn remove(&mut self, heap: &Heap, value: Value) -> Option<Value> {
        let hash = heap.py_hash(value);
        let bucket = self.buckets.get_mut(&hash)?;
        let idx = bucket.iter().position(|v| heap.py_eq(*v, value))?;
        let removed = bucket.remove(idx);
        self.len -= 1;
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.buckets.values().flatten().copied()
    }

    pub fn collect_ref_children(&self, out: &mut Vec<HeapId>) {
        for v in self.iter() {
            if let Value::Ref(id) = v {
                out.push(id);
            }
        }
    }
}
