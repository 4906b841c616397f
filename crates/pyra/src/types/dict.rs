//! The `dict` builtin type.
//!
//! Keys are compared/hashed by Python equality, not Rust's `PartialEq` on
//! `Value` alone (container hashing must dispatch through the heap for
//! string/tuple contents). Collisions are resolved with an explicit bucket
//! vector behind an order-preserving index, rather than leaning on a
//! `HashMap<Value, Value>` that can't exist since `Value` by itself doesn't
//! carry the heap context `Hash` needs.

use indexmap::IndexMap;

use crate::heap::{Heap, HeapId};
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Dict {
    buckets: IndexMap<u64, Vec<(Value, Value)>>,
    len: usize,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `key -> value`, taking ownership of both (caller must already
    /// hold their strong references). Returns the previous value, if any,
    /// still owned by the caller to drop.
    pub fn insert(&mut self, heap: &Heap, key: Value, value: Value) -> Option<Value> {
        let hash = heap.py_hash(key);
        let bucket = self.buckets.entry(hash).or_default();
        for (k, v) in bucket.iter_mut() {
            if heap.py_eq(*k, key) {
                return Some(std::mem::replace(v, value));
            }
        }
        bucket.push((key, value));
        self.len += 1;
        None
    }

    pub fn get(&self, heap: &Heap, key: Value) -> Option<Value> {
        let hash = heap.py_hash(key);
        let bucket = self.buckets.get(&hash)?;
        bucket.iter().find(|(k, _)| heap.py_eq(*k, key)).map(|(_, v)| *v)
    }

    pub fn remove(&mut self, heap: &Heap, key: Value) -> Option<(Value, Value)> {
        let hash = heap.py_hash(key);
        let bucket = self.buckets.get_mut(&hash)?;
        let idx = bucket.iter().position(|(k, _)| heap.py_eq(*k, key))?;
        let pair = bucket.remove(idx);
        self.len -= 1;
        Some(pair)
    }

    pub fn contains(&self, heap: &Heap, key: Value) -> bool {
        self.get(heap, key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.buckets.values().flatten().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = Value> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn collect_ref_children(&self, out: &mut Vec<HeapId>) {
        for (k, v) in self.iter() {
            if let Value::Ref(id) = k {
                out.push(id);
            }
            if let Value::Ref(id) = v {
                out.push(id);
            }
        }
    }
}
