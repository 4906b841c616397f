//! The object heap: an arena of reference-counted, garbage-collected
//! objects, each with its own attribute table and parent chain.
//!
//! Two lifetime mechanisms coexist deliberately, matching the data model:
//!
//! - **Strong reference counting** (`HeapObject::strong_refcount`) is the
//!   host-visible pin: every [`Value::clone_with_heap`]/[`Value::drop_with_heap`]
//!   pair increments/decrements it, and the host API's "pin"/"unpin" calls
//!   manipulate it directly. An object can reach refcount zero and still be
//!   alive a moment longer if the tracing collector hasn't run yet; it is
//!   only actually freed once both (a) its refcount is zero and (b) nothing
//!   reachable from a GC root points to it.
//! - **Mark-sweep tracing** ([`Heap::collect_garbage`]) is what actually
//!   reclaims cyclic structures (e.g. two instances that reference each
//!   other) that pure refcounting could never free. It runs automatically
//!   whenever the live object count has grown past `gc_run_factor` times
//!   the count after the previous collection, and can be forced by the
//!   host.
//!
//! In practice, `dec_ref` reaching zero frees an object immediately when
//! its children have no other referrers (the common case, and the fast
//! path); the tracing collector exists for the cyclic case and for
//! reclaiming garbage that a host forgot to unpin.

use ahash::AHashSet;

use crate::attrs::AttrTable;
use crate::class::ClassRecord;
use crate::exceptions::{ExcType, ResourceError, RunError, TraceFrame};
use crate::function::FunctionRecord;
use crate::intern::{Interner, Symbol};
use crate::modules::ModuleRecord;
use crate::types::bytes::Bytes;
use crate::types::dict::Dict;
use crate::types::file::FileHandle;
use crate::types::iterator::IterKind;
use crate::types::list::List;
use crate::types::set::Set;
use crate::value::{builtin_type_name, Value};

/// An index into the heap's object arena. Reused after the slot it names is
/// freed, so a `HeapId` is only a valid handle for as long as something
/// keeps its refcount above zero (or a GC root reaches it); comparing
/// `HeapId`s across a collection that freed and reallocated the slot is a
/// logic error the same way comparing a stale raw pointer would be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub fn identity(self) -> i64 {
        i64::from(self.0)
    }
}

/// Every kind of heap-resident data in the object model.
#[derive(Debug)]
pub enum HeapData {
    Str(String),
    Bytes(Bytes),
    Tuple(Vec<Value>),
    List(List),
    Dict(Dict),
    Set(Set),
    Function(FunctionRecord),
    BoundMethod { receiver: Value, func: HeapId },
    Class(ClassRecord),
    /// A plain instance of a user-defined class. All state lives in the
    /// owning `HeapObject`'s `attrs`/`parents` fields.
    Instance,
    Exception { exc_type: ExcType, trace: Vec<TraceFrame> },
    Module(ModuleRecord),
    Slice { start: Value, stop: Value, step: Value },
    Range { start: i64, stop: i64, step: i64 },
    Iterator(IterKind),
    File(FileHandle),
    /// A one-slot box shared between an enclosing frame and the nested
    /// closures that capture one of its variables via `nonlocal`.
    Cell(Value),
    /// A native (host-registered or builtin) callable or exception type.
    /// See `crate::builtins::BuiltinId`.
    Builtin(crate::builtins::BuiltinId),
}

/// One slot in the heap arena.
#[derive(Debug)]
pub struct HeapObject {
    pub data: HeapData,
    pub attrs: AttrTable,
    /// Attribute-lookup fallback chain: for an instance, its class; for a
    /// class, its declared base classes, in MRO order.
    pub parents: Vec<HeapId>,
    /// Callables run once, in order, just before this object is actually
    /// freed (either by refcount reaching zero or by the tracing
    /// collector). Errors raised by a finalizer are reported to the host's
    /// configured print sink and otherwise swallowed, matching CPython's
    /// "exceptions in `__del__` are ignored" behavior.
    pub finalizers: Vec<Value>,
    pub strong_refcount: u32,
    marked: bool,
}

impl HeapObject {
    fn collect_children(&self, out: &mut Vec<HeapId>) {
        out.extend_from_slice(&self.parents);
        self.attrs.collect_ref_children(out);
        match &self.data {
            HeapData::Tuple(items) => {
                for v in items {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            HeapData::List(list) => list.collect_ref_children(out),
            HeapData::Dict(dict) => dict.collect_ref_children(out),
            HeapData::Set(set) => set.collect_ref_children(out),
            HeapData::BoundMethod { receiver, func } => {
                if let Value::Ref(id) = receiver {
                    out.push(*id);
                }
                out.push(*func);
            }
            HeapData::Function(f) => {
                for v in &f.defaults {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
                for (_, v) in &f.closure {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            HeapData::Slice { start, stop, step } => {
                for v in [start, stop, step] {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            HeapData::Iterator(iter) => iter.collect_ref_children(out),
            HeapData::Cell(v) => {
                if let Value::Ref(id) = v {
                    out.push(*id);
                }
            }
            HeapData::Builtin(b) => b.collect_ref_children(out),
            HeapData::Exception { .. }
            | HeapData::Str(_)
            | HeapData::Bytes(_)
            | HeapData::Class(_)
            | HeapData::Instance
            | HeapData::Module(_)
            | HeapData::Range { .. }
            | HeapData::File(_) => {}
        }
    }
}

/// Resource and GC configuration, frozen at context creation (the
/// `max_alloc`/`gc_run_factor` knobs from the external configuration).
#[derive(Debug, Clone, Copy)]
pub struct HeapLimits {
    pub max_alloc: usize,
    pub gc_run_factor: f64,
}

impl Default for HeapLimits {
    fn default() -> Self {
        Self {
            max_alloc: 1_000_000,
            gc_run_factor: 2.0,
        }
    }
}

pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free_list: Vec<u32>,
    live_count: usize,
    gc_threshold: usize,
    limits: HeapLimits,
    memory_error: Option<Value>,
    recursion_error: Option<Value>,
    /// Total successful collections run, exposed for diagnostics/tests.
    pub collections_run: u64,
    /// The one name table shared by the lexer, compiler, and every heap
    /// object's attribute keys, so a `Symbol` minted while parsing can be
    /// resolved back to text when rendering a `repr()` at runtime.
    interner: Interner,
}

impl Heap {
    pub fn new(limits: HeapLimits) -> Self {
        Self {
            objects: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
            gc_threshold: 64,
            limits,
            memory_error: None,
            recursion_error: None,
            collections_run: 0,
            interner: Interner::new(),
        }
    }

    pub fn intern(&mut self, text: &str) -> Symbol {
        self.interner.intern(text)
    }

    pub fn resolve(&self, symbol: Symbol) -> &str {
        self.interner.resolve(symbol)
    }

    pub fn resolve_or_none(&self, text: &str) -> Option<Symbol> {
        self.interner.lookup(text)
    }

    pub fn limits(&self) -> HeapLimits {
        self.limits
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Installs the permanent `MemoryError`/`RecursionError` singletons.
    /// Must be called once, before any script code runs, so the resource
    /// limits below never need to allocate to report themselves.
    pub(crate) fn init_singletons(&mut self) {
        let mem = self.alloc_unchecked(HeapData::Exception {
            exc_type: ExcType::MemoryError,
            trace: Vec::new(),
        });
        self.pin(mem);
        self.memory_error = Some(Value::Ref(mem));

        let rec = self.alloc_unchecked(HeapData::Exception {
            exc_type: ExcType::RecursionError,
            trace: Vec::new(),
        });
        self.pin(rec);
        self.recursion_error = Some(Value::Ref(rec));
    }

    pub fn memory_error_singleton(&self) -> Value {
        self.memory_error.expect("singletons initialized before use")
    }

    pub fn recursion_error_singleton(&self) -> Value {
        self.recursion_error.expect("singletons initialized before use")
    }

    /// Gives an object a permanent extra strong reference so it is never
    /// collected. Used only for the two exception singletons and for
    /// process-lifetime builtins.
    fn pin(&mut self, id: HeapId) {
        if let Some(obj) = self.get_mut(id) {
            obj.strong_refcount += 1;
        }
    }

    fn alloc_unchecked(&mut self, data: HeapData) -> HeapId {
        let obj = HeapObject {
            data,
            attrs: AttrTable::new(),
            parents: Vec::new(),
            finalizers: Vec::new(),
            strong_refcount: 1,
            marked: false,
        };
        let id = if let Some(slot) = self.free_list.pop() {
            self.objects[slot as usize] = Some(obj);
            slot
        } else {
            let slot = self.objects.len() as u32;
            self.objects.push(Some(obj));
            slot
        };
        self.live_count += 1;
        HeapId(id)
    }

    /// Allocates a new heap object with a single strong reference already
    /// held by the caller. Fails with [`ResourceError::AllocationLimitExceeded`]
    /// if `max_alloc` would be exceeded, giving the caller a chance to
    /// convert that into a `MemoryError` without this call itself needing
    /// to allocate.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        if self.live_count >= self.limits.max_alloc {
            return Err(ResourceError::AllocationLimitExceeded);
        }
        let id = self.alloc_unchecked(data);
        if self.live_count >= self.gc_threshold {
            self.collect_garbage(&[]);
        }
        Ok(id)
    }

    /// Allocates `data` with `parents` as its attribute-lookup fallback
    /// chain. Each parent gets an extra strong reference, since `free`'s
    /// worklist walks `collect_children` (which includes `parents`) and
    /// will cascade a `dec_ref` to every one of them once this object is
    /// freed -- without a matching `inc_ref` here that cascade would either
    /// underflow-guard into a silent no-op or, worse, drop a base class's
    /// last independent reference out from under a still-reachable
    /// subclass.
    pub fn allocate_with_attrs(
        &mut self,
        data: HeapData,
        parents: Vec<HeapId>,
    ) -> Result<HeapId, ResourceError> {
        let id = self.allocate(data)?;
        for &parent in &parents {
            self.inc_ref(parent);
        }
        if let Some(obj) = self.get_mut(id) {
            obj.parents = parents;
        }
        Ok(id)
    }

    pub fn new_exception(&mut self, exc_type: ExcType, message: String) -> Result<Value, ResourceError> {
        let id = self.allocate(HeapData::Exception {
            exc_type,
            trace: Vec::new(),
        })?;
        let msg_id = self.allocate(HeapData::Str(message))?;
        self.get_mut(id).unwrap().attrs.set(crate::intern::sym::MESSAGE, Value::Ref(msg_id));
        Ok(Value::Ref(id))
    }

    pub fn push_trace_frame(&mut self, id: HeapId, frame: TraceFrame) {
        if let Some(HeapData::Exception { trace, .. }) = self.get_mut(id).map(|o| &mut o.data) {
            trace.push(frame);
        }
    }

    pub fn get(&self, id: HeapId) -> Option<&HeapObject> {
        self.objects.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut HeapObject> {
        self.objects.get_mut(id.index())?.as_mut()
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        if let Some(obj) = self.get_mut(id) {
            obj.strong_refcount += 1;
        }
    }

    /// Decrements `id`'s strong refcount. If it reaches zero, frees the
    /// object immediately and iteratively decrements the refcounts of its
    /// direct children (an explicit worklist, not recursion, since chains
    /// of lists/tuples/instances can be arbitrarily deep).
    pub fn dec_ref(&mut self, id: HeapId) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let should_free = match self.get_mut(id) {
                Some(obj) if obj.strong_refcount > 0 => {
                    obj.strong_refcount -= 1;
                    obj.strong_refcount == 0
                }
                _ => false,
            };
            if should_free {
                self.free(id, &mut worklist);
            }
        }
    }

    fn free(&mut self, id: HeapId, worklist: &mut Vec<HeapId>) {
        let Some(mut obj) = self.objects[id.index()].take() else {
            return;
        };
        self.live_count -= 1;
        self.free_list.push(id.0);
        let mut children = Vec::new();
        obj.collect_children(&mut children);
        worklist.extend(children);
        obj.finalizers.clear();
    }

    /// Runs a full mark-sweep collection, using CPython-style trial
    /// subtraction to tell apart a reference that pins an object from
    /// outside the heap (a frame's operand stack, a module registry entry,
    /// the current-exception slot, a host `pin()`) from one that is just an
    /// edge *within* the heap graph (one instance's attribute pointing at
    /// another). Plain refcounting can never free a cycle -- each member
    /// keeps the others' count above zero forever -- so treating *every*
    /// `strong_refcount > 0` object as a root (as a naive reading of the
    /// counter might suggest) would never collect one either.
    ///
    /// Instead: start every live object's `gc_refs` at its `strong_refcount`,
    /// then walk every live object's `collect_children` and decrement each
    /// child's `gc_refs` by one per incoming edge found this way. What's
    /// left in `gc_refs` after that is exactly the portion of the refcount
    /// *not* accounted for by another heap object -- i.e. external pins.
    /// Anything with positive `gc_refs` is therefore a real root; a pure
    /// cycle's members all net to zero and are swept (once nothing
    /// external marks them reachable by traversal either).
    ///
    /// `extra_roots` additionally seeds the traversal with values the
    /// caller wants pinned regardless of their computed `gc_refs` (used for
    /// the current exception, which is otherwise already covered by its own
    /// strong reference). Kept as a defensive belt-and-suspenders, not load
    /// bearing for correctness given the subtraction above.
    pub fn collect_garbage(&mut self, extra_roots: &[Value]) {
        self.collections_run += 1;

        let mut gc_refs: Vec<i64> = vec![0; self.objects.len()];
        for (idx, slot) in self.objects.iter().enumerate() {
            if let Some(obj) = slot {
                gc_refs[idx] = i64::from(obj.strong_refcount);
            }
        }
        for slot in self.objects.iter() {
            let Some(obj) = slot else { continue };
            let mut children = Vec::new();
            obj.collect_children(&mut children);
            for child in children {
                gc_refs[child.index()] -= 1;
            }
        }

        let mut stack: Vec<HeapId> = Vec::new();
        for (idx, slot) in self.objects.iter().enumerate() {
            if slot.is_some() && gc_refs[idx] > 0 {
                stack.push(HeapId(idx as u32));
            }
        }
        for v in extra_roots {
            if let Value::Ref(id) = v {
                stack.push(*id);
            }
        }

        let mut visited: AHashSet<HeapId> = AHashSet::default();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(obj) = self.get_mut(id) else { continue };
            if obj.marked {
                continue;
            }
            obj.marked = true;
            let mut children = Vec::new();
            obj.collect_children(&mut children);
            stack.extend(children);
        }

        let unreachable: Vec<HeapId> = self
            .objects
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref().and_then(|o| (!o.marked).then_some(HeapId(idx as u32)))
            })
            .collect();

        for slot in self.objects.iter_mut().flatten() {
            slot.marked = false;
        }

        let mut worklist = Vec::new();
        for id in unreachable {
            if self.objects[id.index()].is_some() {
                self.free(id, &mut worklist);
            }
        }
        while let Some(id) = worklist.pop() {
            if self.objects[id.index()].is_some() {
                self.free(id, &mut worklist);
            }
        }

        self.gc_threshold = ((self.live_count.max(16)) as f64 * self.limits.gc_run_factor) as usize;
    }

    // -- dispatch helpers used by `Value` and the builtin/type layers --

    pub fn type_name(&self, id: HeapId) -> &str {
        let Some(obj) = self.get(id) else { return "object" };
        match &obj.data {
            HeapData::Instance => self.class_name_of(obj.parents.first().copied()),
            HeapData::Class(c) => self.interner.resolve(c.name),
            HeapData::Builtin(b) => b.type_name(),
            other => builtin_type_name(other),
        }
    }

    fn class_name_of(&self, class_id: Option<HeapId>) -> &str {
        match class_id.and_then(|id| self.get(id)) {
            Some(obj) => match &obj.data {
                HeapData::Class(c) => self.interner.resolve(c.name),
                _ => "object",
            },
            None => "object",
        }
    }

    pub fn py_bool(&self, id: HeapId) -> bool {
        let Some(obj) = self.get(id) else { return false };
        match &obj.data {
            HeapData::Str(s) => !s.is_empty(),
            HeapData::Bytes(b) => !b.is_empty(),
            HeapData::Tuple(t) => !t.is_empty(),
            HeapData::List(l) => !l.is_empty(),
            HeapData::Dict(d) => !d.is_empty(),
            HeapData::Set(s) => !s.is_empty(),
            HeapData::Range { start, stop, step } => {
                if *step > 0 {
                    start < stop
                } else {
                    start > stop
                }
            }
            _ => true,
        }
    }

    pub fn py_hash(&self, value: Value) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        match value {
            Value::None => 0u8.hash(&mut hasher),
            Value::Bool(b) => b.hash(&mut hasher),
            Value::Int(i) => i.hash(&mut hasher),
            Value::Float(f) => f.to_bits().hash(&mut hasher),
            Value::Ref(id) => match self.get(id).map(|o| &o.data) {
                Some(HeapData::Str(s)) => s.hash(&mut hasher),
                Some(HeapData::Bytes(b)) => b.data.hash(&mut hasher),
                Some(HeapData::Tuple(items)) => {
                    for v in items {
                        self.py_hash(*v).hash(&mut hasher);
                    }
                }
                _ => id.0.hash(&mut hasher),
            },
        }
        hasher.finish()
    }

    pub fn py_eq(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::None, Value::None) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Bool(y)) | (Value::Bool(y), Value::Int(x)) => x == i64::from(y),
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (x as f64) == y,
            (Value::Ref(x), Value::Ref(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x).map(|o| &o.data), self.get(y).map(|o| &o.data)) {
                    (Some(HeapData::Str(a)), Some(HeapData::Str(b))) => a == b,
                    (Some(HeapData::Bytes(a)), Some(HeapData::Bytes(b))) => a == b,
                    (Some(HeapData::Tuple(a)), Some(HeapData::Tuple(b)))
                    | (Some(HeapData::List(List { items: a })), Some(HeapData::List(List { items: b }))) => {
                        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.py_eq(*x, *y))
                    }
                    (Some(HeapData::Dict(a)), Some(HeapData::Dict(b))) => {
                        a.len() == b.len()
                            && a.iter().all(|(k, v)| b.get(self, k).is_some_and(|bv| self.py_eq(v, bv)))
                    }
                    (Some(HeapData::Set(a)), Some(HeapData::Set(b))) => {
                        a.len() == b.len() && a.iter().all(|v| b.contains(self, v))
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    pub fn py_repr(&self, id: HeapId) -> String {
        let Some(obj) = self.get(id) else { return "<freed>".to_owned() };
        match &obj.data {
            HeapData::Str(s) => python_quote(s),
            HeapData::Bytes(b) => format!("b{}", python_quote(&String::from_utf8_lossy(&b.data))),
            HeapData::Tuple(items) => {
                let mut out = String::from("(");
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&v.py_repr(self));
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                out
            }
            HeapData::List(l) => {
                let mut out = String::from("[");
                for (i, v) in l.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&v.py_repr(self));
                }
                out.push(']');
                out
            }
            HeapData::Dict(d) => {
                let mut out = String::from("{");
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&k.py_repr(self));
                    out.push_str(": ");
                    out.push_str(&v.py_repr(self));
                }
                out.push('}');
                out
            }
            HeapData::Set(s) => {
                if s.len() == 0 {
                    return "set()".to_owned();
                }
                let mut out = String::from("{");
                for (i, v) in s.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&v.py_repr(self));
                }
                out.push('}');
                out
            }
            HeapData::Function(f) => format!("<function {}>", self.display_symbol(f.name)),
            HeapData::BoundMethod { .. } => "<bound method>".to_owned(),
            HeapData::Class(c) => format!("<class '{}'>", self.display_symbol(c.name)),
            HeapData::Instance => format!("<{} object>", self.type_name(id)),
            HeapData::Exception { exc_type, .. } => {
                let msg = obj.attrs.get(crate::intern::sym::MESSAGE).map(|v| v.py_str(self)).unwrap_or_default();
                format!("{exc_type}({})", python_quote(&msg))
            }
            HeapData::Module(m) => format!("<module '{}'>", self.display_symbol(m.name)),
            HeapData::Slice { start, stop, step } => {
                format!("slice({}, {}, {})", start.py_repr(self), stop.py_repr(self), step.py_repr(self))
            }
            HeapData::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({start}, {stop})")
                } else {
                    format!("range({start}, {stop}, {step})")
                }
            }
            HeapData::Iterator(_) => "<iterator>".to_owned(),
            HeapData::File(_) => "<file>".to_owned(),
            HeapData::Cell(_) => "<cell>".to_owned(),
            HeapData::Builtin(b) => b.repr(),
        }
    }

    pub fn py_str(&self, id: HeapId) -> String {
        match self.get(id).map(|o| &o.data) {
            Some(HeapData::Str(s)) => s.clone(),
            _ => self.py_repr(id),
        }
    }

    fn display_symbol(&self, symbol: Symbol) -> String {
        self.interner.resolve(symbol).to_owned()
    }

    /// Full attribute lookup: this object's own table, then its parent
    /// chain, depth-first, left to right.
    pub fn get_attr(&self, id: HeapId, name: Symbol) -> Option<Value> {
        self.get_attr_inner(id, name, &mut AHashSet::default())
    }

    fn get_attr_inner(&self, id: HeapId, name: Symbol, visited: &mut AHashSet<HeapId>) -> Option<Value> {
        if !visited.insert(id) {
            return None;
        }
        let obj = self.get(id)?;
        if let Some(v) = obj.attrs.get(name) {
            return Some(v);
        }
        for &parent in &obj.parents {
            if let Some(v) = self.get_attr_inner(parent, name, visited) {
                return Some(v);
            }
        }
        None
    }

    pub fn set_attr(&mut self, id: HeapId, name: Symbol, value: Value) -> Option<Value> {
        self.get_mut(id).and_then(|obj| obj.attrs.set(name, value))
    }

    /// Sets an attribute, taking ownership of `value`'s strong reference and
    /// dropping the overwritten value's reference (if any). The common case
    /// for script-level attribute assignment, where nothing else wants to
    /// inspect what used to be there.
    pub fn set_attr_owned(&mut self, id: HeapId, name: Symbol, value: Value) {
        if let Some(old) = self.set_attr(id, name, value) {
            old.drop_with_heap(self);
        }
    }

    /// The full attribute-access protocol: a raw [`Heap::get_attr`] lookup,
    /// then unbound-method promotion. A hit whose value is a `HeapData::Function`
    /// with `is_method` set and no receiver yet is wrapped in a fresh
    /// `HeapData::BoundMethod` with `owner` as its receiver; every other hit
    /// (including one that was already a `BoundMethod`, e.g. a method fetched
    /// a second time off the same instance) passes through unchanged.
    ///
    /// Unlike the raw `get_attr`, the returned value is always already an
    /// owned strong reference (the caller must eventually `drop_with_heap`
    /// it), so every call site can treat a hit the same way regardless of
    /// whether it took the promotion branch.
    pub fn access_attr(&mut self, owner: HeapId, name: Symbol) -> Result<Option<Value>, ResourceError> {
        let Some(value) = self.get_attr(owner, name) else {
            return Ok(None);
        };
        if let Value::Ref(func_id) = value {
            let is_unbound_method =
                matches!(self.get(func_id).map(|o| &o.data), Some(HeapData::Function(f)) if f.is_method);
            if is_unbound_method {
                let bound = self.allocate(HeapData::BoundMethod {
                    receiver: Value::Ref(owner),
                    func: func_id,
                })?;
                self.inc_ref(owner);
                self.inc_ref(func_id);
                return Ok(Some(Value::Ref(bound)));
            }
        }
        if let Value::Ref(id) = value {
            self.inc_ref(id);
        }
        Ok(Some(value))
    }

    /// The "from-base" attribute lookup used by `super`-style calls: skips
    /// `id`'s own attribute table and searches only its parent chain.
    pub fn get_attr_from_base(&self, id: HeapId, name: Symbol) -> Option<Value> {
        let obj = self.get(id)?;
        let mut visited = AHashSet::default();
        visited.insert(id);
        for &parent in &obj.parents {
            if let Some(v) = self.get_attr_inner(parent, name, &mut visited) {
                return Some(v);
            }
        }
        None
    }

    pub fn is_instance_of_class(&self, id: HeapId, class_id: HeapId) -> bool {
        self.class_chain_contains(id, class_id, &mut AHashSet::default())
    }

    fn class_chain_contains(&self, id: HeapId, target: HeapId, visited: &mut AHashSet<HeapId>) -> bool {
        if id == target {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        match self.get(id) {
            Some(obj) => obj.parents.iter().any(|&p| self.class_chain_contains(p, target, visited)),
            None => false,
        }
    }
}

/// Renders `s` as a Python `repr` string literal: single-quoted unless the
/// text contains a single quote but no double quote, matching CPython's
/// quote-preference rule.
pub fn python_quote(s: &str) -> String {
    let use_double = s.contains('\'') && !s.contains('"');
    let quote = if use_double { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_on_zero_refcount() {
        let mut heap = Heap::new(HeapLimits::default());
        let id = heap.allocate(HeapData::Str("hi".into())).unwrap();
        assert_eq!(heap.live_count(), 1);
        heap.dec_ref(id);
        assert_eq!(heap.live_count(), 0);
        assert!(heap.get(id).is_none());
    }

    #[test]
    fn cyclic_instances_are_reclaimed_by_collect_garbage() {
        let mut heap = Heap::new(HeapLimits::default());
        let a = heap.allocate(HeapData::Instance).unwrap();
        let b = heap.allocate(HeapData::Instance).unwrap();
        let sym = crate::intern::sym::NAME;
        heap.set_attr(a, sym, Value::Ref(b));
        heap.inc_ref(b);
        heap.set_attr(b, sym, Value::Ref(a));
        heap.inc_ref(a);

        // Drop the only external references; a and b now only reference
        // each other, which plain refcounting can never clear.
        heap.dec_ref(a);
        heap.dec_ref(b);
        assert_eq!(heap.live_count(), 2);

        heap.collect_garbage(&[]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn pinned_singleton_survives_garbage_collection() {
        let mut heap = Heap::new(HeapLimits::default());
        heap.init_singletons();
        heap.collect_garbage(&[]);
        assert!(matches!(heap.memory_error_singleton(), Value::Ref(_)));
    }
}
