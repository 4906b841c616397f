//! The bytecode executor: walks a [`crate::compiler::instruction::CompiledCode`]
//! with an explicit frame stack, one Rust-level call per script call (no
//! trampoline -- `run_function` recurses through `Context::call`/`call_value`
//! the same way a tree-walking interpreter would, just one layer lower, over
//! flat instructions instead of AST nodes).
//!
//! Every value pushed onto a [`Frame`]'s operand stack, stored in a
//! parameter/local cell, or stashed in an argument frame is an **owned**
//! strong reference: whoever put it there is on the hook for either handing
//! it to something that takes ownership (a `Store*`, a container build, a
//! call) or `drop_with_heap`-ing it. This mirrors the convention
//! `crate::value::Value::clone_with_heap`/`drop_with_heap` already document;
//! the executor is just the first place with enough moving pieces (a stack,
//! cells, try/finally unwinding) that the bookkeeping needs to be explicit
//! and consistent everywhere.

mod call_builtin;
mod methods;
mod ops;

use std::rc::Rc;

use ahash::AHashMap;

use crate::builtins::{BuiltinId, Func};
use crate::class::ClassRecord;
use crate::compiler::instruction::{Const, ExceptTarget, Instruction, TryTargets};
use crate::compiler::CompiledCode;
use crate::context::Context;
use crate::exceptions::{ExcType, RunError, RunResult, TraceFrame};
use crate::function::{FunctionRecord, Signature};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::{sym, Symbol};
use crate::source::{CodeRange, Source};
use crate::types::dict::Dict;
use crate::types::iterator::IterKind;
use crate::types::list::List;
use crate::types::set::Set;
use crate::value::Value;

pub(crate) use ops::{binary_op, contains_op, is_op, unary_op};

/// One pending call's accumulated arguments, built up by
/// `PushArgFrame`/`PushPositionalArg`/`PushStarArg`/`PushKwarg`/`PushDoubleStarKwarg`
/// and consumed by `Call`. Lives on its own stack (not the operand stack) so
/// a nested call's argument-gathering instructions can't be confused with
/// the enclosing call's.
struct ArgFrame {
    positional: Vec<Value>,
    /// Lazily allocated: most calls pass no keyword arguments at all.
    kwargs: Option<Value>,
}

/// What a `try` block is currently doing, used to decide how `PopTry`/an
/// in-flight exception should behave.
enum TryMode {
    /// Running the `try` body (or, after a handler matched, the handler
    /// body) normally.
    Active,
    /// A handler is currently running; a second exception raised from
    /// inside it is not eligible to be caught by this same try's other
    /// handlers.
    InHandler,
}

struct TryFrame {
    targets: TryTargets,
    mode: TryMode,
    /// Operand stack depth to restore to before jumping to a handler or the
    /// finally block, discarding whatever partial expression evaluation was
    /// in flight when the exception hit.
    stack_depth: usize,
    arg_depth: usize,
    /// The exception currently being handled, if any -- what
    /// `LoadCurrentException` pushes, and what a bare `raise` re-raises.
    handling: Option<Value>,
    /// Set once a handler's body (or the try body, if no handler matched)
    /// finishes and the finally block still needs to run before the
    /// original exception (or a `Return`/`Break`/`Continue` that happened to
    /// fire while a finally was pending) is allowed to propagate further.
    pending_reraise: Option<RunError>,
}

/// One call's execution state. A fresh `Frame` is built for every
/// `run_function`/`run_module_code`/class-body invocation; none are ever
/// reused, so a recursive call just means another `Frame` (and another
/// native Rust stack frame) further down.
struct Frame {
    code: Rc<CompiledCode>,
    pc: usize,
    stack: Vec<Value>,
    arg_frames: Vec<ArgFrame>,
    /// Local/captured variable cells, keyed by name. Unused (left empty)
    /// when `write_through` is set, since module-level and class-body code
    /// writes straight into a heap object's attribute table instead of
    /// boxing locals in cells -- there is no nested closure to share a cell
    /// with at that scope.
    vars: AHashMap<Symbol, HeapId>,
    /// Set for the top-level module frame: `LoadName`/`StoreName` read and
    /// write this heap object's attributes directly rather than consulting
    /// `vars`, matching how Python's module globals are just a dict, never
    /// boxed in cells the way a function's true locals are.
    write_through: Option<HeapId>,
    /// The module this code was defined in -- what an ordinary function
    /// frame's name lookup falls back to once `vars` and `global_captures`
    /// are exhausted.
    module: HeapId,
    try_stack: Vec<TryFrame>,
    function_name: String,
}

impl Frame {
    fn top_level(code: Rc<CompiledCode>, module: HeapId) -> Self {
        Self {
            code,
            pc: 0,
            stack: Vec::new(),
            arg_frames: Vec::new(),
            vars: AHashMap::default(),
            write_through: Some(module),
            module,
            try_stack: Vec::new(),
            function_name: "<module>".to_owned(),
        }
    }

    fn current_handling(&self) -> Option<Value> {
        self.try_stack.iter().rev().find_map(|tf| tf.handling)
    }
}

/// Drops every reference a frame still owns: its operand stack, its local
/// cells, and any in-flight argument frames. Called on every exit path
/// (normal return or propagating error) before the frame is discarded.
fn teardown_frame(ctx: &mut Context, frame: &mut Frame) {
    for v in frame.stack.drain(..) {
        v.drop_with_heap(ctx.heap_mut());
    }
    for af in frame.arg_frames.drain(..) {
        for v in af.positional {
            v.drop_with_heap(ctx.heap_mut());
        }
        if let Some(k) = af.kwargs {
            k.drop_with_heap(ctx.heap_mut());
        }
    }
    for (_, cell_id) in frame.vars.drain() {
        ctx.heap_mut().dec_ref(cell_id);
    }
    for tf in frame.try_stack.drain(..) {
        if let Some(v) = tf.handling {
            v.drop_with_heap(ctx.heap_mut());
        }
        if let Some(err) = tf.pending_reraise {
            err.drop_with_heap(ctx.heap_mut());
        }
    }
}

fn cell_get(ctx: &Context, cell_id: HeapId) -> Value {
    match ctx.heap().get(cell_id).map(|o| &o.data) {
        Some(HeapData::Cell(v)) => *v,
        _ => Value::None,
    }
}

/// Overwrites a cell's value, taking ownership of `value` and dropping
/// whatever was there before.
fn cell_set(ctx: &mut Context, cell_id: HeapId, value: Value) {
    let old = match ctx.heap_mut().get_mut(cell_id) {
        Some(obj) => match &mut obj.data {
            HeapData::Cell(slot) => Some(std::mem::replace(slot, value)),
            _ => None,
        },
        None => None,
    };
    if let Some(old) = old {
        old.drop_with_heap(ctx.heap_mut());
    }
}

fn new_cell(ctx: &mut Context, value: Value) -> RunResult<HeapId> {
    match ctx.heap_mut().allocate(HeapData::Cell(value)) {
        Ok(id) => Ok(id),
        Err(_) => Err(RunError::raised(ctx.heap().memory_error_singleton())),
    }
}

fn type_err(ctx: &mut Context, message: impl Into<String>) -> RunError {
    ExcType::type_error(ctx.heap_mut(), message)
}

fn check_recursion(ctx: &mut Context) -> RunResult<()> {
    if ctx.call_depth >= ctx.config().max_recursion {
        return Err(RunError::raised(ctx.heap().recursion_error_singleton()));
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Entry points, matching the signatures `crate::context::Context` expects.
// ---------------------------------------------------------------------

pub fn run_module_code(
    ctx: &mut Context,
    code: Rc<CompiledCode>,
    module: HeapId,
    _module_name: Symbol,
    source: Source,
) -> RunResult<Value> {
    let mut frame = Frame::top_level(code, module);
    let result = run_frame(ctx, &mut frame);
    teardown_frame(ctx, &mut frame);
    match result {
        Ok(v) => {
            if let Some(&module_id) = Some(&module) {
                let _ = module_id;
            }
            Ok(v)
        }
        Err(err) => {
            let line = source.line_col(CodeRange::default().start).0;
            err.push_frame(
                ctx.heap_mut(),
                TraceFrame {
                    function_name: "<module>".to_owned(),
                    position: CodeRange::default(),
                    line,
                },
            );
            Err(err)
        }
    }
}

pub fn call_value(ctx: &mut Context, callable: Value, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    check_recursion(ctx)?;
    ctx.call_depth += 1;
    let result = call_value_inner(ctx, callable, args, kwargs);
    ctx.call_depth -= 1;
    result
}

enum Callee {
    Function(HeapId),
    BoundMethod { receiver: Value, func: HeapId },
    Class(HeapId),
    Builtin(BuiltinId),
    InstanceCall,
    NotCallable(&'static str),
}

fn classify_callable(heap: &Heap, value: Value) -> Callee {
    let Value::Ref(id) = value else {
        return Callee::NotCallable(value.type_name(heap));
    };
    match heap.get(id).map(|o| &o.data) {
        Some(HeapData::Function(_)) => Callee::Function(id),
        Some(HeapData::BoundMethod { receiver, func }) => Callee::BoundMethod {
            receiver: *receiver,
            func: *func,
        },
        Some(HeapData::Class(_)) => Callee::Class(id),
        Some(HeapData::Builtin(b)) => Callee::Builtin(b.clone()),
        Some(HeapData::Instance) => Callee::InstanceCall,
        _ => Callee::NotCallable(heap.type_name(id)),
    }
}

fn call_value_inner(ctx: &mut Context, callable: Value, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    match classify_callable(ctx.heap(), callable) {
        Callee::Function(func_id) => run_function(ctx, func_id, args, kwargs),
        Callee::BoundMethod { receiver, func } => {
            let mut full_args = Vec::with_capacity(args.len() + 1);
            full_args.push(receiver);
            full_args.extend_from_slice(args);
            run_function(ctx, func, &full_args, kwargs)
        }
        Callee::Class(class_id) => instantiate_class(ctx, class_id, args, kwargs),
        Callee::Builtin(b) => call_builtin::call_builtin(ctx, b, args, kwargs),
        Callee::InstanceCall => {
            let bound = get_attribute(ctx, callable, sym::CALL)
                .map_err(|_| type_err(ctx, format!("'{}' object is not callable", callable.type_name(ctx.heap()))))?;
            let result = call_value(ctx, bound, args, kwargs);
            bound.drop_with_heap(ctx.heap_mut());
            result
        }
        Callee::NotCallable(type_name) => Err(type_err(ctx, format!("'{type_name}' object is not callable"))),
    }
}

/// Binds `args`/`kwargs` against `signature`/`defaults` per the argument
/// binding algorithm: keyword arguments are matched first, then positional
/// arguments fill remaining slots (or overflow into `*args`), then defaults
/// fill whatever is still missing, and finally any required parameter still
/// unbound is a `TypeError`.
///
/// Returns `(name, value)` pairs for every parameter (including `*args`/
/// `**kwargs` if declared), each already an owned strong reference ready to
/// be boxed into a fresh cell.
fn bind_arguments(
    ctx: &mut Context,
    func_name: &str,
    signature: &Signature,
    defaults: &[Value],
    args: &[Value],
    kwargs: Option<Value>,
) -> RunResult<Vec<(Symbol, Value)>> {
    let mut bound: Vec<Option<Value>> = vec![None; signature.params.len()];
    let mut extra_kwargs: Vec<(Value, Value)> = Vec::new();

    if let Some(kw) = kwargs {
        let Value::Ref(kw_id) = kw else {
            return Err(type_err(ctx, format!("{func_name}() keyword arguments must be a dict")));
        };
        let entries: Vec<(Value, Value)> = match ctx.heap().get(kw_id).map(|o| &o.data) {
            Some(HeapData::Dict(d)) => d.iter().collect(),
            _ => return Err(type_err(ctx, format!("{func_name}() keyword arguments must be a dict"))),
        };
        for (key, value) in entries {
            let Value::Ref(key_id) = key else {
                return Err(type_err(ctx, format!("{func_name}() keywords must be strings")));
            };
            let name = match ctx.heap().get(key_id).map(|o| &o.data) {
                Some(HeapData::Str(s)) => s.clone(),
                _ => return Err(type_err(ctx, format!("{func_name}() keywords must be strings"))),
            };
            match signature.params.iter().position(|&p| ctx.heap().resolve(p) == name) {
                Some(idx) => {
                    if bound[idx].is_some() {
                        return Err(type_err(ctx, format!("{func_name}() got multiple values for argument '{name}'")));
                    }
                    bound[idx] = Some(value.clone_with_heap(ctx.heap_mut()));
                }
                None => {
                    if signature.kwarg.is_some() {
                        extra_kwargs.push((
                            key.clone_with_heap(ctx.heap_mut()),
                            value.clone_with_heap(ctx.heap_mut()),
                        ));
                    } else {
                        return Err(type_err(ctx, format!("{func_name}() got an unexpected keyword argument '{name}'")));
                    }
                }
            }
        }
    }

    let mut extra_positional: Vec<Value> = Vec::new();
    let mut next_slot = 0usize;
    for &arg in args {
        while next_slot < bound.len() && bound[next_slot].is_some() {
            next_slot += 1;
        }
        if next_slot < bound.len() {
            bound[next_slot] = Some(arg.clone_with_heap(ctx.heap_mut()));
            next_slot += 1;
        } else if signature.vararg.is_some() {
            extra_positional.push(arg.clone_with_heap(ctx.heap_mut()));
        } else {
            return Err(type_err(
                ctx,
                format!("{func_name}() takes {} positional arguments but more were given", signature.params.len()),
            ));
        }
    }

    let num_defaults = defaults.len();
    let first_default_idx = signature.params.len().saturating_sub(num_defaults);
    for (idx, slot) in bound.iter_mut().enumerate() {
        if slot.is_none() && idx >= first_default_idx {
            let default_idx = idx - first_default_idx;
            *slot = Some(defaults[default_idx].clone_with_heap(ctx.heap_mut()));
        }
    }

    let mut result = Vec::with_capacity(signature.params.len() + 2);
    for (idx, &name) in signature.params.iter().enumerate() {
        match bound[idx].take() {
            Some(v) => result.push((name, v)),
            None => return Err(type_err(ctx, format!("{func_name}() missing required argument '{}'", ctx.heap().resolve(name)))),
        }
    }

    if let Some(vararg) = signature.vararg {
        let tuple = ctx.new_tuple(extra_positional)?;
        result.push((vararg, tuple));
    } else {
        for v in extra_positional {
            v.drop_with_heap(ctx.heap_mut());
        }
    }

    if let Some(kwarg) = signature.kwarg {
        let dict_value = ctx.new_dict()?;
        let Value::Ref(dict_id) = dict_value else { unreachable!() };
        for (k, v) in extra_kwargs {
            dict_insert(ctx.heap_mut(), dict_id, k, v);
        }
        result.push((kwarg, dict_value));
    } else {
        for (k, v) in extra_kwargs {
            k.drop_with_heap(ctx.heap_mut());
            v.drop_with_heap(ctx.heap_mut());
        }
    }

    Ok(result)
}

fn run_function(ctx: &mut Context, func_id: HeapId, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    let (code, signature, defaults, closure, module, name) = match ctx.heap().get(func_id).map(|o| &o.data) {
        Some(HeapData::Function(f)) => (f.code.clone(), f.signature.clone(), f.defaults.clone(), f.closure.clone(), f.module, f.name),
        _ => return Err(type_err(ctx, "value is not callable")),
    };
    let func_name = ctx.heap().resolve(name).to_owned();

    if !code.is_class_body && !signature_arity_ok(&signature, args.len()) {
        return Err(type_err(ctx, format!("{func_name}() takes the wrong number of arguments")));
    }

    let bound_params = bind_arguments(ctx, &func_name, &signature, &defaults, args, kwargs)?;

    let mut vars: AHashMap<Symbol, HeapId> = AHashMap::default();
    for (name, value) in bound_params {
        let cell = new_cell(ctx, value)?;
        vars.insert(name, cell);
    }
    for (name, value) in closure {
        if vars.contains_key(&name) {
            continue;
        }
        if let Value::Ref(cell_id) = value {
            ctx.heap_mut().inc_ref(cell_id);
            vars.insert(name, cell_id);
        }
    }
    for &name in &code.locals {
        if !vars.contains_key(&name) {
            let cell = new_cell(ctx, Value::None)?;
            vars.insert(name, cell);
        }
    }

    let mut frame = Frame {
        code,
        pc: 0,
        stack: Vec::new(),
        arg_frames: Vec::new(),
        vars,
        write_through: None,
        module,
        try_stack: Vec::new(),
        function_name: func_name,
    };

    let result = run_frame(ctx, &mut frame);
    let fn_name = frame.function_name.clone();
    teardown_frame(ctx, &mut frame);
    match result {
        Ok(v) => Ok(v),
        Err(err) => {
            err.push_frame(
                ctx.heap_mut(),
                TraceFrame {
                    function_name: fn_name,
                    position: CodeRange::default(),
                    line: 0,
                },
            );
            Err(err)
        }
    }
}

fn signature_arity_ok(signature: &Signature, positional: usize) -> bool {
    if signature.vararg.is_some() {
        positional >= signature.required_count()
    } else {
        positional >= signature.required_count() && positional <= signature.params.len()
    }
}

/// Runs a class body as a zero-argument call (no parameters, no closure over
/// an enclosing function's locals -- see the module doc comment on
/// `MakeClass`'s handling below), then harvests its locals into
/// `(name, value)` pairs for the new class's attribute table.
fn run_class_body(ctx: &mut Context, code: Rc<CompiledCode>, module: HeapId) -> RunResult<Vec<(Symbol, Value)>> {
    let mut vars: AHashMap<Symbol, HeapId> = AHashMap::default();
    for &name in &code.locals {
        let cell = new_cell(ctx, Value::None)?;
        vars.insert(name, cell);
    }
    let name = ctx.heap().resolve(code.name).to_owned();
    let locals = code.locals.clone();
    let mut frame = Frame {
        code,
        pc: 0,
        stack: Vec::new(),
        arg_frames: Vec::new(),
        vars,
        write_through: None,
        module,
        try_stack: Vec::new(),
        function_name: name,
    };

    let result = run_frame(ctx, &mut frame);
    let harvested: RunResult<Vec<(Symbol, Value)>> = result.map(|_| {
        locals
            .iter()
            .map(|&name| {
                let cell_id = frame.vars[&name];
                (name, cell_get(ctx, cell_id).clone_with_heap(ctx.heap_mut()))
            })
            .collect()
    });
    teardown_frame(ctx, &mut frame);
    harvested
}

/// Allocates a new instance of `class_id`, dispatching `__init__` if one is
/// found on the class (or its bases). Classes whose `ClassRecord::exc_type`
/// is set allocate `HeapData::Exception` instead of `HeapData::Instance`,
/// so the resulting object satisfies both `except SomeUserException:` (class
/// chain match) and `except Exception:` (exc_type hierarchy match).
fn instantiate_class(ctx: &mut Context, class_id: HeapId, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    let exc_type = match ctx.heap().get(class_id).map(|o| &o.data) {
        Some(HeapData::Class(c)) => c.exc_type,
        _ => return Err(type_err(ctx, "value is not callable")),
    };
    let data = match exc_type {
        Some(exc_type) => HeapData::Exception { exc_type, trace: Vec::new() },
        None => HeapData::Instance,
    };
    let instance_id = match ctx.heap_mut().allocate_with_attrs(data, vec![class_id]) {
        Ok(id) => id,
        Err(_) => return Err(RunError::raised(ctx.heap().memory_error_singleton())),
    };
    let self_value = Value::Ref(instance_id);

    let init = match ctx.heap_mut().access_attr(instance_id, sym::INIT) {
        Ok(v) => v,
        Err(_) => return Err(RunError::raised(ctx.heap().memory_error_singleton())),
    };
    match init {
        Some(init_fn) => {
            let mut full_args = Vec::with_capacity(args.len() + 1);
            full_args.push(self_value);
            full_args.extend_from_slice(args);
            let result = call_value(ctx, init_fn, &full_args, kwargs);
            init_fn.drop_with_heap(ctx.heap_mut());
            match result {
                Ok(v) => v.drop_with_heap(ctx.heap_mut()),
                Err(e) => {
                    self_value.drop_with_heap(ctx.heap_mut());
                    return Err(e);
                }
            }
        }
        None => {
            if exc_type.is_some() {
                if let Some(&first) = args.first() {
                    let msg = first.py_str(ctx.heap());
                    let msg_v = ctx.new_str(msg)?;
                    ctx.heap_mut().set_attr_owned(instance_id, sym::MESSAGE, msg_v);
                }
            }
        }
    }
    Ok(self_value)
}

/// Constructs `ExcType`'s default instance (no `__init__` chain, used for
/// the builtin exception type constructors in `call_builtin`'s `ExcCtor`
/// arm).
fn construct_exception(ctx: &mut Context, exc_type: ExcType, args: &[Value]) -> RunResult<Value> {
    let message = match args.first() {
        Some(v) => v.py_str(ctx.heap()),
        None => String::new(),
    };
    ctx.heap_mut()
        .new_exception(exc_type, message)
        .map_err(|_| RunError::raised(ctx.heap().memory_error_singleton()))
}

/// `isinstance(obj, cls)`: `cls` may be a builtin exception type constructor
/// or a user class; primitives compare by type name since they have no
/// heap-resident class object of their own.
pub(crate) fn isinstance_value(ctx: &Context, obj: Value, cls: Value) -> bool {
    match cls {
        Value::Ref(cls_id) => match ctx.heap().get(cls_id).map(|o| &o.data) {
            Some(HeapData::Class(_)) => match obj {
                Value::Ref(obj_id) => {
                    let class_of_obj = ctx.heap().get(obj_id).map(|o| o.parents.first().copied());
                    matches!(class_of_obj, Some(Some(obj_class))) && ctx.heap().is_instance_of_class(obj_id, cls_id)
                        || matches!(ctx.heap().get(obj_id).map(|o| &o.data), Some(HeapData::Class(_))) && false
                }
                _ => false,
            },
            Some(HeapData::Builtin(BuiltinId::ExcCtor(target))) => match obj {
                Value::Ref(obj_id) => match ctx.heap().get(obj_id).map(|o| &o.data) {
                    Some(HeapData::Exception { exc_type, .. }) => exc_type.is_a(*target),
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------
// Attribute access
// ---------------------------------------------------------------------

pub fn get_attribute(ctx: &mut Context, owner: Value, name: Symbol) -> RunResult<Value> {
    match owner {
        Value::Ref(id) => {
            if let Some((instance, from_class)) = super_proxy_of(ctx.heap(), id) {
                return get_attribute_from_base(ctx, instance, from_class, name);
            }
            let found = ctx
                .heap_mut()
                .access_attr(id, name)
                .map_err(|_| RunError::raised(ctx.heap().memory_error_singleton()))?;
            if let Some(v) = found {
                return Ok(v);
            }
            if let Some(method) = methods::builtin_method_name(ctx.heap(), id, name) {
                return ctx.alloc(HeapData::Builtin(BuiltinId::BoundBuiltinMethod { receiver: owner, method }));
            }
            let type_name = ctx.heap().type_name(id).to_owned();
            Err(ExcType::attribute_error(ctx.heap_mut(), &type_name, ctx.heap().resolve(name)))
        }
        _ => {
            let type_name = owner.type_name(ctx.heap()).to_owned();
            let attr = ctx.heap().resolve(name).to_owned();
            Err(ExcType::attribute_error(ctx.heap_mut(), &type_name, &attr))
        }
    }
}

fn super_proxy_of(heap: &Heap, id: HeapId) -> Option<(Value, HeapId)> {
    match heap.get(id).map(|o| &o.data) {
        Some(HeapData::Builtin(BuiltinId::SuperProxy { instance, from_class })) => Some((*instance, *from_class)),
        _ => None,
    }
}

fn get_attribute_from_base(ctx: &mut Context, instance: Value, from_class: HeapId, name: Symbol) -> RunResult<Value> {
    let Some(raw) = ctx.heap().get_attr_from_base(from_class, name) else {
        let type_name = instance.type_name(ctx.heap()).to_owned();
        let attr = ctx.heap().resolve(name).to_owned();
        return Err(ExcType::attribute_error(ctx.heap_mut(), &type_name, &attr));
    };
    if let Value::Ref(func_id) = raw {
        let is_unbound_method =
            matches!(ctx.heap().get(func_id).map(|o| &o.data), Some(HeapData::Function(f)) if f.is_method);
        if is_unbound_method {
            let bound = ctx.alloc(HeapData::BoundMethod { receiver: instance, func: func_id })?;
            ctx.heap_mut().inc_ref(func_id);
            if let Value::Ref(inst_id) = instance {
                ctx.heap_mut().inc_ref(inst_id);
            }
            return Ok(bound);
        }
    }
    Ok(raw.clone_with_heap(ctx.heap_mut()))
}

pub fn set_attribute(ctx: &mut Context, owner: Value, name: Symbol, value: Value) -> RunResult<()> {
    match owner {
        Value::Ref(id) => {
            let value = value.clone_with_heap(ctx.heap_mut());
            ctx.heap_mut().set_attr_owned(id, name, value);
            Ok(())
        }
        _ => {
            let type_name = owner.type_name(ctx.heap()).to_owned();
            Err(ExcType::attribute_error(ctx.heap_mut(), &type_name, ctx.heap().resolve(name)))
        }
    }
}

// ---------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------

enum IterKindSnapshot {
    Items(Vec<Value>),
    Str(String),
    Bytes(Vec<u8>),
    Range(i64, i64, i64),
    IteratorObj,
    Protocol,
}

pub fn iterate_to_vec(ctx: &mut Context, value: Value) -> RunResult<Vec<Value>> {
    let Value::Ref(id) = value else {
        let type_name = value.type_name(ctx.heap()).to_owned();
        return Err(type_err(ctx, format!("'{type_name}' object is not iterable")));
    };
    let kind = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Tuple(items)) => IterKindSnapshot::Items(items.clone()),
        Some(HeapData::List(l)) => IterKindSnapshot::Items(l.items.clone()),
        Some(HeapData::Set(s)) => IterKindSnapshot::Items(s.iter().collect()),
        Some(HeapData::Dict(d)) => IterKindSnapshot::Items(d.keys().collect()),
        Some(HeapData::Str(s)) => IterKindSnapshot::Str(s.clone()),
        Some(HeapData::Bytes(b)) => IterKindSnapshot::Bytes(b.data.clone()),
        Some(HeapData::Range { start, stop, step }) => IterKindSnapshot::Range(*start, *stop, *step),
        Some(HeapData::Iterator(_)) => IterKindSnapshot::IteratorObj,
        _ => IterKindSnapshot::Protocol,
    };
    match kind {
        IterKindSnapshot::Items(items) => {
            for v in &items {
                if let Value::Ref(rid) = v {
                    ctx.heap_mut().inc_ref(*rid);
                }
            }
            Ok(items)
        }
        IterKindSnapshot::Str(s) => s.chars().map(|c| ctx.new_str(c.to_string())).collect(),
        IterKindSnapshot::Bytes(b) => Ok(b.into_iter().map(|byte| Value::Int(byte as i64)).collect()),
        IterKindSnapshot::Range(start, stop, step) => {
            let mut out = Vec::new();
            let mut cur = start;
            while (step > 0 && cur < stop) || (step < 0 && cur > stop) {
                out.push(Value::Int(cur));
                cur += step;
            }
            Ok(out)
        }
        IterKindSnapshot::IteratorObj => {
            let mut out = Vec::new();
            while let Some(v) = iterator_next(ctx, id)? {
                out.push(v);
            }
            Ok(out)
        }
        IterKindSnapshot::Protocol => iterate_via_protocol(ctx, value),
    }
}

fn iterate_via_protocol(ctx: &mut Context, value: Value) -> RunResult<Vec<Value>> {
    let iter_fn_or_val = get_attribute(ctx, value, sym::ITER);
    let iterator = match iter_fn_or_val {
        Ok(f) => {
            let result = call_value(ctx, f, &[], None);
            f.drop_with_heap(ctx.heap_mut());
            result?
        }
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    loop {
        let next_fn = match get_attribute(ctx, iterator, sym::NEXT) {
            Ok(f) => f,
            Err(e) => {
                iterator.drop_with_heap(ctx.heap_mut());
                return Err(e);
            }
        };
        match call_value(ctx, next_fn, &[], None) {
            Ok(v) => out.push(v),
            Err(e) if e.matches(ctx.heap(), ExcType::StopIteration) => {
                e.drop_with_heap(ctx.heap_mut());
                next_fn.drop_with_heap(ctx.heap_mut());
                break;
            }
            Err(e) => {
                next_fn.drop_with_heap(ctx.heap_mut());
                iterator.drop_with_heap(ctx.heap_mut());
                return Err(e);
            }
        }
        next_fn.drop_with_heap(ctx.heap_mut());
    }
    iterator.drop_with_heap(ctx.heap_mut());
    Ok(out)
}

fn iterator_next(ctx: &mut Context, id: HeapId) -> RunResult<Option<Value>> {
    let next = match ctx.heap_mut().get_mut(id) {
        Some(obj) => match &mut obj.data {
            HeapData::Iterator(it) => it.peek_next(),
            _ => None,
        },
        None => None,
    };
    if let Some(Value::Ref(rid)) = next {
        ctx.heap_mut().inc_ref(rid);
    }
    Ok(next)
}

pub fn unpack_exact(ctx: &mut Context, value: Value, n: usize) -> RunResult<Vec<Value>> {
    let items = iterate_to_vec(ctx, value)?;
    if items.len() != n {
        for v in &items {
            v.drop_with_heap(ctx.heap_mut());
        }
        return Err(ExcType::value_error(
            ctx.heap_mut(),
            format!("expected {n} values to unpack, got {}", items.len()),
        ));
    }
    Ok(items)
}

// ---------------------------------------------------------------------
// dict/set helpers: pull the container out of the heap so it can be
// mutated with an (immutable) `&Heap` borrow available for hashing/equality,
// then put it back. Necessary since `Dict`/`Set` live *inside* the same
// arena their own hashing needs to read from.
// ---------------------------------------------------------------------

pub(crate) fn dict_insert(heap: &mut Heap, dict_id: HeapId, key: Value, value: Value) -> Option<Value> {
    let mut dict = take_dict(heap, dict_id);
    let old = dict.insert(heap, key, value);
    restore_dict(heap, dict_id, dict);
    old
}

pub(crate) fn dict_get(heap: &Heap, dict_id: HeapId, key: Value) -> Option<Value> {
    match heap.get(dict_id).map(|o| &o.data) {
        Some(HeapData::Dict(d)) => d.get(heap, key),
        _ => None,
    }
}

pub(crate) fn dict_remove(heap: &mut Heap, dict_id: HeapId, key: Value) -> Option<(Value, Value)> {
    let mut dict = take_dict(heap, dict_id);
    let removed = dict.remove(heap, key);
    restore_dict(heap, dict_id, dict);
    removed
}

fn take_dict(heap: &mut Heap, dict_id: HeapId) -> Dict {
    match heap.get_mut(dict_id) {
        Some(obj) => match &mut obj.data {
            HeapData::Dict(d) => std::mem::take(d),
            _ => Dict::new(),
        },
        None => Dict::new(),
    }
}

fn restore_dict(heap: &mut Heap, dict_id: HeapId, dict: Dict) {
    if let Some(obj) = heap.get_mut(dict_id) {
        if let HeapData::Dict(d) = &mut obj.data {
            *d = dict;
        }
    }
}

pub(crate) fn set_insert(heap: &mut Heap, set_id: HeapId, value: Value) -> bool {
    let mut set = take_set(heap, set_id);
    let inserted = set.insert(heap, value);
    restore_set(heap, set_id, set);
    inserted
}

fn take_set(heap: &mut Heap, set_id: HeapId) -> Set {
    match heap.get_mut(set_id) {
        Some(obj) => match &mut obj.data {
            HeapData::Set(s) => std::mem::take(s),
            _ => Set::new(),
        },
        None => Set::new(),
    }
}

fn restore_set(heap: &mut Heap, set_id: HeapId, set: Set) {
    if let Some(obj) = heap.get_mut(set_id) {
        if let HeapData::Set(s) = &mut obj.data {
            *s = set;
        }
    }
}

// ---------------------------------------------------------------------
// The dispatch loop
// ---------------------------------------------------------------------

/// Runs `frame` from its current `pc` to completion: either a `Return`
/// produced a value, or an exception escaped every `try` frame this
/// function's code contains.
fn run_frame(ctx: &mut Context, frame: &mut Frame) -> RunResult<Value> {
    loop {
        match step(ctx, frame) {
            StepOutcome::Continue => continue,
            StepOutcome::Return(v) => return Ok(v),
            StepOutcome::Raised(err) => match dispatch_exception(ctx, frame, err) {
                Ok(()) => continue,
                Err(err) => return Err(err),
            },
        }
    }
}

enum StepOutcome {
    Continue,
    Return(Value),
    Raised(RunError),
}

impl From<RunResult<()>> for StepOutcome {
    fn from(r: RunResult<()>) -> Self {
        match r {
            Ok(()) => StepOutcome::Continue,
            Err(e) => StepOutcome::Raised(e),
        }
    }
}

/// Routes a freshly raised exception to the innermost try frame that can
/// still handle it, running `except`/`finally` bodies inline on `frame`'s
/// own instruction stream (their compiled code lives in the same
/// `CompiledCode`, just at different `pc`s). Returns `Ok(())` once the
/// frame's `pc` has been moved to a handler or finally block and execution
/// should resume; returns the (possibly different, if a finally swallowed
/// and re-raised) error once nothing in this frame can catch it.
fn dispatch_exception(ctx: &mut Context, frame: &mut Frame, err: RunError) -> RunResult<()> {
    loop {
        let Some(try_frame) = frame.try_stack.last_mut() else {
            return Err(err);
        };
        match try_frame.mode {
            TryMode::InHandler => {
                // A second exception escaped a handler (or the finally of a
                // handler-less try) -- this try is done; unwind to its
                // finally (if any) with the new error pending, or pop and
                // keep propagating.
                let finally = try_frame.targets.finally;
                try_frame.mode = TryMode::InHandler;
                try_frame.pending_reraise = Some(err);
                if let Some(target) = finally {
                    restore_stack_depth(ctx, frame, frame.try_stack.last().unwrap().stack_depth, frame.try_stack.last().unwrap().arg_depth);
                    frame.pc = target;
                    return Ok(());
                }
                let finished = frame.try_stack.pop().unwrap();
                let err = finished.pending_reraise.unwrap();
                if let Some(h) = finished.handling {
                    h.drop_with_heap(ctx.heap_mut());
                }
                return dispatch_exception(ctx, frame, err);
            }
            TryMode::Active => {
                let stack_depth = try_frame.stack_depth;
                let arg_depth = try_frame.arg_depth;
                let handlers = try_frame.targets.handlers.clone();
                match find_matching_handler(ctx, frame, &handlers, &err) {
                    Ok(Some((idx, target))) => {
                        restore_stack_depth(ctx, frame, stack_depth, arg_depth);
                        let try_frame = frame.try_stack.last_mut().unwrap();
                        try_frame.mode = TryMode::InHandler;
                        try_frame.handling = Some(err.value.clone_with_heap(ctx.heap_mut()));
                        if let Some(bind) = handlers[idx].bind {
                            let v = err.value.clone_with_heap(ctx.heap_mut());
                            bind_in_frame(ctx, frame, bind, v);
                        }
                        err.drop_with_heap(ctx.heap_mut());
                        frame.pc = target;
                        return Ok(());
                    }
                    Ok(None) => {
                        let finally = try_frame.targets.finally;
                        try_frame.pending_reraise = Some(err);
                        if let Some(target) = finally {
                            restore_stack_depth(ctx, frame, stack_depth, arg_depth);
                            frame.pc = target;
                            return Ok(());
                        }
                        let finished = frame.try_stack.pop().unwrap();
                        let err = finished.pending_reraise.unwrap();
                        return dispatch_exception(ctx, frame, err);
                    }
                    Err(type_check_err) => {
                        restore_stack_depth(ctx, frame, stack_depth, arg_depth);
                        return dispatch_exception_after_pop(ctx, frame, type_check_err);
                    }
                }
            }
        }
    }
}

fn dispatch_exception_after_pop(ctx: &mut Context, frame: &mut Frame, err: RunError) -> RunResult<()> {
    frame.try_stack.pop();
    dispatch_exception(ctx, frame, err)
}

fn restore_stack_depth(ctx: &mut Context, frame: &mut Frame, stack_depth: usize, arg_depth: usize) {
    while frame.stack.len() > stack_depth {
        if let Some(v) = frame.stack.pop() {
            v.drop_with_heap(ctx.heap_mut());
        }
    }
    while frame.arg_frames.len() > arg_depth {
        if let Some(af) = frame.arg_frames.pop() {
            for v in af.positional {
                v.drop_with_heap(ctx.heap_mut());
            }
            if let Some(k) = af.kwargs {
                k.drop_with_heap(ctx.heap_mut());
            }
        }
    }
}

fn bind_in_frame(ctx: &mut Context, frame: &mut Frame, name: Symbol, value: Value) {
    if let Some(module_id) = frame.write_through {
        ctx.heap_mut().set_attr_owned(module_id, name, value);
        return;
    }
    if let Some(&cell_id) = frame.vars.get(&name) {
        cell_set(ctx, cell_id, value);
        return;
    }
    ctx.heap_mut().set_attr_owned(frame.module, name, value);
}

/// Evaluates each handler's `type_check` instruction sequence (a tiny,
/// self-contained instruction list that leaves a class or tuple of classes
/// on the stack) in turn, returning the first one `err` matches.
fn find_matching_handler(
    ctx: &mut Context,
    frame: &mut Frame,
    handlers: &[ExceptTarget],
    err: &RunError,
) -> Result<Option<(usize, usize)>, RunError> {
    for (idx, handler) in handlers.iter().enumerate() {
        if handler.type_check.is_empty() {
            return Ok(Some((idx, handler.target)));
        }
        let check_value = run_type_check(ctx, frame, &handler.type_check)?;
        if exception_matches(ctx, &check_value, err) {
            check_value.drop_with_heap(ctx.heap_mut());
            return Ok(Some((idx, handler.target)));
        }
        check_value.drop_with_heap(ctx.heap_mut());
    }
    Ok(None)
}

/// Runs a handler's `type_check` instructions as a tiny isolated
/// sub-execution over the same frame's variable scope, since they are just
/// an expression (a name, an attribute, or a tuple literal) compiled to
/// instructions -- never a `Call`/`Try`/jump that could itself raise in a
/// way this frame's own try machinery would need to intercept.
fn run_type_check(ctx: &mut Context, frame: &mut Frame, instructions: &[Instruction]) -> Result<Value, RunError> {
    let base = frame.stack.len();
    for instr in instructions {
        exec_simple_instruction(ctx, frame, instr)?;
    }
    Ok(frame.stack.drain(base..).next().unwrap_or(Value::None))
}

/// A reduced instruction executor for type-check sub-sequences: only the
/// shapes the compiler ever emits there (`LoadConst`, `LoadName`, `LoadAttr`,
/// `BuildTuple`) need support.
fn exec_simple_instruction(ctx: &mut Context, frame: &mut Frame, instr: &Instruction) -> Result<(), RunError> {
    match instr {
        Instruction::LoadConst(c) => {
            let v = load_const(ctx, c)?;
            frame.stack.push(v);
        }
        Instruction::LoadName(name) => {
            let v = load_name(ctx, frame, *name)?;
            frame.stack.push(v);
        }
        Instruction::LoadAttr(name) => {
            let obj = frame.stack.pop().unwrap_or(Value::None);
            let v = get_attribute(ctx, obj, *name)?;
            obj.drop_with_heap(ctx.heap_mut());
            frame.stack.push(v);
        }
        Instruction::BuildTuple(n) => {
            let base = frame.stack.len() - n;
            let items: Vec<Value> = frame.stack.drain(base..).collect();
            let t = ctx.new_tuple(items)?;
            frame.stack.push(t);
        }
        _ => {}
    }
    Ok(())
}

fn exception_matches(ctx: &Context, check_value: &Value, err: &RunError) -> bool {
    match check_value {
        Value::Ref(id) => match ctx.heap().get(*id).map(|o| &o.data) {
            Some(HeapData::Tuple(items)) => items.iter().any(|v| exception_matches_one(ctx, v, err)),
            _ => exception_matches_one(ctx, check_value, err),
        },
        _ => false,
    }
}

fn exception_matches_one(ctx: &Context, cls: &Value, err: &RunError) -> bool {
    let Value::Ref(cls_id) = *cls else { return false };
    match ctx.heap().get(cls_id).map(|o| &o.data) {
        Some(HeapData::Builtin(BuiltinId::ExcCtor(target))) => err.matches(ctx.heap(), *target),
        Some(HeapData::Class(class_record)) => {
            let Value::Ref(exc_id) = err.value else { return false };
            if ctx.heap().is_instance_of_class(exc_id, cls_id) {
                return true;
            }
            class_record.exc_type.is_some_and(|t| err.matches(ctx.heap(), t))
        }
        _ => false,
    }
}

fn load_const(ctx: &mut Context, c: &Const) -> RunResult<Value> {
    Ok(match c {
        Const::None => Value::None,
        Const::Bool(b) => Value::Bool(*b),
        Const::Int(i) => Value::Int(*i),
        Const::Float(f) => Value::Float(*f),
        Const::Str(s) => ctx.new_str(s.clone())?,
    })
}

fn load_name(ctx: &mut Context, frame: &Frame, name: Symbol) -> RunResult<Value> {
    if let Some(module_id) = frame.write_through {
        return match ctx.heap().get_attr(module_id, name) {
            Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
            None => Err(ExcType::name_error(ctx.heap_mut(), ctx.heap().resolve(name))),
        };
    }
    if frame.code.global_captures.contains(&name) {
        return match ctx.heap().get_attr(frame.module, name) {
            Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
            None => Err(ExcType::name_error(ctx.heap_mut(), ctx.heap().resolve(name))),
        };
    }
    if let Some(&cell_id) = frame.vars.get(&name) {
        return Ok(cell_get(ctx, cell_id).clone_with_heap(ctx.heap_mut()));
    }
    match ctx.heap().get_attr(frame.module, name) {
        Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
        None => Err(ExcType::name_error(ctx.heap_mut(), ctx.heap().resolve(name))),
    }
}

fn store_name(ctx: &mut Context, frame: &mut Frame, name: Symbol, value: Value) {
    bind_in_frame(ctx, frame, name, value);
}

/// Executes exactly one instruction at `frame.pc`, advancing it (unless the
/// instruction itself set it, as with a jump).
fn step(ctx: &mut Context, frame: &mut Frame) -> StepOutcome {
    let Some(instr) = frame.code.instructions.get(frame.pc).cloned() else {
        return StepOutcome::Return(Value::None);
    };
    frame.pc += 1;
    exec_instruction(ctx, frame, &instr)
}

fn exec_instruction(ctx: &mut Context, frame: &mut Frame, instr: &Instruction) -> StepOutcome {
    macro_rules! ok {
        ($body:expr) => {
            match $body {
                Ok(()) => return StepOutcome::Continue,
                Err(e) => return StepOutcome::Raised(e),
            }
        };
    }
    macro_rules! push_result {
        ($body:expr) => {
            match $body {
                Ok(v) => {
                    frame.stack.push(v);
                    return StepOutcome::Continue;
                }
                Err(e) => return StepOutcome::Raised(e),
            }
        };
    }

    match instr {
        Instruction::LoadConst(c) => push_result!(load_const(ctx, c)),
        Instruction::LoadName(name) => push_result!(load_name(ctx, frame, *name)),
        Instruction::StoreName(name) => {
            let v = frame.stack.pop().expect("operand stack underflow");
            store_name(ctx, frame, *name, v);
            StepOutcome::Continue
        }
        Instruction::LoadAttr(name) => {
            let obj = frame.stack.pop().expect("operand stack underflow");
            let result = get_attribute(ctx, obj, *name);
            obj.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::StoreAttr(name) => {
            let value = frame.stack.pop().expect("operand stack underflow");
            let obj = frame.stack.pop().expect("operand stack underflow");
            let result = set_attribute(ctx, obj, *name, value);
            value.drop_with_heap(ctx.heap_mut());
            obj.drop_with_heap(ctx.heap_mut());
            ok!(result)
        }
        Instruction::LoadIndex => {
            let index = frame.stack.pop().expect("operand stack underflow");
            let obj = frame.stack.pop().expect("operand stack underflow");
            let result = ops::getitem(ctx, obj, index);
            index.drop_with_heap(ctx.heap_mut());
            obj.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::StoreIndex => {
            let value = frame.stack.pop().expect("operand stack underflow");
            let index = frame.stack.pop().expect("operand stack underflow");
            let obj = frame.stack.pop().expect("operand stack underflow");
            let result = ops::setitem(ctx, obj, index, value);
            value.drop_with_heap(ctx.heap_mut());
            index.drop_with_heap(ctx.heap_mut());
            obj.drop_with_heap(ctx.heap_mut());
            ok!(result)
        }
        Instruction::MakeSlice => {
            let step = frame.stack.pop().expect("operand stack underflow");
            let stop = frame.stack.pop().expect("operand stack underflow");
            let start = frame.stack.pop().expect("operand stack underflow");
            push_result!(ctx.alloc(HeapData::Slice { start, stop, step }))
        }
        Instruction::BuildTuple(n) => {
            let base = frame.stack.len() - n;
            let items: Vec<Value> = frame.stack.drain(base..).collect();
            push_result!(ctx.new_tuple(items))
        }
        Instruction::BuildList(n) => {
            let base = frame.stack.len() - n;
            let items: Vec<Value> = frame.stack.drain(base..).collect();
            push_result!(ctx.new_list(items))
        }
        Instruction::BuildMap(n) => {
            let base = frame.stack.len() - 2 * n;
            let items: Vec<Value> = frame.stack.drain(base..).collect();
            let dict_value = match ctx.new_dict() {
                Ok(v) => v,
                Err(e) => return StepOutcome::Raised(e),
            };
            let Value::Ref(dict_id) = dict_value else { unreachable!() };
            let mut pairs = items;
            while let Some(value) = pairs.pop() {
                let key = pairs.pop().expect("BuildMap operand count mismatch");
                if let Some(old) = dict_insert(ctx.heap_mut(), dict_id, key, value) {
                    old.drop_with_heap(ctx.heap_mut());
                }
            }
            frame.stack.push(dict_value);
            StepOutcome::Continue
        }
        Instruction::BuildSet(n) => {
            let base = frame.stack.len() - n;
            let items: Vec<Value> = frame.stack.drain(base..).collect();
            let set_value = match ctx.new_set() {
                Ok(v) => v,
                Err(e) => return StepOutcome::Raised(e),
            };
            let Value::Ref(set_id) = set_value else { unreachable!() };
            for v in items {
                if !set_insert(ctx.heap_mut(), set_id, v) {
                    v.drop_with_heap(ctx.heap_mut());
                }
            }
            frame.stack.push(set_value);
            StepOutcome::Continue
        }
        Instruction::UnaryOp(op) => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let result = unary_op(ctx, *op, v);
            v.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::LogicalNot => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let truthy = v.is_truthy(ctx.heap());
            v.drop_with_heap(ctx.heap_mut());
            frame.stack.push(Value::Bool(!truthy));
            StepOutcome::Continue
        }
        Instruction::BinOp { op, in_place } => {
            let right = frame.stack.pop().expect("operand stack underflow");
            let left = frame.stack.pop().expect("operand stack underflow");
            let result = binary_op(ctx, *op, left, right, *in_place);
            right.drop_with_heap(ctx.heap_mut());
            left.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::Contains { negate } => {
            let right = frame.stack.pop().expect("operand stack underflow");
            let left = frame.stack.pop().expect("operand stack underflow");
            let result = contains_op(ctx, left, right, *negate);
            right.drop_with_heap(ctx.heap_mut());
            left.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::IsOp { negate } => {
            let right = frame.stack.pop().expect("operand stack underflow");
            let left = frame.stack.pop().expect("operand stack underflow");
            let result = is_op(left, right, *negate);
            right.drop_with_heap(ctx.heap_mut());
            left.drop_with_heap(ctx.heap_mut());
            frame.stack.push(result);
            StepOutcome::Continue
        }
        Instruction::Pop => {
            let v = frame.stack.pop().expect("operand stack underflow");
            v.drop_with_heap(ctx.heap_mut());
            StepOutcome::Continue
        }
        Instruction::Dup => {
            let v = *frame.stack.last().expect("operand stack underflow");
            let v = v.clone_with_heap(ctx.heap_mut());
            frame.stack.push(v);
            StepOutcome::Continue
        }
        Instruction::JumpIfFalsePop(target) => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let truthy = v.is_truthy(ctx.heap());
            v.drop_with_heap(ctx.heap_mut());
            if !truthy {
                frame.pc = *target;
            }
            StepOutcome::Continue
        }
        Instruction::JumpIfFalse(target) => {
            let v = *frame.stack.last().expect("operand stack underflow");
            if !v.is_truthy(ctx.heap()) {
                frame.pc = *target;
            }
            StepOutcome::Continue
        }
        Instruction::JumpIfTrue(target) => {
            let v = *frame.stack.last().expect("operand stack underflow");
            if v.is_truthy(ctx.heap()) {
                frame.pc = *target;
            }
            StepOutcome::Continue
        }
        Instruction::Jump(target) => {
            frame.pc = *target;
            StepOutcome::Continue
        }
        Instruction::MakeFunction(template) => {
            let mut defaults = Vec::with_capacity(template.num_defaults);
            for _ in 0..template.num_defaults {
                defaults.push(frame.stack.pop().expect("operand stack underflow"));
            }
            defaults.reverse();
            let mut closure = Vec::with_capacity(template.local_captures.len());
            for &name in &template.local_captures {
                if let Some(&cell_id) = frame.vars.get(&name) {
                    ctx.heap_mut().inc_ref(cell_id);
                    closure.push((name, Value::Ref(cell_id)));
                }
            }
            let record = FunctionRecord {
                name: template.name,
                signature: Signature {
                    params: template.params.clone(),
                    num_defaults: template.num_defaults,
                    vararg: template.vararg,
                    kwarg: template.kwarg,
                },
                code: template.code.clone(),
                defaults,
                closure,
                is_method: template.is_method,
                module: frame.module,
            };
            push_result!(ctx.alloc(HeapData::Function(record)))
        }
        Instruction::MakeClass { name, code, num_bases } => {
            let base = frame.stack.len() - num_bases;
            let mut base_values: Vec<Value> = frame.stack.drain(base..).collect();
            base_values.reverse();
            match make_class(ctx, frame.module, *name, code.clone(), base_values) {
                Ok(v) => {
                    frame.stack.push(v);
                    StepOutcome::Continue
                }
                Err(e) => StepOutcome::Raised(e),
            }
        }
        Instruction::PushArgFrame => {
            frame.arg_frames.push(ArgFrame { positional: Vec::new(), kwargs: None });
            StepOutcome::Continue
        }
        Instruction::PushPositionalArg => {
            let v = frame.stack.pop().expect("operand stack underflow");
            frame.arg_frames.last_mut().expect("no active arg frame").positional.push(v);
            StepOutcome::Continue
        }
        Instruction::PushStarArg => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let items = match iterate_to_vec(ctx, v) {
                Ok(items) => items,
                Err(e) => {
                    v.drop_with_heap(ctx.heap_mut());
                    return StepOutcome::Raised(e);
                }
            };
            v.drop_with_heap(ctx.heap_mut());
            frame.arg_frames.last_mut().expect("no active arg frame").positional.extend(items);
            StepOutcome::Continue
        }
        Instruction::PushKwarg(name) => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let key_text = ctx.heap().resolve(*name).to_owned();
            let key = match ctx.new_str(key_text) {
                Ok(k) => k,
                Err(e) => return StepOutcome::Raised(e),
            };
            let dict_value = match ensure_kwargs_dict(ctx, frame) {
                Ok(d) => d,
                Err(e) => return StepOutcome::Raised(e),
            };
            let Value::Ref(dict_id) = dict_value else { unreachable!() };
            if let Some(old) = dict_insert(ctx.heap_mut(), dict_id, key, v) {
                old.drop_with_heap(ctx.heap_mut());
            }
            StepOutcome::Continue
        }
        Instruction::PushDoubleStarKwarg => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let entries = match collect_dict_entries(ctx, v) {
                Ok(entries) => entries,
                Err(e) => {
                    v.drop_with_heap(ctx.heap_mut());
                    return StepOutcome::Raised(e);
                }
            };
            v.drop_with_heap(ctx.heap_mut());
            let dict_value = match ensure_kwargs_dict(ctx, frame) {
                Ok(d) => d,
                Err(e) => return StepOutcome::Raised(e),
            };
            let Value::Ref(dict_id) = dict_value else { unreachable!() };
            for (k, val) in entries {
                if let Some(old) = dict_insert(ctx.heap_mut(), dict_id, k, val) {
                    old.drop_with_heap(ctx.heap_mut());
                }
            }
            StepOutcome::Continue
        }
        Instruction::Call => {
            let callee = frame.stack.pop().expect("operand stack underflow");
            let af = frame.arg_frames.pop().expect("Call with no active arg frame");
            let result = call_value(ctx, callee, &af.positional, af.kwargs);
            for v in af.positional {
                v.drop_with_heap(ctx.heap_mut());
            }
            if let Some(k) = af.kwargs {
                k.drop_with_heap(ctx.heap_mut());
            }
            callee.drop_with_heap(ctx.heap_mut());
            push_result!(result)
        }
        Instruction::Return => {
            let v = frame.stack.pop().unwrap_or(Value::None);
            StepOutcome::Return(v)
        }
        Instruction::Raise { has_value } => {
            if *has_value {
                let v = frame.stack.pop().expect("operand stack underflow");
                match to_exception_instance(ctx, v) {
                    Ok(exc) => StepOutcome::Raised(RunError::raised(exc)),
                    Err(e) => StepOutcome::Raised(e),
                }
            } else {
                match frame.current_handling() {
                    Some(v) => {
                        let v = v.clone_with_heap(ctx.heap_mut());
                        StepOutcome::Raised(RunError::raised(v))
                    }
                    None => StepOutcome::Raised(ExcType::runtime_error(ctx.heap_mut(), "No active exception to re-raise")),
                }
            }
        }
        Instruction::PushTry(targets) => {
            frame.try_stack.push(TryFrame {
                targets: targets.clone(),
                mode: TryMode::Active,
                stack_depth: frame.stack.len(),
                arg_depth: frame.arg_frames.len(),
                handling: None,
                pending_reraise: None,
            });
            StepOutcome::Continue
        }
        Instruction::PopTry => {
            if let Some(finished) = frame.try_stack.pop() {
                if let Some(v) = finished.handling {
                    v.drop_with_heap(ctx.heap_mut());
                }
                if let Some(err) = finished.pending_reraise {
                    return StepOutcome::Raised(err);
                }
            }
            StepOutcome::Continue
        }
        Instruction::LoadCurrentException => {
            let v = frame.current_handling().unwrap_or(Value::None).clone_with_heap(ctx.heap_mut());
            frame.stack.push(v);
            StepOutcome::Continue
        }
        Instruction::Import { module, alias } => {
            let result = crate::modules::loader::import(ctx, *module);
            match result {
                Ok(module_id) => {
                    ctx.heap_mut().inc_ref(module_id);
                    store_name(ctx, frame, *alias, Value::Ref(module_id));
                    StepOutcome::Continue
                }
                Err(e) => StepOutcome::Raised(e),
            }
        }
        Instruction::ImportFrom { module, names, star } => {
            let result = crate::modules::loader::import(ctx, *module);
            let module_id = match result {
                Ok(id) => id,
                Err(e) => return StepOutcome::Raised(e),
            };
            if *star {
                let keys: Vec<Symbol> = match ctx.heap().get(module_id) {
                    Some(obj) => obj.attrs.keys().collect(),
                    None => Vec::new(),
                };
                for key in keys {
                    if let Some(v) = ctx.heap().get_attr(module_id, key) {
                        let v = v.clone_with_heap(ctx.heap_mut());
                        store_name(ctx, frame, key, v);
                    }
                }
                StepOutcome::Continue
            } else {
                for (name, alias) in names.iter() {
                    match ctx.heap().get_attr(module_id, *name) {
                        Some(v) => {
                            let v = v.clone_with_heap(ctx.heap_mut());
                            store_name(ctx, frame, *alias, v);
                        }
                        None => {
                            let module_name = ctx.heap().resolve(*module).to_owned();
                            let attr_name = ctx.heap().resolve(*name).to_owned();
                            return StepOutcome::Raised(ExcType::import_error(
                                ctx.heap_mut(),
                                format!("cannot import name '{attr_name}' from '{module_name}'"),
                            ));
                        }
                    }
                }
                StepOutcome::Continue
            }
        }
        Instruction::UnpackSequence(n) => {
            let v = frame.stack.pop().expect("operand stack underflow");
            let result = unpack_exact(ctx, v, *n);
            v.drop_with_heap(ctx.heap_mut());
            match result {
                Ok(mut items) => {
                    items.reverse();
                    frame.stack.extend(items);
                    StepOutcome::Continue
                }
                Err(e) => StepOutcome::Raised(e),
            }
        }
    }
}

fn ensure_kwargs_dict(ctx: &mut Context, frame: &mut Frame) -> RunResult<Value> {
    let af = frame.arg_frames.last_mut().expect("no active arg frame");
    if let Some(v) = af.kwargs {
        return Ok(v);
    }
    let dict_value = ctx.new_dict()?;
    frame.arg_frames.last_mut().unwrap().kwargs = Some(dict_value);
    Ok(dict_value)
}

fn collect_dict_entries(ctx: &mut Context, value: Value) -> RunResult<Vec<(Value, Value)>> {
    let Value::Ref(id) = value else {
        return Err(type_err(ctx, "argument after ** must be a mapping"));
    };
    let entries = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Dict(d)) => d.iter().collect::<Vec<_>>(),
        _ => return Err(type_err(ctx, "argument after ** must be a mapping")),
    };
    for (k, v) in &entries {
        k.clone_with_heap(ctx.heap_mut());
        v.clone_with_heap(ctx.heap_mut());
    }
    Ok(entries)
}

fn to_exception_instance(ctx: &mut Context, v: Value) -> RunResult<Value> {
    if let Value::Ref(id) = v {
        let is_type = matches!(
            ctx.heap().get(id).map(|o| &o.data),
            Some(HeapData::Class(_)) | Some(HeapData::Builtin(BuiltinId::ExcCtor(_)))
        );
        if is_type {
            let result = call_value(ctx, v, &[], None);
            v.drop_with_heap(ctx.heap_mut());
            return result;
        }
    }
    Ok(v)
}

fn make_class(ctx: &mut Context, module: HeapId, name: Symbol, code: Rc<CompiledCode>, base_values: Vec<Value>) -> RunResult<Value> {
    let harvested = run_class_body(ctx, code, module)?;

    let mut parents = Vec::with_capacity(base_values.len());
    let mut exc_type = None;
    for &base in &base_values {
        if let Value::Ref(base_id) = base {
            match ctx.heap().get(base_id).map(|o| &o.data) {
                Some(HeapData::Builtin(BuiltinId::ExcCtor(t))) => {
                    exc_type.get_or_insert(*t);
                }
                Some(HeapData::Class(c)) => {
                    if exc_type.is_none() {
                        exc_type = c.exc_type;
                    }
                    parents.push(base_id);
                }
                _ => parents.push(base_id),
            }
        }
    }

    let class_id = match ctx.heap_mut().allocate_with_attrs(HeapData::Class(ClassRecord::with_exc_type(name, exc_type)), parents) {
        Ok(id) => id,
        Err(_) => return Err(RunError::raised(ctx.heap().memory_error_singleton())),
    };

    for v in base_values {
        v.drop_with_heap(ctx.heap_mut());
    }
    for (attr_name, value) in harvested {
        ctx.heap_mut().set_attr_owned(class_id, attr_name, value);
    }

    Ok(Value::Ref(class_id))
}
