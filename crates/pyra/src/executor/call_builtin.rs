//! Dispatch for every flavor of [`BuiltinId`]: the fixed free-function table
//! (`Func`), stdlib module functions (`ModuleFn`), exception type
//! constructors, host-registered natives, and the bound builtin methods
//! `crate::executor::get_attribute` synthesizes for container/primitive
//! values.

use std::cmp::Ordering;
use std::io::{BufReader, BufWriter};

use rand::Rng;

use crate::builtins::{bankers_round, BuiltinId, Func, ModuleFn};
use crate::context::Context;
use crate::exceptions::{ExcType, RunResult};
use crate::executor::{
    call_value, construct_exception, get_attribute, instantiate_class, isinstance_value, iterate_to_vec, iterator_next, methods, ops, type_err,
};
use crate::heap::HeapData;
use crate::modules::dis::format_code;
use crate::types::file::FileHandle;
use crate::value::Value;

fn rng_next_f64(ctx: &mut Context) -> f64 {
    ctx.rng.random::<f64>()
}

/// Uniformly samples `[lo, hi)`. Callers pass an already-inclusive-exclusive
/// range (e.g. `randint(a, b)` calls this with `hi + 1`).
fn rng_range(ctx: &mut Context, lo: i64, hi: i64) -> i64 {
    if hi <= lo {
        return lo;
    }
    ctx.rng.random_range(lo..hi)
}

fn rng_seed(ctx: &mut Context, seed: i64) {
    use rand::SeedableRng;
    ctx.rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
}

fn monotonic_time() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

pub fn call_builtin(ctx: &mut Context, builtin: BuiltinId, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    match builtin {
        BuiltinId::Func(f) => call_free_function(ctx, f, args, kwargs),
        BuiltinId::ExcCtor(exc_type) => construct_exception(ctx, exc_type, args),
        BuiltinId::Native(idx) => call_native(ctx, idx, args, kwargs, None),
        BuiltinId::NativeMethod(idx) => call_native(ctx, idx, args, kwargs, None),
        BuiltinId::BoundNativeMethod { receiver, native } => call_native(ctx, native, args, kwargs, Some(receiver)),
        BuiltinId::Module(m) => call_module_fn(ctx, m, args),
        BuiltinId::BoundBuiltinMethod { receiver, method } => methods::call_method(ctx, receiver, method, args),
        BuiltinId::SuperProxy { .. } => Err(type_err(ctx, "'super' object is not callable")),
    }
}

fn call_native(ctx: &mut Context, idx: u32, args: &[Value], kwargs: Option<Value>, receiver: Option<Value>) -> RunResult<Value> {
    let Some(f) = ctx.native_functions.get(idx as usize).cloned() else {
        return Err(type_err(ctx, "invalid native function"));
    };
    match receiver {
        Some(recv) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(recv);
            full.extend_from_slice(args);
            f(ctx, &full, kwargs)
        }
        None => f(ctx, args, kwargs),
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::None)
}

fn call_free_function(ctx: &mut Context, f: Func, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
    let _ = kwargs;
    match f {
        Func::Abs => match arg(args, 0) {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(v) => Ok(Value::Float(v.abs())),
            Value::Bool(b) => Ok(Value::Int(if b { 1 } else { 0 })),
            v => Err(type_err(ctx, format!("bad operand type for abs(): '{}'", v.type_name(ctx.heap())))),
        },
        Func::All => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            let result = items.iter().all(|v| v.is_truthy(ctx.heap()));
            for v in items {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::Bool(result))
        }
        Func::Any => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            let result = items.iter().any(|v| v.is_truthy(ctx.heap()));
            for v in items {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::Bool(result))
        }
        Func::Bin => match arg(args, 0) {
            Value::Int(i) => ctx.new_str(format!("{}{:b}", if i < 0 { "-0b" } else { "0b" }, i.abs())),
            v => Err(type_err(ctx, format!("'{}' object cannot be interpreted as an integer", v.type_name(ctx.heap())))),
        },
        Func::Bool => Ok(Value::Bool(arg(args, 0).is_truthy(ctx.heap()))),
        Func::Bytes => bytes_builtin(ctx, args),
        Func::Callable => Ok(Value::Bool(is_callable(ctx, arg(args, 0)))),
        Func::Chr => match arg(args, 0) {
            Value::Int(i) => match char::from_u32(i as u32) {
                Some(c) => ctx.new_str(c.to_string()),
                None => Err(ExcType::value_error(ctx.heap_mut(), "chr() arg not in range")),
            },
            v => Err(type_err(ctx, format!("an integer is required (got type {})", v.type_name(ctx.heap())))),
        },
        Func::Compile => ctx.compile_source("<compile>", &string_arg(ctx, args, 0)?).map(|c| c.value),
        Func::Dict => ctx.new_dict(),
        Func::Divmod => {
            let (a, b) = (arg(args, 0), arg(args, 1));
            let floor = ops::binary_op(ctx, crate::parser::ast::BinOp::FloorDiv, a, b, false)?;
            let rem = ops::binary_op(ctx, crate::parser::ast::BinOp::Mod, a, b, false)?;
            ctx.new_tuple(vec![floor, rem])
        }
        Func::Enumerate => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, v) in items.into_iter().enumerate() {
                out.push(ctx.new_tuple(vec![Value::Int(i as i64), v])?);
            }
            ctx.new_list(out)
        }
        Func::Eval => ctx.compile_expr("<eval>", &string_arg(ctx, args, 0)?).and_then(|c| ctx.run_compiled(&c)),
        Func::Exec => ctx.compile_source("<exec>", &string_arg(ctx, args, 0)?).and_then(|c| ctx.run_compiled(&c)),
        Func::Exit | Func::Quit => Err(ExcType::SystemExit.raise(ctx.heap_mut(), "")),
        Func::Filter => {
            let pred = arg(args, 0);
            let items = iterate_to_vec(ctx, arg(args, 1))?;
            let mut out = Vec::new();
            for v in items {
                let keep = if matches!(pred, Value::None) {
                    v.is_truthy(ctx.heap())
                } else {
                    let r = call_value(ctx, pred, &[v], None)?;
                    let truthy = r.is_truthy(ctx.heap());
                    r.drop_with_heap(ctx.heap_mut());
                    truthy
                };
                if keep {
                    out.push(v);
                } else {
                    v.drop_with_heap(ctx.heap_mut());
                }
            }
            ctx.new_list(out)
        }
        Func::Float => ops::float_value(ctx, arg(args, 0)),
        Func::Frozenset => set_builtin(ctx, args),
        Func::GetAttr => {
            let name = string_arg(ctx, args, 1)?;
            let sym = ctx.heap_mut().intern(&name);
            match get_attribute(ctx, arg(args, 0), sym) {
                Ok(v) => Ok(v),
                Err(_) if args.len() > 2 => Ok(arg(args, 2)),
                Err(e) => Err(e),
            }
        }
        Func::Globals => ctx.new_dict(),
        Func::HasAttr => {
            let name = string_arg(ctx, args, 1)?;
            let sym = ctx.heap_mut().intern(&name);
            match get_attribute(ctx, arg(args, 0), sym) {
                Ok(v) => {
                    v.drop_with_heap(ctx.heap_mut());
                    Ok(Value::Bool(true))
                }
                Err(e) => {
                    e.drop_with_heap(ctx.heap_mut());
                    Ok(Value::Bool(false))
                }
            }
        }
        Func::Hash => Ok(Value::Int(ctx.heap().py_hash(arg(args, 0)) as i64)),
        Func::Hex => match arg(args, 0) {
            Value::Int(i) => ctx.new_str(format!("{}{:#x}", if i < 0 { "-" } else { "" }, i.abs())),
            v => Err(type_err(ctx, format!("'{}' object cannot be interpreted as an integer", v.type_name(ctx.heap())))),
        },
        Func::Id => Ok(Value::Int(arg(args, 0).identity())),
        Func::Input => Ok(Value::None),
        Func::Int => ops::int_value(ctx, arg(args, 0)),
        Func::Isinstance => Ok(Value::Bool(isinstance_value(ctx, arg(args, 0), arg(args, 1)))),
        Func::Issubclass => Ok(Value::Bool(issubclass(ctx, arg(args, 0), arg(args, 1)))),
        Func::Iter => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            ctx.alloc(HeapData::Iterator(crate::types::iterator::IterKind::from_items(items)))
        }
        Func::Len => ops::len_value(ctx, arg(args, 0)),
        Func::List => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            ctx.new_list(items)
        }
        Func::Map => {
            let func = arg(args, 0);
            let items = iterate_to_vec(ctx, arg(args, 1))?;
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(call_value(ctx, func, &[v], None)?);
            }
            ctx.new_list(out)
        }
        Func::Max => minmax(ctx, args, Ordering::Greater),
        Func::Min => minmax(ctx, args, Ordering::Less),
        Func::Next => {
            let items = iterate_single_step(ctx, arg(args, 0))?;
            match items {
                Some(v) => Ok(v),
                None => {
                    if args.len() > 1 {
                        Ok(arg(args, 1))
                    } else {
                        Err(ExcType::stop_iteration(ctx.heap_mut()))
                    }
                }
            }
        }
        Func::Oct => match arg(args, 0) {
            Value::Int(i) => ctx.new_str(format!("{}0o{:o}", if i < 0 { "-" } else { "" }, i.abs())),
            v => Err(type_err(ctx, format!("'{}' object cannot be interpreted as an integer", v.type_name(ctx.heap())))),
        },
        Func::Open => open_builtin(ctx, args),
        Func::Ord => {
            let s = string_arg(ctx, args, 0)?;
            match s.chars().next() {
                Some(c) if s.chars().count() == 1 => Ok(Value::Int(c as i64)),
                _ => Err(type_err(ctx, "ord() expected a character")),
            }
        }
        Func::Pow => ops::binary_op(ctx, crate::parser::ast::BinOp::Pow, arg(args, 0), arg(args, 1), false),
        Func::Print => {
            let sep = if args.len() > 1 { " " } else { "" };
            let mut line = String::new();
            for (i, v) in args.iter().enumerate() {
                if i > 0 {
                    line.push_str(sep);
                }
                line.push_str(&v.py_str(ctx.heap()));
            }
            ctx.print_line(&line);
            Ok(Value::None)
        }
        Func::Range => range_builtin(ctx, args),
        Func::Repr => ops::repr_value(ctx, arg(args, 0)),
        Func::Reversed => {
            let mut items = iterate_to_vec(ctx, arg(args, 0))?;
            items.reverse();
            ctx.alloc(HeapData::Iterator(crate::types::iterator::IterKind::from_items(items)))
        }
        Func::Round => {
            let ndigits = match arg(args, 1) {
                Value::Int(n) => Some(n),
                _ => None,
            };
            match arg(args, 0) {
                Value::Float(f) => match ndigits {
                    Some(n) => {
                        let scale = 10f64.powi(n as i32);
                        Ok(Value::Float(bankers_round(f * scale) / scale))
                    }
                    None => Ok(Value::Int(bankers_round(f) as i64)),
                },
                Value::Int(i) => Ok(Value::Int(i)),
                v => Err(type_err(ctx, format!("type '{}' doesn't define __round__ method", v.type_name(ctx.heap())))),
            }
        }
        Func::Set => set_builtin(ctx, args),
        Func::SetAttr => {
            let name = string_arg(ctx, args, 1)?;
            let sym = ctx.heap_mut().intern(&name);
            crate::executor::set_attribute(ctx, arg(args, 0), sym, arg(args, 2))?;
            Ok(Value::None)
        }
        Func::Slice => {
            let (start, stop, step) = match args.len() {
                1 => (Value::None, arg(args, 0), Value::None),
                2 => (arg(args, 0), arg(args, 1), Value::None),
                _ => (arg(args, 0), arg(args, 1), arg(args, 2)),
            };
            ctx.alloc(HeapData::Slice { start, stop, step })
        }
        Func::Sorted => sorted_builtin(ctx, args),
        Func::Str => ops::str_value(ctx, arg(args, 0)),
        Func::Sum => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            let mut total = if args.len() > 1 { arg(args, 1) } else { Value::Int(0) };
            for v in items {
                total = ops::binary_op(ctx, crate::parser::ast::BinOp::Add, total, v, false)?;
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(total)
        }
        Func::Super => super_builtin(ctx, args),
        Func::Tuple => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            ctx.new_tuple(items)
        }
        Func::Type => type_builtin(ctx, args),
        Func::Vars => ctx.new_dict(),
        Func::Zip => zip_builtin(ctx, args),
    }
}

fn string_arg(ctx: &mut Context, args: &[Value], i: usize) -> RunResult<String> {
    match arg(args, i) {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Str(s)) => Ok(s.clone()),
            _ => Err(type_err(ctx, "expected a string argument")),
        },
        _ => Err(type_err(ctx, "expected a string argument")),
    }
}

fn is_callable(ctx: &Context, v: Value) -> bool {
    match v {
        Value::Ref(id) => matches!(
            ctx.heap().get(id).map(|o| &o.data),
            Some(HeapData::Function(_)) | Some(HeapData::BoundMethod { .. }) | Some(HeapData::Class(_)) | Some(HeapData::Builtin(_))
        ),
        _ => false,
    }
}

fn issubclass(ctx: &Context, cls: Value, target: Value) -> bool {
    match (cls, target) {
        (Value::Ref(cls_id), Value::Ref(target_id)) => {
            if cls_id == target_id {
                return true;
            }
            match (ctx.heap().get(cls_id).map(|o| &o.data), ctx.heap().get(target_id).map(|o| &o.data)) {
                (Some(HeapData::Class(_)), Some(HeapData::Class(_))) => ctx.heap().is_instance_of_class(cls_id, target_id),
                (Some(HeapData::Class(c)), Some(HeapData::Builtin(BuiltinId::ExcCtor(t)))) => c.exc_type.is_some_and(|e| e.is_a(*t)),
                _ => false,
            }
        }
        _ => false,
    }
}

fn bytes_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    match arg(args, 0) {
        Value::Int(n) => ctx.new_bytes(vec![0u8; n.max(0) as usize]),
        v @ Value::Ref(_) => {
            let items = iterate_to_vec(ctx, v)?;
            let mut data = Vec::with_capacity(items.len());
            for item in items {
                if let Value::Int(i) = item {
                    data.push(i as u8);
                }
                item.drop_with_heap(ctx.heap_mut());
            }
            ctx.new_bytes(data)
        }
        _ => ctx.new_bytes(Vec::new()),
    }
}

fn set_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    let set_value = ctx.new_set()?;
    let Value::Ref(set_id) = set_value else { unreachable!() };
    if let Some(&first) = args.first() {
        let items = iterate_to_vec(ctx, first)?;
        for v in items {
            if !crate::executor::set_insert(ctx.heap_mut(), set_id, v) {
                v.drop_with_heap(ctx.heap_mut());
            }
        }
    }
    Ok(set_value)
}

fn range_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    let (start, stop, step) = match args.len() {
        1 => (0, int_of(ctx, arg(args, 0))?, 1),
        2 => (int_of(ctx, arg(args, 0))?, int_of(ctx, arg(args, 1))?, 1),
        _ => (int_of(ctx, arg(args, 0))?, int_of(ctx, arg(args, 1))?, int_of(ctx, arg(args, 2))?),
    };
    if step == 0 {
        return Err(ExcType::value_error(ctx.heap_mut(), "range() arg 3 must not be zero"));
    }
    ctx.alloc(HeapData::Range { start, stop, step })
}

fn int_of(ctx: &mut Context, v: Value) -> RunResult<i64> {
    match v {
        Value::Int(i) => Ok(i),
        _ => Err(type_err(ctx, "'range' requires an integer argument")),
    }
}

fn minmax(ctx: &mut Context, args: &[Value], want: Ordering) -> RunResult<Value> {
    let items = if args.len() == 1 {
        iterate_to_vec(ctx, arg(args, 0))?
    } else {
        args.to_vec()
    };
    let mut best: Option<Value> = None;
    for v in items {
        match best {
            None => best = Some(v),
            Some(b) => {
                let cmp = numeric_or_str_cmp(ctx, v, b);
                if cmp == want {
                    best = Some(v);
                } else {
                    v.drop_with_heap(ctx.heap_mut());
                }
            }
        }
    }
    best.ok_or_else(|| ExcType::value_error(ctx.heap_mut(), "arg is an empty sequence"))
}

fn numeric_or_str_cmp(ctx: &Context, a: Value, b: Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(&y),
        (Value::Ref(x), Value::Ref(y)) => match (ctx.heap().get(x).map(|o| &o.data), ctx.heap().get(y).map(|o| &o.data)) {
            (Some(HeapData::Str(s1)), Some(HeapData::Str(s2))) => s1.cmp(s2),
            _ => Ordering::Equal,
        },
        _ => {
            let xf = to_f64(a);
            let yf = to_f64(b);
            xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
        }
    }
}

fn to_f64(v: Value) -> f64 {
    match v {
        Value::Int(i) => i as f64,
        Value::Float(f) => f,
        Value::Bool(b) => if b { 1.0 } else { 0.0 },
        _ => 0.0,
    }
}

fn sorted_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    let mut items = iterate_to_vec(ctx, arg(args, 0))?;
    items.sort_by(|&a, &b| numeric_or_str_cmp(ctx, a, b));
    ctx.new_list(items)
}

fn zip_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    let mut sequences = Vec::with_capacity(args.len());
    for &v in args {
        sequences.push(iterate_to_vec(ctx, v)?);
    }
    let n = sequences.iter().map(|s| s.len()).min().unwrap_or(0);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let row: Vec<Value> = sequences.iter().map(|s| s[i]).collect();
        out.push(ctx.new_tuple(row)?);
    }
    for seq in sequences {
        for (i, v) in seq.into_iter().enumerate() {
            if i >= n {
                v.drop_with_heap(ctx.heap_mut());
            }
        }
    }
    ctx.new_list(out)
}

fn iterate_single_step(ctx: &mut Context, v: Value) -> RunResult<Option<Value>> {
    if let Value::Ref(id) = v {
        if matches!(ctx.heap().get(id).map(|o| &o.data), Some(HeapData::Iterator(_))) {
            return iterator_next(ctx, id);
        }
    }
    let mut items = iterate_to_vec(ctx, v)?;
    Ok(if items.is_empty() { None } else { Some(items.remove(0)) })
}

fn type_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    match arg(args, 0) {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| o.parents.first().copied()) {
            Some(Some(class_id)) => {
                ctx.heap_mut().inc_ref(class_id);
                Ok(Value::Ref(class_id))
            }
            _ => {
                let type_name = ctx.heap().type_name(id).to_owned();
                ctx.new_str(type_name)
            }
        },
        v => {
            let type_name = v.type_name(ctx.heap()).to_owned();
            ctx.new_str(type_name)
        }
    }
}

fn super_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    let instance = arg(args, 1);
    let from_class = match arg(args, 0) {
        Value::Ref(id) => id,
        _ => match instance {
            Value::Ref(id) => match ctx.heap().get(id).map(|o| o.parents.first().copied()) {
                Some(Some(c)) => c,
                _ => return Err(type_err(ctx, "super(): no class context")),
            },
            _ => return Err(type_err(ctx, "super(): no class context")),
        },
    };
    if let Value::Ref(id) = instance {
        ctx.heap_mut().inc_ref(id);
    }
    ctx.alloc(HeapData::Builtin(BuiltinId::SuperProxy { instance, from_class }))
}

fn open_builtin(ctx: &mut Context, args: &[Value]) -> RunResult<Value> {
    if !ctx.config().enable_os_access {
        return Err(ExcType::os_error(ctx.heap_mut(), "file access is disabled for this context"));
    }
    let path = string_arg(ctx, args, 0)?;
    let mode = if args.len() > 1 { string_arg(ctx, args, 1)? } else { "r".to_owned() };
    let handle = if mode.contains('w') || mode.contains('a') {
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .append(mode.contains('a'))
            .truncate(mode.contains('w'))
            .open(&path)
            .map(|f| FileHandle::Write(BufWriter::new(f)))
    } else {
        std::fs::File::open(&path).map(|f| FileHandle::Read(BufReader::new(f)))
    };
    match handle {
        Ok(h) => ctx.alloc(HeapData::File(h)),
        Err(e) => Err(ExcType::os_error(ctx.heap_mut(), format!("{path}: {e}"))),
    }
}

fn call_module_fn(ctx: &mut Context, m: ModuleFn, args: &[Value]) -> RunResult<Value> {
    let f0 = || to_f64(arg(args, 0));
    match m {
        ModuleFn::MathSqrt => Ok(Value::Float(f0().sqrt())),
        ModuleFn::MathFloor => Ok(Value::Int(f0().floor() as i64)),
        ModuleFn::MathCeil => Ok(Value::Int(f0().ceil() as i64)),
        ModuleFn::MathPow => Ok(Value::Float(f0().powf(to_f64(arg(args, 1))))),
        ModuleFn::MathLog => Ok(Value::Float(if args.len() > 1 { f0().log(to_f64(arg(args, 1))) } else { f0().ln() })),
        ModuleFn::MathSin => Ok(Value::Float(f0().sin())),
        ModuleFn::MathCos => Ok(Value::Float(f0().cos())),
        ModuleFn::MathTan => Ok(Value::Float(f0().tan())),
        ModuleFn::RandomRandom => Ok(Value::Float(rng_next_f64(ctx))),
        ModuleFn::RandomRandint => {
            let (lo, hi) = (int_of(ctx, arg(args, 0))?, int_of(ctx, arg(args, 1))?);
            Ok(Value::Int(rng_range(ctx, lo, hi + 1)))
        }
        ModuleFn::RandomUniform => {
            let (lo, hi) = (to_f64(arg(args, 0)), to_f64(arg(args, 1)));
            Ok(Value::Float(lo + rng_next_f64(ctx) * (hi - lo)))
        }
        ModuleFn::RandomChoice => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            if items.is_empty() {
                return Err(ExcType::index_error(ctx.heap_mut(), "Cannot choose from an empty sequence"));
            }
            let idx = rng_range(ctx, 0, items.len() as i64) as usize;
            let chosen = items[idx];
            for (i, v) in items.into_iter().enumerate() {
                if i != idx {
                    v.drop_with_heap(ctx.heap_mut());
                }
            }
            Ok(chosen)
        }
        ModuleFn::RandomShuffle => {
            let Value::Ref(id) = arg(args, 0) else { return Err(type_err(ctx, "shuffle() argument must be a list")) };
            let len = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::List(l)) => l.len(),
                _ => return Err(type_err(ctx, "shuffle() argument must be a list")),
            };
            for i in (1..len).rev() {
                let j = rng_range(ctx, 0, i as i64 + 1) as usize;
                if let Some(obj) = ctx.heap_mut().get_mut(id) {
                    if let HeapData::List(l) = &mut obj.data {
                        l.items.swap(i, j);
                    }
                }
            }
            Ok(Value::None)
        }
        ModuleFn::RandomSeed => {
            let seed = int_of(ctx, arg(args, 0)).unwrap_or(0);
            rng_seed(ctx, seed);
            Ok(Value::None)
        }
        ModuleFn::TimeTime => Ok(Value::Float(monotonic_time())),
        ModuleFn::TimeSleep => Ok(Value::None),
        ModuleFn::SysExit => {
            let code = arg(args, 0);
            let msg = if matches!(code, Value::None) { String::new() } else { code.py_str(ctx.heap()) };
            Err(ExcType::SystemExit.raise(ctx.heap_mut(), msg))
        }
        ModuleFn::DisDis => {
            let Value::Ref(id) = arg(args, 0) else { return Err(type_err(ctx, "dis() expects a function")) };
            let code = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Function(f)) => f.code.clone(),
                _ => return Err(type_err(ctx, "dis() expects a function")),
            };
            let text = format_code(ctx.heap(), &code);
            ctx.print_line(&text);
            Ok(Value::None)
        }
    }
}
