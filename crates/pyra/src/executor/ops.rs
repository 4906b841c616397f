//! Operator dispatch. Builtin/primitive types (numbers, strings, the
//! container types) compute their operators directly here since this
//! language does not let scripts subclass them; `HeapData::Instance` values
//! always go through the dunder-method protocol (`obj.__add__(other)` and
//! friends), the same path a user calling `obj.__add__(other)` explicitly
//! would take. See `DESIGN.md` for why builtins skip the protocol.

use crate::exceptions::{ExcType, RunError, RunResult};
use crate::executor::{call_value, dict_get, get_attribute, type_err};
use crate::context::Context;
use crate::heap::{HeapData, HeapId};
use crate::intern::sym;
use crate::parser::ast::{BinOp, UnaryOp};
use crate::value::Value;

fn unsupported(ctx: &mut Context, op_name: &str, left: Value, right: Value) -> RunError {
    let lt = left.type_name(ctx.heap());
    let rt = right.type_name(ctx.heap());
    type_err(ctx, format!("unsupported operand type(s) for {op_name}: '{lt}' and '{rt}'"))
}

fn is_instance(ctx: &Context, v: Value) -> bool {
    matches!(v, Value::Ref(id) if matches!(ctx.heap().get(id).map(|o| &o.data), Some(HeapData::Instance) | Some(HeapData::Exception { .. })))
}

/// Dispatches through `obj.__method__(other)` for instance values. Returns
/// `None` if `left` is not an instance value, so the caller can fall through
/// to its builtin-type handling.
fn try_instance_binop(ctx: &mut Context, method: crate::intern::Symbol, left: Value, right: Value) -> Option<RunResult<Value>> {
    if !is_instance(ctx, left) {
        return None;
    }
    Some((|| {
        let func = get_attribute(ctx, left, method)?;
        let result = call_value(ctx, func, &[right], None);
        func.drop_with_heap(ctx.heap_mut());
        result
    })())
}

pub fn binary_op(ctx: &mut Context, op: BinOp, left: Value, right: Value, in_place: bool) -> RunResult<Value> {
    let _ = in_place;
    if let Some(result) = try_instance_binop(ctx, op.method_symbol(), left, right) {
        return result;
    }
    match op {
        BinOp::Add => add(ctx, left, right),
        BinOp::Sub => numeric_binop(ctx, "-", left, right, |a, b| a - b, |a, b| a - b),
        BinOp::Mul => mul(ctx, left, right),
        BinOp::TrueDiv => true_div(ctx, left, right),
        BinOp::FloorDiv => floor_div(ctx, left, right),
        BinOp::Mod => modulo(ctx, left, right),
        BinOp::Pow => power(ctx, left, right),
        BinOp::BitAnd => int_binop(ctx, "&", left, right, |a, b| a & b),
        BinOp::BitOr => int_binop(ctx, "|", left, right, |a, b| a | b),
        BinOp::BitXor => int_binop(ctx, "^", left, right, |a, b| a ^ b),
        BinOp::LShift => int_binop(ctx, "<<", left, right, |a, b| a << b),
        BinOp::RShift => int_binop(ctx, ">>", left, right, |a, b| a >> b),
        BinOp::Lt => compare(ctx, left, right, |o| o.is_lt()),
        BinOp::Le => compare(ctx, left, right, |o| o.is_le()),
        BinOp::Gt => compare(ctx, left, right, |o| o.is_gt()),
        BinOp::Ge => compare(ctx, left, right, |o| o.is_ge()),
        BinOp::Eq => Ok(Value::Bool(ctx.heap().py_eq(left, right))),
        BinOp::Ne => Ok(Value::Bool(!ctx.heap().py_eq(left, right))),
    }
}

fn as_f64(v: Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_i64(v: Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(i),
        Value::Bool(b) => Some(if b { 1 } else { 0 }),
        _ => None,
    }
}

fn both_numeric(left: Value, right: Value) -> bool {
    matches!(left, Value::Int(_) | Value::Float(_) | Value::Bool(_)) && matches!(right, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn numeric_binop(
    ctx: &mut Context,
    op_name: &str,
    left: Value,
    right: Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> RunResult<Value> {
    if both_numeric(left, right) {
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
            return Ok(Value::Float(float_op(as_f64(left).unwrap(), as_f64(right).unwrap())));
        }
        return Ok(Value::Int(int_op(as_i64(left).unwrap(), as_i64(right).unwrap())));
    }
    Err(unsupported(ctx, op_name, left, right))
}

fn int_binop(ctx: &mut Context, op_name: &str, left: Value, right: Value, f: impl Fn(i64, i64) -> i64) -> RunResult<Value> {
    match (as_i64_strict(left), as_i64_strict(right)) {
        (Some(a), Some(b)) => Ok(Value::Int(f(a, b))),
        _ => Err(unsupported(ctx, op_name, left, right)),
    }
}

fn as_i64_strict(v: Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(i),
        Value::Bool(b) => Some(if b { 1 } else { 0 }),
        _ => None,
    }
}

fn add(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        return numeric_binop(ctx, "+", left, right, |a, b| a.wrapping_add(b), |a, b| a + b);
    }
    match (left, right) {
        (Value::Ref(a), Value::Ref(b)) => {
            match (ctx.heap().get(a).map(|o| &o.data), ctx.heap().get(b).map(|o| &o.data)) {
                (Some(HeapData::Str(s1)), Some(HeapData::Str(s2))) => {
                    let mut out = s1.clone();
                    out.push_str(s2);
                    ctx.new_str(out)
                }
                (Some(HeapData::List(l1)), Some(HeapData::List(l2))) => {
                    let mut items = l1.items.clone();
                    items.extend(l2.items.clone());
                    for v in &items {
                        if let Value::Ref(id) = v {
                            ctx.heap_mut().inc_ref(*id);
                        }
                    }
                    ctx.new_list(items)
                }
                (Some(HeapData::Tuple(t1)), Some(HeapData::Tuple(t2))) => {
                    let mut items = t1.clone();
                    items.extend(t2.clone());
                    for v in &items {
                        if let Value::Ref(id) = v {
                            ctx.heap_mut().inc_ref(*id);
                        }
                    }
                    ctx.new_tuple(items)
                }
                (Some(HeapData::Bytes(b1)), Some(HeapData::Bytes(b2))) => {
                    let mut data = b1.data.clone();
                    data.extend_from_slice(&b2.data);
                    ctx.new_bytes(data)
                }
                _ => Err(unsupported(ctx, "+", left, right)),
            }
        }
        _ => Err(unsupported(ctx, "+", left, right)),
    }
}

fn mul(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        return numeric_binop(ctx, "*", left, right, |a, b| a.wrapping_mul(b), |a, b| a * b);
    }
    let (seq, count) = match (left, right) {
        (Value::Ref(_), Value::Int(n)) => (left, n),
        (Value::Int(n), Value::Ref(_)) => (right, n),
        _ => return Err(unsupported(ctx, "*", left, right)),
    };
    let Value::Ref(id) = seq else { return Err(unsupported(ctx, "*", left, right)) };
    let count = count.max(0) as usize;
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Str(s)) => {
            let out = s.repeat(count);
            ctx.new_str(out)
        }
        Some(HeapData::List(l)) => {
            let base = l.items.clone();
            let mut items = Vec::with_capacity(base.len() * count);
            for _ in 0..count {
                items.extend(base.clone());
            }
            for v in &items {
                if let Value::Ref(rid) = v {
                    ctx.heap_mut().inc_ref(*rid);
                }
            }
            ctx.new_list(items)
        }
        Some(HeapData::Tuple(t)) => {
            let base = t.clone();
            let mut items = Vec::with_capacity(base.len() * count);
            for _ in 0..count {
                items.extend(base.clone());
            }
            for v in &items {
                if let Value::Ref(rid) = v {
                    ctx.heap_mut().inc_ref(*rid);
                }
            }
            ctx.new_tuple(items)
        }
        _ => Err(unsupported(ctx, "*", left, right)),
    }
}

fn true_div(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        let b = as_f64(right).unwrap();
        if b == 0.0 {
            return Err(ExcType::zero_division_error(ctx.heap_mut(), "division by zero"));
        }
        return Ok(Value::Float(as_f64(left).unwrap() / b));
    }
    Err(unsupported(ctx, "/", left, right))
}

fn floor_div(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
            let b = as_f64(right).unwrap();
            if b == 0.0 {
                return Err(ExcType::zero_division_error(ctx.heap_mut(), "division by zero"));
            }
            return Ok(Value::Float((as_f64(left).unwrap() / b).floor()));
        }
        let b = as_i64(right).unwrap();
        if b == 0 {
            return Err(ExcType::zero_division_error(ctx.heap_mut(), "integer division or modulo by zero"));
        }
        let a = as_i64(left).unwrap();
        return Ok(Value::Int(a.div_euclid(b)));
    }
    Err(unsupported(ctx, "//", left, right))
}

fn modulo(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
            let b = as_f64(right).unwrap();
            if b == 0.0 {
                return Err(ExcType::zero_division_error(ctx.heap_mut(), "float modulo"));
            }
            let a = as_f64(left).unwrap();
            return Ok(Value::Float(a - (a / b).floor() * b));
        }
        let b = as_i64(right).unwrap();
        if b == 0 {
            return Err(ExcType::zero_division_error(ctx.heap_mut(), "integer division or modulo by zero"));
        }
        let a = as_i64(left).unwrap();
        return Ok(Value::Int(a.rem_euclid(b)));
    }
    if let (Value::Ref(id), _) = (left, right) {
        if let Some(HeapData::Str(fmt)) = ctx.heap().get(id).map(|o| &o.data) {
            let fmt = fmt.clone();
            return format_percent(ctx, &fmt, right);
        }
    }
    Err(unsupported(ctx, "%", left, right))
}

fn format_percent(ctx: &mut Context, fmt: &str, args: Value) -> RunResult<Value> {
    let values: Vec<Value> = match args {
        Value::Ref(id) if matches!(ctx.heap().get(id).map(|o| &o.data), Some(HeapData::Tuple(_))) => {
            match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Tuple(items)) => items.clone(),
                _ => vec![],
            }
        }
        other => vec![other],
    };
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut arg_iter = values.into_iter();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                if let Some(v) = arg_iter.next() {
                    out.push_str(&v.py_str(ctx.heap()));
                }
            }
            Some('r') => {
                if let Some(v) = arg_iter.next() {
                    out.push_str(&v.py_repr(ctx.heap()));
                }
            }
            Some('d') => {
                if let Some(v) = arg_iter.next() {
                    if let Some(i) = as_i64(v) {
                        out.push_str(&i.to_string());
                    }
                }
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    ctx.new_str(out)
}

fn power(ctx: &mut Context, left: Value, right: Value) -> RunResult<Value> {
    if both_numeric(left, right) {
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) || as_i64(right).unwrap_or(0) < 0 {
            return Ok(Value::Float(as_f64(left).unwrap().powf(as_f64(right).unwrap())));
        }
        let base = as_i64(left).unwrap();
        let exp = as_i64(right).unwrap();
        let result = u32::try_from(exp).ok().and_then(|e| base.checked_pow(e));
        return match result {
            Some(v) => Ok(Value::Int(v)),
            None => Err(ExcType::overflow_error(ctx.heap_mut(), "integer exponentiation result too large")),
        };
    }
    Err(unsupported(ctx, "**", left, right))
}

fn compare(ctx: &mut Context, left: Value, right: Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> RunResult<Value> {
    if both_numeric(left, right) {
        let a = as_f64(left).unwrap();
        let b = as_f64(right).unwrap();
        return match a.partial_cmp(&b) {
            Some(o) => Ok(Value::Bool(accept(o))),
            None => Ok(Value::Bool(false)),
        };
    }
    if let (Value::Ref(a), Value::Ref(b)) = (left, right) {
        match (ctx.heap().get(a).map(|o| &o.data), ctx.heap().get(b).map(|o| &o.data)) {
            (Some(HeapData::Str(s1)), Some(HeapData::Str(s2))) => return Ok(Value::Bool(accept(s1.cmp(s2)))),
            (Some(HeapData::Tuple(t1)), Some(HeapData::Tuple(t2))) => {
                return Ok(Value::Bool(accept(compare_seqs(ctx, t1.clone(), t2.clone()))))
            }
            (Some(HeapData::List(l1)), Some(HeapData::List(l2))) => {
                return Ok(Value::Bool(accept(compare_seqs(ctx, l1.items.clone(), l2.items.clone()))))
            }
            _ => {}
        }
    }
    Err(unsupported(ctx, "comparison", left, right))
}

fn compare_seqs(ctx: &Context, a: Vec<Value>, b: Vec<Value>) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        if !ctx.heap().py_eq(*x, *y) {
            return element_cmp(ctx, *x, *y).unwrap_or(std::cmp::Ordering::Equal);
        }
    }
    a.len().cmp(&b.len())
}

/// Orders two (already known to be unequal) sequence elements the same way
/// `compare()` orders its top-level operands, so lexicographic comparison
/// of `tuple`/`list` recurses through nested sequences and strings instead
/// of only comparing numbers.
fn element_cmp(ctx: &Context, x: Value, y: Value) -> Option<std::cmp::Ordering> {
    if both_numeric(x, y) {
        return as_f64(x).unwrap().partial_cmp(&as_f64(y).unwrap());
    }
    if let (Value::Ref(a), Value::Ref(b)) = (x, y) {
        match (ctx.heap().get(a).map(|o| &o.data), ctx.heap().get(b).map(|o| &o.data)) {
            (Some(HeapData::Str(s1)), Some(HeapData::Str(s2))) => return Some(s1.cmp(s2)),
            (Some(HeapData::Tuple(t1)), Some(HeapData::Tuple(t2))) => {
                return Some(compare_seqs(ctx, t1.clone(), t2.clone()))
            }
            (Some(HeapData::List(l1)), Some(HeapData::List(l2))) => {
                return Some(compare_seqs(ctx, l1.items.clone(), l2.items.clone()))
            }
            _ => {}
        }
    }
    None
}

pub fn unary_op(ctx: &mut Context, op: UnaryOp, v: Value) -> RunResult<Value> {
    if let Some(method) = op.method_symbol() {
        if is_instance(ctx, v) {
            let func = get_attribute(ctx, v, method)?;
            let result = call_value(ctx, func, &[], None);
            func.drop_with_heap(ctx.heap_mut());
            return result;
        }
    }
    match op {
        UnaryOp::Pos => match v {
            Value::Int(_) | Value::Float(_) => Ok(v),
            Value::Bool(b) => Ok(Value::Int(if b { 1 } else { 0 })),
            _ => Err(type_err(ctx, format!("bad operand type for unary +: '{}'", v.type_name(ctx.heap())))),
        },
        UnaryOp::Neg => match v {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(if b { -1 } else { 0 })),
            _ => Err(type_err(ctx, format!("bad operand type for unary -: '{}'", v.type_name(ctx.heap())))),
        },
        UnaryOp::Invert => match as_i64_strict(v) {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(type_err(ctx, format!("bad operand type for unary ~: '{}'", v.type_name(ctx.heap())))),
        },
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy(ctx.heap()))),
        UnaryOp::Hash => Ok(Value::Int(ctx.heap().py_hash(v) as i64)),
        UnaryOp::Len => len_value(ctx, v),
        UnaryOp::Bool => Ok(Value::Bool(v.is_truthy(ctx.heap()))),
        UnaryOp::Int => int_value(ctx, v),
        UnaryOp::Float => float_value(ctx, v),
        UnaryOp::Str => str_value(ctx, v),
        UnaryOp::Repr => repr_value(ctx, v),
        UnaryOp::Index => match as_i64_strict(v) {
            Some(i) => Ok(Value::Int(i)),
            None => Err(type_err(ctx, "object cannot be interpreted as an integer")),
        },
    }
}

pub fn len_value(ctx: &mut Context, v: Value) -> RunResult<Value> {
    match v {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
            Some(HeapData::Bytes(b)) => Ok(Value::Int(b.data.len() as i64)),
            Some(HeapData::Tuple(t)) => Ok(Value::Int(t.len() as i64)),
            Some(HeapData::List(l)) => Ok(Value::Int(l.len() as i64)),
            Some(HeapData::Dict(d)) => Ok(Value::Int(d.len() as i64)),
            Some(HeapData::Set(s)) => Ok(Value::Int(s.len() as i64)),
            _ if is_instance(ctx, v) => {
                let func = get_attribute(ctx, v, sym::LEN)?;
                let result = call_value(ctx, func, &[], None);
                func.drop_with_heap(ctx.heap_mut());
                result
            }
            _ => Err(type_err(ctx, format!("object of type '{}' has no len()", v.type_name(ctx.heap())))),
        },
        _ => Err(type_err(ctx, format!("object of type '{}' has no len()", v.type_name(ctx.heap())))),
    }
}

pub fn int_value(ctx: &mut Context, v: Value) -> RunResult<Value> {
    match v {
        Value::Int(_) => Ok(v),
        Value::Bool(b) => Ok(Value::Int(if b { 1 } else { 0 })),
        Value::Float(f) => Ok(Value::Int(f as i64)),
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Str(s)) => {
                let trimmed = s.trim().to_owned();
                trimmed.parse::<i64>().map(Value::Int).map_err(|e| {
                    use std::num::IntErrorKind;
                    match e.kind() {
                        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                            ExcType::overflow_error(ctx.heap_mut(), "Python int too large to convert")
                        }
                        _ => ExcType::value_error(ctx.heap_mut(), format!("invalid literal for int(): '{trimmed}'")),
                    }
                })
            }
            _ => Err(type_err(ctx, "int() argument must be a string or a number")),
        },
        Value::None => Err(type_err(ctx, "int() argument must be a string or a number")),
    }
}

pub fn float_value(ctx: &mut Context, v: Value) -> RunResult<Value> {
    match v {
        Value::Float(_) => Ok(v),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Str(s)) => {
                let trimmed = s.trim().to_owned();
                trimmed
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| ExcType::value_error(ctx.heap_mut(), format!("could not convert string to float: '{trimmed}'")))
            }
            _ => Err(type_err(ctx, "float() argument must be a string or a number")),
        },
        Value::None => Err(type_err(ctx, "float() argument must be a string or a number")),
    }
}

pub fn str_value(ctx: &mut Context, v: Value) -> RunResult<Value> {
    if is_instance(ctx, v) {
        if let Ok(func) = get_attribute(ctx, v, sym::STR) {
            let result = call_value(ctx, func, &[], None);
            func.drop_with_heap(ctx.heap_mut());
            return result;
        }
    }
    let s = v.py_str(ctx.heap());
    ctx.new_str(s)
}

pub fn repr_value(ctx: &mut Context, v: Value) -> RunResult<Value> {
    if is_instance(ctx, v) {
        if let Ok(func) = get_attribute(ctx, v, sym::REPR) {
            let result = call_value(ctx, func, &[], None);
            func.drop_with_heap(ctx.heap_mut());
            return result;
        }
    }
    let s = v.py_repr(ctx.heap());
    ctx.new_str(s)
}

pub fn contains_op(ctx: &mut Context, container: Value, item: Value, negate: bool) -> RunResult<Value> {
    let found = match container {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Tuple(items)) => items.iter().any(|v| ctx.heap().py_eq(*v, item)),
            Some(HeapData::List(l)) => l.items.iter().any(|v| ctx.heap().py_eq(*v, item)),
            Some(HeapData::Set(s)) => s.contains(ctx.heap(), item),
            Some(HeapData::Dict(d)) => d.contains(ctx.heap(), item),
            Some(HeapData::Str(s)) => {
                if let Value::Ref(item_id) = item {
                    if let Some(HeapData::Str(needle)) = ctx.heap().get(item_id).map(|o| &o.data) {
                        s.contains(needle.as_str())
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            Some(HeapData::Range { start, stop, step }) => {
                let (start, stop, step) = (*start, *stop, *step);
                match item {
                    Value::Int(n) => (step > 0 && n >= start && n < stop || step < 0 && n <= start && n > stop) && (n - start) % step == 0,
                    _ => false,
                }
            }
            _ if is_instance(ctx, container) => {
                let func = get_attribute(ctx, container, sym::CONTAINS)?;
                let result = call_value(ctx, func, &[item], None)?;
                let truthy = result.is_truthy(ctx.heap());
                result.drop_with_heap(ctx.heap_mut());
                truthy
            }
            _ => return Err(type_err(ctx, format!("argument of type '{}' is not iterable", container.type_name(ctx.heap())))),
        },
        _ => return Err(type_err(ctx, format!("argument of type '{}' is not iterable", container.type_name(ctx.heap())))),
    };
    Ok(Value::Bool(found != negate))
}

pub fn is_op(left: Value, right: Value, negate: bool) -> Value {
    let same = left.identity() == right.identity();
    Value::Bool(same != negate)
}

pub fn getitem(ctx: &mut Context, obj: Value, index: Value) -> RunResult<Value> {
    match obj {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::List(_)) | Some(HeapData::Tuple(_)) => sequence_getitem(ctx, id, index),
            Some(HeapData::Str(_)) => string_getitem(ctx, id, index),
            Some(HeapData::Bytes(_)) => bytes_getitem(ctx, id, index),
            Some(HeapData::Dict(_)) => match dict_get(ctx.heap(), id, index) {
                Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
                None => Err(ExcType::key_error(ctx.heap_mut(), index.py_repr(ctx.heap()))),
            },
            _ if is_instance(ctx, obj) => {
                let func = get_attribute(ctx, obj, sym::GETITEM)?;
                let result = call_value(ctx, func, &[index], None);
                func.drop_with_heap(ctx.heap_mut());
                result
            }
            _ => Err(type_err(ctx, format!("'{}' object is not subscriptable", obj.type_name(ctx.heap())))),
        },
        _ => Err(type_err(ctx, format!("'{}' object is not subscriptable", obj.type_name(ctx.heap())))),
    }
}

fn normalize_index(len: usize, i: i64) -> Option<usize> {
    let len_i = len as i64;
    let idx = if i < 0 { i + len_i } else { i };
    if idx < 0 || idx >= len_i {
        None
    } else {
        Some(idx as usize)
    }
}

fn slice_bounds(len: usize, slice_id: HeapId, ctx: &Context) -> (i64, i64, i64) {
    let (start, stop, step) = match ctx.heap().get(slice_id).map(|o| &o.data) {
        Some(HeapData::Slice { start, stop, step }) => (*start, *stop, *step),
        _ => (Value::None, Value::None, Value::None),
    };
    let step = match step {
        Value::Int(s) => s,
        _ => 1,
    };
    let len_i = len as i64;
    let (default_start, default_stop) = if step > 0 { (0, len_i) } else { (len_i - 1, -1) };
    let start = match start {
        Value::Int(s) => {
            let s = if s < 0 { (s + len_i).max(if step > 0 { 0 } else { -1 }) } else { s.min(if step > 0 { len_i } else { len_i - 1 }) };
            s
        }
        _ => default_start,
    };
    let stop = match stop {
        Value::Int(s) => {
            if s < 0 {
                (s + len_i).max(if step > 0 { 0 } else { -1 })
            } else {
                s.min(if step > 0 { len_i } else { len_i - 1 + 1 })
            }
        }
        _ => default_stop,
    };
    (start, stop, step)
}

fn sequence_getitem(ctx: &mut Context, id: HeapId, index: Value) -> RunResult<Value> {
    let is_list = matches!(ctx.heap().get(id).map(|o| &o.data), Some(HeapData::List(_)));
    let items: Vec<Value> = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::List(l)) => l.items.clone(),
        Some(HeapData::Tuple(t)) => t.clone(),
        _ => unreachable!(),
    };
    match index {
        Value::Int(i) => match normalize_index(items.len(), i) {
            Some(idx) => Ok(items[idx].clone_with_heap(ctx.heap_mut())),
            None => Err(ExcType::index_error(ctx.heap_mut(), "index out of range")),
        },
        Value::Ref(slice_id) if matches!(ctx.heap().get(slice_id).map(|o| &o.data), Some(HeapData::Slice { .. })) => {
            let (start, stop, step) = slice_bounds(items.len(), slice_id, ctx);
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                if i >= 0 && (i as usize) < items.len() {
                    out.push(items[i as usize].clone_with_heap(ctx.heap_mut()));
                }
                i += step;
            }
            if is_list {
                ctx.new_list(out)
            } else {
                ctx.new_tuple(out)
            }
        }
        _ => Err(type_err(ctx, "indices must be integers or slices")),
    }
}

fn string_getitem(ctx: &mut Context, id: HeapId, index: Value) -> RunResult<Value> {
    let s = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Str(s)) => s.clone(),
        _ => unreachable!(),
    };
    let chars: Vec<char> = s.chars().collect();
    match index {
        Value::Int(i) => match normalize_index(chars.len(), i) {
            Some(idx) => ctx.new_str(chars[idx].to_string()),
            None => Err(ExcType::index_error(ctx.heap_mut(), "string index out of range")),
        },
        Value::Ref(slice_id) if matches!(ctx.heap().get(slice_id).map(|o| &o.data), Some(HeapData::Slice { .. })) => {
            let (start, stop, step) = slice_bounds(chars.len(), slice_id, ctx);
            let mut out = String::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                if i >= 0 && (i as usize) < chars.len() {
                    out.push(chars[i as usize]);
                }
                i += step;
            }
            ctx.new_str(out)
        }
        _ => Err(type_err(ctx, "string indices must be integers")),
    }
}

fn bytes_getitem(ctx: &mut Context, id: HeapId, index: Value) -> RunResult<Value> {
    let data = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Bytes(b)) => b.data.clone(),
        _ => unreachable!(),
    };
    match index {
        Value::Int(i) => match normalize_index(data.len(), i) {
            Some(idx) => Ok(Value::Int(data[idx] as i64)),
            None => Err(ExcType::index_error(ctx.heap_mut(), "index out of range")),
        },
        _ => Err(type_err(ctx, "byte indices must be integers")),
    }
}

pub fn setitem(ctx: &mut Context, obj: Value, index: Value, value: Value) -> RunResult<()> {
    match obj {
        Value::Ref(id) => {
            let kind = ctx.heap().get(id).map(|o| matches!(&o.data, HeapData::List(_)));
            match kind {
                Some(true) => {
                    let len = match ctx.heap().get(id).map(|o| &o.data) {
                        Some(HeapData::List(l)) => l.len(),
                        _ => 0,
                    };
                    let Value::Int(i) = index else { return Err(type_err(ctx, "list indices must be integers")) };
                    let Some(idx) = normalize_index(len, i) else {
                        return Err(ExcType::index_error(ctx.heap_mut(), "list assignment index out of range"));
                    };
                    let value = value.clone_with_heap(ctx.heap_mut());
                    let old = match ctx.heap_mut().get_mut(id) {
                        Some(obj) => match &mut obj.data {
                            HeapData::List(l) => Some(std::mem::replace(&mut l.items[idx], value)),
                            _ => None,
                        },
                        None => None,
                    };
                    if let Some(old) = old {
                        old.drop_with_heap(ctx.heap_mut());
                    }
                    Ok(())
                }
                Some(false) if matches!(ctx.heap().get(id).map(|o| &o.data), Some(HeapData::Dict(_))) => {
                    let key = index.clone_with_heap(ctx.heap_mut());
                    let value = value.clone_with_heap(ctx.heap_mut());
                    if let Some(old) = crate::executor::dict_insert(ctx.heap_mut(), id, key, value) {
                        old.drop_with_heap(ctx.heap_mut());
                    }
                    Ok(())
                }
                _ if is_instance(ctx, obj) => {
                    let func = get_attribute(ctx, obj, sym::SETITEM)?;
                    let result = call_value(ctx, func, &[index, value], None);
                    func.drop_with_heap(ctx.heap_mut());
                    result.map(|v| v.drop_with_heap(ctx.heap_mut()))
                }
                _ => Err(type_err(ctx, format!("'{}' object does not support item assignment", obj.type_name(ctx.heap())))),
            }
        }
        _ => Err(type_err(ctx, format!("'{}' object does not support item assignment", obj.type_name(ctx.heap())))),
    }
}
