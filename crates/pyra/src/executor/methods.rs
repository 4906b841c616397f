//! Methods synthesized for builtin container/primitive values:
//! `"abc".upper()`, `[1].append(2)`, `{}.items()`, and so on. These are
//! never heap-resident functions themselves -- `crate::executor::get_attribute`
//! recognizes the name against the receiver's runtime type and hands back a
//! `BoundBuiltinMethod`, and `call_method` here is where the actual work
//! happens once one is called.

use crate::context::Context;
use crate::exceptions::{ExcType, RunResult};
use crate::executor::{call_value, dict_get, dict_insert, dict_remove, get_attribute, iterate_to_vec, set_insert, type_err};
use crate::heap::{HeapData, HeapId};
use crate::intern::Symbol;
use crate::types::iterator::IterKind;
use crate::value::Value;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith", "endswith", "find", "index", "format", "encode",
    "title", "capitalize", "isdigit", "isalpha", "isspace", "isupper", "islower", "count", "format_map",
];
const LIST_METHODS: &[&str] = &["append", "pop", "insert", "remove", "extend", "index", "count", "sort", "reverse", "clear", "copy"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "setdefault", "update", "clear", "copy"];
const SET_METHODS: &[&str] = &["add", "remove", "discard", "union", "intersection", "difference", "clear", "copy", "pop", "issubset", "issuperset"];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const BYTES_METHODS: &[&str] = &["decode"];
const FILE_METHODS: &[&str] = &["read", "write", "close", "readline", "readlines", "__enter__", "__exit__"];
const RANGE_METHODS: &[&str] = &["__iter__"];
const ITERATOR_METHODS: &[&str] = &["__iter__", "__next__"];

fn method_list(heap: &crate::heap::Heap, id: HeapId) -> Option<&'static [&'static str]> {
    match heap.get(id).map(|o| &o.data) {
        Some(HeapData::Str(_)) => Some(STR_METHODS),
        Some(HeapData::List(_)) => Some(LIST_METHODS),
        Some(HeapData::Dict(_)) => Some(DICT_METHODS),
        Some(HeapData::Set(_)) => Some(SET_METHODS),
        Some(HeapData::Tuple(_)) => Some(TUPLE_METHODS),
        Some(HeapData::Bytes(_)) => Some(BYTES_METHODS),
        Some(HeapData::File(_)) => Some(FILE_METHODS),
        Some(HeapData::Range { .. }) => Some(RANGE_METHODS),
        Some(HeapData::Iterator(_)) => Some(ITERATOR_METHODS),
        _ => None,
    }
}

pub fn builtin_method_name(heap: &crate::heap::Heap, id: HeapId, name: Symbol) -> Option<Symbol> {
    let list = method_list(heap, id)?;
    let text = heap.resolve(name);
    if list.contains(&text) {
        Some(name)
    } else {
        None
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::None)
}

pub fn call_method(ctx: &mut Context, receiver: Value, method: Symbol, args: &[Value]) -> RunResult<Value> {
    let Value::Ref(id) = receiver else {
        return Err(type_err(ctx, "builtin method called on a non-reference value"));
    };
    let name = ctx.heap().resolve(method).to_owned();
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Str(_)) => str_method(ctx, id, &name, args),
        Some(HeapData::List(_)) => list_method(ctx, id, &name, args),
        Some(HeapData::Dict(_)) => dict_method(ctx, id, &name, args),
        Some(HeapData::Set(_)) => set_method(ctx, id, &name, args),
        Some(HeapData::Tuple(_)) => tuple_method(ctx, id, &name, args),
        Some(HeapData::Bytes(_)) => bytes_method(ctx, id, &name, args),
        Some(HeapData::File(_)) => file_method(ctx, id, &name, args),
        Some(HeapData::Range { .. }) => range_method(ctx, id, &name),
        Some(HeapData::Iterator(_)) => iterator_method(ctx, id, &name),
        _ => Err(type_err(ctx, "object has no such method")),
    }
}

fn str_of(ctx: &Context, id: HeapId) -> String {
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn str_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    let s = str_of(ctx, id);
    match name {
        "upper" => ctx.new_str(s.to_uppercase()),
        "lower" => ctx.new_str(s.to_lowercase()),
        "strip" => ctx.new_str(s.trim().to_owned()),
        "lstrip" => ctx.new_str(s.trim_start().to_owned()),
        "rstrip" => ctx.new_str(s.trim_end().to_owned()),
        "title" => ctx.new_str(title_case(&s)),
        "capitalize" => ctx.new_str(capitalize(&s)),
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_alphabetic()))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_whitespace()))),
        "isupper" => Ok(Value::Bool(s.chars().any(|c| c.is_alphabetic()) && s.chars().all(|c| !c.is_lowercase()))),
        "islower" => Ok(Value::Bool(s.chars().any(|c| c.is_alphabetic()) && s.chars().all(|c| !c.is_uppercase()))),
        "split" => {
            let parts: Vec<&str> = match arg(args, 0) {
                Value::Ref(sep_id) => {
                    let sep = str_of(ctx, sep_id);
                    s.split(sep.as_str()).collect::<Vec<_>>().into_iter().map(|p| unsafe { std::mem::transmute::<&str, &str>(p) }).collect()
                }
                _ => s.split_whitespace().collect(),
            };
            let mut items = Vec::with_capacity(parts.len());
            for p in parts {
                items.push(ctx.new_str(p.to_owned())?);
            }
            ctx.new_list(items)
        }
        "join" => {
            let pieces = iterate_to_vec(ctx, arg(args, 0))?;
            let mut strs = Vec::with_capacity(pieces.len());
            for p in pieces {
                strs.push(p.py_str(ctx.heap()));
                p.drop_with_heap(ctx.heap_mut());
            }
            ctx.new_str(strs.join(&s))
        }
        "replace" => {
            let from = match arg(args, 0) {
                Value::Ref(fid) => str_of(ctx, fid),
                _ => String::new(),
            };
            let to = match arg(args, 1) {
                Value::Ref(tid) => str_of(ctx, tid),
                _ => String::new(),
            };
            ctx.new_str(s.replace(&from, &to))
        }
        "startswith" => match arg(args, 0) {
            Value::Ref(pid) => Ok(Value::Bool(s.starts_with(str_of(ctx, pid).as_str()))),
            _ => Ok(Value::Bool(false)),
        },
        "endswith" => match arg(args, 0) {
            Value::Ref(pid) => Ok(Value::Bool(s.ends_with(str_of(ctx, pid).as_str()))),
            _ => Ok(Value::Bool(false)),
        },
        "find" => match arg(args, 0) {
            Value::Ref(pid) => {
                let needle = str_of(ctx, pid);
                Ok(Value::Int(s.find(needle.as_str()).map(|i| s[..i].chars().count() as i64).unwrap_or(-1)))
            }
            _ => Ok(Value::Int(-1)),
        },
        "index" => match arg(args, 0) {
            Value::Ref(pid) => {
                let needle = str_of(ctx, pid);
                match s.find(needle.as_str()) {
                    Some(i) => Ok(Value::Int(s[..i].chars().count() as i64)),
                    None => Err(ExcType::value_error(ctx.heap_mut(), "substring not found")),
                }
            }
            _ => Err(ExcType::value_error(ctx.heap_mut(), "substring not found")),
        },
        "count" => match arg(args, 0) {
            Value::Ref(pid) => {
                let needle = str_of(ctx, pid);
                if needle.is_empty() {
                    Ok(Value::Int(s.chars().count() as i64 + 1))
                } else {
                    Ok(Value::Int(s.matches(needle.as_str()).count() as i64))
                }
            }
            _ => Ok(Value::Int(0)),
        },
        "format" => format_str(ctx, &s, args),
        "format_map" => format_str(ctx, &s, args),
        "encode" => {
            let bytes = s.into_bytes();
            ctx.new_bytes(bytes)
        }
        _ => Err(type_err(ctx, format!("str has no method '{name}'"))),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_start {
                out.extend(c.to_uppercase());
                at_start = false;
            } else {
                out.extend(c.to_lowercase());
            }
        } else {
            out.push(c);
            at_start = true;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn format_str(ctx: &mut Context, template: &str, args: &[Value]) -> RunResult<Value> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut positional = 0usize;
    while let Some(c) = chars.next() {
        if c == '{' {
            if chars.peek() == Some(&'{') {
                chars.next();
                out.push('{');
                continue;
            }
            let mut field = String::new();
            for fc in chars.by_ref() {
                if fc == '}' {
                    break;
                }
                field.push(fc);
            }
            let idx = if field.is_empty() {
                let i = positional;
                positional += 1;
                i
            } else {
                field.parse::<usize>().unwrap_or(positional)
            };
            if let Some(&v) = args.get(idx) {
                out.push_str(&v.py_str(ctx.heap()));
            }
        } else if c == '}' && chars.peek() == Some(&'}') {
            chars.next();
            out.push('}');
        } else {
            out.push(c);
        }
    }
    ctx.new_str(out)
}

fn list_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "append" => {
            let v = arg(args, 0).clone_with_heap(ctx.heap_mut());
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::List(l) = &mut obj.data {
                    l.append(v);
                }
            }
            Ok(Value::None)
        }
        "extend" => {
            let items = iterate_to_vec(ctx, arg(args, 0))?;
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::List(l) = &mut obj.data {
                    for v in items {
                        l.append(v);
                    }
                }
            }
            Ok(Value::None)
        }
        "insert" => {
            let index = match arg(args, 0) {
                Value::Int(i) => i,
                _ => return Err(type_err(ctx, "list.insert() index must be an integer")),
            };
            let v = arg(args, 1).clone_with_heap(ctx.heap_mut());
            let len = list_len(ctx, id);
            let idx = if index < 0 { (index + len as i64).max(0) as usize } else { (index as usize).min(len) };
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::List(l) = &mut obj.data {
                    l.insert(idx, v);
                }
            }
            Ok(Value::None)
        }
        "pop" => {
            let len = list_len(ctx, id);
            if len == 0 {
                return Err(ExcType::index_error(ctx.heap_mut(), "pop from empty list"));
            }
            let index = match arg(args, 0) {
                Value::Int(i) => i,
                _ => -1,
            };
            let idx = if index < 0 { (index + len as i64) as usize } else { index as usize };
            if idx >= len {
                return Err(ExcType::index_error(ctx.heap_mut(), "pop index out of range"));
            }
            let removed = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::List(l) => Some(l.items.remove(idx)),
                    _ => None,
                },
                None => None,
            };
            Ok(removed.unwrap_or(Value::None))
        }
        "remove" => {
            let target = arg(args, 0);
            let items: Vec<Value> = list_items(ctx, id);
            match items.iter().position(|&v| ctx.heap().py_eq(v, target)) {
                Some(idx) => {
                    let removed = match ctx.heap_mut().get_mut(id) {
                        Some(obj) => match &mut obj.data {
                            HeapData::List(l) => Some(l.items.remove(idx)),
                            _ => None,
                        },
                        None => None,
                    };
                    if let Some(v) = removed {
                        v.drop_with_heap(ctx.heap_mut());
                    }
                    Ok(Value::None)
                }
                None => Err(ExcType::value_error(ctx.heap_mut(), "list.remove(x): x not in list")),
            }
        }
        "index" => {
            let target = arg(args, 0);
            let items = list_items(ctx, id);
            items
                .iter()
                .position(|&v| ctx.heap().py_eq(v, target))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ExcType::value_error(ctx.heap_mut(), "value not in list"))
        }
        "count" => {
            let target = arg(args, 0);
            let items = list_items(ctx, id);
            Ok(Value::Int(items.iter().filter(|&&v| ctx.heap().py_eq(v, target)).count() as i64))
        }
        "sort" => {
            let mut items = list_items(ctx, id);
            items.sort_by(|&a, &b| super::call_builtin_exports::numeric_or_str_cmp(ctx, a, b));
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::List(l) = &mut obj.data {
                    l.items = items;
                }
            }
            Ok(Value::None)
        }
        "reverse" => {
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::List(l) = &mut obj.data {
                    l.items.reverse();
                }
            }
            Ok(Value::None)
        }
        "clear" => {
            let items = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::List(l) => std::mem::take(&mut l.items),
                    _ => Vec::new(),
                },
                None => Vec::new(),
            };
            for v in items {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::None)
        }
        "copy" => {
            let items = list_items(ctx, id);
            for v in &items {
                if let Value::Ref(rid) = v {
                    ctx.heap_mut().inc_ref(*rid);
                }
            }
            ctx.new_list(items)
        }
        _ => Err(type_err(ctx, format!("list has no method '{name}'"))),
    }
}

fn list_len(ctx: &Context, id: HeapId) -> usize {
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::List(l)) => l.len(),
        _ => 0,
    }
}

fn list_items(ctx: &Context, id: HeapId) -> Vec<Value> {
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::List(l)) => l.items.clone(),
        _ => Vec::new(),
    }
}

fn dict_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "get" => match dict_get(ctx.heap(), id, arg(args, 0)) {
            Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
            None => Ok(arg(args, 1)),
        },
        "pop" => match dict_remove(ctx.heap_mut(), id, arg(args, 0)) {
            Some((_, v)) => Ok(v),
            None if args.len() > 1 => Ok(arg(args, 1)),
            None => Err(ExcType::key_error(ctx.heap_mut(), arg(args, 0).py_repr(ctx.heap()))),
        },
        "setdefault" => match dict_get(ctx.heap(), id, arg(args, 0)) {
            Some(v) => Ok(v.clone_with_heap(ctx.heap_mut())),
            None => {
                let key = arg(args, 0).clone_with_heap(ctx.heap_mut());
                let default = arg(args, 1).clone_with_heap(ctx.heap_mut());
                dict_insert(ctx.heap_mut(), id, key, default);
                Ok(arg(args, 1))
            }
        },
        "update" => {
            let entries = dict_entries(ctx, arg(args, 0));
            for (k, v) in entries {
                if let Some(old) = dict_insert(ctx.heap_mut(), id, k, v) {
                    old.drop_with_heap(ctx.heap_mut());
                }
            }
            Ok(Value::None)
        }
        "keys" => {
            let keys = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Dict(d)) => d.keys().collect(),
                _ => Vec::new(),
            };
            ctx.new_list(keys)
        }
        "values" => {
            let values = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Dict(d)) => d.values().collect(),
                _ => Vec::new(),
            };
            ctx.new_list(values)
        }
        "items" => {
            let pairs: Vec<(Value, Value)> = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Dict(d)) => d.iter().collect(),
                _ => Vec::new(),
            };
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                out.push(ctx.new_tuple(vec![k, v])?);
            }
            ctx.new_list(out)
        }
        "clear" => {
            let pairs: Vec<(Value, Value)> = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::Dict(d) => std::mem::take(d).iter().collect(),
                    _ => Vec::new(),
                },
                None => Vec::new(),
            };
            for (k, v) in pairs {
                k.drop_with_heap(ctx.heap_mut());
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::None)
        }
        "copy" => {
            let pairs: Vec<(Value, Value)> = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Dict(d)) => d.iter().collect(),
                _ => Vec::new(),
            };
            let new_dict = ctx.new_dict()?;
            let Value::Ref(new_id) = new_dict else { unreachable!() };
            for (k, v) in pairs {
                let k = k.clone_with_heap(ctx.heap_mut());
                let v = v.clone_with_heap(ctx.heap_mut());
                dict_insert(ctx.heap_mut(), new_id, k, v);
            }
            Ok(new_dict)
        }
        _ => Err(type_err(ctx, format!("dict has no method '{name}'"))),
    }
}

fn dict_entries(ctx: &mut Context, value: Value) -> Vec<(Value, Value)> {
    match value {
        Value::Ref(id) => match ctx.heap().get(id).map(|o| &o.data) {
            Some(HeapData::Dict(d)) => {
                let pairs = d.iter().collect::<Vec<_>>();
                for (k, v) in &pairs {
                    k.clone_with_heap(ctx.heap_mut());
                    v.clone_with_heap(ctx.heap_mut());
                }
                pairs
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn set_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "add" => {
            let v = arg(args, 0).clone_with_heap(ctx.heap_mut());
            if !set_insert(ctx.heap_mut(), id, v) {
                // already present; the clone we just made needs dropping
                let v = arg(args, 0);
                let _ = v;
            }
            Ok(Value::None)
        }
        "remove" => {
            let items = set_items(ctx, id);
            let target = arg(args, 0);
            match items.iter().find(|&&v| ctx.heap().py_eq(v, target)) {
                Some(&found) => {
                    crate::executor::set_remove(ctx.heap_mut(), id, found);
                    Ok(Value::None)
                }
                None => Err(ExcType::key_error(ctx.heap_mut(), target.py_repr(ctx.heap()))),
            }
        }
        "discard" => {
            let items = set_items(ctx, id);
            let target = arg(args, 0);
            if let Some(&found) = items.iter().find(|&&v| ctx.heap().py_eq(v, target)) {
                crate::executor::set_remove(ctx.heap_mut(), id, found);
            }
            Ok(Value::None)
        }
        "pop" => {
            let items = set_items(ctx, id);
            match items.first().copied() {
                Some(v) => {
                    crate::executor::set_remove(ctx.heap_mut(), id, v);
                    Ok(v)
                }
                None => Err(ExcType::key_error(ctx.heap_mut(), "pop from an empty set")),
            }
        }
        "clear" => {
            let items = set_items(ctx, id);
            for v in items {
                crate::executor::set_remove(ctx.heap_mut(), id, v);
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::None)
        }
        "copy" | "union" => {
            let mut items = set_items(ctx, id);
            if name == "union" {
                items.extend(iterate_to_vec(ctx, arg(args, 0))?);
            }
            let new_set = ctx.new_set()?;
            let Value::Ref(new_id) = new_set else { unreachable!() };
            for v in items {
                let v = v.clone_with_heap(ctx.heap_mut());
                if !set_insert(ctx.heap_mut(), new_id, v) {
                    v.drop_with_heap(ctx.heap_mut());
                }
            }
            Ok(new_set)
        }
        "intersection" => {
            let own = set_items(ctx, id);
            let other = iterate_to_vec(ctx, arg(args, 0))?;
            let new_set = ctx.new_set()?;
            let Value::Ref(new_id) = new_set else { unreachable!() };
            for v in own {
                if other.iter().any(|&o| ctx.heap().py_eq(o, v)) {
                    let v = v.clone_with_heap(ctx.heap_mut());
                    set_insert(ctx.heap_mut(), new_id, v);
                }
            }
            for v in other {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(new_set)
        }
        "difference" => {
            let own = set_items(ctx, id);
            let other = iterate_to_vec(ctx, arg(args, 0))?;
            let new_set = ctx.new_set()?;
            let Value::Ref(new_id) = new_set else { unreachable!() };
            for v in own {
                if !other.iter().any(|&o| ctx.heap().py_eq(o, v)) {
                    let v = v.clone_with_heap(ctx.heap_mut());
                    set_insert(ctx.heap_mut(), new_id, v);
                }
            }
            for v in other {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(new_set)
        }
        "issubset" => {
            let own = set_items(ctx, id);
            let other = iterate_to_vec(ctx, arg(args, 0))?;
            let result = own.iter().all(|&v| other.iter().any(|&o| ctx.heap().py_eq(o, v)));
            for v in other {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::Bool(result))
        }
        "issuperset" => {
            let own = set_items(ctx, id);
            let other = iterate_to_vec(ctx, arg(args, 0))?;
            let result = other.iter().all(|&v| own.iter().any(|&o| ctx.heap().py_eq(o, v)));
            for v in other {
                v.drop_with_heap(ctx.heap_mut());
            }
            Ok(Value::Bool(result))
        }
        _ => Err(type_err(ctx, format!("set has no method '{name}'"))),
    }
}

fn set_items(ctx: &Context, id: HeapId) -> Vec<Value> {
    match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Set(s)) => s.iter().collect(),
        _ => Vec::new(),
    }
}

fn tuple_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    let items: Vec<Value> = match ctx.heap().get(id).map(|o| &o.data) {
        Some(HeapData::Tuple(t)) => t.clone(),
        _ => Vec::new(),
    };
    match name {
        "count" => {
            let target = arg(args, 0);
            Ok(Value::Int(items.iter().filter(|&&v| ctx.heap().py_eq(v, target)).count() as i64))
        }
        "index" => {
            let target = arg(args, 0);
            items
                .iter()
                .position(|&v| ctx.heap().py_eq(v, target))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ExcType::value_error(ctx.heap_mut(), "tuple.index(x): x not in tuple"))
        }
        _ => Err(type_err(ctx, format!("tuple has no method '{name}'"))),
    }
}

fn bytes_method(ctx: &mut Context, id: HeapId, name: &str, _args: &[Value]) -> RunResult<Value> {
    match name {
        "decode" => {
            let data = match ctx.heap().get(id).map(|o| &o.data) {
                Some(HeapData::Bytes(b)) => b.data.clone(),
                _ => Vec::new(),
            };
            match String::from_utf8(data) {
                Ok(s) => ctx.new_str(s),
                Err(_) => Err(ExcType::value_error(ctx.heap_mut(), "invalid utf-8")),
            }
        }
        _ => Err(type_err(ctx, format!("bytes has no method '{name}'"))),
    }
}

fn file_method(ctx: &mut Context, id: HeapId, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "read" => {
            let result = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::File(f) => f.read_to_string(),
                    _ => Ok(String::new()),
                },
                None => Ok(String::new()),
            };
            match result {
                Ok(s) => ctx.new_str(s),
                Err(e) => Err(ExcType::os_error(ctx.heap_mut(), e.to_string())),
            }
        }
        "readline" | "readlines" => {
            let result = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::File(f) => f.read_to_string(),
                    _ => Ok(String::new()),
                },
                None => Ok(String::new()),
            };
            match result {
                Ok(s) if name == "readline" => ctx.new_str(s.lines().next().unwrap_or("").to_owned()),
                Ok(s) => {
                    let mut items = Vec::new();
                    for line in s.lines() {
                        items.push(ctx.new_str(line.to_owned())?);
                    }
                    ctx.new_list(items)
                }
                Err(e) => Err(ExcType::os_error(ctx.heap_mut(), e.to_string())),
            }
        }
        "write" => {
            let text = match arg(args, 0) {
                Value::Ref(sid) => str_of(ctx, sid),
                _ => String::new(),
            };
            let result = match ctx.heap_mut().get_mut(id) {
                Some(obj) => match &mut obj.data {
                    HeapData::File(f) => f.write_str(&text),
                    _ => Ok(0),
                },
                None => Ok(0),
            };
            match result {
                Ok(n) => Ok(Value::Int(n as i64)),
                Err(e) => Err(ExcType::os_error(ctx.heap_mut(), e.to_string())),
            }
        }
        "close" => {
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::File(f) = &mut obj.data {
                    f.close();
                }
            }
            Ok(Value::None)
        }
        "__enter__" => {
            ctx.heap_mut().inc_ref(id);
            Ok(Value::Ref(id))
        }
        "__exit__" => {
            if let Some(obj) = ctx.heap_mut().get_mut(id) {
                if let HeapData::File(f) = &mut obj.data {
                    f.close();
                }
            }
            Ok(Value::Bool(false))
        }
        _ => Err(type_err(ctx, format!("file has no method '{name}'"))),
    }
}

fn range_method(ctx: &mut Context, id: HeapId, name: &str) -> RunResult<Value> {
    match name {
        "__iter__" => {
            let items = iterate_to_vec(ctx, Value::Ref(id))?;
            ctx.alloc(HeapData::Iterator(IterKind::from_items(items)))
        }
        _ => Err(type_err(ctx, format!("range has no method '{name}'"))),
    }
}

fn iterator_method(ctx: &mut Context, id: HeapId, name: &str) -> RunResult<Value> {
    match name {
        "__iter__" => {
            ctx.heap_mut().inc_ref(id);
            Ok(Value::Ref(id))
        }
        "__next__" => match crate::executor::iterator_next(ctx, id)? {
            Some(v) => Ok(v),
            None => Err(ExcType::stop_iteration(ctx.heap_mut())),
        },
        _ => Err(type_err(ctx, format!("iterator has no method '{name}'"))),
    }
}

#[allow(unused)]
fn unused_call_value_import_anchor(ctx: &mut Context, f: Value, a: &[Value]) -> RunResult<Value> {
    call_value(ctx, f, a, None)
}
