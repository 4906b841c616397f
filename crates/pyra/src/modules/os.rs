//! The `os` native module: a minimal, `Config::enable_os_access`-gated
//! surface over the host filesystem and environment. Unlike `math`/`random`/
//! `time`/`sys`/`dis`, these functions touch real OS state, so rather than
//! route through `ModuleFn` + `executor::call_builtin` (which has no
//! privileged access of its own) they are registered directly as native
//! closures on this module's own attribute table, the same
//! `native_functions.push` + `BuiltinId::Native` mechanism
//! [`crate::context::Context::register_native_function`] uses for
//! `__builtins__`.
//!
//! Only reachable when `ctx.config().enable_os_access` is true (checked by
//! the caller, `loader::register_native_modules`), so a host that never
//! opts in never exposes a filesystem surface to a script at all.

use std::rc::Rc;

use crate::context::{Context, NativeFn};
use crate::exceptions::{ExcType, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::types::list::List;
use crate::value::Value;

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    register(ctx, module, "getcwd", Rc::new(|ctx: &mut Context, args: &[Value], _kwargs| {
        expect_arity(ctx, args, 0, "getcwd")?;
        let cwd = std::env::current_dir().map_err(|e| ExcType::os_error(ctx.heap_mut(), e.to_string()))?;
        ctx.new_str(cwd.to_string_lossy().into_owned())
    }));

    register(ctx, module, "listdir", Rc::new(|ctx: &mut Context, args: &[Value], _kwargs| {
        let path = expect_one_str_arg(ctx, args, "listdir")?;
        let entries = std::fs::read_dir(&path).map_err(|e| ExcType::os_error(ctx.heap_mut(), e.to_string()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ExcType::os_error(ctx.heap_mut(), e.to_string()))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        let mut items = Vec::with_capacity(names.len());
        for name in names {
            items.push(ctx.new_str(name)?);
        }
        ctx.alloc(HeapData::List(List::new(items)))
    }));

    register(ctx, module, "getenv", Rc::new(|ctx: &mut Context, args: &[Value], _kwargs| {
        let name = expect_one_str_arg(ctx, args, "getenv")?;
        match std::env::var(&name) {
            Ok(value) => ctx.new_str(value),
            Err(_) => Ok(Value::None),
        }
    }));

    register(ctx, module, "mkdir", Rc::new(|ctx: &mut Context, args: &[Value], _kwargs| {
        let path = expect_one_str_arg(ctx, args, "mkdir")?;
        std::fs::create_dir(&path).map_err(|e| ExcType::os_error(ctx.heap_mut(), e.to_string()))?;
        Ok(Value::None)
    }));

    register(ctx, module, "remove", Rc::new(|ctx: &mut Context, args: &[Value], _kwargs| {
        let path = expect_one_str_arg(ctx, args, "remove")?;
        std::fs::remove_file(&path).map_err(|e| ExcType::os_error(ctx.heap_mut(), e.to_string()))?;
        Ok(Value::None)
    }));

    let sep = ctx.new_str(std::path::MAIN_SEPARATOR.to_string())?;
    ctx.set_module_global(module, "sep", sep);

    Ok(())
}

/// Pushes `f` onto the shared native-function table and stores the
/// resulting `BuiltinId::Native` as an attribute of `module`, mirroring
/// `Context::register_native_function`'s bookkeeping but targeting a
/// module's own attribute table instead of `__builtins__`.
fn register(ctx: &mut Context, module: HeapId, name: &str, f: NativeFn) {
    let idx = ctx.push_native_function(f);
    let builtin = ctx
        .alloc(HeapData::Builtin(crate::builtins::BuiltinId::Native(idx)))
        .expect("startup allocation");
    ctx.set_module_global(module, name, builtin);
}

fn expect_arity(ctx: &mut Context, args: &[Value], n: usize, name: &str) -> RunResult<()> {
    if args.len() != n {
        return Err(ExcType::type_error(
            ctx.heap_mut(),
            format!("{name}() takes {n} arguments ({} given)", args.len()),
        ));
    }
    Ok(())
}

fn expect_one_str_arg(ctx: &mut Context, args: &[Value], name: &str) -> RunResult<String> {
    expect_arity(ctx, args, 1, name)?;
    let type_err = |ctx: &mut Context| ExcType::type_error(ctx.heap_mut(), format!("{name}() argument must be str"));
    match args[0] {
        Value::Ref(id) => match ctx.heap().get(id).map(|obj| &obj.data) {
            Some(HeapData::Str(s)) => Ok(s.clone()),
            _ => Err(type_err(ctx)),
        },
        _ => Err(type_err(ctx)),
    }
}
