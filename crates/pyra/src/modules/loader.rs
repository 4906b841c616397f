//! `import` runtime support (spec §4.7): the loaded-module cache, native
//! loader dispatch, and `importPath/m.py` file-backed loading.

use crate::builtins::{BuiltinId, Func};
use crate::context::Context;
use crate::exceptions::{ExcType, RunResult};
use crate::heap::HeapId;
use crate::intern::Symbol;
use crate::modules;
use crate::value::Value;

pub const BUILTINS_MODULE: &str = "__builtins__";

/// Populates the `__builtins__` module with every free function in
/// [`Func::ALL`] and every exception type constructor, per spec §6's
/// "built-in free functions always in every module's globals".
pub fn install_builtins(ctx: &mut Context) {
    let sym = ctx.heap_mut().intern(BUILTINS_MODULE);
    let id = ctx.ensure_module(sym);
    for &f in Func::ALL {
        let name = f.to_string();
        let value = ctx.alloc(crate::heap::HeapData::Builtin(BuiltinId::Func(f))).expect("startup allocation");
        ctx.set_module_global(id, &name, value);
    }
    for &exc in ExcType::ALL {
        let name = exc.name().to_owned();
        let value = ctx
            .alloc(crate::heap::HeapData::Builtin(BuiltinId::ExcCtor(exc)))
            .expect("startup allocation");
        ctx.set_module_global(id, &name, value);
    }
}

/// Registers the native loaders for every stdlib module stub the embedder
/// ships with, gating `os` behind [`crate::context::Config::enable_os_access`].
pub fn register_native_modules(ctx: &mut Context) {
    ctx.register_module_loader("math", modules::math::load);
    ctx.register_module_loader("random", modules::random::load);
    ctx.register_module_loader("time", modules::time::load);
    ctx.register_module_loader("sys", modules::sys::load);
    ctx.register_module_loader("dis", modules::dis::load);
    if ctx.config().enable_os_access {
        ctx.register_module_loader("os", modules::os::load);
    }
}

/// `import m` (spec §4.7 steps 1-5), minus binding into the caller's
/// globals (the executor's `Import` instruction does that with the
/// returned module id).
pub fn import(ctx: &mut Context, name: Symbol) -> RunResult<HeapId> {
    if let Some(&id) = ctx.modules.get(&name) {
        return Ok(id);
    }
    let id = ctx.ensure_module(name);
    ctx.importing.push(name);

    let builtins_sym = ctx.heap_mut().intern(BUILTINS_MODULE);
    if name != builtins_sym {
        copy_all_into(ctx, builtins_sym, name);
    }

    let result = if let Some(loader) = ctx.native_loaders.get(&name).copied() {
        loader(ctx, id)
    } else {
        load_from_file(ctx, name, id)
    };

    ctx.importing.pop();

    match result {
        Ok(()) => Ok(id),
        Err(e) => {
            ctx.modules.remove(&name);
            ctx.heap_mut().dec_ref(id);
            Err(e)
        }
    }
}

pub(crate) fn copy_all_into(ctx: &mut Context, src_name: Symbol, dst_name: Symbol) {
    let Some(&src) = ctx.modules.get(&src_name) else { return };
    let Some(&dst) = ctx.modules.get(&dst_name) else { return };
    let keys: Vec<Symbol> = match ctx.heap().get(src) {
        Some(obj) => obj.attrs.keys().collect(),
        None => return,
    };
    for key in keys {
        if let Some(value) = ctx.heap().get_attr(src, key) {
            let value = value.clone_with_heap(ctx.heap_mut());
            ctx.heap_mut().set_attr_owned(dst, key, value);
        }
    }
}

fn load_from_file(ctx: &mut Context, name: Symbol, module_id: HeapId) -> RunResult<()> {
    let name_str = ctx.heap().resolve(name).to_owned();
    let path = format!("{}/{}.py", ctx.config().import_path, name_str);
    let text = std::fs::read_to_string(&path)
        .map_err(|_| ExcType::import_error(ctx.heap_mut(), format!("No module named '{name_str}'")))?;
    ctx.run_in_module(&name_str, &text, module_id, name)?;
    Ok(())
}

/// Native-module helper: interns `name` and stores `value` as an attribute
/// of `module`, consuming `value`'s strong reference.
pub(crate) fn set_module_fn(ctx: &mut Context, module: HeapId, name: &str, f: crate::builtins::ModuleFn) {
    let value = ctx
        .alloc(crate::heap::HeapData::Builtin(BuiltinId::Module(f)))
        .expect("startup allocation");
    ctx.set_module_global(module, name, value);
}

pub(crate) fn value_export(ctx: &mut Context, module: HeapId, name: &str, value: Value) {
    ctx.set_module_global(module, name, value);
}
