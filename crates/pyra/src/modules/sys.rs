//! The `sys` native module: `sys.argv` (from [`crate::context::Config::argv`])
//! and `sys.exit`. Registration contract only, per spec §1.

use crate::builtins::ModuleFn;
use crate::context::Context;
use crate::exceptions::RunResult;
use crate::heap::{HeapData, HeapId};
use crate::types::list::List;

use super::loader::{set_module_fn, value_export};

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    set_module_fn(ctx, module, "exit", ModuleFn::SysExit);

    let mut items = Vec::with_capacity(ctx.config().argv.len());
    for arg in ctx.config().argv.clone() {
        items.push(ctx.new_str(arg)?);
    }
    let argv = ctx.alloc(HeapData::List(List::new(items)))?;
    value_export(ctx, module, "argv", argv);

    let modules_dict = ctx.new_dict()?;
    value_export(ctx, module, "modules", modules_dict);

    let platform = ctx.new_str("pyra")?;
    value_export(ctx, module, "platform", platform);
    Ok(())
}
