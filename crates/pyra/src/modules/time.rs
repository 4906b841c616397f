//! The `time` native module: wall-clock reads and a blocking sleep.
//! Registration contract only, per spec §1.

use crate::builtins::ModuleFn;
use crate::context::Context;
use crate::exceptions::RunResult;
use crate::heap::HeapId;

use super::loader::set_module_fn;

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    set_module_fn(ctx, module, "time", ModuleFn::TimeTime);
    set_module_fn(ctx, module, "sleep", ModuleFn::TimeSleep);
    Ok(())
}
