//! The `random` native module, backed by `Context::rng` (a seedable
//! `rand::rngs::StdRng` so `random.seed(n)` can make a script's sequence
//! reproducible). Registration contract only, per spec §1.

use crate::builtins::ModuleFn;
use crate::context::Context;
use crate::exceptions::RunResult;
use crate::heap::HeapId;

use super::loader::set_module_fn;

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    set_module_fn(ctx, module, "random", ModuleFn::RandomRandom);
    set_module_fn(ctx, module, "randint", ModuleFn::RandomRandint);
    set_module_fn(ctx, module, "choice", ModuleFn::RandomChoice);
    set_module_fn(ctx, module, "shuffle", ModuleFn::RandomShuffle);
    set_module_fn(ctx, module, "seed", ModuleFn::RandomSeed);
    set_module_fn(ctx, module, "uniform", ModuleFn::RandomUniform);
    Ok(())
}
