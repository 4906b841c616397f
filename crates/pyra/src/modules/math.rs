//! The `math` native module: a handful of floating-point free functions.
//! Behavior beyond "callable, returns a value" is out of scope per spec
//! §1; this only needs to satisfy the registration contract in §4.7.

use crate::builtins::ModuleFn;
use crate::context::Context;
use crate::exceptions::RunResult;
use crate::heap::HeapId;
use crate::value::Value;

use super::loader::{set_module_fn, value_export};

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    set_module_fn(ctx, module, "sqrt", ModuleFn::MathSqrt);
    set_module_fn(ctx, module, "floor", ModuleFn::MathFloor);
    set_module_fn(ctx, module, "ceil", ModuleFn::MathCeil);
    set_module_fn(ctx, module, "pow", ModuleFn::MathPow);
    set_module_fn(ctx, module, "log", ModuleFn::MathLog);
    set_module_fn(ctx, module, "sin", ModuleFn::MathSin);
    set_module_fn(ctx, module, "cos", ModuleFn::MathCos);
    set_module_fn(ctx, module, "tan", ModuleFn::MathTan);
    value_export(ctx, module, "pi", Value::Float(std::f64::consts::PI));
    value_export(ctx, module, "e", Value::Float(std::f64::consts::E));
    value_export(ctx, module, "inf", Value::Float(f64::INFINITY));
    value_export(ctx, module, "nan", Value::Float(f64::NAN));
    Ok(())
}
