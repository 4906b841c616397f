//! The `dis` native module: a single `dis(callable)` function that prints a
//! human-readable disassembly of a compiled function's instructions, mostly
//! useful for host-side debugging of the compiler. Registration contract
//! only, per spec §1 -- the exact textual format is not otherwise
//! constrained.

use crate::builtins::ModuleFn;
use crate::context::Context;
use crate::exceptions::RunResult;
use crate::heap::HeapId;

use super::loader::set_module_fn;

pub fn load(ctx: &mut Context, module: HeapId) -> RunResult<()> {
    set_module_fn(ctx, module, "dis", ModuleFn::DisDis);
    Ok(())
}

/// Renders one `CompiledCode`'s instructions, one per line, prefixed with
/// its index -- the body of `dis.dis(f)`, called from
/// `crate::executor::call_builtin`'s `ModuleFn::DisDis` arm since only the
/// executor has the symbol table needed to print names instead of raw
/// `Symbol` ids.
pub fn format_code(heap: &crate::heap::Heap, code: &crate::compiler::instruction::CompiledCode) -> String {
    let mut out = String::new();
    for (i, instr) in code.instructions.iter().enumerate() {
        out.push_str(&format!("{i:4} {}\n", describe(heap, instr)));
    }
    out
}

fn describe(heap: &crate::heap::Heap, instr: &crate::compiler::instruction::Instruction) -> String {
    use crate::compiler::instruction::Instruction as I;
    match instr {
        I::LoadConst(c) => format!("LOAD_CONST {c:?}"),
        I::LoadName(s) => format!("LOAD_NAME {}", heap.resolve(*s)),
        I::StoreName(s) => format!("STORE_NAME {}", heap.resolve(*s)),
        I::LoadAttr(s) => format!("LOAD_ATTR {}", heap.resolve(*s)),
        I::StoreAttr(s) => format!("STORE_ATTR {}", heap.resolve(*s)),
        I::LoadIndex => "LOAD_INDEX".to_owned(),
        I::StoreIndex => "STORE_INDEX".to_owned(),
        I::MakeSlice => "MAKE_SLICE".to_owned(),
        I::BuildTuple(n) => format!("BUILD_TUPLE {n}"),
        I::BuildList(n) => format!("BUILD_LIST {n}"),
        I::BuildMap(n) => format!("BUILD_MAP {n}"),
        I::BuildSet(n) => format!("BUILD_SET {n}"),
        I::UnaryOp(op) => format!("UNARY_OP {op:?}"),
        I::LogicalNot => "LOGICAL_NOT".to_owned(),
        I::BinOp { op, in_place } => format!("BIN_OP {op:?} in_place={in_place}"),
        I::Contains { negate } => format!("CONTAINS negate={negate}"),
        I::IsOp { negate } => format!("IS negate={negate}"),
        I::Pop => "POP".to_owned(),
        I::Dup => "DUP".to_owned(),
        I::JumpIfFalsePop(t) => format!("JUMP_IF_FALSE_POP {t}"),
        I::JumpIfFalse(t) => format!("JUMP_IF_FALSE {t}"),
        I::JumpIfTrue(t) => format!("JUMP_IF_TRUE {t}"),
        I::Jump(t) => format!("JUMP {t}"),
        I::MakeFunction(f) => format!("MAKE_FUNCTION {}", heap.resolve(f.name)),
        I::MakeClass { name, .. } => format!("MAKE_CLASS {}", heap.resolve(*name)),
        I::PushArgFrame => "PUSH_ARG_FRAME".to_owned(),
        I::PushPositionalArg => "PUSH_POSITIONAL_ARG".to_owned(),
        I::PushStarArg => "PUSH_STAR_ARG".to_owned(),
        I::PushKwarg(s) => format!("PUSH_KWARG {}", heap.resolve(*s)),
        I::PushDoubleStarKwarg => "PUSH_DOUBLE_STAR_KWARG".to_owned(),
        I::Call => "CALL".to_owned(),
        I::Return => "RETURN".to_owned(),
        I::Raise { has_value } => format!("RAISE has_value={has_value}"),
        I::PushTry(_) => "PUSH_TRY".to_owned(),
        I::PopTry => "POP_TRY".to_owned(),
        I::LoadCurrentException => "LOAD_CURRENT_EXCEPTION".to_owned(),
        I::Import { module, alias } => format!("IMPORT {} as {}", heap.resolve(*module), heap.resolve(*alias)),
        I::ImportFrom { module, star, .. } => format!("IMPORT_FROM {} star={star}", heap.resolve(*module)),
        I::UnpackSequence(n) => format!("UNPACK_SEQUENCE {n}"),
    }
}
