//! Lowers a desugared, capture-resolved [`FunctionDef`] into a
//! [`CompiledCode`] instruction vector.
//!
//! Control flow (`if`/`while`/`try`) is emitted with the classic
//! backpatch technique: a jump is pushed with a placeholder target, its
//! instruction index is remembered, and the placeholder is overwritten
//! once the real target position is known. `break`/`continue` are tracked
//! against a stack of active loops rather than threaded through every
//! `compile_stmt` call.

use std::rc::Rc;

use crate::heap::Heap;
use crate::parser::ast::{Arg, AssignTarget, Call, Expr, FunctionDef, Kwarg, SliceExpr, Stmt};
use crate::parser::parser::resolve_captures;

use super::instruction::{Const, ExceptTarget, FunctionTemplate, Instruction, TryTargets};
use super::CompiledCode;

struct LoopCtx {
    continue_target: usize,
    break_patches: Vec<usize>,
}

struct Compiler<'h> {
    heap: &'h mut Heap,
    instructions: Vec<Instruction>,
    loop_stack: Vec<LoopCtx>,
}

/// Compiles a `def`, `lambda`, `class` body, or the top-level module
/// function into its flat instruction form.
pub fn compile_function(def: &FunctionDef, heap: &mut Heap) -> Rc<CompiledCode> {
    let mut compiler = Compiler { heap, instructions: Vec::new(), loop_stack: Vec::new() };
    for stmt in &def.body {
        compiler.compile_stmt(stmt);
    }
    compiler.instructions.push(Instruction::LoadConst(Const::None));
    compiler.instructions.push(Instruction::Return);
    Rc::new(CompiledCode {
        name: def.name,
        instructions: compiler.instructions,
        locals: def.locals.clone(),
        local_captures: def.local_captures.clone(),
        global_captures: def.global_captures.clone(),
        is_class_body: def.is_class_body,
    })
}

impl<'h> Compiler<'h> {
    fn emit(&mut self, instr: Instruction) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn patch_jump(&mut self, idx: usize, target: usize) {
        match &mut self.instructions[idx] {
            Instruction::Jump(t)
            | Instruction::JumpIfFalsePop(t)
            | Instruction::JumpIfFalse(t)
            | Instruction::JumpIfTrue(t) => *t = target,
            other => panic!("patch_jump on non-jump instruction {other:?}"),
        }
    }

    /// Compiles `expr` into its own standalone instruction sequence (used
    /// for an `except` clause's type expression, which the executor
    /// evaluates separately from the surrounding frame's main program
    /// counter).
    fn compile_expr_standalone(&mut self, expr: &Expr) -> Vec<Instruction> {
        let saved = std::mem::take(&mut self.instructions);
        self.compile_expr(expr);
        std::mem::replace(&mut self.instructions, saved)
    }

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e);
                self.emit(Instruction::Pop);
            }
            Stmt::Assign { target, value, .. } => {
                self.compile_expr(value);
                self.compile_store(target);
            }
            Stmt::AugAssign { target, op, value, .. } => {
                self.compile_load_for_target(target);
                self.compile_expr(value);
                self.emit(Instruction::BinOp { op: *op, in_place: true });
                self.compile_store(target);
            }
            Stmt::If { cond, body, orelse } => {
                self.compile_expr(cond);
                let jf = self.emit(Instruction::JumpIfFalsePop(0));
                for s in body {
                    self.compile_stmt(s);
                }
                if orelse.is_empty() {
                    let end = self.here();
                    self.patch_jump(jf, end);
                } else {
                    let j = self.emit(Instruction::Jump(0));
                    let else_start = self.here();
                    self.patch_jump(jf, else_start);
                    for s in orelse {
                        self.compile_stmt(s);
                    }
                    let end = self.here();
                    self.patch_jump(j, end);
                }
            }
            Stmt::While { cond, body, orelse } => {
                let loop_start = self.here();
                self.compile_expr(cond);
                let jf = self.emit(Instruction::JumpIfFalsePop(0));
                self.loop_stack.push(LoopCtx { continue_target: loop_start, break_patches: Vec::new() });
                for s in body {
                    self.compile_stmt(s);
                }
                self.emit(Instruction::Jump(loop_start));
                let orelse_start = self.here();
                self.patch_jump(jf, orelse_start);
                for s in orelse {
                    self.compile_stmt(s);
                }
                let end = self.here();
                let ctx = self.loop_stack.pop().expect("loop context pushed above");
                for bp in ctx.break_patches {
                    self.patch_jump(bp, end);
                }
            }
            Stmt::Break(_) => {
                let idx = self.emit(Instruction::Jump(0));
                self.loop_stack.last_mut().expect("parser rejects break outside a loop").break_patches.push(idx);
            }
            Stmt::Continue(_) => {
                let target = self.loop_stack.last().expect("parser rejects continue outside a loop").continue_target;
                self.emit(Instruction::Jump(target));
            }
            Stmt::Pass => {}
            Stmt::Return { value, .. } => {
                match value {
                    Some(v) => self.compile_expr(v),
                    None => {
                        self.emit(Instruction::LoadConst(Const::None));
                    }
                }
                self.emit(Instruction::Return);
            }
            Stmt::Raise { value, .. } => match value {
                Some(v) => {
                    self.compile_expr(v);
                    self.emit(Instruction::Raise { has_value: true });
                }
                None => {
                    self.emit(Instruction::Raise { has_value: false });
                }
            },
            Stmt::Global(_) | Stmt::Nonlocal(_) => {
                // Pure compile-time information, already folded into
                // `FunctionDef::global_captures`/`local_captures` by
                // capture resolution.
            }
            Stmt::FunctionDef(def) => {
                self.compile_make_function(def);
                self.compile_store(&AssignTarget::Name(def.name));
            }
            Stmt::ClassDef { name, bases, body, range } => {
                for base in bases {
                    self.compile_expr(base);
                }
                let mut synthetic = FunctionDef {
                    name: *name,
                    params: Default::default(),
                    body: body.clone(),
                    range: *range,
                    is_method: false,
                    is_class_body: true,
                    locals: Vec::new(),
                    local_captures: Vec::new(),
                    global_captures: Vec::new(),
                };
                resolve_captures(&mut synthetic);
                let code = compile_function(&synthetic, self.heap);
                self.emit(Instruction::MakeClass { name: *name, code, num_bases: bases.len() });
                self.compile_store(&AssignTarget::Name(*name));
            }
            Stmt::Import { module, alias, .. } => {
                self.emit(Instruction::Import { module: *module, alias: *alias });
                self.compile_store(&AssignTarget::Name(*alias));
            }
            Stmt::ImportFrom { module, names, star, .. } => {
                self.emit(Instruction::ImportFrom { module: *module, names: Rc::new(names.clone()), star: *star });
                for (_, alias) in names {
                    self.compile_store(&AssignTarget::Name(*alias));
                }
            }
            Stmt::Try { body, handlers, finally, .. } => self.compile_try(body, handlers, finally),
        }
    }

    fn compile_make_function(&mut self, def: &Rc<FunctionDef>) {
        let code = compile_function(def, self.heap);
        for default in &def.params.defaults {
            self.compile_expr(default);
        }
        let template = FunctionTemplate {
            name: def.name,
            params: def.params.names.clone(),
            num_defaults: def.params.defaults.len(),
            vararg: def.params.vararg,
            kwarg: def.params.kwarg,
            code,
            is_method: def.is_method,
            local_captures: def.local_captures.clone(),
        };
        self.emit(Instruction::MakeFunction(Rc::new(template)));
    }

    fn compile_try(&mut self, body: &[Stmt], handlers: &[crate::parser::ast::ExceptHandler], finally: &[Stmt]) {
        let try_idx = self.emit(Instruction::PushTry(TryTargets { handlers: Vec::new(), finally: None }));

        for s in body {
            self.compile_stmt(s);
        }
        let mut to_finally = vec![self.emit(Instruction::Jump(0))];

        let mut compiled_handlers = Vec::new();
        for handler in handlers {
            let type_check = match &handler.exc_type {
                Some(e) => self.compile_expr_standalone(e),
                None => Vec::new(),
            };
            let target = self.here();
            if let Some(bind) = handler.bind {
                self.emit(Instruction::LoadCurrentException);
                self.compile_store(&AssignTarget::Name(bind));
            }
            for s in &handler.body {
                self.compile_stmt(s);
            }
            to_finally.push(self.emit(Instruction::Jump(0)));
            compiled_handlers.push(ExceptTarget { type_check, bind: handler.bind, target });
        }

        let finally_start = self.here();
        for idx in to_finally {
            self.patch_jump(idx, finally_start);
        }
        for s in finally {
            self.compile_stmt(s);
        }
        self.emit(Instruction::PopTry);

        match &mut self.instructions[try_idx] {
            Instruction::PushTry(targets) => {
                targets.handlers = compiled_handlers;
                targets.finally = Some(finally_start);
            }
            _ => unreachable!("try_idx always points at the PushTry just emitted"),
        }
    }

    /// Pushes `target`'s current value, for the read half of a compound
    /// assignment. Attribute/index targets re-evaluate their base
    /// expression a second time when `compile_store` later writes back;
    /// this matches the base expression running twice rather than once
    /// for `obj.attr += x` / `obj[i] += x`.
    fn compile_load_for_target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Name(sym) => {
                self.emit(Instruction::LoadName(*sym));
            }
            AssignTarget::Attribute { obj, attr } => {
                self.compile_expr(obj);
                self.emit(Instruction::LoadAttr(*attr));
            }
            AssignTarget::Index { obj, index } => {
                self.compile_expr(obj);
                self.compile_index_value(index);
                self.emit(Instruction::LoadIndex);
            }
            AssignTarget::Pack(_) => panic!("a packed target is not a valid augmented-assignment target"),
        }
    }

    fn compile_store(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Name(sym) => {
                self.emit(Instruction::StoreName(*sym));
            }
            AssignTarget::Attribute { obj, attr } => {
                self.compile_expr(obj);
                self.emit(Instruction::StoreAttr(*attr));
            }
            AssignTarget::Index { obj, index } => {
                self.compile_expr(obj);
                self.compile_index_value(index);
                self.emit(Instruction::StoreIndex);
            }
            AssignTarget::Pack(targets) => {
                self.emit(Instruction::UnpackSequence(targets.len()));
                for t in targets {
                    self.compile_store(t);
                }
            }
        }
    }

    fn compile_index_value(&mut self, index: &Expr) {
        if let Expr::Slice(s) = index {
            self.compile_slice(s);
        } else {
            self.compile_expr(index);
        }
    }

    fn compile_slice(&mut self, slice: &SliceExpr) {
        match &slice.start {
            Some(e) => self.compile_expr(e),
            None => {
                self.emit(Instruction::LoadConst(Const::None));
            }
        }
        match &slice.stop {
            Some(e) => self.compile_expr(e),
            None => {
                self.emit(Instruction::LoadConst(Const::None));
            }
        }
        match &slice.step {
            Some(e) => self.compile_expr(e),
            None => {
                self.emit(Instruction::LoadConst(Const::None));
            }
        }
        self.emit(Instruction::MakeSlice);
    }

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::NoneLit => {
                self.emit(Instruction::LoadConst(Const::None));
            }
            Expr::BoolLit(b) => {
                self.emit(Instruction::LoadConst(Const::Bool(*b)));
            }
            Expr::IntLit(i) => {
                self.emit(Instruction::LoadConst(Const::Int(*i)));
            }
            Expr::FloatLit(f) => {
                self.emit(Instruction::LoadConst(Const::Float(*f)));
            }
            Expr::StrLit(s) => {
                self.emit(Instruction::LoadConst(Const::Str(s.clone())));
            }
            Expr::Name(sym, _) => {
                self.emit(Instruction::LoadName(*sym));
            }
            Expr::Tuple(items) => {
                for i in items {
                    self.compile_expr(i);
                }
                self.emit(Instruction::BuildTuple(items.len()));
            }
            Expr::ListLit(items) => {
                for i in items {
                    self.compile_expr(i);
                }
                self.emit(Instruction::BuildList(items.len()));
            }
            Expr::DictLit(pairs) => {
                for (k, v) in pairs {
                    self.compile_expr(k);
                    self.compile_expr(v);
                }
                self.emit(Instruction::BuildMap(pairs.len()));
            }
            Expr::SetLit(items) => {
                for i in items {
                    self.compile_expr(i);
                }
                self.emit(Instruction::BuildSet(items.len()));
            }
            Expr::UnaryOp { op, operand, .. } => {
                self.compile_expr(operand);
                if op.method_symbol().is_none() {
                    self.emit(Instruction::LogicalNot);
                } else {
                    self.emit(Instruction::UnaryOp(*op));
                }
            }
            Expr::BinOp { op, left, right, .. } => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit(Instruction::BinOp { op: *op, in_place: false });
            }
            Expr::BoolOp { op, left, right } => self.compile_bool_op(*op, left, right),
            Expr::Contains { left, right, negate } => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit(Instruction::Contains { negate: *negate });
            }
            Expr::Is { left, right, negate } => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit(Instruction::IsOp { negate: *negate });
            }
            Expr::Conditional { cond, body, orelse } => {
                self.compile_expr(cond);
                let jf = self.emit(Instruction::JumpIfFalsePop(0));
                self.compile_expr(body);
                let j = self.emit(Instruction::Jump(0));
                let else_start = self.here();
                self.patch_jump(jf, else_start);
                self.compile_expr(orelse);
                let end = self.here();
                self.patch_jump(j, end);
            }
            Expr::Call(call) => self.compile_call(call),
            Expr::Index { obj, index, .. } => {
                self.compile_expr(obj);
                self.compile_index_value(index);
                self.emit(Instruction::LoadIndex);
            }
            Expr::Slice(s) => self.compile_slice(s),
            Expr::Attribute { obj, attr, .. } => {
                self.compile_expr(obj);
                self.emit(Instruction::LoadAttr(*attr));
            }
            Expr::Lambda(def) => self.compile_make_function(def),
            Expr::Block { stmts, result } => {
                for s in stmts {
                    self.compile_stmt(s);
                }
                self.compile_expr(result);
            }
        }
    }

    fn compile_bool_op(&mut self, op: crate::parser::ast::BoolOpKind, left: &Expr, right: &Expr) {
        use crate::parser::ast::BoolOpKind;
        self.compile_expr(left);
        let jump = match op {
            BoolOpKind::And => self.emit(Instruction::JumpIfFalse(0)),
            BoolOpKind::Or => self.emit(Instruction::JumpIfTrue(0)),
        };
        self.emit(Instruction::Pop);
        self.compile_expr(right);
        let end = self.here();
        self.patch_jump(jump, end);
    }

    fn compile_call(&mut self, call: &Call) {
        self.compile_expr(&call.func);
        self.emit(Instruction::PushArgFrame);
        for arg in &call.args {
            match arg {
                Arg::Positional(e) => {
                    self.compile_expr(e);
                    self.emit(Instruction::PushPositionalArg);
                }
                Arg::Starred(e) => {
                    self.compile_expr(e);
                    self.emit(Instruction::PushStarArg);
                }
            }
        }
        for kwarg in &call.kwargs {
            match kwarg {
                Kwarg::Named(name, e) => {
                    self.compile_expr(e);
                    self.emit(Instruction::PushKwarg(*name));
                }
                Kwarg::DoubleStarred(e) => {
                    self.compile_expr(e);
                    self.emit(Instruction::PushDoubleStarKwarg);
                }
            }
        }
        self.emit(Instruction::Call);
    }
}
