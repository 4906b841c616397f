//! Recursive-descent/Pratt parser: lex tokens -> AST, with desugaring and
//! capture resolution folded into the same pass (see module docs on
//! [`crate::parser::ast`]).

use std::rc::Rc;

use crate::heap::Heap;
use crate::intern::Symbol;
use crate::source::CodeRange;

use super::ast::*;
use super::token::{Keyword, Token, TokenKind};

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub range: CodeRange,
}

type PResult<T> = Result<T, ParseError>;

pub struct Parser<'h> {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: u32,
    tmp_counter: u32,
    heap: &'h mut Heap,
}

/// Parses a full source string into the implicit top-level module function.
pub fn parse_module(text: &str, heap: &mut Heap) -> PResult<Rc<FunctionDef>> {
    let tokens = super::lexer::Lexer::new(text).tokenize(heap).map_err(|e| ParseError {
        message: e.message,
        range: e.range,
    })?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
        tmp_counter: 0,
        heap,
    };
    let body = parser.parse_stmts_until_eof()?;
    let name = parser.heap.intern("<module>");
    let mut def = FunctionDef {
        name,
        params: Params::default(),
        body,
        range: CodeRange::default(),
        is_method: false,
        is_class_body: false,
        locals: Vec::new(),
        local_captures: Vec::new(),
        global_captures: Vec::new(),
    };
    resolve_captures(&mut def);
    Ok(Rc::new(def))
}

impl<'h> Parser<'h> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_range(&self) -> CodeRange {
        self.tokens[self.pos].range
    }

    fn peek_at(&self, offset: usize) -> TokenKind {
        self.tokens.get(self.pos + offset).map(|t| t.kind.clone()).unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_symbol(&self, s: &str) -> bool {
        matches!(self.peek(), TokenKind::Symbol(sym) if *sym == s)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_symbol(&mut self, s: &str) -> PResult<()> {
        if self.is_symbol(s) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{s}'")))
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> PResult<()> {
        if self.is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected keyword '{kw:?}'")))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            range: self.peek_range(),
        }
    }

    fn fresh_tmp(&mut self) -> Symbol {
        self.tmp_counter += 1;
        let name = format!("__tmp{}", self.tmp_counter);
        self.heap.intern(&name)
    }

    fn expect_name(&mut self) -> PResult<Symbol> {
        match self.peek().clone() {
            TokenKind::Name(sym) => {
                self.advance();
                Ok(sym)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    // ---- statement sequences ----

    fn parse_stmts_until_eof(&mut self) -> PResult<Vec<Stmt>> {
        let mut out = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), TokenKind::Eof) {
            self.parse_statement(&mut out)?;
            self.skip_newlines();
        }
        Ok(out)
    }

    /// `:` followed by either a single-line simple-statement suite or an
    /// indented block.
    fn parse_suite(&mut self) -> PResult<Vec<Stmt>> {
        self.eat_symbol(":")?;
        if matches!(self.peek(), TokenKind::Newline) {
            self.skip_newlines();
            if !matches!(self.peek(), TokenKind::Indent) {
                return Err(self.error("expected an indented block"));
            }
            self.advance();
            let mut out = Vec::new();
            self.skip_newlines();
            while !matches!(self.peek(), TokenKind::Dedent) {
                self.parse_statement(&mut out)?;
                self.skip_newlines();
            }
            self.advance();
            Ok(out)
        } else {
            let mut out = Vec::new();
            self.parse_simple_stmt_line(&mut out)?;
            Ok(out)
        }
    }

    /// Parses one statement, appending it (or the several simple statements
    /// a `;`-joined line expands to) onto `out`.
    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        match self.peek().clone() {
            TokenKind::Keyword(Keyword::If) => out.push(self.parse_if()?),
            TokenKind::Keyword(Keyword::While) => out.push(self.parse_while()?),
            TokenKind::Keyword(Keyword::For) => out.extend(self.parse_for()?),
            TokenKind::Keyword(Keyword::With) => out.extend(self.parse_with()?),
            TokenKind::Keyword(Keyword::Def) => out.push(self.parse_def(false)?),
            TokenKind::Keyword(Keyword::Class) => out.push(self.parse_class()?),
            TokenKind::Keyword(Keyword::Try) => out.push(self.parse_try()?),
            TokenKind::Keyword(Keyword::Elif) | TokenKind::Keyword(Keyword::Else) => {
                return Err(self.error("'elif'/'else' without a matching 'if'"))
            }
            TokenKind::Keyword(Keyword::Except) | TokenKind::Keyword(Keyword::Finally) => {
                return Err(self.error("'except'/'finally' without a matching 'try'"))
            }
            _ => self.parse_simple_stmt_line(out)?,
        }
        Ok(())
    }

    fn parse_simple_stmt_line(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        loop {
            out.push(self.parse_simple_stmt()?);
            if self.is_symbol(";") {
                self.advance();
                if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent) {
                    break;
                }
                continue;
            }
            break;
        }
        if matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
        Ok(())
    }

    fn parse_simple_stmt(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        match self.peek().clone() {
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ParseError { message: "'break' outside loop".into(), range });
                }
                Ok(Stmt::Break(range))
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ParseError { message: "'continue' outside loop".into(), range });
                }
                Ok(Stmt::Continue(range))
            }
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                Ok(Stmt::Pass)
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof | TokenKind::Symbol(";")) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Return { value, range })
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                let value = if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof | TokenKind::Symbol(";")) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Raise { value, range })
            }
            TokenKind::Keyword(Keyword::Global) => {
                self.advance();
                Ok(Stmt::Global(self.parse_name_list()?))
            }
            TokenKind::Keyword(Keyword::Nonlocal) => {
                self.advance();
                Ok(Stmt::Nonlocal(self.parse_name_list()?))
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::Keyword(Keyword::From) => self.parse_from_import(),
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_name_list(&mut self) -> PResult<Vec<Symbol>> {
        let mut names = vec![self.expect_name()?];
        while self.is_symbol(",") {
            self.advance();
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        self.advance();
        let module = self.expect_name()?;
        let alias = if self.is_keyword(Keyword::As) {
            self.advance();
            self.expect_name()?
        } else {
            module
        };
        Ok(Stmt::Import { module, alias, range })
    }

    fn parse_from_import(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        self.advance();
        let module = self.expect_name()?;
        self.eat_keyword(Keyword::Import)?;
        if self.is_symbol("*") {
            self.advance();
            return Ok(Stmt::ImportFrom { module, names: Vec::new(), star: true, range });
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let alias = if self.is_keyword(Keyword::As) {
                self.advance();
                self.expect_name()?
            } else {
                name
            };
            names.push((name, alias));
            if self.is_symbol(",") {
                self.advance();
                continue;
            }
            break;
        }
        Ok(Stmt::ImportFrom { module, names, star: false, range })
    }

    /// Parses an expression statement, which may turn out to be a plain
    /// assignment, a compound assignment, a bare `++`/`--` increment, or
    /// just an expression evaluated for side effect.
    fn parse_expr_or_assign_stmt(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        let expr = self.parse_expr()?;

        if self.is_symbol("++") || self.is_symbol("--") {
            let op = if self.is_symbol("++") { BinOp::Add } else { BinOp::Sub };
            self.advance();
            let target = expr_to_target(expr, &range)?;
            return Ok(Stmt::AugAssign { target, op, value: Expr::IntLit(1), range });
        }

        if self.is_symbol("=") {
            self.advance();
            let target = expr_to_target(expr, &range)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { target, value, range });
        }

        if let Some(op) = self.peek_aug_op() {
            self.advance();
            let target = expr_to_target(expr, &range)?;
            let value = self.parse_expr()?;
            return Ok(Stmt::AugAssign { target, op, value, range });
        }

        Ok(Stmt::Expr(expr))
    }

    fn peek_aug_op(&self) -> Option<BinOp> {
        let TokenKind::Symbol(s) = self.peek() else { return None };
        Some(match *s {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::TrueDiv,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            "**=" => BinOp::Pow,
            "&=" => BinOp::BitAnd,
            "|=" => BinOp::BitOr,
            "^=" => BinOp::BitXor,
            "<<=" => BinOp::LShift,
            ">>=" => BinOp::RShift,
            _ => return None,
        })
    }

    // ---- compound statements ----

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_suite()?;
        let orelse = self.parse_else_or_elif()?;
        Ok(Stmt::If { cond, body, orelse })
    }

    /// `elif c: B ...` desugars to `else: if c: B ...`, folding arbitrarily
    /// long chains into nested `If` nodes.
    fn parse_else_or_elif(&mut self) -> PResult<Vec<Stmt>> {
        self.skip_newlines_if_followed_by_else_chain();
        if self.is_keyword(Keyword::Elif) {
            self.advance();
            let cond = self.parse_expr()?;
            let body = self.parse_suite()?;
            let orelse = self.parse_else_or_elif()?;
            Ok(vec![Stmt::If { cond, body, orelse }])
        } else if self.is_keyword(Keyword::Else) {
            self.advance();
            self.parse_suite()
        } else {
            Ok(Vec::new())
        }
    }

    /// A dedented `elif`/`else` sits after the block's `Newline`s/`Dedent`
    /// have already been consumed by the suite parser in the common case,
    /// but when the suite was a single-line form the next token is simply
    /// whatever follows -- this only needs to skip blank lines between.
    fn skip_newlines_if_followed_by_else_chain(&mut self) {
        let save = self.pos;
        let mut p = self.pos;
        while matches!(self.tokens.get(p).map(|t| &t.kind), Some(TokenKind::Newline)) {
            p += 1;
        }
        if matches!(
            self.tokens.get(p).map(|t| &t.kind),
            Some(TokenKind::Keyword(Keyword::Elif)) | Some(TokenKind::Keyword(Keyword::Else))
        ) {
            self.pos = p;
        } else {
            self.pos = save;
        }
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_suite();
        self.loop_depth -= 1;
        let body = body?;
        let orelse = self.parse_else_or_elif()?;
        Ok(Stmt::While { cond, body, orelse })
    }

    /// `for <targets> in <expr>: <body> [else: <else_body>]` desugars to:
    /// ```text
    /// __tmp = <expr>.__iter__()
    /// while True:
    ///     try:
    ///         <targets> = __tmp.__next__()
    ///     except StopIteration:
    ///         break
    ///     <body>
    /// [else_body runs after the loop exits normally, i.e. is appended after the While]
    /// ```
    fn parse_for(&mut self) -> PResult<Vec<Stmt>> {
        let range = self.peek_range();
        self.advance();
        let target = self.parse_target_list()?;
        self.eat_keyword(Keyword::In)?;
        let iter_expr = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_suite();
        self.loop_depth -= 1;
        let body = body?;
        let orelse = self.parse_else_or_elif()?;

        let tmp = self.fresh_tmp();
        let iter_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute {
                obj: Box::new(iter_expr),
                attr: crate::intern::sym::ITER,
                range,
            }),
            args: Vec::new(),
            kwargs: Vec::new(),
            range,
        });
        let setup = Stmt::Assign { target: AssignTarget::Name(tmp), value: iter_call, range };

        let next_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute {
                obj: Box::new(Expr::Name(tmp, range)),
                attr: crate::intern::sym::NEXT,
                range,
            }),
            args: Vec::new(),
            kwargs: Vec::new(),
            range,
        });
        let fetch = Stmt::Try {
            body: vec![Stmt::Assign { target, value: next_call, range }],
            handlers: vec![ExceptHandler {
                exc_type: Some(Expr::Name(self.stop_iteration_name(), range)),
                bind: None,
                body: vec![Stmt::Break(range)],
                range,
            }],
            finally: Vec::new(),
            range,
        };

        let mut loop_body = vec![fetch];
        loop_body.extend(body);
        let while_loop = Stmt::While { cond: Expr::BoolLit(true), body: loop_body, orelse };
        Ok(vec![setup, while_loop])
    }

    fn stop_iteration_name(&mut self) -> Symbol {
        self.heap.intern("StopIteration")
    }

    /// `with <expr> [as <name>]: <body>` desugars to:
    /// ```text
    /// __tmp = <expr>
    /// [<name> = ]__tmp.__enter__()
    /// try:
    ///     <body>
    /// finally:
    ///     __tmp.__exit__(None, None, None)
    /// ```
    fn parse_with(&mut self) -> PResult<Vec<Stmt>> {
        let range = self.peek_range();
        self.advance();
        let ctx_expr = self.parse_expr()?;
        let bind_name = if self.is_keyword(Keyword::As) {
            self.advance();
            Some(self.parse_target()?)
        } else {
            None
        };
        let body = self.parse_suite()?;

        let tmp = self.fresh_tmp();
        let setup = Stmt::Assign { target: AssignTarget::Name(tmp), value: ctx_expr, range };
        let enter_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute {
                obj: Box::new(Expr::Name(tmp, range)),
                attr: crate::intern::sym::ENTER,
                range,
            }),
            args: Vec::new(),
            kwargs: Vec::new(),
            range,
        });
        let enter_stmt = match bind_name {
            Some(target) => Stmt::Assign { target, value: enter_call, range },
            None => Stmt::Expr(enter_call),
        };
        let exit_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute {
                obj: Box::new(Expr::Name(tmp, range)),
                attr: crate::intern::sym::EXIT,
                range,
            }),
            args: vec![Arg::Positional(Expr::NoneLit), Arg::Positional(Expr::NoneLit), Arg::Positional(Expr::NoneLit)],
            kwargs: Vec::new(),
            range,
        });
        let try_stmt = Stmt::Try {
            body,
            handlers: Vec::new(),
            finally: vec![Stmt::Expr(exit_call)],
            range,
        };
        Ok(vec![setup, enter_stmt, try_stmt])
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        self.advance();
        let body = self.parse_suite()?;
        let mut handlers = Vec::new();
        let mut seen_bare = false;
        while self.is_keyword(Keyword::Except) {
            if seen_bare {
                return Err(self.error("default 'except' must be last"));
            }
            let hrange = self.peek_range();
            self.advance();
            let exc_type = if self.is_symbol(":") {
                seen_bare = true;
                None
            } else {
                Some(self.parse_or())
            }
            .transpose()?;
            let bind = if self.is_keyword(Keyword::As) {
                self.advance();
                Some(self.expect_name()?)
            } else {
                None
            };
            let hbody = self.parse_suite()?;
            handlers.push(ExceptHandler { exc_type, bind, body: hbody, range: hrange });
        }
        let finally = if self.is_keyword(Keyword::Finally) {
            self.advance();
            self.parse_suite()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(ParseError { message: "'try' must have at least one 'except' or a 'finally'".into(), range });
        }
        Ok(Stmt::Try { body, handlers, finally, range })
    }

    fn parse_def(&mut self, is_method: bool) -> PResult<Stmt> {
        let range = self.peek_range();
        self.advance();
        let name = self.expect_name()?;
        let params = self.parse_params()?;
        let body = self.parse_suite()?;
        let mut def = FunctionDef {
            name,
            params,
            body,
            range,
            is_method,
            is_class_body: false,
            locals: Vec::new(),
            local_captures: Vec::new(),
            global_captures: Vec::new(),
        };
        resolve_captures(&mut def);
        Ok(Stmt::FunctionDef(Rc::new(def)))
    }

    fn parse_params(&mut self) -> PResult<Params> {
        self.eat_symbol("(")?;
        let mut params = Params::default();
        let mut seen_default = false;
        while !self.is_symbol(")") {
            if self.is_symbol("*") {
                self.advance();
                if self.is_symbol("*") {
                    // shouldn't happen: ** handled below, but tolerate stray '*'
                }
                params.vararg = Some(self.expect_name()?);
            } else if self.is_symbol("**") {
                self.advance();
                params.kwarg = Some(self.expect_name()?);
            } else {
                let name = self.expect_name()?;
                if self.is_symbol("=") {
                    self.advance();
                    params.defaults.push(self.parse_expr()?);
                    seen_default = true;
                } else if seen_default {
                    return Err(self.error("non-default parameter follows default parameter"));
                }
                params.names.push(name);
            }
            if self.is_symbol(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_symbol(")")?;
        Ok(params)
    }

    fn parse_class(&mut self) -> PResult<Stmt> {
        let range = self.peek_range();
        self.advance();
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.is_symbol("(") {
            self.advance();
            while !self.is_symbol(")") {
                bases.push(self.parse_expr()?);
                if self.is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
            self.eat_symbol(")")?;
        }
        let raw_body = self.parse_suite()?;
        // `def`s parsed directly inside a class body are re-tagged as
        // methods so attribute access on instances promotes them to bound
        // methods (see `heap::Heap::access_attr`).
        let body = raw_body
            .into_iter()
            .map(|s| match s {
                Stmt::FunctionDef(def) => {
                    let mut d = (*def).clone();
                    d.is_method = true;
                    Stmt::FunctionDef(Rc::new(d))
                }
                other => other,
            })
            .collect();
        Ok(Stmt::ClassDef { name, bases, body, range })
    }

    // ---- assignment targets ----

    fn parse_target(&mut self) -> PResult<AssignTarget> {
        let range = self.peek_range();
        let expr = self.parse_postfix()?;
        expr_to_target(expr, &range)
    }

    fn parse_target_list(&mut self) -> PResult<AssignTarget> {
        let first = self.parse_target()?;
        if self.is_symbol(",") {
            let mut targets = vec![first];
            while self.is_symbol(",") {
                self.advance();
                if matches!(self.peek(), TokenKind::Keyword(Keyword::In)) {
                    break;
                }
                targets.push(self.parse_target()?);
            }
            Ok(AssignTarget::Pack(targets))
        } else {
            Ok(first)
        }
    }

    // ---- expressions (Pratt, precedence climbing) ----

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let left = self.parse_or()?;
        if self.is_keyword(Keyword::If) {
            self.advance();
            let cond = self.parse_or()?;
            self.eat_keyword(Keyword::Else)?;
            let orelse = self.parse_conditional()?;
            Ok(Expr::Conditional { cond: Box::new(cond), body: Box::new(left), orelse: Box::new(orelse) })
        } else {
            Ok(left)
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.is_keyword(Keyword::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BoolOp { op: BoolOpKind::Or, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_not()?;
        while self.is_keyword(Keyword::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::BoolOp { op: BoolOpKind::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.is_keyword(Keyword::Not) {
            let range = self.peek_range();
            self.advance();
            let operand = self.parse_not()?;
            Ok(Expr::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand), range })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bitor()?;
        loop {
            let range = self.peek_range();
            let op = match self.peek().clone() {
                TokenKind::Symbol("==") => Some(BinOp::Eq),
                TokenKind::Symbol("!=") => Some(BinOp::Ne),
                TokenKind::Symbol("<") => Some(BinOp::Lt),
                TokenKind::Symbol("<=") => Some(BinOp::Le),
                TokenKind::Symbol(">") => Some(BinOp::Gt),
                TokenKind::Symbol(">=") => Some(BinOp::Ge),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                let right = self.parse_bitor()?;
                left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right), range };
                continue;
            }
            if self.is_keyword(Keyword::In) {
                self.advance();
                let right = self.parse_bitor()?;
                left = Expr::Contains { left: Box::new(left), right: Box::new(right), negate: false };
                continue;
            }
            if self.is_keyword(Keyword::Not) && matches!(self.peek_at(1), TokenKind::Keyword(Keyword::In)) {
                self.advance();
                self.advance();
                let right = self.parse_bitor()?;
                left = Expr::Contains { left: Box::new(left), right: Box::new(right), negate: true };
                continue;
            }
            if self.is_keyword(Keyword::Is) {
                self.advance();
                let negate = if self.is_keyword(Keyword::Not) {
                    self.advance();
                    true
                } else {
                    false
                };
                let right = self.parse_bitor()?;
                left = Expr::Is { left: Box::new(left), right: Box::new(right), negate };
                continue;
            }
            break;
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bitxor()?;
        while self.is_symbol("|") {
            let range = self.peek_range();
            self.advance();
            let right = self.parse_bitxor()?;
            left = Expr::BinOp { op: BinOp::BitOr, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bitand()?;
        while self.is_symbol("^") {
            let range = self.peek_range();
            self.advance();
            let right = self.parse_bitand()?;
            left = Expr::BinOp { op: BinOp::BitXor, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        let mut left = self.parse_shift()?;
        while self.is_symbol("&") {
            let range = self.peek_range();
            self.advance();
            let right = self.parse_shift()?;
            left = Expr::BinOp { op: BinOp::BitAnd, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.is_symbol("<<") {
                BinOp::LShift
            } else if self.is_symbol(">>") {
                BinOp::RShift
            } else {
                break;
            };
            let range = self.peek_range();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.is_symbol("+") {
                BinOp::Add
            } else if self.is_symbol("-") {
                BinOp::Sub
            } else {
                break;
            };
            let range = self.peek_range();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.is_symbol("*") {
                BinOp::Mul
            } else if self.is_symbol("//") {
                BinOp::FloorDiv
            } else if self.is_symbol("/") {
                BinOp::TrueDiv
            } else if self.is_symbol("%") {
                BinOp::Mod
            } else {
                break;
            };
            let range = self.peek_range();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp { op, left: Box::new(left), right: Box::new(right), range };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let range = self.peek_range();
        let op = if self.is_symbol("+") {
            Some(UnaryOp::Pos)
        } else if self.is_symbol("-") {
            Some(UnaryOp::Neg)
        } else if self.is_symbol("~") {
            Some(UnaryOp::Invert)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            Ok(Expr::UnaryOp { op, operand: Box::new(operand), range })
        } else {
            self.parse_power()
        }
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let left = self.parse_postfix()?;
        if self.is_symbol("**") {
            let range = self.peek_range();
            self.advance();
            let right = self.parse_unary()?;
            Ok(Expr::BinOp { op: BinOp::Pow, left: Box::new(left), right: Box::new(right), range })
        } else {
            Ok(left)
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.is_symbol("(") {
                expr = self.parse_call(expr)?;
            } else if self.is_symbol("[") {
                expr = self.parse_index(expr)?;
            } else if self.is_symbol(".") {
                let range = self.peek_range();
                self.advance();
                let attr = self.expect_name()?;
                expr = Expr::Attribute { obj: Box::new(expr), attr, range };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call(&mut self, func: Expr) -> PResult<Expr> {
        let range = self.peek_range();
        self.advance();
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.is_symbol(")") {
            if self.is_symbol("**") {
                self.advance();
                kwargs.push(Kwarg::DoubleStarred(self.parse_expr()?));
            } else if self.is_symbol("*") {
                self.advance();
                args.push(Arg::Starred(self.parse_expr()?));
            } else if matches!(self.peek(), TokenKind::Name(_)) && matches!(self.peek_at(1), TokenKind::Symbol("=")) {
                let name = self.expect_name()?;
                self.advance();
                kwargs.push(Kwarg::Named(name, self.parse_expr()?));
            } else {
                args.push(Arg::Positional(self.parse_expr()?));
            }
            if self.is_symbol(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_symbol(")")?;
        Ok(Expr::Call(Call { func: Box::new(func), args, kwargs, range }))
    }

    fn parse_index(&mut self, obj: Expr) -> PResult<Expr> {
        let range = self.peek_range();
        self.advance();
        let start = if self.is_symbol(":") { None } else { Some(Box::new(self.parse_expr()?)) };
        if self.is_symbol(":") {
            self.advance();
            let stop = if matches!(self.peek(), TokenKind::Symbol(":") | TokenKind::Symbol("]")) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            let step = if self.is_symbol(":") {
                self.advance();
                if self.is_symbol("]") { None } else { Some(Box::new(self.parse_expr()?)) }
            } else {
                None
            };
            self.eat_symbol("]")?;
            return Ok(Expr::Index {
                obj: Box::new(obj),
                index: Box::new(Expr::Slice(SliceExpr { start, stop, step })),
                range,
            });
        }
        let index = start.expect("non-slice index must have a start expression");
        self.eat_symbol("]")?;
        Ok(Expr::Index { obj: Box::new(obj), index, range })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let range = self.peek_range();
        match self.peek().clone() {
            TokenKind::Int(i) => {
                self.advance();
                Ok(Expr::IntLit(i))
            }
            TokenKind::Float(f) => {
                self.advance();
                Ok(Expr::FloatLit(f))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::StrLit(s))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::BoolLit(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::BoolLit(false))
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr::NoneLit)
            }
            TokenKind::Keyword(Keyword::Lambda) => self.parse_lambda(),
            TokenKind::Name(sym) => {
                self.advance();
                if self.is_symbol(":=") {
                    self.advance();
                    let value = self.parse_expr()?;
                    let tmp_assign = Stmt::Assign { target: AssignTarget::Name(sym), value, range };
                    Ok(Expr::Block { stmts: vec![tmp_assign], result: Box::new(Expr::Name(sym, range)) })
                } else {
                    Ok(Expr::Name(sym, range))
                }
            }
            TokenKind::Symbol("(") => self.parse_paren(),
            TokenKind::Symbol("[") => self.parse_list_or_comprehension(),
            TokenKind::Symbol("{") => self.parse_dict_or_set(),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_lambda(&mut self) -> PResult<Expr> {
        let range = self.peek_range();
        self.advance();
        let mut params = Params::default();
        let mut seen_default = false;
        while !self.is_symbol(":") {
            if self.is_symbol("*") {
                self.advance();
                params.vararg = Some(self.expect_name()?);
            } else if self.is_symbol("**") {
                self.advance();
                params.kwarg = Some(self.expect_name()?);
            } else {
                let name = self.expect_name()?;
                if self.is_symbol("=") {
                    self.advance();
                    params.defaults.push(self.parse_expr()?);
                    seen_default = true;
                } else if seen_default {
                    return Err(self.error("non-default parameter follows default parameter"));
                }
                params.names.push(name);
            }
            if self.is_symbol(",") {
                self.advance();
            } else {
                break;
            }
        }
        self.eat_symbol(":")?;
        let body_expr = self.parse_expr()?;
        let name = self.heap.intern("<lambda>");
        let mut def = FunctionDef {
            name,
            params,
            body: vec![Stmt::Return { value: Some(body_expr), range }],
            range,
            is_method: false,
            is_class_body: false,
            locals: Vec::new(),
            local_captures: Vec::new(),
            global_captures: Vec::new(),
        };
        resolve_captures(&mut def);
        Ok(Expr::Lambda(Rc::new(def)))
    }

    fn parse_paren(&mut self) -> PResult<Expr> {
        self.advance();
        if self.is_symbol(")") {
            self.advance();
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.is_symbol(",") {
            let mut items = vec![first];
            while self.is_symbol(",") {
                self.advance();
                if self.is_symbol(")") {
                    break;
                }
                items.push(self.parse_expr()?);
            }
            self.eat_symbol(")")?;
            Ok(Expr::Tuple(items))
        } else {
            self.eat_symbol(")")?;
            Ok(first)
        }
    }

    /// `[<expr> for <targets> in <iter> if <cond>]` desugars to:
    /// ```text
    /// __tmp = []
    /// for <targets> in <iter>:
    ///     if <cond>:
    ///         __tmp.append(<expr>)
    /// ```
    /// (itself further desugared via `parse_for` immediately below.)
    fn parse_list_or_comprehension(&mut self) -> PResult<Expr> {
        let range = self.peek_range();
        self.advance();
        if self.is_symbol("]") {
            self.advance();
            return Ok(Expr::ListLit(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.is_keyword(Keyword::For) {
            let tmp = self.fresh_tmp();
            self.advance();
            let target = self.parse_target_list()?;
            self.eat_keyword(Keyword::In)?;
            let iter_expr = self.parse_expr()?;
            let cond = if self.is_keyword(Keyword::If) {
                self.advance();
                Some(self.parse_or()?)
            } else {
                None
            };
            self.eat_symbol("]")?;

            let append_call = Expr::Call(Call {
                func: Box::new(Expr::Attribute { obj: Box::new(Expr::Name(tmp, range)), attr: self.heap.intern("append"), range }),
                args: vec![Arg::Positional(first)],
                kwargs: Vec::new(),
                range,
            });
            let append_stmt = Stmt::Expr(append_call);
            let body = match cond {
                Some(cond) => vec![Stmt::If { cond, body: vec![append_stmt], orelse: Vec::new() }],
                None => vec![append_stmt],
            };

            let init = Stmt::Assign { target: AssignTarget::Name(tmp), value: Expr::ListLit(Vec::new()), range };
            let for_stmts = self.build_for_stmts(target, iter_expr, body, range)?;
            let mut stmts = vec![init];
            stmts.extend(for_stmts);
            Ok(Expr::Block { stmts, result: Box::new(Expr::Name(tmp, range)) })
        } else {
            let mut items = vec![first];
            while self.is_symbol(",") {
                self.advance();
                if self.is_symbol("]") {
                    break;
                }
                items.push(self.parse_expr()?);
            }
            self.eat_symbol("]")?;
            Ok(Expr::ListLit(items))
        }
    }

    /// Shared desugaring helper so comprehensions reuse the exact `for`
    /// expansion `parse_for` performs on a statement-level loop.
    fn build_for_stmts(&mut self, target: AssignTarget, iter_expr: Expr, body: Vec<Stmt>, range: CodeRange) -> PResult<Vec<Stmt>> {
        let tmp = self.fresh_tmp();
        let iter_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute { obj: Box::new(iter_expr), attr: crate::intern::sym::ITER, range }),
            args: Vec::new(),
            kwargs: Vec::new(),
            range,
        });
        let setup = Stmt::Assign { target: AssignTarget::Name(tmp), value: iter_call, range };
        let next_call = Expr::Call(Call {
            func: Box::new(Expr::Attribute { obj: Box::new(Expr::Name(tmp, range)), attr: crate::intern::sym::NEXT, range }),
            args: Vec::new(),
            kwargs: Vec::new(),
            range,
        });
        let fetch = Stmt::Try {
            body: vec![Stmt::Assign { target, value: next_call, range }],
            handlers: vec![ExceptHandler {
                exc_type: Some(Expr::Name(self.stop_iteration_name(), range)),
                bind: None,
                body: vec![Stmt::Break(range)],
                range,
            }],
            finally: Vec::new(),
            range,
        };
        let mut loop_body = vec![fetch];
        loop_body.extend(body);
        Ok(vec![setup, Stmt::While { cond: Expr::BoolLit(true), body: loop_body, orelse: Vec::new() }])
    }

    fn parse_dict_or_set(&mut self) -> PResult<Expr> {
        self.advance();
        if self.is_symbol("}") {
            self.advance();
            return Ok(Expr::DictLit(Vec::new()));
        }
        let first_key = self.parse_expr()?;
        if self.is_symbol(":") {
            self.advance();
            let first_val = self.parse_expr()?;
            let mut items = vec![(first_key, first_val)];
            while self.is_symbol(",") {
                self.advance();
                if self.is_symbol("}") {
                    break;
                }
                let k = self.parse_expr()?;
                self.eat_symbol(":")?;
                let v = self.parse_expr()?;
                items.push((k, v));
            }
            self.eat_symbol("}")?;
            Ok(Expr::DictLit(items))
        } else {
            let mut items = vec![first_key];
            while self.is_symbol(",") {
                self.advance();
                if self.is_symbol("}") {
                    break;
                }
                items.push(self.parse_expr()?);
            }
            self.eat_symbol("}")?;
            Ok(Expr::SetLit(items))
        }
    }
}

/// Validates that `expr` is an assignable target and converts it, per the
/// specification's assignability rule: a bare name, an index expression, an
/// attribute expression, or a tuple/list of such targets.
fn expr_to_target(expr: Expr, range: &CodeRange) -> PResult<AssignTarget> {
    match expr {
        Expr::Name(sym, _) => Ok(AssignTarget::Name(sym)),
        Expr::Attribute { obj, attr, .. } => Ok(AssignTarget::Attribute { obj: *obj, attr }),
        Expr::Index { obj, index, .. } => Ok(AssignTarget::Index { obj: *obj, index: *index }),
        Expr::Tuple(items) | Expr::ListLit(items) => {
            let targets = items.into_iter().map(|e| expr_to_target(e, range)).collect::<PResult<Vec<_>>>()?;
            Ok(AssignTarget::Pack(targets))
        }
        _ => Err(ParseError { message: "expression is not assignable".into(), range: *range }),
    }
}

// ---- capture resolution (specification §4.2) ----

use ahash::AHashSet;

#[derive(Default)]
struct Usage {
    written: AHashSet<Symbol>,
    referenced: AHashSet<Symbol>,
    explicit_global: AHashSet<Symbol>,
    explicit_nonlocal: AHashSet<Symbol>,
}

/// Fills in `def.locals`/`local_captures`/`global_captures` from its own
/// body, without descending into nested function/lambda/class bodies
/// (those were already resolved independently when the parser finished
/// building them, bottom-up).
pub fn resolve_captures(def: &mut FunctionDef) {
    let mut usage = Usage::default();
    collect_stmts(&def.body, &mut usage);

    let params: AHashSet<Symbol> = def.params.names.iter().copied().collect();
    let excluded: AHashSet<Symbol> = usage
        .explicit_global
        .union(&usage.explicit_nonlocal)
        .copied()
        .collect::<AHashSet<_>>()
        .union(&params)
        .copied()
        .collect();

    def.locals = usage.written.difference(&excluded).copied().collect();
    def.local_captures = usage
        .referenced
        .difference(&usage.written)
        .copied()
        .chain(usage.explicit_nonlocal.iter().copied())
        .filter(|s| !params.contains(s))
        .collect::<AHashSet<_>>()
        .into_iter()
        .collect();
    def.global_captures = usage.explicit_global.into_iter().collect();
}

fn collect_target(target: &AssignTarget, usage: &mut Usage) {
    match target {
        AssignTarget::Name(sym) => {
            usage.written.insert(*sym);
        }
        AssignTarget::Attribute { obj, .. } => collect_expr(obj, usage),
        AssignTarget::Index { obj, index } => {
            collect_expr(obj, usage);
            collect_expr(index, usage);
        }
        AssignTarget::Pack(targets) => {
            for t in targets {
                collect_target(t, usage);
            }
        }
    }
}

fn collect_stmts(stmts: &[Stmt], usage: &mut Usage) {
    for stmt in stmts {
        collect_stmt(stmt, usage);
    }
}

fn collect_stmt(stmt: &Stmt, usage: &mut Usage) {
    match stmt {
        Stmt::Expr(e) => collect_expr(e, usage),
        Stmt::Assign { target, value, .. } => {
            collect_expr(value, usage);
            collect_target(target, usage);
        }
        Stmt::AugAssign { target, value, .. } => {
            collect_target(target, usage);
            collect_expr(value, usage);
        }
        Stmt::If { cond, body, orelse } => {
            collect_expr(cond, usage);
            collect_stmts(body, usage);
            collect_stmts(orelse, usage);
        }
        Stmt::While { cond, body, orelse } => {
            collect_expr(cond, usage);
            collect_stmts(body, usage);
            collect_stmts(orelse, usage);
        }
        Stmt::Break(_) | Stmt::Continue(_) | Stmt::Pass => {}
        Stmt::Return { value, .. } => {
            if let Some(v) = value {
                collect_expr(v, usage);
            }
        }
        Stmt::Raise { value, .. } => {
            if let Some(v) = value {
                collect_expr(v, usage);
            }
        }
        Stmt::Global(names) => {
            usage.explicit_global.extend(names.iter().copied());
        }
        Stmt::Nonlocal(names) => {
            usage.explicit_nonlocal.extend(names.iter().copied());
        }
        Stmt::FunctionDef(inner) => {
            usage.written.insert(inner.name);
        }
        Stmt::ClassDef { name, bases, .. } => {
            usage.written.insert(*name);
            for b in bases {
                collect_expr(b, usage);
            }
        }
        Stmt::Import { alias, .. } => {
            usage.written.insert(*alias);
        }
        Stmt::ImportFrom { names, .. } => {
            for (_, alias) in names {
                usage.written.insert(*alias);
            }
        }
        Stmt::Try { body, handlers, finally, .. } => {
            collect_stmts(body, usage);
            for h in handlers {
                if let Some(e) = &h.exc_type {
                    collect_expr(e, usage);
                }
                if let Some(bind) = h.bind {
                    usage.written.insert(bind);
                }
                collect_stmts(&h.body, usage);
            }
            collect_stmts(finally, usage);
        }
    }
}

fn collect_expr(expr: &Expr, usage: &mut Usage) {
    match expr {
        Expr::Name(sym, _) => {
            usage.referenced.insert(*sym);
        }
        Expr::Tuple(items) | Expr::ListLit(items) | Expr::SetLit(items) => {
            for i in items {
                collect_expr(i, usage);
            }
        }
        Expr::DictLit(pairs) => {
            for (k, v) in pairs {
                collect_expr(k, usage);
                collect_expr(v, usage);
            }
        }
        Expr::UnaryOp { operand, .. } => collect_expr(operand, usage),
        Expr::BinOp { left, right, .. } | Expr::BoolOp { left, right, .. } | Expr::Contains { left, right, .. } | Expr::Is { left, right, .. } => {
            collect_expr(left, usage);
            collect_expr(right, usage);
        }
        Expr::Conditional { cond, body, orelse } => {
            collect_expr(cond, usage);
            collect_expr(body, usage);
            collect_expr(orelse, usage);
        }
        Expr::Call(call) => {
            collect_expr(&call.func, usage);
            for a in &call.args {
                match a {
                    Arg::Positional(e) | Arg::Starred(e) => collect_expr(e, usage),
                }
            }
            for k in &call.kwargs {
                match k {
                    Kwarg::Named(_, e) | Kwarg::DoubleStarred(e) => collect_expr(e, usage),
                }
            }
        }
        Expr::Index { obj, index, .. } => {
            collect_expr(obj, usage);
            collect_expr(index, usage);
        }
        Expr::Slice(s) => {
            for e in [&s.start, &s.stop, &s.step].into_iter().flatten() {
                collect_expr(e, usage);
            }
        }
        Expr::Attribute { obj, .. } => collect_expr(obj, usage),
        Expr::Block { stmts, result } => {
            collect_stmts(stmts, usage);
            collect_expr(result, usage);
        }
        // A nested function/lambda is its own scope: its own name reference
        // (if any, via recursion) is irrelevant here, and its body was
        // already resolved independently.
        Expr::Lambda(_) => {}
        Expr::NoneLit | Expr::BoolLit(_) | Expr::IntLit(_) | Expr::FloatLit(_) | Expr::StrLit(_) => {}
    }
}
