//! Lowers a `reagent_syntax::expr::Node` tree into `reagent_vm` bytecode.
//!
//! Every compiled expression leaves exactly one value on the operand
//! stack; compound statements (`var`, `def`) that don't naturally leave
//! one push `nil` afterwards so a `Block` can treat every statement
//! uniformly. Control-flow forms that need a forward jump target whose
//! address isn't known yet emit a placeholder and patch it once the
//! target address is known, writing the instruction in place rather than
//! going through `Chunk::patch_jump_target` whenever more than its first
//! field needs filling in.

use crate::error::CompileError;
use crate::freevars::free_vars;
use crate::funcstate::{FuncState, LoopCtx};
use arcstr::ArcStr;
use reagent_syntax::expr::{Expr, FieldDecl, JoinStep, KeyBind, Node, StrSeg};
use reagent_vm::closure::ClosureInfo;
use reagent_vm::instr::Instr;
use reagent_value::Value;
use std::rc::Rc;

pub struct Compiler {
    funcs: Vec<FuncState>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { funcs: Vec::new() }
    }

    /// Compiles a whole program as a zero-parameter, non-capturing
    /// function -- the top level has no enclosing frame to close over,
    /// so it falls out of the general closure machinery for free.
    pub fn compile_program(source: ArcStr, node: &Node) -> Result<Rc<ClosureInfo>, CompileError> {
        let mut c = Compiler::new();
        Ok(c.compile_function(None, &[], false, None, node, source)?.0)
    }

    /// Compiles one REPL line against `known` console variables already in
    /// scope, capturing each one actually referenced as an upvalue exactly
    /// like a nested `fn` captures a name from its enclosing function --
    /// this is what lets a console session's `var` bindings survive across
    /// separate calls into this compiler. The returned names are in the
    /// same order as the returned `ClosureInfo`'s `upvalue_slots`, so the
    /// caller can hand back matching `Reference` cells at call time.
    pub fn compile_console_line(
        source: ArcStr,
        node: &Node,
        known: &[ArcStr],
    ) -> Result<(Rc<ClosureInfo>, Vec<ArcStr>), CompileError> {
        let mut c = Compiler::new();
        let mut outer = FuncState::new(None, source.clone());
        for name in known {
            outer.declare_local(name.clone());
        }
        c.funcs.push(outer);
        let (info, captured) = c.compile_function(None, &[], false, None, node, source)?;
        c.funcs.pop().expect("synthetic console scope pushed above");
        Ok((info, captured))
    }

    fn current(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("no active function")
    }

    fn emit(&mut self, instr: Instr, line: u32) -> usize {
        self.current().emit(instr, line)
    }

    fn push_str(&mut self, s: &str, line: u32) {
        self.emit(Instr::Push(Value::String(ArcStr::from(s))), line);
    }

    /// `self_param_index` marks which parameter (if any) is the `__self`
    /// a schema computed field's body sees -- the one `old` reads.
    fn compile_function(
        &mut self,
        name: Option<ArcStr>,
        params: &[ArcStr],
        variadic: bool,
        self_param_index: Option<usize>,
        body: &Node,
        source: ArcStr,
    ) -> Result<(Rc<ClosureInfo>, Vec<ArcStr>), CompileError> {
        let mut fs = FuncState::new(name.clone(), source);
        for (i, p) in params.iter().enumerate() {
            let slot = fs.declare_param(p.clone());
            if Some(i) == self_param_index {
                fs.set_self_slot(slot);
            }
        }
        self.funcs.push(fs);
        let idx = self.funcs.len() - 1;

        // Reserve upvalue slots before compiling the body for real, so
        // they sit contiguously right after the parameters.
        for free_name in free_vars(body, params) {
            self.resolve_upvalue_chain(idx, &free_name);
        }

        self.compile_expr(body)?;

        let mut fs = self.funcs.pop().expect("pushed above");
        let end = fs.len();
        for patch in std::mem::take(&mut fs.return_patches) {
            fs.set_instr(patch, Instr::Jump(end));
        }
        let upvalue_slots = fs.upvalue_slots();
        let upvalue_names = fs.upvalue_names();
        let pending_captures = std::mem::take(&mut fs.pending_captures);
        let frame_size = fs.frame_size().max(params.len() as u32);
        let (chunk, hash) = fs.finish_hash();

        let nparams = if variadic { -(params.len() as i32) } else { params.len() as i32 };
        let info = Rc::new(ClosureInfo {
            chunk: Rc::new(chunk),
            entry: 0,
            frame_size,
            nparams,
            upvalue_slots,
            hash,
            name,
        });

        // The enclosing function (now back on top of the stack) pushes
        // each captured reference immediately before the `Closure`
        // instruction its caller is about to emit.
        if let Some(parent) = self.funcs.last_mut() {
            for parent_slot in &pending_captures {
                parent.emit(Instr::Local(*parent_slot), 0);
            }
        }
        Ok((info, upvalue_names))
    }

    /// Resolves `name` against the function at `self.funcs[at]`'s
    /// ancestor chain, registering it (and any intermediate functions
    /// that also need it chained through) as an upvalue. Returns `at`'s
    /// own slot for it, or `None` if nothing up the chain binds it.
    fn resolve_upvalue_chain(&mut self, at: usize, name: &ArcStr) -> Option<u32> {
        if let Some(slot) = self.funcs[at].resolve_upvalue(name.as_str()) {
            return Some(slot);
        }
        if at == 0 {
            return None;
        }
        let parent_slot = if let Some(slot) = self.funcs[at - 1].resolve_local(name.as_str()) {
            slot
        } else {
            self.resolve_upvalue_chain(at - 1, name)?
        };
        Some(self.funcs[at].add_upvalue(name.clone(), parent_slot))
    }

    fn emit_closure(
        &mut self,
        name: Option<ArcStr>,
        params: Vec<ArcStr>,
        variadic: bool,
        self_param_index: Option<usize>,
        body: &Node,
        line: u32,
    ) -> Result<(), CompileError> {
        let source = self.current().chunk.source.clone();
        let (info, _captured) = self.compile_function(name, &params, variadic, self_param_index, body, source)?;
        self.current().emit(Instr::Closure(info), line);
        Ok(())
    }

    fn compile_expr(&mut self, node: &Node) -> Result<(), CompileError> {
        let line = node.span.line;
        match &node.kind {
            Expr::Nil => {
                self.emit(Instr::Push(Value::Nil), line);
            }
            Expr::Int(n) => {
                self.emit(Instr::Push(Value::Integer(*n)), line);
            }
            Expr::Real(n) => {
                self.emit(Instr::Push(Value::Real(*n)), line);
            }
            Expr::Str(segs) => self.compile_str(segs, line)?,
            Expr::Ident(name) => self.compile_ident(name, line),
            Expr::ListLit(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Instr::List(items.len() as u32), line);
            }
            Expr::TreeLit(pairs) => {
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.emit(Instr::ConstCall(ArcStr::from("tree_new"), pairs.len() as u32 * 2), line);
            }
            Expr::BinOp { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(Instr::ConstCall(op.clone(), 2), line);
            }
            Expr::And(lhs, rhs) => {
                self.compile_expr(lhs)?;
                let idx = self.emit(Instr::And(0), line);
                self.emit(Instr::Pop, line);
                self.compile_expr(rhs)?;
                let end = self.current().len();
                self.current().set_instr(idx, Instr::And(end));
            }
            Expr::Or(lhs, rhs) => {
                self.compile_expr(lhs)?;
                let idx = self.emit(Instr::Or(0), line);
                self.emit(Instr::Pop, line);
                self.compile_expr(rhs)?;
                let end = self.current().len();
                self.current().set_instr(idx, Instr::Or(end));
            }
            Expr::Not(inner) => {
                self.compile_expr(inner)?;
                self.emit(Instr::ConstCall(ArcStr::from("not"), 1), line);
            }
            Expr::Old => {
                let slot = self
                    .current()
                    .current_self_slot()
                    .ok_or_else(|| CompileError::new(node.source.clone(), line, "old used outside a computed field"))?;
                self.emit(Instr::Local(slot), line);
            }
            Expr::MethodCall { receiver, name, args } => {
                self.compile_expr(receiver)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit(Instr::ConstCall(name.clone(), args.len() as u32 + 1), line);
            }
            Expr::Call { callee, args } => {
                self.compile_expr(callee)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit(Instr::Call(args.len() as u32), line);
            }
            Expr::Block(stmts) => self.compile_block(stmts, line)?,
            Expr::Var { name, value } => {
                self.compile_expr(value)?;
                let slot = self.current().declare_local(name.clone());
                self.emit(Instr::Var(slot), line);
                self.emit(Instr::Push(Value::Nil), line);
            }
            Expr::Def { name, value } => {
                self.compile_expr(value)?;
                self.emit(Instr::Def(name.clone()), line);
                self.emit(Instr::Push(Value::Nil), line);
            }
            Expr::Assign { target, value } => self.compile_assign(target, value, line)?,
            Expr::If { cases, else_branch } => self.compile_if(cases, else_branch.as_deref(), line)?,
            Expr::Loop(body) => self.compile_loop_stmt(body, line)?,
            Expr::While(cond) => self.compile_while_stmt(cond, line)?,
            Expr::Until(cond) => self.compile_until_stmt(cond, line)?,
            Expr::Exit(value) => {
                match value {
                    Some(v) => self.compile_expr(v)?,
                    None => {
                        self.emit(Instr::Push(Value::Nil), line);
                    }
                }
                let idx = self.emit(Instr::Jump(0), line);
                self.current()
                    .add_loop_exit_jump(idx)
                    .map_err(|_| CompileError::new(node.source.clone(), line, "exit used outside a loop"))?;
            }
            Expr::Next => {
                let top = self
                    .current()
                    .current_loop_top()
                    .ok_or_else(|| CompileError::new(node.source.clone(), line, "next used outside a loop"))?;
                self.emit(Instr::Jump(top), line);
            }
            Expr::ForIn { var, key, iter, body, else_branch } => {
                self.compile_for(var, key.as_ref(), iter, body, else_branch.as_deref(), line)?
            }
            Expr::Fn { params, variadic, body } => {
                self.emit_closure(None, params.clone(), *variadic, None, body, line)?
            }
            Expr::Do { body, handler } => {
                let handler = handler.as_ref().map(|(n, h)| (n.clone(), h.as_ref()));
                self.compile_do(body, handler.as_ref().map(|(n, h)| (n, *h)), line)?
            }
            Expr::With { bindings, body } => self.compile_with(bindings, body, line)?,
            Expr::Return(value) => {
                match value {
                    Some(v) => self.compile_expr(v)?,
                    None => {
                        self.emit(Instr::Push(Value::Nil), line);
                    }
                }
                let idx = self.emit(Instr::Jump(0), line);
                self.current().return_patches.push(idx);
            }
            Expr::Schema { name, parent, fields, indices } => self.compile_schema(name, parent, fields, indices, line)?,
            Expr::Insert { schema, fields } => {
                self.push_str(schema, line);
                self.compile_ra_fields(fields, line)?;
                self.emit(Instr::ConstCall(ArcStr::from("__insert"), 2), line);
            }
            Expr::Signal { schema, fields } => {
                self.push_str(schema, line);
                self.compile_ra_fields(fields, line)?;
                self.emit(Instr::ConstCall(ArcStr::from("__signal"), 2), line);
            }
            Expr::Update { schema, keys, fields } => {
                self.push_str(schema, line);
                self.compile_keys(keys, line)?;
                self.compile_ra_fields(fields, line)?;
                self.emit(Instr::ConstCall(ArcStr::from("__update"), 3), line);
            }
            Expr::Delete { schema, keys } => {
                self.push_str(schema, line);
                self.compile_keys(keys, line)?;
                self.emit(Instr::ConstCall(ArcStr::from("__delete"), 2), line);
            }
            Expr::ExistsThenElse { steps, then_branch, else_branch } => {
                self.compile_exists_chain(steps, 0, Vec::new(), then_branch, else_branch.as_deref(), &node.source, line)?
            }
            Expr::When { steps, body } => self.compile_when(steps, body, &node.source, line)?,
        }
        Ok(())
    }

    fn compile_str(&mut self, segs: &[StrSeg], line: u32) -> Result<(), CompileError> {
        self.emit(Instr::ConstCall(ArcStr::from("stringbuffer_new"), 0), line);
        for seg in segs {
            match seg {
                StrSeg::Literal(s) => {
                    self.emit(Instr::Push(Value::String(s.clone())), line);
                }
                StrSeg::Expr(n) => self.compile_expr(n)?,
            }
            self.emit(Instr::Append, line);
        }
        self.emit(Instr::ConstCall(ArcStr::from("string"), 1), line);
        Ok(())
    }

    fn compile_ident(&mut self, name: &ArcStr, line: u32) {
        let fs = self.funcs.last().expect("no active function");
        if let Some(slot) = fs.resolve_local(name.as_str()).or_else(|| fs.resolve_upvalue(name.as_str())) {
            self.emit(Instr::Local(slot), line);
        } else {
            self.emit(Instr::ConstCall(name.clone(), 0), line);
        }
    }

    fn compile_block(&mut self, stmts: &[Node], line: u32) -> Result<(), CompileError> {
        let enter_idx = self.emit(Instr::Enter(0), line);
        self.current().push_scope();
        if stmts.is_empty() {
            self.emit(Instr::Push(Value::Nil), line);
        } else {
            for (i, stmt) in stmts.iter().enumerate() {
                self.compile_expr(stmt)?;
                if i + 1 < stmts.len() {
                    self.emit(Instr::Pop, stmt.span.line);
                }
            }
        }
        let n = self.current().pop_scope();
        self.current().set_instr(enter_idx, Instr::Enter(n));
        self.emit(Instr::Exit(n), line);
        Ok(())
    }

    /// Only a local slot is an assignable target: `def` only ever
    /// creates constants, so there is no such thing as an assignable
    /// global in this language.
    fn compile_assign(&mut self, target: &Node, value: &Node, line: u32) -> Result<(), CompileError> {
        let name = match &target.kind {
            Expr::Ident(name) => name,
            _ => {
                return Err(CompileError::new(
                    target.source.clone(),
                    target.span.line,
                    "assignment target must be a local name",
                ))
            }
        };
        let fs = self.funcs.last().expect("no active function");
        let slot = fs
            .resolve_local(name.as_str())
            .or_else(|| fs.resolve_upvalue(name.as_str()))
            .ok_or_else(|| CompileError::new(target.source.clone(), target.span.line, format!("undeclared local {name}")))?;
        self.emit(Instr::Local(slot), line);
        self.compile_expr(value)?;
        self.emit(Instr::Assign, line);
        Ok(())
    }

    /// `if cond1 then body1 [elseif cond2 then body2]* [else bodyN] end`:
    /// each case's `else_target` is known the instant its body and
    /// trailing jump are compiled (it's just "here"), so every `If` gets
    /// both fields filled in immediately; only the trailing jumps, whose
    /// shared target is the whole chain's end, need a deferred patch.
    fn compile_if(&mut self, cases: &[(Node, Node)], else_branch: Option<&Node>, line: u32) -> Result<(), CompileError> {
        let mut end_jumps = Vec::new();
        for (cond, body) in cases {
            self.compile_expr(cond)?;
            let if_idx = self.emit(Instr::If(0, 0), line);
            let then_target = self.current().len();
            self.compile_expr(body)?;
            end_jumps.push(self.emit(Instr::Jump(0), line));
            let else_target = self.current().len();
            self.current().set_instr(if_idx, Instr::If(then_target, else_target));
        }
        match else_branch {
            Some(e) => self.compile_expr(e)?,
            None => {
                self.emit(Instr::Push(Value::Nil), line);
            }
        }
        let end = self.current().len();
        for idx in end_jumps {
            self.current().chunk.patch_jump_target(idx, end);
        }
        Ok(())
    }

    /// Patches a loop's collected exits: `while`/`until` conditions land
    /// on `cond_trampoline` and fall through into a shared `Push(Nil)`
    /// (the loop yields `nil` when it ends that way); explicit `exit`
    /// values jump straight past the trampoline to `final_point`, since
    /// they already pushed their own result.
    fn finish_loop(&mut self, ctx: LoopCtx, cond_trampoline: usize, final_point: usize) {
        for idx in ctx.cond_exits {
            self.current().chunk.patch_exit_target(idx, cond_trampoline);
        }
        for idx in ctx.exit_jumps {
            self.current().chunk.patch_jump_target(idx, final_point);
        }
    }

    /// `loop ... end`: bare infinite loop, left only by a `while`/`until`/
    /// `exit` somewhere inside `body`.
    fn compile_loop_stmt(&mut self, body: &Node, line: u32) -> Result<(), CompileError> {
        let top = self.current().len();
        self.current().push_loop(top);
        self.compile_expr(body)?;
        self.emit(Instr::Pop, line);
        self.emit(Instr::Jump(top), line);

        let cond_trampoline = self.current().len();
        self.emit(Instr::Push(Value::Nil), line);
        let final_point = self.current().len();

        let ctx = self.current().pop_loop();
        self.finish_loop(ctx, cond_trampoline, final_point);
        Ok(())
    }

    /// `while cond`: a statement-level form, valid only inside a loop's
    /// body. Its own placeholder false-branch is filled in once the
    /// enclosing loop closes; the true-branch is always "keep going",
    /// i.e. the very next instruction.
    fn compile_while_stmt(&mut self, cond: &Node, line: u32) -> Result<(), CompileError> {
        self.compile_expr(cond)?;
        let idx = self.current().len();
        self.emit(Instr::While(idx + 1, 0), line);
        self.current()
            .add_loop_cond_exit(idx)
            .map_err(|_| CompileError::new(cond.source.clone(), line, "while used outside a loop"))?;
        Ok(())
    }

    fn compile_until_stmt(&mut self, cond: &Node, line: u32) -> Result<(), CompileError> {
        self.compile_expr(cond)?;
        let idx = self.current().len();
        self.emit(Instr::Until(idx + 1, 0), line);
        self.current()
            .add_loop_cond_exit(idx)
            .map_err(|_| CompileError::new(cond.source.clone(), line, "until used outside a loop"))?;
        Ok(())
    }

    /// `for [var] x[, key] in e [or := e] do body [else else_body] end`.
    /// `e` is converted via the `iterator` method regardless of whether
    /// the surface syntax used `in` or `:=` -- multi-dispatch on its
    /// argument's type is what actually distinguishes "iterate a
    /// relation's matching instances" from "iterate a plain list/value"
    /// wherever that distinction matters, so the compiler doesn't need to
    /// carry it. `next`/`exit`/`while`/`until` inside `body` share the
    /// iterator's own natural-exhaustion exit point, except `exit` (and a
    /// `while`/`until` firing) bypasses `else_body`, which is reserved for
    /// the iterator running dry on its own.
    fn compile_for(
        &mut self,
        var: &ArcStr,
        key: Option<&ArcStr>,
        iter: &Node,
        body: &Node,
        else_branch: Option<&Node>,
        line: u32,
    ) -> Result<(), CompileError> {
        let enter_idx = self.emit(Instr::Enter(0), line);
        self.current().push_scope();
        let var_slot = self.current().declare_local(var.clone());
        let key_slot = key.map(|k| self.current().declare_local(k.clone()));

        self.compile_expr(iter)?;
        self.emit(Instr::ConstCall(ArcStr::from("iterator"), 1), line);
        let loop_top = self.current().len();
        self.current().push_loop(loop_top);
        self.emit(Instr::Next, line);
        let exit_idx = self.emit(Instr::Exists(0), line);
        if let Some(ks) = key_slot {
            self.emit(Instr::Key, line);
            self.emit(Instr::Var(ks), line);
        }
        self.emit(Instr::Var(var_slot), line);
        self.compile_expr(body)?;
        self.emit(Instr::Pop, line);
        self.emit(Instr::Jump(loop_top), line);

        let exit_natural = self.current().len();
        self.current().chunk.patch_jump_target(exit_idx, exit_natural);
        match else_branch {
            Some(e) => self.compile_expr(e)?,
            None => {
                self.emit(Instr::Push(Value::Nil), line);
            }
        }
        let natural_done = self.emit(Instr::Jump(0), line);

        let cond_trampoline = self.current().len();
        self.emit(Instr::Push(Value::Nil), line);
        let final_point = self.current().len();
        self.current().chunk.patch_jump_target(natural_done, final_point);

        let ctx = self.current().pop_loop();
        self.finish_loop(ctx, cond_trampoline, final_point);

        let n = self.current().pop_scope();
        self.current().set_instr(enter_idx, Instr::Enter(n));
        self.emit(Instr::Exit(n), line);
        Ok(())
    }

    /// `do body [on name do handler] end`: without a handler, this is
    /// just an ordinary block; with one, `handler` becomes the error
    /// target for the whole of `body` -- a raised error anywhere inside
    /// (however deeply nested) unwinds the operand stack back to what it
    /// held on entry and runs `handler` with the error bound to `name`.
    fn compile_do(&mut self, body: &Node, handler: Option<(&ArcStr, &Node)>, line: u32) -> Result<(), CompileError> {
        let (catch_name, handler_body) = match handler {
            None => return self.compile_expr(body),
            Some(h) => h,
        };
        let try_idx = self.emit(Instr::Try(0), line);
        self.compile_expr(body)?;
        // Retires the try target now that the protected code finished
        // without raising -- the same instruction does this again,
        // for the same reason, at the top of the catch target below.
        self.emit(Instr::Catch, line);
        let done_idx = self.emit(Instr::Jump(0), line);
        let catch_target = self.current().len();
        self.current().set_instr(try_idx, Instr::Try(catch_target));
        self.emit(Instr::Catch, line);

        let enter_idx = self.emit(Instr::Enter(0), line);
        self.current().push_scope();
        let slot = self.current().declare_local(catch_name.clone());
        self.emit(Instr::Var(slot), line);
        self.compile_expr(handler_body)?;
        let n = self.current().pop_scope();
        self.current().set_instr(enter_idx, Instr::Enter(n));
        self.emit(Instr::Exit(n), line);

        let end = self.current().len();
        self.current().set_instr(done_idx, Instr::Jump(end));
        Ok(())
    }

    /// `with a := e, b := e2 do body end`: binds each in order, each
    /// visible to the next's initializer, then evaluates `body`.
    fn compile_with(&mut self, bindings: &[(ArcStr, Node)], body: &Node, line: u32) -> Result<(), CompileError> {
        let enter_idx = self.emit(Instr::Enter(0), line);
        self.current().push_scope();
        for (name, expr) in bindings {
            self.compile_expr(expr)?;
            let slot = self.current().declare_local(name.clone());
            self.emit(Instr::Var(slot), line);
        }
        self.compile_expr(body)?;
        let n = self.current().pop_scope();
        self.current().set_instr(enter_idx, Instr::Enter(n));
        self.emit(Instr::Exit(n), line);
        Ok(())
    }

    fn compile_ra_fields(&mut self, fields: &[reagent_syntax::expr::FieldInit], line: u32) -> Result<(), CompileError> {
        for f in fields {
            self.push_str(&f.name, line);
            self.compile_expr(&f.value)?;
        }
        self.emit(Instr::RaFields(fields.len() as u32), line);
        Ok(())
    }

    /// `[ field is expr, ... ]` as a `(field, value)` pair list, same
    /// shape `ra_fields` builds for `insert`/`update`'s field list, used
    /// by `update`/`delete`'s own key lookup (not a join step's key
    /// closure, since these evaluate in the enclosing scope directly).
    fn compile_keys(&mut self, keys: &[KeyBind], line: u32) -> Result<(), CompileError> {
        for k in keys {
            self.push_str(&k.field, line);
            self.compile_expr(&k.expr)?;
        }
        self.emit(Instr::RaFields(keys.len() as u32), line);
        Ok(())
    }

    fn compile_schema(
        &mut self,
        name: &ArcStr,
        parent: &Option<ArcStr>,
        fields: &[FieldDecl],
        indices: &[Vec<ArcStr>],
        line: u32,
    ) -> Result<(), CompileError> {
        self.push_str(name, line);
        match parent {
            Some(p) => self.push_str(p, line),
            None => {
                self.emit(Instr::Push(Value::Nil), line);
            }
        }
        self.emit(Instr::Push(Value::Integer(fields.len() as i64)), line);
        for field in fields {
            match field {
                FieldDecl::Value { name } => {
                    self.push_str("value", line);
                    self.push_str(name, line);
                    self.emit(Instr::Push(Value::Nil), line);
                }
                FieldDecl::Constant { name, value } => {
                    self.push_str("constant", line);
                    self.push_str(name, line);
                    self.compile_expr(value)?;
                }
                FieldDecl::Computed { name, depends_on, body } => {
                    self.push_str("computed", line);
                    self.push_str(name, line);
                    let instance_param = ArcStr::from("__self");
                    let wrapped = wrap_computed_body(body.source.clone(), body.span.line, &instance_param, depends_on, body);
                    self.emit_closure(None, vec![instance_param], false, Some(0), &wrapped, line)?;
                }
            }
        }
        self.emit(Instr::Push(Value::Integer(indices.len() as i64)), line);
        for idx_fields in indices {
            for f in idx_fields {
                self.push_str(f, line);
            }
            self.emit(Instr::List(idx_fields.len() as u32), line);
        }
        // name, parent, field_count, (tag,name,body)*field_count,
        // index_count, (field name list)*index_count -- the store reads
        // this flat run back out in that exact order.
        let n = 4 + fields.len() as u32 * 3 + indices.len() as u32;
        self.emit(Instr::List(n), line);
        self.emit(Instr::ConstCall(ArcStr::from("__define_schema"), 1), line);
        Ok(())
    }

    /// `exists step [, step]* then T [else E] end`: every step must match
    /// (short-circuiting on the first that doesn't) for `T` to run, each
    /// step's bindings visible to the ones after it and to `T`. `E` is
    /// compiled once per step as its failure branch, rather than shared
    /// across steps, since each step closes over a different, differently
    /// deep nest of bound aliases by the time its check fails.
    fn compile_exists_chain(
        &mut self,
        steps: &[JoinStep],
        idx: usize,
        prior: Vec<ArcStr>,
        then_branch: &Node,
        else_branch: Option<&Node>,
        source: &ArcStr,
        line: u32,
    ) -> Result<(), CompileError> {
        if idx == steps.len() {
            return self.compile_expr(then_branch);
        }
        let step = &steps[idx];
        self.compile_join_step_descriptor(step, &prior, source, line)?;
        self.emit(Instr::ConstCall(ArcStr::from("__exists_lookup"), 1), line);

        let enter_idx = self.emit(Instr::Enter(0), line);
        self.current().push_scope();
        let synth = self.current().declare_local(ArcStr::from("#exists_result"));
        self.emit(Instr::Var(synth), line);
        self.emit(Instr::Local(synth), line);
        let if_idx = self.emit(Instr::If(0, 0), line);
        let then_target = self.current().len();
        {
            let enter2 = self.emit(Instr::Enter(0), line);
            self.current().push_scope();
            let mut next_prior = prior.clone();
            for (i, b) in step.binds.iter().enumerate() {
                self.emit(Instr::Local(synth), line);
                self.emit(Instr::Push(Value::Integer(i as i64)), line);
                self.emit(Instr::ConstCall(ArcStr::from("get"), 2), line);
                let slot = self.current().declare_local(b.alias.clone());
                self.emit(Instr::Var(slot), line);
                next_prior.push(b.alias.clone());
            }
            self.compile_exists_chain(steps, idx + 1, next_prior, then_branch, else_branch, source, line)?;
            let n2 = self.current().pop_scope();
            self.current().set_instr(enter2, Instr::Enter(n2));
            self.emit(Instr::Exit(n2), line);
        }
        let jump_idx = self.emit(Instr::Jump(0), line);
        let else_target = self.current().len();
        match else_branch {
            Some(e) => self.compile_expr(e)?,
            None => {
                self.emit(Instr::Push(Value::Nil), line);
            }
        }
        let end = self.current().len();
        self.current().set_instr(if_idx, Instr::If(then_target, else_target));
        self.current().set_instr(jump_idx, Instr::Jump(end));

        let n = self.current().pop_scope();
        self.current().set_instr(enter_idx, Instr::Enter(n));
        self.emit(Instr::Exit(n), line);
        Ok(())
    }

    /// A `when` chain's callback receives every bound alias from every
    /// non-negated step, in step order, flattened -- exactly the order
    /// `bound_so_far` accumulates in below, which is also the argument
    /// order the store must call each later step's key closure with and
    /// the final callback with, since both sides derive it the same way.
    fn compile_when(&mut self, steps: &[JoinStep], body: &Node, source: &ArcStr, line: u32) -> Result<(), CompileError> {
        let mut bound_so_far: Vec<ArcStr> = Vec::new();
        for step in steps {
            self.compile_join_step_descriptor(step, &bound_so_far, source, line)?;
            if !step.negated {
                for b in &step.binds {
                    bound_so_far.push(b.alias.clone());
                }
            }
        }
        self.emit(Instr::List(steps.len() as u32), line);
        self.emit_closure(None, bound_so_far, false, None, body, line)?;
        self.emit(Instr::ConstCall(ArcStr::from("__when_register"), 2), line);
        Ok(())
    }

    /// A join step's runtime descriptor: `[schema, negated, created_only,
    /// key_fields, key_closure_or_nil, binds]`. `key_closure` takes
    /// `prior` (every alias bound by earlier steps in the same chain, in
    /// order) and returns a list of key values in `key_fields` order; a
    /// step with no keys is a broad head and carries `nil` instead.
    /// `binds` is a flat `(alias, field)*` list.
    fn compile_join_step_descriptor(&mut self, step: &JoinStep, prior: &[ArcStr], source: &ArcStr, line: u32) -> Result<(), CompileError> {
        self.push_str(&step.schema, line);
        self.emit(Instr::Push(Value::Integer(step.negated as i64)), line);
        self.emit(Instr::Push(Value::Integer(step.created_only as i64)), line);
        for k in &step.keys {
            self.push_str(&k.field, line);
        }
        self.emit(Instr::List(step.keys.len() as u32), line);
        if step.keys.is_empty() {
            self.emit(Instr::Push(Value::Nil), line);
        } else {
            let exprs: Vec<Node> = step.keys.iter().map(|k| (*k.expr).clone()).collect();
            let list_node = Node::new(source.clone(), line, Expr::ListLit(exprs));
            self.emit_closure(None, prior.to_vec(), false, None, &list_node, line)?;
        }
        for b in &step.binds {
            self.push_str(&b.alias, line);
            self.push_str(&b.field, line);
        }
        self.emit(Instr::List(step.binds.len() as u32 * 2), line);
        self.emit(Instr::List(6), line);
        Ok(())
    }
}

fn wrap_computed_body(source: ArcStr, line: u32, instance_param: &ArcStr, depends_on: &[ArcStr], body: &Node) -> Node {
    let mut stmts = Vec::with_capacity(depends_on.len() + 1);
    for dep in depends_on {
        let receiver = Node::new(source.clone(), line, Expr::Ident(instance_param.clone()));
        let arg = Node::new(source.clone(), line, Expr::Str(vec![StrSeg::Literal(dep.clone())]));
        let get = Node::new(
            source.clone(),
            line,
            Expr::MethodCall { receiver: Box::new(receiver), name: ArcStr::from("__field_get"), args: vec![arg] },
        );
        stmts.push(Node::new(source.clone(), line, Expr::Var { name: dep.clone(), value: Box::new(get) }));
    }
    stmts.push(body.clone());
    Node::new(source, line, Expr::Block(stmts))
}
