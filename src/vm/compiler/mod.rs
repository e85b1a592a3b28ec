//! AST → ByteCode 컴파일러
//!
//! 한 번의 순회로 이름 해석, 타입 검사, 코드 생성을 함께 한다.
//! 중첩 함수는 `FunctionState` 스택으로 표현하고, upvalue 해석은 이 스택을
//! 바깥쪽으로 재귀 탐색한다. 첫 오류에서 컴파일을 멈춘다.

mod class;
mod expr;
mod scope;

#[cfg(test)]
mod tests;

use std::rc::Rc;
use std::sync::Arc;

use strum::Display;
use thiserror::Error;
use tracing::debug;

use super::bytecode::{ByteCode, Constant, FunctionFlags, OpCode, Span, VarFlags};
use crate::ast::{Expr, ExprS, FunctionDecl, Stmt, StmtS};
use crate::natives::NativeRegistry;
use crate::types::{ClassRef, FnSig, Type, can_be_mismatched};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CompileErrorKind {
    Scope,
    Type,
    ArgumentCount,
    Structure,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub span: Span,
}

pub type CompileResult<T> = Result<T, CompileError>;

fn error<T>(kind: CompileErrorKind, message: impl Into<String>, span: &Span) -> CompileResult<T> {
    Err(CompileError {
        kind,
        message: message.into(),
        span: span.clone(),
    })
}

// ========== 컴파일 상태 ==========

#[derive(Debug, Clone)]
struct Local {
    name: String,
    ty: Type,
    depth: usize,
    /// stack index relative to the frame base
    slot: usize,
    constant: bool,
}

#[derive(Debug, Clone)]
struct UpvalueInfo {
    index: usize,
    is_local: bool,
    name: String,
    ty: Type,
    constant: bool,
}

/// Loop context for tracking break/continue jumps
#[derive(Debug, Clone)]
struct LoopContext {
    /// locals deeper than this belong to the loop body
    depth: usize,
    continue_target: usize,
    /// Positions of break jumps to be patched to loop end
    break_jumps: Vec<usize>,
}

#[derive(Debug, Clone)]
struct ClassContext {
    class: ClassRef,
    is_static: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FunctionKind {
    #[default]
    Script,
    Function,
    Method,
    Constructor,
}

#[derive(Debug, Default)]
struct FunctionState {
    bytecode: ByteCode,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: usize,
    /// values on the stack above the frame base, slot 0 included
    height: usize,
    loops: Vec<LoopContext>,
    generics: Vec<String>,
    class: Option<ClassContext>,
    ret: Option<Type>,
}

impl FunctionState {
    fn new(bytecode: ByteCode, kind: FunctionKind) -> Self {
        Self {
            bytecode,
            kind,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct GlobalInfo {
    ty: Type,
    constant: bool,
}

pub struct Compiler {
    natives: Arc<NativeRegistry>,
    current: FunctionState,
    enclosing: Vec<FunctionState>,
    globals: indexmap::IndexMap<String, GlobalInfo>,
    hoisted: indexmap::IndexMap<String, ClassRef>,
    source_id: String,
}

/// 스크립트 하나를 기본 native 테이블로 컴파일한다.
pub fn compile_program(source_id: &str, statements: &[StmtS]) -> CompileResult<ByteCode> {
    let natives = Arc::new(NativeRegistry::with_builtins());
    Compiler::new(natives).compile(&FnSig::simple(vec![], Type::ANY), source_id, None, statements)
}

impl Compiler {
    pub fn new(natives: Arc<NativeRegistry>) -> Self {
        Self {
            natives,
            current: FunctionState::default(),
            enclosing: Vec::new(),
            globals: indexmap::IndexMap::new(),
            hoisted: indexmap::IndexMap::new(),
            source_id: String::new(),
        }
    }

    /// Compiles a top-level unit. `signature` supplies parameters visible as
    /// locals; `class` makes slot 0 `this` of that class.
    pub fn compile(
        &mut self,
        signature: &FnSig,
        source_id: &str,
        class: Option<ClassRef>,
        statements: &[StmtS],
    ) -> CompileResult<ByteCode> {
        debug!(source = source_id, statements = statements.len(), "compiling unit");
        self.source_id = source_id.to_string();
        let mut bytecode = ByteCode::new("<script>", source_id);
        bytecode.arity = signature.required();
        bytecode.total_arity = signature.params.len();
        bytecode.params = signature.params.iter().map(|p| p.name.clone()).collect();

        let mut state = FunctionState::new(bytecode, FunctionKind::Script);
        let this_ty = match &class {
            Some(c) => Type::Instance {
                class: c.clone(),
                generics: vec![],
            },
            None => Type::ANY,
        };
        state.locals.push(Local {
            name: if class.is_some() { "this" } else { "" }.to_string(),
            ty: this_ty,
            depth: 0,
            slot: 0,
            constant: true,
        });
        state.height = 1;
        state.class = class.map(|class| ClassContext {
            class,
            is_static: false,
        });
        self.current = state;
        self.enclosing.clear();

        for p in &signature.params {
            let slot = self.current.height;
            self.current.locals.push(Local {
                name: p.name.clone(),
                ty: p.ty.clone(),
                depth: 0,
                slot,
                constant: false,
            });
            self.current.height += 1;
        }

        self.hoist(statements)?;
        for stmt in statements {
            self.stmt(stmt)?;
        }
        let end = statements.last().map(|s| s.1.end..s.1.end).unwrap_or(0..0);
        self.emit(OpCode::Null, &[], &end);
        self.emit(OpCode::Return, &[], &end);

        let mut bytecode = std::mem::take(&mut self.current).bytecode;
        bytecode.chunk.finalize();
        debug!(
            source = source_id,
            words = bytecode.chunk.code.len(),
            constants = bytecode.chunk.constants.len(),
            "compiled unit"
        );
        Ok(bytecode)
    }

    // ========== 코드 생성 헬퍼 ==========

    fn stack_effect(&self, op: OpCode, operands: &[u32]) -> isize {
        use OpCode::*;
        let w = |i: usize| operands.get(i).copied().unwrap_or(0) as isize;
        match op {
            Constant | Null | True | False | Dup | GetLocal | GetUpvalue | GetGlobal
            | RefLocal | RefUpvalue | RefGlobal | FlushLoop | IterNext => 1,
            Pop | DefineGlobal | SetRef | Add | Sub | Mul | Div | Mod | Pow | Equal
            | NotEqual | Less | LessEqual | Greater | GreaterEqual | JumpIfFalse | JumpIfTrue
            | GetIndex | SetAttr | GetSuper | Return | Method | CollectLoop | ForCheck
            | ForStep => -1,
            SetIndex | BuildRange | Throw => -2,
            BuildList => 1 - w(0),
            BuildMap => 1 - 2 * w(0),
            Call | CallAsync => -(w(0) + 2 * w(1)),
            MakePattern => -2 * w(0),
            Class => 1 - w(1) - w(3),
            Closure => {
                let defaults = match self.current.bytecode.chunk.constants.get(w(0) as usize) {
                    Some(super::bytecode::Constant::Function(f)) => f.default_count() as isize,
                    _ => 0,
                };
                1 - defaults
            }
            Declare | SetLocal | SetUpvalue | SetGlobal | Deref | Negate | Not | Is | Jump
            | Loop | Spread | GetAttr | StartCache | IterPrep => 0,
        }
    }

    fn emit(&mut self, op: OpCode, operands: &[u32], span: &Span) -> usize {
        let effect = self.stack_effect(op, operands);
        self.current.height = (self.current.height as isize + effect).max(0) as usize;
        self.current.bytecode.chunk.write(op, operands, span.clone())
    }

    /// Emits a forward jump and returns the placeholder index.
    fn emit_jump(&mut self, op: OpCode, span: &Span) -> usize {
        self.emit(op, &[0], span) + 1
    }

    fn patch_jump(&mut self, placeholder: usize) {
        self.current.bytecode.chunk.patch_jump(placeholder);
    }

    fn emit_loop(&mut self, target: usize, span: &Span) {
        let offset = self.current.bytecode.chunk.loop_offset(target);
        self.emit(OpCode::Loop, &[offset], span);
    }

    fn here(&self) -> usize {
        self.current.bytecode.chunk.code.len()
    }

    fn constant(&mut self, c: Constant) -> u32 {
        self.current.bytecode.chunk.add_constant(c)
    }

    fn name(&mut self, name: &str) -> u32 {
        self.current.bytecode.chunk.add_str(name)
    }

    fn set_height(&mut self, height: usize) {
        self.current.height = height;
    }

    // ========== 문장 ==========

    fn block(&mut self, body: &[StmtS]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn scoped_block(&mut self, body: &[StmtS], span: &Span) -> CompileResult<()> {
        self.begin_scope();
        self.block(body)?;
        self.end_scope(span);
        Ok(())
    }

    fn stmt(&mut self, stmt: &StmtS) -> CompileResult<()> {
        let span = &stmt.1;
        match &stmt.0 {
            Stmt::Expr(e) if is_loop(e) => {
                self.loop_expr(e, false)?;
            }
            Stmt::Expr(e) => {
                self.expr(e)?;
                self.emit(OpCode::Pop, &[], span);
            }
            Stmt::Let {
                name,
                ty,
                value,
                constant,
                range,
            } => self.let_stmt(name, ty.as_ref(), value.as_ref(), *constant, *range, span)?,
            Stmt::Function(decl) => self.function_stmt(decl, span)?,
            Stmt::Class(decl) => self.class_stmt(decl, span)?,
            Stmt::Enum(decl) => self.enum_stmt(decl, span)?,
            Stmt::Return(value) => self.return_stmt(value.as_ref(), span)?,
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                let mut end_jumps = Vec::new();
                self.expr(condition)?;
                let mut next = self.emit_jump(OpCode::JumpIfFalse, span);
                self.scoped_block(then_block, span)?;
                for (cond, block) in elif_blocks {
                    end_jumps.push(self.emit_jump(OpCode::Jump, span));
                    self.patch_jump(next);
                    self.expr(cond)?;
                    next = self.emit_jump(OpCode::JumpIfFalse, &cond.1);
                    self.scoped_block(block, span)?;
                }
                if let Some(block) = else_block {
                    end_jumps.push(self.emit_jump(OpCode::Jump, span));
                    self.patch_jump(next);
                    self.scoped_block(block, span)?;
                } else {
                    self.patch_jump(next);
                }
                for j in end_jumps {
                    self.patch_jump(j);
                }
            }
            Stmt::Block(body) => self.scoped_block(body, span)?,
            Stmt::Match {
                subject,
                arms,
                default,
            } => self.match_stmt(subject, arms, default.as_deref(), span)?,
            Stmt::Throw { kind, message } => {
                let height = self.current.height;
                let k = self.name(kind);
                self.emit(OpCode::Constant, &[k], span);
                self.expr(message)?;
                self.emit(OpCode::Throw, &[], span);
                self.set_height(height);
            }
            Stmt::Break => self.break_stmt(span)?,
            Stmt::Continue => self.continue_stmt(span)?,
        }
        Ok(())
    }

    fn let_stmt(
        &mut self,
        name: &str,
        ty: Option<&crate::ast::TypeExpr>,
        value: Option<&ExprS>,
        constant: bool,
        range: Option<(f64, f64)>,
        span: &Span,
    ) -> CompileResult<()> {
        let declared = match ty {
            Some(t) => Some(self.resolve_type(t, &[], span)?),
            None => None,
        };
        let value_ty = match value {
            Some(e) => self.expr(e)?,
            None if constant => {
                return error(
                    CompileErrorKind::Structure,
                    format!("constant `{}` needs a value", name),
                    span,
                );
            }
            None => {
                self.emit(OpCode::Null, &[], span);
                Type::VOID
            }
        };
        if let Some(d) = &declared
            && !can_be_mismatched(d, &value_ty)
        {
            return error(
                CompileErrorKind::Type,
                format!("cannot assign {} to `{}` of type {}", value_ty, name, d),
                span,
            );
        }
        let ty = match declared {
            Some(d) => d,
            None if value_ty == Type::VOID => Type::ANY,
            None => value_ty,
        };
        let mut flags = VarFlags::empty();
        if constant {
            flags |= VarFlags::CONSTANT;
        }
        let mut bounds = [0, 0];
        if let Some((min, max)) = range {
            if !(ty.is_numeric() || ty.is_dynamic()) {
                return error(
                    CompileErrorKind::Type,
                    format!("range constraint on non-numeric `{}` of type {}", name, ty),
                    span,
                );
            }
            if min > max {
                return error(
                    CompileErrorKind::Structure,
                    format!("empty range {}..{} on `{}`", min, max, name),
                    span,
                );
            }
            flags |= VarFlags::RANGED;
            bounds = [
                self.constant(Constant::Number(min)),
                self.constant(Constant::Number(max)),
            ];
        }
        self.define_variable(name, ty, flags, bounds, span)
    }

    /// Binds TOS to `name`: a global at script depth 0, a local elsewhere.
    fn define_variable(
        &mut self,
        name: &str,
        ty: Type,
        flags: VarFlags,
        bounds: [u32; 2],
        span: &Span,
    ) -> CompileResult<()> {
        let constant = flags.contains(VarFlags::CONSTANT);
        if self.is_global_scope() {
            let n = self.name(name);
            self.emit(
                OpCode::DefineGlobal,
                &[n, flags.bits(), bounds[0], bounds[1]],
                span,
            );
            self.globals
                .insert(name.to_string(), GlobalInfo { ty, constant });
            return Ok(());
        }
        self.emit(OpCode::Declare, &[flags.bits(), bounds[0], bounds[1]], span);
        self.add_local(name, ty, constant, span)
    }

    fn function_stmt(&mut self, decl: &FunctionDecl, span: &Span) -> CompileResult<()> {
        if self.is_global_scope() {
            let ty = self.decorated_function(decl, FunctionKind::Function, span)?;
            let n = self.name(&decl.name);
            self.emit(OpCode::DefineGlobal, &[n, 0, 0, 0], span);
            self.globals.insert(
                decl.name.clone(),
                GlobalInfo {
                    ty,
                    constant: false,
                },
            );
            return Ok(());
        }
        // 재귀 호출이 자기 자신을 캡처할 수 있도록 슬롯을 먼저 만든다
        let extra = decl.generics.clone();
        let sig = self.signature(decl, &extra, span)?;
        self.emit(OpCode::Null, &[], span);
        self.emit(OpCode::Declare, &[0, 0, 0], span);
        self.add_local(&decl.name, Type::Function(Rc::new(sig)), false, span)?;
        let slot = self.current.height - 1;
        self.decorated_function(decl, FunctionKind::Function, span)?;
        self.emit(OpCode::SetLocal, &[slot as u32], span);
        self.emit(OpCode::Pop, &[], span);
        Ok(())
    }

    /// Compiles `decl` wrapped by its decorators; leaves the value on the stack.
    fn decorated_function(
        &mut self,
        decl: &FunctionDecl,
        kind: FunctionKind,
        span: &Span,
    ) -> CompileResult<Type> {
        let mut decorators = Vec::with_capacity(decl.decorators.len());
        for d in &decl.decorators {
            decorators.push((self.expr(d)?, d.1.clone()));
        }
        let class = self.current.class.clone();
        let sig = self.function(decl, kind, class, span)?;
        let fn_ty = Type::Function(sig);
        let mut ty = fn_ty.clone();
        for (dec_ty, dec_span) in decorators.into_iter().rev() {
            let result = self.check_call(&dec_ty, &[ty], false, &dec_span)?;
            if !(result == fn_ty || result.is_dynamic()) {
                return error(
                    CompileErrorKind::Type,
                    format!("decorator returns {} but `{}` is {}", result, decl.name, fn_ty),
                    &dec_span,
                );
            }
            self.emit(OpCode::Call, &[1, 0], &dec_span);
            ty = fn_ty.clone();
        }
        Ok(ty)
    }

    /// Compiles a nested function and emits its `Closure`. Default argument
    /// expressions run in the enclosing scope, right before the closure.
    fn function(
        &mut self,
        decl: &FunctionDecl,
        kind: FunctionKind,
        class: Option<ClassContext>,
        span: &Span,
    ) -> CompileResult<Rc<FnSig>> {
        let mut generics = decl.generics.clone();
        if let Some(ctx) = &class {
            generics.extend(ctx.class.borrow().generics.iter().cloned());
        }
        let sig = Rc::new(self.signature(decl, &generics, span)?);
        if let Some(ix) = decl.params.iter().position(|p| p.default.is_some())
            && decl.params[ix..].iter().any(|p| p.default.is_none())
        {
            return error(
                CompileErrorKind::Structure,
                format!("required parameter after a default in `{}`", decl.name),
                span,
            );
        }

        let name = if decl.name.is_empty() { "<lambda>" } else { decl.name.as_str() };
        debug!(function = name, kind = ?kind, "compiling function");
        let mut bytecode = ByteCode::new(name, self.source_id.clone());
        bytecode.arity = sig.required();
        bytecode.total_arity = sig.params.len();
        bytecode.params = decl.params.iter().map(|p| p.name.clone()).collect();
        let mut flags = FunctionFlags::empty();
        flags.set(FunctionFlags::ASYNC, decl.modifiers.is_async);
        flags.set(FunctionFlags::CATCHER, decl.modifiers.catcher);
        flags.set(FunctionFlags::MEMOIZE, decl.modifiers.memoize);
        flags.set(FunctionFlags::VARARGS, decl.varargs.is_some());
        flags.set(FunctionFlags::KWARGS, decl.kwargs.is_some());
        let is_member = matches!(kind, FunctionKind::Method | FunctionKind::Constructor);
        flags.set(FunctionFlags::METHOD, is_member);
        flags.set(
            FunctionFlags::STATIC,
            is_member && class.as_ref().is_some_and(|c| c.is_static),
        );
        bytecode.flags = flags;

        let mut state = FunctionState::new(bytecode, kind);
        state.generics = generics;
        state.ret = Some(sig.ret.clone());
        state.scope_depth = 1;
        let slot0 = match (&class, is_member) {
            (Some(ctx), true) if ctx.is_static => Local {
                name: "this".into(),
                ty: Type::Class(ctx.class.clone()),
                depth: 0,
                slot: 0,
                constant: true,
            },
            (Some(ctx), true) => Local {
                name: "this".into(),
                ty: Type::Instance {
                    class: ctx.class.clone(),
                    generics: ctx
                        .class
                        .borrow()
                        .generics
                        .iter()
                        .map(|g| Type::Generic(g.clone()))
                        .collect(),
                },
                depth: 0,
                slot: 0,
                constant: true,
            },
            _ => Local {
                name: String::new(),
                ty: Type::Function(sig.clone()),
                depth: 0,
                slot: 0,
                constant: true,
            },
        };
        state.locals.push(slot0);
        state.height = 1;
        state.class = class;

        let enclosing = std::mem::replace(&mut self.current, state);
        self.enclosing.push(enclosing);

        let result = self.function_body(decl, &sig, span);

        let enclosing = self.enclosing.pop().unwrap_or_default();
        let finished = std::mem::replace(&mut self.current, enclosing);
        result?;

        let upvalues = finished.upvalues;
        let mut bytecode = finished.bytecode;
        bytecode.upvalue_count = upvalues.len();
        bytecode.chunk.finalize();
        debug!(
            function = %bytecode.name,
            words = bytecode.chunk.code.len(),
            upvalues = upvalues.len(),
            "compiled function"
        );

        for (param, p) in decl.params.iter().zip(&sig.params) {
            if let Some(default) = &param.default {
                let ty = self.expr(default)?;
                if !can_be_mismatched(&p.ty, &ty) {
                    return error(
                        CompileErrorKind::Type,
                        format!("default of `{}` is {}, expected {}", param.name, ty, p.ty),
                        &default.1,
                    );
                }
            }
        }
        let ix = self.constant(Constant::Function(Arc::new(bytecode)));
        let mut operands = vec![ix, upvalues.len() as u32];
        for up in &upvalues {
            operands.push(up.is_local as u32);
            operands.push(up.index as u32);
        }
        self.emit(OpCode::Closure, &operands, span);
        Ok(sig)
    }

    fn function_body(&mut self, decl: &FunctionDecl, sig: &FnSig, span: &Span) -> CompileResult<()> {
        // 인자 값은 호출 시 VM이 슬롯 1부터 채운다
        for (param, p) in decl.params.iter().zip(&sig.params) {
            self.current.height += 1;
            self.add_local(&param.name, p.ty.clone(), false, span)?;
        }
        if let Some(name) = &decl.varargs {
            self.current.height += 1;
            self.add_local(name, Type::LIST, false, span)?;
        }
        if let Some(name) = &decl.kwargs {
            self.current.height += 1;
            self.add_local(name, Type::MAP, false, span)?;
        }
        self.block(&decl.body)?;
        let end = decl.body.last().map(|s| s.1.end..s.1.end).unwrap_or(span.clone());
        self.emit(OpCode::Null, &[], &end);
        self.emit(OpCode::Return, &[], &end);
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&ExprS>, span: &Span) -> CompileResult<()> {
        let height = self.current.height;
        match value {
            Some(e) => {
                if self.current.kind == FunctionKind::Constructor {
                    return error(
                        CompileErrorKind::Structure,
                        "a constructor cannot return a value",
                        span,
                    );
                }
                let ty = self.expr(e)?;
                if let Some(ret) = &self.current.ret
                    && !can_be_mismatched(ret, &ty)
                {
                    return error(
                        CompileErrorKind::Type,
                        format!("returning {} from a function declared to return {}", ty, ret),
                        span,
                    );
                }
            }
            None => {
                self.emit(OpCode::Null, &[], span);
            }
        }
        self.emit(OpCode::Return, &[], span);
        self.set_height(height);
        Ok(())
    }

    fn break_stmt(&mut self, span: &Span) -> CompileResult<()> {
        let Some(depth) = self.current.loops.last().map(|l| l.depth) else {
            return error(CompileErrorKind::Structure, "`break` outside of a loop", span);
        };
        let height = self.current.height;
        self.pop_locals_above(depth, span);
        let jump = self.emit_jump(OpCode::Jump, span);
        if let Some(ctx) = self.current.loops.last_mut() {
            ctx.break_jumps.push(jump);
        }
        self.set_height(height);
        Ok(())
    }

    fn continue_stmt(&mut self, span: &Span) -> CompileResult<()> {
        let Some((depth, target)) = self
            .current
            .loops
            .last()
            .map(|l| (l.depth, l.continue_target))
        else {
            return error(CompileErrorKind::Structure, "`continue` outside of a loop", span);
        };
        let height = self.current.height;
        self.pop_locals_above(depth, span);
        self.emit_loop(target, span);
        self.set_height(height);
        Ok(())
    }

    fn match_stmt(
        &mut self,
        subject: &ExprS,
        arms: &[crate::ast::MatchArm],
        default: Option<&[StmtS]>,
        span: &Span,
    ) -> CompileResult<()> {
        self.begin_scope();
        self.expr(subject)?;
        self.emit(OpCode::Declare, &[0, 0, 0], span);
        self.add_local(" match", Type::ANY, true, span)?;
        let subject_slot = self.current.height - 1;
        let mut end_jumps = Vec::new();
        for arm in arms {
            let height = self.current.height;
            self.emit(OpCode::GetLocal, &[subject_slot as u32], span);
            let binds = self.pattern(&arm.pattern, span)?;
            self.emit(OpCode::Equal, &[], span);
            let next = self.emit_jump(OpCode::JumpIfFalse, span);

            // 성공 시 바인딩 셀이 스택에 남아 있다
            self.begin_scope();
            for (name, ty) in binds {
                self.current.height += 1;
                self.add_local(&name, ty, false, span)?;
            }
            self.block(&arm.body)?;
            self.end_scope(span);
            end_jumps.push(self.emit_jump(OpCode::Jump, span));
            self.patch_jump(next);
            self.set_height(height);
        }
        if let Some(body) = default {
            self.scoped_block(body, span)?;
        }
        for j in end_jumps {
            self.patch_jump(j);
        }
        self.end_scope(span);
        Ok(())
    }
}

fn is_loop(e: &ExprS) -> bool {
    matches!(e.0, Expr::While { .. } | Expr::For { .. } | Expr::Iter { .. })
}
