//! 스코프, 로컬/upvalue/전역 해석, 타입 표기 해석

use std::rc::Rc;

use super::{
    CompileErrorKind, CompileResult, Compiler, FunctionKind, FunctionState, GlobalInfo, Local,
    UpvalueInfo, error,
};
use crate::ast::{FunctionDecl, TypeExpr};
use crate::types::{FnSig, ParamType, Primitive, Type};
use crate::vm::bytecode::{ATTR_INTERNAL, ATTR_SWAPPED, OpCode, Span};

/// Where a name was found.
#[derive(Debug, Clone)]
pub(super) enum Resolved {
    Local { slot: usize, ty: Type, constant: bool },
    Upvalue { index: usize, ty: Type, constant: bool },
    Global { ty: Type, constant: bool },
    /// implicit `this.name` inside a class body
    Member { ty: Type },
}

impl Resolved {
    fn ty(&self) -> &Type {
        match self {
            Resolved::Local { ty, .. }
            | Resolved::Upvalue { ty, .. }
            | Resolved::Global { ty, .. }
            | Resolved::Member { ty } => ty,
        }
    }
}

impl Compiler {
    // ========== 스코프 ==========

    pub(super) fn begin_scope(&mut self) {
        self.current.scope_depth += 1;
    }

    pub(super) fn end_scope(&mut self, span: &Span) {
        self.current.scope_depth -= 1;
        let depth = self.current.scope_depth;
        self.pop_locals_above(depth, span);
        self.current.locals.retain(|l| l.depth <= depth);
    }

    /// Emits a `Pop` for every local declared deeper than `depth` without
    /// forgetting them (break/continue leave the scope only on one path).
    pub(super) fn pop_locals_above(&mut self, depth: usize, span: &Span) {
        let count = self
            .current
            .locals
            .iter()
            .filter(|l| l.depth > depth)
            .count();
        for _ in 0..count {
            self.emit(OpCode::Pop, &[], span);
        }
    }

    pub(super) fn is_global_scope(&self) -> bool {
        self.current.kind == FunctionKind::Script && self.current.scope_depth == 0
    }

    /// Registers the value on top of the stack as local `name`.
    pub(super) fn add_local(
        &mut self,
        name: &str,
        ty: Type,
        constant: bool,
        span: &Span,
    ) -> CompileResult<()> {
        let depth = self.current.scope_depth;
        if self
            .current
            .locals
            .iter()
            .any(|l| l.depth == depth && l.name == name)
        {
            return error(
                CompileErrorKind::Scope,
                format!("`{}` is already declared in this scope", name),
                span,
            );
        }
        let slot = self.current.height.saturating_sub(1);
        self.current.locals.push(Local {
            name: name.to_string(),
            ty,
            depth,
            slot,
            constant,
        });
        Ok(())
    }

    // ========== 이름 해석 ==========

    fn state_at(&self, level: usize) -> &FunctionState {
        if level == self.enclosing.len() {
            &self.current
        } else {
            &self.enclosing[level]
        }
    }

    fn state_at_mut(&mut self, level: usize) -> &mut FunctionState {
        if level == self.enclosing.len() {
            &mut self.current
        } else {
            &mut self.enclosing[level]
        }
    }

    fn find_local(state: &FunctionState, name: &str) -> Option<Local> {
        state.locals.iter().rev().find(|l| l.name == name).cloned()
    }

    fn add_upvalue(&mut self, level: usize, info: UpvalueInfo) -> usize {
        let state = self.state_at_mut(level);
        if let Some(ix) = state
            .upvalues
            .iter()
            .position(|u| u.index == info.index && u.is_local == info.is_local)
        {
            return ix;
        }
        state.upvalues.push(info);
        state.upvalues.len() - 1
    }

    /// Upvalue index of `name` in the function at `level`, capturing through
    /// every intermediate function.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<(usize, Type, bool)> {
        if level == 0 {
            return None;
        }
        if let Some(local) = Self::find_local(self.state_at(level - 1), name) {
            let ix = self.add_upvalue(
                level,
                UpvalueInfo {
                    index: local.slot,
                    is_local: true,
                    name: name.to_string(),
                    ty: local.ty.clone(),
                    constant: local.constant,
                },
            );
            return Some((ix, local.ty, local.constant));
        }
        let (outer, ty, constant) = self.resolve_upvalue(level - 1, name)?;
        let ix = self.add_upvalue(
            level,
            UpvalueInfo {
                index: outer,
                is_local: false,
                name: name.to_string(),
                ty: ty.clone(),
                constant,
            },
        );
        Some((ix, ty, constant))
    }

    pub(super) fn resolve(&mut self, name: &str) -> Option<Resolved> {
        if let Some(local) = Self::find_local(&self.current, name) {
            return Some(Resolved::Local {
                slot: local.slot,
                ty: local.ty,
                constant: local.constant,
            });
        }
        let level = self.enclosing.len();
        if let Some((index, ty, constant)) = self.resolve_upvalue(level, name) {
            return Some(Resolved::Upvalue {
                index,
                ty,
                constant,
            });
        }
        if let Some(global) = self.globals.get(name) {
            return Some(Resolved::Global {
                ty: global.ty.clone(),
                constant: global.constant,
            });
        }
        if let Some(ty) = self.natives.type_of(name) {
            return Some(Resolved::Global { ty, constant: true });
        }
        if name != "this"
            && let Some(ty) = self.implicit_member(name)
        {
            return Some(Resolved::Member { ty });
        }
        None
    }

    fn implicit_member(&mut self, name: &str) -> Option<Type> {
        let ctx = self.current.class.clone()?;
        let this = self.resolve("this")?;
        crate::types::access(this.ty(), name, true)
            .ok()
            .or_else(|| {
                // 인스턴스 메서드 안에서도 정적 멤버는 보인다
                if ctx.is_static {
                    return None;
                }
                crate::types::access(&Type::Class(ctx.class.clone()), name, true).ok()
            })
    }

    pub(super) fn load_variable(&mut self, name: &str, span: &Span) -> CompileResult<Type> {
        let Some(resolved) = self.resolve(name) else {
            return error(
                CompileErrorKind::Scope,
                format!("undefined variable `{}`", name),
                span,
            );
        };
        match &resolved {
            Resolved::Local { slot, .. } => {
                self.emit(OpCode::GetLocal, &[*slot as u32], span);
            }
            Resolved::Upvalue { index, .. } => {
                self.emit(OpCode::GetUpvalue, &[*index as u32], span);
            }
            Resolved::Global { .. } => {
                let n = self.name(name);
                self.emit(OpCode::GetGlobal, &[n], span);
            }
            Resolved::Member { .. } => {
                self.load_variable("this", span)?;
                let n = self.name(name);
                self.emit(OpCode::GetAttr, &[n, ATTR_INTERNAL], span);
            }
        }
        Ok(resolved.ty().clone())
    }

    /// Stores TOS into `name`, leaving the value on the stack. `value` is the
    /// type being stored.
    pub(super) fn store_variable(&mut self, name: &str, value: &Type, span: &Span) -> CompileResult<()> {
        let Some(resolved) = self.resolve(name) else {
            return error(
                CompileErrorKind::Scope,
                format!("undefined variable `{}`", name),
                span,
            );
        };
        let (ty, constant) = match &resolved {
            Resolved::Local { ty, constant, .. }
            | Resolved::Upvalue { ty, constant, .. }
            | Resolved::Global { ty, constant } => (ty.clone(), *constant),
            Resolved::Member { ty } => (ty.clone(), false),
        };
        if constant {
            return error(
                CompileErrorKind::Scope,
                format!("cannot assign to constant `{}`", name),
                span,
            );
        }
        if !crate::types::can_be_mismatched(&ty, value) {
            return error(
                CompileErrorKind::Type,
                format!("cannot assign {} to `{}` of type {}", value, name, ty),
                span,
            );
        }
        match resolved {
            Resolved::Local { slot, .. } => {
                self.emit(OpCode::SetLocal, &[slot as u32], span);
            }
            Resolved::Upvalue { index, .. } => {
                self.emit(OpCode::SetUpvalue, &[index as u32], span);
            }
            Resolved::Global { .. } => {
                let n = self.name(name);
                self.emit(OpCode::SetGlobal, &[n], span);
            }
            Resolved::Member { .. } => {
                // value 아래에 this를 올리지 않고 위에 얹는다 (swap 플래그)
                self.load_variable("this", span)?;
                let n = self.name(name);
                self.emit(OpCode::SetAttr, &[n, ATTR_INTERNAL | ATTR_SWAPPED], span);
            }
        }
        Ok(())
    }

    pub(super) fn reference(&mut self, name: &str, span: &Span) -> CompileResult<Type> {
        let Some(resolved) = self.resolve(name) else {
            return error(
                CompileErrorKind::Scope,
                format!("undefined variable `{}`", name),
                span,
            );
        };
        match &resolved {
            Resolved::Local { slot, .. } => {
                self.emit(OpCode::RefLocal, &[*slot as u32], span);
            }
            Resolved::Upvalue { index, .. } => {
                self.emit(OpCode::RefUpvalue, &[*index as u32], span);
            }
            Resolved::Global { .. } => {
                let n = self.name(name);
                self.emit(OpCode::RefGlobal, &[n], span);
            }
            Resolved::Member { .. } => {
                return error(
                    CompileErrorKind::Structure,
                    format!("cannot take a reference to member `{}`", name),
                    span,
                );
            }
        }
        Ok(Type::Reference(Box::new(resolved.ty().clone())))
    }

    // ========== 타입 해석 ==========

    fn in_generics(&self, name: &str, extra: &[String]) -> bool {
        if extra.iter().any(|g| g == name) {
            return true;
        }
        let states = self.enclosing.iter().chain(std::iter::once(&self.current));
        for state in states {
            if state.generics.iter().any(|g| g == name) {
                return true;
            }
            if let Some(ctx) = &state.class
                && ctx.class.borrow().generics.iter().any(|g| g == name)
            {
                return true;
            }
        }
        false
    }

    /// Class or enum type bound to `name`, without emitting code.
    pub(super) fn lookup_type_name(&self, name: &str) -> Option<Type> {
        if let Some(class) = self.hoisted.get(name) {
            return Some(Type::Class(class.clone()));
        }
        let states = self
            .enclosing
            .iter()
            .chain(std::iter::once(&self.current))
            .rev();
        for state in states {
            if let Some(local) = state.locals.iter().rev().find(|l| l.name == name) {
                return Some(local.ty.clone());
            }
        }
        self.globals.get(name).map(|g: &GlobalInfo| g.ty.clone())
    }

    pub(super) fn resolve_type(
        &self,
        t: &TypeExpr,
        extra: &[String],
        span: &Span,
    ) -> CompileResult<Type> {
        match t {
            TypeExpr::Named(name, args) => {
                if let Ok(p) = name.parse::<Primitive>() {
                    return Ok(Type::Primitive(p));
                }
                if self.in_generics(name, extra) {
                    return Ok(Type::Generic(name.clone()));
                }
                match self.lookup_type_name(name) {
                    Some(Type::Class(class)) => {
                        let generics = args
                            .iter()
                            .map(|a| self.resolve_type(a, extra, span))
                            .collect::<CompileResult<Vec<_>>>()?;
                        Ok(Type::Instance { class, generics })
                    }
                    Some(Type::Enum(owner)) => Ok(Type::EnumValue(owner)),
                    _ => error(
                        CompileErrorKind::Scope,
                        format!("unknown type `{}`", name),
                        span,
                    ),
                }
            }
            TypeExpr::Function { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_type(p, extra, span))
                    .collect::<CompileResult<Vec<_>>>()?;
                let ret = self.resolve_type(ret, extra, span)?;
                Ok(Type::Function(Rc::new(FnSig::simple(params, ret))))
            }
            TypeExpr::Reference(inner) => Ok(Type::Reference(Box::new(
                self.resolve_type(inner, extra, span)?,
            ))),
        }
    }

    pub(super) fn signature(
        &self,
        decl: &FunctionDecl,
        generics: &[String],
        span: &Span,
    ) -> CompileResult<FnSig> {
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let ty = match &p.ty {
                Some(t) => self.resolve_type(t, generics, span)?,
                None => Type::ANY,
            };
            params.push(ParamType {
                name: p.name.clone(),
                ty,
                has_default: p.default.is_some(),
            });
        }
        let ret = match &decl.ret {
            Some(t) => self.resolve_type(t, generics, span)?,
            None => Type::ANY,
        };
        Ok(FnSig {
            params,
            ret,
            varargs: decl.varargs.is_some(),
            kwargs: decl.kwargs.is_some(),
            is_async: decl.modifiers.is_async,
            catcher: decl.modifiers.catcher,
        })
    }
}
