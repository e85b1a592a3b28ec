//! 클래스/열거형 선언, 호이스팅, 패턴

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use super::{
    ClassContext, CompileErrorKind, CompileResult, Compiler, FunctionKind, GlobalInfo, error,
};
use crate::ast::{
    ClassDecl, EnumDecl, Expr, FnModifiers, FunctionDecl, Literal, Param, Pattern, Stmt, StmtS,
};
use crate::types::{ClassRef, ClassType, EnumType, FieldType, MethodType, Type};
use crate::vm::bytecode::{
    Constant, EnumDef, MemberFlags, OpCode, Span, VarFlags, VariantDef,
};

/// Type of a field initializer that can be read off the literal.
fn literal_type(default: Option<&crate::ast::ExprS>) -> Type {
    match default.map(|d| &d.0) {
        Some(Expr::Literal(Literal::Int(_))) => Type::INT,
        Some(Expr::Literal(Literal::Float(_))) => Type::DOUBLE,
        Some(Expr::Literal(Literal::Str(_))) => Type::STR,
        Some(Expr::Literal(Literal::Bool(_))) => Type::BOOL,
        Some(Expr::List(_)) => Type::LIST,
        Some(Expr::Map(_)) => Type::MAP,
        _ => Type::ANY,
    }
}

impl Compiler {
    // ========== 호이스팅 ==========

    /// Registers top-level classes, enums and functions so they can be named
    /// before their definition. Classes are filled parent-first.
    pub(super) fn hoist(&mut self, statements: &[StmtS]) -> CompileResult<()> {
        if !self.is_global_scope() {
            return Ok(());
        }
        let mut classes = Vec::new();
        for (stmt, span) in statements {
            match stmt {
                Stmt::Class(decl) => {
                    let class = Rc::new(RefCell::new(ClassType::new(
                        decl.name.clone(),
                        decl.generics.clone(),
                    )));
                    self.hoisted.insert(decl.name.clone(), class.clone());
                    self.globals.insert(
                        decl.name.clone(),
                        GlobalInfo {
                            ty: Type::Class(class),
                            constant: true,
                        },
                    );
                    classes.push((decl, span));
                }
                Stmt::Enum(decl) => {
                    let ty = self.enum_type(decl, span)?;
                    self.globals.insert(
                        decl.name.clone(),
                        GlobalInfo {
                            ty: Type::Enum(Rc::new(ty)),
                            constant: true,
                        },
                    );
                }
                _ => {}
            }
        }

        let mut done = HashSet::new();
        for (decl, span) in &classes {
            let mut visiting = Vec::new();
            self.fill_hoisted(decl, &classes, &mut done, &mut visiting, span)?;
        }

        for (stmt, span) in statements {
            if let Stmt::Function(decl) = stmt {
                let sig = self.signature(decl, &decl.generics, span)?;
                self.globals.insert(
                    decl.name.clone(),
                    GlobalInfo {
                        ty: Type::Function(Rc::new(sig)),
                        constant: false,
                    },
                );
            }
        }
        Ok(())
    }

    fn fill_hoisted(
        &mut self,
        decl: &ClassDecl,
        all: &[(&ClassDecl, &Span)],
        done: &mut HashSet<String>,
        visiting: &mut Vec<String>,
        span: &Span,
    ) -> CompileResult<()> {
        if done.contains(&decl.name) {
            return Ok(());
        }
        if visiting.contains(&decl.name) {
            return error(
                CompileErrorKind::Structure,
                format!("class `{}` inherits from itself", decl.name),
                span,
            );
        }
        visiting.push(decl.name.clone());
        if let Some(parent) = &decl.parent
            && let Some((pdecl, pspan)) = all.iter().find(|(d, _)| d.name == *parent)
        {
            self.fill_hoisted(pdecl, all, done, visiting, pspan)?;
        }
        let Some(class) = self.hoisted.get(&decl.name).cloned() else {
            return Ok(());
        };
        self.fill_class_type(decl, &class, span)?;
        visiting.pop();
        done.insert(decl.name.clone());
        Ok(())
    }

    /// Fills the compile-time class table from its declaration. The parent's
    /// members come first so own declarations override them in place.
    fn fill_class_type(&mut self, decl: &ClassDecl, class: &ClassRef, span: &Span) -> CompileResult<()> {
        if let Some(parent_name) = &decl.parent {
            let parent = match self.lookup_type_name(parent_name) {
                Some(Type::Class(p)) => p,
                _ => {
                    return error(
                        CompileErrorKind::Scope,
                        format!("unknown parent class `{}`", parent_name),
                        span,
                    );
                }
            };
            class.borrow_mut().inherit(&parent);
        }

        let generics = decl.generics.clone();
        let mut fields = Vec::with_capacity(decl.fields.len());
        for f in &decl.fields {
            let ty = match &f.ty {
                Some(t) => self.resolve_type(t, &generics, span)?,
                None => literal_type(f.default.as_ref()),
            };
            fields.push((
                f.name.clone(),
                FieldType {
                    ty,
                    private: f.private,
                    is_static: f.is_static,
                    default: f.default.clone(),
                },
            ));
        }
        let mut methods = Vec::with_capacity(decl.methods.len());
        for m in &decl.methods {
            let mut g = generics.clone();
            g.extend(m.func.generics.iter().cloned());
            let sig = Rc::new(self.signature(&m.func, &g, span)?);
            methods.push((m, sig));
        }

        let mut c = class.borrow_mut();
        for (name, field) in fields {
            c.fields.insert(name, field);
        }
        c.constructor = None;
        for (m, sig) in methods {
            if m.func.name == "init" {
                c.constructor = Some(sig);
            } else if m.operator {
                c.operators.insert(m.func.name.clone(), sig);
            } else {
                c.methods.insert(
                    m.func.name.clone(),
                    MethodType {
                        sig,
                        private: m.private,
                        is_static: m.is_static,
                    },
                );
            }
        }
        if c.constructor.is_none() {
            let params = c
                .fields
                .iter()
                .filter(|(_, f)| !f.is_static)
                .map(|(name, f)| crate::types::ParamType {
                    name: name.clone(),
                    ty: f.ty.clone(),
                    has_default: true,
                })
                .collect();
            c.constructor = Some(Rc::new(crate::types::FnSig {
                params,
                ret: Type::VOID,
                varargs: false,
                kwargs: false,
                is_async: false,
                catcher: false,
            }));
        }
        Ok(())
    }

    // ========== 클래스 ==========

    pub(super) fn class_stmt(&mut self, decl: &ClassDecl, span: &Span) -> CompileResult<()> {
        debug!(class = %decl.name, "compiling class");
        let class = match self.hoisted.get(&decl.name) {
            Some(c) if self.is_global_scope() => c.clone(),
            _ => {
                let class = Rc::new(RefCell::new(ClassType::new(
                    decl.name.clone(),
                    decl.generics.clone(),
                )));
                // 시그니처가 자기 클래스를 타입으로 쓸 수 있게 잠시 등록한다
                let shadowed = self.hoisted.insert(decl.name.clone(), class.clone());
                let filled = self.fill_class_type(decl, &class, span);
                match shadowed {
                    Some(prev) => self.hoisted.insert(decl.name.clone(), prev),
                    None => self.hoisted.shift_remove(&decl.name),
                };
                filled?;
                class
            }
        };
        let class_ty = Type::Class(class.clone());

        // 로컬 클래스는 메서드가 자기 클래스를 참조할 수 있도록 슬롯을 먼저 만든다
        let local_slot = if self.is_global_scope() {
            None
        } else {
            self.emit(OpCode::Null, &[], span);
            self.emit(OpCode::Declare, &[0, 0, 0], span);
            self.add_local(&decl.name, class_ty.clone(), true, span)?;
            Some(self.current.height - 1)
        };

        // 속성 값은 역순으로 쌓아 VM이 선언 순서대로 꺼내게 한다
        let mut attrs = Vec::with_capacity(decl.fields.len());
        for f in decl.fields.iter().rev() {
            match &f.default {
                Some(d) => {
                    let ty = self.expr(d)?;
                    let declared = class
                        .borrow()
                        .fields
                        .get(&f.name)
                        .map(|ft| ft.ty.clone())
                        .unwrap_or(Type::ANY);
                    if !crate::types::can_be_mismatched(&declared, &ty) {
                        return error(
                            CompileErrorKind::Type,
                            format!("field `{}` is {} but its default is {}", f.name, declared, ty),
                            &d.1,
                        );
                    }
                }
                None => {
                    self.emit(OpCode::Null, &[], span);
                }
            }
            let mut flags = MemberFlags::empty();
            flags.set(MemberFlags::PRIVATE, f.private);
            flags.set(MemberFlags::STATIC, f.is_static);
            attrs.push((f.name.as_str(), flags));
        }
        attrs.reverse();

        let has_parent = match &decl.parent {
            Some(parent) => {
                match self.load_variable(parent, span)? {
                    Type::Class(_) => {}
                    other => {
                        return error(
                            CompileErrorKind::Type,
                            format!("`{}` is {}, not a class", parent, other),
                            span,
                        );
                    }
                }
                1
            }
            None => 0,
        };

        let name = self.name(&decl.name);
        let mut operands = vec![
            name,
            attrs.len() as u32,
            decl.generics.len() as u32,
            has_parent,
        ];
        for (attr, flags) in &attrs {
            operands.push(self.name(attr));
            operands.push(flags.bits());
        }
        for g in &decl.generics {
            operands.push(self.name(g));
        }
        self.emit(OpCode::Class, &operands, span);

        let mut has_init = false;
        for m in &decl.methods {
            let ctx = ClassContext {
                class: class.clone(),
                is_static: m.is_static,
            };
            let is_init = m.func.name == "init";
            has_init |= is_init;
            let kind = if is_init {
                FunctionKind::Constructor
            } else {
                FunctionKind::Method
            };
            self.function(&m.func, kind, Some(ctx), span)?;
            let mut flags = MemberFlags::empty();
            flags.set(MemberFlags::PRIVATE, m.private);
            flags.set(MemberFlags::STATIC, m.is_static);
            flags.set(MemberFlags::OPERATOR, m.operator);
            flags.set(MemberFlags::CONSTRUCTOR, is_init);
            let n = self.name(&m.func.name);
            self.emit(OpCode::Method, &[n, flags.bits()], span);
        }
        if !has_init {
            self.implicit_constructor(&class, span)?;
        }

        match local_slot {
            Some(slot) => {
                self.emit(OpCode::SetLocal, &[slot as u32], span);
                self.emit(OpCode::Pop, &[], span);
            }
            None => {
                let n = self.name(&decl.name);
                self.emit(
                    OpCode::DefineGlobal,
                    &[n, VarFlags::CONSTANT.bits(), 0, 0],
                    span,
                );
                self.globals.insert(
                    decl.name.clone(),
                    GlobalInfo {
                        ty: class_ty,
                        constant: true,
                    },
                );
            }
        }
        Ok(())
    }

    /// `init` taking every instance field (parent fields first) with the
    /// field initializer, or null, as its default.
    fn implicit_constructor(&mut self, class: &ClassRef, span: &Span) -> CompileResult<()> {
        let fields: Vec<(String, FieldType)> = class
            .borrow()
            .fields
            .iter()
            .filter(|(_, f)| !f.is_static)
            .map(|(n, f)| (n.clone(), f.clone()))
            .collect();
        let mut params = Vec::with_capacity(fields.len());
        let mut body = Vec::with_capacity(fields.len());
        for (name, field) in &fields {
            params.push(Param {
                name: name.clone(),
                ty: None,
                default: Some(
                    field
                        .default
                        .clone()
                        .unwrap_or((Expr::Literal(Literal::Null), span.clone())),
                ),
            });
            let target = (
                Expr::Attribute {
                    object: Box::new((Expr::This, span.clone())),
                    name: name.clone(),
                },
                span.clone(),
            );
            let value = (Expr::Variable(name.clone()), span.clone());
            body.push((
                Stmt::Expr((
                    Expr::Assign {
                        target: Box::new(target),
                        op: None,
                        value: Box::new(value),
                    },
                    span.clone(),
                )),
                span.clone(),
            ));
        }
        let decl = FunctionDecl {
            name: "init".into(),
            generics: vec![],
            params,
            varargs: None,
            kwargs: None,
            ret: None,
            body,
            modifiers: FnModifiers::default(),
            decorators: vec![],
        };
        let ctx = ClassContext {
            class: class.clone(),
            is_static: false,
        };
        self.function(&decl, FunctionKind::Constructor, Some(ctx), span)?;
        let n = self.name("init");
        self.emit(OpCode::Method, &[n, MemberFlags::CONSTRUCTOR.bits()], span);
        Ok(())
    }

    // ========== 열거형 ==========

    fn enum_type(&self, decl: &EnumDecl, span: &Span) -> CompileResult<EnumType> {
        let mut variants: Vec<(String, Vec<String>)> = Vec::with_capacity(decl.variants.len());
        for v in &decl.variants {
            if variants.iter().any(|(n, _)| *n == v.name) {
                return error(
                    CompileErrorKind::Structure,
                    format!("duplicate variant `{}` in enum `{}`", v.name, decl.name),
                    span,
                );
            }
            variants.push((v.name.clone(), v.fields.clone()));
        }
        Ok(EnumType {
            name: decl.name.clone(),
            variants,
        })
    }

    pub(super) fn enum_stmt(&mut self, decl: &EnumDecl, span: &Span) -> CompileResult<()> {
        let ty = Rc::new(self.enum_type(decl, span)?);
        let def = EnumDef {
            name: decl.name.clone(),
            variants: decl
                .variants
                .iter()
                .map(|v| VariantDef {
                    name: v.name.clone(),
                    fields: v.fields.clone(),
                })
                .collect(),
        };
        let c = self.constant(Constant::Enum(Arc::new(def)));
        self.emit(OpCode::Constant, &[c], span);
        self.define_variable(&decl.name, Type::Enum(ty), VarFlags::CONSTANT, [0, 0], span)
    }

    // ========== 패턴 ==========

    /// Pushes the pattern operand for a `match` arm and returns the names
    /// the arm binds on success.
    pub(super) fn pattern(&mut self, pattern: &Pattern, span: &Span) -> CompileResult<Vec<(String, Type)>> {
        match pattern {
            Pattern::Value(e) => {
                self.expr(e)?;
                Ok(vec![])
            }
            Pattern::Destructure {
                target,
                required,
                bind,
            } => {
                let target_ty = self.expr(target)?;
                let field_types = |name: &str| -> Option<Type> {
                    match target_ty.deref() {
                        t if t.is_dynamic() => Some(Type::ANY),
                        Type::EnumVariant { owner, index } => owner.variants[*index]
                            .1
                            .iter()
                            .any(|f| f == name)
                            .then_some(Type::ANY),
                        Type::EnumValue(_) => None,
                        Type::Class(class) => class
                            .borrow()
                            .fields
                            .get(name)
                            .filter(|f| !f.is_static)
                            .map(|f| f.ty.clone()),
                        _ => None,
                    }
                };
                if !matches!(
                    target_ty.deref(),
                    Type::EnumVariant { .. } | Type::EnumValue(_) | Type::Class(_)
                ) && !target_ty.is_dynamic()
                {
                    return error(
                        CompileErrorKind::Type,
                        format!("cannot destructure with {}", target_ty),
                        &target.1,
                    );
                }
                let mut binds = Vec::with_capacity(bind.len());
                for name in bind.iter().chain(required.iter().map(|(n, _)| n)) {
                    let Some(ty) = field_types(name) else {
                        return error(
                            CompileErrorKind::Scope,
                            format!("{} has no field `{}`", target_ty, name),
                            &target.1,
                        );
                    };
                    if binds.len() < bind.len() {
                        binds.push((name.clone(), ty));
                    }
                }
                for (name, value) in required {
                    let c = self.name(name);
                    self.emit(OpCode::Constant, &[c], &value.1);
                    self.expr(value)?;
                }
                let mut operands = vec![required.len() as u32, bind.len() as u32];
                for name in bind {
                    operands.push(self.name(name));
                }
                self.emit(OpCode::MakePattern, &operands, span);
                Ok(binds)
            }
        }
    }
}
