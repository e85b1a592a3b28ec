//! 식 컴파일: 연산자, 호출, 속성, 컬렉션, 루프 식, switch

use super::{CompileErrorKind, CompileResult, Compiler, FunctionKind, LoopContext, error};
use crate::ast::{Arg, BinaryOp, Expr, ExprS, Literal, Stmt, StmtS, SwitchCase, UnaryOp};
use crate::types::{self, AccessError, CallMismatch, Type};
use crate::vm::bytecode::{ATTR_INTERNAL, Constant, OpCode, Span};

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::Modulo => OpCode::Mod,
        BinaryOp::Power => OpCode::Pow,
        BinaryOp::Equal => OpCode::Equal,
        BinaryOp::NotEqual => OpCode::NotEqual,
        BinaryOp::Less => OpCode::Less,
        BinaryOp::LessEqual => OpCode::LessEqual,
        BinaryOp::Greater => OpCode::Greater,
        // And/Or는 점프로 컴파일되므로 여기 오지 않는다
        BinaryOp::GreaterEqual | BinaryOp::And | BinaryOp::Or => OpCode::GreaterEqual,
    }
}

fn is_pure(e: &ExprS) -> bool {
    matches!(e.0, Expr::Variable(_) | Expr::Literal(_) | Expr::This)
}

impl Compiler {
    pub(super) fn expr(&mut self, e: &ExprS) -> CompileResult<Type> {
        let span = &e.1;
        match &e.0 {
            Expr::Literal(lit) => Ok(self.literal(lit, span)),
            Expr::Variable(name) => self.load_variable(name, span),
            Expr::This => {
                if self.current.class.is_none() {
                    return error(
                        CompileErrorKind::Scope,
                        "`this` outside of a class",
                        span,
                    );
                }
                self.load_variable("this", span)
            }
            Expr::Super(name) => self.super_access(name, span),
            Expr::Unary { op, expr } => {
                let ty = self.expr(expr)?;
                let Some(result) = types::unary(*op, &ty) else {
                    return error(
                        CompileErrorKind::Type,
                        format!("cannot negate {}", ty),
                        span,
                    );
                };
                let code = match op {
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Negate => OpCode::Negate,
                };
                self.emit(code, &[], span);
                Ok(result)
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, span),
            Expr::Assign { target, op, value } => self.assign(target, *op, value, span),
            Expr::Call { callee, args } => self.call(callee, args, span),
            Expr::Attribute { object, name } => {
                let internal = self.is_internal(object)?;
                let ty = self.expr(object)?;
                let result = self.member_type(&ty, name, internal, span)?;
                let n = self.name(name);
                let flags = if internal { ATTR_INTERNAL } else { 0 };
                self.emit(OpCode::GetAttr, &[n, flags], span);
                Ok(result)
            }
            Expr::Index { object, index } => {
                let ty = self.expr(object)?;
                let index_ty = self.expr(index)?;
                let result = self.index_type(&ty, &index_ty, span)?;
                self.emit(OpCode::GetIndex, &[], span);
                Ok(result)
            }
            Expr::Spread(_) => error(
                CompileErrorKind::Structure,
                "spread is only allowed in calls and list literals",
                span,
            ),
            Expr::List(items) => {
                for item in items {
                    if let Expr::Spread(inner) = &item.0 {
                        self.expr(inner)?;
                        self.emit(OpCode::Spread, &[], &item.1);
                    } else {
                        self.expr(item)?;
                    }
                }
                self.emit(OpCode::BuildList, &[items.len() as u32], span);
                Ok(Type::LIST)
            }
            Expr::Map(pairs) => {
                for (k, v) in pairs {
                    self.expr(k)?;
                    self.expr(v)?;
                }
                self.emit(OpCode::BuildMap, &[pairs.len() as u32], span);
                Ok(Type::MAP)
            }
            Expr::Range { start, end, step } => {
                let mut bounds = vec![self.expr(start)?, self.expr(end)?];
                match step {
                    Some(s) => bounds.push(self.expr(s)?),
                    None => {
                        self.emit(OpCode::Null, &[], span);
                    }
                }
                if let Some(bad) = bounds.iter().find(|t| !(t.is_numeric() || t.is_dynamic())) {
                    return error(
                        CompileErrorKind::Type,
                        format!("range bounds must be numeric, found {}", bad),
                        span,
                    );
                }
                self.emit(OpCode::BuildRange, &[], span);
                Ok(Type::LIST)
            }
            Expr::Lambda(decl) => {
                let class = self.current.class.clone();
                let sig = self.function(decl, FunctionKind::Function, class, span)?;
                Ok(Type::Function(sig))
            }
            Expr::Ref(name) => self.reference(name, span),
            Expr::Deref(inner) => {
                let ty = self.expr(inner)?;
                self.emit(OpCode::Deref, &[], span);
                match ty {
                    Type::Reference(inner) => Ok(*inner),
                    t if t.is_dynamic() => Ok(Type::ANY),
                    t => error(
                        CompileErrorKind::Type,
                        format!("cannot dereference {}", t),
                        span,
                    ),
                }
            }
            Expr::Is { expr, ty } => {
                self.expr(expr)?;
                let target = self.resolve_type(ty, &[], span)?;
                let c = self.constant(Constant::Type(target.descriptor()));
                self.emit(OpCode::Is, &[c], span);
                Ok(Type::BOOL)
            }
            Expr::Switch {
                subject,
                cases,
                default,
            } => self.switch(subject, cases, default.as_deref(), span),
            Expr::While { .. } | Expr::For { .. } | Expr::Iter { .. } => self.loop_expr(e, true),
        }
    }

    fn literal(&mut self, lit: &Literal, span: &Span) -> Type {
        match lit {
            Literal::Null => {
                self.emit(OpCode::Null, &[], span);
                Type::ANY
            }
            Literal::Bool(true) => {
                self.emit(OpCode::True, &[], span);
                Type::BOOL
            }
            Literal::Bool(false) => {
                self.emit(OpCode::False, &[], span);
                Type::BOOL
            }
            Literal::Int(i) => {
                let c = self.constant(Constant::Number(*i as f64));
                self.emit(OpCode::Constant, &[c], span);
                Type::INT
            }
            Literal::Float(f) => {
                let c = self.constant(Constant::Number(*f));
                self.emit(OpCode::Constant, &[c], span);
                Type::DOUBLE
            }
            Literal::Str(s) => {
                let c = self.name(s);
                self.emit(OpCode::Constant, &[c], span);
                Type::STR
            }
        }
    }

    // ========== 연산자 ==========

    fn binary(&mut self, op: BinaryOp, left: &ExprS, right: &ExprS, span: &Span) -> CompileResult<Type> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                // 양쪽 모두 평가 결과를 bool로 정규화한다
                let (test, short, long) = match op {
                    BinaryOp::And => (OpCode::JumpIfFalse, OpCode::False, OpCode::True),
                    _ => (OpCode::JumpIfTrue, OpCode::True, OpCode::False),
                };
                self.expr(left)?;
                let first = self.emit_jump(test, span);
                self.expr(right)?;
                let second = self.emit_jump(test, span);
                self.emit(long, &[], span);
                let end = self.emit_jump(OpCode::Jump, span);
                self.patch_jump(first);
                self.patch_jump(second);
                let height = self.current.height;
                self.set_height(height - 1);
                self.emit(short, &[], span);
                self.patch_jump(end);
                Ok(Type::BOOL)
            }
            _ => {
                let a = self.expr(left)?;
                let b = self.expr(right)?;
                let Some(result) = types::operation(op, &a, &b) else {
                    return error(
                        CompileErrorKind::Type,
                        format!("operation {:?} is not defined for {} and {}", op, a, b),
                        span,
                    );
                };
                self.emit(binary_opcode(op), &[], span);
                Ok(result)
            }
        }
    }

    fn assign(
        &mut self,
        target: &ExprS,
        op: Option<BinaryOp>,
        value: &ExprS,
        span: &Span,
    ) -> CompileResult<Type> {
        match &target.0 {
            Expr::Variable(name) => {
                let ty = match op {
                    Some(op) => {
                        let current = self.load_variable(name, span)?;
                        let rhs = self.expr(value)?;
                        let result = self.checked_operation(op, &current, &rhs, span)?;
                        self.emit(binary_opcode(op), &[], span);
                        result
                    }
                    None => self.expr(value)?,
                };
                self.store_variable(name, &ty, span)?;
                Ok(ty)
            }
            Expr::Attribute { object, name } => {
                let internal = self.is_internal(object)?;
                let obj_ty = self.expr(object)?;
                let field_ty = self.member_type(&obj_ty, name, internal, span)?;
                let n = self.name(name);
                let flags = if internal { ATTR_INTERNAL } else { 0 };
                let ty = match op {
                    Some(op) => {
                        self.emit(OpCode::Dup, &[], span);
                        self.emit(OpCode::GetAttr, &[n, flags], span);
                        let rhs = self.expr(value)?;
                        let result = self.checked_operation(op, &field_ty, &rhs, span)?;
                        self.emit(binary_opcode(op), &[], span);
                        result
                    }
                    None => self.expr(value)?,
                };
                if !types::can_be_mismatched(&field_ty, &ty) {
                    return error(
                        CompileErrorKind::Type,
                        format!("cannot assign {} to `{}` of type {}", ty, name, field_ty),
                        span,
                    );
                }
                self.emit(OpCode::SetAttr, &[n, flags], span);
                Ok(ty)
            }
            Expr::Index { object, index } => {
                if op.is_some() && !(is_pure(object) && is_pure(index)) {
                    return error(
                        CompileErrorKind::Structure,
                        "compound assignment to an index needs a plain object and index",
                        span,
                    );
                }
                let obj_ty = self.expr(object)?;
                let index_ty = self.expr(index)?;
                let instance = matches!(obj_ty.deref(), Type::Instance { .. });
                let elem = if instance && op.is_none() {
                    Type::ANY
                } else {
                    self.index_type(&obj_ty, &index_ty, span)?
                };
                let ty = match op {
                    Some(op) => {
                        self.expr(object)?;
                        self.expr(index)?;
                        self.emit(OpCode::GetIndex, &[], span);
                        let rhs = self.expr(value)?;
                        let result = self.checked_operation(op, &elem, &rhs, span)?;
                        self.emit(binary_opcode(op), &[], span);
                        result
                    }
                    None => self.expr(value)?,
                };
                self.index_store(&obj_ty, &index_ty, &ty, span)?;
                self.emit(OpCode::SetIndex, &[], span);
                Ok(ty)
            }
            Expr::Deref(inner) => {
                if op.is_some() && !is_pure(inner) {
                    return error(
                        CompileErrorKind::Structure,
                        "compound assignment through a reference needs a plain operand",
                        span,
                    );
                }
                let ref_ty = self.expr(inner)?;
                let pointee = match &ref_ty {
                    Type::Reference(t) => (**t).clone(),
                    t if t.is_dynamic() => Type::ANY,
                    t => {
                        return error(
                            CompileErrorKind::Type,
                            format!("cannot assign through {}", t),
                            span,
                        );
                    }
                };
                let ty = match op {
                    Some(op) => {
                        self.expr(inner)?;
                        self.emit(OpCode::Deref, &[], span);
                        let rhs = self.expr(value)?;
                        let result = self.checked_operation(op, &pointee, &rhs, span)?;
                        self.emit(binary_opcode(op), &[], span);
                        result
                    }
                    None => self.expr(value)?,
                };
                if !types::can_be_mismatched(&pointee, &ty) {
                    return error(
                        CompileErrorKind::Type,
                        format!("cannot assign {} through a reference to {}", ty, pointee),
                        span,
                    );
                }
                self.emit(OpCode::SetRef, &[], span);
                Ok(ty)
            }
            _ => error(CompileErrorKind::Structure, "invalid assignment target", span),
        }
    }

    fn checked_operation(&self, op: BinaryOp, a: &Type, b: &Type, span: &Span) -> CompileResult<Type> {
        types::operation(op, a, b).map_or_else(
            || {
                error(
                    CompileErrorKind::Type,
                    format!("operation {:?} is not defined for {} and {}", op, a, b),
                    span,
                )
            },
            Ok,
        )
    }

    // ========== 속성과 인덱스 ==========

    /// Whether `object` is accessed from inside its own class.
    fn is_internal(&self, object: &ExprS) -> CompileResult<bool> {
        if matches!(object.0, Expr::This) {
            return Ok(true);
        }
        let Some(ctx) = &self.current.class else {
            return Ok(false);
        };
        let ty = match &object.0 {
            Expr::Variable(name) => self.lookup_type_name(name),
            _ => None,
        };
        Ok(match ty {
            Some(Type::Instance { class, .. }) | Some(Type::Class(class)) => {
                class.borrow().is_subclass_of(&ctx.class.borrow())
            }
            _ => false,
        })
    }

    fn member_type(&self, ty: &Type, name: &str, internal: bool, span: &Span) -> CompileResult<Type> {
        match types::access(ty, name, internal) {
            Ok(t) => Ok(t),
            Err(AccessError::Private) => error(
                CompileErrorKind::Scope,
                format!("`{}` is private to {}", name, ty),
                span,
            ),
            Err(AccessError::Missing) => error(
                CompileErrorKind::Scope,
                format!("{} has no member `{}`", ty, name),
                span,
            ),
        }
    }

    fn index_type(&self, object: &Type, index: &Type, span: &Span) -> CompileResult<Type> {
        let object = object.deref();
        if object.is_dynamic() {
            return Ok(Type::ANY);
        }
        if let Type::Instance { class, .. } = object {
            let sig = {
                let class = class.borrow();
                class
                    .operators
                    .get("bracket")
                    .or_else(|| class.operators.get("get"))
                    .cloned()
            };
            let Some(sig) = sig else {
                return error(
                    CompileErrorKind::Type,
                    format!("{} is not subscriptable", object),
                    span,
                );
            };
            return self.check_call(&Type::Function(sig), &[index.clone()], false, span);
        }
        let integer_index = index.is_dynamic() || index.is_numeric();
        match object.primitive() {
            Some(crate::types::Primitive::Str) if integer_index => Ok(Type::STR),
            Some(crate::types::Primitive::Buffer) if integer_index => Ok(Type::INT),
            Some(crate::types::Primitive::List) if integer_index => Ok(Type::ANY),
            Some(crate::types::Primitive::Map) => Ok(Type::ANY),
            _ => error(
                CompileErrorKind::Type,
                format!("cannot index {} with {}", object, index),
                span,
            ),
        }
    }

    /// `object[index] = value` on an instance goes through its `set` operator.
    fn index_store(&self, object: &Type, index: &Type, value: &Type, span: &Span) -> CompileResult<()> {
        let Type::Instance { class, .. } = object.deref() else {
            return Ok(());
        };
        let sig = class.borrow().operators.get("set").cloned();
        let Some(sig) = sig else {
            return error(
                CompileErrorKind::Type,
                format!("{} does not support item assignment", object),
                span,
            );
        };
        self.check_call(&Type::Function(sig), &[index.clone(), value.clone()], false, span)?;
        Ok(())
    }

    fn super_access(&mut self, name: &str, span: &Span) -> CompileResult<Type> {
        let parent = self
            .current
            .class
            .as_ref()
            .and_then(|ctx| ctx.class.borrow().parent.clone());
        let Some(parent) = parent else {
            return error(
                CompileErrorKind::Scope,
                "`super` used in a class without a parent",
                span,
            );
        };
        let ty = Type::Instance {
            class: parent.clone(),
            generics: vec![],
        };
        let result = self.member_type(&ty, name, true, span)?;
        self.load_variable("this", span)?;
        let parent_name = parent.borrow().name.clone();
        self.load_variable(&parent_name, span)?;
        let n = self.name(name);
        self.emit(OpCode::GetSuper, &[n], span);
        Ok(result)
    }

    // ========== 호출 ==========

    fn call(&mut self, callee: &ExprS, args: &[Arg], span: &Span) -> CompileResult<Type> {
        let callee_ty = self.expr(callee)?;
        let mut positional = Vec::new();
        let mut keywords: Vec<(String, Type, Span)> = Vec::new();
        let mut spread = false;
        for arg in args {
            match arg {
                Arg::Positional(e) => {
                    if !keywords.is_empty() {
                        return error(
                            CompileErrorKind::Structure,
                            "positional argument after a keyword argument",
                            &e.1,
                        );
                    }
                    if let Expr::Spread(inner) = &e.0 {
                        self.expr(inner)?;
                        self.emit(OpCode::Spread, &[], &e.1);
                        spread = true;
                        positional.push(Type::ANY);
                    } else {
                        positional.push(self.expr(e)?);
                    }
                }
                Arg::Keyword(name, e) => {
                    let c = self.name(name);
                    self.emit(OpCode::Constant, &[c], &e.1);
                    let ty = self.expr(e)?;
                    keywords.push((name.clone(), ty, e.1.clone()));
                }
            }
        }

        let result = self.check_call(&callee_ty, &positional, spread || !keywords.is_empty(), span)?;
        if let Type::Function(sig) = callee_ty.deref() {
            for (name, ty, kw_span) in &keywords {
                match sig.params.iter().find(|p| p.name == *name) {
                    Some(p) if !types::can_be_mismatched(&p.ty, ty) => {
                        return error(
                            CompileErrorKind::Type,
                            format!("argument `{}` expects {}, found {}", name, p.ty, ty),
                            kw_span,
                        );
                    }
                    None if !sig.kwargs => {
                        return error(
                            CompileErrorKind::ArgumentCount,
                            format!("unexpected keyword argument `{}`", name),
                            kw_span,
                        );
                    }
                    _ => {}
                }
            }
        }

        let is_async = matches!(callee_ty.deref(), Type::Function(sig) if sig.is_async);
        let op = if is_async { OpCode::CallAsync } else { OpCode::Call };
        self.emit(op, &[positional.len() as u32, keywords.len() as u32], span);
        Ok(result)
    }

    pub(super) fn check_call(
        &self,
        callee: &Type,
        args: &[Type],
        relaxed: bool,
        span: &Span,
    ) -> CompileResult<Type> {
        match types::call(callee, args, relaxed) {
            Ok(t) => Ok(t),
            Err(CallMismatch::NotCallable) => error(
                CompileErrorKind::Type,
                format!("{} is not callable", callee),
                span,
            ),
            Err(CallMismatch::ArgumentCount { expected, got }) => error(
                CompileErrorKind::ArgumentCount,
                format!("expected {} arguments, got {}", expected, got),
                span,
            ),
            Err(CallMismatch::ArgumentType {
                index,
                expected,
                got,
            }) => error(
                CompileErrorKind::Type,
                format!("argument {} expects {}, found {}", index + 1, expected, got),
                span,
            ),
        }
    }

    // ========== switch ==========

    fn switch(
        &mut self,
        subject: &ExprS,
        cases: &[SwitchCase],
        default: Option<&ExprS>,
        span: &Span,
    ) -> CompileResult<Type> {
        self.expr(subject)?;
        let base = self.current.height;
        let mut case_jumps = Vec::with_capacity(cases.len());
        for case in cases {
            let mut jumps = Vec::with_capacity(case.values.len());
            for v in &case.values {
                self.emit(OpCode::Dup, &[], &v.1);
                self.expr(v)?;
                self.emit(OpCode::Equal, &[], &v.1);
                jumps.push(self.emit_jump(OpCode::JumpIfTrue, &v.1));
            }
            case_jumps.push(jumps);
        }

        let mut end_jumps = Vec::new();
        let mut result: Option<Type> = None;
        let mut merge = |t: Type| {
            result = Some(match result.take() {
                None => t,
                Some(prev) if prev == t => prev,
                Some(_) => Type::ANY,
            });
        };

        self.emit(OpCode::Pop, &[], span);
        match default {
            Some(d) => merge(self.expr(d)?),
            None => {
                self.emit(OpCode::Null, &[], span);
                merge(Type::ANY);
            }
        }
        end_jumps.push(self.emit_jump(OpCode::Jump, span));

        for (case, jumps) in cases.iter().zip(case_jumps) {
            for j in jumps {
                self.patch_jump(j);
            }
            self.set_height(base);
            self.emit(OpCode::Pop, &[], &case.result.1);
            merge(self.expr(&case.result)?);
            end_jumps.push(self.emit_jump(OpCode::Jump, &case.result.1));
        }
        for j in end_jumps {
            self.patch_jump(j);
        }
        self.set_height(base);
        Ok(result.unwrap_or(Type::ANY))
    }

    // ========== 루프 ==========

    /// Compiles a loop. With `collect`, every iteration's trailing expression
    /// value is gathered and the loop evaluates to the resulting list.
    pub(super) fn loop_expr(&mut self, e: &ExprS, collect: bool) -> CompileResult<Type> {
        let span = &e.1;
        if collect {
            self.emit(OpCode::StartCache, &[], span);
        }
        match &e.0 {
            Expr::While { condition, body } => {
                let top = self.here();
                self.expr(condition)?;
                let exit = self.emit_jump(OpCode::JumpIfFalse, span);
                self.push_loop(top);
                self.loop_body(body, &[], collect, span)?;
                self.emit_loop(top, span);
                self.patch_jump(exit);
                self.pop_loop();
            }
            Expr::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                self.begin_scope();
                let start_ty = self.expr(start)?;
                self.emit(OpCode::Declare, &[0, 0, 0], span);
                let var_ty = if start_ty.is_numeric() || start_ty.is_dynamic() {
                    start_ty
                } else {
                    return error(
                        CompileErrorKind::Type,
                        format!("`for` start must be numeric, found {}", start_ty),
                        &start.1,
                    );
                };
                self.add_local(var, var_ty, false, span)?;
                let slot = self.current.height - 1;
                let check = self.emit_jump(OpCode::Jump, span);

                let advance = self.here();
                self.step(step.as_deref(), span)?;
                self.emit(OpCode::ForStep, &[slot as u32], span);

                self.patch_jump(check);
                let end_ty = self.expr(end)?;
                if !(end_ty.is_numeric() || end_ty.is_dynamic()) {
                    return error(
                        CompileErrorKind::Type,
                        format!("`for` end must be numeric, found {}", end_ty),
                        &end.1,
                    );
                }
                self.step(step.as_deref(), span)?;
                self.emit(OpCode::ForCheck, &[slot as u32], span);
                let exit = self.emit_jump(OpCode::JumpIfFalse, span);

                self.push_loop(advance);
                self.loop_body(body, &[], collect, span)?;
                self.emit_loop(advance, span);
                self.patch_jump(exit);
                self.pop_loop();
                self.end_scope(span);
            }
            Expr::Iter {
                var,
                iterable,
                body,
            } => {
                self.begin_scope();
                let source = self.expr(iterable)?;
                let elem = match source.deref().primitive() {
                    Some(crate::types::Primitive::Str) => Type::STR,
                    Some(crate::types::Primitive::Buffer) => Type::INT,
                    Some(
                        crate::types::Primitive::List
                        | crate::types::Primitive::Map
                        | crate::types::Primitive::Any,
                    ) => Type::ANY,
                    _ if source.is_dynamic() => Type::ANY,
                    _ => {
                        return error(
                            CompileErrorKind::Type,
                            format!("cannot iterate over {}", source),
                            &iterable.1,
                        );
                    }
                };
                self.emit(OpCode::IterPrep, &[], span);
                self.emit(OpCode::Declare, &[0, 0, 0], span);
                self.add_local(" iter", Type::LIST, true, span)?;
                let slot = self.current.height - 1;

                let top = self.here();
                let height = self.current.height;
                let exit = self.emit(OpCode::IterNext, &[slot as u32, 0], span) + 2;
                self.emit(OpCode::Declare, &[0, 0, 0], span);
                self.push_loop(top);
                self.loop_body(body, &[(var.as_str(), elem)], collect, span)?;
                self.emit_loop(top, span);
                self.patch_jump(exit);
                self.set_height(height);
                self.pop_loop();
                self.end_scope(span);
            }
            _ => return error(CompileErrorKind::Structure, "expected a loop", span),
        }
        if collect {
            self.emit(OpCode::FlushLoop, &[], span);
            Ok(Type::LIST)
        } else {
            Ok(Type::VOID)
        }
    }

    fn step(&mut self, step: Option<&ExprS>, span: &Span) -> CompileResult<()> {
        match step {
            Some(s) => {
                let ty = self.expr(s)?;
                if !(ty.is_numeric() || ty.is_dynamic()) {
                    return error(
                        CompileErrorKind::Type,
                        format!("`for` step must be numeric, found {}", ty),
                        &s.1,
                    );
                }
            }
            None => {
                let c = self.constant(Constant::Number(1.0));
                self.emit(OpCode::Constant, &[c], span);
            }
        }
        Ok(())
    }

    fn push_loop(&mut self, continue_target: usize) {
        let depth = self.current.scope_depth;
        self.current.loops.push(LoopContext {
            depth,
            continue_target,
            break_jumps: Vec::new(),
        });
    }

    fn pop_loop(&mut self) {
        if let Some(ctx) = self.current.loops.pop() {
            for j in ctx.break_jumps {
                self.patch_jump(j);
            }
        }
    }

    /// Body scope of a loop. `bound` names values already pushed for this
    /// iteration (the element of an `Iter` loop).
    fn loop_body(
        &mut self,
        body: &[StmtS],
        bound: &[(&str, Type)],
        collect: bool,
        span: &Span,
    ) -> CompileResult<()> {
        self.begin_scope();
        for (name, ty) in bound {
            self.add_local(name, ty.clone(), false, span)?;
        }
        let (last, init) = match body.split_last() {
            Some((last, init)) if collect => (Some(last), init),
            _ => (None, body),
        };
        self.block(init)?;
        if collect {
            match last {
                Some((Stmt::Expr(e), _)) => {
                    if super::is_loop(e) {
                        self.loop_expr(e, true)?;
                    } else {
                        self.expr(e)?;
                    }
                }
                Some(stmt) => {
                    self.stmt(stmt)?;
                    self.emit(OpCode::Null, &[], span);
                }
                None => {
                    self.emit(OpCode::Null, &[], span);
                }
            }
            self.emit(OpCode::CollectLoop, &[], span);
        }
        self.end_scope(span);
        Ok(())
    }
}
