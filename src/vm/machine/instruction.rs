use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use super::{ErrorKind, Vm, VmResult, err};
use crate::vm::bytecode::{
    ATTR_INTERNAL, ATTR_SWAPPED, ByteCode, Constant, FunctionFlags, MemberFlags, OpCode, VarFlags,
};
use crate::vm::object::{Closure, FieldDef, LanguageClass, MethodEntry, Pattern, StaticMember};
use crate::vm::value::{MapKey, Value, Var};

/// 명령어 실행 결과
#[derive(Debug, Clone)]
pub enum ExecutionFlow {
    /// 다음 명령어 계속 실행
    Continue,
    /// 프레임 리턴 (값은 호출자에게 전달)
    Exit(Value),
}

use ExecutionFlow::Continue;

impl Vm {
    /// 현재 프레임에서 명령어 하나를 디코드하고 실행한다.
    pub(super) fn step(&mut self) -> VmResult<ExecutionFlow> {
        let (function, ip) = {
            let frame = self.frame()?;
            (frame.closure.function.clone(), frame.ip)
        };
        let code = &function.chunk.code;
        let Some(&word) = code.get(ip) else {
            return Err(err(
                ErrorKind::StackUnderflow,
                format!("ran past the end of `{}`", function.name),
            ));
        };
        let op = OpCode::from_repr(word)
            .ok_or_else(|| err(ErrorKind::TypeError, format!("invalid opcode {}", word)))?;
        let end = ip + 1 + op.operand_count(code, ip);
        let Some(operands) = code.get(ip + 1..end) else {
            return Err(err(
                ErrorKind::StackUnderflow,
                format!("truncated {} at {}", op, ip),
            ));
        };
        self.frame_mut()?.ip = end;
        trace!(ip, %op, "step");
        self.execute_instruction(op, operands, &function)
            .map_err(|e| e.located(&function.chunk.source, function.chunk.span_at(ip)))
    }

    /// 단일 명령어 실행 (디스패처)
    fn execute_instruction(
        &mut self,
        op: OpCode,
        operands: &[u32],
        function: &ByteCode,
    ) -> VmResult<ExecutionFlow> {
        let w = |i: usize| operands.get(i).copied().unwrap_or(0);
        match op {
            // ===== 상수 =====
            OpCode::Constant => self.handle_constant(w(0), function),
            OpCode::Null => self.push_continue(Value::Null),
            OpCode::True => self.push_continue(Value::Bool(true)),
            OpCode::False => self.push_continue(Value::Bool(false)),

            // ===== 스택 연산 =====
            OpCode::Pop => {
                self.pop()?;
                Ok(Continue)
            }
            OpCode::Dup => {
                let v = self.peek()?.clone();
                self.push_continue(v)
            }

            // ===== 변수 =====
            OpCode::Declare => self.handle_declare(w(0), w(1), w(2), function),
            OpCode::GetLocal => {
                let v = self.get_local(w(0))?;
                self.push_continue(v)
            }
            OpCode::SetLocal => {
                let v = self.peek()?.clone();
                self.set_local(w(0), v)?;
                Ok(Continue)
            }
            OpCode::GetUpvalue => {
                let v = self.upvalue(w(0))?.get();
                self.push_continue(v)
            }
            OpCode::SetUpvalue => {
                let v = self.peek()?.clone();
                self.upvalue(w(0))?.set(v)?;
                Ok(Continue)
            }
            OpCode::DefineGlobal => self.handle_define_global(operands, function),
            OpCode::GetGlobal => self.handle_get_global(w(0), function),
            OpCode::SetGlobal => self.handle_set_global(w(0), function),
            OpCode::RefLocal => {
                let var = self.local_cell(w(0))?;
                self.push_continue(Value::Reference(var))
            }
            OpCode::RefUpvalue => {
                let var = self.upvalue(w(0))?;
                self.push_continue(Value::Reference(var))
            }
            OpCode::RefGlobal => {
                let name = str_operand(function, w(0))?;
                let var = self.global_var(&name)?;
                self.push_continue(Value::Reference(var))
            }
            OpCode::Deref => match self.pop()? {
                Value::Reference(var) => self.push_continue(var.get()),
                other => Err(err(
                    ErrorKind::TypeError,
                    format!("cannot dereference {}", other.type_name()),
                )),
            },
            OpCode::SetRef => {
                let value = self.pop()?;
                match self.pop()? {
                    Value::Reference(var) => var.set(value.clone())?,
                    other => {
                        return Err(err(
                            ErrorKind::TypeError,
                            format!("cannot assign through {}", other.type_name()),
                        ));
                    }
                }
                self.push_continue(value)
            }

            // ===== 산술 연산 =====
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Less
            | OpCode::LessEqual
            | OpCode::Greater
            | OpCode::GreaterEqual => self.handle_binary(op),
            OpCode::Negate => {
                let n = self.pop()?.as_number()?;
                self.push_continue(Value::Number(-n))
            }
            OpCode::Not => {
                let b = self.pop()?.truthy()?;
                self.push_continue(Value::Bool(!b))
            }

            // ===== 비교 =====
            OpCode::Equal => self.handle_equal(),
            OpCode::NotEqual => self.handle_not_equal(),
            OpCode::Is => {
                let Some(Constant::Type(desc)) = function.chunk.constants.get(w(0) as usize) else {
                    return Err(err(ErrorKind::TypeError, "`is` needs a type constant".into()));
                };
                let v = self.pop()?;
                self.push_continue(Value::Bool(Self::is_instance_of(&v, desc)))
            }

            // ===== 제어 흐름 =====
            OpCode::Jump | OpCode::Loop => {
                self.add_ip_rel(w(0))?;
                Ok(Continue)
            }
            OpCode::JumpIfFalse => {
                if !self.pop()?.truthy()? {
                    self.add_ip_rel(w(0))?;
                }
                Ok(Continue)
            }
            OpCode::JumpIfTrue => {
                if self.pop()?.truthy()? {
                    self.add_ip_rel(w(0))?;
                }
                Ok(Continue)
            }

            // ===== 컬렉션 =====
            OpCode::BuildList => {
                let items = self.pop_n(w(0) as usize)?;
                self.push_continue(Value::list(flatten_spread(items)))
            }
            OpCode::BuildMap => self.handle_build_map(w(0) as usize),
            OpCode::BuildRange => self.handle_build_range(),
            OpCode::Spread => match self.pop()? {
                Value::List(items) => {
                    let items = items.read().clone();
                    self.push_continue(Value::Spread(Arc::new(items)))
                }
                other => Err(err(
                    ErrorKind::TypeError,
                    format!("cannot spread {}", other.type_name()),
                )),
            },
            OpCode::GetIndex => {
                let index = self.pop()?;
                let object = self.pop()?;
                let v = self.get_index(object, index)?;
                self.push_continue(v)
            }
            OpCode::SetIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let object = self.pop()?;
                self.set_index(object, index, value.clone())?;
                self.push_continue(value)
            }

            // ===== 속성 접근 =====
            OpCode::GetAttr => {
                let name = str_operand(function, w(0))?;
                let object = self.pop()?;
                let v = self.get_attr(&object, &name, w(1) & ATTR_INTERNAL != 0)?;
                self.push_continue(v)
            }
            OpCode::SetAttr => {
                let name = str_operand(function, w(0))?;
                let (object, value) = if w(1) & ATTR_SWAPPED != 0 {
                    let object = self.pop()?;
                    (object, self.pop()?)
                } else {
                    let value = self.pop()?;
                    (self.pop()?, value)
                };
                self.set_attr(&object, &name, value.clone(), w(1) & ATTR_INTERNAL != 0)?;
                self.push_continue(value)
            }
            OpCode::GetSuper => {
                let name = str_operand(function, w(0))?;
                let v = self.handle_get_super(&name)?;
                self.push_continue(v)
            }

            // ===== 호출 =====
            OpCode::Call => {
                let (callee, args, kwargs) = self.pop_call(w(0) as usize, w(1) as usize)?;
                if let Some(v) = self.invoke(callee, args, kwargs)? {
                    self.push(v)?;
                }
                Ok(Continue)
            }
            OpCode::CallAsync => {
                let (callee, args, kwargs) = self.pop_call(w(0) as usize, w(1) as usize)?;
                self.spawn(callee, args, kwargs);
                self.push_continue(Value::Null)
            }
            OpCode::Return => self.handle_return(),
            OpCode::Closure => self.handle_closure(operands, function),
            OpCode::Class => self.handle_class(operands, function),
            OpCode::Method => self.handle_method(w(0), w(1), function),
            OpCode::MakePattern => self.handle_make_pattern(operands, function),

            // ===== 루프 =====
            OpCode::StartCache => {
                self.caches.push(Vec::new());
                Ok(Continue)
            }
            OpCode::CollectLoop => {
                let v = self.pop()?;
                self.caches
                    .last_mut()
                    .ok_or_else(|| err(ErrorKind::StackUnderflow, "no open loop cache".into()))?
                    .push(v);
                Ok(Continue)
            }
            OpCode::FlushLoop => {
                let items = self
                    .caches
                    .pop()
                    .ok_or_else(|| err(ErrorKind::StackUnderflow, "no open loop cache".into()))?;
                self.push_continue(Value::list(items))
            }
            OpCode::ForCheck => {
                let step = self.pop()?.as_number()?;
                let end = self.pop()?.as_number()?;
                let current = self.get_local(w(0))?.as_number()?;
                if step == 0.0 {
                    return Err(err(ErrorKind::RangeError, "`for` step cannot be zero".into()));
                }
                let more = if step > 0.0 { current < end } else { current > end };
                self.push_continue(Value::Bool(more))
            }
            OpCode::ForStep => {
                let step = self.pop()?.as_number()?;
                let current = self.get_local(w(0))?.as_number()?;
                self.set_local(w(0), Value::Number(current + step))?;
                Ok(Continue)
            }
            OpCode::IterPrep => {
                let source = self.pop()?;
                let mut items = Self::iteration_items(&source)?;
                items.reverse();
                self.push_continue(Value::list(items))
            }
            OpCode::IterNext => {
                let queue = self.get_local(w(0))?.as_list()?;
                let next = queue.write().pop();
                match next {
                    Some(v) => self.push_continue(v),
                    None => {
                        self.add_ip_rel(w(1))?;
                        Ok(Continue)
                    }
                }
            }

            OpCode::Throw => {
                let message = self.pop()?;
                let kind = self.pop()?.as_str()?;
                let message = self.stringify(&message)?;
                Err(err(ErrorKind::from_name(&kind), message))
            }
        }
    }

    fn push_continue(&mut self, v: Value) -> VmResult<ExecutionFlow> {
        self.push(v)?;
        Ok(Continue)
    }

    // ==================== 상수/변수 핸들러 ====================

    fn handle_constant(&mut self, ix: u32, function: &ByteCode) -> VmResult<ExecutionFlow> {
        let v = match function.chunk.constants.get(ix as usize) {
            Some(Constant::Str(s)) => Value::Str(s.clone()),
            Some(Constant::Number(n)) => Value::Number(*n),
            Some(Constant::Bool(b)) => Value::Bool(*b),
            Some(Constant::Function(f)) => Value::Closure(Arc::new(Closure {
                function: f.clone(),
                upvalues: vec![],
                defaults: vec![],
            })),
            Some(Constant::Enum(def)) => Value::Enum(def.clone()),
            Some(Constant::Type(t)) => {
                return Err(err(
                    ErrorKind::TypeError,
                    format!("type {} is not a value", t),
                ));
            }
            None => {
                return Err(err(
                    ErrorKind::IndexError,
                    format!("constant {} out of range", ix),
                ));
            }
        };
        self.push_continue(v)
    }

    fn handle_declare(&mut self, flags: u32, min: u32, max: u32, function: &ByteCode) -> VmResult<ExecutionFlow> {
        let value = self.pop()?;
        let var = declare_var(value, flags, min, max, function)?;
        self.push_continue(Value::Cell(var))
    }

    fn handle_define_global(&mut self, operands: &[u32], function: &ByteCode) -> VmResult<ExecutionFlow> {
        let [name, flags, min, max] = operands else {
            return Err(err(ErrorKind::StackUnderflow, "malformed DefineGlobal".into()));
        };
        let name = str_operand(function, *name)?;
        let value = self.pop()?;
        let var = declare_var(value, *flags, *min, *max, function)?;
        trace!(global = %name, "define");
        self.runtime.globals.write().insert(name.to_string(), var);
        Ok(Continue)
    }

    fn handle_get_global(&mut self, name: u32, function: &ByteCode) -> VmResult<ExecutionFlow> {
        let name = str_operand(function, name)?;
        let found = self.runtime.global(&name);
        let v = match found {
            Some(v) => v,
            None => self.runtime.natives.value(&name).ok_or_else(|| {
                err(ErrorKind::ScopeError, format!("undefined variable `{}`", name))
            })?,
        };
        self.push_continue(v)
    }

    fn handle_set_global(&mut self, name: u32, function: &ByteCode) -> VmResult<ExecutionFlow> {
        let name = str_operand(function, name)?;
        let var = self.global_var(&name)?;
        var.set(self.peek()?.clone())?;
        Ok(Continue)
    }

    fn global_var(&self, name: &str) -> VmResult<Var> {
        self.runtime
            .globals
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| err(ErrorKind::ScopeError, format!("undefined variable `{}`", name)))
    }

    // ==================== 컬렉션 핸들러 ====================

    fn handle_build_map(&mut self, count: usize) -> VmResult<ExecutionFlow> {
        let flat = self.pop_n(count * 2)?;
        let mut entries = IndexMap::with_capacity(count);
        let mut it = flat.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            let key = MapKey::from_value(&k).ok_or_else(|| {
                err(
                    ErrorKind::TypeError,
                    format!("{} cannot be a map key", k.type_name()),
                )
            })?;
            entries.insert(key, v);
        }
        self.push_continue(Value::map(entries))
    }

    /// 끝은 포함하지 않는다. step이 null이면 방향에 맞춰 ±1.
    fn handle_build_range(&mut self) -> VmResult<ExecutionFlow> {
        let step = self.pop()?;
        let end = self.pop()?.as_number()?;
        let start = self.pop()?.as_number()?;
        let step = match step {
            Value::Null if start <= end => 1.0,
            Value::Null => -1.0,
            v => v.as_number()?,
        };
        if step == 0.0 {
            return Err(err(ErrorKind::RangeError, "range step cannot be zero".into()));
        }
        let mut items = Vec::new();
        let mut x = start;
        while (step > 0.0 && x < end) || (step < 0.0 && x > end) {
            items.push(Value::Number(x));
            x += step;
        }
        self.push_continue(Value::list(items))
    }

    // ==================== 호출/클래스 핸들러 ====================

    /// Pops keyword pairs, then positional arguments, then the callee.
    fn pop_call(
        &mut self,
        argc: usize,
        kwc: usize,
    ) -> VmResult<(Value, Vec<Value>, Vec<(Arc<str>, Value)>)> {
        let flat = self.pop_n(kwc * 2)?;
        let mut kwargs = Vec::with_capacity(kwc);
        let mut it = flat.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            kwargs.push((k.as_str()?, v));
        }
        let args = flatten_spread(self.pop_n(argc)?);
        let callee = self.pop()?;
        Ok((callee, args, kwargs))
    }

    fn handle_return(&mut self) -> VmResult<ExecutionFlow> {
        let value = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| err(ErrorKind::StackUnderflow, "return without a frame".into()))?;
        let mut result = if frame.constructor {
            match self.stack.get(frame.base) {
                Some(Value::Cell(var)) => var.get(),
                Some(v) => v.clone(),
                None => Value::Null,
            }
        } else {
            value
        };
        if let Some(key) = frame.memo {
            self.runtime.memo.insert(key, result.clone());
        }
        if frame.catcher {
            result = Value::ok(result);
        }
        self.stack.truncate(frame.base);
        self.caches.truncate(frame.caches);
        Ok(ExecutionFlow::Exit(result))
    }

    fn handle_closure(&mut self, operands: &[u32], function: &ByteCode) -> VmResult<ExecutionFlow> {
        let Some(Constant::Function(inner)) = operands
            .first()
            .and_then(|ix| function.chunk.constants.get(*ix as usize))
        else {
            return Err(err(ErrorKind::TypeError, "closure needs a function constant".into()));
        };
        let defaults = self.pop_n(inner.default_count())?;
        let mut upvalues = Vec::with_capacity(inner.upvalue_count);
        for pair in operands.get(2..).unwrap_or(&[]).chunks(2) {
            let var = match pair {
                [1, index] => self.local_cell(*index)?,
                [_, index] => self.upvalue(*index)?,
                _ => return Err(err(ErrorKind::StackUnderflow, "malformed closure".into())),
            };
            upvalues.push(var);
        }
        self.push_continue(Value::Closure(Arc::new(Closure {
            function: inner.clone(),
            upvalues,
            defaults,
        })))
    }

    fn handle_class(&mut self, operands: &[u32], function: &ByteCode) -> VmResult<ExecutionFlow> {
        let w = |i: usize| operands.get(i).copied().unwrap_or(0);
        let name = str_operand(function, w(0))?;
        let attrs = w(1) as usize;
        let generics = w(2) as usize;
        let parent = if w(3) != 0 {
            match self.pop()? {
                Value::Class(c) => Some(c),
                other => {
                    return Err(err(
                        ErrorKind::TypeError,
                        format!("cannot inherit from {}", other.type_name()),
                    ));
                }
            }
        } else {
            None
        };

        // 기본값은 역순으로 쌓여 있으므로 선언 순서대로 꺼낸다
        let mut fields = Vec::new();
        let mut statics = IndexMap::new();
        for i in 0..attrs {
            let value = self.pop()?;
            let attr = str_operand(function, w(4 + 2 * i))?;
            let flags = MemberFlags::from_bits_truncate(w(5 + 2 * i));
            let private = flags.contains(MemberFlags::PRIVATE);
            if flags.contains(MemberFlags::STATIC) {
                statics.insert(
                    attr.to_string(),
                    StaticMember {
                        var: Var::cell(value),
                        private,
                    },
                );
            } else {
                fields.push(FieldDef {
                    name: attr.to_string(),
                    default: value,
                    private,
                });
            }
        }
        let mut generic_names = Vec::with_capacity(generics);
        for i in 0..generics {
            generic_names.push(str_operand(function, w(4 + 2 * attrs + i))?.to_string());
        }
        trace!(class = %name, fields = fields.len(), statics = statics.len(), "class created");
        let class = LanguageClass::new(name.to_string(), parent, generic_names, fields, statics);
        self.push_continue(Value::Class(Arc::new(class)))
    }

    fn handle_method(&mut self, name: u32, flags: u32, function: &ByteCode) -> VmResult<ExecutionFlow> {
        let name = str_operand(function, name)?;
        let flags = MemberFlags::from_bits_truncate(flags);
        let closure = match self.pop()? {
            Value::Closure(c) => c,
            other => {
                return Err(err(
                    ErrorKind::TypeError,
                    format!("method `{}` is {}", name, other.type_name()),
                ));
            }
        };
        let Value::Class(class) = self.peek()? else {
            return Err(err(ErrorKind::TypeError, "method outside of a class".into()));
        };
        if flags.contains(MemberFlags::CONSTRUCTOR) {
            *class.constructor.write() = Some(closure);
        } else if flags.contains(MemberFlags::OPERATOR) {
            class.operators.write().insert(name.to_string(), closure);
        } else {
            let is_static = flags.contains(MemberFlags::STATIC)
                || closure.function.flags.contains(FunctionFlags::STATIC);
            class.methods.write().insert(
                name.to_string(),
                MethodEntry {
                    closure,
                    private: flags.contains(MemberFlags::PRIVATE),
                    is_static,
                },
            );
        }
        Ok(Continue)
    }

    fn handle_make_pattern(&mut self, operands: &[u32], function: &ByteCode) -> VmResult<ExecutionFlow> {
        let required = operands.first().copied().unwrap_or(0) as usize;
        let flat = self.pop_n(required * 2)?;
        let target = self.pop()?;
        let mut pairs = Vec::with_capacity(required);
        let mut it = flat.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            pairs.push((k.as_str()?, v));
        }
        let binds = operands
            .get(2..)
            .unwrap_or(&[])
            .iter()
            .map(|ix| str_operand(function, *ix))
            .collect::<VmResult<Vec<_>>>()?;
        self.push_continue(Value::Pattern(Arc::new(Pattern {
            target,
            required: pairs,
            binds,
        })))
    }
}

fn str_operand(function: &ByteCode, ix: u32) -> VmResult<Arc<str>> {
    function
        .chunk
        .str_constant(ix)
        .cloned()
        .ok_or_else(|| err(ErrorKind::TypeError, format!("constant {} is not a string", ix)))
}

fn declare_var(value: Value, flags: u32, min: u32, max: u32, function: &ByteCode) -> VmResult<Var> {
    let flags = VarFlags::from_bits_truncate(flags);
    let range = if flags.contains(VarFlags::RANGED) {
        match (
            function.chunk.number_constant(min),
            function.chunk.number_constant(max),
        ) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => return Err(err(ErrorKind::RangeError, "malformed range bounds".into())),
        }
    } else {
        None
    };
    Var::new(value, flags.contains(VarFlags::CONSTANT), range)
}

/// Spread 마커를 펼친다
fn flatten_spread(items: Vec<Value>) -> Vec<Value> {
    if !items.iter().any(|v| matches!(v, Value::Spread(_))) {
        return items;
    }
    let mut out = Vec::with_capacity(items.len());
    for v in items {
        match v {
            Value::Spread(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other),
        }
    }
    out
}
