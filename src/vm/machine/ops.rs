//! 연산자, 인덱스, 속성 접근의 런타임 의미

use std::sync::Arc;

use super::instruction::ExecutionFlow;
use super::{ErrorKind, Vm, VmResult, err};
use crate::types::Primitive;
use crate::vm::bytecode::{DescriptorKind, OpCode, TypeDescriptor};
use crate::vm::object::{BoundMethod, Closure, EnumChild, Instance};
use crate::vm::value::{MapKey, Value, format_number};

/// Operator method looked up on an instance left operand.
fn overload_name(op: OpCode) -> Option<&'static str> {
    match op {
        OpCode::Add => Some("add"),
        OpCode::Sub => Some("sub"),
        OpCode::Mul => Some("mul"),
        OpCode::Div => Some("div"),
        OpCode::Mod => Some("mod"),
        OpCode::Pow => Some("fastpow"),
        OpCode::Equal => Some("eq"),
        OpCode::NotEqual => Some("ne"),
        OpCode::Less => Some("lt"),
        OpCode::LessEqual => Some("lte"),
        OpCode::Greater => Some("lte"),
        OpCode::GreaterEqual => Some("lt"),
        _ => None,
    }
}

fn bind(receiver: &Value, method: Arc<Closure>) -> Value {
    Value::BoundMethod(Arc::new(BoundMethod {
        receiver: receiver.clone(),
        method,
    }))
}

fn private_error(name: &str, owner: &str) -> super::RuntimeError {
    err(
        ErrorKind::ScopeError,
        format!("`{}` is private to {}", name, owner),
    )
}

/// 음수 인덱스는 끝에서부터 센다
fn wrap_index(index: i64, len: usize) -> VmResult<usize> {
    let len_i = len as i64;
    let i = if index < 0 { index + len_i } else { index };
    if i < 0 || i >= len_i {
        return Err(err(
            ErrorKind::IndexError,
            format!("index {} out of range for length {}", index, len),
        ));
    }
    Ok(i as usize)
}

fn map_key(v: &Value) -> VmResult<MapKey> {
    MapKey::from_value(v).ok_or_else(|| {
        err(
            ErrorKind::TypeError,
            format!("{} cannot be a map key", v.type_name()),
        )
    })
}

fn repeat_count(n: &Value) -> VmResult<usize> {
    let n = n.as_integer()?;
    if n < 0 {
        return Err(err(
            ErrorKind::RangeError,
            format!("cannot repeat {} times", n),
        ));
    }
    Ok(n as usize)
}

/// 반복 결과 길이. 할당할 수 없는 크기는 RangeError.
fn repeated_len<T>(len: usize, count: usize) -> VmResult<usize> {
    let limit = isize::MAX as usize / std::mem::size_of::<T>().max(1);
    match len.checked_mul(count) {
        Some(total) if total <= limit => Ok(total),
        _ => Err(err(
            ErrorKind::RangeError,
            format!("repeating {} items {} times is too large", len, count),
        )),
    }
}

impl Vm {
    // ========== 산술/비교 ==========

    pub(super) fn handle_binary(&mut self, op: OpCode) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        let v = self.binary(op, a, b)?;
        self.push(v)?;
        Ok(ExecutionFlow::Continue)
    }

    /// Applies a binary operator, dispatching to an operator method when the
    /// left operand is an instance that defines one.
    pub fn binary(&mut self, op: OpCode, a: Value, b: Value) -> VmResult<Value> {
        if let Some(result) = self.overload(op, &a, &b)? {
            return Ok(result);
        }
        match op {
            OpCode::Less | OpCode::LessEqual | OpCode::Greater | OpCode::GreaterEqual => {
                self.compare(op, &a, &b).map(Value::Bool)
            }
            OpCode::Equal => Ok(Value::Bool(a.equals(&b))),
            OpCode::NotEqual => Ok(Value::Bool(!a.equals(&b))),
            _ => self.arithmetic(op, a, b),
        }
    }

    fn overload(&mut self, op: OpCode, a: &Value, b: &Value) -> VmResult<Option<Value>> {
        let Value::Instance(instance) = a else {
            return Ok(None);
        };
        let Some(method) = overload_name(op).and_then(|name| instance.class.operator(name)) else {
            return Ok(None);
        };
        let result = self.call_sync(bind(a, method), vec![b.clone()], vec![])?;
        Ok(Some(match op {
            OpCode::Greater | OpCode::GreaterEqual => Value::Bool(!result.truthy()?),
            _ => result,
        }))
    }

    fn arithmetic(&mut self, op: OpCode, a: Value, b: Value) -> VmResult<Value> {
        match (op, &a, &b) {
            (OpCode::Add, Value::Str(_), _) | (OpCode::Add, _, Value::Str(_)) => {
                let s = format!("{}{}", self.stringify(&a)?, self.stringify(&b)?);
                Ok(Value::str(&s))
            }
            (OpCode::Add, Value::List(x), Value::List(y)) => {
                let mut items = x.read().clone();
                items.extend(y.read().iter().cloned());
                Ok(Value::list(items))
            }
            (OpCode::Add, Value::Buffer(x), Value::Buffer(y)) => {
                let mut bytes = x.read().clone();
                bytes.extend_from_slice(&y.read());
                Ok(Value::buffer(bytes))
            }
            (OpCode::Mul, Value::Str(s), Value::Number(_)) => {
                let count = repeat_count(&b)?;
                repeated_len::<u8>(s.len(), count)?;
                Ok(Value::str(&s.repeat(count)))
            }
            (OpCode::Mul, Value::List(items), Value::Number(_)) => {
                let count = repeat_count(&b)?;
                let items = items.read();
                let mut out = Vec::with_capacity(repeated_len::<Value>(items.len(), count)?);
                if !items.is_empty() {
                    for _ in 0..count {
                        out.extend(items.iter().cloned());
                    }
                }
                Ok(Value::list(out))
            }
            (_, Value::Number(x), Value::Number(y)) => numeric(op, *x, *y).map(Value::Number),
            _ => Err(err(
                ErrorKind::TypeError,
                format!(
                    "unsupported operands for {}: {} and {}",
                    op,
                    a.type_name(),
                    b.type_name()
                ),
            )),
        }
    }

    fn compare(&self, op: OpCode, a: &Value, b: &Value) -> VmResult<bool> {
        let ordering = match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            _ => {
                return Err(err(
                    ErrorKind::TypeError,
                    format!("cannot compare {} and {}", a.type_name(), b.type_name()),
                ));
            }
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };
        Ok(match op {
            OpCode::Less => ordering.is_lt(),
            OpCode::LessEqual => ordering.is_le(),
            OpCode::Greater => ordering.is_gt(),
            _ => ordering.is_ge(),
        })
    }

    /// `Equal`: a pattern on the right matches and pushes its bindings below
    /// the boolean.
    pub(super) fn handle_equal(&mut self) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        if let Value::Pattern(pattern) = &b {
            match pattern.matches(&a) {
                Some(binds) => {
                    for v in binds {
                        self.push(v)?;
                    }
                    self.push(Value::Bool(true))?;
                }
                None => self.push(Value::Bool(false))?,
            }
            return Ok(ExecutionFlow::Continue);
        }
        let v = self.binary(OpCode::Equal, a, b)?;
        self.push(v)?;
        Ok(ExecutionFlow::Continue)
    }

    pub(super) fn handle_not_equal(&mut self) -> VmResult<ExecutionFlow> {
        let b = self.pop()?;
        let a = self.pop()?;
        let v = self.binary(OpCode::NotEqual, a, b)?;
        self.push(v)?;
        Ok(ExecutionFlow::Continue)
    }

    pub(super) fn is_instance_of(v: &Value, desc: &TypeDescriptor) -> bool {
        match &desc.kind {
            DescriptorKind::Primitive(p) => match (p, v) {
                (Primitive::Any, _) => true,
                (Primitive::Void, Value::Null) => true,
                (Primitive::Bool, Value::Bool(_)) => true,
                (Primitive::Str, Value::Str(_)) => true,
                (Primitive::Buffer, Value::Buffer(_)) => true,
                (Primitive::List, Value::List(_)) => true,
                (Primitive::Map, Value::Map(_)) => true,
                (Primitive::Result, Value::Result(_)) => true,
                (p, Value::Number(n)) if p.is_integer() => n.fract() == 0.0,
                (Primitive::Float | Primitive::Double, Value::Number(_)) => true,
                _ => false,
            },
            DescriptorKind::Class(name) => match v {
                Value::Instance(instance) => {
                    let mut class = Some(&instance.class);
                    while let Some(c) = class {
                        if c.name == *name {
                            return true;
                        }
                        class = c.parent.as_ref();
                    }
                    false
                }
                _ => false,
            },
            DescriptorKind::Enum(name) => match v {
                Value::EnumChild(child) => child.def.name == *name,
                _ => false,
            },
            DescriptorKind::Function => matches!(
                v,
                Value::Closure(_) | Value::Native(_) | Value::BoundMethod(_)
            ),
        }
    }

    // ========== 인덱스 ==========

    pub(super) fn get_index(&mut self, object: Value, index: Value) -> VmResult<Value> {
        match &object {
            Value::List(items) => {
                let items = items.read();
                let i = wrap_index(index.as_integer()?, items.len())?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = wrap_index(index.as_integer()?, chars.len())?;
                Ok(Value::str(chars[i].encode_utf8(&mut [0; 4])))
            }
            Value::Buffer(bytes) => {
                let bytes = bytes.read();
                let i = wrap_index(index.as_integer()?, bytes.len())?;
                Ok(Value::Number(bytes[i] as f64))
            }
            Value::Map(entries) => {
                let key = map_key(&index)?;
                entries.read().get(&key).cloned().ok_or_else(|| {
                    err(
                        ErrorKind::IndexError,
                        format!("key {} not found", index.repr()),
                    )
                })
            }
            Value::Instance(instance) => {
                let method = instance
                    .class
                    .operator("bracket")
                    .or_else(|| instance.class.operator("get"))
                    .ok_or_else(|| {
                        err(
                            ErrorKind::TypeError,
                            format!("{} is not subscriptable", instance.class.name),
                        )
                    })?;
                self.call_sync(bind(&object, method), vec![index], vec![])
            }
            other => Err(err(
                ErrorKind::TypeError,
                format!("{} is not subscriptable", other.type_name()),
            )),
        }
    }

    pub(super) fn set_index(&mut self, object: Value, index: Value, value: Value) -> VmResult<()> {
        match &object {
            Value::List(items) => {
                let mut items = items.write();
                let i = wrap_index(index.as_integer()?, items.len())?;
                items[i] = value;
                Ok(())
            }
            Value::Buffer(bytes) => {
                let byte = value.as_integer()?;
                let byte = u8::try_from(byte).map_err(|_| {
                    err(
                        ErrorKind::RangeError,
                        format!("{} does not fit in a byte", byte),
                    )
                })?;
                let mut bytes = bytes.write();
                let i = wrap_index(index.as_integer()?, bytes.len())?;
                bytes[i] = byte;
                Ok(())
            }
            Value::Map(entries) => {
                let key = map_key(&index)?;
                entries.write().insert(key, value);
                Ok(())
            }
            Value::Instance(instance) => {
                let method = instance.class.operator("set").ok_or_else(|| {
                    err(
                        ErrorKind::TypeError,
                        format!("{} does not support item assignment", instance.class.name),
                    )
                })?;
                self.call_sync(bind(&object, method), vec![index, value], vec![])?;
                Ok(())
            }
            other => Err(err(
                ErrorKind::TypeError,
                format!("{} does not support item assignment", other.type_name()),
            )),
        }
    }

    /// 반복 순서대로의 원소 스냅샷
    pub(super) fn iteration_items(source: &Value) -> VmResult<Vec<Value>> {
        Ok(match source {
            Value::List(items) => items.read().clone(),
            Value::Str(s) => s
                .chars()
                .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                .collect(),
            Value::Buffer(bytes) => bytes.read().iter().map(|b| Value::Number(*b as f64)).collect(),
            Value::Map(entries) => entries.read().keys().map(MapKey::to_value).collect(),
            other => {
                return Err(err(
                    ErrorKind::TypeError,
                    format!("cannot iterate over {}", other.type_name()),
                ));
            }
        })
    }

    // ========== 속성 ==========

    pub(super) fn get_attr(&mut self, object: &Value, name: &str, internal: bool) -> VmResult<Value> {
        match object {
            Value::Instance(instance) => Self::instance_attr(object, instance, name, internal),
            Value::Class(class) => {
                if let Some(member) = class.statics.get(name) {
                    if member.private && !internal {
                        return Err(private_error(name, &class.name));
                    }
                    return Ok(member.var.get());
                }
                match class.method(name) {
                    Some(m) if m.is_static => {
                        if m.private && !internal {
                            return Err(private_error(name, &class.name));
                        }
                        Ok(bind(object, m.closure))
                    }
                    _ => Err(err(
                        ErrorKind::ScopeError,
                        format!("class {} has no static member `{}`", class.name, name),
                    )),
                }
            }
            Value::Enum(def) => {
                let index = def
                    .variants
                    .iter()
                    .position(|v| v.name == name)
                    .ok_or_else(|| {
                        err(
                            ErrorKind::ScopeError,
                            format!("enum {} has no variant `{}`", def.name, name),
                        )
                    })?;
                if def.variants[index].fields.is_empty() {
                    Ok(Value::EnumChild(Arc::new(EnumChild::new(def.clone(), index, vec![]))))
                } else {
                    Ok(Value::EnumVariant(def.clone(), index))
                }
            }
            Value::EnumChild(child) => child.get_field(name).ok_or_else(|| {
                err(
                    ErrorKind::ScopeError,
                    format!("{} has no field `{}`", object, name),
                )
            }),
            Value::Namespace(ns) => ns.members.get(name).cloned().ok_or_else(|| {
                err(
                    ErrorKind::ScopeError,
                    format!("namespace {} has no member `{}`", ns.name, name),
                )
            }),
            Value::Result(r) => r.member(name).ok_or_else(|| {
                err(
                    ErrorKind::ScopeError,
                    format!("result has no member `{}`", name),
                )
            }),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::List(items) if name == "length" => Ok(Value::Number(items.read().len() as f64)),
            Value::Map(entries) if name == "length" => Ok(Value::Number(entries.read().len() as f64)),
            Value::Buffer(bytes) if name == "length" => Ok(Value::Number(bytes.read().len() as f64)),
            other => Err(err(
                ErrorKind::TypeError,
                format!("{} has no member `{}`", other.type_name(), name),
            )),
        }
    }

    fn instance_attr(object: &Value, instance: &Instance, name: &str, internal: bool) -> VmResult<Value> {
        let class = &instance.class;
        if let Some(ix) = class.field_index(name) {
            if class.fields[ix].private && !internal {
                return Err(private_error(name, &class.name));
            }
            return Ok(instance.fields.read().get(ix).cloned().unwrap_or(Value::Null));
        }
        if let Some(m) = class.method(name) {
            if m.private && !internal {
                return Err(private_error(name, &class.name));
            }
            if m.is_static {
                return Ok(bind(&Value::Class(class.clone()), m.closure));
            }
            return Ok(bind(object, m.closure));
        }
        if let Some(op) = class.operator(name) {
            return Ok(bind(object, op));
        }
        if let Some(member) = class.statics.get(name) {
            if member.private && !internal {
                return Err(private_error(name, &class.name));
            }
            return Ok(member.var.get());
        }
        Err(err(
            ErrorKind::ScopeError,
            format!("{} has no member `{}`", class.name, name),
        ))
    }

    pub(super) fn set_attr(&mut self, object: &Value, name: &str, value: Value, internal: bool) -> VmResult<()> {
        match object {
            Value::Instance(instance) => {
                let class = &instance.class;
                if let Some(ix) = class.field_index(name) {
                    if class.fields[ix].private && !internal {
                        return Err(private_error(name, &class.name));
                    }
                    if let Some(slot) = instance.fields.write().get_mut(ix) {
                        *slot = value;
                    }
                    return Ok(());
                }
                match class.statics.get(name) {
                    Some(member) if member.private && !internal => Err(private_error(name, &class.name)),
                    Some(member) => member.var.set(value),
                    None => Err(err(
                        ErrorKind::ScopeError,
                        format!("{} has no field `{}`", class.name, name),
                    )),
                }
            }
            Value::Class(class) => match class.statics.get(name) {
                Some(member) if member.private && !internal => Err(private_error(name, &class.name)),
                Some(member) => member.var.set(value),
                None => Err(err(
                    ErrorKind::ScopeError,
                    format!("class {} has no static field `{}`", class.name, name),
                )),
            },
            Value::EnumChild(child) => {
                let ix = child.field_index(name).ok_or_else(|| {
                    err(
                        ErrorKind::ScopeError,
                        format!("{} has no field `{}`", object, name),
                    )
                })?;
                if let Some(slot) = child.fields.lock().get_mut(ix) {
                    *slot = value;
                }
                Ok(())
            }
            other => Err(err(
                ErrorKind::TypeError,
                format!("cannot set `{}` on {}", name, other.type_name()),
            )),
        }
    }

    /// `super.name`: this and the parent class are on the stack.
    pub(super) fn handle_get_super(&mut self, name: &str) -> VmResult<Value> {
        let parent = match self.pop()? {
            Value::Class(c) => c,
            other => {
                return Err(err(
                    ErrorKind::TypeError,
                    format!("super class is {}", other.type_name()),
                ));
            }
        };
        let this = self.pop()?;
        let method = if name == "init" {
            parent.constructor.read().clone()
        } else {
            parent
                .method(name)
                .map(|m| m.closure)
                .or_else(|| parent.operator(name))
        };
        match method {
            Some(m) => Ok(bind(&this, m)),
            None => self.get_attr(&this, name, true),
        }
    }

    // ========== 변환 ==========

    /// Text form of a value; instances may override it with a `string`
    /// operator.
    pub fn stringify(&mut self, v: &Value) -> VmResult<String> {
        match v {
            Value::Instance(instance) => {
                if let Some(op) = instance.class.operator("string")
                    && let Some(result) = self.call_safe(bind(v, op), vec![])
                {
                    return Ok(match result {
                        Value::Str(s) => s.to_string(),
                        other => other.to_string(),
                    });
                }
                Ok(v.to_string())
            }
            Value::Cell(var) => self.stringify(&var.get()),
            other => Ok(other.to_string()),
        }
    }

    /// Numeric form of a value; instances may override it with a `number`
    /// operator.
    pub fn to_number(&mut self, v: &Value) -> VmResult<f64> {
        match v {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().map_err(|_| {
                err(
                    ErrorKind::TypeError,
                    format!("cannot convert {:?} to a number", s),
                )
            }),
            Value::Instance(instance) => {
                if let Some(op) = instance.class.operator("number")
                    && let Some(result) = self.call_safe(bind(v, op), vec![])
                {
                    return result.as_number();
                }
                Err(err(
                    ErrorKind::TypeError,
                    format!("cannot convert {} to a number", instance.class.name),
                ))
            }
            other => other.as_number(),
        }
    }
}

fn numeric(op: OpCode, x: f64, y: f64) -> VmResult<f64> {
    match op {
        OpCode::Add => Ok(x + y),
        OpCode::Sub => Ok(x - y),
        OpCode::Mul => Ok(x * y),
        OpCode::Div | OpCode::Mod if y == 0.0 => Err(err(
            ErrorKind::DivisionByZero,
            format!("{} by zero", if op == OpCode::Div { "division" } else { "modulo" }),
        )),
        OpCode::Div => Ok(x / y),
        OpCode::Mod => Ok(x % y),
        OpCode::Pow => Ok(x.powf(y)),
        other => Err(err(
            ErrorKind::TypeError,
            format!("{} is not an arithmetic operator on {}", other, format_number(x)),
        )),
    }
}
