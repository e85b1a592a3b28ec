//! 런타임 값 모델
//!
//! - [`Value`]: 태그된 런타임 값. 모든 heap 값은 `Arc` 핸들이라 `Send + Sync`
//! - [`Var`]: 값 하나를 감싸는 공유 가변 셀. 복제하면 셀을 공유한다
//! - [`MapKey`]: map 키로 쓸 수 있는 (hashable) 값

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::bytecode::EnumDef;
use super::machine::{ErrorKind, VmResult, err};
use super::object::{BoundMethod, Closure, EnumChild, Instance, LanguageClass, Namespace, Pattern};
use crate::natives::NativeFunction;

pub type List = Arc<RwLock<Vec<Value>>>;
pub type Map = Arc<RwLock<IndexMap<MapKey, Value>>>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Buffer(Arc<RwLock<Vec<u8>>>),
    List(List),
    Map(Map),
    Closure(Arc<Closure>),
    Native(Arc<NativeFunction>),
    Class(Arc<LanguageClass>),
    Instance(Arc<Instance>),
    Enum(Arc<EnumDef>),
    /// 필드가 있는 variant의 생성자
    EnumVariant(Arc<EnumDef>, usize),
    EnumChild(Arc<EnumChild>),
    BoundMethod(Arc<BoundMethod>),
    Namespace(Arc<Namespace>),
    Reference(Var),
    /// 스택 슬롯에 놓인 로컬 변수 셀 (사용자에게 노출되지 않음)
    Cell(Var),
    Spread(Arc<Vec<Value>>),
    Pattern(Arc<Pattern>),
    Result(Arc<ResultValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Ok(Value),
    Err { kind: String, message: String },
}

impl ResultValue {
    pub fn member(&self, name: &str) -> Option<Value> {
        match (self, name) {
            (ResultValue::Ok(_), "ok") => Some(Value::Bool(true)),
            (ResultValue::Err { .. }, "ok") => Some(Value::Bool(false)),
            (ResultValue::Ok(v), "value") => Some(v.clone()),
            (ResultValue::Err { .. }, "value") => Some(Value::Null),
            (ResultValue::Ok(_), "kind" | "message") => Some(Value::Null),
            (ResultValue::Err { kind, .. }, "kind") => Some(Value::str(kind)),
            (ResultValue::Err { message, .. }, "message") => Some(Value::str(message)),
            _ => None,
        }
    }
}

/// Hashable subset of values usable as map keys and memo keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Number(u64),
    Str(Arc<str>),
}

impl MapKey {
    pub fn from_value(value: &Value) -> Option<MapKey> {
        match value {
            Value::Null => Some(MapKey::Null),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            // -0.0 and 0.0 must hash alike
            Value::Number(n) => Some(MapKey::Number(if *n == 0.0 { 0 } else { n.to_bits() })),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Null => Value::Null,
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            MapKey::Str(s) => Value::Str(s.clone()),
        }
    }
}

struct VarInner {
    value: RwLock<Value>,
    constant: bool,
    range: Option<(f64, f64)>,
}

/// Shared mutable cell. Closures capture by cloning the handle.
#[derive(Clone)]
pub struct Var(Arc<VarInner>);

impl Var {
    /// 초기값에도 range 검사를 적용한다.
    pub fn new(value: Value, constant: bool, range: Option<(f64, f64)>) -> VmResult<Var> {
        if let Some(range) = range {
            check_range(&value, range)?;
        }
        Ok(Var(Arc::new(VarInner {
            value: RwLock::new(value),
            constant,
            range,
        })))
    }

    pub fn cell(value: Value) -> Var {
        Var(Arc::new(VarInner {
            value: RwLock::new(value),
            constant: false,
            range: None,
        }))
    }

    pub fn get(&self) -> Value {
        self.0.value.read().clone()
    }

    pub fn set(&self, value: Value) -> VmResult<()> {
        if self.0.constant {
            return Err(err(
                ErrorKind::ConstantError,
                "cannot assign to a constant".into(),
            ));
        }
        if let Some(range) = self.0.range {
            check_range(&value, range)?;
        }
        *self.0.value.write() = value;
        Ok(())
    }

    pub fn is_constant(&self) -> bool {
        self.0.constant
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.0.range
    }

    pub fn ptr_eq(&self, other: &Var) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({:p})", Arc::as_ptr(&self.0))
    }
}

fn check_range(value: &Value, (min, max): (f64, f64)) -> VmResult<()> {
    let n = value.as_number()?;
    if n < min || n > max {
        return Err(err(
            ErrorKind::RangeError,
            format!(
                "{} is outside the range {}..{}",
                format_number(n),
                format_number(min),
                format_number(max)
            ),
        ));
    }
    Ok(())
}

/// 정수 값은 소수점 없이 출력
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: IndexMap<MapKey, Value>) -> Value {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn buffer(bytes: Vec<u8>) -> Value {
        Value::Buffer(Arc::new(RwLock::new(bytes)))
    }

    pub fn ok(value: Value) -> Value {
        Value::Result(Arc::new(ResultValue::Ok(value)))
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Value {
        Value::Result(Arc::new(ResultValue::Err {
            kind: kind.into(),
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "void".into(),
            Value::Bool(_) => "bool".into(),
            Value::Number(_) => "number".into(),
            Value::Str(_) => "str".into(),
            Value::Buffer(_) => "buffer".into(),
            Value::List(_) => "list".into(),
            Value::Map(_) => "map".into(),
            Value::Closure(_) | Value::Native(_) | Value::BoundMethod(_) => "function".into(),
            Value::Class(c) => format!("class {}", c.name),
            Value::Instance(i) => i.class.name.clone(),
            Value::Enum(e) => format!("enum {}", e.name),
            Value::EnumVariant(e, i) => format!("{}.{}", e.name, e.variants[*i].name),
            Value::EnumChild(c) => c.def.name.clone(),
            Value::Namespace(_) => "namespace".into(),
            Value::Reference(_) => "reference".into(),
            Value::Cell(v) => v.get().type_name(),
            Value::Spread(_) => "spread".into(),
            Value::Pattern(_) => "pattern".into(),
            Value::Result(_) => "result".into(),
        }
    }

    fn mismatch(&self, expected: &str) -> crate::vm::machine::RuntimeError {
        err(
            ErrorKind::TypeError,
            format!("expected {}, found {}", expected, self.type_name()),
        )
    }

    pub fn truthy(&self) -> VmResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            Value::Number(n) => Ok(*n != 0.0),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_number(&self) -> VmResult<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    /// Number that must be a whole value (indices, counts).
    pub fn as_integer(&self) -> VmResult<i64> {
        let n = self.as_number()?;
        if n.fract() != 0.0 {
            return Err(err(
                ErrorKind::TypeError,
                format!("expected an integer, found {}", format_number(n)),
            ));
        }
        Ok(n as i64)
    }

    pub fn as_str(&self) -> VmResult<Arc<str>> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => Err(other.mismatch("str")),
        }
    }

    pub fn as_list(&self) -> VmResult<List> {
        match self {
            Value::List(l) => Ok(l.clone()),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_map(&self) -> VmResult<Map> {
        match self {
            Value::Map(m) => Ok(m.clone()),
            other => Err(other.mismatch("map")),
        }
    }

    /// Structural equality for data, identity for objects.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.equals(other)))
            }
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Enum(a), Value::Enum(b)) => a.name == b.name,
            (Value::EnumVariant(a, i), Value::EnumVariant(b, j)) => a.name == b.name && i == j,
            (Value::EnumChild(a), Value::EnumChild(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if a.def.name != b.def.name || a.variant != b.variant {
                    return false;
                }
                let (fa, fb) = (a.fields.lock().clone(), b.fields.lock().clone());
                fa.len() == fb.len() && fa.iter().zip(fb.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Arc::ptr_eq(a, b),
            (Value::Reference(a), Value::Reference(b)) => a.ptr_eq(b),
            (Value::Cell(a), b) => a.get().equals(b),
            (a, Value::Cell(b)) => a.equals(&b.get()),
            (Value::Result(a), Value::Result(b)) => a == b,
            _ => false,
        }
    }

    /// 중첩 출력용 표현 (문자열은 따옴표로 감싼다)
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Buffer(b) => {
                let bytes: Vec<String> = b.read().iter().map(|x| format!("{:02x}", x)).collect();
                write!(f, "<buffer {}>", bytes.join(" "))
            }
            Value::List(items) => {
                let items: Vec<String> = items.read().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(entries) => {
                let entries: Vec<String> = entries
                    .read()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Closure(c) => write!(f, "<fn {}>", c.function.name),
            Value::Native(n) => write!(f, "<native fn {}>", n.name),
            Value::Class(c) => write!(f, "<class {}>", c.name),
            Value::Instance(i) => write!(f, "<{} instance>", i.class.name),
            Value::Enum(e) => write!(f, "<enum {}>", e.name),
            Value::EnumVariant(e, i) => write!(f, "<variant {}.{}>", e.name, e.variants[*i].name),
            Value::EnumChild(c) => {
                let variant = &c.def.variants[c.variant];
                let fields = c.fields.lock();
                if fields.is_empty() {
                    write!(f, "{}.{}", c.def.name, variant.name)
                } else {
                    let inner: Vec<String> = fields.iter().map(Value::repr).collect();
                    write!(f, "{}.{}({})", c.def.name, variant.name, inner.join(", "))
                }
            }
            Value::BoundMethod(m) => write!(f, "<bound fn {}>", m.method.function.name),
            Value::Namespace(ns) => write!(f, "<namespace {}>", ns.name),
            Value::Reference(v) => write!(f, "&{}", v.get()),
            Value::Cell(v) => write!(f, "{}", v.get()),
            Value::Spread(items) => write!(f, "<spread of {}>", items.len()),
            Value::Pattern(p) => write!(f, "<pattern {}>", p.target),
            Value::Result(r) => match r.as_ref() {
                ResultValue::Ok(v) => write!(f, "ok({})", v.repr()),
                ResultValue::Err { kind, message } => write!(f, "err({}: {})", kind, message),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Cell(v) => write!(f, "Cell({:?})", v),
            other => write!(f, "{}({})", other.type_name(), other.repr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_shares_cell() {
        let a = Var::cell(Value::Number(1.0));
        let b = a.clone();
        b.set(Value::Number(2.0)).unwrap();
        assert_eq!(a.get(), Value::Number(2.0));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_constant_is_write_once() {
        let v = Var::new(Value::str("fixed"), true, None).unwrap();
        let e = v.set(Value::str("again")).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ConstantError);
        assert_eq!(v.get(), Value::str("fixed"));
    }

    #[test]
    fn test_range_checked_on_every_write() {
        assert!(Var::new(Value::Number(11.0), false, Some((0.0, 10.0))).is_err());
        let v = Var::new(Value::Number(5.0), false, Some((0.0, 10.0))).unwrap();
        assert!(v.set(Value::Number(10.0)).is_ok());
        let e = v.set(Value::Number(-1.0)).unwrap_err();
        assert_eq!(e.kind, ErrorKind::RangeError);
        assert_eq!(v.get(), Value::Number(10.0));
    }

    #[test]
    fn test_map_key_zero_sign() {
        assert_eq!(
            MapKey::from_value(&Value::Number(0.0)),
            MapKey::from_value(&Value::Number(-0.0))
        );
        assert!(MapKey::from_value(&Value::list(vec![])).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(20.0).to_string(), "20");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        let l = Value::list(vec![Value::Number(1.0), Value::str("a"), Value::Null]);
        assert_eq!(l.to_string(), "[1, \"a\", null]");
        assert_eq!(Value::error("IOError", "gone").to_string(), "err(IOError: gone)");
    }

    #[test]
    fn test_conversions_fail_on_mismatch() {
        assert_eq!(
            Value::str("x").as_number().unwrap_err().kind,
            ErrorKind::TypeError
        );
        assert!(Value::list(vec![]).truthy().is_err());
        assert_eq!(Value::Null.truthy().unwrap(), false);
    }

    #[test]
    fn test_structural_list_equality() {
        let a = Value::list(vec![Value::Number(1.0), Value::str("x")]);
        let b = Value::list(vec![Value::Number(1.0), Value::str("x")]);
        assert_eq!(a, b);
        assert_ne!(a, Value::list(vec![]));
    }
}
