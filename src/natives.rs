//! 내장 함수 레지스트리
//!
//! 컴파일러는 여기서 시그니처를, VM은 호출 가능한 값을 가져간다.
//! 시작 시점에 정적으로 등록하며, 임베더가 추가 함수를 등록할 수 있다.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::runtime_io::ReadResult;
use crate::types::{FnSig, NamespaceType, ParamType, Primitive, Type};
use crate::vm::Vm;
use crate::vm::machine::RuntimeError;
use crate::vm::object::Namespace;
use crate::vm::value::{MapKey, Value};

pub type NativeFn = fn(&mut Vm, Vec<Value>) -> Result<Value, NativeError>;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct NativeError {
    pub kind: String,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

impl From<RuntimeError> for NativeError {
    fn from(e: RuntimeError) -> Self {
        Self::new(e.kind.to_string(), e.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// 정확히 N개의 인자만 허용
    Exact(usize),

    /// min ~ max 개의 인자 허용
    Range(usize, usize),

    /// 가변 인자 (임의 개수)
    Variadic,
}

impl Arity {
    pub fn check(&self, got: usize) -> bool {
        match self {
            Arity::Exact(n) => got == *n,
            Arity::Range(min, max) => got >= *min && got <= *max,
            Arity::Variadic => true,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Arity::Exact(n) => format!("{}", n),
            Arity::Range(min, max) if min == max => format!("{}", min),
            Arity::Range(min, max) => format!("{}-{}", min, max),
            Arity::Variadic => "any".to_string(),
        }
    }
}

pub struct NativeFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub params: &'static [Primitive],
    pub ret: Primitive,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({}/{})", self.name, self.arity.description())
    }
}

impl NativeFunction {
    /// Compile-time signature. Parameters past the minimum arity are optional.
    pub fn signature(&self) -> FnSig {
        let required = match self.arity {
            Arity::Exact(n) | Arity::Range(n, _) => n,
            Arity::Variadic => 0,
        };
        FnSig {
            params: self
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| ParamType {
                    name: format!("arg{}", i),
                    ty: Type::Primitive(*p),
                    has_default: i >= required,
                })
                .collect(),
            ret: Type::Primitive(self.ret),
            varargs: self.arity == Arity::Variadic,
            kwargs: false,
            is_async: false,
            catcher: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NativeEntry {
    Function(Arc<NativeFunction>),
    Namespace(Arc<Namespace>),
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    entries: IndexMap<String, NativeEntry>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for f in builtins() {
            registry.register(f);
        }
        registry.register_namespace("math", math());
        registry
    }

    pub fn register(&mut self, f: NativeFunction) {
        self.entries
            .insert(f.name.to_string(), NativeEntry::Function(Arc::new(f)));
    }

    pub fn register_namespace(&mut self, name: &str, functions: impl IntoIterator<Item = NativeFunction>) {
        let members = functions
            .into_iter()
            .map(|f| (f.name.to_string(), Value::Native(Arc::new(f))))
            .collect();
        self.entries.insert(
            name.to_string(),
            NativeEntry::Namespace(Arc::new(Namespace {
                name: name.to_string(),
                members,
            })),
        );
    }

    pub fn get(&self, name: &str) -> Option<&NativeEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        match self.entries.get(name)? {
            NativeEntry::Function(f) => Some(Value::Native(f.clone())),
            NativeEntry::Namespace(ns) => Some(Value::Namespace(ns.clone())),
        }
    }

    pub fn type_of(&self, name: &str) -> Option<Type> {
        match self.entries.get(name)? {
            NativeEntry::Function(f) => Some(Type::Function(Rc::new(f.signature()))),
            NativeEntry::Namespace(ns) => {
                let members = ns
                    .members
                    .iter()
                    .filter_map(|(k, v)| match v {
                        Value::Native(f) => Some((k.clone(), Type::Function(Rc::new(f.signature())))),
                        _ => None,
                    })
                    .collect();
                Some(Type::Namespace(Rc::new(NamespaceType {
                    name: ns.name.clone(),
                    members,
                })))
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ========== builtin 함수 ==========

use Primitive::{Any, Double, Int, List, Map, Str, Void};

const fn native(
    name: &'static str,
    arity: Arity,
    params: &'static [Primitive],
    ret: Primitive,
    func: NativeFn,
) -> NativeFunction {
    NativeFunction {
        name,
        arity,
        params,
        ret,
        func,
    }
}

fn builtins() -> [NativeFunction; 12] {
    [
        native("print", Arity::Variadic, &[], Void, native_print),
        native("input", Arity::Range(0, 1), &[Str], Str, native_input),
        native("str", Arity::Exact(1), &[Any], Str, native_str),
        native("num", Arity::Exact(1), &[Any], Double, native_num),
        native("len", Arity::Exact(1), &[Any], Int, native_len),
        native("push", Arity::Exact(2), &[List, Any], Void, native_push),
        native("pop", Arity::Exact(1), &[List], Any, native_pop),
        native("keys", Arity::Exact(1), &[Map], List, native_keys),
        native("type", Arity::Exact(1), &[Any], Str, native_type),
        native("buffer", Arity::Exact(1), &[Any], Primitive::Buffer, native_buffer),
        native("assert", Arity::Range(1, 2), &[Any, Str], Void, native_assert),
        native("sleep", Arity::Exact(1), &[Double], Void, native_sleep),
    ]
}

fn math() -> [NativeFunction; 6] {
    [
        native("sqrt", Arity::Exact(1), &[Double], Double, math_sqrt),
        native("floor", Arity::Exact(1), &[Double], Double, math_floor),
        native("abs", Arity::Exact(1), &[Double], Double, math_abs),
        native("pow", Arity::Exact(2), &[Double, Double], Double, math_pow),
        native("min", Arity::Exact(2), &[Double, Double], Double, math_min),
        native("max", Arity::Exact(2), &[Double, Double], Double, math_max),
    ]
}

fn number(v: &Value) -> Result<f64, NativeError> {
    Ok(v.as_number()?)
}

fn native_print(vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let mut parts = Vec::with_capacity(args.len());
    for a in &args {
        parts.push(vm.stringify(a)?);
    }
    vm.write_line(&parts.join(" "));
    Ok(Value::Null)
}

fn native_input(vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    if let Some(prompt) = args.first() {
        vm.write(&prompt.to_string());
    }
    match vm.read_line() {
        ReadResult::Ok(line) => Ok(Value::str(&line)),
        ReadResult::WaitingForInput => Err(NativeError::new("IOError", "no input available")),
        ReadResult::Error(e) => Err(NativeError::new("IOError", e)),
    }
}

fn native_str(vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::str(&vm.stringify(&args[0])?))
}

fn native_num(vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    match &args[0] {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| NativeError::new("ValueError", format!("cannot parse {:?} as a number", s))),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        other => Ok(Value::Number(vm.to_number(other)?)),
    }
}

fn native_len(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.read().len(),
        Value::Map(m) => m.read().len(),
        Value::Buffer(b) => b.read().len(),
        other => {
            return Err(NativeError::type_error(format!(
                "{} has no length",
                other.type_name()
            )));
        }
    };
    Ok(Value::Number(n as f64))
}

fn native_push(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let list = args[0].as_list()?;
    list.write().push(args[1].clone());
    Ok(Value::Null)
}

fn native_pop(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let list = args[0].as_list()?;
    let popped = list.write().pop();
    popped.ok_or_else(|| NativeError::new("IndexError", "pop from an empty list"))
}

fn native_keys(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let map = args[0].as_map()?;
    let keys = map.read().keys().map(MapKey::to_value).collect();
    Ok(Value::list(keys))
}

fn native_type(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::str(&args[0].type_name()))
}

fn native_buffer(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    match &args[0] {
        Value::Str(s) => Ok(Value::buffer(s.as_bytes().to_vec())),
        Value::Buffer(b) => Ok(Value::buffer(b.read().clone())),
        Value::List(l) => {
            let mut bytes = Vec::new();
            for v in l.read().iter() {
                let n = number(v)?;
                if !(0.0..=255.0).contains(&n) || n.fract() != 0.0 {
                    return Err(NativeError::new("RangeError", format!("{} is not a byte", n)));
                }
                bytes.push(n as u8);
            }
            Ok(Value::buffer(bytes))
        }
        Value::Number(n) if *n >= 0.0 => Ok(Value::buffer(vec![0; *n as usize])),
        other => Err(NativeError::type_error(format!(
            "cannot make a buffer from {}",
            other.type_name()
        ))),
    }
}

fn native_assert(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    if args[0].truthy()? {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(m) => m.to_string(),
        None => "assertion failed".to_string(),
    };
    Err(NativeError::new("AssertionError", message))
}

fn native_sleep(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    let ms = number(&args[0])?.max(0.0);
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(Value::Null)
}

fn math_sqrt(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.sqrt()))
}

fn math_floor(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.floor()))
}

fn math_abs(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.abs()))
}

fn math_pow(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.powf(number(&args[1])?)))
}

fn math_min(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.min(number(&args[1])?)))
}

fn math_max(_vm: &mut Vm, args: Vec<Value>) -> Result<Value, NativeError> {
    Ok(Value::Number(number(&args[0])?.max(number(&args[1])?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_check() {
        assert!(Arity::Exact(1).check(1));
        assert!(!Arity::Exact(1).check(2));
        assert!(Arity::Range(1, 2).check(2));
        assert!(!Arity::Range(1, 2).check(0));
        assert!(Arity::Variadic.check(7));
        assert_eq!(Arity::Range(1, 2).description(), "1-2");
    }

    #[test]
    fn test_registry_contents() {
        let reg = NativeRegistry::with_builtins();
        assert!(matches!(reg.get("print"), Some(NativeEntry::Function(_))));
        assert!(matches!(reg.get("math"), Some(NativeEntry::Namespace(_))));
        assert!(reg.get("nope").is_none());
        assert!(reg.names().any(|n| n == "sleep"));
    }

    #[test]
    fn test_signatures() {
        let reg = NativeRegistry::with_builtins();
        let Some(Type::Function(assert_sig)) = reg.type_of("assert") else {
            panic!("assert should be a function");
        };
        assert_eq!(assert_sig.required(), 1);
        assert_eq!(assert_sig.params.len(), 2);

        let Some(Type::Function(print_sig)) = reg.type_of("print") else {
            panic!("print should be a function");
        };
        assert!(print_sig.varargs);

        let Some(Type::Namespace(ns)) = reg.type_of("math") else {
            panic!("math should be a namespace");
        };
        assert!(ns.members.contains_key("sqrt"));
    }
}
