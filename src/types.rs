//! Compile-time type lattice.
//!
//! Types only exist while compiling: the VM never sees them except as
//! [`TypeDescriptor`](crate::vm::bytecode::TypeDescriptor) constants used by
//! `is` checks. Every relation here is a pure function of its operand types.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use strum::{Display, EnumString, FromRepr};

use crate::ast::{BinaryOp, ExprS, UnaryOp};
use crate::vm::bytecode::{DescriptorKind, TypeDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u32)]
pub enum Primitive {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Str,
    Buffer,
    List,
    Map,
    Result,
    Void,
    Any,
}

impl Primitive {
    /// Position in the widening order `byte < short < int < long < float < double`.
    pub fn numeric_rank(self) -> Option<u8> {
        match self {
            Primitive::Byte => Some(0),
            Primitive::Short => Some(1),
            Primitive::Int => Some(2),
            Primitive::Long => Some(3),
            Primitive::Float => Some(4),
            Primitive::Double => Some(5),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.numeric_rank().is_some()
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamType {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
}

/// Signature of a function, method, lambda or native.
#[derive(Debug, Clone, PartialEq)]
pub struct FnSig {
    pub params: Vec<ParamType>,
    pub ret: Type,
    pub varargs: bool,
    pub kwargs: bool,
    pub is_async: bool,
    pub catcher: bool,
}

impl FnSig {
    pub fn simple(params: Vec<Type>, ret: Type) -> Self {
        FnSig {
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| ParamType {
                    name: format!("arg{}", i),
                    ty,
                    has_default: false,
                })
                .collect(),
            ret,
            varargs: false,
            kwargs: false,
            is_async: false,
            catcher: false,
        }
    }

    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.has_default).count()
    }

    /// Type a call to this signature evaluates to.
    pub fn call_result(&self) -> Type {
        if self.is_async {
            Type::VOID
        } else if self.catcher {
            Type::RESULT
        } else {
            self.ret.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldType {
    pub ty: Type,
    pub private: bool,
    pub is_static: bool,
    /// initializer, reused by implicit constructors of subclasses
    pub default: Option<ExprS>,
}

#[derive(Debug, Clone)]
pub struct MethodType {
    pub sig: Rc<FnSig>,
    pub private: bool,
    pub is_static: bool,
}

/// Compile-time view of a class. Parent tables are merged in when the
/// parent is attached, mirroring the runtime flattening.
#[derive(Debug, Clone)]
pub struct ClassType {
    pub name: String,
    pub generics: Vec<String>,
    pub parent: Option<ClassRef>,
    pub fields: IndexMap<String, FieldType>,
    pub methods: IndexMap<String, MethodType>,
    pub operators: IndexMap<String, Rc<FnSig>>,
    pub constructor: Option<Rc<FnSig>>,
}

pub type ClassRef = Rc<RefCell<ClassType>>;

impl ClassType {
    pub fn new(name: impl Into<String>, generics: Vec<String>) -> Self {
        Self {
            name: name.into(),
            generics,
            parent: None,
            fields: IndexMap::new(),
            methods: IndexMap::new(),
            operators: IndexMap::new(),
            constructor: None,
        }
    }

    pub fn inherit(&mut self, parent: &ClassRef) {
        let p = parent.borrow();
        for (name, field) in &p.fields {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| field.clone());
        }
        for (name, method) in &p.methods {
            self.methods
                .entry(name.clone())
                .or_insert_with(|| method.clone());
        }
        for (name, op) in &p.operators {
            self.operators
                .entry(name.clone())
                .or_insert_with(|| op.clone());
        }
        self.parent = Some(parent.clone());
    }

    pub fn is_subclass_of(&self, other: &ClassType) -> bool {
        if self.name == other.name {
            return true;
        }
        match &self.parent {
            Some(p) => p.borrow().is_subclass_of(other),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<(String, Vec<String>)>,
}

impl EnumType {
    pub fn variant(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|(n, _)| n == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceType {
    pub name: String,
    pub members: IndexMap<String, Type>,
}

#[derive(Debug, Clone)]
pub enum Type {
    Primitive(Primitive),
    /// The class object itself (callable, holds statics).
    Class(ClassRef),
    Instance {
        class: ClassRef,
        generics: Vec<Type>,
    },
    Function(Rc<FnSig>),
    /// The enum object itself (holds variants).
    Enum(Rc<EnumType>),
    /// Constructor of a variant that carries fields.
    EnumVariant {
        owner: Rc<EnumType>,
        index: usize,
    },
    /// A value of the enum (any variant).
    EnumValue(Rc<EnumType>),
    Namespace(Rc<NamespaceType>),
    Reference(Box<Type>),
    Generic(String),
}

impl Type {
    pub const BYTE: Type = Type::Primitive(Primitive::Byte);
    pub const INT: Type = Type::Primitive(Primitive::Int);
    pub const LONG: Type = Type::Primitive(Primitive::Long);
    pub const FLOAT: Type = Type::Primitive(Primitive::Float);
    pub const DOUBLE: Type = Type::Primitive(Primitive::Double);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const STR: Type = Type::Primitive(Primitive::Str);
    pub const BUFFER: Type = Type::Primitive(Primitive::Buffer);
    pub const LIST: Type = Type::Primitive(Primitive::List);
    pub const MAP: Type = Type::Primitive(Primitive::Map);
    pub const RESULT: Type = Type::Primitive(Primitive::Result);
    pub const VOID: Type = Type::Primitive(Primitive::Void);
    pub const ANY: Type = Type::Primitive(Primitive::Any);

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.primitive().is_some_and(Primitive::is_numeric)
    }

    /// `any` and unresolved generics accept every operation.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Any) | Type::Generic(_))
    }

    pub fn deref(&self) -> &Type {
        match self {
            Type::Reference(inner) => inner.deref(),
            other => other,
        }
    }

    /// Descriptor stored in the constant pool for runtime `is` checks.
    pub fn descriptor(&self) -> TypeDescriptor {
        match self {
            Type::Primitive(p) => TypeDescriptor::primitive(*p),
            Type::Class(c) | Type::Instance { class: c, .. } => {
                let generics = match self {
                    Type::Instance { generics, .. } => {
                        generics.iter().map(Type::descriptor).collect()
                    }
                    _ => vec![],
                };
                TypeDescriptor {
                    kind: DescriptorKind::Class(c.borrow().name.clone()),
                    generics,
                }
            }
            Type::Enum(e) | Type::EnumValue(e) | Type::EnumVariant { owner: e, .. } => {
                TypeDescriptor {
                    kind: DescriptorKind::Enum(e.name.clone()),
                    generics: vec![],
                }
            }
            Type::Function(_) => TypeDescriptor {
                kind: DescriptorKind::Function,
                generics: vec![],
            },
            Type::Reference(inner) => inner.descriptor(),
            Type::Namespace(_) | Type::Generic(_) => TypeDescriptor::primitive(Primitive::Any),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::Class(a), Type::Class(b)) => a.borrow().name == b.borrow().name,
            (
                Type::Instance {
                    class: a,
                    generics: ga,
                },
                Type::Instance {
                    class: b,
                    generics: gb,
                },
            ) => a.borrow().name == b.borrow().name && ga == gb,
            (Type::Function(a), Type::Function(b)) => {
                a.ret == b.ret
                    && a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.ty == y.ty)
                    && a.varargs == b.varargs
            }
            (Type::Enum(a), Type::Enum(b)) | (Type::EnumValue(a), Type::EnumValue(b)) => {
                a.name == b.name
            }
            (
                Type::EnumVariant {
                    owner: a,
                    index: ia,
                },
                Type::EnumVariant {
                    owner: b,
                    index: ib,
                },
            ) => a.name == b.name && ia == ib,
            (Type::Namespace(a), Type::Namespace(b)) => a.name == b.name,
            (Type::Reference(a), Type::Reference(b)) => a == b,
            (Type::Generic(a), Type::Generic(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{}", p),
            Type::Class(c) => write!(f, "class {}", c.borrow().name),
            Type::Instance { class, generics } => {
                write!(f, "{}", class.borrow().name)?;
                if !generics.is_empty() {
                    let inner: Vec<String> = generics.iter().map(|g| g.to_string()).collect();
                    write!(f, "<{}>", inner.join(", "))?;
                }
                Ok(())
            }
            Type::Function(sig) => {
                let params: Vec<String> = sig.params.iter().map(|p| p.ty.to_string()).collect();
                write!(f, "fn({}) -> {}", params.join(", "), sig.ret)
            }
            Type::Enum(e) => write!(f, "enum {}", e.name),
            Type::EnumVariant { owner, index } => {
                write!(f, "{}.{}", owner.name, owner.variants[*index].0)
            }
            Type::EnumValue(e) => write!(f, "{}", e.name),
            Type::Namespace(ns) => write!(f, "namespace {}", ns.name),
            Type::Reference(inner) => write!(f, "&{}", inner),
            Type::Generic(name) => write!(f, "{}", name),
        }
    }
}

/// Operator method consulted for a binary operator on a class instance.
pub fn overload_name(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Add => Some("add"),
        BinaryOp::Subtract => Some("sub"),
        BinaryOp::Multiply => Some("mul"),
        BinaryOp::Divide => Some("div"),
        BinaryOp::Modulo => Some("mod"),
        BinaryOp::Power => Some("fastpow"),
        BinaryOp::Equal => Some("eq"),
        BinaryOp::NotEqual => Some("ne"),
        BinaryOp::Less => Some("lt"),
        BinaryOp::LessEqual => Some("lte"),
        // `a > b` is `not (a <= b)`, `a >= b` is `not (a < b)`
        BinaryOp::Greater => Some("lte"),
        BinaryOp::GreaterEqual => Some("lt"),
        BinaryOp::And | BinaryOp::Or => None,
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual
    )
}

/// Wider of two numeric primitives.
pub fn widen(a: Primitive, b: Primitive) -> Primitive {
    match (a.numeric_rank(), b.numeric_rank()) {
        (Some(ra), Some(rb)) if rb > ra => b,
        _ => a,
    }
}

/// Result type of `a op b`, or `None` when the operation is illegal.
pub fn operation(op: BinaryOp, a: &Type, b: &Type) -> Option<Type> {
    let (a, b) = (a.deref(), b.deref());
    if matches!(
        op,
        BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::And | BinaryOp::Or
    ) {
        return Some(Type::BOOL);
    }
    if let Type::Instance { class, .. } = a {
        let overloaded = overload_name(op)
            .and_then(|name| class.borrow().operators.get(name).map(|sig| sig.ret.clone()));
        if let Some(ret) = overloaded {
            return Some(if is_comparison(op) { Type::BOOL } else { ret });
        }
    }
    // str 피연산자가 있으면 다른 쪽은 문자열로 변환된다
    if op == BinaryOp::Add && (*a == Type::STR || *b == Type::STR) {
        return Some(Type::STR);
    }
    if matches!(a, Type::Instance { .. }) {
        return None;
    }
    if a.is_dynamic() || b.is_dynamic() {
        return Some(if is_comparison(op) { Type::BOOL } else { Type::ANY });
    }
    let (pa, pb) = (a.primitive()?, b.primitive()?);
    if pa.is_numeric() && pb.is_numeric() {
        return Some(if is_comparison(op) {
            Type::BOOL
        } else {
            Type::Primitive(widen(pa, pb))
        });
    }
    match (op, pa, pb) {
        (o, Primitive::Str, Primitive::Str) if is_comparison(o) => Some(Type::BOOL),
        (BinaryOp::Multiply, Primitive::Str, n) if n.is_numeric() => Some(Type::STR),
        (BinaryOp::Add, Primitive::List, Primitive::List) => Some(Type::LIST),
        (BinaryOp::Multiply, Primitive::List, n) if n.is_numeric() => Some(Type::LIST),
        (BinaryOp::Add, Primitive::Buffer, Primitive::Buffer) => Some(Type::BUFFER),
        _ => None,
    }
}

pub fn unary(op: UnaryOp, t: &Type) -> Option<Type> {
    let t = t.deref();
    match op {
        UnaryOp::Not => Some(Type::BOOL),
        UnaryOp::Negate if t.is_numeric() || t.is_dynamic() => Some(t.clone()),
        UnaryOp::Negate => None,
    }
}

/// Whether a value of type `assigned` may be stored where `declared` is
/// expected. The numeric part is a fixed table: integer widths mix freely,
/// `int`/`long` and `double` convert both ways, `float` only matches itself.
pub fn can_be_mismatched(declared: &Type, assigned: &Type) -> bool {
    let (declared, assigned) = (declared.deref(), assigned.deref());
    if declared == assigned || declared.is_dynamic() || assigned.is_dynamic() {
        return true;
    }
    if *assigned == Type::VOID {
        return true;
    }
    match (declared, assigned) {
        (Type::Primitive(d), Type::Primitive(a)) => {
            use Primitive::*;
            if d.is_integer() && a.is_integer() {
                return true;
            }
            matches!((d, a), (Int | Long, Double) | (Double, Int | Long))
        }
        (Type::Instance { class: d, .. }, Type::Instance { class: a, .. }) => {
            a.borrow().is_subclass_of(&d.borrow())
        }
        (Type::EnumValue(d), Type::EnumValue(a)) => d.name == a.name,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallMismatch {
    NotCallable,
    ArgumentCount { expected: String, got: usize },
    ArgumentType { index: usize, expected: Type, got: Type },
}

fn check_signature(sig: &FnSig, args: &[Type], spread: bool) -> Result<(), CallMismatch> {
    if !spread {
        let declared = sig.params.len();
        if args.len() < sig.required() || (!sig.varargs && args.len() > declared) {
            let expected = if sig.varargs {
                format!("at least {}", sig.required())
            } else if sig.required() == declared {
                declared.to_string()
            } else {
                format!("{}-{}", sig.required(), declared)
            };
            return Err(CallMismatch::ArgumentCount {
                expected,
                got: args.len(),
            });
        }
    }
    for (index, (param, arg)) in sig.params.iter().zip(args).enumerate() {
        if !can_be_mismatched(&param.ty, arg) {
            return Err(CallMismatch::ArgumentType {
                index,
                expected: param.ty.clone(),
                got: arg.clone(),
            });
        }
    }
    Ok(())
}

/// Result type of calling `callee` with positional `args`. `spread` disables
/// the count check since the expansion length is only known at runtime.
pub fn call(callee: &Type, args: &[Type], spread: bool) -> Result<Type, CallMismatch> {
    match callee.deref() {
        t if t.is_dynamic() => Ok(Type::ANY),
        Type::Function(sig) => {
            check_signature(sig, args, spread)?;
            Ok(sig.call_result())
        }
        Type::Class(class) => {
            let ctor = class.borrow().constructor.clone();
            if let Some(sig) = ctor {
                check_signature(&sig, args, spread)?;
            }
            Ok(Type::Instance {
                class: class.clone(),
                generics: vec![],
            })
        }
        Type::EnumVariant { owner, index } => {
            let arity = owner.variants[*index].1.len();
            if !spread && args.len() != arity {
                return Err(CallMismatch::ArgumentCount {
                    expected: arity.to_string(),
                    got: args.len(),
                });
            }
            Ok(Type::EnumValue(owner.clone()))
        }
        _ => Err(CallMismatch::NotCallable),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    Missing,
    Private,
}

/// Type of `t.name`. `internal` is true when the access goes through `this`.
pub fn access(t: &Type, name: &str, internal: bool) -> Result<Type, AccessError> {
    let visible = |private: bool| {
        if private && !internal {
            Err(AccessError::Private)
        } else {
            Ok(())
        }
    };
    match t.deref() {
        t if t.is_dynamic() => Ok(Type::ANY),
        Type::Instance { class, .. } => {
            let class = class.borrow();
            if let Some(field) = class.fields.get(name).filter(|f| !f.is_static) {
                visible(field.private)?;
                return Ok(field.ty.clone());
            }
            if let Some(method) = class.methods.get(name).filter(|m| !m.is_static) {
                visible(method.private)?;
                return Ok(Type::Function(method.sig.clone()));
            }
            class
                .operators
                .get(name)
                .map(|sig| Type::Function(sig.clone()))
                .ok_or(AccessError::Missing)
        }
        Type::Class(class) => {
            let class = class.borrow();
            if let Some(field) = class.fields.get(name).filter(|f| f.is_static) {
                visible(field.private)?;
                return Ok(field.ty.clone());
            }
            match class.methods.get(name).filter(|m| m.is_static) {
                Some(method) => {
                    visible(method.private)?;
                    Ok(Type::Function(method.sig.clone()))
                }
                None => Err(AccessError::Missing),
            }
        }
        Type::Enum(owner) => {
            let index = owner.variant(name).ok_or(AccessError::Missing)?;
            if owner.variants[index].1.is_empty() {
                Ok(Type::EnumValue(owner.clone()))
            } else {
                Ok(Type::EnumVariant {
                    owner: owner.clone(),
                    index,
                })
            }
        }
        Type::EnumValue(owner) => {
            if owner.variants.iter().any(|(_, f)| f.iter().any(|f| f == name)) {
                Ok(Type::ANY)
            } else {
                Err(AccessError::Missing)
            }
        }
        Type::Namespace(ns) => ns.members.get(name).cloned().ok_or(AccessError::Missing),
        Type::Primitive(Primitive::Result) => match name {
            "ok" => Ok(Type::BOOL),
            "value" => Ok(Type::ANY),
            "kind" | "message" => Ok(Type::STR),
            _ => Err(AccessError::Missing),
        },
        Type::Primitive(Primitive::Str | Primitive::List | Primitive::Buffer | Primitive::Map)
            if name == "length" =>
        {
            Ok(Type::INT)
        }
        _ => Err(AccessError::Missing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_class() -> ClassRef {
        let mut class = ClassType::new("Point", vec![]);
        class.fields.insert(
            "x".into(),
            FieldType {
                ty: Type::INT,
                private: false,
                is_static: false,
                default: None,
            },
        );
        class.fields.insert(
            "secret".into(),
            FieldType {
                ty: Type::STR,
                private: true,
                is_static: false,
                default: None,
            },
        );
        let class = Rc::new(RefCell::new(class));
        let instance = Type::Instance {
            class: class.clone(),
            generics: vec![],
        };
        class.borrow_mut().operators.insert(
            "add".into(),
            Rc::new(FnSig::simple(vec![instance.clone()], instance)),
        );
        class
    }

    #[test]
    fn test_equality_always_bool() {
        assert_eq!(
            operation(BinaryOp::Equal, &Type::LIST, &Type::INT),
            Some(Type::BOOL)
        );
        assert_eq!(
            operation(BinaryOp::NotEqual, &Type::VOID, &Type::BUFFER),
            Some(Type::BOOL)
        );
    }

    #[test]
    fn test_string_addition_stringifies() {
        assert_eq!(operation(BinaryOp::Add, &Type::STR, &Type::INT), Some(Type::STR));
        assert_eq!(operation(BinaryOp::Add, &Type::LIST, &Type::STR), Some(Type::STR));
        assert_eq!(operation(BinaryOp::Subtract, &Type::STR, &Type::INT), None);
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(operation(BinaryOp::Add, &Type::BYTE, &Type::INT), Some(Type::INT));
        assert_eq!(operation(BinaryOp::Multiply, &Type::LONG, &Type::FLOAT), Some(Type::FLOAT));
        assert_eq!(operation(BinaryOp::Divide, &Type::DOUBLE, &Type::INT), Some(Type::DOUBLE));
        assert_eq!(operation(BinaryOp::Less, &Type::INT, &Type::DOUBLE), Some(Type::BOOL));
    }

    #[test]
    fn test_reference_delegates() {
        let r = Type::Reference(Box::new(Type::INT));
        assert_eq!(operation(BinaryOp::Add, &r, &Type::INT), Some(Type::INT));
        assert_eq!(unary(UnaryOp::Negate, &r), Some(Type::INT));
    }

    #[test]
    fn test_instance_operator_lookup() {
        let class = point_class();
        let p = Type::Instance {
            class: class.clone(),
            generics: vec![],
        };
        assert_eq!(operation(BinaryOp::Add, &p, &p), Some(p.clone()));
        assert_eq!(operation(BinaryOp::Subtract, &p, &p), None);
    }

    #[test]
    fn test_string_concat_with_any_operand() {
        let class = point_class();
        let p = Type::Instance {
            class,
            generics: vec![],
        };
        let f = Type::Function(Rc::new(FnSig::simple(vec![], Type::VOID)));
        assert_eq!(operation(BinaryOp::Add, &Type::STR, &p), Some(Type::STR));
        assert_eq!(operation(BinaryOp::Add, &Type::STR, &f), Some(Type::STR));
        // an `add` overload on the left still wins
        assert_eq!(operation(BinaryOp::Add, &p, &Type::STR), Some(p.clone()));

        let plain = Type::Instance {
            class: Rc::new(RefCell::new(ClassType::new("Plain", vec![]))),
            generics: vec![],
        };
        assert_eq!(operation(BinaryOp::Add, &plain, &Type::STR), Some(Type::STR));
        assert_eq!(operation(BinaryOp::Add, &plain, &Type::INT), None);
    }

    #[test]
    fn test_mismatch_table() {
        assert!(can_be_mismatched(&Type::INT, &Type::DOUBLE));
        assert!(can_be_mismatched(&Type::DOUBLE, &Type::INT));
        assert!(can_be_mismatched(&Type::BYTE, &Type::LONG));
        assert!(!can_be_mismatched(&Type::FLOAT, &Type::DOUBLE));
        assert!(!can_be_mismatched(&Type::DOUBLE, &Type::FLOAT));
        assert!(!can_be_mismatched(&Type::STR, &Type::INT));
        assert!(can_be_mismatched(&Type::STR, &Type::ANY));
    }

    #[test]
    fn test_call_checks_arity() {
        let mut sig = FnSig::simple(vec![Type::INT, Type::INT], Type::INT);
        sig.params[1].has_default = true;
        let f = Type::Function(Rc::new(sig));
        assert_eq!(call(&f, &[Type::INT], false), Ok(Type::INT));
        assert!(matches!(
            call(&f, &[], false),
            Err(CallMismatch::ArgumentCount { .. })
        ));
        assert!(matches!(
            call(&f, &[Type::STR], false),
            Err(CallMismatch::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn test_private_access_requires_internal() {
        let class = point_class();
        let p = Type::Instance {
            class,
            generics: vec![],
        };
        assert_eq!(access(&p, "x", false), Ok(Type::INT));
        assert_eq!(access(&p, "secret", false), Err(AccessError::Private));
        assert_eq!(access(&p, "secret", true), Ok(Type::STR));
        assert_eq!(access(&p, "nope", true), Err(AccessError::Missing));
    }

    #[test]
    fn test_primitive_names_parse() {
        assert_eq!("int".parse::<Primitive>(), Ok(Primitive::Int));
        assert_eq!("buffer".parse::<Primitive>(), Ok(Primitive::Buffer));
        assert_eq!(Primitive::Double.to_string(), "double");
    }
}
