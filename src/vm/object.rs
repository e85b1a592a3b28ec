//! Object runtime model: closures, classes, instances, enum children,
//! bound methods, namespaces and patterns.
//!
//! Classes own code, instances own data. A class's tables are flattened from
//! its parent when the class is created, so lookups never walk the chain.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::bytecode::{ByteCode, EnumDef};
use super::value::{Value, Var};

pub struct Closure {
    pub function: Arc<ByteCode>,
    pub upvalues: Vec<Var>,
    /// 생성 시점에 평가된 기본 인자 값 (뒤쪽 파라미터부터 채움)
    pub defaults: Vec<Value>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.function.name)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub default: Value,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub struct StaticMember {
    pub var: Var,
    pub private: bool,
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub closure: Arc<Closure>,
    pub private: bool,
    pub is_static: bool,
}

pub struct LanguageClass {
    pub name: String,
    pub parent: Option<Arc<LanguageClass>>,
    pub generics: Vec<String>,
    /// instance fields, parent fields first
    pub fields: Vec<FieldDef>,
    pub statics: IndexMap<String, StaticMember>,
    pub methods: RwLock<IndexMap<String, MethodEntry>>,
    pub operators: RwLock<IndexMap<String, Arc<Closure>>>,
    pub constructor: RwLock<Option<Arc<Closure>>>,
}

impl LanguageClass {
    /// 부모 테이블을 복사해 평탄화한 클래스를 만든다. 자식 정의가 우선.
    pub fn new(
        name: String,
        parent: Option<Arc<LanguageClass>>,
        generics: Vec<String>,
        own_fields: Vec<FieldDef>,
        own_statics: IndexMap<String, StaticMember>,
    ) -> Self {
        let mut fields = Vec::new();
        let mut statics = IndexMap::new();
        let mut methods = IndexMap::new();
        let mut operators = IndexMap::new();
        let mut constructor = None;
        if let Some(parent) = &parent {
            for field in &parent.fields {
                if !own_fields.iter().any(|f| f.name == field.name) {
                    fields.push(field.clone());
                }
            }
            for (name, member) in &parent.statics {
                statics.insert(name.clone(), member.clone());
            }
            methods = parent.methods.read().clone();
            operators = parent.operators.read().clone();
            constructor = parent.constructor.read().clone();
        }
        fields.extend(own_fields);
        statics.extend(own_statics);
        Self {
            name,
            parent,
            generics,
            fields,
            statics,
            methods: RwLock::new(methods),
            operators: RwLock::new(operators),
            constructor: RwLock::new(constructor),
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<MethodEntry> {
        self.methods.read().get(name).cloned()
    }

    pub fn operator(&self, name: &str) -> Option<Arc<Closure>> {
        self.operators.read().get(name).cloned()
    }

    pub fn is_subclass_of(&self, other: &LanguageClass) -> bool {
        if std::ptr::eq(self, other) || self.name == other.name {
            return true;
        }
        self.parent
            .as_ref()
            .is_some_and(|p| p.is_subclass_of(other))
    }
}

impl fmt::Debug for LanguageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageClass")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.read().len())
            .finish()
    }
}

pub struct Instance {
    pub class: Arc<LanguageClass>,
    pub fields: RwLock<Vec<Value>>,
}

impl Instance {
    /// 필드 기본값을 복사해 새 인스턴스를 만든다.
    pub fn new(class: Arc<LanguageClass>) -> Self {
        let fields = class.fields.iter().map(|f| f.default.clone()).collect();
        Self {
            class,
            fields: RwLock::new(fields),
        }
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        let ix = self.class.field_index(name)?;
        self.fields.read().get(ix).cloned()
    }

    /// Returns false when the class has no such field.
    pub fn set_field(&self, name: &str, value: Value) -> bool {
        match self.class.field_index(name) {
            Some(ix) => {
                self.fields.write()[ix] = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({})", self.class.name)
    }
}

#[derive(Debug)]
pub struct EnumChild {
    pub def: Arc<EnumDef>,
    pub variant: usize,
    pub fields: Mutex<Vec<Value>>,
}

impl EnumChild {
    pub fn new(def: Arc<EnumDef>, variant: usize, fields: Vec<Value>) -> Self {
        Self {
            def,
            variant,
            fields: Mutex::new(fields),
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.def.variants[self.variant]
            .fields
            .iter()
            .position(|f| f == name)
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        let ix = self.field_index(name)?;
        self.fields.lock().get(ix).cloned()
    }
}

/// 메서드와 수신자 (slot 0에 들어갈 값)
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Arc<Closure>,
}

#[derive(Debug)]
pub struct Namespace {
    pub name: String,
    pub members: IndexMap<String, Value>,
}

/// Pattern built by `MakePattern`: target, required field equalities and
/// the field names bound on success.
#[derive(Debug)]
pub struct Pattern {
    pub target: Value,
    pub required: Vec<(Arc<str>, Value)>,
    pub binds: Vec<Arc<str>>,
}

impl Pattern {
    /// 매칭에 성공하면 바인딩할 값들을 순서대로 돌려준다.
    pub fn matches(&self, value: &Value) -> Option<Vec<Value>> {
        let get: Box<dyn Fn(&str) -> Option<Value> + '_> = match (&self.target, value) {
            (Value::EnumVariant(def, index), Value::EnumChild(child))
                if def.name == child.def.name && *index == child.variant =>
            {
                Box::new(|name| child.get_field(name))
            }
            (Value::EnumChild(target), Value::EnumChild(child))
                if target.def.name == child.def.name && target.variant == child.variant =>
            {
                Box::new(|name| child.get_field(name))
            }
            (Value::Class(class), Value::Instance(instance))
                if instance.class.is_subclass_of(class) =>
            {
                Box::new(|name| instance.get_field(name))
            }
            _ => return None,
        };
        for (field, expected) in &self.required {
            if !get(field).is_some_and(|actual| actual.equals(expected)) {
                return None;
            }
        }
        self.binds.iter().map(|name| get(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::VariantDef;

    fn shape() -> Arc<EnumDef> {
        Arc::new(EnumDef {
            name: "Shape".into(),
            variants: vec![
                VariantDef {
                    name: "Circle".into(),
                    fields: vec!["r".into()],
                },
                VariantDef {
                    name: "Rect".into(),
                    fields: vec!["w".into(), "h".into()],
                },
            ],
        })
    }

    fn class(name: &str, parent: Option<Arc<LanguageClass>>, fields: &[&str]) -> Arc<LanguageClass> {
        let fields = fields
            .iter()
            .map(|f| FieldDef {
                name: f.to_string(),
                default: Value::Null,
                private: false,
            })
            .collect();
        Arc::new(LanguageClass::new(
            name.into(),
            parent,
            vec![],
            fields,
            IndexMap::new(),
        ))
    }

    #[test]
    fn test_flattened_fields() {
        let base = class("Base", None, &["a", "b"]);
        let child = class("Child", Some(base.clone()), &["b", "c"]);
        let names: Vec<&str> = child.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(child.is_subclass_of(&base));
        assert!(!base.is_subclass_of(&child));
    }

    #[test]
    fn test_instance_copies_defaults() {
        let c = class("P", None, &["x"]);
        let a = Instance::new(c.clone());
        let b = Instance::new(c);
        assert!(a.set_field("x", Value::Number(3.0)));
        assert_eq!(a.get_field("x"), Some(Value::Number(3.0)));
        assert_eq!(b.get_field("x"), Some(Value::Null));
        assert!(!a.set_field("y", Value::Null));
    }

    #[test]
    fn test_enum_pattern_binds_fields() {
        let def = shape();
        let child = Value::EnumChild(Arc::new(EnumChild::new(
            def.clone(),
            1,
            vec![Value::Number(2.0), Value::Number(5.0)],
        )));
        let pattern = Pattern {
            target: Value::EnumVariant(def.clone(), 1),
            required: vec![(Arc::from("w"), Value::Number(2.0))],
            binds: vec![Arc::from("h")],
        };
        assert_eq!(pattern.matches(&child), Some(vec![Value::Number(5.0)]));

        let wrong = Pattern {
            target: Value::EnumVariant(def, 0),
            required: vec![],
            binds: vec![],
        };
        assert_eq!(wrong.matches(&child), None);
    }
}
