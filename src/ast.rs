//! Typed syntax tree consumed by the compiler.
//!
//! The front end (lexer/parser/linker) lives outside this crate; it hands the
//! compiler a merged `Vec<StmtS>`. Every node carries the byte span it was
//! parsed from so diagnostics can point back into the source.

use serde::{Deserialize, Serialize};

pub type Span = std::ops::Range<usize>;
pub type Spanned<T> = (T, Span);
pub type ExprS = Spanned<Expr>;
pub type StmtS = Spanned<Stmt>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

/// Source-level type annotation, resolved by the compiler into a `Type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// `int`, `Point`, `Box<T>`
    Named(String, Vec<TypeExpr>),
    /// `fn(int, str) -> bool`
    Function {
        params: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
    },
    /// `&int`
    Reference(Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Positional(ExprS),
    Keyword(String, ExprS),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<ExprS>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnModifiers {
    /// Calls spawn a detached task instead of running inline.
    pub is_async: bool,
    /// Runtime errors raised inside become a `result` value.
    pub catcher: bool,
    /// Calls are cached by argument values.
    pub memoize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub generics: Vec<String>,
    pub params: Vec<Param>,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    pub ret: Option<TypeExpr>,
    pub body: Vec<StmtS>,
    pub modifiers: FnModifiers,
    pub decorators: Vec<ExprS>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<ExprS>,
    pub private: bool,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub func: FunctionDecl,
    pub private: bool,
    pub is_static: bool,
    /// Declared with `operator`: used for overload dispatch and conversions.
    pub operator: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub generics: Vec<String>,
    pub parent: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<VariantDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// Plain equality against a value.
    Value(ExprS),
    /// Variant/class destructuring.
    Destructure {
        target: ExprS,
        required: Vec<(String, ExprS)>,
        bind: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Vec<StmtS>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<ExprS>,
    pub result: ExprS,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    This,
    /// `super.name`
    Super(String),
    Unary {
        op: UnaryOp,
        expr: Box<ExprS>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    /// `target = value` / `target op= value`
    Assign {
        target: Box<ExprS>,
        op: Option<BinaryOp>,
        value: Box<ExprS>,
    },
    Call {
        callee: Box<ExprS>,
        args: Vec<Arg>,
    },
    Attribute {
        object: Box<ExprS>,
        name: String,
    },
    Index {
        object: Box<ExprS>,
        index: Box<ExprS>,
    },
    /// `...list` inside a call or list literal
    Spread(Box<ExprS>),
    List(Vec<ExprS>),
    Map(Vec<(ExprS, ExprS)>),
    /// `start..end` (with optional step), materialized as a list
    Range {
        start: Box<ExprS>,
        end: Box<ExprS>,
        step: Option<Box<ExprS>>,
    },
    Lambda(Box<FunctionDecl>),
    /// `&name`
    Ref(String),
    /// `*expr`
    Deref(Box<ExprS>),
    Is {
        expr: Box<ExprS>,
        ty: TypeExpr,
    },
    Switch {
        subject: Box<ExprS>,
        cases: Vec<SwitchCase>,
        default: Option<Box<ExprS>>,
    },
    While {
        condition: Box<ExprS>,
        body: Vec<StmtS>,
    },
    /// `for var in start..end step s { body }`
    For {
        var: String,
        start: Box<ExprS>,
        end: Box<ExprS>,
        step: Option<Box<ExprS>>,
        body: Vec<StmtS>,
    },
    /// `for var in iterable { body }`
    Iter {
        var: String,
        iterable: Box<ExprS>,
        body: Vec<StmtS>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(ExprS),
    Let {
        name: String,
        ty: Option<TypeExpr>,
        value: Option<ExprS>,
        constant: bool,
        range: Option<(f64, f64)>,
    },
    Function(FunctionDecl),
    Class(ClassDecl),
    Enum(EnumDecl),
    Return(Option<ExprS>),
    If {
        condition: ExprS,
        then_block: Vec<StmtS>,
        elif_blocks: Vec<(ExprS, Vec<StmtS>)>,
        else_block: Option<Vec<StmtS>>,
    },
    Block(Vec<StmtS>),
    Match {
        subject: ExprS,
        arms: Vec<MatchArm>,
        default: Option<Vec<StmtS>>,
    },
    Throw {
        kind: String,
        message: ExprS,
    },
    Break,
    Continue,
}

/// Span-less constructors for embedding and tests.
///
/// A real front end attaches spans; code assembled by hand gets `0..0`.
pub mod build {
    use super::*;

    pub fn s<T>(node: T) -> Spanned<T> {
        (node, 0..0)
    }

    pub fn null() -> ExprS {
        s(Expr::Literal(Literal::Null))
    }

    pub fn boolean(b: bool) -> ExprS {
        s(Expr::Literal(Literal::Bool(b)))
    }

    pub fn int(i: i64) -> ExprS {
        s(Expr::Literal(Literal::Int(i)))
    }

    pub fn float(f: f64) -> ExprS {
        s(Expr::Literal(Literal::Float(f)))
    }

    pub fn string(v: &str) -> ExprS {
        s(Expr::Literal(Literal::Str(v.to_string())))
    }

    pub fn var(name: &str) -> ExprS {
        s(Expr::Variable(name.to_string()))
    }

    pub fn this() -> ExprS {
        s(Expr::This)
    }

    pub fn bin(op: BinaryOp, left: ExprS, right: ExprS) -> ExprS {
        s(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, expr: ExprS) -> ExprS {
        s(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    pub fn assign(target: ExprS, value: ExprS) -> ExprS {
        s(Expr::Assign {
            target: Box::new(target),
            op: None,
            value: Box::new(value),
        })
    }

    pub fn compound(target: ExprS, op: BinaryOp, value: ExprS) -> ExprS {
        s(Expr::Assign {
            target: Box::new(target),
            op: Some(op),
            value: Box::new(value),
        })
    }

    pub fn call(callee: ExprS, args: Vec<ExprS>) -> ExprS {
        s(Expr::Call {
            callee: Box::new(callee),
            args: args.into_iter().map(Arg::Positional).collect(),
        })
    }

    pub fn call_args(callee: ExprS, args: Vec<Arg>) -> ExprS {
        s(Expr::Call {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn kw(name: &str, value: ExprS) -> Arg {
        Arg::Keyword(name.to_string(), value)
    }

    pub fn attr(object: ExprS, name: &str) -> ExprS {
        s(Expr::Attribute {
            object: Box::new(object),
            name: name.to_string(),
        })
    }

    pub fn index(object: ExprS, idx: ExprS) -> ExprS {
        s(Expr::Index {
            object: Box::new(object),
            index: Box::new(idx),
        })
    }

    pub fn spread(expr: ExprS) -> ExprS {
        s(Expr::Spread(Box::new(expr)))
    }

    pub fn list(items: Vec<ExprS>) -> ExprS {
        s(Expr::List(items))
    }

    pub fn map(pairs: Vec<(ExprS, ExprS)>) -> ExprS {
        s(Expr::Map(pairs))
    }

    pub fn range(start: ExprS, end: ExprS) -> ExprS {
        s(Expr::Range {
            start: Box::new(start),
            end: Box::new(end),
            step: None,
        })
    }

    pub fn lambda(params: &[&str], body: Vec<StmtS>) -> ExprS {
        s(Expr::Lambda(Box::new(function("", params, body))))
    }

    pub fn for_range(var: &str, start: ExprS, end: ExprS, body: Vec<StmtS>) -> ExprS {
        s(Expr::For {
            var: var.to_string(),
            start: Box::new(start),
            end: Box::new(end),
            step: None,
            body,
        })
    }

    pub fn iter(var: &str, iterable: ExprS, body: Vec<StmtS>) -> ExprS {
        s(Expr::Iter {
            var: var.to_string(),
            iterable: Box::new(iterable),
            body,
        })
    }

    pub fn while_loop(condition: ExprS, body: Vec<StmtS>) -> ExprS {
        s(Expr::While {
            condition: Box::new(condition),
            body,
        })
    }

    pub fn expr(e: ExprS) -> StmtS {
        s(Stmt::Expr(e))
    }

    pub fn let_(name: &str, value: ExprS) -> StmtS {
        s(Stmt::Let {
            name: name.to_string(),
            ty: None,
            value: Some(value),
            constant: false,
            range: None,
        })
    }

    pub fn let_typed(name: &str, ty: &str, value: ExprS) -> StmtS {
        s(Stmt::Let {
            name: name.to_string(),
            ty: Some(named(ty)),
            value: Some(value),
            constant: false,
            range: None,
        })
    }

    pub fn const_(name: &str, value: ExprS) -> StmtS {
        s(Stmt::Let {
            name: name.to_string(),
            ty: None,
            value: Some(value),
            constant: true,
            range: None,
        })
    }

    pub fn ret(value: ExprS) -> StmtS {
        s(Stmt::Return(Some(value)))
    }

    pub fn block(body: Vec<StmtS>) -> StmtS {
        s(Stmt::Block(body))
    }

    pub fn if_(condition: ExprS, then_block: Vec<StmtS>, else_block: Option<Vec<StmtS>>) -> StmtS {
        s(Stmt::If {
            condition,
            then_block,
            elif_blocks: vec![],
            else_block,
        })
    }

    pub fn named(ty: &str) -> TypeExpr {
        TypeExpr::Named(ty.to_string(), vec![])
    }

    pub fn param(name: &str) -> Param {
        Param {
            name: name.to_string(),
            ty: None,
            default: None,
        }
    }

    pub fn typed_param(name: &str, ty: &str) -> Param {
        Param {
            name: name.to_string(),
            ty: Some(named(ty)),
            default: None,
        }
    }

    pub fn function(name: &str, params: &[&str], body: Vec<StmtS>) -> FunctionDecl {
        FunctionDecl {
            name: name.to_string(),
            generics: vec![],
            params: params.iter().map(|p| param(p)).collect(),
            varargs: None,
            kwargs: None,
            ret: None,
            body,
            modifiers: FnModifiers::default(),
            decorators: vec![],
        }
    }

    pub fn def(decl: FunctionDecl) -> StmtS {
        s(Stmt::Function(decl))
    }

    pub fn field(name: &str, default: Option<ExprS>) -> FieldDecl {
        FieldDecl {
            name: name.to_string(),
            ty: None,
            default,
            private: false,
            is_static: false,
        }
    }

    pub fn method(func: FunctionDecl) -> MethodDecl {
        MethodDecl {
            func,
            private: false,
            is_static: false,
            operator: false,
        }
    }

    pub fn operator(func: FunctionDecl) -> MethodDecl {
        MethodDecl {
            func,
            private: false,
            is_static: false,
            operator: true,
        }
    }

    pub fn class(name: &str, fields: Vec<FieldDecl>, methods: Vec<MethodDecl>) -> ClassDecl {
        ClassDecl {
            name: name.to_string(),
            generics: vec![],
            parent: None,
            fields,
            methods,
        }
    }
}
