use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::types::Primitive;

pub type Span = Range<usize>;

/// 명령어 opcode. 코드 스트림에서 한 워드(u32)를 차지하고, 뒤에 인라인
/// 피연산자 워드가 이어진다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u32)]
pub enum OpCode {
    // constants
    Constant,
    Null,
    True,
    False,

    // stack
    Pop,
    Dup,

    // variables
    /// flags, min, max: TOS를 새 Var로 감싼다 (로컬 선언)
    Declare,
    GetLocal,
    SetLocal,
    GetUpvalue,
    SetUpvalue,
    /// name, flags, min, max
    DefineGlobal,
    GetGlobal,
    SetGlobal,
    RefLocal,
    RefUpvalue,
    RefGlobal,
    Deref,
    SetRef,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Negate,
    Not,

    // compare
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Is,

    // control flow
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    Loop,

    // collections
    BuildList,
    BuildMap,
    BuildRange,
    Spread,
    GetIndex,
    SetIndex,

    // objects
    GetAttr,
    SetAttr,
    GetSuper,

    // calls
    Call,
    CallAsync,
    Return,
    Closure,
    Class,
    Method,
    MakePattern,

    // loops
    StartCache,
    CollectLoop,
    FlushLoop,
    ForCheck,
    ForStep,
    IterPrep,
    IterNext,

    Throw,
}

impl OpCode {
    /// Number of operand words following the opcode at `code[at]`.
    pub fn operand_count(self, code: &[u32], at: usize) -> usize {
        let word = |i: usize| code.get(at + i).copied().unwrap_or(0) as usize;
        match self {
            OpCode::Closure => 2 + 2 * word(2),
            OpCode::Class => 4 + 2 * word(2) + word(3),
            OpCode::MakePattern => 2 + word(2),
            OpCode::Declare => 3,
            OpCode::DefineGlobal => 4,
            OpCode::GetAttr
            | OpCode::SetAttr
            | OpCode::Call
            | OpCode::CallAsync
            | OpCode::Method
            | OpCode::IterNext => 2,
            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::RefLocal
            | OpCode::RefUpvalue
            | OpCode::RefGlobal
            | OpCode::Is
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfTrue
            | OpCode::Loop
            | OpCode::BuildList
            | OpCode::BuildMap
            | OpCode::GetSuper
            | OpCode::ForCheck
            | OpCode::ForStep => 1,
            _ => 0,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u32 {
        const ASYNC = 1 << 0;
        const CATCHER = 1 << 1;
        const VARARGS = 1 << 2;
        const KWARGS = 1 << 3;
        const MEMOIZE = 1 << 4;
        const METHOD = 1 << 5;
        const STATIC = 1 << 6;
    }
}

bitflags! {
    /// `Declare`/`DefineGlobal` flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VarFlags: u32 {
        const CONSTANT = 1 << 0;
        /// min/max operands are number constant indices
        const RANGED = 1 << 1;
    }
}

/// `GetAttr`/`SetAttr` flag bit: the access may see private members.
pub const ATTR_INTERNAL: u32 = 1 << 0;
/// `SetAttr` flag bit: the receiver sits above the value.
pub const ATTR_SWAPPED: u32 = 1 << 1;

bitflags! {
    /// Flags of class attributes (`Class`) and methods (`Method`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemberFlags: u32 {
        const PRIVATE = 1 << 0;
        const STATIC = 1 << 1;
        const OPERATOR = 1 << 2;
        const CONSTRUCTOR = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Primitive(Primitive),
    Class(String),
    Enum(String),
    Function,
}

/// Runtime form of a type, used by `Is`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub kind: DescriptorKind,
    pub generics: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    pub fn primitive(p: Primitive) -> Self {
        Self {
            kind: DescriptorKind::Primitive(p),
            generics: vec![],
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DescriptorKind::Primitive(p) => write!(f, "{}", p)?,
            DescriptorKind::Class(name) | DescriptorKind::Enum(name) => write!(f, "{}", name)?,
            DescriptorKind::Function => write!(f, "fn")?,
        }
        if !self.generics.is_empty() {
            let inner: Vec<String> = self.generics.iter().map(|g| g.to_string()).collect();
            write!(f, "<{}>", inner.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantDef {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<VariantDef>,
}

#[derive(Debug, Clone)]
pub enum Constant {
    Str(Arc<str>),
    Number(f64),
    Bool(bool),
    Function(Arc<ByteCode>),
    Type(TypeDescriptor),
    Enum(Arc<EnumDef>),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Function(a), Constant::Function(b)) => a == b,
            (Constant::Type(a), Constant::Type(b)) => a == b,
            (Constant::Enum(a), Constant::Enum(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Number(n) => write!(f, "{}", n),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Function(func) => write!(f, "<fn {}>", func.name),
            Constant::Type(t) => write!(f, "<type {}>", t),
            Constant::Enum(e) => write!(f, "<enum {}>", e.name),
        }
    }
}

/// Decoded view of one instruction.
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub op: OpCode,
    pub operands: &'a [u32],
}

pub struct Instructions<'a> {
    code: &'a [u32],
    at: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let op = OpCode::from_repr(*self.code.get(self.at)?)?;
        let count = op.operand_count(self.code, self.at);
        let operands = self.code.get(self.at + 1..self.at + 1 + count)?;
        let ins = Instruction {
            offset: self.at,
            op,
            operands,
        };
        self.at += 1 + count;
        Some(ins)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u32>,
    pub constants: Vec<Constant>,
    /// (code offset, source span), sorted by offset
    pub spans: Vec<(usize, Span)>,
    pub source: String,
    pub package: Option<String>,
    pub target: Option<String>,
    pub finalized: bool,
}

impl Chunk {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// opcode와 피연산자를 기록하고 opcode의 offset을 돌려준다.
    pub fn write(&mut self, op: OpCode, operands: &[u32], span: Span) -> usize {
        let offset = self.code.len();
        self.spans.push((offset, span));
        self.code.push(op as u32);
        self.code.extend_from_slice(operands);
        offset
    }

    pub fn add_constant(&mut self, constant: Constant) -> u32 {
        let dedup = matches!(constant, Constant::Str(_) | Constant::Number(_));
        if dedup && let Some(ix) = self.constants.iter().position(|c| *c == constant) {
            return ix as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    pub fn add_str(&mut self, s: &str) -> u32 {
        self.add_constant(Constant::Str(Arc::from(s)))
    }

    /// 점프 placeholder를 현재 위치로 패치 (target - placeholder - 1)
    pub fn patch_jump(&mut self, placeholder: usize) {
        let offset = self.code.len() - placeholder - 1;
        self.code[placeholder] = offset as u32;
    }

    /// Offset word for a backward `Loop` whose operand lands at the current end.
    pub fn loop_offset(&self, target: usize) -> u32 {
        let after = self.code.len() + 2;
        (target as i64 - after as i64) as i32 as u32
    }

    /// Collapses consecutive span entries that carry the same span.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        let mut compact: Vec<(usize, Span)> = Vec::with_capacity(self.spans.len());
        for (offset, span) in self.spans.drain(..) {
            if compact.last().is_some_and(|(_, last)| *last == span) {
                continue;
            }
            compact.push((offset, span));
        }
        self.spans = compact;
        self.finalized = true;
    }

    pub fn span_at(&self, offset: usize) -> Option<Span> {
        let ix = self.spans.partition_point(|(o, _)| *o <= offset);
        ix.checked_sub(1).map(|i| self.spans[i].1.clone())
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            code: &self.code,
            at: 0,
        }
    }

    /// True when the instruction walk covers the code exactly.
    pub fn is_well_formed(&self) -> bool {
        let mut end = 0;
        for ins in self.instructions() {
            end = ins.offset + 1 + ins.operands.len();
        }
        end == self.code.len()
    }

    pub fn str_constant(&self, ix: u32) -> Option<&Arc<str>> {
        match self.constants.get(ix as usize)? {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn number_constant(&self, ix: u32) -> Option<f64> {
        match self.constants.get(ix as usize)? {
            Constant::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// 하나의 컴파일된 함수 (최상위 스크립트 포함)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ByteCode {
    pub name: String,
    /// required parameter count
    pub arity: usize,
    /// declared parameter count, defaults included
    pub total_arity: usize,
    pub upvalue_count: usize,
    pub params: Vec<String>,
    pub flags: FunctionFlags,
    pub chunk: Chunk,
}

impl ByteCode {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunk: Chunk::new(source),
            ..Default::default()
        }
    }

    pub fn default_count(&self) -> usize {
        self.total_arity - self.arity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_counts_variable_ops() {
        let mut chunk = Chunk::new("t");
        chunk.write(OpCode::Closure, &[0, 2, 1, 0, 0, 3], 0..0);
        chunk.write(OpCode::Class, &[0, 1, 1, 0, 4, 0, 5], 0..0);
        chunk.write(OpCode::MakePattern, &[1, 2, 6, 7], 0..0);
        chunk.write(OpCode::Return, &[], 0..0);
        let ops: Vec<(usize, OpCode)> = chunk.instructions().map(|i| (i.offset, i.op)).collect();
        assert_eq!(
            ops,
            vec![
                (0, OpCode::Closure),
                (7, OpCode::Class),
                (15, OpCode::MakePattern),
                (20, OpCode::Return)
            ]
        );
        assert!(chunk.is_well_formed());
    }

    #[test]
    fn test_constant_dedup() {
        let mut chunk = Chunk::new("t");
        let a = chunk.add_str("x");
        let b = chunk.add_constant(Constant::Number(1.0));
        assert_eq!(chunk.add_str("x"), a);
        assert_eq!(chunk.add_constant(Constant::Number(1.0)), b);
        assert_eq!(chunk.add_constant(Constant::Bool(true)), 2);
        assert_eq!(chunk.add_constant(Constant::Bool(true)), 3);
    }

    #[test]
    fn test_jump_patch_and_loop_offset() {
        let mut chunk = Chunk::new("t");
        let start = chunk.code.len();
        chunk.write(OpCode::Jump, &[0], 0..0);
        chunk.write(OpCode::Null, &[], 0..0);
        chunk.patch_jump(start + 1);
        assert_eq!(chunk.code[start + 1], 1);

        let off = chunk.loop_offset(start);
        chunk.write(OpCode::Loop, &[off], 0..0);
        // after the Loop operand the ip is 5; 5 + off == 0
        assert_eq!(off as i32, -5);
    }

    #[test]
    fn test_finalize_compacts_spans() {
        let mut chunk = Chunk::new("t");
        chunk.write(OpCode::Null, &[], 0..3);
        chunk.write(OpCode::Pop, &[], 0..3);
        chunk.write(OpCode::True, &[], 4..8);
        chunk.finalize();
        assert_eq!(chunk.spans.len(), 2);
        assert_eq!(chunk.span_at(1), Some(0..3));
        assert_eq!(chunk.span_at(2), Some(4..8));
    }
}
