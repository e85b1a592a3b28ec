//! Stable binary encoding of [`ByteCode`].
//!
//! Everything is flattened into `u32` words. Records open with a marker word;
//! strings are a length followed by one word per char (`code point + 0x20`),
//! numbers are the high and low halves of the `f64` bits. The word stream is
//! written little-endian and compressed with zstd.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::bytecode::{
    ByteCode, Chunk, Constant, DescriptorKind, EnumDef, FunctionFlags, TypeDescriptor, VariantDef,
};
use crate::types::Primitive;

pub const CHUNK: u32 = 1;
pub const FUNCTION: u32 = 2;
pub const TYPE: u32 = 3;
pub const STRING: u32 = 4;
pub const NUMBER: u32 = 5;
pub const BOOLEAN: u32 = 6;
pub const ENUM: u32 = 7;
pub const ENUM_CHILD: u32 = 8;

const CHAR_OFFSET: u32 = 0x20;

const KIND_PRIMITIVE: u32 = 0;
const KIND_CLASS: u32 = 1;
const KIND_ENUM: u32 = 2;
const KIND_FUNCTION: u32 = 3;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of bytecode stream")]
    UnexpectedEnd,
    #[error("expected record marker {expected}, found {found}")]
    BadMarker { expected: u32, found: u32 },
    #[error("unknown constant marker {0}")]
    UnknownConstant(u32),
    #[error("invalid character word {0:#x}")]
    InvalidChar(u32),
    #[error("invalid type descriptor tag {0}")]
    InvalidType(u32),
    #[error("malformed instruction stream in `{0}`")]
    MalformedCode(String),
    #[error("byte stream length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("{0} trailing words after the outermost function")]
    TrailingWords(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ========== 인코딩 ==========

#[derive(Default)]
struct Writer {
    words: Vec<u32>,
}

impl Writer {
    fn word(&mut self, w: u32) {
        self.words.push(w);
    }

    fn count(&mut self, n: usize) {
        self.words.push(n as u32);
    }

    fn string(&mut self, s: &str) {
        self.count(s.chars().count());
        self.words
            .extend(s.chars().map(|c| c as u32 + CHAR_OFFSET));
    }

    fn number(&mut self, n: f64) {
        let bits = n.to_bits();
        self.word((bits >> 32) as u32);
        self.word(bits as u32);
    }

    fn optional(&mut self, s: &Option<String>) {
        match s {
            Some(s) => {
                self.word(1);
                self.string(s);
            }
            None => self.word(0),
        }
    }

    fn function(&mut self, bc: &ByteCode) {
        self.word(FUNCTION);
        self.string(&bc.name);
        self.count(bc.arity);
        self.count(bc.total_arity);
        self.count(bc.upvalue_count);
        self.word(bc.flags.bits());
        self.count(bc.params.len());
        for p in &bc.params {
            self.string(p);
        }
        self.chunk(&bc.chunk);
    }

    fn chunk(&mut self, chunk: &Chunk) {
        self.word(CHUNK);
        self.string(&chunk.source);
        self.optional(&chunk.package);
        self.optional(&chunk.target);
        self.count(chunk.code.len());
        self.words.extend_from_slice(&chunk.code);
        self.count(chunk.spans.len());
        for (offset, span) in &chunk.spans {
            self.count(*offset);
            self.count(span.start);
            self.count(span.end);
        }
        self.count(chunk.constants.len());
        for c in &chunk.constants {
            self.constant(c);
        }
    }

    fn constant(&mut self, c: &Constant) {
        match c {
            Constant::Str(s) => {
                self.word(STRING);
                self.string(s);
            }
            Constant::Number(n) => {
                self.word(NUMBER);
                self.number(*n);
            }
            Constant::Bool(b) => {
                self.word(BOOLEAN);
                self.word(*b as u32);
            }
            Constant::Function(f) => self.function(f),
            Constant::Type(t) => self.descriptor(t),
            Constant::Enum(e) => self.enum_def(e),
        }
    }

    fn descriptor(&mut self, t: &TypeDescriptor) {
        self.word(TYPE);
        match &t.kind {
            DescriptorKind::Primitive(p) => {
                self.word(KIND_PRIMITIVE);
                self.word(*p as u32);
            }
            DescriptorKind::Class(name) => {
                self.word(KIND_CLASS);
                self.string(name);
            }
            DescriptorKind::Enum(name) => {
                self.word(KIND_ENUM);
                self.string(name);
            }
            DescriptorKind::Function => self.word(KIND_FUNCTION),
        }
        self.count(t.generics.len());
        for g in &t.generics {
            self.descriptor(g);
        }
    }

    fn enum_def(&mut self, e: &EnumDef) {
        self.word(ENUM);
        self.string(&e.name);
        self.count(e.variants.len());
        for v in &e.variants {
            self.word(ENUM_CHILD);
            self.string(&v.name);
            self.count(v.fields.len());
            for f in &v.fields {
                self.string(f);
            }
        }
    }
}

pub fn encode(bc: &ByteCode) -> Vec<u32> {
    let mut w = Writer::default();
    w.function(bc);
    w.words
}

// ========== 디코딩 ==========

struct Reader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl Reader<'_> {
    fn word(&mut self) -> Result<u32, DecodeError> {
        let w = *self.words.get(self.pos).ok_or(DecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(w)
    }

    fn count(&mut self) -> Result<usize, DecodeError> {
        Ok(self.word()? as usize)
    }

    /// 남은 워드 수를 넘지 않는 선할당 크기
    fn capacity(&self, n: usize) -> usize {
        n.min(self.words.len().saturating_sub(self.pos))
    }

    fn expect(&mut self, marker: u32) -> Result<(), DecodeError> {
        let found = self.word()?;
        if found != marker {
            return Err(DecodeError::BadMarker {
                expected: marker,
                found,
            });
        }
        Ok(())
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let n = self.count()?;
        let mut s = String::with_capacity(self.capacity(n));
        for _ in 0..n {
            let w = self.word()?;
            let c = w
                .checked_sub(CHAR_OFFSET)
                .and_then(char::from_u32)
                .ok_or(DecodeError::InvalidChar(w))?;
            s.push(c);
        }
        Ok(s)
    }

    fn number(&mut self) -> Result<f64, DecodeError> {
        let hi = self.word()? as u64;
        let lo = self.word()? as u64;
        Ok(f64::from_bits((hi << 32) | lo))
    }

    fn optional(&mut self) -> Result<Option<String>, DecodeError> {
        match self.word()? {
            0 => Ok(None),
            _ => Ok(Some(self.string()?)),
        }
    }

    fn function(&mut self) -> Result<ByteCode, DecodeError> {
        self.expect(FUNCTION)?;
        self.function_body()
    }

    fn function_body(&mut self) -> Result<ByteCode, DecodeError> {
        let name = self.string()?;
        let arity = self.count()?;
        let total_arity = self.count()?;
        let upvalue_count = self.count()?;
        let flags = FunctionFlags::from_bits_truncate(self.word()?);
        let n = self.count()?;
        let params = (0..n).map(|_| self.string()).collect::<Result<_, _>>()?;
        let chunk = self.chunk()?;
        if !chunk.is_well_formed() {
            return Err(DecodeError::MalformedCode(name));
        }
        Ok(ByteCode {
            name,
            arity,
            total_arity,
            upvalue_count,
            params,
            flags,
            chunk,
        })
    }

    fn chunk(&mut self) -> Result<Chunk, DecodeError> {
        self.expect(CHUNK)?;
        let source = self.string()?;
        let package = self.optional()?;
        let target = self.optional()?;
        let n = self.count()?;
        let code = self
            .words
            .get(self.pos..self.pos.saturating_add(n))
            .ok_or(DecodeError::UnexpectedEnd)?
            .to_vec();
        self.pos += n;
        let n = self.count()?;
        let mut spans = Vec::with_capacity(self.capacity(n));
        for _ in 0..n {
            let offset = self.count()?;
            let start = self.count()?;
            let end = self.count()?;
            spans.push((offset, start..end));
        }
        let n = self.count()?;
        let constants = (0..n).map(|_| self.constant()).collect::<Result<_, _>>()?;
        Ok(Chunk {
            code,
            constants,
            spans,
            source,
            package,
            target,
            finalized: true,
        })
    }

    fn constant(&mut self) -> Result<Constant, DecodeError> {
        match self.word()? {
            STRING => Ok(Constant::Str(Arc::from(self.string()?))),
            NUMBER => Ok(Constant::Number(self.number()?)),
            BOOLEAN => Ok(Constant::Bool(self.word()? != 0)),
            FUNCTION => Ok(Constant::Function(Arc::new(self.function_body()?))),
            TYPE => Ok(Constant::Type(self.descriptor_body()?)),
            ENUM => Ok(Constant::Enum(Arc::new(self.enum_body()?))),
            other => Err(DecodeError::UnknownConstant(other)),
        }
    }

    fn descriptor_body(&mut self) -> Result<TypeDescriptor, DecodeError> {
        let kind = match self.word()? {
            KIND_PRIMITIVE => {
                let tag = self.word()?;
                DescriptorKind::Primitive(
                    Primitive::from_repr(tag).ok_or(DecodeError::InvalidType(tag))?,
                )
            }
            KIND_CLASS => DescriptorKind::Class(self.string()?),
            KIND_ENUM => DescriptorKind::Enum(self.string()?),
            KIND_FUNCTION => DescriptorKind::Function,
            other => return Err(DecodeError::InvalidType(other)),
        };
        let n = self.count()?;
        let mut generics = Vec::with_capacity(self.capacity(n));
        for _ in 0..n {
            self.expect(TYPE)?;
            generics.push(self.descriptor_body()?);
        }
        Ok(TypeDescriptor { kind, generics })
    }

    fn enum_body(&mut self) -> Result<EnumDef, DecodeError> {
        let name = self.string()?;
        let n = self.count()?;
        let mut variants = Vec::with_capacity(self.capacity(n));
        for _ in 0..n {
            self.expect(ENUM_CHILD)?;
            let name = self.string()?;
            let count = self.count()?;
            let fields = (0..count).map(|_| self.string()).collect::<Result<_, _>>()?;
            variants.push(VariantDef { name, fields });
        }
        Ok(EnumDef { name, variants })
    }
}

pub fn decode(words: &[u32]) -> Result<ByteCode, DecodeError> {
    let mut r = Reader { words, pos: 0 };
    let bc = r.function()?;
    if r.pos != words.len() {
        return Err(DecodeError::TrailingWords(words.len() - r.pos));
    }
    Ok(bc)
}

// ========== 바이트 + 압축 ==========

pub fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn from_bytes(bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Encodes and compresses `bc` at the given zstd level.
pub fn compress(bc: &ByteCode, level: i32) -> Result<Vec<u8>, DecodeError> {
    let words = encode(bc);
    let bytes = to_bytes(&words);
    let packed = zstd::encode_all(bytes.as_slice(), level)?;
    debug!(
        function = %bc.name,
        words = words.len(),
        compressed = packed.len(),
        "encoded bytecode"
    );
    Ok(packed)
}

pub fn decompress(bytes: &[u8]) -> Result<ByteCode, DecodeError> {
    let raw = zstd::decode_all(bytes)?;
    let words = from_bytes(&raw)?;
    debug!(compressed = bytes.len(), words = words.len(), "decoding bytecode");
    decode(&words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::OpCode;

    fn sample() -> ByteCode {
        let mut inner = ByteCode::new("inner", "test.tn");
        inner.arity = 1;
        inner.total_arity = 2;
        inner.params = vec!["a".into(), "b".into()];
        inner.flags = FunctionFlags::MEMOIZE | FunctionFlags::CATCHER;
        inner.chunk.write(OpCode::GetLocal, &[1], 3..4);
        inner.chunk.write(OpCode::Return, &[], 3..9);
        inner.chunk.finalize();

        let mut outer = ByteCode::new("<script>", "test.tn");
        outer.chunk.package = Some("pkg".into());
        let s = outer.chunk.add_str("héllo ✓");
        let n = outer.chunk.add_constant(Constant::Number(-2.5e-3));
        let b = outer.chunk.add_constant(Constant::Bool(true));
        let f = outer.chunk.add_constant(Constant::Function(Arc::new(inner)));
        let t = outer.chunk.add_constant(Constant::Type(TypeDescriptor {
            kind: DescriptorKind::Class("Box".into()),
            generics: vec![TypeDescriptor::primitive(Primitive::Int)],
        }));
        let e = outer.chunk.add_constant(Constant::Enum(Arc::new(EnumDef {
            name: "Shape".into(),
            variants: vec![
                VariantDef {
                    name: "Dot".into(),
                    fields: vec![],
                },
                VariantDef {
                    name: "Circle".into(),
                    fields: vec!["r".into()],
                },
            ],
        })));
        for c in [s, n, b, t, e] {
            outer.chunk.write(OpCode::Constant, &[c], 0..1);
        }
        outer.chunk.write(OpCode::Closure, &[f, 0], 0..1);
        outer.chunk.write(OpCode::Return, &[], 0..1);
        outer.chunk.finalize();
        outer
    }

    #[test]
    fn test_round_trip_words() {
        let bc = sample();
        let words = encode(&bc);
        assert_eq!(words[0], FUNCTION);
        assert_eq!(decode(&words).unwrap(), bc);
    }

    #[test]
    fn test_round_trip_compressed() {
        let bc = sample();
        let bytes = compress(&bc, 3).unwrap();
        assert_eq!(decompress(&bytes).unwrap(), bc);
    }

    #[test]
    fn test_char_offset() {
        let mut w = Writer::default();
        w.string("A");
        assert_eq!(w.words, vec![1, 'A' as u32 + 0x20]);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let words = encode(&sample());
        let err = decode(&words[..words.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEnd));
        assert!(matches!(
            from_bytes(&[1, 2, 3]),
            Err(DecodeError::Misaligned(3))
        ));
    }

    #[test]
    fn test_huge_count_is_decode_error() {
        // span count claims four billion entries in a 13-word stream
        let words = [FUNCTION, 0, 0, 0, 0, 0, 0, CHUNK, 0, 0, 0, 0, u32::MAX];
        assert!(matches!(decode(&words), Err(DecodeError::UnexpectedEnd)));
        // same for a string length and a code length
        let words = [FUNCTION, u32::MAX, 0x61];
        assert!(matches!(decode(&words), Err(DecodeError::UnexpectedEnd)));
        let words = [FUNCTION, 0, 0, 0, 0, 0, 0, CHUNK, 0, 0, 0, u32::MAX, 0];
        assert!(matches!(decode(&words), Err(DecodeError::UnexpectedEnd)));
    }

    #[test]
    fn test_wrong_outer_marker() {
        let mut words = encode(&sample());
        words[0] = CHUNK;
        assert!(matches!(
            decode(&words),
            Err(DecodeError::BadMarker {
                expected: FUNCTION,
                found: CHUNK
            })
        ));
    }
}
