pub mod ast;
pub mod config;
pub mod natives;
pub mod runtime_io;
pub mod types;
pub mod vm;

use std::path::Path;
use std::sync::Arc;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::ast::StmtS;
use crate::config::VmConfig;
use crate::natives::NativeRegistry;
use crate::runtime_io::RuntimeIo;
use crate::vm::serialize::{self, DecodeError};
use crate::vm::{ByteCode, CompileError, Runtime, RuntimeError, Value, Vm};

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl Diagnostic {
    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        Diagnostic {
            message: e.to_string(),
            span: e.span.clone(),
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        Diagnostic {
            message: e.to_string(),
            span: e.span.clone().unwrap_or(0..0),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed program: {0}")]
    Program(#[from] bincode::error::DecodeError),
    #[error("program encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("malformed bytecode: {0}")]
    Bytecode(#[from] DecodeError),
}

/// 스크립트 하나를 컴파일
pub fn compile(source_id: &str, program: &[StmtS]) -> Result<ByteCode, CompileError> {
    vm::compile_program(source_id, program)
}

/// Runs a compiled script on a fresh runtime, then its `main` entry if any.
pub fn run(bytecode: ByteCode, io: Box<dyn RuntimeIo>, config: VmConfig, argv: &[String]) -> Result<Value, RuntimeError> {
    let runtime = Arc::new(Runtime::new(Arc::new(NativeRegistry::with_builtins()), io, config));
    let mut machine = Vm::new(runtime);
    let result = machine
        .run(bytecode)
        .and_then(|value| machine.finish(argv).map(|main| main.unwrap_or(value)));
    // 실패해도 이미 띄운 태스크는 끝까지 기다린다
    machine.wait_for_tasks();
    result
}

/// Front ends hand over the program as a bincode-encoded statement list.
pub fn load_program(path: impl AsRef<Path>) -> Result<Vec<StmtS>, LoadError> {
    let bytes = std::fs::read(path)?;
    let cfg = bincode::config::standard();
    let (program, _consumed): (Vec<StmtS>, usize) = bincode::serde::decode_from_slice(&bytes, cfg)?;
    Ok(program)
}

pub fn save_program(program: &[StmtS], path: impl AsRef<Path>) -> Result<(), LoadError> {
    let cfg = bincode::config::standard();
    let bytes = bincode::serde::encode_to_vec(program, cfg)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn save_bytecode(bytecode: &ByteCode, path: impl AsRef<Path>, level: i32) -> Result<(), LoadError> {
    let bytes = serialize::compress(bytecode, level)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_bytecode(path: impl AsRef<Path>) -> Result<ByteCode, LoadError> {
    let bytes = std::fs::read(path)?;
    Ok(serialize::decompress(&bytes)?)
}
