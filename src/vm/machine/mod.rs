// machine 모듈 - VM 실행 엔진
//
// 워드 스트림 바이트코드를 실행하는 스택 VM. 전역, memo 캐시, I/O, 비동기
// 태스크는 `Runtime`에 모아 두고 여러 `Vm`(스레드)이 공유한다.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::VmConfig;
use crate::natives::NativeRegistry;
use crate::runtime_io::{ReadResult, RuntimeIo, StdIo};
use crate::vm::bytecode::{ByteCode, Span};
use crate::vm::object::{BoundMethod, Closure};
use crate::vm::value::{MapKey, Value, Var};

// 서브모듈
mod call;
mod instruction;
mod ops;

#[cfg(test)]
mod tests;

// ========== 타입 정의 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    TypeError,
    ScopeError,
    RangeError,
    ConstantError,
    ArgumentCountError,
    IndexError,
    DivisionByZero,
    StackOverflow,
    StackUnderflow,
    NativeError,
    /// raised by `throw` or a native with its own kind name
    Thrown(String),
}

impl ErrorKind {
    /// Maps a kind name back to a built-in kind where one exists.
    pub fn from_name(name: &str) -> ErrorKind {
        match name {
            "TypeError" => ErrorKind::TypeError,
            "ScopeError" => ErrorKind::ScopeError,
            "RangeError" => ErrorKind::RangeError,
            "ConstantError" => ErrorKind::ConstantError,
            "ArgumentCountError" => ErrorKind::ArgumentCountError,
            "IndexError" => ErrorKind::IndexError,
            "DivisionByZero" => ErrorKind::DivisionByZero,
            "StackOverflow" => ErrorKind::StackOverflow,
            "StackUnderflow" => ErrorKind::StackUnderflow,
            "NativeError" => ErrorKind::NativeError,
            other => ErrorKind::Thrown(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::ScopeError => write!(f, "ScopeError"),
            ErrorKind::RangeError => write!(f, "RangeError"),
            ErrorKind::ConstantError => write!(f, "ConstantError"),
            ErrorKind::ArgumentCountError => write!(f, "ArgumentCountError"),
            ErrorKind::IndexError => write!(f, "IndexError"),
            ErrorKind::DivisionByZero => write!(f, "DivisionByZero"),
            ErrorKind::StackOverflow => write!(f, "StackOverflow"),
            ErrorKind::StackUnderflow => write!(f, "StackUnderflow"),
            ErrorKind::NativeError => write!(f, "NativeError"),
            ErrorKind::Thrown(kind) => write!(f, "{}", kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// span of the failing instruction in the innermost frame
    pub span: Option<Span>,
    pub source_id: Option<String>,
}

impl RuntimeError {
    fn located(mut self, source_id: &str, span: Option<Span>) -> Self {
        if self.span.is_none() {
            self.span = span;
            self.source_id = Some(source_id.to_string());
        }
        self
    }
}

pub type VmResult<T> = Result<T, RuntimeError>;

/// RuntimeError 생성 헬퍼 함수
pub fn err(kind: ErrorKind, message: String) -> RuntimeError {
    RuntimeError {
        kind,
        message,
        span: None,
        source_id: None,
    }
}

/// memo 캐시 키의 함수 부분. `Arc`를 쥐고 있으므로 캐시가 살아 있는 동안
/// 같은 주소가 다른 함수에 재사용되지 않는다.
#[derive(Clone)]
struct MemoFn(Arc<ByteCode>);

impl PartialEq for MemoFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MemoFn {}

impl Hash for MemoFn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for MemoFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoFn({})", self.0.name)
    }
}

/// memo 캐시 키: 함수 identity + 인자 값
type MemoKey = (MemoFn, Vec<MapKey>);

/// State shared by every VM running the same program.
pub struct Runtime {
    pub globals: RwLock<IndexMap<String, Var>>,
    pub natives: Arc<NativeRegistry>,
    pub config: VmConfig,
    memo: DashMap<MemoKey, Value>,
    io: Mutex<Box<dyn RuntimeIo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(natives: Arc<NativeRegistry>, io: Box<dyn RuntimeIo>, config: VmConfig) -> Self {
        Self {
            globals: RwLock::new(IndexMap::new()),
            natives,
            config,
            memo: DashMap::new(),
            io: Mutex::new(io),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.read().get(name).map(Var::get)
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// 모든 비동기 태스크가 끝날 때까지 기다린다 (태스크가 낳은 태스크 포함).
    pub fn wait_for_tasks(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
            if pending.is_empty() {
                return;
            }
            debug!(count = pending.len(), "joining async tasks");
            for handle in pending {
                if handle.join().is_err() {
                    warn!("async task panicked");
                }
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(
            Arc::new(NativeRegistry::with_builtins()),
            Box::new(StdIo),
            VmConfig::default(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Arc<Closure>,
    pub ip: usize,
    /// stack index of slot 0
    pub base: usize,
    pub catcher: bool,
    memo: Option<MemoKey>,
    constructor: bool,
    /// loop caches open when the frame was entered
    caches: usize,
}

pub struct Vm {
    runtime: Arc<Runtime>,
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    caches: Vec<Vec<Value>>,
    pub max_stack: usize,
    pub max_frames: usize,
}

/// IP를 상대적으로 점프
fn jump_rel(ip: &mut usize, off: u32) {
    let off = off as i32;
    if off >= 0 {
        *ip = ip.wrapping_add(off as usize);
    } else {
        *ip = ip.wrapping_sub(off.unsigned_abs() as usize);
    }
}

// ========== VM 구현 ==========

impl Vm {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let max_stack = runtime.config.max_stack;
        let max_frames = runtime.config.max_frames;
        Self {
            runtime,
            stack: Vec::with_capacity(128),
            frames: Vec::with_capacity(32),
            caches: Vec::new(),
            max_stack,
            max_frames,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Runs a compiled script and returns its value.
    pub fn run(&mut self, bytecode: ByteCode) -> VmResult<Value> {
        self.run_with(bytecode, None, vec![])
    }

    /// Runs a script compiled with parameters (and optionally a class, in
    /// which case `this` becomes slot 0).
    pub fn run_with(&mut self, bytecode: ByteCode, this: Option<Value>, args: Vec<Value>) -> VmResult<Value> {
        debug!(source = %bytecode.chunk.source, "running script");
        let closure = Arc::new(Closure {
            function: Arc::new(bytecode),
            upvalues: vec![],
            defaults: vec![],
        });
        let callee = match this {
            Some(receiver) => Value::BoundMethod(Arc::new(BoundMethod {
                receiver,
                method: closure,
            })),
            None => Value::Closure(closure),
        };
        self.call_sync(callee, args, vec![])
    }

    /// Calls the program's entry point after the script ran: a global
    /// `main`, or a static `main` on some class. `argv` is passed when the
    /// entry point takes a parameter.
    pub fn finish(&mut self, argv: &[String]) -> VmResult<Option<Value>> {
        let entry = self.runtime.global("main").or_else(|| {
            let globals = self.runtime.globals.read();
            globals.values().find_map(|var| match var.get() {
                Value::Class(class) => class.method("main").filter(|m| m.is_static).map(|m| {
                    Value::BoundMethod(Arc::new(BoundMethod {
                        receiver: Value::Class(class.clone()),
                        method: m.closure,
                    }))
                }),
                _ => None,
            })
        });
        let Some(entry) = entry else {
            return Ok(None);
        };
        let takes_args = match &entry {
            Value::Closure(c) => c.function.total_arity > 0,
            Value::BoundMethod(b) => b.method.function.total_arity > 0,
            _ => false,
        };
        let args = if takes_args {
            vec![Value::list(argv.iter().map(|a| Value::str(a)).collect())]
        } else {
            vec![]
        };
        debug!("calling entry point");
        self.call_sync(entry, args, vec![]).map(Some)
    }

    /// Calls any callable value to completion.
    pub fn call_sync(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(Arc<str>, Value)>,
    ) -> VmResult<Value> {
        let depth = self.frames.len();
        match self.invoke(callee, args, kwargs)? {
            Some(v) => Ok(v),
            None => self.execute(depth),
        }
    }

    /// Speculative call used for conversion overloads: a failure is logged
    /// and reported as `None` instead of unwinding the caller.
    pub fn call_safe(&mut self, callee: Value, args: Vec<Value>) -> Option<Value> {
        match self.call_sync(callee, args, vec![]) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e, "safe call failed");
                None
            }
        }
    }

    /// Like [`Vm::call_sync`] but a runtime error becomes an error `result`.
    pub fn call_catching(&mut self, callee: Value, args: Vec<Value>) -> Value {
        match self.call_sync(callee, args, vec![]) {
            Ok(v) => Value::ok(v),
            Err(e) => Value::error(e.kind.to_string(), e.message),
        }
    }

    pub fn wait_for_tasks(&self) {
        self.runtime.wait_for_tasks();
    }

    // ========== I/O ==========

    pub fn write_line(&mut self, s: &str) {
        self.runtime.io.lock().write_line(s);
    }

    pub fn write(&mut self, s: &str) {
        self.runtime.io.lock().write(s);
    }

    pub fn read_line(&mut self) -> ReadResult {
        self.runtime.io.lock().read_line()
    }

    // ========== 실행 루프 ==========

    /// Executes until the frame count drops back to `stop` and returns the
    /// value of that last return. Errors unwind to the nearest catcher frame
    /// above `stop`.
    fn execute(&mut self, stop: usize) -> VmResult<Value> {
        use instruction::ExecutionFlow;
        loop {
            match self.step() {
                Ok(ExecutionFlow::Continue) => {}
                Ok(ExecutionFlow::Exit(value)) => {
                    if self.frames.len() <= stop {
                        return Ok(value);
                    }
                    self.push(value)?;
                }
                Err(e) => {
                    let value = self.unwind(e, stop)?;
                    if self.frames.len() <= stop {
                        return Ok(value);
                    }
                    self.push(value)?;
                }
            }
        }
    }

    fn unwind(&mut self, error: RuntimeError, stop: usize) -> VmResult<Value> {
        let catcher = (stop..self.frames.len()).rev().find(|&i| self.frames[i].catcher);
        match catcher {
            Some(i) => {
                let frame = self.frames[i].clone();
                debug!(kind = %error.kind, function = %frame.closure.function.name, "caught");
                self.frames.truncate(i);
                self.stack.truncate(frame.base);
                self.caches.truncate(frame.caches);
                Ok(Value::error(error.kind.to_string(), error.message))
            }
            None => {
                if let Some(frame) = self.frames.get(stop) {
                    let (base, caches) = (frame.base, frame.caches);
                    self.stack.truncate(base);
                    self.caches.truncate(caches);
                }
                self.frames.truncate(stop);
                Err(error)
            }
        }
    }

    // ========== 스택 연산 ==========

    fn push(&mut self, v: Value) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(err(ErrorKind::StackOverflow, "stack overflow".into()));
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| err(ErrorKind::StackUnderflow, "stack underflow".into()))
    }

    fn peek(&self) -> VmResult<&Value> {
        self.stack
            .last()
            .ok_or_else(|| err(ErrorKind::StackUnderflow, "stack underflow".into()))
    }

    /// Pops `n` values, oldest first.
    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < n {
            return Err(err(ErrorKind::StackUnderflow, "stack underflow".into()));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    // ========== 프레임 관리 ==========

    fn frame(&self) -> VmResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| err(ErrorKind::StackUnderflow, "no frame".into()))
    }

    fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| err(ErrorKind::StackUnderflow, "no frame".into()))
    }

    fn slot_index(&self, slot: u32) -> VmResult<usize> {
        let ix = self.frame()?.base + slot as usize;
        if ix >= self.stack.len() {
            return Err(err(
                ErrorKind::StackUnderflow,
                format!("invalid local slot {}", slot),
            ));
        }
        Ok(ix)
    }

    /// Cell backing local `slot`, converting a plain slot into a cell so it
    /// can be shared.
    fn local_cell(&mut self, slot: u32) -> VmResult<Var> {
        let ix = self.slot_index(slot)?;
        match &self.stack[ix] {
            Value::Cell(var) => Ok(var.clone()),
            other => {
                let var = Var::cell(other.clone());
                self.stack[ix] = Value::Cell(var.clone());
                Ok(var)
            }
        }
    }

    fn get_local(&self, slot: u32) -> VmResult<Value> {
        let ix = self.slot_index(slot)?;
        Ok(match &self.stack[ix] {
            Value::Cell(var) => var.get(),
            other => other.clone(),
        })
    }

    fn set_local(&mut self, slot: u32, v: Value) -> VmResult<()> {
        let ix = self.slot_index(slot)?;
        match &self.stack[ix] {
            Value::Cell(var) => var.set(v),
            _ => {
                self.stack[ix] = v;
                Ok(())
            }
        }
    }

    fn upvalue(&self, index: u32) -> VmResult<Var> {
        self.frame()?
            .closure
            .upvalues
            .get(index as usize)
            .cloned()
            .ok_or_else(|| err(ErrorKind::ScopeError, format!("invalid upvalue {}", index)))
    }

    fn add_ip_rel(&mut self, off: u32) -> VmResult<()> {
        let frame = self.frame_mut()?;
        jump_rel(&mut frame.ip, off);
        Ok(())
    }
}
