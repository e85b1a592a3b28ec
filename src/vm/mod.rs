pub mod bytecode;
pub mod compiler;
pub mod disasm; // 디스어셈블러
pub mod machine; // machine/ 디렉토리
pub mod object;
pub mod serialize;
pub mod value;

pub use bytecode::{ByteCode, Chunk, Constant, OpCode};
pub use compiler::{CompileError, CompileErrorKind, CompileResult, Compiler, compile_program};
pub use machine::{ErrorKind, Runtime, RuntimeError, Vm, VmResult, err};
pub use value::{MapKey, Value, Var};
