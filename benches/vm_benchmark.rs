use std::sync::Arc;
use std::time::Instant;

use tern::ast::BinaryOp;
use tern::ast::build::*;
use tern::config::VmConfig;
use tern::natives::NativeRegistry;
use tern::runtime_io::BufferIo;
use tern::vm::{Runtime, Vm, compile_program, serialize};

fn fib_program(memoize: bool, n: i64) -> Vec<tern::ast::StmtS> {
    let arg = || var("n");
    let mut fib = function(
        "fib",
        &["n"],
        vec![
            if_(bin(BinaryOp::Less, arg(), int(2)), vec![ret(arg())], None),
            ret(bin(
                BinaryOp::Add,
                call(var("fib"), vec![bin(BinaryOp::Subtract, arg(), int(1))]),
                call(var("fib"), vec![bin(BinaryOp::Subtract, arg(), int(2))]),
            )),
        ],
    );
    fib.modifiers.memoize = memoize;
    vec![def(fib), ret(call(var("fib"), vec![int(n)]))]
}

fn bench(label: &str, memoize: bool, n: i64) {
    let bytecode = match compile_program("bench", &fib_program(memoize, n)) {
        Ok(bc) => bc,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return;
        }
    };
    let runtime = Arc::new(Runtime::new(
        Arc::new(NativeRegistry::with_builtins()),
        Box::new(BufferIo::new()),
        VmConfig::default(),
    ));
    let start = Instant::now();
    match Vm::new(runtime).run(bytecode) {
        Ok(v) => println!(
            "{:<24} fib({}) = {:<12} {:.2}ms",
            label,
            n,
            v,
            start.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => eprintln!("Runtime error: {}", e),
    }
}

fn main() {
    println!("=== Tern VM Benchmark ===\n");
    bench("plain recursion", false, 24);
    bench("memoized recursion", true, 24);
    bench("memoized recursion", true, 90);

    // 코덱 비용
    let bytecode = match compile_program("bench", &fib_program(false, 24)) {
        Ok(bc) => bc,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return;
        }
    };
    let start = Instant::now();
    let mut size = 0;
    for _ in 0..1000 {
        match serialize::compress(&bytecode, 3) {
            Ok(bytes) => size = bytes.len(),
            Err(e) => {
                eprintln!("Codec error: {}", e);
                return;
            }
        }
    }
    println!(
        "{:<24} {} bytes, {:.4}ms per round",
        "compress (level 3)",
        size,
        start.elapsed().as_secs_f64()
    );
}
