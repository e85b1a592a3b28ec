use proptest::prelude::*;

use tern::ast::BinaryOp;
use tern::ast::build::*;
use tern::runtime_io::BufferIo;
use tern::vm::serialize;
use tern::vm::{Runtime, Value, Vm};

fn run_value(stmts: &[tern::ast::StmtS]) -> Value {
    let bytecode = tern::compile("prop", stmts).unwrap();
    let runtime = Runtime::new(
        std::sync::Arc::new(tern::natives::NativeRegistry::with_builtins()),
        Box::new(BufferIo::new()),
        Default::default(),
    );
    Vm::new(std::sync::Arc::new(runtime)).run(bytecode).unwrap()
}

proptest! {
    #[test]
    fn compressed_bytecode_round_trips(
        name in "[a-z][a-z0-9_]{0,8}",
        text in "\\PC{0,24}",
        n in any::<i32>(),
        f in -1.0e9f64..1.0e9,
        flag in any::<bool>(),
        level in 1i32..10,
    ) {
        let stmts = vec![
            let_(&format!("s_{}", name), string(&text)),
            let_("n", int(n as i64)),
            let_("f", float(f)),
            let_("b", boolean(flag)),
            def(function("g", &["x"], vec![ret(bin(BinaryOp::Add, var("x"), var("n")))])),
        ];
        let bytecode = tern::compile("prop", &stmts).unwrap();
        let words = serialize::encode(&bytecode);
        prop_assert_eq!(serialize::decode(&words).unwrap(), bytecode.clone());
        let bytes = serialize::compress(&bytecode, level).unwrap();
        prop_assert_eq!(serialize::decompress(&bytes).unwrap(), bytecode);
    }

    #[test]
    fn integer_arithmetic_agrees(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let cases = [
            (BinaryOp::Add, a + b),
            (BinaryOp::Subtract, a - b),
            (BinaryOp::Multiply, a * b),
        ];
        for (op, expected) in cases {
            let v = run_value(&[ret(bin(op, int(a), int(b)))]);
            prop_assert_eq!(v, Value::Number(expected as f64));
        }
    }

    #[test]
    fn comparisons_agree(a in -100.0f64..100.0, b in -100.0f64..100.0) {
        let cases = [
            (BinaryOp::Less, a < b),
            (BinaryOp::LessEqual, a <= b),
            (BinaryOp::Greater, a > b),
            (BinaryOp::GreaterEqual, a >= b),
            (BinaryOp::Equal, a == b),
        ];
        for (op, expected) in cases {
            let v = run_value(&[ret(bin(op, float(a), float(b)))]);
            prop_assert_eq!(v, Value::Bool(expected));
        }
    }
}
