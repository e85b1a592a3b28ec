use super::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, Stmt, StmtS};
use crate::config::VmConfig;
use crate::runtime_io::BufferIo;
use crate::vm::compiler::compile_program;

fn runtime_with(config: VmConfig) -> (Arc<Runtime>, BufferIo) {
    let io = BufferIo::new();
    let runtime = Runtime::new(
        Arc::new(NativeRegistry::with_builtins()),
        Box::new(io.clone()),
        config,
    );
    (Arc::new(runtime), io)
}

fn run(stmts: Vec<StmtS>) -> VmResult<Value> {
    let bytecode = compile_program("test", &stmts).unwrap();
    let (runtime, _) = runtime_with(VmConfig::default());
    Vm::new(runtime).run(bytecode)
}

fn run_err(stmts: Vec<StmtS>) -> RuntimeError {
    match run(stmts) {
        Ok(v) => panic!("expected a runtime error, got {:?}", v),
        Err(e) => e,
    }
}

#[test]
fn test_arithmetic_through_globals() {
    let v = run(vec![
        let_("x", bin(BinaryOp::Add, int(2), int(3))),
        ret(bin(BinaryOp::Multiply, var("x"), int(4))),
    ])
    .unwrap();
    assert_eq!(v, Value::Number(20.0));
}

#[test]
fn test_division_by_zero_has_span() {
    let e = run_err(vec![s(Stmt::Expr((
        crate::ast::Expr::Binary {
            op: BinaryOp::Divide,
            left: Box::new(int(1)),
            right: Box::new(int(0)),
        },
        4..9,
    )))]);
    assert_eq!(e.kind, ErrorKind::DivisionByZero);
    assert_eq!(e.span, Some(4..9));
}

#[test]
fn test_unbounded_recursion_overflows_frames() {
    let f = function(
        "down",
        &["n"],
        vec![ret(call(var("down"), vec![bin(BinaryOp::Add, var("n"), int(1))]))],
    );
    let e = run_err(vec![def(f), expr(call(var("down"), vec![int(0)]))]);
    assert_eq!(e.kind, ErrorKind::StackOverflow);
}

#[test]
fn test_operand_stack_limit() {
    let items = (0..32).map(int).collect();
    let bytecode = compile_program("test", &[expr(list(items))]).unwrap();
    let (runtime, _) = runtime_with(VmConfig::default().with_max_stack(8));
    let e = Vm::new(runtime).run(bytecode).unwrap_err();
    assert_eq!(e.kind, ErrorKind::StackOverflow);
}

#[test]
fn test_closure_shares_captured_cell() {
    let inc = function(
        "inc",
        &[],
        vec![
            expr(assign(var("n"), bin(BinaryOp::Add, var("n"), int(1)))),
            ret(var("n")),
        ],
    );
    let make = function(
        "make",
        &[],
        vec![let_("n", int(0)), def(inc), ret(var("inc"))],
    );
    let v = run(vec![
        def(make),
        let_("c", call(var("make"), vec![])),
        expr(call(var("c"), vec![])),
        ret(call(var("c"), vec![])),
    ])
    .unwrap();
    assert_eq!(v, Value::Number(2.0));
}

#[test]
fn test_range_checked_global() {
    let e = run_err(vec![
        s(Stmt::Let {
            name: "r".into(),
            ty: None,
            value: Some(int(5)),
            constant: false,
            range: Some((0.0, 10.0)),
        }),
        expr(assign(var("r"), int(11))),
    ]);
    assert_eq!(e.kind, ErrorKind::RangeError);
}

#[test]
fn test_catcher_turns_error_into_result() {
    let mut f = function(
        "risky",
        &[],
        vec![s(Stmt::Throw {
            kind: "Oops".into(),
            message: string("bad input"),
        })],
    );
    f.modifiers.catcher = true;
    let v = run(vec![
        def(f),
        let_("r", call(var("risky"), vec![])),
        ret(list(vec![attr(var("r"), "ok"), attr(var("r"), "kind"), attr(var("r"), "message")])),
    ])
    .unwrap();
    assert_eq!(
        v,
        Value::list(vec![Value::Bool(false), Value::str("Oops"), Value::str("bad input")])
    );
}

#[test]
fn test_catcher_wraps_normal_return() {
    let mut f = function("fine", &[], vec![ret(int(7))]);
    f.modifiers.catcher = true;
    let v = run(vec![def(f), ret(attr(call(var("fine"), vec![]), "value"))]).unwrap();
    assert_eq!(v, Value::Number(7.0));
}

#[test]
fn test_memoized_calls_fill_cache() {
    let n = || var("n");
    let mut fib = function(
        "fib",
        &["n"],
        vec![
            if_(bin(BinaryOp::Less, n(), int(2)), vec![ret(n())], None),
            ret(bin(
                BinaryOp::Add,
                call(var("fib"), vec![bin(BinaryOp::Subtract, n(), int(1))]),
                call(var("fib"), vec![bin(BinaryOp::Subtract, n(), int(2))]),
            )),
        ],
    );
    fib.modifiers.memoize = true;
    let bytecode = compile_program("test", &[def(fib), ret(call(var("fib"), vec![int(40)]))]).unwrap();
    let (runtime, _) = runtime_with(VmConfig::default());
    let mut vm = Vm::new(runtime.clone());
    assert_eq!(vm.run(bytecode).unwrap(), Value::Number(102334155.0));
    assert_eq!(runtime.memo_len(), 41);
}

#[test]
fn test_memo_is_per_function_across_programs() {
    // 같은 runtime에서 같은 이름의 memo 함수를 가진 두 프로그램
    let program = |result: i64| {
        let mut f = function("f", &["n"], vec![ret(int(result))]);
        f.modifiers.memoize = true;
        compile_program("test", &[def(f), ret(call(var("f"), vec![int(1)]))]).unwrap()
    };
    let (runtime, _) = runtime_with(VmConfig::default());
    assert_eq!(Vm::new(runtime.clone()).run(program(1)).unwrap(), Value::Number(1.0));
    assert_eq!(Vm::new(runtime.clone()).run(program(2)).unwrap(), Value::Number(2.0));
    assert_eq!(runtime.memo_len(), 2);
}

#[test]
fn test_repeat_too_large_is_range_error() {
    for repeated in [list(vec![int(1), int(2)]), string("ab")] {
        let e = run_err(vec![ret(bin(BinaryOp::Multiply, repeated, float(1e19)))]);
        assert_eq!(e.kind, ErrorKind::RangeError);
    }
    let empty = run(vec![ret(bin(BinaryOp::Multiply, list(vec![]), float(1e19)))]).unwrap();
    assert_eq!(empty, Value::list(vec![]));
}

#[test]
fn test_string_concat_stringifies() {
    let v = run(vec![ret(bin(BinaryOp::Add, string("n="), int(3)))]).unwrap();
    assert_eq!(v, Value::str("n=3"));
}

#[test]
fn test_negative_index_and_bounds() {
    let xs = || list(vec![int(1), int(2), int(3)]);
    assert_eq!(
        run(vec![ret(index(xs(), int(-1)))]).unwrap(),
        Value::Number(3.0)
    );
    assert_eq!(
        run_err(vec![ret(index(xs(), int(3)))]).kind,
        ErrorKind::IndexError
    );
}

#[test]
fn test_iter_collects_characters() {
    let v = run(vec![ret(iter("c", string("abc"), vec![expr(var("c"))]))]).unwrap();
    assert_eq!(
        v,
        Value::list(vec![Value::str("a"), Value::str("b"), Value::str("c")])
    );
}

#[test]
fn test_print_goes_through_runtime_io() {
    let bytecode = compile_program(
        "test",
        &[expr(call(var("print"), vec![string("hi"), int(2)]))],
    )
    .unwrap();
    let (runtime, io) = runtime_with(VmConfig::default());
    Vm::new(runtime).run(bytecode).unwrap();
    assert_eq!(io.get_output(), "hi 2\n");
}

#[test]
fn test_error_kind_names_round_trip() {
    for kind in [
        ErrorKind::TypeError,
        ErrorKind::IndexError,
        ErrorKind::DivisionByZero,
        ErrorKind::Thrown("Custom".into()),
    ] {
        assert_eq!(ErrorKind::from_name(&kind.to_string()), kind);
    }
}
