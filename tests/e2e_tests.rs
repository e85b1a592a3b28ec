use tern::ast::build::*;
use tern::ast::{
    BinaryOp, EnumDecl, Expr, MatchArm, Pattern, Stmt, StmtS, SwitchCase, VariantDecl,
};
use tern::config::VmConfig;
use tern::runtime_io::BufferIo;
use tern::vm::{CompileErrorKind, ErrorKind, RuntimeError, Value};

/// E2E 통합 테스트: AST를 컴파일하고 VM으로 실행하여 출력을 확인합니다.

fn run_program(stmts: Vec<StmtS>) -> (Result<Value, RuntimeError>, String) {
    run_with_args(stmts, &[])
}

fn run_with_args(stmts: Vec<StmtS>, argv: &[String]) -> (Result<Value, RuntimeError>, String) {
    let bytecode = match tern::compile("e2e", &stmts) {
        Ok(bc) => bc,
        Err(e) => panic!("compile error: {}", e),
    };
    let io = BufferIo::new();
    let result = tern::run(bytecode, Box::new(io.clone()), VmConfig::default(), argv);
    (result, io.get_output())
}

fn output_of(stmts: Vec<StmtS>) -> String {
    let (result, output) = run_program(stmts);
    if let Err(e) = result {
        panic!("runtime error: {}\noutput so far:\n{}", e, output);
    }
    output
}

fn print(args: Vec<tern::ast::ExprS>) -> StmtS {
    expr(call(var("print"), args))
}

#[test]
fn test_let_and_return() {
    let (result, _) = run_program(vec![
        let_("x", bin(BinaryOp::Add, int(2), int(3))),
        ret(bin(BinaryOp::Multiply, var("x"), int(4))),
    ]);
    assert_eq!(result.unwrap(), Value::Number(20.0));
}

#[test]
fn test_operator_overload_dispatch() {
    let add = operator(function(
        "add",
        &["other"],
        vec![ret(call(
            var("Point"),
            vec![
                bin(BinaryOp::Add, attr(this(), "x"), attr(var("other"), "x")),
                bin(BinaryOp::Add, attr(this(), "y"), attr(var("other"), "y")),
            ],
        ))],
    ));
    let point = class(
        "Point",
        vec![field("x", Some(int(0))), field("y", Some(int(0)))],
        vec![add],
    );
    let out = output_of(vec![
        s(Stmt::Class(point)),
        let_(
            "p",
            bin(
                BinaryOp::Add,
                call(var("Point"), vec![int(1), int(2)]),
                call(var("Point"), vec![int(3), int(4)]),
            ),
        ),
        print(vec![attr(var("p"), "x"), attr(var("p"), "y")]),
    ]);
    assert_eq!(out, "4 6\n");
}

#[test]
fn test_loop_expression_collects_elements() {
    let out = output_of(vec![
        let_("empty", for_range("i", int(0), int(5), vec![])),
        print(vec![call(var("len"), vec![var("empty")])]),
        let_(
            "squares",
            for_range(
                "i",
                int(0),
                int(5),
                vec![expr(bin(BinaryOp::Multiply, var("i"), var("i")))],
            ),
        ),
        print(vec![var("squares")]),
    ]);
    assert_eq!(out, "5\n[0, 1, 4, 9, 16]\n");
}

#[test]
fn test_default_and_keyword_arguments() {
    let mut f = function(
        "f",
        &["a", "b"],
        vec![ret(bin(
            BinaryOp::Add,
            bin(BinaryOp::Multiply, var("a"), int(10)),
            var("b"),
        ))],
    );
    f.params[1].default = Some(int(5));
    let out = output_of(vec![
        def(f),
        print(vec![call(var("f"), vec![int(1)])]),
        print(vec![call_args(
            var("f"),
            vec![tern::ast::Arg::Positional(int(2)), kw("b", int(3))],
        )]),
        print(vec![call_args(var("f"), vec![kw("b", int(4)), kw("a", int(1))])]),
    ]);
    assert_eq!(out, "15\n23\n14\n");
}

#[test]
fn test_argument_count_is_compile_error() {
    let stmts = vec![
        def(function("two", &["a", "b"], vec![])),
        expr(call(var("two"), vec![int(1), int(2), int(3)])),
    ];
    let e = tern::compile("e2e", &stmts).unwrap_err();
    assert_eq!(e.kind, CompileErrorKind::ArgumentCount);
}

#[test]
fn test_enum_pattern_binding() {
    let shape = EnumDecl {
        name: "Shape".into(),
        variants: vec![
            VariantDecl {
                name: "Circle".into(),
                fields: vec!["r".into()],
            },
            VariantDecl {
                name: "Square".into(),
                fields: vec!["side".into()],
            },
        ],
    };
    let arms = vec![
        MatchArm {
            pattern: Pattern::Destructure {
                target: attr(var("Shape"), "Circle"),
                required: vec![],
                bind: vec!["r".into()],
            },
            body: vec![print(vec![string("circle"), var("r")])],
        },
        MatchArm {
            pattern: Pattern::Destructure {
                target: attr(var("Shape"), "Square"),
                required: vec![],
                bind: vec!["side".into()],
            },
            body: vec![print(vec![string("square"), var("side")])],
        },
    ];
    let out = output_of(vec![
        s(Stmt::Enum(shape)),
        s(Stmt::Match {
            subject: call(attr(var("Shape"), "Square"), vec![int(3)]),
            arms,
            default: Some(vec![print(vec![string("none")])]),
        }),
    ]);
    assert_eq!(out, "square 3\n");
}

#[test]
fn test_catcher_reports_thrown_error() {
    let mut risky = function(
        "risky",
        &[],
        vec![s(Stmt::Throw {
            kind: "Oops".into(),
            message: string("bad input"),
        })],
    );
    risky.modifiers.catcher = true;
    let out = output_of(vec![def(risky), print(vec![call(var("risky"), vec![])])]);
    assert_eq!(out, "err(Oops: bad input)\n");
}

#[test]
fn test_uncaught_throw_is_runtime_error() {
    let (result, _) = run_program(vec![s(Stmt::Throw {
        kind: "Boom".into(),
        message: string("no catcher"),
    })]);
    let e = result.unwrap_err();
    assert_eq!(e.kind, ErrorKind::Thrown("Boom".into()));
    assert_eq!(e.message, "no catcher");
}

#[test]
fn test_memoized_fibonacci() {
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
    let out = output_of(vec![def(fib), print(vec![call(var("fib"), vec![int(60)])])]);
    assert_eq!(out, "1548008755920\n");
}

#[test]
fn test_async_task_joined_before_exit() {
    let mut work = function("work", &["tag"], vec![print(vec![string("task"), var("tag")])]);
    work.modifiers.is_async = true;
    let out = output_of(vec![
        def(work),
        expr(call(var("work"), vec![int(1)])),
        expr(call(var("work"), vec![int(2)])),
    ]);
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["task 1", "task 2"]);
}

#[test]
fn test_constant_reassignment_rejected() {
    let stmts = vec![const_("k", int(1)), expr(assign(var("k"), int(2)))];
    let e = tern::compile("e2e", &stmts).unwrap_err();
    assert_eq!(e.kind, CompileErrorKind::Scope);
}

#[test]
fn test_range_violation_at_runtime() {
    let (result, _) = run_program(vec![
        s(Stmt::Let {
            name: "pct".into(),
            ty: None,
            value: Some(int(50)),
            constant: false,
            range: Some((0.0, 100.0)),
        }),
        expr(compound(var("pct"), BinaryOp::Add, int(60))),
    ]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::RangeError);
}

#[test]
fn test_negative_indexing() {
    let out = output_of(vec![
        let_("xs", list(vec![int(10), int(20), int(30)])),
        print(vec![index(var("xs"), int(-1)), index(var("xs"), int(-3))]),
        print(vec![index(string("hello"), int(-1))]),
    ]);
    assert_eq!(out, "30 10\no\n");
}

#[test]
fn test_switch_expression() {
    let label = |n: i64| {
        s(Expr::Switch {
            subject: Box::new(int(n)),
            cases: vec![
                SwitchCase {
                    values: vec![int(1), int(2)],
                    result: string("low"),
                },
                SwitchCase {
                    values: vec![int(3)],
                    result: string("three"),
                },
            ],
            default: Some(Box::new(string("other"))),
        })
    };
    let out = output_of(vec![print(vec![label(2), label(3), label(9)])]);
    assert_eq!(out, "low three other\n");
}

#[test]
fn test_decorator_wraps_function() {
    let double = function(
        "double",
        &["f"],
        vec![ret(lambda(
            &["x"],
            vec![ret(bin(
                BinaryOp::Multiply,
                call(var("f"), vec![var("x")]),
                int(2),
            ))],
        ))],
    );
    let mut inc = function("inc", &["x"], vec![ret(bin(BinaryOp::Add, var("x"), int(1)))]);
    inc.decorators = vec![var("double")];
    let out = output_of(vec![
        def(double),
        def(inc),
        print(vec![call(var("inc"), vec![int(3)])]),
    ]);
    assert_eq!(out, "8\n");
}

#[test]
fn test_inheritance_and_super() {
    let animal = class(
        "Animal",
        vec![field("name", Some(string("?")))],
        vec![method(function("speak", &[], vec![ret(string("..."))]))],
    );
    let mut dog = class(
        "Dog",
        vec![],
        vec![method(function(
            "speak",
            &[],
            vec![ret(bin(
                BinaryOp::Add,
                attr(this(), "name"),
                bin(
                    BinaryOp::Add,
                    string(": "),
                    call(s(Expr::Super("speak".into())), vec![]),
                ),
            ))],
        ))],
    );
    dog.parent = Some("Animal".into());
    let out = output_of(vec![
        s(Stmt::Class(animal)),
        s(Stmt::Class(dog)),
        let_("d", call(var("Dog"), vec![string("rex")])),
        print(vec![call(attr(var("d"), "speak"), vec![])]),
    ]);
    assert_eq!(out, "rex: ...\n");
}

#[test]
fn test_main_receives_arguments() {
    let main = function(
        "main",
        &["args"],
        vec![print(vec![call(var("len"), vec![var("args")]), index(var("args"), int(0))])],
    );
    let argv = vec!["first".to_string(), "second".to_string()];
    let (result, out) = run_with_args(vec![def(main)], &argv);
    assert!(result.is_ok());
    assert_eq!(out, "2 first\n");
}

#[test]
fn test_bytecode_file_round_trip() {
    let stmts = vec![
        def(function("sq", &["n"], vec![ret(bin(BinaryOp::Multiply, var("n"), var("n")))])),
        print(vec![call(var("sq"), vec![int(12)])]),
    ];
    let bytecode = tern::compile("e2e", &stmts).unwrap();
    let path = std::env::temp_dir().join(format!("tern-e2e-{}.ternb", std::process::id()));
    tern::save_bytecode(&bytecode, &path, 3).unwrap();
    let loaded = tern::load_bytecode(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, bytecode);

    let io = BufferIo::new();
    tern::run(loaded, Box::new(io.clone()), VmConfig::default(), &[]).unwrap();
    assert_eq!(io.get_output(), "144\n");
}

#[test]
fn test_private_parent_field_at_runtime() {
    let mut f = field("f", Some(int(1)));
    f.private = true;
    let bump_p = method(function(
        "bump_p",
        &[],
        vec![
            expr(assign(attr(this(), "f"), bin(BinaryOp::Add, attr(this(), "f"), int(1)))),
            ret(attr(this(), "f")),
        ],
    ));
    let bump_c = method(function(
        "bump_c",
        &[],
        vec![
            expr(assign(attr(this(), "f"), bin(BinaryOp::Multiply, attr(this(), "f"), int(10)))),
            ret(attr(this(), "f")),
        ],
    ));
    let program = |tail: StmtS| {
        let mut child = class("C", vec![], vec![bump_c.clone()]);
        child.parent = Some("P".into());
        vec![
            s(Stmt::Class(class("P", vec![f.clone()], vec![bump_p.clone()]))),
            s(Stmt::Class(child)),
            let_("c", call(var("C"), vec![])),
            print(vec![
                call(attr(var("c"), "bump_p"), vec![]),
                call(attr(var("c"), "bump_c"), vec![]),
            ]),
            let_typed("a", "any", var("c")),
            tail,
        ]
    };

    let (result, out) = run_program(program(print(vec![attr(var("a"), "f")])));
    assert_eq!(out, "2 20\n");
    assert_eq!(result.unwrap_err().kind, ErrorKind::ScopeError);

    let (result, _) = run_program(program(expr(assign(attr(var("a"), "f"), int(5)))));
    assert_eq!(result.unwrap_err().kind, ErrorKind::ScopeError);

    // 정적 타입이 보이면 컴파일 단계에서 막힌다
    let e = tern::compile("e2e", &program(print(vec![attr(var("c"), "f")]))).unwrap_err();
    assert_eq!(e.kind, CompileErrorKind::Scope);
}

#[test]
fn test_failed_pattern_binds_nothing() {
    let shape = EnumDecl {
        name: "Shape".into(),
        variants: vec![
            VariantDecl {
                name: "Circle".into(),
                fields: vec!["r".into()],
            },
            VariantDecl {
                name: "Square".into(),
                fields: vec!["side".into()],
            },
        ],
    };
    let check = |subject: tern::ast::ExprS| {
        s(Stmt::Match {
            subject,
            arms: vec![MatchArm {
                pattern: Pattern::Destructure {
                    target: attr(var("Shape"), "Square"),
                    required: vec![("side".into(), int(4))],
                    bind: vec!["side".into()],
                },
                body: vec![print(vec![string("hit"), var("side")])],
            }],
            default: Some(vec![print(vec![string("none"), var("side")])]),
        })
    };
    let out = output_of(vec![
        s(Stmt::Enum(shape)),
        let_("side", string("outer")),
        check(call(attr(var("Shape"), "Circle"), vec![int(4)])),
        check(call(attr(var("Shape"), "Square"), vec![int(3)])),
        check(call(attr(var("Shape"), "Square"), vec![int(4)])),
        print(vec![var("side")]),
    ]);
    assert_eq!(out, "none outer\nnone outer\nhit 4\nouter\n");
}

#[test]
fn test_instance_subscript_operators() {
    let cells = || attr(this(), "cells");
    let bracket = operator(function(
        "bracket",
        &["i"],
        vec![ret(bin(BinaryOp::Multiply, index(cells(), var("i")), int(10)))],
    ));
    let set = operator(function(
        "set",
        &["i", "v"],
        vec![expr(assign(index(cells(), var("i")), var("v")))],
    ));
    let grid = class(
        "Grid",
        vec![field("cells", Some(list(vec![int(0), int(0), int(0)])))],
        vec![bracket, set],
    );
    let get = operator(function(
        "get",
        &["key"],
        vec![ret(bin(BinaryOp::Add, var("key"), string("!")))],
    ));
    let out = output_of(vec![
        s(Stmt::Class(grid)),
        s(Stmt::Class(class("Echo", vec![], vec![get]))),
        let_("g", call(var("Grid"), vec![])),
        expr(assign(index(var("g"), int(1)), int(7))),
        print(vec![index(var("g"), int(1)), index(var("g"), int(-1))]),
        print(vec![index(call(var("Echo"), vec![]), string("hi"))]),
    ]);
    assert_eq!(out, "70 0\nhi!\n");
}

#[test]
fn test_subscript_without_operators_rejected() {
    let plain = || s(Stmt::Class(class("Plain", vec![field("x", Some(int(0)))], vec![])));
    let read = vec![
        plain(),
        let_("p", call(var("Plain"), vec![])),
        expr(index(var("p"), int(0))),
    ];
    assert_eq!(tern::compile("e2e", &read).unwrap_err().kind, CompileErrorKind::Type);
    let write = vec![
        plain(),
        let_("p", call(var("Plain"), vec![])),
        expr(assign(index(var("p"), int(0)), int(1))),
    ];
    assert_eq!(tern::compile("e2e", &write).unwrap_err().kind, CompileErrorKind::Type);
}

#[test]
fn test_string_plus_instance() {
    let string_op = operator(function("string", &[], vec![ret(string("P!"))]));
    let out = output_of(vec![
        s(Stmt::Class(class("P", vec![], vec![string_op]))),
        s(Stmt::Class(class("Plain", vec![], vec![]))),
        print(vec![bin(BinaryOp::Add, string("p = "), call(var("P"), vec![]))]),
        print(vec![bin(BinaryOp::Add, string("x "), call(var("Plain"), vec![]))]),
        print(vec![bin(BinaryOp::Add, call(var("Plain"), vec![]), string(" y"))]),
    ]);
    assert_eq!(out, "p = P!\nx <Plain instance>\n<Plain instance> y\n");
}

#[test]
fn test_dynamic_callee_checks_argument_count() {
    let (result, _) = run_program(vec![
        def(function("two", &["a", "b"], vec![ret(var("a"))])),
        let_typed("f", "any", var("two")),
        expr(call(var("f"), vec![int(1)])),
    ]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::ArgumentCountError);
}

#[test]
fn test_async_tasks_joined_on_error() {
    let mut work = function("work", &[], vec![print(vec![string("task done")])]);
    work.modifiers.is_async = true;
    let (result, out) = run_program(vec![
        def(work),
        expr(call(var("work"), vec![])),
        s(Stmt::Throw {
            kind: "Boom".into(),
            message: string("after spawn"),
        }),
    ]);
    assert_eq!(result.unwrap_err().kind, ErrorKind::Thrown("Boom".into()));
    assert_eq!(out, "task done\n");
}
