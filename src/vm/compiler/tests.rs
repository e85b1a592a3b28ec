use super::*;
use crate::ast::build::*;
use crate::ast::{BinaryOp, FieldDecl, MatchArm, Pattern, VariantDecl};
use crate::vm::bytecode::MemberFlags;

fn compile(stmts: Vec<StmtS>) -> CompileResult<ByteCode> {
    compile_program("test", &stmts)
}

fn ops(bc: &ByteCode) -> Vec<OpCode> {
    bc.chunk.instructions().map(|i| i.op).collect()
}

fn kind_of(stmts: Vec<StmtS>) -> CompileErrorKind {
    match compile(stmts) {
        Ok(_) => panic!("expected a compile error"),
        Err(e) => e.kind,
    }
}

fn function_constant(bc: &ByteCode, name: &str) -> Arc<ByteCode> {
    bc.chunk
        .constants
        .iter()
        .find_map(|c| match c {
            Constant::Function(f) if f.name == name => Some(f.clone()),
            _ => None,
        })
        .expect("function constant")
}

#[test]
fn test_script_ends_with_return() {
    let bc = compile(vec![]).unwrap();
    assert_eq!(ops(&bc), vec![OpCode::Null, OpCode::Return]);
    assert!(bc.chunk.is_well_formed());
    assert!(bc.chunk.finalized);
}

#[test]
fn test_top_level_let_is_global() {
    let bc = compile(vec![let_("x", int(1))]).unwrap();
    assert_eq!(
        ops(&bc),
        vec![OpCode::Constant, OpCode::DefineGlobal, OpCode::Null, OpCode::Return]
    );
}

#[test]
fn test_block_scope_pops_locals() {
    let bc = compile(vec![block(vec![
        let_("a", int(1)),
        let_("b", int(2)),
        expr(bin(BinaryOp::Add, var("a"), var("b"))),
    ])])
    .unwrap();
    let codes = ops(&bc);
    assert_eq!(codes.iter().filter(|o| **o == OpCode::Declare).count(), 2);
    // 식 문장 하나 + 스코프 종료 두 개
    assert_eq!(codes.iter().filter(|o| **o == OpCode::Pop).count(), 3);
    let slots: Vec<u32> = bc
        .chunk
        .instructions()
        .filter(|i| i.op == OpCode::GetLocal)
        .map(|i| i.operands[0])
        .collect();
    assert_eq!(slots, vec![1, 2]);
}

#[test]
fn test_closure_captures_upvalue() {
    let outer = function(
        "outer",
        &[],
        vec![
            let_("n", int(1)),
            def(function("inner", &[], vec![ret(var("n"))])),
            ret(var("inner")),
        ],
    );
    let bc = compile(vec![def(outer)]).unwrap();
    let outer = function_constant(&bc, "outer");
    let inner = function_constant(&outer, "inner");
    assert_eq!(inner.upvalue_count, 1);
    assert!(ops(&inner).contains(&OpCode::GetUpvalue));
    let closure = outer
        .chunk
        .instructions()
        .find(|i| i.op == OpCode::Closure)
        .unwrap();
    // (const, count, is_local, index)
    assert_eq!(&closure.operands[1..], &[1, 1, 1]);
}

#[test]
fn test_undefined_variable_is_scope_error() {
    assert_eq!(kind_of(vec![expr(var("missing"))]), CompileErrorKind::Scope);
}

#[test]
fn test_redeclaration_in_same_scope() {
    let stmts = vec![block(vec![let_("a", int(1)), let_("a", int(2))])];
    assert_eq!(kind_of(stmts), CompileErrorKind::Scope);
}

#[test]
fn test_assign_to_constant_rejected() {
    let stmts = vec![const_("k", int(1)), expr(assign(var("k"), int(2)))];
    assert_eq!(kind_of(stmts), CompileErrorKind::Scope);
}

#[test]
fn test_float_double_mismatch() {
    assert_eq!(
        kind_of(vec![let_typed("f", "float", float(1.5))]),
        CompileErrorKind::Type
    );
    assert!(compile(vec![let_typed("d", "double", int(3))]).is_ok());
    assert!(compile(vec![let_typed("i", "int", float(2.0))]).is_ok());
}

#[test]
fn test_argument_count_checked() {
    let stmts = vec![
        def(function("two", &["a", "b"], vec![ret(var("a"))])),
        expr(call(var("two"), vec![int(1)])),
    ];
    assert_eq!(kind_of(stmts), CompileErrorKind::ArgumentCount);
}

#[test]
fn test_keyword_arguments_relax_count() {
    let mut f = function("f", &["a", "b"], vec![ret(var("b"))]);
    f.params[1].default = Some(int(5));
    let stmts = vec![
        def(f),
        expr(call_args(var("f"), vec![kw("b", int(2)), kw("a", int(1))])),
    ];
    let bc = compile(stmts).unwrap();
    let call = bc.chunk.instructions().find(|i| i.op == OpCode::Call).unwrap();
    assert_eq!(call.operands, &[0, 2]);
}

#[test]
fn test_unknown_keyword_rejected() {
    let stmts = vec![
        def(function("f", &["a"], vec![])),
        expr(call_args(var("f"), vec![kw("zzz", int(1))])),
    ];
    assert_eq!(kind_of(stmts), CompileErrorKind::ArgumentCount);
}

#[test]
fn test_required_after_default_is_structure_error() {
    let mut f = function("f", &["a", "b"], vec![]);
    f.params[0].default = Some(int(1));
    assert_eq!(kind_of(vec![def(f)]), CompileErrorKind::Structure);
}

#[test]
fn test_private_field_hidden_outside_class() {
    let mut secret: FieldDecl = field("secret", Some(int(1)));
    secret.private = true;
    let stmts = vec![
        s(Stmt::Class(class("Box", vec![secret], vec![]))),
        let_("b", call(var("Box"), vec![])),
        expr(attr(var("b"), "secret")),
    ];
    assert_eq!(kind_of(stmts), CompileErrorKind::Scope);
}

#[test]
fn test_private_field_visible_through_this() {
    let mut secret = field("secret", Some(int(1)));
    secret.private = true;
    let peek = method(function("peek", &[], vec![ret(attr(this(), "secret"))]));
    let stmts = vec![s(Stmt::Class(class("Box", vec![secret], vec![peek])))];
    assert!(compile(stmts).is_ok());
}

#[test]
fn test_break_outside_loop() {
    assert_eq!(kind_of(vec![s(Stmt::Break)]), CompileErrorKind::Structure);
}

#[test]
fn test_loop_statement_has_no_cache() {
    let bc = compile(vec![expr(for_range("i", int(0), int(3), vec![]))]).unwrap();
    let codes = ops(&bc);
    assert!(!codes.contains(&OpCode::StartCache));
    assert!(codes.contains(&OpCode::ForCheck));
    assert!(codes.contains(&OpCode::ForStep));
}

#[test]
fn test_loop_expression_collects() {
    let bc = compile(vec![let_("xs", for_range("i", int(0), int(3), vec![expr(var("i"))]))]).unwrap();
    let codes = ops(&bc);
    assert_eq!(codes[0], OpCode::StartCache);
    assert!(codes.contains(&OpCode::CollectLoop));
    assert!(codes.contains(&OpCode::FlushLoop));
}

#[test]
fn test_class_hoisted_before_use() {
    let stmts = vec![
        let_("p", call(var("Point"), vec![int(1), int(2)])),
        s(Stmt::Class(class(
            "Point",
            vec![field("x", Some(int(0))), field("y", Some(int(0)))],
            vec![],
        ))),
    ];
    let bc = compile(stmts).unwrap();
    let class_op = bc.chunk.instructions().find(|i| i.op == OpCode::Class).unwrap();
    // name, attrs, generics, has_parent, (x, flags), (y, flags)
    assert_eq!(class_op.operands[1], 2);
    assert_eq!(class_op.operands[3], 0);
    let methods: Vec<u32> = bc
        .chunk
        .instructions()
        .filter(|i| i.op == OpCode::Method)
        .map(|i| i.operands[1])
        .collect();
    assert_eq!(methods, vec![MemberFlags::CONSTRUCTOR.bits()]);
}

#[test]
fn test_inheritance_cycle() {
    let mut a = class("A", vec![], vec![]);
    a.parent = Some("B".into());
    let mut b = class("B", vec![], vec![]);
    b.parent = Some("A".into());
    let stmts = vec![s(Stmt::Class(a)), s(Stmt::Class(b))];
    assert_eq!(kind_of(stmts), CompileErrorKind::Structure);
}

#[test]
fn test_duplicate_enum_variant() {
    let e = crate::ast::EnumDecl {
        name: "E".into(),
        variants: vec![
            VariantDecl {
                name: "A".into(),
                fields: vec![],
            },
            VariantDecl {
                name: "A".into(),
                fields: vec![],
            },
        ],
    };
    assert_eq!(kind_of(vec![s(Stmt::Enum(e))]), CompileErrorKind::Structure);
}

#[test]
fn test_match_destructure_binds() {
    let e = crate::ast::EnumDecl {
        name: "Shape".into(),
        variants: vec![VariantDecl {
            name: "Circle".into(),
            fields: vec!["r".into()],
        }],
    };
    let arm = MatchArm {
        pattern: Pattern::Destructure {
            target: attr(var("Shape"), "Circle"),
            required: vec![],
            bind: vec!["r".into()],
        },
        body: vec![expr(var("r"))],
    };
    let stmts = vec![
        s(Stmt::Enum(e)),
        s(Stmt::Match {
            subject: call(attr(var("Shape"), "Circle"), vec![int(2)]),
            arms: vec![arm],
            default: None,
        }),
    ];
    let bc = compile(stmts).unwrap();
    let pattern = bc
        .chunk
        .instructions()
        .find(|i| i.op == OpCode::MakePattern)
        .unwrap();
    assert_eq!(pattern.operands[..2], [0, 1]);
    assert!(bc.chunk.is_well_formed());
}

#[test]
fn test_compound_index_needs_pure_operands() {
    let stmts = vec![
        let_("xs", list(vec![int(1)])),
        expr(compound(
            index(call(var("len"), vec![var("xs")]), int(0)),
            BinaryOp::Add,
            int(1),
        )),
    ];
    assert_eq!(kind_of(stmts), CompileErrorKind::Structure);
}

#[test]
fn test_non_numeric_range_bound() {
    let stmts = vec![expr(range(string("a"), int(3)))];
    assert_eq!(kind_of(stmts), CompileErrorKind::Type);
}
