/// Compiled-code shape: peephole collapses, constant folding, and the
/// structural invariants of emitted opcode streams.

use abacus::bytecode::{Function, Op};
use abacus::core::value::{values_equal, Value};
use abacus::Runtime;
use std::rc::Rc;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn compile(src: &str, name: &str) -> (Runtime, Rc<Function>) {
    let mut rt = Runtime::new();
    rt.eval(src).expect("compilation should succeed");
    let f = rt
        .functions
        .get_by_name(name)
        .expect("function should be defined");
    (rt, f)
}

/// Decode a flat opcode buffer into (opcode, operand words) pairs.
fn decode(f: &Function) -> Vec<(Op, Vec<i64>)> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < f.opcodes.len() {
        let op = Op::from_word(f.opcodes[pc]).expect("valid opcode word");
        let w = op.width();
        out.push((op, f.opcodes[pc + 1..pc + w].to_vec()));
        pc += w;
    }
    out
}

fn count(ops: &[(Op, Vec<i64>)], want: Op) -> usize {
    ops.iter().filter(|(op, _)| *op == want).count()
}

// ─── Constant folding ────────────────────────────────────────────────────────

#[test]
fn two_literal_arithmetic_folds_to_one_constant() {
    let (rt, f) = compile("define f() = 10*3 + 4;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::Number), 1);
    assert_eq!(count(&ops, Op::Mul), 0);
    assert_eq!(count(&ops, Op::Add), 0);
    let idx = ops
        .iter()
        .find(|(op, _)| *op == Op::Number)
        .map(|(_, args)| args[0] as usize)
        .unwrap();
    assert_eq!(rt.constant(idx).to_string(), "34");
}

#[test]
fn folding_skips_division_by_zero() {
    let (_rt, f) = compile("define f() = 0 && (1/0);", "f");
    let ops = decode(&f);
    // the division must survive to run time
    assert_eq!(count(&ops, Op::Div), 1);
}

#[test]
fn folded_negation() {
    let (rt, f) = compile("define f() = -5;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::Negate), 0);
    let idx = ops
        .iter()
        .find(|(op, _)| *op == Op::Number)
        .map(|(_, args)| args[0] as usize)
        .unwrap();
    assert_eq!(rt.constant(idx).to_string(), "-5");
}

#[test]
fn folding_preserves_semantics() {
    for (src, expect) in [
        ("7 + 8;", 15),
        ("7 - 8;", -1),
        ("7 * 8;", 56),
        ("7 // 2;", 3),
        ("7 % 2;", 1),
        ("2 ^ 10;", 1024),
    ] {
        let mut rt = Runtime::new();
        let v = rt.eval(src).unwrap();
        assert!(
            values_equal(&v, &Value::int(expect)),
            "{} gave {:?}",
            src,
            v
        );
    }
}

// ─── Peephole collapses ──────────────────────────────────────────────────────

#[test]
fn zero_and_one_collapse_to_dedicated_opcodes() {
    let (_rt, f) = compile("define f(x) = x + 1;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::One), 1);
    assert_eq!(count(&ops, Op::Number), 0);
    let (_rt, g) = compile("define g(x) = x + 0;", "g");
    let ops = decode(&g);
    assert_eq!(count(&ops, Op::Zero), 1);
}

#[test]
fn address_plus_getvalue_becomes_value_opcode() {
    let (_rt, f) = compile("define f(x) = x + 1;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::ParamValue), 1);
    assert_eq!(count(&ops, Op::ParamAddr), 0);
    assert_eq!(count(&ops, Op::GetValue), 0);
}

#[test]
fn power_of_two_rewrites_to_square() {
    let (_rt, f) = compile("define f(x) = x^2;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::Square), 1);
    assert_eq!(count(&ops, Op::Power), 0);
    let (_rt, g) = compile("define g(x) = x^4;", "g");
    let ops = decode(&g);
    assert_eq!(count(&ops, Op::Square), 2);
    assert_eq!(count(&ops, Op::Power), 0);
}

#[test]
fn assign_then_pop_fuses() {
    let (_rt, f) = compile("define f() { local i; i = 5; return i; }", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::AssignPop), 1);
    assert_eq!(count(&ops, Op::Assign), 0);
}

#[test]
fn debug_opcodes_dedup_per_line() {
    let (_rt, f) = compile("define f() { local a; a = 1; a = 2; return a; }", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::Debug), 1);
}

#[test]
fn square_rewrite_still_computes_powers() {
    let mut rt = Runtime::new();
    rt.eval("define f(x) = x^2; define g(x) = x^4;").unwrap();
    assert!(values_equal(&rt.eval("f(9);").unwrap(), &Value::int(81)));
    assert!(values_equal(&rt.eval("g(3);").unwrap(), &Value::int(81)));
}

// ─── Structural invariants ───────────────────────────────────────────────────

#[test]
fn jump_targets_stay_inside_the_function() {
    let src = r#"
        define f(n) {
            local s, i;
            s = 0;
            for (i = 0; i < n; i++) {
                if (i % 2)
                    continue;
                s += i;
            }
            while (s > 100) {
                s -= 1;
            }
            switch (s) {
                case 0: s = 1; break;
                default: break;
            }
            return s;
        }
    "#;
    let (mut rt, f) = compile(src, "f");
    let len = f.opcodes.len() as i64;
    let mut pc = 0usize;
    while pc < f.opcodes.len() {
        let op = Op::from_word(f.opcodes[pc]).unwrap();
        let w = op.width();
        if op.is_jump() {
            let target = f.opcodes[pc + w - 1];
            assert!(
                (0..len).contains(&target),
                "{:?} at {} jumps to {}",
                op,
                pc,
                target
            );
        }
        pc += w;
    }
    // and the function still works
    assert!(values_equal(&rt.eval("f(7);").unwrap(), &Value::int(12)));
}

#[test]
fn every_function_ends_with_a_return() {
    for src in [
        "define f() { local x; x = 1; }",
        "define f() { print \"hi\"; }",
        "define f(a) = a;",
    ] {
        let (_rt, f) = compile(src, "f");
        let ops = decode(&f);
        assert_eq!(ops.last().map(|(op, _)| *op), Some(Op::Return), "{}", src);
    }
}

#[test]
fn anonymous_functions_save_and_print_results() {
    let mut rt = Runtime::new();
    rt.eval("2 + 3;").unwrap();
    let f = rt.functions.get_by_name("*").unwrap();
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::Save), 1);
    assert_eq!(count(&ops, Op::PrintResult), 1);
}

#[test]
fn assignments_do_not_print() {
    let mut rt = Runtime::new();
    rt.eval("zz = 5;").unwrap();
    let f = rt.functions.get_by_name("*").unwrap();
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::PrintResult), 0);
    assert_eq!(count(&ops, Op::Save), 1);
}

#[test]
fn short_circuit_uses_cond_jumps() {
    let (_rt, f) = compile("define f(a, b) = a || b && a;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::CondOrJump), 1);
    assert_eq!(count(&ops, Op::CondAndJump), 1);
}

#[test]
fn parameter_defaults_compile_to_jumpnn_guards() {
    let (_rt, f) = compile("define f(x = 41 + 1) = x;", "f");
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::JumpNn), 1);
    assert_eq!(count(&ops, Op::AssignPop), 1);
}

#[test]
fn case_compiles_to_casejump_chains() {
    let (_rt, f) = compile(
        "define f(x) { switch (x) { case 1: return 10; case 2: return 20; } return 0; }",
        "f",
    );
    let ops = decode(&f);
    assert_eq!(count(&ops, Op::CaseJump), 2);
}

#[test]
fn matrix_writes_carry_the_write_flag() {
    let mut rt = Runtime::new();
    rt.eval("mat A[2]; A[0] = 1; zz = A[1];").unwrap();
    // the most recent anonymous function reads A[1]: read intent
    let f = rt.functions.get_by_name("*").unwrap();
    let ops = decode(&f);
    let read = ops
        .iter()
        .find(|(op, _)| *op == Op::IndexAddr)
        .expect("index opcode");
    assert_eq!(read.1[1], 0, "read access must not set the write flag");
}
