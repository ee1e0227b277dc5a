/// End-to-end evaluation through the public Runtime API.
///
/// These tests verify:
///   • rational canonicalization through real source text
///   • arbitrary-precision results
///   • matrix, list and association behavior including aliasing
///   • statement forms: if/while/for/do/switch/goto, ?:, && and ||
///   • error surfaces for division by zero and undefined names

use abacus::core::value::{values_equal, Kind, Value};
use abacus::errors::{CalcError, ExecError};
use abacus::Runtime;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn eval(src: &str) -> Value {
    let mut rt = Runtime::new();
    rt.eval(src).expect("evaluation should succeed")
}

fn eval_err(src: &str) -> CalcError {
    let mut rt = Runtime::new();
    rt.eval(src).expect_err("evaluation should fail")
}

fn assert_int(v: &Value, n: i64) {
    assert!(
        values_equal(v, &Value::int(n)),
        "expected {}, got {:?}",
        n,
        v
    );
}

// ─── Arithmetic ──────────────────────────────────────────────────────────────

#[test]
fn rationals_canonicalize() {
    let v = eval("3/6 + 1/2;");
    assert_int(&v, 1);
    match &v.kind {
        Kind::Num(q) => assert!(q.is_integer()),
        other => panic!("expected a rational, got {:?}", other),
    }
}

#[test]
fn arbitrary_precision_power() {
    let v = eval("2^100;");
    let Kind::Num(q) = &v.kind else { panic!() };
    assert_eq!(q.to_string(), "1267650600228229401496703205376");
}

#[test]
fn integer_quotient_and_modulus() {
    assert_int(&eval("7 // 2;"), 3);
    assert_int(&eval("-7 // 2;"), -3);
    assert_int(&eval("7 % 3;"), 1);
    assert_int(&eval("7 % -3;"), -2);
}

#[test]
fn power_equals_double_star() {
    assert_int(&eval("3 ** 4;"), 81);
    assert_int(&eval("3 ^ 4;"), 81);
}

#[test]
fn imaginary_arithmetic_demotes_to_real() {
    let v = eval("2i * 2i;");
    assert_int(&v, -4);
    assert!(matches!(v.kind, Kind::Num(_)));
    assert_int(&eval("(1+2i) * (1-2i);"), 5);
}

#[test]
fn division_by_zero_is_a_domain_error() {
    match eval_err("1/0;") {
        CalcError::Exec {
            error: ExecError::Domain(_),
            ..
        } => {}
        other => panic!("expected a domain error, got {:?}", other),
    }
}

#[test]
fn old_value_expression() {
    let mut rt = Runtime::new();
    rt.eval("6*7;").unwrap();
    let v = rt.eval(". + 1;").unwrap();
    assert_int(&v, 43);
}

// ─── Variables and assignment ────────────────────────────────────────────────

#[test]
fn assignment_chains_and_op_assign() {
    let mut rt = Runtime::new();
    rt.eval("a = b = 5; a += 2; b *= 3;").unwrap();
    assert_int(&rt.global_value("a").unwrap(), 7);
    assert_int(&rt.global_value("b").unwrap(), 15);
}

#[test]
fn compound_assign_family() {
    let mut rt = Runtime::new();
    rt.eval("x = 10; x //= 3; y = 12; y %= 5; z = 1; z <<= 4;")
        .unwrap();
    assert_int(&rt.global_value("x").unwrap(), 3);
    assert_int(&rt.global_value("y").unwrap(), 2);
    assert_int(&rt.global_value("z").unwrap(), 16);
}

#[test]
fn increment_and_decrement() {
    let mut rt = Runtime::new();
    rt.eval("n = 5; a = n++; b = ++n;").unwrap();
    assert_int(&rt.global_value("n").unwrap(), 7);
    assert_int(&rt.global_value("a").unwrap(), 5);
    assert_int(&rt.global_value("b").unwrap(), 7);
}

#[test]
fn undefined_symbol_inside_function_is_a_compile_error() {
    let mut rt = Runtime::new();
    assert!(rt.eval("define f() { return nosuchvar; }").is_err());
}

// ─── Matrices ────────────────────────────────────────────────────────────────

#[test]
fn matrix_declaration_and_indexing() {
    let mut rt = Runtime::new();
    let v = rt.eval("mat A[3] = {10, 20, 30}; A[1];").unwrap();
    assert_int(&v, 20);
}

#[test]
fn matrix_fast_index() {
    let mut rt = Runtime::new();
    let v = rt.eval("mat A[2,2] = {1, 2, 3, 4}; A[[3]];").unwrap();
    assert_int(&v, 4);
    let v = rt.eval("A[1,0];").unwrap();
    assert_int(&v, 3);
}

#[test]
fn matrix_bounds_are_checked() {
    match eval_err("mat A[3]; A[3];") {
        CalcError::Exec {
            error: ExecError::Domain(_),
            ..
        } => {}
        other => panic!("expected a domain error, got {:?}", other),
    }
}

#[test]
fn matrix_lower_bounds() {
    let v = eval("mat A[1:3] = {11, 22, 33}; A[2];");
    assert_int(&v, 22);
}

#[test]
fn matrix_implicit_bounds_from_initializer() {
    let mut rt = Runtime::new();
    rt.eval("mat A[] = {5, 6, 7};").unwrap();
    let v = rt.eval("size(A);").unwrap();
    assert_int(&v, 3);
}

#[test]
fn aliased_matrix_writes_do_not_leak() {
    let mut rt = Runtime::new();
    rt.eval("mat M[2] = {1, 2}; N = M; M[0] = 9;").unwrap();
    let m0 = rt.eval("M[0];").unwrap();
    let n0 = rt.eval("N[0];").unwrap();
    assert_int(&m0, 9);
    assert_int(&n0, 1);
}

#[test]
fn matrix_arithmetic_is_elementwise() {
    let v = eval("mat A[2] = {1, 2}; mat B[2] = {10, 20}; C = A + B; C[1];");
    assert_int(&v, 22);
}

// ─── Lists ───────────────────────────────────────────────────────────────────

#[test]
fn list_append_and_size() {
    let v = eval("L = list(); append(L, 1); append(L, 2); size(L);");
    assert_int(&v, 2);
}

#[test]
fn list_push_pop_insert_delete() {
    let mut rt = Runtime::new();
    rt.eval("L = list(10, 20, 30);").unwrap();
    assert_int(&rt.eval("pop(L);").unwrap(), 10);
    assert_int(&rt.eval("remove(L);").unwrap(), 30);
    rt.eval("push(L, 5); insert(L, 1, 7);").unwrap();
    assert_int(&rt.eval("L[0];").unwrap(), 5);
    assert_int(&rt.eval("L[1];").unwrap(), 7);
    assert_int(&rt.eval("delete(L, 1);").unwrap(), 7);
    assert_int(&rt.eval("size(L);").unwrap(), 2);
}

// ─── Associations ────────────────────────────────────────────────────────────

#[test]
fn assoc_read_before_write_is_null() {
    let v = eval("A = assoc(); isnull(A[1]);");
    assert_int(&v, 1);
}

#[test]
fn assoc_write_then_read() {
    let v = eval("A = assoc(); A[1] = 42; A[1];");
    assert_int(&v, 42);
}

#[test]
fn assoc_tuple_keys() {
    let mut rt = Runtime::new();
    rt.eval("A = assoc(); A[1, 2] = 12; A[\"k\"] = 9;").unwrap();
    assert_int(&rt.eval("A[1, 2];").unwrap(), 12);
    assert_int(&rt.eval("A[\"k\"];").unwrap(), 9);
    assert_int(&rt.eval("isnull(A[2, 1]);").unwrap(), 1);
    assert_int(&rt.eval("size(A);").unwrap(), 2);
}

// ─── Statements ──────────────────────────────────────────────────────────────

#[test]
fn if_else_branches() {
    assert_int(&eval("x = 0; if (1 < 2) x = 5; else x = 6; x;"), 5);
    assert_int(&eval("x = 0; if (1 > 2) x = 5; else x = 6; x;"), 6);
}

#[test]
fn while_loop_sums() {
    let v = eval("s = 0; i = 1; while (i <= 10) { s += i; i++; } s;");
    assert_int(&v, 55);
}

#[test]
fn for_loop_with_all_clauses() {
    let v = eval("s = 0; for (i = 0; i < 5; i++) s += i; s;");
    assert_int(&v, 10);
}

#[test]
fn for_loop_with_omitted_clauses() {
    let v = eval("s = 0; i = 0; for (;;) { if (i == 4) break; s += i; i++; } s;");
    assert_int(&v, 6);
}

#[test]
fn do_while_runs_at_least_once() {
    let v = eval("n = 0; do { n++; } while (0); n;");
    assert_int(&v, 1);
}

#[test]
fn continue_skips_iterations() {
    let v = eval("s = 0; for (i = 0; i < 6; i++) { if (i % 2) continue; s += i; } s;");
    assert_int(&v, 6);
}

#[test]
fn switch_selects_cases() {
    let src = "x = 2; r = 0; switch (x) { case 1: r = 10; break; case 2: r = 20; break; default: r = 99; } r;";
    assert_int(&eval(src), 20);
    let src = "x = 7; r = 0; switch (x) { case 1: r = 10; break; default: r = 99; } r;";
    assert_int(&eval(src), 99);
}

#[test]
fn switch_without_matching_case_falls_through() {
    let v = eval("r = 1; switch (5) { case 1: r = 2; } r;");
    assert_int(&v, 1);
}

#[test]
fn goto_and_labels() {
    let v = eval("define f() { local x; x = 0; goto done; x = 9; done: return x; } f();");
    assert_int(&v, 0);
}

#[test]
fn conditional_expression() {
    assert_int(&eval("1 ? 10 : 20;"), 10);
    assert_int(&eval("0 ? 10 : 20;"), 20);
}

#[test]
fn short_circuit_keeps_last_operand() {
    // the result of || and && is the last evaluated operand
    assert_int(&eval("2 || 5;"), 2);
    assert_int(&eval("0 || 5;"), 5);
    assert_int(&eval("2 && 3;"), 3);
    assert_int(&eval("0 && 3;"), 0);
}

#[test]
fn short_circuit_skips_side_effects() {
    let mut rt = Runtime::new();
    rt.eval("define boom() { return 1/0; } x = 1 || boom();")
        .unwrap();
    assert_int(&rt.global_value("x").unwrap(), 1);
}

#[test]
fn comma_operator_keeps_last_value() {
    let mut rt = Runtime::new();
    // a constant before the comma operator is deleted with a warning
    let v = rt.eval("x = (1, 2, 3);").unwrap();
    assert_int(&v, 3);
}

#[test]
fn quit_stops_processing() {
    let mut rt = Runtime::new();
    rt.eval("x = 1; quit; x = 2;").unwrap();
    assert_int(&rt.global_value("x").unwrap(), 1);
    assert!(rt.quit.is_some());
}

// ─── Builtins ────────────────────────────────────────────────────────────────

#[test]
fn predicate_builtins() {
    assert_int(&eval("isnum(3);"), 1);
    assert_int(&eval("isstr(\"x\");"), 1);
    assert_int(&eval("isnull(null());"), 1);
    assert_int(&eval("isnull(0);"), 0);
    assert_int(&eval("isnull(\"\");"), 0);
    assert_int(&eval("isint(3/2);"), 0);
    assert_int(&eval("isodd(7);"), 1);
    assert_int(&eval("iseven(7);"), 0);
    assert_int(&eval("issimple(3);"), 1);
    assert_int(&eval("istype(1, 2);"), 1);
    assert_int(&eval("istype(1, \"a\");"), 0);
}

#[test]
fn numeric_builtins() {
    assert_int(&eval("abs(-5);"), 5);
    assert_int(&eval("sgn(-3);"), -1);
    assert_int(&eval("int(7/2);"), 3);
    assert_int(&eval("num(3/4);"), 3);
    assert_int(&eval("den(3/4);"), 4);
    assert_int(&eval("fact(5);"), 120);
    assert_int(&eval("gcd(12, 18);"), 6);
    assert_int(&eval("isqrt(10);"), 3);
    assert_int(&eval("min(3, 1, 2);"), 1);
    assert_int(&eval("max(3, 1, 2);"), 3);
    assert_int(&eval("sum(1, 2, 3);"), 6);
    assert_int(&eval("highbit(8);"), 3);
    assert_int(&eval("lowbit(12);"), 2);
    assert_int(&eval("\\10;"), 1024);
}

#[test]
fn string_builtins() {
    let v = eval("strcat(\"ab\", \"cd\");");
    let Kind::Str(s) = &v.kind else { panic!() };
    assert_eq!(&**s, "abcd");
    assert_int(&eval("strlen(\"hello\");"), 5);
    let v = eval("substr(\"hello\", 2, 3);");
    let Kind::Str(s) = &v.kind else { panic!() };
    assert_eq!(&**s, "ell");
    assert_int(&eval("ord(\"A\");"), 65);
    let v = eval("char(66);");
    let Kind::Str(s) = &v.kind else { panic!() };
    assert_eq!(&**s, "B");
}

#[test]
fn string_comparison() {
    assert_int(&eval("\"abc\" == \"abc\";"), 1);
    assert_int(&eval("\"abc\" < \"abd\";"), 1);
    assert_int(&eval("cmp(\"b\", \"a\");"), 1);
}

#[test]
fn config_round_trip() {
    let mut rt = Runtime::new();
    let v = rt.eval("config(\"display\");").unwrap();
    assert_int(&v, 20);
    rt.eval("config(\"display\", 9);").unwrap();
    assert_int(&rt.eval("config(\"display\");").unwrap(), 9);
    // snapshot and restore
    rt.eval("saved = config(\"all\"); config(\"display\", 4);")
        .unwrap();
    assert_int(&rt.eval("config(\"display\");").unwrap(), 4);
    rt.eval("config(\"all\", saved);").unwrap();
    assert_int(&rt.eval("config(\"display\");").unwrap(), 9);
}

#[test]
fn epsilon_returns_the_previous_bound() {
    let mut rt = Runtime::new();
    rt.eval("old = epsilon(1/1000);").unwrap();
    let v = rt.eval("epsilon();").unwrap();
    let Kind::Num(q) = &v.kind else { panic!() };
    assert_eq!(q.to_string(), "1/1000");
}

#[test]
fn hash_builtins_are_deterministic() {
    let mut rt = Runtime::new();
    rt.eval("a = hash(1, \"x\"); b = hash(1, \"x\"); c = hash(2);")
        .unwrap();
    let a = rt.global_value("a").unwrap();
    let b = rt.global_value("b").unwrap();
    let c = rt.global_value("c").unwrap();
    assert!(values_equal(&a, &b));
    assert!(!values_equal(&a, &c));
    let v = rt
        .eval("s = hashinit(); s = hashval(s, 1); s = hashval(s, \"x\"); hashfinal(s) == a;")
        .unwrap();
    assert_int(&v, 1);
}

#[test]
fn protect_blocks_assignment() {
    let mut rt = Runtime::new();
    rt.eval("x = 5; protect(`x);").unwrap();
    assert!(rt.eval("x = 6;").is_err());
    assert_int(&rt.global_value("x").unwrap(), 5);
    rt.eval("protect(`x, 0); x = 7;").unwrap();
    assert_int(&rt.global_value("x").unwrap(), 7);
}

#[test]
fn blocks_hold_octets() {
    let mut rt = Runtime::new();
    rt.eval("B = blk(4); B[0] = 65; B[1] = 66;").unwrap();
    assert_int(&rt.eval("size(B);").unwrap(), 4);
    assert_int(&rt.eval("isblk(B);").unwrap(), 1);
    assert_int(&rt.eval("isoctet(B[0]);").unwrap(), 1);
    assert_int(&rt.eval("ord(B[1]);").unwrap(), 66);
}

#[test]
fn pointers_dereference() {
    let mut rt = Runtime::new();
    rt.eval("x = 5; p = &x;").unwrap();
    assert_int(&rt.eval("isptr(p);").unwrap(), 1);
    assert_int(&rt.eval("*p;").unwrap(), 5);
}

// ─── Error recovery ──────────────────────────────────────────────────────────

#[test]
fn continue_on_error_recovers_at_statement_boundaries() {
    let mut rt = Runtime::new();
    rt.continue_on_error = true;
    rt.eval("x = 1; y = 1/0; z = 3;").unwrap();
    assert_int(&rt.global_value("x").unwrap(), 1);
    assert_int(&rt.global_value("z").unwrap(), 3);
}

#[test]
fn parse_errors_report_positions() {
    let mut rt = Runtime::new();
    let err = rt.eval("1 + ;").expect_err("should fail");
    let text = format!("{}", err);
    assert!(text.contains("error"), "unexpected message: {}", text);
}
