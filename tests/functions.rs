/// User-defined functions: definition, calling convention, parameter
/// defaults, reference arguments, recursion, statics, scopes, and the
/// function store.

use abacus::core::value::{values_equal, Kind, Value};
use abacus::Runtime;

fn assert_int(v: &Value, n: i64) {
    assert!(
        values_equal(v, &Value::int(n)),
        "expected {}, got {:?}",
        n,
        v
    );
}

#[test]
fn simple_body_and_brace_body() {
    let mut rt = Runtime::new();
    rt.eval("define f(x) = x*x;").unwrap();
    assert_int(&rt.eval("f(7);").unwrap(), 49);
    rt.eval("define g(x) { return x + 1; }").unwrap();
    assert_int(&rt.eval("g(7);").unwrap(), 8);
}

#[test]
fn parameter_counts_are_recorded() {
    let mut rt = Runtime::new();
    rt.eval("define foo(a, b, c) = a;").unwrap();
    let f = rt.functions.get_by_name("foo").unwrap();
    assert_eq!(f.param_count, 3);
}

#[test]
fn missing_arguments_arrive_undefined() {
    let mut rt = Runtime::new();
    rt.eval("define f(a, b) = isnull(b);").unwrap();
    assert_int(&rt.eval("f(1);").unwrap(), 1);
    assert_int(&rt.eval("f(1, 2);").unwrap(), 0);
}

#[test]
fn omitted_middle_arguments() {
    let mut rt = Runtime::new();
    rt.eval("define f(a, b, c) = isnull(b);").unwrap();
    assert_int(&rt.eval("f(1, , 3);").unwrap(), 1);
}

#[test]
fn parameter_defaults_fire_only_when_undefined() {
    let mut rt = Runtime::new();
    rt.eval("define f(x = 7) = x;").unwrap();
    assert_int(&rt.eval("f();").unwrap(), 7);
    assert_int(&rt.eval("f(3);").unwrap(), 3);
    assert_int(&rt.eval("f(0);").unwrap(), 0);
}

#[test]
fn extra_arguments_reach_param() {
    let mut rt = Runtime::new();
    rt.eval("define f(a) { return param(0); }").unwrap();
    assert_int(&rt.eval("f(1, 2, 3);").unwrap(), 3);
    rt.eval("define g(a) { return param(2); }").unwrap();
    assert_int(&rt.eval("g(10, 20);").unwrap(), 20);
}

#[test]
fn reference_arguments_mutate_the_caller() {
    let mut rt = Runtime::new();
    rt.eval("define bump(a) { a = a + 1; return 0; }").unwrap();
    rt.eval("x = 5; bump(`x);").unwrap();
    assert_int(&rt.global_value("x").unwrap(), 6);
    // without the backquote the argument passes by value
    rt.eval("y = 5; bump(y);").unwrap();
    assert_int(&rt.global_value("y").unwrap(), 5);
}

#[test]
fn recursion() {
    let mut rt = Runtime::new();
    rt.eval("define fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }")
        .unwrap();
    assert_int(&rt.eval("fib(15);").unwrap(), 610);
}

#[test]
fn locals_shadow_globals() {
    let mut rt = Runtime::new();
    rt.eval("x = 1; define f() { local x; x = 5; return x; }")
        .unwrap();
    assert_int(&rt.eval("f();").unwrap(), 5);
    assert_int(&rt.global_value("x").unwrap(), 1);
}

#[test]
fn function_statics_persist_between_calls() {
    let mut rt = Runtime::new();
    rt.eval("define counter() { static n = 0; n = n + 1; return n; }")
        .unwrap();
    assert_int(&rt.eval("counter();").unwrap(), 1);
    assert_int(&rt.eval("counter();").unwrap(), 2);
    assert_int(&rt.eval("counter();").unwrap(), 3);
}

#[test]
fn chained_declarations_share_the_assignment() {
    let mut rt = Runtime::new();
    rt.eval("global a, c d = 2, b;").unwrap();
    assert!(rt.global_value("a").unwrap().is_null());
    assert_int(&rt.global_value("c").unwrap(), 2);
    assert_int(&rt.global_value("d").unwrap(), 2);
    assert!(rt.global_value("b").unwrap().is_null());
}

#[test]
fn redefinition_replaces_the_old_body() {
    let mut rt = Runtime::new();
    rt.eval("define f() = 1;").unwrap();
    assert_int(&rt.eval("f();").unwrap(), 1);
    rt.eval("define f() = 2;").unwrap();
    assert_int(&rt.eval("f();").unwrap(), 2);
}

#[test]
fn undefine_removes_functions() {
    let mut rt = Runtime::new();
    rt.eval("define f() = 1;").unwrap();
    assert_int(&rt.eval("isdefined(\"f\");").unwrap(), 1);
    rt.eval("undefine f;").unwrap();
    assert_int(&rt.eval("isdefined(\"f\");").unwrap(), 0);
    assert!(rt.eval("f();").is_err());
}

#[test]
fn builtin_names_cannot_be_redefined() {
    let mut rt = Runtime::new();
    assert!(rt.eval("define abs(x) = x;").is_err());
}

#[test]
fn builtin_arity_is_checked_at_compile_time() {
    let mut rt = Runtime::new();
    assert!(rt.eval("cmp(1);").is_err());
    assert!(rt.eval("cmp(1, 2, 3);").is_err());
}

#[test]
fn call_before_definition_resolves_at_run_time() {
    let mut rt = Runtime::new();
    rt.eval("define f() { return g(); } define g() = 9;").unwrap();
    assert_int(&rt.eval("f();").unwrap(), 9);
}

#[test]
fn undefined_label_is_a_compile_error() {
    let mut rt = Runtime::new();
    let err = rt
        .eval("define f() { goto nowhere; return 1; }")
        .expect_err("undefined label must fail");
    assert!(format!("{}", err).contains("never defined"));
}

#[test]
fn factorial_postfix_operator() {
    let mut rt = Runtime::new();
    assert_int(&rt.eval("5! + 1;").unwrap(), 121);
}

#[test]
fn deep_recursion_fails_cleanly() {
    let mut rt = Runtime::new();
    rt.eval("define down(n) { return down(n - 1); }").unwrap();
    assert!(rt.eval("down(1);").is_err());
}

#[test]
fn return_without_value_is_null() {
    let mut rt = Runtime::new();
    rt.eval("define f() { return; }").unwrap();
    let v = rt.eval("isnull(f());").unwrap();
    assert_int(&v, 1);
}

#[test]
fn functions_survive_in_the_store() {
    let mut rt = Runtime::new();
    rt.eval("define f(a, b) = a + b;").unwrap();
    let f = rt.functions.get_by_name("f").unwrap();
    assert_eq!(&*f.name, "f");
    assert_eq!(f.param_count, 2);
    assert!(matches!(
        f.param_names.name(0),
        Some("a")
    ));
    assert!(!f.opcodes.is_empty());
}

#[test]
fn write_globals_round_trip() {
    let mut rt = Runtime::new();
    rt.eval("a = 42; b = 3/4; s = \"hi\";").unwrap();
    let dir = std::env::temp_dir().join(format!("abacus-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("globals.cal");
    rt.eval(&format!("writeglobals(\"{}\");", path.display()))
        .unwrap();

    let mut fresh = Runtime::new();
    fresh.execute_file(&path.display().to_string()).unwrap();
    assert_int(&fresh.global_value("a").unwrap(), 42);
    let b = fresh.global_value("b").unwrap();
    let Kind::Num(q) = &b.kind else { panic!() };
    assert_eq!(q.to_string(), "3/4");
    let s = fresh.global_value("s").unwrap();
    let Kind::Str(text) = &s.kind else { panic!() };
    assert_eq!(&**text, "hi");
    let _ = std::fs::remove_dir_all(&dir);
}
