//! End-to-end tests: compile Scheme source and execute it on the machine.

use slippy_vm::{EvalError, Machine, MachineConfig, Value, VmError};

/// Helper: compile and run `source` on a fresh machine, returning `val`.
fn run(source: &str) -> Value {
    Machine::default().eval(source).expect("source should run")
}

fn run_err(source: &str) -> VmError {
    match Machine::default().eval(source) {
        Err(EvalError::Vm(err)) => err,
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

// ─── Core programs ───

#[test]
fn e2e_square() {
    assert_eq!(run("(begin (define sq (lambda (x) (* x x))) (sq 4))"), Value::Int(16));
}

#[test]
fn e2e_factorial() {
    let result = run(
        r#"
(define factorial
  (lambda (n)
    (if (<= n 1)
        1
        (* (factorial (- n 1)) n))))
(factorial 5)
"#,
    );
    assert_eq!(result, Value::Int(120));
}

#[test]
fn e2e_fib() {
    let result = run(
        "(begin (define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))) (fib 10))",
    );
    assert_eq!(result, Value::Int(55));
}

#[test]
fn e2e_tail_loop_runs_in_bounded_stack() {
    let mut machine = Machine::default();
    machine
        .eval("(define loop (lambda (n) (if (<= n 0) 0 (loop (- n 1)))))")
        .unwrap();
    assert_eq!(machine.eval("(loop 100000)").unwrap(), Value::Int(0));
    let stats = machine.stats();
    assert!(stats.max_stack_depth < 10, "save stack grew to {}", stats.max_stack_depth);
    assert!(stats.bounces > 100_000);
    assert_eq!(machine.stack_depth(), 0);
}

#[test]
fn e2e_non_tail_recursion_uses_the_save_stack() {
    let mut machine = Machine::default();
    machine.eval("(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1)))))").unwrap();
    assert_eq!(machine.eval("(count 500)").unwrap(), Value::Int(500));
    assert!(machine.stats().max_stack_depth >= 500);
}

#[test]
fn e2e_long_list_is_built_compared_and_freed() {
    let mut machine = Machine::default();
    machine
        .eval("(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))")
        .unwrap();
    machine.eval("(define xs (build 300000 '()))").unwrap();
    machine.eval("(define ys (build 300000 '()))").unwrap();
    assert_eq!(machine.eval("(car xs)").unwrap(), Value::Int(1));
    let xs = machine.global().lookup("xs").unwrap();
    let ys = machine.global().lookup("ys").unwrap();
    assert!(xs == ys);
    drop((xs, ys));

    // Rebinding drops the only references to both lists.
    machine.eval("(set! xs 0) (set! ys 0)").unwrap();
    assert_eq!(machine.eval("xs").unwrap(), Value::Int(0));
    drop(machine);
}

// ─── Special forms ───

#[test]
fn e2e_if_only_false_is_false() {
    assert_eq!(run("(if 0 'yes 'no)"), Value::symbol("yes"));
    assert_eq!(run("(if '() 'yes 'no)"), Value::symbol("yes"));
    assert_eq!(run("(if #f 'yes 'no)"), Value::symbol("no"));
}

#[test]
fn e2e_set_updates_captured_binding() {
    let result = run(
        r#"
(define (make-counter)
  (let ((n 0))
    (lambda () (set! n (+ n 1)) n)))
(define c (make-counter))
(c)
(c)
(c)
"#,
    );
    assert_eq!(result, Value::Int(3));
}

#[test]
fn e2e_define_returns_ok() {
    assert_eq!(run("(define x 1)"), Value::symbol("ok"));
}

#[test]
fn e2e_let_and_nested_closures() {
    assert_eq!(run("(let ((x 2) (y 3)) (let ((f (lambda (z) (* x y z)))) (f 4)))"), Value::Int(24));
}

#[test]
fn e2e_operator_expression() {
    assert_eq!(run("((lambda (x y) (- x y)) 10 4)"), Value::Int(6));
    assert_eq!(run("((if #t + *) 3 4)"), Value::Int(7));
}

#[test]
fn e2e_mutual_recursion() {
    let result = run(
        r#"
(define (even? n) (if (= n 0) #t (odd? (- n 1))))
(define (odd? n) (if (= n 0) #f (even? (- n 1))))
(even? 10001)
"#,
    );
    assert_eq!(result, Value::Bool(false));
}

#[test]
fn e2e_quoted_data() {
    assert_eq!(run("(car (cdr '(1 2 3)))"), Value::Int(2));
    assert_eq!(run("(cons 1 2)").to_string(), "(1 . 2)");
    assert_eq!(run("'(a (b #t) \"s\")").to_string(), "(a (b #t) \"s\")");
    assert_eq!(run("(null? (cdr (list 1)))"), Value::Bool(true));
    assert_eq!(run("#(1 2)").to_string(), "#(1 2)");
}

#[test]
fn e2e_arithmetic() {
    assert_eq!(run("(+ 1 2 3 4)"), Value::Int(10));
    assert_eq!(run("(- 7)"), Value::Int(-7));
    assert_eq!(run("(/ 1 4)"), Value::Real(0.25));
    assert_eq!(run("(* 1.5 2)"), Value::Real(3.0));
    assert_eq!(run("(< 1 2 3)"), Value::Bool(true));
}

// ─── Errors ───

#[test]
fn e2e_unbound_variable() {
    assert_eq!(run_err("undefined-thing"), VmError::UnboundVariable("undefined-thing".into()));
}

#[test]
fn e2e_set_of_unbound_variable() {
    assert_eq!(run_err("(set! nope 1)"), VmError::UnboundVariable("nope".into()));
}

#[test]
fn e2e_arity_mismatch() {
    let err = run_err("((lambda (x y) x) 1)");
    assert!(matches!(err, VmError::ArityMismatch { got: 1, .. }), "{}", err);
}

#[test]
fn e2e_type_error_from_primitive() {
    let err = run_err("(+ 1 'a)");
    assert!(matches!(err, VmError::TypeError { .. }), "{}", err);
}

#[test]
fn e2e_division_by_zero() {
    assert_eq!(run_err("(/ 5 0)"), VmError::DivisionByZero);
}

#[test]
fn e2e_machine_recovers_after_error() {
    let mut machine = Machine::new(MachineConfig::default());
    machine.eval("(define (f x) (+ x (g x)))").unwrap();
    assert!(machine.eval("(f 1)").is_err());
    machine.eval("(define (g x) (* x 10))").unwrap();
    assert_eq!(machine.eval("(f 1)").unwrap(), Value::Int(11));
}

#[test]
fn e2e_syntax_errors_surface_as_generate_errors() {
    let err = Machine::default().eval("(define x").unwrap_err();
    assert!(matches!(err, EvalError::Generate(_)));
}
