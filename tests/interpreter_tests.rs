//! End-to-end tests through the public API.

#![expect(clippy::unwrap_used)] // test code OK

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cpscheme::ast::{nil, sym, val};
use cpscheme::evaluator::{Environment, Outcome};
use cpscheme::scheme::parse_scheme;
use cpscheme::{Error, Interpreter, SliceConfig, SliceStatus, StepOutcome, Symbol, Value};

/// Expected outcome of one source snippet
enum Expect {
    Is(Value),
    Fails(fn(&Error) -> bool),
}
use Expect::*;

fn is<T: Into<Value>>(value: T) -> Expect {
    Is(val(value))
}

fn run_program(cases: &[(&str, Expect)]) {
    let mut interp = Interpreter::new();
    for (i, (source, expected)) in cases.iter().enumerate() {
        let result = interp.eval_str(source);
        match (result, expected) {
            (Ok(actual), Is(expected)) => assert!(
                actual.is_equal(expected),
                "#{}: '{source}' expected {expected:?}, got {actual:?}",
                i + 1
            ),
            (Err(e), Fails(check)) => {
                assert!(check(&e), "#{}: '{source}' failed with unexpected error {e:?}", i + 1);
            }
            (Ok(actual), Fails(_)) => {
                panic!("#{}: '{source}' expected an error, got {actual:?}", i + 1)
            }
            (Err(e), Is(expected)) => {
                panic!("#{}: '{source}' expected {expected:?}, got error {e}", i + 1)
            }
        }
    }
}

fn letrec_order(e: &Error) -> bool {
    matches!(e, Error::LetrecOrderError(name) if name == "x")
}

fn arity(e: &Error) -> bool {
    matches!(e, Error::ArityError { .. })
}

fn type_error(e: &Error) -> bool {
    matches!(e, Error::TypeError(_))
}

fn syntax_error(e: &Error) -> bool {
    matches!(e, Error::SyntaxError(_))
}

#[test]
fn test_documented_properties() {
    run_program(&[
        (
            "(letrec ((loop (lambda (n) (if (= n 0) 'done (loop (- n 1)))))) (loop 1000000))",
            Is(sym("done")),
        ),
        ("(letrec ((x (+ x 5))) x)", Fails(letrec_order)),
        ("(call/cc (lambda (k) 5))", is(5)),
        ("(call/cc (lambda (k) (begin (k 5) 7)))", is(5)),
        ("(call-with-values (lambda () (values 3 4)) +)", is(7)),
        ("(if (values 1 2) 'yes 'no)", Fails(type_error)),
        ("((lambda (a b) a) 1)", Fails(arity)),
        ("(car '(1) '(2))", Fails(arity)),
        ("(let ((x 2) (y 3)) (+ x y))", is(5)),
        ("(let ((x 5) (y 3)) (let ((x 2)) (+ x y)))", is(5)),
    ]);
}

#[test]
fn test_closures_observe_outer_mutation() {
    run_program(&[
        ("(define counter 0)", Is(Value::Nothing)),
        (
            "(define make-counter (lambda () (lambda () (begin (set! counter (+ counter 1)) counter))))",
            Is(Value::Nothing),
        ),
        ("(define tick (make-counter))", Is(Value::Nothing)),
        ("(begin (tick) (tick) (tick))", is(3)),
        ("counter", is(3)),
        (
            "(define make-acc (lambda (total) (lambda (n) (begin (set! total (+ total n)) total))))",
            Is(Value::Nothing),
        ),
        ("(define acc (make-acc 100))", Is(Value::Nothing)),
        ("(acc 10)", is(110)),
        ("(acc 10)", is(120)),
        ("total", Fails(|e| matches!(e, Error::UnboundVariable(_)))),
    ]);
}

#[test]
fn test_set_installs_unbound_names_globally() {
    run_program(&[
        ("(let ((a 1)) (begin (set! fresh (+ a 1)) fresh))", is(2)),
        ("fresh", is(2)),
        ("((lambda (x) (define inner x)) 9)", Is(Value::Nothing)),
        ("inner", is(9)),
    ]);
}

#[test]
fn test_keywords_and_shadowing() {
    run_program(&[
        ("if", Fails(syntax_error)),
        ("(let ((if (lambda (a b c) c))) (if #t 1 2))", is(2)),
        ("(let ((car cdr)) (car '(1 2)))", is([2])),
        ("#(1 2)", Fails(syntax_error)),
        ("'#(1 2)", Is(Value::vector(vec![val(1), val(2)]))),
        ("(1 . 2)", Fails(syntax_error)),
        ("(lambda (x))", Fails(syntax_error)),
        ("(lambda (x) x x)", Fails(syntax_error)),
        ("(quote)", Fails(syntax_error)),
        ("(5 1)", Fails(type_error)),
        ("undefined-name", Fails(|e| matches!(e, Error::UnboundVariable(n) if n == "undefined-name"))),
    ]);
}

#[test]
fn test_continuations_are_first_class() {
    run_program(&[
        ("(define k-saved #f)", Is(Value::Nothing)),
        (
            "(define r (+ 100 (call/cc (lambda (k) (begin (set! k-saved k) 1)))))",
            Is(Value::Nothing),
        ),
        ("r", is(101)),
        ("(k-saved 5)", Is(Value::Nothing)),
        ("r", is(105)),
        ("(k-saved 7 8 9)", Is(Value::Nothing)),
        ("r", is(107)),
        ("(letcc out (+ 1 (out 41)))", is(41)),
        ("(+ 1 (letcc k 1))", is(2)),
        ("(call-with-current-continuation (lambda (k) (k 'escaped)))", Is(sym("escaped"))),
        ("(procedure? k-saved)", is(true)),
        ("(call/cc car)", Fails(type_error)),
    ]);
}

#[test]
fn test_continuation_keeps_only_first_argument() {
    run_program(&[
        ("(call/cc (lambda (k) (k 1 2 3)))", is(1)),
        ("(+ 10 (call/cc (lambda (k) (k 5 'ignored))))", is(15)),
    ]);
}

#[test]
fn test_multiple_values() {
    run_program(&[
        ("(call-with-values (lambda () (values 1 2 3)) list)", is([1, 2, 3])),
        ("(call-with-values (lambda () (values)) list)", Is(nil())),
        ("(call-with-values (lambda () 5) list)", is([5])),
        ("(values 7)", is(7)),
        ("(+ 1 (values 2 3))", Fails(type_error)),
        ("(let ((x (values 1 2))) x)", Fails(type_error)),
        ("(define mv (values 1 2))", Fails(type_error)),
    ]);
}

#[test]
fn test_variadic_lambdas() {
    run_program(&[
        ("((lambda args args) 1 2 3)", is([1, 2, 3])),
        ("((lambda args args))", Is(nil())),
        ("((lambda (a . rest) (cons a rest)) 1 2 3)", is([1, 2, 3])),
        ("((lambda (a b . rest) rest) 1 2)", Is(nil())),
        ("((lambda (a b . rest) rest) 1)", Fails(arity)),
        ("(apply + 1 2 '(3 4))", is(10)),
        ("(apply (lambda args (length args)) '(a b c))", is(3)),
        ("(eval '(* 6 7))", is(42)),
    ]);
}

#[test]
fn test_deep_non_tail_recursion() {
    run_program(&[
        (
            "(define build (lambda (n) (if (= n 0) '() (cons n (build (- n 1))))))",
            Is(Value::Nothing),
        ),
        ("(length (build 100000))", is(100_000)),
        ("(car (build 100000))", is(100_000)),
    ]);
}

#[test]
fn test_deeply_nested_data() {
    run_program(&[
        // The nested result is built, discarded and freed
        (
            "(letrec ((build (lambda (n acc) (if (= n 0) 0 (build (- n 1) (list acc)))))) (build 1000000 '()))",
            is(0),
        ),
        (
            "(define nest (lambda (n acc) (if (= n 0) acc (nest (- n 1) (vector (list acc))))))",
            Is(Value::Nothing),
        ),
        ("(equal? (nest 300000 '()) (nest 300000 '()))", is(true)),
        ("(equal? (nest 300000 '()) (nest 299999 '()))", is(false)),
    ]);

    let mut interp = Interpreter::new();
    let deep = interp
        .eval_str("(letrec ((build (lambda (n acc) (if (= n 0) acc (build (- n 1) (cons acc '())))))) (build 500000 1))")
        .unwrap();
    let expected = format!("{}1{}", "(".repeat(500_000), ")".repeat(500_000));
    assert_eq!(deep.to_string(), expected);
}

#[test]
fn test_circular_lists() {
    run_program(&[
        ("(define loop (list 1 2 3))", Is(Value::Nothing)),
        ("(set-cdr! (cdr (cdr loop)) loop)", Is(Value::Nothing)),
        ("(car (cdr (cdr (cdr loop))))", is(1)),
        ("(length loop)", Fails(type_error)),
        ("(apply + loop)", Fails(type_error)),
        ("(eval (cons '+ loop))", Fails(type_error)),
        ("(equal? loop loop)", is(true)),
        ("(define other (list 1 2 3))", Is(Value::Nothing)),
        ("(set-cdr! (cdr (cdr other)) other)", Is(Value::Nothing)),
        ("(equal? loop other)", is(true)),
        ("(equal? loop (list 1 2 3))", is(false)),
        ("(eval (list 'lambda loop 1))", Fails(syntax_error)),
    ]);
}

#[test]
fn test_load_evaluates_file_in_order() {
    let path = std::env::temp_dir().join(format!("cpscheme-load-{}.scm", std::process::id()));
    std::fs::write(
        &path,
        "; fixture\n\
         (define square (lambda (x) (* x x)))\n\
         #| helper below |#\n\
         (define sum-squares (lambda (a b) (+ (square a) (square b))))\n\
         (sum-squares 3 4)\n",
    )
    .unwrap();

    let mut interp = Interpreter::new();
    let result = interp.load(&path);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(result.unwrap(), val(25));
    assert_eq!(interp.eval_str("(square 9)").unwrap(), val(81));

    match interp.load(&path) {
        Err(Error::IoError(message)) => assert!(message.contains("cpscheme-load")),
        other => panic!("expected IoError, got {other:?}"),
    }
}

#[test]
fn test_load_in_targets_given_environment() {
    let path = std::env::temp_dir().join(format!("cpscheme-load-in-{}.scm", std::process::id()));
    std::fs::write(&path, "(set! local-name 'outer)\n(+ base 1)").unwrap();

    let mut interp = Interpreter::new();
    let scope = interp
        .global()
        .extend_with([(Symbol::new("base"), val(41)), (Symbol::new("local-name"), val(0))]);
    let result = interp.load_in(&path, &scope);
    std::fs::remove_file(&path).unwrap();

    assert_eq!(result.unwrap(), val(42));
    assert_eq!(scope.lookup_local(&Symbol::new("local-name")), Some(sym("outer")));
    assert!(interp.eval_str("base").is_err());
}

#[test]
fn test_malformed_source_evaluates_nothing() {
    let mut interp = Interpreter::new();
    let result = interp.eval_str("(define before 1) (define after");
    assert!(matches!(result, Err(Error::ParseError(_))));
    assert!(matches!(interp.eval_str("before"), Err(Error::UnboundVariable(_))));
}

#[test]
fn test_register_contract() {
    let mut interp = Interpreter::new();
    interp.register("sum-args", 1, Some(3), |_, args| {
        let mut total = 0.0;
        for arg in &args {
            total += f64::try_from(arg)?;
        }
        Ok(Outcome::Return(val(total)))
    })
    .unwrap();
    // A native that tail-calls its first argument on the rest
    interp.register("call-with-rest", 1, None, |interp, mut args| {
        let operator = args.remove(0);
        let regs = interp.registers_mut();
        regs.operator = operator;
        regs.args = args;
        regs.pc = cpscheme::evaluator::Pc::ApplyProc;
        Ok(Outcome::Reenter)
    })
    .unwrap();

    run_program_with(
        &mut interp,
        &[
            ("(sum-args 1 2 3)", is(6)),
            ("(sum-args)", Fails(arity)),
            ("(sum-args 1 2 3 4)", Fails(arity)),
            ("(sum-args 'a)", Fails(type_error)),
            ("(call-with-rest list 1 2)", is([1, 2])),
            ("(+ 1 (call/cc (lambda (k) (call-with-rest k 10 20))))", is(11)),
        ],
    );
}

fn run_program_with(interp: &mut Interpreter, cases: &[(&str, Expect)]) {
    for (i, (source, expected)) in cases.iter().enumerate() {
        match (interp.eval_str(source), expected) {
            (Ok(actual), Is(expected)) => {
                assert!(actual.is_equal(expected), "#{}: '{source}' got {actual:?}", i + 1);
            }
            (Err(e), Fails(check)) => assert!(check(&e), "#{}: '{source}' got {e:?}", i + 1),
            (other, _) => panic!("#{}: '{source}' unexpected {other:?}", i + 1),
        }
    }
}

#[test]
fn test_host_calls_into_scheme() {
    let mut interp = Interpreter::new();
    interp.eval_str("(define add3 (lambda (a b c) (+ a b c)))").unwrap();
    let add3 = interp.eval_str("add3").unwrap();
    assert_eq!(interp.call(&add3, vec![val(1), val(2), val(3)]).unwrap(), val(6));
    assert!(matches!(interp.call(&add3, vec![val(1)]), Err(Error::ArityError { .. })));

    let plus = interp.native("+").cloned().unwrap();
    assert_eq!(interp.call(&plus, vec![val(2), val(5)]).unwrap(), val(7));

    assert!(matches!(interp.call(&val(3), vec![]), Err(Error::TypeError(_))));
}

#[test]
fn test_single_stepping() {
    let mut interp = Interpreter::new();
    interp.start(parse_scheme("(let ((x 20)) (+ x 22))").unwrap());
    let mut steps = 0;
    let value = loop {
        steps += 1;
        match interp.step() {
            StepOutcome::Continue => {}
            StepOutcome::Done(value) => break value,
            StepOutcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
    };
    assert_eq!(value, val(42));
    assert!(steps > 5);
}

#[test]
fn test_sliced_evaluation_reports_once() {
    let mut interp = Interpreter::new();
    let results: Rc<RefCell<Vec<Result<Value, Error>>>> = Rc::default();
    let sink = Rc::clone(&results);
    let config = SliceConfig {
        work_budget: Duration::ZERO,
        rest_interval: Duration::ZERO,
        steps_per_check: 64,
    };
    let program = parse_scheme(
        "(letrec ((loop (lambda (n acc) (if (= n 0) acc (loop (- n 1) (+ acc 2)))))) (loop 2000 0))",
    )
    .unwrap();
    let mut eval = interp.eval_sliced(program, config, move |result| sink.borrow_mut().push(result));

    let mut slices = 0;
    while let SliceStatus::Yielded { .. } = eval.run_slice(&mut interp) {
        slices += 1;
    }
    assert!(slices > 1);
    assert_eq!(eval.run_slice(&mut interp), SliceStatus::Finished);

    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap(), &val(4000));
}

#[test]
fn test_environment_chain_api() {
    let global = Environment::global();
    global.assign_local(Symbol::new("x"), val(1));
    let inner = global.extend().extend();
    assert_eq!(inner.lookup_chain(&Symbol::new("x")).unwrap(), Some(val(1)));
    assert_eq!(inner.lookup_chain(&Symbol::new("y")).unwrap(), None);

    inner.assign_chain(Symbol::new("y"), val(2));
    assert_eq!(global.lookup_local(&Symbol::new("y")), Some(val(2)));
    assert!(inner.parent().unwrap().lookup_local(&Symbol::new("y")).is_none());
}
