//! End-to-end scenarios driving the full pipeline (lex/parse/analyze/run)
//! from literal source text, the way `blochc run` would.

use bloch_compiler::compile;
use bloch_runtime::run;

fn compile_and_run(source: &str) -> Result<bloch_runtime::ExecutionReport, String> {
    let compiled = compile(source).map_err(|e| e.to_string())?;
    run(&compiled).map_err(|e| e.to_string())
}

#[test]
fn bell_pair_tracking_balances_across_shots() {
    let source = r#"
        @shots(1024) function main() -> void {
            @tracked qubit a;
            @tracked qubit b;
            h(a);
            cx(a, b);
            measure a;
            measure b;
        }
    "#;
    let compiled = compile(source).expect("program should compile");
    let shots = compiled.program.shots.unwrap_or(1);
    assert_eq!(shots, 1024);

    let mut counts_a: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    let mut counts_b: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

    for _ in 0..shots {
        let report = run(&compiled).expect("shot should run without error");
        for (outcome, n) in &report.tracked_outcomes["qubit a"] {
            *counts_a.entry(outcome.clone()).or_insert(0) += n;
        }
        for (outcome, n) in &report.tracked_outcomes["qubit b"] {
            *counts_b.entry(outcome.clone()).or_insert(0) += n;
        }
    }

    for counts in [&counts_a, &counts_b] {
        let keys: std::collections::BTreeSet<&String> = counts.keys().collect();
        assert!(
            keys.iter().all(|k| k.as_str() == "0" || k.as_str() == "1"),
            "unexpected outcome keys: {:?}",
            keys
        );
        let zeros = *counts.get("0").unwrap_or(&0) as f64;
        let ones = *counts.get("1").unwrap_or(&0) as f64;
        let imbalance = (zeros - ones).abs() / shots as f64;
        assert!(imbalance <= 0.2, "imbalance {} exceeded tolerance", imbalance);
    }
}

#[test]
fn final_field_not_assigned_at_top_level_is_rejected() {
    let source = r#"
        class C {
            private final int x;
            constructor(int v) -> C {
                if (v > 0) {
                    this.x = v;
                } else {
                    this.x = 0;
                }
            }
        }
        function main() -> void {
            C c = new C(5);
        }
    "#;
    let err = compile(source).expect_err("conditional assignment must not satisfy final-field enforcement");
    assert!(
        err.to_string().contains("final field 'x' must be assigned as a top-level constructor statement"),
        "unexpected message: {}",
        err
    );
}

#[test]
fn final_field_assigned_at_top_level_compiles() {
    let source = r#"
        class C {
            private final int x;
            constructor(int v) -> C {
                this.x = v;
            }
        }
        function main() -> void {
            C c = new C(5);
        }
    "#;
    compile(source).expect("a direct top-level this.x assignment satisfies final-field enforcement");
}

#[test]
fn virtual_override_dispatches_to_most_derived() {
    let source = r#"
        class A {
            virtual function f() -> int { return 1; }
        }
        class B extends A {
            override function f() -> int { return 2; }
        }
        function main() -> void {
            A a = new B();
            echo(a.f());
        }
    "#;
    compile_and_run(source).expect("virtual dispatch through a base-typed reference should execute cleanly");
}

#[test]
fn null_equality_on_default_constructed_reference() {
    let source = r#"
        class C {
            constructor() -> C = default;
        }
        function main() -> void {
            C a = null;
            echo(a == null);
        }
    "#;
    compile_and_run(source).expect("comparing a null reference against null should execute cleanly");
}

#[test]
fn measure_after_measure_is_a_runtime_error() {
    let source = r#"
        function main() -> void {
            qubit q;
            h(q);
            measure q;
            x(q);
        }
    "#;
    let err = compile_and_run(source).expect_err("operating on an already-measured qubit must fail");
    assert!(
        err.contains("qubit q has already been measured"),
        "unexpected message: {}",
        err
    );
}

#[test]
fn array_size_constant_folding_sizes_the_default_array() {
    // N folds to 7, so a declaration with no initializer gets 7 default
    // elements; index 6 is the last valid slot.
    let source = r#"
        function main() -> void {
            final int N = 3 + 2 * 2;
            int[N] arr;
            echo(arr[6]);
        }
    "#;
    compile_and_run(source).expect("index 6 is within a length-7 array folded from N");
}

#[test]
fn array_size_constant_folding_still_bounds_checks_past_the_end() {
    let source = r#"
        function main() -> void {
            final int N = 3 + 2 * 2;
            int[N] arr;
            echo(arr[7]);
        }
    "#;
    let err = compile_and_run(source).expect_err("index 7 is one past the end of a length-7 array");
    assert!(
        err.contains("index 7 out of bounds for length 7"),
        "unexpected message: {}",
        err
    );
}
