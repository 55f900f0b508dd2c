//! Finer-grained behaviors not fully exercised by the end-to-end
//! scenarios: destructor ordering, tracked instance fields, qubit handle
//! reuse, and generic class instantiation.

use bloch_compiler::compile;
use bloch_runtime::run;

fn compile_and_run(source: &str) -> Result<bloch_runtime::ExecutionReport, String> {
    let compiled = compile(source).map_err(|e| e.to_string())?;
    run(&compiled).map_err(|e| e.to_string())
}

#[test]
fn destructor_chain_records_tracked_fields_at_every_level() {
    let source = r#"
        class Base {
            private @tracked bit flag;
            constructor() -> Base {
                this.flag = 0b1;
            }
        }
        class Derived extends Base {
            private @tracked bit other;
            constructor() -> Derived {
                this.other = 0b0;
            }
        }
        function main() -> void {
            Derived d = new Derived();
            destroy d;
        }
    "#;
    let report = compile_and_run(source).expect("destructor chain should run cleanly");
    assert_eq!(report.tracked_outcomes["Base.flag"]["1"], 1);
    assert_eq!(report.tracked_outcomes["Derived.other"]["0"], 1);
}

#[test]
fn destructor_runs_exactly_once_even_if_destroyed_twice() {
    let source = r#"
        class C {
            private @tracked bit flag;
            constructor() -> C {
                this.flag = 0b1;
            }
        }
        function main() -> void {
            C c = new C();
            destroy c;
            destroy c;
        }
    "#;
    let report = compile_and_run(source).expect("a repeated destroy must be a no-op, not an error");
    assert_eq!(report.tracked_outcomes["C.flag"]["1"], 1);
}

#[test]
fn released_qubit_slot_is_reused_by_the_next_allocation() {
    let source = r#"
        function main() -> void {
            qubit a;
            x(a);
            destroy a;
            qubit b;
            x(b);
        }
    "#;
    let report = compile_and_run(source).expect("program should run to completion");
    let x_lines: Vec<&str> = report.qasm.lines().filter(|l| l.starts_with("x ")).collect();
    assert_eq!(x_lines.len(), 2);
    assert_eq!(x_lines[0], x_lines[1], "the second qubit should reuse the first one's simulator slot");
}

#[test]
fn generic_class_instantiates_independently_per_type_argument() {
    let source = r#"
        class Box<T> {
            private T value;
            constructor(T v) -> Box<T> {
                this.value = v;
            }
            function get() -> T {
                return this.value;
            }
        }
        function main() -> void {
            Box<int> a = new Box<int>(1);
            Box<string> b = new Box<string>("x");
            echo(a.get());
            echo(b.get());
        }
    "#;
    compile_and_run(source).expect("two distinct instantiations of the same generic class should both work");
}

#[test]
fn explicit_super_call_forwards_arguments_to_the_base_constructor() {
    let source = r#"
        class Base {
            private @tracked int x;
            constructor(int v) -> Base {
                this.x = v;
            }
        }
        class Derived extends Base {
            private @tracked int y;
            constructor(int v) -> Derived {
                super(v * 2);
                this.y = v;
            }
        }
        function main() -> void {
            Derived d = new Derived(5);
            destroy d;
        }
    "#;
    let report = compile_and_run(source).expect("explicit super(args) should run cleanly");
    assert_eq!(report.tracked_outcomes["Base.x"]["10"], 1);
    assert_eq!(report.tracked_outcomes["Derived.y"]["5"], 1);
}

#[test]
fn generic_method_body_resolves_its_own_type_parameter() {
    let source = r#"
        class Box<T> {
            private T value;
            constructor(T v) -> Box<T> {
                this.value = v;
            }
            function get() -> T {
                return this.value;
            }
            function wrapped() -> Box<T> {
                Box<T> copy = new Box<T>(this.value);
                return copy;
            }
        }
        function main() -> void {
            Box<int> a = new Box<int>(7);
            Box<int> b = a.wrapped();
            echo(b.get());
        }
    "#;
    let report = compile_and_run(source).expect("a generic method body referencing its own type parameter should run cleanly");
    assert_eq!(report.echo_lines, vec!["7"]);
}

#[test]
fn overload_resolution_picks_the_matching_parameter_type() {
    let source = r#"
        function describe(int x) -> string {
            return "int";
        }
        function describe(string x) -> string {
            return "string";
        }
        function main() -> void {
            echo(describe(1));
            echo(describe("hi"));
        }
    "#;
    compile_and_run(source).expect("overload resolution should pick a matching signature for each call site");
}
