//! End-to-end coverage of the full pipeline (parse -> compile -> run)
//! against a live store and event loop, driving the same source text the
//! language's documented scenarios use and checking the same printed
//! output they call for.

use reagent_rt::EventLoop;
use reagent_store::Store;
use reagent_value::{Arity, NativeFunction, Value};
use reagent_vm::Globals;
use std::cell::RefCell;
use std::rc::Rc;

fn run(text: &str, globals: &mut Globals) -> Result<Value, String> {
    let source = arcstr::ArcStr::from("<test>");
    let node = reagent_syntax::parse_program(source.clone(), text)
        .map_err(|e| e.into_payload(source.clone()).to_string())?;
    let info = reagent_compiler::compile_program(source, &node).map_err(|e| e.to_string())?;
    reagent_vm::run_closure(&info, &[], &[], globals).map_err(|e| e.to_string())
}

/// Wires a store, an event loop and the scheduling globals (`every`,
/// `after`, ...) in, then overrides `print` to append to an in-memory
/// buffer instead of writing real stdout, so a test can assert on
/// exactly the text the running program printed.
fn new_globals(event_loop: &Rc<RefCell<EventLoop>>) -> (Globals, Rc<RefCell<String>>) {
    let mut globals = Globals::new();
    let store: Rc<RefCell<Store>> = Rc::new(RefCell::new(Store::new()));
    globals.set_store_hooks(store);
    globals.set_action_sink(event_loop.clone());
    globals.install_builtin_methods();
    reagent_rt::install(&mut globals, event_loop.clone());

    let output: Rc<RefCell<String>> = Rc::new(RefCell::new(String::new()));
    let sink = output.clone();
    let print_fn = NativeFunction::new(
        "print",
        Arity::AtLeast(0),
        Rc::new(move |args: &[Value]| {
            let mut buf = sink.borrow_mut();
            for a in args {
                buf.push_str(&reagent_value::display_value(a));
            }
            Ok(Value::Nil)
        }),
    );
    globals.define(arcstr::ArcStr::from("print"), Value::Function(Rc::new(print_fn)));
    (globals, output)
}

#[test]
fn arithmetic_and_methods() {
    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let (mut globals, output) = new_globals(&event_loop);

    run(r#"print(1 + 2 * 3, "\n")"#, &mut globals).unwrap();

    assert_eq!(*output.borrow(), "7\n");
}

#[test]
fn list_and_iteration() {
    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let (mut globals, output) = new_globals(&event_loop);

    run(
        r#"
        var l := [3,1,2]
        var s := 0
        for x in l do
            s := s + x
        end
        print(s)
        "#,
        &mut globals,
    )
    .unwrap();

    assert_eq!(*output.borrow(), "6");
}

#[test]
fn try_catch_reports_the_division_by_zero_method_error() {
    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let (mut globals, output) = new_globals(&event_loop);

    run(
        r#"
        do
            var r := 1 / 0
        on e do
            print(e:type, ":", e:message)
        end
        "#,
        &mut globals,
    )
    .unwrap();

    assert_eq!(*output.borrow(), "MethodError:/: division by zero");
}

#[test]
fn schema_when_and_insert_fire_in_insert_order() {
    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let (mut globals, output) = new_globals(&event_loop);

    run(
        r#"
        schema Person is var Name, Age end
        when Person(n := Name, a := Age) do print(n, "=", a, "\n") end
        insert Person(Name := "A", Age := 20)
        insert Person(Name := "B", Age := 30)
        "#,
        &mut globals,
    )
    .unwrap();

    event_loop.borrow().drain_actions(&mut globals);

    assert_eq!(*output.borrow(), "A=20\nB=30\n");
}

#[test]
fn join_with_not_fires_only_for_the_unmatched_side() {
    let event_loop = Rc::new(RefCell::new(EventLoop::new()));
    let (mut globals, output) = new_globals(&event_loop);

    run(
        r#"
        schema P is var K end
        schema Q is var K end
        when P(k := K), not Q[K := k] do print("only P:", k, "\n") end
        insert P(K := 1)
        insert P(K := 2)
        insert Q(K := 1)
        "#,
        &mut globals,
    )
    .unwrap();

    event_loop.borrow().drain_actions(&mut globals);

    assert_eq!(*output.borrow(), "only P: 2\n");
}
