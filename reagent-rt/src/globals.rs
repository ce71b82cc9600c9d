//! Registers the engine's scheduling globals (`print`, `after`, `every`,
//! `adjust`, `cancel`) against a live [`EventLoop`].
//!
//! `file I/O` (`open`) is deliberately not registered here: nothing in
//! `Value` represents a file handle, and this engine treats that surface
//! as an external collaborator rather than part of the core.

use reagent_value::{display_value, Arity, ErrorKind, ErrorPayload, NativeFn, NativeFunction, Value};
use reagent_vm::Globals;
use std::cell::RefCell;
use std::rc::Rc;

use crate::EventLoop;

fn native(f: impl Fn(&[Value]) -> Result<Value, ErrorPayload> + 'static) -> NativeFn {
    Rc::new(f)
}

fn as_seconds(v: &Value) -> Result<f64, ErrorPayload> {
    match v {
        Value::Integer(n) => Ok(*n as f64),
        Value::Real(r) => Ok(*r),
        other => Err(ErrorPayload::new(
            ErrorKind::ParamError,
            format!("expected a number of seconds, got {other:?}"),
        )),
    }
}

/// Installs the scheduling globals into `globals`, bound to `event_loop`.
/// Call once at startup, after `Globals::install_builtin_methods` and
/// `Globals::set_action_sink`.
pub fn install(globals: &mut Globals, event_loop: Rc<RefCell<EventLoop>>) {
    let print_fn = NativeFunction::new("print", Arity::AtLeast(0), native(|args| {
        let mut out = String::new();
        for a in args {
            out.push_str(&display_value(a));
        }
        print!("{out}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
        Ok(Value::Nil)
    }));
    globals.define(arcstr::ArcStr::from("print"), Value::Function(Rc::new(print_fn)));

    let el = event_loop.clone();
    let after_fn = NativeFunction::new("after", Arity::AtLeast(2), native(move |args| {
        let delay = as_seconds(&args[0])?;
        Ok(el.borrow().after(delay, args[1].clone(), args[2..].to_vec()))
    }));
    globals.define(arcstr::ArcStr::from("after"), Value::Function(Rc::new(after_fn)));

    let el = event_loop.clone();
    let every_fn = NativeFunction::new("every", Arity::AtLeast(2), native(move |args| {
        let period = as_seconds(&args[0])?;
        Ok(el.borrow().every(period, args[1].clone(), args[2..].to_vec()))
    }));
    globals.define(arcstr::ArcStr::from("every"), Value::Function(Rc::new(every_fn)));

    let el = event_loop.clone();
    let adjust_fn = NativeFunction::new("adjust", Arity::Exact(2), native(move |args| {
        let dt = as_seconds(&args[1])?;
        el.borrow().adjust(&args[0], dt)?;
        Ok(Value::Nil)
    }));
    globals.define(arcstr::ArcStr::from("adjust"), Value::Function(Rc::new(adjust_fn)));

    let el = event_loop;
    let cancel_fn = NativeFunction::new("cancel", Arity::Exact(1), native(move |args| {
        el.borrow().cancel(&args[0])?;
        Ok(Value::Nil)
    }));
    globals.define(arcstr::ArcStr::from("cancel"), Value::Function(Rc::new(cancel_fn)));
}
