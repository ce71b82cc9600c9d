//! Core arithmetic/comparison/string/list/tree methods and error-value
//! accessors. These are not a separate module the host embeds -- they
//! are the first entries registered into the method table at boot,
//! ordinary multi-dispatch callbacks exactly like anything user code
//! registers afterward, so user code is free to shadow or extend them.

use crate::error::{ErrorKind, ErrorPayload};
use crate::iterator::{new_handle, ListIterator, PairIterator, RangeIterator};
use crate::list::List;
use crate::method::{Arity, Method, MethodBody, NativeFn, NativeFunction};
use crate::stringbuffer::StringBuffer;
use crate::tree::Tree;
use crate::typetag::TypeTag;
use crate::value::Value;
use smallvec::smallvec;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

fn native(f: impl Fn(&[Value]) -> Result<Value, ErrorPayload> + 'static) -> NativeFn {
    Rc::new(f)
}

fn type_error(op: &str) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::TypeError, format!("{op}: incompatible operand types"))
}

fn arith(name: &'static str, int_op: fn(i64, i64) -> Option<i64>, real_op: fn(f64, f64) -> f64) -> Rc<Method> {
    let m = Rc::new(Method::new(name));
    m.define(
        smallvec![TypeTag::Integer, TypeTag::Integer],
        false,
        MethodBody::Native(native(move |args| match (&args[0], &args[1]) {
            (Value::Integer(a), Value::Integer(b)) => int_op(*a, *b)
                .map(Value::Integer)
                .ok_or_else(|| ErrorPayload::new(ErrorKind::TypeError, format!("{name}: overflow"))),
            _ => Err(type_error(name)),
        })),
    );
    m.define(
        smallvec![TypeTag::Number, TypeTag::Number],
        false,
        MethodBody::Native(native(move |args| {
            let a = as_f64(&args[0]).ok_or_else(|| type_error(name))?;
            let b = as_f64(&args[1]).ok_or_else(|| type_error(name))?;
            Ok(Value::Real(real_op(a, b)))
        })),
    );
    m
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(r) => Some(*r),
        _ => None,
    }
}

/// There is no dedicated boolean type in this runtime (see `TypeTag`):
/// `nil` is the only falsy value, so comparisons return `nil` on failure
/// and `1` on success rather than an `Integer(0)`/`Integer(1)` pair that
/// `is_truthy` would see as truthy either way.
fn compare_method(name: &'static str, accept: fn(Ordering) -> bool) -> Rc<Method> {
    let m = Rc::new(Method::new(name));
    m.define(
        smallvec![TypeTag::Any, TypeTag::Any],
        false,
        MethodBody::Native(native(move |args| {
            let o = crate::method::natural_compare(&args[0], &args[1])?;
            Ok(if accept(o) { Value::Integer(1) } else { Value::Nil })
        })),
    );
    m
}

/// Every builtin `(name, method)` pair, ready to install into a global
/// table at interpreter startup.
pub fn builtin_methods() -> Vec<(&'static str, Rc<Method>)> {
    let mut v = vec![
        ("+", arith("+", i64::checked_add, |a, b| a + b)),
        ("-", arith("-", i64::checked_sub, |a, b| a - b)),
        ("*", arith("*", i64::checked_mul, |a, b| a * b)),
        ("<", compare_method("<", |o| o == Ordering::Less)),
        (">", compare_method(">", |o| o == Ordering::Greater)),
        ("<=", compare_method("<=", |o| o != Ordering::Greater)),
        (">=", compare_method(">=", |o| o != Ordering::Less)),
        ("=", compare_method("=", |o| o == Ordering::Equal)),
        ("!=", compare_method("!=", |o| o != Ordering::Equal)),
        ("?", {
            let m = Rc::new(Method::new("?"));
            m.define(
                smallvec![TypeTag::Any, TypeTag::Any],
                false,
                MethodBody::Native(native(|args| {
                    let o = crate::method::natural_compare(&args[0], &args[1])?;
                    Ok(Value::Integer(match o {
                        Ordering::Less => -1,
                        Ordering::Equal => 0,
                        Ordering::Greater => 1,
                    }))
                })),
            );
            m
        }),
        ("size", {
            let m = Rc::new(Method::new("size"));
            m.define(
                smallvec![TypeTag::List],
                false,
                MethodBody::Native(native(|args| match &args[0] {
                    Value::List(l) => Ok(Value::Integer(l.len() as i64)),
                    _ => Err(type_error("size")),
                })),
            );
            m.define(
                smallvec![TypeTag::Tree],
                false,
                MethodBody::Native(native(|args| match &args[0] {
                    Value::Tree(t) => Ok(Value::Integer(t.len() as i64)),
                    _ => Err(type_error("size")),
                })),
            );
            m.define(
                smallvec![TypeTag::String],
                false,
                MethodBody::Native(native(|args| match &args[0] {
                    Value::String(s) => Ok(Value::Integer(s.len() as i64)),
                    _ => Err(type_error("size")),
                })),
            );
            m
        }),
        ("string", {
            let m = Rc::new(Method::new("string"));
            m.define(
                smallvec![TypeTag::Any],
                false,
                MethodBody::Native(native(|args| Ok(Value::String(display_value(&args[0]).into())))),
            );
            m
        }),
        ("append", {
            let m = Rc::new(Method::new("append"));
            m.define(
                smallvec![TypeTag::StringBuffer, TypeTag::Any],
                false,
                MethodBody::Native(native(|args| match &args[0] {
                    Value::StringBuffer(b) => {
                        b.borrow_mut().push_str(&display_value(&args[1]));
                        Ok(args[0].clone())
                    }
                    _ => Err(type_error("append")),
                })),
            );
            m
        }),
    ];
    v.push(("/", div_method()));
    v.push(("%", rem_method()));
    v.push(("not", not_method()));
    v.push(("iterator", iterator_method()));
    v.push(("get", get_method()));
    v.push(("insert", insert_method()));
    v.push(("remove", remove_method()));
    v.push(("type", error_field_method("type")));
    v.push(("message", error_field_method("message")));
    v.push(("trace", error_field_method("trace")));
    v
}

/// `!x`: the only unary operator, so it dispatches on `Any` rather than
/// needing per-type overloads the way the binary arithmetic ops do.
fn not_method() -> Rc<Method> {
    let m = Rc::new(Method::new("not"));
    m.define(
        smallvec![TypeTag::Any],
        false,
        MethodBody::Native(native(|args| {
            Ok(if args[0].is_truthy() { Value::Nil } else { Value::Integer(1) })
        })),
    );
    m
}

/// Normalizes any built-in iterable (list, tree, an existing iterator)
/// to a `Value::Iterator`, the form `exists`/`next`/`key` operate on.
/// `for var x in EXPR` always compiles to a call through this method.
fn iterator_method() -> Rc<Method> {
    let m = Rc::new(Method::new("iterator"));
    m.define(
        smallvec![TypeTag::List],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::List(l) => Ok(Value::Iterator(new_handle(ListIterator::new(l.to_vec())))),
            _ => Err(type_error("iterator")),
        })),
    );
    m.define(
        smallvec![TypeTag::Tree],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::Tree(t) => Ok(Value::Iterator(new_handle(PairIterator::new(t.iter().collect())))),
            _ => Err(type_error("iterator")),
        })),
    );
    m.define(
        smallvec![TypeTag::Iterator],
        false,
        MethodBody::Native(native(|args| Ok(args[0].clone()))),
    );
    m
}

/// `list:get(i)` / `tree:get(k)`.
fn get_method() -> Rc<Method> {
    let m = Rc::new(Method::new("get"));
    m.define(
        smallvec![TypeTag::List, TypeTag::Integer],
        false,
        MethodBody::Native(native(|args| match (&args[0], &args[1]) {
            (Value::List(l), Value::Integer(i)) => Ok(l.get(*i).unwrap_or(Value::Nil)),
            _ => Err(type_error("get")),
        })),
    );
    m.define(
        smallvec![TypeTag::Tree, TypeTag::Any],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::Tree(t) => Ok(t.get(&args[1], &mut crate::method::natural_compare)?.unwrap_or(Value::Nil)),
            _ => Err(type_error("get")),
        })),
    );
    m
}

/// `list:insert(i, v)` (insert before index) / `tree:insert(k, v)`.
fn insert_method() -> Rc<Method> {
    let m = Rc::new(Method::new("insert"));
    m.define(
        smallvec![TypeTag::List, TypeTag::Integer, TypeTag::Any],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::List(l) => {
                l.insert(as_index(&args[1])?, args[2].clone());
                Ok(args[0].clone())
            }
            _ => Err(type_error("insert")),
        })),
    );
    m.define(
        smallvec![TypeTag::Tree, TypeTag::Any, TypeTag::Any],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::Tree(t) => {
                t.insert(args[1].clone(), args[2].clone(), &mut crate::method::natural_compare)?;
                Ok(args[0].clone())
            }
            _ => Err(type_error("insert")),
        })),
    );
    m
}

/// `list:remove(i)` / `tree:remove(k)`.
fn remove_method() -> Rc<Method> {
    let m = Rc::new(Method::new("remove"));
    m.define(
        smallvec![TypeTag::List, TypeTag::Integer],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::List(l) => Ok(l.remove(as_index(&args[1])?).unwrap_or(Value::Nil)),
            _ => Err(type_error("remove")),
        })),
    );
    m.define(
        smallvec![TypeTag::Tree, TypeTag::Any],
        false,
        MethodBody::Native(native(|args| match &args[0] {
            Value::Tree(t) => {
                Ok(t.remove(&args[1], &mut crate::method::natural_compare)?.unwrap_or(Value::Nil))
            }
            _ => Err(type_error("remove")),
        })),
    );
    m
}

fn as_index(v: &Value) -> Result<i64, ErrorPayload> {
    match v {
        Value::Integer(i) => Ok(*i),
        _ => Err(type_error("index")),
    }
}

/// Variadic native constructors the parser's table-literal desugaring
/// (`[ … ]`, `{ k is v, … }`) and string interpolation compile calls to.
pub fn builtin_functions() -> Vec<(&'static str, Rc<NativeFunction>)> {
    vec![
        (
            "list_new",
            Rc::new(NativeFunction::new("list_new", Arity::AtLeast(0), native(|args| {
                Ok(Value::List(List::from_iter(args.iter().cloned())))
            }))),
        ),
        (
            "tree_new",
            Rc::new(NativeFunction::new("tree_new", Arity::AtLeast(0), native(|args| {
                if args.len() % 2 != 0 {
                    return Err(ErrorPayload::new(ErrorKind::ParamError, "tree_new: odd number of arguments"));
                }
                let tree = Tree::new();
                for pair in args.chunks(2) {
                    tree.insert(pair[0].clone(), pair[1].clone(), &mut crate::method::natural_compare)?;
                }
                Ok(Value::Tree(tree))
            }))),
        ),
        (
            "stringbuffer_new",
            Rc::new(NativeFunction::new("stringbuffer_new", Arity::Exact(0), native(|_args| {
                Ok(Value::StringBuffer(Rc::new(RefCell::new(StringBuffer::new()))))
            }))),
        ),
        (
            "range",
            Rc::new(NativeFunction::new("range", Arity::AtLeast(2), native(|args| {
                let start = as_index(&args[0])?;
                let end = as_index(&args[1])?;
                let step = if args.len() > 2 { as_index(&args[2])? } else if end >= start { 1 } else { -1 };
                if step == 0 {
                    return Err(ErrorPayload::new(ErrorKind::ParamError, "range: step must not be zero"));
                }
                Ok(Value::Iterator(new_handle(RangeIterator::new(start, end, step))))
            }))),
        ),
    ]
}

fn div_method() -> Rc<Method> {
    let m = Rc::new(Method::new("/"));
    m.define(
        smallvec![TypeTag::Number, TypeTag::Number],
        false,
        MethodBody::Native(native(|args| {
            let a = as_f64(&args[0]).ok_or_else(|| type_error("/"))?;
            let b = as_f64(&args[1]).ok_or_else(|| type_error("/"))?;
            if b == 0.0 {
                return Err(ErrorPayload::new(ErrorKind::MethodError, "/: division by zero"));
            }
            Ok(Value::Real(a / b))
        })),
    );
    m
}

fn rem_method() -> Rc<Method> {
    let m = Rc::new(Method::new("%"));
    m.define(
        smallvec![TypeTag::Integer, TypeTag::Integer],
        false,
        MethodBody::Native(native(|args| match (&args[0], &args[1]) {
            (Value::Integer(a), Value::Integer(0)) => {
                let _ = a;
                Err(ErrorPayload::new(ErrorKind::MethodError, "%: division by zero"))
            }
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a % b)),
            _ => Err(type_error("%")),
        })),
    );
    m
}

/// Human-readable rendering used by `string`/`print`/`append`. Not the
/// same thing as `Debug` -- this is what reagent source sees.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Some(v) => display_value(v),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::String(s) => s.to_string(),
        Value::List(l) => {
            let items: Vec<String> = l.iter().map(|v| display_value(&v)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Tree(t) => {
            let items: Vec<String> =
                t.iter().map(|(k, v)| format!("{} is {}", display_value(&k), display_value(&v))).collect();
            format!("{{{}}}", items.join(", "))
        }
        Value::Reference(r) => display_value(&r.borrow()),
        Value::StringBuffer(b) => b.borrow().as_str().to_string(),
        Value::Error(e) => e.to_string(),
        Value::Method(m) => format!("<method {}>", m.name),
        Value::Function(f) => format!("<function {}>", f.name),
        Value::Closure(_) => "<closure>".to_string(),
        Value::Iterator(_) => "<iterator>".to_string(),
        Value::Instance(_, id) => format!("<instance of schema {id}>"),
        Value::Schema(_) => "<schema>".to_string(),
        Value::Index(_) => "<index>".to_string(),
        Value::Listener(_) => "<listener>".to_string(),
        Value::Event(_) => "<event>".to_string(),
    }
}

/// Builds the `:type`/`:message`/`:trace` method registered on
/// [`TypeTag::Error`], each a thin wrapper over [`error_field`].
fn error_field_method(field: &'static str) -> Rc<Method> {
    let m = Rc::new(Method::new(field));
    m.define(
        smallvec![TypeTag::Error],
        false,
        MethodBody::Native(native(move |args| match &args[0] {
            Value::Error(e) => Ok(error_field(e, field).expect("field is one of the three error_field recognizes")),
            _ => Err(type_error(field)),
        })),
    );
    m
}

/// `:type`, `:message`, `:trace` accessors on error values.
pub fn error_field(e: &ErrorPayload, field: &str) -> Option<Value> {
    match field {
        "type" => Some(Value::String(e.kind.as_str().into())),
        "message" => Some(Value::String(e.message.clone())),
        "trace" => Some(Value::List(List::from_iter(
            e.trace.iter().map(|f| Value::String(format!("{f}").into())),
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typetag::TypeTag;

    #[test]
    fn plus_dispatches_integer_and_real() {
        let methods = builtin_methods();
        let plus = methods.iter().find(|(n, _)| *n == "+").unwrap().1.clone();
        let imp = plus.resolve(&[TypeTag::Integer, TypeTag::Integer]).unwrap();
        let MethodBody::Native(f) = imp.body else { panic!() };
        assert_eq!(f(&[Value::Integer(2), Value::Integer(3)]).unwrap(), Value::Integer(5));
    }

    #[test]
    fn division_by_zero_is_method_error() {
        let methods = builtin_methods();
        let div = methods.iter().find(|(n, _)| *n == "/").unwrap().1.clone();
        let imp = div.resolve(&[TypeTag::Integer, TypeTag::Integer]).unwrap();
        let MethodBody::Native(f) = imp.body else { panic!() };
        let err = f(&[Value::Integer(1), Value::Integer(0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodError);
    }
}
