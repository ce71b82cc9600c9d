//! The stack-threaded dispatch loop.
//!
//! Each instruction is handled by a single `match` arm that either sets
//! `frame.ip` to the next index to execute or returns, ending the call.
//! There is no recursive "evaluate subexpression" call here -- control
//! flow is entirely driven by the instruction stream the compiler
//! produced, which is what "stack-threaded" means in this design.

use crate::closure::{Chunk, Closure, ClosureInfo};
use crate::frame::Frame;
use crate::globals::Globals;
use crate::instr::Instr;
use log::error as log_error;
use reagent_value::{Boxed, ErrorKind, ErrorPayload, List, Method, MethodBody, Reference, Value};
use smallvec::SmallVec;
use std::rc::Rc;

/// Call any callable value (method, native function, or closure) with
/// already-evaluated arguments. This is the single entry point every
/// `Call`/`ConstCall` instruction and every listener/event callback goes
/// through.
pub fn call_value(callable: &Value, args: &[Value], globals: &mut Globals) -> Result<Value, ErrorPayload> {
    match callable {
        Value::Method(m) => call_method(m, args),
        Value::Function(f) => f.call(args),
        Value::Closure(c) => {
            let closure = c
                .downcast_ref::<Closure>()
                .expect("Value::Closure always wraps reagent_vm::Closure");
            run_closure(&closure.info, &closure.upvalues, args, globals)
        }
        other => Err(ErrorPayload::new(
            ErrorKind::TypeError,
            format!("{} is not callable", reagent_value::display_value(other)),
        )),
    }
}

fn call_method(m: &Rc<Method>, args: &[Value]) -> Result<Value, ErrorPayload> {
    let arg_types: SmallVec<[reagent_value::TypeTag; 4]> =
        args.iter().map(|v| v.type_tag()).collect();
    let imp = m.resolve(&arg_types).ok_or_else(|| m.arg_error(&arg_types))?;
    match imp.body {
        MethodBody::Native(f) => f(args),
        MethodBody::Closure(_) => Err(ErrorPayload::new(
            ErrorKind::InternalError,
            "closure-backed methods require a VM context; use run_closure directly",
        )),
    }
}

/// Set up a fresh frame for `info`, bind `args` to its parameters
/// (extras collected into a list when variadic, missing ones filled
/// with `nil`), and run it to completion.
pub fn run_closure(
    info: &Rc<ClosureInfo>,
    upvalues: &[Reference],
    args: &[Value],
    globals: &mut Globals,
) -> Result<Value, ErrorPayload> {
    let mut frame = Frame::new(info.frame_size);
    frame.upvalues = upvalues.to_vec();
    frame.ip = info.entry;

    // Parameters take the slots the compiler fixed for them before it had
    // seen the body. Captured upvalues share the same cells as the
    // enclosing frame rather than fresh copies, so `Local(slot)` reads
    // and writes them exactly like any other local -- this is also what
    // lets a doubly-nested closure capture "an upvalue of my enclosing
    // closure" by simply treating that slot as an ordinary local one
    // level up (see reagent-compiler's upvalue resolution). Each
    // upvalue's slot is recorded explicitly in `upvalue_slots` rather
    // than assumed contiguous with the parameters, since the compiler
    // discovers upvalues lazily while walking the body, interleaved with
    // ordinary local declarations.
    let min = info.min_params() as usize;
    if args.len() < min {
        return Err(ErrorPayload::new(
            ErrorKind::ParamError,
            format!("expected at least {min} arguments, got {}", args.len()),
        ));
    }
    let param_slots = if info.is_variadic() {
        for (i, a) in args[..min].iter().enumerate() {
            frame.declare(i as u32, a.clone());
        }
        let rest = List::from_iter(args[min..].iter().cloned());
        frame.declare(min as u32, Value::List(rest));
        min as u32 + 1
    } else {
        let nparams = info.nparams as usize;
        for i in 0..nparams {
            frame.declare(i as u32, args.get(i).cloned().unwrap_or(Value::Nil));
        }
        nparams as u32
    };
    for (slot, r) in info.upvalue_slots.iter().zip(upvalues.iter()) {
        frame.locals[*slot as usize] = Some(r.clone());
    }
    frame.top = param_slots;
    let upvalue_top = info.upvalue_slots.iter().copied().max().map(|s| s + 1).unwrap_or(0);
    if upvalue_top > frame.top {
        frame.top = upvalue_top;
    }

    match run(&info.chunk, &mut frame, globals) {
        Ok(v) => Ok(v),
        Err(mut e) => {
            e.push_frame(info.chunk.source.clone(), info.chunk.lines.get(frame.ip).copied().unwrap_or(0));
            Err(e)
        }
    }
}

/// The dispatch loop itself. Returns the call's result once it falls off
/// the instruction stream (an implicit `nil` return) or an instruction
/// executes an explicit return by leaving its value as the sole
/// remaining stack entry and jumping past the chunk's end.
fn run(chunk: &Chunk, frame: &mut Frame, globals: &mut Globals) -> Result<Value, ErrorPayload> {
    loop {
        if frame.ip >= chunk.len() {
            return Ok(frame.stack.pop().unwrap_or(Value::Nil));
        }
        let line = chunk.lines[frame.ip];
        match step(chunk, frame, globals) {
            Ok(Some(next)) => frame.ip = next,
            Ok(None) => return Ok(frame.stack.pop().unwrap_or(Value::Nil)),
            Err(mut e) => {
                e.push_frame(chunk.source.clone(), line);
                // Peek rather than pop: the entry is only removed once
                // control actually reaches the matching `Catch`, which
                // also runs (to the same effect) on the try block's
                // ordinary non-error exit, so it is the sole place that
                // keeps `try_stack` balanced either way.
                match frame.try_stack.last() {
                    Some(&(target, depth)) => {
                        frame.stack.truncate(depth);
                        frame.stack.push(Value::Error(Rc::new(e)));
                        frame.ip = target;
                    }
                    None => return Err(e),
                }
            }
        }
    }
}

/// Execute exactly one instruction, returning the next `ip` (or `None`
/// to end the call, which only happens by falling off the end -- kept
/// here for instructions that might want to end the call early in a
/// future extension).
fn step(chunk: &Chunk, frame: &mut Frame, globals: &mut Globals) -> Result<Option<usize>, ErrorPayload> {
    let ip = frame.ip;
    let instr = &chunk.instrs[ip];
    match instr {
        Instr::Push(v) => {
            frame.push(v.clone());
            Ok(Some(ip + 1))
        }
        Instr::Pop => {
            frame.pop();
            Ok(Some(ip + 1))
        }
        Instr::Pop2 => {
            frame.pop();
            frame.pop();
            Ok(Some(ip + 1))
        }
        Instr::Enter(n) => {
            frame.enter(*n);
            Ok(Some(ip + 1))
        }
        Instr::Exit(n) => {
            frame.exit(*n);
            Ok(Some(ip + 1))
        }
        Instr::Local(slot) => {
            frame.push(Value::Reference(frame.local(*slot)));
            Ok(Some(ip + 1))
        }
        Instr::Var(slot) => {
            let v = deref_if_needed(frame.pop());
            frame.declare(*slot, v);
            Ok(Some(ip + 1))
        }
        Instr::Def(name) => {
            let v = deref_if_needed(frame.pop());
            globals.define(name.clone(), v);
            Ok(Some(ip + 1))
        }
        Instr::Assign => {
            let v = deref_if_needed(frame.pop());
            let target = frame.pop();
            match target {
                Value::Reference(r) => {
                    *r.borrow_mut() = v.clone();
                    frame.push(v);
                    Ok(Some(ip + 1))
                }
                other => Err(ErrorPayload::new(
                    ErrorKind::TypeError,
                    format!("{} is not assignable", reagent_value::display_value(&other)),
                )),
            }
        }
        Instr::Call(argc) => {
            let args = pop_n_values(frame, *argc as usize);
            let callable = frame.pop();
            let callable = deref_if_needed(callable);
            let v = call_value(&callable, &args, globals)?;
            frame.push(v);
            Ok(Some(ip + 1))
        }
        Instr::ConstCall(name, argc) => {
            let args = pop_n_values(frame, *argc as usize);
            if crate::store_hooks::RESERVED_NAMES.contains(&name.as_str()) {
                let hooks = globals
                    .store_hooks()
                    .ok_or_else(|| ErrorPayload::new(ErrorKind::NameError, "no store installed for this runtime".to_string()))?;
                let v = crate::store_hooks::dispatch(&mut *hooks.borrow_mut(), name.as_str(), &args, globals)?;
                frame.push(v);
                return Ok(Some(ip + 1));
            }
            let callable = globals
                .get(name)
                .cloned()
                .ok_or_else(|| ErrorPayload::new(ErrorKind::NameError, format!("undefined name {name}")))?;
            if args.is_empty() && !matches!(callable, Value::Method(_) | Value::Function(_) | Value::Closure(_)) {
                frame.push(callable);
            } else {
                let v = call_value(&callable, &args, globals)?;
                frame.push(v);
            }
            Ok(Some(ip + 1))
        }
        Instr::Jump(target) => Ok(Some(*target)),
        Instr::If(t, f) => {
            let cond = deref_if_needed(frame.pop());
            Ok(Some(if cond.is_truthy() { *t } else { *f }))
        }
        Instr::And(target) => {
            let v = deref_if_needed(frame.pop());
            if v.is_truthy() {
                frame.push(v);
                Ok(Some(ip + 1))
            } else {
                frame.push(v);
                Ok(Some(*target))
            }
        }
        Instr::Or(target) => {
            let v = deref_if_needed(frame.pop());
            if v.is_truthy() {
                frame.push(v);
                Ok(Some(*target))
            } else {
                frame.push(v);
                Ok(Some(ip + 1))
            }
        }
        Instr::While(body, exit) => {
            let cond = deref_if_needed(frame.pop());
            Ok(Some(if cond.is_truthy() { *body } else { *exit }))
        }
        Instr::Until(body, exit) => {
            let cond = deref_if_needed(frame.pop());
            Ok(Some(if !cond.is_truthy() { *body } else { *exit }))
        }
        Instr::Exists(exit) => {
            let top = frame.pop();
            if top.is_nil() {
                frame.pop(); // the iterator itself, no longer needed
                Ok(Some(*exit))
            } else {
                frame.push(top);
                Ok(Some(ip + 1))
            }
        }
        Instr::Next => {
            let top = frame.pop();
            match top {
                Value::Iterator(it) => {
                    let next = it.borrow_mut().next();
                    frame.push(Value::Iterator(it));
                    match next {
                        Some(v) => {
                            frame.last_key = extract_key(&v);
                            frame.push(v);
                        }
                        None => frame.push(Value::Nil),
                    }
                    Ok(Some(ip + 1))
                }
                other => Err(ErrorPayload::new(
                    ErrorKind::TypeError,
                    format!("{} is not iterable", reagent_value::display_value(&other)),
                )),
            }
        }
        Instr::Key => {
            frame.push(frame.last_key.clone().unwrap_or(Value::Nil));
            Ok(Some(ip + 1))
        }
        Instr::Closure(info) => {
            let upvalues = pop_n_refs(frame, info.nupvalues() as usize)?;
            let boxed = Boxed::new(Closure { info: info.clone(), upvalues });
            frame.push(Value::Closure(boxed));
            Ok(Some(ip + 1))
        }
        Instr::Try(target) => {
            frame.try_stack.push((*target, frame.stack.len()));
            Ok(Some(ip + 1))
        }
        Instr::Catch => {
            // Pops the target `Try` pushed. The compiler emits this both
            // right after a try block's protected code completes
            // normally (nothing on the value stack to touch, just
            // retiring the target) and as the first instruction at the
            // catch target itself, where an error value is already
            // sitting on the stack from `run`'s unwind step, left there
            // for the handler to bind.
            frame.try_stack.pop();
            Ok(Some(ip + 1))
        }
        Instr::List(n) => {
            let items = pop_n_values(frame, *n as usize);
            frame.push(Value::List(List::from_iter(items)));
            Ok(Some(ip + 1))
        }
        Instr::Append => {
            let v = deref_if_needed(frame.pop());
            let buf = deref_if_needed(frame.pop());
            match &buf {
                Value::StringBuffer(b) => {
                    b.borrow_mut().push_str(&reagent_value::display_value(&v));
                    frame.push(buf);
                    Ok(Some(ip + 1))
                }
                _ => Err(ErrorPayload::new(ErrorKind::TypeError, "append target is not a stringbuffer")),
            }
        }
        Instr::RaFields(n) => {
            let flat = pop_n_values(frame, (*n as usize) * 2);
            let pairs: Vec<Value> = flat
                .chunks(2)
                .map(|kv| Value::List(List::from_iter([kv[0].clone(), kv[1].clone()])))
                .collect();
            frame.push(Value::List(List::from_iter(pairs)));
            Ok(Some(ip + 1))
        }
    }
}

fn deref_if_needed(v: Value) -> Value {
    match v {
        Value::Reference(r) => r.borrow().clone(),
        other => other,
    }
}

fn extract_key(pair: &Value) -> Option<Value> {
    match pair {
        Value::List(l) if l.len() == 2 => l.get(0),
        _ => None,
    }
}

fn pop_n(frame: &mut Frame, n: usize) -> Vec<Value> {
    let mut v = Vec::with_capacity(n);
    for _ in 0..n {
        v.push(frame.pop());
    }
    v.reverse();
    v
}

fn pop_n_values(frame: &mut Frame, n: usize) -> Vec<Value> {
    pop_n(frame, n).into_iter().map(deref_if_needed).collect()
}

fn pop_n_refs(frame: &mut Frame, n: usize) -> Result<Vec<Reference>, ErrorPayload> {
    let values = pop_n(frame, n);
    values
        .into_iter()
        .map(|v| match v {
            Value::Reference(r) => Ok(r),
            other => Err(ErrorPayload::new(
                ErrorKind::InternalError,
                format!("expected upvalue reference, got {}", reagent_value::display_value(&other)),
            )),
        })
        .collect()
}

/// Used by the listener network and event loop: invoke a callback and,
/// on error, log it with its trace rather than propagating -- a bad rule
/// must never take down the dispatcher.
pub fn run_callback_logged(callable: &Value, args: &[Value], globals: &mut Globals) {
    if let Err(e) = call_value(callable, args, globals) {
        log_error!("listener callback failed: {e}");
    }
}
