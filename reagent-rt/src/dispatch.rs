//! The action queue and timer list: `reagent-rt`'s half of the single
//! dispatcher loop the rest of the engine assumes.
//!
//! `Value` is `Rc`-based and therefore `!Send`, so nothing here ever
//! crosses an actual OS thread boundary -- the "single worker" is just
//! the program's one real thread. `parking_lot`'s `Mutex`/`Condvar` still
//! guard [`Shared`] rather than a bare `RefCell`, matching the structure
//! a genuinely concurrent port of this loop would need and giving
//! `reagent-cli` a real condition variable to block a REPL's idle wait
//! on.

use arcstr::ArcStr;
use log::error;
use parking_lot::{Condvar, Mutex};
use reagent_value::{Boxed, ErrorKind, ErrorPayload, Value};
use reagent_vm::{call_value, Globals};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::event::{EventData, EventHandle};

struct Shared {
    actions: std::collections::VecDeque<(Value, Vec<Value>)>,
    events: Vec<EventHandle>,
}

pub struct EventLoop {
    shared: Mutex<Shared>,
    condvar: Condvar,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        EventLoop {
            shared: Mutex::new(Shared { actions: std::collections::VecDeque::new(), events: Vec::new() }),
            condvar: Condvar::new(),
        }
    }

    /// Schedules `callback(args...)` to run once, `delay` seconds from now.
    pub fn after(&self, delay: f64, callback: Value, args: Vec<Value>) -> Value {
        self.schedule(delay, None, callback, args)
    }

    /// Schedules `callback(args...)` to run every `period` seconds,
    /// starting `period` seconds from now, until it is cancelled or
    /// returns a non-nil value.
    pub fn every(&self, period: f64, callback: Value, args: Vec<Value>) -> Value {
        self.schedule(period, Some(period), callback, args)
    }

    fn schedule(&self, delay: f64, period: Option<f64>, callback: Value, args: Vec<Value>) -> Value {
        let time = Instant::now() + duration_from_secs(delay.max(0.0));
        let period = period.map(|p| duration_from_secs(p.max(0.0)));
        let handle: EventHandle = Rc::new(std::cell::RefCell::new(EventData {
            time,
            period,
            callback,
            args,
            cancelled: std::cell::Cell::new(false),
        }));
        {
            let mut shared = self.shared.lock();
            insert_sorted(&mut shared.events, handle.clone());
        }
        self.condvar.notify_all();
        Value::Event(Boxed::new(handle))
    }

    /// Reschedules `event` by `dt` seconds: removes it and reinserts it
    /// in order under the lock, same as a fresh `after` would.
    pub fn adjust(&self, event: &Value, dt: f64) -> Result<(), ErrorPayload> {
        let handle = as_handle(event)?;
        let mut shared = self.shared.lock();
        remove_handle(&mut shared.events, &handle);
        {
            let mut data = handle.borrow_mut();
            data.time = if dt >= 0.0 {
                data.time + duration_from_secs(dt)
            } else {
                data.time - duration_from_secs(-dt)
            };
        }
        insert_sorted(&mut shared.events, handle);
        drop(shared);
        self.condvar.notify_all();
        Ok(())
    }

    /// Unlinks `event`. Always safe, including for an event that already
    /// fired or was never found (e.g. double `cancel`): both are no-ops.
    pub fn cancel(&self, event: &Value) -> Result<(), ErrorPayload> {
        let handle = as_handle(event)?;
        handle.borrow().cancelled.set(true);
        let mut shared = self.shared.lock();
        remove_handle(&mut shared.events, &handle);
        Ok(())
    }

    /// Enqueues `(callback, args)` for later draining; used directly by
    /// the `ActionSink` impl below.
    fn enqueue_action(&self, callback: Value, args: Vec<Value>) {
        let mut shared = self.shared.lock();
        shared.actions.push_back((callback, args));
        drop(shared);
        self.condvar.notify_all();
    }

    /// Step 1 of the worker loop: runs every action currently queued,
    /// including ones enqueued by an action run earlier in this same
    /// drain (a listener callback that itself mutates the store).
    pub fn drain_actions(&self, globals: &mut Globals) {
        loop {
            let next = self.shared.lock().actions.pop_front();
            match next {
                Some((callback, args)) => reagent_vm::run_callback_logged(&callback, &args, globals),
                None => break,
            }
        }
    }

    /// Step 2 of the worker loop, one event at a time: if the head event
    /// is due, pops and invokes it, recurring it if appropriate, and
    /// returns `true`. Returns `false` if the head event (if any) is not
    /// yet due. Callers loop this against [`Self::drain_actions`] so a
    /// fired event's own actions run before the next event does.
    pub fn fire_one_due(&self, globals: &mut Globals) -> bool {
        let due = {
            let mut shared = self.shared.lock();
            match shared.events.first() {
                Some(h) if h.borrow().time <= Instant::now() => Some(shared.events.remove(0)),
                _ => None,
            }
        };
        let Some(handle) = due else { return false };
        if handle.borrow().cancelled.get() {
            return true;
        }
        let (callback, args) = {
            let data = handle.borrow();
            (data.callback.clone(), data.args.clone())
        };
        let result = call_value(&callback, &args, globals);
        if let Err(e) = &result {
            error!("timer callback failed: {e}");
        }
        let recurs = handle.borrow().period.is_some() && !handle.borrow().cancelled.get();
        let stops_itself = matches!(result, Ok(v) if !matches!(v, Value::Nil));
        if recurs && !stops_itself {
            let mut data = handle.borrow_mut();
            data.time += data.period.expect("recurs implies period");
            drop(data);
            insert_sorted(&mut self.shared.lock().events, handle);
        }
        true
    }

    /// The scheduled time of the earliest still-pending event, if any.
    pub fn next_wake(&self) -> Option<Instant> {
        self.shared.lock().events.first().map(|h| h.borrow().time)
    }

    pub fn is_idle(&self) -> bool {
        let shared = self.shared.lock();
        shared.actions.is_empty() && shared.events.is_empty()
    }

    /// Blocks until woken by a new action/event or `timeout` elapses
    /// (waits unconditionally if `timeout` is `None`).
    pub fn wait(&self, timeout: Option<Duration>) {
        let mut guard = self.shared.lock();
        match timeout {
            Some(d) => {
                self.condvar.wait_for(&mut guard, d);
            }
            None => self.condvar.wait(&mut guard),
        }
    }

    /// One round of the worker loop for a driver that also needs to poll
    /// something else (e.g. a REPL's stdin channel): drains actions,
    /// fires every event that's due, and returns how long the caller may
    /// safely block for before checking back -- `None` means there is no
    /// pending event to wait on at all.
    pub fn poll(&self, globals: &mut Globals) -> Option<Duration> {
        self.drain_actions(globals);
        while self.fire_one_due(globals) {
            self.drain_actions(globals);
        }
        self.next_wake().map(|t| t.saturating_duration_since(Instant::now()))
    }

    /// Script-mode driver: runs the worker loop to exhaustion. Unlike a
    /// long-running service, a one-shot script has nothing left to do
    /// once the action queue and event list are both empty, so this
    /// returns instead of waiting unconditionally.
    pub fn run_until_idle(&self, globals: &mut Globals) {
        loop {
            self.drain_actions(globals);
            if self.fire_one_due(globals) {
                continue;
            }
            match self.next_wake() {
                Some(t) => {
                    let now = Instant::now();
                    if t > now {
                        self.wait(Some(t - now));
                    }
                }
                None => break,
            }
        }
    }
}

impl reagent_vm::ActionSink for EventLoop {
    fn enqueue(&mut self, callback: Value, args: Vec<Value>) {
        self.enqueue_action(callback, args);
    }
}

fn duration_from_secs(secs: f64) -> Duration {
    Duration::from_secs_f64(secs)
}

fn insert_sorted(events: &mut Vec<EventHandle>, handle: EventHandle) {
    let at = handle.borrow().time;
    let pos = events.partition_point(|e| e.borrow().time <= at);
    events.insert(pos, handle);
}

fn remove_handle(events: &mut Vec<EventHandle>, handle: &EventHandle) {
    events.retain(|e| !Rc::ptr_eq(e, handle));
}

fn as_handle(event: &Value) -> Result<EventHandle, ErrorPayload> {
    match event {
        Value::Event(b) => b
            .downcast_ref::<EventHandle>()
            .cloned()
            .ok_or_else(|| type_error("Value::Event did not wrap a reagent-rt EventHandle")),
        other => Err(type_error(format!("expected an event, got {other:?}"))),
    }
}

fn type_error(msg: impl Into<ArcStr>) -> ErrorPayload {
    ErrorPayload::new(ErrorKind::TypeError, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_value::{Arity, NativeFunction};
    use std::cell::{Cell, RefCell};

    fn counting_fn(count: Rc<Cell<i64>>) -> Value {
        let body: reagent_value::NativeFn = Rc::new(move |_args| {
            count.set(count.get() + 1);
            Ok(Value::Nil)
        });
        Value::Function(Rc::new(NativeFunction::new("counter", Arity::Exact(0), body)))
    }

    #[test]
    fn after_fires_once() {
        let el = EventLoop::new();
        let mut globals = Globals::new();
        let count = Rc::new(Cell::new(0));
        el.after(0.0, counting_fn(count.clone()), vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(el.fire_one_due(&mut globals));
        assert_eq!(count.get(), 1);
        assert!(!el.fire_one_due(&mut globals));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn every_reschedules_until_cancelled() {
        let el = EventLoop::new();
        let mut globals = Globals::new();
        let count = Rc::new(Cell::new(0));
        let event = el.every(0.0, counting_fn(count.clone()), vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(el.fire_one_due(&mut globals));
        assert_eq!(count.get(), 1);
        assert!(el.next_wake().is_some());

        el.cancel(&event).unwrap();
        assert!(el.next_wake().is_none());
    }

    #[test]
    fn cancel_is_idempotent() {
        let el = EventLoop::new();
        let event = el.after(10.0, Value::Nil, vec![]);
        el.cancel(&event).unwrap();
        el.cancel(&event).unwrap();
        assert!(el.is_idle());
    }

    #[test]
    fn adjust_reorders_events() {
        let el = EventLoop::new();
        let first = el.after(0.0, Value::Nil, vec![]);
        let second = el.after(1.0, Value::Nil, vec![]);
        el.adjust(&second, -100.0).unwrap();
        let head_time = el.next_wake().unwrap();
        assert!(head_time < el.shared.lock().events.last().unwrap().borrow().time);
        let _ = first;
    }

    #[test]
    fn actions_drain_fifo_and_before_timers() {
        let el = EventLoop::new();
        let mut globals = Globals::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        let first: reagent_value::NativeFn = Rc::new(move |_| {
            o1.borrow_mut().push(1);
            Ok(Value::Nil)
        });
        let o2 = order.clone();
        let second: reagent_value::NativeFn = Rc::new(move |_| {
            o2.borrow_mut().push(2);
            Ok(Value::Nil)
        });
        use reagent_vm::ActionSink;
        let mut el_mut = el;
        el_mut.enqueue(Value::Function(Rc::new(NativeFunction::new("a", Arity::Exact(0), first))), vec![]);
        el_mut.enqueue(Value::Function(Rc::new(NativeFunction::new("b", Arity::Exact(0), second))), vec![]);
        el_mut.drain_actions(&mut globals);
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
