//! A single call frame: locals, the value stack, captured upvalues and
//! the nested stack of active try targets.

use reagent_value::{Reference, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
pub struct Frame {
    pub locals: Vec<Option<Reference>>,
    pub stack: Vec<Value>,
    pub upvalues: Vec<Reference>,
    /// `(catch target, stack depth at the matching `Try`)`: on unwind the
    /// stack is truncated back to that depth before the error value is
    /// pushed, so a mid-expression error can't leave partial operands
    /// behind for the handler to trip over.
    pub try_stack: Vec<(usize, usize)>,
    pub ip: usize,
    /// One past the highest currently-active local slot; `enter`/`exit`
    /// move this window up and down as blocks open and close so that
    /// `exit(n)` always clears exactly the slots the matching `enter(n)`
    /// opened, regardless of the frame's total declared size.
    pub top: u32,
    /// Set by `Key` after a `Next` over a tree iterator, which yields
    /// `(key, value)` pairs; `value` goes on the stack, `key` is parked
    /// here until a `Key` instruction asks for it.
    pub last_key: Option<Value>,
}

impl Frame {
    pub fn new(frame_size: u32) -> Self {
        Frame {
            locals: (0..frame_size).map(|_| None).collect(),
            stack: Vec::new(),
            upvalues: Vec::new(),
            try_stack: Vec::new(),
            ip: 0,
            top: 0,
            last_key: None,
        }
    }

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler guarantees balanced stack")
    }

    pub fn peek(&self) -> &Value {
        self.stack.last().expect("compiler guarantees balanced stack")
    }

    pub fn declare(&mut self, slot: u32, v: Value) {
        let cell: Reference = Rc::new(RefCell::new(v));
        self.locals[slot as usize] = Some(cell);
    }

    pub fn local(&self, slot: u32) -> Reference {
        self.locals[slot as usize]
            .clone()
            .expect("local read before declaration")
    }

    pub fn enter(&mut self, n: u32) {
        self.top += n;
    }

    pub fn exit(&mut self, n: u32) {
        let top = self.top as usize;
        for slot in (top - n as usize)..top {
            self.locals[slot] = None;
        }
        self.top -= n;
    }
}
