//! The scheduled-event record behind `after`/`every`.

use reagent_value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub struct EventData {
    pub time: Instant,
    pub period: Option<Duration>,
    pub callback: Value,
    pub args: Vec<Value>,
    pub cancelled: Cell<bool>,
}

impl std::fmt::Debug for EventData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<event {} (cancelled={})>",
            match self.period {
                Some(p) => format!("every {:?}", p),
                None => "after".to_string(),
            },
            self.cancelled.get()
        )
    }
}

pub type EventHandle = Rc<RefCell<EventData>>;
