//! Single-threaded event loop for the reagent engine: the action queue
//! and timer list that sit behind `print`, `after`, `every`, `adjust`
//! and `cancel`, and the [`reagent_vm::ActionSink`] that listener firing
//! enqueues through.
//!
//! `Value` is `Rc`-based, hence `!Send` -- this loop never spawns a real
//! OS thread to run script callbacks on. "Single worker thread" here
//! just means the one thread the embedding program is already running
//! on; `parking_lot`'s `Mutex`/`Condvar` are kept as the loop's internal
//! synchronization anyway; see [`dispatch::EventLoop`] for why.

pub mod dispatch;
pub mod event;
pub mod globals;

pub use dispatch::EventLoop;
pub use event::{EventData, EventHandle};
pub use globals::install;
