//! The seam `reagent-rt` hooks into the listener network through.
//!
//! Firing a join plan never calls a listener's body directly -- the
//! ordering guarantee that listeners fired by a single mutation are
//! enqueued, not called synchronously, means a single `insert` must not recursively
//! run arbitrary rules on the calling stack. `reagent-store` only ever
//! *decides* that a callback is ready to run; appending it to the actual
//! FIFO action queue and waking the dispatcher is `reagent-rt`'s job. This
//! mirrors [`crate::store_hooks::StoreHooks`]: a trait object `Globals`
//! holds, so `reagent-store` can depend on `reagent-vm` for it without
//! `reagent-vm` depending back on either `reagent-store` or `reagent-rt`.

use reagent_value::Value;

pub trait ActionSink {
    /// Append `(callback, args)` to the FIFO action queue and signal the
    /// dispatcher. Must not run `callback` itself -- only the dispatcher's
    /// own drain loop (`reagent-rt`) ever calls it, via `run_callback_logged`.
    fn enqueue(&mut self, callback: Value, args: Vec<Value>);
}
