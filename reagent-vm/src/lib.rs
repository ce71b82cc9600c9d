//! Stack-threaded bytecode interpreter: instructions, frames, closures
//! and the dispatch loop that drives them. Depended on by
//! `reagent-compiler` (which emits the `Instr`/`Chunk`/`ClosureInfo`
//! types defined here) and `reagent-rt` (which owns the `Globals` table
//! and the event loop that re-enters `run_closure` for callbacks).

pub mod action_sink;
pub mod closure;
pub mod frame;
pub mod globals;
pub mod instr;
pub mod interp;
pub mod store_hooks;

pub use action_sink::ActionSink;
pub use closure::{Chunk, Closure, ClosureInfo};
pub use frame::Frame;
pub use globals::Globals;
pub use instr::Instr;
pub use interp::{call_value, run_callback_logged, run_closure};
pub use store_hooks::StoreHooks;
