//! The relational store: schemas, live instances, AVL indices and the
//! listener network that turns inserts/updates/deletes into enqueued
//! callback invocations. Implements `reagent_vm::StoreHooks`, the one
//! seam `reagent-vm` exposes for the compiler's relational surface.

pub mod index;
pub mod instance;
pub mod listener;
pub mod schema;
pub mod store;

pub use index::IndexDef;
pub use instance::InstanceData;
pub use listener::{ListenerDef, StepPlan};
pub use schema::{FieldDef, FieldKind, SchemaDef};
pub use store::Store;
