//! Application layer
//!
//! - Plan: pure configuration -> listener set
//! - Dispatcher: binds the plan and pumps connections into modules

mod dispatcher;
pub mod plan;

pub use dispatcher::{BoundListener, Dispatcher};
pub use plan::{build_plan, ListenerSpec};
