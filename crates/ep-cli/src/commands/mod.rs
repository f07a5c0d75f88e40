//! CLI command implementations

mod members;
mod plan;
mod reconcile;

pub use members::members_command;
pub use plan::plan_command;
pub use reconcile::reconcile_command;
