//! The incremental view maintenance core.
//!
//! - [`clause`]: atomic constraints and their code generation
//! - [`order`]: the greedy clause-ordering planner
//! - [`join`] and [`comp`]: joins and comprehensions
//! - [`maint`]: maintenance-function synthesis and self-join strategies
//! - [`demand`]: tags, filters and demand sets
//! - [`code`] and [`exec`]: the maintenance IR and its interpreter

pub mod clause;
pub mod code;
pub mod comp;
pub mod demand;
pub mod exec;
pub mod join;
pub mod maint;
pub mod order;

pub use clause::Clause;
pub use code::{Code, UpdateOp};
pub use comp::CompSpec;
pub use demand::{DemandPlan, Structure, StructureKind};
pub use exec::{ExecError, Update};
pub use join::{Join, MaintJoin};
pub use maint::{MaintFn, Placement, SelfJoin};
pub use order::{CostEstimator, PlannedClause, Planner, Rate, RelationSizes, UnorderableJoin};
