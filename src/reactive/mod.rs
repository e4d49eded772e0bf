//! Incremental recomputation engine
//!
//! Hosts declare [`Tracked`] parameters and reactive methods. Reading a
//! reactive method records what it read into the active dependency frame;
//! writing a parameter with a different value invalidates everything that
//! (transitively) read it. Constraint methods additionally own solver rows
//! and patch them in place on recomputation.

mod cache;
pub mod constraint;
pub mod cost;
mod graph;
mod key;
pub mod method;
mod model;
mod output;
mod registry;
pub mod scope;
mod value;

pub use graph::{EngineStats, Graph, HostHandle, ShapeChangePolicy};
pub use key::{DependencyKey, HostId, MethodKey, ParamKey};
pub use model::{CycleReport, OptimizationModel};
pub use output::{Output, OutputValue};
pub use registry::{
    AnyHost, ConstraintFn, CostFn, Host, MethodKind, MethodRegistry, MethodSpec, OutputFn,
};
pub use value::{Tracked, TrackedValue};
