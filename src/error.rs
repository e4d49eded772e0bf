use thiserror::Error;

use crate::reactive::MethodKind;
use crate::solver::SolverError;

/// Errors raised by the incremental engine and the hosts built on it
#[derive(Debug, Error)]
pub enum Error {
    #[error("parameter `{name}` on `{host}` was read before it was set")]
    UninitializedParameter { host: String, name: &'static str },

    #[error("constraint `{method}` on `{host}` changed shape from {from} to {to}")]
    ShapeChanged {
        host: String,
        method: &'static str,
        from: String,
        to: String,
    },

    #[error("cached result of `{method}` on `{host}` was read as a different type")]
    ResultTypeMismatch { host: String, method: &'static str },

    #[error("`{parameter}` on `{host}` requires `{companion}` to be set")]
    MissingCompanion {
        host: String,
        parameter: &'static str,
        companion: &'static str,
    },

    #[error("host type `{host_type}` has no {kind} method `{method}`")]
    UnknownMethod {
        host_type: &'static str,
        kind: MethodKind,
        method: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
