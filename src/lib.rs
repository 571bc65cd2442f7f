//! Implicit (Preissmann double-sweep) channel routing over a branching
//! network of channel links, weirs and lakes.

pub mod boundary;
pub mod coeff;
pub mod config;
pub mod error;
pub mod io;
pub mod network;
pub mod normal_depth;
pub mod reservoir;
pub mod routing;
pub mod section;
pub mod simulation;
pub mod state;

pub use error::{
    ConfigError, ConvergenceError, Diagnostic, PhysicalInvariantViolation, Severity, SolverError,
};
pub use network::{ChannelNetwork, LinkId, LinkType};
pub use routing::{NetworkSolver, RouteReport};
pub use simulation::Simulation;
pub use state::ChannelState;
