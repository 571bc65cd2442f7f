use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::network::LinkId;

/// Problems with the inputs or the requested run; nothing has been solved yet.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("link {link}: unknown link type {code}")]
    UnknownLinkType { link: LinkId, code: i64 },

    #[error("link {link} refers to link {target} which is not in the network")]
    UnknownLink { link: LinkId, target: LinkId },

    #[error("link {link} node {node}: breakpoint table {table} was not loaded")]
    MissingTable {
        link: LinkId,
        node: usize,
        table: usize,
    },

    #[error("channel time step {channel} s does not match overland time step {overland} s")]
    TimeStepMismatch { channel: f64, overland: f64 },

    #[error("conflicting run modes: {0}")]
    ConflictingModes(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}

/// Iterative procedures that failed to produce a usable depth.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("normal depth did not converge in {iterations} iterations at link {link} node {node}")]
    NormalDepth {
        link: LinkId,
        node: usize,
        iterations: usize,
    },

    #[error("backwater step did not converge at link {link} node {node}")]
    Backwater { link: LinkId, node: usize },

    #[error("negative discriminant converting area to depth at link {link} node {node}")]
    NegativeDiscriminant { link: LinkId, node: usize },

    #[error("no depth up to the search limit holds the requested area at link {link} node {node}")]
    AreaNotBracketed { link: LinkId, node: usize },
}

/// A committed state that is physically impossible.
#[derive(Debug, Error)]
#[error("negative depth {depth:.6} at link {link} node {node} (t = {time} s)")]
pub struct PhysicalInvariantViolation {
    pub link: LinkId,
    pub node: usize,
    pub depth: f64,
    pub time: f64,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    Invariant(#[from] PhysicalInvariantViolation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiagnosticKind {
    Supercritical { froude: f64 },
    NegativeDepth { depth: f64 },
    TableExtrapolation { depth: f64, table_depth: f64 },
    LakeBelowBed { elevation: f64 },
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::NegativeDepth { .. } => Severity::Fatal,
            _ => Severity::Warning,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            DiagnosticKind::Supercritical { .. } => 0,
            DiagnosticKind::NegativeDepth { .. } => 1,
            DiagnosticKind::TableExtrapolation { .. } => 2,
            DiagnosticKind::LakeBelowBed { .. } => 3,
        }
    }
}

/// Something the solver noticed at a node while it kept going.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub link: LinkId,
    /// 1-based node number, as in the network file.
    pub node: usize,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(link: LinkId, node: usize, kind: DiagnosticKind) -> Self {
        Diagnostic {
            severity: kind.severity(),
            link,
            node,
            kind,
        }
    }

    pub(crate) fn key(&self) -> (LinkId, usize, u8) {
        (self.link, self.node, self.kind.tag())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DiagnosticKind::Supercritical { froude } => write!(
                f,
                "link {} node {}: Froude number {:.3} exceeds 0.9",
                self.link, self.node, froude
            ),
            DiagnosticKind::NegativeDepth { depth } => write!(
                f,
                "link {} node {}: negative depth {:.6}",
                self.link, self.node, depth
            ),
            DiagnosticKind::TableExtrapolation { depth, table_depth } => write!(
                f,
                "link {} node {}: depth {:.4} beyond breakpoint table range {:.4}, extrapolating",
                self.link, self.node, depth, table_depth
            ),
            DiagnosticKind::LakeBelowBed { elevation } => write!(
                f,
                "link {} node {}: lake elevation {:.4} fell below the lake bed",
                self.link, self.node, elevation
            ),
        }
    }
}
