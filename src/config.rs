use std::path::PathBuf;

use crate::error::ConfigError;

// Global parameters from the channel network file header
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParams {
    pub gravity: f64,
    /// momentum / energy correction coefficient on the convective terms
    pub alpha: f64,
    /// friction weight given to the upstream end when the `bet` upwinding kicks in
    pub beta: f64,
    /// implicit time weighting of the box scheme
    pub theta: f64,
    pub delx: f64,
    /// seconds
    pub delt: f64,
    /// total simulated time, seconds
    pub tt: f64,
    /// base headwater inflow and cold-start discharge
    pub qmin: f64,
    pub nlinks: usize,
    pub maxnodes: usize,
}

impl SolverParams {
    /// Total number of steps implied by `tt` and `delt`.
    pub fn step_count(&self) -> usize {
        if self.delt <= 0.0 {
            return 0;
        }
        (self.tt / self.delt).round().max(0.0) as usize
    }
}

/// Newton iteration control for one `flow_route` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    pub max_iterations: usize,
    /// Stop early once every stage and discharge correction is below this.
    pub residual_tolerance: Option<f64>,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        ConvergencePolicy {
            max_iterations: 2,
            residual_tolerance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialCondition {
    /// Uniform flow for the steady accumulated discharge.
    NormalDepth,
    /// Standard-step profile from the outlet normal depth (drain runs only).
    Backwater,
    /// Cold start from stage and discharge profile files.
    Profiles { stage: PathBuf, discharge: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletBoundary {
    /// Normal-depth rating curve `Q = K(y) sqrt(S0)`.
    NormalDepth,
    /// Water-surface time series imposed at the outlet.
    StageTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Pure drainage run: lateral inflow is switched off.
    pub drain: bool,
    pub initial: InitialCondition,
    pub outlet: OutletBoundary,
    pub convergence: ConvergencePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            drain: false,
            initial: InitialCondition::NormalDepth,
            outlet: OutletBoundary::NormalDepth,
            convergence: ConvergencePolicy::default(),
        }
    }
}

impl RunConfig {
    /// Whether overland lateral inflow enters the continuity equation.
    pub fn lateral(&self) -> bool {
        !self.drain
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial == InitialCondition::Backwater && !self.drain {
            return Err(ConfigError::ConflictingModes(
                "backwater initialisation is only available in drain mode".into(),
            ));
        }
        if self.drain && self.outlet != OutletBoundary::StageTarget {
            return Err(ConfigError::ConflictingModes(
                "drain mode needs a stage target at the outlet".into(),
            ));
        }
        if self.convergence.max_iterations == 0 {
            return Err(ConfigError::ConflictingModes(
                "at least one Newton iteration is required".into(),
            ));
        }
        Ok(())
    }
}

// Output format configuration
#[derive(Debug, Clone)]
pub enum OutputFormat {
    Csv,
    NetCdf,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_two_fixed_iterations() {
        let policy = ConvergencePolicy::default();
        assert_eq!(policy.max_iterations, 2);
        assert!(policy.residual_tolerance.is_none());
    }

    #[test]
    fn backwater_needs_drain() {
        let config = RunConfig {
            initial: InitialCondition::Backwater,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConflictingModes(_))
        ));

        let config = RunConfig {
            drain: true,
            initial: InitialCondition::Backwater,
            outlet: OutletBoundary::StageTarget,
            ..RunConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.lateral());
    }

    #[test]
    fn drain_needs_stage_target() {
        let config = RunConfig {
            drain: true,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
