use tracing::{info, warn};

use crate::boundary::Boundaries;
use crate::config::{InitialCondition, OutletBoundary, RunConfig};
use crate::error::{ConfigError, ConvergenceError, PhysicalInvariantViolation, SolverError};
use crate::io::profile::read_profiles;
use crate::network::{ChannelNetwork, LinkId};
use crate::normal_depth::{backwater, uniform_flow};
use crate::routing::{NetworkSolver, RouteReport};
use crate::section::CrossSection;
use crate::state::ChannelState;

/// Largest allowed mismatch between the channel and overland time steps, s.
pub const TIME_STEP_TOLERANCE: f64 = 1e-3;

/// Running water budget of the network, in m3.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MassBalance {
    pub initial_storage: f64,
    pub storage: f64,
    /// headwater inflow, lateral inflow, lake inputs and exchanged volumes
    pub inflow: f64,
    /// outlet discharge
    pub outflow: f64,
}

impl MassBalance {
    /// Volume created (positive) or lost (negative) by the scheme.
    pub fn residual(&self) -> f64 {
        (self.storage - self.initial_storage) - (self.inflow - self.outflow)
    }

    pub fn percent_error(&self) -> f64 {
        let scale = self.inflow.max(self.initial_storage);
        if scale <= 0.0 {
            return 0.0;
        }
        100.0 * self.residual() / scale
    }
}

/// Water stored in channel links and lakes. Structure links hold no storage.
pub fn storage(network: &ChannelNetwork, state: &ChannelState) -> f64 {
    let dx = network.params.delx;
    let mut total = 0.0;
    for link in &network.links {
        if let Some(lake) = link.lake {
            if let CrossSection::Reservoir(params) = &network.nodes[link.head()].section {
                total += (state.lakes[lake].elevation - network.nodes[link.head()].bel)
                    * params.surface_area;
            }
            continue;
        }
        if link.crest.is_some() {
            continue;
        }
        let areas: Vec<f64> = link
            .nodes()
            .map(|n| {
                network.nodes[n]
                    .section
                    .properties(state.depth(network, n))
                    .map(|p| p.area)
                    .unwrap_or(0.0)
            })
            .collect();
        total += areas.windows(2).map(|w| 0.5 * dx * (w[0] + w[1])).sum::<f64>();
    }
    total
}

/// Owns the network, its state and the solver for a whole run.
pub struct Simulation {
    network: ChannelNetwork,
    state: ChannelState,
    boundaries: Boundaries,
    config: RunConfig,
    solver: NetworkSolver,
    time: f64,
    steps: usize,
    balance: MassBalance,
}

impl Simulation {
    /// Check the run configuration and build the initial state it asks for.
    pub fn new(
        network: ChannelNetwork,
        boundaries: Boundaries,
        config: RunConfig,
        overland_dt: f64,
    ) -> Result<Self, SolverError> {
        let mut state = ChannelState::new(&network);
        check_run(&network, &boundaries, &config, overland_dt)?;
        match &config.initial {
            InitialCondition::NormalDepth => uniform_flow(&network, &mut state, &boundaries, 0.0)?,
            InitialCondition::Backwater => backwater(&network, &mut state, &boundaries, 0.0)?,
            InitialCondition::Profiles { stage, discharge } => {
                read_profiles(&network, &mut state, stage, discharge)?
            }
        }
        Ok(Self::assemble(network, state, boundaries, config))
    }

    /// Start from a state prepared by the caller, e.g. by an overland model.
    pub fn with_state(
        network: ChannelNetwork,
        state: ChannelState,
        boundaries: Boundaries,
        config: RunConfig,
        overland_dt: f64,
    ) -> Result<Self, SolverError> {
        check_run(&network, &boundaries, &config, overland_dt)?;
        if state.yp.len() != network.nodes.len() || state.lakes.len() != network.lake_count() {
            return Err(ConfigError::InvalidNetwork(
                "initial state does not match the network".into(),
            )
            .into());
        }
        Ok(Self::assemble(network, state, boundaries, config))
    }

    fn assemble(
        network: ChannelNetwork,
        state: ChannelState,
        boundaries: Boundaries,
        config: RunConfig,
    ) -> Self {
        let solver = NetworkSolver::new(&network, config.convergence);
        let initial = storage(&network, &state);
        Simulation {
            network,
            state,
            boundaries,
            config,
            solver,
            time: 0.0,
            steps: 0,
            balance: MassBalance {
                initial_storage: initial,
                storage: initial,
                ..MassBalance::default()
            },
        }
    }

    pub fn network(&self) -> &ChannelNetwork {
        &self.network
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Mutable access for the overland coupling (lateral inflow, lake inputs).
    pub fn state_mut(&mut self) -> &mut ChannelState {
        &mut self.state
    }

    pub fn boundaries_mut(&mut self) -> &mut Boundaries {
        &mut self.boundaries
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn mass_balance(&self) -> MassBalance {
        self.balance
    }

    // boundary discharges at the current state: (headwater inflow, outlet outflow)
    fn boundary_flows(&self) -> (f64, f64) {
        let inflow = self
            .network
            .links
            .iter()
            .filter(|l| l.depend.is_empty() && !l.is_reservoir())
            .map(|l| self.state.qp[l.head()])
            .sum();
        let outflow = self
            .network
            .outlets()
            .map(|idx| {
                let link = &self.network.links[idx];
                self.state.qp[link.tail()]
            })
            .sum();
        (inflow, outflow)
    }

    fn external_inflow(&self) -> f64 {
        let lateral: f64 = if self.config.lateral() {
            self.network
                .links
                .iter()
                .filter(|l| l.crest.is_none() && !l.is_reservoir())
                .flat_map(|l| l.nodes())
                .map(|n| self.state.qlat[n])
                .sum()
        } else {
            0.0
        };
        let lakes: f64 = self
            .network
            .links
            .iter()
            .filter_map(|l| {
                let lake = l.lake?;
                match &self.network.nodes[l.head()].section {
                    CrossSection::Reservoir(p) => {
                        let s = &self.state.lakes[lake];
                        Some(s.qtolake + s.rainfall * p.surface_area)
                    }
                    _ => None,
                }
            })
            .sum();
        lateral + lakes
    }

    /// Advance one channel time step.
    pub fn step(&mut self) -> Result<RouteReport, SolverError> {
        let dt = self.network.params.delt;
        let theta = self.network.params.theta;
        let time = self.time + dt;

        let (in_old, out_old) = self.boundary_flows();
        let external = self.external_inflow();

        let report = self.solver.flow_route(
            &self.network,
            &mut self.state,
            &self.boundaries,
            time,
            self.config.lateral(),
            self.config.outlet,
        )?;

        let (in_new, out_new) = self.boundary_flows();
        self.balance.inflow += dt * (theta * in_new + (1.0 - theta) * in_old + external);
        self.balance.outflow += dt * (theta * out_new + (1.0 - theta) * out_old);
        self.balance.storage = storage(&self.network, &self.state);

        self.time = time;
        self.steps += 1;
        self.check_depths()?;
        Ok(report)
    }

    /// Run `count` steps, handing every report to `on_step`.
    pub fn run<F>(&mut self, count: usize, mut on_step: F) -> Result<(), SolverError>
    where
        F: FnMut(&Simulation, &RouteReport),
    {
        for _ in 0..count {
            let report = self.step()?;
            on_step(self, &report);
        }
        Ok(())
    }

    fn check_depths(&self) -> Result<(), PhysicalInvariantViolation> {
        for link in self.network.links.iter().filter(|l| !l.is_reservoir()) {
            for node in link.nodes() {
                let depth = self.state.depth(&self.network, node);
                if depth < 0.0 {
                    return Err(PhysicalInvariantViolation {
                        link: link.id,
                        node: node - link.first + 1,
                        depth,
                        time: self.time,
                    });
                }
            }
        }
        Ok(())
    }

    /// Add `volume` m3 of water to the reach around a node (negative to
    /// remove it) and return the new depth. Used by the overland coupling
    /// for channel overflow and infiltration.
    pub fn exchange_volume(
        &mut self,
        link: LinkId,
        node: usize,
        volume: f64,
    ) -> Result<f64, SolverError> {
        let idx = self.network.node_index(link, node).ok_or_else(|| {
            ConfigError::InvalidNetwork(format!("link {} has no node {}", link, node))
        })?;
        let section = &self.network.nodes[idx].section;
        if section.is_reservoir() {
            return Err(ConfigError::InvalidNetwork(format!(
                "link {} node {} is a lake; its volume is carried by the lake state",
                link, node
            ))
            .into());
        }
        let area = section
            .properties(self.state.depth(&self.network, idx))
            .map_or(0.0, |p| p.area);

        let target = area + volume / self.network.params.delx;
        let removed = if target < 0.0 { -area * self.network.params.delx } else { volume };
        let depth = section.depth_for_area(target.max(0.0)).ok_or(match section {
            CrossSection::Trapezoidal { .. } => {
                ConvergenceError::NegativeDiscriminant { link, node }
            }
            _ => ConvergenceError::AreaNotBracketed { link, node },
        })?;

        self.state.yp[idx] = self.network.nodes[idx].bel + depth;
        self.balance.inflow += removed;
        self.balance.storage = storage(&self.network, &self.state);
        Ok(depth)
    }

    pub fn report_mass_balance(&self) {
        let b = self.balance;
        info!(
            "Mass balance: initial {:.3} m3, final {:.3} m3, in {:.3} m3, out {:.3} m3",
            b.initial_storage, b.storage, b.inflow, b.outflow
        );
        let error = b.percent_error();
        if error.abs() > 1.0 {
            warn!("Mass balance error {:.3} %", error);
        } else {
            info!("Mass balance error {:.4} %", error);
        }
    }
}

fn check_run(
    network: &ChannelNetwork,
    boundaries: &Boundaries,
    config: &RunConfig,
    overland_dt: f64,
) -> Result<(), ConfigError> {
    config.validate()?;
    let channel = network.params.delt;
    if (channel - overland_dt).abs() > TIME_STEP_TOLERANCE {
        return Err(ConfigError::TimeStepMismatch {
            channel,
            overland: overland_dt,
        });
    }
    if config.outlet == OutletBoundary::StageTarget
        && boundaries.stage_target.is_none()
    {
        return Err(ConfigError::ConflictingModes(
            "stage-target outlet requested without a stage series".into(),
        ));
    }
    Ok(())
}
