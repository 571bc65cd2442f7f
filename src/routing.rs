use std::collections::HashSet;

use rayon::prelude::*;
use tracing::{debug, error, warn};

use crate::boundary::{Boundaries, dsyot, rating_curve, spill, usqot};
use crate::coeff::{FROUDE_WARNING, SegmentState, coeff, froude_number, weir_coeff};
use crate::config::{ConvergencePolicy, OutletBoundary};
use crate::error::{ConfigError, Diagnostic, DiagnosticKind, Severity, SolverError};
use crate::network::{ChannelNetwork, LinkId};
use crate::normal_depth::MIN_SLOPE;
use crate::reservoir::reservoir;
use crate::section::{CrossSection, SectionProps};
use crate::state::ChannelState;

/// What happened during one `flow_route` call.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub diagnostics: Vec<Diagnostic>,
    pub iterations: usize,
    /// largest stage or discharge correction of the last iteration
    pub max_correction: f64,
    seen: HashSet<(LinkId, usize, u8)>,
}

impl RouteReport {
    // one entry per node and kind
    pub(crate) fn record(&mut self, diagnostic: Diagnostic) {
        if !self.seen.insert(diagnostic.key()) {
            return;
        }
        match diagnostic.severity {
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Fatal => error!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

/// Evaluate every node's section at the given water-surface elevations.
pub fn section(network: &ChannelNetwork, elevations: &[f64], out: &mut [SectionProps]) {
    out.par_iter_mut().enumerate().for_each(|(i, props)| {
        let node = &network.nodes[i];
        *props = node
            .section
            .properties(elevations[i] - node.bel)
            .unwrap_or_default();
    });
}

/// Implicit double-sweep solver over the whole channel network.
///
/// Holds only scratch arrays sized from the network; the persistent state
/// lives in [`ChannelState`] and is handed in on every call.
pub struct NetworkSolver {
    policy: ConvergencePolicy,
    node_link: Vec<usize>,
    q: Vec<f64>,
    y: Vec<f64>,
    props: Vec<SectionProps>,
    props_old: Vec<SectionProps>,
    e: Vec<f64>,
    f: Vec<f64>,
    l: Vec<f64>,
    m: Vec<f64>,
    nn: Vec<f64>,
    dy: Vec<f64>,
    dq: Vec<f64>,
}

impl NetworkSolver {
    pub fn new(network: &ChannelNetwork, policy: ConvergencePolicy) -> Self {
        let count = network.nodes.len();
        let mut node_link = vec![0; count];
        for (idx, link) in network.links.iter().enumerate() {
            for node in link.nodes() {
                node_link[node] = idx;
            }
        }
        NetworkSolver {
            policy,
            node_link,
            q: vec![0.0; count],
            y: vec![0.0; count],
            props: vec![SectionProps::default(); count],
            props_old: vec![SectionProps::default(); count],
            e: vec![0.0; count],
            f: vec![0.0; count],
            l: vec![0.0; count],
            m: vec![0.0; count],
            nn: vec![0.0; count],
            dy: vec![0.0; count],
            dq: vec![0.0; count],
        }
    }

    // link id and 1-based node number of an arena node
    fn locate(&self, network: &ChannelNetwork, node: usize) -> (LinkId, usize) {
        let link = &network.links[self.node_link[node]];
        (link.id, node - link.first + 1)
    }

    /// Advance the channel network from `time - delt` to `time`.
    ///
    /// Negative depths are reported as fatal diagnostics but the state is
    /// still committed; deciding whether to stop is up to the caller.
    pub fn flow_route(
        &mut self,
        network: &ChannelNetwork,
        state: &mut ChannelState,
        boundaries: &Boundaries,
        time: f64,
        lateral: bool,
        outlet: OutletBoundary,
    ) -> Result<RouteReport, SolverError> {
        let mut report = RouteReport::default();

        self.q.copy_from_slice(&state.qp);
        self.y.copy_from_slice(&state.yp);
        section(network, &state.yp, &mut self.props_old);

        for iteration in 0..self.policy.max_iterations {
            section(network, &self.y, &mut self.props);
            self.flag_extrapolation(network, &mut report);

            self.forward_sweep(network, state, boundaries, time, lateral, &mut report);
            self.backward_sweep(network, state, boundaries, time, outlet)?;

            let mut largest: f64 = 0.0;
            for link in network.links.iter().filter(|l| !l.is_reservoir()) {
                for node in link.nodes() {
                    self.y[node] += self.dy[node];
                    self.q[node] += self.dq[node];
                    largest = largest.max(self.dy[node].abs()).max(self.dq[node].abs());

                    let depth = self.y[node] - network.nodes[node].bel;
                    if depth < 0.0 {
                        let (id, number) = self.locate(network, node);
                        report.record(Diagnostic::new(
                            id,
                            number,
                            DiagnosticKind::NegativeDepth { depth },
                        ));
                    }
                }
            }

            report.iterations = iteration + 1;
            report.max_correction = largest;
            debug!("Newton iteration {}: max correction {:.3e}", iteration + 1, largest);

            if let Some(tolerance) = self.policy.residual_tolerance {
                if largest < tolerance {
                    break;
                }
            }
        }

        // lakes advance by mass balance on the converged channel flows, in
        // routing order so a lake sees the release of any lake above it
        for &idx in &network.routing_order {
            let link = &network.links[idx];
            if !link.is_reservoir() {
                continue;
            }
            if let Some(diagnostic) = reservoir(network, link, &mut self.q, state) {
                report.record(diagnostic);
            }
        }

        state.qp.copy_from_slice(&self.q);
        for link in network.links.iter().filter(|l| !l.is_reservoir()) {
            for node in link.nodes() {
                state.yp[node] = self.y[node];
            }
        }

        Ok(report)
    }

    fn flag_extrapolation(&self, network: &ChannelNetwork, report: &mut RouteReport) {
        for (node, props) in self.props.iter().enumerate() {
            if !props.extrapolated {
                continue;
            }
            if let CrossSection::Breakpoint(table) = &network.nodes[node].section {
                let (id, number) = self.locate(network, node);
                report.record(Diagnostic::new(
                    id,
                    number,
                    DiagnosticKind::TableExtrapolation {
                        depth: self.y[node] - network.nodes[node].bel,
                        table_depth: table.max_depth(),
                    },
                ));
            }
        }
    }

    // elimination coefficients (E, F) at the head node of link `idx`
    fn upstream_condition(
        &self,
        network: &ChannelNetwork,
        state: &ChannelState,
        boundaries: &Boundaries,
        idx: usize,
        time: f64,
    ) -> (f64, f64) {
        let link = &network.links[idx];
        let head = link.head();
        match link.depend.as_slice() {
            [] => (0.0, usqot(boundaries, idx, time) - self.q[head]),
            [up] if network.links[*up].is_reservoir() => {
                let lake_link = &network.links[*up];
                let outflow = match (&network.nodes[lake_link.head()].section, lake_link.lake) {
                    (CrossSection::Reservoir(params), Some(lake)) => {
                        spill(params, state.lakes[lake].elevation)
                    }
                    _ => 0.0,
                };
                (0.0, outflow - self.q[head])
            }
            tributaries => {
                // water surface is continuous across the junction, so the
                // tributary tails combine as a plain sum
                let mut e = 0.0;
                let mut f = 0.0;
                for &trib in tributaries {
                    let tail = network.links[trib].tail();
                    e += self.e[tail];
                    f += self.e[tail] * (self.y[head] - self.y[tail]) + self.f[tail] + self.q[tail];
                }
                (e, f - self.q[head])
            }
        }
    }

    fn forward_sweep(
        &mut self,
        network: &ChannelNetwork,
        state: &ChannelState,
        boundaries: &Boundaries,
        time: f64,
        lateral: bool,
        report: &mut RouteReport,
    ) {
        let params = &network.params;

        for &idx in &network.routing_order {
            let link = &network.links[idx];
            if link.is_reservoir() {
                continue;
            }
            let (e0, f0) = self.upstream_condition(network, state, boundaries, idx, time);
            self.e[link.head()] = e0;
            self.f[link.head()] = f0;

            let tail = link.tail();
            for j in link.head()..tail {
                let seg = SegmentState {
                    q: [self.q[j], self.q[j + 1]],
                    y: [self.y[j], self.y[j + 1]],
                    qp: [state.qp[j], state.qp[j + 1]],
                    yp: [state.yp[j], state.yp[j + 1]],
                };
                let c = match &link.crest {
                    Some(crest) => weir_coeff(params, crest, &seg),
                    None => {
                        let tail_inflow = if j + 1 == tail { state.qlat[tail] } else { 0.0 };
                        let qlat = state.qlat[j] + tail_inflow;
                        coeff(
                            params,
                            &seg,
                            [&self.props[j], &self.props[j + 1]],
                            [&self.props_old[j], &self.props_old[j + 1]],
                            qlat,
                            lateral,
                        )
                    }
                };

                let alpha = c.a * self.e[j] + c.b;
                let l = -c.d / alpha;
                let m = -c.c / alpha;
                let nn = (c.g - c.a * self.f[j]) / alpha;
                let alpha_p = c.ap * self.e[j] + c.bp;
                let denom = alpha_p * m + c.cp;

                self.l[j] = l;
                self.m[j] = m;
                self.nn[j] = nn;
                self.e[j + 1] = -(alpha_p * l + c.dp) / denom;
                self.f[j + 1] = (c.gp - c.ap * self.f[j] - alpha_p * nn) / denom;

                // structures run supercritical on purpose
                if link.crest.is_none() {
                    for node in [j, j + 1] {
                        let froude = froude_number(self.q[node], &self.props[node], params.gravity);
                        if froude > FROUDE_WARNING {
                            let (id, number) = self.locate(network, node);
                            report.record(Diagnostic::new(
                                id,
                                number,
                                DiagnosticKind::Supercritical { froude },
                            ));
                        }
                    }
                }
            }
        }
    }

    fn backward_sweep(
        &mut self,
        network: &ChannelNetwork,
        state: &ChannelState,
        boundaries: &Boundaries,
        time: f64,
        outlet: OutletBoundary,
    ) -> Result<(), SolverError> {
        for &idx in network.routing_order.iter().rev() {
            let link = &network.links[idx];
            if link.is_reservoir() {
                continue;
            }
            let tail = link.tail();

            let dy_tail = match link.backdep {
                None => self.outlet_correction(network, boundaries, idx, time, outlet)?,
                Some(down) if network.links[down].is_reservoir() => {
                    let lake = network.links[down].lake.unwrap_or_default();
                    state.lakes[lake].elevation - self.y[tail]
                }
                Some(down) => {
                    let head = network.links[down].head();
                    self.y[head] + self.dy[head] - self.y[tail]
                }
            };

            self.dy[tail] = dy_tail;
            self.dq[tail] = self.e[tail] * dy_tail + self.f[tail];
            for j in (link.head()..tail).rev() {
                self.dy[j] = self.l[j] * self.dy[j + 1] + self.m[j] * self.dq[j + 1] + self.nn[j];
                self.dq[j] = self.e[j] * self.dy[j] + self.f[j];
            }
        }
        Ok(())
    }

    fn outlet_correction(
        &self,
        network: &ChannelNetwork,
        boundaries: &Boundaries,
        idx: usize,
        time: f64,
        outlet: OutletBoundary,
    ) -> Result<f64, SolverError> {
        let tail = network.links[idx].tail();
        match outlet {
            OutletBoundary::NormalDepth => {
                let slope = network.bed_slope(idx, tail).max(MIN_SLOPE);
                let rating = rating_curve(&self.props[tail], slope);
                let denom = self.e[tail] - rating.d_discharge;
                Ok((rating.discharge - self.q[tail] - self.f[tail]) / denom)
            }
            OutletBoundary::StageTarget => {
                let target = dsyot(boundaries, time).ok_or_else(|| {
                    ConfigError::ConflictingModes(
                        "stage-target outlet requested without a stage series".into(),
                    )
                })?;
                Ok(target - self.y[tail])
            }
        }
    }
}
