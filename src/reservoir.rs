use tracing::trace;

use crate::boundary::spill;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::network::{ChannelNetwork, Link};
use crate::section::CrossSection;
use crate::state::ChannelState;

/// Advance one lake by explicit mass balance over the step just solved.
///
/// `q_new` holds the end-of-step discharges; `state.qp` still holds the
/// start-of-step ones, so this must run before the step is committed.
/// Inflows and outflow are weighted by `theta` exactly as in the channel
/// continuity equation.
///
/// Below a channel link the outflow is whatever that link's head carries.
/// A lake at an outlet, or one spilling into another lake, releases its
/// spillway discharge, evaluated at a level predicted from the start-of-step
/// outflow. The end-of-step outflow is left in `q_new` at the lake node.
pub fn reservoir(
    network: &ChannelNetwork,
    link: &Link,
    q_new: &mut [f64],
    state: &mut ChannelState,
) -> Option<Diagnostic> {
    let node = link.head();
    let section = &network.nodes[node].section;
    let (Some(lake), CrossSection::Reservoir(params)) = (link.lake, section) else {
        return None;
    };
    let theta = network.params.theta;
    let dt = network.params.delt;
    let bed = network.nodes[node].bel;
    let ends: &[f64] = q_new;
    let weighted = |n: usize| theta * ends[n] + (1.0 - theta) * state.qp[n];

    let inflow: f64 = link
        .depend
        .iter()
        .map(|&up| weighted(network.links[up].tail()))
        .sum();
    let lake_state = &state.lakes[lake];
    let external = lake_state.qtolake + lake_state.rainfall * params.surface_area;
    let level = lake_state.elevation;

    let channel_below = link
        .backdep
        .filter(|&down| !network.links[down].is_reservoir())
        .map(|down| network.links[down].head());
    let (outflow, released) = match channel_below {
        Some(head) => (weighted(head), ends[head]),
        None => {
            let before = state.qp[node];
            let predicted = level + dt * (inflow + external - before) / params.surface_area;
            let released = spill(params, predicted.max(bed));
            (theta * released + (1.0 - theta) * before, released)
        }
    };

    let mut elevation = level + dt * (inflow + external - outflow) / params.surface_area;
    let mut diagnostic = None;
    if elevation < bed {
        diagnostic = Some(Diagnostic::new(
            link.id,
            1,
            DiagnosticKind::LakeBelowBed { elevation },
        ));
        elevation = bed;
    }

    trace!(
        "lake {}: in {:.4} out {:.4} external {:.4} -> {:.4}",
        link.id, inflow, outflow, external, elevation
    );

    state.lakes[lake].elevation = elevation;
    state.yp[node] = elevation;
    q_new[node] = released;
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::{params, trapezoid_nodes};
    use crate::network::{LinkType, Node};
    use crate::section::ReservoirParams;

    fn lake_network() -> ChannelNetwork {
        let mut net = ChannelNetwork::new(params(3));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(2),
            trapezoid_nodes(3, 110.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Reservoir,
            vec![1],
            Some(3),
            vec![Node {
                bel: 100.0,
                chn_dep: 0.0,
                section: CrossSection::Reservoir(ReservoirParams {
                    surface_area: 6e4,
                    crest: 105.0,
                    spill_width: 10.0,
                    spill_coeff: 1.7,
                }),
            }],
        );
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![2],
            None,
            trapezoid_nodes(3, 104.0, 0.001, 100.0),
        );
        net.finalize().unwrap()
    }

    #[test]
    fn lake_rises_by_net_inflow() {
        let net = lake_network();
        let mut state = ChannelState::new(&net);
        let inflow_tail = net.link(1).unwrap().tail();
        let outflow_head = net.link(3).unwrap().head();
        state.qp[inflow_tail] = 10.0;
        state.qp[outflow_head] = 4.0;
        state.lakes[0].qtolake = 2.0;

        let mut q_new = state.qp.clone();
        q_new[inflow_tail] = 20.0;
        q_new[outflow_head] = 4.0;

        let link = net.link(2).unwrap().clone();
        assert!(reservoir(&net, &link, &mut q_new, &mut state).is_none());

        // theta-weighted inflow 0.6 * 20 + 0.4 * 10 = 16, outflow 4, overland 2
        let expected = 105.0 + 60.0 * (16.0 + 2.0 - 4.0) / 6e4;
        assert!((state.lakes[0].elevation - expected).abs() < 1e-12);
        assert_eq!(state.yp[link.head()], state.lakes[0].elevation);
        assert_eq!(q_new[link.head()], 4.0);
    }

    fn outlet_lake(surface_area: f64) -> (ChannelNetwork, ReservoirParams) {
        let lake = ReservoirParams {
            surface_area,
            crest: 105.0,
            spill_width: 10.0,
            spill_coeff: 1.7,
        };
        let mut net = ChannelNetwork::new(params(2));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(2),
            trapezoid_nodes(3, 110.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Reservoir,
            vec![1],
            None,
            vec![Node {
                bel: 100.0,
                chn_dep: 0.0,
                section: CrossSection::Reservoir(lake),
            }],
        );
        (net.finalize().unwrap(), lake)
    }

    #[test]
    fn outlet_lake_drains_over_its_spillway() {
        let (net, lake) = outlet_lake(1e4);
        let link = net.link(2).unwrap().clone();
        let node = link.head();
        let mut state = ChannelState::new(&net);
        state.lakes[0].elevation = 106.0;
        state.qp[node] = spill(&lake, 106.0);
        let mut q_new = state.qp.clone();

        assert!(reservoir(&net, &link, &mut q_new, &mut state).is_none());

        let before = spill(&lake, 106.0);
        let released = spill(&lake, 106.0 - 60.0 * before / 1e4);
        let expected = 106.0 - 60.0 * (0.6 * released + 0.4 * before) / 1e4;
        assert!((state.lakes[0].elevation - expected).abs() < 1e-12);
        assert!(state.lakes[0].elevation < 105.95);
        assert_eq!(q_new[node], released);
        assert_eq!(state.yp[node], state.lakes[0].elevation);
    }

    #[test]
    fn lake_below_crest_holds_its_water() {
        let (net, _) = outlet_lake(1e4);
        let link = net.link(2).unwrap().clone();
        let mut state = ChannelState::new(&net);
        state.lakes[0].elevation = 104.0;
        let mut q_new = state.qp.clone();

        reservoir(&net, &link, &mut q_new, &mut state);
        assert_eq!(state.lakes[0].elevation, 104.0);
        assert_eq!(q_new[link.head()], 0.0);
    }

    #[test]
    fn lake_never_drops_below_bed() {
        let net = lake_network();
        let mut state = ChannelState::new(&net);
        state.lakes[0].elevation = 100.001;
        let outflow_head = net.link(3).unwrap().head();
        let mut q_new = state.qp.clone();
        q_new[outflow_head] = 500.0;
        state.qp[outflow_head] = 500.0;

        let link = net.link(2).unwrap().clone();
        let diagnostic = reservoir(&net, &link, &mut q_new, &mut state).unwrap();
        assert!(matches!(diagnostic.kind, DiagnosticKind::LakeBelowBed { .. }));
        assert_eq!(state.lakes[0].elevation, 100.0);
    }
}
