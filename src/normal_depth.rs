//! Steady initial conditions: normal depth everywhere, or a standard-step
//! backwater profile computed upstream from the outlets.

use tracing::{debug, info};

use crate::boundary::{Boundaries, spill, usqot};
use crate::error::ConvergenceError;
use crate::network::{ChannelNetwork, Link, Node};
use crate::section::CrossSection;
use crate::state::ChannelState;

/// Bed slope used where the bed is flat or adverse.
pub const MIN_SLOPE: f64 = 1e-5;

const TOLERANCE: f64 = 1e-4;
const MAX_ITERATIONS: usize = 250;

/// Depth at which `K(d) sqrt(slope)` carries `discharge` (norm_calc).
///
/// Tabulated sections invert the table directly; analytic sections use
/// Newton's method on the conveyance.
pub fn normal_depth(
    node: &Node,
    discharge: f64,
    slope: f64,
    link: u32,
    number: usize,
) -> Result<f64, ConvergenceError> {
    if discharge <= 0.0 {
        return Ok(0.0);
    }
    let root = slope.max(MIN_SLOPE).sqrt();
    let target = discharge / root;

    if let CrossSection::Breakpoint(table) = &node.section {
        return Ok(table.depth_for_conveyance(target));
    }

    let failed = ConvergenceError::NormalDepth {
        link,
        node: number,
        iterations: MAX_ITERATIONS,
    };
    let mut depth = 1.0;
    for _ in 0..MAX_ITERATIONS {
        let Some(props) = node.section.properties(depth) else {
            return Err(failed);
        };
        if props.d_conveyance <= 0.0 {
            return Err(failed);
        }
        let mut next = depth - (props.conveyance - target) / props.d_conveyance;
        if next <= 0.0 {
            next = 0.5 * depth;
        }
        if (next - depth).abs() < TOLERANCE {
            return Ok(next);
        }
        depth = next;
    }
    Err(failed)
}

/// Steady discharge carried by every link: headwater inflow accumulated
/// down the tree, with lakes passing on their current spill.
pub fn steady_discharge(
    network: &ChannelNetwork,
    state: &ChannelState,
    boundaries: &Boundaries,
    time: f64,
) -> Vec<f64> {
    let mut flow = vec![0.0; network.links.len()];
    for &idx in &network.routing_order {
        let link = &network.links[idx];
        flow[idx] = match (&network.nodes[link.head()].section, link.lake) {
            (CrossSection::Reservoir(params), Some(lake)) => {
                spill(params, state.lakes[lake].elevation)
            }
            _ if link.depend.is_empty() => usqot(boundaries, idx, time),
            _ => link.depend.iter().map(|&up| flow[up]).sum(),
        };
    }
    flow
}

fn structure_head(link: &Link, discharge: f64, gravity: f64) -> f64 {
    let Some(crest) = link.crest else {
        return 0.0;
    };
    let coef = (2.0_f64 / 3.0).powf(1.5) * gravity.sqrt() * crest.width;
    if discharge <= 0.0 || coef <= 0.0 {
        return 0.0;
    }
    (discharge / coef).powf(2.0 / 3.0)
}

/// Uniform flow everywhere for the steady discharge.
pub fn uniform_flow(
    network: &ChannelNetwork,
    state: &mut ChannelState,
    boundaries: &Boundaries,
    time: f64,
) -> Result<(), ConvergenceError> {
    let flow = steady_discharge(network, state, boundaries, time);
    for (idx, link) in network.links.iter().enumerate() {
        let q = flow[idx];
        if let Some(lake) = link.lake {
            state.yp[link.head()] = state.lakes[lake].elevation;
            state.qp[link.head()] = q;
            continue;
        }
        for node in link.nodes() {
            let slope = network.bed_slope(idx, node);
            let number = node - link.first + 1;
            let depth = normal_depth(&network.nodes[node], q, slope, link.id, number)?;
            state.yp[node] = network.nodes[node].bel + depth;
            state.qp[node] = q;
        }
        if let Some(crest) = link.crest {
            state.yp[link.head()] =
                crest.elevation + structure_head(link, q, network.params.gravity);
        }
    }
    info!("Initialised {} links at normal depth", network.links.len());
    Ok(())
}

// Newton solve of the energy equation between a downstream node whose state
// is known and the node `dx` upstream of it.
fn energy_step(
    network: &ChannelNetwork,
    upstream: &Node,
    downstream: &Node,
    y_down: f64,
    q: f64,
) -> Option<f64> {
    let params = &network.params;
    let g = params.gravity;
    let alpha = params.alpha;
    let dx = params.delx;

    let down = downstream.section.properties(y_down - downstream.bel)?;
    let q2 = q * q;
    let head_down = y_down + alpha * q2 / (2.0 * g * down.area * down.area);
    let sf_down = q2 / (down.conveyance * down.conveyance);

    let mut depth = (y_down - upstream.bel).max(y_down - downstream.bel).max(0.1);
    for _ in 0..MAX_ITERATIONS {
        let p = upstream.section.properties(depth)?;
        let a = p.area;
        let k = p.conveyance;
        let residual = upstream.bel + depth + alpha * q2 / (2.0 * g * a * a)
            - head_down
            - 0.5 * dx * (q2 / (k * k) + sf_down);
        let slope = 1.0 - alpha * q2 * p.top_width / (g * a * a * a)
            + dx * q2 * p.d_conveyance / (k * k * k);
        if slope <= 0.0 {
            return None;
        }
        let mut next = depth - residual / slope;
        if next <= 0.0 {
            next = 0.5 * depth;
        }
        if (next - depth).abs() < TOLERANCE {
            return Some(next);
        }
        depth = next;
    }
    None
}

/// Standard-step backwater profile from the outlets upstream.
///
/// Each outlet starts at its normal depth. A tributary tail takes the water
/// surface of the confluence (or lake) below it, but never less than its
/// own normal depth, so a perched tributary still starts wet.
pub fn backwater(
    network: &ChannelNetwork,
    state: &mut ChannelState,
    boundaries: &Boundaries,
    time: f64,
) -> Result<(), ConvergenceError> {
    let flow = steady_discharge(network, state, boundaries, time);

    for &idx in network.routing_order.iter().rev() {
        let link = &network.links[idx];
        let q = flow[idx];
        if let Some(lake) = link.lake {
            state.yp[link.head()] = state.lakes[lake].elevation;
            state.qp[link.head()] = q;
            continue;
        }

        let tail = link.tail();
        let tail_node = &network.nodes[tail];
        let normal = tail_node.bel
            + normal_depth(tail_node, q, network.bed_slope(idx, tail), link.id, link.len)?;
        state.yp[tail] = match link.backdep {
            None => normal,
            Some(down) => state.yp[network.links[down].head()].max(normal),
        };
        state.qp[tail] = q;

        if let Some(crest) = link.crest {
            state.yp[link.head()] =
                crest.elevation + structure_head(link, q, network.params.gravity);
            state.qp[link.head()] = q;
            continue;
        }

        for node in (link.head()..tail).rev() {
            let depth = energy_step(
                network,
                &network.nodes[node],
                &network.nodes[node + 1],
                state.yp[node + 1],
                q,
            )
            .ok_or(ConvergenceError::Backwater {
                link: link.id,
                node: node - link.first + 1,
            })?;
            state.yp[node] = network.nodes[node].bel + depth;
            state.qp[node] = q;
        }
        debug!("Backwater profile on link {} from {:.3}", link.id, state.yp[tail]);
    }
    info!("Initialised {} links from backwater profiles", network.links.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LinkType;
    use crate::network::tests::{params, trapezoid_nodes};
    use crate::section::{BreakpointTable, TableRow};
    use std::sync::Arc;

    fn single(nodes: Vec<Node>) -> ChannelNetwork {
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(1, LinkType::Trapezoidal, vec![], None, nodes);
        net.finalize().unwrap()
    }

    #[test]
    fn normal_depth_carries_the_discharge() {
        let node = &trapezoid_nodes(1, 100.0, 0.001, 100.0)[0];
        let depth = normal_depth(node, 5.0, 0.001, 1, 1).unwrap();
        let props = node.section.properties(depth).unwrap();
        assert!((props.conveyance * 0.001_f64.sqrt() - 5.0).abs() < 1e-3);
        assert!((depth - 1.51).abs() < 0.02);
    }

    #[test]
    fn dry_link_has_zero_depth() {
        let node = &trapezoid_nodes(1, 100.0, 0.001, 100.0)[0];
        assert_eq!(normal_depth(node, 0.0, 0.001, 1, 1).unwrap(), 0.0);
    }

    #[test]
    fn table_normal_depth_inverts_conveyance() {
        let rows = (1..=6)
            .map(|i| TableRow {
                area: 2.0 * i as f64,
                top_width: 4.0,
                conveyance: 30.0 * i as f64,
            })
            .collect();
        let table = Arc::new(BreakpointTable::new(1, 0.5, rows).unwrap());
        let node = Node {
            bel: 0.0,
            chn_dep: 3.0,
            section: CrossSection::Breakpoint(table),
        };
        // K = 45 lies halfway between the first two rows
        let depth = normal_depth(&node, 45.0 * 0.01, 1e-4, 1, 1).unwrap();
        assert!((depth - 0.75).abs() < 1e-9);
    }

    #[test]
    fn uniform_flow_accumulates_at_junctions() {
        let mut net = ChannelNetwork::new(params(3));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(3, 101.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(3, 101.0, 0.001, 100.0),
        );
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![1, 2],
            None,
            trapezoid_nodes(3, 100.7, 0.001, 100.0),
        );
        let net = net.finalize().unwrap();

        let boundaries = Boundaries::constant(5.0);
        let mut state = ChannelState::new(&net);
        uniform_flow(&net, &mut state, &boundaries, 0.0).unwrap();
        let main = net.link(3).unwrap();
        assert!((state.qp[main.head()] - 10.0).abs() < 1e-12);
        assert!(state.depth(&net, main.head()) > state.depth(&net, 0));
    }

    #[test]
    fn backwater_over_uniform_reach_stays_at_normal_depth() {
        let net = single(trapezoid_nodes(10, 100.0, 0.001, 100.0));
        let boundaries = Boundaries::constant(5.0);

        let mut uniform = ChannelState::new(&net);
        uniform_flow(&net, &mut uniform, &boundaries, 0.0).unwrap();
        let mut profile = ChannelState::new(&net);
        backwater(&net, &mut profile, &boundaries, 0.0).unwrap();

        for node in 0..net.nodes.len() {
            assert!((profile.yp[node] - uniform.yp[node]).abs() < 1e-3);
        }
    }

    #[test]
    fn backwater_rises_behind_a_high_confluence() {
        let mut net = ChannelNetwork::new(params(3));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(5, 101.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(5, 101.0, 0.001, 100.0),
        );
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![1, 2],
            None,
            trapezoid_nodes(5, 100.6, 0.0001, 100.0),
        );
        let net = net.finalize().unwrap();

        let boundaries = Boundaries::constant(5.0);
        let mut state = ChannelState::new(&net);
        backwater(&net, &mut state, &boundaries, 0.0).unwrap();

        let trib = net.link(1).unwrap();
        let main = net.link(3).unwrap();
        assert_eq!(state.yp[trib.tail()], state.yp[main.head()]);
        // the flat main stem ponds water into the tributary
        let normal = normal_depth(&net.nodes[trib.head()], 5.0, 0.001, 1, 1).unwrap();
        assert!(state.depth(&net, trib.tail()) > normal);
        for node in trib.nodes() {
            assert!(state.depth(&net, node) > 0.0);
        }
    }
}
