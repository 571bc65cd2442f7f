use crate::network::ChannelNetwork;
use crate::section::CrossSection;

// State of one lake between time steps
#[derive(Debug, Clone, PartialEq)]
pub struct LakeState {
    pub elevation: f64,
    /// category of the lake in the lake raster
    pub category: i32,
    /// number of raster cells covered by the lake
    pub cells: usize,
    /// overland inflow into the lake, m3/s (set by the overland model)
    pub qtolake: f64,
    /// rainfall rate on the lake surface, m/s
    pub rainfall: f64,
}

impl LakeState {
    pub fn new(elevation: f64, category: i32) -> Self {
        LakeState {
            elevation,
            category,
            cells: 0,
            qtolake: 0.0,
            rainfall: 0.0,
        }
    }
}

/// Persistent channel state, owned by the caller and shared with the
/// overland coupling between solver calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// water-surface elevation per node
    pub yp: Vec<f64>,
    /// discharge per node
    pub qp: Vec<f64>,
    /// lateral inflow per node, m3/s, entering the segment below the node
    pub qlat: Vec<f64>,
    pub lakes: Vec<LakeState>,
}

impl ChannelState {
    /// Dry channel with lakes at their spillway crest.
    pub fn new(network: &ChannelNetwork) -> Self {
        let count = network.nodes.len();
        let yp = network.nodes.iter().map(|n| n.bel).collect();
        let mut lakes = vec![LakeState::new(0.0, 0); network.lake_count()];
        for link in &network.links {
            if let Some(lake) = link.lake {
                let node = &network.nodes[link.head()];
                let elevation = match node.section {
                    CrossSection::Reservoir(params) => params.crest,
                    _ => node.bel,
                };
                lakes[lake] = LakeState::new(elevation, lake as i32 + 1);
            }
        }
        ChannelState {
            yp,
            qp: vec![0.0; count],
            qlat: vec![0.0; count],
            lakes,
        }
    }

    pub fn depth(&self, network: &ChannelNetwork, node: usize) -> f64 {
        self.yp[node] - network.nodes[node].bel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::{params, trapezoid_nodes};
    use crate::network::{LinkType, Node};
    use crate::section::ReservoirParams;

    #[test]
    fn new_state_is_dry_with_lakes_at_crest() {
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
                section: CrossSection::Reservoir(ReservoirParams {
                    surface_area: 5e4,
                    crest: 103.0,
                    spill_width: 4.0,
                    spill_coeff: 1.7,
                }),
            }],
        );
        let net = net.finalize().unwrap();
        let state = ChannelState::new(&net);

        assert_eq!(state.yp.len(), 4);
        assert!(state.depth(&net, 0).abs() < 1e-12);
        assert_eq!(state.lakes.len(), 1);
        assert!((state.lakes[0].elevation - 103.0).abs() < 1e-12);
        assert_eq!(state.lakes[0].category, 1);
    }
}
