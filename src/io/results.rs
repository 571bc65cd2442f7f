use crate::network::{ChannelNetwork, LinkId};
use crate::state::ChannelState;

// Structure to store results for NetCDF output and the end-of-run summary
#[derive(Debug, Default)]
pub struct SimulationResults {
    pub links: Vec<i64>,
    pub nodes: Vec<i64>,
    pub times: Vec<f64>,
    /// `[node][time]`
    pub flow_data: Vec<Vec<f32>>,
    pub depth_data: Vec<Vec<f32>>,
}

impl SimulationResults {
    pub fn new(network: &ChannelNetwork) -> Self {
        let mut links = Vec::with_capacity(network.nodes.len());
        let mut nodes = Vec::with_capacity(network.nodes.len());
        for link in &network.links {
            for node in link.nodes() {
                links.push(link.id as i64);
                nodes.push((node - link.first + 1) as i64);
            }
        }
        let count = links.len();
        SimulationResults {
            links,
            nodes,
            times: Vec::new(),
            flow_data: vec![Vec::new(); count],
            depth_data: vec![Vec::new(); count],
        }
    }

    pub fn record(&mut self, seconds: f64, network: &ChannelNetwork, state: &ChannelState) {
        self.times.push(seconds);
        for node in 0..self.flow_data.len() {
            self.flow_data[node].push(state.qp[node] as f32);
            self.depth_data[node].push(state.depth(network, node) as f32);
        }
    }

    /// Largest recorded discharge at the tail of `link`, with its time.
    pub fn peak_discharge(&self, network: &ChannelNetwork, link: LinkId) -> Option<(f64, f32)> {
        let tail = network.link(link)?.tail();
        self.flow_data[tail]
            .iter()
            .zip(&self.times)
            .max_by(|a, b| a.0.total_cmp(b.0))
            .map(|(q, t)| (*t, *q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LinkType;
    use crate::network::tests::{params, trapezoid_nodes};

    #[test]
    fn records_cube_and_finds_peak() {
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![],
            None,
            trapezoid_nodes(2, 100.0, 0.001, 100.0),
        );
        let net = net.finalize().unwrap();
        let mut state = ChannelState::new(&net);
        let mut results = SimulationResults::new(&net);
        assert_eq!(results.nodes, vec![1, 2]);

        for (t, q) in [(60.0, 4.0), (120.0, 9.0), (180.0, 6.0)] {
            state.qp[1] = q;
            results.record(t, &net, &state);
        }
        assert_eq!(results.flow_data[1].len(), 3);
        assert_eq!(results.peak_discharge(&net, 3), Some((120.0, 9.0)));
        assert_eq!(results.peak_discharge(&net, 8), None);
    }
}
