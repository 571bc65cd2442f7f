use std::collections::{HashMap, VecDeque};
use std::ops::Range;

use tracing::info;

use crate::config::SolverParams;
use crate::error::ConfigError;
use crate::section::CrossSection;

pub type LinkId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    Trapezoidal,
    Weir,
    Culvert,
    Reservoir,
    PowerLawII,
    PowerLawIII,
    Breakpoint,
    MultiSlope,
}

impl LinkType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(LinkType::Trapezoidal),
            2 => Some(LinkType::Weir),
            3 => Some(LinkType::Culvert),
            4 => Some(LinkType::Reservoir),
            5 => Some(LinkType::PowerLawII),
            6 => Some(LinkType::PowerLawIII),
            8 => Some(LinkType::Breakpoint),
            9 => Some(LinkType::MultiSlope),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            LinkType::Trapezoidal => 1,
            LinkType::Weir => 2,
            LinkType::Culvert => 3,
            LinkType::Reservoir => 4,
            LinkType::PowerLawII => 5,
            LinkType::PowerLawIII => 6,
            LinkType::Breakpoint => 8,
            LinkType::MultiSlope => 9,
        }
    }

    /// Internal control structures solved with the weir relation.
    pub fn is_structure(self) -> bool {
        matches!(self, LinkType::Weir | LinkType::Culvert)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// bed elevation
    pub bel: f64,
    /// depth to bank
    pub chn_dep: f64,
    pub section: CrossSection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeirCrest {
    pub elevation: f64,
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub link_type: LinkType,
    /// upstream links (indices into `ChannelNetwork::links`)
    pub depend: Vec<usize>,
    /// downstream link
    pub backdep: Option<usize>,
    /// first node in the node arena
    pub first: usize,
    pub len: usize,
    /// index into the lake state for reservoir links
    pub lake: Option<usize>,
    pub crest: Option<WeirCrest>,
}

impl Link {
    pub fn nodes(&self) -> Range<usize> {
        self.first..self.first + self.len
    }

    pub fn head(&self) -> usize {
        self.first
    }

    pub fn tail(&self) -> usize {
        self.first + self.len - 1
    }

    pub fn is_reservoir(&self) -> bool {
        self.link_type == LinkType::Reservoir
    }

    pub fn is_outlet(&self) -> bool {
        self.backdep.is_none()
    }
}

// Link as read from the file, before ids are resolved
#[derive(Debug, Clone)]
struct LinkSpec {
    id: LinkId,
    link_type: LinkType,
    depend: Vec<LinkId>,
    backdep: Option<LinkId>,
    nodes: Vec<Node>,
}

/// Channel network: a forest of link trees over a flat node arena.
#[derive(Debug, Clone)]
pub struct ChannelNetwork {
    pub params: SolverParams,
    pub links: Vec<Link>,
    pub nodes: Vec<Node>,
    /// headwaters first; every tributary precedes its confluence
    pub routing_order: Vec<usize>,
    index: HashMap<LinkId, usize>,
    pending: Vec<LinkSpec>,
    lakes: usize,
}

impl ChannelNetwork {
    pub fn new(params: SolverParams) -> Self {
        ChannelNetwork {
            params,
            links: Vec::new(),
            nodes: Vec::new(),
            routing_order: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            lakes: 0,
        }
    }

    pub fn add_link(
        &mut self,
        id: LinkId,
        link_type: LinkType,
        depend: Vec<LinkId>,
        backdep: Option<LinkId>,
        nodes: Vec<Node>,
    ) {
        self.pending.push(LinkSpec {
            id,
            link_type,
            depend,
            backdep,
            nodes,
        });
    }

    /// Resolve link references, validate the tree and compute the routing order.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        let specs = std::mem::take(&mut self.pending);

        for (idx, spec) in specs.iter().enumerate() {
            if self.index.insert(spec.id, idx).is_some() {
                return Err(ConfigError::InvalidNetwork(format!(
                    "link {} is defined twice",
                    spec.id
                )));
            }
        }

        for spec in specs {
            let resolve = |target: LinkId| {
                self.index
                    .get(&target)
                    .copied()
                    .ok_or(ConfigError::UnknownLink {
                        link: spec.id,
                        target,
                    })
            };
            if spec.depend.len() > 2 {
                return Err(ConfigError::InvalidNetwork(format!(
                    "link {} has {} upstream links, at most 2 are allowed",
                    spec.id,
                    spec.depend.len()
                )));
            }
            let depend = spec
                .depend
                .iter()
                .map(|&d| resolve(d))
                .collect::<Result<Vec<_>, _>>()?;
            let backdep = spec.backdep.map(resolve).transpose()?;

            let expected = match spec.link_type {
                LinkType::Reservoir => Some(1),
                t if t.is_structure() => Some(2),
                _ => None,
            };
            match expected {
                Some(n) if spec.nodes.len() != n => {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "link {} of type {} needs exactly {} nodes, found {}",
                        spec.id,
                        spec.link_type.code(),
                        n,
                        spec.nodes.len()
                    )));
                }
                None if spec.nodes.len() < 2 => {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "channel link {} needs at least 2 nodes",
                        spec.id
                    )));
                }
                _ => {}
            }
            if self.params.maxnodes > 0 && spec.nodes.len() > self.params.maxnodes {
                return Err(ConfigError::InvalidNetwork(format!(
                    "link {} has {} nodes, more than maxnodes = {}",
                    spec.id,
                    spec.nodes.len(),
                    self.params.maxnodes
                )));
            }

            let crest = if spec.link_type.is_structure() {
                let upstream = &spec.nodes[0];
                match upstream.section {
                    CrossSection::Trapezoidal { bottom, .. } => Some(WeirCrest {
                        elevation: upstream.bel + upstream.chn_dep,
                        width: bottom,
                    }),
                    _ => {
                        return Err(ConfigError::InvalidNetwork(format!(
                            "structure link {} needs a trapezoidal crest description",
                            spec.id
                        )));
                    }
                }
            } else {
                None
            };

            let lake = if spec.link_type == LinkType::Reservoir {
                self.lakes += 1;
                Some(self.lakes - 1)
            } else {
                None
            };

            let first = self.nodes.len();
            let len = spec.nodes.len();
            self.nodes.extend(spec.nodes);
            self.links.push(Link {
                id: spec.id,
                link_type: spec.link_type,
                depend,
                backdep,
                first,
                len,
                lake,
                crest,
            });
        }

        self.check_dependencies()?;
        self.topological_sort()?;

        info!(
            "Channel network built with {} links, {} nodes, {} lakes, {} outlets",
            self.links.len(),
            self.nodes.len(),
            self.lakes,
            self.outlets().count()
        );
        Ok(self)
    }

    fn check_dependencies(&self) -> Result<(), ConfigError> {
        for (idx, link) in self.links.iter().enumerate() {
            for &up in &link.depend {
                if self.links[up].backdep != Some(idx) {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "link {} lists {} upstream, but {} drains elsewhere",
                        link.id, self.links[up].id, self.links[up].id
                    )));
                }
                if self.links[up].is_reservoir() && link.depend.len() != 1 {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "link {} below lake link {} cannot have other upstream links",
                        link.id, self.links[up].id
                    )));
                }
            }
            if let Some(down) = link.backdep {
                if !self.links[down].depend.contains(&idx) {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "link {} drains to {}, which does not list it upstream",
                        link.id, self.links[down].id
                    )));
                }
            }
        }
        Ok(())
    }

    fn topological_sort(&mut self) -> Result<(), ConfigError> {
        let mut in_degree = vec![0usize; self.links.len()];
        let mut queue: VecDeque<usize> = VecDeque::new();

        for link in &self.links {
            if let Some(down) = link.backdep {
                in_degree[down] += 1;
            }
        }

        // headwaters
        for (idx, &degree) in in_degree.iter().enumerate() {
            if degree == 0 {
                queue.push_back(idx);
            }
        }

        if queue.is_empty() && !self.links.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "no headwater links found - possible cycle in network".into(),
            ));
        }

        self.routing_order.clear();

        while let Some(current) = queue.pop_front() {
            self.routing_order.push(current);
            if let Some(down) = self.links[current].backdep {
                in_degree[down] -= 1;
                if in_degree[down] == 0 {
                    queue.push_back(down);
                }
            }
        }

        if self.routing_order.len() != self.links.len() {
            return Err(ConfigError::InvalidNetwork(format!(
                "cycle detected in network topology: ordered {} links out of {}",
                self.routing_order.len(),
                self.links.len()
            )));
        }
        Ok(())
    }

    pub fn link_index(&self, id: LinkId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.link_index(id).map(|idx| &self.links[idx])
    }

    /// Arena index of the 1-based `node` of link `id`.
    pub fn node_index(&self, id: LinkId, node: usize) -> Option<usize> {
        let link = self.link(id)?;
        if node == 0 || node > link.len {
            return None;
        }
        Some(link.first + node - 1)
    }

    pub fn outlets(&self) -> impl Iterator<Item = usize> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| link.is_outlet())
            .map(|(idx, _)| idx)
    }

    pub fn lake_count(&self) -> usize {
        self.lakes
    }

    /// Bed slope of the segment leaving arena node `node` of link `link`;
    /// the tail node uses the segment arriving at it.
    pub fn bed_slope(&self, link: usize, node: usize) -> f64 {
        let l = &self.links[link];
        if l.len < 2 {
            return 0.0;
        }
        let (up, down) = if node < l.tail() {
            (node, node + 1)
        } else {
            (l.tail() - 1, l.tail())
        };
        (self.nodes[up].bel - self.nodes[down].bel) / self.params.delx
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::section::ReservoirParams;

    pub(crate) fn params(nlinks: usize) -> SolverParams {
        SolverParams {
            gravity: 9.81,
            alpha: 1.0,
            beta: 0.75,
            theta: 0.6,
            delx: 100.0,
            delt: 60.0,
            tt: 3600.0,
            qmin: 5.0,
            nlinks,
            maxnodes: 50,
        }
    }

    pub(crate) fn trapezoid_nodes(count: usize, top: f64, slope: f64, delx: f64) -> Vec<Node> {
        (0..count)
            .map(|j| Node {
                bel: top - slope * delx * j as f64,
                chn_dep: 3.0,
                section: CrossSection::Trapezoidal {
                    strickler: 1.0 / 0.03,
                    bottom: 2.0,
                    side_slope: 1.0,
                },
            })
            .collect()
    }

    fn lake_node(bel: f64) -> Node {
        Node {
            bel,
            chn_dep: 0.0,
            section: CrossSection::Reservoir(ReservoirParams {
                surface_area: 1e5,
                crest: bel + 2.0,
                spill_width: 10.0,
                spill_coeff: 1.7,
            }),
        }
    }

    #[test]
    fn junction_orders_tributaries_first() {
        let mut net = ChannelNetwork::new(params(3));
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![1, 2],
            None,
            trapezoid_nodes(4, 99.0, 0.001, 100.0),
        );
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(4, 100.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Trapezoidal,
            vec![],
            Some(3),
            trapezoid_nodes(4, 100.0, 0.001, 100.0),
        );
        let net = net.finalize().unwrap();

        let order: Vec<LinkId> = net.routing_order.iter().map(|&i| net.links[i].id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(net.outlets().count(), 1);
        assert_eq!(net.node_index(1, 1), Some(net.links[1].first));
        assert_eq!(net.node_index(1, 5), None);
        assert_eq!(net.node_index(1, 0), None);
    }

    #[test]
    fn lakes_get_indices() {
        let mut net = ChannelNetwork::new(params(3));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(2),
            trapezoid_nodes(3, 110.0, 0.001, 100.0),
        );
        net.add_link(2, LinkType::Reservoir, vec![1], Some(3), vec![lake_node(105.0)]);
        net.add_link(
            3,
            LinkType::Trapezoidal,
            vec![2],
            None,
            trapezoid_nodes(3, 104.0, 0.001, 100.0),
        );
        let net = net.finalize().unwrap();
        assert_eq!(net.lake_count(), 1);
        assert_eq!(net.link(2).unwrap().lake, Some(0));
    }

    #[test]
    fn rejects_dangling_and_inconsistent_links() {
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            Some(9),
            trapezoid_nodes(3, 100.0, 0.001, 100.0),
        );
        assert!(matches!(
            net.finalize(),
            Err(ConfigError::UnknownLink { link: 1, target: 9 })
        ));

        let mut net = ChannelNetwork::new(params(2));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            None,
            trapezoid_nodes(3, 100.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Trapezoidal,
            vec![1],
            None,
            trapezoid_nodes(3, 99.0, 0.001, 100.0),
        );
        assert!(matches!(net.finalize(), Err(ConfigError::InvalidNetwork(_))));
    }

    #[test]
    fn rejects_cycles() {
        let mut net = ChannelNetwork::new(params(2));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![2],
            Some(2),
            trapezoid_nodes(3, 100.0, 0.001, 100.0),
        );
        net.add_link(
            2,
            LinkType::Trapezoidal,
            vec![1],
            Some(1),
            trapezoid_nodes(3, 99.0, 0.001, 100.0),
        );
        assert!(matches!(net.finalize(), Err(ConfigError::InvalidNetwork(_))));
    }

    #[test]
    fn weir_crest_from_upstream_node() {
        let mut nodes = trapezoid_nodes(2, 100.0, 0.0, 100.0);
        nodes[0].chn_dep = 1.5;
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(1, LinkType::Weir, vec![], None, nodes);
        let net = net.finalize().unwrap();
        let crest = net.links[0].crest.unwrap();
        assert!((crest.elevation - 101.5).abs() < 1e-12);
        assert!((crest.width - 2.0).abs() < 1e-12);
    }

    #[test]
    fn bed_slope_at_tail_uses_last_segment() {
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(
            1,
            LinkType::Trapezoidal,
            vec![],
            None,
            trapezoid_nodes(4, 100.0, 0.002, 100.0),
        );
        let net = net.finalize().unwrap();
        assert!((net.bed_slope(0, 0) - 0.002).abs() < 1e-12);
        assert!((net.bed_slope(0, 3) - 0.002).abs() < 1e-12);
    }
}
