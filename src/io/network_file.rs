use std::path::Path;

use tracing::info;

use super::table_file::TableSet;
use super::{Tokens, read_text};
use crate::config::SolverParams;
use crate::error::ConfigError;
use crate::network::{ChannelNetwork, LinkId, LinkType, Node};
use crate::section::{CrossSection, PowerLaw, PowerLawSet, ReservoirParams};

/// Read the channel network file and build a finalized network.
///
/// Layout, whitespace separated:
///
/// ```text
/// g alpha beta theta delx delt tt qmin nlinks maxnodes
/// link type ndep dep1 dep2 backdep          (nlinks lines, 0 = none)
/// link nx1                                  (nlinks lines)
/// link node <fields by link type>           (nx1 lines per link)
/// ```
pub fn read_network(path: &Path, tables: &TableSet) -> Result<ChannelNetwork, ConfigError> {
    let content = read_text(path)?;
    let network = parse_network(path, &content, tables)?;
    info!("Read channel network from {:?}", path);
    Ok(network)
}

struct Header {
    id: LinkId,
    link_type: LinkType,
    depend: Vec<LinkId>,
    backdep: Option<LinkId>,
}

pub fn parse_network(
    path: &Path,
    content: &str,
    tables: &TableSet,
) -> Result<ChannelNetwork, ConfigError> {
    let mut tokens = Tokens::new(path, content);

    let params = SolverParams {
        gravity: tokens.f64("gravity")?,
        alpha: tokens.f64("alpha")?,
        beta: tokens.f64("beta")?,
        theta: tokens.f64("theta")?,
        delx: tokens.f64("delx")?,
        delt: tokens.f64("delt")?,
        tt: tokens.f64("tt")?,
        qmin: tokens.f64("qmin")?,
        nlinks: tokens.usize("nlinks")?,
        maxnodes: tokens.usize("maxnodes")?,
    };
    if params.delx <= 0.0 || params.delt <= 0.0 {
        return Err(tokens.error(1, "delx and delt must be positive"));
    }

    let mut headers = Vec::with_capacity(params.nlinks);
    for _ in 0..params.nlinks {
        let line = tokens.line();
        let id = tokens.next::<LinkId>("link id")?;
        let code = tokens.next::<i64>("link type")?;
        let link_type =
            LinkType::from_code(code).ok_or(ConfigError::UnknownLinkType { link: id, code })?;
        let ndep = tokens.usize("ndep")?;
        let deps = [tokens.next::<LinkId>("dep1")?, tokens.next::<LinkId>("dep2")?];
        let backdep = tokens.next::<LinkId>("backdep")?;
        if ndep > 2 {
            return Err(tokens.error(line, format!("link {} has ndep = {}", id, ndep)));
        }
        let depend: Vec<LinkId> = deps[..ndep].to_vec();
        if depend.contains(&0) {
            return Err(tokens.error(line, format!("link {} lists link 0 upstream", id)));
        }
        headers.push(Header {
            id,
            link_type,
            depend,
            backdep: (backdep != 0).then_some(backdep),
        });
    }

    let mut counts = Vec::with_capacity(params.nlinks);
    for header in &headers {
        let line = tokens.line();
        let id = tokens.next::<LinkId>("link id")?;
        let count = tokens.usize("nx1")?;
        if id != header.id {
            return Err(tokens.error(
                line,
                format!("node count for link {} found where link {} was expected", id, header.id),
            ));
        }
        counts.push(count);
    }

    let mut network = ChannelNetwork::new(params);
    for (header, count) in headers.into_iter().zip(counts) {
        let mut nodes = Vec::with_capacity(count);
        for expected in 1..=count {
            let line = tokens.line();
            let id = tokens.next::<LinkId>("link id")?;
            let number = tokens.usize("node number")?;
            if id != header.id || number != expected {
                return Err(tokens.error(
                    line,
                    format!(
                        "expected link {} node {}, found link {} node {}",
                        header.id, expected, id, number
                    ),
                ));
            }
            nodes.push(read_node(&mut tokens, &header, number, tables)?);
        }
        network.add_link(header.id, header.link_type, header.depend, header.backdep, nodes);
    }

    if !tokens.is_empty() {
        return Err(tokens.error(tokens.line(), "unexpected data after the last node"));
    }
    network.finalize()
}

fn read_manning(tokens: &mut Tokens, link: LinkId) -> Result<f64, ConfigError> {
    let line = tokens.line();
    let n = tokens.f64("manning n")?;
    if n <= 0.0 {
        return Err(tokens.error(line, format!("link {}: Manning n must be positive", link)));
    }
    Ok(1.0 / n)
}

fn read_power_laws(tokens: &mut Tokens) -> Result<PowerLawSet, ConfigError> {
    let wc = tokens.f64("width coefficient")?;
    let we = tokens.f64("width exponent")?;
    let ac = tokens.f64("area coefficient")?;
    let ae = tokens.f64("area exponent")?;
    let kc = tokens.f64("conveyance coefficient")?;
    let ke = tokens.f64("conveyance exponent")?;
    Ok(PowerLawSet {
        width: PowerLaw::new(wc, we),
        area: PowerLaw::new(ac, ae),
        conveyance: PowerLaw::new(kc, ke),
    })
}

fn read_node(
    tokens: &mut Tokens,
    header: &Header,
    number: usize,
    tables: &TableSet,
) -> Result<Node, ConfigError> {
    let node = match header.link_type {
        LinkType::Trapezoidal | LinkType::Weir | LinkType::Culvert => {
            let strickler = read_manning(tokens, header.id)?;
            let bel = tokens.f64("bed elevation")?;
            let bottom = tokens.f64("bottom width")?;
            let side_slope = tokens.f64("side slope")?;
            let chn_dep = tokens.f64("bank depth")?;
            Node {
                bel,
                chn_dep,
                section: CrossSection::Trapezoidal {
                    strickler,
                    bottom,
                    side_slope,
                },
            }
        }
        LinkType::MultiSlope => {
            let strickler = read_manning(tokens, header.id)?;
            let bel = tokens.f64("bed elevation")?;
            let bottom = tokens.f64("bottom width")?;
            let inbank_slope = tokens.f64("side slope")?;
            let overbank_slope = tokens.f64("overbank side slope")?;
            let chn_dep = tokens.f64("bank depth")?;
            Node {
                bel,
                chn_dep,
                section: CrossSection::MultiSlope {
                    strickler,
                    bottom,
                    inbank_slope,
                    overbank_slope,
                    bank_depth: chn_dep,
                },
            }
        }
        LinkType::PowerLawII => {
            let bel = tokens.f64("bed elevation")?;
            let chn_dep = tokens.f64("bank depth")?;
            Node {
                bel,
                chn_dep,
                section: CrossSection::PowerLawII(read_power_laws(tokens)?),
            }
        }
        LinkType::PowerLawIII => {
            let bel = tokens.f64("bed elevation")?;
            let chn_dep = tokens.f64("bank depth")?;
            let inbank = read_power_laws(tokens)?;
            let overbank = read_power_laws(tokens)?;
            Node {
                bel,
                chn_dep,
                section: CrossSection::PowerLawIII {
                    bank_depth: chn_dep,
                    inbank,
                    overbank,
                },
            }
        }
        LinkType::Breakpoint => {
            let table = tokens.usize("table number")?;
            let bel = tokens.f64("bed elevation")?;
            let table = tables.get(&table).cloned().ok_or(ConfigError::MissingTable {
                link: header.id,
                node: number,
                table,
            })?;
            Node {
                bel,
                chn_dep: table.max_depth(),
                section: CrossSection::Breakpoint(table),
            }
        }
        LinkType::Reservoir => {
            let bel = tokens.f64("lake bed elevation")?;
            let surface_area = tokens.f64("surface area")?;
            let crest = tokens.f64("spillway crest")?;
            let spill_width = tokens.f64("spillway width")?;
            let spill_coeff = tokens.f64("spillway coefficient")?;
            Node {
                bel,
                chn_dep: 0.0,
                section: CrossSection::Reservoir(ReservoirParams {
                    surface_area,
                    crest,
                    spill_width,
                    spill_coeff,
                }),
            }
        }
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::table_file::parse_tables;

    const NETWORK: &str = "\
9.81 1.0 0.75 0.6 100.0 60.0 3600.0 5.0 3 10
1 1 0 0 0 3
2 8 0 0 0 3
3 9 2 1 2 0
1 3
2 2
3 2
1 1 0.03 101.0 2.0 1.0 3.0
1 2 0.03 100.9 2.0 1.0 3.0
1 3 0.03 100.8 2.0 1.0 3.0
2 1 4 101.0
2 2 4 100.8
3 1 0.035 100.7 3.0 1.0 4.0 2.5
3 2 0.035 100.6 3.0 1.0 4.0 2.5
";

    const TABLE: &str = "1 4\n4\n2 1.0\n0 0 0 0\n1 3 3 20\n2 7 5 60\n";

    fn tables() -> TableSet {
        parse_tables(Path::new("tables.dat"), TABLE).unwrap()
    }

    #[test]
    fn parses_all_layouts() {
        let net = parse_network(Path::new("net.dat"), NETWORK, &tables()).unwrap();
        assert_eq!(net.links.len(), 3);
        assert_eq!(net.nodes.len(), 7);
        assert!((net.params.theta - 0.6).abs() < 1e-12);

        let first = &net.nodes[0];
        match first.section {
            CrossSection::Trapezoidal { strickler, .. } => {
                assert!((strickler - 1.0 / 0.03).abs() < 1e-9)
            }
            ref other => panic!("unexpected section {:?}", other),
        }
        let table_node = &net.nodes[net.node_index(2, 1).unwrap()];
        assert!(matches!(table_node.section, CrossSection::Breakpoint(_)));
        assert!((table_node.chn_dep - 2.0).abs() < 1e-12);

        let main = net.link(3).unwrap();
        assert_eq!(main.link_type, LinkType::MultiSlope);
        assert_eq!(main.depend.len(), 2);
        assert!(main.is_outlet());
    }

    #[test]
    fn reports_line_of_bad_token() {
        let bad = NETWORK.replace("1 2 0.03 100.9", "1 2 0.03 abc");
        match parse_network(Path::new("net.dat"), &bad, &tables()) {
            Err(ConfigError::Parse { line, message, .. }) => {
                assert_eq!(line, 9);
                assert!(message.contains("bed elevation"));
            }
            other => panic!("unexpected {:?}", other.map(|n| n.links.len())),
        }
    }

    #[test]
    fn rejects_unknown_type_and_missing_table() {
        let bad_type = NETWORK.replace("2 8 0 0 0 3", "2 7 0 0 0 3");
        assert!(matches!(
            parse_network(Path::new("net.dat"), &bad_type, &tables()),
            Err(ConfigError::UnknownLinkType { link: 2, code: 7 })
        ));

        let no_tables = TableSet::new();
        assert!(matches!(
            parse_network(Path::new("net.dat"), NETWORK, &no_tables),
            Err(ConfigError::MissingTable { link: 2, node: 1, table: 4 })
        ));
    }

    #[test]
    fn rejects_out_of_order_nodes() {
        let swapped = NETWORK.replace("1 2 0.03 100.9", "1 3 0.03 100.9");
        assert!(matches!(
            parse_network(Path::new("net.dat"), &swapped, &tables()),
            Err(ConfigError::Parse { line: 9, .. })
        ));
    }
}
