use std::fs::File;
use std::path::Path;

use csv::{Writer, WriterBuilder};
use serde::Serialize;

use crate::network::{ChannelNetwork, LinkId};
use crate::state::ChannelState;

// One output row per node and output time
#[derive(Debug, Serialize)]
struct NodeRecord<'a> {
    timestamp: &'a str,
    seconds: f64,
    link: LinkId,
    node: usize,
    depth: f64,
    elevation: f64,
    discharge: f64,
}

// Create CSV writer; the header row comes from the record fields
pub fn create_csv_writer(path: &Path) -> csv::Result<Writer<File>> {
    WriterBuilder::new().has_headers(true).from_path(path)
}

/// Append the state of every node at `seconds`.
pub fn write_state(
    wtr: &mut Writer<File>,
    timestamp: &str,
    seconds: f64,
    network: &ChannelNetwork,
    state: &ChannelState,
) -> csv::Result<()> {
    for link in &network.links {
        for node in link.nodes() {
            wtr.serialize(NodeRecord {
                timestamp,
                seconds,
                link: link.id,
                node: node - link.first + 1,
                depth: state.depth(network, node),
                elevation: state.yp[node],
                discharge: state.qp[node],
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LinkType;
    use crate::network::tests::{params, trapezoid_nodes};

    #[test]
    fn writes_header_and_one_row_per_node() {
        let mut net = ChannelNetwork::new(params(1));
        net.add_link(
            7,
            LinkType::Trapezoidal,
            vec![],
            None,
            trapezoid_nodes(3, 100.0, 0.001, 100.0),
        );
        let net = net.finalize().unwrap();
        let mut state = ChannelState::new(&net);
        state.yp[0] = 101.5;
        state.qp[0] = 5.0;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut wtr = create_csv_writer(&path).unwrap();
        write_state(&mut wtr, "2000-01-01 00:01:00", 60.0, &net, &state).unwrap();
        write_state(&mut wtr, "2000-01-01 00:02:00", 120.0, &net, &state).unwrap();
        wtr.flush().unwrap();
        drop(wtr);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,seconds,link,node,depth,elevation,discharge");
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[1], "2000-01-01 00:01:00,60.0,7,1,1.5,101.5,5.0");
    }
}
