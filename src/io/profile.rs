use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use super::{Tokens, decimal, read_text};
use crate::error::ConfigError;
use crate::network::{ChannelNetwork, LinkId};
use crate::state::ChannelState;

/// One `(link, node, value)` line of a profile or lateral inflow file.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeValue {
    pub link: LinkId,
    pub node: usize,
    pub value: f64,
    /// the value as written, for exact arithmetic on it
    pub text: String,
    pub line: usize,
}

pub fn parse_node_values(path: &Path, content: &str) -> Result<Vec<NodeValue>, ConfigError> {
    let mut tokens = Tokens::new(path, content);
    let mut values = Vec::new();
    while !tokens.is_empty() {
        let line = tokens.line();
        let link = tokens.next::<LinkId>("link id")?;
        let node = tokens.usize("node number")?;
        let text = tokens.next::<String>("value")?;
        let value = text
            .parse::<f64>()
            .map_err(|_| tokens.error(line, format!("invalid value '{}'", text)))?;
        values.push(NodeValue {
            link,
            node,
            value,
            text,
            line,
        });
    }
    Ok(values)
}

// arena index for a triple, or a parse error naming its line
fn locate(network: &ChannelNetwork, path: &Path, entry: &NodeValue) -> Result<usize, ConfigError> {
    network
        .node_index(entry.link, entry.node)
        .ok_or_else(|| ConfigError::Parse {
            path: path.to_path_buf(),
            line: entry.line,
            message: format!("link {} has no node {}", entry.link, entry.node),
        })
}

/// Scatter a `(link, node, value)` file onto the node arena.
/// Every node must be given exactly once.
fn read_complete(network: &ChannelNetwork, path: &Path) -> Result<Vec<NodeValue>, ConfigError> {
    let content = read_text(path)?;
    let entries = parse_node_values(path, &content)?;
    let mut values: Vec<Option<NodeValue>> = vec![None; network.nodes.len()];
    for entry in entries {
        let idx = locate(network, path, &entry)?;
        if values[idx].is_some() {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                line: entry.line,
                message: format!("link {} node {} given twice", entry.link, entry.node),
            });
        }
        values[idx] = Some(entry);
    }
    let mut out = Vec::with_capacity(values.len());
    for link in &network.links {
        for node in link.nodes() {
            match values[node].take() {
                Some(v) => out.push(v),
                None => {
                    return Err(ConfigError::InvalidNetwork(format!(
                        "{:?} has no value for link {} node {}",
                        path,
                        link.id,
                        node - link.first + 1
                    )));
                }
            }
        }
    }
    Ok(out)
}

/// Cold start from stage and discharge profiles.
///
/// Stage is the water depth for channel nodes and the water-surface
/// elevation for lakes.
pub fn read_profiles(
    network: &ChannelNetwork,
    state: &mut ChannelState,
    stage: &Path,
    discharge: &Path,
) -> Result<(), ConfigError> {
    let stages = read_complete(network, stage)?;
    let flows = read_complete(network, discharge)?;

    for link in &network.links {
        for node in link.nodes() {
            match link.lake {
                Some(lake) => {
                    state.lakes[lake].elevation = stages[node].value;
                    state.yp[node] = stages[node].value;
                }
                None => state.yp[node] = stage_from_depth(network.nodes[node].bel, &stages[node]),
            }
            state.qp[node] = flows[node].value;
        }
    }
    info!("Initial state read from {:?} and {:?}", stage, discharge);
    Ok(())
}

// bed plus depth, rounded once
fn stage_from_depth(bel: f64, depth: &NodeValue) -> f64 {
    if !bel.is_finite() {
        return bel + depth.value;
    }
    decimal::sum(&decimal::exact(bel), &depth.text).unwrap_or(bel + depth.value)
}

// depth text that `stage_from_depth` turns back into exactly `stage`
fn depth_text(bel: f64, stage: f64) -> String {
    let short = (stage - bel).to_string();
    if !bel.is_finite() || !stage.is_finite() {
        return short;
    }
    let bed = decimal::exact(bel);
    if decimal::sum(&bed, &short) == Some(stage) {
        return short;
    }
    decimal::difference(&decimal::exact(stage), &bed).unwrap_or(short)
}

fn create(path: &Path) -> Result<BufWriter<File>, ConfigError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn write_values<F>(network: &ChannelNetwork, path: &Path, value: F) -> Result<(), ConfigError>
where
    F: Fn(usize, Option<usize>) -> String,
{
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = create(path)?;
    for link in &network.links {
        for node in link.nodes() {
            writeln!(out, "{} {} {}", link.id, node - link.first + 1, value(node, link.lake))
                .map_err(io_error)?;
        }
    }
    out.flush().map_err(io_error)
}

/// Write the stage and discharge profiles read back by [`read_profiles`].
pub fn write_profiles(
    network: &ChannelNetwork,
    state: &ChannelState,
    stage: &Path,
    discharge: &Path,
) -> Result<(), ConfigError> {
    write_values(network, stage, |node, lake| match lake {
        Some(lake) => state.lakes[lake].elevation.to_string(),
        None => depth_text(network.nodes[node].bel, state.yp[node]),
    })?;
    // `{}` prints the shortest text that parses back to the same f64
    write_values(network, discharge, |node, _| state.qp[node].to_string())?;
    info!("Final profiles written to {:?} and {:?}", stage, discharge);
    Ok(())
}
