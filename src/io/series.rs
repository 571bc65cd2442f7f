use std::collections::HashMap;
use std::path::Path;

use super::profile::parse_node_values;
use super::{Tokens, read_text};
use crate::boundary::TimeSeries;
use crate::error::ConfigError;
use crate::network::{ChannelNetwork, LinkId};

/// Hydrographs from `link time value` lines, times strictly increasing per link.
pub fn parse_link_series(
    path: &Path,
    content: &str,
) -> Result<HashMap<LinkId, TimeSeries>, ConfigError> {
    let mut tokens = Tokens::new(path, content);
    let mut points: HashMap<LinkId, Vec<(f64, f64)>> = HashMap::new();
    while !tokens.is_empty() {
        let line = tokens.line();
        let link = tokens.next::<LinkId>("link id")?;
        let time = tokens.f64("time")?;
        let value = tokens.f64("discharge")?;
        let series = points.entry(link).or_default();
        if series.last().is_some_and(|&(t, _)| time <= t) {
            return Err(tokens.error(line, format!("times for link {} must increase", link)));
        }
        series.push((time, value));
    }
    Ok(points
        .into_iter()
        .map(|(link, p)| (link, TimeSeries::new(p)))
        .collect())
}

pub fn read_link_series(path: &Path) -> Result<HashMap<LinkId, TimeSeries>, ConfigError> {
    parse_link_series(path, &read_text(path)?)
}

/// A single `time value` series, e.g. the outlet stage target.
pub fn parse_series(path: &Path, content: &str) -> Result<TimeSeries, ConfigError> {
    let mut tokens = Tokens::new(path, content);
    let mut points: Vec<(f64, f64)> = Vec::new();
    while !tokens.is_empty() {
        let line = tokens.line();
        let time = tokens.f64("time")?;
        let value = tokens.f64("value")?;
        if points.last().is_some_and(|&(t, _)| time <= t) {
            return Err(tokens.error(line, "times must increase"));
        }
        points.push((time, value));
    }
    if points.is_empty() {
        return Err(tokens.error(0, "empty time series"));
    }
    Ok(TimeSeries::new(points))
}

pub fn read_series(path: &Path) -> Result<TimeSeries, ConfigError> {
    parse_series(path, &read_text(path)?)
}

/// Constant lateral inflow per node (m3/s) from `link node value` lines;
/// nodes not listed get zero.
pub fn read_lateral(network: &ChannelNetwork, path: &Path) -> Result<Vec<f64>, ConfigError> {
    let content = read_text(path)?;
    let mut qlat = vec![0.0; network.nodes.len()];
    for entry in parse_node_values(path, &content)? {
        let idx = network
            .node_index(entry.link, entry.node)
            .ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                line: entry.line,
                message: format!("link {} has no node {}", entry.link, entry.node),
            })?;
        qlat[idx] += entry.value;
    }
    Ok(qlat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn link_series_are_grouped() {
        let text = "1 0 5\n2 0 1\n1 600 9\n2 600 3\n";
        let series = parse_link_series(Path::new("inflow.dat"), text).unwrap();
        assert_eq!(series.len(), 2);
        assert!((series[&1].value_at(300.0) - 7.0).abs() < TOL);
        assert!((series[&2].value_at(900.0) - 3.0).abs() < TOL);
    }

    #[test]
    fn times_must_increase() {
        let text = "1 0 5\n1 600 9\n1 600 4\n";
        assert!(matches!(
            parse_link_series(Path::new("inflow.dat"), text),
            Err(ConfigError::Parse { line: 3, .. })
        ));
        assert!(matches!(
            parse_series(Path::new("stage.dat"), "0 101\n-5 100\n"),
            Err(ConfigError::Parse { line: 2, .. })
        ));
        assert!(parse_series(Path::new("stage.dat"), "# nothing\n").is_err());
    }

    #[test]
    fn stage_series_interpolates() {
        let series = parse_series(Path::new("stage.dat"), "0 101.5\n3600 100.5\n").unwrap();
        assert!((series.value_at(1800.0) - 101.0).abs() < TOL);
    }
}
