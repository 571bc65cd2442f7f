use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::{Tokens, read_text};
use crate::error::ConfigError;
use crate::section::{BreakpointTable, TableRow};

/// Breakpoint tables keyed by table number.
pub type TableSet = HashMap<usize, Arc<BreakpointTable>>;

/// Read the breakpoint cross-section file.
///
/// ```text
/// maxtab maxbpts
/// tnum
/// numhts ht_spc
/// junk area top_width conveyance     (numhts + 1 rows, first is depth 0)
/// ...
/// ```
pub fn read_tables(path: &Path) -> Result<TableSet, ConfigError> {
    let content = read_text(path)?;
    let tables = parse_tables(path, &content)?;
    info!("Loaded {} breakpoint tables from {:?}", tables.len(), path);
    Ok(tables)
}

pub fn parse_tables(path: &Path, content: &str) -> Result<TableSet, ConfigError> {
    let mut tokens = Tokens::new(path, content);
    let count = tokens.usize("table count")?;
    let max_rows = tokens.usize("maximum breakpoints")?;

    let mut tables = TableSet::new();
    for _ in 0..count {
        let line = tokens.line();
        let number = tokens.usize("table number")?;
        let heights = tokens.usize("number of heights")?;
        let ht_spc = tokens.f64("height spacing")?;
        if heights < 2 {
            return Err(tokens.error(line, format!("table {} needs at least 2 heights", number)));
        }
        if max_rows > 0 && heights > max_rows {
            return Err(tokens.error(
                line,
                format!("table {} has {} heights, more than {}", number, heights, max_rows),
            ));
        }
        if ht_spc <= 0.0 {
            return Err(tokens.error(line, format!("table {} has non-positive spacing", number)));
        }

        let mut rows = Vec::with_capacity(heights);
        for row in 0..=heights {
            let _depth = tokens.f64("depth")?;
            let area = tokens.f64("area")?;
            let top_width = tokens.f64("top width")?;
            let conveyance = tokens.f64("conveyance")?;
            if row > 0 {
                rows.push(TableRow {
                    area,
                    top_width,
                    conveyance,
                });
            }
        }

        let table = BreakpointTable::new(number, ht_spc, rows)
            .map_err(|e| tokens.error(line, e.to_string()))?;
        if tables.insert(number, Arc::new(table)).is_some() {
            return Err(tokens.error(line, format!("table {} is defined twice", number)));
        }
    }
    Ok(tables)
}
