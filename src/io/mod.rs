pub mod csv;
mod decimal;
#[cfg(feature = "netcdf")]
pub mod netcdf;
pub mod network_file;
pub mod profile;
pub mod results;
pub mod series;
pub mod table_file;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub(crate) fn read_text(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Whitespace-separated tokens with the line each came from.
/// Anything after a `#` on a line is ignored.
pub(crate) struct Tokens<'a> {
    path: PathBuf,
    tokens: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    pub fn new(path: &Path, content: &'a str) -> Self {
        let tokens = content
            .lines()
            .enumerate()
            .flat_map(|(i, line)| {
                let data = line.split('#').next().unwrap_or("");
                data.split_whitespace().map(move |t| (i + 1, t))
            })
            .collect();
        Tokens {
            path: path.to_path_buf(),
            tokens,
            pos: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Line of the next token, or of the last one at end of input.
    pub fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.0)
            .unwrap_or(0)
    }

    pub fn error(&self, line: usize, message: impl Into<String>) -> ConfigError {
        ConfigError::Parse {
            path: self.path.clone(),
            line,
            message: message.into(),
        }
    }

    pub fn next<T: FromStr>(&mut self, what: &str) -> Result<T, ConfigError> {
        let Some(&(line, token)) = self.tokens.get(self.pos) else {
            let message = format!("unexpected end of file, expected {}", what);
            return Err(self.error(self.line(), message));
        };
        self.pos += 1;
        token
            .parse::<T>()
            .map_err(|_| self.error(line, format!("invalid {} '{}'", what, token)))
    }

    pub fn f64(&mut self, what: &str) -> Result<f64, ConfigError> {
        self.next::<f64>(what)
    }

    pub fn usize(&mut self, what: &str) -> Result<usize, ConfigError> {
        self.next::<usize>(what)
    }
}
