use crate::occupancy::MAX_STATIONS;
use crate::padded_counter::MAX_WORKERS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be positive")]
    ZeroDimension { name: &'static str },
    #[error("{stations} stations do not fit the occupancy word (max {max})")]
    TooManyStations { stations: u32, max: u32 },
    #[error("{workers} workers requested, at most {max} are supported")]
    TooManyWorkers { workers: usize, max: usize },
    #[error("I/O error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("invalid RON config: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Fixed bounds of a ticketing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub routes: u32,
    pub coaches: u32,
    pub seats: u32,
    pub stations: u32,
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routes: 3,
            coaches: 3,
            seats: 5,
            stations: 5,
            max_workers: 64,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("routes", self.routes),
            ("coaches", self.coaches),
            ("seats", self.seats),
            ("stations", self.stations),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDimension { name });
            }
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroDimension {
                name: "max_workers",
            });
        }
        if self.stations > MAX_STATIONS {
            return Err(ConfigError::TooManyStations {
                stations: self.stations,
                max: MAX_STATIONS,
            });
        }
        if self.max_workers > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers {
                workers: self.max_workers,
                max: MAX_WORKERS,
            });
        }
        Ok(())
    }
}

/// Network dimensions plus the operation mix used by the benchmark driver.
///
/// Ratios are percentages: a draw below `refund_ratio` refunds, below
/// `refund_ratio + buy_ratio` buys, anything else is an inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub routes: u32,
    pub coaches: u32,
    pub seats: u32,
    pub stations: u32,
    pub refund_ratio: u32,
    pub buy_ratio: u32,
    pub inquiry_ratio: u32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            routes: 3,
            coaches: 3,
            seats: 5,
            stations: 5,
            refund_ratio: 10,
            buy_ratio: 20,
            inquiry_ratio: 30,
        }
    }
}

impl TrainConfig {
    pub fn engine(&self, max_workers: usize) -> EngineConfig {
        EngineConfig {
            routes: self.routes,
            coaches: self.coaches,
            seats: self.seats,
            stations: self.stations,
            max_workers,
        }
    }

    /// Reads the plain text layout: `#` comments and blank lines are
    /// skipped, every other line holds
    /// `routes coaches seats stations refund buy inquiry`. The last such
    /// line wins.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = TrainConfig::default();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(|token| {
                    token.parse::<u32>().map_err(|e| ConfigError::Parse {
                        line: number + 1,
                        reason: format!("'{}': {}", token, e),
                    })
                })
                .collect::<Result<Vec<u32>, _>>()?;

            let &[routes, coaches, seats, stations, refund_ratio, buy_ratio, inquiry_ratio] =
                values.as_slice()
            else {
                return Err(ConfigError::Parse {
                    line: number + 1,
                    reason: format!("expected 7 integers, found {}", values.len()),
                });
            };

            config = TrainConfig {
                routes,
                coaches,
                seats,
                stations,
                refund_ratio,
                buy_ratio,
                inquiry_ratio,
            };
        }

        Ok(config)
    }

    /// Loads `path`, as RON when it ends in `.ron` and as the text layout
    /// otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if path.extension().is_some_and(|ext| ext == "ron") {
            Ok(ron::from_str(&text)?)
        } else {
            Self::parse(&text)
        }
    }

    /// Like [`TrainConfig::load`], but a missing file falls back to the
    /// defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "train config not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }
}
