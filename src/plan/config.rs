// Copyright © 2024 Pathway

use crate::env::{parse_setting, Error as EnvError};
use log::warn;

const UNIFIER_LIMIT: &str = "UNIFIER_LIMIT";
const MAX_FAN_IN: &str = "MAX_FAN_IN";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("can't build unifiers with zero fan-in")]
    ZeroFanIn,

    #[error(transparent)]
    EnvError(#[from] EnvError),
}

/// Plan-wide defaults for unifier construction.
///
/// Output ports that configure their own limit take precedence over
/// `unifier_limit`. `max_fan_in` caps every limit, including per-port ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    unifier_limit: Option<usize>,
    max_fan_in: Option<usize>,
}

impl Config {
    pub fn unifier_limit(&self) -> Option<usize> {
        self.unifier_limit
    }

    pub fn max_fan_in(&self) -> Option<usize> {
        self.max_fan_in
    }

    pub fn with_unifier_limit(mut self, limit: usize) -> Result<Self, Error> {
        self.unifier_limit = normalize_limit(limit, "unifier limit")?;
        Ok(self)
    }

    pub fn with_max_fan_in(mut self, max_fan_in: usize) -> Result<Self, Error> {
        self.max_fan_in = normalize_limit(max_fan_in, "maximum fan-in")?;
        Ok(self)
    }

    /// Effective cascading limit for a port. `None` means no cascading.
    pub fn effective_limit(&self, port_limit: Option<usize>) -> Option<usize> {
        let limit = port_limit.or(self.unifier_limit)?;
        if limit <= 1 {
            return None;
        }
        match self.max_fan_in {
            Some(max_fan_in) if limit > max_fan_in => {
                warn!("unifier limit {limit} exceeds the maximum fan-in ({max_fan_in}), reducing");
                Some(max_fan_in)
            }
            _ => Some(limit),
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(limit) = parse_setting::<usize>(UNIFIER_LIMIT)? {
            config = config.with_unifier_limit(limit)?;
        }
        if let Some(max_fan_in) = parse_setting::<usize>(MAX_FAN_IN)? {
            config = config.with_max_fan_in(max_fan_in)?;
        }
        Ok(config)
    }
}

fn normalize_limit(limit: usize, what: &str) -> Result<Option<usize>, Error> {
    match limit {
        0 => Err(Error::ZeroFanIn),
        1 => {
            warn!("{what} of 1 disables cascading unifiers");
            Ok(None)
        }
        limit => Ok(Some(limit)),
    }
}
