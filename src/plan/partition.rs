// Copyright © 2024 Pathway

use std::collections::BTreeSet;
use std::fmt::{self, Display};

use arcstr::ArcStr;
use indexmap::IndexMap;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use super::logical::OperatorMeta;
use super::{Error, Result};

/// The subset of keyed records a partition receives: a record with key hash
/// `h` belongs to it when `h & mask` is one of `partitions`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKeys {
    pub mask: u32,
    pub partitions: BTreeSet<u32>,
}

impl PartitionKeys {
    pub fn new(mask: u32, partitions: impl IntoIterator<Item = u32>) -> Self {
        Self {
            mask,
            partitions: partitions.into_iter().collect(),
        }
    }

    pub fn matches(&self, key_hash: u32) -> bool {
        self.partitions.contains(&(key_hash & self.mask))
    }
}

impl Display for PartitionKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}[{}]", self.mask, self.partitions.iter().format(", "))
    }
}

/// Partition assignment of one physical instance, as decided by the
/// partitioner: the keys it should receive on each of its input ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    keys: IndexMap<ArcStr, PartitionKeys>,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_keys(mut self, port: impl Into<ArcStr>, keys: PartitionKeys) -> Self {
        self.keys.insert(port.into(), keys);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = (&ArcStr, &PartitionKeys)> {
        self.keys.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys to filter `port` by. Every port named by this partition has to
    /// exist on `operator`.
    pub fn keys_for(&self, operator: &OperatorMeta, port: &str) -> Result<Option<&PartitionKeys>> {
        if let Some(unknown) = self
            .keys
            .keys()
            .find(|name| operator.input_port(name).is_none())
        {
            return Err(Error::InvalidPortReference {
                operator: operator.name().clone(),
                port: unknown.clone(),
            });
        }
        Ok(self.keys.get(port))
    }
}
