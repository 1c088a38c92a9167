// Copyright © 2024 Pathway

use arcstr::ArcStr;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use super::logical::LogicalPlan;
use super::partition::PartitionKeys;
use super::physical::{OperatorId, PhysicalPlan};
use super::Result;

/// Structure of a physical plan without endpoint identities, so that two
/// plans wired the same way compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub operators: Vec<OperatorSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSnapshot {
    pub id: OperatorId,
    pub name: ArcStr,
    pub unifier: bool,
    pub outputs: Vec<OutputSnapshot>,
    pub inputs: Vec<InputSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSnapshot {
    pub port: ArcStr,
    pub stream: ArcStr,
    pub sinks: Vec<(OperatorId, ArcStr)>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub port: ArcStr,
    pub stream: ArcStr,
    pub source: OperatorId,
    pub partition_keys: Option<PartitionKeys>,
}

impl TopologySnapshot {
    pub fn capture(logical: &LogicalPlan, physical: &PhysicalPlan) -> Result<Self> {
        let mut operators = Vec::new();
        for operator in physical.operators().sorted_by_key(|o| o.id()) {
            let mut outputs = Vec::new();
            for &id in operator.outputs() {
                let output = physical.output(id)?;
                let mut sinks = Vec::new();
                for &sink in output.sinks() {
                    let input = physical.input(sink)?;
                    sinks.push((input.operator(), input.port().clone()));
                }
                sinks.sort();
                outputs.push(OutputSnapshot {
                    port: output.port().clone(),
                    stream: logical.stream(output.stream())?.name().clone(),
                    sinks,
                });
            }
            let mut inputs = Vec::new();
            for &id in operator.inputs() {
                let input = physical.input(id)?;
                inputs.push(InputSnapshot {
                    port: input.port().clone(),
                    stream: logical.stream(input.stream())?.name().clone(),
                    source: physical.output(input.source())?.operator(),
                    partition_keys: input.partition_keys().cloned(),
                });
            }
            inputs.sort();
            operators.push(OperatorSnapshot {
                id: operator.id(),
                name: operator.name().clone(),
                unifier: operator.is_unifier(),
                outputs,
                inputs,
            });
        }
        Ok(Self { operators })
    }

    pub fn operator(&self, id: OperatorId) -> Option<&OperatorSnapshot> {
        self.operators.iter().find(|operator| operator.id == id)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
