// Copyright © 2024 Pathway

use indexmap::{IndexMap, IndexSet};
use log::info;

use super::logical::{LogicalOperatorHandle, LogicalPlan, StreamHandle};
use super::partition::Partition;
use super::physical::{OperatorId, PhysicalPlan, PlanDelta};
use super::stream_mapping::StreamMapping;
use super::{Error, Result};

/// Keeps the physical plan of a logical plan up to date as operators are
/// (re)partitioned.
///
/// Mutations are expected from a single control loop; nothing here locks.
#[derive(Debug)]
pub struct PhysicalPlanner {
    logical: LogicalPlan,
    physical: PhysicalPlan,
    mappings: IndexMap<StreamHandle, StreamMapping>,
}

impl PhysicalPlanner {
    pub fn new(logical: LogicalPlan) -> Self {
        let mappings = logical
            .streams()
            .map(|(handle, _)| (handle, StreamMapping::new(handle)))
            .collect();
        Self {
            logical,
            physical: PhysicalPlan::new(),
            mappings,
        }
    }

    pub fn logical(&self) -> &LogicalPlan {
        &self.logical
    }

    pub fn physical(&self) -> &PhysicalPlan {
        &self.physical
    }

    pub fn mapping(&self, stream: StreamHandle) -> Result<&StreamMapping> {
        self.mappings.get(&stream).ok_or(Error::InvalidStreamHandle)
    }

    /// Replaces all instances of `operator` with one instance per entry of
    /// `partitions` and rewires every stream it produces or consumes.
    pub fn set_partitions(
        &mut self,
        operator: LogicalOperatorHandle,
        partitions: Vec<Option<Partition>>,
    ) -> Result<PlanDelta> {
        let name = self.logical.operator(operator)?.name().clone();
        let mut delta = PlanDelta::default();

        for instance in self.physical.instances(operator).to_vec() {
            self.physical.unlink(instance)?;
            self.physical.remove_operator(instance, &mut delta)?;
        }
        for partition in partitions {
            self.physical
                .add_partition(&self.logical, operator, partition, &mut delta)?;
        }
        let instances = self.physical.instances(operator).to_vec();
        info!("Operator {name} mapped to {} instances", instances.len());

        for stream in self.logical.streams_from(operator) {
            let mapping = self
                .mappings
                .get_mut(&stream)
                .ok_or(Error::InvalidStreamHandle)?;
            delta.merge(mapping.set_sources(&self.logical, &mut self.physical, &instances)?);
        }
        for stream in self.logical.streams_into(operator) {
            let mapping = self
                .mappings
                .get_mut(&stream)
                .ok_or(Error::InvalidStreamHandle)?;
            delta.merge(mapping.recompute(&self.logical, &mut self.physical)?);
        }
        Ok(delta)
    }

    /// Merge operators a stream currently owns.
    pub fn unifiers(&self, stream: StreamHandle) -> Result<Vec<OperatorId>> {
        Ok(self.mapping(stream)?.unifiers().collect())
    }

    /// Every operator that has to be deployed for the plan to run: regular
    /// instances, their private unifiers and the unifiers of every stream.
    pub fn all_operators(&self) -> IndexSet<OperatorId> {
        let mut operators = IndexSet::new();
        for (handle, _) in self.logical.operators() {
            for &instance in self.physical.instances(handle) {
                operators.insert(instance);
                if let Ok(operator) = self.physical.operator(instance) {
                    operators.extend(operator.private_unifiers().map(|(_, unifier)| unifier));
                }
            }
        }
        for mapping in self.mappings.values() {
            operators.extend(mapping.unifiers());
        }
        operators
    }
}
