// Copyright © 2024 Pathway

use std::fmt::{self, Display};
use std::sync::Arc;

use arcstr::ArcStr;
use derivative::Derivative;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::{Deserialize, Serialize};

use super::endpoint::{InputEndpoint, OutputEndpoint};
use super::logical::{LogicalOperatorHandle, LogicalPlan, StreamHandle};
use super::partition::Partition;
use super::unifier::Unifier;
use super::{Error, Result};

macro_rules! define_id {
    ($id:ident) => {
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
        )]
        pub struct $id(pub u32);

        impl Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(OperatorId);

define_id!(OutputId);

define_id!(InputId);

#[derive(Derivative)]
#[derivative(Debug)]
pub struct PhysicalOperator {
    id: OperatorId,
    logical: LogicalOperatorHandle,
    name: ArcStr,
    partition: Option<Partition>,
    pub(super) outputs: Vec<OutputId>,
    pub(super) inputs: Vec<InputId>,
    #[derivative(Debug = "ignore")]
    unifier: Option<Arc<dyn Unifier>>,
    upstream_merge: IndexMap<ArcStr, OperatorId>,
}

impl PhysicalOperator {
    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn logical(&self) -> LogicalOperatorHandle {
        self.logical
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn partition(&self) -> Option<&Partition> {
        self.partition.as_ref()
    }

    pub fn outputs(&self) -> &[OutputId] {
        &self.outputs
    }

    pub fn inputs(&self) -> &[InputId] {
        &self.inputs
    }

    pub fn unifier(&self) -> Option<&Arc<dyn Unifier>> {
        self.unifier.as_ref()
    }

    pub fn is_unifier(&self) -> bool {
        self.unifier.is_some()
    }

    /// Unifier dedicated to `port` of this operator, used when the port
    /// filters its input by partition keys.
    pub fn private_unifier(&self, port: &str) -> Option<OperatorId> {
        self.upstream_merge.get(port).copied()
    }

    pub fn private_unifiers(&self) -> impl Iterator<Item = (&ArcStr, OperatorId)> {
        self.upstream_merge.iter().map(|(port, &id)| (port, id))
    }
}

/// Changes to the set of physical operators made by one plan mutation,
/// to be applied by whoever deploys the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanDelta {
    /// Operators that did not exist before.
    pub created: IndexSet<OperatorId>,
    /// Previously deployed operators that have to be stopped. Those that were
    /// not removed were rewired and must be deployed again.
    pub undeploy: IndexSet<OperatorId>,
    /// Operators that no longer exist.
    pub removed: IndexSet<OperatorId>,
}

impl PlanDelta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.undeploy.is_empty() && self.removed.is_empty()
    }

    pub fn redeploy(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.undeploy
            .iter()
            .copied()
            .filter(|id| !self.removed.contains(id))
    }

    pub fn record_created(&mut self, id: OperatorId) {
        self.created.insert(id);
    }

    pub fn record_undeploy(&mut self, id: OperatorId) {
        // never deployed yet
        if !self.created.contains(&id) {
            self.undeploy.insert(id);
        }
    }

    pub fn record_removed(&mut self, id: OperatorId) {
        if self.created.shift_remove(&id) {
            return;
        }
        self.undeploy.insert(id);
        self.removed.insert(id);
    }

    /// Folds a later delta into this one.
    pub fn merge(&mut self, other: PlanDelta) {
        for id in other.created {
            self.record_created(id);
        }
        for id in other.undeploy {
            if !other.removed.contains(&id) {
                self.record_undeploy(id);
            }
        }
        for id in other.removed {
            self.record_removed(id);
        }
    }
}

/// Registry of physical operator instances and of the endpoints that connect
/// them.
///
/// Endpoints refer to each other by id only; [`PhysicalPlan::check_links`]
/// verifies that both directions of every link agree.
#[derive(Debug, Default)]
pub struct PhysicalPlan {
    operators: IndexMap<OperatorId, PhysicalOperator>,
    pub(super) outputs: IndexMap<OutputId, OutputEndpoint>,
    pub(super) inputs: IndexMap<InputId, InputEndpoint>,
    mapping: IndexMap<LogicalOperatorHandle, Vec<OperatorId>>,
    next_operator_id: u32,
    next_output_id: u32,
    next_input_id: u32,
}

impl PhysicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a regular instance of `operator`, with one output for every
    /// stream the logical operator produces.
    pub fn add_partition(
        &mut self,
        logical: &LogicalPlan,
        operator: LogicalOperatorHandle,
        partition: Option<Partition>,
        delta: &mut PlanDelta,
    ) -> Result<OperatorId> {
        let name = logical.operator(operator)?.name().clone();
        let id = self.create_operator(operator, &name, None, delta);
        if let Some(slot) = self.operators.get_mut(&id) {
            slot.partition = partition;
        }
        for stream in logical.streams_from(operator) {
            let port = logical.stream(stream)?.source().port.clone();
            self.add_output(id, stream, port)?;
        }
        self.mapping.entry(operator).or_default().push(id);
        Ok(id)
    }

    /// Allocates a new instance without endpoints. Unifiers are not part of
    /// the logical operator's mapping.
    pub(super) fn create_operator(
        &mut self,
        logical: LogicalOperatorHandle,
        name_prefix: &str,
        unifier: Option<Arc<dyn Unifier>>,
        delta: &mut PlanDelta,
    ) -> OperatorId {
        let id = OperatorId(self.next_operator_id);
        self.next_operator_id += 1;
        self.operators.insert(
            id,
            PhysicalOperator {
                id,
                logical,
                name: format!("{name_prefix}#{id}").into(),
                partition: None,
                outputs: Vec::new(),
                inputs: Vec::new(),
                unifier,
                upstream_merge: IndexMap::new(),
            },
        );
        delta.record_created(id);
        id
    }

    pub fn add_output(
        &mut self,
        operator: OperatorId,
        stream: StreamHandle,
        port: ArcStr,
    ) -> Result<OutputId> {
        let id = OutputId(self.next_output_id);
        let owner = self.operator_mut(operator)?;
        owner.outputs.push(id);
        self.next_output_id += 1;
        self.outputs
            .insert(id, OutputEndpoint::new(id, operator, port, stream));
        Ok(id)
    }

    pub(super) fn next_input_id(&mut self) -> InputId {
        let id = InputId(self.next_input_id);
        self.next_input_id += 1;
        id
    }

    /// Destroys an instance that nothing reads from and that reads from
    /// nothing, together with the private unifiers it owns.
    pub fn remove_operator(&mut self, id: OperatorId, delta: &mut PlanDelta) -> Result<()> {
        let operator = self.operator(id)?;
        let reachable = !operator.inputs.is_empty()
            || operator
                .outputs
                .iter()
                .any(|output| self.outputs.get(output).is_some_and(|o| !o.sinks().is_empty()));
        if reachable {
            return Err(Error::OperatorStillReachable(id));
        }
        let Some(operator) = self.operators.shift_remove(&id) else {
            return Err(Error::UnknownOperator(id));
        };
        for output in &operator.outputs {
            self.outputs.shift_remove(output);
        }
        if let Some(instances) = self.mapping.get_mut(&operator.logical) {
            instances.retain(|&instance| instance != id);
            if instances.is_empty() {
                self.mapping.shift_remove(&operator.logical);
            }
        }
        debug!("Removing operator {}", operator.name);
        delta.record_removed(id);
        for (_, unifier) in operator.upstream_merge {
            self.unlink(unifier)?;
            self.remove_operator(unifier, delta)?;
        }
        Ok(())
    }

    pub fn has_mapping(&self, operator: LogicalOperatorHandle) -> bool {
        self.mapping.contains_key(&operator)
    }

    pub fn instances(&self, operator: LogicalOperatorHandle) -> &[OperatorId] {
        self.mapping.get(&operator).map_or(&[][..], Vec::as_slice)
    }

    pub fn operator(&self, id: OperatorId) -> Result<&PhysicalOperator> {
        self.operators.get(&id).ok_or(Error::UnknownOperator(id))
    }

    pub(super) fn operator_mut(&mut self, id: OperatorId) -> Result<&mut PhysicalOperator> {
        self.operators
            .get_mut(&id)
            .ok_or(Error::UnknownOperator(id))
    }

    pub fn operators(&self) -> impl Iterator<Item = &PhysicalOperator> {
        self.operators.values()
    }

    pub fn output(&self, id: OutputId) -> Result<&OutputEndpoint> {
        self.outputs.get(&id).ok_or(Error::UnknownOutput(id))
    }

    pub fn input(&self, id: InputId) -> Result<&InputEndpoint> {
        self.inputs.get(&id).ok_or(Error::UnknownInput(id))
    }

    pub(super) fn set_private_unifier(
        &mut self,
        consumer: OperatorId,
        port: ArcStr,
        unifier: OperatorId,
    ) -> Result<()> {
        self.operator_mut(consumer)?
            .upstream_merge
            .insert(port, unifier);
        Ok(())
    }

    pub(super) fn take_private_unifier(
        &mut self,
        consumer: OperatorId,
        port: &str,
    ) -> Result<Option<OperatorId>> {
        Ok(self
            .operator_mut(consumer)?
            .upstream_merge
            .shift_remove(port))
    }

    /// Output of `operator` carrying `stream`.
    pub fn stream_output(&self, operator: OperatorId, stream: StreamHandle) -> Result<OutputId> {
        let owner = self.operator(operator)?;
        owner
            .outputs
            .iter()
            .copied()
            .find(|id| self.outputs.get(id).is_some_and(|o| o.stream() == stream))
            .ok_or(Error::MissingStreamOutput(operator))
    }

    /// The single output of a merge operator.
    pub fn unifier_output(&self, unifier: OperatorId) -> Result<OutputId> {
        match self.operator(unifier)?.outputs.as_slice() {
            [output] => Ok(*output),
            outputs => Err(Error::UnifierOutputArity {
                found: outputs
                    .iter()
                    .filter_map(|id| self.outputs.get(id))
                    .map(|o| o.port().clone())
                    .collect(),
            }),
        }
    }

    /// Verifies that every link is registered on both of its ends.
    pub fn check_links(&self) -> Result<()> {
        for (&output_id, output) in &self.outputs {
            self.operator(output.operator())?;
            for &input_id in output.sinks() {
                let input = self.input(input_id)?;
                if input.source() != output_id {
                    return Err(Error::BrokenLink {
                        output: output_id,
                        input: input_id,
                    });
                }
            }
        }
        for (&input_id, input) in &self.inputs {
            let owner = self.operator(input.operator())?;
            let output = self.output(input.source())?;
            if !output.sinks().contains(&input_id) || !owner.inputs.contains(&input_id) {
                return Err(Error::BrokenLink {
                    output: input.source(),
                    input: input_id,
                });
            }
        }
        Ok(())
    }
}
