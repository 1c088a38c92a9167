// Copyright © 2024 Pathway

use arcstr::ArcStr;
use indexmap::IndexSet;

use super::logical::StreamHandle;
use super::partition::PartitionKeys;
use super::physical::{InputId, OperatorId, OutputId, PhysicalPlan};
use super::{Error, Result};

#[derive(Debug)]
pub struct OutputEndpoint {
    id: OutputId,
    operator: OperatorId,
    port: ArcStr,
    stream: StreamHandle,
    sinks: IndexSet<InputId>,
}

impl OutputEndpoint {
    pub(super) fn new(id: OutputId, operator: OperatorId, port: ArcStr, stream: StreamHandle) -> Self {
        Self {
            id,
            operator,
            port,
            stream,
            sinks: IndexSet::new(),
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn port(&self) -> &ArcStr {
        &self.port
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// Inputs currently reading from this output.
    pub fn sinks(&self) -> &IndexSet<InputId> {
        &self.sinks
    }
}

#[derive(Debug)]
pub struct InputEndpoint {
    id: InputId,
    operator: OperatorId,
    port: ArcStr,
    stream: StreamHandle,
    partition_keys: Option<PartitionKeys>,
    source: OutputId,
}

impl InputEndpoint {
    pub fn id(&self) -> InputId {
        self.id
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn port(&self) -> &ArcStr {
        &self.port
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    pub fn partition_keys(&self) -> Option<&PartitionKeys> {
        self.partition_keys.as_ref()
    }

    pub fn source(&self) -> OutputId {
        self.source
    }
}

impl PhysicalPlan {
    /// Makes `port` of `target` read from `source`.
    ///
    /// Nothing changes if the port already reads the stream from `source`
    /// with the same keys; any other input of the port for that stream is
    /// dropped first. Returns whether a new link was made.
    pub fn link(
        &mut self,
        target: OperatorId,
        port: &ArcStr,
        source: OutputId,
        partition_keys: Option<&PartitionKeys>,
    ) -> Result<bool> {
        let stream = self.output(source)?.stream();
        let current = self.port_inputs(target, port, stream)?;
        if let [input] = current.as_slice() {
            let input = self.input(*input)?;
            if input.source == source && input.partition_keys.as_ref() == partition_keys {
                return Ok(false);
            }
        }
        for input in current {
            self.remove_input(input)?;
        }
        self.add_input(target, port.clone(), source, partition_keys.cloned())?;
        Ok(true)
    }

    /// Registers a new input of `target` on both ends, without checking for
    /// an existing one.
    pub fn add_input(
        &mut self,
        target: OperatorId,
        port: ArcStr,
        source: OutputId,
        partition_keys: Option<PartitionKeys>,
    ) -> Result<InputId> {
        self.operator(target)?;
        let id = self.next_input_id();
        let output = self
            .outputs
            .get_mut(&source)
            .ok_or(Error::UnknownOutput(source))?;
        output.sinks.insert(id);
        let stream = output.stream;
        self.operator_mut(target)?.inputs.push(id);
        self.inputs.insert(
            id,
            InputEndpoint {
                id,
                operator: target,
                port,
                stream,
                partition_keys,
                source,
            },
        );
        Ok(id)
    }

    pub fn remove_input(&mut self, id: InputId) -> Result<()> {
        let input = self
            .inputs
            .shift_remove(&id)
            .ok_or(Error::UnknownInput(id))?;
        if let Some(output) = self.outputs.get_mut(&input.source) {
            output.sinks.shift_remove(&id);
        }
        self.operator_mut(input.operator)?
            .inputs
            .retain(|&other| other != id);
        Ok(())
    }

    /// Drops every input of `port` of `operator` reading `stream`.
    pub fn unlink_port(&mut self, operator: OperatorId, port: &str, stream: StreamHandle) -> Result<()> {
        for input in self.port_inputs(operator, port, stream)? {
            self.remove_input(input)?;
        }
        Ok(())
    }

    /// Drops every input of `operator`.
    pub fn unlink_inputs(&mut self, operator: OperatorId) -> Result<()> {
        let inputs = std::mem::take(&mut self.operator_mut(operator)?.inputs);
        for id in inputs {
            if let Some(input) = self.inputs.shift_remove(&id) {
                if let Some(output) = self.outputs.get_mut(&input.source) {
                    output.sinks.shift_remove(&id);
                }
            }
        }
        Ok(())
    }

    /// Detaches `operator` from the graph in both directions: readers of its
    /// outputs lose those inputs and its own inputs are dropped.
    ///
    /// Has to happen before an operator is reused or removed.
    pub fn unlink(&mut self, operator: OperatorId) -> Result<()> {
        let outputs = self.operator(operator)?.outputs.clone();
        for output in outputs {
            let sinks = match self.outputs.get_mut(&output) {
                Some(endpoint) => std::mem::take(&mut endpoint.sinks),
                None => continue,
            };
            for sink in sinks {
                if let Some(input) = self.inputs.shift_remove(&sink) {
                    self.operator_mut(input.operator)?
                        .inputs
                        .retain(|&other| other != sink);
                }
            }
        }
        self.unlink_inputs(operator)
    }

    fn port_inputs(&self, operator: OperatorId, port: &str, stream: StreamHandle) -> Result<Vec<InputId>> {
        Ok(self
            .operator(operator)?
            .inputs
            .iter()
            .copied()
            .filter(|id| {
                self.inputs
                    .get(id)
                    .is_some_and(|input| input.stream == stream && *input.port == *port)
            })
            .collect())
    }
}
