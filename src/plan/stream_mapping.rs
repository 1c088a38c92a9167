// Copyright © 2024 Pathway

use std::collections::VecDeque;
use std::mem;

use arcstr::ArcStr;
use indexmap::IndexSet;
use log::debug;

use super::logical::{LogicalPlan, StreamHandle};
use super::partition::PartitionKeys;
use super::physical::{OperatorId, OutputId, PhysicalPlan, PlanDelta};
use super::unifier::{create_unifier, merge_port};
use super::Result;

/// Physical wiring of one logical stream: which outputs produce it and which
/// unifiers merge them for the consumers.
///
/// Depending on the number of producing partitions and the fan-in limit of
/// the producing port, unifiers are created as needed and possibly cascaded.
/// Consumers that filter the stream by partition keys get a unifier of their
/// own, attached to the consuming operator rather than to this mapping.
#[derive(Debug)]
pub struct StreamMapping {
    stream: StreamHandle,
    upstream: Vec<OutputId>,
    cascading_unifiers: IndexSet<OperatorId>,
    final_unifier: Option<OperatorId>,
}

impl StreamMapping {
    pub fn new(stream: StreamHandle) -> Self {
        Self {
            stream,
            upstream: Vec::new(),
            cascading_unifiers: IndexSet::new(),
            final_unifier: None,
        }
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// Outputs of the producing partitions, in the order they were given.
    pub fn upstream(&self) -> &[OutputId] {
        &self.upstream
    }

    pub fn final_unifier(&self) -> Option<OperatorId> {
        self.final_unifier
    }

    pub fn cascading_unifiers(&self) -> &IndexSet<OperatorId> {
        &self.cascading_unifiers
    }

    /// All merge operators owned by this mapping.
    pub fn unifiers(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.final_unifier
            .into_iter()
            .chain(self.cascading_unifiers.iter().copied())
    }

    /// Replaces the producing side with the outputs of `partitions` that
    /// carry this stream, then rebuilds the wiring.
    pub fn set_sources(
        &mut self,
        logical: &LogicalPlan,
        physical: &mut PhysicalPlan,
        partitions: &[OperatorId],
    ) -> Result<PlanDelta> {
        self.upstream.clear();
        for &partition in partitions {
            for &output in physical.operator(partition)?.outputs() {
                if physical.output(output)?.stream() == self.stream {
                    self.upstream.push(output);
                }
            }
        }
        self.recompute(logical, physical)
    }

    /// Rebuilds the unifier tree and relinks every consumer.
    ///
    /// Does nothing until at least one consumer has physical instances.
    /// Existing cascading unifiers are reused before new ones are created;
    /// consumer-owned unifiers are rewired from scratch on every call.
    pub fn recompute(
        &mut self,
        logical: &LogicalPlan,
        physical: &mut PhysicalPlan,
    ) -> Result<PlanDelta> {
        let mut delta = PlanDelta::default();

        let downstream = self.downstream(logical, physical)?;
        if downstream.is_empty() {
            return Ok(delta);
        }

        for &unifier in &self.cascading_unifiers {
            physical.unlink(unifier)?;
        }
        if let Some(final_unifier) = self.final_unifier {
            physical.unlink(final_unifier)?;
        }

        let mut pool: VecDeque<OperatorId> = mem::take(&mut self.cascading_unifiers)
            .into_iter()
            .collect();
        for &unifier in &pool {
            delta.record_undeploy(unifier);
        }

        let merge_input = merge_port(logical, self.stream)?;
        let unifier_sources = match logical.unifier_limit(self.stream)? {
            Some(limit) if self.upstream.len() > limit => self.setup_cascading_unifiers(
                logical,
                physical,
                &mut pool,
                limit,
                &merge_input,
                &mut delta,
            )?,
            _ => self.upstream.clone(),
        };

        for unifier in pool {
            physical.remove_operator(unifier, &mut delta)?;
        }

        if self.upstream.len() <= 1 {
            if let Some(final_unifier) = self.final_unifier.take() {
                physical.remove_operator(final_unifier, &mut delta)?;
            }
        }

        let mut final_unifier_linked = false;
        for (consumer, port) in &downstream {
            let keys = partition_keys(logical, physical, *consumer, port)?;
            match (self.upstream.as_slice(), keys) {
                ([], _) => {
                    drop_private_unifier(physical, *consumer, port, &mut delta)?;
                    physical.unlink_port(*consumer, port, self.stream)?;
                }
                ([source], keys) => {
                    drop_private_unifier(physical, *consumer, port, &mut delta)?;
                    physical.link(*consumer, port, *source, keys.as_ref())?;
                }
                (_, None) => {
                    drop_private_unifier(physical, *consumer, port, &mut delta)?;
                    let final_unifier = match self.final_unifier {
                        Some(unifier) => unifier,
                        None => {
                            let unifier =
                                create_unifier(logical, self.stream, physical, &mut delta)?;
                            self.final_unifier = Some(unifier);
                            unifier
                        }
                    };
                    let output = physical.unifier_output(final_unifier)?;
                    physical.link(*consumer, port, output, None)?;
                    if !final_unifier_linked {
                        for &source in &unifier_sources {
                            physical.add_input(final_unifier, merge_input.clone(), source, None)?;
                        }
                        final_unifier_linked = true;
                    }
                }
                (_, Some(keys)) => {
                    debug!("Partitioned unifier for {consumer} {port} {keys}");
                    let unifier = match physical.operator(*consumer)?.private_unifier(port) {
                        Some(unifier) => unifier,
                        None => {
                            let unifier =
                                create_unifier(logical, self.stream, physical, &mut delta)?;
                            physical.set_private_unifier(*consumer, port.clone(), unifier)?;
                            unifier
                        }
                    };
                    let output = physical.unifier_output(unifier)?;
                    physical.link(*consumer, port, output, None)?;
                    // sources may change at any time, rebuild the inputs
                    physical.unlink_inputs(unifier)?;
                    for &source in &unifier_sources {
                        physical.add_input(
                            unifier,
                            merge_input.clone(),
                            source,
                            Some(keys.clone()),
                        )?;
                    }
                }
            }
        }

        if !final_unifier_linked {
            if let Some(final_unifier) = self.final_unifier.take() {
                physical.unlink(final_unifier)?;
                physical.remove_operator(final_unifier, &mut delta)?;
            }
        }

        Ok(delta)
    }

    /// Consumer instances and ports to be wired by this mapping. Consumers
    /// without physical instances yet and parallel partitioned ports are
    /// left out.
    fn downstream(
        &self,
        logical: &LogicalPlan,
        physical: &PhysicalPlan,
    ) -> Result<IndexSet<(OperatorId, ArcStr)>> {
        let mut downstream = IndexSet::new();
        for sink in logical.stream(self.stream)?.sinks() {
            if logical.input_port(sink)?.partition_parallel || !physical.has_mapping(sink.operator)
            {
                continue;
            }
            for &instance in physical.instances(sink.operator) {
                downstream.insert((instance, sink.port.clone()));
            }
        }
        Ok(downstream)
    }

    /// Groups `upstream` by `limit`, level after level, until a level fits
    /// into a single unifier. Returns the outputs of the top level.
    fn setup_cascading_unifiers(
        &mut self,
        logical: &LogicalPlan,
        physical: &mut PhysicalPlan,
        pool: &mut VecDeque<OperatorId>,
        limit: usize,
        merge_input: &ArcStr,
        delta: &mut PlanDelta,
    ) -> Result<Vec<OutputId>> {
        let mut level = self.upstream.clone();
        let mut depth = 0;
        loop {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(limit));
            for group in level.chunks(limit) {
                let unifier = match pool.pop_front() {
                    Some(unifier) => unifier,
                    None => create_unifier(logical, self.stream, physical, delta)?,
                };
                next_level.push(physical.unifier_output(unifier)?);
                self.cascading_unifiers.insert(unifier);
                for &source in group {
                    physical.add_input(unifier, merge_input.clone(), source, None)?;
                }
            }
            debug!(
                "Cascading level {depth}: {} sources merged by {} unifiers",
                level.len(),
                next_level.len()
            );
            if next_level.len() <= limit {
                return Ok(next_level);
            }
            level = next_level;
            depth += 1;
        }
    }
}

fn partition_keys(
    logical: &LogicalPlan,
    physical: &PhysicalPlan,
    consumer: OperatorId,
    port: &str,
) -> Result<Option<PartitionKeys>> {
    let consumer = physical.operator(consumer)?;
    let Some(partition) = consumer.partition() else {
        return Ok(None);
    };
    let meta = logical.operator(consumer.logical())?;
    Ok(partition.keys_for(meta, port)?.cloned())
}

/// Removes the unifier `consumer` kept for `port`, once the port no
/// longer needs one.
fn drop_private_unifier(
    physical: &mut PhysicalPlan,
    consumer: OperatorId,
    port: &str,
    delta: &mut PlanDelta,
) -> Result<()> {
    if let Some(unifier) = physical.take_private_unifier(consumer, port)? {
        debug!("Dropping partitioned unifier {unifier} of {consumer} {port}");
        physical.unlink(unifier)?;
        physical.remove_operator(unifier, delta)?;
    }
    Ok(())
}
