// Copyright © 2024 Pathway

use std::sync::Arc;

use arcstr::ArcStr;
use log::debug;

use super::logical::{LogicalPlan, StreamHandle};
use super::physical::{OperatorId, PhysicalPlan, PlanDelta};
use super::{Error, Result};

/// Merge behaviour combining the partitions of a stream back into one.
pub trait Unifier: Send + Sync {
    /// Output ports of the merge operator. A usable unifier has exactly one.
    fn output_ports(&self) -> Vec<ArcStr>;
}

/// Pass-through merge used when the producing port does not bring its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUnifier;

impl Unifier for DefaultUnifier {
    fn output_ports(&self) -> Vec<ArcStr> {
        vec![arcstr::literal!("outputPort")]
    }
}

/// Creates a merge operator for `stream` with a single output carrying the
/// stream. The new operator is recorded in `delta` as created.
pub fn create_unifier(
    logical: &LogicalPlan,
    stream: StreamHandle,
    physical: &mut PhysicalPlan,
    delta: &mut PlanDelta,
) -> Result<OperatorId> {
    let source = logical.stream(stream)?.source();
    let producer = logical.operator(source.operator)?;
    let unifier = match &logical.output_port(source)?.unifier {
        Some(unifier) => unifier.clone(),
        None => {
            debug!("Using default unifier for {}.{}", producer.name(), source.port);
            Arc::new(DefaultUnifier)
        }
    };

    let port = match <[ArcStr; 1]>::try_from(unifier.output_ports()) {
        Ok([port]) => port,
        Err(found) => return Err(Error::UnifierOutputArity { found }),
    };

    let name = format!("{}#merge#{}", producer.name(), source.port);
    let id = physical.create_operator(source.operator, &name, Some(unifier), delta);
    physical.add_output(id, stream, port)?;
    Ok(id)
}

/// Port name under which a merge operator reads the partitions of `stream`.
pub(super) fn merge_port(logical: &LogicalPlan, stream: StreamHandle) -> Result<ArcStr> {
    let source = logical.stream(stream)?.source();
    Ok(format!("<merge#{}>", source.port).into())
}
