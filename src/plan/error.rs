// Copyright © 2024 Pathway

use std::result;

use arcstr::ArcStr;

use super::config::Error as ConfigError;
use super::{InputId, OperatorId, OutputId};

/// Failures of the physical-plan layer.
///
/// Apart from the handle errors, every variant signals a broken internal
/// invariant. A caller receiving one should refuse the plan change that
/// triggered it instead of retrying.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid logical operator handle")]
    InvalidOperatorHandle,

    #[error("invalid stream handle")]
    InvalidStreamHandle,

    #[error("unknown physical operator {0}")]
    UnknownOperator(OperatorId),

    #[error("unknown output endpoint {0}")]
    UnknownOutput(OutputId),

    #[error("unknown input endpoint {0}")]
    UnknownInput(InputId),

    #[error("operator {operator:?} has no port {port:?}")]
    InvalidPortReference { operator: ArcStr, port: ArcStr },

    #[error("operator {operator:?} already has a port named {port:?}")]
    DuplicatePort { operator: ArcStr, port: ArcStr },

    #[error("input port {port:?} of operator {operator:?} is already connected to a stream")]
    PortAlreadyConnected { operator: ArcStr, port: ArcStr },

    #[error("unifier should have single output port, found: {found:?}")]
    UnifierOutputArity { found: Vec<ArcStr> },

    #[error("operator {0} has no output for the stream")]
    MissingStreamOutput(OperatorId),

    #[error("operator {0} is still read from and cannot be removed")]
    OperatorStillReachable(OperatorId),

    #[error("link between output {output} and input {input} is not mutual")]
    BrokenLink { output: OutputId, input: InputId },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = result::Result<T, E>;
