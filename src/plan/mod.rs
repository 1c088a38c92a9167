// Copyright © 2024 Pathway

pub mod config;
pub use config::Config;

pub mod error;
pub use self::error::{Error, Result};

pub mod logical;
pub use logical::{
    InputPortAttributes, InputPortRef, LogicalOperatorHandle, LogicalPlan, OperatorMeta,
    OutputPortAttributes, OutputPortRef, StreamHandle, StreamMeta,
};

pub mod partition;
pub use partition::{Partition, PartitionKeys};

pub mod physical;
pub use physical::{InputId, OperatorId, OutputId, PhysicalOperator, PhysicalPlan, PlanDelta};

pub mod endpoint;
pub use endpoint::{InputEndpoint, OutputEndpoint};

pub mod unifier;
pub use unifier::{create_unifier, DefaultUnifier, Unifier};

pub mod stream_mapping;
pub use stream_mapping::StreamMapping;

pub mod planner;
pub use planner::PhysicalPlanner;

pub mod snapshot;
pub use snapshot::TopologySnapshot;
