// Copyright © 2024 Pathway

use std::sync::Arc;

use arcstr::ArcStr;
use derivative::Derivative;
use id_arena::{Arena, ArenaBehavior};
use indexmap::IndexMap;

use super::config::Config;
use super::unifier::Unifier;
use super::{Error, Result};

macro_rules! define_handle {
    ($handle:ident) => {
        #[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
        pub struct $handle {
            arena_id: u32,
            index: u32,
        }

        impl ArenaBehavior for $handle {
            type Id = Self;

            fn new_id(arena_id: u32, index: usize) -> Self {
                let index = index.try_into().unwrap();
                Self { arena_id, index }
            }

            fn arena_id(handle: Self) -> u32 {
                handle.arena_id
            }

            fn index(handle: Self) -> usize {
                handle.index.try_into().unwrap()
            }
        }
    };
}

define_handle!(LogicalOperatorHandle);

define_handle!(StreamHandle);

/// Per-port settings of a producing port.
#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct OutputPortAttributes {
    /// Maximum fan-in of a single unifier. Falls back to the plan-wide
    /// default when unset.
    pub unifier_limit: Option<usize>,
    #[derivative(Debug = "ignore")]
    pub unifier: Option<Arc<dyn Unifier>>,
}

impl OutputPortAttributes {
    #[must_use]
    pub fn with_unifier_limit(mut self, limit: usize) -> Self {
        self.unifier_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_unifier(mut self, unifier: Arc<dyn Unifier>) -> Self {
        self.unifier = Some(unifier);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InputPortAttributes {
    /// The port follows the partitioning of its upstream operator and is
    /// wired one-to-one elsewhere.
    pub partition_parallel: bool,
}

impl InputPortAttributes {
    pub fn parallel() -> Self {
        Self {
            partition_parallel: true,
        }
    }
}

#[derive(Debug)]
pub struct OperatorMeta {
    name: ArcStr,
    inputs: IndexMap<ArcStr, InputPortAttributes>,
    outputs: IndexMap<ArcStr, OutputPortAttributes>,
}

impl OperatorMeta {
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn input_port(&self, port: &str) -> Option<&InputPortAttributes> {
        self.inputs.get(port)
    }

    pub fn output_port(&self, port: &str) -> Option<&OutputPortAttributes> {
        self.outputs.get(port)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &ArcStr> {
        self.inputs.keys()
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &ArcStr> {
        self.outputs.keys()
    }

    fn invalid_port(&self, port: &ArcStr) -> Error {
        Error::InvalidPortReference {
            operator: self.name.clone(),
            port: port.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputPortRef {
    pub operator: LogicalOperatorHandle,
    pub port: ArcStr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputPortRef {
    pub operator: LogicalOperatorHandle,
    pub port: ArcStr,
}

#[derive(Debug)]
pub struct StreamMeta {
    name: ArcStr,
    source: OutputPortRef,
    sinks: Vec<InputPortRef>,
}

impl StreamMeta {
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn source(&self) -> &OutputPortRef {
        &self.source
    }

    pub fn sinks(&self) -> &[InputPortRef] {
        &self.sinks
    }
}

/// The unpartitioned data-flow graph. Built once, then only read by the
/// physical layer.
#[derive(Debug)]
pub struct LogicalPlan {
    config: Config,
    operators: Arena<OperatorMeta, LogicalOperatorHandle>,
    streams: Arena<StreamMeta, StreamHandle>,
}

impl LogicalPlan {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            operators: Arena::new(),
            streams: Arena::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn add_operator(&mut self, name: impl Into<ArcStr>) -> LogicalOperatorHandle {
        self.operators.alloc(OperatorMeta {
            name: name.into(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
        })
    }

    pub fn add_input_port(
        &mut self,
        operator: LogicalOperatorHandle,
        port: impl Into<ArcStr>,
        attributes: InputPortAttributes,
    ) -> Result<InputPortRef> {
        let port = port.into();
        let meta = self
            .operators
            .get_mut(operator)
            .ok_or(Error::InvalidOperatorHandle)?;
        if meta.inputs.contains_key(&port) || meta.outputs.contains_key(&port) {
            return Err(Error::DuplicatePort {
                operator: meta.name.clone(),
                port,
            });
        }
        meta.inputs.insert(port.clone(), attributes);
        Ok(InputPortRef { operator, port })
    }

    pub fn add_output_port(
        &mut self,
        operator: LogicalOperatorHandle,
        port: impl Into<ArcStr>,
        attributes: OutputPortAttributes,
    ) -> Result<OutputPortRef> {
        let port = port.into();
        let meta = self
            .operators
            .get_mut(operator)
            .ok_or(Error::InvalidOperatorHandle)?;
        if meta.inputs.contains_key(&port) || meta.outputs.contains_key(&port) {
            return Err(Error::DuplicatePort {
                operator: meta.name.clone(),
                port,
            });
        }
        meta.outputs.insert(port.clone(), attributes);
        Ok(OutputPortRef { operator, port })
    }

    /// Connects one producing port to any number of consuming ports.
    ///
    /// A port takes part in at most one stream.
    pub fn add_stream(
        &mut self,
        name: impl Into<ArcStr>,
        source: OutputPortRef,
        sinks: Vec<InputPortRef>,
    ) -> Result<StreamHandle> {
        self.output_port(&source)?;
        if self.streams.iter().any(|(_, s)| s.source == source) {
            let meta = self.operator(source.operator)?;
            return Err(Error::PortAlreadyConnected {
                operator: meta.name.clone(),
                port: source.port,
            });
        }
        for (position, sink) in sinks.iter().enumerate() {
            self.input_port(sink)?;
            let connected = sinks[..position].contains(sink)
                || self
                    .streams
                    .iter()
                    .any(|(_, stream)| stream.sinks.contains(sink));
            if connected {
                let meta = self.operator(sink.operator)?;
                return Err(Error::PortAlreadyConnected {
                    operator: meta.name.clone(),
                    port: sink.port.clone(),
                });
            }
        }
        Ok(self.streams.alloc(StreamMeta {
            name: name.into(),
            source,
            sinks,
        }))
    }

    pub fn operator(&self, handle: LogicalOperatorHandle) -> Result<&OperatorMeta> {
        self.operators
            .get(handle)
            .ok_or(Error::InvalidOperatorHandle)
    }

    pub fn stream(&self, handle: StreamHandle) -> Result<&StreamMeta> {
        self.streams.get(handle).ok_or(Error::InvalidStreamHandle)
    }

    pub fn operators(&self) -> impl Iterator<Item = (LogicalOperatorHandle, &OperatorMeta)> {
        self.operators.iter()
    }

    pub fn streams(&self) -> impl Iterator<Item = (StreamHandle, &StreamMeta)> {
        self.streams.iter()
    }

    pub fn output_port(&self, port: &OutputPortRef) -> Result<&OutputPortAttributes> {
        let meta = self.operator(port.operator)?;
        meta.output_port(&port.port)
            .ok_or_else(|| meta.invalid_port(&port.port))
    }

    pub fn input_port(&self, port: &InputPortRef) -> Result<&InputPortAttributes> {
        let meta = self.operator(port.operator)?;
        meta.input_port(&port.port)
            .ok_or_else(|| meta.invalid_port(&port.port))
    }

    /// Streams produced by `operator`, in creation order.
    pub fn streams_from(&self, operator: LogicalOperatorHandle) -> Vec<StreamHandle> {
        self.streams
            .iter()
            .filter(|(_, stream)| stream.source.operator == operator)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Streams read by `operator`, in creation order.
    pub fn streams_into(&self, operator: LogicalOperatorHandle) -> Vec<StreamHandle> {
        self.streams
            .iter()
            .filter(|(_, stream)| stream.sinks.iter().any(|s| s.operator == operator))
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Cascading limit for the stream's producing port, `None` if unifiers
    /// should not be cascaded.
    pub fn unifier_limit(&self, stream: StreamHandle) -> Result<Option<usize>> {
        let attributes = self.output_port(&self.stream(stream)?.source)?;
        Ok(self.config.effective_limit(attributes.unifier_limit))
    }
}

impl Default for LogicalPlan {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
