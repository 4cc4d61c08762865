use std::sync::Arc;

use crate::config::SessionConfig;
use crate::endpoint::RpgEndpoint;
use crate::errors::Result;
use crate::flow::{FlowGraph, ProcessorNode};
use crate::flowfile::{retrieve_next, FlowFileRecord};
use crate::library::NativeLibrary;

/// An endpoint, the flow built on it and the flow's processors, torn down
/// in that reverse order.
///
/// Field order is drop order.
pub struct Session {
    processors: Vec<ProcessorNode>,
    graph: FlowGraph,
    endpoint: RpgEndpoint,
}

impl Session {
    /// Connects to `url`/`port` and builds an empty flow on the connection.
    pub fn open(lib: &Arc<NativeLibrary>, url: &str, port: &str) -> Result<Self> {
        let endpoint = RpgEndpoint::create(lib, url, port)?;
        let graph = FlowGraph::create(&endpoint)?;
        Ok(Self {
            processors: Vec::new(),
            graph,
            endpoint,
        })
    }

    /// Loads the configured library, connects and builds every configured
    /// processor with its properties.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let lib = NativeLibrary::load(&config.library)?;
        Self::with_library(&lib, config)
    }

    /// Like [`Session::from_config`] with an already loaded library; the
    /// config's library path is ignored.
    pub fn with_library(
        lib: &Arc<NativeLibrary>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let mut session = Self::open(lib, &config.url, &config.port)?;
        for processor in &config.processors {
            let node = session.add_processor(&processor.name)?;
            for (key, value) in &processor.properties {
                node.set_property(key, value)?;
            }
        }
        Ok(session)
    }

    pub fn add_processor(&mut self, name: &str) -> Result<&mut ProcessorNode> {
        let node = self.graph.add_processor(name)?;
        self.processors.push(node);
        let last = self.processors.len() - 1;
        Ok(&mut self.processors[last])
    }

    pub fn processors(&self) -> &[ProcessorNode] {
        &self.processors
    }

    /// First processor named `name`.
    pub fn processor_mut(&mut self, name: &str) -> Option<&mut ProcessorNode> {
        self.processors
            .iter_mut()
            .find(|p| p.name() == name)
    }

    pub fn endpoint(&self) -> &RpgEndpoint {
        &self.endpoint
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// See [`retrieve_next`].
    pub fn retrieve_next(&self) -> Result<Option<FlowFileRecord>> {
        retrieve_next(&self.endpoint, &self.graph)
    }

    pub fn transmit(&self, record: &FlowFileRecord) -> Result<()> {
        self.endpoint.transmit(record)
    }

    /// Disposes the flow, then the endpoint. Flow files still held by the
    /// caller postpone both until the last of them is released.
    pub fn close(self) {
        let Session {
            processors,
            mut graph,
            mut endpoint,
        } = self;
        drop(processors);
        if let Err(e) = graph.dispose().and_then(|_| endpoint.dispose()) {
            log::warn!("{}: {}", endpoint.url(), e);
        }
    }
}
