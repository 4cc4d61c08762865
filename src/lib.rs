//! Client-side bindings for driving a separately compiled MiNiFi-style flow
//! engine through its exported C entry points.
//!
//! ```text
//! NativeLibrary::load -> RpgEndpoint::create -> FlowGraph::create
//!     -> FlowGraph::add_processor -> ProcessorNode::set_property
//!     -> retrieve_next (repeatedly) -> FlowFileRecord
//! ```
//!
//! Every native handle has exactly one owner and is released once, either
//! explicitly through `dispose` or on drop. Teardown runs flow files first,
//! then the flow (which takes its processors with it), then the endpoint.
//! Loaded libraries stay mapped until the process exits.

pub mod command;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod ffi;
pub mod flow;
pub mod flowfile;
mod handle;
pub mod library;
pub mod session;
#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use config::{ProcessorConfig, SessionConfig};
pub use endpoint::RpgEndpoint;
pub use errors::{BindingError, Result};
pub use flow::{FlowGraph, ProcessorNode};
pub use flowfile::{retrieve_next, FlowFileRecord};
pub use library::{FunctionTable, NativeLibrary};
pub use session::Session;
