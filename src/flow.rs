use std::collections::HashMap;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::endpoint::{EndpointState, GraphSlot, RpgEndpoint};
use crate::errors::{BindingError, Result};
use crate::ffi::{CFlow, CProcessor};
use crate::handle::{lock, NativeHandle};
use crate::library::NativeLibrary;

pub(crate) struct PlanState {
    pub lib: Arc<NativeLibrary>,
    pub label: String,
    pub plan: NativeHandle<CFlow>,
    pub endpoint: Arc<Mutex<EndpointState>>,
    /// Retrieved flow files not yet released.
    pub records: usize,
    /// The flow was dropped while records were out; the last one to go
    /// finishes the teardown.
    orphaned: bool,
}

impl PlanState {
    /// Frees the plan and, transitively, every processor added to it.
    fn release(&mut self) -> bool {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => return false,
        };
        match self.lib.table().free_flow {
            Some(free_flow) => {
                log::debug!("{}: releasing plan", self.label);
                unsafe { free_flow(plan.as_ptr()) };
            }
            None => log::warn!(
                "{}: library cannot free flows, plan abandoned",
                self.label
            ),
        }
        true
    }

    /// Accounts for a retrieved record going away.
    pub(crate) fn record_released(plan: &Arc<Mutex<PlanState>>) {
        let finish = {
            let mut state = lock(plan);
            state.records = state.records.saturating_sub(1);
            state.records == 0 && state.orphaned
        };
        if finish {
            release_plan(plan);
        }
    }
}

/// Frees the plan, then marks the endpoint's flow as gone. The plan lock is
/// not held while the endpoint is locked.
fn release_plan(plan: &Arc<Mutex<PlanState>>) {
    let endpoint = {
        let mut state = lock(plan);
        if !state.release() {
            return;
        }
        Arc::clone(&state.endpoint)
    };
    lock(&endpoint).graph = GraphSlot::Retired;
}

/// The in-process flow built against an [`RpgEndpoint`].
///
/// Exactly one flow can be built per endpoint. It must be disposed after
/// every flow file retrieved through it and before the endpoint. Dropping it
/// disposes it, or leaves that to the last outstanding flow file.
pub struct FlowGraph {
    plan: Arc<Mutex<PlanState>>,
}

impl FlowGraph {
    /// Builds the flow on `endpoint`'s connection.
    ///
    /// # Errors
    /// - [`BindingError::UseAfterDispose`] if the endpoint is disposed.
    /// - [`BindingError::PreconditionViolation`] if a flow was already built
    ///   on this endpoint.
    /// - [`BindingError::FlowCreation`] if the native call returns null.
    pub fn create(endpoint: &RpgEndpoint) -> Result<Self> {
        let shared = endpoint.shared();
        let mut state = lock(shared);
        let instance = state.instance.get()?;
        if state.graph != GraphSlot::Vacant {
            return Err(BindingError::PreconditionViolation(format!(
                "{}: a flow has already been built on this endpoint",
                state.label
            )));
        }

        let ptr = unsafe { (state.lib.table().create_new_flow)(instance) };
        let plan = NativeHandle::new(ptr, "flow").ok_or_else(|| {
            BindingError::FlowCreation(format!(
                "{}: create_new_flow returned null",
                state.label
            ))
        })?;
        state.graph = GraphSlot::Live;
        log::debug!("{}: flow created", state.label);

        Ok(Self {
            plan: Arc::new(Mutex::new(PlanState {
                lib: Arc::clone(&state.lib),
                label: format!("{}/flow", state.label),
                plan,
                endpoint: Arc::clone(shared),
                records: 0,
                orphaned: false,
            })),
        })
    }

    /// Adds the processor named `name` to the flow. Names are not checked
    /// here; the engine rejects the ones it does not know.
    pub fn add_processor(&self, name: &str) -> Result<ProcessorNode> {
        let state = lock(&self.plan);
        let plan = state.plan.get()?;
        let c_name = CString::new(name).map_err(|e| {
            BindingError::from(e).relabel(BindingError::FlowCreation)
        })?;

        let ptr =
            unsafe { (state.lib.table().add_processor)(plan, c_name.as_ptr()) };
        let processor = NonNull::new(ptr).ok_or_else(|| {
            BindingError::FlowCreation(format!(
                "{}: add_processor returned null for {}",
                state.label, name
            ))
        })?;
        log::debug!("{}: added processor {}", state.label, name);

        Ok(ProcessorNode {
            name: name.to_owned(),
            processor,
            plan: Arc::clone(&self.plan),
            properties: HashMap::new(),
        })
    }

    pub fn is_disposed(&self) -> bool {
        !lock(&self.plan).plan.is_live()
    }

    /// Whether this flow was built on `endpoint`.
    pub fn belongs_to(&self, endpoint: &RpgEndpoint) -> bool {
        Arc::ptr_eq(&lock(&self.plan).endpoint, endpoint.shared())
    }

    pub(crate) fn plan(&self) -> &Arc<Mutex<PlanState>> {
        &self.plan
    }

    /// Releases the plan and every processor in it. A second call does
    /// nothing.
    ///
    /// # Errors
    /// [`BindingError::PreconditionViolation`] while flow files retrieved
    /// through this flow are still live; nothing is released in that case.
    pub fn dispose(&mut self) -> Result<()> {
        {
            let state = lock(&self.plan);
            if state.records > 0 {
                return Err(BindingError::PreconditionViolation(format!(
                    "{}: {} retrieved flow file(s) must be disposed first",
                    state.label, state.records
                )));
            }
        }
        release_plan(&self.plan);
        Ok(())
    }
}

impl Drop for FlowGraph {
    fn drop(&mut self) {
        let deferred = {
            let mut state = lock(&self.plan);
            if state.records > 0 {
                log::debug!(
                    "{}: dropped with {} flow file(s) out, teardown deferred",
                    state.label,
                    state.records
                );
                state.orphaned = true;
            }
            state.orphaned
        };
        if !deferred {
            release_plan(&self.plan);
        }
    }
}

/// A processor inside a [`FlowGraph`]. Its native record belongs to the
/// flow's plan and goes away with it.
pub struct ProcessorNode {
    name: String,
    processor: NonNull<CProcessor>,
    plan: Arc<Mutex<PlanState>>,
    properties: HashMap<String, String>,
}

// The processor pointer is only used while the plan's lock is held and the
// plan is still live.
unsafe impl Send for ProcessorNode {}

impl ProcessorNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties accepted so far. A key set twice holds its last value.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Assigns `value` to property `key`. Whether the key means anything for
    /// this processor is up to the engine.
    ///
    /// # Errors
    /// - [`BindingError::UseAfterDispose`] once the owning flow is disposed.
    /// - [`BindingError::Property`] for an empty key, a NUL byte in either
    ///   string, or a non-zero status from the engine.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let state = lock(&self.plan);
        state.plan.get()?;
        if key.is_empty() {
            return Err(BindingError::Property(format!(
                "{}: empty property key",
                self.name
            )));
        }
        let c_key = CString::new(key)
            .map_err(|e| BindingError::from(e).relabel(BindingError::Property))?;
        let c_value = CString::new(value)
            .map_err(|e| BindingError::from(e).relabel(BindingError::Property))?;

        let status = unsafe {
            (state.lib.table().set_property)(
                self.processor.as_ptr(),
                c_key.as_ptr(),
                c_value.as_ptr(),
            )
        };
        if status != 0 {
            return Err(BindingError::Property(format!(
                "{}: {} rejected {}={} with status {}",
                state.label, self.name, key, value, status
            )));
        }
        log::trace!("{}: {}.{} = {}", state.label, self.name, key, value);
        drop(state);

        self.properties
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::flowfile::retrieve_next;
    use crate::stub::{self, Call, StubRecord};

    fn endpoint() -> RpgEndpoint {
        RpgEndpoint::create(&stub::library(), "http://localhost:8080/", "input1")
            .unwrap()
    }

    #[test]
    fn flow_is_built_on_connection() {
        stub::reset();
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();

        assert!(graph.belongs_to(&endpoint));
        assert!(!graph.is_disposed());
        assert_eq!(stub::count(&Call::CreateFlow), 1);
    }

    #[test]
    fn null_flow_is_a_creation_error() {
        stub::reset();
        stub::configure(|s| s.fail_flow = true);
        let mut endpoint = endpoint();

        assert!(matches!(
            FlowGraph::create(&endpoint),
            Err(BindingError::FlowCreation(_))
        ));
        // nothing live was left behind
        assert!(endpoint.dispose().is_ok());
    }

    #[test]
    fn second_flow_on_endpoint_is_rejected() {
        stub::reset();
        let endpoint = endpoint();
        let mut first = FlowGraph::create(&endpoint).unwrap();

        assert!(matches!(
            FlowGraph::create(&endpoint),
            Err(BindingError::PreconditionViolation(_))
        ));
        first.dispose().unwrap();
        assert!(matches!(
            FlowGraph::create(&endpoint),
            Err(BindingError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn flow_on_disposed_endpoint() {
        stub::reset();
        let mut endpoint = endpoint();
        endpoint.dispose().unwrap();

        assert!(matches!(
            FlowGraph::create(&endpoint),
            Err(BindingError::UseAfterDispose(_))
        ));
    }

    #[rstest]
    #[case("GetFile")]
    #[case("GenerateFlowFile")]
    #[case("LogAttribute")]
    fn known_processors_are_added(#[case] name: &str) {
        stub::reset();
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();

        let processor = graph.add_processor(name).unwrap();
        assert_eq!(processor.name(), name);
        assert!(processor.properties().is_empty());
    }

    #[test]
    fn unknown_processor_is_a_creation_error() {
        stub::reset();
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();

        assert!(matches!(
            graph.add_processor("NoSuchProcessor"),
            Err(BindingError::FlowCreation(_))
        ));
        assert!(matches!(
            graph.add_processor("Get\0File"),
            Err(BindingError::FlowCreation(_))
        ));
    }

    #[test]
    fn property_last_write_wins() {
        stub::reset();
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();

        processor.set_property("Input Directory", "/tmp/a").unwrap();
        processor.set_property("Input Directory", "/tmp/b").unwrap();

        let sets: Vec<Call> = stub::calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetProperty(..)))
            .collect();
        assert_eq!(
            sets,
            vec![
                Call::SetProperty(
                    "Input Directory".to_owned(),
                    "/tmp/a".to_owned()
                ),
                Call::SetProperty(
                    "Input Directory".to_owned(),
                    "/tmp/b".to_owned()
                ),
            ]
        );
        assert_eq!(processor.property("Input Directory"), Some("/tmp/b"));
        assert_eq!(processor.properties().len(), 1);
    }

    #[test]
    fn rejected_property_is_not_recorded() {
        stub::reset();
        stub::configure(|s| s.property_status = 1);
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();

        assert!(matches!(
            processor.set_property("Bogus", "x"),
            Err(BindingError::Property(_))
        ));
        assert_eq!(processor.property("Bogus"), None);
    }

    #[test]
    fn empty_key_is_rejected_without_native_call() {
        stub::reset();
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();

        assert!(matches!(
            processor.set_property("", "x"),
            Err(BindingError::Property(_))
        ));
        assert_eq!(stub::count(&Call::SetProperty("".to_owned(), "x".to_owned())), 0);
    }

    #[test]
    fn disposed_flow_rejects_everything() {
        stub::reset();
        let endpoint = endpoint();
        let mut graph = FlowGraph::create(&endpoint).unwrap();
        let mut processor = graph.add_processor("GetFile").unwrap();

        graph.dispose().unwrap();
        assert!(graph.is_disposed());
        assert!(matches!(
            processor.set_property("Input Directory", "/tmp"),
            Err(BindingError::UseAfterDispose(_))
        ));
        assert!(matches!(
            graph.add_processor("GetFile"),
            Err(BindingError::UseAfterDispose(_))
        ));
    }

    #[test]
    fn dispose_frees_plan_once() {
        stub::reset();
        let endpoint = endpoint();
        let mut graph = FlowGraph::create(&endpoint).unwrap();

        graph.dispose().unwrap();
        graph.dispose().unwrap();
        drop(graph);
        assert_eq!(stub::count(&Call::FreeFlow), 1);
    }

    #[test]
    fn endpoint_outlives_live_flow() {
        stub::reset();
        let mut endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();

        assert!(matches!(
            endpoint.dispose(),
            Err(BindingError::PreconditionViolation(_))
        ));
        assert_eq!(stub::count(&Call::FreeInstance), 0);
        assert_eq!(stub::count(&Call::FreePort), 0);

        // dropping in the wrong order still tears down flow first
        drop(endpoint);
        assert_eq!(stub::count(&Call::FreeInstance), 0);
        drop(graph);
        let calls = stub::calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(tail, &[Call::FreeFlow, Call::FreeInstance, Call::FreePort]);
    }

    #[test]
    fn live_flow_file_blocks_teardown() {
        stub::reset();
        stub::push_record(StubRecord::sized(8));
        let mut endpoint = endpoint();
        let mut graph = FlowGraph::create(&endpoint).unwrap();
        let mut record = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        let before = stub::calls().len();

        assert!(matches!(
            graph.dispose(),
            Err(BindingError::PreconditionViolation(_))
        ));
        assert!(matches!(
            endpoint.dispose(),
            Err(BindingError::PreconditionViolation(_))
        ));
        assert_eq!(stub::calls().len(), before);

        record.dispose();
        graph.dispose().unwrap();
        endpoint.dispose().unwrap();
        let calls = stub::calls();
        assert_eq!(
            &calls[before..],
            &[
                Call::FreeFlowFile,
                Call::FreeFlow,
                Call::FreeInstance,
                Call::FreePort
            ]
        );
    }

    #[test]
    fn dropped_flow_waits_for_last_flow_file() {
        stub::reset();
        stub::push_record(StubRecord::sized(1));
        stub::push_record(StubRecord::sized(2));
        let endpoint = endpoint();
        let graph = FlowGraph::create(&endpoint).unwrap();
        let first = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        let second = retrieve_next(&endpoint, &graph).unwrap().unwrap();

        drop(graph);
        drop(endpoint);
        drop(first);
        assert_eq!(stub::count(&Call::FreeFlow), 0);
        assert_eq!(stub::count(&Call::FreePort), 0);

        drop(second);
        let calls = stub::calls();
        let tail = &calls[calls.len() - 5..];
        assert_eq!(
            tail,
            &[
                Call::FreeFlowFile,
                Call::FreeFlowFile,
                Call::FreeFlow,
                Call::FreeInstance,
                Call::FreePort
            ]
        );
    }
}
