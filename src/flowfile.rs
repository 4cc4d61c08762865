use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_void;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::endpoint::RpgEndpoint;
use crate::errors::{BindingError, Result};
use crate::ffi::{
    CAttribute, CAttributeSet, CFlowFile, ADD_ATTRIBUTE, CREATE_FLOWFILE,
};
use crate::flow::{FlowGraph, PlanState};
use crate::handle::{lock, NativeHandle};
use crate::library::NativeLibrary;

/// A unit of data handed over by the engine: its size, where its payload
/// lives, and its attributes.
///
/// Each record owns its native counterpart exclusively. It is released by
/// [`FlowFileRecord::dispose`] or on drop. A record retrieved from a flow
/// keeps that flow from being disposed until it is released.
pub struct FlowFileRecord {
    size: u64,
    content_location: Option<String>,
    attributes: HashMap<String, String>,
    handle: NativeHandle<CFlowFile>,
    lib: Arc<NativeLibrary>,
    origin: Option<Arc<Mutex<PlanState>>>,
}

impl FlowFileRecord {
    /// Takes ownership of `ptr` and decodes it. `ptr` is released even if
    /// decoding fails.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at a flow file record produced by `lib`
    /// that nobody else owns.
    unsafe fn from_raw(
        lib: &Arc<NativeLibrary>,
        ptr: *mut CFlowFile,
    ) -> Result<Option<Self>> {
        let handle = match NativeHandle::new(ptr, "flow file") {
            Some(handle) => handle,
            None => return Ok(None),
        };
        let mut record = Self {
            size: 0,
            content_location: None,
            attributes: HashMap::new(),
            handle,
            lib: Arc::clone(lib),
            origin: None,
        };
        record.decode()?;
        Ok(Some(record))
    }

    unsafe fn decode(&mut self) -> Result<()> {
        let raw = &*self.handle.get()?;
        self.size = u64::try_from(raw.size).map_err(|_| {
            BindingError::Retrieval(format!("negative size {}", raw.size))
        })?;
        self.content_location = if raw.content_location.is_null() {
            None
        } else {
            Some(
                CStr::from_ptr(raw.content_location)
                    .to_str()
                    .map_err(|e| {
                        BindingError::Retrieval(format!(
                            "content location is not UTF-8: {}",
                            e
                        ))
                    })?
                    .to_owned(),
            )
        };
        self.attributes = decode_attributes(raw.attributes)?;
        Ok(())
    }

    /// Creates a record for the file at `path`, ready to be sent with
    /// [`RpgEndpoint::transmit`].
    pub fn from_file<P: AsRef<Path>>(
        lib: &Arc<NativeLibrary>,
        path: P,
    ) -> Result<Self> {
        let path = path.as_ref();
        let create = lib
            .table()
            .create_flowfile
            .ok_or(BindingError::Unsupported(CREATE_FLOWFILE))?;
        let c_path = path
            .to_str()
            .ok_or_else(|| {
                BindingError::InvalidString(path.display().to_string())
            })
            .and_then(|p| Ok(CString::new(p)?))?;

        let ptr = unsafe { create(c_path.as_ptr()) };
        unsafe { Self::from_raw(lib, ptr) }?.ok_or_else(|| {
            BindingError::Retrieval(format!(
                "create_flowfile returned null for {}",
                path.display()
            ))
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opaque reference to where the payload is stored.
    pub fn content_location(&self) -> Option<&str> {
        self.content_location.as_deref()
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn is_disposed(&self) -> bool {
        !self.handle.is_live()
    }

    pub(crate) fn raw(&self) -> Result<*mut CFlowFile> {
        self.handle.get()
    }

    pub(crate) fn library(&self) -> &Arc<NativeLibrary> {
        &self.lib
    }

    /// Sets attribute `key` on the native record. The value is passed with
    /// its NUL terminator included in the size.
    pub fn add_attribute(&mut self, key: &str, value: &str) -> Result<()> {
        let ptr = self.handle.get()?;
        let add = self
            .lib
            .table()
            .add_attribute
            .ok_or(BindingError::Unsupported(ADD_ATTRIBUTE))?;
        let c_key = CString::new(key)?;
        let c_value = CString::new(value)?;
        let bytes = c_value.as_bytes_with_nul();

        let status = unsafe {
            add(
                ptr,
                c_key.as_ptr(),
                bytes.as_ptr() as *const c_void,
                bytes.len(),
            )
        };
        if status != 0 {
            return Err(BindingError::Property(format!(
                "add_attribute rejected {}={} with status {}",
                key, value, status
            )));
        }
        self.attributes
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    /// Releases the native record. The decoded size, location and
    /// attributes stay readable. A second call does nothing.
    pub fn dispose(&mut self) {
        let ptr = match self.handle.take() {
            Some(ptr) => ptr,
            None => return,
        };
        match self.lib.table().free_flowfile {
            Some(free_flowfile) => unsafe { free_flowfile(ptr.as_ptr()) },
            None => log::warn!(
                "{}: library cannot free flow files, record abandoned",
                self.lib.label()
            ),
        }
        if let Some(plan) = self.origin.take() {
            PlanState::record_released(&plan);
        }
    }
}

impl Drop for FlowFileRecord {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for FlowFileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowFileRecord")
            .field("size", &self.size)
            .field("content_location", &self.content_location)
            .field("attributes", &self.attributes)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

unsafe fn decode_attributes(
    ptr: *mut c_void,
) -> Result<HashMap<String, String>> {
    let mut attributes = HashMap::new();
    if ptr.is_null() {
        return Ok(attributes);
    }
    let set = &*(ptr as *const CAttributeSet);
    if set.size == 0 {
        return Ok(attributes);
    }
    if set.attributes.is_null() {
        return Err(BindingError::Retrieval(format!(
            "{} attributes announced without storage",
            set.size
        )));
    }

    let entries: &[CAttribute] =
        std::slice::from_raw_parts(set.attributes, set.size);
    for entry in entries {
        if entry.key.is_null() {
            return Err(BindingError::Retrieval(
                "attribute without a key".to_owned(),
            ));
        }
        let key = CStr::from_ptr(entry.key).to_str().map_err(|e| {
            BindingError::Retrieval(format!("attribute key is not UTF-8: {}", e))
        })?;
        let value = if entry.value.is_null() || entry.value_size == 0 {
            ""
        } else {
            let bytes = std::slice::from_raw_parts(
                entry.value as *const u8,
                entry.value_size,
            );
            std::str::from_utf8(bytes)
                .map_err(|e| {
                    BindingError::Retrieval(format!(
                        "attribute {} is not UTF-8: {}",
                        key, e
                    ))
                })?
                .trim_end_matches('\0')
        };
        attributes.insert(key.to_owned(), value.to_owned());
    }
    Ok(attributes)
}

/// Asks the engine for the next flow file produced by `graph`.
///
/// Blocks for as long as the engine takes to poll the remote side; there is
/// no timeout and no way to interrupt the call. `Ok(None)` means nothing is
/// available right now (or the connection closed) and is not an error.
///
/// # Errors
/// - [`BindingError::PreconditionViolation`] if `graph` was not built on
///   `endpoint`.
/// - [`BindingError::UseAfterDispose`] if either one is disposed.
/// - [`BindingError::Retrieval`] if the engine returns a malformed record;
///   the record is released before returning.
pub fn retrieve_next(
    endpoint: &RpgEndpoint,
    graph: &FlowGraph,
) -> Result<Option<FlowFileRecord>> {
    if !graph.belongs_to(endpoint) {
        return Err(BindingError::PreconditionViolation(format!(
            "flow was not built on {}",
            endpoint.url()
        )));
    }
    let connection = lock(endpoint.shared());
    let instance = connection.instance.get()?;
    let mut plan_state = lock(graph.plan());
    let plan = plan_state.plan.get()?;

    log::trace!("{}: waiting for next flow file", plan_state.label);
    let ptr =
        unsafe { (connection.lib.table().get_next_flow_file)(instance, plan) };
    let mut record =
        unsafe { FlowFileRecord::from_raw(&connection.lib, ptr) }?;
    if let Some(record) = record.as_mut() {
        record.origin = Some(Arc::clone(graph.plan()));
        plan_state.records += 1;
    }
    match &record {
        Some(record) => log::debug!(
            "{}: received {} bytes with {} attributes",
            plan_state.label,
            record.size(),
            record.attributes().len()
        ),
        None => log::debug!("{}: no flow file available", plan_state.label),
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use super::*;
    use crate::stub::{self, Call, StubRecord};

    fn open() -> (RpgEndpoint, FlowGraph) {
        let endpoint = RpgEndpoint::create(
            &stub::library(),
            "http://localhost:8080/",
            "input1",
        )
        .unwrap();
        let graph = FlowGraph::create(&endpoint).unwrap();
        (endpoint, graph)
    }

    #[test]
    fn null_flow_file_is_empty_result() {
        stub::reset();
        let (endpoint, graph) = open();

        let next = retrieve_next(&endpoint, &graph).unwrap();
        assert!(next.is_none());
        assert_eq!(stub::count(&Call::GetNextFlowFile), 1);
    }

    #[test]
    fn record_is_decoded() {
        stub::reset();
        stub::push_record(StubRecord::sized(10).with_attribute("a", "1"));
        let (endpoint, graph) = open();

        let record = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        assert_eq!(record.size(), 10);
        assert_eq!(record.content_location(), Some("/content/10"));

        let expected: HashMap<String, String> =
            [("a".to_owned(), "1".to_owned())].into_iter().collect();
        assert_eq!(record.attributes(), &expected);
    }

    #[test]
    fn null_attributes_are_empty() {
        stub::reset();
        stub::push_record(StubRecord {
            size: 3,
            content_location: None,
            attributes: None,
        });
        let (endpoint, graph) = open();

        let record = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        assert!(record.attributes().is_empty());
        assert_eq!(record.content_location(), None);
    }

    #[test]
    fn negative_size_is_malformed_and_released() {
        stub::reset();
        stub::push_record(StubRecord::sized(-1));
        let (endpoint, graph) = open();

        assert!(matches!(
            retrieve_next(&endpoint, &graph),
            Err(BindingError::Retrieval(_))
        ));
        assert_eq!(stub::count(&Call::FreeFlowFile), 1);
    }

    #[test]
    fn records_are_served_in_order() {
        stub::reset();
        stub::push_record(StubRecord::sized(1));
        stub::push_record(StubRecord::sized(2));
        let (endpoint, graph) = open();

        let sizes: Vec<u64> = std::iter::from_fn(|| {
            retrieve_next(&endpoint, &graph).unwrap()
        })
        .map(|record| record.size())
        .collect();
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn record_dispose_is_idempotent() {
        stub::reset();
        stub::push_record(StubRecord::sized(5));
        let (endpoint, graph) = open();

        let mut record = retrieve_next(&endpoint, &graph).unwrap().unwrap();
        record.dispose();
        record.dispose();
        assert!(record.is_disposed());
        assert_eq!(record.size(), 5);
        drop(record);
        assert_eq!(stub::count(&Call::FreeFlowFile), 1);
    }

    #[test]
    fn disposed_flow_cannot_retrieve() {
        stub::reset();
        let (endpoint, mut graph) = open();
        graph.dispose().unwrap();

        assert!(matches!(
            retrieve_next(&endpoint, &graph),
            Err(BindingError::UseAfterDispose(_))
        ));
        assert_eq!(stub::count(&Call::GetNextFlowFile), 0);
    }

    #[test]
    fn foreign_flow_is_rejected() {
        stub::reset();
        let (endpoint, _graph) = open();
        let (_other, other_graph) = open();

        assert!(matches!(
            retrieve_next(&endpoint, &other_graph),
            Err(BindingError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn outgoing_record_collects_attributes() {
        stub::reset();
        let dir = TempDir::new("flowfile").unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, b"0123456789").unwrap();

        let lib = stub::library();
        let mut record = FlowFileRecord::from_file(&lib, &file).unwrap();
        assert_eq!(record.size(), 10);
        assert_eq!(record.content_location(), file.to_str());

        record.add_attribute("filename", "data.txt").unwrap();
        record.add_attribute("filename", "renamed.txt").unwrap();
        assert_eq!(record.attribute("filename"), Some("renamed.txt"));

        record.dispose();
        assert!(matches!(
            record.add_attribute("late", "1"),
            Err(BindingError::UseAfterDispose(_))
        ));
    }

    #[test]
    fn missing_file_cannot_become_a_record() {
        stub::reset();
        let dir = TempDir::new("flowfile").unwrap();
        let result =
            FlowFileRecord::from_file(&stub::library(), dir.path().join("nope"));
        assert!(matches!(result, Err(BindingError::Retrieval(_))));
    }

    #[test]
    fn outgoing_records_need_symbol() {
        stub::reset();
        let result =
            FlowFileRecord::from_file(&stub::minimal_library(), "/tmp/any");
        assert!(matches!(
            result,
            Err(BindingError::Unsupported(CREATE_FLOWFILE))
        ));
    }
}
