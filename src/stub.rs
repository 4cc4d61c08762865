//! In-process stand-in for the native engine.
//!
//! Every entry point records a [`Call`] in a thread-local log and allocates
//! real records with the layouts from [`crate::ffi`], so bindings built on
//! [`library`] behave exactly as they would against the shared object,
//! minus the remote side. Flow files are served from a per-thread queue
//! filled with [`push_record`]; an empty queue yields a null flow file.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use crate::ffi::*;
use crate::library::{FunctionTable, NativeLibrary};

/// Processor names the stand-in engine knows how to instantiate.
pub const KNOWN_PROCESSORS: &[&str] =
    &["GetFile", "GenerateFlowFile", "PutFile", "LogAttribute"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePort(String),
    CreateInstance(String),
    FreePort,
    FreeInstance,
    CreateFlow,
    FreeFlow,
    AddProcessor(String),
    SetProperty(String, String),
    GetNextFlowFile,
    FreeFlowFile,
    CreateFlowFile(String),
    AddAttribute(String, String),
    Transmit,
}

/// A flow file queued for `get_next_flow_file`.
#[derive(Debug, Clone, Default)]
pub struct StubRecord {
    pub size: i32,
    pub content_location: Option<String>,
    /// `None` produces a null attributes pointer.
    pub attributes: Option<Vec<(String, String)>>,
}

impl StubRecord {
    pub fn sized(size: i32) -> Self {
        Self {
            size,
            content_location: Some(format!("/content/{}", size)),
            attributes: None,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes
            .get_or_insert_with(Vec::new)
            .push((key.to_owned(), value.to_owned()));
        self
    }
}

/// Knobs and recordings of the current thread's engine.
#[derive(Default)]
pub struct StubState {
    pub calls: Vec<Call>,
    pub queue: VecDeque<StubRecord>,
    pub fail_port: bool,
    pub fail_instance: bool,
    pub fail_flow: bool,
    pub property_status: c_int,
    pub free_port_status: c_int,
    pub attribute_status: c_int,
    pub transmit_status: c_int,
}

thread_local! {
    static STATE: RefCell<StubState> = RefCell::new(StubState::default());
}

/// Clears recorded calls, queued records and configured failures.
pub fn reset() {
    STATE.with(|state| *state.borrow_mut() = StubState::default());
}

pub fn configure(f: impl FnOnce(&mut StubState)) {
    STATE.with(|state| f(&mut state.borrow_mut()));
}

pub fn calls() -> Vec<Call> {
    STATE.with(|state| state.borrow().calls.clone())
}

/// Number of recorded calls equal to `call`.
pub fn count(call: &Call) -> usize {
    STATE.with(|state| {
        state
            .borrow()
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    })
}

pub fn push_record(record: StubRecord) {
    configure(|state| state.queue.push_back(record));
}

fn record(call: Call) {
    configure(|state| state.calls.push(call));
}

fn setting<T>(f: impl FnOnce(&StubState) -> T) -> T {
    STATE.with(|state| f(&state.borrow()))
}

/// Full table, including every optional entry point.
pub fn table() -> FunctionTable {
    FunctionTable {
        free_instance: Some(free_instance as FreeInstanceFn),
        free_flow: Some(free_flow as FreeFlowFn),
        free_flowfile: Some(free_flowfile as FreeFlowFileFn),
        create_flowfile: Some(create_flowfile as CreateFlowFileFn),
        add_attribute: Some(add_attribute as AddAttributeFn),
        transmit_flowfile: Some(transmit_flowfile as TransmitFlowFileFn),
        ..minimal_table()
    }
}

/// Only the required entry points.
pub fn minimal_table() -> FunctionTable {
    FunctionTable {
        create_port,
        create_instance,
        free_port,
        create_new_flow,
        add_processor,
        set_property,
        get_next_flow_file,
        free_instance: None,
        free_flow: None,
        free_flowfile: None,
        create_flowfile: None,
        add_attribute: None,
        transmit_flowfile: None,
    }
}

pub fn library() -> Arc<NativeLibrary> {
    NativeLibrary::from_table("stub", table())
}

pub fn minimal_library() -> Arc<NativeLibrary> {
    NativeLibrary::from_table("stub-minimal", minimal_table())
}

fn into_c(s: &str) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

unsafe fn free_c(p: *mut c_char) {
    if !p.is_null() {
        drop(CString::from_raw(p));
    }
}

unsafe fn read_c(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        CStr::from_ptr(p).to_string_lossy().into_owned()
    }
}

fn build_attributes(pairs: &[(String, String)]) -> *mut c_void {
    let entries: Box<[CAttribute]> = pairs
        .iter()
        .map(|(key, value)| CAttribute {
            key: into_c(key),
            value: into_c(value) as *const c_void,
            value_size: value.len() + 1,
        })
        .collect();
    let size = entries.len();
    let attributes = Box::into_raw(entries) as *const CAttribute;
    Box::into_raw(Box::new(CAttributeSet { attributes, size })) as *mut c_void
}

unsafe fn take_attributes(set: *mut c_void) -> Vec<(String, String)> {
    if set.is_null() {
        return Vec::new();
    }
    let set = Box::from_raw(set as *mut CAttributeSet);
    let entries = Box::from_raw(ptr::slice_from_raw_parts_mut(
        set.attributes as *mut CAttribute,
        set.size,
    ));
    entries
        .iter()
        .map(|entry| {
            let pair = (read_c(entry.key), read_c(entry.value as *const c_char));
            free_c(entry.key as *mut c_char);
            free_c(entry.value as *mut c_char);
            pair
        })
        .collect()
}

fn build_flowfile(record: &StubRecord) -> *mut CFlowFile {
    let attributes = match &record.attributes {
        Some(pairs) => build_attributes(pairs),
        None => ptr::null_mut(),
    };
    let content_location = match &record.content_location {
        Some(location) => into_c(location),
        None => ptr::null_mut(),
    };
    Box::into_raw(Box::new(CFlowFile {
        size: record.size,
        in_: ptr::null_mut(),
        content_location,
        attributes,
    }))
}

unsafe extern "C" fn create_port(port_id: *const c_char) -> *mut NifiPort {
    let port_id = read_c(port_id);
    record(Call::CreatePort(port_id.clone()));
    if setting(|s| s.fail_port) {
        return ptr::null_mut();
    }
    Box::into_raw(Box::new(NifiPort {
        port_id: into_c(&port_id),
    }))
}

unsafe extern "C" fn free_port(port: *mut NifiPort) -> c_int {
    record(Call::FreePort);
    if !port.is_null() {
        let port = Box::from_raw(port);
        free_c(port.port_id);
    }
    setting(|s| s.free_port_status)
}

unsafe extern "C" fn create_instance(
    url: *const c_char,
    port: *mut NifiPort,
) -> *mut NifiInstance {
    let url = read_c(url);
    record(Call::CreateInstance(url.clone()));
    if setting(|s| s.fail_instance) || port.is_null() {
        return ptr::null_mut();
    }
    Box::into_raw(Box::new(NifiInstance {
        instance_ptr: into_c(&url) as *mut c_void,
        port: NifiPort {
            port_id: into_c(&read_c((*port).port_id)),
        },
    }))
}

unsafe extern "C" fn free_instance(instance: *mut NifiInstance) {
    record(Call::FreeInstance);
    if !instance.is_null() {
        let instance = Box::from_raw(instance);
        free_c(instance.instance_ptr as *mut c_char);
        free_c(instance.port.port_id);
    }
}

unsafe extern "C" fn create_new_flow(instance: *mut NifiInstance) -> *mut CFlow {
    record(Call::CreateFlow);
    if setting(|s| s.fail_flow) || instance.is_null() {
        return ptr::null_mut();
    }
    let processors: Box<Vec<*mut CProcessor>> = Box::default();
    Box::into_raw(Box::new(CFlow {
        plan: Box::into_raw(processors) as *mut c_void,
    }))
}

unsafe extern "C" fn free_flow(flow: *mut CFlow) {
    record(Call::FreeFlow);
    if flow.is_null() {
        return;
    }
    let flow = Box::from_raw(flow);
    let processors = Box::from_raw(flow.plan as *mut Vec<*mut CProcessor>);
    for processor in processors.iter() {
        drop(Box::from_raw(*processor));
    }
}

unsafe extern "C" fn add_processor(
    flow: *mut CFlow,
    name: *const c_char,
) -> *mut CProcessor {
    let name = read_c(name);
    record(Call::AddProcessor(name.clone()));
    if flow.is_null() || !KNOWN_PROCESSORS.contains(&name.as_str()) {
        return ptr::null_mut();
    }
    let processor = Box::into_raw(Box::new(CProcessor {
        processor_ptr: ptr::null_mut(),
    }));
    let processors = &mut *((*flow).plan as *mut Vec<*mut CProcessor>);
    processors.push(processor);
    processor
}

unsafe extern "C" fn set_property(
    processor: *mut CProcessor,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    record(Call::SetProperty(read_c(key), read_c(value)));
    if processor.is_null() {
        return -1;
    }
    setting(|s| s.property_status)
}

unsafe extern "C" fn get_next_flow_file(
    instance: *mut NifiInstance,
    flow: *mut CFlow,
) -> *mut CFlowFile {
    record(Call::GetNextFlowFile);
    if instance.is_null() || flow.is_null() {
        return ptr::null_mut();
    }
    match STATE.with(|state| state.borrow_mut().queue.pop_front()) {
        Some(next) => build_flowfile(&next),
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn free_flowfile(flow_file: *mut CFlowFile) {
    record(Call::FreeFlowFile);
    if flow_file.is_null() {
        return;
    }
    let flow_file = Box::from_raw(flow_file);
    free_c(flow_file.content_location);
    take_attributes(flow_file.attributes);
}

unsafe extern "C" fn create_flowfile(path: *const c_char) -> *mut CFlowFile {
    let path = read_c(path);
    record(Call::CreateFlowFile(path.clone()));
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => build_flowfile(&StubRecord {
            size: meta.len() as i32,
            content_location: Some(path),
            attributes: None,
        }),
        _ => ptr::null_mut(),
    }
}

unsafe extern "C" fn add_attribute(
    flow_file: *mut CFlowFile,
    key: *const c_char,
    value: *const c_void,
    size: usize,
) -> c_int {
    let key = read_c(key);
    let value = if value.is_null() {
        String::new()
    } else {
        let bytes = std::slice::from_raw_parts(value as *const u8, size);
        String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .to_owned()
    };
    record(Call::AddAttribute(key.clone(), value.clone()));

    let status = setting(|s| s.attribute_status);
    if status != 0 || flow_file.is_null() {
        return status;
    }
    let mut pairs = take_attributes((*flow_file).attributes);
    pairs.retain(|(k, _)| *k != key);
    pairs.push((key, value));
    (*flow_file).attributes = build_attributes(&pairs);
    0
}

unsafe extern "C" fn transmit_flowfile(
    _flow_file: *mut CFlowFile,
    _instance: *mut NifiInstance,
) -> c_int {
    record(Call::Transmit);
    setting(|s| s.transmit_status)
}
