//! Fixed-layout records and entry-point signatures of the native engine's
//! C API.
//!
//! Nothing in this module owns memory. Pointers found inside these records
//! belong to the native side and are only valid until the record that holds
//! them is released through the matching `free_*` entry point.

use std::os::raw::{c_char, c_int, c_void};

/// Remote input port record, as returned by `create_port`.
#[repr(C)]
pub struct NifiPort {
    pub port_id: *mut c_char,
}

/// Connection record, as returned by `create_instance`.
#[repr(C)]
pub struct NifiInstance {
    pub instance_ptr: *mut c_void,
    pub port: NifiPort,
}

/// Flow plan record, as returned by `create_new_flow`.
#[repr(C)]
pub struct CFlow {
    pub plan: *mut c_void,
}

/// Processor record, as returned by `add_processor`. Owned by its plan.
#[repr(C)]
pub struct CProcessor {
    pub processor_ptr: *mut c_void,
}

/// Flow file record, as returned by `get_next_flow_file` and
/// `create_flowfile`.
///
/// `size` is signed on the native side; a negative value marks a malformed
/// record.
#[repr(C)]
pub struct CFlowFile {
    pub size: c_int,
    pub in_: *mut c_void,
    pub content_location: *mut c_char,
    pub attributes: *mut c_void,
}

/// One key/value pair of an attribute set. `value_size` counts bytes and may
/// include a trailing NUL.
#[repr(C)]
pub struct CAttribute {
    pub key: *const c_char,
    pub value: *const c_void,
    pub value_size: usize,
}

/// What a non-null `CFlowFile::attributes` points at.
#[repr(C)]
pub struct CAttributeSet {
    pub attributes: *const CAttribute,
    pub size: usize,
}

pub type CreatePortFn = unsafe extern "C" fn(*const c_char) -> *mut NifiPort;
pub type CreateInstanceFn =
    unsafe extern "C" fn(*const c_char, *mut NifiPort) -> *mut NifiInstance;
pub type FreePortFn = unsafe extern "C" fn(*mut NifiPort) -> c_int;
pub type CreateFlowFn = unsafe extern "C" fn(*mut NifiInstance) -> *mut CFlow;
pub type AddProcessorFn =
    unsafe extern "C" fn(*mut CFlow, *const c_char) -> *mut CProcessor;
pub type SetPropertyFn = unsafe extern "C" fn(
    *mut CProcessor,
    *const c_char,
    *const c_char,
) -> c_int;
pub type GetNextFlowFileFn =
    unsafe extern "C" fn(*mut NifiInstance, *mut CFlow) -> *mut CFlowFile;

pub type FreeInstanceFn = unsafe extern "C" fn(*mut NifiInstance);
pub type FreeFlowFn = unsafe extern "C" fn(*mut CFlow);
pub type FreeFlowFileFn = unsafe extern "C" fn(*mut CFlowFile);
pub type CreateFlowFileFn =
    unsafe extern "C" fn(*const c_char) -> *mut CFlowFile;
pub type AddAttributeFn = unsafe extern "C" fn(
    *mut CFlowFile,
    *const c_char,
    *const c_void,
    usize,
) -> c_int;
pub type TransmitFlowFileFn =
    unsafe extern "C" fn(*mut CFlowFile, *mut NifiInstance) -> c_int;

pub const CREATE_PORT: &str = "create_port";
pub const CREATE_INSTANCE: &str = "create_instance";
pub const FREE_PORT: &str = "free_port";
pub const CREATE_NEW_FLOW: &str = "create_new_flow";
pub const ADD_PROCESSOR: &str = "add_processor";
pub const SET_PROPERTY: &str = "set_property";
pub const GET_NEXT_FLOW_FILE: &str = "get_next_flow_file";

pub const FREE_INSTANCE: &str = "free_instance";
pub const FREE_FLOW: &str = "free_flow";
pub const FREE_FLOWFILE: &str = "free_flowfile";
pub const CREATE_FLOWFILE: &str = "create_flowfile";
pub const ADD_ATTRIBUTE: &str = "add_attribute";
pub const TRANSMIT_FLOWFILE: &str = "transmit_flowfile";
