use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use libloading::Library;

use crate::errors::{BindingError, Result};
use crate::ffi::*;
use crate::handle::lock;

lazy_static! {
    /// Every library ever loaded, keyed by canonical path. Entries are never
    /// removed, so function pointers held by live handles cannot dangle.
    static ref LOADED: Mutex<HashMap<PathBuf, Arc<NativeLibrary>>> =
        Mutex::new(HashMap::new());
}

/// Resolved entry points of the native engine.
///
/// The first seven are required; a library missing any of them is rejected
/// by [`NativeLibrary::load`]. The rest are optional: operations that need
/// them fail with [`BindingError::Unsupported`] and releases that need them
/// are skipped with a warning.
#[derive(Clone, Copy)]
pub struct FunctionTable {
    pub create_port: CreatePortFn,
    pub create_instance: CreateInstanceFn,
    pub free_port: FreePortFn,
    pub create_new_flow: CreateFlowFn,
    pub add_processor: AddProcessorFn,
    pub set_property: SetPropertyFn,
    pub get_next_flow_file: GetNextFlowFileFn,

    pub free_instance: Option<FreeInstanceFn>,
    pub free_flow: Option<FreeFlowFn>,
    pub free_flowfile: Option<FreeFlowFileFn>,
    pub create_flowfile: Option<CreateFlowFileFn>,
    pub add_attribute: Option<AddAttributeFn>,
    pub transmit_flowfile: Option<TransmitFlowFileFn>,
}

impl FunctionTable {
    /// # Safety
    ///
    /// Symbol lookup cannot check signatures; the library must export the
    /// entry points with the C signatures declared in [`crate::ffi`].
    unsafe fn resolve(library: &Library) -> Result<Self> {
        Ok(Self {
            create_port: required(library, CREATE_PORT)?,
            create_instance: required(library, CREATE_INSTANCE)?,
            free_port: required(library, FREE_PORT)?,
            create_new_flow: required(library, CREATE_NEW_FLOW)?,
            add_processor: required(library, ADD_PROCESSOR)?,
            set_property: required(library, SET_PROPERTY)?,
            get_next_flow_file: required(library, GET_NEXT_FLOW_FILE)?,

            free_instance: optional(library, FREE_INSTANCE),
            free_flow: optional(library, FREE_FLOW),
            free_flowfile: optional(library, FREE_FLOWFILE),
            create_flowfile: optional(library, CREATE_FLOWFILE),
            add_attribute: optional(library, ADD_ATTRIBUTE),
            transmit_flowfile: optional(library, TRANSMIT_FLOWFILE),
        })
    }

    /// Names of the optional entry points this table provides.
    pub fn optional_symbols(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.free_instance.is_some() {
            present.push(FREE_INSTANCE);
        }
        if self.free_flow.is_some() {
            present.push(FREE_FLOW);
        }
        if self.free_flowfile.is_some() {
            present.push(FREE_FLOWFILE);
        }
        if self.create_flowfile.is_some() {
            present.push(CREATE_FLOWFILE);
        }
        if self.add_attribute.is_some() {
            present.push(ADD_ATTRIBUTE);
        }
        if self.transmit_flowfile.is_some() {
            present.push(TRANSMIT_FLOWFILE);
        }
        present
    }
}

unsafe fn required<T: Copy>(library: &Library, name: &'static str) -> Result<T> {
    let symbol = library
        .get::<T>(name.as_bytes())
        .map_err(|e| {
            BindingError::Load(format!("missing symbol `{}`: {}", name, e))
        })?;
    Ok(*symbol)
}

unsafe fn optional<T: Copy>(library: &Library, name: &'static str) -> Option<T> {
    match library.get::<T>(name.as_bytes()) {
        Ok(symbol) => Some(*symbol),
        Err(_) => {
            log::debug!("optional symbol `{}` is not exported", name);
            None
        }
    }
}

/// The native engine: a loaded shared object and its function table.
///
/// Shared by every handle created through it; the table is immutable once
/// built.
pub struct NativeLibrary {
    label: String,
    table: FunctionTable,
    _library: Option<Library>,
}

impl NativeLibrary {
    /// Loads the shared object at `path` and resolves the engine's entry
    /// points. Loading the same file twice returns the same library.
    ///
    /// Fails with [`BindingError::Load`] if the file does not exist, cannot
    /// be loaded, or lacks a required symbol. There are no retries.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BindingError::Load(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let path = path.canonicalize().map_err(|e| {
            BindingError::Load(format!("{}: {}", path.display(), e))
        })?;

        let mut loaded = lock(&LOADED);
        if let Some(library) = loaded.get(&path) {
            log::trace!("library/{}: already loaded", path.display());
            return Ok(Arc::clone(library));
        }

        log::info!("library/{}: loading", path.display());
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            BindingError::Load(format!("{}: {}", path.display(), e))
        })?;
        let table = unsafe { FunctionTable::resolve(&library) }?;
        log::debug!(
            "library/{}: optional symbols {:?}",
            path.display(),
            table.optional_symbols()
        );

        let library = Arc::new(Self {
            label: path.display().to_string(),
            table,
            _library: Some(library),
        });
        loaded.insert(path, Arc::clone(&library));
        Ok(library)
    }

    /// Wraps a function table that is already linked into the process, such
    /// as a statically linked engine or an in-process stand-in.
    pub fn from_table(label: impl Into<String>, table: FunctionTable) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            table,
            _library: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn table(&self) -> &FunctionTable {
        &self.table
    }

    /// Whether the optional entry point `symbol` is available.
    pub fn supports(&self, symbol: &str) -> bool {
        self.table
            .optional_symbols()
            .contains(&symbol)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("label", &self.label)
            .field("optional", &self.table.optional_symbols())
            .finish()
    }
}
