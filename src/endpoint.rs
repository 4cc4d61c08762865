use std::ffi::CString;
use std::path::Path;
use std::sync::{Arc, Mutex};

use walkdir::{DirEntry, WalkDir};

use crate::errors::{BindingError, Result};
use crate::ffi::{NifiInstance, NifiPort, TRANSMIT_FLOWFILE};
use crate::flowfile::FlowFileRecord;
use crate::handle::{lock, NativeHandle};
use crate::library::NativeLibrary;

/// Attribute tagged onto every record sent by [`RpgEndpoint::transfer_path`].
pub const TRANSFER_ATTRIBUTE: (&str, &str) = ("addedattribute", "1");

/// Whether a flow has been built on an endpoint. Only one ever is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GraphSlot {
    Vacant,
    Live,
    Retired,
}

pub(crate) struct EndpointState {
    pub lib: Arc<NativeLibrary>,
    pub label: String,
    pub instance: NativeHandle<NifiInstance>,
    pub port: NativeHandle<NifiPort>,
    pub graph: GraphSlot,
    // The native port record may keep pointing at these.
    _url: CString,
    _port_id: CString,
}

impl EndpointState {
    /// Releases the connection, then the port it references. A connection
    /// the library cannot free keeps its port.
    fn release(&mut self) {
        let table = self.lib.table();
        if let Some(instance) = self.instance.take() {
            match table.free_instance {
                Some(free_instance) => {
                    log::debug!("{}: releasing connection", self.label);
                    unsafe { free_instance(instance.as_ptr()) };
                }
                None => {
                    log::warn!(
                        "{}: cannot free connection, port left in place",
                        self.label
                    );
                    self.port.take();
                    return;
                }
            }
        }
        if let Some(port) = self.port.take() {
            log::debug!("{}: releasing port", self.label);
            let status = unsafe { (table.free_port)(port.as_ptr()) };
            if status != 0 {
                log::error!(
                    "{}: free_port reported status {}",
                    self.label,
                    status
                );
            }
        }
    }
}

impl Drop for EndpointState {
    fn drop(&mut self) {
        self.release();
    }
}

/// Connection to a remote process group: a native connection instance plus
/// the remote input port it was opened on.
///
/// The native handles are released by [`RpgEndpoint::dispose`], or when the
/// endpoint and the flow built on it have both been dropped.
pub struct RpgEndpoint {
    url: String,
    port_id: String,
    state: Arc<Mutex<EndpointState>>,
}

impl RpgEndpoint {
    /// Opens a connection to `url` on remote port `port`.
    ///
    /// The port is created first and the connection is opened on it. If the
    /// connection cannot be opened, the port is released before the error is
    /// returned.
    ///
    /// # Errors
    /// [`BindingError::Connection`] for an empty or NUL-containing argument,
    /// or when either native call returns null.
    pub fn create(
        lib: &Arc<NativeLibrary>,
        url: &str,
        port: &str,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(BindingError::Connection(
                "remote url is empty".to_owned(),
            ));
        }
        if port.is_empty() {
            return Err(BindingError::Connection(
                "remote port id is empty".to_owned(),
            ));
        }
        let c_url = CString::new(url)
            .map_err(|e| BindingError::from(e).relabel(BindingError::Connection))?;
        let c_port = CString::new(port)
            .map_err(|e| BindingError::from(e).relabel(BindingError::Connection))?;

        let label = format!("endpoint/{}#{}", url, port);
        let table = lib.table();

        let port_ptr = unsafe { (table.create_port)(c_port.as_ptr()) };
        let mut port_handle =
            NativeHandle::new(port_ptr, "port").ok_or_else(|| {
                BindingError::Connection(format!(
                    "create_port returned null for port {}",
                    port
                ))
            })?;

        let instance_ptr =
            unsafe { (table.create_instance)(c_url.as_ptr(), port_ptr) };
        let instance = match NativeHandle::new(instance_ptr, "connection") {
            Some(instance) => instance,
            None => {
                if let Some(port) = port_handle.take() {
                    let status = unsafe { (table.free_port)(port.as_ptr()) };
                    if status != 0 {
                        log::error!(
                            "{}: free_port reported status {}",
                            label,
                            status
                        );
                    }
                }
                return Err(BindingError::Connection(format!(
                    "create_instance returned null for {}",
                    url
                )));
            }
        };

        log::info!("{}: connected", label);
        Ok(Self {
            url: url.to_owned(),
            port_id: port.to_owned(),
            state: Arc::new(Mutex::new(EndpointState {
                lib: Arc::clone(lib),
                label,
                instance,
                port: port_handle,
                graph: GraphSlot::Vacant,
                _url: c_url,
                _port_id: c_port,
            })),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    pub fn library(&self) -> Arc<NativeLibrary> {
        Arc::clone(&lock(&self.state).lib)
    }

    pub fn is_disposed(&self) -> bool {
        !lock(&self.state).instance.is_live()
    }

    pub(crate) fn shared(&self) -> &Arc<Mutex<EndpointState>> {
        &self.state
    }

    /// Releases the connection and then the port. A second call does
    /// nothing.
    ///
    /// # Errors
    /// [`BindingError::PreconditionViolation`] while a flow built on this
    /// endpoint is still live; nothing is released in that case.
    pub fn dispose(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.graph == GraphSlot::Live {
            return Err(BindingError::PreconditionViolation(format!(
                "{}: the flow built on this endpoint must be disposed first",
                state.label
            )));
        }
        state.release();
        Ok(())
    }

    /// Sends `record` to the remote port.
    ///
    /// # Errors
    /// [`BindingError::PreconditionViolation`] if `record` was made by a
    /// different library than this endpoint's.
    pub fn transmit(&self, record: &FlowFileRecord) -> Result<()> {
        let state = lock(&self.state);
        let instance = state.instance.get()?;
        let flow_file = record.raw()?;
        if !Arc::ptr_eq(record.library(), &state.lib) {
            return Err(BindingError::PreconditionViolation(format!(
                "{}: flow file belongs to library {}",
                state.label,
                record.library().label()
            )));
        }
        let transmit = state
            .lib
            .table()
            .transmit_flowfile
            .ok_or(BindingError::Unsupported(TRANSMIT_FLOWFILE))?;

        let status = unsafe { transmit(flow_file, instance) };
        if status != 0 {
            return Err(BindingError::Transmission(format!(
                "{}: transmit_flowfile reported status {}",
                state.label, status
            )));
        }
        log::trace!("{}: sent {} bytes", state.label, record.size());
        Ok(())
    }

    /// Sends the file at `path`, or every regular file below it if it is a
    /// directory. Hidden entries are skipped. Each record is tagged with
    /// [`TRANSFER_ATTRIBUTE`]. Returns the number of files sent.
    pub fn transfer_path<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let lib = self.library();
        let mut sent = 0;

        let entries = WalkDir::new(path.as_ref())
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in entries {
            let entry = entry.map_err(anyhow::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            log::debug!("transferring {}", entry.path().display());

            let mut record = FlowFileRecord::from_file(&lib, entry.path())?;
            let (key, value) = TRANSFER_ATTRIBUTE;
            record.add_attribute(key, value)?;
            self.transmit(&record)?;
            record.dispose();
            sent += 1;
        }
        Ok(sent)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
