use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{BindingError, Result};

/// Processor name the original getFile front end instantiates.
pub const GET_FILE: &str = "GetFile";
/// `GetFile` property naming the directory to pick files up from.
pub const INPUT_DIRECTORY: &str = "Input Directory";

/// Everything needed to open a session: which engine to load, where the
/// remote process group lives and which processors to build.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub library: PathBuf,
    pub url: String,
    pub port: String,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl SessionConfig {
    /// A single `GetFile` processor watching `directory`.
    pub fn get_file(
        library: impl Into<PathBuf>,
        url: &str,
        port: &str,
        directory: &str,
    ) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(INPUT_DIRECTORY.to_owned(), directory.to_owned());
        Self {
            library: library.into(),
            url: url.to_owned(),
            port: port.to_owned(),
            processors: vec![ProcessorConfig {
                name: GET_FILE.to_owned(),
                properties,
            }],
        }
    }

    /// Reads a JSON document from `path` and validates it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(BindingError::Config("url is empty".to_owned()));
        }
        if self.port.is_empty() {
            return Err(BindingError::Config("port is empty".to_owned()));
        }
        if let Some(index) = self
            .processors
            .iter()
            .position(|p| p.name.is_empty())
        {
            return Err(BindingError::Config(format!(
                "processor #{} has no name",
                index
            )));
        }
        Ok(())
    }
}
