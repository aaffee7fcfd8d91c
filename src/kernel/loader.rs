//! Locating and constructing the core
//!
//! A core directory carries a `core.toml` manifest naming the program to run:
//!
//! ```toml
//! name = "nocom-core"
//! entry = "bin/core"
//! args = ["--quiet"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::process::{CoreLaunch, ProcessCore};
use super::{Core, CoreError};
use crate::logging::LogEmitters;

/// Manifest file expected at the root of a core directory
pub const MANIFEST_FILE: &str = "core.toml";

/// Contents of `core.toml`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoreManifest {
    /// Display name, defaults to the directory name
    #[serde(default)]
    pub name: Option<String>,
    /// Program to run, relative to the core directory
    pub entry: PathBuf,
    /// Extra command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl CoreManifest {
    /// Read the manifest of `core_dir`
    pub fn load(core_dir: &Path) -> Result<Self, CoreError> {
        let path = core_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(CoreError::ManifestMissing(path));
        }
        let content = std::fs::read_to_string(&path).map_err(|source| CoreError::ManifestRead {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CoreError::ManifestParse { path, source })
    }

    /// Absolute path of the entry program
    pub fn entry_path(&self, core_dir: &Path) -> PathBuf {
        core_dir.join(&self.entry)
    }

    /// Name to report the core under
    pub fn display_name(&self, core_dir: &Path) -> String {
        self.name.clone().unwrap_or_else(|| {
            core_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "core".to_string())
        })
    }
}

/// Load the core in `core_dir` and construct it for `profile_dir`
///
/// Any failure here is fatal at boot.
pub fn load_core(
    core_dir: &Path,
    profile_dir: &Path,
    emitters: LogEmitters,
    stop_grace: Duration,
) -> Result<Arc<dyn Core>, CoreError> {
    let manifest = CoreManifest::load(core_dir)?;
    let program = manifest.entry_path(core_dir);
    if !program.is_file() {
        return Err(CoreError::EntryMissing(program));
    }

    let launch = CoreLaunch {
        name: manifest.display_name(core_dir),
        program,
        args: manifest.args,
        working_dir: core_dir.to_path_buf(),
        stop_grace,
    };
    Ok(Arc::new(ProcessCore::new(launch, profile_dir, emitters)))
}
