use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DOCCHAIN_DATA_DIR";

const XDG_PREFIX: &str = "docchain";
const CONFIG_FILE: &str = "config.json";
const INDEX_DIR: &str = "index";

/// Where the data directory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSource {
    Flag,
    Env,
    Xdg,
}

impl fmt::Display for DirSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirSource::Flag => f.write_str("--data-dir"),
            DirSource::Env => f.write_str(DATA_DIR_ENV),
            DirSource::Xdg => f.write_str("XDG data home"),
        }
    }
}

/// Root holding `config.json` and the on-disk index.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DirSource,
}

impl DataDir {
    /// `--data-dir` wins, then `DOCCHAIN_DATA_DIR`, then
    /// `$XDG_DATA_HOME/docchain`. The root is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_from(explicit, std::env::var_os(DATA_DIR_ENV))
    }

    /// [`resolve`](Self::resolve) with the environment value passed in.
    /// An empty value counts as unset.
    pub fn resolve_from(
        explicit: Option<&Path>,
        env: Option<OsString>,
    ) -> Result<Self> {
        let (root, source) = match (explicit, env) {
            (Some(path), _) => (path.to_path_buf(), DirSource::Flag),
            (None, Some(val)) if !val.is_empty() => {
                (PathBuf::from(val), DirSource::Env)
            }
            _ => (xdg_data_home()?, DirSource::Xdg),
        };

        ensure_dir(&root)?;
        tracing::debug!(
            root = %root.display(),
            %source,
            "using data directory"
        );
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DirSource {
        self.source
    }

    /// Read by [`ChainConfig::load`](crate::ChainConfig::load); may not
    /// exist yet.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Directory of the Tantivy store, created on first use.
    pub fn index_dir(&self) -> Result<PathBuf> {
        let path = self.root.join(INDEX_DIR);
        ensure_dir(&path)?;
        Ok(path)
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(XDG_PREFIX)
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|_| Error::DataDir(path.to_path_buf()))
}
