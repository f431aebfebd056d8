use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

pub const TRACE_PATH_ENV: &str = "TRACE_PATH";
pub const TRACE_NAME_ENV: &str = "TRACE_NAME";
pub const KERNEL_INFO_PATH_ENV: &str = "KERNEL_INFO_PATH";
pub const COMPUTE_VERSION_ENV: &str = "COMPUTE_VERSION";

pub const DEFAULT_TRACE_NAME: &str = "Trace";
pub const DEFAULT_COMPUTE_VERSION: &str = "2.0";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open kernel info file {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed kernel info in {path:?} line {line}: {text:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
    },
}

/// Per-kernel resource usage parsed from the kernel info file.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct KernelResourceInfo {
    pub num_registers: u32,
    pub shared_mem_bytes: u32,
}

/// Kernel name to resource usage table.
///
/// Three whitespace-separated columns per line: name, register count,
/// shared memory bytes. Blank lines and `#` comments are skipped.
#[derive(Debug, Clone, Default)]
pub struct KernelInfoTable {
    entries: HashMap<String, KernelResourceInfo>,
}

impl KernelInfoTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut entries = HashMap::new();
        for (idx, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let malformed = || Error::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                text: text.to_string(),
            };
            let mut columns = text.split_whitespace();
            let name = columns.next().ok_or_else(malformed)?;
            let num_registers = columns
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(malformed)?;
            let shared_mem_bytes = columns
                .next()
                .and_then(|c| c.parse().ok())
                .ok_or_else(malformed)?;
            entries.insert(
                name.to_string(),
                KernelResourceInfo {
                    num_registers,
                    shared_mem_bytes,
                },
            );
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn get(&self, kernel_name: &str) -> Option<&KernelResourceInfo> {
        self.entries.get(kernel_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trace generator configuration, loaded once per run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Output root directory.
    pub trace_path: PathBuf,
    /// Basename for trace and summary files.
    pub trace_name: String,
    /// Compute capability selecting the occupancy formula.
    pub compute_version: String,
    pub kernel_info: KernelInfoTable,
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// Missing `TRACE_PATH` / `KERNEL_INFO_PATH` are reported but not
    /// fatal: tracing continues with degraded behavior.
    #[must_use]
    pub fn from_env() -> Self {
        let trace_path = match std::env::var_os(TRACE_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => {
                log::error!("{TRACE_PATH_ENV} not set, writing traces to the current directory");
                PathBuf::from(".")
            }
        };
        let trace_name = std::env::var(TRACE_NAME_ENV)
            .unwrap_or_else(|_| DEFAULT_TRACE_NAME.to_string());
        let compute_version = std::env::var(COMPUTE_VERSION_ENV)
            .unwrap_or_else(|_| DEFAULT_COMPUTE_VERSION.to_string());
        let kernel_info = match std::env::var_os(KERNEL_INFO_PATH_ENV) {
            Some(path) => match KernelInfoTable::load(&path) {
                Ok(table) => table,
                Err(err) => {
                    log::error!("could not load kernel info: {err}");
                    KernelInfoTable::default()
                }
            },
            None => {
                log::warn!("{KERNEL_INFO_PATH_ENV} not set, kernel resource usage unavailable");
                KernelInfoTable::default()
            }
        };
        Self {
            trace_path,
            trace_name,
            compute_version,
            kernel_info,
        }
    }
}
