use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) if !val.trim().is_empty() => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        _ => None,
    }
}

/// Parse `OCR_ARGS`: whitespace-separated arguments passed to the worker verbatim.
fn parse_worker_args() -> Vec<String> {
    env::var("OCR_ARGS")
        .map(|val| val.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(windows)]
const DEFAULT_EXE: &str = "PaddleOCR-json.exe";
#[cfg(not(windows))]
const DEFAULT_EXE: &str = "run.sh";

/// Working directory used when none is configured, relative to the base directory.
pub const DEFAULT_CWD: &str = "data/PaddleOCR-json";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub base_dir: PathBuf,
    pub ocr: OcrConfig,
}

/// Options consumed by the supervisor when it starts a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Worker executable; relative paths are taken from `cwd`.
    pub exe_path: String,
    pub cwd: PathBuf,
    pub args: Vec<String>,
    /// Forward worker stdout/stderr to the log.
    pub debug: bool,
}

impl OcrConfig {
    pub fn with_base_dir(base_dir: &Path) -> Self {
        Self {
            timeout_ms: 30_000,
            exe_path: DEFAULT_EXE.to_string(),
            cwd: base_dir.join(DEFAULT_CWD),
            args: Vec::new(),
            debug: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolve_exe_path(&self) -> PathBuf {
        let exe = Path::new(&self.exe_path);
        if exe.is_absolute() {
            exe.to_path_buf()
        } else {
            self.cwd.join(exe)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = parse_env_opt::<PathBuf>("OCR_BASE_DIR")
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let defaults = OcrConfig::with_base_dir(&base_dir);

        let ocr = OcrConfig {
            timeout_ms: match parse_env_or("OCR_TIMEOUT_MS", defaults.timeout_ms) {
                0 => {
                    tracing::warn!(
                        "OCR_TIMEOUT_MS must be greater than zero. Using default {}.",
                        defaults.timeout_ms
                    );
                    defaults.timeout_ms
                }
                ms => ms,
            },
            exe_path: env::var("OCR_EXE_PATH").unwrap_or(defaults.exe_path),
            cwd: parse_env_opt::<PathBuf>("OCR_CWD")
                .map(|cwd| {
                    if cwd.is_absolute() {
                        cwd
                    } else {
                        base_dir.join(cwd)
                    }
                })
                .unwrap_or(defaults.cwd),
            args: parse_worker_args(),
            debug: parse_env_or("OCR_DEBUG", defaults.debug),
        };

        Self { base_dir, ocr }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
