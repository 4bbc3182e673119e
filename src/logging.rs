// src/logging.rs

use anyhow::{Context, Result};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

/// Directive for the file sink: everything from this crate at debug,
/// dependencies at info.
const FILE_FILTER: &str = "info,tablescrape=debug";

struct SinkState {
    file: File,
    written: u64,
}

/// Append-only log file that moves itself to `<name>.1` once it would grow
/// past `limit` bytes, then starts over. One backup is kept.
pub struct RotatingFile {
    path: PathBuf,
    limit: u64,
    state: Mutex<SinkState>,
}

impl RotatingFile {
    pub fn open(path: &Path, limit: u64) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {:?}", path))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            limit,
            state: Mutex::new(SinkState { file, written }),
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut SinkState) -> io::Result<()> {
        state.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        state.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        state.written = 0;
        Ok(())
    }
}

impl Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        if state.written > 0 && state.written + buf.len() as u64 > self.limit {
            self.rotate(&mut state)?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink lock poisoned"))?;
        state.file.flush()
    }
}

/// Install the process-wide subscriber. Call once, at startup.
///
/// Stdout honours `RUST_LOG`, falling back to `cfg.level`. When `cfg.file`
/// is set, a second plain-text layer appends debug output to that file,
/// rotating it at `cfg.rotate_bytes`.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let env = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).with_filter(env);

    let file = match &cfg.file {
        Some(path) => {
            let f = RotatingFile::open(path, cfg.rotate_bytes)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(f))
                    .with_filter(EnvFilter::new(FILE_FILTER)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .context("installing tracing subscriber")
}
