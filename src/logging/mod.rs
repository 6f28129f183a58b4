//! Tracing subscriber setup and the size-rotated log file

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter directive for a level name; Python names are accepted
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        "off" => "off",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives).context("invalid RUST_LOG")?
        }
        _ => EnvFilter::new(level_directive(&config.level)),
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.json {
        layers.push(fmt::layer().json().boxed());
    } else {
        layers.push(fmt::layer().boxed());
    }

    if let Some(path) = config.file.as_deref().filter(|p| !p.is_empty()) {
        let writer = Mutex::new(
            RotatingFile::open(path, config.max_file_bytes, config.backup_count)
                .with_context(|| format!("cannot open log file {}", path))?,
        );
        if config.json {
            layers.push(fmt::layer().json().with_writer(writer).boxed());
        } else {
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("a global subscriber is already installed")?;
    Ok(())
}

/// Append-only file that rolls over to `name.1` … `name.N` once it would
/// grow past `max_bytes`
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    backups: usize,
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RotatingFile {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            size,
            max_bytes,
            backups,
        })
    }

    fn backup(&self, n: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        } else {
            for n in (1..self.backups).rev() {
                let from = self.backup(n);
                if from.exists() {
                    fs::rename(&from, self.backup(n + 1))?;
                }
            }
            fs::rename(&self.path, self.backup(1))?;
            self.file = append(&self.path)?;
        }
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("boursa_log_{}", uuid::Uuid::new_v4()));
        let path = dir.join("app.log");
        (dir, path)
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("Debug"), "debug");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn test_rotation_keeps_backups() {
        let (dir, path) = temp_log();
        let mut f = RotatingFile::open(&path, 10, 2).unwrap();
        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            f.write_all(line.as_bytes()).unwrap();
        }
        f.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(fs::read_to_string(dir.join("app.log.1")).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(dir.join("app.log.2")).unwrap(), "bbbbbbbb\n");
        assert!(!dir.join("app.log.3").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reopen_appends() {
        let (dir, path) = temp_log();
        {
            let mut f = RotatingFile::open(&path, 1024, 1).unwrap();
            f.write_all(b"first\n").unwrap();
        }
        let mut f = RotatingFile::open(&path, 1024, 1).unwrap();
        f.write_all(b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        fs::remove_dir_all(&dir).ok();
    }
}
