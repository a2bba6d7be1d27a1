use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ValueEnum;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Per-process log file, `<dir>/<name>.log`.
///
/// A log left behind by an earlier run is first renamed to the first free
/// `<name>.<n>.log`, counting from 1.
#[derive(Debug, Clone)]
pub struct LogContext {
    path: PathBuf,
    file: Arc<File>,
}

impl LogContext {
    pub fn open(dir: &Path, name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.log"));
        if path.exists() {
            let rotated = first_free_rotation(dir, name);
            fs::rename(&path, &rotated)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush everything written so far to disk.
    pub fn shutdown(&self) -> io::Result<()> {
        (&*self.file).flush()?;
        self.file.sync_data()
    }
}

fn first_free_rotation(dir: &Path, name: &str) -> PathBuf {
    (1u32..)
        .map(|n| dir.join(format!("{name}.{n}.log")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.join(format!("{name}.old.log")))
}

pub fn init_logging(format: LogFormat, level: LogLevel, file: Option<&LogContext>) {
    let writer = match file {
        Some(context) => BoxMakeWriter::new(io::stderr.and(Arc::clone(&context.file))),
        None => BoxMakeWriter::new(io::stderr),
    };
    let builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        PathBuf::from(format!(
            "/tmp/sa-log-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn rotates_previous_logs_to_first_free_slot() {
        let dir = unique_temp_dir("rotate");
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        fs::write(dir.join("echo.log"), "run 0").unwrap();
        fs::write(dir.join("echo.2.log"), "taken").unwrap();

        let first = LogContext::open(&dir, "echo").expect("log should open");
        assert_eq!(fs::read_to_string(dir.join("echo.1.log")).unwrap(), "run 0");
        (&*first.file).write_all(b"run 1").unwrap();
        first.shutdown().unwrap();
        drop(first);

        let second = LogContext::open(&dir, "echo").expect("log should open");
        assert_eq!(second.path(), dir.join("echo.log"));
        assert_eq!(fs::read_to_string(dir.join("echo.3.log")).unwrap(), "run 1");
        assert_eq!(fs::read_to_string(dir.join("echo.2.log")).unwrap(), "taken");
        assert_eq!(fs::read_to_string(second.path()).unwrap(), "");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = unique_temp_dir("mkdir").join("nested");
        let context = LogContext::open(&dir, "broker").expect("log should open");
        assert!(context.path().exists());
        let _ = fs::remove_dir_all(dir.parent().unwrap());
    }
}
