use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use log::{Level, LevelFilter};

/// Writes every log line to stdout and appends it to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

/// Status-page marker for a level: `[+]` for progress, `[!]` for problems.
pub fn marker(level: Level) -> &'static str {
    match level {
        Level::Error | Level::Warn => "[!]",
        Level::Info | Level::Debug | Level::Trace => "[+]",
    }
}

/// Initialize the global logger.
///
/// Uses the `RUST_LOG` env var or info level by default. Lines look like
/// `2024-01-31 12:00:00 [+] Retrieving new posts` in both stdout and the
/// append-only log file.
pub fn init(log_path: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(LevelFilter::Info),
        )
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                marker(record.level()),
                record.args()
            )
        })
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problems_and_progress_get_distinct_markers() {
        assert_eq!(marker(Level::Error), "[!]");
        assert_eq!(marker(Level::Warn), "[!]");
        assert_eq!(marker(Level::Info), "[+]");
        assert_eq!(marker(Level::Debug), "[+]");
    }
}
