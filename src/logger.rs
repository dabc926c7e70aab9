use log::{Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Log file created in the working directory of a run.
pub const LOG_FILE_NAME: &str = "CodeGen.log";

pub fn format_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARNING",
        _ => "INFO",
    }
}

/// Logger that writes `YYYY-MM-DD HH:MM:SS [LEVEL] message` lines to the log
/// file and duplicates them to stdout.
pub struct FileLogger {
    file: Mutex<File>,
    level: log::LevelFilter,
}

impl FileLogger {
    pub fn create(path: &Path, level: log::LevelFilter) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileLogger {
            file: Mutex::new(file),
            level,
        })
    }

    fn format_line(record: &Record) -> String {
        format!(
            "{} [{}] {}",
            format_timestamp(),
            level_label(record.level()),
            record.args()
        )
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format_line(record);
        println!("{}", line);
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Installs the file logger for the process. Tolerates a logger already being
/// set (repeated calls in tests); the max level is applied either way.
pub fn init_logger(directory: &Path, level: log::LevelFilter) -> std::io::Result<()> {
    let logger = FileLogger::create(&directory.join(LOG_FILE_NAME), level)?;
    match log::set_boxed_logger(Box::new(logger)) {
        Ok(()) => log::set_max_level(level),
        Err(e) => {
            eprintln!("Logger already installed: {}", e);
            log::set_max_level(level);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_line_for(level: log::Level, text: &str) -> String {
        FileLogger::format_line(
            &Record::builder()
                .level(level)
                .args(format_args!("{}", text))
                .build(),
        )
    }

    fn emit(logger: &FileLogger, level: log::Level, text: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .args(format_args!("{}", text))
                .build(),
        );
    }

    #[test]
    fn test_line_format() {
        let line = format_line_for(log::Level::Info, "Reading 4 tables");
        // YYYY-MM-DD HH:MM:SS [LEVEL] message
        let (stamp, rest) = line.split_at(19);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[13..14], ":");
        assert_eq!(rest, " [INFO] Reading 4 tables");
    }

    #[test]
    fn test_warn_maps_to_warning_label() {
        let line = format_line_for(log::Level::Warn, "MARS flag missing");
        assert!(line.contains("[WARNING] MARS flag missing"));
    }

    #[test]
    fn test_log_writes_to_file_and_respects_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        let logger = FileLogger::create(&path, log::LevelFilter::Info).unwrap();

        emit(&logger, log::Level::Info, "run started");
        emit(
            &logger,
            log::Level::Error,
            "run failed. EXCEPTION: pool exhausted",
        );
        emit(&logger, log::Level::Debug, "filtered out");
        logger.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO] run started"));
        assert!(contents.contains("[ERROR] run failed. EXCEPTION: pool exhausted"));
        assert!(!contents.contains("filtered out"));
    }
}
