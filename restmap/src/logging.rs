// Copyright 2024 Oxide Computer Company

//! Logging configuration.  None of these facilities are required to use this
//! crate (every entry point takes a caller-supplied `slog::Logger`), but
//! they're provided because servers built on it commonly want them.

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::fs::OpenOptions;
use std::io;
use std::io::LineWriter;
use std::io::Write;

/// Represents the logging configuration for a server.  This is expected to be a
/// top-level block in a TOML config file, although that's not required.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum ConfigLogging {
    /// Pretty-printed output to stderr, assumed to support terminal escapes.
    StderrTerminal { level: ConfigLoggingLevel },
    /// One JSON object per line on stderr.
    StderrJson { level: ConfigLoggingLevel },
    /// Bunyan-formatted output to a specified file.
    File {
        level: ConfigLoggingLevel,
        path: Utf8PathBuf,
        if_exists: ConfigLoggingIfExists,
    },
}

/// Log messages have a level that's used for filtering in the usual way.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<ConfigLoggingLevel> for Level {
    fn from(config_level: ConfigLoggingLevel) -> Level {
        match config_level {
            ConfigLoggingLevel::Trace => Level::Trace,
            ConfigLoggingLevel::Debug => Level::Debug,
            ConfigLoggingLevel::Info => Level::Info,
            ConfigLoggingLevel::Warn => Level::Warning,
            ConfigLoggingLevel::Error => Level::Error,
            ConfigLoggingLevel::Critical => Level::Critical,
        }
    }
}

/// Specifies the behavior when logging to a file that already exists.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingIfExists {
    /// Fail to create the log
    Fail,
    /// Truncate the existing file
    Truncate,
    /// Append to the existing file
    Append,
}

impl ConfigLoggingIfExists {
    fn open_options(self) -> OpenOptions {
        let mut open_options = OpenOptions::new();
        open_options.write(true);
        match self {
            ConfigLoggingIfExists::Fail => open_options.create_new(true),
            ConfigLoggingIfExists::Append => {
                open_options.create(true).append(true)
            }
            ConfigLoggingIfExists::Truncate => {
                open_options.create(true).truncate(true)
            }
        };
        open_options
    }
}

impl ConfigLogging {
    pub fn level(&self) -> ConfigLoggingLevel {
        match self {
            ConfigLogging::StderrTerminal { level }
            | ConfigLogging::StderrJson { level }
            | ConfigLogging::File { level, .. } => *level,
        }
    }

    /// Create a root logger based on the requested configuration.
    pub fn to_logger<S: AsRef<str>>(&self, log_name: S) -> io::Result<Logger> {
        let level = self.level();
        match self {
            ConfigLogging::StderrTerminal { .. } => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root_logger(level, drain))
            }

            ConfigLogging::StderrJson { .. } => {
                let drain = slog_json::Json::new(io::stderr())
                    .add_default_keys()
                    .build()
                    .fuse();
                Ok(async_root_logger(level, drain))
            }

            ConfigLogging::File { path, if_exists, .. } => {
                let drain = log_drain_for_file(
                    &if_exists.open_options(),
                    path,
                    log_name.as_ref().to_string(),
                )?;
                let logger = async_root_logger(level, drain);

                // Leave a note on stderr saying where the log went.  A failure
                // to write it is recorded in the log itself.
                if let Err(err) = writeln!(
                    io::stderr(),
                    "note: configured to log to \"{path}\""
                ) {
                    slog::warn!(
                        logger,
                        "failed to report log path on stderr";
                        "err" => %err,
                    );
                }

                Ok(logger)
            }
        }
    }
}

fn async_root_logger<T>(level: ConfigLoggingLevel, drain: T) -> slog::Logger
where
    T: slog::Drain + Send + 'static,
    <T as slog::Drain>::Err: std::fmt::Debug,
{
    let level_drain = slog::LevelFilter(drain, Level::from(level)).fuse();
    let async_drain =
        slog_async::Async::new(level_drain).chan_size(1024).build().fuse();
    slog::Logger::root(async_drain, o!())
}

fn log_drain_for_file(
    open_options: &OpenOptions,
    path: &Utf8PathBuf,
    log_name: String,
) -> io::Result<slog::Fuse<slog_json::Json<LineWriter<std::fs::File>>>> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = LineWriter::new(open_options.open(path)?);

    // slog_bunyan wants a `&'static str` name.  Loggers are created once per
    // process (or per test), so the leak is bounded.
    let log_name_leaked: &'static str = Box::leak(log_name.into_boxed_str());
    Ok(slog_bunyan::with_name(log_name_leaked, file).build().fuse())
}

#[cfg(test)]
mod test {
    use super::ConfigLoggingLevel;
    use crate::test_util::read_bunyan_log;
    use crate::test_util::read_config;
    use crate::test_util::verify_bunyan_records;
    use crate::test_util::verify_bunyan_records_sequential;
    use crate::test_util::BunyanLogRecordSpec;
    use crate::ConfigLogging;
    use slog::Logger;
    use std::io;

    /// Load a configuration and create a logger from it.
    fn read_config_and_create_logger(
        label: &str,
        contents: &str,
    ) -> Result<Logger, io::Error> {
        let config = read_config::<ConfigLogging>(label, contents).unwrap();
        let result = config.to_logger("test-logger");
        if let Err(ref error) = result {
            eprintln!("error message creating logger: {}", error);
        }
        result
    }

    fn file_config(
        path: &std::path::Path,
        level: &str,
        if_exists: &str,
    ) -> String {
        // Windows paths need to have \ turned into \\
        let escaped_path =
            path.display().to_string().escape_default().to_string();
        format!(
            r#"
            mode = "file"
            level = "{}"
            if_exists = "{}"
            path = "{}"
            "#,
            level, if_exists, escaped_path
        )
    }

    #[test]
    fn test_config_bad_log_mode() {
        let bad_config = r##" mode = "bonkers" "##;
        let error = read_config::<ConfigLogging>("bad_log_mode", bad_config)
            .unwrap_err()
            .to_string();
        assert!(
            error.contains(
                "unknown variant `bonkers`, expected one of \
                 `stderr-terminal`, `stderr-json`, `file`"
            ),
            "{}",
            error
        );
    }

    #[test]
    fn test_config_bad_terminal_no_level() {
        let bad_config = r##" mode = "stderr-terminal" "##;
        let error =
            read_config::<ConfigLogging>("bad_terminal_no_level", bad_config)
                .unwrap_err()
                .to_string();
        assert!(error.contains("missing field `level`"), "{}", error);
    }

    #[test]
    fn test_config_bad_terminal_bad_level() {
        let bad_config = r##"
            mode = "stderr-terminal"
            level = "everything"
            "##;
        let error =
            read_config::<ConfigLogging>("bad_terminal_bad_level", bad_config)
                .unwrap_err()
                .to_string();
        assert!(
            error.contains(
                "unknown variant `everything`, expected one of `trace`, \
                 `debug`, `info`, `warn`, `error`, `critical`"
            ),
            "{}",
            error
        );
    }

    #[test]
    fn test_config_stderr() {
        let config = read_config::<ConfigLogging>(
            "stderr-terminal",
            r##"
            mode = "stderr-terminal"
            level = "warn"
            "##,
        )
        .unwrap();
        assert_eq!(config.level(), ConfigLoggingLevel::Warn);
        config.to_logger("test-logger").unwrap();

        let config = read_config::<ConfigLogging>(
            "stderr-json",
            r##"
            mode = "stderr-json"
            level = "error"
            "##,
        )
        .unwrap();
        assert_eq!(config, ConfigLogging::StderrJson {
            level: ConfigLoggingLevel::Error
        });
        config.to_logger("test-logger").unwrap();
    }

    #[test]
    fn test_config_bad_file_no_file() {
        let bad_config = r##"
            mode = "file"
            level = "warn"
            if_exists = "fail"
            "##;
        let error =
            read_config::<ConfigLogging>("bad_file_no_file", bad_config)
                .unwrap_err()
                .to_string();
        assert!(error.contains("missing field `path`"), "{}", error);
    }

    #[test]
    fn test_config_bad_file_bad_path_type() {
        // A directory where the log file should go can't be opened as a file.
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path(), "warn", "append");
        read_config_and_create_logger("bad_file_bad_path_type", &config)
            .unwrap_err();
    }

    #[test]
    fn test_config_bad_file_path_exists_fail() {
        let dir = tempfile::tempdir().unwrap();
        let logpath = dir.path().join("log.out");
        std::fs::write(&logpath, "").unwrap();

        let config = file_config(&logpath, "warn", "fail");
        let error =
            read_config_and_create_logger("bad_file_path_exists_fail", &config)
                .unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
    }

    // Exercises each "if_exists" policy, level filtering, and the bunyan
    // record format.
    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let logpath = dir.path().join("nested").join("log.out");
        let time_before = chrono::offset::Utc::now();

        {
            // Construct the logger in a block so that it's flushed by the time
            // we proceed.
            let config = file_config(&logpath, "warn", "fail");
            let log = read_config_and_create_logger("file", &config).unwrap();
            debug!(log, "message1_debug");
            warn!(log, "message1_warn");
            error!(log, "message1_error");
        }

        {
            let config = file_config(&logpath, "warn", "append");
            let log = read_config_and_create_logger("file", &config).unwrap();
            warn!(log, "message2");
        }

        let time_after = chrono::offset::Utc::now();
        let log_records = read_bunyan_log(&logpath);
        verify_bunyan_records(log_records.iter(), &BunyanLogRecordSpec {
            name: Some("test-logger".to_string()),
            hostname: None,
            v: Some(0),
            pid: Some(std::process::id()),
        });
        verify_bunyan_records_sequential(
            log_records.iter(),
            Some(&time_before),
            Some(&time_after),
        );
        let messages: Vec<_> =
            log_records.iter().map(|r| r.msg.as_str()).collect();
        assert_eq!(messages, vec![
            "message1_warn",
            "message1_error",
            "message2"
        ]);

        {
            let config = file_config(&logpath, "trace", "truncate");
            let log = read_config_and_create_logger("file", &config).unwrap();
            debug!(log, "message3_debug");
            warn!(log, "message3_warn");
        }

        let log_records = read_bunyan_log(&logpath);
        let messages: Vec<_> =
            log_records.iter().map(|r| r.msg.as_str()).collect();
        assert_eq!(messages, vec!["message3_debug", "message3_warn"]);
    }
}
