use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Args, ValueEnum};
use log::{Level, LevelFilter, Log, Metadata, Record};

type SyslogLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log level (default: info for runs, warn for probe)
    #[arg(long = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Append log lines to a file shared by all workers
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Also send log lines to syslog
    #[arg(long)]
    pub syslog: bool,
}

/// Log backend shared by the runner and every forked worker.
///
/// Workers inherit the file descriptors, so one line must reach each sink in
/// a single `write(2)`. The `Mutex`es only order threads within one process.
struct SyncloadLogger {
    console: bool,
    log_file: Option<Mutex<File>>,
    syslog: Option<Mutex<SyslogLogger>>,
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "info",
        Level::Debug | Level::Trace => "debug",
    }
}

fn is_worker(record: &Record) -> bool {
    record.target().contains("worker")
}

/// One complete line, trailing newline included. Worker lines carry the pid
/// of the process that wrote them.
fn render_line(record: &Record, pid: u32) -> String {
    let level = level_tag(record.level());
    if is_worker(record) {
        format!("[syncload worker {}] {}: {}\n", pid, level, record.args())
    } else {
        format!("[syncload] {}: {}\n", level, record.args())
    }
}

impl SyncloadLogger {
    fn send_syslog(&self, record: &Record, pid: u32) {
        let Some(ref logger) = self.syslog else {
            return;
        };
        let Ok(mut l) = logger.lock() else {
            return;
        };
        // The formatter stamps the parent's pid, so workers name their own.
        let text = if is_worker(record) {
            format!("worker {}: {}", pid, record.args())
        } else {
            record.args().to_string()
        };
        let _ = match record.level() {
            Level::Error => l.err(&text),
            Level::Warn => l.warning(&text),
            Level::Info => l.info(&text),
            Level::Debug | Level::Trace => l.debug(&text),
        };
    }
}

impl Log for SyncloadLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let pid = std::process::id();
        let line = render_line(record, pid);

        if self.console {
            let _ = std::io::stderr().lock().write_all(line.as_bytes());
        }
        if let Some(ref file) = self.log_file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
            }
        }
        self.send_syslog(record, pid);
    }

    fn flush(&self) {
        if let Some(ref file) = self.log_file {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

pub fn init(args: &LogArgs, is_run: bool) {
    let level = args.log_level.unwrap_or(if is_run {
        LogLevel::Info
    } else {
        LogLevel::Warn
    });

    let log_file = args.log_file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(Mutex::new(f)),
            Err(e) => {
                eprintln!("[syncload] warning: cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let syslog = if args.syslog {
        syslog::unix(syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: "syncload".into(),
            pid: std::process::id(),
        })
        .ok()
        .map(Mutex::new)
    } else {
        None
    };

    let logger = SyncloadLogger {
        console: true,
        log_file,
        syslog,
    };

    let _ = log::set_boxed_logger(Box::new(logger));
    log::set_max_level(level.into());
}
