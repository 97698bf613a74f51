//! Panic reporting for the monitor process.
//!
//! A panic is logged through `tracing` with the monitored user, the token
//! backend and the span that was active (`run_cycle` carries the cycle
//! number). Release builds abort on panic, so the record is also appended
//! straight to the daily log file before the non-blocking writer is lost.

use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Local};

use crate::credentials::BackendKind;
use crate::logging::LOG_FILE_PREFIX;

/// Process-wide facts attached to every panic record.
#[derive(Debug, Clone)]
pub struct PanicContext {
    pub user_id: String,
    pub backend: BackendKind,
}

pub fn install(log_dir: impl AsRef<Path>, context: PanicContext) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = PanicRecord::capture(&context, panic_info);

            tracing::error!(
                target: "profile_monitor::panic",
                user = %record.user_id,
                backend = %record.backend,
                span = record.span.unwrap_or("none"),
                location = %record.location,
                "Monitor panicked: {}",
                record.payload
            );

            if cfg!(panic = "abort") {
                let _ = append_record(&log_dir, &record);
            }
        }));

        previous_hook(panic_info);
    }));
}

struct PanicRecord {
    at: DateTime<Local>,
    user_id: String,
    backend: BackendKind,
    span: Option<&'static str>,
    thread: String,
    location: String,
    payload: String,
    backtrace: Option<Backtrace>,
}

impl PanicRecord {
    fn capture(context: &PanicContext, panic_info: &PanicHookInfo<'_>) -> Self {
        Self {
            at: Local::now(),
            user_id: context.user_id.clone(),
            backend: context.backend,
            span: tracing::Span::current().metadata().map(|m| m.name()),
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: panic_info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_else(|| "<unknown>".to_string()),
            payload: payload_text(panic_info),
            backtrace: Some(Backtrace::force_capture()),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC user={} backend={} span={} thread={} location={} payload={}",
            self.at.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.user_id,
            self.backend,
            self.span.unwrap_or("none"),
            self.thread,
            self.location,
            self.payload,
        )?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\nBacktrace:\n{backtrace}")?;
        }
        Ok(())
    }
}

fn append_record(log_dir: &Path, record: &PanicRecord) -> std::io::Result<()> {
    // Same name `tracing_appender::rolling::daily` gives today's file.
    let filename = format!("{}.{}", LOG_FILE_PREFIX, record.at.format("%Y-%m-%d"));
    let path = PathBuf::from(log_dir).join(filename);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn payload_text(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_info.payload();
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    panic_info.to_string()
}
