// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Local, Timelike};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

static INIT: OnceLock<()> = OnceLock::new();

struct GlogFormatter;

#[derive(Clone)]
struct SharedFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

struct SharedFileWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

impl io::Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        file.flush()
    }
}

fn read_nonempty_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Log file requested through the environment. Without one, logs go to stderr.
fn resolve_log_file_path() -> Option<PathBuf> {
    if let Some(path) = read_nonempty_env("TEXFLIGHT_LOG_FILE") {
        return Some(PathBuf::from(path));
    }
    read_nonempty_env("TEXFLIGHT_LOG_DIR").map(|dir| PathBuf::from(dir).join("texflight.log"))
}

fn open_log_writer() -> Option<SharedFileMakeWriter> {
    let log_file_path = resolve_log_file_path()?;
    if let Some(parent) = log_file_path.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        eprintln!(
            "failed to create log directory {}: {}, fallback to stderr",
            parent.display(),
            err
        );
        return None;
    }

    match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
    {
        Ok(file) => Some(SharedFileMakeWriter {
            file: Arc::new(Mutex::new(file)),
        }),
        Err(err) => {
            eprintln!(
                "failed to open log file {}: {}, fallback to stderr",
                log_file_path.display(),
                err
            );
            None
        }
    }
}

fn level_char(level: &tracing::Level) -> char {
    match *level {
        tracing::Level::ERROR => 'E',
        tracing::Level::WARN => 'W',
        tracing::Level::INFO => 'I',
        tracing::Level::DEBUG => 'D',
        tracing::Level::TRACE => 'T',
    }
}

fn current_thread_number() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse::<u64>()
        .unwrap_or(0)
}

/// Line prefix `Lyyyymmdd hh:mm:ss.uuuuuu tid file:line] `.
fn glog_prefix<T: Datelike + Timelike>(
    level: &tracing::Level,
    now: &T,
    micros: u32,
    thread: u64,
    file: &str,
    line: u32,
) -> String {
    format!(
        "{}{:04}{:02}{:02} {:02}:{:02}:{:02}.{:06} {} {}:{}] ",
        level_char(level),
        now.year() % 10000,
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        micros,
        thread,
        file,
        line
    )
}

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let now = Local::now();
        let prefix = glog_prefix(
            metadata.level(),
            &now,
            now.timestamp_subsec_micros(),
            current_thread_number(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0),
        );
        write!(writer, "{prefix}")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Turns the configured level into an EnvFilter expression. `log_filter`
/// wins when present; verbose levels apply to this crate only.
pub fn filter_from_config(log_level: &str, log_filter: Option<&str>) -> String {
    if let Some(filter) = log_filter {
        return filter.to_string();
    }
    match log_level {
        "debug" => "info,texflight=debug".to_string(),
        "trace" => "info,texflight=trace".to_string(),
        other => other.to_string(),
    }
}

pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        // The caller passes a full EnvFilter expression, including any
        // per-target overrides for h2/hyper/tonic.
        let env_filter = EnvFilter::new(level);

        if let Some(make_writer) = open_log_writer() {
            let _ = tracing_fmt()
                .with_env_filter(env_filter)
                .with_writer(make_writer)
                .with_ansi(false)
                .event_format(GlogFormatter)
                .try_init();
            return;
        }

        // ANSI colors only when stderr is a terminal.
        let use_ansi = atty::is(atty::Stream::Stderr);
        let _ = tracing_fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .event_format(GlogFormatter)
            .try_init();
    });
}

pub use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{filter_from_config, glog_prefix};

    #[test]
    fn prefix_follows_glog_layout() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        let prefix = glog_prefix(&tracing::Level::WARN, &ts, 42, 7, "src/main.rs", 12);
        assert_eq!(prefix, "W20240307 09:05:01.000042 7 src/main.rs:12] ");
    }

    #[test]
    fn filter_prefers_explicit_expression() {
        assert_eq!(
            filter_from_config("info", Some("texflight=debug,h2=off")),
            "texflight=debug,h2=off"
        );
        assert_eq!(filter_from_config("debug", None), "info,texflight=debug");
        assert_eq!(filter_from_config("warn", None), "warn");
    }
}
