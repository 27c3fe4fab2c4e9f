//! 日志初始化.
//!
//! 各库 crate 通过 `log` 宏输出, 这里安装 `tracing-subscriber`:
//! 控制台层带颜色, 配置了目录时另加按日期命名的文件层 (非阻塞写入).
//! `log` 记录经 tracing-log 桥接进同一个订阅者.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod task;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 过滤指令, 例如 `info` 或 `sheng_vorbis=debug`
    pub level: String,
    /// 日志目录, 为空时只输出到控制台
    pub directory: Option<String>,
    pub file_prefix: String,
    pub retention_days: i64,
    pub compress_history: bool,
    pub cleanup_interval_seconds: u64,
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "sheng".to_string(),
            retention_days: 30,
            compress_history: true,
            cleanup_interval_seconds: 3600,
            console: true,
        }
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 安装全局日志订阅者, 只能成功调用一次.
///
/// 配置了日志目录且当前处于 tokio 运行时中时, 同时启动日志维护任务
/// (零点翻滚、压缩历史文件、清理过期文件).
pub fn init(config: &LoggingConfig) -> Result<()> {
    // RUST_LOG 优先于配置
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let console_layer = config.console.then(|| {
        fmt::Layer::default()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(ConsoleFormatter)
            .with_filter(console_filter)
    });

    let mut rotate_requested = None;
    let file_layer = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("创建日志目录失败, path={}", directory))?;
            let requested = Arc::new(AtomicBool::new(false));
            let writer = CurrentFileWriter::new(
                Path::new(directory),
                &config.file_prefix,
                Arc::clone(&requested),
            )?;
            rotate_requested = Some(requested);

            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            LOG_GUARD.set(guard).ok();
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(FileFormatter)
                    .with_filter(EnvFilter::new(&config.level)),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装日志订阅者失败")?;

    if let Some(requested) = rotate_requested {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => task::spawn_log_maintenance_task(&handle, config.clone(), requested),
            Err(_) => tracing::warn!("当前没有 tokio 运行时, 不启动日志维护任务"),
        }
    }
    Ok(())
}

/// 写入当天的日志文件, 收到翻滚请求后重新打开
struct CurrentFileWriter {
    directory: PathBuf,
    prefix: String,
    rotate_requested: Arc<AtomicBool>,
    file: File,
}

impl CurrentFileWriter {
    fn new(directory: &Path, prefix: &str, rotate_requested: Arc<AtomicBool>) -> Result<Self> {
        let path = build_current_log_path(directory, prefix, Local::now().date_naive());
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            rotate_requested,
            file: open_append_file(&path)?,
        })
    }

    fn reopen(&mut self) -> std::io::Result<()> {
        let path = build_current_log_path(&self.directory, &self.prefix, Local::now().date_naive());
        self.file = open_append_file(&path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for CurrentFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.rotate_requested.swap(false, Ordering::AcqRel) {
            self.reopen()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

pub(crate) fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}:{:02}:{:02}.{:03}] ",
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        )?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m {} > ",
            color,
            meta.level().to_string(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {:5} {}:{} > ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
            meta.level().to_string(),
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_当天日志路径() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6).unwrap();
        let path = build_current_log_path(Path::new("logs"), "sheng", date);
        assert_eq!(path, PathBuf::from("logs/sheng.2026-02-06.log"));
    }

    #[test]
    fn test_翻滚请求后重新打开() {
        let dir = tempfile::tempdir().unwrap();
        let requested = Arc::new(AtomicBool::new(false));
        let mut writer = CurrentFileWriter::new(dir.path(), "probe", Arc::clone(&requested)).unwrap();
        writer.write_all(b"a\n").unwrap();
        requested.store(true, Ordering::Release);
        writer.write_all(b"b\n").unwrap();
        writer.flush().unwrap();
        assert!(!requested.load(Ordering::Acquire), "翻滚请求应被消费");

        let path = build_current_log_path(dir.path(), "probe", Local::now().date_naive());
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.ends_with("b\n"));
    }
}
