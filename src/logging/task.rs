//! 日志文件维护: 零点翻滚, 压缩历史文件, 删除过期文件.

use super::{LoggingConfig, build_current_log_path, open_append_file};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tracing::{debug, error};

pub(super) fn spawn_log_maintenance_task(
    handle: &Handle,
    config: LoggingConfig,
    rotate_requested: Arc<AtomicBool>,
) {
    let Some(directory) = config.directory.clone().map(PathBuf::from) else {
        return;
    };
    handle.spawn(async move {
        let mut cleanup_interval =
            tokio::time::interval(Duration::from_secs(config.cleanup_interval_seconds.max(1)));

        loop {
            let next_rollover_at = compute_next_rollover(Local::now()).unwrap_or_else(|err| {
                error!("计算下一次翻滚时间失败: {}", err);
                tokio::time::Instant::now() + Duration::from_secs(60)
            });

            tokio::select! {
                _ = cleanup_interval.tick() => {
                    if let Err(err) = cleanup_logs(&directory, &config, Local::now().date_naive()) {
                        error!("清理日志失败: {}", err);
                    }
                }
                _ = tokio::time::sleep_until(next_rollover_at) => {
                    match rotate_current_log(&directory, &config.file_prefix) {
                        Ok(()) => rotate_requested.store(true, Ordering::Release),
                        Err(err) => error!("日志翻滚失败: {}", err),
                    }
                    if let Err(err) = cleanup_logs(&directory, &config, Local::now().date_naive()) {
                        error!("翻滚后清理日志失败: {}", err);
                    }
                }
            }
        }
    });
}

/// 创建新一天的日志文件; 写入端在下一次写入时切换过去
fn rotate_current_log(directory: &Path, prefix: &str) -> Result<()> {
    fs::create_dir_all(directory)?;
    let path = build_current_log_path(directory, prefix, Local::now().date_naive());
    open_append_file(&path)?;
    Ok(())
}

/// 删除早于保留期限的日志, 压缩今天之前的未压缩日志
fn cleanup_logs(directory: &Path, config: &LoggingConfig, today: NaiveDate) -> Result<()> {
    if !directory.exists() {
        return Ok(());
    }
    let cutoff = today - ChronoDuration::days(config.retention_days);

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix) else {
            continue;
        };
        let path = entry.path();

        if date < cutoff {
            debug!("删除过期日志: {}", path.display());
            fs::remove_file(&path)
                .with_context(|| format!("删除过期日志失败, path={}", path.display()))?;
        } else if config.compress_history && !compressed && date < today {
            compress_to_gz(&path)?;
        }
    }
    Ok(())
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(())
}

/// 解析 `<prefix>.<YYYY-MM-DD>.log[.gz]`, 返回日期和是否已压缩
fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date_part, compressed) = match rest.strip_suffix(".log.gz") {
        Some(date_part) => (date_part, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

fn compute_next_rollover(now: DateTime<Local>) -> Result<tokio::time::Instant> {
    let next_midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .context("计算下一次日志翻滚时间失败")?;
    let next_local = Local
        .from_local_datetime(&next_midnight)
        .earliest()
        .context("转换本地时间失败")?;
    let until = SystemTime::from(next_local.with_timezone(&Utc))
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Ok(tokio::time::Instant::now() + until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn config() -> LoggingConfig {
        LoggingConfig {
            retention_days: 7,
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_解析日志文件名() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6);
        assert_eq!(parse_rotated_log_name("sheng.2026-02-06.log", "sheng"), date.map(|d| (d, false)));
        assert_eq!(parse_rotated_log_name("sheng.2026-02-06.log.gz", "sheng"), date.map(|d| (d, true)));
        assert!(parse_rotated_log_name("sheng.log", "sheng").is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", "sheng").is_none());
        assert!(parse_rotated_log_name("sheng.2026-2-6.log", "sheng").is_none());
    }

    #[test]
    fn test_清理与压缩() {
        let dir = TempDir::new().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let write = |name: &str| fs::write(dir.path().join(name), b"line\n").unwrap();
        write("sheng.2026-03-20.log");
        write("sheng.2026-03-19.log");
        write("sheng.2026-03-01.log");
        write("sheng.2026-03-02.log.gz");
        write("unrelated.txt");

        cleanup_logs(dir.path(), &config(), today).unwrap();

        let exists = |name: &str| dir.path().join(name).exists();
        assert!(exists("sheng.2026-03-20.log"), "当天日志保留不压缩");
        assert!(!exists("sheng.2026-03-19.log"));
        assert!(exists("sheng.2026-03-19.log.gz"), "历史日志应被压缩");
        assert!(!exists("sheng.2026-03-01.log"), "过期日志应被删除");
        assert!(!exists("sheng.2026-03-02.log.gz"));
        assert!(exists("unrelated.txt"));

        let mut text = String::new();
        GzDecoder::new(File::open(dir.path().join("sheng.2026-03-19.log.gz")).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "line\n");
    }

    #[test]
    fn test_翻滚创建当天文件() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        rotate_current_log(&nested, "sheng").unwrap();
        let path = build_current_log_path(&nested, "sheng", Local::now().date_naive());
        assert!(path.exists(), "当前日志文件不存在");
        assert_eq!(path.metadata().unwrap().len(), 0);
    }

    #[test]
    fn test_下一次翻滚在一天之内() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let at = compute_next_rollover(Local::now()).unwrap();
            let until = at.saturating_duration_since(tokio::time::Instant::now());
            assert!(until <= Duration::from_secs(25 * 3600));
        });
    }
}
