//! 配置文件 (JSON).
//!
//! ```json
//! {
//!     "logging": { "level": "debug", "directory": "logs" },
//!     "reader": { "clip_samples": false }
//! }
//! ```
//!
//! 缺省的字段取默认值.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sheng_vorbis::ReaderOptions;

use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ShengConfig {
    pub logging: LoggingConfig,
    pub reader: ReaderOptions,
}

impl ShengConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("配置文件无效, path={}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("解析 JSON 配置失败")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("序列化配置失败")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_空配置取默认值() {
        let config = ShengConfig::from_json("{}").unwrap();
        assert!(config.reader.clip_samples);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_部分字段覆盖() {
        let config = ShengConfig::from_json(
            r#"{"logging": {"level": "trace", "directory": "logs"}, "reader": {"read_chunk_samples": 512}}"#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.directory.as_deref(), Some("logs"));
        assert_eq!(config.logging.file_prefix, "sheng");
        assert_eq!(config.reader.read_chunk_samples, 512);
        assert!(config.reader.ignore_unknown_streams);
    }

    #[test]
    fn test_序列化后可重新读取() {
        let mut config = ShengConfig::default();
        config.reader.clip_samples = false;
        let text = config.to_json().unwrap();
        let back = ShengConfig::from_json(&text).unwrap();
        assert_eq!(back.reader, config.reader);
    }

    #[test]
    fn test_无效配置报错() {
        let err = ShengConfig::from_json(r#"{"reader": {"clip_samples": 3}}"#);
        assert!(err.is_err(), "类型错误的字段应报错");
    }
}
