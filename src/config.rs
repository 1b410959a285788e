use crate::console::TRUNCATION_MARKER;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// 覆盖 Python 解释器路径的环境变量
pub const PYTHON_ENV: &str = "LIAN_PIP_PYTHON";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 以 `<python> -m pip` 方式调用
    pub python: String,
    pub command_timeout_secs: u64,
    pub terminate_grace_ms: u64,
    pub query_timeout_secs: u64,
    /// `pip list --outdated` 需要联网查询每个包
    pub outdated_timeout_secs: u64,
    pub console_max_chars: usize,
    pub console_retain_chars: usize,
    pub requirements_cleanup_secs: u64,
    pub bulk_preview_count: usize,
    /// 卸载前需要警告的关键包（不区分大小写）
    pub protected_packages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            command_timeout_secs: 300,
            terminate_grace_ms: 2000,
            query_timeout_secs: 15,
            outdated_timeout_secs: 180,
            console_max_chars: 100_000,
            console_retain_chars: 80_000,
            requirements_cleanup_secs: 30,
            bulk_preview_count: 10,
            protected_packages: ["pip", "setuptools", "wheel", "python"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/lian-pip/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            log::info!("加载配置: {}", config_path.display());
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        // 解释器优先级：环境变量 > 配置文件
        if let Ok(python) = std::env::var(PYTHON_ENV) {
            if !python.trim().is_empty() {
                config.python = python.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// 保留量不能超过上限，否则截断后仍然超限；
    /// 也不能小于截断标记本身
    fn normalize(&mut self) {
        let marker = TRUNCATION_MARKER.chars().count();
        if self.console_max_chars < marker {
            log::warn!("console_max_chars ({}) 过小，已提高到 {marker}", self.console_max_chars);
            self.console_max_chars = marker;
        }
        if self.console_retain_chars > self.console_max_chars {
            log::warn!(
                "console_retain_chars ({}) 大于 console_max_chars ({})，已截到上限",
                self.console_retain_chars,
                self.console_max_chars
            );
            self.console_retain_chars = self.console_max_chars;
        }
        if self.console_retain_chars < marker {
            log::warn!(
                "console_retain_chars ({}) 小于截断标记长度，已提高到 {marker}",
                self.console_retain_chars
            );
            self.console_retain_chars = marker;
        }
        if self.python.trim().is_empty() {
            self.python = Self::default().python;
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn outdated_timeout(&self) -> Duration {
        Duration::from_secs(self.outdated_timeout_secs)
    }

    pub fn requirements_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.requirements_cleanup_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = Config::from_toml("python = \"/opt/py/bin/python\"\n").unwrap();
        assert_eq!(config.python, "/opt/py/bin/python");
        assert_eq!(config.command_timeout_secs, 300);
        assert_eq!(config.protected_packages.len(), 4);
    }

    #[test]
    fn retain_is_clamped_to_max() {
        let config =
            Config::from_toml("console_max_chars = 100\nconsole_retain_chars = 500\n").unwrap();
        assert_eq!(config.console_retain_chars, 100);
    }

    #[test]
    fn retain_is_never_below_marker() {
        let config =
            Config::from_toml("console_max_chars = 5\nconsole_retain_chars = 3\n").unwrap();
        let marker = TRUNCATION_MARKER.chars().count();
        assert_eq!(config.console_max_chars, marker);
        assert_eq!(config.console_retain_chars, marker);
    }

    #[test]
    fn outdated_timeout_is_separate_from_queries() {
        let config = Config::default();
        assert!(config.outdated_timeout() > config.query_timeout());
        let config = Config::from_toml("outdated_timeout_secs = 600\n").unwrap();
        assert_eq!(config.outdated_timeout(), Duration::from_secs(600));
        assert_eq!(config.query_timeout_secs, 15);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.console_max_chars, config.console_max_chars);
        assert_eq!(back.protected_packages, config.protected_packages);
    }
}
