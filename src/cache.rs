//! 缓存目录：pip / PyTorch / __pycache__

use crate::package_manager::PipManager;
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

pub const TORCH_HOME: &str = "TORCH_HOME";
pub const PYCACHE_PREFIX: &str = "PYTHONPYCACHEPREFIX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// 写入 pip 全局配置，持久生效
    Pip,
    /// 仅修改当前进程环境变量
    Torch,
    Pycache,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Pip, CacheKind::Torch, CacheKind::Pycache];

    pub fn key(&self) -> &'static str {
        match self {
            CacheKind::Pip => "pip_cache",
            CacheKind::Torch => "torch_cache",
            CacheKind::Pycache => "pycache",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CacheKind::Pip => "pip 缓存",
            CacheKind::Torch => "PyTorch 缓存",
            CacheKind::Pycache => "__pycache__ 目录",
        }
    }

    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            CacheKind::Pip => None,
            CacheKind::Torch => Some(TORCH_HOME),
            CacheKind::Pycache => Some(PYCACHE_PREFIX),
        }
    }
}

impl FromStr for CacheKind {
    type Err = anyhow::Error;

    /// 接受完整键名，也接受去掉 `_cache` 的简写
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        CacheKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s || kind.key().strip_suffix("_cache") == Some(s))
            .ok_or_else(|| anyhow!("无效的缓存类型: {s}"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheLocations {
    pub pip_cache: String,
    pub torch_cache: String,
    pub pycache: String,
}

impl CacheLocations {
    pub fn get(&self, kind: CacheKind) -> &str {
        match kind {
            CacheKind::Pip => &self.pip_cache,
            CacheKind::Torch => &self.torch_cache,
            CacheKind::Pycache => &self.pycache,
        }
    }
}

/// 读取当前三个缓存位置
pub async fn current_locations(pm: &PipManager) -> CacheLocations {
    let pip_cache = match pm.query(&["cache", "dir"]).await {
        Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
        Ok(_) => "~/.cache/pip (默认)".to_string(),
        Err(e) => {
            log::debug!("pip cache dir 失败: {e}");
            "~/.cache/pip (默认)".to_string()
        }
    };
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

    CacheLocations {
        pip_cache,
        torch_cache: torch_cache_location(env),
        pycache: pycache_location(env),
    }
}

/// TORCH_HOME > $XDG_CACHE_HOME/torch > ~/.cache/torch
pub fn torch_cache_location(env: impl Fn(&str) -> Option<String>) -> String {
    if let Some(home) = env(TORCH_HOME) {
        return home;
    }
    if let Some(xdg) = env("XDG_CACHE_HOME") {
        return PathBuf::from(xdg).join("torch").to_string_lossy().to_string();
    }
    let home = env("HOME").unwrap_or_else(|| "~".to_string());
    PathBuf::from(home)
        .join(".cache/torch")
        .to_string_lossy()
        .to_string()
}

pub fn pycache_location(env: impl Fn(&str) -> Option<String>) -> String {
    env(PYCACHE_PREFIX).unwrap_or_else(|| "项目目录（默认）".to_string())
}

/// 设置缓存位置，返回给用户看的提示
///
/// pip 缓存通过 `pip config set` 持久化，失败时带上 pip 的错误信息；
/// 其余两项只修改当前进程的环境变量。
pub async fn set_location(pm: &PipManager, kind: CacheKind, location: &str) -> Result<String> {
    let location = location.trim();
    if location.is_empty() {
        bail!("请输入缓存路径");
    }

    match kind.env_var() {
        None => {
            pm.query(&["config", "set", "global.cache-dir", location])
                .await
                .map_err(|e| anyhow!("设置缓存位置失败: {e}"))?;
            log::info!("pip 缓存目录设置为 {location}");
            Ok(format!("✅ pip 缓存位置已设置为: {location}"))
        }
        Some(var) => {
            std::env::set_var(var, location);
            log::info!("{var}={location}（仅当前进程）");
            Ok(format!(
                "✅ {} 位置已设置为: {location}\n\
                 ⚠️ 提示: 将 'export {var}={location}' 添加到 ~/.bashrc 以持久生效",
                kind.label()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::console::Console;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn parses_cache_kinds() {
        assert_eq!("pip_cache".parse::<CacheKind>().unwrap(), CacheKind::Pip);
        assert_eq!("torch_cache".parse::<CacheKind>().unwrap(), CacheKind::Torch);
        assert_eq!("pycache".parse::<CacheKind>().unwrap(), CacheKind::Pycache);
        assert_eq!(" torch ".parse::<CacheKind>().unwrap(), CacheKind::Torch);
        let err = "conda".parse::<CacheKind>().unwrap_err();
        assert!(err.to_string().contains("无效的缓存类型"));
    }

    #[test]
    fn torch_home_takes_precedence() {
        let env = lookup(&[("TORCH_HOME", "/data/torch"), ("XDG_CACHE_HOME", "/xdg")]);
        assert_eq!(torch_cache_location(env), "/data/torch");
    }

    #[test]
    fn torch_falls_back_to_xdg_then_home() {
        let env = lookup(&[("XDG_CACHE_HOME", "/xdg"), ("HOME", "/home/u")]);
        assert_eq!(torch_cache_location(env), "/xdg/torch");
        let env = lookup(&[("HOME", "/home/u")]);
        assert_eq!(torch_cache_location(env), "/home/u/.cache/torch");
    }

    #[test]
    fn pycache_defaults_to_project_dirs() {
        assert_eq!(pycache_location(lookup(&[])), "项目目录（默认）");
        assert_eq!(
            pycache_location(lookup(&[("PYTHONPYCACHEPREFIX", "/tmp/pyc")])),
            "/tmp/pyc"
        );
    }

    fn manager() -> PipManager {
        let config = Config {
            python: "/nonexistent/lian-pip-python".to_string(),
            ..Config::default()
        };
        PipManager::new(&config, Console::new("", 1000, 800))
    }

    #[tokio::test]
    async fn env_backed_location_sets_variable() {
        let pm = manager();
        let message = set_location(&pm, CacheKind::Torch, " /srv/torch ").await.unwrap();
        assert_eq!(std::env::var(TORCH_HOME).unwrap(), "/srv/torch");
        assert!(message.contains("export TORCH_HOME=/srv/torch"));
    }

    #[tokio::test]
    async fn pip_location_surfaces_installer_error() {
        let pm = manager();
        let err = set_location(&pm, CacheKind::Pip, "/srv/pip").await.unwrap_err();
        assert!(err.to_string().contains("设置缓存位置失败"));
    }

    #[tokio::test]
    async fn blank_location_is_rejected() {
        let pm = manager();
        assert!(set_location(&pm, CacheKind::Pycache, "  ").await.is_err());
    }
}
