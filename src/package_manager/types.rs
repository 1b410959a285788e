//! PackageManager 相关数据类型定义

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 已安装包（`pip list --format=json` 的条目）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
}

/// 可更新的包（`pip list --outdated --format=json` 的条目）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutdatedPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub latest_version: String,
}

/// 包管理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Install,
    Uninstall,
    Update,
    Reinstall,
    Show,
    List,
    Freeze,
    InstallRequirements,
    BulkUpgrade,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verb::Install => "安装",
            Verb::Uninstall => "卸载",
            Verb::Update => "更新",
            Verb::Reinstall => "重装",
            Verb::Show => "查看",
            Verb::List => "列出",
            Verb::Freeze => "导出",
            Verb::InstallRequirements => "批量安装",
            Verb::BulkUpgrade => "全部升级",
        };
        f.write_str(label)
    }
}

/// 同步返回给调用方的拒绝原因，此时不会启动任何进程
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("请输入包名")]
    BlankName,
    #[error("requirements 内容为空")]
    EmptyRequirements,
    #[error("查询失败: {0}")]
    Query(String),
}

/// 命令状态：Pending 之后只能进入一个终态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Succeeded,
    /// 非零退出；被信号杀死时 code 为 None
    Failed { code: Option<i32> },
    SpawnFailed(String),
    TimedOut,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Succeeded)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Pending => write!(f, "运行中"),
            CommandStatus::Succeeded => write!(f, "成功"),
            CommandStatus::Failed { code: Some(code) } => write!(f, "失败 (返回码 {code})"),
            CommandStatus::Failed { code: None } => write!(f, "失败"),
            CommandStatus::SpawnFailed(e) => write!(f, "无法启动: {e}"),
            CommandStatus::TimedOut => write!(f, "超时"),
            CommandStatus::Cancelled => write!(f, "已取消"),
        }
    }
}

/// 运行中的命令，只由 runner 的监督任务修改
#[derive(Debug)]
pub(crate) struct RunningCommand {
    pub id: u64,
    pub argv: Vec<String>,
    pub started_at: DateTime<Local>,
    pub started: Instant,
    pub deadline: Instant,
    pub output: String,
    pub status: CommandStatus,
}

impl RunningCommand {
    pub fn new(id: u64, argv: Vec<String>, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            id,
            argv,
            started_at: Local::now(),
            started,
            deadline: started + timeout,
            output: String::new(),
            status: CommandStatus::Pending,
        }
    }

    /// 进入终态并生成报告
    pub fn finish(mut self, status: CommandStatus) -> CommandReport {
        debug_assert!(!self.status.is_terminal());
        self.status = status;
        CommandReport {
            id: self.id,
            argv: self.argv,
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            output: self.output,
            status: self.status,
        }
    }
}

/// 命令结束后的结果
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub id: u64,
    pub argv: Vec<String>,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub output: String,
    pub status: CommandStatus,
}

impl CommandReport {
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// 批量升级的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpgradeReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// 取消后未执行的包
    pub skipped: Vec<String>,
}

impl BulkUpgradeReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_state() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(CommandStatus::TimedOut.is_terminal());
        assert!(CommandStatus::Cancelled.is_terminal());
        assert!(CommandStatus::Failed { code: Some(1) }.is_terminal());
    }

    #[test]
    fn only_succeeded_counts_as_success() {
        assert!(CommandStatus::Succeeded.is_success());
        assert!(!CommandStatus::TimedOut.is_success());
        assert!(!CommandStatus::SpawnFailed("x".into()).is_success());
    }

    #[test]
    fn finish_builds_report() {
        let argv = vec!["pip".into(), "list".into()];
        let mut running = RunningCommand::new(3, argv, Duration::from_secs(5));
        running.output.push_str("ok\n");
        let report = running.finish(CommandStatus::Succeeded);
        assert_eq!(report.id, 3);
        assert_eq!(report.command_line(), "pip list");
        assert_eq!(report.output, "ok\n");
        assert!(report.success());
    }
}
