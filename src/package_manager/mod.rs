//! 包管理器模块：对 `python -m pip` 的封装

pub mod parser;
pub mod streaming;
pub mod types;

// 重新导出常用类型和函数
pub use streaming::{Canceller, CommandHandle, CommandRunner};
pub use types::{
    BulkUpgradeReport, CommandReport, OperationError, OutdatedPackage, PackageRecord, Verb,
};

use crate::config::Config;
use crate::console::Console;
use anyhow::{anyhow, bail, Context, Result};
use parser::{
    build_package_spec, format_preview, parse_outdated_json, parse_pip_list_json,
    parse_pip_list_table,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 动作被接受后立即返回，完成情况通过控制台和 handle 观察
pub struct Acknowledgement {
    pub verb: Verb,
    pub message: String,
    pub handle: CommandHandle,
}

/// 正在进行的批量升级
pub struct BulkUpgrade {
    pub total: usize,
    canceller: Canceller,
    task: JoinHandle<BulkUpgradeReport>,
}

impl BulkUpgrade {
    /// 终止当前这一项并放弃剩余的包
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub async fn wait(self) -> BulkUpgradeReport {
        self.task.await.unwrap_or_else(|e| {
            log::error!("批量升级任务异常退出: {e}");
            BulkUpgradeReport::default()
        })
    }
}

#[derive(Clone)]
pub struct PipManager {
    python: String,
    runner: CommandRunner,
    protected: Arc<Vec<String>>,
    query_timeout: Duration,
    /// `list --outdated` 要逐个访问索引，比本地查询慢得多
    outdated_timeout: Duration,
    cleanup_delay: Duration,
    preview_count: usize,
}

impl PipManager {
    pub fn new(config: &Config, console: Console) -> Self {
        Self {
            python: config.python.clone(),
            runner: CommandRunner::new(
                console,
                config.command_timeout(),
                config.terminate_grace(),
            ),
            protected: Arc::new(
                config
                    .protected_packages
                    .iter()
                    .map(|s| s.to_lowercase())
                    .collect(),
            ),
            query_timeout: config.query_timeout(),
            outdated_timeout: config.outdated_timeout(),
            cleanup_delay: config.requirements_cleanup_delay(),
            preview_count: config.bulk_preview_count,
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    pub fn console(&self) -> &Console {
        self.runner.console()
    }

    #[cfg(test)]
    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// `<python> -m pip <args...>`
    fn pip_command(&self, args: &[&str]) -> Vec<String> {
        let mut argv = vec![self.python.clone(), "-m".to_string(), "pip".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        argv
    }

    fn launch(&self, verb: Verb, message: String, args: &[&str]) -> Acknowledgement {
        let handle = self.runner.spawn(self.pip_command(args));
        log::debug!("[{}] {} 已提交", handle.id(), verb);
        Acknowledgement {
            verb,
            message,
            handle,
        }
    }

    pub fn is_protected(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        self.protected.iter().any(|p| *p == name)
    }

    // ===== 动作 =====

    /// 安装，可选版本约束
    pub fn install(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Acknowledgement, OperationError> {
        let name = validate_name(name)?;
        let spec = build_package_spec(name, version);
        Ok(self.launch(Verb::Install, format!("正在安装 {spec}..."), &["install", &spec]))
    }

    /// 卸载；关键包只警告不阻止
    pub fn uninstall(&self, name: &str) -> Result<Acknowledgement, OperationError> {
        let name = validate_name(name)?;
        if self.is_protected(name) {
            log::warn!("卸载关键包: {name}");
            self.console()
                .append(&format!("⚠️ 警告: '{name}' 是关键系统包！\n"));
        }
        Ok(self.launch(
            Verb::Uninstall,
            format!("正在卸载 {name}..."),
            &["uninstall", name, "-y"],
        ))
    }

    /// 升级到最新版本
    pub fn update(&self, name: &str) -> Result<Acknowledgement, OperationError> {
        let name = validate_name(name)?;
        Ok(self.launch(
            Verb::Update,
            format!("正在更新 {name}..."),
            &["install", "--upgrade", name],
        ))
    }

    /// 强制重装（不处理依赖）
    pub fn reinstall(&self, name: &str) -> Result<Acknowledgement, OperationError> {
        let name = validate_name(name)?;
        Ok(self.launch(
            Verb::Reinstall,
            format!("正在重装 {name}..."),
            &["install", "--force-reinstall", "--no-deps", name],
        ))
    }

    pub fn show(&self, name: &str) -> Result<Acknowledgement, OperationError> {
        let name = validate_name(name)?;
        Ok(self.launch(Verb::Show, format!("正在查询 {name}..."), &["show", name]))
    }

    pub fn list(&self) -> Acknowledgement {
        self.launch(Verb::List, "正在列出已安装的包...".to_string(), &["list"])
    }

    pub fn freeze(&self) -> Acknowledgement {
        self.launch(Verb::Freeze, "正在导出 requirements...".to_string(), &["freeze"])
    }

    /// 从 requirements 文本批量安装
    ///
    /// 文本先写入临时文件，固定延迟后删除（尽力而为）。
    pub fn install_requirements(&self, text: &str) -> Result<Acknowledgement, OperationError> {
        if text.trim().is_empty() {
            return Err(OperationError::EmptyRequirements);
        }
        let path = write_requirements(text).map_err(|e| OperationError::Query(e.to_string()))?;
        let path_str = path.to_string_lossy().to_string();
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
        let ack = self.launch(
            Verb::InstallRequirements,
            format!("正在安装 {lines} 条 requirements..."),
            &["install", "-r", &path_str],
        );

        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = path.close() {
                log::warn!("删除临时 requirements 文件失败: {e}");
            }
        });
        Ok(ack)
    }

    /// 升级全部过时的包：逐个串行执行，单个失败不影响后续
    pub async fn bulk_upgrade(&self) -> Result<BulkUpgrade, OperationError> {
        let console = self.console().clone();
        console.append("\n🔍 正在检查可更新的包...\n");

        let outdated = self
            .outdated_packages()
            .await
            .map_err(|e| OperationError::Query(e.to_string()))?;
        let names: Vec<String> = outdated.into_iter().map(|p| p.name).collect();

        if names.is_empty() {
            console.append("✅ 所有包都已是最新版本\n\n");
        } else {
            console.append(&format!(
                "📦 发现 {} 个可更新的包: {}\n",
                names.len(),
                format_preview(&names, self.preview_count)
            ));
        }

        let total = names.len();
        let canceller = Canceller::default();
        let stop = canceller.clone();
        let pm = self.clone();
        let task = tokio::spawn(async move { pm.upgrade_each(names, stop).await });
        Ok(BulkUpgrade {
            total,
            canceller,
            task,
        })
    }

    async fn upgrade_each(&self, names: Vec<String>, stop: Canceller) -> BulkUpgradeReport {
        let mut report = BulkUpgradeReport::default();
        let mut pending = names.into_iter();
        while let Some(name) = pending.next() {
            let ack = match self.update(&name) {
                Ok(ack) => ack,
                Err(_) => {
                    report.failed.push(name);
                    continue;
                }
            };
            let current = ack.handle.canceller();
            let waiter = ack.handle.wait();
            tokio::pin!(waiter);

            let mut stopped = false;
            let result = tokio::select! {
                result = &mut waiter => result,
                _ = stop.cancelled() => {
                    stopped = true;
                    current.cancel();
                    waiter.await
                }
            };
            if result.success() {
                report.succeeded.push(name);
            } else {
                report.failed.push(name);
            }
            if stopped {
                report.skipped = pending.collect();
                self.console().append(&format!(
                    "⛔ 批量升级已取消，剩余 {} 个未执行\n",
                    report.skipped.len()
                ));
                break;
            }
        }
        if report.total() > 0 {
            self.console().append(&format!(
                "📊 批量升级结束: 成功 {} 个，失败 {} 个\n\n",
                report.succeeded.len(),
                report.failed.len()
            ));
        }
        report
    }

    // ===== 查询 =====

    /// 已安装包列表：优先 JSON，失败时解析表格输出
    pub async fn installed_packages(&self) -> Result<Vec<PackageRecord>> {
        let json_err = match self.query(&["list", "--format=json"]).await {
            Ok(out) => match parse_pip_list_json(&out) {
                Ok(packages) => return Ok(packages),
                Err(e) => e,
            },
            Err(e) => e,
        };
        log::warn!("pip list --format=json 失败，回退到表格解析: {json_err}");

        let out = self
            .query(&["list"])
            .await
            .with_context(|| format!("获取包列表失败: {json_err}"))?;
        parse_pip_list_table(&out).with_context(|| format!("获取包列表失败: {json_err}"))
    }

    pub async fn outdated_packages(&self) -> Result<Vec<OutdatedPackage>> {
        let argv = self.pip_command(&["list", "--outdated", "--format=json"]);
        let out = run_query(argv, self.outdated_timeout).await?;
        parse_outdated_json(&out)
    }

    /// 已安装包数量（启动时显示）
    pub async fn count_installed(&self) -> Option<usize> {
        self.installed_packages().await.ok().map(|p| p.len())
    }

    /// 运行一条短 pip 查询并返回 stdout；非零退出时错误信息为 stderr
    pub async fn query(&self, args: &[&str]) -> Result<String> {
        let argv = self.pip_command(args);
        run_query(argv, self.query_timeout).await
    }
}

fn validate_name(name: &str) -> Result<&str, OperationError> {
    let name = name.trim();
    if name.is_empty() {
        Err(OperationError::BlankName)
    } else {
        Ok(name)
    }
}

fn write_requirements(text: &str) -> Result<tempfile::TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("lian-pip-requirements-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file.into_temp_path())
}

/// 带超时的一次性命令
async fn run_query(argv: Vec<String>, timeout: Duration) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("命令不能为空"))?;
    let command_line = argv.join(" ");

    let handle = Arc::new(
        duct::cmd(program.as_str(), args)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .with_context(|| format!("无法执行 {command_line}"))?,
    );

    let waiter = Arc::clone(&handle);
    let wait = tokio::task::spawn_blocking(move || waiter.wait().map(|o| o.clone()));

    let output = match tokio::time::timeout(timeout, wait).await {
        Ok(joined) => joined??,
        Err(_) => {
            if let Err(e) = handle.kill() {
                log::debug!("kill 失败: {e}");
            }
            bail!("{command_line} 超时 ({timeout:?})");
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        bail!(
            "{command_line} 执行失败 ({}): {stderr}",
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string())
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::CommandStatus;

    fn manager() -> PipManager {
        let config = Config {
            python: "/nonexistent/lian-pip-python".to_string(),
            command_timeout_secs: 10,
            ..Config::default()
        };
        PipManager::new(&config, Console::new("banner\n", 100_000, 80_000))
    }

    #[tokio::test]
    async fn blank_names_are_rejected_without_spawning() {
        let pm = manager();
        for name in ["", "   ", "\t\n"] {
            assert_eq!(pm.install(name, Some("1.0")).err(), Some(OperationError::BlankName));
            assert_eq!(pm.uninstall(name).err(), Some(OperationError::BlankName));
            assert_eq!(pm.update(name).err(), Some(OperationError::BlankName));
            assert_eq!(pm.reinstall(name).err(), Some(OperationError::BlankName));
            assert_eq!(pm.show(name).err(), Some(OperationError::BlankName));
        }
        assert_eq!(
            pm.install_requirements("  \n ").err(),
            Some(OperationError::EmptyRequirements)
        );
        assert_eq!(pm.runner().launched(), 0);
        assert_eq!(pm.console().snapshot(), "banner\n");
    }

    #[tokio::test]
    async fn install_builds_version_spec() {
        let pm = manager();
        let ack = pm.install(" requests ", Some("1.2.3")).unwrap();
        assert_eq!(ack.handle.argv().last().unwrap(), "requests==1.2.3");
        ack.handle.wait().await;

        let ack = pm.install("requests", Some(">=1.0")).unwrap();
        assert_eq!(ack.handle.argv().last().unwrap(), "requests>=1.0");
        assert_eq!(ack.verb, Verb::Install);
        ack.handle.wait().await;
    }

    #[tokio::test]
    async fn verbs_build_expected_argv() {
        let pm = manager();
        let ack = pm.reinstall("rich").unwrap();
        assert_eq!(
            &ack.handle.argv()[1..],
            ["-m", "pip", "install", "--force-reinstall", "--no-deps", "rich"]
        );
        ack.handle.wait().await;

        let ack = pm.update("rich").unwrap();
        assert_eq!(&ack.handle.argv()[3..], ["install", "--upgrade", "rich"]);
        ack.handle.wait().await;

        let ack = pm.uninstall("rich").unwrap();
        assert_eq!(&ack.handle.argv()[3..], ["uninstall", "rich", "-y"]);
        ack.handle.wait().await;
    }

    #[tokio::test]
    async fn protected_uninstall_warns_before_executing() {
        let pm = manager();
        let ack = pm.uninstall("PIP").unwrap();
        let report = ack.handle.wait().await;

        // 解释器不存在，命令本身会失败，但警告必须先于执行行
        assert!(matches!(report.status, CommandStatus::SpawnFailed(_)));
        let text = pm.console().snapshot();
        let warning = text.find("关键系统包").expect("warning missing");
        let executing = text.find("🚀 执行").expect("execute line missing");
        assert!(warning < executing);
    }

    #[tokio::test]
    async fn ordinary_uninstall_has_no_warning() {
        let pm = manager();
        pm.uninstall("requests").unwrap().handle.wait().await;
        assert!(!pm.console().snapshot().contains("关键系统包"));
    }

    #[tokio::test]
    async fn spawn_failure_is_not_an_error_for_caller() {
        let pm = manager();
        let ack = pm.freeze();
        assert_eq!(ack.verb, Verb::Freeze);
        let report = ack.handle.wait().await;
        assert!(!report.success());
        assert!(pm.console().snapshot().contains("无法启动命令"));
    }

    #[tokio::test]
    async fn requirements_file_holds_text() {
        let pm = manager();
        let ack = pm.install_requirements("requests==2.31.0\nrich").unwrap();
        let path = ack.handle.argv().last().unwrap().clone();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "requests==2.31.0\nrich\n");
        ack.handle.wait().await;
    }

    #[tokio::test]
    async fn bulk_upgrade_surfaces_query_failure() {
        let pm = manager();
        let err = pm.bulk_upgrade().await.err().unwrap();
        assert!(matches!(err, OperationError::Query(_)));
        assert_eq!(pm.runner().launched(), 0);
    }

    #[test]
    fn outdated_query_has_its_own_timeout() {
        let config = Config {
            query_timeout_secs: 15,
            outdated_timeout_secs: 240,
            ..Config::default()
        };
        let pm = PipManager::new(&config, Console::new("", 1000, 800));
        assert_eq!(pm.query_timeout, Duration::from_secs(15));
        assert_eq!(pm.outdated_timeout, Duration::from_secs(240));
    }

    #[tokio::test]
    async fn upgrade_each_continues_after_failures() {
        let pm = manager();
        let report = pm
            .upgrade_each(
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                Canceller::default(),
            )
            .await;
        assert_eq!(report.failed, vec!["a", "b", "c"]);
        assert!(report.succeeded.is_empty());
        assert_eq!(pm.runner().launched(), 3);
    }

    #[tokio::test]
    async fn cancelled_bulk_upgrade_skips_remaining() {
        let pm = manager();
        let stop = Canceller::default();
        stop.cancel();
        let report = pm
            .upgrade_each(
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                stop,
            )
            .await;
        assert_eq!(report.failed, vec!["a"]);
        assert_eq!(report.skipped, vec!["b", "c"]);
        assert_eq!(pm.runner().launched(), 1);
        assert!(pm.console().snapshot().contains("批量升级已取消"));
    }

    #[tokio::test]
    async fn query_reports_stderr_on_failure() {
        let err = run_query(
            vec!["sh".into(), "-c".into(), "echo boom 1>&2; exit 2".into()],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn query_times_out() {
        let err = run_query(
            vec!["sh".into(), "-c".into(), "sleep 5".into()],
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("超时"));
    }

    #[tokio::test]
    async fn query_returns_stdout() {
        let out = run_query(
            vec!["sh".into(), "-c".into(), "echo '[]'".into()],
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(parse_pip_list_json(&out).unwrap().is_empty());
    }
}
