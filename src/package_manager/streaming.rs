//! 流式命令执行（install / uninstall / update ...）
//!
//! 每条命令由一个监督任务负责：阻塞读取在 blocking 线程池里进行，
//! 监督任务同时等待读取结束、超时和取消三种情况。
//! 任何失败都只会变成控制台文本和 `CommandStatus`，不会向调用方抛出。

use super::parser::clean_terminal_output;
use super::types::{CommandReport, CommandStatus, RunningCommand};
use crate::console::Console;
use chrono::Local;
use duct::ReaderHandle;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};

pub const SEPARATOR: &str =
    "════════════════════════════════════════════════════════════\n";

/// 可 clone 的取消句柄
#[derive(Clone, Default)]
pub struct Canceller(Arc<Notify>);

impl Canceller {
    /// 在命令开始等待之前调用也有效（Notify 会保留一个许可）
    pub fn cancel(&self) {
        self.0.notify_one();
    }

    /// 等待取消信号
    pub async fn cancelled(&self) {
        self.0.notified().await;
    }
}

/// 已启动命令的句柄：可以等待结果、取消、查询是否结束
pub struct CommandHandle {
    id: u64,
    argv: Vec<String>,
    canceller: Canceller,
    task: JoinHandle<CommandReport>,
}

impl CommandHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    #[cfg(test)]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub async fn wait(self) -> CommandReport {
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("[{}] 监督任务异常退出: {}", self.id, e);
                CommandReport {
                    id: self.id,
                    argv: self.argv,
                    started_at: Local::now(),
                    elapsed: Duration::ZERO,
                    output: String::new(),
                    status: CommandStatus::Failed { code: None },
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct CommandRunner {
    console: Console,
    timeout: Duration,
    grace: Duration,
    next_id: Arc<AtomicU64>,
}

impl CommandRunner {
    pub fn new(console: Console, timeout: Duration, grace: Duration) -> Self {
        Self {
            console,
            timeout,
            grace,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// 目前为止启动过的命令数量
    #[cfg(test)]
    pub fn launched(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// 启动命令并立即返回句柄，必须在 tokio 运行时内调用
    pub fn spawn(&self, argv: Vec<String>) -> CommandHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let canceller = Canceller::default();
        let task = tokio::spawn(supervise(
            RunningCommand::new(id, argv.clone(), self.timeout),
            self.console.clone(),
            self.grace,
            canceller.clone(),
        ));
        CommandHandle {
            id,
            argv,
            canceller,
            task,
        }
    }
}

/// 读取线程写控制台的闸门
///
/// 监督任务写结尾之前关闭；之后读取线程读到的内容全部丢弃，
/// 保证结尾行之后不会再出现这条命令的输出。
#[derive(Clone)]
struct OutputGate(Arc<Mutex<bool>>);

impl OutputGate {
    fn open() -> Self {
        Self(Arc::new(Mutex::new(true)))
    }

    /// 闸门打开时才执行写入，写入期间持有锁
    fn pass(&self, write: impl FnOnce()) -> bool {
        let open = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *open {
            write();
        }
        *open
    }

    fn close(&self) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
    }
}

/// 读取线程的结果：出错时也保留已读到的部分
struct ReadOutcome {
    output: String,
    error: Option<io::Error>,
}

enum Stop {
    Exited(Result<ReadOutcome, JoinError>),
    TimedOut,
    Cancelled,
}

async fn supervise(
    mut running: RunningCommand,
    console: Console,
    grace: Duration,
    canceller: Canceller,
) -> CommandReport {
    let id = running.id;
    let timeout = running.deadline.saturating_duration_since(running.started);
    let command_line = running.argv.join(" ");

    emit(&console, &mut running, &format!("\n🚀 执行: {command_line}\n"));
    emit(&console, &mut running, SEPARATOR);
    log::info!("[{id}] 启动: {command_line}");

    let handle = match spawn_process(&running.argv) {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            log::warn!("[{id}] 无法启动 {command_line}: {e}");
            emit(&console, &mut running, &format!("\n💥 无法启动命令: {e}\n\n"));
            console.notify_complete(id, false);
            return running.finish(CommandStatus::SpawnFailed(e.to_string()));
        }
    };

    let gate = OutputGate::open();
    let reader_handle = Arc::clone(&handle);
    let reader_console = console.clone();
    let reader_gate = gate.clone();
    let mut reader = tokio::task::spawn_blocking(move || {
        read_output(&reader_handle, &reader_console, &reader_gate)
    });

    let deadline = tokio::time::Instant::from_std(running.deadline);
    let stop = tokio::select! {
        res = &mut reader => Stop::Exited(res),
        _ = tokio::time::sleep_until(deadline) => Stop::TimedOut,
        _ = canceller.cancelled() => Stop::Cancelled,
    };

    let status = match stop {
        Stop::Exited(res) => {
            collect(res, &console, &mut running);
            exit_status(&handle)
        }
        Stop::TimedOut => {
            log::warn!("[{id}] 超时 ({timeout:?})，终止进程组");
            let res = terminate(&handle, reader, grace).await;
            if let Some(res) = res {
                collect(res, &console, &mut running);
            }
            CommandStatus::TimedOut
        }
        Stop::Cancelled => {
            log::info!("[{id}] 用户取消");
            let res = terminate(&handle, reader, grace).await;
            if let Some(res) = res {
                collect(res, &console, &mut running);
            }
            CommandStatus::Cancelled
        }
    };

    // 读取线程可能已被放弃，之后的输出不能落在结尾行后面
    gate.close();
    emit(&console, &mut running, &trailer(&status, timeout));
    log::info!("[{id}] 结束: {status}");
    console.notify_complete(id, status.is_success());
    running.finish(status)
}

/// 写入控制台，同时记入本命令的输出
fn emit(console: &Console, running: &mut RunningCommand, text: &str) {
    console.append(text);
    running.output.push_str(text);
}

fn trailer(status: &CommandStatus, timeout: Duration) -> String {
    match status {
        CommandStatus::Succeeded => format!("{SEPARATOR}✅ 命令执行成功！\n\n"),
        CommandStatus::Failed { code } => {
            let code = code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "未知".to_string());
            format!("{SEPARATOR}❌ 命令失败，返回码 {code}\n\n")
        }
        CommandStatus::TimedOut => {
            format!("\n⏰ 命令超时 ({timeout:?})，已终止\n{SEPARATOR}\n")
        }
        CommandStatus::Cancelled => format!("\n⛔ 命令已取消\n{SEPARATOR}\n"),
        CommandStatus::SpawnFailed(_) | CommandStatus::Pending => SEPARATOR.to_string(),
    }
}

fn collect(
    res: Result<ReadOutcome, JoinError>,
    console: &Console,
    running: &mut RunningCommand,
) {
    match res {
        Ok(outcome) => {
            // 读取线程已经把每一行写进了控制台
            running.output.push_str(&outcome.output);
            if let Some(e) = outcome.error {
                log::warn!("[{}] 读取输出出错: {}", running.id, e);
                emit(console, running, &format!("\n💥 读取输出出错: {e}\n"));
            }
        }
        Err(e) => {
            log::error!("[{}] 读取线程异常: {}", running.id, e);
            emit(console, running, &format!("\n💥 读取输出出错: {e}\n"));
        }
    }
}

fn exit_status(handle: &ReaderHandle) -> CommandStatus {
    match handle.try_wait() {
        Ok(Some(output)) if output.status.success() => CommandStatus::Succeeded,
        Ok(Some(output)) => CommandStatus::Failed {
            code: output.status.code(),
        },
        Ok(None) => {
            // 管道出错但进程还活着
            if let Err(e) = handle.kill() {
                log::debug!("kill 失败: {e}");
            }
            CommandStatus::Failed { code: None }
        }
        Err(e) => {
            log::warn!("获取退出状态失败: {e}");
            CommandStatus::Failed { code: None }
        }
    }
}

/// SIGTERM → 等待 grace → SIGKILL。读取线程迟迟不退出时返回 None
async fn terminate(
    handle: &ReaderHandle,
    mut reader: JoinHandle<ReadOutcome>,
    grace: Duration,
) -> Option<Result<ReadOutcome, JoinError>> {
    signal_group(handle, libc::SIGTERM);
    if let Ok(res) = tokio::time::timeout(grace, &mut reader).await {
        return Some(res);
    }

    signal_group(handle, libc::SIGKILL);
    if let Err(e) = handle.kill() {
        log::debug!("kill 失败: {e}");
    }
    match tokio::time::timeout(grace, reader).await {
        Ok(res) => Some(res),
        Err(_) => {
            // 有进程脱离了进程组还握着管道，放弃剩余输出
            log::warn!("读取线程在 SIGKILL 后仍未退出");
            None
        }
    }
}

fn signal_group(handle: &ReaderHandle, signal: libc::c_int) {
    for pid in handle.pids() {
        // pre_exec 里已经 setpgid(0, 0)，pid 即进程组号
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }
}

/// stdout/stderr 合并到同一个管道
fn spawn_process(argv: &[String]) -> io::Result<ReaderHandle> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "命令不能为空"))?;

    duct::cmd(program.as_str(), args)
        .stderr_to_stdout()
        .stdin_null()
        .env("PYTHONUNBUFFERED", "1")
        .unchecked()
        .before_spawn(|cmd| {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    // 独立进程组，超时或取消时可以连同 pip 的子进程一起终止
                    libc::setpgid(0, 0);
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                    Ok(())
                });
            }
            Ok(())
        })
        .reader()
}

/// 逐行读取合并后的输出
///
/// `\n` 结束的行写入控制台；单独的 `\r`（进度条就地刷新）作为进度事件广播，不写入缓冲区。
/// `\r\n` 视为普通换行。
/// 闸门关闭后立即停止，剩余输出直接丢弃。
fn read_output(handle: &ReaderHandle, console: &Console, gate: &OutputGate) -> ReadOutcome {
    let mut reader = handle;
    let mut buffer = [0u8; 4096];
    let mut line: Vec<u8> = Vec::new();
    let mut after_cr = false;
    let mut output = String::new();

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !line.is_empty() {
                    emit_line(&line, console, gate, &mut output);
                }
                return ReadOutcome {
                    output,
                    error: Some(e),
                };
            }
        };

        for &byte in &buffer[..n] {
            match byte {
                b'\n' => {
                    if !emit_line(&line, console, gate, &mut output) {
                        return ReadOutcome {
                            output,
                            error: None,
                        };
                    }
                    line.clear();
                    after_cr = false;
                }
                b'\r' => {
                    if after_cr {
                        emit_progress(&line, console, gate);
                        line.clear();
                    }
                    after_cr = true;
                }
                _ => {
                    if after_cr {
                        emit_progress(&line, console, gate);
                        line.clear();
                        after_cr = false;
                    }
                    line.push(byte);
                }
            }
        }
    }

    if !line.is_empty() {
        emit_line(&line, console, gate, &mut output);
    }
    ReadOutcome {
        output,
        error: None,
    }
}

/// 闸门已关闭时返回 false
fn emit_line(line: &[u8], console: &Console, gate: &OutputGate, output: &mut String) -> bool {
    let mut text = clean_terminal_output(&String::from_utf8_lossy(line));
    text.push('\n');
    gate.pass(|| {
        console.append(&text);
        output.push_str(&text);
    })
}

fn emit_progress(line: &[u8], console: &Console, gate: &OutputGate) {
    let text = clean_terminal_output(&String::from_utf8_lossy(line));
    let text = text.trim();
    if !text.is_empty() {
        gate.pass(|| console.progress(text));
    }
}
