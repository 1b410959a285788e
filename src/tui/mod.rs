mod cache;
mod console;
mod dashboard;
pub mod input;
mod layout;
mod packages;
pub mod state;
mod storage;
mod theme;

use crate::config::Config;
use crate::console::ConsoleEvent;
use crate::package_manager::{PipManager, Verb};
use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use state::{App, AppEvent, AppMode};
use std::io;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;

/// 退出时等待被取消的命令收尾的上限
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

pub async fn run(config: Config, pm: PipManager) -> Result<()> {
    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, pm);
    let (tx, mut rx) = mpsc::channel(32);

    // 启动时统计已安装包数量
    let pm = app.pm.clone();
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        if let Some(count) = pm.count_installed().await {
            let _ = tx_clone.send(AppEvent::InstalledCount(count)).await;
        }
    });

    let result = event_loop(&mut terminal, &mut app, &tx, &mut rx).await;

    // 取消所有仍在运行的命令，等它们把子进程收掉
    let waiters = app.cancel_all();
    if !waiters.is_empty() {
        log::info!("退出前取消 {} 个任务", waiters.len());
        let all = async {
            for waiter in waiters {
                let _ = waiter.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_WAIT, all).await.is_err() {
            log::warn!("等待命令结束超时");
        }
    }

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    rx: &mut mpsc::Receiver<AppEvent>,
) -> Result<()> {
    loop {
        drain_console_events(app);

        terminal.draw(|f| ui(f, app))?;

        // 处理按键
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                handle_key(key, app, tx);
            }
        }

        // 处理异步事件
        while let Ok(event) = rx.try_recv() {
            handle_app_event(event, app, tx);
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

/// 控制台广播：进度行和完成信号只走事件，不进缓冲区
fn drain_console_events(app: &mut App) {
    loop {
        match app.events.try_recv() {
            Ok(ConsoleEvent::Progress(line)) => app.console.progress = line,
            Ok(ConsoleEvent::Completed { id, success }) => {
                log::debug!("[{id}] 完成 success={success}");
                app.console.progress.clear();
            }
            Ok(ConsoleEvent::Cleared(_)) => {
                app.console.scroll = 0;
                app.console.progress.clear();
            }
            Ok(ConsoleEvent::Output(_)) => {}
            Err(TryRecvError::Lagged(n)) => log::debug!("控制台事件丢失 {n} 条"),
            Err(_) => break,
        }
    }

    let pending = app.pm.console().take_pending();
    if !pending.is_empty() && app.mode != AppMode::Console {
        app.console.unread = true;
    }
}

fn handle_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    // 文本输入状态下所有按键交给当前模式
    if app.is_text_input() {
        dispatch_key(key, app, tx);
        return;
    }

    match key.code {
        KeyCode::Char('q') if app.mode == AppMode::Dashboard => app.should_quit = true,
        KeyCode::Tab => {
            let next = app.mode.next();
            switch_mode(app, tx, next);
        }
        KeyCode::Esc => {
            app.error_message = None;
            switch_mode(app, tx, AppMode::Dashboard);
        }
        KeyCode::Char('P') if app.mode != AppMode::Packages => {
            switch_mode(app, tx, AppMode::Packages)
        }
        KeyCode::Char('O') => switch_mode(app, tx, AppMode::Console),
        KeyCode::Char('D') => switch_mode(app, tx, AppMode::Storage),
        KeyCode::Char('C') => switch_mode(app, tx, AppMode::Cache),
        _ => {
            dispatch_key(key, app, tx);
        }
    }
}

fn dispatch_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    match app.mode {
        AppMode::Dashboard => false,
        AppMode::Packages => packages::handle_packages_key(key, app, tx),
        AppMode::Console => console::handle_console_key(key, app),
        AppMode::Storage => storage::handle_storage_key(key, app, tx),
        AppMode::Cache => cache::handle_cache_key(key, app, tx),
    }
}

/// 切换视图，首次进入时加载数据
fn switch_mode(app: &mut App, tx: &mpsc::Sender<AppEvent>, mode: AppMode) {
    app.mode = mode;
    match mode {
        AppMode::Packages => {
            if app.packages.packages.is_empty() {
                packages::spawn_load(app, tx);
            }
        }
        AppMode::Console => {
            app.console.unread = false;
            app.console.message = None;
        }
        AppMode::Storage => storage::spawn_refresh(app, tx),
        AppMode::Cache => {
            if app.cache.locations.is_none() {
                cache::spawn_load(app, tx);
            }
        }
        AppMode::Dashboard => {}
    }
}

fn handle_app_event(event: AppEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    match event {
        AppEvent::PackagesLoaded(list) => {
            app.packages.packages = list;
            app.packages.loading = false;
            app.packages.apply_filter();
        }
        AppEvent::PackagesFailed(msg) => {
            app.packages.loading = false;
            app.packages.message = Some(format!("✗ {msg}"));
        }
        AppEvent::InstalledCount(count) => {
            app.installed_count = Some(count);
        }
        AppEvent::StorageLoaded(records) => {
            app.storage.records = records;
            app.storage.loading = false;
            app.storage.scroll = 0;
        }
        AppEvent::CacheLoaded(locations) => {
            app.cache.locations = Some(locations);
        }
        AppEvent::CacheSet(result) => {
            app.cache.saving = false;
            app.cache.message = Some(match result {
                Ok(msg) => msg,
                Err(e) => format!("✗ {e}"),
            });
        }
        AppEvent::OperationFinished { verb, report } => {
            app.finish_operation(report.id);
            log::info!(
                "{} 结束: {} (开始于 {}，用时 {:.1?}，输出 {} 字节)",
                report.command_line(),
                report.status,
                report.started_at.format("%H:%M:%S"),
                report.elapsed,
                report.output.len()
            );
            app.packages.message = Some(format!("{verb}: {}", report.status));
            // 会改变已安装集合的动作成功后刷新列表
            let mutating = matches!(
                verb,
                Verb::Install
                    | Verb::Uninstall
                    | Verb::Update
                    | Verb::Reinstall
                    | Verb::InstallRequirements
            );
            let reload = mutating && report.success();
            app.last_command = Some((verb, report));
            if reload {
                packages::spawn_load(app, tx);
            }
        }
        AppEvent::BulkStarted(total) => {
            log::info!("批量升级开始: {total} 个包");
        }
        AppEvent::BulkFinished(report) => {
            app.bulk = None;
            if report.total() > 0 {
                app.packages.message = Some(format!(
                    "{}: 成功 {} 个，失败 {} 个，跳过 {} 个",
                    Verb::BulkUpgrade,
                    report.succeeded.len(),
                    report.failed.len(),
                    report.skipped.len()
                ));
                packages::spawn_load(app, tx);
            }
        }
        AppEvent::Error(msg) => {
            log::error!("{msg}");
            app.storage.loading = false;
            app.console.message = Some(format!("✗ {msg}"));
            app.error_message = Some(msg);
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    match app.mode {
        AppMode::Dashboard => dashboard::render_dashboard(f, app),
        AppMode::Packages => packages::render_packages(f, app),
        AppMode::Console => console::render_console(f, app),
        AppMode::Storage => storage::render_storage(f, app),
        AppMode::Cache => cache::render_cache(f, app),
    }
}
