use crate::cache::{CacheKind, CacheLocations};
use crate::config::Config;
use crate::console::ConsoleEvent;
use crate::package_manager::{
    BulkUpgradeReport, Canceller, CommandReport, PackageRecord, PipManager, Verb,
};
use crate::storage::StorageRecord;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppMode {
    Dashboard,
    Packages, // Shift+P
    Console,  // Shift+O
    Storage,  // Shift+D
    Cache,    // Shift+C
}

impl AppMode {
    /// Tab 切换顺序
    pub fn next(self) -> Self {
        match self {
            AppMode::Dashboard => AppMode::Packages,
            AppMode::Packages => AppMode::Console,
            AppMode::Console => AppMode::Storage,
            AppMode::Storage => AppMode::Cache,
            AppMode::Cache => AppMode::Dashboard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromptKind {
    /// `name [version]`
    Install,
    /// 以 `;` 分隔的 requirements
    Requirements,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PackagesPhase {
    Browsing,
    Filtering,
    Prompt(PromptKind),
}

// ========== 事件 ==========

#[derive(Debug)]
pub enum AppEvent {
    PackagesLoaded(Vec<PackageRecord>),
    PackagesFailed(String),
    InstalledCount(usize),
    StorageLoaded(Vec<StorageRecord>),
    CacheLoaded(CacheLocations),
    CacheSet(Result<String, String>),
    OperationFinished { verb: Verb, report: CommandReport },
    BulkStarted(usize),
    BulkFinished(BulkUpgradeReport),
    Error(String),
}

// ========== 子状态结构体 ==========

pub struct PackagesModeState {
    pub phase: PackagesPhase,
    pub packages: Vec<PackageRecord>,
    pub filtered: Vec<usize>,
    pub selected: usize,
    pub filter: String,
    pub filter_cursor: usize,
    pub prompt: String,
    pub prompt_cursor: usize,
    pub loading: bool,
    pub message: Option<String>,
    /// 上次渲染时列表区的行数，翻页用
    pub viewport: usize,
}

pub struct ConsoleModeState {
    pub scroll: usize,
    /// 上次渲染时日志窗口的行数
    pub viewport: usize,
    /// 有新输出时自动滚到底部
    pub follow: bool,
    pub progress: String,
    /// 不在控制台视图时有新输出
    pub unread: bool,
    pub message: Option<String>,
}

pub struct StorageModeState {
    pub records: Vec<StorageRecord>,
    pub loading: bool,
    pub scroll: usize,
    /// 上次渲染时能放下的设备数
    pub viewport: usize,
}

pub struct CacheModeState {
    pub locations: Option<CacheLocations>,
    pub selected: usize,
    pub editing: bool,
    pub edit_buffer: String,
    pub edit_cursor: usize,
    pub saving: bool,
    pub message: Option<String>,
}

/// 已提交、尚未结束的命令
pub struct RunningOperation {
    pub id: u64,
    pub label: String,
    pub canceller: Canceller,
    pub waiter: JoinHandle<()>,
}

/// 正在进行的批量升级
pub struct BulkTask {
    pub canceller: Canceller,
    pub waiter: JoinHandle<()>,
}

// ========== 子状态 impl ==========

impl PackagesModeState {
    pub fn new() -> Self {
        Self {
            phase: PackagesPhase::Browsing,
            packages: Vec::new(),
            filtered: Vec::new(),
            selected: 0,
            filter: String::new(),
            filter_cursor: 0,
            prompt: String::new(),
            prompt_cursor: 0,
            loading: false,
            message: None,
            viewport: 0,
        }
    }

    /// 按名称筛选（不区分大小写）
    pub fn apply_filter(&mut self) {
        let keyword = self.filter.trim().to_lowercase();
        self.filtered = self
            .packages
            .iter()
            .enumerate()
            .filter(|(_, pkg)| keyword.is_empty() || pkg.name.to_lowercase().contains(&keyword))
            .map(|(i, _)| i)
            .collect();
        if self.selected >= self.filtered.len() {
            self.selected = self.filtered.len().saturating_sub(1);
        }
    }

    pub fn selected_package(&self) -> Option<&PackageRecord> {
        self.filtered
            .get(self.selected)
            .and_then(|&idx| self.packages.get(idx))
    }

    pub fn open_prompt(&mut self, kind: PromptKind) {
        self.phase = PackagesPhase::Prompt(kind);
        self.prompt.clear();
        self.prompt_cursor = 0;
    }
}

impl ConsoleModeState {
    pub fn new() -> Self {
        Self {
            scroll: 0,
            viewport: 0,
            follow: true,
            progress: String::new(),
            unread: false,
            message: None,
        }
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, lines: usize, total: usize) {
        let max_scroll = total.saturating_sub(self.viewport);
        self.scroll = (self.scroll + lines).min(max_scroll);
        self.follow = self.scroll >= max_scroll;
    }

    pub fn clamp_scroll(&mut self, total: usize, visible: usize) {
        let max_scroll = total.saturating_sub(visible);
        if self.follow || self.scroll > max_scroll {
            self.scroll = max_scroll;
        }
    }
}

impl StorageModeState {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            loading: false,
            scroll: 0,
            viewport: 0,
        }
    }
}

impl CacheModeState {
    pub fn new() -> Self {
        Self {
            locations: None,
            selected: 0,
            editing: false,
            edit_buffer: String::new(),
            edit_cursor: 0,
            saving: false,
            message: None,
        }
    }

    pub fn selected_kind(&self) -> CacheKind {
        CacheKind::ALL[self.selected.min(CacheKind::ALL.len() - 1)]
    }
}

// ========== App ==========

pub struct App {
    pub mode: AppMode,
    pub config: Config,
    pub pm: PipManager,
    pub events: broadcast::Receiver<ConsoleEvent>,
    pub error_message: Option<String>,
    pub should_quit: bool,
    pub installed_count: Option<usize>,
    pub running: Vec<RunningOperation>,
    pub bulk: Option<BulkTask>,
    /// 最近一条结束的命令
    pub last_command: Option<(Verb, CommandReport)>,
    // 子状态
    pub packages: PackagesModeState,
    pub console: ConsoleModeState,
    pub storage: StorageModeState,
    pub cache: CacheModeState,
}

impl App {
    pub fn new(config: Config, pm: PipManager) -> Self {
        let events = pm.console().subscribe();
        Self {
            mode: AppMode::Dashboard,
            config,
            pm,
            events,
            error_message: None,
            should_quit: false,
            installed_count: None,
            running: Vec::new(),
            bulk: None,
            last_command: None,
            packages: PackagesModeState::new(),
            console: ConsoleModeState::new(),
            storage: StorageModeState::new(),
            cache: CacheModeState::new(),
        }
    }

    /// 当前是否在输入文本（此时全局快捷键不生效）
    pub fn is_text_input(&self) -> bool {
        match self.mode {
            AppMode::Packages => self.packages.phase != PackagesPhase::Browsing,
            AppMode::Cache => self.cache.editing,
            _ => false,
        }
    }

    /// 命令结束后从运行列表移除
    pub fn finish_operation(&mut self, id: u64) {
        self.running.retain(|op| op.id != id);
    }

    /// 运行中的任务数（批量升级算一个）
    pub fn busy_count(&self) -> usize {
        self.running.len() + usize::from(self.bulk.is_some())
    }

    /// 取消最近提交的命令；没有单独的命令时取消批量升级
    pub fn cancel_latest(&mut self) -> Option<String> {
        if let Some(op) = self.running.last() {
            op.canceller.cancel();
            return Some(op.label.clone());
        }
        let bulk = self.bulk.as_ref()?;
        bulk.canceller.cancel();
        Some(Verb::BulkUpgrade.to_string())
    }

    /// 退出前取消所有命令，返回需要等待的任务
    pub fn cancel_all(&mut self) -> Vec<JoinHandle<()>> {
        let mut waiters: Vec<JoinHandle<()>> = self
            .running
            .drain(..)
            .map(|op| {
                op.canceller.cancel();
                op.waiter
            })
            .collect();
        if let Some(bulk) = self.bulk.take() {
            bulk.canceller.cancel();
            waiters.push(bulk.waiter);
        }
        waiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Console;

    fn record(name: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            version: "1.0".to_string(),
        }
    }

    #[test]
    fn filter_is_case_insensitive() {
        let mut state = PackagesModeState::new();
        state.packages = vec![record("Flask"), record("requests"), record("flask-cors")];
        state.filter = "FLASK".to_string();
        state.apply_filter();
        assert_eq!(state.filtered, vec![0, 2]);
        assert_eq!(state.selected_package().unwrap().name, "Flask");
    }

    #[test]
    fn filter_clamps_selection() {
        let mut state = PackagesModeState::new();
        state.packages = vec![record("a"), record("b"), record("c")];
        state.apply_filter();
        state.selected = 2;
        state.filter = "a".to_string();
        state.apply_filter();
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn console_scroll_follows_tail() {
        let mut state = ConsoleModeState::new();
        state.viewport = 20;
        state.clamp_scroll(100, 20);
        assert_eq!(state.scroll, 80);
        state.scroll_up(5);
        assert!(!state.follow);
        state.clamp_scroll(120, 20);
        assert_eq!(state.scroll, 75);
        state.scroll_down(50, 120);
        assert!(state.follow);
        assert_eq!(state.scroll, 100);
    }

    #[test]
    fn modes_cycle_back_to_dashboard() {
        let mut mode = AppMode::Dashboard;
        for _ in 0..5 {
            mode = mode.next();
        }
        assert_eq!(mode, AppMode::Dashboard);
    }

    #[test]
    fn text_input_blocks_global_keys() {
        let pm = PipManager::new(&Config::default(), Console::new("", 100, 80));
        let mut app = App::new(Config::default(), pm);
        app.mode = AppMode::Packages;
        assert!(!app.is_text_input());
        app.packages.open_prompt(PromptKind::Install);
        assert!(app.is_text_input());
    }

    #[tokio::test]
    async fn cancel_latest_prefers_single_commands() {
        let pm = PipManager::new(&Config::default(), Console::new("", 100, 80));
        let mut app = App::new(Config::default(), pm);
        assert!(app.cancel_latest().is_none());

        app.bulk = Some(BulkTask {
            canceller: Canceller::default(),
            waiter: tokio::spawn(async {}),
        });
        app.running.push(RunningOperation {
            id: 7,
            label: "安装 rich".to_string(),
            canceller: Canceller::default(),
            waiter: tokio::spawn(async {}),
        });
        assert_eq!(app.busy_count(), 2);
        assert_eq!(app.cancel_latest().as_deref(), Some("安装 rich"));

        app.finish_operation(7);
        assert_eq!(app.cancel_latest(), Some(Verb::BulkUpgrade.to_string()));
        assert_eq!(app.cancel_all().len(), 1);
        assert_eq!(app.busy_count(), 0);
    }
}
