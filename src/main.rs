mod cache;
mod config;
mod console;
mod package_manager;
mod storage;
mod tui;

use anyhow::Result;
use console::Console;
use package_manager::PipManager;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 加载配置
    let config = config::Config::load_or_default()?;
    log::info!("使用解释器: {}", config.python);

    let console = Console::new(
        welcome_banner(&config.python),
        config.console_max_chars,
        config.console_retain_chars,
    );
    let pm = PipManager::new(&config, console);

    tui::run(config, pm).await?;

    Ok(())
}

/// 控制台初始内容，清空后也恢复成这段
fn welcome_banner(python: &str) -> String {
    format!(
        "🐍 lian-pip - Python 包管理面板\n\
         {}\
         欢迎使用！\n\
         环境: {python}\n\
         命令输出会实时显示在这里...\n\n",
        package_manager::streaming::SEPARATOR
    )
}
