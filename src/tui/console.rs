use super::layout;
use super::state::App;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::Frame;

/// 处理控制台模式按键
pub fn handle_console_key(key: KeyEvent, app: &mut App) -> bool {
    let total = app.pm.console().snapshot().lines().count();

    match key.code {
        KeyCode::Up => app.console.scroll_up(1),
        KeyCode::Down => app.console.scroll_down(1, total),
        KeyCode::PageUp => app.console.scroll_up(10),
        KeyCode::PageDown => app.console.scroll_down(10, total),
        KeyCode::Home => app.console.scroll_up(usize::MAX),
        // 下次渲染时滚到底
        KeyCode::End => app.console.follow = true,
        KeyCode::Char('c') => {
            app.pm.console().clear();
            app.console.scroll = 0;
            app.console.follow = true;
            app.console.message = Some("控制台已清空".to_string());
        }
        KeyCode::Char('k') => {
            app.console.message = Some(match app.cancel_latest() {
                Some(label) => format!("⛔ 已请求取消: {label}"),
                None => "没有正在运行的命令".to_string(),
            });
        }
        KeyCode::Char('y') => {
            let text = app.pm.console().snapshot();
            app.console.message = Some(copy_message(&text, "控制台内容"));
        }
        KeyCode::Char('Y') => {
            app.console.message = Some(match &app.last_command {
                Some((verb, report)) => copy_message(&report.output, &format!("{verb} 的输出")),
                None => "还没有结束的命令".to_string(),
            });
        }
        _ => return false,
    }
    true
}

fn copy_message(text: &str, what: &str) -> String {
    if layout::copy_to_clipboard(text) {
        format!("已复制{what}到剪贴板")
    } else {
        "✗ 复制失败：未找到 wl-copy / xclip / xsel".to_string()
    }
}

pub fn render_console(f: &mut Frame, app: &mut App) {
    let busy = app.busy_count();
    let header = if busy > 0 {
        format!("🖥️  命令控制台 | 运行中 {busy} 个")
    } else {
        "🖥️  命令控制台".to_string()
    };

    let footer = if !app.console.progress.is_empty() {
        format!("⏳ {}", app.console.progress)
    } else if let Some(msg) = &app.console.message {
        msg.clone()
    } else {
        "↑↓ PgUp PgDn 滚动 | End 跟随 | c 清空 | k 取消命令 | y/Y 复制全部/上条输出 | Esc 返回"
            .to_string()
    };

    let title = if app.console.follow { "输出 [跟随]" } else { "输出" };
    let area = layout::view_frame(f, &header, Some(title), &footer);
    let text = app.pm.console().snapshot();
    layout::render_log(f, &text, &mut app.console, area);
}
