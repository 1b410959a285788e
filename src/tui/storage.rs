use super::layout;
use super::state::{App, AppEvent};
use super::theme::{usage_color, BLUE, DIM, PINK};
use crate::storage::{list_storage, DriveKind, StorageRecord};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tokio::sync::mpsc;

/// 后台读取磁盘列表
pub fn spawn_refresh(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    if app.storage.loading {
        return;
    }
    app.storage.loading = true;
    let tx = tx.clone();
    tokio::spawn(async move {
        let event = match tokio::task::spawn_blocking(list_storage).await {
            Ok(records) => AppEvent::StorageLoaded(records),
            Err(e) => AppEvent::Error(format!("读取存储设备失败: {e}")),
        };
        let _ = tx.send(event).await;
    });
}

pub fn handle_storage_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    let max_scroll = app.storage.records.len().saturating_sub(app.storage.viewport.max(1));

    match key.code {
        KeyCode::Char('g') => spawn_refresh(app, tx),
        KeyCode::Up => app.storage.scroll = app.storage.scroll.saturating_sub(1),
        KeyCode::Down => app.storage.scroll = (app.storage.scroll + 1).min(max_scroll),
        _ => return false,
    }
    true
}

pub fn render_storage(f: &mut Frame, app: &mut App) {
    let state = &app.storage;
    let usb = state
        .records
        .iter()
        .filter(|r| r.kind == DriveKind::Usb)
        .count();
    let header = format!("💾 存储设备 | {} 个，其中 USB {usb} 个", state.records.len());
    let footer = if state.loading {
        "⏳ 读取中..."
    } else {
        "↑↓ 滚动 | g 刷新 | Esc 返回"
    };
    let area = layout::view_frame(f, &header, None, footer);

    let lines: Vec<Line> = if state.loading && state.records.is_empty() {
        vec![Line::from(Span::styled(
            "正在读取磁盘信息...",
            Style::default().fg(Color::Yellow),
        ))]
    } else if state.records.is_empty() {
        vec![Line::from(Span::styled(
            "没有可显示的存储设备",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        state
            .records
            .iter()
            .skip(state.scroll)
            .flat_map(record_lines)
            .collect()
    };
    f.render_widget(Paragraph::new(lines), area);

    // 每个设备占两行
    app.storage.viewport = area.height as usize / 2;
}

fn record_lines(record: &StorageRecord) -> [Line<'static>; 2] {
    let kind_color = match record.kind {
        DriveKind::Usb => PINK,
        DriveKind::Internal => DIM,
    };
    let title = Line::from(vec![
        Span::styled(
            record.mount_point.clone(),
            Style::default().fg(BLUE).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  [{}]", record.kind), Style::default().fg(kind_color)),
        Span::styled(
            format!("  {} ({})", record.device, record.filesystem),
            Style::default().fg(DIM),
        ),
    ]);
    let usage = Line::from(vec![
        Span::styled(
            usage_bar(record.used_percent, 20),
            Style::default().fg(usage_color(record.used_percent)),
        ),
        Span::styled(
            format!(
                " {:>5.1}%  已用 {:.2} / {:.2} GB，可用 {:.2} GB",
                record.used_percent, record.used_gb, record.total_gb, record.free_gb
            ),
            Style::default().fg(Color::White),
        ),
    ]);
    [title, usage]
}

/// `[██████░░░░]`
fn usage_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}
