use super::input::{edit_text, render_input_line};
use super::layout;
use super::state::{App, AppEvent};
use super::theme::{BLUE, BRIGHT_WHITE, DESC_DIM, DIM, SEL_BG};
use crate::cache::{self, CacheKind};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tokio::sync::mpsc;

pub fn spawn_load(app: &App, tx: &mpsc::Sender<AppEvent>) {
    let pm = app.pm.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let locations = cache::current_locations(&pm).await;
        let _ = tx.send(AppEvent::CacheLoaded(locations)).await;
    });
}

pub fn handle_cache_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    if app.cache.editing {
        return handle_editing_key(key, app, tx);
    }

    match key.code {
        KeyCode::Up => {
            app.cache.selected = app.cache.selected.saturating_sub(1);
        }
        KeyCode::Down => {
            if app.cache.selected + 1 < CacheKind::ALL.len() {
                app.cache.selected += 1;
            }
        }
        KeyCode::Enter => {
            if app.cache.saving {
                return true;
            }
            let kind = app.cache.selected_kind();
            // 以当前值为初始内容，默认值提示不带入
            let current = app
                .cache
                .locations
                .as_ref()
                .map(|l| l.get(kind).to_string())
                .filter(|v| !v.contains("默认"))
                .unwrap_or_default();
            app.cache.edit_cursor = current.chars().count();
            app.cache.edit_buffer = current;
            app.cache.editing = true;
            app.cache.message = None;
        }
        KeyCode::Char('g') => spawn_load(app, tx),
        _ => return false,
    }
    true
}

fn handle_editing_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    match key.code {
        KeyCode::Esc => {
            app.cache.editing = false;
            true
        }
        KeyCode::Enter => {
            let kind = app.cache.selected_kind();
            let location = app.cache.edit_buffer.trim().to_string();
            if location.is_empty() {
                app.cache.message = Some("✗ 请输入缓存路径".to_string());
                return true;
            }
            app.cache.editing = false;
            app.cache.saving = true;
            app.cache.message = Some(format!("正在设置 {}...", kind.label()));

            let pm = app.pm.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = cache::set_location(&pm, kind, &location)
                    .await
                    .map_err(|e| e.to_string());
                let _ = tx.send(AppEvent::CacheSet(result)).await;
                let locations = cache::current_locations(&pm).await;
                let _ = tx.send(AppEvent::CacheLoaded(locations)).await;
            });
            true
        }
        _ => {
            let state = &mut app.cache;
            edit_text(key, &mut state.edit_buffer, &mut state.edit_cursor)
        }
    }
}

pub fn render_cache(f: &mut Frame, app: &App) {
    let state = &app.cache;
    let footer = if state.editing {
        "Enter 确认 | Esc 取消"
    } else if state.saving {
        "⏳ 保存中..."
    } else {
        "↑↓ 选择 | Enter 编辑 | g 刷新 | Esc 返回"
    };
    let padded = layout::view_frame(f, "🗂️  缓存位置", None, footer);

    let edit_height = if state.editing { 3 } else { 0 };
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(edit_height),
            Constraint::Length(2),
        ])
        .split(padded);

    let mut lines: Vec<Line> = Vec::new();
    for (idx, kind) in CacheKind::ALL.iter().enumerate() {
        let selected = idx == state.selected;
        let value = match &state.locations {
            Some(locations) => locations.get(*kind).to_string(),
            None => "读取中...".to_string(),
        };
        let scope = match kind.env_var() {
            Some(var) => format!("  ${var}，仅当前会话"),
            None => "  pip config，持久生效".to_string(),
        };

        if selected {
            let bg = Style::default().bg(SEL_BG);
            lines.push(Line::from(vec![
                Span::styled("> ", bg.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD)),
                Span::styled(kind.label(), bg.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD)),
                Span::styled(scope, bg.fg(DESC_DIM)),
            ]));
            lines.push(Line::from(Span::styled(format!("    {value}"), bg.fg(BLUE))));
        } else {
            lines.push(Line::from(vec![
                Span::styled("  ", Style::default()),
                Span::styled(kind.label(), Style::default().fg(Color::White)),
                Span::styled(scope, Style::default().fg(DIM)),
            ]));
            lines.push(Line::from(Span::styled(
                format!("    {value}"),
                Style::default().fg(BLUE),
            )));
        }
        lines.push(Line::from(""));
    }
    f.render_widget(Paragraph::new(lines), parts[0]);

    if state.editing {
        render_input_line(
            f,
            "新位置:",
            &state.edit_buffer,
            state.edit_cursor,
            true,
            parts[1],
        );
    }

    if let Some(msg) = &state.message {
        let color = if msg.starts_with('✗') {
            Color::Red
        } else {
            Color::Green
        };
        f.render_widget(
            Paragraph::new(msg.as_str()).style(Style::default().fg(color)),
            parts[2],
        );
    }
}
