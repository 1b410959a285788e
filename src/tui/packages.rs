use super::input::{edit_text, render_input_line};
use super::layout;
use super::state::{
    App, AppEvent, AppMode, BulkTask, PackagesPhase, PromptKind, RunningOperation,
};
use super::theme::{BLUE, BRIGHT_WHITE, DIM, PINK, SEL_BG};
use crate::package_manager::{Acknowledgement, Canceller, OperationError};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};
use tokio::sync::mpsc;

/// 异步加载已安装包列表，同时刷新 Dashboard 上的数量
pub fn spawn_load(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    if app.packages.loading {
        return;
    }
    app.packages.loading = true;
    let pm = app.pm.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        match pm.installed_packages().await {
            Ok(packages) => {
                let _ = tx.send(AppEvent::InstalledCount(packages.len())).await;
                let _ = tx.send(AppEvent::PackagesLoaded(packages)).await;
            }
            Err(e) => {
                let _ = tx.send(AppEvent::PackagesFailed(format!("{e:#}"))).await;
            }
        }
    });
}

/// 处理包管理模式按键
pub fn handle_packages_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    match app.packages.phase.clone() {
        PackagesPhase::Browsing => handle_browsing_key(key, app, tx),
        PackagesPhase::Filtering => handle_filter_key(key, app),
        PackagesPhase::Prompt(kind) => handle_prompt_key(key, app, tx, kind),
    }
}

fn handle_browsing_key(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<AppEvent>) -> bool {
    let page = app.packages.viewport.max(1);
    let max = app.packages.filtered.len().saturating_sub(1);

    match key.code {
        KeyCode::Up => {
            app.packages.selected = app.packages.selected.saturating_sub(1);
        }
        KeyCode::Down => {
            if app.packages.selected < max {
                app.packages.selected += 1;
            }
        }
        KeyCode::PageUp => {
            app.packages.selected = app.packages.selected.saturating_sub(page);
        }
        KeyCode::PageDown => {
            app.packages.selected = (app.packages.selected + page).min(max);
        }
        KeyCode::Char('/') => {
            app.packages.phase = PackagesPhase::Filtering;
            app.packages.filter_cursor = app.packages.filter.chars().count();
        }
        KeyCode::Char('i') => app.packages.open_prompt(PromptKind::Install),
        KeyCode::Char('b') => app.packages.open_prompt(PromptKind::Requirements),
        KeyCode::Char('g') => spawn_load(app, tx),
        KeyCode::Char('l') => {
            let ack = app.pm.list();
            track_operation(app, tx, ack);
        }
        KeyCode::Char('f') => {
            let ack = app.pm.freeze();
            track_operation(app, tx, ack);
        }
        KeyCode::Char('A') => spawn_bulk_upgrade(app, tx),
        KeyCode::Char(c @ ('x' | 'u' | 'R' | 's')) => {
            let Some(name) = app.packages.selected_package().map(|p| p.name.clone()) else {
                app.packages.message = Some("请先选择一个包".to_string());
                return true;
            };
            let result = match c {
                'x' => app.pm.uninstall(&name),
                'u' => app.pm.update(&name),
                'R' => app.pm.reinstall(&name),
                _ => app.pm.show(&name),
            };
            submit(app, tx, result);
        }
        _ => return false,
    }
    true
}

fn handle_filter_key(key: KeyEvent, app: &mut App) -> bool {
    match key.code {
        KeyCode::Enter => {
            app.packages.phase = PackagesPhase::Browsing;
            true
        }
        KeyCode::Esc => {
            app.packages.filter.clear();
            app.packages.filter_cursor = 0;
            app.packages.apply_filter();
            app.packages.phase = PackagesPhase::Browsing;
            true
        }
        _ => {
            let state = &mut app.packages;
            let changed = edit_text(key, &mut state.filter, &mut state.filter_cursor);
            if changed {
                state.apply_filter();
            }
            changed
        }
    }
}

fn handle_prompt_key(
    key: KeyEvent,
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    kind: PromptKind,
) -> bool {
    match key.code {
        KeyCode::Esc => {
            app.packages.phase = PackagesPhase::Browsing;
            true
        }
        KeyCode::Enter => {
            let input = std::mem::take(&mut app.packages.prompt);
            app.packages.prompt_cursor = 0;
            app.packages.phase = PackagesPhase::Browsing;
            let result = match kind {
                PromptKind::Install => {
                    let (name, version) = parse_install_input(&input);
                    app.pm.install(name, version)
                }
                PromptKind::Requirements => {
                    app.pm.install_requirements(&requirements_text(&input))
                }
            };
            submit(app, tx, result);
            true
        }
        _ => {
            let state = &mut app.packages;
            edit_text(key, &mut state.prompt, &mut state.prompt_cursor)
        }
    }
}

/// `numpy 1.26.4` → ("numpy", Some("1.26.4"))
fn parse_install_input(input: &str) -> (&str, Option<&str>) {
    let mut parts = input.split_whitespace();
    let name = parts.next().unwrap_or("");
    (name, parts.next())
}

/// 输入框里用 `;` 分隔多行
fn requirements_text(input: &str) -> String {
    input
        .split(';')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn submit(
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    result: Result<Acknowledgement, OperationError>,
) {
    match result {
        Ok(ack) => track_operation(app, tx, ack),
        Err(e) => app.packages.message = Some(format!("✗ {e}")),
    }
}

/// 记录已提交的命令并切到控制台，命令结束时回传事件
fn track_operation(app: &mut App, tx: &mpsc::Sender<AppEvent>, ack: Acknowledgement) {
    let Acknowledgement {
        verb,
        message,
        handle,
    } = ack;
    let id = handle.id();
    let canceller = handle.canceller();
    let tx = tx.clone();
    let waiter = tokio::spawn(async move {
        let report = handle.wait().await;
        let _ = tx.send(AppEvent::OperationFinished { verb, report }).await;
    });

    app.packages.message = Some(message.clone());
    app.running.push(RunningOperation {
        id,
        label: message,
        canceller,
        waiter,
    });
    app.mode = AppMode::Console;
    app.console.follow = true;
}

fn spawn_bulk_upgrade(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    if app.bulk.is_some() {
        app.packages.message = Some("批量升级正在进行".to_string());
        return;
    }
    let pm = app.pm.clone();
    let tx = tx.clone();
    // 检查阶段也算在批量任务里，取消信号转交给升级任务
    let stop = Canceller::default();
    let canceller = stop.clone();
    let waiter = tokio::spawn(async move {
        match pm.bulk_upgrade().await {
            Ok(bulk) => {
                let _ = tx.send(AppEvent::BulkStarted(bulk.total)).await;
                let inner = bulk.canceller();
                let forward = tokio::spawn(async move {
                    stop.cancelled().await;
                    inner.cancel();
                });
                let report = bulk.wait().await;
                forward.abort();
                let _ = tx.send(AppEvent::BulkFinished(report)).await;
            }
            Err(e) => {
                let _ = tx.send(AppEvent::Error(e.to_string())).await;
                let _ = tx.send(AppEvent::BulkFinished(Default::default())).await;
            }
        }
    });
    app.bulk = Some(BulkTask { canceller, waiter });
    app.mode = AppMode::Console;
    app.console.follow = true;
}

// ===== 渲染 =====

pub fn render_packages(f: &mut Frame, app: &mut App) {
    let state = &app.packages;
    let header = format!("📦 包管理 | {}", app.pm.python());
    let footer = match state.phase {
        PackagesPhase::Filtering => "输入关键词筛选 | Enter 确认 | Esc 清除".to_string(),
        PackagesPhase::Prompt(_) => "Enter 提交 | Esc 取消".to_string(),
        PackagesPhase::Browsing => match &state.message {
            Some(msg) => format!("{msg} | Esc 返回"),
            None => concat!(
                "↑↓ 选择 | / 筛选 | i 安装 | b 批量安装 | x 卸载 | u 更新 | R 重装 | ",
                "s 详情 | l 列表 | f 导出 | A 全部升级 | g 刷新"
            )
            .to_string(),
        },
    };
    let padded = layout::view_frame(f, &header, None, &footer);
    if padded.height < 3 {
        return;
    }

    let prompt_height = if matches!(state.phase, PackagesPhase::Prompt(_)) { 3 } else { 0 };
    let inner_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),             // 筛选
            Constraint::Length(1),             // 统计
            Constraint::Min(0),                // 列表
            Constraint::Length(prompt_height), // 输入框
        ])
        .split(padded);

    let filter_style = if state.phase == PackagesPhase::Filtering {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    let cursor = if state.phase == PackagesPhase::Filtering { "_" } else { "" };
    f.render_widget(
        Paragraph::new(format!("> 筛选: {}{cursor}", state.filter)).style(filter_style),
        inner_chunks[0],
    );

    let stat_text = format!(
        "共 {} 个匹配 / 已安装 {} 个",
        state.filtered.len(),
        state.packages.len()
    );
    f.render_widget(
        Paragraph::new(stat_text).style(Style::default().fg(Color::DarkGray)),
        inner_chunks[1],
    );

    if state.loading && state.packages.is_empty() {
        f.render_widget(
            Paragraph::new("正在加载已安装包列表...").style(Style::default().fg(Color::Yellow)),
            inner_chunks[2],
        );
    } else {
        render_package_list(f, app, inner_chunks[2]);
    }

    if let PackagesPhase::Prompt(kind) = state.phase {
        let label = match kind {
            PromptKind::Install => "安装 (包名 [版本]):",
            PromptKind::Requirements => "requirements (用 ; 分隔):",
        };
        render_input_line(f, label, &state.prompt, state.prompt_cursor, true, inner_chunks[3]);
    }

    app.packages.viewport = inner_chunks[2].height as usize;
}

fn render_package_list(f: &mut Frame, app: &App, area: Rect) {
    let state = &app.packages;
    if state.filtered.is_empty() {
        if !state.filter.is_empty() {
            f.render_widget(
                Paragraph::new("  未找到匹配的包").style(Style::default().fg(Color::DarkGray)),
                area,
            );
        }
        return;
    }

    let visible_height = area.height as usize;
    if visible_height == 0 {
        return;
    }
    let total = state.filtered.len();
    let scroll = state.selected.saturating_sub(visible_height - 1);

    let name_width = state
        .filtered
        .iter()
        .skip(scroll)
        .take(visible_height)
        .filter_map(|&idx| state.packages.get(idx))
        .map(|pkg| pkg.name.chars().count())
        .max()
        .unwrap_or(20);

    let lines: Vec<Line> = state
        .filtered
        .iter()
        .enumerate()
        .skip(scroll)
        .take(visible_height)
        .filter_map(|(display_idx, &real_idx)| {
            let pkg = state.packages.get(real_idx)?;
            let is_selected = display_idx == state.selected;
            let protected = app.pm.is_protected(&pkg.name);
            let cursor = if is_selected { "> " } else { "  " };
            let padding = " ".repeat(name_width.saturating_sub(pkg.name.chars().count()) + 2);
            let name_color = if protected { PINK } else { BLUE };

            let line = if is_selected {
                let bg = Style::default().bg(SEL_BG);
                let bold = bg.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD);
                Line::from(vec![
                    Span::styled(cursor, bold),
                    Span::styled(pkg.name.clone(), bold),
                    Span::styled(format!("{padding}{}", pkg.version), bg.fg(BLUE)),
                ])
            } else {
                Line::from(vec![
                    Span::styled(cursor, Style::default().fg(Color::White)),
                    Span::styled(pkg.name.clone(), Style::default().fg(name_color)),
                    Span::styled(format!("{padding}{}", pkg.version), Style::default().fg(DIM)),
                ])
            };
            Some(line)
        })
        .collect();

    f.render_widget(Paragraph::new(lines), area);

    if total > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));
        let mut scrollbar_state = ScrollbarState::new(total).position(scroll);
        f.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_input_splits_name_and_version() {
        assert_eq!(parse_install_input("numpy"), ("numpy", None));
        assert_eq!(parse_install_input(" numpy  1.26.4 "), ("numpy", Some("1.26.4")));
        assert_eq!(parse_install_input("numpy >=1.20"), ("numpy", Some(">=1.20")));
        assert_eq!(parse_install_input("   "), ("", None));
    }

    #[test]
    fn requirements_are_split_on_semicolons() {
        assert_eq!(
            requirements_text("requests==2.31.0; rich ;;flask>=3"),
            "requests==2.31.0\nrich\nflask>=3"
        );
        assert_eq!(requirements_text(" ; "), "");
    }
}
