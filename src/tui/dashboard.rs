use super::state::App;
use super::theme::{BLUE, PINK};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const ASCII_LOGO: &str = r#"
           ██
          ░░
 ██████    ██  ██████
░██░░░██  ░██ ░██░░░██
░██  ░██  ░██ ░██  ░██
░██████   ░██ ░██████
░██░░░    ░██ ░██░░░
░██       ░██ ░██
░░        ░░  ░░       "#;

pub fn render_dashboard(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    f.render_widget(block, area);

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(""));

    for logo_line in ASCII_LOGO.lines() {
        lines.push(Line::from(vec![Span::styled(
            logo_line.to_string(),
            Style::default().fg(BLUE).add_modifier(Modifier::BOLD),
        )]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(""));

    lines.push(Line::from(vec![Span::styled(
        "── 环境信息 ──",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )]));
    lines.push(Line::from(""));

    lines.push(info_line("Python  ", app.pm.python()));
    match app.installed_count {
        Some(count) => lines.push(info_line("已安装包  ", &format!("{count} 个"))),
        None => lines.push(info_line("已安装包  ", "统计中...")),
    }
    lines.push(info_line(
        "命令超时  ",
        &format!("{} 秒", app.config.command_timeout_secs),
    ));

    if let Some((verb, report)) = &app.last_command {
        let color = if report.success() { Color::Green } else { Color::Red };
        lines.push(Line::from(vec![
            Span::styled(
                "上次命令  : ",
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "{} {verb} {}",
                    report.started_at.format("%H:%M:%S"),
                    report.status
                ),
                Style::default().fg(color),
            ),
        ]));
    }

    let running = app.busy_count();
    if running > 0 {
        lines.push(Line::from(vec![
            Span::styled(
                "运行中  : ",
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("{running} 个任务"), Style::default().fg(PINK)),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(""));

    lines.push(Line::from(vec![Span::styled(
        "── 快捷键 ──",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )]));
    lines.push(Line::from(""));

    lines.push(shortcut_line("P", " 包管理           "));
    if app.console.unread {
        lines.push(shortcut_line("O", " 命令控制台 (新)  "));
    } else {
        lines.push(shortcut_line("O", " 命令控制台       "));
    }
    lines.push(shortcut_line("D", " 存储设备         "));
    lines.push(shortcut_line("C", " 缓存位置         "));
    lines.push(shortcut_line("Tab", " 切换视图       "));
    lines.push(shortcut_line("q", " 退出             "));

    if let Some(err) = &app.error_message {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![Span::styled(
            format!("✗ {err}"),
            Style::default().fg(Color::Red),
        )]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(""));

    lines.push(Line::from(vec![Span::styled(
        format!("lian-pip v{}  ", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    )]));

    let content_height = lines.len() as u16;
    let paragraph = Paragraph::new(lines).alignment(Alignment::Center);

    // 垂直居中
    let inner = area.inner(ratatui::layout::Margin {
        horizontal: 1,
        vertical: 1,
    });

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(content_height),
            Constraint::Min(0),
        ])
        .split(inner);

    f.render_widget(paragraph, vertical[1]);
}

fn info_line(label: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("{label}: "),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(value.to_string(), Style::default().fg(Color::White)),
    ])
}

fn shortcut_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::styled(
            format!("  {key}"),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(desc.to_string(), Style::default().fg(Color::White)),
    ])
}
