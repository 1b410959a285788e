//! 视图外框和控制台日志窗口
//!
//! 每个视图都是：标题栏 + 黄色边框的内容区 + 提示栏。
//! 提示栏的颜色跟着消息前缀走：`✗` 红色，`⏳` 黄色，其余绿色。

use super::state::ConsoleModeState;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

/// 画出视图外框，返回内容区（左右各留一列，右侧那列给滚动条）
pub fn view_frame(f: &mut Frame, title: &str, body_title: Option<&str>, hint: &str) -> Rect {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(f.area());

    f.render_widget(
        Paragraph::new(title)
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center),
        header,
    );

    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    if let Some(body_title) = body_title {
        block = block.title(format!(" {body_title} "));
    }
    let inner = block.inner(body);
    f.render_widget(block, body);

    f.render_widget(
        Paragraph::new(format!(" {hint}"))
            .style(Style::default().fg(hint_color(hint)))
            .block(Block::default().borders(Borders::ALL)),
        footer,
    );

    inner.inner(Margin {
        horizontal: 1,
        vertical: 0,
    })
}

fn hint_color(hint: &str) -> Color {
    if hint.starts_with('✗') {
        Color::Red
    } else if hint.starts_with('⏳') {
        Color::Yellow
    } else {
        Color::Green
    }
}

/// 控制台日志窗口
///
/// 按逻辑行滚动、不换行；记录本次可见行数并在这里统一校正滚动位置，
/// 按键处理只改 scroll/follow，不关心窗口多高。
pub fn render_log(f: &mut Frame, text: &str, view: &mut ConsoleModeState, area: Rect) {
    let lines: Vec<&str> = text.lines().collect();
    let visible = area.height as usize;
    view.viewport = visible;
    view.clamp_scroll(lines.len(), visible);

    let shown: Vec<Line> = lines
        .iter()
        .skip(view.scroll)
        .take(visible)
        .map(|line| Line::from(line.to_string()))
        .collect();
    f.render_widget(Paragraph::new(shown), area);

    if lines.len() > visible {
        // 右边距那一列
        let track = Rect::new(area.right(), area.y, 1, area.height);
        let max_scroll = lines.len().saturating_sub(visible);
        let mut state = ScrollbarState::new(max_scroll).position(view.scroll);
        f.render_stateful_widget(
            Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓")),
            track,
            &mut state,
        );
    }
}

/// 将文本复制到系统剪贴板，依次尝试 wl-copy、xclip、xsel
pub fn copy_to_clipboard(text: &str) -> bool {
    let candidates: &[(&str, &[&str])] = &[
        ("wl-copy", &[]),
        ("xclip", &["-selection", "clipboard"]),
        ("xsel", &["--clipboard", "--input"]),
    ];
    candidates.iter().any(|(program, args)| {
        let copied = duct::cmd(*program, *args)
            .stdin_bytes(text.as_bytes().to_vec())
            .stdout_null()
            .stderr_null()
            .unchecked()
            .run();
        matches!(copied, Ok(output) if output.status.success())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};

    #[test]
    fn hint_color_follows_prefix() {
        assert_eq!(hint_color("✗ 请输入缓存路径"), Color::Red);
        assert_eq!(hint_color("⏳ Downloading 42%"), Color::Yellow);
        assert_eq!(hint_color("↑↓ 滚动 | Esc 返回"), Color::Green);
    }

    #[test]
    fn log_window_clamps_to_rendered_height() {
        let mut terminal = Terminal::new(TestBackend::new(40, 10)).unwrap();
        let mut view = ConsoleModeState::new();
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();

        terminal
            .draw(|f| {
                let area = Rect::new(0, 0, 39, 6);
                render_log(f, &text, &mut view, area);
            })
            .unwrap();
        assert_eq!(view.viewport, 6);
        assert_eq!(view.scroll, 24);

        // 离开跟随后，文本变短也不能滚出范围
        view.scroll_up(2);
        assert_eq!(view.scroll, 22);
        let short = "a\nb\n";
        terminal
            .draw(|f| render_log(f, short, &mut view, Rect::new(0, 0, 39, 6)))
            .unwrap();
        assert_eq!(view.scroll, 0);
    }
}
