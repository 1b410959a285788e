use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// 渲染单行输入框（label + 文本 + 光标）
pub fn render_input_line(
    f: &mut Frame,
    label: &str,
    content: &str,
    cursor_pos: usize,
    focused: bool,
    area: Rect,
) {
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let chars: Vec<char> = content.chars().collect();
    let cursor_pos = cursor_pos.min(chars.len());
    let before: String = chars[..cursor_pos].iter().collect();
    let cursor_char = chars
        .get(cursor_pos)
        .map(|c| c.to_string())
        .unwrap_or_else(|| " ".to_string());
    let after: String = chars.iter().skip(cursor_pos + 1).collect();

    let mut spans = vec![
        Span::styled(
            format!("{label} "),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(before, Style::default().fg(Color::White)),
    ];

    if focused {
        spans.push(Span::styled(
            cursor_char,
            Style::default().fg(Color::Black).bg(Color::White),
        ));
    } else {
        spans.push(Span::styled(cursor_char, Style::default().fg(Color::White)));
    }

    spans.push(Span::styled(after, Style::default().fg(Color::White)));

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    f.render_widget(paragraph, area);
}

// ===== 共享文本编辑工具函数 =====

/// UTF-8 安全的字符位置转字节位置
pub fn char_to_byte(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// 在字符串的指定光标位置插入字符，返回新的光标位置
pub fn str_insert_char(s: &mut String, cursor: &mut usize, c: char) {
    let byte_pos = char_to_byte(s, *cursor);
    s.insert(byte_pos, c);
    *cursor += 1;
}

/// Backspace: 删除光标前的字符
pub fn str_delete_back(s: &mut String, cursor: &mut usize) {
    if *cursor > 0 {
        *cursor -= 1;
        let byte_pos = char_to_byte(s, *cursor);
        let next_byte_pos = char_to_byte(s, *cursor + 1);
        s.drain(byte_pos..next_byte_pos);
    }
}

/// Delete: 删除光标后的字符
pub fn str_delete_forward(s: &mut String, cursor: &mut usize) {
    let char_count = s.chars().count();
    if *cursor < char_count {
        let byte_pos = char_to_byte(s, *cursor);
        let next_byte_pos = char_to_byte(s, *cursor + 1);
        s.drain(byte_pos..next_byte_pos);
    }
}

/// 通用单行编辑按键，返回 true 表示文本或光标有变化
pub fn edit_text(key: KeyEvent, s: &mut String, cursor: &mut usize) -> bool {
    match key.code {
        KeyCode::Backspace => {
            str_delete_back(s, cursor);
            true
        }
        KeyCode::Delete => {
            str_delete_forward(s, cursor);
            true
        }
        KeyCode::Left => {
            *cursor = cursor.saturating_sub(1);
            true
        }
        KeyCode::Right => {
            if *cursor < s.chars().count() {
                *cursor += 1;
            }
            true
        }
        KeyCode::Home => {
            *cursor = 0;
            true
        }
        KeyCode::End => {
            *cursor = s.chars().count();
            true
        }
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                return false;
            }
            str_insert_char(s, cursor, c);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn editing_handles_multibyte_chars() {
        let mut s = String::new();
        let mut cursor = 0;
        for c in "包a".chars() {
            edit_text(key(KeyCode::Char(c)), &mut s, &mut cursor);
        }
        assert_eq!(s, "包a");
        edit_text(key(KeyCode::Left), &mut s, &mut cursor);
        edit_text(key(KeyCode::Backspace), &mut s, &mut cursor);
        assert_eq!(s, "a");
        assert_eq!(cursor, 0);
        edit_text(key(KeyCode::Delete), &mut s, &mut cursor);
        assert!(s.is_empty());
    }

    #[test]
    fn control_chars_are_not_inserted() {
        let mut s = String::new();
        let mut cursor = 0;
        let ctrl_u = KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert!(!edit_text(ctrl_u, &mut s, &mut cursor));
        assert!(s.is_empty());
    }

    #[test]
    fn end_moves_past_last_char() {
        let mut s = "numpy".to_string();
        let mut cursor = 0;
        edit_text(key(KeyCode::End), &mut s, &mut cursor);
        assert_eq!(cursor, 5);
        edit_text(key(KeyCode::Right), &mut s, &mut cursor);
        assert_eq!(cursor, 5);
    }
}
