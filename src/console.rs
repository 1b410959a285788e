//! 控制台缓冲区：界面上显示的"终端"文本
//!
//! 所有命令输出都追加到这里，并通过 broadcast 推送给订阅者。
//! 文本超过上限后从最旧的一端截断，只保留尾部并加上截断标记。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// 截断后放在缓冲区开头的标记
pub const TRUNCATION_MARKER: &str = "…[早期输出已截断]…\n";

/// 未被读取的输出块最多保留多少个
const PENDING_LIMIT: usize = 4096;

const EVENT_CAPACITY: usize = 1024;

/// 推送给订阅者的控制台事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// 追加到缓冲区的一段输出
    Output(String),
    /// `\r` 刷新的进度行，不写入缓冲区
    Progress(String),
    /// 缓冲区被清空，携带新的欢迎信息
    Cleared(String),
    /// 某条命令结束
    Completed { id: u64, success: bool },
}

struct ConsoleState {
    text: String,
    /// text 的字符数（非字节）
    chars: usize,
    pending: VecDeque<String>,
}

struct ConsoleInner {
    state: Mutex<ConsoleState>,
    events: broadcast::Sender<ConsoleEvent>,
    banner: String,
    max_chars: usize,
    retain_chars: usize,
}

/// 会话级控制台，clone 后共享同一个缓冲区
#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

impl Console {
    pub fn new(banner: impl Into<String>, max_chars: usize, retain_chars: usize) -> Self {
        let banner = banner.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        // 截断后至少要放得下标记
        let retain_chars = retain_chars
            .min(max_chars)
            .max(TRUNCATION_MARKER.chars().count());
        Self {
            inner: Arc::new(ConsoleInner {
                state: Mutex::new(ConsoleState {
                    chars: banner.chars().count(),
                    text: banner.clone(),
                    pending: VecDeque::new(),
                }),
                events,
                banner,
                max_chars,
                retain_chars,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        // 某个写入线程 panic 不应让整个控制台失效
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加一段文本，必要时截断
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        {
            let mut state = self.lock();
            state.text.push_str(text);
            state.chars += text.chars().count();
            if state.chars > self.inner.max_chars {
                truncate_front(&mut state, self.inner.retain_chars);
            }
            if state.pending.len() >= PENDING_LIMIT {
                state.pending.pop_front();
            }
            state.pending.push_back(text.to_string());
        }
        // 没有订阅者时 send 返回 Err，忽略即可
        let _ = self.inner.events.send(ConsoleEvent::Output(text.to_string()));
    }

    /// 广播进度行（不写入缓冲区）
    pub fn progress(&self, text: &str) {
        let _ = self.inner.events.send(ConsoleEvent::Progress(text.to_string()));
    }

    /// 广播命令完成信号
    pub fn notify_complete(&self, id: u64, success: bool) {
        let _ = self
            .inner
            .events
            .send(ConsoleEvent::Completed { id, success });
    }

    /// 当前完整文本
    pub fn snapshot(&self) -> String {
        self.lock().text.clone()
    }

    /// 当前字符数
    #[cfg(test)]
    pub fn char_count(&self) -> usize {
        self.lock().chars
    }

    /// 重置为欢迎信息，并丢弃尚未读取的输出块
    pub fn clear(&self) -> String {
        {
            let mut state = self.lock();
            state.text = self.inner.banner.clone();
            state.chars = self.inner.banner.chars().count();
            state.pending.clear();
        }
        let _ = self
            .inner
            .events
            .send(ConsoleEvent::Cleared(self.inner.banner.clone()));
        self.inner.banner.clone()
    }

    /// 取走所有尚未读取的输出块
    pub fn take_pending(&self) -> Vec<String> {
        self.lock().pending.drain(..).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.inner.events.subscribe()
    }
}

/// 只保留尾部，使"标记 + 尾部"不超过 retain 个字符
fn truncate_front(state: &mut ConsoleState, retain: usize) {
    let marker_chars = TRUNCATION_MARKER.chars().count();
    let keep = retain.saturating_sub(marker_chars);
    let skip = state.chars.saturating_sub(keep);
    let byte_start = state
        .text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(state.text.len());

    let mut text = String::with_capacity(TRUNCATION_MARKER.len() + state.text.len() - byte_start);
    text.push_str(TRUNCATION_MARKER);
    text.push_str(&state.text[byte_start..]);
    state.chars = marker_chars + (state.chars - skip);
    state.text = text;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_appends_never_truncate() {
        let console = Console::new("hi\n", 100, 60);
        console.append("abc\n");
        console.append("def\n");
        let text = console.snapshot();
        assert_eq!(text, "hi\nabc\ndef\n");
        assert!(!text.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn overflow_keeps_tail_under_retention() {
        let console = Console::new("", 200, 120);
        for i in 0..50 {
            console.append(&format!("line {i:03}\n"));
        }
        let text = console.snapshot();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.chars().count() <= 120);
        assert_eq!(console.char_count(), text.chars().count());
        // 最新的输出必须还在
        assert!(text.ends_with("line 049\n"));
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let console = Console::new("", 40, 30);
        console.append(&"包管理器".repeat(20));
        let text = console.snapshot();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.chars().count() <= 30);
    }

    #[test]
    fn tiny_retention_still_fits_marker() {
        let console = Console::new("", 20, 10);
        console.append(&"x".repeat(50));
        let text = console.snapshot();
        assert_eq!(text, TRUNCATION_MARKER);
        assert_eq!(console.char_count(), TRUNCATION_MARKER.chars().count());

        // 再次超过上限时仍然只剩标记
        console.append(&"y".repeat(10));
        assert_eq!(console.snapshot(), TRUNCATION_MARKER);
    }

    #[test]
    fn clear_resets_banner_and_drops_pending() {
        let console = Console::new("welcome\n", 1000, 800);
        console.append("pip output\n");
        assert_eq!(console.clear(), "welcome\n");
        assert_eq!(console.snapshot(), "welcome\n");
        assert!(console.take_pending().is_empty());
    }

    #[test]
    fn take_pending_drains_in_order() {
        let console = Console::new("", 1000, 800);
        console.append("a");
        console.append("b");
        assert_eq!(console.take_pending(), vec!["a".to_string(), "b".to_string()]);
        assert!(console.take_pending().is_empty());
    }

    #[test]
    fn subscribers_see_output_and_completion() {
        let console = Console::new("", 1000, 800);
        let mut rx = console.subscribe();
        console.append("x\n");
        console.progress("50%");
        console.notify_complete(7, true);
        assert_eq!(rx.try_recv().unwrap(), ConsoleEvent::Output("x\n".to_string()));
        assert_eq!(rx.try_recv().unwrap(), ConsoleEvent::Progress("50%".to_string()));
        assert_eq!(
            rx.try_recv().unwrap(),
            ConsoleEvent::Completed { id: 7, success: true }
        );
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let console = Console::new("", 1_000_000, 900_000);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let console = console.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        console.append(&format!("{t}-{i}\n"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(console.snapshot().lines().count(), 400);
    }
}
