//! Rate-limited reveal of one block
//!
//! [`RevealScheduler`] tracks how much of a block's text is on screen. Each
//! [`RevealScheduler::tick`] advances the displayed prefix by
//! `max(rate, elapsed / per_char_delay)` characters, where the delay depends
//! on the block kind and drops to almost nothing when a large backlog builds
//! up. New text that extends what is displayed continues the reveal; any
//! other text restarts it from zero.

use crate::block::{BlockKind, ContentBlock, RenderHint};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use utils::clock::SharedClock;

/// Reveal pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    /// Per-character delay for answers, in milliseconds
    pub answer_delay_ms: u64,
    /// Per-character delay for responses
    pub response_delay_ms: u64,
    /// Per-character delay for thinking
    pub thinking_delay_ms: u64,
    /// Per-character delay for analysis
    pub analyzing_delay_ms: u64,
    /// Per-character delay for unmarked text
    pub raw_delay_ms: u64,
    /// Per-character delay for document references; 0 shows them at once
    pub document_ref_delay_ms: u64,
    /// Pending characters above which the accelerated delay applies
    pub accelerate_threshold_chars: usize,
    /// Per-character delay while accelerated
    pub accelerated_delay_ms: u64,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            answer_delay_ms: 30,
            response_delay_ms: 30,
            thinking_delay_ms: 10,
            analyzing_delay_ms: 10,
            raw_delay_ms: 20,
            document_ref_delay_ms: 0,
            accelerate_threshold_chars: 200,
            accelerated_delay_ms: 1,
        }
    }
}

impl RevealConfig {
    /// Reveal everything immediately
    pub fn instant() -> Self {
        Self {
            answer_delay_ms: 0,
            response_delay_ms: 0,
            thinking_delay_ms: 0,
            analyzing_delay_ms: 0,
            raw_delay_ms: 0,
            document_ref_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Per-character delay for `kind` with nothing backed up
    pub fn delay_for(&self, kind: BlockKind) -> Duration {
        let ms = match kind {
            BlockKind::Answer => self.answer_delay_ms,
            BlockKind::Response => self.response_delay_ms,
            BlockKind::Thinking => self.thinking_delay_ms,
            BlockKind::Analyzing => self.analyzing_delay_ms,
            BlockKind::Raw => self.raw_delay_ms,
            BlockKind::DocumentRef => self.document_ref_delay_ms,
        };
        Duration::from_millis(ms)
    }

    /// Delay to use when `pending` characters are still hidden
    pub fn effective_delay(&self, kind: BlockKind, pending: usize) -> Duration {
        if pending > self.accelerate_threshold_chars {
            Duration::from_millis(self.accelerated_delay_ms)
        } else {
            self.delay_for(kind)
        }
    }
}

/// Displayed-prefix state of one block.
#[derive(Debug, Clone)]
pub struct RevealScheduler {
    kind: BlockKind,
    hint: RenderHint,
    config: RevealConfig,
    clock: SharedClock,
    full_text: String,
    total_chars: usize,
    displayed_chars: usize,
    last_tick: Option<Instant>,
}

impl RevealScheduler {
    /// Create an empty scheduler
    pub fn new(kind: BlockKind, hint: RenderHint, config: RevealConfig, clock: SharedClock) -> Self {
        Self {
            kind,
            hint,
            config,
            clock,
            full_text: String::new(),
            total_chars: 0,
            displayed_chars: 0,
            last_tick: None,
        }
    }

    /// Create a scheduler loaded with a block's current text
    pub fn for_block(block: &ContentBlock, config: RevealConfig, clock: SharedClock) -> Self {
        let mut scheduler = Self::new(block.kind, block.render_hint, config, clock);
        scheduler.set_text(&block.raw_text);
        scheduler
    }

    /// Block kind
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Replace the full text.
    ///
    /// If `text` starts with what is displayed the reveal continues from
    /// there; otherwise it restarts from an empty display. Time spent fully
    /// caught up does not count toward the pace of the new text.
    pub fn set_text(&mut self, text: &str) {
        if text == self.full_text {
            return;
        }

        if self.is_complete() {
            self.last_tick = None;
        }
        if !text.starts_with(self.displayed()) {
            self.displayed_chars = 0;
            self.last_tick = None;
        }
        self.full_text = text.to_string();
        self.total_chars = self.full_text.chars().count();
        self.displayed_chars = self.displayed_chars.min(self.total_chars);
    }

    /// Advance the display. Returns whether anything new became visible.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now();
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);

        if self.is_complete() {
            return false;
        }

        let pending = self.total_chars - self.displayed_chars;
        let delay = self.config.effective_delay(self.kind, pending);

        let step = if !self.hint.typing_enabled || delay.is_zero() {
            pending
        } else {
            let by_time = (elapsed.as_millis() / delay.as_millis().max(1)) as usize;
            by_time.max(self.hint.reveal_rate_chars_per_tick.max(1) as usize)
        };

        self.displayed_chars = (self.displayed_chars + step).min(self.total_chars);
        true
    }

    /// Show everything now
    pub fn reveal_all(&mut self) {
        self.displayed_chars = self.total_chars;
    }

    /// Currently displayed prefix
    pub fn displayed(&self) -> &str {
        let end = self
            .full_text
            .char_indices()
            .nth(self.displayed_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.full_text.len());
        &self.full_text[..end]
    }

    /// Displayed length in characters
    pub fn displayed_len(&self) -> usize {
        self.displayed_chars
    }

    /// Full length in characters
    pub fn total_len(&self) -> usize {
        self.total_chars
    }

    /// Whether everything received so far is displayed
    pub fn is_complete(&self) -> bool {
        self.displayed_chars >= self.total_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use utils::clock::ManualClock;

    fn scheduler(kind: BlockKind) -> (RevealScheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let scheduler = RevealScheduler::new(
            kind,
            RenderHint::for_kind(kind),
            RevealConfig::default(),
            clock.clone(),
        );
        (scheduler, clock)
    }

    #[test]
    fn test_first_tick_reveals_minimum_rate() {
        let (mut s, _) = scheduler(BlockKind::Answer);
        s.set_text("Hello");

        assert!(s.tick());
        assert_eq!(s.displayed(), "H");
    }

    #[test]
    fn test_elapsed_time_sets_pace() {
        let (mut s, clock) = scheduler(BlockKind::Answer);
        s.set_text("abcdefghijklmnopqrstuvwxyz");
        s.tick();

        clock.advance_ms(90); // 3 chars at 30ms
        s.tick();
        assert_eq!(s.displayed(), "abcd");

        clock.advance_ms(10); // below one char, minimum rate applies
        s.tick();
        assert_eq!(s.displayed_len(), 5);
    }

    #[test]
    fn test_thinking_reveals_faster_than_answer() {
        let (mut thinking, t_clock) = scheduler(BlockKind::Thinking);
        let (mut answer, a_clock) = scheduler(BlockKind::Answer);
        let text = "x".repeat(100);
        thinking.set_text(&text);
        answer.set_text(&text);
        thinking.tick();
        answer.tick();

        t_clock.advance_ms(300);
        a_clock.advance_ms(300);
        thinking.tick();
        answer.tick();

        assert_eq!(thinking.displayed_len(), 31);
        assert_eq!(answer.displayed_len(), 11);
    }

    #[test]
    fn test_continuation_never_rolls_back() {
        let (mut s, clock) = scheduler(BlockKind::Answer);
        s.set_text("Hel");
        s.tick();
        clock.advance_ms(60);
        s.tick();
        assert_eq!(s.displayed(), "Hel");

        s.set_text("Hello");
        assert_eq!(s.displayed(), "Hel");
        clock.advance_ms(30);
        s.tick();
        assert_eq!(s.displayed(), "Hell");
    }

    #[test]
    fn test_non_continuation_resets() {
        let (mut s, _) = scheduler(BlockKind::Answer);
        s.set_text("Hel");
        s.tick();
        s.tick();
        assert_eq!(s.displayed_len(), 2);

        s.set_text("Bye");
        assert_eq!(s.displayed_len(), 0);
        s.tick();
        assert_eq!(s.displayed(), "B");
    }

    #[test]
    fn test_idle_time_is_not_banked() {
        let (mut s, clock) = scheduler(BlockKind::Answer);
        s.set_text("ab");
        s.tick();
        s.tick();
        assert!(s.is_complete());

        for _ in 0..75 {
            clock.advance_ms(20);
            assert!(!s.tick());
        }

        s.set_text(&format!("ab{}", "c".repeat(50)));
        clock.advance_ms(20);
        s.tick();
        assert_eq!(s.displayed(), "abc");

        clock.advance_ms(90);
        s.tick();
        assert_eq!(s.displayed_len(), 6);
    }

    #[test]
    fn test_large_backlog_is_accelerated() {
        let (mut s, clock) = scheduler(BlockKind::Answer);
        s.set_text(&"字".repeat(1_000));
        s.tick();

        clock.advance_ms(100);
        s.tick();
        // 1ms per char while more than 200 chars are pending
        assert_eq!(s.displayed_len(), 101);

        clock.advance_ms(1_000);
        s.tick();
        assert!(s.is_complete());
        assert_eq!(s.displayed(), "字".repeat(1_000));
    }

    #[test]
    fn test_document_refs_and_disabled_typing_show_at_once() {
        let (mut refs, _) = scheduler(BlockKind::DocumentRef);
        refs.set_text("a.pdf, b.docx");
        refs.tick();
        assert!(refs.is_complete());

        let clock = Arc::new(ManualClock::new());
        let hint = RenderHint {
            typing_enabled: false,
            ..RenderHint::for_kind(BlockKind::Answer)
        };
        let mut plain = RevealScheduler::new(BlockKind::Answer, hint, RevealConfig::default(), clock);
        plain.set_text("no typing effect");
        plain.tick();
        assert_eq!(plain.displayed(), "no typing effect");
    }

    #[test]
    fn test_tick_after_completion_is_noop() {
        let (mut s, clock) = scheduler(BlockKind::Thinking);
        s.set_text("ok");
        s.tick();
        s.tick();
        assert!(s.is_complete());

        clock.advance_ms(1_000);
        assert!(!s.tick());
        assert!(!s.tick());
        assert_eq!(s.displayed(), "ok");
    }

    #[test]
    fn test_reveal_rate_hint_is_the_floor() {
        let clock = Arc::new(ManualClock::new());
        let hint = RenderHint {
            reveal_rate_chars_per_tick: 4,
            ..RenderHint::for_kind(BlockKind::Answer)
        };
        let mut s = RevealScheduler::new(BlockKind::Answer, hint, RevealConfig::default(), clock);
        s.set_text("abcdefghij");
        s.tick();
        assert_eq!(s.displayed(), "abcd");
    }

    #[test]
    fn test_for_block_loads_text() {
        let clock = Arc::new(ManualClock::new());
        let block = ContentBlock::new("t-0", BlockKind::Raw, "raw text");
        let mut s = RevealScheduler::for_block(&block, RevealConfig::instant(), clock);
        assert_eq!(s.total_len(), 8);
        s.tick();
        assert_eq!(s.displayed(), "raw text");
    }
}
