//! Plain-terminal rendering of progress views and revealed answers.

use chat_stream::{BlockKind, RevealedBlock};
use realtime::{ConnectionState, TaskProgressView};

const BAR_WIDTH: usize = 20;

/// One status line for a task
pub fn progress_line(view: &TaskProgressView) -> String {
    let filled = usize::from(view.overall_progress) * BAR_WIDTH / 100;
    let bar = format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled));

    let mut line = format!("[{}] {:>3}%  {}", bar, view.overall_progress, view.status);
    if let Some(name) = &view.current_step_name {
        line.push_str(&format!(
            "  step {}/{}: {}",
            view.current_step_index + 1,
            view.steps.len(),
            name
        ));
    }
    if let Some(error) = &view.error_message {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

/// Note printed when the push channel changes state
pub fn connection_line(state: ConnectionState) -> Option<String> {
    match state {
        ConnectionState::Connected => Some("live updates connected".to_string()),
        ConnectionState::Reconnecting => Some("live updates lost, reconnecting".to_string()),
        ConnectionState::Failed => {
            Some("live updates unavailable, falling back to polling".to_string())
        }
        ConnectionState::Connecting | ConnectionState::Disconnected => None,
    }
}

fn heading(kind: BlockKind) -> Option<&'static str> {
    match kind {
        BlockKind::Thinking => Some("thinking"),
        BlockKind::Analyzing => Some("analysis"),
        BlockKind::Answer => Some("answer"),
        BlockKind::Response => Some("response"),
        BlockKind::DocumentRef => Some("references"),
        BlockKind::Raw => None,
    }
}

/// Turns successive [`RevealedBlock`] lists into append-only terminal output.
#[derive(Debug, Default)]
pub struct AnswerPrinter {
    hide_collapsed: bool,
    printed: Vec<(String, usize)>,
}

impl AnswerPrinter {
    /// Printer that skips collapsed blocks when `hide_collapsed` is set.
    pub fn new(hide_collapsed: bool) -> Self {
        Self {
            hide_collapsed,
            printed: Vec::new(),
        }
    }

    /// Text to append so the terminal shows `blocks`.
    ///
    /// A block whose display restarted is printed again from the beginning.
    pub fn render(&mut self, blocks: &[RevealedBlock]) -> String {
        let mut out = String::new();

        for block in blocks {
            if self.hide_collapsed && block.hint.collapsed_by_default {
                continue;
            }

            let position = self.printed.iter().position(|(id, _)| *id == block.id);
            let shown = block.text.chars().count();
            let already = match position {
                Some(i) if self.printed[i].1 <= shown => self.printed[i].1,
                _ => {
                    if !self.printed.is_empty() || position.is_some() {
                        out.push('\n');
                    }
                    if let Some(title) = heading(block.kind) {
                        out.push_str(&format!("── {} ──\n", title));
                    }
                    0
                }
            };

            out.extend(block.text.chars().skip(already));
            match position {
                Some(i) => self.printed[i].1 = shown,
                None => self.printed.push((block.id.clone(), shown)),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_stream::RenderHint;
    use realtime::{StepRecord, StepStatus, TaskSnapshot, TaskStatus};

    fn block(id: &str, kind: BlockKind, text: &str) -> RevealedBlock {
        RevealedBlock {
            id: id.to_string(),
            kind,
            text: text.to_string(),
            hint: RenderHint::for_kind(kind),
            complete: true,
        }
    }

    #[test]
    fn test_progress_line() {
        let snapshot = TaskSnapshot::new("t1", TaskStatus::Running).with_steps(vec![
            StepRecord::new("上传", 0, StepStatus::Completed, 100),
            StepRecord::new("解析", 1, StepStatus::Running, 40),
            StepRecord::new("索引", 2, StepStatus::Pending, 0),
        ]);
        let line = progress_line(&TaskProgressView::from_snapshot(&snapshot));

        assert!(line.starts_with("[#########...........]  47%"));
        assert!(line.ends_with("step 2/3: 解析"));
    }

    #[test]
    fn test_progress_line_shows_error() {
        let snapshot = TaskSnapshot::new("t1", TaskStatus::Failed).with_steps(vec![
            StepRecord::new("解析", 0, StepStatus::Failed, 10).with_error("bad pdf"),
        ]);
        let line = progress_line(&TaskProgressView::from_snapshot(&snapshot));
        assert!(line.contains("error: bad pdf"));
    }

    #[test]
    fn test_printer_appends_only_new_text() {
        let mut printer = AnswerPrinter::new(false);
        assert_eq!(
            printer.render(&[block("t-0", BlockKind::Answer, "He")]),
            "── answer ──\nHe"
        );
        assert_eq!(printer.render(&[block("t-0", BlockKind::Answer, "Hello")]), "llo");
        assert_eq!(
            printer.render(&[
                block("t-0", BlockKind::Answer, "Hello"),
                block("t-1", BlockKind::Raw, "x")
            ]),
            "\nx"
        );
    }

    #[test]
    fn test_printer_reprints_restarted_block() {
        let mut printer = AnswerPrinter::new(false);
        printer.render(&[block("t-0", BlockKind::Raw, "abc")]);
        assert_eq!(printer.render(&[block("t-0", BlockKind::Raw, "")]), "\n");
        assert_eq!(printer.render(&[block("t-0", BlockKind::Raw, "x")]), "x");
    }

    #[test]
    fn test_printer_can_hide_thinking() {
        let mut printer = AnswerPrinter::new(true);
        let out = printer.render(&[
            block("t-0", BlockKind::Thinking, "hmm"),
            block("t-1", BlockKind::Answer, "42"),
        ]);
        assert_eq!(out, "── answer ──\n42");
    }

    #[test]
    fn test_connection_lines() {
        assert!(connection_line(ConnectionState::Failed).is_some());
        assert!(connection_line(ConnectionState::Connecting).is_none());
    }
}
