//! Reveal of a whole turn, one block after another.

use crate::block::{BlockKind, RenderHint};
use crate::reveal::{RevealConfig, RevealScheduler};
use crate::turn::ChatTurn;
use serde::Serialize;
use tracing::debug;
use utils::clock::SharedClock;

/// A block as it should currently appear on screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealedBlock {
    /// Block id
    pub id: String,
    /// Block kind
    pub kind: BlockKind,
    /// Displayed prefix of the block text
    pub text: String,
    /// Display hint
    pub hint: RenderHint,
    /// Whether all text received for the block is displayed
    pub complete: bool,
}

#[derive(Debug)]
struct Slot {
    id: String,
    hint: RenderHint,
    scheduler: RevealScheduler,
}

/// Display state of one turn.
///
/// Blocks are revealed strictly in order: a block starts showing only once
/// every block before it is fully displayed. Schedulers are matched to blocks
/// by id and kind, so re-decoding a growing turn continues each block.
#[derive(Debug)]
pub struct TurnReveal {
    turn_id: Option<String>,
    config: RevealConfig,
    clock: SharedClock,
    slots: Vec<Slot>,
    turn_finished: bool,
}

impl TurnReveal {
    /// Create an empty display that paces blocks with `config`.
    pub fn new(config: RevealConfig, clock: SharedClock) -> Self {
        Self {
            turn_id: None,
            config,
            clock,
            slots: Vec::new(),
            turn_finished: false,
        }
    }

    /// Take in the turn's current blocks.
    ///
    /// A different turn id starts over from an empty display.
    pub fn sync(&mut self, turn: &ChatTurn) {
        if self.turn_id.as_deref() != Some(turn.id.as_str()) {
            debug!(turn = %turn.id, "starting reveal of new turn");
            self.turn_id = Some(turn.id.clone());
            self.slots.clear();
        }

        for (index, block) in turn.blocks.iter().enumerate() {
            match self.slots.get_mut(index) {
                Some(slot) if slot.id == block.id && slot.scheduler.kind() == block.kind => {
                    slot.scheduler.set_text(&block.raw_text);
                }
                _ => {
                    let slot = Slot {
                        id: block.id.clone(),
                        hint: block.render_hint,
                        scheduler: RevealScheduler::for_block(block, self.config, self.clock.clone()),
                    };
                    if index < self.slots.len() {
                        self.slots[index] = slot;
                        self.slots.truncate(index + 1);
                    } else {
                        self.slots.push(slot);
                    }
                }
            }
        }
        self.slots.truncate(turn.blocks.len());
        self.turn_finished = turn.is_terminal();
    }

    /// Advance the first block that is not fully displayed.
    /// Returns whether anything new became visible.
    pub fn tick(&mut self) -> bool {
        match self.slots.iter_mut().find(|slot| !slot.scheduler.is_complete()) {
            Some(slot) => slot.scheduler.tick(),
            None => false,
        }
    }

    /// Show everything received so far
    pub fn reveal_all(&mut self) {
        for slot in &mut self.slots {
            slot.scheduler.reveal_all();
        }
    }

    /// Blocks up to and including the one being revealed
    pub fn visible_blocks(&self) -> Vec<RevealedBlock> {
        let mut visible = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let complete = slot.scheduler.is_complete();
            visible.push(RevealedBlock {
                id: slot.id.clone(),
                kind: slot.scheduler.kind(),
                text: slot.scheduler.displayed().to_string(),
                hint: slot.hint,
                complete,
            });
            if !complete {
                break;
            }
        }
        visible
    }

    /// Whether everything received so far is displayed
    pub fn is_caught_up(&self) -> bool {
        self.slots.iter().all(|slot| slot.scheduler.is_complete())
    }

    /// Whether the turn has ended and is fully displayed
    pub fn is_complete(&self) -> bool {
        self.turn_finished && self.is_caught_up()
    }
}
