//! Notifications raised by the grid.
//!
//! Events are queued rather than delivered through callbacks: a handler
//! that reacted by mutating the grid would otherwise re-enter it in the
//! middle of an operation. The host drains the queue after each call.

use std::collections::VecDeque;

/// Something the host may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEvent {
    /// The current row changed. `index` is its flat index, if it has one.
    CurrentChanged { index: Option<usize> },
    /// The selected set changed. Raised once per batch.
    SelectionChanged { selected: usize },
    /// A layout pass finished.
    LayoutComplete { pass: u64, filled: bool },
}

/// FIFO of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<GridEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: GridEvent) {
        log::trace!("event: {event:?}");
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Takes every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<GridEvent> {
        self.events.drain(..).collect()
    }
}
