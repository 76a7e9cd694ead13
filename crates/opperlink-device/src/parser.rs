//! Weight parsing strategies and stability windowing.

use std::collections::VecDeque;
use std::fmt;

use opperlink_frame::AttributeCommand;

/// Turns raw weight commands into numeric weights.
///
/// A strategy can be swapped at runtime with
/// [`CommandStream::set_parser`](crate::CommandStream::set_parser); the
/// swap applies from the next weight frame on.
pub trait WeightParser: Send + Sync + fmt::Debug {
    /// Identifier of the strategy.
    fn id(&self) -> &str;

    /// Weight in grams carried by a weight command.
    fn weight(&self, command: &AttributeCommand) -> Option<f64>;
}

/// Reads the first weight token as a decimal number of grams.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWeightParser;

impl WeightParser for DefaultWeightParser {
    fn id(&self) -> &str {
        "default"
    }

    fn weight(&self, command: &AttributeCommand) -> Option<f64> {
        command.number(0)
    }
}

/// Stability token of a weight reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Unstable,
    Stable,
    Overload,
}

impl Stability {
    /// Stability carried by a weight command (third token).
    pub fn of(command: &AttributeCommand) -> Option<Self> {
        match command.token(2)? {
            "0" => Some(Self::Unstable),
            "1" => Some(Self::Stable),
            "2" => Some(Self::Overload),
            _ => None,
        }
    }
}

/// Sliding window over the last `size` weight readings.
///
/// The window reports a match once it is full and every member carries the
/// target stability. It slides by one reading at a time.
#[derive(Debug, Clone)]
pub struct StabilityWindow {
    size: usize,
    target: Stability,
    window: VecDeque<Option<Stability>>,
}

impl StabilityWindow {
    /// A window of `size` readings (at least one).
    pub fn new(size: usize, target: Stability) -> Self {
        let size = size.max(1);
        Self {
            size,
            target,
            window: VecDeque::with_capacity(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forget every recorded reading.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Record one weight command; returns true when the window matches.
    pub fn push(&mut self, command: &AttributeCommand) -> bool {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(Stability::of(command));
        self.window.len() == self.size
            && self
                .window
                .iter()
                .all(|stability| *stability == Some(self.target))
    }
}
