use crate::codec::LINE_DELIMITER;

/// Joins notification chunks back into delimiter-terminated frames.
///
/// Frames may span any number of chunks. The incomplete tail is kept until a
/// later chunk completes it.
#[derive(Debug, Default, Clone)]
pub struct FrameReassembler {
    pending: String,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one decoded chunk and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        if !self.pending.contains(LINE_DELIMITER) {
            return Vec::new();
        }

        let buffer = std::mem::take(&mut self.pending);
        let mut frames: Vec<String> = buffer.split(LINE_DELIMITER).map(str::to_string).collect();
        if !buffer.ends_with(LINE_DELIMITER) {
            if let Some(tail) = frames.pop() {
                self.pending = tail;
            }
        }
        frames.retain(|frame| !frame.is_empty());

        tracing::trace!(frames = frames.len(), pending = self.pending.len(), "reassembled");
        frames
    }

    /// Text received since the last complete frame.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
