/// Single-line draft for an outgoing message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Composer {
    draft: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Submit is only live when the trimmed draft has content.
    pub fn can_submit(&self) -> bool {
        !self.draft.trim().is_empty()
    }

    /// Take the draft for sending and clear the input. Blank drafts are left
    /// in place and yield nothing.
    pub fn take_submission(&mut self) -> Option<String> {
        if !self.can_submit() {
            return None;
        }
        Some(std::mem::take(&mut self.draft))
    }
}
