use crate::events::{Event, Part};

/// Placeholder written into calls whose provenance signature went missing.
pub const PLACEHOLDER_SIGNATURE: &str = "context_engineering_is_the_way_to_go";

/// Backfills missing thought signatures on recorded function calls.
///
/// Some backends reject a history replay when a function call lacks its
/// signature, which leaves the agent stuck with a final but empty response.
/// Patching the log in place lets the next round proceed.
#[derive(Clone, Debug)]
pub struct SignaturePatch {
    placeholder: String,
}

impl Default for SignaturePatch {
    fn default() -> Self {
        Self::new(PLACEHOLDER_SIGNATURE)
    }
}

impl SignaturePatch {
    #[must_use]
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
        }
    }

    /// Patch every unsigned call authored by `author`; returns how many were
    /// patched.
    pub fn apply(&self, events: &mut [Event], author: &str) -> usize {
        let mut patched = 0;
        for event in events.iter_mut().filter(|event| event.author == author) {
            for part in &mut event.content {
                if let Part::FunctionCall(call) = part {
                    if !call.has_signature() {
                        call.thought_signature = Some(self.placeholder.clone());
                        patched += 1;
                    }
                }
            }
        }
        patched
    }
}
