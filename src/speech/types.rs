use serde::{Deserialize, Serialize};

/// One decoded word with times in seconds from the start of the decoded window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub start: f32,
    pub end: f32,
}

/// Transcript state after one incremental decode.
///
/// `committed` only ever grows within a session; `non_committed` is the
/// tentative tail and is replaced on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    pub committed: String,
    pub non_committed: String,
    /// Text appended to `committed` by this update.
    pub newly_committed: String,
}

impl TranscriptUpdate {
    /// What a dictation field shows.
    pub fn text(&self) -> String {
        format!("{}{}", self.committed, self.non_committed)
    }
}
