//! Local agreement between successive hypotheses of a growing audio window.
//!
//! A word is committed once two consecutive decodes agree on it (and on every
//! word before it). Committed audio is trimmed from the window so the next
//! decode only sees the tentative tail plus new audio.

use super::types::{RecognizedWord, TranscriptUpdate};

#[derive(Debug, Default)]
pub(crate) struct LocalAgreement {
    committed: String,
    /// Uncommitted part of the previous hypothesis, timed against the current window.
    previous: Vec<RecognizedWord>,
}

/// Result of feeding one hypothesis.
#[derive(Debug)]
pub(crate) struct Agreement {
    pub update: TranscriptUpdate,
    /// Seconds to cut from the front of the window.
    pub trim_secs: f32,
}

impl LocalAgreement {
    /// Feeds the hypothesis for the current window. With `force` every word
    /// is committed and the whole window (`window_secs`) is released.
    pub(crate) fn apply(
        &mut self,
        hypothesis: Vec<RecognizedWord>,
        window_secs: f32,
        force: bool,
    ) -> Agreement {
        let hypothesis: Vec<RecognizedWord> = hypothesis
            .into_iter()
            .filter(|word| is_speech(&word.text))
            .collect();

        let agreed = if force {
            hypothesis.len()
        } else {
            common_prefix(&self.previous, &hypothesis)
        };

        let before = self.committed.len();
        for word in &hypothesis[..agreed] {
            append_word(&mut self.committed, &word.text);
        }
        let newly_committed = self.committed[before..].to_string();

        let trim_secs = if force {
            window_secs
        } else if agreed > 0 {
            hypothesis[agreed - 1].end.max(0.0)
        } else {
            0.0
        };

        self.previous = hypothesis[agreed..]
            .iter()
            .map(|word| RecognizedWord {
                text: word.text.clone(),
                start: (word.start - trim_secs).max(0.0),
                end: (word.end - trim_secs).max(0.0),
            })
            .collect();

        let mut non_committed = String::new();
        for word in &self.previous {
            append_word(&mut non_committed, &word.text);
        }
        if !self.committed.is_empty() && !non_committed.is_empty() {
            non_committed.insert(0, ' ');
        }

        Agreement {
            update: TranscriptUpdate {
                committed: self.committed.clone(),
                non_committed,
                newly_committed,
            },
            trim_secs,
        }
    }
}

fn common_prefix(previous: &[RecognizedWord], current: &[RecognizedWord]) -> usize {
    previous
        .iter()
        .zip(current)
        .take_while(|(a, b)| normalize(&a.text) == normalize(&b.text))
        .count()
}

fn normalize(word: &str) -> String {
    word.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}

fn append_word(text: &mut String, word: &str) {
    let word = word.trim();
    if word.is_empty() {
        return;
    }
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(word);
}

/// Drops whisper annotations such as `[BLANK_AUDIO]` or `(music)`.
fn is_speech(word: &str) -> bool {
    let word = word.trim();
    if word.is_empty() {
        return false;
    }
    let bracketed = (word.starts_with('[') && word.ends_with(']'))
        || (word.starts_with('(') && word.ends_with(')'));
    !bracketed
}
