//! Fallback typing simulator.
//!
//! Turns one complete reply into the same delta sequence a live stream would
//! produce. The reply is split on whitespace and re-joined with single spaces,
//! so runs of spaces and newlines collapse; that loss is accepted for a
//! visual typing effect.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BASE_DELAY_MS: u64 = 100;
const LONG_TOKEN_DELAY_MS: u64 = 150;
const SHORT_TOKEN_DELAY_MS: u64 = 80;
const SENTENCE_END_DELAY_MS: u64 = 300;
const CLAUSE_END_DELAY_MS: u64 = 200;

const SENTENCE_END: &[char] = &['.', '!', '?', '。', '！', '？'];
const CLAUSE_END: &[char] = &[',', ';', '，', '；'];

/// Item produced by a typing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingStep {
    /// Text to append, including its leading separator.
    Delta(String),
    Done,
}

/// Split `response` into the deltas the simulator emits: the first token
/// bare, every later token prefixed with one space.
#[must_use]
pub fn deltas(response: &str) -> Vec<String> {
    response
        .split_whitespace()
        .enumerate()
        .map(|(i, token)| if i == 0 { token.to_owned() } else { format!(" {token}") })
        .collect()
}

/// Pause after emitting `token`.
#[must_use]
pub fn token_delay(token: &str) -> Duration {
    let token = token.trim();
    if token.ends_with(SENTENCE_END) {
        return Duration::from_millis(SENTENCE_END_DELAY_MS);
    }
    if token.ends_with(CLAUSE_END) {
        return Duration::from_millis(CLAUSE_END_DELAY_MS);
    }
    let len = token.chars().count();
    let ms = if len > 5 {
        LONG_TOKEN_DELAY_MS
    } else if len < 3 {
        SHORT_TOKEN_DELAY_MS
    } else {
        BASE_DELAY_MS
    };
    Duration::from_millis(ms)
}

/// Emit `response` as timed deltas into `tx`, then [`TypingStep::Done`].
///
/// Each step is tagged with `message_id`. Stops early if the receiver is
/// gone. Abort the returned handle to cancel the run.
pub fn spawn<T, F>(
    message_id: String,
    response: String,
    tx: mpsc::UnboundedSender<T>,
    wrap: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(String, TypingStep) -> T + Send + 'static,
{
    tokio::spawn(async move {
        let parts = deltas(&response);
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.into_iter().enumerate() {
            let pause = token_delay(&part);
            if tx.send(wrap(message_id.clone(), TypingStep::Delta(part))).is_err() {
                return;
            }
            if i < last {
                tokio::time::sleep(pause).await;
            }
        }
        let _ = tx.send(wrap(message_id, TypingStep::Done));
    })
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
