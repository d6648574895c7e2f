//! Normalization of conversation history after an exchange.
//!
//! Media is sent once.  When an exchange completes, the multi-part user turn that started
//! it is collapsed to its text so later requests carry text history only.

use crate::types::{Role, Turn, TurnContent};

/// Collapse the most recent user turn to its text.  Returns true if anything changed.
pub fn normalize_last_user_turn(history: &mut [Turn]) -> bool {
    let Some(turn) = history.iter_mut().rev().find(|t| t.role == Role::User) else {
        return false;
    };
    if !turn.content.is_parts() {
        return false;
    }
    let text = turn.content.text().unwrap_or_default().to_string();
    turn.content = TurnContent::Text(text);
    true
}

/// Normalize the pending user turn and append the assistant's reply.
///
/// The reply is appended only while the history ends with a user turn, so applying the same
/// completion twice leaves the history as applying it once.
pub fn complete_exchange(history: &mut Vec<Turn>, assistant: Turn) {
    normalize_last_user_turn(history);
    if history.last().is_some_and(|t| t.role == Role::User) {
        history.push(assistant);
    }
}
