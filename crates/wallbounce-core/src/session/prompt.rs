//! Contextual prompt construction for multi-turn sessions.
//!
//! The concatenation format is stable: it is part of the behavioral
//! contract and tests observe it.

use super::Session;

/// Default number of most-recent turns included in the context.
pub const DEFAULT_CONTEXT_WINDOW: usize = 4;

/// Build the contextual prompt from the last `window` turns.
///
/// Returns `None` for a session with no turns. The format is:
///
/// ```text
/// Conversation context (last N turns):
/// [turn 3] user: <query>
/// [turn 3] consensus: <winning content>
/// ```
pub fn context_prompt(session: &Session, window: usize) -> Option<String> {
    if session.turns.is_empty() || window == 0 {
        return None;
    }

    let start = session.turns.len().saturating_sub(window);
    let recent = &session.turns[start..];

    let mut lines = Vec::with_capacity(recent.len() * 2 + 1);
    lines.push(format!("Conversation context (last {} turns):", recent.len()));
    for turn in recent {
        lines.push(format!("[turn {}] user: {}", turn.turn_index, turn.query));
        lines.push(format!(
            "[turn {}] consensus: {}",
            turn.turn_index, turn.content
        ));
    }
    Some(lines.join("\n"))
}
