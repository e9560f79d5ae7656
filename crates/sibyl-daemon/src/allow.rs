//! Sender allowlist. Deny-by-default: an empty list admits no one.
//!
//! Entries come in two shapes:
//! - bare identity (`alice@example.org`) — matches the identity itself and
//!   any sub-resource (`alice@example.org/phone`);
//! - fully-qualified (`alice@example.org/laptop`) — exact match only.

/// Returns whether this sender may reach the router. Unmatched senders are
/// dropped silently by the caller.
pub fn is_sender_allowed(allowed: &[String], sender: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }

    let bare_sender = sender.split('/').next().unwrap_or(sender);
    allowed.iter().any(|entry| {
        if entry.contains('/') {
            entry == sender
        } else {
            entry == bare_sender
        }
    })
}
