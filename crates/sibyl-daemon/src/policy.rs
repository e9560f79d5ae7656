//! Policy gate for remote commands.
//!
//! Always enforced after preset expansion, whatever route produced the final
//! command text — direct input, preset, or planner output.

/// Flags that would route output to the daemon host instead of the sender.
const LOCAL_DELIVERY_FLAGS: &[&str] = &["--deliver", "--email", "--webhook", "--notify", "--open"];
/// Flags that would re-bootstrap or reconfigure the daemon from chat.
const BOOTSTRAP_FLAGS: &[&str] = &["--daemon", "--serve", "--listen", "--config"];

/// `Err(reason)` when the expanded message contains a blocked form.
pub fn check_policy(text: &str) -> Result<(), String> {
    for token in text.split_whitespace() {
        let flag = token.split('=').next().unwrap_or(token);
        if LOCAL_DELIVERY_FLAGS.contains(&flag) {
            return Err(format!(
                "the {flag} flag is not available over the remote interface; \
                 output is always delivered back to this chat"
            ));
        }
        if BOOTSTRAP_FLAGS.contains(&flag) {
            return Err(format!(
                "the {flag} flag cannot be used from a remote session"
            ));
        }
    }

    // Destructive bulk deletion stays local-only.
    let lowered = text.to_lowercase();
    let destructive = [
        "history delete all",
        "session delete all",
        "sessions delete all",
        "memory delete all",
    ];
    for form in destructive {
        if lowered.contains(form) {
            return Err(format!(
                "'{form}' is a destructive bulk deletion and is blocked over \
                 the remote interface; run it from the local CLI"
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_queries_pass() {
        assert!(check_policy("what is the weather like").is_ok());
        assert!(check_policy("!session list").is_ok());
    }

    #[test]
    fn delivery_flags_are_blocked() {
        assert!(check_policy("!ask --deliver inbox something").is_err());
        assert!(check_policy("do it --email=me@x.org").is_err());
    }

    #[test]
    fn bootstrap_flags_are_blocked() {
        let err = check_policy("!restart --daemon").unwrap_err();
        assert!(err.contains("--daemon"));
    }

    #[test]
    fn destructive_bulk_deletes_are_blocked() {
        assert!(check_policy("!history delete all").is_err());
        assert!(check_policy("please run session delete ALL now").is_err());
    }

    #[test]
    fn single_item_delete_is_allowed() {
        assert!(check_policy("!history delete 4").is_ok());
    }

    #[test]
    fn flag_must_match_whole_token() {
        // "--deliverance" is not the delivery flag.
        assert!(check_policy("define --deliverance").is_ok());
    }
}
