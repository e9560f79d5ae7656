//! Intent planner: classifies a free-form inbound message as a command, a
//! research query, or small talk, through a strict JSON contract.

use serde::Deserialize;

/// What the router should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Command(String),
    Query(String),
    Chat(String),
}

#[derive(Deserialize)]
struct PlanReply {
    action_type: String,
    #[serde(default)]
    command_text: Option<String>,
    #[serde(default)]
    query_text: Option<String>,
}

pub fn plan_prompt(message: &str, command_prefix: &str) -> String {
    format!(
        "Classify this chat message. Reply with exactly one JSON object and \
         nothing else: {{\"action_type\": \"command\"|\"query\"|\"chat\", \
         \"command_text\": string?, \"query_text\": string?}}.\n\
         Commands start with '{command_prefix}' or clearly ask to manage \
         sessions/history. Queries need research or tools. Everything else \
         is chat.\n\nMessage: {message}"
    )
}

/// Parse the planner reply. `None` on any malformation — the caller falls
/// back to treating the message as a query.
pub fn parse_plan(reply: &str, original: &str) -> Option<Intent> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let plan: PlanReply = serde_json::from_str(&reply[start..=end]).ok()?;

    match plan.action_type.as_str() {
        "command" => Some(Intent::Command(
            plan.command_text.unwrap_or_else(|| original.to_string()),
        )),
        "query" => Some(Intent::Query(
            plan.query_text.unwrap_or_else(|| original.to_string()),
        )),
        "chat" => Some(Intent::Chat(original.to_string())),
        _ => None,
    }
}
