//! Permission filter: decides whether a chat message is read aloud.

use serde::Serialize;

use chatvoz_core::settings::RuleConfig;
use chatvoz_core::types::ChatMessage;

/// The rule that turned a message away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    OwnMessage,
    IgnoredUser,
    Moderator,
    Vip,
    Broadcaster,
    NotSubscriber,
    EmptyText,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OwnMessage => "own message",
            Self::IgnoredUser => "ignored user",
            Self::Moderator => "moderators ignored",
            Self::Vip => "VIPs ignored",
            Self::Broadcaster => "broadcaster ignored",
            Self::NotSubscriber => "subscribers only",
            Self::EmptyText => "empty text",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Run the rules in order; the first one that rejects wins.
pub fn evaluate(message: &ChatMessage, rules: &RuleConfig) -> Verdict {
    let sender = &message.sender;

    if message.is_self {
        return Verdict::Reject(RejectReason::OwnMessage);
    }
    if rules
        .ignored_users
        .contains(&sender.username.to_lowercase())
    {
        return Verdict::Reject(RejectReason::IgnoredUser);
    }
    if rules.ignore_mods && sender.is_mod {
        return Verdict::Reject(RejectReason::Moderator);
    }
    if rules.ignore_vips && sender.is_vip {
        return Verdict::Reject(RejectReason::Vip);
    }
    if rules.ignore_broadcaster && sender.is_broadcaster {
        return Verdict::Reject(RejectReason::Broadcaster);
    }
    if rules.subscribers_only && !sender.has_supporter_role() {
        return Verdict::Reject(RejectReason::NotSubscriber);
    }
    if message.text.trim().is_empty() {
        return Verdict::Reject(RejectReason::EmptyText);
    }
    Verdict::Admit
}

pub fn admit(message: &ChatMessage, rules: &RuleConfig) -> bool {
    evaluate(message, rules).is_admitted()
}
