//! Minimal IRCv3 line parsing for Twitch chat.

use std::collections::HashMap;

/// One parsed IRC line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl IrcMessage {
    /// Parse a single line (without the trailing CRLF). Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']).trim_start();
        if rest.is_empty() {
            return None;
        }

        let mut msg = Self::default();

        // 1) tags
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped.split_once(' ').unwrap_or((stripped, ""));
            msg.tags = parse_tags(raw_tags);
            rest = after.trim_start();
        }

        // 2) prefix
        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped.split_once(' ').unwrap_or((stripped, ""));
            msg.prefix = Some(prefix.to_string());
            rest = after.trim_start();
        }

        // 3) command
        let (command, after) = rest.split_once(' ').unwrap_or((rest, ""));
        msg.command = command.to_ascii_uppercase();
        rest = after;

        // 4) params + trailing
        let (middle, trailing) = match rest.strip_prefix(':') {
            Some(t) => ("", Some(t)),
            None => match rest.split_once(" :") {
                Some((m, t)) => (m, Some(t)),
                None => (rest, None),
            },
        };
        msg.params = middle.split_whitespace().map(str::to_string).collect();
        msg.trailing = trailing.map(str::to_string);

        if msg.command.is_empty() {
            return None;
        }
        Some(msg)
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        match prefix.split_once('!') {
            Some((nick, _)) => Some(nick),
            None if !prefix.contains('.') => Some(prefix),
            None => None,
        }
    }

    /// First parameter with any leading `#` removed.
    pub fn channel(&self) -> Option<&str> {
        self.params.first().map(|c| c.trim_start_matches('#'))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            let (key, value) = kv.split_once('=').unwrap_or((kv, ""));
            (key.to_string(), unescape_tag_value(value))
        })
        .collect()
}

/// Undo IRCv3 tag-value escaping (`\s` space, `\:` semicolon, `\\`, `\r`, `\n`).
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(':') => out.push(';'),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Strip the CTCP ACTION wrapper from `/me` messages.
pub fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .map(|t| t.strip_suffix('\u{1}').unwrap_or(t))
        .unwrap_or(text)
}
