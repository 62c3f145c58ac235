//! Rich message payloads for the chat platform
//!
//! Field limits mirror Discord's embed limits. Oversized text is truncated,
//! empty fields and fields past the limit are dropped with a warning.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::SteamId;

pub const MAX_EMBED_FIELDS: usize = 25;
pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_FIELD_NAME_CHARS: usize = 256;
pub const MAX_FIELD_VALUE_CHARS: usize = 1024;
pub const MAX_DESCRIPTION_CHARS: usize = 2048;

/// Embed accent colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Green,
    Orange,
    Red,
}

impl Color {
    pub fn value(&self) -> u32 {
        match self {
            Color::Green => 0x2ECC71,
            Color::Orange => 0xE67E22,
            Color::Red => 0xE74C3C,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: u32,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: &str, color: Color) -> Self {
        Self {
            title: truncate(title, MAX_TITLE_CHARS),
            description: None,
            url: None,
            color: color.value(),
            timestamp: Some(Utc::now()),
            fields: Vec::new(),
        }
    }

    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(truncate(text, MAX_DESCRIPTION_CHARS));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn add_field(&mut self, name: &str, value: &str) {
        self.push_field(name, value, false);
    }

    pub fn add_field_inline(&mut self, name: &str, value: &str) {
        self.push_field(name, value, true);
    }

    /// STEAM / STEAM3 / SID64 triple used on moderation notices
    pub fn add_steam_id_fields(&mut self, steam_id: SteamId) {
        self.add_field_inline("STEAM", &steam_id.steam2());
        self.add_field_inline("STEAM3", &steam_id.steam3());
        self.add_field_inline("SID64", &steam_id.to_string());
    }

    fn push_field(&mut self, name: &str, value: &str, inline: bool) {
        if self.fields.len() >= MAX_EMBED_FIELDS {
            tracing::warn!(max = MAX_EMBED_FIELDS, field = name, "Dropping embed field, already at max count");
            return;
        }
        if name.is_empty() {
            tracing::warn!("Embed field name cannot be empty, dropping field");
            return;
        }
        if value.is_empty() {
            tracing::warn!(field = name, "Embed field value cannot be empty, dropping field");
            return;
        }
        self.fields.push(EmbedField {
            name: truncate(name, MAX_FIELD_NAME_CHARS),
            value: truncate(value, MAX_FIELD_VALUE_CHARS),
            inline,
        });
    }
}

/// Truncate to at most `max` characters
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("ééééé", 2), "éé");
        assert_eq!(truncate("", 2), "");
    }

    #[test]
    fn test_field_limits() {
        let mut embed = Embed::new(&"t".repeat(400), Color::Green);
        assert_eq!(embed.title.chars().count(), MAX_TITLE_CHARS);

        embed.add_field(&"n".repeat(300), &"v".repeat(2000));
        assert_eq!(embed.fields[0].name.len(), MAX_FIELD_NAME_CHARS);
        assert_eq!(embed.fields[0].value.len(), MAX_FIELD_VALUE_CHARS);

        for i in 0..40 {
            embed.add_field_inline("k", &i.to_string());
        }
        assert_eq!(embed.fields.len(), MAX_EMBED_FIELDS);
    }

    #[test]
    fn test_empty_fields_dropped() {
        let mut embed = Embed::new("title", Color::Orange);
        embed.add_field("", "value");
        embed.add_field("name", "");
        assert!(embed.fields.is_empty());
    }

    #[test]
    fn test_steam_id_fields() {
        let mut embed = Embed::new("title", Color::Red);
        embed.add_steam_id_fields(SteamId(76561198017946808));
        let names: Vec<_> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["STEAM", "STEAM3", "SID64"]);
        assert_eq!(embed.fields[2].value, "76561198017946808");
    }
}
