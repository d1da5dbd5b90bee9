use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Language + script pair understood by the translation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageTag {
    /// Russian, Cyrillic script
    #[serde(rename = "rus_Cyrl")]
    RusCyrl,
    /// Lezghian, Cyrillic script
    #[serde(rename = "lez_Cyrl")]
    LezCyrl,
}

/// Returned when a string is not one of the known language tags
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown language tag: {0}")]
pub struct UnknownLanguageTag(pub String);

impl LanguageTag {
    /// Every tag offered to the user, in display order
    pub const ALL: [Self; 2] = [Self::RusCyrl, Self::LezCyrl];

    /// Wire form passed to the pipeline (`src_lang` / `tgt_lang`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RusCyrl => "rus_Cyrl",
            Self::LezCyrl => "lez_Cyrl",
        }
    }

    /// Human-readable language name
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::RusCyrl => "Русский",
            Self::LezCyrl => "Лезгинский",
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageTag {
    type Err = UnknownLanguageTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| UnknownLanguageTag(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tags() {
        assert_eq!("rus_Cyrl".parse::<LanguageTag>(), Ok(LanguageTag::RusCyrl));
        assert_eq!("lez_Cyrl".parse::<LanguageTag>(), Ok(LanguageTag::LezCyrl));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        let result = "RUS_CYRL".parse::<LanguageTag>();
        assert_eq!(result, Err(UnknownLanguageTag("RUS_CYRL".to_owned())));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&LanguageTag::LezCyrl).unwrap();
        assert_eq!(json, "\"lez_Cyrl\"");

        let tag: LanguageTag = serde_json::from_str("\"rus_Cyrl\"").unwrap();
        assert_eq!(tag, LanguageTag::RusCyrl);
    }

    #[test]
    fn test_display_matches_wire_form() {
        for tag in LanguageTag::ALL {
            assert_eq!(tag.to_string(), tag.as_str());
        }
    }
}
