// 🪪 Name Tables - Nicknames, titles and suffixes as injected data
// Parsing a full name into parts and folding informal names to canonical ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::NameParts;

// ============================================================================
// ALIAS TABLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasTable {
    /// Informal name → canonical name ("mike" → "michael")
    #[serde(default = "default_nicknames")]
    pub nicknames: BTreeMap<String, String>,

    /// Honorifics stripped from names (compared without dots)
    #[serde(default = "default_titles")]
    pub titles: Vec<String>,

    /// Suffix variation → canonical suffix ("junior" → "jr")
    #[serde(default = "default_suffixes")]
    pub suffixes: BTreeMap<String, String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        AliasTable {
            nicknames: default_nicknames(),
            titles: default_titles(),
            suffixes: default_suffixes(),
        }
    }
}

fn clean_token(token: &str) -> String {
    token
        .trim()
        .chars()
        .filter(|c| *c != '.' && *c != ',')
        .collect::<String>()
        .to_lowercase()
}

impl AliasTable {
    /// Canonical form of a single lowercase token, or the token itself
    pub fn canonical_token<'a>(&'a self, token: &'a str) -> &'a str {
        self.nicknames.get(token).map(String::as_str).unwrap_or(token)
    }

    /// Replace every nickname token of an already-normalized name.
    pub fn canonical_name(&self, normalized: &str) -> String {
        normalized
            .split_whitespace()
            .map(|t| self.canonical_token(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Canonical suffix ("Jr." → "jr", "III" → "3"); None when blank.
    pub fn canonical_suffix(&self, raw: &str) -> Option<String> {
        let clean = clean_token(raw);
        if clean.is_empty() {
            return None;
        }
        Some(self.suffixes.get(&clean).cloned().unwrap_or(clean))
    }

    pub fn is_suffix(&self, token: &str) -> bool {
        let clean = clean_token(token);
        !clean.is_empty()
            && (self.suffixes.contains_key(&clean) || self.suffixes.values().any(|v| *v == clean))
    }

    pub fn is_title(&self, token: &str) -> bool {
        let clean = clean_token(token);
        !clean.is_empty() && self.titles.iter().any(|t| clean_token(t) == clean)
    }

    /// Split a leading (or trailing) title off a name: (rest, title).
    pub fn remove_title(&self, name: &str) -> (String, String) {
        let words: Vec<&str> = name.split_whitespace().collect();
        if words.is_empty() {
            return (String::new(), String::new());
        }

        if self.is_title(words[0]) {
            return (words[1..].join(" "), words[0].to_string());
        }

        // "Smith, Dr."
        if words.len() > 1 && self.is_title(words[words.len() - 1]) {
            return (
                words[..words.len() - 1].join(" "),
                words[words.len() - 1].to_string(),
            );
        }

        (words.join(" "), String::new())
    }

    /// Parse a full name into title / first / middle / last / suffix.
    pub fn parse_name(&self, full_name: &str) -> NameParts {
        let (rest, title) = self.remove_title(full_name);
        let parts: Vec<&str> = rest.split_whitespace().collect();

        let mut parsed = NameParts {
            title,
            ..NameParts::default()
        };

        match parts.len() {
            0 => {}
            1 => parsed.first = parts[0].to_string(),
            2 => {
                parsed.first = parts[0].to_string();
                parsed.last = parts[1].to_string();
            }
            3 => {
                parsed.first = parts[0].to_string();
                if self.is_suffix(parts[2]) {
                    parsed.last = parts[1].to_string();
                    parsed.suffix = parts[2].to_string();
                } else {
                    parsed.middle = parts[1].to_string();
                    parsed.last = parts[2].to_string();
                }
            }
            n => {
                parsed.first = parts[0].to_string();
                if self.is_suffix(parts[n - 1]) {
                    parsed.middle = parts[1..n - 2].join(" ");
                    parsed.last = parts[n - 2].to_string();
                    parsed.suffix = parts[n - 1].to_string();
                } else {
                    parsed.middle = parts[1..n - 1].join(" ");
                    parsed.last = parts[n - 1].to_string();
                }
            }
        }

        parsed
    }
}

// ============================================================================
// DEFAULT TABLES
// ============================================================================

fn default_nicknames() -> BTreeMap<String, String> {
    const PAIRS: &[(&str, &str)] = &[
        ("tom", "thomas"),
        ("tommy", "thomas"),
        ("bill", "william"),
        ("billy", "william"),
        ("will", "william"),
        ("mike", "michael"),
        ("mikey", "michael"),
        ("tina", "christina"),
        ("chris", "christina"),
        ("christi", "christina"),
        ("bob", "robert"),
        ("bobby", "robert"),
        ("rob", "robert"),
        ("robby", "robert"),
        ("dick", "richard"),
        ("rick", "richard"),
        ("ricky", "richard"),
        ("rich", "richard"),
        ("jim", "james"),
        ("jimmy", "james"),
        ("jamie", "james"),
        ("dan", "daniel"),
        ("danny", "daniel"),
        ("dave", "david"),
        ("davey", "david"),
        ("joe", "joseph"),
        ("joey", "joseph"),
        ("beth", "elizabeth"),
        ("liz", "elizabeth"),
        ("lizzy", "elizabeth"),
        ("betty", "elizabeth"),
        ("jen", "jennifer"),
        ("jenny", "jennifer"),
        ("jenn", "jennifer"),
        ("matt", "matthew"),
        ("matty", "matthew"),
        ("andy", "andrew"),
        ("drew", "andrew"),
        ("tony", "anthony"),
        ("sue", "susan"),
        ("susie", "susan"),
        ("suzy", "susan"),
    ];
    PAIRS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_titles() -> Vec<String> {
    [
        "dr", "doctor", "mr", "mister", "mrs", "missus", "ms", "miss", "prof", "professor", "rev",
        "reverend", "hon", "honorable", "capt", "captain", "lt", "lieutenant", "sgt", "sergeant",
        "col", "colonel", "gen", "general",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_suffixes() -> BTreeMap<String, String> {
    const PAIRS: &[(&str, &str)] = &[
        ("junior", "jr"),
        ("jr", "jr"),
        ("senior", "sr"),
        ("sr", "sr"),
        ("ii", "2"),
        ("2nd", "2"),
        ("second", "2"),
        ("iii", "3"),
        ("3rd", "3"),
        ("third", "3"),
        ("iv", "4"),
        ("4th", "4"),
        ("fourth", "4"),
        ("v", "5"),
        ("5th", "5"),
        ("fifth", "5"),
        ("esq", "esq"),
        ("esquire", "esq"),
        ("md", "md"),
        ("phd", "phd"),
        ("do", "do"),
        ("dds", "dds"),
        ("jd", "jd"),
    ];
    PAIRS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_folds_nicknames() {
        let aliases = AliasTable::default();
        assert_eq!(aliases.canonical_name("mike robertson"), "michael robertson");
        assert_eq!(aliases.canonical_name("michael robertson"), "michael robertson");
        assert_eq!(aliases.canonical_name("bob  smith"), "robert smith");
    }

    #[test]
    fn test_suffix_variations() {
        let aliases = AliasTable::default();
        assert_eq!(aliases.canonical_suffix("Jr."), Some("jr".to_string()));
        assert_eq!(aliases.canonical_suffix("junior"), Some("jr".to_string()));
        assert_eq!(aliases.canonical_suffix("III"), Some("3".to_string()));
        assert_eq!(aliases.canonical_suffix("Esquire"), Some("esq".to_string()));
        assert_eq!(aliases.canonical_suffix(""), None);
    }

    #[test]
    fn test_remove_title_leading_and_trailing() {
        let aliases = AliasTable::default();
        assert_eq!(
            aliases.remove_title("Dr. Jane Doe"),
            ("Jane Doe".to_string(), "Dr.".to_string())
        );
        assert_eq!(
            aliases.remove_title("Doe, Dr."),
            ("Doe,".to_string(), "Dr.".to_string())
        );
        assert_eq!(
            aliases.remove_title("Jane Doe"),
            ("Jane Doe".to_string(), String::new())
        );
    }

    #[test]
    fn test_parse_three_tokens() {
        let aliases = AliasTable::default();

        let with_suffix = aliases.parse_name("John Smith Jr");
        assert_eq!(with_suffix.first, "John");
        assert_eq!(with_suffix.last, "Smith");
        assert_eq!(with_suffix.suffix, "Jr");
        assert!(with_suffix.middle.is_empty());

        let with_middle = aliases.parse_name("John Paul Jones");
        assert_eq!(with_middle.middle, "Paul");
        assert_eq!(with_middle.last, "Jones");
        assert!(with_middle.suffix.is_empty());
    }

    #[test]
    fn test_parse_long_names() {
        let aliases = AliasTable::default();

        let parsed = aliases.parse_name("Mary Ann Lee Smith III");
        assert_eq!(parsed.first, "Mary");
        assert_eq!(parsed.middle, "Ann Lee");
        assert_eq!(parsed.last, "Smith");
        assert_eq!(parsed.suffix, "III");

        let parsed = aliases.parse_name("Mary Ann Lee Smith");
        assert_eq!(parsed.middle, "Ann Lee");
        assert_eq!(parsed.last, "Smith");
    }

    #[test]
    fn test_parse_single_and_empty() {
        let aliases = AliasTable::default();
        assert_eq!(aliases.parse_name("Cher").first, "Cher");
        assert!(aliases.parse_name("   ").is_empty());
    }
}
