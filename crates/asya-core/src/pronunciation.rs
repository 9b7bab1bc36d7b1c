//! Pronunciation dictionary applied to bot replies before speech synthesis.
//!
//! Product codes and abbreviations (`ШБТ-50`, `ОБМ`) are replaced by their spoken form.
//! Longer terms are replaced first so `ШБТ-50` wins over `ШБТ`.
//!
//! File format (TOML):
//!
//! ```toml
//! [terms]
//! "ШБТ" = "Шнур базальтовый теплоизоляционный"
//! "ШБТ-50" = "Шнур базальтовый теплоизоляционный пятьдесят"
//! ```

use crate::error::CoreResult;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    #[serde(default)]
    terms: HashMap<String, String>,
}

/// Term → spoken form, ordered longest term first.
#[derive(Debug, Clone, Default)]
pub struct PronunciationDictionary {
    terms: Vec<(String, String)>,
}

impl PronunciationDictionary {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut terms: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        terms.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(&b.0)));
        Self { terms }
    }

    pub fn parse(toml_text: &str) -> CoreResult<Self> {
        let file: DictionaryFile = toml::from_str(toml_text)?;
        Ok(Self::from_pairs(file.terms))
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Replace dictionary terms and collapse whitespace.
    pub fn prepare_for_tts(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (term, spoken) in &self.terms {
            if out.contains(term.as_str()) {
                out = out.replace(term.as_str(), spoken);
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
