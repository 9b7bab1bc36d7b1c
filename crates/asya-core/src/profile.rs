//! **Call profile**: structured facts about the caller, extracted during the dialog.
//!
//! The profile only stores a fixed set of fields. The LLM reports updates through its
//! `system_info` line (`Поле 'Имя клиента' обновлено: Иван`); [`parse_directive`] turns that
//! line into a [`DirectiveParse`] against the allow-list in [`ProfileField`].

use crate::error::{CoreError, CoreResult};
use crate::phone::normalize_phone;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const FIELD_OPEN: &str = "Поле '";
const FIELD_CLOSE: &str = "' обновлено:";

/// Fields the profile accepts. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    Phone,
    City,
    Inn,
    Organization,
    Department,
    Request,
    Comment,
}

impl ProfileField {
    pub const ALL: [ProfileField; 8] = [
        ProfileField::Name,
        ProfileField::Phone,
        ProfileField::City,
        ProfileField::Inn,
        ProfileField::Organization,
        ProfileField::Department,
        ProfileField::Request,
        ProfileField::Comment,
    ];

    /// Machine key used in config, storage and logs.
    pub fn key(&self) -> &'static str {
        match self {
            ProfileField::Name => "name",
            ProfileField::Phone => "phone",
            ProfileField::City => "city",
            ProfileField::Inn => "inn",
            ProfileField::Organization => "organization",
            ProfileField::Department => "department",
            ProfileField::Request => "request",
            ProfileField::Comment => "comment",
        }
    }

    /// Label the dialog prompt uses for this field in `system_info`.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Name => "Имя клиента",
            ProfileField::Phone => "Телефон",
            ProfileField::City => "Город",
            ProfileField::Inn => "ИНН",
            ProfileField::Organization => "Организация",
            ProfileField::Department => "Отдел",
            ProfileField::Request => "Потребность клиента",
            ProfileField::Comment => "Комментарии",
        }
    }

    /// Resolve a prompt label (exact) or a machine key (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.label() == label || f.key().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ProfileField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| CoreError::UnknownProfileField(s.to_string()))
    }
}

/// Result of parsing one `system_info` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveParse {
    /// Nothing to apply (empty line).
    Empty,
    /// A recognized field with its new value.
    Update { field: ProfileField, value: String },
    /// Well-formed directive naming a field outside the allow-list.
    UnrecognizedField(String),
    /// Text that is not a field-update directive at all.
    Malformed(String),
}

/// Parse a single directive line. Pure: no profile access, no logging.
pub fn parse_directive(line: &str) -> DirectiveParse {
    let line = line.trim();
    if line.is_empty() {
        return DirectiveParse::Empty;
    }
    let Some(start) = line.find(FIELD_OPEN) else {
        return DirectiveParse::Malformed(line.to_string());
    };
    let rest = &line[start + FIELD_OPEN.len()..];
    let Some(close) = rest.find(FIELD_CLOSE) else {
        return DirectiveParse::Malformed(line.to_string());
    };
    let label = rest[..close].trim();
    let value = rest[close + FIELD_CLOSE.len()..]
        .trim()
        .trim_matches('"')
        .trim();
    if label.is_empty() || value.is_empty() {
        return DirectiveParse::Malformed(line.to_string());
    }
    match ProfileField::from_label(label) {
        Some(field) => DirectiveParse::Update {
            field,
            value: value.to_string(),
        },
        None => DirectiveParse::UnrecognizedField(label.to_string()),
    }
}

/// Parse every non-empty line of a `system_info` payload.
pub fn parse_system_info(system_info: &str) -> Vec<DirectiveParse> {
    system_info
        .lines()
        .map(parse_directive)
        .filter(|d| *d != DirectiveParse::Empty)
        .collect()
}

/// City names that exist in more than one region; a match sets `is_duplicate_city`.
#[derive(Debug, Clone, Default)]
pub struct CityDirectory {
    duplicates: HashSet<String>,
}

impl CityDirectory {
    pub fn new<I, S>(duplicate_cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            duplicates: duplicate_cities
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn is_duplicate(&self, city: &str) -> bool {
        self.duplicates.contains(&city.trim().to_lowercase())
    }
}

/// Facts about the caller. Only [`ProfileField`] keys are stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallProfile {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub inn: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// The caller's number is already known to the call store.
    #[serde(default)]
    pub is_repeat_call: bool,
    /// `city` is ambiguous across regions.
    #[serde(default)]
    pub is_duplicate_city: bool,
}

impl CallProfile {
    /// Set a field by key or prompt label. Unknown keys are rejected and nothing is stored.
    pub fn set(&mut self, key: &str, value: &str, cities: &CityDirectory) -> CoreResult<ProfileField> {
        let field: ProfileField = key.parse()?;
        self.set_field(field, value, cities);
        Ok(field)
    }

    /// Set a known field, keeping derived flags in sync.
    pub fn set_field(&mut self, field: ProfileField, value: &str, cities: &CityDirectory) {
        let value = value.trim().to_string();
        match field {
            ProfileField::Name => self.name = Some(value),
            ProfileField::Phone => self.phone = Some(normalize_phone(&value).unwrap_or(value)),
            ProfileField::City => {
                self.is_duplicate_city = cities.is_duplicate(&value);
                self.city = Some(value);
            }
            ProfileField::Inn => self.inn = Some(value),
            ProfileField::Organization => self.organization = Some(value),
            ProfileField::Department => self.department = Some(value),
            ProfileField::Request => self.request = Some(value),
            ProfileField::Comment => self.comment = Some(value),
        }
    }

    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let v = match field {
            ProfileField::Name => &self.name,
            ProfileField::Phone => &self.phone,
            ProfileField::City => &self.city,
            ProfileField::Inn => &self.inn,
            ProfileField::Organization => &self.organization,
            ProfileField::Department => &self.department,
            ProfileField::Request => &self.request,
            ProfileField::Comment => &self.comment,
        };
        v.as_deref()
    }
}
