use core::str::FromStr;

use serde::{Deserialize, Serialize};

use mediawatch_core::{DomainError, PersonId, ProfileId};

/// Which kind of record a subject refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Profile,
    Person,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Profile => "profile",
            SubjectKind::Person => "person",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Ok(SubjectKind::Profile),
            "person" => Ok(SubjectKind::Person),
            other => Err(DomainError::validation(format!(
                "subject kind must be one of: profile, person (got '{other}')"
            ))),
        }
    }
}

/// The third-party profile or associated person being screened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Profile(ProfileId),
    Person(PersonId),
}

impl Subject {
    pub fn from_parts(kind: SubjectKind, id: i64) -> Self {
        match kind {
            SubjectKind::Profile => Subject::Profile(ProfileId::new(id)),
            SubjectKind::Person => Subject::Person(PersonId::new(id)),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Profile(_) => SubjectKind::Profile,
            Subject::Person(_) => SubjectKind::Person,
        }
    }

    /// Raw numeric id, only meaningful together with [`Subject::kind`].
    pub fn raw_id(&self) -> i64 {
        match self {
            Subject::Profile(id) => id.get(),
            Subject::Person(id) => id.get(),
        }
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.raw_id())
    }
}

/// Source field the search term was drawn from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameOrigin {
    /// Primary registered name of the profile or person.
    Name,
    /// Alternate / alias name.
    Alias,
    /// Trading or former name.
    FormerName,
    /// Typed in by a user.
    Manual,
}

impl NameOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameOrigin::Name => "name",
            NameOrigin::Alias => "alias",
            NameOrigin::FormerName => "former_name",
            NameOrigin::Manual => "manual",
        }
    }
}

impl FromStr for NameOrigin {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(NameOrigin::Name),
            "alias" => Ok(NameOrigin::Alias),
            "former_name" | "formername" => Ok(NameOrigin::FormerName),
            "manual" => Ok(NameOrigin::Manual),
            other => Err(DomainError::validation(format!("unknown name origin '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_round_trips_kind_and_id() {
        let s = Subject::from_parts(SubjectKind::Person, 42);
        assert_eq!(s, Subject::Person(PersonId::new(42)));
        assert_eq!(s.kind(), SubjectKind::Person);
        assert_eq!(s.raw_id(), 42);
        assert_eq!(s.to_string(), "person:42");
    }

    #[test]
    fn subject_kind_parse_is_case_insensitive() {
        assert_eq!("Profile".parse::<SubjectKind>().unwrap(), SubjectKind::Profile);
        assert!("company".parse::<SubjectKind>().is_err());
    }
}
