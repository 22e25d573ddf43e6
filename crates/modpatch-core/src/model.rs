//! Core entity types for progression tables and the add-ons that carry them

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Delimiter used by the game to pack a set into one attribute value
pub const SET_DELIMITER: char = ';';

/// An ordered set of strings, iterated lexicographically
///
/// The game stores these as one `;`-joined attribute. Joining only happens at
/// the serializer boundary; inside the crate the members stay a real set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSet(BTreeSet<String>);

impl StringSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a `;`-joined attribute value, dropping blank members
    pub fn parse(joined: &str) -> Self {
        joined
            .split(SET_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Join members with the set delimiter
    pub fn join(&self) -> String {
        let members: Vec<&str> = self.0.iter().map(String::as_str).collect();
        members.join(&SET_DELIMITER.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.0.contains(member)
    }

    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        self.0.insert(member.into())
    }

    pub fn remove(&mut self, member: &str) -> bool {
        self.0.remove(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Add every member of `other` to this set
    pub fn union_with(&mut self, other: &StringSet) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for StringSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join())
    }
}

/// A reference from a progression entry to a subclass definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubClass {
    /// Subclass UUID (identity key)
    pub uuid: String,
    /// Human-readable name, used only in output comments
    pub name: String,
}

impl SubClass {
    /// Name used until a class description resolves the real one
    pub const PLACEHOLDER_NAME: &'static str = "Base Game Subclass";

    /// Create a subclass reference with the placeholder name
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: Self::PLACEHOLDER_NAME.to_string(),
        }
    }

    /// Create a subclass reference with a known name
    pub fn named(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }
}

/// One row of a progression table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressionEntry {
    /// Entry UUID (identity key)
    pub uuid: String,
    pub name: String,
    pub table_uuid: String,
    pub level: u8,
    pub progression_type: u8,
    pub boosts: StringSet,
    pub passives_added: StringSet,
    pub passives_removed: StringSet,
    pub selectors: StringSet,
    pub allow_improvement: Option<bool>,
    pub is_multiclass: Option<bool>,
    /// Subclass references, unique by UUID
    pub subclasses: Vec<SubClass>,
}

impl ProgressionEntry {
    /// Create an entry carrying only the mandatory attributes
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        table_uuid: impl Into<String>,
        level: u8,
        progression_type: u8,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            table_uuid: table_uuid.into(),
            level,
            progression_type,
            boosts: StringSet::new(),
            passives_added: StringSet::new(),
            passives_removed: StringSet::new(),
            selectors: StringSet::new(),
            allow_improvement: None,
            is_multiclass: None,
            subclasses: Vec::new(),
        }
    }

    /// Borrow one of the four set-valued fields
    pub fn set(&self, field: Field) -> Option<&StringSet> {
        match field {
            Field::Boosts => Some(&self.boosts),
            Field::PassivesAdded => Some(&self.passives_added),
            Field::PassivesRemoved => Some(&self.passives_removed),
            Field::Selectors => Some(&self.selectors),
            _ => None,
        }
    }

    /// Mutably borrow one of the four set-valued fields
    pub fn set_mut(&mut self, field: Field) -> Option<&mut StringSet> {
        match field {
            Field::Boosts => Some(&mut self.boosts),
            Field::PassivesAdded => Some(&mut self.passives_added),
            Field::PassivesRemoved => Some(&mut self.passives_removed),
            Field::Selectors => Some(&mut self.selectors),
            _ => None,
        }
    }

    /// Borrow one of the two optional flag fields
    pub fn flag(&self, field: Field) -> Option<Option<bool>> {
        match field {
            Field::AllowImprovement => Some(self.allow_improvement),
            Field::IsMulticlass => Some(self.is_multiclass),
            _ => None,
        }
    }

    /// Mutably borrow one of the two optional flag fields
    pub fn flag_mut(&mut self, field: Field) -> Option<&mut Option<bool>> {
        match field {
            Field::AllowImprovement => Some(&mut self.allow_improvement),
            Field::IsMulticlass => Some(&mut self.is_multiclass),
            _ => None,
        }
    }

    /// Find a subclass reference by UUID
    pub fn find_subclass(&self, uuid: &str) -> Option<&SubClass> {
        self.subclasses.iter().find(|s| s.uuid == uuid)
    }
}

/// The value shape a field carries, which decides the strategies it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Scalar,
    Set,
    Flag,
    SubClasses,
}

/// Every field of a progression entry other than its identity key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Name,
    TableUuid,
    Level,
    ProgressionType,
    Boosts,
    PassivesAdded,
    PassivesRemoved,
    Selectors,
    AllowImprovement,
    IsMulticlass,
    SubClasses,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Name,
        Field::TableUuid,
        Field::Level,
        Field::ProgressionType,
        Field::Boosts,
        Field::PassivesAdded,
        Field::PassivesRemoved,
        Field::Selectors,
        Field::AllowImprovement,
        Field::IsMulticlass,
        Field::SubClasses,
    ];

    /// LSX attribute (or child node) id
    pub fn attribute_id(self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::TableUuid => "TableUUID",
            Field::Level => "Level",
            Field::ProgressionType => "ProgressionType",
            Field::Boosts => "Boosts",
            Field::PassivesAdded => "PassivesAdded",
            Field::PassivesRemoved => "PassivesRemoved",
            Field::Selectors => "Selectors",
            Field::AllowImprovement => "AllowImprovement",
            Field::IsMulticlass => "IsMulticlass",
            Field::SubClasses => "SubClasses",
        }
    }

    pub fn shape(self) -> FieldShape {
        match self {
            Field::Name | Field::TableUuid | Field::Level | Field::ProgressionType => {
                FieldShape::Scalar
            }
            Field::Boosts | Field::PassivesAdded | Field::PassivesRemoved | Field::Selectors => {
                FieldShape::Set
            }
            Field::AllowImprovement | Field::IsMulticlass => FieldShape::Flag,
            Field::SubClasses => FieldShape::SubClasses,
        }
    }
}

/// Module identity as declared in an add-on's metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonIdentity {
    pub uuid: String,
    pub name: String,
    pub author: String,
    pub folder: String,
    pub description: String,
}

impl Default for AddonIdentity {
    /// The fixed identity of the generated patch
    fn default() -> Self {
        Self {
            uuid: "c0d54727-cce1-4da4-b5b7-180590fb2780".to_string(),
            name: "ProgressionPatch".to_string(),
            author: "modpatch".to_string(),
            folder: "ProgressionPatch".to_string(),
            description: "A compatibility patch merging class progressions across mods."
                .to_string(),
        }
    }
}

/// The progression content of one add-on
///
/// `Skipped` is distinct from an empty list: a skipped add-on failed to parse
/// and must not take part in merging at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Progressions {
    Parsed { entries: Vec<ProgressionEntry> },
    Skipped { reason: String },
}

impl Progressions {
    pub fn entries(&self) -> Option<&[ProgressionEntry]> {
        match self {
            Progressions::Parsed { entries } => Some(entries),
            Progressions::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Progressions::Skipped { .. })
    }
}

/// Per-add-on metadata container owning a list of progression entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonMetadata {
    #[serde(flatten)]
    pub identity: AddonIdentity,
    pub progressions: Progressions,
}

impl AddonMetadata {
    /// Create a container with no entries yet
    pub fn empty(identity: AddonIdentity) -> Self {
        Self {
            identity,
            progressions: Progressions::Parsed {
                entries: Vec::new(),
            },
        }
    }

    /// Create a container for an add-on that cannot take part in merging
    pub fn skipped(identity: AddonIdentity, reason: impl Into<String>) -> Self {
        Self {
            identity,
            progressions: Progressions::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Parsed entries, empty for skipped add-ons
    pub fn entries(&self) -> &[ProgressionEntry] {
        self.progressions.entries().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_set_parse() {
        let set = StringSet::parse("B; A;;A ;C");
        assert_eq!(set.len(), 3);
        assert_eq!(set.join(), "A;B;C");
    }

    #[test]
    fn test_string_set_parse_empty() {
        assert!(StringSet::parse("").is_empty());
        assert!(StringSet::parse(" ; ").is_empty());
    }

    #[test]
    fn test_string_set_union() {
        let mut a = StringSet::parse("X;Y");
        a.union_with(&StringSet::parse("Y;Z"));
        assert_eq!(a.join(), "X;Y;Z");
    }

    #[test]
    fn test_field_accessors_match_shape() {
        let entry = ProgressionEntry::new("u", "Wizard", "t", 1, 0);
        for field in Field::ALL {
            assert_eq!(entry.set(field).is_some(), field.shape() == FieldShape::Set);
            assert_eq!(entry.flag(field).is_some(), field.shape() == FieldShape::Flag);
        }
    }

    #[test]
    fn test_skipped_is_not_empty() {
        let empty = AddonMetadata::empty(AddonIdentity::default());
        let skipped = AddonMetadata::skipped(AddonIdentity::default(), "bad");
        assert!(!empty.progressions.is_skipped());
        assert!(skipped.progressions.is_skipped());
        assert!(skipped.progressions.entries().is_none());
        assert_eq!(empty.progressions.entries().map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_subclass_placeholder() {
        let sub = SubClass::new("abc");
        assert_eq!(sub.name, SubClass::PLACEHOLDER_NAME);
    }
}
