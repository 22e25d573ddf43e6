//! Merge engine combining the progression tables of many add-ons
//!
//! Entries are matched by UUID. The first add-on defining an entry inserts it
//! verbatim; later add-ons redefining it are folded in field by field, following
//! the strategy table below. Once every add-on is folded, slot grants in each
//! entry's boosts are reduced to one per slot count.

use crate::error::{Error, Result};
use crate::model::{AddonIdentity, AddonMetadata, Field, FieldShape, ProgressionEntry, Progressions};
use crate::slots::remove_duplicate_spellslots;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// How one field of a redefined entry is combined with the existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Keep the existing value
    FirstWins,
    /// Union of both sides (sets by member, subclasses by UUID)
    SetUnion,
    /// Take the incoming value only when the existing one is absent or empty
    PreferPresent,
    /// Logical OR of both flags, absent sides ignored
    LogicalOr,
}

impl MergeStrategy {
    pub fn name(self) -> &'static str {
        match self {
            MergeStrategy::FirstWins => "first-wins",
            MergeStrategy::SetUnion => "set-union",
            MergeStrategy::PreferPresent => "prefer-present",
            MergeStrategy::LogicalOr => "logical-or",
        }
    }

    /// Whether the strategy can be applied to a field of this shape
    pub fn accepts(self, shape: FieldShape) -> bool {
        match self {
            MergeStrategy::FirstWins => true,
            MergeStrategy::SetUnion => matches!(shape, FieldShape::Set | FieldShape::SubClasses),
            MergeStrategy::PreferPresent => shape != FieldShape::Scalar,
            MergeStrategy::LogicalOr => shape == FieldShape::Flag,
        }
    }
}

/// Policy for the two optional flags when both add-ons set them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagMerge {
    /// The add-on merged first keeps its value
    #[default]
    FirstWins,
    /// `true` if any add-on sets `true`
    LogicalOr,
}

/// Default strategy for every mergeable field
pub const FIELD_TABLE: [(Field, MergeStrategy); 11] = [
    (Field::Name, MergeStrategy::FirstWins),
    (Field::TableUuid, MergeStrategy::FirstWins),
    (Field::Level, MergeStrategy::FirstWins),
    (Field::ProgressionType, MergeStrategy::FirstWins),
    (Field::Boosts, MergeStrategy::SetUnion),
    (Field::PassivesAdded, MergeStrategy::SetUnion),
    (Field::PassivesRemoved, MergeStrategy::SetUnion),
    (Field::Selectors, MergeStrategy::SetUnion),
    (Field::AllowImprovement, MergeStrategy::PreferPresent),
    (Field::IsMulticlass, MergeStrategy::PreferPresent),
    (Field::SubClasses, MergeStrategy::SetUnion),
];

/// Strategy table with the flag policy applied
pub fn field_strategies(flags: FlagMerge) -> [(Field, MergeStrategy); 11] {
    let mut table = FIELD_TABLE;
    if flags == FlagMerge::LogicalOr {
        for (field, strategy) in table.iter_mut() {
            if field.shape() == FieldShape::Flag {
                *strategy = MergeStrategy::LogicalOr;
            }
        }
    }
    table
}

/// Fold one field of `incoming` into `existing`
///
/// Returns `Error::TypeMismatch` without touching `existing` when the strategy
/// does not fit the field's shape.
pub fn merge_field(
    existing: &mut ProgressionEntry,
    incoming: &ProgressionEntry,
    field: Field,
    strategy: MergeStrategy,
) -> Result<()> {
    let shape = field.shape();
    if !strategy.accepts(shape) {
        return Err(Error::TypeMismatch {
            field: field.attribute_id(),
            strategy: strategy.name(),
        });
    }

    match (shape, strategy) {
        (_, MergeStrategy::FirstWins) => {}
        (FieldShape::Set, _) => {
            let (Some(target), Some(source)) = (existing.set_mut(field), incoming.set(field)) else {
                return Err(mismatch(field, strategy));
            };
            if strategy == MergeStrategy::SetUnion || target.is_empty() {
                target.union_with(source);
            }
        }
        (FieldShape::Flag, _) => {
            let (Some(target), Some(source)) = (existing.flag_mut(field), incoming.flag(field)) else {
                return Err(mismatch(field, strategy));
            };
            *target = match (*target, source) {
                (None, other) | (other, None) => other,
                (Some(a), Some(b)) if strategy == MergeStrategy::LogicalOr => Some(a || b),
                (kept, Some(_)) => kept,
            };
        }
        (FieldShape::SubClasses, _) => {
            if strategy == MergeStrategy::PreferPresent && !existing.subclasses.is_empty() {
                return Ok(());
            }
            for sub in &incoming.subclasses {
                if existing.find_subclass(&sub.uuid).is_none() {
                    existing.subclasses.push(sub.clone());
                }
            }
        }
        (FieldShape::Scalar, _) => return Err(mismatch(field, strategy)),
    }

    Ok(())
}

fn mismatch(field: Field, strategy: MergeStrategy) -> Error {
    Error::TypeMismatch {
        field: field.attribute_id(),
        strategy: strategy.name(),
    }
}

/// Fold every field of `incoming` into `existing`
///
/// A field that cannot be merged is logged and left at its prior value; the
/// remaining fields are still merged. Returns the fields that were left alone.
pub fn merge_entry(
    existing: &mut ProgressionEntry,
    incoming: &ProgressionEntry,
    strategies: &[(Field, MergeStrategy)],
) -> Vec<Field> {
    let mut failed = Vec::new();
    for &(field, strategy) in strategies {
        if let Err(e) = merge_field(existing, incoming, field, strategy) {
            warn!("progression {}: {}", existing.uuid, e);
            failed.push(field);
        }
    }
    failed
}

/// Options for `combine`
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Identity of the generated patch
    pub identity: AddonIdentity,
    pub flag_merge: FlagMerge,
}

/// What one add-on contributed to the merged patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Contribution {
    Merged {
        /// Entries this add-on defined first
        added: usize,
        /// Entries folded into an existing definition
        merged: usize,
        /// Fields left unchanged because they could not be merged
        mismatched_fields: usize,
    },
    Skipped {
        reason: String,
    },
}

/// Per-add-on line of the merge report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeNote {
    pub addon: String,
    pub uuid: String,
    pub contribution: Contribution,
}

/// Result of `combine`
#[derive(Debug, Clone)]
pub struct Combined {
    pub patch: AddonMetadata,
    pub notes: Vec<MergeNote>,
    /// Slot grants dropped by the stacking reduction
    pub slot_grants_removed: usize,
}

/// Combine the progression tables of `addons`, in order, into one patch
pub fn combine(addons: &[AddonMetadata], options: &MergeOptions) -> Combined {
    let strategies = field_strategies(options.flag_merge);

    let mut entries: Vec<ProgressionEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut notes = Vec::with_capacity(addons.len());

    for addon in addons {
        let note = |contribution| MergeNote {
            addon: addon.identity.name.clone(),
            uuid: addon.identity.uuid.clone(),
            contribution,
        };

        if addon.identity.uuid == options.identity.uuid {
            warn!("skipping {}: it is the patch itself", addon.identity.name);
            notes.push(note(Contribution::Skipped {
                reason: "add-on is the generated patch".to_string(),
            }));
            continue;
        }

        let incoming = match &addon.progressions {
            Progressions::Parsed { entries } => entries,
            Progressions::Skipped { reason } => {
                warn!("skipping {}: {}", addon.identity.name, reason);
                notes.push(note(Contribution::Skipped {
                    reason: reason.clone(),
                }));
                continue;
            }
        };

        let (mut added, mut merged, mut mismatched_fields) = (0, 0, 0);
        for entry in incoming {
            match index.get(&entry.uuid) {
                Some(&i) => {
                    mismatched_fields += merge_entry(&mut entries[i], entry, &strategies).len();
                    merged += 1;
                }
                None => {
                    index.insert(entry.uuid.clone(), entries.len());
                    entries.push(entry.clone());
                    added += 1;
                }
            }
        }

        debug!(
            "{}: {} new progressions, {} merged into existing",
            addon.identity.name, added, merged
        );
        notes.push(note(Contribution::Merged {
            added,
            merged,
            mismatched_fields,
        }));
    }

    let mut slot_grants_removed = 0;
    for entry in &mut entries {
        slot_grants_removed += remove_duplicate_spellslots(&mut entry.boosts);
    }

    info!(
        "combined {} add-ons into {} progressions",
        notes
            .iter()
            .filter(|n| matches!(n.contribution, Contribution::Merged { .. }))
            .count(),
        entries.len()
    );

    Combined {
        patch: AddonMetadata {
            identity: options.identity.clone(),
            progressions: Progressions::Parsed { entries },
        },
        notes,
        slot_grants_removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StringSet, SubClass};
    use crate::slots::SlotGrant;
    use proptest::prelude::*;

    fn identity(uuid: &str) -> AddonIdentity {
        AddonIdentity {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            author: String::new(),
            folder: uuid.to_string(),
            description: String::new(),
        }
    }

    fn addon(uuid: &str, entries: Vec<ProgressionEntry>) -> AddonMetadata {
        AddonMetadata {
            identity: identity(uuid),
            progressions: Progressions::Parsed { entries },
        }
    }

    fn entry(uuid: &str, boosts: &str) -> ProgressionEntry {
        let mut e = ProgressionEntry::new(uuid, "Wizard", "table-1", 3, 0);
        e.boosts = StringSet::parse(boosts);
        e
    }

    #[test]
    fn test_union_of_redefined_entry() {
        let a = addon("mod-a", vec![entry("U1", "X")]);
        let b = addon("mod-b", vec![entry("U1", "Y")]);

        let combined = combine(&[a, b], &MergeOptions::default());

        let entries = combined.patch.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].boosts.join(), "X;Y");
    }

    #[test]
    fn test_skipped_addon_contributes_nothing() {
        let a = addon("mod-a", vec![entry("U1", "X")]);
        let c = AddonMetadata::skipped(identity("mod-c"), "malformed");

        let combined = combine(&[a, c], &MergeOptions::default());

        assert_eq!(combined.patch.entries().len(), 1);
        assert_eq!(combined.patch.entries()[0].boosts.join(), "X");
        assert_eq!(
            combined.notes[1].contribution,
            Contribution::Skipped {
                reason: "malformed".to_string()
            }
        );
    }

    #[test]
    fn test_patch_identity_is_fixed() {
        let options = MergeOptions::default();
        let combined = combine(&[addon("mod-a", vec![entry("U1", "X")])], &options);
        assert_eq!(combined.patch.identity, options.identity);
        assert_ne!(combined.patch.identity.uuid, "mod-a");
    }

    #[test]
    fn test_previous_patch_is_not_merged() {
        let options = MergeOptions::default();
        let mut old_patch = addon("ignored", vec![entry("U1", "Stale")]);
        old_patch.identity = options.identity.clone();

        let combined = combine(&[old_patch, addon("mod-a", vec![entry("U1", "X")])], &options);

        assert_eq!(combined.patch.entries()[0].boosts.join(), "X");
        assert!(matches!(combined.notes[0].contribution, Contribution::Skipped { .. }));
    }

    #[test]
    fn test_first_writer_wins_scalars() {
        let mut first = entry("U1", "");
        first.level = 3;
        first.name = "First".to_string();
        let mut second = entry("U1", "");
        second.level = 5;
        second.name = "Second".to_string();
        second.table_uuid = "other-table".to_string();

        let combined = combine(
            &[addon("a", vec![first]), addon("b", vec![second])],
            &MergeOptions::default(),
        );

        let merged = &combined.patch.entries()[0];
        assert_eq!(merged.level, 3);
        assert_eq!(merged.name, "First");
        assert_eq!(merged.table_uuid, "table-1");
    }

    #[test]
    fn test_flags_prefer_present_then_first_wins() {
        let mut existing = entry("U1", "");
        let mut incoming = entry("U1", "");
        incoming.allow_improvement = Some(true);
        incoming.is_multiclass = Some(true);
        existing.is_multiclass = Some(false);

        merge_entry(&mut existing, &incoming, &FIELD_TABLE);

        assert_eq!(existing.allow_improvement, Some(true));
        assert_eq!(existing.is_multiclass, Some(false));
    }

    #[test]
    fn test_flags_logical_or() {
        let mut existing = entry("U1", "");
        existing.is_multiclass = Some(false);
        let mut incoming = entry("U1", "");
        incoming.is_multiclass = Some(true);

        merge_entry(
            &mut existing,
            &incoming,
            &field_strategies(FlagMerge::LogicalOr),
        );

        assert_eq!(existing.is_multiclass, Some(true));
        assert_eq!(existing.allow_improvement, None);
    }

    #[test]
    fn test_empty_is_identity_for_every_field() {
        let empty = entry("U1", "");
        let mut full = entry("U1", "A;B");
        full.passives_added = StringSet::parse("P");
        full.passives_removed = StringSet::parse("R");
        full.selectors = StringSet::parse("SelectSpells(x)");
        full.allow_improvement = Some(false);
        full.is_multiclass = Some(true);
        full.subclasses.push(SubClass::new("sub-1"));

        for flags in [FlagMerge::FirstWins, FlagMerge::LogicalOr] {
            let table = field_strategies(flags);

            let mut left = empty.clone();
            assert!(merge_entry(&mut left, &full, &table).is_empty());
            assert_eq!(left, full);

            let mut right = full.clone();
            assert!(merge_entry(&mut right, &empty, &table).is_empty());
            assert_eq!(right, full);
        }
    }

    #[test]
    fn test_subclass_union_keeps_existing_name() {
        let mut existing = entry("U1", "");
        existing.subclasses.push(SubClass::named("sub-1", "Bladesinging"));
        let mut incoming = entry("U1", "");
        incoming.subclasses.push(SubClass::new("sub-1"));
        incoming.subclasses.push(SubClass::named("sub-2", "Chronurgy"));

        merge_entry(&mut existing, &incoming, &FIELD_TABLE);

        assert_eq!(existing.subclasses.len(), 2);
        assert_eq!(existing.subclasses[0].name, "Bladesinging");
        assert_eq!(existing.subclasses[1].uuid, "sub-2");
    }

    #[test]
    fn test_subclass_union_is_idempotent() {
        let mut source = entry("U1", "");
        source.subclasses.push(SubClass::new("sub-1"));
        source.subclasses.push(SubClass::new("sub-2"));
        let a = addon("mod-a", vec![source]);

        let once = combine(std::slice::from_ref(&a), &MergeOptions::default());
        let twice = combine(&[a.clone(), a], &MergeOptions::default());

        assert_eq!(
            once.patch.entries()[0].subclasses,
            twice.patch.entries()[0].subclasses
        );
    }

    #[test]
    fn test_type_mismatch_leaves_field_unchanged() {
        let mut existing = entry("U1", "A");
        existing.level = 2;
        let mut incoming = entry("U1", "B");
        incoming.level = 9;

        let err = merge_field(&mut existing, &incoming, Field::Level, MergeStrategy::SetUnion)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { field: "Level", .. }));
        assert_eq!(existing.level, 2);

        let broken = [
            (Field::Level, MergeStrategy::LogicalOr),
            (Field::Boosts, MergeStrategy::SetUnion),
        ];
        let failed = merge_entry(&mut existing, &incoming, &broken);
        assert_eq!(failed, vec![Field::Level]);
        assert_eq!(existing.boosts.join(), "A;B");
    }

    #[test]
    fn test_default_table_accepts_every_field() {
        for flags in [FlagMerge::FirstWins, FlagMerge::LogicalOr] {
            let table = field_strategies(flags);
            assert_eq!(table.len(), Field::ALL.len());
            for field in Field::ALL {
                let (_, strategy) = table.iter().find(|(f, _)| *f == field).unwrap();
                assert!(strategy.accepts(field.shape()), "{:?}", field);
            }
        }
    }

    #[test]
    fn test_slot_grants_reduced_after_merge() {
        let a = addon(
            "mod-a",
            vec![entry("U1", &format!("{};Feat", SlotGrant::new(1, 1)))],
        );
        let b = addon(
            "mod-b",
            vec![entry(
                "U1",
                &format!("{};{}", SlotGrant::new(3, 1), SlotGrant::new(2, 2)),
            )],
        );

        let combined = combine(&[a, b], &MergeOptions::default());

        let boosts = &combined.patch.entries()[0].boosts;
        assert_eq!(combined.slot_grants_removed, 1);
        assert_eq!(boosts.len(), 3);
        assert!(boosts.contains(&SlotGrant::new(3, 1).to_string()));
        assert!(boosts.contains(&SlotGrant::new(2, 2).to_string()));
        assert!(boosts.contains("Feat"));
    }

    #[test]
    fn test_entries_keep_first_seen_order() {
        let a = addon("mod-a", vec![entry("U2", ""), entry("U1", "")]);
        let b = addon("mod-b", vec![entry("U3", ""), entry("U2", "")]);

        let combined = combine(&[a, b], &MergeOptions::default());

        let uuids: Vec<&str> = combined.patch.entries().iter().map(|e| e.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["U2", "U1", "U3"]);
    }

    fn members_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[A-D][a-c]{0,2}", 0..5)
    }

    const SET_FIELDS: [Field; 4] = [
        Field::Boosts,
        Field::PassivesAdded,
        Field::PassivesRemoved,
        Field::Selectors,
    ];

    proptest! {
        #[test]
        fn prop_set_merge_is_order_independent(
            a in prop::array::uniform4(members_strategy()),
            b in prop::array::uniform4(members_strategy()),
            c in prop::array::uniform4(members_strategy()),
        ) {
            let make = |name: &str, sets: &[Vec<String>; 4]| {
                let mut e = entry("U1", "");
                for (field, members) in SET_FIELDS.iter().zip(sets) {
                    *e.set_mut(*field).unwrap() = members.iter().cloned().collect();
                }
                addon(name, vec![e])
            };
            let (x, y, z) = (make("x", &a), make("y", &b), make("z", &c));

            let reference = combine(&[x.clone(), y.clone(), z.clone()], &MergeOptions::default());
            let merged = &reference.patch.entries()[0];
            for (i, field) in SET_FIELDS.iter().enumerate() {
                let expected: StringSet = a[i].iter().chain(&b[i]).chain(&c[i]).cloned().collect();
                prop_assert_eq!(merged.set(*field).unwrap(), &expected);
            }

            for order in [
                vec![z.clone(), y.clone(), x.clone()],
                vec![y.clone(), x.clone(), z.clone()],
                vec![x.clone(), z.clone(), y.clone()],
            ] {
                let other = combine(&order, &MergeOptions::default());
                for field in SET_FIELDS {
                    prop_assert_eq!(
                        other.patch.entries()[0].set(field).unwrap(),
                        merged.set(field).unwrap()
                    );
                }
            }
        }

        #[test]
        fn prop_one_entry_per_uuid(
            uuids in prop::collection::vec(prop::collection::vec("U[0-4]", 0..6), 1..5),
        ) {
            let addons: Vec<AddonMetadata> = uuids
                .iter()
                .enumerate()
                .map(|(i, list)| {
                    let mut seen = std::collections::HashSet::new();
                    let entries = list
                        .iter()
                        .filter(|u| seen.insert(u.as_str()))
                        .map(|u| entry(u, ""))
                        .collect();
                    addon(&format!("mod-{}", i), entries)
                })
                .collect();

            let combined = combine(&addons, &MergeOptions::default());

            let distinct: std::collections::HashSet<&String> = uuids.iter().flatten().collect();
            prop_assert_eq!(combined.patch.entries().len(), distinct.len());
        }
    }
}
