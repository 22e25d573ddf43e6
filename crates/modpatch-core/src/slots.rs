//! Slot-grant boosts and their stacking reduction
//!
//! A slot grant is the boost `ActionResource(SpellSlot,<count>,<level>)`.
//! Several mods each granting the same slot count at different levels would
//! stack in the merged table; only the highest level per count is kept.

use crate::model::StringSet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Resource name recognized as a stackable slot grant
pub const SLOT_RESOURCE: &str = "SpellSlot";

static SLOT_GRANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*ActionResource\(\s*SpellSlot\s*,\s*(\d+)\s*,\s*(\d+)\s*\)\s*$")
        .expect("slot grant pattern is valid")
});

/// "Grant `count` slots at `level`"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotGrant {
    pub level: u32,
    pub count: u32,
}

impl SlotGrant {
    pub fn new(level: u32, count: u32) -> Self {
        Self { level, count }
    }

    /// Recognize a boost as a slot grant
    pub fn parse(boost: &str) -> Option<Self> {
        let caps = SLOT_GRANT.captures(boost)?;
        let count = caps.get(1)?.as_str().parse().ok()?;
        let level = caps.get(2)?.as_str().parse().ok()?;
        Some(Self { level, count })
    }
}

impl fmt::Display for SlotGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActionResource({},{},{})",
            SLOT_RESOURCE, self.count, self.level
        )
    }
}

/// Keep one slot grant per distinct count, at the highest level seen
///
/// Boosts that are not slot grants are left untouched. Returns the number of
/// grant boosts removed.
pub fn remove_duplicate_spellslots(boosts: &mut StringSet) -> usize {
    let grants: Vec<(String, SlotGrant)> = boosts
        .iter()
        .filter_map(|b| SlotGrant::parse(b).map(|g| (b.to_string(), g)))
        .collect();

    if grants.is_empty() {
        return 0;
    }

    let mut highest: BTreeMap<u32, u32> = BTreeMap::new();
    for (_, grant) in &grants {
        let level = highest.entry(grant.count).or_insert(grant.level);
        if grant.level > *level {
            *level = grant.level;
        }
    }

    for (raw, _) in &grants {
        boosts.remove(raw);
    }
    for (count, level) in &highest {
        boosts.insert(SlotGrant::new(*level, *count).to_string());
    }

    grants.len().saturating_sub(highest.len())
}
