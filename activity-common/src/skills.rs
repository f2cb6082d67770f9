use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical skill names, indexed by the profile source's `skillvalues[].id`.
pub const SKILLS: [&str; 28] = [
    "Attack",
    "Defence",
    "Strength",
    "Constitution",
    "Ranged",
    "Prayer",
    "Magic",
    "Cooking",
    "Woodcutting",
    "Fletching",
    "Fishing",
    "Firemaking",
    "Crafting",
    "Smithing",
    "Mining",
    "Herblore",
    "Agility",
    "Thieving",
    "Slayer",
    "Farming",
    "Runecrafting",
    "Hunter",
    "Construction",
    "Summoning",
    "Dungeoneering",
    "Divination",
    "Invention",
    "Archaeology",
];

// Alternate spellings seen in activity text.
const ALIASES: [(&str, &str); 5] = [
    ("defense", "Defence"),
    ("hitpoints", "Constitution"),
    ("range", "Ranged"),
    ("runecraft", "Runecrafting"),
    ("dungeon", "Dungeoneering"),
];

/// Resolve a skill name case-insensitively to its canonical spelling.
pub fn canonical_skill(name: &str) -> Option<&'static str> {
    let name = name.trim();
    SKILLS
        .iter()
        .copied()
        .find(|skill| skill.eq_ignore_ascii_case(name))
        .or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
                .map(|(_, skill)| *skill)
        })
}

pub fn skill_by_id(id: u32) -> Option<&'static str> {
    SKILLS.get(id as usize).copied()
}

/// One entry of the profile's `skillvalues` array.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SkillValue {
    pub id: u32,
    #[serde(default)]
    pub level: Option<u32>,
}

/// Current levels of one entity, keyed by canonical skill name.
///
/// Built from a fresh profile fetch and handed to the classifier to fill in
/// levels the activity text does not mention.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SkillTable {
    levels: HashMap<&'static str, u32>,
}

impl SkillTable {
    pub fn from_values(values: &[SkillValue]) -> Self {
        let levels = values
            .iter()
            .filter_map(|value| Some((skill_by_id(value.id)?, value.level?)))
            .collect();
        Self { levels }
    }

    pub fn level(&self, skill: &str) -> Option<u32> {
        canonical_skill(skill).and_then(|skill| self.levels.get(skill).copied())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
