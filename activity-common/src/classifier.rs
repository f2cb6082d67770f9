//! Turn raw activity text into typed events.
//!
//! Classification walks an ordered table of rules: the first rule whose
//! pattern matches and whose extractor accepts the captures wins. Level-up
//! rules come first, then quest completions, then rare drops; anything left
//! over is a `Generic` event. Classification never fails.
use std::num::IntErrorKind;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use tracing::warn;

use crate::event::{
    event_identity, normalize_text, parse_source_timestamp, Event, EventKind, RawActivityRecord,
};
use crate::skills::{canonical_skill, SkillTable};

type Extractor = fn(&Captures, &SkillTable) -> Option<EventKind>;

struct Rule {
    name: &'static str,
    pattern: Regex,
    extract: Extractor,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, extract: Extractor) -> Self {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| panic!("invalid classifier pattern {name}: {e}"));
        Self {
            name,
            pattern,
            extract,
        }
    }

    fn apply(&self, text: &str, skills: &SkillTable) -> Option<EventKind> {
        let captures = self.pattern.captures(text)?;
        (self.extract)(&captures, skills)
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            "reached_level",
            r"^reached level (?P<level>\d+) in (?P<skill>.+?)\.?$",
            level_up,
        ),
        Rule::new(
            "levelled_my_skill",
            r"^i levell?ed my (?P<skill>.+?) skill,? i am now level (?P<level>\d+)\.?$",
            level_up,
        ),
        Rule::new(
            "levelled_up",
            r"^(?:.+\s)?levell?ed up (?:in )?(?P<skill>.+?)\.?$",
            level_up,
        ),
        Rule::new(
            "quest_complete_prefix",
            r"^quest complete[d]?\b\s*[:\-]?\s*(?P<quest>.+?)\.?$",
            quest_completed,
        ),
        Rule::new(
            "completed_quest_prefix",
            r"^(?:i (?:have )?)?completed (?:the )?quest\b\s*[:\-]?\s*(?P<quest>.+?)\.?$",
            quest_completed,
        ),
        Rule::new(
            "quest_complete_suffix",
            r"^(?P<quest>.+?)\s+quest complete[d]?\.?$",
            quest_completed,
        ),
        Rule::new(
            "quest_tokens",
            r"^(?P<text>.*\bquests?\b.*\bcomplet(?:e|ed|ion)\b.*|.*\bcomplet(?:e|ed|ion)\b.*\bquests?\b.*)$",
            quest_from_tokens,
        ),
        Rule::new(
            "rare_drop",
            r"^(?:i )?(?:received a rare drop|found a rare item)\s*:?\s*(?:(?P<quantity>\d[\d,]*)\s*x\s+)?(?P<item>.+?)\.?$",
            rare_drop,
        ),
        Rule::new("found_item", r"^(?:i )?found an? (?P<item>.+?)\.?$", rare_drop),
    ]
});

static QUEST_TOKENS: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(?:quests?|complet(?:e|ed|ion))\b")
        .case_insensitive(true)
        .build()
        .expect("invalid quest token pattern")
});

fn level_up(captures: &Captures, skills: &SkillTable) -> Option<EventKind> {
    let raw_skill = captures.name("skill")?.as_str().trim();
    if raw_skill.is_empty() {
        return None;
    }
    let skill = canonical_skill(raw_skill)
        .map(str::to_owned)
        .unwrap_or_else(|| raw_skill.to_owned());
    let new_level = captures
        .name("level")
        .and_then(|level| level.as_str().parse::<u32>().ok())
        .or_else(|| skills.level(&skill));

    Some(EventKind::LevelUp { skill, new_level })
}

fn quest_completed(captures: &Captures, _: &SkillTable) -> Option<EventKind> {
    let quest_name = trim_separators(captures.name("quest")?.as_str());
    if quest_name.is_empty() {
        return None;
    }
    Some(EventKind::QuestCompleted { quest_name })
}

fn quest_from_tokens(captures: &Captures, _: &SkillTable) -> Option<EventKind> {
    let remainder = QUEST_TOKENS.replace_all(captures.name("text")?.as_str(), " ");
    let quest_name = trim_separators(&normalize_text(&remainder));
    if quest_name.is_empty() {
        return None;
    }
    Some(EventKind::QuestCompleted { quest_name })
}

fn rare_drop(captures: &Captures, _: &SkillTable) -> Option<EventKind> {
    let item = trim_separators(captures.name("item")?.as_str());
    if item.is_empty() {
        return None;
    }
    let quantity = captures
        .name("quantity")
        .and_then(|quantity| parse_quantity(quantity.as_str()))
        .unwrap_or(1);

    Some(EventKind::RareDrop { item, quantity })
}

/// Parse a stack size like `1,000`. Sizes past `u32::MAX` saturate.
fn parse_quantity(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    match digits.parse::<u32>() {
        Ok(quantity) => Some(quantity),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(u32::MAX),
        Err(_) => None,
    }
}

fn trim_separators(value: &str) -> String {
    value
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '.' | ',' | '!'))
        .to_owned()
}

/// Classify already-normalized activity text. Unrecognized text is `Generic`.
pub fn classify_text(text: &str, skills: &SkillTable) -> EventKind {
    RULES
        .iter()
        .find_map(|rule| rule.apply(text, skills))
        .unwrap_or_else(|| EventKind::Generic {
            text: text.to_owned(),
        })
}

/// Name of the first rule matching `text`, if any.
pub fn matching_rule(text: &str, skills: &SkillTable) -> Option<&'static str> {
    RULES
        .iter()
        .find(|rule| rule.apply(text, skills).is_some())
        .map(|rule| rule.name)
}

/// Classify one raw record for `entity`.
///
/// `skills` is the entity's current skill table from the same fetch and is
/// only consulted when the text does not carry a level. Records whose date
/// cannot be parsed are stamped with `now`; their identity still uses the raw
/// date string.
pub fn classify(
    entity: &str,
    record: &RawActivityRecord,
    skills: &SkillTable,
    now: DateTime<Utc>,
) -> Event {
    let text = normalize_text(&record.text);
    let kind = classify_text(&text, skills);

    let occurred_at = parse_source_timestamp(&record.timestamp).unwrap_or_else(|| {
        warn!(
            entity,
            date = %record.timestamp,
            "unparsable activity date, falling back to now"
        );
        now
    });

    Event {
        entity: entity.to_owned(),
        identity: event_identity(entity, &text, &record.timestamp),
        kind,
        occurred_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::format_source_timestamp;
    use crate::skills::{SkillValue, SKILLS};
    use chrono::TimeZone;

    fn kind(text: &str) -> EventKind {
        classify_text(&normalize_text(text), &SkillTable::default())
    }

    fn level(skill: &str, new_level: Option<u32>) -> EventKind {
        EventKind::LevelUp {
            skill: skill.to_owned(),
            new_level,
        }
    }

    #[test]
    fn test_reached_level() {
        assert_eq!(
            kind("Reached level 82 in Dungeoneering."),
            level("Dungeoneering", Some(82))
        );
        assert_eq!(kind("reached level 5 in magic"), level("Magic", Some(5)));
    }

    #[test]
    fn test_every_canonical_skill_is_deterministic() {
        for skill in SKILLS {
            let text = format!("Reached level 90 in {skill}.");
            let first = kind(&text);
            assert_eq!(first, level(skill, Some(90)));
            assert_eq!(first, kind(&text));

            let text = format!("I levelled my {skill} skill, I am now level 91.");
            assert_eq!(kind(&text), level(skill, Some(91)));
        }
    }

    #[test]
    fn test_levelled_up_uses_skill_table() {
        let skills = SkillTable::from_values(&[SkillValue {
            id: 6,
            level: Some(99),
        }]);

        assert_eq!(
            classify_text("Levelled up Magic.", &skills),
            level("Magic", Some(99))
        );
        assert_eq!(
            classify_text("Foo levelled up Magic.", &skills),
            level("Magic", Some(99))
        );
        assert_eq!(
            classify_text("Levelled up Attack.", &skills),
            level("Attack", None)
        );
    }

    #[test]
    fn test_unknown_skill_passes_through() {
        assert_eq!(
            kind("Reached level 7 in Necromancy."),
            level("Necromancy", Some(7))
        );
        assert_eq!(kind("Levelled up Sailing."), level("Sailing", None));
    }

    #[test]
    fn test_quest_variants() {
        let quest = |name: &str| EventKind::QuestCompleted {
            quest_name: name.to_owned(),
        };

        assert_eq!(kind("Quest complete: Dragon Slayer"), quest("Dragon Slayer"));
        assert_eq!(
            kind("Quest completed: The Elder Kiln."),
            quest("The Elder Kiln")
        );
        assert_eq!(
            kind("Completed the quest: Desert Treasure."),
            quest("Desert Treasure")
        );
        assert_eq!(
            kind("I completed the quest Plague City."),
            quest("Plague City")
        );
        assert_eq!(kind("Cook's Assistant quest complete."), quest("Cook's Assistant"));
        assert_eq!(
            kind("The World Wakes: quest completion reached"),
            quest("The World Wakes: reached")
        );
    }

    #[test]
    fn test_bare_quest_complete_is_generic() {
        assert_eq!(
            kind("Quest complete."),
            EventKind::Generic {
                text: "Quest complete.".to_owned()
            }
        );
    }

    #[test]
    fn test_rare_drop() {
        assert_eq!(
            kind("received a rare drop: 1 x Armadyl Godsword."),
            EventKind::RareDrop {
                item: "Armadyl Godsword".to_owned(),
                quantity: 1
            }
        );
        assert_eq!(
            kind("I received a rare drop: 3 x Dragon bones"),
            EventKind::RareDrop {
                item: "Dragon bones".to_owned(),
                quantity: 3
            }
        );
        assert_eq!(
            kind("received a rare drop: Dragon pickaxe."),
            EventKind::RareDrop {
                item: "Dragon pickaxe".to_owned(),
                quantity: 1
            }
        );
        assert_eq!(
            kind("I received a rare drop: 1,000 x Coins."),
            EventKind::RareDrop {
                item: "Coins".to_owned(),
                quantity: 1000
            }
        );
        assert_eq!(
            kind("received a rare drop: 99999999999 x Coins"),
            EventKind::RareDrop {
                item: "Coins".to_owned(),
                quantity: u32::MAX
            }
        );
        assert_eq!(
            kind("I found a pair of Ragefire boots."),
            EventKind::RareDrop {
                item: "pair of Ragefire boots".to_owned(),
                quantity: 1
            }
        );
    }

    #[test]
    fn test_level_takes_priority_over_other_rules() {
        assert_eq!(
            matching_rule("Reached level 50 in Prayer.", &SkillTable::default()),
            Some("reached_level")
        );
        assert_eq!(
            matching_rule("Quest complete: Levelled up Magic", &SkillTable::default()),
            Some("levelled_up")
        );
    }

    #[test]
    fn test_generic_fallback() {
        assert_eq!(
            kind("  50000000XP   in Attack "),
            EventKind::Generic {
                text: "50000000XP in Attack".to_owned()
            }
        );
        assert_eq!(
            kind(""),
            EventKind::Generic {
                text: String::new()
            }
        );
        assert_eq!(matching_rule("Visited a Shooting Star.", &SkillTable::default()), None);
    }

    #[test]
    fn test_classify_record() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let record = RawActivityRecord::new(
            "Reached level 82 in Dungeoneering.",
            &format_source_timestamp(now),
        );

        let event = classify("Foo", &record, &SkillTable::default(), now);
        assert_eq!(event.entity, "Foo");
        assert_eq!(event.kind, level("Dungeoneering", Some(82)));
        assert_eq!(event.occurred_at, now);
        assert_eq!(
            event.identity,
            "Foo-Reached level 82 in Dungeoneering.-16-Oct-2026 12:00"
        );
    }

    #[test]
    fn test_unparsable_date_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let later = now + chrono::Duration::minutes(10);
        let record = RawActivityRecord::new("Visited a Shooting Star.", "yesterday");

        let first = classify("Foo", &record, &SkillTable::default(), now);
        let second = classify("Foo", &record, &SkillTable::default(), later);

        assert_eq!(first.occurred_at, now);
        assert_eq!(second.occurred_at, later);
        assert_eq!(first.identity, second.identity);
    }
}
