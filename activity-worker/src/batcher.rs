use activity_common::event::{Event, EventKind, TrackedEntity};

/// How accepted level-ups are bucketed before being merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingWindow {
    /// Everything accepted in one polling cycle.
    Cycle,
    /// Fixed buckets of `occurred_at`, aligned to the Unix epoch.
    Buckets(chrono::Duration),
}

impl GroupingWindow {
    fn bucket(&self, event: &Event) -> i64 {
        match self {
            GroupingWindow::Buckets(size) if size.num_seconds() > 0 => event
                .occurred_at
                .timestamp()
                .div_euclid(size.num_seconds()),
            _ => 0,
        }
    }
}

/// One message to hand to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Single(Event),
    /// Two or more level-ups of one entity in one grouping window, in acceptance order.
    LevelUps {
        entity: TrackedEntity,
        events: Vec<Event>,
    },
}

impl Notification {
    pub fn entity(&self) -> &str {
        match self {
            Notification::Single(event) => &event.entity,
            Notification::LevelUps { entity, .. } => entity,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Notification::Single(event) => event.kind.label(),
            Notification::LevelUps { .. } => "level_ups",
        }
    }
}

enum Slot {
    Single(Event),
    LevelUps { bucket: i64, events: Vec<Event> },
}

/// Per-entity accumulation of accepted events until the next drain.
struct PendingGroup {
    entity: TrackedEntity,
    slots: Vec<Slot>,
}

impl PendingGroup {
    fn push(&mut self, event: Event, bucket: i64) {
        if !matches!(event.kind, EventKind::LevelUp { .. }) {
            self.slots.push(Slot::Single(event));
            return;
        }

        let open = self.slots.iter_mut().find_map(|slot| match slot {
            Slot::LevelUps { bucket: b, events } if *b == bucket => Some(events),
            _ => None,
        });
        match open {
            Some(events) => events.push(event),
            None => self.slots.push(Slot::LevelUps {
                bucket,
                events: vec![event],
            }),
        }
    }

    fn into_notifications(self) -> impl Iterator<Item = Notification> {
        let entity = self.entity;
        self.slots.into_iter().filter_map(move |slot| match slot {
            Slot::Single(event) => Some(Notification::Single(event)),
            Slot::LevelUps { mut events, .. } if events.len() == 1 => {
                events.pop().map(Notification::Single)
            }
            Slot::LevelUps { events, .. } => Some(Notification::LevelUps {
                entity: entity.clone(),
                events,
            }),
        })
    }
}

/// Groups accepted events per entity.
///
/// Level-ups of one entity that fall into the same grouping window collapse
/// into one message placed where the first of them was accepted. Every other
/// event stays its own message, in acceptance order. Entities come out in the
/// order their first event was accepted.
pub struct Batcher {
    window: GroupingWindow,
    pending: Vec<PendingGroup>,
}

impl Batcher {
    pub fn new(window: GroupingWindow) -> Self {
        Self {
            window,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, event: Event) {
        let bucket = self.window.bucket(&event);
        match self
            .pending
            .iter_mut()
            .find(|group| group.entity == event.entity)
        {
            Some(group) => group.push(event, bucket),
            None => {
                let mut group = PendingGroup {
                    entity: event.entity.clone(),
                    slots: Vec::new(),
                };
                group.push(event, bucket);
                self.pending.push(group);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending notification, leaving the batcher empty.
    pub fn drain(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .flat_map(PendingGroup::into_notifications)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, minute, 0).unwrap()
    }

    fn event(entity: &str, kind: EventKind, minute: u32) -> Event {
        Event {
            entity: entity.to_owned(),
            identity: format!("{entity}-{kind:?}-{minute}"),
            kind,
            occurred_at: at(minute),
        }
    }

    fn level_up(entity: &str, skill: &str, level: u32, minute: u32) -> Event {
        event(
            entity,
            EventKind::LevelUp {
                skill: skill.to_owned(),
                new_level: Some(level),
            },
            minute,
        )
    }

    fn drop(entity: &str, item: &str, minute: u32) -> Event {
        event(
            entity,
            EventKind::RareDrop {
                item: item.to_owned(),
                quantity: 1,
            },
            minute,
        )
    }

    #[test]
    fn test_level_ups_are_combined_and_drop_stays_separate() {
        let mut batcher = Batcher::new(GroupingWindow::Cycle);
        let magic = level_up("Foo", "Magic", 90, 1);
        let attack = level_up("Foo", "Attack", 80, 2);
        let agility = level_up("Foo", "Agility", 70, 4);
        let godsword = drop("Foo", "Armadyl Godsword", 3);

        batcher.push(magic.clone());
        batcher.push(attack.clone());
        batcher.push(godsword.clone());
        batcher.push(agility.clone());

        assert_eq!(
            batcher.drain(),
            vec![
                Notification::LevelUps {
                    entity: "Foo".to_owned(),
                    events: vec![magic, attack, agility],
                },
                Notification::Single(godsword),
            ]
        );
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_lone_level_up_is_single() {
        let mut batcher = Batcher::new(GroupingWindow::Cycle);
        let magic = level_up("Foo", "Magic", 90, 1);
        batcher.push(magic.clone());

        assert_eq!(batcher.drain(), vec![Notification::Single(magic)]);
    }

    #[test]
    fn test_other_events_are_never_merged() {
        let mut batcher = Batcher::new(GroupingWindow::Cycle);
        let first = drop("Foo", "Dragon pickaxe", 1);
        let second = drop("Foo", "Dragon pickaxe", 2);
        let quest = event(
            "Foo",
            EventKind::QuestCompleted {
                quest_name: "Dragon Slayer".to_owned(),
            },
            3,
        );
        batcher.push(first.clone());
        batcher.push(quest.clone());
        batcher.push(second.clone());

        assert_eq!(
            batcher.drain(),
            vec![
                Notification::Single(first),
                Notification::Single(quest),
                Notification::Single(second),
            ]
        );
    }

    #[test]
    fn test_entities_are_grouped_separately() {
        let mut batcher = Batcher::new(GroupingWindow::Cycle);
        let foo = level_up("Foo", "Magic", 90, 1);
        let bar = level_up("Bar", "Magic", 50, 1);
        let foo_again = level_up("Foo", "Attack", 60, 2);
        batcher.push(foo.clone());
        batcher.push(bar.clone());
        batcher.push(foo_again.clone());

        let notifications = batcher.drain();
        assert_eq!(
            notifications,
            vec![
                Notification::LevelUps {
                    entity: "Foo".to_owned(),
                    events: vec![foo, foo_again],
                },
                Notification::Single(bar),
            ]
        );
        assert_eq!(notifications[0].entity(), "Foo");
        assert_eq!(notifications[0].label(), "level_ups");
    }

    #[test]
    fn test_buckets_split_level_ups() {
        let mut batcher = Batcher::new(GroupingWindow::Buckets(chrono::Duration::minutes(5)));
        let early = level_up("Foo", "Magic", 90, 1);
        let early_too = level_up("Foo", "Attack", 80, 4);
        let late = level_up("Foo", "Agility", 70, 6);
        batcher.push(early.clone());
        batcher.push(late.clone());
        batcher.push(early_too.clone());

        assert_eq!(
            batcher.drain(),
            vec![
                Notification::LevelUps {
                    entity: "Foo".to_owned(),
                    events: vec![early, early_too],
                },
                Notification::Single(late),
            ]
        );
    }
}
