//! Events registered on the debuggee, as the debugger knows them
//!
//! Tags are handed out from a seed so they never collide with breakpoint
//! ids; the user sees them relative to the seed.

use std::collections::BTreeMap;

use crate::protocol::payload::ModifyEventAction;

/// First tag handed out in a session
pub const DEBUGGER_EVENT_TAG_START_SEED: u64 = 0x1000000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub tag: u64,
    pub description: String,
    pub enabled: bool,
}

#[derive(Debug)]
pub struct EventRegistry {
    seed: u64,
    next_tag: u64,
    events: BTreeMap<u64, EventRecord>,
}

impl EventRegistry {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            next_tag: seed,
            events: BTreeMap::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Tag as shown to the user
    pub fn display_tag(&self, tag: u64) -> u64 {
        tag.wrapping_sub(self.seed)
    }

    /// Reserve the next tag and record the event as enabled
    pub fn register(&mut self, description: &str) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.events.insert(
            tag,
            EventRecord {
                tag,
                description: description.to_string(),
                enabled: true,
            },
        );
        tag
    }

    /// Drop an event whose registration the debuggee refused
    pub fn forget(&mut self, tag: u64) -> Option<EventRecord> {
        self.events.remove(&tag)
    }

    pub fn get(&self, tag: u64) -> Option<&EventRecord> {
        self.events.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.values()
    }

    /// Mirror a modification the debuggee confirmed
    ///
    /// Returns `false` when the tag is unknown locally.
    pub fn apply_modification(&mut self, tag: u64, action: ModifyEventAction) -> bool {
        match action {
            ModifyEventAction::QueryState => self.events.contains_key(&tag),
            ModifyEventAction::Enable | ModifyEventAction::Disable => {
                match self.events.get_mut(&tag) {
                    Some(event) => {
                        event.enabled = action == ModifyEventAction::Enable;
                        true
                    }
                    None => false,
                }
            }
            ModifyEventAction::Clear => self.events.remove(&tag).is_some(),
        }
    }

    /// Remove every event and restart tags from the seed
    pub fn clear_all_and_reset_tags(&mut self) {
        self.events.clear();
        self.next_tag = self.seed;
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new(DEBUGGER_EVENT_TAG_START_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_start_at_seed() {
        let mut events = EventRegistry::default();
        let first = events.register("!syscall");
        let second = events.register("!epthook");

        assert_eq!(first, DEBUGGER_EVENT_TAG_START_SEED);
        assert_eq!(second, DEBUGGER_EVENT_TAG_START_SEED + 1);
        assert_eq!(events.display_tag(second), 1);
    }

    #[test]
    fn test_modifications() {
        let mut events = EventRegistry::default();
        let tag = events.register("!msrwrite");

        assert!(events.apply_modification(tag, ModifyEventAction::Disable));
        assert!(!events.get(tag).unwrap().enabled);
        assert!(events.apply_modification(tag, ModifyEventAction::Enable));
        assert!(events.get(tag).unwrap().enabled);
        assert!(events.apply_modification(tag, ModifyEventAction::Clear));
        assert!(events.get(tag).is_none());
        assert!(!events.apply_modification(tag, ModifyEventAction::Enable));
    }

    #[test]
    fn test_clear_all_resets_tags() {
        let mut events = EventRegistry::default();
        events.register("a");
        events.register("b");
        events.clear_all_and_reset_tags();

        assert!(events.is_empty());
        assert_eq!(events.register("c"), DEBUGGER_EVENT_TAG_START_SEED);
    }
}
