use crate::domain::Event;

/// Upper bound on buffered join requests. Tracking one more clears the buffer.
pub const LOST_EVENTS_CAPACITY: usize = 100;
/// The buffer is re-attempted whenever its size is a non-zero multiple of this.
pub const LOST_EVENTS_RETRY_EVERY: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    Added,
    AlreadyTracked,
    /// The buffer was full; everything, including the incoming event, was dropped.
    Overflowed { dropped: usize },
}

/// Join requests whose handling kept failing, keyed by update id.
#[derive(Debug, Default)]
pub struct LostEvents {
    events: Vec<Event>,
}

impl LostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, update_id: i64) -> bool {
        self.events.iter().any(|event| event.update_id == update_id)
    }

    pub fn track(&mut self, event: Event) -> Tracked {
        if self.contains(event.update_id) {
            return Tracked::AlreadyTracked;
        }
        if self.events.len() >= LOST_EVENTS_CAPACITY {
            let dropped = self.events.len() + 1;
            self.events.clear();
            return Tracked::Overflowed { dropped };
        }
        self.events.push(event);
        Tracked::Added
    }

    /// Drops the event after a successful retry. Returns whether it was buffered.
    pub fn resolve(&mut self, update_id: i64) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.update_id != update_id);
        self.events.len() != before
    }

    pub fn retry_due(&self) -> bool {
        let len = self.events.len();
        len > 0 && len % LOST_EVENTS_RETRY_EVERY == 0
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::join_event;

    #[test]
    fn same_update_is_tracked_once() {
        let mut lost = LostEvents::new();
        assert_eq!(lost.track(join_event(5, 1, -100)), Tracked::Added);
        assert_eq!(lost.track(join_event(5, 1, -100)), Tracked::AlreadyTracked);
        assert_eq!(lost.len(), 1);

        assert!(lost.resolve(5));
        assert!(!lost.resolve(5));
        assert!(lost.is_empty());
    }

    #[test]
    fn overflow_clears_everything() {
        let mut lost = LostEvents::new();
        for id in 0..LOST_EVENTS_CAPACITY as i64 {
            assert_eq!(lost.track(join_event(id, id, -100)), Tracked::Added);
        }
        assert_eq!(lost.len(), LOST_EVENTS_CAPACITY);

        let outcome = lost.track(join_event(1_000, 1_000, -100));
        assert_eq!(
            outcome,
            Tracked::Overflowed {
                dropped: LOST_EVENTS_CAPACITY + 1
            }
        );
        assert!(lost.is_empty());
    }

    #[test]
    fn retry_triggers_on_multiples_of_thirty() {
        let mut lost = LostEvents::new();
        assert!(!lost.retry_due());
        for id in 0..29 {
            lost.track(join_event(id, id, -100));
        }
        assert!(!lost.retry_due());
        lost.track(join_event(29, 29, -100));
        assert!(lost.retry_due());
        lost.track(join_event(30, 30, -100));
        assert!(!lost.retry_due());
    }
}
