use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::event::Event;

/// A defensive-copy view of the log's retained state at a point in time.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    pub events: Vec<Event>,
    pub last_seq: u64,
    pub syncing: bool,
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`SessionLog::subscribe`]; dropping it does not unsubscribe —
/// call [`Unsubscribe::unsubscribe`] (or the session-level `off`) explicitly, matching
/// the other subscription handles elsewhere in this codebase.
pub struct Unsubscribe {
    id: u64,
    log: Arc<SessionLogInner>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.log.listeners.lock().retain(|(id, _)| *id != self.id);
    }
}

struct SessionLogInner {
    listeners: Mutex<Vec<(u64, Listener)>>,
}

/// Canonical in-memory log for one session: contiguous-`seq` apply, idempotent
/// dedup via fingerprint, bounded retention, and subscribe-with-replay.
///
/// Not `Send`-shared across tasks on its own merit beyond `parking_lot::Mutex`'s
/// guarantees; callers needing shared ownership should wrap in `Arc`.
pub struct SessionLog {
    events: VecDeque<Event>,
    fingerprints: HashMap<u64, String>,
    applied_seq: u64,
    max_events: Option<usize>,
    inner: Arc<SessionLogInner>,
    next_listener_id: u64,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionLog {
    pub fn new(max_events: Option<usize>) -> Self {
        Self {
            events: VecDeque::new(),
            fingerprints: HashMap::new(),
            applied_seq: 0,
            max_events,
            inner: Arc::new(SessionLogInner {
                listeners: Mutex::new(Vec::new()),
            }),
            next_listener_id: 0,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.applied_seq
    }

    pub fn cursor(&self) -> u64 {
        self.applied_seq
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Feed a frame's worth of events (already in server-emitted order); returns the
    /// subset actually applied (appended, not deduped/dropped).
    pub fn apply_batch(&mut self, events: Vec<Event>) -> Result<Vec<Event>, Error> {
        let mut applied = Vec::new();
        for event in events {
            if let Some(event) = self.apply_one(event)? {
                applied.push(event);
            }
        }
        Ok(applied)
    }

    fn apply_one(&mut self, event: Event) -> Result<Option<Event>, Error> {
        let canonical = event.fingerprint()?;

        if event.seq <= self.applied_seq {
            match self.fingerprints.get(&event.seq) {
                Some(existing) if *existing == canonical => return Ok(None),
                Some(_) => return Err(Error::LogConflict { seq: event.seq }),
                None => {
                    let oldest = self.events.front().map(|e| e.seq);
                    match oldest {
                        Some(oldest) if event.seq < oldest => return Ok(None),
                        _ => return Err(Error::LogConflict { seq: event.seq }),
                    }
                }
            }
        }

        if event.seq != self.applied_seq + 1 {
            return Err(Error::LogGap {
                expected: self.applied_seq + 1,
                got: event.seq,
            });
        }

        self.fingerprints.insert(event.seq, canonical);
        self.applied_seq = event.seq;
        self.events.push_back(event.clone());
        self.enforce_retention();

        for (_, listener) in self.inner.listeners.lock().iter() {
            listener(&event);
        }

        Ok(Some(event))
    }

    fn enforce_retention(&mut self) {
        if let Some(max) = self.max_events {
            while self.events.len() > max {
                if let Some(oldest) = self.events.pop_front() {
                    self.fingerprints.remove(&oldest.seq);
                }
            }
        }
    }

    /// Replace state from a persisted snapshot. Validates the snapshot is internally
    /// consistent (contiguous, bounded by `cursor`) before committing.
    pub fn hydrate(&mut self, cursor: u64, events: Vec<Event>) -> Result<(), Error> {
        let mut expected = None;
        for event in &events {
            if event.seq > cursor {
                return Err(Error::Config(format!(
                    "hydrate: event seq {} exceeds cursor {}",
                    event.seq, cursor
                )));
            }
            if let Some(expected_seq) = expected {
                if event.seq != expected_seq + 1 {
                    return Err(Error::Config(format!(
                        "hydrate: non-contiguous events, expected seq {} got {}",
                        expected_seq + 1,
                        event.seq
                    )));
                }
            }
            expected = Some(event.seq);
        }

        self.events.clear();
        self.fingerprints.clear();
        for event in events {
            let canonical = event.fingerprint()?;
            self.fingerprints.insert(event.seq, canonical);
            self.events.push_back(event);
        }
        self.applied_seq = cursor;
        self.enforce_retention();
        Ok(())
    }

    /// Register a listener for future applied events. With `replay = true`,
    /// synchronously invokes `listener` for every currently-retained event, in
    /// order, before returning.
    pub fn subscribe(
        &mut self,
        listener: impl Fn(&Event) + Send + Sync + 'static,
        replay: bool,
    ) -> Unsubscribe {
        let listener: Listener = Arc::new(listener);
        if replay {
            for event in &self.events {
                listener(event);
            }
        }
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.inner.listeners.lock().push((id, listener));
        Unsubscribe {
            id,
            log: self.inner.clone(),
        }
    }

    pub fn get_snapshot(&self, syncing: bool) -> LogSnapshot {
        LogSnapshot {
            events: self.events.iter().cloned().collect(),
            last_seq: self.applied_seq,
            syncing,
        }
    }

    /// Change retention; trims oldest-first if the new bound is smaller.
    pub fn set_max_events(&mut self, max_events: Option<usize>) {
        self.max_events = max_events;
        self.enforce_retention();
    }
}
