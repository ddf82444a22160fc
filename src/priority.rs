//! Round-robin priority scheduler for named downloads.
//!
//! Pure bookkeeping: the list never touches frames. An application adds a
//! record per discovered resource, marks it started once a stream carries
//! it and closed when the stream finishes, and asks
//! [`PriorityList::next_open_stream`] which stream to service next.
//!
//! Records live in an arena addressed by index. Two sorted index vectors
//! sit on top of it: one by name for binary-search lookup and one by
//! `(priority, name)` for the round-robin pass.

use std::cmp::Ordering;
use std::pin::pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::PriorityError;
use crate::frame::StreamId;

/// Scheduling class of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Guess a class from a resource path's extension.
    pub fn for_resource(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let extension = match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => ext.to_ascii_lowercase(),
            _ => return Priority::Medium,
        };
        match extension.as_str() {
            "html" | "htm" | "css" | "js" => Priority::High,
            "png" | "jpg" | "jpeg" | "gif" | "ico" | "svg" | "webp" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    /// SYN_STREAM priority byte (0 is most urgent).
    pub fn wire_priority(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 3,
            Priority::Low => 7,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Bookkeeping for one named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityRecord {
    pub level: Priority,
    pub original_name: String,
    /// Zero until the record is started.
    pub stream_id: StreamId,
    pub stream_opened: bool,
    pub stream_active: bool,
    /// Started and closed again.
    pub stream_completed: bool,
}

impl PriorityRecord {
    fn new(level: Priority, name: &str) -> Self {
        Self {
            level,
            original_name: name.to_string(),
            stream_id: 0,
            stream_opened: false,
            stream_active: false,
            stream_completed: false,
        }
    }

    /// Higher priority first, then by name.
    fn schedule_cmp(&self, level: Priority, name: &str) -> Ordering {
        self.level
            .rank()
            .cmp(&level.rank())
            .then_with(|| self.original_name.as_str().cmp(name))
    }
}

/// Answer of [`PriorityList::next_open_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStream {
    Stream(StreamId),
    /// Every record has completed.
    NoMoreStreams,
    /// Nothing is open right now but some records have not completed.
    WaitForMoreStreams,
}

#[derive(Debug, Default)]
pub struct PriorityList {
    records: Vec<PriorityRecord>,
    /// Record indices sorted by name.
    by_name: Vec<usize>,
    /// Record indices sorted by (priority, name).
    schedule: Vec<usize>,
    /// Schedule position last returned; `None` is the sentinel.
    cursor: Option<usize>,
    open_count: usize,
    completed_count: usize,
}

impl PriorityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    /// Add a resource.
    pub fn add(&mut self, level: Priority, name: &str) -> Result<(), PriorityError> {
        let name_pos = match self.find(name) {
            Ok(_) => return Err(PriorityError::DuplicateName(name.to_string())),
            Err(pos) => pos,
        };
        let index = self.records.len();
        self.records.push(PriorityRecord::new(level, name));
        self.by_name.insert(name_pos, index);

        let records = &self.records;
        let schedule_pos = self
            .schedule
            .partition_point(|&i| records[i].schedule_cmp(level, name) == Ordering::Less);
        self.schedule.insert(schedule_pos, index);
        if let Some(cursor) = self.cursor {
            if schedule_pos <= cursor {
                self.cursor = Some(cursor + 1);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PriorityRecord> {
        self.find(name).ok().map(|i| &self.records[i])
    }

    /// Records in round-robin order.
    pub fn records(&self) -> impl Iterator<Item = &PriorityRecord> {
        self.schedule.iter().map(move |&i| &self.records[i])
    }

    /// Record the cursor points at, if any.
    pub fn current(&self) -> Option<&PriorityRecord> {
        self.cursor.map(|pos| &self.records[self.schedule[pos]])
    }

    /// Mark `name` as carried by `stream_id`.
    pub fn start_stream(&mut self, name: &str, stream_id: StreamId) -> Result<(), PriorityError> {
        let index = self
            .find(name)
            .map_err(|_| PriorityError::UnknownName(name.to_string()))?;
        let record = &mut self.records[index];
        if record.stream_opened || record.stream_completed {
            return Err(PriorityError::AlreadyStarted(name.to_string()));
        }
        record.stream_id = stream_id;
        record.stream_opened = true;
        self.open_count += 1;
        Ok(())
    }

    /// Mark the stream carrying `name` as finished.
    pub fn close_stream(&mut self, name: &str) -> Result<(), PriorityError> {
        let index = self
            .find(name)
            .map_err(|_| PriorityError::UnknownName(name.to_string()))?;
        let record = &mut self.records[index];
        if !record.stream_opened {
            return Err(PriorityError::NotOpened(name.to_string()));
        }
        record.stream_opened = false;
        record.stream_active = false;
        record.stream_completed = true;
        self.open_count -= 1;
        self.completed_count += 1;
        Ok(())
    }

    /// Advance the cursor to the next opened record, wrapping once.
    pub fn next_open_stream(&mut self) -> NextStream {
        let n = self.schedule.len();
        let start = self.cursor.map_or(0, |c| c + 1);
        for step in 0..n {
            let pos = (start + step) % n;
            let record = &self.records[self.schedule[pos]];
            if record.stream_opened {
                self.cursor = Some(pos);
                return NextStream::Stream(record.stream_id);
            }
        }

        self.cursor = None;
        if self.completed_count == self.records.len() {
            NextStream::NoMoreStreams
        } else {
            NextStream::WaitForMoreStreams
        }
    }

    /// Flag the record last returned by [`next_open_stream`](Self::next_open_stream).
    ///
    /// Returns false (and does nothing) when the cursor is at the sentinel.
    pub fn set_current_stream_active(&mut self, active: bool) -> bool {
        match self.cursor {
            Some(pos) => {
                self.records[self.schedule[pos]].stream_active = active;
                true
            }
            None => false,
        }
    }

    /// Binary search by name: `Ok(record index)` or `Err(insert position)`.
    fn find(&self, name: &str) -> Result<usize, usize> {
        self.by_name
            .binary_search_by(|&i| self.records[i].original_name.as_str().cmp(name))
            .map(|pos| self.by_name[pos])
    }
}

/// A [`PriorityList`] shared between producer and scheduler tasks.
#[derive(Debug, Clone, Default)]
pub struct SharedPriorityList {
    inner: Arc<SharedInner>,
}

#[derive(Debug, Default)]
struct SharedInner {
    list: Mutex<PriorityList>,
    changed: Notify,
}

impl SharedPriorityList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under the list lock, waking any waiting scheduler afterwards.
    pub fn with<R>(&self, f: impl FnOnce(&mut PriorityList) -> R) -> R {
        let out = f(&mut self.inner.list.lock());
        self.inner.changed.notify_waiters();
        out
    }

    pub fn add(&self, level: Priority, name: &str) -> Result<(), PriorityError> {
        self.with(|list| list.add(level, name))
    }

    pub fn start_stream(&self, name: &str, stream_id: StreamId) -> Result<(), PriorityError> {
        self.with(|list| list.start_stream(name, stream_id))
    }

    pub fn close_stream(&self, name: &str) -> Result<(), PriorityError> {
        self.with(|list| list.close_stream(name))
    }

    pub fn set_current_stream_active(&self, active: bool) -> bool {
        self.inner.list.lock().set_current_stream_active(active)
    }

    pub fn next_open_stream(&self) -> NextStream {
        self.inner.list.lock().next_open_stream()
    }

    /// Wait for the next opened stream; `None` once every record completed.
    pub async fn next_stream(&self) -> Option<StreamId> {
        loop {
            let mut changed = pin!(self.inner.changed.notified());
            changed.as_mut().enable();
            let next = self.inner.list.lock().next_open_stream();
            match next {
                NextStream::Stream(id) => return Some(id),
                NextStream::NoMoreStreams => return None,
                NextStream::WaitForMoreStreams => changed.await,
            }
        }
    }
}
