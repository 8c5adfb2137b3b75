//! Pipelined bulk helpers
//!
//! Keep several requests in flight and hand results back in input order.
//!
//! ```text
//!   submit #0 #1 #2 #3          (up to `depth` outstanding)
//!   complete    #2 #0 #3 #1     (device order)
//!   yield    #0 #1 #2 #3        (reorder buffer, keyed by submission ordinal)
//! ```

use std::collections::{BTreeMap, VecDeque};

use crossbeam::channel::{self, Receiver, Sender};

use crate::entry::{Entry, KeyRange};
use crate::error::{KineticError, Result};
use crate::operations::{Operation, Outcome};

use super::{Client, Pending, Strategy};

// =============================================================================
// Reorder buffer
// =============================================================================

/// Releases items strictly in ordinal order
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    ready: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            ready: BTreeMap::new(),
        }
    }

    /// Park the item for `ordinal`
    pub fn insert(&mut self, ordinal: usize, item: T) {
        debug_assert!(ordinal >= self.next, "ordinal {} already released", ordinal);
        self.ready.insert(ordinal, item);
    }

    /// Next item, if the one for the next ordinal has arrived
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.ready.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Ordinal the buffer is waiting on
    pub fn next_ordinal(&self) -> usize {
        self.next
    }

    /// Items parked behind a gap
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

// =============================================================================
// Ordered
// =============================================================================

/// Iterator over the results of a pipelined batch of operations
pub struct Ordered<'a, S: Strategy, T> {
    client: &'a Client<S>,
    ops: std::vec::IntoIter<Operation>,
    depth: usize,
    convert: fn(Outcome) -> Result<T>,

    submitted: usize,
    in_flight: usize,
    tx: Sender<(usize, Result<Outcome>)>,
    rx: Receiver<(usize, Result<Outcome>)>,
    buffer: ReorderBuffer<Result<Outcome>>,
}

impl<'a, S: Strategy, T> Ordered<'a, S, T> {
    pub(crate) fn new(
        client: &'a Client<S>,
        ops: Vec<Operation>,
        depth: usize,
        convert: fn(Outcome) -> Result<T>,
    ) -> Self {
        // Unbounded: the synchronous strategy completes inside `submit`
        let (tx, rx) = channel::unbounded();
        Self {
            client,
            ops: ops.into_iter(),
            depth: depth.max(1),
            convert,
            submitted: 0,
            in_flight: 0,
            tx,
            rx,
            buffer: ReorderBuffer::new(),
        }
    }

    fn fill(&mut self) {
        while self.in_flight < self.depth {
            let op = match self.ops.next() {
                Some(op) => op,
                None => return,
            };
            let ordinal = self.submitted;
            self.submitted += 1;

            let tx = self.tx.clone();
            let submitted = self.client.submit_with(op, move |result| {
                let _ = tx.send((ordinal, result));
            });
            match submitted {
                Ok(()) => self.in_flight += 1,
                Err(err) => self.buffer.insert(ordinal, Err(err)),
            }
        }
    }
}

impl<S: Strategy, T> Iterator for Ordered<'_, S, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fill();
        loop {
            if let Some(result) = self.buffer.pop_ready() {
                return Some(result.and_then(self.convert));
            }
            if self.in_flight == 0 {
                return None;
            }
            if self.rx.is_empty() && super::threaded::on_io_thread() {
                // Nothing more can arrive while we hold this thread
                self.ops = Vec::new().into_iter();
                self.in_flight = 0;
                self.buffer = ReorderBuffer::new();
                return Some(Err(KineticError::BlockingInCompletion));
            }
            // The iterator holds a sender, so this only returns a result
            let (ordinal, result) = self.rx.recv().ok()?;
            self.in_flight -= 1;
            self.buffer.insert(ordinal, result);
            self.fill();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ops.len() + self.in_flight + self.buffer.len();
        (remaining, Some(remaining))
    }
}

// =============================================================================
// Range iterator
// =============================================================================

/// Lazily walks the entries of a key range
///
/// Keys are listed a page at a time; the last key of a page becomes the
/// exclusive start of the next. Up to `prefetch` entry fetches run ahead of
/// the caller. Keys deleted between listing and fetching are skipped.
pub struct RangeIter<'a, S: Strategy> {
    client: &'a Client<S>,
    cursor: KeyRange,
    page_size: u32,
    prefetch: usize,

    keys: VecDeque<Vec<u8>>,
    fetches: VecDeque<Pending<Option<Entry>>>,
    exhausted: bool,
    failed: bool,
}

impl<'a, S: Strategy> RangeIter<'a, S> {
    pub(crate) fn new(client: &'a Client<S>, range: KeyRange, page_size: u32, prefetch: usize) -> Self {
        Self {
            client,
            cursor: range,
            page_size: page_size.max(1),
            prefetch: prefetch.max(1),
            keys: VecDeque::new(),
            fetches: VecDeque::new(),
            exhausted: false,
            failed: false,
        }
    }

    fn next_page(&mut self) -> Result<()> {
        let keys = self.client.get_key_range(&self.cursor, self.page_size)?;
        tracing::trace!("Range page of {} keys", keys.len());

        if keys.len() < self.page_size as usize {
            self.exhausted = true;
        }
        match keys.last() {
            Some(last) => {
                if last == &self.cursor.end_key {
                    self.exhausted = true;
                }
                self.cursor.start_key = last.clone();
                self.cursor.start_inclusive = false;
            }
            None => self.exhausted = true,
        }
        self.keys.extend(keys);
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        while self.fetches.len() < self.prefetch {
            if self.keys.is_empty() {
                if self.exhausted {
                    return Ok(());
                }
                self.next_page()?;
                continue;
            }
            if let Some(key) = self.keys.pop_front() {
                self.fetches.push_back(self.client.get_async(key)?);
            }
        }
        Ok(())
    }
}

impl<S: Strategy> Iterator for RangeIter<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Err(err) = self.fill() {
                self.failed = true;
                return Some(Err(err));
            }
            let fetch = self.fetches.pop_front()?;
            match fetch.wait() {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => tracing::debug!("Skipping key removed during iteration"),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
