//! Forward-only batched iteration over a spell's result set.
//!
//! Pages are fetched strictly sequentially via LIMIT/OFFSET: page N+1 is
//! never requested before page N has been consumed from the driver, the
//! offset cursor only advances, and no page is requested after a short page
//! (fewer rows than the batch size) has been observed.

use std::collections::VecDeque;

use grimoire_error::Result;

use crate::dispatch::Record;
use crate::Spell;

/// Lazy page-at-a-time record iterator. Each call to [`Spell::batch`]
/// produces a fresh iterator starting at offset zero.
pub struct Batch {
    spell: Spell,
    size: u64,
    offset: u64,
    buffer: VecDeque<Record>,
    finished: bool,
    failed: bool,
}

impl Batch {
    pub(crate) fn new(spell: Spell, size: u64) -> Self {
        Self {
            spell,
            size: size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            finished: false,
            failed: false,
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let mut page = self.spell.dup();
        page.limit_mut(self.size).offset_mut(self.offset);
        let records = page.all()?;
        let fetched = records.len() as u64;
        tracing::trace!(
            offset = self.offset,
            fetched,
            size = self.size,
            "batch page"
        );
        self.offset += self.size;
        if fetched < self.size {
            self.finished = true;
        }
        self.buffer.extend(records);
        Ok(())
    }
}

impl Iterator for Batch {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() {
            if self.finished {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.failed = true;
                return Some(Err(err));
            }
        }
        match self.buffer.pop_front() {
            Some(record) => Some(Ok(record)),
            None => None,
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}
