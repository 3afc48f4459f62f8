use crate::block::RowCursor;
use crate::config::ROWS_PER_BATCH;
use crate::error::ToolError;

/// One prepared batch of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Rows emitted before this batch.
    pub offset: u64,
    pub requested: usize,
    pub len: usize,
}

/// Drives a [`RowCursor`] in batches of at most [`ROWS_PER_BATCH`] rows until
/// the cursor runs dry or `budget` rows have been emitted. A budget of zero
/// is unbounded.
///
/// Each batch stays open on the cursor until the next call to
/// [`RowBudgetedBatches::next_batch`] or [`RowBudgetedBatches::finish`].
/// The sequence cannot be restarted.
pub struct RowBudgetedBatches<C: RowCursor> {
    cursor: C,
    budget: u64,
    batch_size: usize,
    emitted: u64,
    in_batch: bool,
    done: bool,
}

impl<C: RowCursor> RowBudgetedBatches<C> {
    pub fn new(cursor: C, budget: u64) -> Result<Self, ToolError> {
        Self::with_batch_size(cursor, budget, ROWS_PER_BATCH)
    }

    pub fn with_batch_size(mut cursor: C, budget: u64, batch_size: usize) -> Result<Self, ToolError> {
        if batch_size == 0 {
            return Err(ToolError::InvalidArgument(
                "batch size must be positive".into(),
            ));
        }
        cursor.seek_to_start()?;
        Ok(Self {
            cursor,
            budget,
            batch_size,
            emitted: 0,
            in_batch: false,
            done: false,
        })
    }

    /// Closes the previous batch and prepares the next one.
    pub fn next_batch(&mut self) -> Result<Option<Batch>, ToolError> {
        if self.in_batch {
            self.in_batch = false;
            if let Err(e) = self.cursor.finish_batch() {
                self.done = true;
                return Err(e);
            }
        }
        if self.done {
            return Ok(None);
        }
        let requested = if self.budget == 0 {
            self.batch_size
        } else {
            let remaining = self.budget.saturating_sub(self.emitted);
            if remaining == 0 {
                self.done = true;
                return Ok(None);
            }
            remaining.min(self.batch_size as u64) as usize
        };
        if !self.cursor.has_next() {
            self.done = true;
            return Ok(None);
        }
        let len = match self.cursor.prepare_batch(requested) {
            Ok(n) => n.min(requested),
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.in_batch = true;
        if len == 0 {
            self.done = true;
            return Ok(None);
        }
        let batch = Batch {
            offset: self.emitted,
            requested,
            len,
        };
        self.emitted += len as u64;
        Ok(Some(batch))
    }

    pub fn cursor(&self) -> &C {
        &self.cursor
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Closes any open batch and returns the number of rows emitted.
    pub fn finish(mut self) -> Result<u64, ToolError> {
        if self.in_batch {
            self.cursor.finish_batch()?;
        }
        Ok(self.emitted)
    }
}
