use crate::block::delta::{DeltaIterator, DeltaKeyAndUpdate};
use crate::dump::batch::Batch;
use crate::error::ToolError;
use crate::scratch::ScratchRegion;

/// Pulls the delta records that line up with each base batch.
///
/// Every [`DeltaMerge::step`] resets the scratch region first, so records
/// returned by one step must be consumed or copied before the next.
pub struct DeltaMerge<'s, I: DeltaIterator> {
    iter: I,
    scratch: &'s mut ScratchRegion,
    collected: u64,
}

impl<'s, I: DeltaIterator> DeltaMerge<'s, I> {
    pub fn new(mut iter: I, scratch: &'s mut ScratchRegion) -> Result<Self, ToolError> {
        iter.seek_to_ordinal(0)?;
        Ok(Self {
            iter,
            scratch,
            collected: 0,
        })
    }

    /// Records for rows `[batch.offset, batch.offset + batch.len)`, ordered by
    /// row and otherwise in storage order.
    pub fn step(&mut self, batch: &Batch) -> Result<Vec<DeltaKeyAndUpdate>, ToolError> {
        self.scratch.reset();
        self.iter.prepare_batch(batch.len)?;
        let mut deltas = self.iter.collect_deltas(self.scratch)?;
        deltas.sort_by_key(|d| d.key.row_idx);
        self.collected += deltas.len() as u64;
        Ok(deltas)
    }

    pub fn scratch(&self) -> &ScratchRegion {
        &*self.scratch
    }

    /// Records returned across all steps.
    pub fn collected(&self) -> u64 {
        self.collected
    }
}
