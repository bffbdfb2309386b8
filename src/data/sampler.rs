use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::DataError;

/// Without-replacement batch sampler over patient indices.
///
/// Keeps one shuffled epoch ordering and a cursor; the cursor is the only
/// mutable state and has a single writer. When an epoch is exhausted
/// mid-batch the order is reshuffled and the batch continues into the new
/// epoch, so no index is ever skipped. Requiring `batch <= len` keeps a
/// single batch free of duplicates.
#[derive(Debug)]
pub struct EpochSampler {
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl EpochSampler {
    pub fn new(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        Self {
            order,
            cursor: 0,
            rng,
        }
    }

    pub fn epoch_len(&self) -> usize {
        self.order.len()
    }

    /// Draws `batch` indices without replacement from the current epoch.
    pub fn next_batch(&mut self, batch: usize) -> Result<Vec<usize>, DataError> {
        if self.order.is_empty() {
            return Err(DataError::EmptyCohort);
        }
        if batch == 0 {
            return Err(DataError::EmptyBatch);
        }
        if batch > self.order.len() {
            return Err(DataError::BatchTooLarge {
                batch,
                cohort: self.order.len(),
            });
        }
        let mut drawn = Vec::with_capacity(batch);
        while drawn.len() < batch {
            if self.cursor == self.order.len() {
                self.order.shuffle(&mut self.rng);
                self.cursor = 0;
            }
            drawn.push(self.order[self.cursor]);
            self.cursor += 1;
        }
        Ok(drawn)
    }
}
