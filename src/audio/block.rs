/// Re-slices arbitrarily sized sample buffers into fixed-size blocks
///
/// Capture devices rarely deliver exactly one block per callback; the
/// assembler carries the remainder over to the next call.
#[derive(Debug)]
pub struct BlockAssembler {
    block_samples: usize,
    pending: Vec<i16>,
}

impl BlockAssembler {
    pub fn new(block_samples: usize) -> Self {
        let block_samples = block_samples.max(1);
        Self {
            block_samples,
            pending: Vec::with_capacity(block_samples),
        }
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// Samples waiting for the next complete block
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Append `samples`, calling `emit` once per completed block
    pub fn push(&mut self, samples: &[i16], emit: impl FnMut(Vec<i16>)) {
        let block_samples = self.block_samples;
        self.push_with(samples, || Vec::with_capacity(block_samples), emit);
    }

    /// Like [`BlockAssembler::push`], taking the next block buffer from `fresh`
    ///
    /// `fresh` must return an empty buffer; capture passes recycled ones.
    pub fn push_with(
        &mut self,
        mut samples: &[i16],
        mut fresh: impl FnMut() -> Vec<i16>,
        mut emit: impl FnMut(Vec<i16>),
    ) {
        while !samples.is_empty() {
            let wanted = self.block_samples - self.pending.len();
            let take = wanted.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_samples {
                let block = std::mem::replace(&mut self.pending, fresh());
                emit(block);
            }
        }
    }

    /// Zero-pad and return the partial block, if any
    pub fn finish(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut block = std::mem::take(&mut self.pending);
        block.resize(self.block_samples, 0);
        Some(block)
    }
}
