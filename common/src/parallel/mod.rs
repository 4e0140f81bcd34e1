//! Row-chunked parallel iteration over image-shaped slices.

use rayon::prelude::*;


/// Multiplier for number of chunks relative to CPU threads.
/// Using 3x threads provides good load balancing when some chunks finish faster.
const CHUNKS_PER_THREAD: usize = 3;

#[inline]
fn auto_chunk_size(len: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (len / num_chunks).max(1)
}

/// Parallel iterator that prepends a start offset to each chunk.
pub struct WithOffset<I> {
    inner: I,
    multiplier: usize,
}

impl<I> ParallelIterator for WithOffset<I>
where
    I: IndexedParallelIterator,
{
    type Item = (usize, I::Item);

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: rayon::iter::plumbing::UnindexedConsumer<Self::Item>,
    {
        let multiplier = self.multiplier;
        self.inner
            .enumerate()
            .map(move |(idx, item)| (idx * multiplier, item))
            .drive_unindexed(consumer)
    }
}

impl<I> IndexedParallelIterator for WithOffset<I>
where
    I: IndexedParallelIterator,
{
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn drive<C>(self, consumer: C) -> C::Result
    where
        C: rayon::iter::plumbing::Consumer<Self::Item>,
    {
        let multiplier = self.multiplier;
        self.inner
            .enumerate()
            .map(move |(idx, item)| (idx * multiplier, item))
            .drive(consumer)
    }

    fn with_producer<CB>(self, callback: CB) -> CB::Output
    where
        CB: rayon::iter::plumbing::ProducerCallback<Self::Item>,
    {
        let multiplier = self.multiplier;
        self.inner
            .enumerate()
            .map(move |(idx, item)| (idx * multiplier, item))
            .with_producer(callback)
    }
}

/// Extension trait for row-aligned mutable parallel chunks with automatic sizing.
pub trait ParRowsMutAuto<'a, T: Send + 'a> {
    /// Split into chunks of whole rows of `row_len` elements.
    /// Yields `(chunk_start_row, chunk)` pairs.
    fn par_rows_mut_auto(&'a mut self, row_len: usize) -> WithOffset<rayon::slice::ChunksMut<'a, T>>;
}

impl<'a, T: Send + 'a> ParRowsMutAuto<'a, T> for [T] {
    fn par_rows_mut_auto(&'a mut self, row_len: usize) -> WithOffset<rayon::slice::ChunksMut<'a, T>> {
        assert!(row_len > 0, "row length must be positive");
        let height = self.len() / row_len;
        let chunk_rows = auto_chunk_size(height);
        WithOffset {
            inner: self.par_chunks_mut(row_len * chunk_rows),
            multiplier: chunk_rows,
        }
    }
}
