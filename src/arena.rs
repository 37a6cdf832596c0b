//! Bump arenas for `Mems`'s own metadata records.
//!
//! A `Mems` cannot allocate the nodes of its address-space map by
//! calling back into itself — that would be the allocator recursing
//! into its own not-yet-consistent state. Instead each node kind gets
//! its own `BumpArena`, a monotonically growing allocator that hands
//! out fixed-size records from a chain of provider pages and never
//! frees individual records, matching the bump-cursor-over-pages
//! scheme `slitter`'s `mill.rs` uses for its own chunk metadata.
use crate::page_provider::PageProvider;

/// Hands out `T` records, batching growth to page-sized chunks drawn
/// from `provider`. Returned indices are stable for the arena's
/// lifetime: a chunk is never grown past the capacity reserved for it
/// up front, so no record is ever moved after being handed out.
pub struct BumpArena<T> {
    provider: &'static dyn PageProvider,
    records_per_page: usize,
    chunks: Vec<Vec<T>>,
    pages_acquired: usize,
}

impl<T> BumpArena<T> {
    pub fn new(provider: &'static dyn PageProvider) -> Self {
        let records_per_page =
            (provider.page_size() / std::mem::size_of::<T>().max(1)).max(1);

        BumpArena {
            provider,
            records_per_page,
            chunks: Vec::new(),
            pages_acquired: 0,
        }
    }

    /// Places `value` in the arena and returns a stable index for it.
    ///
    /// # Panics
    ///
    /// Panics (after logging) if the page provider fails: metadata
    /// growth failure is an environmental failure, not a caller
    /// error, and the allocator has no way to make progress without
    /// it.
    pub fn alloc(&mut self, value: T) -> usize {
        let full = match self.chunks.last() {
            Some(chunk) => chunk.len() == self.records_per_page,
            None => true,
        };

        if full {
            self.grow();
        }

        let chunk = self.chunks.last_mut().expect("just grew the arena");
        let slot = chunk.len();
        chunk.push(value);

        (self.chunks.len() - 1) * self.records_per_page + slot
    }

    fn grow(&mut self) {
        if self.provider.acquire(1).is_none() {
            log::error!("page provider failed while growing a metadata arena");
            panic!("mems: page provider failure while allocating metadata");
        }

        self.pages_acquired += 1;
        self.chunks.push(Vec::with_capacity(self.records_per_page));
    }

    pub fn get(&self, idx: usize) -> &T {
        let chunk = idx / self.records_per_page;
        let slot = idx % self.records_per_page;
        &self.chunks[chunk][slot]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        let chunk = idx / self.records_per_page;
        let slot = idx % self.records_per_page;
        &mut self.chunks[chunk][slot]
    }

    /// Number of provider pages this arena has ever acquired.
    pub fn pages_acquired(&self) -> usize {
        self.pages_acquired
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::page_provider::test_support::FakeProvider;

    #[test]
    fn indices_are_stable_across_growth() {
        let provider: &'static FakeProvider = Box::leak(Box::new(FakeProvider::new(64)));
        // 64-byte page / 8-byte usize records == 8 records per page.
        let mut arena: BumpArena<usize> = BumpArena::new(provider);

        let mut indices = Vec::new();
        for i in 0..40 {
            indices.push(arena.alloc(i));
        }

        for (i, idx) in indices.iter().enumerate() {
            assert_eq!(*arena.get(*idx), i);
        }

        assert_eq!(arena.pages_acquired(), 5);
    }

    #[test]
    #[should_panic(expected = "page provider failure")]
    fn provider_failure_is_fatal() {
        let provider: &'static FakeProvider = Box::leak(Box::new(FakeProvider::new(64)));
        provider.set_failing(true);

        let mut arena: BumpArena<usize> = BumpArena::new(provider);
        arena.alloc(0);
    }
}
