//! `Mems`, the allocator façade: `init`, `malloc`, `free`, `translate`,
//! `print_stats`, `finish`. Implements the search/split/coalesce/
//! translate policy over the `AddressSpace` map.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use crate::chain::{AddressSpace, SegKind};
use crate::error::MemsError;
use crate::page_provider::{self, PageProvider};
use crate::P;

/// A MeMS-internal virtual handle. `0` is never issued by `malloc`
/// (the virtual space starts at `BASE`, which is always positive), so
/// it doubles as the null handle returned on failure.
pub const NULL_HANDLE: usize = 0;

/// The allocator façade: a private virtual address space, the
/// metadata arenas backing it, and the page provider both draw pages
/// from.
///
/// `Mems` has no internal synchronisation: its methods take `&mut
/// self` (except the read-only `translate`/`print_stats`), which is
/// the idiomatic way to express "single logical owner, call site
/// enforces exclusion" in Rust. A caller that needs to share one
/// `Mems` across threads should wrap it in a `Mutex`.
pub struct Mems {
    space: AddressSpace,
    provider: &'static dyn PageProvider,
}

impl Mems {
    /// Initialises a fresh `Mems`: allocates both metadata arenas and
    /// the sentinel main node. Must be called once before any other
    /// operation; there is no implicit global instance.
    pub fn init() -> Self {
        Self::init_with_provider(page_provider::default_provider())
    }

    /// As `init`, but against a caller-supplied page provider. Tests
    /// use this to swap in a fake provider instead of mapping real
    /// pages.
    pub fn init_with_provider(provider: &'static dyn PageProvider) -> Self {
        Mems {
            space: AddressSpace::new(provider, provider),
            provider,
        }
    }

    /// Attempts to allocate `size` bytes, returning a virtual handle.
    ///
    /// First-fit over existing holes; grows the address space by a
    /// fresh region when no hole is large enough. `size == 0` is a
    /// caller error, reported as `MemsError::InvalidSize` with the
    /// null handle and no change to the chain.
    #[ensures(ret.is_err() -> old(self.chain_fingerprint()) == self.chain_fingerprint(),
              "A rejected malloc never mutates the chain.")]
    pub fn malloc(&mut self, size: usize) -> Result<usize, MemsError> {
        if size == 0 {
            log::warn!("mems: malloc(0) rejected");
            return Err(MemsError::InvalidSize);
        }

        if let Some(hole) = self.space.find_first_fit(size) {
            let handle = self.space.split_hole(hole, size);
            log::debug!("mems: malloc({}) reused hole, handle={}", size, handle);
            return Ok(handle);
        }

        let page_size = self.provider.page_size();
        let num_pages = (size + page_size - 1) / page_size;

        let p_addr = match self.provider.acquire(num_pages) {
            Some(addr) => addr,
            None => {
                log::error!("mems: page provider failed acquiring {} pages", num_pages);
                panic!("mems: page provider failure during malloc");
            }
        };

        let main = self.space.append_region(num_pages, p_addr, page_size);
        self.space.install_initial_segments(main, size);
        let handle = self.space.main(main).v_start;

        log::debug!(
            "mems: malloc({}) grew by {} pages, handle={}",
            size,
            num_pages,
            handle
        );
        Ok(handle)
    }

    /// Translates a virtual handle (or any in-bounds interior address)
    /// to a machine pointer, recomputed on demand. Returns `None` if
    /// the address lies in a hole, or outside the map entirely.
    pub fn translate(&self, v_ptr: usize) -> Option<usize> {
        let seg = self.space.find_containing(v_ptr)?;
        let node = self.space.sub(seg);
        if node.kind == SegKind::Process {
            Some(node.p_addr + (v_ptr - node.v_start))
        } else {
            None
        }
    }

    /// Frees the segment starting exactly at `v_ptr`, flips it to a
    /// `Hole`, and coalesces it with any adjacent holes. A `v_ptr` of
    /// `NULL_HANDLE` is a no-op. Freeing an address that doesn't match
    /// a live `Process` segment's start is reported as
    /// `MemsError::UnknownAddress` and otherwise ignored.
    pub fn free(&mut self, v_ptr: usize) -> Result<(), MemsError> {
        if v_ptr == NULL_HANDLE {
            return Ok(());
        }

        match self.space.find_process_start(v_ptr) {
            Some(seg) => {
                self.space.mark_hole(seg);
                self.space.coalesce_around(seg);
                log::debug!("mems: free({}) ok", v_ptr);
                Ok(())
            }
            None => {
                log::warn!("mems: free({}) — no such address", v_ptr);
                Err(MemsError::UnknownAddress)
            }
        }
    }

    /// Releases every backing region to the page provider and resets
    /// the address-space map to empty. Metadata arenas are not
    /// released: their lifetime is the process, not any one `Mems`.
    pub fn finish(&mut self) {
        let provider = self.provider;
        self.space.finish(|p_addr, num_pages| provider.release(p_addr, num_pages));
        log::debug!("mems: finish — all regions released");
    }

    /// Writes a one-line-per-region rendering of the chain to
    /// standard output, followed by summary statistics. The exact
    /// textual format is part of the external contract: tests compare
    /// it verbatim, so field order and wording must not change.
    pub fn print_stats(&self) {
        let mains = self.space.main_chain();
        if mains.is_empty() {
            println!("MeMS Status: No pages allocated.");
            return;
        }

        let mut pages_used = 0usize;
        let mut hole_bytes = 0usize;
        let mut sub_chain_lengths = Vec::with_capacity(mains.len());

        for main in &mains {
            let node = self.space.main(*main);
            pages_used += node.num_pages;

            print!("MAIN[{}:{}]-> ", node.v_start, node.v_end);
            let subs = self.space.sub_chain(*main);
            for sub in &subs {
                let seg = self.space.sub(*sub);
                match seg.kind {
                    SegKind::Hole => {
                        hole_bytes += seg.size;
                        print!("H[{}:{}]({}) <-> ", seg.v_start, seg.v_end, seg.size);
                    }
                    SegKind::Process => {
                        print!("P[{}:{}]({}) <-> ", seg.v_start, seg.v_end, seg.size);
                    }
                }
            }
            println!("NULL");
            sub_chain_lengths.push(subs.len());
        }

        println!("Pages used: {}", pages_used);
        println!("Space unused: {} bytes", hole_bytes);
        println!("Main chain length: {}", mains.len());
        print!("Sub chain lengths: [");
        for (i, len) in sub_chain_lengths.iter().enumerate() {
            if i > 0 {
                print!(", ");
            }
            print!("{}", len);
        }
        println!("]");
    }

    /// A cheap summary of the chain's shape, used only to assert that
    /// rejected operations leave the chain untouched.
    #[cfg(any(
        all(test, feature = "check_contracts_in_tests"),
        feature = "check_contracts"
    ))]
    fn chain_fingerprint(&self) -> Vec<(usize, usize, usize)> {
        self.space
            .main_chain()
            .iter()
            .map(|m| {
                let node = self.space.main(*m);
                (node.v_start, node.v_end, self.space.sub_chain(*m).len())
            })
            .collect()
    }
}

static_assertions::const_assert!(P > 0 && (P & (P - 1)) == 0);


#[cfg(test)]
impl Mems {
    /// Walks the whole chain and panics if I1–I5 don't hold: sub-chains
    /// tile their region with no gaps or overlaps, no two adjacent
    /// segments are both `Hole`, and main ranges are strictly
    /// increasing and disjoint.
    fn check_invariants(&self) {
        let mains = self.space.main_chain();
        let mut prev_main_end: Option<usize> = None;

        for m in &mains {
            let node = self.space.main(*m);
            if let Some(end) = prev_main_end {
                assert!(node.v_start > end, "main chain ranges must be disjoint and increasing");
            }
            prev_main_end = Some(node.v_end);

            let subs = self.space.sub_chain(*m);
            assert!(!subs.is_empty(), "a region always has at least one segment");

            let mut expect_start = node.v_start;
            let mut prev_kind: Option<SegKind> = None;
            for s in &subs {
                let seg = self.space.sub(*s);
                assert_eq!(seg.v_start, expect_start, "sub-chain must tile the region with no gaps");
                assert_eq!(seg.v_end - seg.v_start + 1, seg.size, "size must match the v_start/v_end span");
                if prev_kind == Some(SegKind::Hole) {
                    assert_ne!(seg.kind, SegKind::Hole, "adjacent holes must already be coalesced");
                }
                expect_start = seg.v_end + 1;
                prev_kind = Some(seg.kind);
            }
            assert_eq!(expect_start, node.v_end + 1, "sub-chain must cover the whole region");
        }
    }
}

#[cfg(test)]
mod property {
    use super::*;
    use crate::page_provider::test_support::FakeProvider;
    use proptest::collection::vec;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        Malloc(usize),
        Free(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1usize..800).prop_map(Op::Malloc),
            (0usize..64).prop_map(Op::Free),
        ]
    }

    proptest! {
        // P1, P2, P3: whatever order allocations and frees arrive in,
        // the chain's structural invariants hold after every step.
        #[test]
        fn random_malloc_free_preserves_chain_invariants(ops in vec(op_strategy(), 1..80)) {
            let provider: &'static FakeProvider = Box::leak(Box::new(FakeProvider::new(P)));
            let mut mems = Mems::init_with_provider(provider);
            let mut live: Vec<usize> = Vec::new();

            for op in ops {
                match op {
                    Op::Malloc(size) => {
                        if let Ok(h) = mems.malloc(size) {
                            live.push(h);
                        }
                    }
                    Op::Free(pick) => {
                        if !live.is_empty() {
                            let idx = pick % live.len();
                            let h = live.swap_remove(idx);
                            mems.free(h).unwrap();
                        }
                    }
                }
                mems.check_invariants();
            }
        }

        // P4: a live handle translates consistently across its whole span.
        // P5/P6: once freed, its start is a Hole of at least the freed
        // size, and no Process segment claims any address in its range.
        #[test]
        fn translate_holds_while_live_and_free_restores_a_hole(size in 1usize..2000) {
            let provider: &'static FakeProvider = Box::leak(Box::new(FakeProvider::new(P)));
            let mut mems = Mems::init_with_provider(provider);

            let h = mems.malloc(size).unwrap();
            let base = mems.translate(h).unwrap();
            for k in [0usize, size / 2, size - 1] {
                prop_assert_eq!(mems.translate(h + k), Some(base + k));
            }

            mems.free(h).unwrap();
            prop_assert!(mems.space.find_process_start(h).is_none());

            let hole = mems.space.find_containing(h).unwrap();
            prop_assert_eq!(mems.space.sub(hole).kind, SegKind::Hole);
            prop_assert!(mems.space.sub(hole).size >= size);
        }

        // P7: running coalesce_around a second time on an already-settled
        // hole changes nothing.
        #[test]
        fn coalesce_around_is_idempotent(a_size in 1usize..500, b_size in 1usize..500) {
            let provider: &'static FakeProvider = Box::leak(Box::new(FakeProvider::new(P)));
            let mut mems = Mems::init_with_provider(provider);

            let a = mems.malloc(a_size).unwrap();
            let _b = mems.malloc(b_size).unwrap();
            mems.free(a).unwrap();

            let seg = mems.space.find_containing(a).unwrap();
            let before = (
                mems.space.sub(seg).v_start,
                mems.space.sub(seg).v_end,
                mems.space.sub(seg).size,
            );
            mems.space.coalesce_around(seg);
            let after = (
                mems.space.sub(seg).v_start,
                mems.space.sub(seg).v_end,
                mems.space.sub(seg).size,
            );
            prop_assert_eq!(before, after);
        }
    }
}
