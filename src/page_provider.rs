//! The page provider capability: the abstract boundary between `Mems`
//! and whatever actually owns address space on this machine.
//!
//! This mirrors the role `slitter`'s `mill::Mapper` / `mapper::Mapper`
//! traits play there: a small `Sync` trait object that the allocator
//! and its metadata arenas are parameterised on, so tests can swap in
//! a fake provider instead of mapping real pages.
use crate::P;

/// Supplies page-aligned, zeroed, readable-writable regions in
/// multiples of `page_size()`, and releases them.
///
/// Implementations may assume every `release` call's `(base, pages)`
/// pair exactly matches an earlier `acquire` call's return value and
/// argument: `Mems` never splits or merges regions at the provider
/// level, only within its own address-space map.
pub trait PageProvider: std::fmt::Debug + Sync {
    /// The provider's page size, in bytes. `Mems` always requests
    /// whole multiples of this value.
    fn page_size(&self) -> usize;

    /// Attempts to acquire `pages` page-sized, zero-filled pages.
    /// Returns the region's base address on success.
    fn acquire(&self, pages: usize) -> Option<usize>;

    /// Releases a region previously obtained from `acquire` with the
    /// same `pages` count. Must be called at most once per region.
    fn release(&self, base: usize, pages: usize);
}

/// The default provider: anonymous, private `mmap`/`munmap` regions.
#[derive(Debug)]
pub struct OsPageProvider;

impl PageProvider for OsPageProvider {
    fn page_size(&self) -> usize {
        P
    }

    fn acquire(&self, pages: usize) -> Option<usize> {
        let len = pages.checked_mul(self.page_size())?;
        if len == 0 {
            return None;
        }

        // Safety: a fixed-size, fully self-contained anonymous
        // mapping request; the kernel either returns fresh
        // zero-filled pages or MAP_FAILED, and we handle both.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            None
        } else {
            Some(ptr as usize)
        }
    }

    fn release(&self, base: usize, pages: usize) {
        let len = pages * self.page_size();

        // Safety: `base`/`len` are assumed, per the trait's contract,
        // to exactly match an earlier successful `acquire`.
        let ret = unsafe { libc::munmap(base as *mut libc::c_void, len) };
        if ret != 0 {
            log::error!("munmap failed for base={:#x} len={}", base, len);
        }
    }
}

/// Returns the process-wide default `PageProvider`.
pub fn default_provider() -> &'static dyn PageProvider {
    lazy_static::lazy_static! {
        static ref PROVIDER: OsPageProvider = OsPageProvider;
    }

    &*PROVIDER
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::PageProvider;
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A `PageProvider` that never talks to the kernel: it hands out
    /// addresses from a private bump counter, tracks which ranges are
    /// currently "live" so tests can assert `release` is called
    /// exactly once per region, and can be told to start failing.
    #[derive(Debug)]
    pub struct FakeProvider {
        page_size: usize,
        next: Cell<usize>,
        live: Mutex<HashSet<usize>>,
        fail: Cell<bool>,
        release_count: Cell<usize>,
    }

    // Only ever touched from a single test thread at a time; Cell is
    // fine and Sync is required solely to satisfy the trait bound.
    unsafe impl Sync for FakeProvider {}

    impl FakeProvider {
        pub fn new(page_size: usize) -> Self {
            FakeProvider {
                page_size,
                next: Cell::new(page_size), // never hand out address 0
                live: Mutex::new(HashSet::new()),
                fail: Cell::new(false),
                release_count: Cell::new(0),
            }
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.set(fail);
        }

        /// Number of currently-live regions, counting *every* acquired
        /// range this provider has handed out — including the metadata
        /// arenas' own pages, not just user regions obtained through
        /// `Mems::malloc`'s growth path. Callers that need to reason
        /// about user regions specifically should use
        /// `release_count()` instead, since arena pages are never
        /// released.
        pub fn live_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }

        /// Number of `release` calls observed so far. Unlike
        /// `live_count`, this is unambiguous: only real backing
        /// regions are ever released (arena pages live for the
        /// process's whole lifetime), so this counts exactly the
        /// regions `Mems::finish` has torn down.
        pub fn release_count(&self) -> usize {
            self.release_count.get()
        }
    }

    impl PageProvider for FakeProvider {
        fn page_size(&self) -> usize {
            self.page_size
        }

        fn acquire(&self, pages: usize) -> Option<usize> {
            if self.fail.get() {
                return None;
            }

            let base = self.next.get();
            self.next.set(base + pages * self.page_size);
            self.live.lock().unwrap().insert(base);
            Some(base)
        }

        fn release(&self, base: usize, _pages: usize) {
            let removed = self.live.lock().unwrap().remove(&base);
            assert!(removed, "release of a region not currently live: {}", base);
            self.release_count.set(self.release_count.get() + 1);
        }
    }
}
