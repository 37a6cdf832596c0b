//! The address-space map: the circular main chain of backing regions
//! and, within each, the linear sub-chain of segments.
//!
//! As the design notes call out, main and sub nodes live in
//! `BumpArena`s and refer to each other by index rather than by raw
//! pointer. That sidesteps the ownership cycles a `next`/`prev`
//! pointer pair would otherwise create in safe Rust, while keeping
//! the splice operations the algorithm needs `O(1)`.
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

use crate::arena::BumpArena;
use crate::page_provider::PageProvider;
use crate::BASE;

/// Index of a `MainNode` inside its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainIdx(usize);

/// Index of a `SubNode` inside its arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubIdx(usize);

/// Whether a segment is occupied or free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegKind {
    Hole,
    Process,
}

/// One backing region obtained from the page provider.
#[derive(Debug)]
pub struct MainNode {
    pub num_pages: usize,
    pub p_addr: usize,
    pub v_start: usize,
    pub v_end: usize,
    pub sub_head: Option<SubIdx>,
    pub next: MainIdx,
    pub prev: MainIdx,
}

/// One segment — occupied or free — within a region's sub-chain.
#[derive(Debug)]
pub struct SubNode {
    pub kind: SegKind,
    pub size: usize,
    pub p_addr: usize,
    pub v_start: usize,
    pub v_end: usize,
    pub next: Option<SubIdx>,
    pub prev: Option<SubIdx>,
}

/// The two-level chain plus the sentinel main node that terminates
/// the circle. `sentinel` never changes after construction: its slot
/// in the main arena is reused across `finish`, since `finish` only
/// resets its links rather than discarding it.
pub struct AddressSpace {
    mains: BumpArena<MainNode>,
    subs: BumpArena<SubNode>,
    sentinel: MainIdx,
}

impl AddressSpace {
    pub fn new(main_provider: &'static dyn PageProvider, sub_provider: &'static dyn PageProvider) -> Self {
        let mut mains: BumpArena<MainNode> = BumpArena::new(main_provider);
        let subs: BumpArena<SubNode> = BumpArena::new(sub_provider);

        let idx = mains.alloc(MainNode {
            num_pages: 0,
            p_addr: 0,
            v_start: BASE,
            v_end: BASE - 1,
            sub_head: None,
            next: MainIdx(0),
            prev: MainIdx(0),
        });
        let sentinel = MainIdx(idx);
        {
            let node = mains.get_mut(idx);
            node.next = sentinel;
            node.prev = sentinel;
        }

        AddressSpace {
            mains,
            subs,
            sentinel,
        }
    }

    pub fn sentinel(&self) -> MainIdx {
        self.sentinel
    }

    pub fn main(&self, idx: MainIdx) -> &MainNode {
        self.mains.get(idx.0)
    }

    fn main_mut(&mut self, idx: MainIdx) -> &mut MainNode {
        self.mains.get_mut(idx.0)
    }

    pub fn sub(&self, idx: SubIdx) -> &SubNode {
        self.subs.get(idx.0)
    }

    fn sub_mut(&mut self, idx: SubIdx) -> &mut SubNode {
        self.subs.get_mut(idx.0)
    }

    /// Real (non-sentinel) main nodes, in traversal order. I4 requires
    /// this order to be strictly increasing in virtual address, which
    /// holds because `append_region` always links new regions in
    /// just before the sentinel.
    pub fn main_chain(&self) -> Vec<MainIdx> {
        let mut out = Vec::new();
        let mut cur = self.main(self.sentinel).next;
        while cur != self.sentinel {
            out.push(cur);
            cur = self.main(cur).next;
        }
        out
    }

    /// The segments of one region's sub-chain, head to tail.
    pub fn sub_chain(&self, main: MainIdx) -> Vec<SubIdx> {
        let mut out = Vec::new();
        let mut cur = self.main(main).sub_head;
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.sub(idx).next;
        }
        out
    }

    /// Creates a new main node whose virtual range begins one byte
    /// past the current last region's `v_end` (or at `BASE` when the
    /// chain is empty) and spans `num_pages * page_size` bytes. Links
    /// it in just before the sentinel. Installs no sub-chain.
    #[requires(num_pages > 0)]
    pub fn append_region(&mut self, num_pages: usize, p_addr: usize, page_size: usize) -> MainIdx {
        let last = self.main(self.sentinel).prev;
        let v_start = if last == self.sentinel {
            BASE
        } else {
            self.main(last).v_end + 1
        };
        let v_end = v_start + num_pages * page_size - 1;

        let idx = MainIdx(self.mains.alloc(MainNode {
            num_pages,
            p_addr,
            v_start,
            v_end,
            sub_head: None,
            next: self.sentinel,
            prev: last,
        }));

        self.main_mut(last).next = idx;
        self.main_mut(self.sentinel).prev = idx;
        idx
    }

    /// Installs `main`'s sub-chain: a `Process` segment of `size`
    /// bytes at the region's base, followed, if `size` is less than
    /// the region's total byte count, by a trailing `Hole`.
    pub fn install_initial_segments(&mut self, main: MainIdx, size: usize) {
        let node = self.main(main);
        let p_addr = node.p_addr;
        let v_start = node.v_start;
        let region_bytes = node.v_end - node.v_start + 1;

        let process_idx = SubIdx(self.subs.alloc(SubNode {
            kind: SegKind::Process,
            size,
            p_addr,
            v_start,
            v_end: v_start + size - 1,
            next: None,
            prev: None,
        }));

        if size < region_bytes {
            let hole_idx = SubIdx(self.subs.alloc(SubNode {
                kind: SegKind::Hole,
                size: region_bytes - size,
                p_addr: p_addr + size,
                v_start: v_start + size,
                v_end: self.main(main).v_end,
                next: None,
                prev: Some(process_idx),
            }));
            self.sub_mut(process_idx).next = Some(hole_idx);
        }

        self.main_mut(main).sub_head = Some(process_idx);
    }

    /// Splits `seg` (which must be a `Hole` with `size >= request`)
    /// into a leading `Process` segment of `request` bytes and,
    /// if any bytes remain, a trailing `Hole`. Returns the
    /// `Process` segment's starting virtual address.
    #[requires(self.sub(seg).kind == SegKind::Hole)]
    #[requires(self.sub(seg).size >= request)]
    pub fn split_hole(&mut self, seg: SubIdx, request: usize) -> usize {
        let original_size = self.sub(seg).size;
        let v_start = self.sub(seg).v_start;

        if original_size == request {
            self.sub_mut(seg).kind = SegKind::Process;
            return v_start;
        }

        let original_v_end = self.sub(seg).v_end;
        let original_next = self.sub(seg).next;
        let original_p_addr = self.sub(seg).p_addr;

        {
            let node = self.sub_mut(seg);
            node.kind = SegKind::Process;
            node.size = request;
            node.v_end = v_start + request - 1;
        }

        let hole_idx = SubIdx(self.subs.alloc(SubNode {
            kind: SegKind::Hole,
            size: original_size - request,
            p_addr: original_p_addr + request,
            v_start: v_start + request,
            v_end: original_v_end,
            next: original_next,
            prev: Some(seg),
        }));

        self.sub_mut(seg).next = Some(hole_idx);
        if let Some(next_idx) = original_next {
            self.sub_mut(next_idx).prev = Some(hole_idx);
        }

        v_start
    }

    /// Restores I5 around a freshly-freed `Hole`: merges forward
    /// `Hole` neighbours into `seg`, then merges `seg` (and anything
    /// already absorbed into it) backward into a `Hole` predecessor.
    #[requires(self.sub(seg).kind == SegKind::Hole)]
    pub fn coalesce_around(&mut self, seg: SubIdx) {
        loop {
            let next = self.sub(seg).next;
            let next_is_hole = next.map_or(false, |n| self.sub(n).kind == SegKind::Hole);
            if !next_is_hole {
                break;
            }
            let next = next.unwrap();

            let (next_size, next_v_end, next_next) =
                (self.sub(next).size, self.sub(next).v_end, self.sub(next).next);
            {
                let node = self.sub_mut(seg);
                node.size += next_size;
                node.v_end = next_v_end;
                node.next = next_next;
            }
            if let Some(nn) = next_next {
                self.sub_mut(nn).prev = Some(seg);
            }
        }

        let mut seg = seg;
        loop {
            let prev = self.sub(seg).prev;
            let prev_is_hole = prev.map_or(false, |p| self.sub(p).kind == SegKind::Hole);
            if !prev_is_hole {
                break;
            }
            let prev = prev.unwrap();

            let (seg_size, seg_v_end, seg_next) =
                (self.sub(seg).size, self.sub(seg).v_end, self.sub(seg).next);
            {
                let node = self.sub_mut(prev);
                node.size += seg_size;
                node.v_end = seg_v_end;
                node.next = seg_next;
            }
            if let Some(nn) = seg_next {
                self.sub_mut(nn).prev = Some(prev);
            }
            seg = prev;
        }
    }

    /// First-fit search: the first `Hole` at least `size` bytes large,
    /// scanning main nodes from the sentinel's `next` forward and, for
    /// each, the sub-chain from its head.
    pub fn find_first_fit(&self, size: usize) -> Option<SubIdx> {
        for main in self.main_chain() {
            for sub in self.sub_chain(main) {
                let node = self.sub(sub);
                if node.kind == SegKind::Hole && node.size >= size {
                    return Some(sub);
                }
            }
        }
        None
    }

    /// Finds the segment containing `v_ptr`, if any. The outer
    /// main-node range check is an early-exit optimisation only;
    /// correctness depends solely on the inner sub-chain scan.
    pub fn find_containing(&self, v_ptr: usize) -> Option<SubIdx> {
        for main in self.main_chain() {
            let node = self.main(main);
            if v_ptr < node.v_start || v_ptr > node.v_end {
                continue;
            }
            for sub in self.sub_chain(main) {
                let seg = self.sub(sub);
                if v_ptr >= seg.v_start && v_ptr <= seg.v_end {
                    return Some(sub);
                }
            }
        }
        None
    }

    /// Finds the `Process` segment whose `v_start` exactly equals
    /// `v_ptr`. Only segments keyed by their exact starting handle may
    /// be freed.
    pub fn find_process_start(&self, v_ptr: usize) -> Option<SubIdx> {
        for main in self.main_chain() {
            for sub in self.sub_chain(main) {
                let seg = self.sub(sub);
                if seg.v_start == v_ptr && seg.kind == SegKind::Process {
                    return Some(sub);
                }
            }
        }
        None
    }

    pub fn mark_hole(&mut self, seg: SubIdx) {
        self.sub_mut(seg).kind = SegKind::Hole;
    }

    /// Walks the main chain, handing each real region's `(p_addr,
    /// num_pages)` to `release_one`, then resets the sentinel to an
    /// empty circle. Metadata arenas are untouched: their lifetime is
    /// the process, not any one `AddressSpace`.
    pub fn finish(&mut self, mut release_one: impl FnMut(usize, usize)) {
        for main in self.main_chain() {
            let node = self.main(main);
            release_one(node.p_addr, node.num_pages);
        }

        let s = self.sentinel;
        let node = self.main_mut(s);
        node.next = s;
        node.prev = s;
    }
}
