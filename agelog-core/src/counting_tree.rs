//! Positional prefix-sum tree for weighted vertex sampling.
//!
//! A fixed-size B-ary tree over N slots of non-negative counts. Point
//! updates and rank searches both cost O(B·log_B N). The generator
//! keeps one slot per vertex holding its sampling frequency and draws
//! endpoints by searching a uniform rank in `[0, total_count())`.
//!
//! Storage is a single contiguous array laid out breadth-first by
//! subtree: each internal node contributes B partial-sum cells followed
//! by the storage of its child subtrees in order. The rightmost node of
//! every level may have fewer than B populated children; a per-level
//! descriptor records the populated slot count and the height of the
//! rightmost child subtree, which keeps both descent paths exact for
//! slot counts that are not powers of B.

use std::fmt;

use thiserror::Error;

/// Maximum tree height; with the default fanout the tree indexes up to
/// 64^8 slots.
pub const MAX_HEIGHT: usize = 8;

/// Default node fanout.
pub const DEFAULT_FANOUT: u64 = 64;

/// Errors raised by [`CountingTree`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum CountingTreeError {
    /// The fanout was smaller than the minimum of two.
    #[error("fanout must be at least 2 (got {fanout})")]
    InvalidFanout { fanout: u64 },
    /// The slot count cannot be indexed within [`MAX_HEIGHT`] levels.
    #[error("{num_entries} slots exceed the maximum indexable capacity")]
    CapacityExceeded { num_entries: u64 },
    /// The addressed slot does not exist.
    #[error("slot {position} is out of bounds for a tree of {len} slots")]
    PositionOutOfBounds { position: u64, len: u64 },
    /// A negative value was assigned to a slot.
    #[error("slot values must be non-negative (got {value})")]
    NegativeValue { value: i64 },
    /// A subtraction would drive a slot below zero.
    #[error("subtracting {delta} from slot value {current} would go negative")]
    Underflow { current: i64, delta: i64 },
    /// The searched rank is not covered by the cumulative total.
    #[error("rank {rank} is outside the cumulative total {total}")]
    RankOutOfRange { rank: i64, total: i64 },
    /// The backing storage could not be allocated.
    #[error("cannot allocate {cells} tree cells")]
    Allocation { cells: usize },
}

#[derive(Clone, Copy)]
enum UpdateKind {
    Set,
    SetIfUnset,
    Add,
    Subtract,
}

/// Geometry of the subtrees rooted at one level. `span` and `cells`
/// describe a regular subtree of height `level + 1`; the `rightmost_*`
/// fields are only meaningful for levels on the rightmost path.
#[derive(Clone, Copy, Default)]
struct LevelInfo {
    /// Slots covered by a regular subtree of this height (B^h).
    span: u64,
    /// Storage cells occupied by a regular subtree of this height.
    cells: u64,
    /// Populated child slots in the rightmost node of this height.
    rightmost_len: u64,
    /// Height of the rightmost child subtree of that node.
    rightmost_height: usize,
}

/// A weighted positional counting tree.
///
/// Not thread safe; the generator owns it exclusively.
///
/// # Examples
/// ```
/// use agelog_core::CountingTree;
///
/// let mut tree = CountingTree::with_fanout(4, 4)?;
/// tree.set(0, 2)?;
/// tree.set(2, 3)?;
/// assert_eq!(tree.total_count(), 5);
/// assert_eq!(tree.search(1)?, 0);
/// assert_eq!(tree.search(2)?, 2);
/// # Ok::<(), agelog_core::CountingTreeError>(())
/// ```
pub struct CountingTree {
    fanout: u64,
    num_entries: u64,
    height: usize,
    total: i64,
    cells: Vec<i64>,
    levels: [LevelInfo; MAX_HEIGHT],
}

impl CountingTree {
    /// Creates a tree over `num_entries` slots with the default fanout.
    ///
    /// # Errors
    /// Returns [`CountingTreeError::CapacityExceeded`] when the slot
    /// count cannot be indexed, or [`CountingTreeError::Allocation`]
    /// when the backing storage cannot be reserved.
    pub fn new(num_entries: u64) -> Result<Self, CountingTreeError> {
        Self::with_fanout(num_entries, DEFAULT_FANOUT)
    }

    /// Creates a tree over `num_entries` slots with an explicit fanout.
    ///
    /// # Errors
    /// Additionally returns [`CountingTreeError::InvalidFanout`] when
    /// `fanout < 2`.
    pub fn with_fanout(num_entries: u64, fanout: u64) -> Result<Self, CountingTreeError> {
        if fanout < 2 {
            return Err(CountingTreeError::InvalidFanout { fanout });
        }

        let mut tree = Self {
            fanout,
            num_entries,
            height: 0,
            total: 0,
            cells: Vec::new(),
            levels: [LevelInfo::default(); MAX_HEIGHT],
        };
        if num_entries == 0 {
            return Ok(tree);
        }

        tree.height = height_for(num_entries, fanout)
            .ok_or(CountingTreeError::CapacityExceeded { num_entries })?;

        let mut span = 1_u64;
        let mut cells = 0_u64;
        for level in 0..tree.height {
            span *= fanout;
            cells += span;
            tree.levels[level].span = span;
            tree.levels[level].cells = cells;
        }

        tree.init_rightmost_path(num_entries);

        let size = tree.levels[tree.height - 1].cells as usize;
        tree.cells
            .try_reserve_exact(size)
            .map_err(|_| CountingTreeError::Allocation { cells: size })?;
        tree.cells.resize(size, 0);
        Ok(tree)
    }

    /// Walks the rightmost path from the root down, recording at each
    /// visited level how many child slots its rightmost node populates
    /// and how tall that node's own rightmost child is. A remainder of
    /// zero means the rightmost child is a full regular subtree, so the
    /// walk continues with height − 1 over the child's full span.
    fn init_rightmost_path(&mut self, num_entries: u64) {
        let mut remaining = num_entries;
        let mut height = self.height;
        while height > 0 {
            let child_span = if height >= 2 {
                self.levels[height - 2].span
            } else {
                1
            };
            let full_children = remaining / child_span;
            let partial = remaining % child_span;
            self.levels[height - 1].rightmost_len = full_children + u64::from(partial != 0);
            if height == 1 {
                self.levels[0].rightmost_height = 0;
                break;
            }
            if partial > 0 {
                let child_height = height_for(partial, self.fanout)
                    .expect("a remainder is smaller than the parent span");
                self.levels[height - 1].rightmost_height = child_height;
                remaining = partial;
                height = child_height;
            } else {
                self.levels[height - 1].rightmost_height = height - 1;
                remaining = child_span;
                height -= 1;
            }
        }
    }

    /// Returns the number of indexed slots.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.num_entries
    }

    /// Returns whether the tree indexes no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Returns the sum of all slot values.
    #[must_use]
    pub fn total_count(&self) -> i64 {
        self.total
    }

    /// Assigns `value` to the slot, returning the previous value.
    ///
    /// # Errors
    /// Fails when the position is out of bounds or `value` is negative.
    pub fn set(&mut self, position: u64, value: i64) -> Result<i64, CountingTreeError> {
        self.update(position, value, UpdateKind::Set)
    }

    /// Assigns `value` only when the slot currently holds zero; returns
    /// the previous value either way.
    ///
    /// # Errors
    /// Fails when the position is out of bounds.
    pub fn set_if_unset(&mut self, position: u64, value: i64) -> Result<i64, CountingTreeError> {
        self.update(position, value, UpdateKind::SetIfUnset)
    }

    /// Adds `delta` to the slot, returning the previous value.
    ///
    /// # Errors
    /// Fails when the position is out of bounds.
    pub fn add(&mut self, position: u64, delta: i64) -> Result<i64, CountingTreeError> {
        self.update(position, delta, UpdateKind::Add)
    }

    /// Subtracts `delta` from the slot, returning the previous value.
    ///
    /// # Errors
    /// Fails when the position is out of bounds or the slot would go
    /// negative.
    pub fn subtract(&mut self, position: u64, delta: i64) -> Result<i64, CountingTreeError> {
        self.update(position, delta, UpdateKind::Subtract)
    }

    /// Resets the slot to zero, returning the previous value.
    ///
    /// # Errors
    /// Fails when the position is out of bounds.
    pub fn unset(&mut self, position: u64) -> Result<i64, CountingTreeError> {
        self.set(position, 0)
    }

    /// Returns the first slot index whose cumulative prefix sum exceeds
    /// `rank`.
    ///
    /// Ties break to the leftmost qualifying slot; zero-valued slots
    /// are never returned.
    ///
    /// # Errors
    /// Fails unless `0 ≤ rank < total_count()`.
    pub fn search(&self, rank: i64) -> Result<u64, CountingTreeError> {
        if rank < 0 || rank >= self.total {
            return Err(CountingTreeError::RankOutOfRange {
                rank,
                total: self.total,
            });
        }

        let fanout = self.fanout as usize;
        let mut remaining = rank;
        let mut base = 0_usize;
        let mut offset = 0_u64;
        let mut height = self.height;
        let mut rightmost = true;

        while height > 0 {
            let (child_span, child_cells) = if height >= 2 {
                (
                    self.levels[height - 2].span,
                    self.levels[height - 2].cells as usize,
                )
            } else {
                (1, 1)
            };
            let node_len = if rightmost {
                self.levels[height - 1].rightmost_len as usize
            } else {
                fanout
            };

            let mut child = 0_usize;
            let mut prefix = 0_i64;
            while remaining >= prefix + self.cells[base + child] {
                prefix += self.cells[base + child];
                child += 1;
                // Empty subtrees are skipped outright; remaining < total
                // of the unvisited cells guarantees a non-zero cell ahead.
                while self.cells[base + child] == 0 {
                    child += 1;
                }
            }
            debug_assert!(child < node_len, "search overran the node boundary");

            rightmost = rightmost && child == node_len - 1;
            base += fanout + child * child_cells;
            remaining -= prefix;
            offset += child as u64 * child_span;
            height = if rightmost {
                self.levels[height - 1].rightmost_height
            } else {
                height - 1
            };
        }

        Ok(offset)
    }

    fn update(
        &mut self,
        position: u64,
        value: i64,
        kind: UpdateKind,
    ) -> Result<i64, CountingTreeError> {
        if position >= self.num_entries {
            return Err(CountingTreeError::PositionOutOfBounds {
                position,
                len: self.num_entries,
            });
        }
        let (diff, previous) = self.update_rec(0, self.height, true, position, value, kind)?;
        self.total += diff;
        Ok(previous)
    }

    /// Descends to the leaf, applies the update there, and adds the
    /// resulting delta to the selected child's partial sum on the way
    /// back up. Returns `(delta, previous leaf value)`.
    fn update_rec(
        &mut self,
        base: usize,
        height: usize,
        rightmost: bool,
        position: u64,
        value: i64,
        kind: UpdateKind,
    ) -> Result<(i64, i64), CountingTreeError> {
        debug_assert!(height > 0, "descent must stop at the leaf level");
        if height == 1 {
            return self.update_slot(base + position as usize, value, kind);
        }

        let child_span = self.levels[height - 2].span;
        let child_cells = self.levels[height - 2].cells as usize;
        let child = (position / child_span) as usize;
        let node_len = if rightmost {
            self.levels[height - 1].rightmost_len as usize
        } else {
            self.fanout as usize
        };
        debug_assert!(child < node_len);

        let child_rightmost = rightmost && child == node_len - 1;
        let child_height = if child_rightmost {
            self.levels[height - 1].rightmost_height
        } else {
            height - 1
        };
        let child_base = base + self.fanout as usize + child * child_cells;
        let child_position = position - child as u64 * child_span;

        let (diff, previous) =
            self.update_rec(child_base, child_height, child_rightmost, child_position, value, kind)?;
        self.cells[base + child] += diff;
        Ok((diff, previous))
    }

    fn update_slot(
        &mut self,
        index: usize,
        value: i64,
        kind: UpdateKind,
    ) -> Result<(i64, i64), CountingTreeError> {
        let previous = self.cells[index];
        let diff = match kind {
            UpdateKind::Set => {
                if value < 0 {
                    return Err(CountingTreeError::NegativeValue { value });
                }
                self.cells[index] = value;
                value - previous
            }
            UpdateKind::SetIfUnset => {
                if previous == 0 {
                    self.cells[index] = value;
                    value
                } else {
                    0
                }
            }
            UpdateKind::Add => {
                self.cells[index] += value;
                value
            }
            UpdateKind::Subtract => {
                if previous < value {
                    return Err(CountingTreeError::Underflow {
                        current: previous,
                        delta: value,
                    });
                }
                self.cells[index] -= value;
                -value
            }
        };
        Ok((diff, previous))
    }
}

impl fmt::Debug for CountingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingTree")
            .field("fanout", &self.fanout)
            .field("num_entries", &self.num_entries)
            .field("height", &self.height)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Smallest height h ≥ 1 with fanout^h ≥ n, or `None` past [`MAX_HEIGHT`].
fn height_for(n: u64, fanout: u64) -> Option<usize> {
    let mut height = 1_usize;
    let mut span = fanout;
    while span < n {
        height += 1;
        if height > MAX_HEIGHT {
            return None;
        }
        span = span.checked_mul(fanout)?;
    }
    Some(height)
}
