// A binary search tree over string keys, stored positionally: the children of
// slot i live at 2i+1 and 2i+2. Holes are explicit `None` slots.
//
// The "rotations" here swap a parent's value with one child's value and leave
// everything beneath them alone. Existing index files were built this way, so
// it's kept even though it can leave the tree out of order. Lookups never
// depend on the ordering (see `contains`).

use crate::error::{Error, Result};

fn left(index: usize) -> usize {
    2 * index + 1
}

fn right(index: usize) -> usize {
    2 * index + 2
}

// Child index for insert, where depth is only bounded by the caller's limit.
fn child(index: usize, side: usize) -> Option<usize> {
    index.checked_mul(2)?.checked_add(side)
}

fn parent(index: usize) -> Option<usize> {
    if index == 0 {
        None
    } else {
        Some((index - 1) / 2)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTree {
    slots: Vec<Option<String>>,
}

impl SlotTree {
    pub fn new() -> Self {
        SlotTree { slots: Vec::new() }
    }

    pub fn from_slots(slots: Vec<Option<String>>) -> Self {
        SlotTree { slots }
    }

    pub fn slots(&self) -> &[Option<String>] {
        &self.slots
    }

    /// Number of slots, occupied or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True if no slot is occupied, however many there are.
    pub fn has_no_keys(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|s| s.as_deref())
    }

    /// Occupied slots in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|s| s.as_deref())
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        keys
    }

    pub fn height(&self, index: usize) -> usize {
        match self.get(index) {
            None => 0,
            Some(_) => 1 + std::cmp::max(self.height(left(index)), self.height(right(index))),
        }
    }

    pub fn balance_factor(&self, index: usize) -> isize {
        match self.get(index) {
            None => 0,
            Some(_) => self.height(left(index)) as isize - self.height(right(index)) as isize,
        }
    }

    fn swap_with(&mut self, index: usize, child: usize) -> bool {
        if self.get(child).is_none() || index >= self.slots.len() {
            return false;
        }
        self.slots.swap(index, child);
        true
    }

    /// Swaps the value at `index` with its left child's. No-op if the left
    /// child is missing.
    pub fn rotate_right(&mut self, index: usize) -> bool {
        self.swap_with(index, left(index))
    }

    /// Swaps the value at `index` with its right child's. No-op if the right
    /// child is missing.
    pub fn rotate_left(&mut self, index: usize) -> bool {
        self.swap_with(index, right(index))
    }

    /// Returns true if a rotation fired.
    pub fn rebalance(&mut self, index: usize) -> bool {
        if self.get(index).is_none() {
            return false;
        }

        let bf = self.balance_factor(index);
        if bf > 1 {
            if self.balance_factor(left(index)) < 0 {
                self.rotate_left(left(index));
            }
            self.rotate_right(index)
        } else if bf < -1 {
            if self.balance_factor(right(index)) > 0 {
                self.rotate_right(right(index));
            }
            self.rotate_left(index)
        } else {
            false
        }
    }

    /// Rebalances every slot from `index`'s parent up to the root, bottom-up.
    /// Returns the number of rotations that fired.
    pub fn rebalance_path(&mut self, index: usize) -> usize {
        let mut fired = 0;
        let mut cur = parent(index);
        while let Some(i) = cur {
            if self.rebalance(i) {
                fired += 1;
            }
            cur = parent(i);
        }
        fired
    }

    /// Places `key` in the first empty slot reached by descending from the
    /// root (left if smaller, right otherwise) and returns its index. Equal
    /// keys go right, so duplicates are stored again.
    ///
    /// Fails with `IndexTooDeep`, leaving the tree untouched, if that slot
    /// would be at or past `max_slots`.
    pub fn insert(&mut self, key: String, max_slots: usize) -> Result<usize> {
        let mut index = 0;
        while let Some(cur) = self.get(index) {
            let side = if key.as_str() < cur { 1 } else { 2 };
            index = child(index, side).ok_or(Error::IndexTooDeep {
                index: usize::MAX,
                max_slots,
            })?;
        }
        if index >= max_slots {
            return Err(Error::IndexTooDeep { index, max_slots });
        }

        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(key);
        Ok(index)
    }

    /// Set membership over the occupied slots. Doesn't trust the tree shape.
    pub fn contains(&self, key: &str) -> bool {
        self.sorted_keys().binary_search(&key).is_ok()
    }
}

#[cfg(test)]
fn tree_of(slots: &[&str]) -> SlotTree {
    SlotTree::from_slots(
        slots
            .iter()
            .map(|s| if s.is_empty() { None } else { Some(s.to_string()) })
            .collect(),
    )
}

#[cfg(test)]
const NO_LIMIT: usize = usize::MAX;

#[cfg(test)]
fn build(keys: &[&str]) -> SlotTree {
    let mut t = SlotTree::new();
    for k in keys {
        t.insert(k.to_string(), NO_LIMIT).unwrap();
        t.rebalance(0);
    }
    t
}

#[test]
fn test_height_and_balance() {
    let t = tree_of(&["m", "b", "", "a", "", "", "", "", ""]);
    assert_eq!(3, t.height(0));
    assert_eq!(2, t.height(1));
    assert_eq!(0, t.height(2));
    assert_eq!(0, t.height(100));
    assert_eq!(2, t.balance_factor(0));
    assert_eq!(1, t.balance_factor(1));
    assert_eq!(0, t.balance_factor(2));
    assert_eq!(0, t.balance_factor(100));
}

#[test]
fn test_insert_routes_by_order() {
    let mut t = SlotTree::new();
    assert!(t.is_empty());
    assert_eq!(0, t.insert("m".into(), NO_LIMIT).unwrap());
    assert_eq!(1, t.insert("b".into(), NO_LIMIT).unwrap());
    assert_eq!(2, t.insert("t".into(), NO_LIMIT).unwrap());
    assert_eq!(tree_of(&["m", "b", "t"]), t);

    // Equal keys route right.
    assert_eq!(6, t.insert("t".into(), NO_LIMIT).unwrap());
    assert_eq!(7, t.len());
}

#[test]
fn test_sorted_inserts_hit_the_slot_limit() {
    let mut t = SlotTree::new();
    for (k, want) in [("a", 0), ("b", 2), ("c", 6), ("d", 14)] {
        assert_eq!(want, t.insert(k.into(), 16).unwrap());
    }
    let before = t.clone();

    match t.insert("e".into(), 16) {
        Err(Error::IndexTooDeep {
            index: 30,
            max_slots: 16,
        }) => {}
        other => panic!("expected IndexTooDeep, got {:?}", other),
    }
    assert_eq!(before, t);
    assert_eq!(15, t.len());

    // Shallow spots are still open.
    assert_eq!(1, t.insert("0".into(), 16).unwrap());

    assert!(matches!(
        SlotTree::new().insert("a".into(), 0),
        Err(Error::IndexTooDeep { index: 0, .. })
    ));
}

#[test]
fn test_child_index_overflow() {
    assert_eq!(Some(usize::MAX), child(usize::MAX / 2, 1));
    assert_eq!(None, child(usize::MAX / 2, 2));
    assert_eq!(None, child(usize::MAX, 1));
}

#[test]
fn test_insert_into_empty_root_slot() {
    let mut t = tree_of(&[""]);
    assert_eq!(1, t.len());
    assert!(!t.is_empty());
    assert!(t.has_no_keys());

    assert_eq!(0, t.insert("k".into(), 1).unwrap());
    assert_eq!(tree_of(&["k"]), t);
    assert!(!t.has_no_keys());
}

#[test]
fn test_rotations_swap_values_only() {
    let mut t = tree_of(&["m", "b", "t", "a"]);
    assert!(t.rotate_right(0));
    assert_eq!(tree_of(&["b", "m", "t", "a"]), t);
    assert!(t.rotate_left(0));
    assert_eq!(tree_of(&["t", "m", "b", "a"]), t);

    // Missing children make both no-ops.
    assert!(!t.rotate_left(1));
    assert!(!t.rotate_right(2));
    assert!(!t.rotate_right(50));
    assert_eq!(tree_of(&["t", "m", "b", "a"]), t);
}

#[test]
fn test_rebalance_left_heavy() {
    let t = build(&["z", "m", "b"]);
    assert_eq!(tree_of(&["m", "z", "", "b"]), t);

    let t = build(&["z", "m", "b", "a"]);
    assert_eq!(tree_of(&["z", "m", "", "b", "", "", "", "a"]), t);
}

#[test]
fn test_rebalance_right_heavy() {
    let t = build(&["a", "b", "c"]);
    assert_eq!(tree_of(&["b", "", "a", "", "", "", "c"]), t);
}

#[test]
fn test_rebalance_left_right() {
    let t = build(&["m", "c", "f"]);
    assert_eq!(tree_of(&["f", "m", "", "", "c"]), t);
}

#[test]
fn test_rebalance_right_left() {
    // Right child leans left: its left grandchild gets promoted first.
    let t = build(&["c", "m", "f"]);
    assert_eq!(tree_of(&["f", "", "c", "", "", "m"]), t);
}

#[test]
fn test_rebalance_within_bounds_is_noop() {
    let mut t = tree_of(&["m", "b", "t"]);
    assert!(!t.rebalance(0));
    assert!(!t.rebalance(9));
    assert_eq!(tree_of(&["m", "b", "t"]), t);
}

#[test]
fn test_rebalance_path() {
    let mut t = tree_of(&["m", "c", "t", "b", "", "", "", "a"]);
    assert_eq!(2, t.balance_factor(1));
    assert_eq!(2, t.balance_factor(0));
    // Swaps don't change the shape, so the root still leans after slot 1 is
    // "fixed" and rotates too.
    assert_eq!(2, t.rebalance_path(7));
    assert_eq!(tree_of(&["b", "m", "t", "c", "", "", "", "a"]), t);
}

#[test]
fn test_contains_ignores_shape() {
    let t = build(&["z", "m", "b", "a"]);
    for k in ["z", "m", "b", "a"] {
        assert!(t.contains(k));
    }
    assert!(!t.contains(""));
    assert!(!t.contains("q"));
    assert_eq!(vec!["a", "b", "m", "z"], t.sorted_keys());
}
