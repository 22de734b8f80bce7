//! Growable ordered collection with removal-by-value.
//!
//! `Roster` backs both the reactor's top-level service list and every
//! service's child list. Removal swaps the last element into the vacated
//! position, so removing during a forward scan is only safe when the scan
//! holds its cursor after a removal and re-examines the swapped-in element;
//! the dispatch loop's child scan does exactly that.

/// Ordered sequence of values with O(n) removal-by-value.
///
/// Capacity doubles on overflow (amortized push). Order is insertion order
/// until the first removal, after which the removed position holds what was
/// previously the last element.
#[derive(Debug)]
pub struct Roster<T> {
    items: Vec<T>,
}

impl<T: PartialEq> Roster<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends a value at the end.
    pub fn push(&mut self, value: T) {
        self.items.push(value);
    }

    /// Removes the first occurrence of `value` by swapping the last element
    /// into its place. Returns false if the value is not present.
    pub fn remove(&mut self, value: &T) -> bool {
        match self.items.iter().position(|v| v == value) {
            Some(index) => {
                self.items.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.items.contains(value)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: PartialEq> Default for Roster<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_index() {
        let mut roster = Roster::new();
        roster.push(10);
        roster.push(20);
        roster.push(30);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.get(1), Some(&20));
        assert_eq!(roster.get(3), None);
    }

    #[test]
    fn remove_swaps_last_into_place() {
        let mut roster = Roster::new();
        for v in [1, 2, 3, 4] {
            roster.push(v);
        }
        assert!(roster.remove(&2));
        assert_eq!(roster.as_slice(), &[1, 4, 3]);
    }

    #[test]
    fn remove_last_element() {
        let mut roster = Roster::new();
        roster.push(1);
        roster.push(2);
        assert!(roster.remove(&2));
        assert_eq!(roster.as_slice(), &[1]);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut roster = Roster::new();
        roster.push(1);
        assert!(!roster.remove(&9));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn forward_scan_with_cursor_adjustment() {
        // The dispatch loop's removal pattern: drop every even value during
        // a scan, holding the cursor after each removal.
        let mut roster = Roster::new();
        for v in 0..8 {
            roster.push(v);
        }
        let mut i = 0;
        while i < roster.len() {
            let v = *roster.get(i).unwrap();
            if v % 2 == 0 {
                roster.remove(&v);
                continue;
            }
            i += 1;
        }
        let mut left: Vec<i32> = roster.iter().copied().collect();
        left.sort_unstable();
        assert_eq!(left, vec![1, 3, 5, 7]);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut roster = Roster::new();
        for v in 0..1000 {
            roster.push(v);
        }
        assert_eq!(roster.len(), 1000);
        assert_eq!(roster.get(999), Some(&999));
    }
}
