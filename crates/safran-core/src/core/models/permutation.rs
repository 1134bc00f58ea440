//! Atom permutations (reorder rules).

use super::element::Element;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermutationError {
    #[error("Index sequence of length {got} is not a permutation of 0..{expected}")]
    NotABijection { expected: usize, got: usize },

    #[error("Permutation maps atom {target} ({target_element}) onto reference slot {slot} ({reference_element})")]
    ElementMismatch {
        slot: usize,
        target: usize,
        reference_element: Element,
        target_element: Element,
    },
}

/// A relabeling of target-atom indices: atom `j` of the reordered molecule is
/// atom `perm[j]` of the original.
///
/// Construction validates the bijection property; element compatibility
/// against a reference is a separate check because the same rule may be
/// replayed against many references.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permutation(Vec<usize>);

impl Permutation {
    pub fn identity(n: usize) -> Permutation {
        Permutation((0..n).collect())
    }

    pub fn new(indices: Vec<usize>) -> Result<Permutation, PermutationError> {
        let n = indices.len();
        let mut seen = vec![false; n];
        for &i in &indices {
            if i >= n || seen[i] {
                return Err(PermutationError::NotABijection {
                    expected: n,
                    got: n,
                });
            }
            seen[i] = true;
        }
        Ok(Permutation(indices))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Checks that applying this rule to `target_elements` reproduces
    /// `reference_elements` slot by slot.
    pub fn preserves_elements(
        &self,
        reference_elements: &[Element],
        target_elements: &[Element],
    ) -> Result<(), PermutationError> {
        if reference_elements.len() != self.len() || target_elements.len() != self.len() {
            return Err(PermutationError::NotABijection {
                expected: reference_elements.len(),
                got: self.len(),
            });
        }
        for (slot, &target) in self.0.iter().enumerate() {
            if reference_elements[slot] != target_elements[target] {
                return Err(PermutationError::ElementMismatch {
                    slot,
                    target,
                    reference_element: reference_elements[slot],
                    target_element: target_elements[target],
                });
            }
        }
        Ok(())
    }

    /// Reorders a slice so that `out[j] = values[perm[j]]`.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Vec<T> {
        self.0.iter().map(|&i| values[i].clone()).collect()
    }

    /// The inverse rule: if `self` maps target onto reference order, the
    /// inverse maps reference onto target order.
    pub fn inverse(&self) -> Permutation {
        let mut inv = vec![0usize; self.len()];
        for (j, &i) in self.0.iter().enumerate() {
            inv[i] = j;
        }
        Permutation(inv)
    }
}

impl AsRef<[usize]> for Permutation {
    fn as_ref(&self) -> &[usize] {
        &self.0
    }
}

/// Ordered, deduplicated set of reorder rules discovered during a scan.
/// Insertion order is preserved and used as the search order on reuse.
#[derive(Debug, Clone, Default)]
pub struct ReorderRuleCache {
    rules: Vec<Permutation>,
}

impl ReorderRuleCache {
    pub fn new() -> ReorderRuleCache {
        ReorderRuleCache::default()
    }

    /// Inserts a rule if it is not already cached; returns whether it was new.
    pub fn insert(&mut self, rule: Permutation) -> bool {
        if rule.is_empty() || self.rules.contains(&rule) {
            return false;
        }
        self.rules.push(rule);
        true
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permutation> {
        self.rules.iter()
    }

    pub fn as_slice(&self) -> &[Permutation] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_maps_values_onto_themselves() {
        let p = Permutation::identity(3);
        assert_eq!(p.apply(&[10, 20, 30]), vec![10, 20, 30]);
    }

    #[test]
    fn new_rejects_duplicates_and_out_of_range() {
        assert!(Permutation::new(vec![0, 0, 2]).is_err());
        assert!(Permutation::new(vec![0, 1, 3]).is_err());
        assert!(Permutation::new(vec![2, 0, 1]).is_ok());
    }

    #[test]
    fn apply_reorders_by_rule() {
        let p = Permutation::new(vec![1, 0]).unwrap();
        assert_eq!(p.apply(&['a', 'b']), vec!['b', 'a']);
    }

    #[test]
    fn inverse_round_trips() {
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        let values = [7, 8, 9];
        let forth = p.apply(&values);
        let back = p.inverse().apply(&forth);
        assert_eq!(back, values.to_vec());
    }

    #[test]
    fn preserves_elements_detects_mismatch() {
        let h = Element::HYDROGEN;
        let o = Element::OXYGEN;
        let p = Permutation::new(vec![1, 0]).unwrap();
        assert!(p.preserves_elements(&[h, o], &[o, h]).is_ok());
        assert!(p.preserves_elements(&[h, o], &[h, o]).is_err());
    }

    #[test]
    fn rule_cache_keeps_insertion_order_without_duplicates() {
        let mut cache = ReorderRuleCache::new();
        let a = Permutation::new(vec![1, 0]).unwrap();
        let b = Permutation::new(vec![0, 1]).unwrap();
        assert!(cache.insert(a.clone()));
        assert!(cache.insert(b.clone()));
        assert!(!cache.insert(a.clone()));
        let collected: Vec<_> = cache.iter().cloned().collect();
        assert_eq!(collected, vec![a, b]);
    }
}
