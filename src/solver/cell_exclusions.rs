use std::collections::HashMap;

use crate::types::CellIndex;

/// For each cell, the set of cells that must take a different value.
///
/// Built once from the handlers' exclusion lists; the pair and list caches
/// memoise the intersection queries Sum-style handlers make during setup.
pub struct CellExclusions {
    exclusions: Vec<Vec<CellIndex>>,
    pair_cache: HashMap<(CellIndex, CellIndex), Vec<CellIndex>>,
    list_cache: HashMap<Vec<CellIndex>, Vec<CellIndex>>,
}

impl CellExclusions {
    pub fn new(num_cells: usize) -> CellExclusions {
        CellExclusions {
            exclusions: vec![Vec::new(); num_cells],
            pair_cache: HashMap::new(),
            list_cache: HashMap::new(),
        }
    }

    /// Records that every pair of `cells` must differ.
    pub fn add_mutually_exclusive(&mut self, cells: &[CellIndex]) {
        for (i, &a) in cells.iter().enumerate() {
            for &b in &cells[i + 1..] {
                self.add_pair(a, b);
            }
        }
    }

    pub fn add_pair(&mut self, a: CellIndex, b: CellIndex) {
        if a == b {
            return;
        }
        self.exclusions[a].push(b);
        self.exclusions[b].push(a);
    }

    /// Sorts and dedups after all handlers have contributed.
    pub fn finalize(&mut self) {
        for list in &mut self.exclusions {
            list.sort_unstable();
            list.dedup();
        }
    }

    pub fn is_mutually_exclusive(&self, a: CellIndex, b: CellIndex) -> bool {
        self.exclusions[a].binary_search(&b).is_ok()
    }

    pub fn all_mutually_exclusive(&self, cells: &[CellIndex]) -> bool {
        cells.iter().enumerate().all(|(i, &a)| {
            cells[i + 1..]
                .iter()
                .all(|&b| self.is_mutually_exclusive(a, b))
        })
    }

    pub fn get_array(&self, cell: CellIndex) -> &[CellIndex] {
        &self.exclusions[cell]
    }

    /// Cells excluded by both `a` and `b`, computed once.
    pub fn cache_cell_pair(&mut self, a: CellIndex, b: CellIndex) -> &[CellIndex] {
        let key = if a < b { (a, b) } else { (b, a) };
        if !self.pair_cache.contains_key(&key) {
            let intersection = intersect_sorted(&self.exclusions[key.0], &self.exclusions[key.1]);
            self.pair_cache.insert(key, intersection);
        }
        &self.pair_cache[&key]
    }

    /// Cells excluded by every cell of `cells`, computed once.
    pub fn cache_cell_list(&mut self, cells: &[CellIndex]) -> &[CellIndex] {
        let mut key = cells.to_vec();
        key.sort_unstable();
        key.dedup();
        if !self.list_cache.contains_key(&key) {
            let mut intersection = key
                .first()
                .map(|&c| self.exclusions[c].clone())
                .unwrap_or_default();
            for &c in &key[1..] {
                intersection = intersect_sorted(&intersection, &self.exclusions[c]);
            }
            self.list_cache.insert(key.clone(), intersection);
        }
        &self.list_cache[&key]
    }
}

fn intersect_sorted(a: &[CellIndex], b: &[CellIndex]) -> Vec<CellIndex> {
    let mut result = Vec::new();
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j < b.len() && b[j] == x {
            result.push(x);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> CellExclusions {
        let mut ex = CellExclusions::new(6);
        ex.add_mutually_exclusive(&[0, 1, 2]);
        ex.add_mutually_exclusive(&[1, 2, 3]);
        ex.finalize();
        ex
    }

    #[test]
    fn pairwise_queries() {
        let ex = build();
        assert!(ex.is_mutually_exclusive(0, 1));
        assert!(ex.is_mutually_exclusive(2, 3));
        assert!(!ex.is_mutually_exclusive(0, 3));
        assert!(ex.all_mutually_exclusive(&[0, 1, 2]));
        assert!(!ex.all_mutually_exclusive(&[0, 1, 3]));
    }

    #[test]
    fn arrays_are_sorted_and_deduped() {
        let ex = build();
        assert_eq!(ex.get_array(1), &[0, 2, 3]);
        assert_eq!(ex.get_array(2), &[0, 1, 3]);
    }

    #[test]
    fn pair_and_list_intersections() {
        let mut ex = build();
        assert_eq!(ex.cache_cell_pair(0, 3), &[1, 2]);
        assert_eq!(ex.cache_cell_list(&[1, 2]), &[0, 3]);
        assert_eq!(ex.cache_cell_list(&[0, 1, 2]), &[] as &[CellIndex]);
    }
}
