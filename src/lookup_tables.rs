use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::error::SolverError;
use crate::value_set::ValueSet;

// Packed range-info field offsets. Each field is wide enough that summing
// the packed words over a full 16-cell house cannot carry into its
// neighbour; any bit at EMPTY_SHIFT or above marks an empty domain.
const MAX_SHIFT: u32 = 0;
const MIN_SHIFT: u32 = 12;
const FIXED_SUM_SHIFT: u32 = 24;
const FIXED_COUNT_SHIFT: u32 = 36;
const EMPTY_SHIFT: u32 = 56;
const FIELD_MASK: u64 = (1 << 12) - 1;

/// Aggregated range information for a set of cells, decoded from a sum of
/// packed `range_info` words.
#[derive(Debug, Copy, Clone)]
pub struct RangeAggregate {
    pub min_sum: u32,
    pub max_sum: u32,
    pub fixed_sum: u32,
    pub fixed_count: u32,
    pub has_empty: bool,
}

pub fn decode_range_sum(agg: u64) -> RangeAggregate {
    RangeAggregate {
        max_sum: ((agg >> MAX_SHIFT) & FIELD_MASK) as u32,
        min_sum: ((agg >> MIN_SHIFT) & FIELD_MASK) as u32,
        fixed_sum: ((agg >> FIXED_SUM_SHIFT) & FIELD_MASK) as u32,
        fixed_count: ((agg >> FIXED_COUNT_SHIFT) & FIELD_MASK) as u32,
        has_empty: agg >> EMPTY_SHIFT != 0,
    }
}

/// Precomputed per-bitmask tables for a given value count.
///
/// Built once per distinct `num_values` and shared process-wide; all fields
/// are immutable after construction.
pub struct LookupTables {
    pub num_values: u32,
    /// Display value of a singleton mask. Unspecified for non-singletons.
    pub value: Vec<u8>,
    /// Sum of the display values of all set bits.
    pub sum: Vec<u16>,
    /// `(min << 32) | max` of display values, so that summing packed words
    /// accumulates both aggregate bounds at once. Empty masks poison the
    /// min field high enough to be detectable.
    pub min_max: Vec<u64>,
    /// Packed `(fixed?, fixed value, min, max)`; see `decode_range_sum`.
    pub range_info: Vec<u64>,
    /// Mask with each value `v` replaced by `num_values + 1 - v`.
    pub reverse: Vec<u16>,
    /// All value combinations (as masks) grouped by `[popcount][sum]`.
    combinations: Vec<Vec<Vec<u16>>>,
}

const EMPTY_MIN_POISON: u64 = 1 << 20;

impl LookupTables {
    /// The shared table set for `num_values`, building it on first use.
    pub fn get(num_values: u32) -> Arc<LookupTables> {
        lazy_static! {
            static ref CACHE: Mutex<HashMap<u32, Arc<LookupTables>>> =
                Mutex::new(HashMap::new());
        }

        let mut cache = CACHE.lock().unwrap();
        cache
            .entry(num_values)
            .or_insert_with(|| Arc::new(LookupTables::build(num_values)))
            .clone()
    }

    fn build(num_values: u32) -> LookupTables {
        assert!((1..=16).contains(&num_values));
        let size = 1usize << num_values;
        let max_sum = num_values * (num_values + 1) / 2;

        let mut value = vec![0u8; size];
        let mut sum = vec![0u16; size];
        let mut min_max = vec![0u64; size];
        let mut range_info = vec![0u64; size];
        let mut reverse = vec![0u16; size];
        let mut combinations =
            vec![vec![Vec::new(); max_sum as usize + 1]; num_values as usize + 1];

        for m in 0..size {
            let vs = ValueSet::from_bits(m as u16);
            let count = vs.count();

            if m == 0 {
                min_max[0] = EMPTY_MIN_POISON << 32;
                range_info[0] = 1 << EMPTY_SHIFT;
                continue;
            }

            let min = ValueSet::min(&vs) as u64 + 1;
            let max = ValueSet::max(&vs) as u64 + 1;
            let total: u16 = vs.map(|v| v as u16 + 1).sum();

            value[m] = vs.value() + 1;
            sum[m] = total;
            min_max[m] = (min << 32) | max;

            let fixed = count == 1;
            range_info[m] = (max << MAX_SHIFT)
                | (min << MIN_SHIFT)
                | (if fixed { min << FIXED_SUM_SHIFT } else { 0 })
                | ((fixed as u64) << FIXED_COUNT_SHIFT);

            reverse[m] = vs
                .map(|v| 1u16 << (num_values as u8 - 1 - v))
                .fold(0, |acc, bit| acc | bit);

            combinations[count][total as usize].push(m as u16);
        }

        LookupTables {
            num_values,
            value,
            sum,
            min_max,
            range_info,
            reverse,
            combinations,
        }
    }

    /// Distinct-value combinations with exactly `count` values summing to
    /// `sum`. Empty when the pair is unachievable.
    pub fn combinations(&self, count: usize, sum: u32) -> &[u16] {
        static NO_COMBINATIONS: &[u16] = &[];
        self.combinations
            .get(count)
            .and_then(|by_sum| by_sum.get(sum as usize))
            .map(|v| v.as_slice())
            .unwrap_or(NO_COMBINATIONS)
    }

    #[inline]
    pub fn reverse_set(&self, vs: ValueSet) -> ValueSet {
        ValueSet::from_bits(self.reverse[vs.bits() as usize])
    }

    #[inline]
    pub fn range_info_sum(&self, cells: &[crate::types::CellIndex], grid: &[ValueSet]) -> u64 {
        cells
            .iter()
            .map(|&c| self.range_info[grid[c].bits() as usize])
            .sum()
    }
}

/// Bitmask-to-bitmask maps for a binary relation over `[1..num_values]²`.
///
/// `forward[m]` is the union over `a ∈ m` of `{ b : R(a, b) }`; `backward`
/// is the same for the inverse relation.
pub struct BinaryRelationTables {
    pub forward: Vec<u16>,
    pub backward: Vec<u16>,
}

impl BinaryRelationTables {
    /// Shared tables for a relation key, building them on first use.
    pub fn get(num_values: u32, key: &str) -> Result<Arc<BinaryRelationTables>, SolverError> {
        lazy_static! {
            static ref CACHE: Mutex<HashMap<(u32, String), Arc<BinaryRelationTables>>> =
                Mutex::new(HashMap::new());
        }

        let mut cache = CACHE.lock().unwrap();
        if let Some(tables) = cache.get(&(num_values, key.to_string())) {
            return Ok(tables.clone());
        }

        let tables = Arc::new(BinaryRelationTables::build(num_values, key)?);
        cache.insert((num_values, key.to_string()), tables.clone());
        Ok(tables)
    }

    fn build(num_values: u32, key: &str) -> Result<BinaryRelationTables, SolverError> {
        let bits = decode_key_bits(key)?;
        let needed = (num_values * num_values) as usize;
        if bits.len() < needed {
            return Err(SolverError::BadConstraint(format!(
                "binary relation key too short: {} bits for {num_values} values",
                bits.len()
            )));
        }

        let size = 1usize << num_values;
        let mut forward = vec![0u16; size];
        let mut backward = vec![0u16; size];

        // Seed the singletons from the truth table.
        for a in 0..num_values {
            for b in 0..num_values {
                if bits[(a * num_values + b) as usize] {
                    forward[1 << a] |= 1 << b;
                    backward[1 << b] |= 1 << a;
                }
            }
        }

        // Every other mask is the union of its lowest bit and the rest.
        for m in 1..size {
            if m & (m - 1) != 0 {
                let low = m & m.wrapping_neg();
                forward[m] = forward[low] | forward[m & (m - 1)];
                backward[m] = backward[low] | backward[m & (m - 1)];
            }
        }

        Ok(BinaryRelationTables { forward, backward })
    }

    #[inline]
    pub fn map_forward(&self, vs: ValueSet) -> ValueSet {
        ValueSet::from_bits(self.forward[vs.bits() as usize])
    }

    #[inline]
    pub fn map_backward(&self, vs: ValueSet) -> ValueSet {
        ValueSet::from_bits(self.backward[vs.bits() as usize])
    }
}

const KEY_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Packs the truth table of `relation` over display values `[1..num_values]`
/// into a compact 6-bits-per-character key. Keys are what the relation-table
/// cache is memoised on, so structurally equal relations share tables.
pub fn make_binary_key<F>(num_values: u32, relation: F) -> String
where
    F: Fn(u32, u32) -> bool,
{
    let mut key = String::new();
    let mut acc = 0u8;
    let mut acc_bits = 0;

    for a in 1..=num_values {
        for b in 1..=num_values {
            if relation(a, b) {
                acc |= 1 << acc_bits;
            }
            acc_bits += 1;
            if acc_bits == 6 {
                key.push(KEY_ALPHABET[acc as usize] as char);
                acc = 0;
                acc_bits = 0;
            }
        }
    }
    if acc_bits > 0 {
        key.push(KEY_ALPHABET[acc as usize] as char);
    }

    key
}

fn decode_key_bits(key: &str) -> Result<Vec<bool>, SolverError> {
    let mut bits = Vec::with_capacity(key.len() * 6);
    for ch in key.bytes() {
        let group = KEY_ALPHABET
            .iter()
            .position(|&c| c == ch)
            .ok_or_else(|| {
                SolverError::BadConstraint(format!("bad character in relation key: {}", ch as char))
            })?;
        for bit in 0..6 {
            bits.push(group & (1 << bit) != 0);
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_and_value_tables() {
        let tables = LookupTables::get(9);
        let m = ValueSet::from_iter([0u8, 3, 8]).bits() as usize; // {1, 4, 9}
        assert_eq!(tables.sum[m], 14);
        assert_eq!(tables.value[ValueSet::from_value(4).bits() as usize], 5);
    }

    #[test]
    fn min_max_packing_accumulates() {
        let tables = LookupTables::get(9);
        let a = ValueSet::from_iter([1u8, 6]).bits() as usize; // {2, 7}
        let b = ValueSet::from_iter([0u8, 8]).bits() as usize; // {1, 9}
        let packed = tables.min_max[a] + tables.min_max[b];
        assert_eq!(packed >> 32, 3); // 2 + 1
        assert_eq!(packed & 0xffff_ffff, 16); // 7 + 9
    }

    #[test]
    fn range_info_aggregation() {
        let tables = LookupTables::get(9);
        let fixed = ValueSet::from_value(4).bits() as usize; // fixed 5
        let open = ValueSet::from_iter([1u8, 6]).bits() as usize; // {2, 7}
        let agg = decode_range_sum(
            tables.range_info[fixed] + tables.range_info[open],
        );
        assert_eq!(agg.fixed_count, 1);
        assert_eq!(agg.fixed_sum, 5);
        assert_eq!(agg.min_sum, 7);
        assert_eq!(agg.max_sum, 12);
        assert!(!agg.has_empty);

        let with_empty = decode_range_sum(tables.range_info[fixed] + tables.range_info[0]);
        assert!(with_empty.has_empty);
    }

    #[test]
    fn reverse_maps_values() {
        let tables = LookupTables::get(9);
        let m = ValueSet::from_iter([0u8, 1]); // {1, 2}
        assert_eq!(tables.reverse_set(m), ValueSet::from_iter([7u8, 8])); // {8, 9}
    }

    #[test]
    fn combinations_grouped_by_count_and_sum() {
        let tables = LookupTables::get(9);
        // Two distinct values from 1..9 summing to 3: only {1, 2}.
        let combos = tables.combinations(2, 3);
        assert_eq!(combos.len(), 1);
        assert_eq!(
            ValueSet::from_bits(combos[0]),
            ValueSet::from_iter([0u8, 1])
        );
        // 45 over 9 distinct values: the full set.
        assert_eq!(tables.combinations(9, 45).len(), 1);
        assert!(tables.combinations(2, 100).is_empty());
    }

    #[test]
    fn binary_key_round_trip() {
        // Strict "less than" over a 9-value grid.
        let key = make_binary_key(9, |a, b| a < b);
        let tables = BinaryRelationTables::get(9, &key).unwrap();

        // From {3}: everything above 3.
        let from3 = tables.map_forward(ValueSet::from_value(2));
        assert_eq!(from3, ValueSet::from_iter(3u8..9));
        // Inverse of {3}: everything below 3.
        let to3 = tables.map_backward(ValueSet::from_value(2));
        assert_eq!(to3, ValueSet::from_iter(0u8..2));
    }
}
