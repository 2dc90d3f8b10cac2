use std::sync::Arc;

use crate::lookup_tables::{decode_range_sum, LookupTables};
use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

/// `Σ positive − Σ negative = offset`.
///
/// Negative cells are folded away up front: mapping a negative cell's domain
/// through the reverse table turns `−v` into `(values+1−v) − (values+1)`, so
/// internally every cell adds and the target grows by `values+1` per
/// negative cell. Plain sums are the `num_positive == cells.len()` case.
///
/// Pruning is interval-based from the packed min/max tables; when the cells
/// are known to be mutually exclusive the per-(count, sum) combination
/// tables tighten the result further.
pub struct SumHandler {
    cells: Vec<CellIndex>,
    num_positive: usize,
    offset: i32,
    target: i32,
    all_exclusive: bool,
    tables: Option<Arc<LookupTables>>,
    scratch: Vec<ValueSet>,
}

impl SumHandler {
    pub fn new(cells: Vec<CellIndex>, sum: u32) -> SumHandler {
        let num_positive = cells.len();
        SumHandler {
            cells,
            num_positive,
            offset: sum as i32,
            target: 0,
            all_exclusive: false,
            tables: None,
            scratch: Vec::new(),
        }
    }

    pub fn with_negative(
        positive: Vec<CellIndex>,
        negative: Vec<CellIndex>,
        offset: i32,
    ) -> SumHandler {
        let num_positive = positive.len();
        let mut cells = positive;
        cells.extend(negative);
        SumHandler {
            cells,
            num_positive,
            offset,
            target: 0,
            all_exclusive: false,
            tables: None,
            scratch: Vec::new(),
        }
    }

    #[inline]
    fn transform(&self, index: usize, vs: ValueSet) -> ValueSet {
        if index < self.num_positive {
            vs
        } else {
            self.tables.as_ref().unwrap().reverse_set(vs)
        }
    }

    fn enforce_combinations(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();

        let agg = decode_range_sum(tables.range_info_sum(&self.cells, grid));
        if agg.has_empty {
            return Err(Contradiction);
        }

        let unfixed_count = self.cells.len() - agg.fixed_count as usize;
        if unfixed_count == 0 {
            return if agg.fixed_sum as i32 == self.target {
                Ok(())
            } else {
                Err(Contradiction)
            };
        }

        let remaining = self.target - agg.fixed_sum as i32;
        if remaining < 0 {
            return Err(Contradiction);
        }

        let mut fixed_mask = ValueSet::empty();
        let mut available = ValueSet::empty();
        for &cell in &self.cells {
            if grid[cell].has_multiple() {
                available |= grid[cell];
            } else {
                fixed_mask |= grid[cell];
            }
        }
        available.remove_set(fixed_mask);

        let mut possible = ValueSet::empty();
        let mut required = ValueSet::from_bits(u16::MAX);
        for &combo in tables.combinations(unfixed_count, remaining as u32) {
            let combo = ValueSet::from_bits(combo);
            if combo.intersects(fixed_mask) || !(combo & !available).is_empty() {
                continue;
            }
            possible |= combo;
            required &= combo;
        }

        if possible.is_empty() {
            return Err(Contradiction);
        }

        for &cell in &self.cells {
            if grid[cell].has_multiple() {
                restrict_cell(grid, accumulator, cell, possible)?;
            }
        }

        // A required value with a single home fixes that cell.
        let mut remaining_required = required & possible;
        while let Some(value) = remaining_required.pop() {
            let mut home = usize::MAX;
            let mut homes = 0;
            for &cell in &self.cells {
                if grid[cell].has_multiple() && grid[cell].intersects(value) {
                    home = cell;
                    homes += 1;
                }
            }
            if homes == 1 {
                grid[home] = value;
                accumulator.add_for_cell(home);
            }
        }

        Ok(())
    }
}

impl ConstraintHandler for SumHandler {
    fn name(&self) -> &'static str {
        "Sum"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> SolverResult {
        self.tables = Some(LookupTables::get(shape.num_values));
        self.target = self.offset
            + (self.cells.len() - self.num_positive) as i32 * (shape.num_values as i32 + 1);
        self.all_exclusive = self.num_positive == self.cells.len()
            && exclusions.all_mutually_exclusive(&self.cells);
        self.scratch = vec![ValueSet::empty(); self.cells.len()];
        if self.target < 0 {
            return Err(Contradiction);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();

        // Transformed domains, then aggregate bounds in one packed sum.
        let mut packed_total: u64 = 0;
        for i in 0..self.cells.len() {
            let vs = self.transform(i, grid[self.cells[i]]);
            if vs.is_empty() {
                return Err(Contradiction);
            }
            self.scratch[i] = vs;
            packed_total += tables.min_max[vs.bits() as usize];
        }
        let total_min = (packed_total >> 32) as i32;
        let total_max = (packed_total & 0xffff_ffff) as i32;

        if self.target < total_min || self.target > total_max {
            return Err(Contradiction);
        }

        for i in 0..self.cells.len() {
            let vs = self.scratch[i];
            let packed = tables.min_max[vs.bits() as usize];
            let others_min = total_min - (packed >> 32) as i32;
            let others_max = total_max - (packed & 0xffff_ffff) as i32;
            // v + others must be able to land on target.
            let allowed = ValueSet::from_range(
                self.target - others_max - 1,
                self.target - others_min - 1,
            );
            let allowed = self.transform(i, allowed);
            restrict_cell(grid, accumulator, self.cells[i], allowed)?;
        }

        if self.all_exclusive {
            self.enforce_combinations(grid, accumulator)?;
        }

        Ok(())
    }
}

/// The digits of the pill cells, read as one decimal number, equal the sum
/// of the stem cells.
pub struct PillArrowHandler {
    cells: Vec<CellIndex>,
    pill_size: usize,
    tables: Option<Arc<LookupTables>>,
}

impl PillArrowHandler {
    pub fn new(pill_size: usize, cells: Vec<CellIndex>) -> PillArrowHandler {
        PillArrowHandler {
            cells,
            pill_size,
            tables: None,
        }
    }

    fn pill_cells(&self) -> &[CellIndex] {
        &self.cells[..self.pill_size]
    }

    fn stem_cells(&self) -> &[CellIndex] {
        &self.cells[self.pill_size..]
    }
}

impl ConstraintHandler for PillArrowHandler {
    fn name(&self) -> &'static str {
        "PillArrow"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> SolverResult {
        if self.pill_size == 0 || self.pill_size > 4 || self.pill_size >= self.cells.len() {
            return Err(Contradiction);
        }
        self.tables = Some(LookupTables::get(shape.num_values));
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();

        let mut packed_stem: u64 = 0;
        for &cell in self.stem_cells() {
            if grid[cell].is_empty() {
                return Err(Contradiction);
            }
            packed_stem += tables.min_max[grid[cell].bits() as usize];
        }
        let stem_min = (packed_stem >> 32) as i64;
        let stem_max = (packed_stem & 0xffff_ffff) as i64;

        // Walk every pill digit combination, keeping those whose number the
        // stem can reach.
        let pill = self.pill_cells().to_vec();
        let mut supported = vec![ValueSet::empty(); pill.len()];
        let mut digits = vec![0u8; pill.len()];
        let mut target_min = i64::MAX;
        let mut target_max = i64::MIN;

        fn walk(
            grid: &[ValueSet],
            pill: &[CellIndex],
            digits: &mut [u8],
            depth: usize,
            acc: i64,
            stem_min: i64,
            stem_max: i64,
            supported: &mut [ValueSet],
            target_min: &mut i64,
            target_max: &mut i64,
        ) {
            if depth == pill.len() {
                if acc >= stem_min && acc <= stem_max {
                    for (i, &d) in digits.iter().enumerate() {
                        supported[i] |= ValueSet::from_value(d);
                    }
                    *target_min = (*target_min).min(acc);
                    *target_max = (*target_max).max(acc);
                }
                return;
            }
            for d in grid[pill[depth]] {
                digits[depth] = d;
                walk(
                    grid,
                    pill,
                    digits,
                    depth + 1,
                    acc * 10 + (d as i64 + 1),
                    stem_min,
                    stem_max,
                    supported,
                    target_min,
                    target_max,
                );
            }
        }

        walk(
            grid,
            &pill,
            &mut digits,
            0,
            0,
            stem_min,
            stem_max,
            &mut supported,
            &mut target_min,
            &mut target_max,
        );

        if target_min > target_max {
            return Err(Contradiction);
        }

        for (i, &cell) in pill.iter().enumerate() {
            restrict_cell(grid, accumulator, cell, supported[i])?;
        }

        // Stem cells must fit some reachable pill number.
        for &cell in self.stem_cells().to_vec().iter() {
            let packed = tables.min_max[grid[cell].bits() as usize];
            let others_min = stem_min - (packed >> 32) as i64;
            let others_max = stem_max - (packed & 0xffff_ffff) as i64;
            let allowed = ValueSet::from_range(
                (target_min - others_max - 1).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                (target_max - others_min - 1).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            );
            restrict_cell(grid, accumulator, cell, allowed)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(
        handler: &mut dyn ConstraintHandler,
        num_values: u32,
        num_cells: usize,
        exclusive: &[CellIndex],
    ) -> (Vec<ValueSet>, HandlerAccumulator) {
        let shape = Shape::square(num_values).unwrap();
        let mut exclusions = CellExclusions::new(num_cells);
        exclusions.add_mutually_exclusive(exclusive);
        exclusions.finalize();
        let mut grid = vec![ValueSet::full(num_values as u8); num_cells];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        (grid, HandlerAccumulator::new(num_cells, &handlers))
    }

    #[test]
    fn interval_pruning_tightens_domains() {
        // Two cells summing to 4 in a 9x9: each cell is at most 3.
        let mut handler = SumHandler::new(vec![0, 1], 4);
        let (mut grid, mut acc) = setup(&mut handler, 9, 2, &[]);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_iter([0u8, 1, 2]));
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 1, 2]));
    }

    #[test]
    fn combination_pruning_drops_impossible_values() {
        // Three mutually exclusive cells summing to 6: only {1,2,3} works.
        let mut handler = SumHandler::new(vec![0, 1, 2], 6);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3, &[0, 1, 2]);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        for cell in 0..3 {
            assert_eq!(grid[cell], ValueSet::from_iter([0u8, 1, 2]));
        }
    }

    #[test]
    fn required_value_with_single_home_is_fixed() {
        // Cells sum to 9, two of them restricted to {1,2}: the third must
        // carry the 6.
        let mut handler = SumHandler::new(vec![0, 1, 2], 9);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3, &[0, 1, 2]);
        grid[0] = ValueSet::from_iter([0u8, 1]);
        grid[1] = ValueSet::from_iter([0u8, 1]);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[2], ValueSet::from_value(5));
    }

    #[test]
    fn negative_cells_balance_positives() {
        // a + b − c = 0 with c fixed to 3: a + b = 3, so a, b ≤ 2.
        let mut handler = SumHandler::with_negative(vec![0, 1], vec![2], 0);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3, &[]);
        grid[2] = ValueSet::from_value(2);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_iter([0u8, 1]));
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 1]));
    }

    #[test]
    fn unreachable_sum_is_a_contradiction() {
        let mut handler = SumHandler::new(vec![0, 1], 19);
        let (mut grid, mut acc) = setup(&mut handler, 9, 2, &[]);
        assert!(handler.enforce_consistency(&mut grid, &mut acc).is_err());
    }

    #[test]
    fn pill_arrow_prunes_pill_and_stem() {
        // Pill of one cell, stem of two cells in a 9x9: pill = stem sum, so
        // the pill is at least 2 and the stem cells at most 8 (9 − 1).
        let mut handler = PillArrowHandler::new(1, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3, &[]);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_iter(1u8..9)); // 2..=9
        assert_eq!(grid[1], ValueSet::from_iter(0u8..8)); // 1..=8
        assert_eq!(grid[2], ValueSet::from_iter(0u8..8));
    }
}
