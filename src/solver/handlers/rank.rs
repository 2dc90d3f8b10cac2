use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

/// The clue line sits at the given rank when every row and column, read
/// from its clue edge, is ordered lexicographically.
///
/// Propagation counts, over all other edge-lines, how many are certainly
/// smaller and how many could still be smaller, and squeezes the clue
/// line's first cell between those bounds.
pub struct FullRankHandler {
    line: Vec<CellIndex>,
    rank: u32,
    cells: Vec<CellIndex>,
    other_lines: Vec<Vec<CellIndex>>,
}

impl FullRankHandler {
    pub fn new(rank: u32, line: Vec<CellIndex>) -> FullRankHandler {
        FullRankHandler {
            line,
            rank,
            cells: Vec::new(),
            other_lines: Vec::new(),
        }
    }
}

/// Can `a` read lexicographically smaller than `b` in some completion?
fn can_less(grid: &[ValueSet], a: &[CellIndex], b: &[CellIndex]) -> bool {
    for (&ca, &cb) in a.iter().zip(b) {
        let (va, vb) = (grid[ca], grid[cb]);
        if va.is_empty() || vb.is_empty() {
            return false;
        }
        if ca != cb && va.min() < vb.max() {
            return true;
        }
        if !va.intersects(vb) {
            // Cannot stay equal here, and nothing smaller was possible.
            return false;
        }
        // Shared cells and overlapping domains force equality; look deeper.
    }
    false
}

/// Can `a` and `b` read identically in some completion?
fn can_equal(grid: &[ValueSet], a: &[CellIndex], b: &[CellIndex]) -> bool {
    a.iter()
        .zip(b)
        .all(|(&ca, &cb)| grid[ca].intersects(grid[cb]))
}

impl ConstraintHandler for FullRankHandler {
    fn name(&self) -> &'static str {
        "FullRank"
    }

    fn cells(&self) -> &[CellIndex] {
        // Reads every edge-line, so any cell change is relevant.
        &self.cells
    }

    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> SolverResult {
        let mut lines: Vec<Vec<CellIndex>> = Vec::new();
        for r in 0..shape.num_rows {
            let row: Vec<CellIndex> = (0..shape.num_cols)
                .map(|c| shape.make_cell_index(r, c))
                .collect();
            let mut reversed = row.clone();
            reversed.reverse();
            lines.push(row);
            lines.push(reversed);
        }
        for c in 0..shape.num_cols {
            let col: Vec<CellIndex> = (0..shape.num_rows)
                .map(|r| shape.make_cell_index(r, c))
                .collect();
            let mut reversed = col.clone();
            reversed.reverse();
            lines.push(col);
            lines.push(reversed);
        }

        if self.rank == 0 || self.rank as usize > lines.len() {
            return Err(Contradiction);
        }

        lines.retain(|line| line != &self.line);
        self.other_lines = lines;
        self.cells = (0..shape.num_cells).collect();
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let rank_below = self.rank as usize - 1;

        let mut surely_less = 0;
        let mut maybe_less = 0;
        for other in &self.other_lines {
            if can_less(grid, other, &self.line) {
                maybe_less += 1;
                if !can_less(grid, &self.line, other) && !can_equal(grid, &self.line, other) {
                    surely_less += 1;
                }
            }
        }
        if surely_less > rank_below || maybe_less < rank_below {
            return Err(Contradiction);
        }

        // First-cell squeeze: lines topped by a smaller digit are smaller.
        let first = self.line[0];
        let mut supported = ValueSet::empty();
        for dv in grid[first] {
            let d = dv as u32 + 1;
            let mut below = 0;
            let mut possibly_below = 0;
            for other in &self.other_lines {
                let head = grid[other[0]];
                if other[0] == first {
                    // Shares our corner; decided deeper down.
                    possibly_below += 1;
                    continue;
                }
                if (ValueSet::max(&head) as u32 + 1) < d {
                    below += 1;
                }
                if (ValueSet::min(&head) as u32 + 1) <= d {
                    possibly_below += 1;
                }
            }
            if below <= rank_below && rank_below <= possibly_below {
                supported |= ValueSet::from_value(dv);
            }
        }
        restrict_cell(grid, accumulator, first, supported)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::cell_accumulator::HandlerAccumulator;

    #[test]
    fn rank_one_forces_smallest_first_digit() {
        let shape = Shape::square(4).unwrap();
        let line: Vec<CellIndex> = (0..4).map(|c| shape.make_cell_index(0, c)).collect();
        let mut handler = FullRankHandler::new(1, line);
        let mut exclusions = CellExclusions::new(16);
        let mut grid = vec![ValueSet::full(4); 16];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        // A row head fixed to 1 puts that row surely below any start > 1.
        grid[4] = ValueSet::from_value(0);
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        let mut acc = HandlerAccumulator::new(16, &handlers);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_value(0));
    }

    #[test]
    fn impossible_rank_detected_via_fixed_heads() {
        let shape = Shape::square(4).unwrap();
        let line: Vec<CellIndex> = (0..4).map(|c| shape.make_cell_index(0, c)).collect();
        let mut handler = FullRankHandler::new(16, line);
        let mut exclusions = CellExclusions::new(16);
        let mut grid = vec![ValueSet::full(4); 16];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        // Last rank needs every other line possibly below us, but a line
        // headed by a 4 against our 1 can only read greater.
        grid[0] = ValueSet::from_value(0);
        grid[4] = ValueSet::from_value(3);
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        let mut acc = HandlerAccumulator::new(16, &handlers);
        assert!(handler.enforce_consistency(&mut grid, &mut acc).is_err());
    }
}
