use std::sync::Arc;

use crate::lookup_tables::BinaryRelationTables;
use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

/// An arbitrary binary relation between two cells, pruned through the
/// memoised bitmask relation tables.
pub struct BinaryConstraintHandler {
    cells: [CellIndex; 2],
    key: String,
    tables: Option<Arc<BinaryRelationTables>>,
}

impl BinaryConstraintHandler {
    pub fn new(a: CellIndex, b: CellIndex, key: String) -> BinaryConstraintHandler {
        BinaryConstraintHandler {
            cells: [a, b],
            key,
            tables: None,
        }
    }
}

impl ConstraintHandler for BinaryConstraintHandler {
    fn name(&self) -> &'static str {
        "BinaryConstraint"
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
        match BinaryRelationTables::get(shape.num_values, &self.key) {
            Ok(tables) => {
                self.tables = Some(tables);
                Ok(())
            }
            Err(_) => Err(Contradiction),
        }
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();
        let [a, b] = self.cells;
        restrict_cell(grid, accumulator, b, tables.map_forward(grid[a]))?;
        restrict_cell(grid, accumulator, a, tables.map_backward(grid[b]))?;
        Ok(())
    }
}

/// A symmetric relation holding between every unordered pair of the cells.
///
/// With `hidden_singles` on (irreflexive relations like Renban, where the
/// cells are forced pairwise distinct), a candidate pool no larger than the
/// group pins lone candidates to their only possible cell.
pub struct BinaryPairwiseHandler {
    cells: Vec<CellIndex>,
    key: String,
    hidden_singles: bool,
    tables: Option<Arc<BinaryRelationTables>>,
}

impl BinaryPairwiseHandler {
    pub fn new(cells: Vec<CellIndex>, key: String, hidden_singles: bool) -> BinaryPairwiseHandler {
        BinaryPairwiseHandler {
            cells,
            key,
            hidden_singles,
            tables: None,
        }
    }
}

impl ConstraintHandler for BinaryPairwiseHandler {
    fn name(&self) -> &'static str {
        "BinaryPairwise"
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
        match BinaryRelationTables::get(shape.num_values, &self.key) {
            Ok(tables) => {
                self.tables = Some(tables);
                Ok(())
            }
            Err(_) => Err(Contradiction),
        }
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();
        let n = self.cells.len();

        for i in 0..n {
            let mut allowed = ValueSet::from_bits(u16::MAX);
            for j in 0..n {
                if i != j {
                    allowed &= tables.map_forward(grid[self.cells[j]]);
                }
            }
            restrict_cell(grid, accumulator, self.cells[i], allowed)?;
        }

        if self.hidden_singles {
            let mut seen_once = ValueSet::empty();
            let mut seen_multiple = ValueSet::empty();
            for &cell in &self.cells {
                seen_multiple |= seen_once & grid[cell];
                seen_once |= grid[cell];
            }
            if seen_once.count() < n {
                return Err(Contradiction);
            }
            if seen_once.count() == n {
                // Every candidate is needed somewhere.
                let lone = seen_once & !seen_multiple;
                if !lone.is_empty() {
                    for &cell in &self.cells {
                        let hits = grid[cell] & lone;
                        if !hits.is_empty() && grid[cell].has_multiple() {
                            if hits.has_multiple() {
                                return Err(Contradiction);
                            }
                            grid[cell] = hits;
                            accumulator.add_for_cell(cell);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
