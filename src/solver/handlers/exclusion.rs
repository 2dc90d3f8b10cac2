use crate::solver::cell_accumulator::{HandlerAccumulator, Registration};
use crate::solver::{Contradiction, SolverResult};
use crate::types::CellIndex;
use crate::value_set::ValueSet;

use super::ConstraintHandler;

/// Clears a freshly fixed cell's value from everything in its exclusion set.
///
/// The solver adds exactly one of these per cell; the accumulator promotes
/// it to the front of the queue when the cell fixes.
pub struct UniqueValueExclusionHandler {
    cells: [CellIndex; 1],
    exclusion_list: Vec<CellIndex>,
}

impl UniqueValueExclusionHandler {
    pub fn new(cell: CellIndex, exclusion_list: Vec<CellIndex>) -> UniqueValueExclusionHandler {
        UniqueValueExclusionHandler {
            cells: [cell],
            exclusion_list,
        }
    }
}

impl ConstraintHandler for UniqueValueExclusionHandler {
    fn name(&self) -> &'static str {
        "UniqueValueExclusion"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn registration(&self) -> Registration {
        Registration::Exclusion(self.cells[0])
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let value = grid[self.cells[0]];
        if value.has_multiple() {
            return Ok(());
        }
        for &other in &self.exclusion_list {
            if grid[other].intersects(value) {
                grid[other].remove_set(value);
                if grid[other].is_empty() {
                    return Err(Contradiction);
                }
                accumulator.add_for_cell(other);
            }
        }
        Ok(())
    }
}

/// Like `UniqueValueExclusionHandler`, but the cells to clear depend on the
/// value the cell fixes to (anti-taxicab style constraints).
pub struct ValueDependentUniqueValueExclusionHandler {
    cells: [CellIndex; 1],
    value_map: Vec<Vec<CellIndex>>,
}

impl ValueDependentUniqueValueExclusionHandler {
    /// `value_map[v]` lists the cells that must differ when the cell takes
    /// value index `v`.
    pub fn new(
        cell: CellIndex,
        value_map: Vec<Vec<CellIndex>>,
    ) -> ValueDependentUniqueValueExclusionHandler {
        ValueDependentUniqueValueExclusionHandler {
            cells: [cell],
            value_map,
        }
    }
}

impl ConstraintHandler for ValueDependentUniqueValueExclusionHandler {
    fn name(&self) -> &'static str {
        "ValueDependentUniqueValueExclusion"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let value = grid[self.cells[0]];
        if value.has_multiple() {
            return Ok(());
        }
        for &other in &self.value_map[value.value() as usize] {
            if grid[other].intersects(value) {
                grid[other].remove_set(value);
                if grid[other].is_empty() {
                    return Err(Contradiction);
                }
                accumulator.add_for_cell(other);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_accumulator(num_cells: usize) -> HandlerAccumulator {
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        HandlerAccumulator::new(num_cells, &handlers)
    }

    #[test]
    fn fixed_cell_clears_neighbours() {
        let mut handler = UniqueValueExclusionHandler::new(0, vec![1, 2]);
        let mut acc = empty_accumulator(3);
        let mut grid = vec![
            ValueSet::from_value(2),
            ValueSet::full(4),
            ValueSet::from_iter([2u8, 3]),
        ];
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 1, 3]));
        assert_eq!(grid[2], ValueSet::from_value(3));
    }

    #[test]
    fn emptying_a_neighbour_is_a_contradiction() {
        let mut handler = UniqueValueExclusionHandler::new(0, vec![1]);
        let mut acc = empty_accumulator(2);
        let mut grid = vec![ValueSet::from_value(2), ValueSet::from_value(2)];
        assert!(handler.enforce_consistency(&mut grid, &mut acc).is_err());
    }

    #[test]
    fn value_dependent_map_selects_targets() {
        let mut handler =
            ValueDependentUniqueValueExclusionHandler::new(0, vec![vec![1], vec![2]]);
        let mut acc = empty_accumulator(3);
        let mut grid = vec![
            ValueSet::from_value(1),
            ValueSet::full(2),
            ValueSet::full(2),
        ];
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[1], ValueSet::full(2));
        assert_eq!(grid[2], ValueSet::from_value(0));
    }
}
