use crate::solver::all_different::AllDifferentEnforcer;
use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::ConstraintHandler;

/// All cells take pairwise different values.
///
/// Small groups carry no propagation of their own: the solver's per-cell
/// exclusion handlers clear conflicts as cells become fixed. A group of
/// exactly `num_values` cells is a house, which additionally gets hidden
/// singles and full matching-based pruning.
pub struct AllDifferentHandler {
    cells: Vec<CellIndex>,
    all_values: ValueSet,
    num_values: usize,
    enforcer: Option<AllDifferentEnforcer>,
}

impl AllDifferentHandler {
    pub fn new(cells: Vec<CellIndex>) -> AllDifferentHandler {
        AllDifferentHandler {
            cells,
            all_values: ValueSet::empty(),
            num_values: 0,
            enforcer: None,
        }
    }

    fn is_house(&self) -> bool {
        self.enforcer.is_some()
    }
}

impl ConstraintHandler for AllDifferentHandler {
    fn name(&self) -> &'static str {
        "AllDifferent"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn exclusion_cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn essential(&self) -> bool {
        // Pairwise conflicts are already cleared by the exclusion handlers
        // as each cell fixes, so nothing is left to verify on a full grid.
        false
    }

    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> SolverResult {
        self.num_values = shape.num_values as usize;
        self.all_values = ValueSet::full(shape.num_values as u8);
        if self.cells.len() > self.num_values {
            return Err(Contradiction);
        }
        if self.cells.len() == self.num_values {
            self.enforcer = Some(AllDifferentEnforcer::new(shape.num_values));
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let enforcer = match &mut self.enforcer {
            Some(enforcer) => enforcer,
            None => return Ok(()),
        };

        let mut seen_once = ValueSet::empty();
        let mut seen_multiple = ValueSet::empty();
        let mut total_count = 0;
        for &cell in &self.cells {
            let v = grid[cell];
            seen_multiple |= seen_once & v;
            seen_once |= v;
            total_count += v.count();
        }

        if seen_once != self.all_values {
            return Err(Contradiction);
        }
        if total_count == self.num_values {
            // Every cell fixed; the union check above is the whole story.
            return Ok(());
        }

        // Hidden singles: a value with a lone home claims that cell.
        let exactly_once = seen_once & !seen_multiple;
        if !exactly_once.is_empty() {
            for &cell in &self.cells {
                let hits = grid[cell] & exactly_once;
                if !hits.is_empty() && grid[cell].has_multiple() {
                    if hits.has_multiple() {
                        return Err(Contradiction);
                    }
                    grid[cell] = hits;
                    accumulator.add_for_cell(cell);
                }
            }
        }

        enforcer.enforce_all_different(grid, &self.cells, |cell| {
            accumulator.add_for_cell(cell)
        })
    }

    fn house_cells(&self) -> Option<&[CellIndex]> {
        if self.is_house() {
            Some(&self.cells)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::cell_accumulator::HandlerAccumulator;

    fn house_of(n: u32) -> (AllDifferentHandler, HandlerAccumulator) {
        let mut handler = AllDifferentHandler::new((0..n as usize).collect());
        let shape = Shape::square(n).unwrap();
        let mut exclusions = CellExclusions::new(n as usize);
        let mut grid = vec![ValueSet::full(n as u8); n as usize];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        (handler, HandlerAccumulator::new(n as usize, &handlers))
    }

    #[test]
    fn hidden_single_claims_cell() {
        let (mut handler, mut acc) = house_of(4);
        let mut grid = vec![
            ValueSet::from_iter([0u8, 1, 3]),
            ValueSet::from_iter([0u8, 1]),
            ValueSet::from_iter([0u8, 1, 2]),
            ValueSet::from_iter([0u8, 1]),
        ];
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // 4 only fits cell 0, 3 only fits cell 2.
        assert_eq!(grid[0], ValueSet::from_value(3));
        assert_eq!(grid[2], ValueSet::from_value(2));
    }

    #[test]
    fn missing_value_is_contradiction() {
        let (mut handler, mut acc) = house_of(4);
        let mut grid = vec![ValueSet::from_iter([0u8, 1, 2]); 4];
        assert!(handler.enforce_consistency(&mut grid, &mut acc).is_err());
    }

    #[test]
    fn small_groups_do_not_propagate() {
        let mut handler = AllDifferentHandler::new(vec![0, 1]);
        let shape = Shape::square(4).unwrap();
        let mut exclusions = CellExclusions::new(4);
        let mut grid = vec![ValueSet::full(4); 4];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        assert!(handler.house_cells().is_none());
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        let mut acc = HandlerAccumulator::new(4, &handlers);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::full(4));
    }
}
