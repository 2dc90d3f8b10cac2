use crate::bit_set::BitSet;
use crate::nfa::dfa::Dfa;
use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

/// The line must spell a word of the compiled DFA's language, one symbol
/// per cell.
///
/// Propagation is a forward reachability sweep over DFA state sets, an
/// acceptance intersection at the line's end, and a backward support sweep
/// that prunes both the state sets and the cell domains. The state sets are
/// pooled bitsets sized once at setup.
pub struct RegexLineHandler {
    cells: Vec<CellIndex>,
    dfa: Dfa,
    state_sets: Vec<BitSet>,
    accepting: BitSet,
}

impl RegexLineHandler {
    pub fn new(cells: Vec<CellIndex>, dfa: Dfa) -> RegexLineHandler {
        RegexLineHandler {
            cells,
            dfa,
            state_sets: Vec::new(),
            accepting: BitSet::new(0),
        }
    }
}

impl ConstraintHandler for RegexLineHandler {
    fn name(&self) -> &'static str {
        "RegexLine"
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
        if self.dfa.num_symbols != shape.num_values as usize {
            return Err(Contradiction);
        }
        let num_states = self.dfa.states.len();
        self.state_sets = vec![BitSet::new(num_states); self.cells.len() + 1];
        self.accepting = BitSet::new(num_states);
        for (s, state) in self.dfa.states.iter().enumerate() {
            if state.accepting {
                self.accepting.add(s);
            }
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let n = self.cells.len();
        let dfa = &self.dfa;

        // Forward reachability.
        self.state_sets[0].clear();
        self.state_sets[0].add(dfa.start_state);
        for i in 0..n {
            let domain = grid[self.cells[i]].bits();
            let (front, back) = self.state_sets.split_at_mut(i + 1);
            let next = &mut back[0];
            next.clear();
            for s in front[i].iter() {
                for t in &dfa.states[s].transitions {
                    if domain & t.mask != 0 {
                        next.add(t.state);
                    }
                }
            }
            if next.is_empty() {
                return Err(Contradiction);
            }
        }

        // Only accepting states may finish the line.
        self.state_sets[n].intersect(&self.accepting);
        if self.state_sets[n].is_empty() {
            return Err(Contradiction);
        }

        // Backward support: keep states that lead somewhere, collect the
        // values that carry them.
        for i in (0..n).rev() {
            let domain = grid[self.cells[i]].bits();
            let mut supported = 0u16;
            let (front, back) = self.state_sets.split_at_mut(i + 1);
            let current = &mut front[i];
            let next = &back[0];

            let members: Vec<usize> = current.iter().collect();
            for s in members {
                let mut contributes = false;
                for t in &dfa.states[s].transitions {
                    if next.has(t.state) {
                        let values = domain & t.mask;
                        if values != 0 {
                            supported |= values;
                            contributes = true;
                        }
                    }
                }
                if !contributes {
                    current.remove(s);
                }
            }

            restrict_cell(
                grid,
                accumulator,
                self.cells[i],
                ValueSet::from_bits(supported),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfa::regex_parser;

    fn handler_for(pattern: &str, num_values: u32, cells: Vec<CellIndex>) -> RegexLineHandler {
        let nfa = regex_parser::compile(pattern, num_values as usize).unwrap();
        let dfa = Dfa::from_nfa(&nfa).unwrap().minimize();
        RegexLineHandler::new(cells, dfa)
    }

    fn setup(
        handler: &mut RegexLineHandler,
        num_values: u32,
        num_cells: usize,
    ) -> (Vec<ValueSet>, HandlerAccumulator) {
        let shape = Shape::square(num_values).unwrap();
        let mut exclusions = CellExclusions::new(num_cells);
        let mut grid = vec![ValueSet::full(num_values as u8); num_cells];
        handler
            .initialize(&mut grid, &mut exclusions, &shape)
            .unwrap();
        let handlers: Vec<Box<dyn ConstraintHandler>> = vec![];
        (grid, HandlerAccumulator::new(num_cells, &handlers))
    }

    #[test]
    fn two_cell_pair_pattern_fixes_both() {
        // (12)+ over a 2-cell line: only "12" fits.
        let mut handler = handler_for("(12)+", 9, vec![0, 1]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 2);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_value(0));
        assert_eq!(grid[1], ValueSet::from_value(1));
    }

    #[test]
    fn class_pattern_prunes_domains() {
        let mut handler = handler_for("[1-3][4-6][1-3]", 9, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_iter(0u8..3));
        assert_eq!(grid[1], ValueSet::from_iter(3u8..6));
        assert_eq!(grid[2], ValueSet::from_iter(0u8..3));
    }

    #[test]
    fn unmatchable_length_is_contradiction() {
        // (12)+ needs an even number of cells.
        let mut handler = handler_for("(12)+", 9, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        assert!(handler.enforce_consistency(&mut grid, &mut acc).is_err());
    }

    #[test]
    fn constrained_neighbour_back_propagates() {
        // 1.3|245 over three cells with the middle fixed to 4.
        let mut handler = handler_for("1.3|245", 9, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[1] = ValueSet::from_value(3);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Both alternatives still alive for cells 0 and 2.
        assert_eq!(grid[0], ValueSet::from_iter([0u8, 1]));
        assert_eq!(grid[2], ValueSet::from_iter([2u8, 4]));
    }
}
