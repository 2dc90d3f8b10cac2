use std::collections::HashMap;

use crate::types::CellIndex;
use crate::value_set::ValueSet;

/// Overrides the selector's choice at a given step of a stepped run.
#[derive(Debug, Clone, Default)]
pub struct StepGuide {
    pub cell: Option<CellIndex>,
    pub value: Option<u32>,
}

pub type StepGuides = HashMap<u64, StepGuide>;

/// What the selector decided for one search iteration.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    /// Position in `cell_order` of the cell to assign.
    pub cell_position: usize,
    /// Cell-order depth after all taken cells are fixed. Everything in
    /// `cell_position..next_depth` is a singleton once `value` is applied.
    pub next_depth: usize,
    /// The value to assign, as a singleton set.
    pub value: ValueSet,
    /// Candidates remaining at the chosen cell (0 means a dead frame).
    pub count: usize,
}

/// Picks the next cell (and value) to branch on.
///
/// The score of a cell is its decayed backtrack-trigger count divided by its
/// domain size; the highest score wins, falling back to smallest domain
/// when no cell has triggered yet. New nodes with wide domains may instead
/// branch on a house bivalue: a value with exactly two homes in some house.
pub struct CandidateSelector {
    cell_order: Vec<CellIndex>,
    houses: Vec<Vec<CellIndex>>,
    /// Pending second half of a house-bivalue branch, per depth.
    forced_branch: Vec<Option<(CellIndex, u8)>>,
}

impl CandidateSelector {
    pub fn new(num_cells: usize, houses: Vec<Vec<CellIndex>>) -> CandidateSelector {
        CandidateSelector {
            cell_order: (0..num_cells).collect(),
            houses,
            forced_branch: vec![None; num_cells + 1],
        }
    }

    pub fn cell_order(&self) -> &[CellIndex] {
        &self.cell_order
    }

    /// Read-only view for observers; `upto` limits the slice.
    pub fn get_cell_order(&self, upto: Option<usize>) -> &[CellIndex] {
        match upto {
            Some(upto) => &self.cell_order[..upto.min(self.cell_order.len())],
            None => &self.cell_order,
        }
    }

    pub fn set_cell_order(&mut self, order: Vec<CellIndex>) {
        assert_eq!(order.len(), self.cell_order.len());
        self.cell_order = order;
    }

    pub fn reset(&mut self) {
        self.forced_branch.fill(None);
    }

    pub fn select_next_candidate(
        &mut self,
        cell_depth: usize,
        grid: &[ValueSet],
        backtrack_triggers: &[u32],
        step_guide: Option<&StepGuide>,
        is_new_node: bool,
    ) -> Selection {
        let num_cells = self.cell_order.len();
        if cell_depth >= num_cells {
            return Selection {
                cell_position: cell_depth,
                next_depth: cell_depth,
                value: ValueSet::empty(),
                count: 0,
            };
        }

        if is_new_node {
            self.forced_branch[cell_depth] = None;
        } else if let Some((cell, value)) = self.forced_branch[cell_depth].take() {
            // Second half of a bivalue branch: the value moves to the other
            // home.
            let position = self.position_of(cell_depth, cell);
            self.cell_order.swap(cell_depth, position);
            let value = ValueSet::from_value(value) & grid[cell];
            return Selection {
                cell_position: cell_depth,
                next_depth: cell_depth + 1,
                value,
                count: if value.is_empty() { 0 } else { 1 },
            };
        }

        // Fast path: the frontmost cell is already decided.
        let first_cell = self.cell_order[cell_depth];
        let (mut position, mut count) = if grid[first_cell].is_singleton() {
            (cell_depth, 1)
        } else {
            self.search_best_cell(cell_depth, grid, backtrack_triggers)
        };

        let mut value = grid[self.cell_order[position]].min_set();

        // House bivalue branching: on fresh wide nodes, a value with two
        // homes in a contended house can beat plain cell branching. Guided
        // steps keep the plain selection so the override lands intact.
        if is_new_node && count > 2 && step_guide.is_none() {
            let cell = self.cell_order[position];
            let bt = backtrack_triggers[cell];
            if bt > 0 {
                // Ceiling of twice the chosen cell's score.
                let threshold = (2 * bt + count as u32 - 1) / count as u32;
                if let Some((pair_cell, other_cell, v)) =
                    self.find_house_bivalue(grid, backtrack_triggers, threshold)
                {
                    let pair_position = self.position_of(cell_depth, pair_cell);
                    self.cell_order.swap(cell_depth, pair_position);
                    self.forced_branch[cell_depth] = Some((other_cell, v));
                    return Selection {
                        cell_position: cell_depth,
                        next_depth: cell_depth + 1,
                        value: ValueSet::from_value(v),
                        count: 2,
                    };
                }
            }
        }

        // Step guides override whatever was chosen; unusable guides (a cell
        // already resolved, a value not in the domain) are ignored.
        if let Some(guide) = step_guide {
            if let Some(cell) = guide.cell {
                if let Some(guided_position) = self.try_position_of(cell_depth, cell) {
                    position = guided_position;
                    count = grid[cell].count();
                    value = grid[cell].min_set();
                }
            }
            if let Some(v) = guide.value {
                if v >= 1 {
                    let guided = ValueSet::from_value(v as u8 - 1);
                    if grid[self.cell_order[position]].intersects(guided) {
                        value = guided;
                    }
                }
            }
        }

        self.cell_order.swap(cell_depth, position);

        let mut next_depth = cell_depth + 1;
        if count == 1 {
            // Sweep every other decided cell forward so the engine fixes
            // them all in one step.
            for i in next_depth..num_cells {
                if grid[self.cell_order[i]].is_singleton() {
                    self.cell_order.swap(i, next_depth);
                    next_depth += 1;
                }
            }
        }

        Selection {
            cell_position: cell_depth,
            next_depth,
            value,
            count,
        }
    }

    fn position_of(&self, from: usize, cell: CellIndex) -> usize {
        self.try_position_of(from, cell)
            .expect("cell not in the unresolved tail")
    }

    fn try_position_of(&self, from: usize, cell: CellIndex) -> Option<usize> {
        self.cell_order[from..]
            .iter()
            .position(|&c| c == cell)
            .map(|p| p + from)
    }

    fn search_best_cell(
        &self,
        cell_depth: usize,
        grid: &[ValueSet],
        backtrack_triggers: &[u32],
    ) -> (usize, usize) {
        let mut best_position = cell_depth;
        let mut best_bt = 0u64;
        let mut best_count = 1usize;
        let mut min_count_position = cell_depth;
        let mut min_count = usize::MAX;

        for (i, &cell) in self.cell_order.iter().enumerate().skip(cell_depth) {
            let count = grid[cell].count();
            if count <= 1 {
                // Fixed or dead; either way it decides this frame.
                return (i, count);
            }
            if count < min_count {
                min_count = count;
                min_count_position = i;
            }
            // score = bt / count, compared by cross-multiplication.
            let bt = backtrack_triggers[cell] as u64;
            if bt * best_count as u64 > best_bt * count as u64 {
                best_bt = bt;
                best_count = count;
                best_position = i;
            }
        }

        if best_bt == 0 {
            (min_count_position, min_count)
        } else {
            (best_position, best_count)
        }
    }

    /// A value appearing in exactly two cells of a contended house, scored
    /// by the larger of the two cells' triggers.
    fn find_house_bivalue(
        &self,
        grid: &[ValueSet],
        backtrack_triggers: &[u32],
        threshold: u32,
    ) -> Option<(CellIndex, CellIndex, u8)> {
        let mut best: Option<(u32, CellIndex, CellIndex, u8)> = None;

        for house in &self.houses {
            let contended = house.iter().any(|&c| {
                backtrack_triggers[c] >= threshold && grid[c].has_multiple()
            });
            if !contended {
                continue;
            }

            let mut seen_once = ValueSet::empty();
            let mut seen_twice = ValueSet::empty();
            let mut seen_more = ValueSet::empty();
            for &cell in house {
                let v = grid[cell];
                seen_more |= seen_twice & v;
                seen_twice |= seen_once & v;
                seen_once |= v;
            }
            let mut bivalues = seen_twice & !seen_more;
            while let Some(v_set) = bivalues.pop() {
                let v = v_set.value();
                let mut pair = [usize::MAX; 2];
                let mut found = 0;
                let mut fixed_home = false;
                for &cell in house {
                    if grid[cell].intersects(v_set) {
                        if !grid[cell].has_multiple() {
                            fixed_home = true;
                            break;
                        }
                        pair[found] = cell;
                        found += 1;
                    }
                }
                if fixed_home || found != 2 {
                    continue;
                }
                let score = backtrack_triggers[pair[0]].max(backtrack_triggers[pair[1]]);
                if score >= threshold && best.map_or(true, |(s, ..)| score > s) {
                    best = Some((score, pair[0], pair[1], v));
                }
            }
        }

        best.map(|(_, a, b, v)| (a, b, v))
    }
}
