use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

/// The given values must all appear somewhere in the cells; strict mode
/// additionally bans every other value.
pub struct RequiredValuesHandler {
    cells: Vec<CellIndex>,
    values: ValueSet,
    strict: bool,
}

impl RequiredValuesHandler {
    pub fn new(cells: Vec<CellIndex>, values: ValueSet, strict: bool) -> RequiredValuesHandler {
        RequiredValuesHandler {
            cells,
            values,
            strict,
        }
    }
}

/// Maximum bipartite matching of required values into distinct host cells.
/// `hosts[i]` is the cell mask for the i-th value.
fn values_have_distinct_hosts(hosts: &[u16]) -> bool {
    let mut assignee_of = [usize::MAX; 16];
    let mut matched = 0u16;

    for v in 0..hosts.len() {
        // Augmenting path search from value v.
        let mut visited = 0u16;
        if !try_assign(v, hosts, &mut assignee_of, &mut matched, &mut visited) {
            return false;
        }
    }
    true
}

fn try_assign(
    v: usize,
    hosts: &[u16],
    assignee_of: &mut [usize; 16],
    matched: &mut u16,
    visited: &mut u16,
) -> bool {
    let mut candidates = hosts[v] & !*visited;
    while candidates != 0 {
        let cell = candidates.trailing_zeros() as usize;
        candidates &= candidates - 1;
        *visited |= 1 << cell;
        if *matched & (1 << cell) == 0
            || try_assign(assignee_of[cell], hosts, assignee_of, matched, visited)
        {
            assignee_of[cell] = v;
            *matched |= 1 << cell;
            return true;
        }
    }
    false
}

impl ConstraintHandler for RequiredValuesHandler {
    fn name(&self) -> &'static str {
        "RequiredValues"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn initialize(
        &mut self,
        grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        _shape: &Shape,
    ) -> SolverResult {
        if self.values.count() > self.cells.len() {
            return Err(Contradiction);
        }
        if self.strict {
            for &cell in &self.cells {
                grid[cell] &= self.values;
                if grid[cell].is_empty() {
                    return Err(Contradiction);
                }
            }
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let mut hosts = Vec::with_capacity(self.values.count());
        let mut lone: Vec<(u8, CellIndex)> = Vec::new();
        // Hall-style matching only fits in a mask for group sizes up to 16;
        // larger groups still get the counting checks.
        let matchable = self.cells.len() <= 16;

        for v in self.values {
            let v_set = ValueSet::from_value(v);
            let mut mask = 0u16;
            let mut host_count = 0;
            let mut last_host = 0;
            for (i, &cell) in self.cells.iter().enumerate() {
                if grid[cell].intersects(v_set) {
                    if matchable {
                        mask |= 1 << i;
                    }
                    host_count += 1;
                    last_host = cell;
                }
            }
            match host_count {
                0 => return Err(Contradiction),
                1 => lone.push((v, last_host)),
                _ => {}
            }
            hosts.push(mask);
        }

        if matchable && !values_have_distinct_hosts(&hosts) {
            return Err(Contradiction);
        }

        // A required value with a single home claims that cell outright.
        for (v, cell) in lone {
            restrict_cell(grid, accumulator, cell, ValueSet::from_value(v))?;
        }
        Ok(())
    }
}

/// ANDs fixed candidate masks into the grid at setup; inert afterwards.
pub struct GivenCandidatesHandler {
    candidates: Vec<(CellIndex, ValueSet)>,
}

impl GivenCandidatesHandler {
    pub fn new(candidates: Vec<(CellIndex, ValueSet)>) -> GivenCandidatesHandler {
        GivenCandidatesHandler { candidates }
    }
}

impl ConstraintHandler for GivenCandidatesHandler {
    fn name(&self) -> &'static str {
        "GivenCandidates"
    }

    fn cells(&self) -> &[CellIndex] {
        &[]
    }

    fn essential(&self) -> bool {
        false
    }

    fn initialize(
        &mut self,
        grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        _shape: &Shape,
    ) -> SolverResult {
        for &(cell, values) in &self.candidates {
            grid[cell] &= values;
            if grid[cell].is_empty() {
                return Err(Contradiction);
            }
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        _grid: &mut [ValueSet],
        _accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        Ok(())
    }
}

/// Each circled digit equals the number of circles carrying that digit, so
/// a digit appears among the circles either exactly its own number of times
/// or not at all.
pub struct CountingCirclesHandler {
    cells: Vec<CellIndex>,
    num_values: u8,
}

impl CountingCirclesHandler {
    pub fn new(cells: Vec<CellIndex>) -> CountingCirclesHandler {
        CountingCirclesHandler {
            cells,
            num_values: 0,
        }
    }
}

impl ConstraintHandler for CountingCirclesHandler {
    fn name(&self) -> &'static str {
        "CountingCircles"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn initialize(
        &mut self,
        grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> SolverResult {
        self.num_values = shape.num_values as u8;
        // A digit larger than the circle count can never reach itself.
        let cap = ValueSet::full((self.cells.len() as u8).min(self.num_values));
        for &cell in &self.cells {
            grid[cell] &= cap;
            if grid[cell].is_empty() {
                return Err(Contradiction);
            }
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let limit = (self.cells.len() as u8).min(self.num_values);
        for vi in 0..limit {
            let v_set = ValueSet::from_value(vi);
            let needed = vi as usize + 1;

            let mut possible = 0;
            let mut fixed = 0;
            for &cell in &self.cells {
                if grid[cell].intersects(v_set) {
                    possible += 1;
                    if !grid[cell].has_multiple() {
                        fixed += 1;
                    }
                }
            }

            if fixed > 0 {
                if fixed > needed || possible < needed {
                    return Err(Contradiction);
                }
                if fixed == needed {
                    // Quota met; nobody else may take this digit.
                    for &cell in &self.cells {
                        if grid[cell].has_multiple() && grid[cell].intersects(v_set) {
                            restrict_cell(grid, accumulator, cell, !v_set)?;
                        }
                    }
                } else if possible == needed {
                    // Every candidate is needed to meet the quota.
                    for &cell in &self.cells {
                        if grid[cell].has_multiple() && grid[cell].intersects(v_set) {
                            restrict_cell(grid, accumulator, cell, v_set)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The control cell holds `k` exactly when the k-th line cell holds the
/// indexed value: the value's position on the line is spelt by the control.
pub struct IndexingHandler {
    cells: Vec<CellIndex>,
    line_len: usize,
    value: u8,
}

impl IndexingHandler {
    /// `cells[0]` is the control; the rest are the line in order.
    pub fn new(control: CellIndex, line: Vec<CellIndex>, value: u8) -> IndexingHandler {
        let line_len = line.len();
        let mut cells = vec![control];
        cells.extend(line);
        IndexingHandler {
            cells,
            line_len,
            value,
        }
    }

    fn control(&self) -> CellIndex {
        self.cells[0]
    }

    fn line(&self) -> &[CellIndex] {
        &self.cells[1..]
    }
}

impl ConstraintHandler for IndexingHandler {
    fn name(&self) -> &'static str {
        "Indexing"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let v_set = ValueSet::from_value(self.value);
        let control = self.control();

        let mut control_support = ValueSet::empty();
        for kv in grid[control] {
            let k = kv as usize + 1;
            if k <= self.line_len && grid[self.line()[k - 1]].intersects(v_set) {
                control_support |= ValueSet::from_value(kv);
            }
        }
        restrict_cell(grid, accumulator, control, control_support)?;

        // Positions the control cannot name may not hold the value.
        let control_values = grid[control];
        for j in 0..self.line_len {
            let cell = self.line()[j];
            if !control_values.contains(j as u8) && grid[cell].intersects(v_set) {
                restrict_cell(grid, accumulator, cell, !v_set)?;
            }
        }

        if !control_values.has_multiple() {
            let k = control_values.value() as usize + 1;
            restrict_cell(grid, accumulator, self.line()[k - 1], v_set)?;
        }
        Ok(())
    }
}

/// The four cells of a 2x2 square cover all three entropy bands
/// (low/middle/high thirds of the value range).
pub struct LocalEntropyHandler {
    cells: Vec<CellIndex>,
    groups: [ValueSet; 3],
}

impl LocalEntropyHandler {
    pub fn new(cells: Vec<CellIndex>) -> LocalEntropyHandler {
        LocalEntropyHandler {
            cells,
            groups: [ValueSet::empty(); 3],
        }
    }
}

impl ConstraintHandler for LocalEntropyHandler {
    fn name(&self) -> &'static str {
        "LocalEntropy"
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
        if shape.num_values % 3 != 0 {
            return Err(Contradiction);
        }
        let third = (shape.num_values / 3) as i32;
        for g in 0..3 {
            self.groups[g as usize] = ValueSet::from_range(g * third, (g + 1) * third - 1);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let mut host_masks = [0u16; 3];
        for (g, &group) in self.groups.iter().enumerate() {
            for (i, &cell) in self.cells.iter().enumerate() {
                if grid[cell].intersects(group) {
                    host_masks[g] |= 1 << i;
                }
            }
        }

        // Hall check over the three bands.
        for subset in 1u8..8 {
            let mut union = 0u16;
            for g in 0..3 {
                if subset & (1 << g) != 0 {
                    union |= host_masks[g];
                }
            }
            if (union.count_ones() as usize) < subset.count_ones() as usize {
                return Err(Contradiction);
            }
        }

        // A band with a single possible home owns that cell.
        for g in 0..3 {
            if host_masks[g].count_ones() == 1 {
                let i = host_masks[g].trailing_zeros() as usize;
                restrict_cell(grid, accumulator, self.cells[i], self.groups[g])?;
            }
        }
        Ok(())
    }
}

/// Overrides the search-priority score of its cells; never propagates.
pub struct PriorityHandler {
    cells: Vec<CellIndex>,
    priority: u32,
}

impl PriorityHandler {
    pub fn new(cells: Vec<CellIndex>, priority: u32) -> PriorityHandler {
        PriorityHandler { cells, priority }
    }

    pub fn override_priority(&self) -> u32 {
        self.priority
    }
}

impl ConstraintHandler for PriorityHandler {
    fn name(&self) -> &'static str {
        "Priority"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn essential(&self) -> bool {
        false
    }

    fn enforce_consistency(
        &mut self,
        _grid: &mut [ValueSet],
        _accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        Ok(())
    }
}

/// Unconditionally unsatisfiable.
pub struct FalseHandler {
    cells: Vec<CellIndex>,
}

impl FalseHandler {
    pub fn new(cells: Vec<CellIndex>) -> FalseHandler {
        FalseHandler { cells }
    }
}

impl ConstraintHandler for FalseHandler {
    fn name(&self) -> &'static str {
        "False"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        _shape: &Shape,
    ) -> SolverResult {
        Err(Contradiction)
    }

    fn enforce_consistency(
        &mut self,
        _grid: &mut [ValueSet],
        _accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        Err(Contradiction)
    }
}
