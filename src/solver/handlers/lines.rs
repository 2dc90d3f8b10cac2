use std::sync::Arc;

use crate::bit_set::BitSet;
use crate::lookup_tables::LookupTables;
use crate::solver::cell_accumulator::HandlerAccumulator;
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

use super::{restrict_cell, ConstraintHandler};

fn packed_min_max(tables: &LookupTables, grid: &[ValueSet], cells: &[CellIndex]) -> (i32, i32) {
    let packed: u64 = cells
        .iter()
        .map(|&c| tables.min_max[grid[c].bits() as usize])
        .sum();
    ((packed >> 32) as i32, (packed & 0xffff_ffff) as i32)
}

/// The two bread values (1 and the maximum) sit somewhere on the line; the
/// cells strictly between them sum to the given total.
pub struct LunchboxHandler {
    cells: Vec<CellIndex>,
    sum: u32,
    num_values: u8,
    tables: Option<Arc<LookupTables>>,
}

impl LunchboxHandler {
    pub fn new(sum: u32, cells: Vec<CellIndex>) -> LunchboxHandler {
        LunchboxHandler {
            cells,
            sum,
            num_values: 0,
            tables: None,
        }
    }
}

impl ConstraintHandler for LunchboxHandler {
    fn name(&self) -> &'static str {
        "Lunchbox"
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
        if self.cells.len() < 2 {
            return Err(Contradiction);
        }
        self.num_values = shape.num_values as u8;
        self.tables = Some(LookupTables::get(shape.num_values));
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();
        let n = self.cells.len();
        let breads = ValueSet::from_value(0) | ValueSet::from_value(self.num_values - 1);

        let mut supported = vec![ValueSet::empty(); n];

        // Try every placement of the two breads.
        for p in 0..n {
            for q in p + 1..n {
                let p_breads = grid[self.cells[p]] & breads;
                let q_breads = grid[self.cells[q]] & breads;
                // The two cells must host both breads between them.
                if (p_breads | q_breads) != breads || p_breads.is_empty() || q_breads.is_empty()
                {
                    continue;
                }

                // Interior bounds with breads unavailable.
                let mut feasible = true;
                let mut interior_min = 0i32;
                let mut interior_max = 0i32;
                for i in p + 1..q {
                    let v = grid[self.cells[i]] & !breads;
                    if v.is_empty() {
                        feasible = false;
                        break;
                    }
                    let packed = tables.min_max[v.bits() as usize];
                    interior_min += (packed >> 32) as i32;
                    interior_max += (packed & 0xffff_ffff) as i32;
                }
                if !feasible
                    || (self.sum as i32) < interior_min
                    || (self.sum as i32) > interior_max
                {
                    continue;
                }

                // Record supports for each workable bread orientation.
                let one = ValueSet::from_value(0);
                let top = ValueSet::from_value(self.num_values - 1);
                let mut p_support = ValueSet::empty();
                let mut q_support = ValueSet::empty();
                if p_breads.intersects(one) && q_breads.intersects(top) {
                    p_support |= one;
                    q_support |= top;
                }
                if p_breads.intersects(top) && q_breads.intersects(one) {
                    p_support |= top;
                    q_support |= one;
                }
                if p_support.is_empty() {
                    continue;
                }
                supported[p] |= p_support;
                supported[q] |= q_support;

                for i in 0..n {
                    if i == p || i == q {
                        continue;
                    }
                    if i < p || i > q {
                        supported[i] |= grid[self.cells[i]] & !breads;
                    } else {
                        let own = grid[self.cells[i]] & !breads;
                        let packed = tables.min_max[own.bits() as usize];
                        let others_min = interior_min - (packed >> 32) as i32;
                        let others_max = interior_max - (packed & 0xffff_ffff) as i32;
                        let allowed = ValueSet::from_range(
                            self.sum as i32 - others_max - 1,
                            self.sum as i32 - others_min - 1,
                        );
                        supported[i] |= own & allowed;
                    }
                }
            }
        }

        for (i, &cell) in self.cells.iter().enumerate() {
            restrict_cell(grid, accumulator, cell, supported[i])?;
        }
        Ok(())
    }
}

/// Every maximal run of line cells within one box has the same sum.
pub struct RegionSumLineHandler {
    cells: Vec<CellIndex>,
    segments: Vec<Vec<CellIndex>>,
    tables: Option<Arc<LookupTables>>,
}

impl RegionSumLineHandler {
    pub fn new(cells: Vec<CellIndex>) -> RegionSumLineHandler {
        RegionSumLineHandler {
            cells,
            segments: Vec::new(),
            tables: None,
        }
    }
}

impl ConstraintHandler for RegionSumLineHandler {
    fn name(&self) -> &'static str {
        "RegionSumLine"
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
        let box_of = |cell: CellIndex| {
            let (r, c) = shape.cell_row_col(cell);
            (r / shape.box_height, c / shape.box_width)
        };

        let mut segments: Vec<Vec<CellIndex>> = Vec::new();
        for &cell in &self.cells {
            match segments.last_mut() {
                Some(segment) if box_of(*segment.last().unwrap()) == box_of(cell) => {
                    segment.push(cell);
                }
                _ => segments.push(vec![cell]),
            }
        }
        // A single-segment line constrains nothing.
        if segments.len() < 2 {
            segments.clear();
        }
        self.segments = segments;
        self.tables = Some(LookupTables::get(shape.num_values));
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        if self.segments.is_empty() {
            return Ok(());
        }
        let tables = self.tables.clone().unwrap();

        // The common sum must fit inside every segment's bounds.
        let mut sum_low = i32::MIN;
        let mut sum_high = i32::MAX;
        for segment in &self.segments {
            let (min, max) = packed_min_max(&tables, grid, segment);
            sum_low = sum_low.max(min);
            sum_high = sum_high.min(max);
        }
        if sum_low > sum_high {
            return Err(Contradiction);
        }

        for segment in &self.segments {
            let (min, max) = packed_min_max(&tables, grid, segment);
            for &cell in segment {
                let packed = tables.min_max[grid[cell].bits() as usize];
                let others_min = min - (packed >> 32) as i32;
                let others_max = max - (packed & 0xffff_ffff) as i32;
                let allowed =
                    ValueSet::from_range(sum_low - others_max - 1, sum_high - others_min - 1);
                restrict_cell(grid, accumulator, cell, allowed)?;
            }
        }
        Ok(())
    }
}

/// The line splits into consecutive runs each summing to `sum`; on a loop
/// the first run may wrap around the end.
///
/// Search states are the partial run sums `0..sum` (hitting `sum` closes the
/// run and restarts at 0), tracked per position in pooled bitsets sized at
/// setup, so any target a line can express is representable.
pub struct SumLineHandler {
    cells: Vec<CellIndex>,
    sum: u32,
    is_loop: bool,
    partials: Vec<BitSet>,
}

impl SumLineHandler {
    pub fn new(sum: u32, is_loop: bool, cells: Vec<CellIndex>) -> SumLineHandler {
        SumLineHandler {
            cells,
            sum,
            is_loop,
            partials: Vec::new(),
        }
    }

    /// The partial sum after adding display value `value`, if the run still
    /// fits; hitting `sum` exactly closes the run and restarts at 0.
    #[inline]
    fn advance(sum: u32, partial: u32, value: u32) -> Option<u32> {
        let q = partial + value;
        match q.cmp(&sum) {
            std::cmp::Ordering::Less => Some(q),
            std::cmp::Ordering::Equal => Some(0),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// Forward/backward sweep for a fixed starting partial sum; ORs the
    /// supported values per cell into `supported`. Returns whether any
    /// assignment works.
    fn sweep(&mut self, grid: &[ValueSet], start: u32, supported: &mut [ValueSet]) -> bool {
        let n = self.cells.len();
        let sum = self.sum;
        let cells = &self.cells;

        self.partials[0].clear();
        self.partials[0].add(start as usize);
        for i in 0..n {
            let (front, back) = self.partials.split_at_mut(i + 1);
            let next = &mut back[0];
            next.clear();
            for p in front[i].iter() {
                for v in grid[cells[i]] {
                    if let Some(q) = Self::advance(sum, p as u32, v as u32 + 1) {
                        next.add(q as usize);
                    }
                }
            }
            if next.is_empty() {
                return false;
            }
        }
        // The line must end on a closed run (or back at the wrap partial).
        if !self.partials[n].has(start as usize) {
            return false;
        }

        let mut reachable = BitSet::new(sum as usize);
        let mut prev = BitSet::new(sum as usize);
        reachable.add(start as usize);
        for i in (0..n).rev() {
            prev.clear();
            for p in self.partials[i].iter() {
                for v in grid[cells[i]] {
                    if let Some(q) = Self::advance(sum, p as u32, v as u32 + 1) {
                        if reachable.has(q as usize) {
                            prev.add(p);
                            supported[i] |= ValueSet::from_value(v);
                        }
                    }
                }
            }
            if prev.is_empty() {
                return false;
            }
            std::mem::swap(&mut reachable, &mut prev);
        }
        true
    }
}

impl ConstraintHandler for SumLineHandler {
    fn name(&self) -> &'static str {
        "SumLine"
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
        // Every run holds at least one positive value, so a zero target can
        // never close.
        if self.sum == 0 {
            return Err(Contradiction);
        }
        self.partials = vec![BitSet::new(self.sum as usize); self.cells.len() + 1];
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let n = self.cells.len();
        let mut supported = vec![ValueSet::empty(); n];

        let mut any = false;
        if self.is_loop {
            for start in 0..self.sum {
                any |= self.sweep(grid, start, &mut supported);
            }
        } else {
            any = self.sweep(grid, 0, &mut supported);
        }
        if !any {
            return Err(Contradiction);
        }

        for (i, &cell) in self.cells.iter().enumerate() {
            restrict_cell(grid, accumulator, cell, supported[i])?;
        }
        Ok(())
    }
}

/// Interior cells sit strictly between the two end values.
pub struct BetweenHandler {
    cells: Vec<CellIndex>,
}

impl BetweenHandler {
    pub fn new(cells: Vec<CellIndex>) -> BetweenHandler {
        BetweenHandler { cells }
    }
}

impl ConstraintHandler for BetweenHandler {
    fn name(&self) -> &'static str {
        "Between"
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
        if self.cells.len() < 2 {
            return Err(Contradiction);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        enforce_end_pair(grid, accumulator, &self.cells, |x, y, interior| {
            let low = x.min(y);
            let high = x.max(y);
            if high - low < 2 {
                // No room for any interior value.
                interior.is_empty()
            } else {
                true
            }
        }, |x, y| {
            let low = x.min(y) as i32;
            let high = x.max(y) as i32;
            ValueSet::from_range(low, high - 2) // indexes of (low, high) open
        })
    }
}

/// End cells differ by at least `min_diff`; interior cells avoid the whole
/// closed interval between them.
pub struct LockoutHandler {
    cells: Vec<CellIndex>,
    min_diff: u32,
}

impl LockoutHandler {
    pub fn new(min_diff: u32, cells: Vec<CellIndex>) -> LockoutHandler {
        LockoutHandler { cells, min_diff }
    }
}

impl ConstraintHandler for LockoutHandler {
    fn name(&self) -> &'static str {
        "Lockout"
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
        if self.cells.len() < 2 {
            return Err(Contradiction);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let min_diff = self.min_diff;
        enforce_end_pair(
            grid,
            accumulator,
            &self.cells,
            move |x, y, _interior| x.abs_diff(y) >= min_diff,
            |x, y| {
                let low = x.min(y) as i32;
                let high = x.max(y) as i32;
                // Everything outside [low, high], as indexes.
                ValueSet::from_range(0, low - 2) | ValueSet::from_range(high, i32::MAX)
            },
        )
    }
}

/// Shared end-pair enumeration for Between and Lockout: every (x, y) end
/// assignment that passes `pair_ok` and leaves each interior cell a value in
/// `interior_allowed(x, y)` contributes support.
fn enforce_end_pair<P, A>(
    grid: &mut [ValueSet],
    accumulator: &mut HandlerAccumulator,
    cells: &[CellIndex],
    pair_ok: P,
    interior_allowed: A,
) -> SolverResult
where
    P: Fn(u32, u32, &[CellIndex]) -> bool,
    A: Fn(u32, u32) -> ValueSet,
{
    let n = cells.len();
    let (first, last) = (cells[0], cells[n - 1]);
    let interior = &cells[1..n - 1];

    let mut first_support = ValueSet::empty();
    let mut last_support = ValueSet::empty();
    let mut interior_support = vec![ValueSet::empty(); interior.len()];

    for xv in grid[first] {
        let x = xv as u32 + 1;
        for yv in grid[last] {
            let y = yv as u32 + 1;
            if !pair_ok(x, y, interior) {
                continue;
            }
            let allowed = interior_allowed(x, y);
            if interior
                .iter()
                .any(|&cell| (grid[cell] & allowed).is_empty())
            {
                continue;
            }
            first_support |= ValueSet::from_value(xv);
            last_support |= ValueSet::from_value(yv);
            for (i, &cell) in interior.iter().enumerate() {
                interior_support[i] |= grid[cell] & allowed;
            }
        }
    }

    restrict_cell(grid, accumulator, first, first_support)?;
    restrict_cell(grid, accumulator, last, last_support)?;
    for (i, &cell) in interior.iter().enumerate() {
        restrict_cell(grid, accumulator, cell, interior_support[i])?;
    }
    Ok(())
}

/// Exactly `count` cells are visible along the line: a cell is visible when
/// it exceeds everything before it.
pub struct SkyscraperHandler {
    cells: Vec<CellIndex>,
    count: u32,
}

impl SkyscraperHandler {
    pub fn new(count: u32, cells: Vec<CellIndex>) -> SkyscraperHandler {
        SkyscraperHandler { cells, count }
    }
}

impl ConstraintHandler for SkyscraperHandler {
    fn name(&self) -> &'static str {
        "Skyscraper"
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
        // Visible heights strictly increase along the line, so no more than
        // `num_values` cells can ever be seen, however long the line is.
        // This also keeps the visible-count bit positions inside a word.
        if self.count == 0
            || self.count > shape.num_values
            || self.count as usize > self.cells.len()
        {
            return Err(Contradiction);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let n = self.cells.len();
        // forward[i][m] = bitmask over visible-counts reachable before cell
        // i with running maximum m (0 = nothing seen yet).
        let mut forward = vec![[0u32; 17]; n + 1];
        forward[0][0] = 1;
        for i in 0..n {
            for m in 0..17u32 {
                let counts = forward[i][m as usize];
                if counts == 0 {
                    continue;
                }
                for v in grid[self.cells[i]] {
                    let v = v as u32 + 1;
                    if v > m {
                        forward[i + 1][v as usize] |= counts << 1;
                    } else {
                        forward[i + 1][m as usize] |= counts;
                    }
                }
            }
        }

        // backward[i][m] = counts c such that (m, c) at position i can still
        // finish on exactly `count` visible.
        let mut backward = vec![[0u32; 17]; n + 1];
        for m in 0..17 {
            backward[n][m] = 1 << self.count;
        }
        for i in (0..n).rev() {
            for m in 0..17u32 {
                let mut counts = 0u32;
                for v in grid[self.cells[i]] {
                    let v = v as u32 + 1;
                    counts |= if v > m {
                        backward[i + 1][v as usize] >> 1
                    } else {
                        backward[i + 1][m as usize]
                    };
                }
                backward[i][m as usize] = counts;
            }
        }

        for i in 0..n {
            let mut supported = ValueSet::empty();
            for v in grid[self.cells[i]] {
                let d = v as u32 + 1;
                for m in 0..17u32 {
                    let counts = forward[i][m as usize];
                    if counts == 0 {
                        continue;
                    }
                    let ok = if d > m {
                        counts & (backward[i + 1][d as usize] >> 1) != 0
                    } else {
                        counts & backward[i + 1][m as usize] != 0
                    };
                    if ok {
                        supported |= ValueSet::from_value(v);
                        break;
                    }
                }
            }
            restrict_cell(grid, accumulator, self.cells[i], supported)?;
        }
        Ok(())
    }
}

/// The first cell that is blocked by an earlier, taller cell carries the
/// given value.
pub struct HiddenSkyscraperHandler {
    cells: Vec<CellIndex>,
    value: u32,
}

impl HiddenSkyscraperHandler {
    pub fn new(value: u32, cells: Vec<CellIndex>) -> HiddenSkyscraperHandler {
        HiddenSkyscraperHandler { cells, value }
    }
}

impl ConstraintHandler for HiddenSkyscraperHandler {
    fn name(&self) -> &'static str {
        "HiddenSkyscraper"
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
        if self.value == 0 || self.value > shape.num_values {
            return Err(Contradiction);
        }
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let n = self.cells.len();
        let clue = self.value;

        // Not-done states are running maxima; done absorbs everything after
        // the first hidden cell matched the clue.
        let mut fwd_nd = vec![0u32; n + 1];
        let mut fwd_done = vec![false; n + 1];
        fwd_nd[0] = 1; // max 0
        for i in 0..n {
            for v in grid[self.cells[i]] {
                let d = v as u32 + 1;
                let lower = fwd_nd[i] & ((1 << d) - 1); // maxima below d
                if lower != 0 {
                    fwd_nd[i + 1] |= 1 << d;
                }
                let blocked = fwd_nd[i] & !((1 << d) - 1) & !1; // maxima ≥ d
                if blocked != 0 && d == clue {
                    fwd_done[i + 1] = true;
                }
            }
            if fwd_done[i] {
                fwd_done[i + 1] = true;
            }
        }

        let mut bwd_nd = vec![0u32; n + 1];
        // Completion from done needs nothing further.
        for i in (0..n).rev() {
            let mut reach = 0u32;
            for m in 1..17u32 {
                let mut ok = false;
                for v in grid[self.cells[i]] {
                    let d = v as u32 + 1;
                    if d > m {
                        if bwd_nd[i + 1] & (1 << d) != 0 {
                            ok = true;
                        }
                    } else if d == clue {
                        ok = true;
                    }
                    if ok {
                        break;
                    }
                }
                if ok {
                    reach |= 1 << m;
                }
            }
            // Max 0 (nothing seen): every value is a new visible building.
            let mut ok0 = false;
            for v in grid[self.cells[i]] {
                let d = v as u32 + 1;
                if bwd_nd[i + 1] & (1 << d) != 0 {
                    ok0 = true;
                    break;
                }
            }
            if ok0 {
                reach |= 1;
            }
            bwd_nd[i] = reach;
        }

        for i in 0..n {
            let mut supported = ValueSet::empty();
            if fwd_done[i] {
                supported = grid[self.cells[i]];
            } else {
                for v in grid[self.cells[i]] {
                    let d = v as u32 + 1;
                    let lower = fwd_nd[i] & ((1 << d) - 1);
                    if lower != 0 && bwd_nd[i + 1] & (1 << d) != 0 {
                        supported |= ValueSet::from_value(v);
                        continue;
                    }
                    let blocked = fwd_nd[i] & !((1 << d) - 1) & !1;
                    if blocked != 0 && d == clue {
                        supported |= ValueSet::from_value(v);
                    }
                }
            }
            restrict_cell(grid, accumulator, self.cells[i], supported)?;
        }
        Ok(())
    }
}

/// The first cell names a position along the line; the cell at that position
/// carries the given value.
pub struct NumberedRoomHandler {
    cells: Vec<CellIndex>,
    value: u32,
}

impl NumberedRoomHandler {
    pub fn new(value: u32, cells: Vec<CellIndex>) -> NumberedRoomHandler {
        NumberedRoomHandler { cells, value }
    }
}

impl ConstraintHandler for NumberedRoomHandler {
    fn name(&self) -> &'static str {
        "NumberedRoom"
    }

    fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let n = self.cells.len();
        let clue_set = ValueSet::from_value(self.value as u8 - 1);

        let mut control_support = ValueSet::empty();
        for kv in grid[self.cells[0]] {
            let k = kv as usize + 1;
            if k > n {
                continue;
            }
            let feasible = if k == 1 {
                // The control cell indexes itself.
                self.value == 1
            } else {
                grid[self.cells[k - 1]].intersects(clue_set)
            };
            if feasible {
                control_support |= ValueSet::from_value(kv);
            }
        }
        restrict_cell(grid, accumulator, self.cells[0], control_support)?;

        let control = grid[self.cells[0]];
        if !control.has_multiple() {
            let k = control.value() as usize + 1;
            restrict_cell(grid, accumulator, self.cells[k - 1], clue_set)?;
        }
        Ok(())
    }
}

/// The first cell names how many leading cells (itself included) sum to the
/// given total.
pub struct XSumHandler {
    cells: Vec<CellIndex>,
    sum: u32,
    tables: Option<Arc<LookupTables>>,
}

impl XSumHandler {
    pub fn new(sum: u32, cells: Vec<CellIndex>) -> XSumHandler {
        XSumHandler {
            cells,
            sum,
            tables: None,
        }
    }
}

impl ConstraintHandler for XSumHandler {
    fn name(&self) -> &'static str {
        "XSum"
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
        self.tables = Some(LookupTables::get(shape.num_values));
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let tables = self.tables.clone().unwrap();
        let n = self.cells.len();
        let target = self.sum as i32;

        let mut supported = vec![ValueSet::empty(); n];

        for kv in grid[self.cells[0]] {
            let k = kv as usize + 1;
            if k > n {
                continue;
            }
            // With the control fixed at k, the remaining k−1 cells make up
            // the rest of the sum.
            let head = k as i32;
            let rest_cells = &self.cells[1..k];
            let (rest_min, rest_max) = packed_min_max(&tables, grid, rest_cells);
            if target < head + rest_min || target > head + rest_max {
                continue;
            }
            supported[0] |= ValueSet::from_value(kv);
            for (j, &cell) in rest_cells.iter().enumerate() {
                let packed = tables.min_max[grid[cell].bits() as usize];
                let others_min = rest_min - (packed >> 32) as i32;
                let others_max = rest_max - (packed & 0xffff_ffff) as i32;
                let allowed = ValueSet::from_range(
                    target - head - others_max - 1,
                    target - head - others_min - 1,
                );
                supported[j + 1] |= grid[cell] & allowed;
            }
            // Cells past k are unconstrained in this branch.
            for (j, &cell) in self.cells.iter().enumerate().skip(k) {
                supported[j] |= grid[cell];
            }
        }

        for (i, &cell) in self.cells.iter().enumerate() {
            restrict_cell(grid, accumulator, cell, supported[i])?;
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
    fn between_bounds_interior_and_ends() {
        let mut handler = BetweenHandler::new(vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[0] = ValueSet::from_value(0); // 1
        grid[2] = ValueSet::from_iter([3u8, 4]); // 4 or 5
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Interior strictly between 1 and at most 5.
        assert_eq!(grid[1], ValueSet::from_iter([1u8, 2, 3]));
    }

    #[test]
    fn between_ends_need_interior_room() {
        let mut handler = BetweenHandler::new(vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[0] = ValueSet::from_value(0); // 1
        grid[2] = ValueSet::from_iter([1u8, 4]); // 2 or 5; 2 leaves no room
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[2], ValueSet::from_value(4));
    }

    #[test]
    fn lockout_excludes_interval() {
        let mut handler = LockoutHandler::new(4, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[0] = ValueSet::from_value(1); // 2
        grid[2] = ValueSet::from_value(6); // 7
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Interior outside [2, 7]: 1, 8, 9.
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 7, 8]));
    }

    #[test]
    fn skyscraper_count_one_forces_max_first() {
        let mut handler = SkyscraperHandler::new(1, vec![0, 1, 2, 3]);
        let (mut grid, mut acc) = setup(&mut handler, 4, 4);
        grid[3] = ValueSet::from_value(3); // a 4 at the back...
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // ...must be screened by a 4 up front, or it would be seen too.
        assert_eq!(grid[0], ValueSet::from_value(3));
    }

    #[test]
    fn skyscraper_full_count_forces_ascending() {
        let mut handler = SkyscraperHandler::new(4, vec![0, 1, 2, 3]);
        let (mut grid, mut acc) = setup(&mut handler, 4, 4);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        for (i, &cell) in [0usize, 1, 2, 3].iter().enumerate() {
            assert_eq!(grid[cell], ValueSet::from_value(i as u8));
        }
    }

    #[test]
    fn skyscraper_long_line_full_count_starts_low() {
        // Nine visible buildings force the strictly increasing run 1..9, so
        // the first cell carries the 1 even on a line far wider than a word.
        let mut handler = SkyscraperHandler::new(9, (0..40).collect());
        let (mut grid, mut acc) = setup(&mut handler, 9, 40);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[0], ValueSet::from_value(0));
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 1]));
    }

    #[test]
    fn skyscraper_count_above_value_range_is_unsatisfiable() {
        let mut handler = SkyscraperHandler::new(12, (0..40).collect());
        let shape = Shape::square(9).unwrap();
        let mut exclusions = CellExclusions::new(40);
        let mut grid = vec![ValueSet::full(9); 40];
        assert!(handler.initialize(&mut grid, &mut exclusions, &shape).is_err());
    }

    #[test]
    fn hidden_skyscraper_two_cell_line() {
        // The second cell must be the hidden 3, so the first must screen it.
        let mut handler = HiddenSkyscraperHandler::new(3, vec![0, 1]);
        let (mut grid, mut acc) = setup(&mut handler, 4, 2);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[1], ValueSet::from_value(2));
        assert_eq!(grid[0], ValueSet::from_iter([2u8, 3]));
    }

    #[test]
    fn numbered_room_prunes_control() {
        let mut handler = NumberedRoomHandler::new(4, vec![0, 1, 2, 3]);
        let (mut grid, mut acc) = setup(&mut handler, 4, 4);
        grid[2] = ValueSet::from_iter([0u8, 1]); // cell 3 can't hold the 4
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Control = 1 needs clue == 1; control = 3 needs 4 in cell 3.
        assert_eq!(grid[0], ValueSet::from_iter([1u8, 3]));
    }

    #[test]
    fn xsum_with_fixed_control() {
        let mut handler = XSumHandler::new(10, vec![0, 1, 2, 3]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 4);
        grid[0] = ValueSet::from_value(2); // first 3 cells sum to 10
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Cells 1 and 2 sum to 7: both in 1..6.
        assert_eq!(grid[1], ValueSet::from_iter(0u8..6));
        assert_eq!(grid[2], ValueSet::from_iter(0u8..6));
        assert_eq!(grid[3], ValueSet::full(9));
    }

    #[test]
    fn sum_line_partitions_runs() {
        let mut handler = SumLineHandler::new(5, false, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[0] = ValueSet::from_value(1); // 2: the first run is still open
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // 2+3 | 5, or 2+1+2 = 5. Nothing else fits.
        assert_eq!(grid[1], ValueSet::from_iter([0u8, 1, 2]));
        assert_eq!(grid[2], ValueSet::from_iter([0u8, 1, 4]));
    }

    #[test]
    fn sum_line_large_target_over_wide_values() {
        // One run of ten 16s is the only way to make 160, so every cell
        // fixes.
        let mut handler = SumLineHandler::new(160, false, (0..10).collect());
        let (mut grid, mut acc) = setup(&mut handler, 16, 10);
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        for cell in 0..10 {
            assert_eq!(grid[cell], ValueSet::from_value(15));
        }
    }

    #[test]
    fn sum_line_loop_allows_wrap() {
        let mut handler = SumLineHandler::new(6, true, vec![0, 1, 2, 3]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 4);
        grid[0] = ValueSet::from_value(3); // 4
        grid[1] = ValueSet::from_value(1); // 2: 4+2 = 6 closes
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        // Remaining two cells form runs summing to 6 around the loop:
        // either 6 then wrap-completing values. 1+5, 2+4, 3+3, or 6|6.
        assert!(!grid[2].is_empty() && !grid[3].is_empty());
        assert!(!grid[2].contains(6)); // 7 can never appear
    }

    #[test]
    fn lunchbox_interior_sum() {
        let mut handler = LunchboxHandler::new(5, vec![0, 1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 9, 3);
        grid[0] = ValueSet::from_value(0); // bread 1
        grid[2] = ValueSet::from_value(8); // bread 9
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[1], ValueSet::from_value(4)); // interior must be 5
    }

    #[test]
    fn region_sum_line_equalizes_segments() {
        // 4x4 boxes are 2x2; cells 1 and 2 straddle the box border.
        let mut handler = RegionSumLineHandler::new(vec![1, 2]);
        let (mut grid, mut acc) = setup(&mut handler, 4, 16);
        grid[1] = ValueSet::from_value(2); // 3
        handler.enforce_consistency(&mut grid, &mut acc).unwrap();
        assert_eq!(grid[2], ValueSet::from_value(2)); // segment sums equal: 3
    }
}
