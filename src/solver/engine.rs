use std::time::Instant;

use log::debug;

use crate::types::{CellIndex, CellValue, Shape};
use crate::value_set::ValueSet;

use super::candidate_selector::{CandidateSelector, StepGuides};
use super::cell_accumulator::HandlerAccumulator;
use super::cell_exclusions::CellExclusions;
use super::handlers::{ConstraintHandler, HandlerSet, UniqueValueExclusionHandler};
use super::{Config, Contradiction, Counters, ProgressState, SearchEvent, StepResult, YieldMode};

/// Backtrack triggers are halved every this many search iterations, so old
/// contradictions fade while the current search region stays hot.
const TRIGGER_DECAY_INTERVAL: u64 = 1 << 14;

struct StepState {
    guides: StepGuides,
    step: u64,
    old_grid: Vec<ValueSet>,
}

/// The recursive search engine: a preallocated stack of grid frames driven
/// by the candidate selector and the propagation worklist.
///
/// `run` resumes where the previous call left off and yields per the
/// configured mode; exhaustion returns `None` and marks the engine done.
pub struct Engine {
    shape: Shape,
    handler_set: HandlerSet,
    accumulator: HandlerAccumulator,
    selector: CandidateSelector,
    houses: Vec<Vec<CellIndex>>,

    initial_grid: Vec<ValueSet>,
    initial_grid_valid: bool,

    // One frame per depth, plus a scratch frame; grids share one buffer.
    grids: Vec<ValueSet>,
    cell_depth: Vec<usize>,
    progress_remaining: Vec<f64>,
    last_contradiction: Vec<i32>,
    new_node: Vec<bool>,
    rec_depth: usize,

    started: bool,
    done: bool,
    run_counter: u64,

    cell_priorities: Vec<u32>,
    backtrack_triggers: Vec<u32>,
    counters: Counters,
    iteration_counter: u64,

    yield_mode: YieldMode,
    step_state: Option<StepState>,

    track_all_possibilities: bool,
    values_seen: Vec<ValueSet>,

    sample_solution: Option<Vec<CellValue>>,

    progress_callback: Option<Box<dyn FnMut(&ProgressState)>>,
    progress_mask: u64,
    start_time: Instant,
}

impl Engine {
    pub fn new(
        shape: Shape,
        handlers: Vec<Box<dyn ConstraintHandler>>,
        mut config: Config,
    ) -> Engine {
        let num_cells = shape.num_cells;
        let mut handler_set = HandlerSet::new(handlers);

        // Exclusion sets come from the handlers before anything else runs.
        let mut cell_exclusions = CellExclusions::new(num_cells);
        for handler in &handler_set.handlers {
            cell_exclusions.add_mutually_exclusive(handler.exclusion_cells());
        }
        cell_exclusions.finalize();

        // One-shot setup; the first failure poisons the initial grid.
        let mut initial_grid = vec![ValueSet::full(shape.num_values as u8); num_cells];
        let mut initial_grid_valid = true;
        for handler in &mut handler_set.handlers {
            if handler
                .initialize(&mut initial_grid, &mut cell_exclusions, &shape)
                .is_err()
            {
                debug!("handler {} unsatisfiable at setup", handler.name());
                if handler.cells().is_empty() {
                    initial_grid.fill(ValueSet::empty());
                } else {
                    for &cell in handler.cells() {
                        initial_grid[cell] = ValueSet::empty();
                    }
                }
                initial_grid_valid = false;
            }
        }

        // Priorities: handler contributions summed, Priority handlers win.
        let mut cell_priorities = vec![0u32; num_cells];
        for handler in &handler_set.handlers {
            if handler.name() != "Priority" {
                for &cell in handler.cells() {
                    cell_priorities[cell] += handler.priority();
                }
            }
        }
        for handler in &handler_set.handlers {
            if handler.name() == "Priority" {
                for &cell in handler.cells() {
                    cell_priorities[cell] = handler.priority();
                }
            }
        }

        let houses = handler_set.house_cell_lists();

        // The per-cell exclusion handlers run off the finished index.
        for cell in 0..num_cells {
            let exclusion_list = cell_exclusions.get_array(cell).to_vec();
            handler_set
                .handlers
                .push(Box::new(UniqueValueExclusionHandler::new(cell, exclusion_list)));
        }

        let accumulator = HandlerAccumulator::new(num_cells, &handler_set.handlers);

        let mut selector = CandidateSelector::new(num_cells, houses.clone());
        if let Some(rng) = &mut config.search_randomizer {
            use rand::seq::SliceRandom;
            let mut order: Vec<CellIndex> = (0..num_cells).collect();
            order.shuffle(rng);
            selector.set_cell_order(order);
        }

        let (progress_callback, progress_mask) = match config.progress_callback.take() {
            Some((callback, log_frequency)) => {
                (Some(callback), (1u64 << log_frequency) - 1)
            }
            None => (None, u64::MAX),
        };

        let mut engine = Engine {
            shape,
            handler_set,
            accumulator,
            selector,
            houses,
            initial_grid,
            initial_grid_valid,
            grids: vec![ValueSet::empty(); (num_cells + 1) * num_cells],
            cell_depth: vec![0; num_cells + 1],
            progress_remaining: vec![0.0; num_cells + 1],
            last_contradiction: vec![-1; num_cells + 1],
            new_node: vec![false; num_cells + 1],
            rec_depth: 0,
            started: false,
            done: false,
            run_counter: 0,
            cell_priorities,
            backtrack_triggers: vec![0; num_cells],
            counters: Counters::default(),
            iteration_counter: 0,
            yield_mode: YieldMode::Never,
            step_state: None,
            track_all_possibilities: false,
            values_seen: vec![ValueSet::empty(); num_cells],
            sample_solution: None,
            progress_callback,
            progress_mask,
            start_time: Instant::now(),
        };
        engine.reset();
        engine
    }

    /// Clears all search state; the next `run` starts from the top.
    pub fn reset(&mut self) {
        self.started = false;
        self.done = false;
        self.run_counter += 1;
        self.rec_depth = 0;
        self.counters = Counters::default();
        self.iteration_counter = 0;
        self.backtrack_triggers.copy_from_slice(&self.cell_priorities);
        self.sample_solution = None;
        self.values_seen.fill(ValueSet::empty());
        self.selector.reset();
        if let Some(state) = &mut self.step_state {
            state.step = 0;
        }
        self.start_time = Instant::now();
    }

    pub fn set_yield_mode(&mut self, mode: YieldMode) {
        self.yield_mode = mode;
        if matches!(mode, YieldMode::Steps) && self.step_state.is_none() {
            self.step_state = Some(StepState {
                guides: StepGuides::new(),
                step: 0,
                old_grid: vec![ValueSet::empty(); self.shape.num_cells],
            });
        }
    }

    pub fn set_step_guides(&mut self, guides: StepGuides) {
        self.set_yield_mode(YieldMode::Steps);
        if let Some(state) = &mut self.step_state {
            state.guides = guides;
        }
    }

    pub fn set_track_all_possibilities(&mut self, track: bool) {
        self.track_all_possibilities = track;
    }

    pub fn set_progress_callback(
        &mut self,
        callback: Option<Box<dyn FnMut(&super::ProgressState)>>,
        log_frequency: u32,
    ) {
        self.progress_mask = match callback {
            Some(_) => (1u64 << log_frequency) - 1,
            None => u64::MAX,
        };
        self.progress_callback = callback;
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn run_counter(&self) -> u64 {
        self.run_counter
    }

    pub fn time_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn houses(&self) -> &[Vec<CellIndex>] {
        &self.houses
    }

    pub fn sample_solution(&self) -> Option<&[CellValue]> {
        self.sample_solution.as_deref()
    }

    pub fn values_seen(&self) -> &[ValueSet] {
        &self.values_seen
    }

    pub fn backtrack_triggers(&self) -> &[u32] {
        &self.backtrack_triggers
    }

    /// Read-only view of the search's cell ordering, for observers.
    pub fn cell_order(&self, upto: Option<usize>) -> &[CellIndex] {
        self.selector.get_cell_order(upto)
    }

    #[inline]
    fn grid(&self, frame: usize) -> &[ValueSet] {
        let n = self.shape.num_cells;
        &self.grids[frame * n..(frame + 1) * n]
    }

    fn copy_grid(&mut self, from: usize, to: usize) {
        let n = self.shape.num_cells;
        self.grids.copy_within(from * n..(from + 1) * n, to * n);
    }

    /// Resumes the search. Returns the next event for the configured yield
    /// mode, or `None` when the tree is exhausted.
    pub fn run(&mut self) -> Option<SearchEvent> {
        if self.done {
            return None;
        }
        let num_cells = self.shape.num_cells;

        if !self.started {
            self.started = true;
            self.report_progress(false);

            if !self.initial_grid_valid {
                debug!("initial grid invalid; reporting zero solutions");
                return self.finish();
            }

            // Frame 0 owns the whole tree.
            let n = num_cells;
            let initial = self.initial_grid.clone();
            self.grids[..n].copy_from_slice(&initial);
            self.cell_depth[0] = 0;
            self.progress_remaining[0] = 1.0;
            self.last_contradiction[0] = -1;
            self.new_node[0] = true;
            self.rec_depth = 1;

            if let Some(state) = &mut self.step_state {
                state.old_grid.copy_from_slice(&initial);
            }

            self.accumulator.reset(false);
            for cell in 0..num_cells {
                self.accumulator.add_for_fixed_cell(cell);
            }
            match self.propagate(0) {
                Ok(()) => {
                    if matches!(self.yield_mode, YieldMode::Steps) {
                        return Some(self.make_step_event(0, None, false, false));
                    }
                }
                Err(Contradiction) => {
                    self.rec_depth = 0;
                    if matches!(self.yield_mode, YieldMode::Steps) {
                        return Some(self.make_step_event(0, None, false, true));
                    }
                }
            }
        }

        while self.rec_depth > 0 {
            let fi = self.rec_depth - 1;
            let n = num_cells;
            let is_new = self.new_node[fi];
            self.new_node[fi] = false;
            let cell_depth = self.cell_depth[fi];

            let guide = match (&self.step_state, self.yield_mode) {
                (Some(state), YieldMode::Steps) => state.guides.get(&(state.step + 1)).cloned(),
                _ => None,
            };

            let sel = self.selector.select_next_candidate(
                cell_depth,
                &self.grids[fi * n..(fi + 1) * n],
                &self.backtrack_triggers,
                guide.as_ref(),
                is_new,
            );

            if sel.count == 0 {
                self.rec_depth -= 1;
                continue;
            }

            self.counters.values_tried += (sel.next_depth - cell_depth) as u64;
            self.counters.nodes_searched += 1;
            self.iteration_counter += 1;
            if self.iteration_counter & (TRIGGER_DECAY_INTERVAL - 1) == 0 {
                for bt in &mut self.backtrack_triggers {
                    *bt >>= 1;
                }
            }
            if self.iteration_counter & self.progress_mask == 0 {
                self.report_progress(false);
            }

            let progress_delta = self.progress_remaining[fi] / sel.count as f64;
            self.progress_remaining[fi] -= progress_delta;
            let next_depth = sel.next_depth;
            let cell = self.selector.cell_order()[sel.cell_position];

            // Prime the worklist: the freshly fixed cells, plus the cell
            // behind the last contradiction seen here, which tends to fail
            // again fast.
            self.accumulator.reset(next_depth == num_cells);
            for position in cell_depth..next_depth {
                self.accumulator
                    .add_for_fixed_cell(self.selector.cell_order()[position]);
            }
            if self.last_contradiction[fi] >= 0 {
                self.accumulator
                    .add_for_cell(self.last_contradiction[fi] as usize);
            }

            let active = if sel.count > 1 {
                // More values to try later: branch on a copied grid and
                // strike this value from the parent.
                self.copy_grid(fi, fi + 1);
                self.grids[fi * n + cell].remove_set(sel.value);
                self.counters.guesses += 1;
                self.rec_depth += 1;
                fi + 1
            } else {
                fi
            };

            if matches!(self.yield_mode, YieldMode::Steps) {
                if let Some(state) = &mut self.step_state {
                    state.step += 1;
                    let (grids, old) = (&self.grids, &mut state.old_grid);
                    old.copy_from_slice(&grids[active * n..(active + 1) * n]);
                }
            }

            self.grids[active * n + cell] = sel.value;

            match self.propagate(active) {
                Err(Contradiction) => {
                    self.counters.progress_ratio += progress_delta;
                    self.counters.backtracks += 1;
                    self.backtrack_triggers[cell] += 1;
                    self.rec_depth -= 1;
                    if self.rec_depth > 0 {
                        self.last_contradiction[self.rec_depth - 1] = cell as i32;
                    }
                    match self.yield_mode {
                        YieldMode::Steps => {
                            return Some(self.make_step_event(active, Some(cell), false, true));
                        }
                        YieldMode::ContradictionsEvery(every) => {
                            if self.counters.backtracks % every == 0 {
                                return Some(SearchEvent::Tick);
                            }
                        }
                        _ => {}
                    }
                    continue;
                }
                Ok(()) => {}
            }

            if next_depth == num_cells {
                self.counters.progress_ratio += progress_delta;
                self.counters.solutions += 1;
                let solution = self.extract_solution(active);
                if self.sample_solution.is_none() {
                    self.sample_solution = Some(solution.clone());
                }
                if self.track_all_possibilities {
                    let n0 = active * n;
                    for (seen, &vs) in
                        self.values_seen.iter_mut().zip(&self.grids[n0..n0 + n])
                    {
                        *seen |= vs;
                    }
                }
                self.rec_depth -= 1;
                match self.yield_mode {
                    YieldMode::Solutions | YieldMode::ContradictionsEvery(_) => {
                        return Some(SearchEvent::Solution(solution));
                    }
                    YieldMode::Steps => {
                        return Some(self.make_step_event(active, Some(cell), true, false));
                    }
                    YieldMode::Never => {}
                }
                continue;
            }

            // Whole subtree already covered by known solutions? Skip it.
            if self.track_all_possibilities && self.counters.solutions >= 2 {
                let n0 = active * n;
                let uninteresting = self.grids[n0..n0 + n]
                    .iter()
                    .zip(&self.values_seen)
                    .all(|(&vs, &seen)| (vs & !seen).is_empty());
                if uninteresting {
                    self.counters.branches_ignored += progress_delta;
                    self.rec_depth -= 1;
                    continue;
                }
            }

            // Descend.
            self.cell_depth[active] = next_depth;
            self.new_node[active] = true;
            self.progress_remaining[active] = progress_delta;
            self.last_contradiction[active] = -1;
            if matches!(self.yield_mode, YieldMode::Steps) {
                return Some(self.make_step_event(active, Some(cell), false, false));
            }
        }

        self.finish()
    }

    fn finish(&mut self) -> Option<SearchEvent> {
        self.done = true;
        self.report_progress(true);
        None
    }

    fn propagate(&mut self, frame: usize) -> super::SolverResult {
        let n = self.shape.num_cells;
        while let Some(handler_index) = self.accumulator.take_next() {
            self.counters.constraints_processed += 1;
            self.handler_set.run_handler(
                handler_index,
                &mut self.grids[frame * n..(frame + 1) * n],
                &mut self.accumulator,
            )?;
        }
        Ok(())
    }

    fn extract_solution(&self, frame: usize) -> Vec<CellValue> {
        self.grid(frame)
            .iter()
            .map(|vs| {
                debug_assert!(vs.is_singleton(), "unresolved cell in solution");
                CellValue::from_index(vs.value())
            })
            .collect()
    }

    fn make_step_event(
        &self,
        frame: usize,
        latest_cell: Option<CellIndex>,
        is_solution: bool,
        has_contradiction: bool,
    ) -> SearchEvent {
        let pencilmarks = self.grid(frame).to_vec();
        let diff_cells = match &self.step_state {
            Some(state) => pencilmarks
                .iter()
                .zip(&state.old_grid)
                .enumerate()
                .filter(|(_, (new, old))| *new != *old)
                .map(|(cell, _)| cell)
                .collect(),
            None => Vec::new(),
        };
        let values = if is_solution {
            Some(self.extract_solution(frame))
        } else {
            None
        };
        SearchEvent::Step(StepResult {
            pencilmarks,
            diff_cells,
            latest_cell,
            is_solution,
            has_contradiction,
            values,
        })
    }

    fn report_progress(&mut self, done: bool) {
        if let Some(callback) = &mut self.progress_callback {
            let state = ProgressState {
                counters: self.counters.clone(),
                time_ms: self.start_time.elapsed().as_secs_f64() * 1000.0,
                done,
            };
            callback(&state);
            self.counters.progress_ratio_prev = self.counters.progress_ratio;
        }
    }
}
