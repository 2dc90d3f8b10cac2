pub mod all_different;
pub mod candidate_selector;
pub mod cell_accumulator;
pub mod cell_exclusions;
pub mod constraint_compiler;
pub mod engine;
pub mod handlers;

use log::{debug, info};

use crate::error::SolverError;
use crate::types::{CellIndex, CellValue, Constraint};
use crate::value_set::ValueSet;

pub use candidate_selector::{StepGuide, StepGuides};
use engine::Engine;
use handlers::{AllDifferentHandler, ConstraintHandler, GivenCandidatesHandler};

/// Marker for a domain wipe-out; propagation reports it, the search engine
/// turns it into a backtrack. Unsatisfiable is never an `Err` at the API
/// surface.
#[derive(Debug)]
pub struct Contradiction;
pub type SolverResult = Result<(), Contradiction>;

pub type Solution = Vec<CellValue>;
pub type Pencilmarks = Vec<ValueSet>;

#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub values_tried: u64,
    pub nodes_searched: u64,
    pub backtracks: u64,
    pub guesses: u64,
    pub solutions: u64,
    pub constraints_processed: u64,
    pub progress_ratio: f64,
    pub progress_ratio_prev: f64,
    pub branches_ignored: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum YieldMode {
    Never,
    Solutions,
    Steps,
    /// Yield a tick every N backtracks (and every solution); used for
    /// budgeted probe runs.
    ContradictionsEvery(u64),
}

/// One observable outcome of resuming the search.
pub enum SearchEvent {
    Solution(Solution),
    Step(StepResult),
    Tick,
}

/// Snapshot emitted in step mode after each propagation round.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub pencilmarks: Pencilmarks,
    pub diff_cells: Vec<CellIndex>,
    pub latest_cell: Option<CellIndex>,
    pub is_solution: bool,
    pub has_contradiction: bool,
    pub values: Option<Solution>,
}

#[derive(Clone, Debug)]
pub struct ProgressState {
    pub counters: Counters,
    pub time_ms: f64,
    pub done: bool,
}

pub type ProgressCallback = Box<dyn FnMut(&ProgressState)>;

pub struct Config {
    pub search_randomizer: Option<rand::rngs::StdRng>,
    pub progress_callback: Option<(ProgressCallback, u32)>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            search_randomizer: None,
            progress_callback: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SolverState {
    pub counters: Counters,
    pub time_ms: f64,
    pub done: bool,
}

#[derive(Clone, Debug)]
pub struct DebugState {
    pub backtrack_triggers: Vec<u32>,
    pub cell_order: Vec<CellIndex>,
}

const VALIDATION_TICK_BACKTRACKS: u64 = 200;
const VALIDATION_PROBE_TICKS: u64 = 20;

/// The outer solver: compiles a declarative constraint set once, then
/// answers counting, enumeration, stepping and layout questions about it.
pub struct Solver {
    engine: Engine,
    mode: YieldMode,
    steps_yielded: u64,
}

impl Solver {
    pub fn new(constraint: &Constraint) -> Result<Solver, SolverError> {
        Solver::with_config(constraint, Config::default())
    }

    pub fn with_config(constraint: &Constraint, config: Config) -> Result<Solver, SolverError> {
        let handlers = constraint_compiler::compile(constraint)?;
        info!(
            "solver for {}x{} grid with {} handlers",
            constraint.shape.num_rows,
            constraint.shape.num_cols,
            handlers.len()
        );
        Ok(Solver {
            engine: Engine::new(constraint.shape, handlers, config),
            mode: YieldMode::Never,
            steps_yielded: 0,
        })
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>, log_frequency: u32) {
        self.engine.set_progress_callback(callback, log_frequency);
    }

    fn enter_mode(&mut self, mode: YieldMode) {
        if self.mode != mode || self.engine.is_done() {
            self.engine.reset();
            self.engine.set_yield_mode(mode);
            self.mode = mode;
            self.steps_yielded = 0;
        }
    }

    /// Exhausts the search tree and reports the number of solutions.
    pub fn count_solutions(&mut self) -> u64 {
        self.engine.reset();
        self.engine.set_yield_mode(YieldMode::Never);
        self.mode = YieldMode::Never;
        while self.engine.run().is_some() {}
        self.engine.counters().solutions
    }

    /// The n-th solution (0-indexed) in search order. Asking for an earlier
    /// solution than the last one served restarts the search.
    pub fn nth_solution(&mut self, n: usize) -> Option<Solution> {
        let target = n as u64 + 1;
        self.enter_mode(YieldMode::Solutions);
        if self.engine.counters().solutions >= target {
            debug!("rewinding for solution {n}");
            self.engine.reset();
            self.engine.set_yield_mode(YieldMode::Solutions);
        }
        loop {
            match self.engine.run() {
                Some(SearchEvent::Solution(solution)) => {
                    if self.engine.counters().solutions == target {
                        return Some(solution);
                    }
                }
                Some(_) => {}
                None => return None,
            }
        }
    }

    /// The n-th search step (0-indexed; step 0 is the state after initial
    /// propagation). Guides override the selector at the steps they name.
    pub fn nth_step(&mut self, n: u64, guides: StepGuides) -> Option<StepResult> {
        self.enter_mode(YieldMode::Steps);
        if self.steps_yielded > n {
            self.engine.reset();
            self.engine.set_yield_mode(YieldMode::Steps);
            self.steps_yielded = 0;
        }
        self.engine.set_step_guides(guides);
        loop {
            match self.engine.run() {
                Some(SearchEvent::Step(step)) => {
                    let index = self.steps_yielded;
                    self.steps_yielded += 1;
                    if index == n {
                        return Some(step);
                    }
                }
                Some(_) => {}
                None => return None,
            }
        }
    }

    /// For each cell, the exact set of values it takes over all solutions.
    pub fn solve_all_possibilities(&mut self) -> Pencilmarks {
        self.engine.reset();
        self.engine.set_yield_mode(YieldMode::Never);
        self.engine.set_track_all_possibilities(true);
        self.mode = YieldMode::Never;
        while self.engine.run().is_some() {}
        self.engine.set_track_all_possibilities(false);
        self.engine.values_seen().to_vec()
    }

    /// Whether the houses alone admit any completed grid. Fixing one house
    /// to the identity permutation loses no generality (solutions relabel),
    /// so each house gets a budgeted probe; the furthest-advanced probe
    /// runs to completion if none decided early.
    pub fn validate_layout(&mut self) -> bool {
        let houses: Vec<Vec<CellIndex>> = self.engine.houses().to_vec();
        if houses.is_empty() {
            return true;
        }

        let mut best_house = 0;
        let mut best_progress = -1.0;
        for (i, house) in houses.iter().enumerate() {
            match self.probe_house(&houses, house, Some(VALIDATION_PROBE_TICKS)) {
                ProbeOutcome::Satisfiable => return true,
                ProbeOutcome::Unsatisfiable => return false,
                ProbeOutcome::Inconclusive(progress) => {
                    debug!("house {i} inconclusive at progress {progress}");
                    if progress > best_progress {
                        best_progress = progress;
                        best_house = i;
                    }
                }
            }
        }

        debug!("running house {best_house} to completion");
        matches!(
            self.probe_house(&houses, &houses[best_house], None),
            ProbeOutcome::Satisfiable
        )
    }

    fn probe_house(
        &self,
        houses: &[Vec<CellIndex>],
        target: &[CellIndex],
        budget: Option<u64>,
    ) -> ProbeOutcome {
        let shape = *self.engine.shape();
        let mut handlers: Vec<Box<dyn ConstraintHandler>> = houses
            .iter()
            .map(|house| {
                Box::new(AllDifferentHandler::new(house.clone())) as Box<dyn ConstraintHandler>
            })
            .collect();
        let identity: Vec<(CellIndex, ValueSet)> = target
            .iter()
            .enumerate()
            .map(|(i, &cell)| (cell, ValueSet::from_value(i as u8)))
            .collect();
        handlers.push(Box::new(GivenCandidatesHandler::new(identity)));

        let mut probe = Engine::new(shape, handlers, Config::default());
        probe.set_yield_mode(YieldMode::ContradictionsEvery(VALIDATION_TICK_BACKTRACKS));

        let mut ticks = 0;
        loop {
            match probe.run() {
                Some(SearchEvent::Solution(_)) => return ProbeOutcome::Satisfiable,
                Some(SearchEvent::Tick) => {
                    ticks += 1;
                    if let Some(limit) = budget {
                        if ticks >= limit {
                            return ProbeOutcome::Inconclusive(
                                probe.counters().progress_ratio,
                            );
                        }
                    }
                }
                Some(SearchEvent::Step(_)) => {}
                None => {
                    return if probe.counters().solutions > 0 {
                        ProbeOutcome::Satisfiable
                    } else {
                        ProbeOutcome::Unsatisfiable
                    }
                }
            }
        }
    }

    pub fn state(&self) -> SolverState {
        SolverState {
            counters: self.engine.counters().clone(),
            time_ms: self.engine.time_ms(),
            done: self.engine.is_done(),
        }
    }

    pub fn debug_state(&self) -> DebugState {
        DebugState {
            backtrack_triggers: self.engine.backtrack_triggers().to_vec(),
            cell_order: self.engine.cell_order(None).to_vec(),
        }
    }

    pub fn sample_solution(&self) -> Option<&[CellValue]> {
        self.engine.sample_solution()
    }
}

enum ProbeOutcome {
    Satisfiable,
    Unsatisfiable,
    Inconclusive(f64),
}
