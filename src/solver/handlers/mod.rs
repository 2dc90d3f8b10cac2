mod binary;
mod exclusion;
mod house;
mod lines;
mod misc;
mod rank;
mod regex_line;
mod sum;

pub use binary::{BinaryConstraintHandler, BinaryPairwiseHandler};
pub use exclusion::{UniqueValueExclusionHandler, ValueDependentUniqueValueExclusionHandler};
pub use house::AllDifferentHandler;
pub use lines::{
    BetweenHandler, HiddenSkyscraperHandler, LockoutHandler, LunchboxHandler, NumberedRoomHandler,
    RegionSumLineHandler, SkyscraperHandler, SumLineHandler, XSumHandler,
};
pub use misc::{
    CountingCirclesHandler, FalseHandler, GivenCandidatesHandler, IndexingHandler,
    LocalEntropyHandler, PriorityHandler, RequiredValuesHandler,
};
pub use rank::FullRankHandler;
pub use regex_line::RegexLineHandler;
pub use sum::{PillArrowHandler, SumHandler};

use crate::solver::cell_accumulator::{HandlerAccumulator, Registration, WorklistSource};
use crate::solver::cell_exclusions::CellExclusions;
use crate::solver::{Contradiction, SolverResult};
use crate::types::{CellIndex, Shape};
use crate::value_set::ValueSet;

/// The common contract of all constraint handlers.
///
/// A handler owns its cells by index, never references other handlers, and
/// must be deterministic given the grid it sees. `enforce_consistency` may
/// only narrow the domains of `cells()`; any cell it narrows (other than
/// through the currently-running handler's own scheduling) is reported to
/// the accumulator.
pub trait ConstraintHandler {
    /// Stable name used for deterministic handler ordering.
    fn name(&self) -> &'static str;

    fn cells(&self) -> &[CellIndex];

    /// Cells that must take pairwise different values under this handler.
    fn exclusion_cells(&self) -> &[CellIndex] {
        &[]
    }

    /// Seed for the cell-priority scores.
    fn priority(&self) -> u32 {
        0
    }

    /// Essential handlers re-run even when the accumulator is skipping
    /// non-essential work because every cell is fixed.
    fn essential(&self) -> bool {
        true
    }

    fn registration(&self) -> Registration {
        Registration::Ordinary
    }

    /// One-shot setup; may tighten `grid` with unconditional restrictions.
    /// An error means the constraint is unsatisfiable outright.
    fn initialize(
        &mut self,
        _grid: &mut [ValueSet],
        _exclusions: &mut CellExclusions,
        _shape: &Shape,
    ) -> SolverResult {
        Ok(())
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult;

    /// The cell list when this handler constrains a full house.
    fn house_cells(&self) -> Option<&[CellIndex]> {
        None
    }
}

impl WorklistSource for Box<dyn ConstraintHandler> {
    fn cells(&self) -> &[CellIndex] {
        self.as_ref().cells()
    }

    fn registration(&self) -> Registration {
        self.as_ref().registration()
    }

    fn essential(&self) -> bool {
        self.as_ref().essential()
    }
}

/// Narrows `cell` to `allowed`, reporting the change. The empty result is a
/// contradiction.
#[inline]
pub(crate) fn restrict_cell(
    grid: &mut [ValueSet],
    accumulator: &mut HandlerAccumulator,
    cell: CellIndex,
    allowed: ValueSet,
) -> SolverResult {
    let narrowed = grid[cell] & allowed;
    if narrowed.is_empty() {
        return Err(Contradiction);
    }
    if narrowed != grid[cell] {
        grid[cell] = narrowed;
        accumulator.add_for_cell(cell);
    }
    Ok(())
}

/// The ordered handler collection owned by one solver.
pub struct HandlerSet {
    pub handlers: Vec<Box<dyn ConstraintHandler>>,
}

impl HandlerSet {
    pub fn new(mut handlers: Vec<Box<dyn ConstraintHandler>>) -> HandlerSet {
        // Deterministic order: small handlers first, then by name, then by
        // the cells they touch.
        handlers.sort_by(|a, b| {
            (a.cells().len(), a.name(), a.cells())
                .cmp(&(b.cells().len(), b.name(), b.cells()))
        });
        HandlerSet { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Cell lists of all full houses, for the candidate selector.
    pub fn house_cell_lists(&self) -> Vec<Vec<CellIndex>> {
        self.handlers
            .iter()
            .filter_map(|h| h.house_cells().map(|cells| cells.to_vec()))
            .collect()
    }

    pub fn run_handler(
        &mut self,
        index: usize,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        self.handlers[index].enforce_consistency(grid, accumulator)
    }
}
