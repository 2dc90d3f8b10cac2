use std::collections::HashSet;

use log::debug;

use crate::error::SolverError;
use crate::lookup_tables::make_binary_key;
use crate::nfa::dfa::Dfa;
use crate::nfa::regex_parser;
use crate::types::{CellIndex, Constraint, ConstraintSpec, Shape};
use crate::value_set::ValueSet;

use super::handlers::*;

type Handlers = Vec<Box<dyn ConstraintHandler>>;

/// Translates the declarative constraint list into the handler stream the
/// engine runs. Rows, columns and (usually) boxes are always present.
pub fn compile(constraint: &Constraint) -> Result<Handlers, SolverError> {
    let shape = &constraint.shape;
    let mut handlers: Handlers = Vec::new();

    let no_boxes = constraint
        .specs
        .iter()
        .any(|spec| matches!(spec, ConstraintSpec::NoBoxes));

    for house in make_grid_houses(shape, no_boxes) {
        handlers.push(Box::new(AllDifferentHandler::new(house)));
    }

    // Givens from both the fixed-value list and explicit specs fold into a
    // single candidates handler.
    let mut given_candidates: Vec<(CellIndex, ValueSet)> = Vec::new();
    for &(cell, value) in &constraint.fixed_values {
        check_cell(shape, cell)?;
        check_value(shape, value.display_value())?;
        given_candidates.push((cell, ValueSet::from_value(value.index())));
    }

    // Dots feed the strict variants, so gather them up front.
    let mut kropki_pairs: HashSet<(CellIndex, CellIndex)> = HashSet::new();
    let mut xv_pairs: HashSet<(CellIndex, CellIndex)> = HashSet::new();
    for spec in &constraint.specs {
        match spec {
            ConstraintSpec::Kropki { a, b, .. } => {
                kropki_pairs.insert(ordered(*a, *b));
            }
            ConstraintSpec::Xv { a, b, .. } => {
                xv_pairs.insert(ordered(*a, *b));
            }
            _ => {}
        }
    }

    for spec in &constraint.specs {
        compile_spec(
            spec,
            shape,
            &kropki_pairs,
            &xv_pairs,
            &mut given_candidates,
            &mut handlers,
        )?;
    }

    if !given_candidates.is_empty() {
        handlers.push(Box::new(GivenCandidatesHandler::new(given_candidates)));
    }

    debug!("compiled {} handlers", handlers.len());
    Ok(handlers)
}

fn compile_spec(
    spec: &ConstraintSpec,
    shape: &Shape,
    kropki_pairs: &HashSet<(CellIndex, CellIndex)>,
    xv_pairs: &HashSet<(CellIndex, CellIndex)>,
    given_candidates: &mut Vec<(CellIndex, ValueSet)>,
    handlers: &mut Handlers,
) -> Result<(), SolverError> {
    let values = shape.num_values;

    match spec {
        ConstraintSpec::Given { cell, value } => {
            check_cell(shape, *cell)?;
            check_value(shape, value.display_value())?;
            given_candidates.push((*cell, ValueSet::from_value(value.index())));
        }
        ConstraintSpec::GivenCandidates { cell, values: allowed } => {
            check_cell(shape, *cell)?;
            let mut mask = ValueSet::empty();
            for v in allowed {
                check_value(shape, v.display_value())?;
                mask |= ValueSet::from_value(v.index());
            }
            given_candidates.push((*cell, mask));
        }
        ConstraintSpec::Cage { sum, cells } => {
            check_cells(shape, cells)?;
            handlers.push(Box::new(SumHandler::new(cells.clone(), *sum)));
            handlers.push(Box::new(AllDifferentHandler::new(cells.clone())));
        }
        ConstraintSpec::Sum { sum, cells } | ConstraintSpec::LittleKiller { sum, cells } => {
            check_cells(shape, cells)?;
            handlers.push(Box::new(SumHandler::new(cells.clone(), *sum)));
        }
        ConstraintSpec::Arrow { cells } => {
            check_line(shape, cells, 2)?;
            handlers.push(Box::new(SumHandler::with_negative(
                cells[1..].to_vec(),
                vec![cells[0]],
                0,
            )));
        }
        ConstraintSpec::DoubleArrow { cells } => {
            check_line(shape, cells, 3)?;
            handlers.push(Box::new(SumHandler::with_negative(
                cells[1..cells.len() - 1].to_vec(),
                vec![cells[0], cells[cells.len() - 1]],
                0,
            )));
        }
        ConstraintSpec::PillArrow { pill_size, cells } => {
            check_line(shape, cells, pill_size + 1)?;
            handlers.push(Box::new(PillArrowHandler::new(*pill_size, cells.clone())));
        }
        ConstraintSpec::Thermo { cells } => {
            check_line(shape, cells, 2)?;
            let key = make_binary_key(values, |a, b| a < b);
            for pair in cells.windows(2) {
                handlers.push(Box::new(BinaryConstraintHandler::new(
                    pair[0],
                    pair[1],
                    key.clone(),
                )));
            }
        }
        ConstraintSpec::Whisper { min_diff, cells } => {
            check_line(shape, cells, 2)?;
            let diff = *min_diff;
            let key = make_binary_key(values, |a, b| a.abs_diff(b) >= diff);
            for pair in cells.windows(2) {
                handlers.push(Box::new(BinaryConstraintHandler::new(
                    pair[0],
                    pair[1],
                    key.clone(),
                )));
            }
        }
        ConstraintSpec::Renban { cells } => {
            check_line(shape, cells, 2)?;
            let span = cells.len() as u32;
            let key = make_binary_key(values, |a, b| a != b && a.abs_diff(b) < span);
            handlers.push(Box::new(BinaryPairwiseHandler::new(
                cells.clone(),
                key,
                true,
            )));
        }
        ConstraintSpec::Modular { modulus, cells } => {
            check_line(shape, cells, 2)?;
            let m = *modulus;
            if m < 2 {
                return Err(SolverError::BadConstraint("modulus below 2".to_string()));
            }
            let key = make_binary_key(values, move |a, b| a % m != b % m);
            let window = (m as usize).min(cells.len());
            for window_cells in cells.windows(window) {
                handlers.push(Box::new(BinaryPairwiseHandler::new(
                    window_cells.to_vec(),
                    key.clone(),
                    false,
                )));
            }
        }
        ConstraintSpec::Entropic { cells } => {
            check_line(shape, cells, 2)?;
            let band = entropy_band_fn(shape)?;
            let key = make_binary_key(values, move |a, b| band(a) != band(b));
            let window = 3.min(cells.len());
            for window_cells in cells.windows(window) {
                handlers.push(Box::new(BinaryPairwiseHandler::new(
                    window_cells.to_vec(),
                    key.clone(),
                    false,
                )));
            }
        }
        ConstraintSpec::Palindrome { cells } => {
            check_line(shape, cells, 2)?;
            let key = make_binary_key(values, |a, b| a == b);
            for i in 0..cells.len() / 2 {
                handlers.push(Box::new(BinaryConstraintHandler::new(
                    cells[i],
                    cells[cells.len() - 1 - i],
                    key.clone(),
                )));
            }
        }
        ConstraintSpec::Zipper { cells } => {
            check_line(shape, cells, 3)?;
            let len = cells.len();
            if len % 2 == 1 {
                let centre = cells[len / 2];
                for i in 0..len / 2 {
                    handlers.push(Box::new(SumHandler::with_negative(
                        vec![cells[i], cells[len - 1 - i]],
                        vec![centre],
                        0,
                    )));
                }
            } else {
                // All pairs share one unknown total; peg them to the first.
                for i in 1..len / 2 {
                    handlers.push(Box::new(SumHandler::with_negative(
                        vec![cells[i], cells[len - 1 - i]],
                        vec![cells[0], cells[len - 1]],
                        0,
                    )));
                }
            }
        }
        ConstraintSpec::SumLine { sum, is_loop, cells } => {
            check_line(shape, cells, 2)?;
            handlers.push(Box::new(SumLineHandler::new(*sum, *is_loop, cells.clone())));
        }
        ConstraintSpec::RegionSumLine { cells } => {
            check_line(shape, cells, 2)?;
            handlers.push(Box::new(RegionSumLineHandler::new(cells.clone())));
        }
        ConstraintSpec::Between { cells } => {
            check_line(shape, cells, 3)?;
            handlers.push(Box::new(BetweenHandler::new(cells.clone())));
        }
        ConstraintSpec::Lockout { min_diff, cells } => {
            check_line(shape, cells, 3)?;
            let diff = if *min_diff == 0 {
                (values + 1) / 2
            } else {
                *min_diff
            };
            handlers.push(Box::new(LockoutHandler::new(diff, cells.clone())));
        }
        ConstraintSpec::Lunchbox { sum, cells } => {
            check_line(shape, cells, 2)?;
            handlers.push(Box::new(LunchboxHandler::new(*sum, cells.clone())));
        }
        ConstraintSpec::Skyscraper { count, cells } => {
            check_line(shape, cells, 1)?;
            handlers.push(Box::new(SkyscraperHandler::new(*count, cells.clone())));
        }
        ConstraintSpec::HiddenSkyscraper { value, cells } => {
            check_line(shape, cells, 2)?;
            check_value(shape, value.display_value())?;
            handlers.push(Box::new(HiddenSkyscraperHandler::new(
                value.display_value(),
                cells.clone(),
            )));
        }
        ConstraintSpec::NumberedRoom { value, cells } => {
            check_line(shape, cells, 1)?;
            check_value(shape, value.display_value())?;
            handlers.push(Box::new(NumberedRoomHandler::new(
                value.display_value(),
                cells.clone(),
            )));
        }
        ConstraintSpec::XSum { sum, cells } => {
            check_line(shape, cells, 1)?;
            handlers.push(Box::new(XSumHandler::new(*sum, cells.clone())));
        }
        ConstraintSpec::FullRank { rank, line } => {
            check_line(shape, line, 1)?;
            handlers.push(Box::new(FullRankHandler::new(*rank, line.clone())));
        }
        ConstraintSpec::RequiredValues {
            values: required,
            cells,
            strict,
        } => {
            check_cells(shape, cells)?;
            let mut mask = ValueSet::empty();
            for v in required {
                check_value(shape, v.display_value())?;
                mask |= ValueSet::from_value(v.index());
            }
            handlers.push(Box::new(RequiredValuesHandler::new(
                cells.clone(),
                mask,
                *strict,
            )));
        }
        ConstraintSpec::CountingCircles { cells } => {
            check_cells(shape, cells)?;
            handlers.push(Box::new(CountingCirclesHandler::new(cells.clone())));
        }
        ConstraintSpec::Indexing {
            control,
            line,
            value,
        } => {
            check_cell(shape, *control)?;
            check_cells(shape, line)?;
            check_value(shape, value.display_value())?;
            handlers.push(Box::new(IndexingHandler::new(
                *control,
                line.clone(),
                value.index(),
            )));
        }
        ConstraintSpec::RegexLine { pattern, cells } => {
            check_line(shape, cells, 1)?;
            let nfa = regex_parser::compile(pattern, values as usize)?;
            let dfa = Dfa::from_nfa(&nfa)?.minimize();
            handlers.push(Box::new(RegexLineHandler::new(cells.clone(), dfa)));
        }
        ConstraintSpec::AllDifferent { cells } => {
            check_cells(shape, cells)?;
            handlers.push(Box::new(AllDifferentHandler::new(cells.clone())));
        }
        ConstraintSpec::Kropki { black, a, b } => {
            check_cell(shape, *a)?;
            check_cell(shape, *b)?;
            let key = if *black {
                make_binary_key(values, |x, y| x == 2 * y || y == 2 * x)
            } else {
                make_binary_key(values, |x, y| x.abs_diff(y) == 1)
            };
            handlers.push(Box::new(BinaryConstraintHandler::new(*a, *b, key)));
        }
        ConstraintSpec::Xv { is_x, a, b } => {
            check_cell(shape, *a)?;
            check_cell(shape, *b)?;
            let total = if *is_x { 10 } else { 5 };
            let key = make_binary_key(values, move |x, y| x + y == total);
            handlers.push(Box::new(BinaryConstraintHandler::new(*a, *b, key)));
        }
        ConstraintSpec::StrictKropki => {
            let key = make_binary_key(values, |x, y| {
                x.abs_diff(y) != 1 && x != 2 * y && y != 2 * x
            });
            for (a, b) in adjacent_pairs(shape) {
                if !kropki_pairs.contains(&(a, b)) {
                    handlers.push(Box::new(BinaryConstraintHandler::new(a, b, key.clone())));
                }
            }
        }
        ConstraintSpec::StrictXv => {
            let key = make_binary_key(values, |x, y| x + y != 5 && x + y != 10);
            for (a, b) in adjacent_pairs(shape) {
                if !xv_pairs.contains(&(a, b)) {
                    handlers.push(Box::new(BinaryConstraintHandler::new(a, b, key.clone())));
                }
            }
        }
        ConstraintSpec::SudokuX => {
            if shape.num_rows != shape.num_cols {
                return Err(SolverError::BadConstraint(
                    "diagonals need a square grid".to_string(),
                ));
            }
            let n = shape.num_rows;
            let main: Vec<CellIndex> = (0..n).map(|i| shape.make_cell_index(i, i)).collect();
            let anti: Vec<CellIndex> = (0..n)
                .map(|i| shape.make_cell_index(i, n - 1 - i))
                .collect();
            handlers.push(Box::new(AllDifferentHandler::new(main)));
            handlers.push(Box::new(AllDifferentHandler::new(anti)));
        }
        ConstraintSpec::Windoku => {
            if shape.num_rows != 9 || shape.num_cols != 9 {
                return Err(SolverError::BadConstraint(
                    "windoku is defined on 9x9 grids".to_string(),
                ));
            }
            for &(r0, c0) in &[(1, 1), (1, 5), (5, 1), (5, 5)] {
                let mut region = Vec::with_capacity(9);
                for r in r0..r0 + 3 {
                    for c in c0..c0 + 3 {
                        region.push(shape.make_cell_index(r, c));
                    }
                }
                handlers.push(Box::new(AllDifferentHandler::new(region)));
            }
        }
        ConstraintSpec::DisjointSets => {
            if !shape.has_boxes() {
                return Err(SolverError::BadConstraint(
                    "disjoint sets need boxes".to_string(),
                ));
            }
            let boxes_across = shape.num_cols / shape.box_width;
            let num_boxes = shape.num_values;
            for position in 0..shape.num_values {
                let (dr, dc) = (position / shape.box_width, position % shape.box_width);
                let mut group = Vec::with_capacity(num_boxes as usize);
                for b in 0..num_boxes {
                    let r = (b / boxes_across) * shape.box_height + dr;
                    let c = (b % boxes_across) * shape.box_width + dc;
                    group.push(shape.make_cell_index(r, c));
                }
                handlers.push(Box::new(AllDifferentHandler::new(group)));
            }
        }
        ConstraintSpec::GlobalEntropy => {
            entropy_band_fn(shape)?;
            for r in 0..shape.num_rows - 1 {
                for c in 0..shape.num_cols - 1 {
                    let square = vec![
                        shape.make_cell_index(r, c),
                        shape.make_cell_index(r, c + 1),
                        shape.make_cell_index(r + 1, c),
                        shape.make_cell_index(r + 1, c + 1),
                    ];
                    handlers.push(Box::new(LocalEntropyHandler::new(square)));
                }
            }
        }
        ConstraintSpec::AntiKnight => {
            for (a, b) in offset_pairs(shape, &[(1, 2), (2, 1), (2, -1), (1, -2)]) {
                handlers.push(Box::new(AllDifferentHandler::new(vec![a, b])));
            }
        }
        ConstraintSpec::AntiKing => {
            for (a, b) in offset_pairs(shape, &[(0, 1), (1, 1), (1, 0), (1, -1)]) {
                handlers.push(Box::new(AllDifferentHandler::new(vec![a, b])));
            }
        }
        ConstraintSpec::AntiConsecutive => {
            let key = make_binary_key(values, |x, y| x.abs_diff(y) != 1);
            for (a, b) in adjacent_pairs(shape) {
                handlers.push(Box::new(BinaryConstraintHandler::new(a, b, key.clone())));
            }
        }
        ConstraintSpec::AntiTaxicab => {
            // A cell may not see its own value at taxicab distance equal to
            // that value.
            for cell in 0..shape.num_cells {
                let (r, c) = shape.cell_row_col(cell);
                let mut value_map: Vec<Vec<CellIndex>> = Vec::new();
                for v in 1..=shape.num_values as i32 {
                    let mut at_distance = Vec::new();
                    for other in 0..shape.num_cells {
                        if other == cell {
                            continue;
                        }
                        let (or, oc) = shape.cell_row_col(other);
                        let dist =
                            (r as i32 - or as i32).abs() + (c as i32 - oc as i32).abs();
                        if dist == v {
                            at_distance.push(other);
                        }
                    }
                    value_map.push(at_distance);
                }
                handlers.push(Box::new(ValueDependentUniqueValueExclusionHandler::new(
                    cell, value_map,
                )));
            }
        }
        ConstraintSpec::Jigsaw { regions } => {
            for region in regions {
                check_cells(shape, region)?;
                handlers.push(Box::new(AllDifferentHandler::new(region.clone())));
            }
        }
        ConstraintSpec::NoBoxes => {}
        ConstraintSpec::Priority { cells, priority } => {
            check_cells(shape, cells)?;
            handlers.push(Box::new(PriorityHandler::new(cells.clone(), *priority)));
        }
        ConstraintSpec::False => {
            handlers.push(Box::new(FalseHandler::new(Vec::new())));
        }
    }
    Ok(())
}

/// Rows, columns and boxes.
pub fn make_grid_houses(shape: &Shape, no_boxes: bool) -> Vec<Vec<CellIndex>> {
    let mut houses = Vec::new();

    if shape.num_cols == shape.num_values {
        for r in 0..shape.num_rows {
            houses.push(
                (0..shape.num_cols)
                    .map(|c| shape.make_cell_index(r, c))
                    .collect(),
            );
        }
    }
    if shape.num_rows == shape.num_values {
        for c in 0..shape.num_cols {
            houses.push(
                (0..shape.num_rows)
                    .map(|r| shape.make_cell_index(r, c))
                    .collect(),
            );
        }
    }
    if !no_boxes && shape.has_boxes() {
        let boxes_across = shape.num_cols / shape.box_width;
        for b in 0..shape.num_values {
            let base_r = (b / boxes_across) * shape.box_height;
            let base_c = (b % boxes_across) * shape.box_width;
            houses.push(
                (0..shape.num_values)
                    .map(|i| {
                        shape.make_cell_index(
                            base_r + i / shape.box_width,
                            base_c + i % shape.box_width,
                        )
                    })
                    .collect(),
            );
        }
    }

    houses
}

fn entropy_band_fn(shape: &Shape) -> Result<impl Fn(u32) -> u32 + Copy, SolverError> {
    if shape.num_values % 3 != 0 {
        return Err(SolverError::BadConstraint(
            "entropy bands need a value count divisible by 3".to_string(),
        ));
    }
    let third = shape.num_values / 3;
    Ok(move |v: u32| (v - 1) / third)
}

fn ordered(a: CellIndex, b: CellIndex) -> (CellIndex, CellIndex) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Orthogonally adjacent pairs, each reported once.
fn adjacent_pairs(shape: &Shape) -> Vec<(CellIndex, CellIndex)> {
    offset_pairs(shape, &[(0, 1), (1, 0)])
}

/// Pairs of cells related by any of the offsets, each reported once.
fn offset_pairs(shape: &Shape, offsets: &[(i32, i32)]) -> Vec<(CellIndex, CellIndex)> {
    let mut pairs = Vec::new();
    for cell in 0..shape.num_cells {
        let (r, c) = shape.cell_row_col(cell);
        for &(dr, dc) in offsets {
            let nr = r as i32 + dr;
            let nc = c as i32 + dc;
            if nr >= 0 && nr < shape.num_rows as i32 && nc >= 0 && nc < shape.num_cols as i32 {
                pairs.push(ordered(cell, shape.make_cell_index(nr as u32, nc as u32)));
            }
        }
    }
    pairs
}

fn check_cell(shape: &Shape, cell: CellIndex) -> Result<(), SolverError> {
    if cell >= shape.num_cells {
        return Err(SolverError::CellOutOfRange {
            cell,
            num_cells: shape.num_cells,
        });
    }
    Ok(())
}

fn check_cells(shape: &Shape, cells: &[CellIndex]) -> Result<(), SolverError> {
    if cells.is_empty() {
        return Err(SolverError::BadConstraint("empty cell list".to_string()));
    }
    for &cell in cells {
        check_cell(shape, cell)?;
    }
    Ok(())
}

fn check_line(shape: &Shape, cells: &[CellIndex], min_len: usize) -> Result<(), SolverError> {
    check_cells(shape, cells)?;
    if cells.len() < min_len {
        return Err(SolverError::BadConstraint(format!(
            "line of {} cells needs at least {min_len}",
            cells.len()
        )));
    }
    Ok(())
}

fn check_value(shape: &Shape, value: u32) -> Result<(), SolverError> {
    if value == 0 || value > shape.num_values {
        return Err(SolverError::ValueOutOfRange {
            value,
            num_values: shape.num_values,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellValue;

    fn base_constraint() -> Constraint {
        Constraint::new(Shape::square(9).unwrap())
    }

    #[test]
    fn plain_grid_gets_rows_cols_boxes() {
        let handlers = compile(&base_constraint()).unwrap();
        assert_eq!(handlers.len(), 27);
        assert!(handlers.iter().all(|h| h.name() == "AllDifferent"));
    }

    #[test]
    fn no_boxes_drops_box_houses() {
        let mut constraint = base_constraint();
        constraint.specs.push(ConstraintSpec::NoBoxes);
        let handlers = compile(&constraint).unwrap();
        assert_eq!(handlers.len(), 18);
    }

    #[test]
    fn cage_becomes_sum_plus_all_different() {
        let mut constraint = base_constraint();
        constraint.specs.push(ConstraintSpec::Cage {
            sum: 10,
            cells: vec![0, 1, 2],
        });
        let handlers = compile(&constraint).unwrap();
        assert!(handlers.iter().any(|h| h.name() == "Sum"));
        assert_eq!(
            handlers.iter().filter(|h| h.name() == "AllDifferent").count(),
            28
        );
    }

    #[test]
    fn thermo_becomes_binary_chain() {
        let mut constraint = base_constraint();
        constraint.specs.push(ConstraintSpec::Thermo {
            cells: vec![0, 1, 2, 3],
        });
        let handlers = compile(&constraint).unwrap();
        assert_eq!(
            handlers
                .iter()
                .filter(|h| h.name() == "BinaryConstraint")
                .count(),
            3
        );
    }

    #[test]
    fn strict_kropki_skips_dotted_pairs() {
        let shape = Shape::square(4).unwrap();
        let mut constraint = Constraint::new(shape);
        constraint.specs.push(ConstraintSpec::Kropki {
            black: false,
            a: 0,
            b: 1,
        });
        constraint.specs.push(ConstraintSpec::StrictKropki);
        let handlers = compile(&constraint).unwrap();
        let binary_count = handlers
            .iter()
            .filter(|h| h.name() == "BinaryConstraint")
            .count();
        // 24 adjacent pairs on a 4x4, one carries the dot; plus the dot
        // handler itself.
        assert_eq!(binary_count, 24);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let mut constraint = base_constraint();
        constraint.specs.push(ConstraintSpec::Given {
            cell: 200,
            value: CellValue::from_display_value(1),
        });
        assert!(matches!(
            compile(&constraint),
            Err(SolverError::CellOutOfRange { .. })
        ));

        let mut constraint = base_constraint();
        constraint.specs.push(ConstraintSpec::RegexLine {
            pattern: "(".to_string(),
            cells: vec![0, 1],
        });
        assert!(matches!(
            compile(&constraint),
            Err(SolverError::RegexParse { .. })
        ));
    }
}
