use variant_sudoku_solver::solver::{Solver, StepGuides};
use variant_sudoku_solver::types::{
    CellValue, Constraint, ConstraintSpec, Shape,
};
use variant_sudoku_solver::value_set::ValueSet;

fn empty_constraint(side: u32) -> Constraint {
    Constraint::new(Shape::square(side).unwrap())
}

fn constraint_with_givens(side: u32, givens: &str) -> Constraint {
    let mut constraint = empty_constraint(side);
    for (i, c) in givens.chars().enumerate() {
        if let Some(d) = c.to_digit(side + 1) {
            if d > 0 {
                constraint
                    .fixed_values
                    .push((i, CellValue::from_display_value(d)));
            }
        }
    }
    constraint
}

/// Every row, column and box holds each value exactly once.
fn assert_valid_solution(shape: &Shape, solution: &[CellValue]) {
    let side = shape.num_values;
    let check_house = |cells: Vec<usize>| {
        let mut seen = ValueSet::empty();
        for cell in cells {
            seen |= ValueSet::from_value(solution[cell].index());
        }
        assert_eq!(seen, ValueSet::full(side as u8));
    };
    for r in 0..side {
        check_house((0..side).map(|c| shape.make_cell_index(r, c)).collect());
    }
    for c in 0..side {
        check_house((0..side).map(|r| shape.make_cell_index(r, c)).collect());
    }
    let (bh, bw) = (shape.box_height, shape.box_width);
    for b in 0..side {
        let base_r = (b / (side / bw)) * bh;
        let base_c = (b % (side / bw)) * bw;
        check_house(
            (0..side)
                .map(|i| shape.make_cell_index(base_r + i / bw, base_c + i % bw))
                .collect(),
        );
    }
}

#[test]
fn one_by_one_grid_has_the_unique_solution() {
    let constraint = empty_constraint(1);
    let mut solver = Solver::new(&constraint).unwrap();
    assert_eq!(solver.count_solutions(), 1);
    let solution = solver.nth_solution(0).unwrap();
    assert_eq!(solution, vec![CellValue::from_display_value(1)]);
    assert!(solver.nth_solution(1).is_none());
}

#[test]
fn false_handler_means_zero_solutions_without_error() {
    let mut constraint = empty_constraint(4);
    constraint.specs.push(ConstraintSpec::False);
    let mut solver = Solver::new(&constraint).unwrap();
    assert_eq!(solver.count_solutions(), 0);
    assert!(solver.nth_solution(0).is_none());
}

#[test]
fn empty_four_by_four_has_288_solutions() {
    let mut solver = Solver::new(&empty_constraint(4)).unwrap();
    assert_eq!(solver.count_solutions(), 288);

    let state = solver.state();
    assert!(state.done);
    assert!(
        (state.counters.progress_ratio + state.counters.branches_ignored - 1.0).abs() < 1e-6,
        "progress must account for the whole tree: {}",
        state.counters.progress_ratio
    );
}

#[test]
fn count_matches_enumeration() {
    let mut solver = Solver::new(&empty_constraint(4)).unwrap();
    let count = solver.count_solutions();

    let shape = Shape::square(4).unwrap();
    let mut enumerated = 0;
    loop {
        match solver.nth_solution(enumerated) {
            Some(solution) => {
                assert_valid_solution(&shape, &solution);
                enumerated += 1;
            }
            None => break,
        }
    }
    assert_eq!(enumerated as u64, count);
}

#[test]
fn empty_nine_by_nine_yields_a_valid_first_solution() {
    let constraint = empty_constraint(9);
    let mut solver = Solver::new(&constraint).unwrap();
    let solution = solver.nth_solution(0).expect("an empty grid has solutions");
    assert_valid_solution(&constraint.shape, &solution);
}

#[test]
fn single_solution_nine_by_nine() {
    let givens =
        ".3...41.2.5.2....9.........9....57...............6.....4.....5...........8...9...";
    let constraint = constraint_with_givens(9, givens);
    let mut solver = Solver::new(&constraint).unwrap();

    let solution = solver.nth_solution(0).expect("puzzle must be solvable");
    assert_valid_solution(&constraint.shape, &solution);
    for &(cell, value) in &constraint.fixed_values {
        assert_eq!(solution[cell], value, "given at cell {cell} must survive");
    }
    assert!(solver.nth_solution(1).is_none(), "solution must be unique");
}

#[test]
fn redundant_cage_does_not_change_the_count() {
    let mut plain = Solver::new(&empty_constraint(4)).unwrap();

    let mut caged = empty_constraint(4);
    caged.specs.push(ConstraintSpec::Cage {
        sum: 10,
        cells: vec![0, 1, 2, 3],
    });
    let mut caged = Solver::new(&caged).unwrap();

    assert_eq!(plain.count_solutions(), caged.count_solutions());
}

#[test]
fn thermo_initial_propagation_bounds_the_ends() {
    let mut constraint = empty_constraint(9);
    constraint.specs.push(ConstraintSpec::Thermo {
        cells: vec![0, 1, 2, 3, 4],
    });
    let mut solver = Solver::new(&constraint).unwrap();

    let step = solver.nth_step(0, StepGuides::new()).unwrap();
    assert!(!step.has_contradiction);
    // First cell within 1..5, last within 5..9.
    assert_eq!(step.pencilmarks[0], ValueSet::from_iter(0u8..5));
    assert_eq!(step.pencilmarks[4], ValueSet::from_iter(4u8..9));
}

#[test]
fn regex_line_fixes_the_only_word() {
    let mut constraint = empty_constraint(9);
    constraint.specs.push(ConstraintSpec::RegexLine {
        pattern: "(12)+".to_string(),
        cells: vec![0, 1],
    });
    let mut solver = Solver::new(&constraint).unwrap();

    let step = solver.nth_step(0, StepGuides::new()).unwrap();
    assert_eq!(step.pencilmarks[0], ValueSet::from_value(0));
    assert_eq!(step.pencilmarks[1], ValueSet::from_value(1));
}

#[test]
fn anti_knight_given_clears_knight_moves() {
    let mut constraint = empty_constraint(9);
    constraint.specs.push(ConstraintSpec::AntiKnight);
    let r5c5 = constraint.shape.make_cell_index(4, 4);
    constraint
        .fixed_values
        .push((r5c5, CellValue::from_display_value(5)));
    let mut solver = Solver::new(&constraint).unwrap();

    let step = solver.nth_step(0, StepGuides::new()).unwrap();
    let shape = constraint.shape;
    let knight_cells = [
        shape.make_cell_index(2, 3),
        shape.make_cell_index(2, 5),
        shape.make_cell_index(3, 2),
        shape.make_cell_index(3, 6),
        shape.make_cell_index(5, 2),
        shape.make_cell_index(5, 6),
        shape.make_cell_index(6, 3),
        shape.make_cell_index(6, 5),
    ];
    for cell in knight_cells {
        assert!(
            !step.pencilmarks[cell].contains(4),
            "cell {cell} must not allow 5"
        );
    }
}

#[test]
fn solve_all_possibilities_covers_every_value_on_an_empty_grid() {
    let mut solver = Solver::new(&empty_constraint(4)).unwrap();
    let pencilmarks = solver.solve_all_possibilities();
    // By value-relabelling symmetry every cell takes every value somewhere.
    assert!(pencilmarks.iter().all(|&vs| vs == ValueSet::full(4)));
}

#[test]
fn solve_all_possibilities_matches_enumeration() {
    let givens = "12..............";
    let constraint = constraint_with_givens(4, givens);

    let mut solver = Solver::new(&constraint).unwrap();
    let pencilmarks = solver.solve_all_possibilities();

    let mut expected = vec![ValueSet::empty(); 16];
    let mut solver = Solver::new(&constraint).unwrap();
    let mut n = 0;
    while let Some(solution) = solver.nth_solution(n) {
        for (cell, value) in solution.iter().enumerate() {
            expected[cell] |= ValueSet::from_value(value.index());
        }
        n += 1;
    }
    assert!(n > 1, "test puzzle should have several solutions");
    assert_eq!(pencilmarks, expected);
}

#[test]
fn unsatisfiable_givens_report_zero_solutions() {
    // Two identical givens in one row.
    let mut constraint = empty_constraint(4);
    constraint
        .fixed_values
        .push((0, CellValue::from_display_value(1)));
    constraint
        .fixed_values
        .push((1, CellValue::from_display_value(1)));
    let mut solver = Solver::new(&constraint).unwrap();
    assert_eq!(solver.count_solutions(), 0);
}

#[test]
fn validate_layout_accepts_plain_grids() {
    let mut solver = Solver::new(&empty_constraint(9)).unwrap();
    assert!(solver.validate_layout());
}

#[test]
fn validate_layout_rejects_impossible_houses() {
    // On a 2x2 grid the main diagonal of any latin square repeats, so
    // making it a house is unsatisfiable.
    let mut constraint = empty_constraint(2);
    constraint.specs.push(ConstraintSpec::SudokuX);
    let mut solver = Solver::new(&constraint).unwrap();
    assert!(!solver.validate_layout());
}

#[test]
fn step_mode_replays_the_normal_search() {
    let givens = "12.4............";
    let constraint = constraint_with_givens(4, givens);

    let mut stepped = Solver::new(&constraint).unwrap();
    let mut n = 0;
    let stepped_solution = loop {
        match stepped.nth_step(n, StepGuides::new()) {
            Some(step) => {
                if step.is_solution {
                    break step.values.unwrap();
                }
                n += 1;
            }
            None => panic!("search ended without a solution"),
        }
    };

    let mut plain = Solver::new(&constraint).unwrap();
    assert_eq!(plain.nth_solution(0).unwrap(), stepped_solution);
}

#[test]
fn step_guides_steer_the_first_branch() {
    let mut solver = Solver::new(&empty_constraint(4)).unwrap();

    let mut guides = StepGuides::new();
    guides.insert(
        1,
        variant_sudoku_solver::solver::StepGuide {
            cell: Some(5),
            value: Some(3),
        },
    );
    let step = solver.nth_step(1, guides).unwrap();
    assert_eq!(step.latest_cell, Some(5));
    assert_eq!(step.pencilmarks[5], ValueSet::from_value(2));
}

#[test]
fn sample_solution_is_cached() {
    let mut solver = Solver::new(&empty_constraint(4)).unwrap();
    assert!(solver.sample_solution().is_none());
    solver.count_solutions();
    let shape = Shape::square(4).unwrap();
    let sample = solver.sample_solution().expect("sample after counting");
    assert_valid_solution(&shape, sample);
}

#[test]
fn progress_callback_fires_and_ends_done() {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    let calls = Arc::new(AtomicU64::new(0));
    let saw_done = Arc::new(AtomicBool::new(false));
    let calls_in_cb = calls.clone();
    let done_in_cb = saw_done.clone();

    let mut solver = Solver::new(&empty_constraint(4)).unwrap();
    solver.set_progress_callback(
        Some(Box::new(move |state| {
            calls_in_cb.fetch_add(1, Ordering::Relaxed);
            if state.done {
                done_in_cb.store(true, Ordering::Relaxed);
            }
        })),
        0,
    );
    solver.count_solutions();

    assert!(calls.load(Ordering::Relaxed) > 0);
    assert!(saw_done.load(Ordering::Relaxed));
}

#[test]
fn anti_taxicab_blocks_matching_distances() {
    let mut constraint = empty_constraint(9);
    constraint.specs.push(ConstraintSpec::AntiTaxicab);
    let r5c5 = constraint.shape.make_cell_index(4, 4);
    constraint
        .fixed_values
        .push((r5c5, CellValue::from_display_value(4)));
    let mut solver = Solver::new(&constraint).unwrap();

    let step = solver.nth_step(0, StepGuides::new()).unwrap();
    // R2C4 sits at taxicab distance 4, outside the given's row, column and
    // box, so only the taxicab rule can strip its 4.
    let shape = constraint.shape;
    let blocked = shape.make_cell_index(1, 3);
    assert!(!step.pencilmarks[blocked].contains(3));
    // R3C4 is at distance 3 and keeps its 4.
    let free = shape.make_cell_index(2, 3);
    assert!(step.pencilmarks[free].contains(3));
}
