use crate::solver::{Counters, Pencilmarks, Solution};
use crate::types::Shape;

/// Renders a solution as a grid, values padded to the widest one.
pub fn solution_as_grid(shape: &Shape, solution: &Solution) -> String {
    let mut output = String::new();

    assert_eq!(shape.num_cells, solution.len());

    let pad_size = shape.num_values.to_string().len() + 1;

    for r in 0..shape.num_rows {
        for c in 0..shape.num_cols {
            let index = shape.make_cell_index(r, c);
            let value = solution[index].to_string();
            (0..pad_size - value.len()).for_each(|_| output.push(' '));
            output.push_str(&value);
        }
        output.push('\n');
    }

    output
}

pub fn solution_compact(solution: &Solution) -> String {
    format!(
        "[{}]",
        solution
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Renders pencilmarks with one candidate-set column per cell.
pub fn pencilmarks_as_grid(shape: &Shape, pencilmarks: &Pencilmarks) -> String {
    let mut output = String::new();

    let cell_width = shape.num_values as usize + 1;
    for r in 0..shape.num_rows {
        for c in 0..shape.num_cols {
            let vs = pencilmarks[shape.make_cell_index(r, c)];
            let marks: String = vs.map(|v| char::from_digit(v as u32 + 1, 17).unwrap()).collect();
            output.push_str(&format!("{marks:>cell_width$}"));
        }
        output.push('\n');
    }

    output
}

pub fn counters(counters: &Counters) -> String {
    format!(
        "{{ solutions: {} guesses: {} values_tried: {} constraints_processed: {} progress_ratio: {:.4} }}",
        counters.solutions,
        counters.guesses,
        counters.values_tried,
        counters.constraints_processed,
        counters.progress_ratio
    )
}
