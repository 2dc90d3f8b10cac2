use lazy_static::lazy_static;
use num::integer::Roots;
use regex::Regex;

use crate::error::SolverError;
use crate::types::{CellValue, Constraint, ConstraintSpec, Shape, ValueType, MAX_NUM_VALUES};

pub type ParserResult = Result<Constraint, SolverError>;

/// Parses puzzle text: a grid of givens in short or layout form, with
/// optional variant markers (`sudoku-x`, `anti-knight`, `anti-king`,
/// `windoku`, `no-boxes`) anywhere in the text.
pub fn parse_text(input: &str) -> ParserResult {
    let mut input = String::from(input);

    remove_comments(&mut input);
    let markers = extract_markers(&mut input);

    let parse_fns: Vec<fn(&str) -> ParserResult> = vec![parse_short_text, parse_grid_layout];

    let mut errors = Vec::new();
    for parse_fn in parse_fns {
        match (parse_fn)(&input) {
            Ok(mut constraint) => {
                constraint.specs.extend(markers);
                return Ok(constraint);
            }
            Err(error) => {
                errors.push(error.to_string());
            }
        }
    }

    Err(SolverError::BadPuzzleText(errors.join("; ")))
}

fn remove_comments(input: &mut String) {
    lazy_static! {
        static ref COMMENT_REGEX: Regex = Regex::new("(?m)#.*$").unwrap();
    }

    *input = COMMENT_REGEX.replace_all(input, "").to_string();
}

fn extract_markers(input: &mut String) -> Vec<ConstraintSpec> {
    lazy_static! {
        static ref MARKER_REGEXES: Vec<(Regex, fn() -> ConstraintSpec)> = vec![
            (
                Regex::new("(?i)sudoku[ -]?x").unwrap(),
                (|| ConstraintSpec::SudokuX) as fn() -> ConstraintSpec
            ),
            (Regex::new("(?i)anti-?knight").unwrap(), || {
                ConstraintSpec::AntiKnight
            }),
            (Regex::new("(?i)anti-?king").unwrap(), || {
                ConstraintSpec::AntiKing
            }),
            (Regex::new("(?i)windoku").unwrap(), || {
                ConstraintSpec::Windoku
            }),
            (Regex::new("(?i)no-?boxes").unwrap(), || {
                ConstraintSpec::NoBoxes
            }),
        ];
    }

    let mut specs = Vec::new();
    for (regex, make_spec) in MARKER_REGEXES.iter() {
        if regex.is_match(input) {
            specs.push(make_spec());
            *input = regex.replace_all(input, "").to_string();
        }
    }
    specs
}

fn remove_whitespace(s: &mut String) {
    s.retain(|c| !c.is_whitespace());
}

fn guess_side_length(num_cells: usize) -> Result<u32, SolverError> {
    let side = num_cells.sqrt() as u32;
    if (side * side) as usize != num_cells {
        return Err(SolverError::BadPuzzleText(format!(
            "cell count does not make a square grid: {num_cells}"
        )));
    }
    if side == 0 || side > MAX_NUM_VALUES {
        return Err(SolverError::BadPuzzleText(format!(
            "grid size not supported, side length: {side}"
        )));
    }
    Ok(side)
}

fn parse_short_text(input: &str) -> ParserResult {
    let mut input = String::from(input);
    remove_whitespace(&mut input);

    let side = guess_side_length(input.chars().count())?;
    let radix = side + 1;

    let mut constraint = Constraint::new(Shape::square(side)?);

    for (i, c) in input.chars().enumerate() {
        match c {
            '.' | '0' => {}
            c if c.is_digit(radix) => {
                constraint.fixed_values.push((
                    i,
                    CellValue::from_display_value(c.to_digit(radix).unwrap()),
                ));
            }
            c => {
                return Err(SolverError::BadPuzzleText(format!(
                    "unrecognized character: {c}"
                )));
            }
        }
    }

    Ok(constraint)
}

fn parse_grid_layout(input: &str) -> ParserResult {
    lazy_static! {
        static ref CELL_REGEX: Regex = Regex::new("[.]|\\d+").unwrap();
    }

    let parts = CELL_REGEX
        .find_iter(input)
        .map(|mat| mat.as_str())
        .collect::<Vec<_>>();
    let side = guess_side_length(parts.len())?;

    let mut constraint = Constraint::new(Shape::square(side)?);

    for (i, part) in parts.iter().enumerate() {
        match *part {
            "." => (),
            _ => {
                let value = part
                    .parse::<ValueType>()
                    .map_err(|_| SolverError::BadPuzzleText(format!("bad number: {part}")))?;
                if value == 0 || value > side {
                    return Err(SolverError::ValueOutOfRange {
                        value,
                        num_values: side,
                    });
                }
                constraint
                    .fixed_values
                    .push((i, CellValue::from_display_value(value)));
            }
        }
    }

    Ok(constraint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_four_by_four() {
        let constraint = parse_text("1...\n..2.\n....\n...4").unwrap();
        assert_eq!(constraint.shape.num_values, 4);
        assert_eq!(constraint.fixed_values.len(), 3);
        assert_eq!(constraint.fixed_values[0], (0, CellValue::from_display_value(1)));
        assert_eq!(constraint.fixed_values[1], (6, CellValue::from_display_value(2)));
    }

    #[test]
    fn grid_layout_with_multi_digit_values() {
        let cells: Vec<String> = (0..256)
            .map(|i| if i == 0 { "16".to_string() } else { ".".to_string() })
            .collect();
        let constraint = parse_text(&cells.join(" ")).unwrap();
        assert_eq!(constraint.shape.num_values, 16);
        assert_eq!(
            constraint.fixed_values,
            vec![(0, CellValue::from_display_value(16))]
        );
    }

    #[test]
    fn markers_become_specs() {
        let constraint = parse_text("# my puzzle\nsudoku-x anti-knight\n1...\n....\n....\n....")
            .unwrap();
        assert_eq!(constraint.specs.len(), 2);
        assert!(matches!(constraint.specs[0], ConstraintSpec::SudokuX));
        assert!(matches!(constraint.specs[1], ConstraintSpec::AntiKnight));
    }

    #[test]
    fn comments_are_stripped() {
        let constraint = parse_text("# a comment line\n.3..\n....\n.... # trailing\n....").unwrap();
        assert_eq!(constraint.fixed_values.len(), 1);
    }

    #[test]
    fn bad_sizes_are_rejected() {
        assert!(parse_text("123").is_err());
        assert!(parse_text(&"1".repeat(289)).is_err()); // 17x17
    }
}
