use std::fmt;

use crate::error::SolverError;

pub type CellIndex = usize;
pub type ValueType = u32;

/// A single cell value. Stored as a zero-based index; displayed one-based.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellValue(u8);

impl CellValue {
    #[inline]
    pub fn from_index(index: u8) -> CellValue {
        CellValue(index)
    }

    #[inline]
    pub fn from_display_value(value: ValueType) -> CellValue {
        CellValue((value - 1) as u8)
    }

    #[inline]
    pub fn index(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn display_value(&self) -> ValueType {
        self.0 as ValueType + 1
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_value())
    }
}

pub type FixedValues = Vec<(CellIndex, CellValue)>;

pub const MAX_NUM_VALUES: u32 = 16;

/// Grid geometry. Immutable after construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shape {
    pub num_rows: u32,
    pub num_cols: u32,
    pub num_values: u32,
    pub num_cells: usize,
    pub box_height: u32,
    pub box_width: u32,
    pub max_sum: u32,
}

impl Shape {
    pub fn new(num_rows: u32, num_cols: u32) -> Result<Shape, SolverError> {
        let num_values = num_rows.max(num_cols);
        if num_values == 0 || num_values > MAX_NUM_VALUES {
            return Err(SolverError::BadShape(format!(
                "side length {num_values} out of range 1..={MAX_NUM_VALUES}"
            )));
        }
        let (box_height, box_width) = Self::default_box_dimensions(num_values);
        Ok(Shape {
            num_rows,
            num_cols,
            num_values,
            num_cells: (num_rows * num_cols) as usize,
            box_height,
            box_width,
            max_sum: num_values * (num_values + 1) / 2,
        })
    }

    pub fn square(num_values: u32) -> Result<Shape, SolverError> {
        Shape::new(num_values, num_values)
    }

    /// The most square box tiling of the side length: the largest divisor
    /// no greater than the square root becomes the height.
    fn default_box_dimensions(num_values: u32) -> (u32, u32) {
        let mut box_height = 1;
        let mut d = 1;
        while d * d <= num_values {
            if num_values % d == 0 {
                box_height = d;
            }
            d += 1;
        }
        (box_height, num_values / box_height)
    }

    #[inline]
    pub fn make_cell_index(&self, row: u32, col: u32) -> CellIndex {
        ((row * self.num_cols) + col) as CellIndex
    }

    #[inline]
    pub fn cell_row_col(&self, cell: CellIndex) -> (u32, u32) {
        (
            cell as u32 / self.num_cols,
            cell as u32 % self.num_cols,
        )
    }

    /// Display name for a cell, e.g. `R1C1` for the top-left corner.
    pub fn cell_id(&self, cell: CellIndex) -> String {
        let (r, c) = self.cell_row_col(cell);
        format!("R{}C{}", r + 1, c + 1)
    }

    pub fn has_boxes(&self) -> bool {
        self.num_rows == self.num_cols && self.box_height > 1 && self.box_width > 1
    }
}

/// A declarative constraint, translated into handlers by the constraint
/// compiler before the search starts.
#[derive(Debug, Clone)]
pub enum ConstraintSpec {
    Given {
        cell: CellIndex,
        value: CellValue,
    },
    GivenCandidates {
        cell: CellIndex,
        values: Vec<CellValue>,
    },
    /// Cells sum to `sum` and are all different.
    Cage {
        sum: u32,
        cells: Vec<CellIndex>,
    },
    Sum {
        sum: u32,
        cells: Vec<CellIndex>,
    },
    /// First cell is the circle; the rest sum to it.
    Arrow {
        cells: Vec<CellIndex>,
    },
    /// The two end cells sum to the total of the cells between them.
    DoubleArrow {
        cells: Vec<CellIndex>,
    },
    /// The first `pill_size` cells read as a decimal number; the rest sum to it.
    PillArrow {
        pill_size: usize,
        cells: Vec<CellIndex>,
    },
    Thermo {
        cells: Vec<CellIndex>,
    },
    Whisper {
        min_diff: u32,
        cells: Vec<CellIndex>,
    },
    Renban {
        cells: Vec<CellIndex>,
    },
    Modular {
        modulus: u32,
        cells: Vec<CellIndex>,
    },
    Entropic {
        cells: Vec<CellIndex>,
    },
    Palindrome {
        cells: Vec<CellIndex>,
    },
    Zipper {
        cells: Vec<CellIndex>,
    },
    SumLine {
        sum: u32,
        is_loop: bool,
        cells: Vec<CellIndex>,
    },
    RegionSumLine {
        cells: Vec<CellIndex>,
    },
    Between {
        cells: Vec<CellIndex>,
    },
    Lockout {
        min_diff: u32,
        cells: Vec<CellIndex>,
    },
    Lunchbox {
        sum: u32,
        cells: Vec<CellIndex>,
    },
    Skyscraper {
        count: u32,
        cells: Vec<CellIndex>,
    },
    HiddenSkyscraper {
        value: CellValue,
        cells: Vec<CellIndex>,
    },
    NumberedRoom {
        value: CellValue,
        cells: Vec<CellIndex>,
    },
    XSum {
        sum: u32,
        cells: Vec<CellIndex>,
    },
    FullRank {
        rank: u32,
        line: Vec<CellIndex>,
    },
    RequiredValues {
        values: Vec<CellValue>,
        cells: Vec<CellIndex>,
        strict: bool,
    },
    CountingCircles {
        cells: Vec<CellIndex>,
    },
    /// `control == k` exactly when `line[k-1] == value`.
    Indexing {
        control: CellIndex,
        line: Vec<CellIndex>,
        value: CellValue,
    },
    RegexLine {
        pattern: String,
        cells: Vec<CellIndex>,
    },
    AllDifferent {
        cells: Vec<CellIndex>,
    },
    LittleKiller {
        sum: u32,
        cells: Vec<CellIndex>,
    },
    Kropki {
        black: bool,
        a: CellIndex,
        b: CellIndex,
    },
    Xv {
        is_x: bool,
        a: CellIndex,
        b: CellIndex,
    },
    /// Every unmarked adjacent pair is non-consecutive and not in 2:1 ratio.
    StrictKropki,
    /// Every unmarked adjacent pair sums to neither 5 nor 10.
    StrictXv,
    SudokuX,
    Windoku,
    DisjointSets,
    GlobalEntropy,
    AntiKnight,
    AntiKing,
    AntiConsecutive,
    AntiTaxicab,
    Jigsaw {
        regions: Vec<Vec<CellIndex>>,
    },
    NoBoxes,
    Priority {
        cells: Vec<CellIndex>,
        priority: u32,
    },
    False,
}

/// A full puzzle description: geometry, given values and extra constraints.
pub struct Constraint {
    pub shape: Shape,
    pub fixed_values: FixedValues,
    pub specs: Vec<ConstraintSpec>,
}

impl Constraint {
    pub fn new(shape: Shape) -> Constraint {
        Constraint {
            shape,
            fixed_values: FixedValues::new(),
            specs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_invariants() {
        let shape = Shape::square(9).unwrap();
        assert_eq!(shape.num_values, 9);
        assert_eq!(shape.num_cells, 81);
        assert_eq!((shape.box_height, shape.box_width), (3, 3));
        assert_eq!(shape.max_sum, 45);

        let shape = Shape::square(6).unwrap();
        assert_eq!((shape.box_height, shape.box_width), (2, 3));

        let shape = Shape::square(5).unwrap();
        assert_eq!((shape.box_height, shape.box_width), (1, 5));
        assert!(!shape.has_boxes());
    }

    #[test]
    fn shape_rejects_out_of_range() {
        assert!(Shape::square(0).is_err());
        assert!(Shape::square(17).is_err());
        assert!(Shape::square(16).is_ok());
    }

    #[test]
    fn cell_indexing_round_trips() {
        let shape = Shape::square(9).unwrap();
        assert_eq!(shape.make_cell_index(0, 0), 0);
        assert_eq!(shape.make_cell_index(4, 4), 40);
        assert_eq!(shape.cell_row_col(40), (4, 4));
        assert_eq!(shape.cell_id(40), "R5C5");
    }

    #[test]
    fn cell_value_display() {
        assert_eq!(CellValue::from_display_value(5).index(), 4);
        assert_eq!(CellValue::from_index(8).display_value(), 9);
        assert_eq!(CellValue::from_index(0).to_string(), "1");
    }
}
