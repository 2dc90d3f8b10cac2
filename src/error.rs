use thiserror::Error;

/// Recoverable errors from parsing, constraint compilation and NFA handling.
///
/// Unsatisfiable puzzles are never errors; the solver reports zero solutions
/// for those instead.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("invalid shape: {0}")]
    BadShape(String),

    #[error("invalid constraint: {0}")]
    BadConstraint(String),

    #[error("cell index {cell} out of range for {num_cells} cells")]
    CellOutOfRange { cell: usize, num_cells: usize },

    #[error("value {value} out of range 1..={num_values}")]
    ValueOutOfRange { value: u32, num_values: u32 },

    #[error("regex parse error at offset {offset}: {message}")]
    RegexParse { offset: usize, message: String },

    #[error("state machine exceeded the {0}-state limit")]
    StateLimitExceeded(usize),

    #[error("malformed serialized automaton: {0}")]
    BadSerialization(String),

    #[error("could not parse puzzle text: {0}")]
    BadPuzzleText(String),
}
