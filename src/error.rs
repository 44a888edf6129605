use std::time::Duration;

/// Errors raised while evaluating a design or driving the optimizer
#[derive(thiserror::Error, Debug)]
pub enum WaterbombError {
    #[error("Input error: {0}")]
    Input(String),
    #[error("Solver error: {0}")]
    SolverInvocation(String),
    #[error("Solver error: no exit after {0:?}, process killed")]
    SolverTimeout(Duration),
    #[error("Report error: no new record appended to {0}")]
    StaleReport(String),
    #[error("Report error: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Optimizer error: evaluation budget of {0} exhausted")]
    BudgetExhausted(usize),
    #[error("Optimizer error: {0}")]
    Optimizer(String),
}

/// Reasons the snap-through scan does not yield an energy drop
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DetectError {
    #[error("invalid history curve: {0}")]
    InvalidCurve(String),
    #[error("no negative strain energy slope in history")]
    NoSnapThroughFound,
    #[error("snap-through starts at {start}/{len} of the history, too early")]
    TooEarly { start: usize, len: usize },
    #[error("degenerate history curve: {0}")]
    DegenerateCurve(String),
}
