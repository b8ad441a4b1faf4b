//! The PHASE Evaluator: sandboxed synthetic-workload execution and the
//! DORMANT -> PROBATION batch lifecycle ("the
//! hardest subsystem").

pub mod driver;
pub mod error;
pub mod evaluator;

pub use driver::{DriverRun, WorkloadDriver};
pub use error::{PhaseError, Result};
pub use evaluator::{BatchReport, PhaseEvaluator, PhaseWindow};
