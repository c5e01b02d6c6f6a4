pub mod case;
pub mod params;
pub mod runner;
pub mod template;

pub use case::{
    ActionError, ActionStep, CaseConfig, DebugStep, RendezvousSpec, Step, StepContext, StepKind,
    TestCase,
};
pub use caserun_value::{ObjectMap, Value};
pub use template::{FunctionRegistry, VarMap};
