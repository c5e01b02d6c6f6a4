mod error;
mod eval;
mod functions;
mod vars;

pub use error::{Error, Result};
pub use eval::{display_string, eval_value};
pub use functions::{Function, FunctionRegistry, FunctionResult};
pub use vars::resolve_variables;

/// Variable mapping used throughout a test case run. Scopes merge with
/// config < session < step-local priority.
pub type VarMap = caserun_value::ObjectMap;
