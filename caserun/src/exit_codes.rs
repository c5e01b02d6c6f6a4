#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more steps failed during the run.
    StepsFailed = 10,

    /// Invalid CLI flags or case document.
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, task failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
