pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Variables(#[from] crate::template::Error),

    #[error(transparent)]
    Parameters(#[from] crate::params::Error),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("invalid `executor` (expected `constant-vus` or `ramping-vus`)")]
    InvalidExecutor,

    #[error("`stages` must be a non-empty list of {{ duration, target }}")]
    InvalidStages,
}
