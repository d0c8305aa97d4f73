/// Errors from utilization sampling.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("sampler I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse {source_name}: {reason}")]
    Parse {
        source_name: &'static str,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, StatsError>;
