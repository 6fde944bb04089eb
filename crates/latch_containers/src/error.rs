use thiserror::Error;

/// An allocator could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocator refused {size} bytes aligned to {align}")]
pub struct AllocError {
    pub size: usize,
    pub align: usize,
}

/// Errors surfaced by container operations that can fail at runtime.
///
/// Misuse (bad indices, bad ranges) panics instead; these variants cover the
/// conditions an embedding application can actually hit.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    AllocFailed(#[from] AllocError),

    #[error("capacity overflow: {requested} elements of {elem_size} bytes do not fit in memory")]
    CapacityOverflow { requested: usize, elem_size: usize },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] serde_json::Error),
}

impl ContainerError {
    /// True when the allocator refused the request.
    pub fn is_alloc_failure(&self) -> bool {
        matches!(self, Self::AllocFailed(_))
    }
}
