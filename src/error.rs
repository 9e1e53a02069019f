//! Pipeline error type

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Render target '{label}' is incomplete: {reason}")]
    IncompleteRenderTarget { label: String, reason: String },
}

pub type RenderResult<T> = Result<T, RenderError>;
