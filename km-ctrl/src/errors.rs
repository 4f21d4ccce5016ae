use std::ops::Deref;

use km_core::errors::*;

// anyhow::Error doesn't implement std::error::Error, but the reconcile functions have to return
// something that does; wrap it, and deref back to the anyhow::Error wherever we care.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AnyhowError(#[from] anyhow::Error);

impl Deref for AnyhowError {
    type Target = anyhow::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

err_impl! {KmakeControllerError,
    #[error("job template for {0} has no containers")]
    MissingContainer(String),

    #[error("child resource has not been recorded: {0}")]
    MissingChild(String),
}
