mod finalizers;
mod lease;
mod util;

pub use finalizers::*;
pub use lease::*;
pub use util::*;

use crate::errors::*;

err_impl! {KubernetesError,
    #[error("object has no namespace: {0}")]
    MissingNamespace(String),

    #[error("could not build owner reference for {0} (no uid?)")]
    MissingOwnerRef(String),
}

pub trait KubeResourceExt {
    fn namespaced_name(&self) -> String;
    fn labels_match(&self, other: &Self) -> bool;
}

#[cfg(test)]
pub mod tests;
