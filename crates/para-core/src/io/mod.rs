//! IO modules - side effects (network, filesystem)

pub mod artifacts;
pub mod github;
pub mod hashing;
