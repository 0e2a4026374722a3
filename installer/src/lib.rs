pub mod install;
pub mod mbr;

pub use install::{InstallError, Installation, install};
