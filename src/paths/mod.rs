//! Path utilities over document trees.
//!
//! A path is a dot-separated sequence of keys (`login.deviceName`). These
//! functions are pure; locking and delivery live in the subscription module.

mod operations;

pub use operations::{
    ancestors, covers, leaf_paths, merge, normalize, project, read, validate, write,
};
