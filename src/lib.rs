//! A username index kept as a positionally encoded binary search tree in one
//! comma-separated file, plus the account store built on top of it.

pub mod accounts;
pub mod codec;
pub mod error;
pub mod fs;
pub mod index;
pub mod options;
pub mod tree;

pub use accounts::{AccountStore, Login, Role};
pub use error::{Error, Result};
pub use fs::{IndexDir, MockDir, OsDir};
pub use index::{insert, search, IndexReport, NameIndex};
pub use options::{IndexOptions, RebalanceScope, WriteMode};
pub use tree::SlotTree;
