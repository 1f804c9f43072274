#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

pub mod batch;
mod data;
pub mod db;
pub mod error;
mod fio;
mod index;
pub mod iterator;
mod merge;
pub mod options;
mod util;

pub use batch::WriteBatch;
pub use db::{Engine, Stat};
pub use error::{Error, Result};
pub use iterator::Iterator;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
