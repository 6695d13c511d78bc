pub mod client;
pub mod dump;

pub use client::{DirectoryClient, DirectoryError};
pub use dump::{DumpError, retrieve_xz_json};
