pub mod assert;
pub mod backend;
pub mod cdp;
pub mod engine;
pub mod error;
pub mod harness;
pub mod i18n;
pub mod registry;
pub mod report;
pub mod results;
pub mod sandbox;
pub mod spec;
pub mod trx;
pub mod types;

// Re-export the localization functions
pub use crate::i18n::{t, t_with_args};
