pub mod builddaemon;
pub mod checkout;
pub mod config;
pub mod daemon;
pub mod error;
pub mod mtab;
pub mod platform;
pub mod process;
pub mod redirect;
pub mod scratch;

pub use error::{RedirectError, RedirectResult};
