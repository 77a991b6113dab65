//! Domain models for the pantry-ledger system.

mod correction;
mod product;
mod receipt;
mod resolution;

pub use correction::*;
pub use product::*;
pub use receipt::*;
pub use resolution::*;
