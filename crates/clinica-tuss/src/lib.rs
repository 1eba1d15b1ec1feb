//! TUSS procedure table and table-backed guide validation.
//!
//! The core crate only checks guide structure. This crate adds the code
//! table lookups that decide whether a procedure line is billable:
//!
//! ```text
//! tuss.json ──► TussTable ──► TussGuideValidator ──► ValidationReport
//!                  │                  │
//!               search()      StructuralValidator (clinica-core)
//! ```

pub mod table;
pub mod validator;

pub use table::*;
pub use validator::*;
