//! # Inspire
//!
//! A front end translating imperative C-like programs (with OpenMP pragma
//! annotations) into a typed, purely functional intermediate representation,
//! plus the backend type manager lowering IR types back into target language
//! type fragments.
//!
//! The crate is organised along the compilation pipeline:
//!
//! ```text
//! Source AST ─► frontend ─► ir (NodeManager) ─► analysis ─► backend
//! ```
//!
//! - [`ir`] owns the hash-consed node store, the typed builder, annotations,
//!   visitors and the structural replacer.
//! - [`types`] implements substitution, unification, the subtyping lattice
//!   and return-type deduction on top of the node store.
//! - [`frontend`] lowers the source AST (a collaborator contract, consumed
//!   as data) into IR, resolving recursive functions and record types.
//! - [`analysis`] marks static control parts (SCoPs) with affine constraint
//!   annotations.
//! - [`backend`] lowers IR types into target type fragments for emission.

pub mod analysis;
pub mod backend;
pub mod frontend;
pub mod ir;
pub mod span;
pub mod types;
