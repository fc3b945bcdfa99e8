//! Type operations on top of the node store: substitution, unification,
//! the subtyping lattice with join/meet, and return-type deduction.

pub mod deduction;
pub mod substitution;
pub mod subtype;
pub mod unify;

pub use self::deduction::deduce_return_type;
pub use self::substitution::Substitution;
pub use self::subtype::{is_sub_type, join, meet};
pub use self::unify::unify;
