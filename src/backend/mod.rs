//! Back-end lowering of IR types into target language type fragments.

pub mod fragments;
pub mod type_manager;

pub use self::fragments::{CodeFragment, FragmentId, FragmentManager, TargetCode};
pub use self::type_manager::{BackendError, TypeHandler, TypeInfo, TypeManager};
