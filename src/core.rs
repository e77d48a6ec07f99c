use std::any::Any;
use std::sync::Arc;

use crate::error::DeriveError;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = Arc<str>;

/// What a node hands out on `value()`: either the cached value or the marker
/// cached in its place.
pub type Derived<T> = Result<Arc<T>, DeriveError>;

/// The cached result of a node, type-erased.
pub(crate) type DynamicResult = Result<Dynamic, DeriveError>;
