//! Class records: the runtime representation of a `class` statement.
//!
//! A class is a heap object like any other: its own attribute table holds
//! its methods and class variables, and `HeapObject::parents` holds the
//! heap ids of its base classes, reusing the same parent-chain lookup every
//! other attribute access goes through. `ClassRecord` itself only needs to
//! carry the bits that aren't already expressible as attributes/parents.

use crate::exceptions::ExcType;
use crate::intern::Symbol;

#[derive(Debug)]
pub struct ClassRecord {
    pub name: Symbol,
    /// Set when this class derives (directly or transitively) from a
    /// built-in exception type, i.e. one of its bases was an `ExcCtor`
    /// builtin or another class with its own `exc_type` set. Instances of
    /// such a class are allocated as `HeapData::Exception` rather than
    /// `HeapData::Instance` (see `crate::executor::instantiate_class`), so
    /// `except Exception:` matches a user-defined subclass the same way it
    /// matches a plain `ValueError`.
    pub exc_type: Option<ExcType>,
}

impl ClassRecord {
    pub fn new(name: Symbol) -> Self {
        Self { name, exc_type: None }
    }

    pub fn with_exc_type(name: Symbol, exc_type: Option<ExcType>) -> Self {
        Self { name, exc_type }
    }
}
