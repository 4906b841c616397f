//! The exception taxonomy, trace frames, and the `RunResult`/`RunError`
//! types used throughout the interpreter for scripted-level errors.
//!
//! Every variant of [`ExcType`] corresponds to a pre-registered builtin
//! class (see [`crate::context::Context::new`]): raising `ValueError("bad")`
//! from native code and raising it from script-level `raise ValueError("bad")`
//! produce indistinguishable heap objects. `MemoryError` and `RecursionError`
//! are special-cased: the host context pre-allocates a single permanent
//! instance of each at startup so hitting either resource limit never has to
//! perform a heap allocation of its own (the allocation that failed in the
//! first place).

use std::fmt;

use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::sym;
use crate::source::CodeRange;
use crate::value::Value;

/// The builtin exception hierarchy, matching CPython's naming.
/// `parent()` walks toward `BaseException`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcType {
    BaseException,
    SystemExit,
    Exception,
    StopIteration,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    AttributeError,
    ImportError,
    LookupError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    OSError,
    IsADirectoryError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    SyntaxError,
    TypeError,
    ValueError,
}

impl ExcType {
    pub fn name(self) -> &'static str {
        match self {
            Self::BaseException => "BaseException",
            Self::SystemExit => "SystemExit",
            Self::Exception => "Exception",
            Self::StopIteration => "StopIteration",
            Self::ArithmeticError => "ArithmeticError",
            Self::OverflowError => "OverflowError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::AttributeError => "AttributeError",
            Self::ImportError => "ImportError",
            Self::LookupError => "LookupError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::MemoryError => "MemoryError",
            Self::NameError => "NameError",
            Self::OSError => "OSError",
            Self::IsADirectoryError => "IsADirectoryError",
            Self::RuntimeError => "RuntimeError",
            Self::NotImplementedError => "NotImplementedError",
            Self::RecursionError => "RecursionError",
            Self::SyntaxError => "SyntaxError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
        }
    }

    /// The exception this type directly derives from, or `None` for
    /// `BaseException` itself. Used both to build the class objects' base
    /// chains at startup and to answer `isinstance`/`except` matching.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::SystemExit | Self::Exception => Some(Self::BaseException),
            Self::StopIteration
            | Self::ArithmeticError
            | Self::AttributeError
            | Self::ImportError
            | Self::LookupError
            | Self::MemoryError
            | Self::NameError
            | Self::OSError
            | Self::RuntimeError
            | Self::SyntaxError
            | Self::TypeError
            | Self::ValueError => Some(Self::Exception),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::IsADirectoryError => Some(Self::OSError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
        }
    }

    /// Returns true if `self` is `other` or derives from it, transitively.
    pub fn is_a(self, other: Self) -> bool {
        let mut current = self;
        loop {
            if current == other {
                return true;
            }
            match current.parent() {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    pub const ALL: &'static [ExcType] = &[
        ExcType::BaseException,
        ExcType::SystemExit,
        ExcType::Exception,
        ExcType::StopIteration,
        ExcType::ArithmeticError,
        ExcType::OverflowError,
        ExcType::ZeroDivisionError,
        ExcType::AttributeError,
        ExcType::ImportError,
        ExcType::LookupError,
        ExcType::IndexError,
        ExcType::KeyError,
        ExcType::MemoryError,
        ExcType::NameError,
        ExcType::OSError,
        ExcType::IsADirectoryError,
        ExcType::RuntimeError,
        ExcType::NotImplementedError,
        ExcType::RecursionError,
        ExcType::SyntaxError,
        ExcType::TypeError,
        ExcType::ValueError,
    ];

    /// Allocates a fresh instance of this exception type carrying `message`
    /// as its `_message` attribute, and returns it wrapped as a [`RunError`]
    /// ready to propagate. Fails closed to `MemoryError` if the allocation
    /// itself cannot be satisfied.
    pub fn raise(self, heap: &mut Heap, message: impl Into<String>) -> RunError {
        match heap.new_exception(self, message.into()) {
            Ok(value) => RunError::raised(value),
            Err(_) => RunError::raised(heap.memory_error_singleton()),
        }
    }

    pub fn type_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::TypeError.raise(heap, message)
    }

    pub fn value_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::ValueError.raise(heap, message)
    }

    pub fn name_error(heap: &mut Heap, name: &str) -> RunError {
        Self::NameError.raise(heap, format!("name '{name}' is not defined"))
    }

    pub fn attribute_error(heap: &mut Heap, type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.raise(heap, format!("'{type_name}' object has no attribute '{attr}'"))
    }

    pub fn index_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::IndexError.raise(heap, message)
    }

    pub fn key_error(heap: &mut Heap, key_repr: impl Into<String>) -> RunError {
        Self::KeyError.raise(heap, key_repr)
    }

    pub fn zero_division_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::ZeroDivisionError.raise(heap, message)
    }

    pub fn overflow_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::OverflowError.raise(heap, message)
    }

    pub fn stop_iteration(heap: &mut Heap) -> RunError {
        Self::StopIteration.raise(heap, "")
    }

    pub fn not_implemented(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::NotImplementedError.raise(heap, message)
    }

    pub fn import_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::ImportError.raise(heap, message)
    }

    pub fn os_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::OSError.raise(heap, message)
    }

    pub fn runtime_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::RuntimeError.raise(heap, message)
    }

    pub fn syntax_error(heap: &mut Heap, message: impl Into<String>) -> RunError {
        Self::SyntaxError.raise(heap, message)
    }
}

impl fmt::Display for ExcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single entry in an exception's traceback: the function that was
/// executing and the source range active when the exception passed through
/// (or originated in) that frame.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function_name: String,
    pub position: CodeRange,
    /// 1-based source line, resolved against the frame's `Source` at the
    /// moment the frame is pushed (a bare `CodeRange` on its own can't be
    /// turned back into a line number once the exception has unwound past
    /// the code that held the `Source`).
    pub line: u32,
}

/// The interpreter's internal `Result` error type: a single owned strong
/// reference to the exception instance now propagating. The value is always
/// `Value::Ref` to a `HeapData::Exception` object (or, under the
/// `MemoryError`/`RecursionError` singletons, a shared permanent instance).
#[derive(Debug)]
pub struct RunError {
    pub value: Value,
}

pub type RunResult<T> = Result<T, RunError>;

impl RunError {
    pub fn raised(value: Value) -> Self {
        Self { value }
    }

    /// Returns the `ExcType` of the propagating exception, if it is a
    /// native exception instance (always true for exceptions raised through
    /// [`ExcType::raise`] or a script's `raise SomeBuiltin(...)`).
    pub fn exc_type(&self, heap: &Heap) -> Option<ExcType> {
        match self.value {
            Value::Ref(id) => match heap.get(id).map(|o| &o.data) {
                Some(HeapData::Exception { exc_type, .. }) => Some(*exc_type),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn matches(&self, heap: &Heap, target: ExcType) -> bool {
        self.exc_type(heap).is_some_and(|t| t.is_a(target))
    }

    pub fn push_frame(&self, heap: &mut Heap, frame: TraceFrame) {
        if let Value::Ref(id) = self.value {
            heap.push_trace_frame(id, frame);
        }
    }

    pub fn message(&self, heap: &Heap) -> String {
        if let Value::Ref(id) = self.value {
            if let Some(v) = heap.get_attr(id, sym::MESSAGE) {
                return v.py_str(heap);
            }
        }
        String::new()
    }

    pub fn drop_with_heap(self, heap: &mut Heap) {
        self.value.drop_with_heap(heap);
    }
}

/// Identifies which resource limit a heap allocation or call exceeded.
/// Converted into the matching pre-allocated exception singleton by the
/// executor rather than threaded as a distinct error type throughout the
/// codebase, since from the script's point of view these are just
/// `MemoryError`/`RecursionError` instances like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    AllocationLimitExceeded,
    RecursionLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_error_is_a_exception_and_base_exception() {
        assert!(ExcType::IndexError.is_a(ExcType::LookupError));
        assert!(ExcType::IndexError.is_a(ExcType::Exception));
        assert!(ExcType::IndexError.is_a(ExcType::BaseException));
        assert!(!ExcType::IndexError.is_a(ExcType::KeyError));
    }

    #[test]
    fn system_exit_does_not_derive_from_exception() {
        assert!(ExcType::SystemExit.is_a(ExcType::BaseException));
        assert!(!ExcType::SystemExit.is_a(ExcType::Exception));
    }
}
