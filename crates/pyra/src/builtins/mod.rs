//! Native callables: the fixed set of builtin free functions, exception
//! type constructors, and stdlib-module functions, plus the bound forms
//! [`crate::executor::get_attribute`] synthesizes for builtin container and
//! primitive types so `"abc".upper()`/`[1].append(2)`-style calls dispatch
//! through the same attribute-access-then-call path a user method would.
//!
//! A `HeapData::Builtin` value never owns script-visible state beyond what
//! its variant carries directly (a receiver value, a native index); the
//! actual behavior lives in `crate::executor::call_builtin`.

use strum::{Display, EnumString};

use crate::exceptions::ExcType;
use crate::heap::HeapId;
use crate::intern::Symbol;
use crate::value::Value;

/// Every builtin free function named in the external interface, minus the
/// handful promoted to their own `BinOp`/`UnaryOp` dispatch (`len`, `hash`,
/// ... still appear here too, since scripts can also call them directly as
/// `len(x)` rather than only through the operator table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Func {
    Abs,
    All,
    Any,
    Bin,
    Bool,
    Bytes,
    Callable,
    Chr,
    Compile,
    Dict,
    Divmod,
    Enumerate,
    Eval,
    Exec,
    Exit,
    Filter,
    Float,
    Frozenset,
    GetAttr,
    Globals,
    HasAttr,
    Hash,
    Hex,
    Id,
    Input,
    Int,
    Isinstance,
    Issubclass,
    Iter,
    Len,
    List,
    Map,
    Max,
    Min,
    Next,
    Oct,
    Open,
    Ord,
    Pow,
    Print,
    Quit,
    Range,
    Repr,
    Reversed,
    Round,
    Set,
    SetAttr,
    Slice,
    Sorted,
    Str,
    Sum,
    Super,
    Tuple,
    Type,
    Vars,
    Zip,
}

impl Func {
    pub const ALL: &'static [Func] = &[
        Func::Abs,
        Func::All,
        Func::Any,
        Func::Bin,
        Func::Bool,
        Func::Bytes,
        Func::Callable,
        Func::Chr,
        Func::Compile,
        Func::Dict,
        Func::Divmod,
        Func::Enumerate,
        Func::Eval,
        Func::Exec,
        Func::Exit,
        Func::Filter,
        Func::Float,
        Func::Frozenset,
        Func::GetAttr,
        Func::Globals,
        Func::HasAttr,
        Func::Hash,
        Func::Hex,
        Func::Id,
        Func::Input,
        Func::Int,
        Func::Isinstance,
        Func::Issubclass,
        Func::Iter,
        Func::Len,
        Func::List,
        Func::Map,
        Func::Max,
        Func::Min,
        Func::Next,
        Func::Oct,
        Func::Open,
        Func::Ord,
        Func::Pow,
        Func::Print,
        Func::Quit,
        Func::Range,
        Func::Repr,
        Func::Reversed,
        Func::Round,
        Func::Set,
        Func::SetAttr,
        Func::Slice,
        Func::Sorted,
        Func::Str,
        Func::Sum,
        Func::Super,
        Func::Tuple,
        Func::Type,
        Func::Vars,
        Func::Zip,
    ];
}

/// Native functions exposed by the stdlib module stubs (`math`, `random`,
/// `time`, `sys`, `dis`). Behavior beyond "callable, returns a value" is not
/// otherwise constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ModuleFn {
    MathSqrt,
    MathFloor,
    MathCeil,
    MathPow,
    MathLog,
    MathSin,
    MathCos,
    MathTan,
    RandomRandom,
    RandomRandint,
    RandomChoice,
    RandomShuffle,
    RandomSeed,
    RandomUniform,
    TimeTime,
    TimeSleep,
    SysExit,
    DisDis,
}

/// Everything a `HeapData::Builtin` heap object can hold.
#[derive(Debug, Clone)]
pub enum BuiltinId {
    /// One of the free functions in [`Func`].
    Func(Func),
    /// A builtin exception type, callable to construct (not raise) an
    /// instance -- `raise ValueError("x")` first calls this, then raises
    /// the resulting value.
    ExcCtor(ExcType),
    /// A host-registered free function: an index into
    /// `crate::context::Context::native_functions`.
    Native(u32),
    /// A host-registered class method, not yet bound to a receiver.
    /// `crate::executor::get_attribute` promotes this to `BoundNativeMethod`
    /// the same way an unbound `HeapData::Function` gets promoted to a
    /// `BoundMethod`.
    NativeMethod(u32),
    BoundNativeMethod { receiver: Value, native: u32 },
    /// A native stdlib module function.
    Module(ModuleFn),
    /// A method or dunder synthesized for a builtin container/primitive
    /// value -- e.g. `"abc".upper`, `[1, 2].append`, the `__iter__` a
    /// `range` answers with. `method` names which one; the actual logic
    /// lives in `crate::executor::call_builtin`, keyed on the receiver's
    /// runtime type and this name, never on a match at the attribute-access
    /// site itself.
    BoundBuiltinMethod { receiver: Value, method: Symbol },
    /// The object `super(cls, obj)` returns: attribute access against it
    /// skips `obj`'s own class and searches only the parent chain starting
    /// from `from_class`'s bases, implementing the "from-base" lookup
    /// spec §4.4 describes for super-style calls (end-to-end scenario 4).
    SuperProxy { instance: Value, from_class: HeapId },
}

impl BuiltinId {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ExcCtor(_) => "type",
            Self::Module(_) => "module",
            Self::SuperProxy { .. } => "super",
            _ => "builtin_function_or_method",
        }
    }

    pub fn repr(&self) -> String {
        match self {
            Self::Func(f) => format!("<built-in function {f}>"),
            Self::ExcCtor(e) => format!("<class '{e}'>"),
            Self::Native(_) | Self::NativeMethod(_) => "<built-in function>".to_owned(),
            Self::BoundNativeMethod { .. } => "<bound method>".to_owned(),
            Self::Module(m) => format!("<built-in function {m}>"),
            Self::BoundBuiltinMethod { .. } => "<built-in method>".to_owned(),
            Self::SuperProxy { .. } => "<super>".to_owned(),
        }
    }

    /// Heap refs held directly by this value, for the tracing collector and
    /// the refcount teardown worklist (mirrors every other `HeapData`
    /// variant's `collect_ref_children`). Only the bound/proxy forms carry
    /// any: a plain `Func`/`ExcCtor`/`Native`/`Module` reference is a fixed
    /// process-wide constant with nothing heap-owned beyond itself.
    pub fn collect_ref_children(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::BoundNativeMethod { receiver, .. } | Self::BoundBuiltinMethod { receiver, .. } => {
                if let Value::Ref(id) = receiver {
                    out.push(*id);
                }
            }
            Self::SuperProxy { instance, from_class } => {
                if let Value::Ref(id) = instance {
                    out.push(*id);
                }
                out.push(*from_class);
            }
            Self::Func(_) | Self::ExcCtor(_) | Self::Native(_) | Self::NativeMethod(_) | Self::Module(_) => {}
        }
    }
}

/// Python's banker's rounding (round half to even), shared by the `round()`
/// builtin for both the no-`ndigits` and scaled-`ndigits` cases.
pub fn bankers_round(value: f64) -> f64 {
    let floor = value.floor();
    let frac = value - floor;
    if frac < 0.5 {
        floor
    } else if frac > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}
