//! The per-interpreter root ([`Context`]) and the host-visible embedding
//! surface described by spec §6: create/destroy a context, register native
//! functions/classes/module loaders, compile and run source text, inspect
//! and construct values, and drive the exception/GC/pin-unpin primitives.

use std::rc::Rc;
use std::sync::{Mutex, OnceLock};

use ahash::AHashMap;

use crate::class::ClassRecord;
use crate::compiler::compile_function;
use crate::exceptions::{ExcType, RunError, RunResult, TraceFrame};
use crate::executor;
use crate::function::{FunctionRecord, Signature};
use crate::heap::{Heap, HeapData, HeapId, HeapLimits};
use crate::intern::{sym, Symbol};
use crate::io::{PrintWriter, StdPrint};
use crate::modules;
use crate::parser::ast::Stmt;
use crate::parser::parse_module;
use crate::source::Source;
use crate::types::bytes::Bytes;
use crate::types::dict::Dict;
use crate::types::list::List;
use crate::types::set::Set;
use crate::value::Value;

/// Frozen interpreter configuration (spec §6). All fields optional with the
/// defaults listed there.
#[derive(Clone)]
pub struct Config {
    pub enable_os_access: bool,
    pub max_alloc: usize,
    pub max_recursion: usize,
    pub gc_run_factor: f64,
    pub import_path: String,
    pub argv: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_os_access: false,
            max_alloc: 1_000_000,
            max_recursion: 50,
            gc_run_factor: 2.0,
            import_path: ".".to_owned(),
            argv: vec![String::new()],
        }
    }
}

/// A host-registered native callable. Receives the already-bound argument
/// vector (positional args only; `self` is prepended by the caller for a
/// bound method the same way a compiled method's `self` is) and an optional
/// keyword-argument dict value.
pub type NativeFn = Rc<dyn Fn(&mut Context, &[Value], Option<Value>) -> RunResult<Value>>;

/// A native module loader: populates `module`'s attribute table with the
/// module's exported names.
pub type NativeLoader = fn(&mut Context, HeapId) -> RunResult<()>;

/// A compiled, callable unit of source text, as returned by
/// [`Context::compile_source`]/[`Context::compile_expr`].
pub struct Compiled {
    pub(crate) value: Value,
}

/// Programmer-error callback: fired for embedder misuse (a `HeapId` from a
/// different context, an invalid identifier string, …), matching spec §5's
/// "error-callback thread" and §7.2. Process-wide and atomically
/// swappable; the default implementation panics.
type ErrorCallback = fn(&str);

fn default_error_callback(message: &str) {
    panic!("pyra: programmer error: {message}");
}

static ERROR_CALLBACK: OnceLock<Mutex<ErrorCallback>> = OnceLock::new();

fn error_callback_slot() -> &'static Mutex<ErrorCallback> {
    ERROR_CALLBACK.get_or_init(|| Mutex::new(default_error_callback))
}

/// Installs a new process-wide programmer-error callback, returning the
/// previous one. Matches spec §5/§7.2: this is global state, not
/// per-context, since it exists to catch embedder bugs that may occur
/// before or across any particular context's lifetime.
pub fn set_error_callback(callback: ErrorCallback) -> ErrorCallback {
    let slot = error_callback_slot();
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::replace(&mut *guard, callback)
}

pub(crate) fn programmer_error(message: &str) -> ! {
    let slot = error_callback_slot();
    let cb = *slot.lock().unwrap_or_else(|e| e.into_inner());
    cb(message);
    unreachable!("the default and any well-behaved error callback does not return")
}

/// The per-interpreter root described by data-model §3. Owns the heap, the
/// loaded-module cache, the native-function/loader registries, the current
/// exception slot, and the frozen resource configuration.
pub struct Context {
    pub(crate) heap: Heap,
    pub(crate) config: Config,
    pub(crate) print: Box<dyn PrintWriter>,
    /// Loaded modules, by interned name. Each value owns a strong reference
    /// to its `HeapData::Module` object.
    pub(crate) modules: AHashMap<Symbol, HeapId>,
    /// Currently-importing stack, for circular-import detection (spec §4.7).
    pub(crate) importing: Vec<Symbol>,
    pub(crate) native_loaders: AHashMap<Symbol, NativeLoader>,
    pub(crate) native_functions: Vec<NativeFn>,
    pub(crate) current_exception: Option<Value>,
    pub(crate) call_depth: usize,
    pub(crate) rng: rand::rngs::StdRng,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self::with_print(config, Box::new(StdPrint))
    }

    pub fn with_print(config: Config, print: Box<dyn PrintWriter>) -> Self {
        use rand::SeedableRng;
        let limits = HeapLimits {
            max_alloc: config.max_alloc,
            gc_run_factor: config.gc_run_factor,
        };
        let mut heap = Heap::new(limits);
        heap.init_singletons();
        let mut ctx = Self {
            heap,
            config,
            print,
            modules: AHashMap::default(),
            importing: Vec::new(),
            native_loaders: AHashMap::default(),
            native_functions: Vec::new(),
            current_exception: None,
            call_depth: 0,
            rng: rand::rngs::StdRng::from_os_rng(),
        };
        modules::loader::install_builtins(&mut ctx);
        modules::loader::register_native_modules(&mut ctx);
        ctx
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn print_line(&mut self, text: &str) {
        self.print.write_line(text);
    }

    // -- primitive value construction --

    pub fn new_str(&mut self, s: impl Into<String>) -> RunResult<Value> {
        self.alloc(HeapData::Str(s.into()))
    }

    pub fn new_bytes(&mut self, b: Vec<u8>) -> RunResult<Value> {
        self.alloc(HeapData::Bytes(Bytes::new(b)))
    }

    pub fn new_tuple(&mut self, items: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::Tuple(items))
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::List(List::new(items)))
    }

    pub fn new_dict(&mut self) -> RunResult<Value> {
        self.alloc(HeapData::Dict(Dict::new()))
    }

    pub fn new_set(&mut self) -> RunResult<Value> {
        self.alloc(HeapData::Set(Set::new()))
    }

    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<Value> {
        match self.heap.allocate(data) {
            Ok(id) => Ok(Value::Ref(id)),
            Err(_) => Err(RunError::raised(self.heap.memory_error_singleton())),
        }
    }

    // -- module globals / registration --

    /// Returns the module object (its attribute table *is* its globals) for
    /// an already-loaded module name.
    pub fn module_globals(&self, name: &str) -> Option<HeapId> {
        let sym = self.heap.resolve_or_none(name)?;
        self.modules.get(&sym).copied()
    }

    pub fn set_module_global(&mut self, module: HeapId, name: &str, value: Value) {
        let sym = self.heap.intern(name);
        self.heap.set_attr_owned(module, sym, value);
    }

    /// Registers a free function under `__builtins__` (and therefore every
    /// module auto-importing it) plus the current `__main__` module's
    /// globals, so host-registered natives are visible the same way a
    /// builtin free function is.
    pub fn register_native_function(&mut self, name: &str, f: NativeFn) -> RunResult<()> {
        let idx = self.push_native_function(f);
        let builtin = self.alloc(HeapData::Builtin(crate::builtins::BuiltinId::Native(idx)))?;
        let sym = self.heap.intern(name);
        if let Some(&builtins_mod) = self.modules.get(&self.heap.intern(modules::loader::BUILTINS_MODULE)) {
            self.heap.set_attr_owned(builtins_mod, sym, builtin);
        }
        Ok(())
    }

    /// Appends `f` to the native-function table and returns its index, for
    /// callers (like the `os` native module) that need a `BuiltinId::Native`
    /// attached somewhere other than `__builtins__`.
    pub(crate) fn push_native_function(&mut self, f: NativeFn) -> u32 {
        let idx = self.native_functions.len() as u32;
        self.native_functions.push(f);
        idx
    }

    /// Registers a new host-defined class with the given base classes and
    /// bound methods. `bases` must be heap ids of existing class objects
    /// (possibly empty). Methods are stored as `NativeMethod`s, promoted to
    /// bound methods on attribute access exactly like a script-defined
    /// method.
    pub fn register_class(
        &mut self,
        name: &str,
        bases: Vec<HeapId>,
        methods: Vec<(&str, NativeFn)>,
    ) -> RunResult<HeapId> {
        let name_sym = self.heap.intern(name);
        let class_id = match self.heap.allocate_with_attrs(HeapData::Class(ClassRecord::new(name_sym)), bases) {
            Ok(id) => id,
            Err(_) => return Err(RunError::raised(self.heap.memory_error_singleton())),
        };
        for (method_name, f) in methods {
            let idx = self.native_functions.len() as u32;
            self.native_functions.push(f);
            let builtin = self.alloc(HeapData::Builtin(crate::builtins::BuiltinId::NativeMethod(idx)))?;
            let sym = self.heap.intern(method_name);
            self.heap.set_attr_owned(class_id, sym, builtin);
        }
        Ok(class_id)
    }

    pub fn register_module_loader(&mut self, name: &str, loader: NativeLoader) {
        let sym = self.heap.intern(name);
        self.native_loaders.insert(sym, loader);
    }

    pub fn import_module(&mut self, name: &str) -> RunResult<Value> {
        let sym = self.heap.intern(name);
        let id = modules::loader::import(self, sym)?;
        Ok(Value::Ref(id))
    }

    // -- compile / run --

    /// Compiles `text` (displayed in tracebacks as `name`) as a sequence of
    /// statements and runs it as the `__main__` module, returning the
    /// value of its last bare expression statement (or `None`).
    pub fn run_source(&mut self, name: &str, text: &str) -> RunResult<Value> {
        let main_sym = self.heap.intern("__main__");
        let main_mod = self.ensure_module(main_sym);
        let builtins_sym = self.heap.intern(modules::loader::BUILTINS_MODULE);
        modules::loader::copy_all_into(self, builtins_sym, main_sym);
        self.run_in_module(name, text, main_mod, main_sym)
    }

    pub(crate) fn ensure_module(&mut self, name: Symbol) -> HeapId {
        if let Some(&id) = self.modules.get(&name) {
            return id;
        }
        let id = self
            .heap
            .allocate(HeapData::Module(modules::ModuleRecord::new(name)))
            .unwrap_or_else(|_| programmer_error("failed to allocate module object"));
        self.modules.insert(name, id);
        id
    }

    pub(crate) fn run_in_module(
        &mut self,
        display_name: &str,
        text: &str,
        module: HeapId,
        module_name: Symbol,
    ) -> RunResult<Value> {
        let source = Source::new(display_name, text);
        let def = parse_module(text, &mut self.heap).map_err(|e| {
            let run_err = ExcType::syntax_error(&mut self.heap, e.message.clone());
            run_err.push_frame(
                &mut self.heap,
                TraceFrame {
                    function_name: "<module>".to_owned(),
                    position: e.range,
                    line: source.line_col(e.range.start).0,
                },
            );
            run_err
        })?;
        // A script's final bare expression statement is its result (matching
        // an interactive REPL, not a plain function body, which would always
        // return None) -- rewrite it to an explicit `return` before lowering
        // rather than teaching the compiler two different endings for the
        // same statement shape.
        let mut def = (*def).clone();
        if matches!(def.body.last(), Some(Stmt::Expr(_))) {
            if let Some(Stmt::Expr(e)) = def.body.pop() {
                let range = e.range();
                def.body.push(Stmt::Return { value: Some(e), range });
            }
        }
        let code = compile_function(&def, &mut self.heap);
        executor::run_module_code(self, code, module, module_name, source)
    }

    /// Compiles `text` without running it, returning a zero-argument
    /// callable value bound to `__main__`'s globals.
    pub fn compile_source(&mut self, name: &str, text: &str) -> RunResult<Compiled> {
        self.compile_as(name, text, false)
    }

    /// Compiles `text` as a single expression (`eval`-style) without
    /// running it.
    pub fn compile_expr(&mut self, name: &str, text: &str) -> RunResult<Compiled> {
        self.compile_as(name, text, true)
    }

    fn compile_as(&mut self, name: &str, text: &str, as_expr: bool) -> RunResult<Compiled> {
        let wrapped;
        let text = if as_expr {
            wrapped = format!("return ({text})");
            &wrapped
        } else {
            text
        };
        let def = parse_module(text, &mut self.heap)
            .map_err(|e| ExcType::syntax_error(&mut self.heap, e.message))?;
        let code = compile_function(&def, &mut self.heap);
        let main_sym = self.heap.intern("__main__");
        let main_mod = self.ensure_module(main_sym);
        let func = FunctionRecord {
            name: self.heap.intern(name),
            signature: Signature::default(),
            code,
            defaults: Vec::new(),
            closure: Vec::new(),
            is_method: false,
            module: main_mod,
        };
        let value = self.alloc(HeapData::Function(func))?;
        Ok(Compiled { value })
    }

    pub fn run_compiled(&mut self, compiled: &Compiled) -> RunResult<Value> {
        executor::call_value(self, compiled.value, &[], None)
    }

    // -- calling / attributes / iteration --

    pub fn call(&mut self, callable: Value, args: &[Value], kwargs: Option<Value>) -> RunResult<Value> {
        executor::call_value(self, callable, args, kwargs)
    }

    pub fn get_attr(&mut self, owner: Value, name: &str) -> RunResult<Value> {
        let sym = self.heap.intern(name);
        executor::get_attribute(self, owner, sym)
    }

    pub fn set_attr(&mut self, owner: Value, name: &str, value: Value) -> RunResult<()> {
        let sym = self.heap.intern(name);
        executor::set_attribute(self, owner, sym, value)
    }

    pub fn iterate(&mut self, value: Value) -> RunResult<Vec<Value>> {
        executor::iterate_to_vec(self, value)
    }

    pub fn unpack_exact(&mut self, value: Value, n: usize) -> RunResult<Vec<Value>> {
        executor::unpack_exact(self, value, n)
    }

    // -- exception plumbing --

    pub fn current_exception(&self) -> Option<Value> {
        self.current_exception
    }

    pub fn raise_value(&mut self, value: Value) {
        if let Some(old) = self.current_exception.replace(value.clone_with_heap(&mut self.heap)) {
            old.drop_with_heap(&mut self.heap);
        }
    }

    pub fn clear_exception(&mut self) {
        if let Some(old) = self.current_exception.take() {
            old.drop_with_heap(&mut self.heap);
        }
    }

    /// Renders the currently captured exception's traceback as text, or
    /// `None` if nothing is set. Walks the trace frames captured at raise
    /// time (spec §7.1's "human-readable trace via a formatter").
    pub fn format_traceback(&self) -> Option<String> {
        let value = self.current_exception?;
        let Value::Ref(id) = value else { return None };
        let obj = self.heap.get(id)?;
        let HeapData::Exception { trace, exc_type } = &obj.data else {
            return None;
        };
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in trace {
            out.push_str(&format!("  line {}, in {}\n", frame.line, frame.function_name));
        }
        let msg = obj.attrs.get(sym::MESSAGE).map(|v| v.py_str(&self.heap)).unwrap_or_default();
        if msg.is_empty() {
            out.push_str(&format!("{exc_type}\n"));
        } else {
            out.push_str(&format!("{exc_type}: {msg}\n"));
        }
        Some(out)
    }

    // -- GC / refcount pin --

    pub fn collect_garbage(&mut self) {
        let roots: Vec<Value> = self.current_exception.into_iter().collect();
        self.heap.collect_garbage(&roots);
    }

    pub fn pin(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.heap.inc_ref(id);
        }
    }

    pub fn unpin(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.heap.dec_ref(id);
        }
    }
}

impl Drop for Context {
    /// Final GC per spec §3's "contexts die ... forces one final GC with
    /// all roots cleared, running all finalizers": drop every module's
    /// strong reference and the current exception, then sweep everything.
    fn drop(&mut self) {
        self.current_exception.take().map(|v| v.drop_with_heap(&mut self.heap));
        let module_ids: Vec<HeapId> = self.modules.values().copied().collect();
        self.modules.clear();
        for id in module_ids {
            self.heap.dec_ref(id);
        }
        self.heap.collect_garbage(&[]);
    }
}
