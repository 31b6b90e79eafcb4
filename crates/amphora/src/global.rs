use std::{
    io,
    rc::Rc,
    time::{Instant, SystemTime},
};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    array::{Array, Key},
    builtins,
    class::Class,
    compiler,
    context::Ctx,
    error::{Fatal, FatalKind, Flow, RequestError, ScriptError},
    exec,
    extension::{self, Ext},
    function::Callable,
    ini::IniStore,
    lexer,
    location::Loc,
    node::{ClassDeclStmt, FuncDeclStmt, Script},
    output::{OutputChain, OutputWriter},
    request::{self, Request},
    resource::{CancelToken, ResourceLimits, ResourceMeter},
    stream::{FileHandler, PhpStreamHandler, StreamHandler, split_scheme},
    value::{Cell, Str, Value},
};

/// Why a script could not be loaded and compiled.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Script(ScriptError),
}

/// Per-request interpreter root.
///
/// One Global runs one script from start to end on one thread. All mutable
/// interpreter state lives here: registered functions and classes (eager and
/// lazy), constants, superglobals, the output chain, the deadline and memory
/// meter, and the included-file set. The only process-wide state is the
/// extension registry, which is frozen when the first Global is built and
/// copied into each new one.
pub struct Global {
    start: Instant,
    start_system: SystemTime,
    meter: ResourceMeter,
    current_loc: Loc,
    request: Option<Request>,

    functions: AHashMap<Rc<str>, Callable>,
    classes: AHashMap<Rc<str>, Rc<Class>>,
    lazy_functions: AHashMap<Rc<str>, Rc<FuncDeclStmt>>,
    lazy_classes: AHashMap<Rc<str>, Rc<ClassDeclStmt>>,
    constants: AHashMap<Rc<str>, Value>,
    included: AHashSet<String>,
    stream_handlers: AHashMap<String, Box<dyn StreamHandler>>,

    environ: Array,
    superglobals: IndexMap<Rc<str>, Cell, ahash::RandomState>,
    globals: IndexMap<Rc<str>, Cell, ahash::RandomState>,

    output: OutputChain,
    ini: IniStore,
    pub(crate) call_depth: usize,
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Global")
            .field("functions", &self.functions.len())
            .field("classes", &self.classes.len())
            .field("constants", &self.constants.len())
            .finish_non_exhaustive()
    }
}

impl Global {
    /// Builds a request context with the stock resource limits.
    #[must_use]
    pub fn new(output: Box<dyn OutputWriter>) -> Self {
        Self::with_limits(output, ResourceLimits::default())
    }

    /// Builds a request context with explicit resource limits.
    #[must_use]
    pub fn with_limits(output: Box<dyn OutputWriter>, limits: ResourceLimits) -> Self {
        builtins::ensure_registered();

        let mut environ = Array::new();
        for (key, value) in std::env::vars() {
            environ.set(
                Key::from_str_key(Rc::new(Str::from(key))),
                Value::string(value),
            );
        }

        let mut global = Self {
            start: Instant::now(),
            start_system: SystemTime::now(),
            meter: ResourceMeter::new(limits),
            current_loc: Loc::unknown(),
            request: None,
            functions: AHashMap::new(),
            classes: AHashMap::new(),
            lazy_functions: AHashMap::new(),
            lazy_classes: AHashMap::new(),
            constants: AHashMap::new(),
            included: AHashSet::new(),
            stream_handlers: AHashMap::new(),
            environ,
            superglobals: IndexMap::default(),
            globals: IndexMap::default(),
            output: OutputChain::new(output),
            ini: IniStore::new(),
            call_depth: 0,
        };

        global
            .stream_handlers
            .insert("file".to_owned(), Box::new(FileHandler::new("/")));
        global
            .stream_handlers
            .insert("php".to_owned(), Box::new(PhpStreamHandler));

        // copy the frozen extension catalog into this request's own maps
        extension::freeze_and_visit(|ext| global.merge_ext(ext));
        global.wire_ext_parents();

        request::populate_superglobals(&mut global);
        global
    }

    /// Resolves parent links between extension-supplied classes, which
    /// register as plain records with only a parent name.
    fn wire_ext_parents(&mut self) {
        let classes: Vec<Rc<Class>> = self.classes.values().cloned().collect();
        for class in classes {
            if class.parent.borrow().is_some() {
                continue;
            }
            if let Some(parent_name) = &class.parent_name
                && let Some(parent) = self.classes.get(parent_name.to_ascii_lowercase().as_str())
            {
                *class.parent.borrow_mut() = Some(parent.clone());
            }
        }
    }

    fn merge_ext(&mut self, ext: &Ext) {
        for (name, func) in &ext.functions {
            self.functions
                .insert(Rc::from(name.to_ascii_lowercase()), Callable::Native(*func));
        }
        for builder in &ext.classes {
            let class = Rc::new(builder());
            self.classes
                .insert(Rc::from(class.name.to_ascii_lowercase()), class);
        }
        for (name, value) in &ext.constants {
            self.constants.insert(Rc::from(*name), value.to_value());
        }
    }

    // --- time, memory, cancellation -------------------------------------

    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start
    }

    #[must_use]
    pub fn start_system_time(&self) -> SystemTime {
        self.start_system
    }

    #[must_use]
    pub fn current_loc(&self) -> &Loc {
        &self.current_loc
    }

    /// Moves the wall-clock deadline.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.meter.set_deadline(deadline);
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.meter.cancel_token()
    }

    /// Statement-boundary poll. Updates the active location, then fails
    /// fatally once the deadline has passed or cancellation fired.
    pub fn tick(&mut self, loc: &Loc) -> Result<(), Fatal> {
        self.current_loc = loc.clone();
        self.meter
            .check_time()
            .map_err(|e| e.into_fatal(loc.clone()))
    }

    /// Debits the request memory meter.
    pub fn mem_alloc(&mut self, size: usize) -> Result<(), Fatal> {
        let loc = self.current_loc.clone();
        self.meter.alloc(size).map_err(|e| e.into_fatal(loc))
    }

    pub(crate) fn meter(&self) -> &ResourceMeter {
        &self.meter
    }

    // --- output ----------------------------------------------------------

    /// Writes to the top of the output chain.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Fatal> {
        let loc = self.current_loc.clone();
        self.output
            .write(bytes)
            .map_err(|e| Fatal::new(FatalKind::Output, format!("output error: {e}"), loc))
    }

    /// Pushes a fresh output buffer (`ob_start`).
    pub fn append_buffer(&mut self) {
        self.output.append_buffer();
    }

    pub fn output_chain(&mut self) -> &mut OutputChain {
        &mut self.output
    }

    // --- configuration ---------------------------------------------------

    /// Reads an ini setting, falling back to the given default.
    #[must_use]
    pub fn get_config<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.ini.get_or(name, default)
    }

    /// Request-local ini override, returning the previous value.
    pub fn set_local_config(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.ini.set_local(name, value)
    }

    // --- request & superglobals -----------------------------------------

    /// Attaches the HTTP request this Global serves and repopulates the
    /// superglobal tables from it.
    pub fn set_request(&mut self, request: Request) {
        self.request = Some(request);
        request::populate_superglobals(self);
    }

    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    #[must_use]
    pub fn environ(&self) -> &Array {
        &self.environ
    }

    /// Cell of a superglobal, visible from every scope.
    #[must_use]
    pub fn superglobal(&self, name: &str) -> Option<Cell> {
        self.superglobals.get(name).cloned()
    }

    pub(crate) fn set_superglobal(&mut self, name: &str, value: Value) {
        match self.superglobals.get(name) {
            Some(cell) => cell.set(value),
            None => {
                self.superglobals.insert(Rc::from(name), Cell::new(value));
            }
        }
    }

    /// Cell of a top-level script variable.
    #[must_use]
    pub fn global_var(&self, name: &str) -> Option<Cell> {
        self.globals.get(name).cloned()
    }

    /// Cell of a top-level variable, created null on first use; the cell
    /// handed out is the one `global $x` binds to inside functions.
    pub fn global_var_or_create(&mut self, name: &str) -> Cell {
        if let Some(cell) = self.globals.get(name) {
            return cell.clone();
        }
        let cell = Cell::null();
        self.globals.insert(Rc::from(name), cell.clone());
        cell
    }

    pub fn bind_global_var(&mut self, name: &str, cell: Cell) {
        self.globals.insert(Rc::from(name), cell);
    }

    pub fn unset_global_var(&mut self, name: &str) {
        self.globals.shift_remove(name);
    }

    // --- name registries -------------------------------------------------

    #[must_use]
    pub fn function(&self, lower_name: &str) -> Option<Callable> {
        self.functions.get(lower_name).cloned()
    }

    /// Registers a function, rejecting duplicates. Clears any lazy entry
    /// for the same name.
    pub fn register_function(&mut self, name: &str, callable: Callable) -> Result<(), Fatal> {
        let lower = name.to_ascii_lowercase();
        if self.functions.contains_key(lower.as_str()) {
            return Err(Fatal::new(
                FatalKind::DuplicateFunction,
                "duplicate function name in declaration",
                self.current_loc.clone(),
            ));
        }
        self.lazy_functions.remove(lower.as_str());
        self.functions.insert(Rc::from(lower), callable);
        Ok(())
    }

    /// True when a function name is known, eagerly or lazily.
    #[must_use]
    pub fn function_exists(&self, lower_name: &str) -> bool {
        self.functions.contains_key(lower_name) || self.lazy_functions.contains_key(lower_name)
    }

    #[must_use]
    pub fn class(&self, lower_name: &str) -> Option<Rc<Class>> {
        self.classes.get(lower_name).cloned()
    }

    /// True when a class name is known, eagerly or lazily.
    #[must_use]
    pub fn class_exists(&self, lower_name: &str) -> bool {
        self.classes.contains_key(lower_name) || self.lazy_classes.contains_key(lower_name)
    }

    /// Registers a class, rejecting duplicates with the canonical message.
    /// Clears any lazy entry for the same name.
    pub fn register_class(&mut self, class: Rc<Class>) -> Result<(), Fatal> {
        let lower = class.name.to_ascii_lowercase();
        if self.classes.contains_key(lower.as_str()) {
            return Err(Fatal::new(
                FatalKind::DuplicateClass,
                format!(
                    "Cannot declare class {}, because the name is already in use",
                    class.name
                ),
                self.current_loc.clone(),
            ));
        }
        self.lazy_classes.remove(lower.as_str());
        self.classes.insert(Rc::from(lower), class);
        Ok(())
    }

    /// Removes and returns the lazy entry for a function name. The entry is
    /// gone afterwards whether or not the caller's resolution succeeds —
    /// that is the at-most-once guarantee.
    pub(crate) fn take_lazy_function(&mut self, lower_name: &str) -> Option<Rc<FuncDeclStmt>> {
        self.lazy_functions.remove(lower_name)
    }

    pub(crate) fn take_lazy_class(&mut self, lower_name: &str) -> Option<Rc<ClassDeclStmt>> {
        self.lazy_classes.remove(lower_name)
    }

    /// Indexes a compiled script's top-level declarations for lazy
    /// resolution, so later code may call functions and construct classes
    /// declared further down the file.
    pub fn register_lazy(&mut self, script: &Script) {
        for stmt in &script.stmts {
            match &stmt.kind {
                crate::node::NodeKind::FuncDecl(decl) => {
                    let lower = decl.name.to_ascii_lowercase();
                    if !self.functions.contains_key(lower.as_str()) {
                        self.lazy_functions.insert(Rc::from(lower), decl.clone());
                    }
                }
                crate::node::NodeKind::ClassDecl(decl) => {
                    let lower = decl.class.name.to_ascii_lowercase();
                    if !self.classes.contains_key(lower.as_str()) {
                        self.lazy_classes.insert(Rc::from(lower), decl.clone());
                    }
                }
                _ => {}
            }
        }
    }

    // --- constants -------------------------------------------------------

    /// Defines a constant; returns false when the name is taken.
    pub fn define_constant(&mut self, name: &str, value: Value) -> bool {
        if self.constants.contains_key(name) {
            return false;
        }
        self.constants.insert(Rc::from(name), value);
        true
    }

    #[must_use]
    pub fn get_constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).cloned()
    }

    #[must_use]
    pub fn constant_defined(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    // --- streams & includes ----------------------------------------------

    /// Registers a handler for a URL scheme (`stream_wrapper_register`).
    pub fn register_stream_handler(&mut self, scheme: impl Into<String>, handler: Box<dyn StreamHandler>) {
        self.stream_handlers.insert(scheme.into(), handler);
    }

    fn handler_for<'a>(&self, path: &'a str) -> (Option<&dyn StreamHandler>, &'a str) {
        let (scheme, rest) = split_scheme(path);
        let scheme = scheme.unwrap_or("file");
        match self.stream_handlers.get(scheme) {
            Some(handler) => (Some(handler.as_ref()), rest),
            None => (None, rest),
        }
    }

    /// Canonical identity of an includable path, through its scheme handler.
    pub fn canonical_path(&self, path: &str) -> io::Result<String> {
        let (handler, rest) = self.handler_for(path);
        match handler {
            Some(h) => h.canonical(rest),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no stream handler for {path}"),
            )),
        }
    }

    /// Reads, lexes and compiles a script through the stream-handler map.
    pub fn load_script(&mut self, path: &str) -> Result<(String, Script), LoadError> {
        let (canonical, source) = {
            let (handler, rest) = self.handler_for(path);
            let handler = handler.ok_or_else(|| {
                LoadError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no stream handler for {path}"),
                ))
            })?;
            let canonical = handler.canonical(rest).map_err(LoadError::Io)?;
            let mut reader = handler.open(rest).map_err(LoadError::Io)?;
            let mut source = Vec::new();
            io::Read::read_to_end(&mut reader, &mut source).map_err(LoadError::Io)?;
            (canonical, source)
        };
        let items = lexer::lex(&source, &canonical).map_err(|e| LoadError::Script(e.into()))?;
        let script = compiler::compile(items).map_err(|e| LoadError::Script(e.into()))?;
        Ok((canonical, script))
    }

    #[must_use]
    pub fn was_included(&self, canonical: &str) -> bool {
        self.included.contains(canonical)
    }

    pub fn mark_included(&mut self, canonical: String) {
        self.included.insert(canonical);
    }

    // --- entry point -----------------------------------------------------

    /// Runs a script file as the request root, then drains the output
    /// chain. A normal `exit` is filtered into success; the returned value
    /// is the request's exit code.
    pub fn run_file(&mut self, path: &str) -> Result<i32, RequestError> {
        let (canonical, script) = match self.load_script(path) {
            Ok(loaded) => loaded,
            Err(LoadError::Io(e)) => {
                return Err(RequestError::Fatal(Fatal::new(
                    FatalKind::RequireFailed,
                    format!("Failed opening required '{path}': {e}"),
                    Loc::start_of(path),
                )));
            }
            Err(LoadError::Script(e)) => return Err(RequestError::Script(e)),
        };
        self.mark_included(canonical);
        self.register_lazy(&script);

        let result = {
            let mut cx = Ctx::root(self);
            exec::run_script(&mut cx, &script.stmts)
        };

        let code = match result {
            Ok(_) | Err(Flow::Return(_)) => 0,
            Err(Flow::Exit(code)) => code,
            Err(Flow::Fatal(fatal)) => return Err(RequestError::Fatal(fatal)),
            Err(Flow::Throw(thrown)) => return Err(exec::uncaught(thrown)),
            Err(Flow::Break(_) | Flow::Continue(_)) => {
                return Err(RequestError::Fatal(Fatal::internal(
                    "break/continue escaped the script root",
                    self.current_loc.clone(),
                )));
            }
        };

        let loc = self.current_loc.clone();
        self.output
            .close()
            .map_err(|e| RequestError::Fatal(Fatal::new(FatalKind::Output, format!("output error: {e}"), loc)))?;
        Ok(code)
    }

    /// Compiles and runs a source string as the request root. Primarily for
    /// embedding and tests; semantics match `run_file` with a pseudo
    /// filename.
    pub fn run_source(&mut self, filename: &str, source: &[u8]) -> Result<i32, RequestError> {
        let items = lexer::lex(source, filename).map_err(ScriptError::from)?;
        let script = compiler::compile(items).map_err(ScriptError::from)?;
        self.register_lazy(&script);

        let result = {
            let mut cx = Ctx::root(self);
            exec::run_script(&mut cx, &script.stmts)
        };

        let code = match result {
            Ok(_) | Err(Flow::Return(_)) => 0,
            Err(Flow::Exit(code)) => code,
            Err(Flow::Fatal(fatal)) => return Err(RequestError::Fatal(fatal)),
            Err(Flow::Throw(thrown)) => return Err(exec::uncaught(thrown)),
            Err(Flow::Break(_) | Flow::Continue(_)) => {
                return Err(RequestError::Fatal(Fatal::internal(
                    "break/continue escaped the script root",
                    self.current_loc.clone(),
                )));
            }
        };

        let loc = self.current_loc.clone();
        self.output
            .close()
            .map_err(|e| RequestError::Fatal(Fatal::new(FatalKind::Output, format!("output error: {e}"), loc)))?;
        Ok(code)
    }
}
