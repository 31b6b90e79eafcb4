use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    class::Class,
    error::{Fatal, FatalKind, Flow, RunResult},
    exec,
    function::{Callable, PhpFunction},
    global::Global,
    location::Loc,
    object::ObjRef,
    value::Cell,
};

/// One function activation: its variable table and class context.
#[derive(Debug)]
pub struct Frame {
    pub vars: IndexMap<Rc<str>, Cell, ahash::RandomState>,
    pub this: Option<ObjRef>,
    /// Lexically enclosing class (`self::`).
    pub class: Option<Rc<Class>>,
    /// Runtime class for late static binding (`static::`).
    pub called_class: Option<Rc<Class>>,
    pub function: Option<Rc<PhpFunction>>,
    /// Display name for diagnostics (covers native calls too).
    pub function_name: Rc<str>,
}

impl Frame {
    #[must_use]
    pub fn new(function_name: Rc<str>) -> Self {
        Self {
            vars: IndexMap::default(),
            this: None,
            class: None,
            called_class: None,
            function: None,
            function_name,
        }
    }
}

/// Execution context handed to every node and native handler.
///
/// Holds the per-request Global plus the current function frame; at script
/// top level there is no frame and variables live in the Global's own table.
pub struct Ctx<'a> {
    pub global: &'a mut Global,
    pub frame: Option<&'a mut Frame>,
}

impl<'a> Ctx<'a> {
    #[must_use]
    pub fn root(global: &'a mut Global) -> Self {
        Self { global, frame: None }
    }

    /// Current source position, as updated by the last tick.
    #[must_use]
    pub fn loc(&self) -> Loc {
        self.global.current_loc().clone()
    }

    /// Statement-boundary poll: updates the active location and enforces
    /// deadline/cancellation.
    pub fn tick(&mut self, loc: &Loc) -> RunResult<()> {
        self.global.tick(loc).map_err(Flow::Fatal)
    }

    /// Debits the memory meter.
    pub fn mem_alloc(&mut self, size: usize) -> RunResult<()> {
        self.global.mem_alloc(size).map_err(Flow::Fatal)
    }

    /// Writes bytes to the top of the output chain.
    pub fn write(&mut self, bytes: &[u8]) -> RunResult<()> {
        self.global.write(bytes).map_err(Flow::Fatal)
    }

    /// Emits a recoverable warning on the output channel; execution
    /// continues.
    pub fn warn(&mut self, message: &str) -> RunResult<()> {
        let text = format!("\nWarning: {message} in {}\n", self.loc());
        self.write(text.as_bytes())
    }

    /// Emits a notice on the output channel.
    pub fn notice(&mut self, message: &str) -> RunResult<()> {
        let text = format!("\nNotice: {message} in {}\n", self.loc());
        self.write(text.as_bytes())
    }

    #[must_use]
    pub fn this(&self) -> Option<ObjRef> {
        self.frame.as_ref().and_then(|f| f.this.clone())
    }

    /// Lexically enclosing class of the running code, if any.
    #[must_use]
    pub fn scope_class(&self) -> Option<Rc<Class>> {
        self.frame.as_ref().and_then(|f| f.class.clone())
    }

    /// Runtime class for `static::`: the explicit called class, else the
    /// class of `$this`.
    #[must_use]
    pub fn called_class(&self) -> Option<Rc<Class>> {
        match self.frame.as_ref() {
            Some(f) => f
                .called_class
                .clone()
                .or_else(|| f.this.as_ref().map(|o| o.borrow().class.clone())),
            None => None,
        }
    }

    /// Resolves a variable name to its cell without creating it.
    ///
    /// Superglobals are visible from every scope; other names resolve in the
    /// current frame, or the Global's table at top level.
    #[must_use]
    pub fn lookup_var(&self, name: &str) -> Option<Cell> {
        if name == "this" {
            return self.this().map(|obj| Cell::new(crate::value::Value::Object(obj)));
        }
        if let Some(cell) = self.global.superglobal(name) {
            return Some(cell);
        }
        match self.frame.as_ref() {
            Some(frame) => frame.vars.get(name).cloned(),
            None => self.global.global_var(name),
        }
    }

    /// Resolves a variable name, creating a null cell on first write.
    pub fn var_or_create(&mut self, name: &str) -> Cell {
        if let Some(cell) = self.lookup_var(name) {
            return cell;
        }
        let cell = Cell::null();
        self.bind_var(name, cell.clone());
        cell
    }

    /// (Re)binds a name to a cell — the primitive behind `=&` and `global`.
    pub fn bind_var(&mut self, name: &str, cell: Cell) {
        match self.frame.as_mut() {
            Some(frame) => {
                frame.vars.insert(Rc::from(name), cell);
            }
            None => self.global.bind_global_var(name, cell),
        }
    }

    /// Removes a name from the current scope.
    pub fn unset_var(&mut self, name: &str) {
        match self.frame.as_mut() {
            Some(frame) => {
                frame.vars.shift_remove(name);
            }
            None => self.global.unset_global_var(name),
        }
    }

    /// Function lookup: eager table, then one-shot lazy resolution, then
    /// the canonical undefined-function fatal.
    pub fn get_function(&mut self, name: &str) -> RunResult<Callable> {
        let lower = name.to_ascii_lowercase();
        if let Some(callable) = self.global.function(&lower) {
            return Ok(callable);
        }
        if let Some(decl) = self.global.take_lazy_function(&lower) {
            // the entry is gone for good: at most one resolution attempt
            exec::declare_function(self, &decl)?;
            if let Some(callable) = self.global.function(&lower) {
                return Ok(callable);
            }
        }
        Err(Flow::Fatal(Fatal::new(
            FatalKind::UndefinedFunction,
            format!("Call to undefined function {name}()"),
            self.loc(),
        )))
    }

    /// Class lookup: pseudo-names first, then eager, then one-shot lazy.
    pub fn get_class(&mut self, name: &str) -> RunResult<Rc<Class>> {
        if let Some(resolved) = self.resolve_pseudo_class(name)? {
            return Ok(resolved);
        }
        let lower = name.to_ascii_lowercase();
        if let Some(class) = self.global.class(&lower) {
            return Ok(class);
        }
        if let Some(decl) = self.global.take_lazy_class(&lower) {
            exec::declare_class(self, &decl)?;
            if let Some(class) = self.global.class(&lower) {
                return Ok(class);
            }
        }
        Err(Flow::Fatal(Fatal::new(
            FatalKind::ClassNotFound,
            format!("Class '{name}' not found"),
            self.loc(),
        )))
    }

    /// Like `get_class` but a missing class is `None` instead of fatal;
    /// used for catch filters and `instanceof`, which tolerate unknown
    /// names. Pseudo-name scope errors resolve to `None` here too.
    pub fn get_class_quiet(&mut self, name: &str) -> RunResult<Option<Rc<Class>>> {
        if matches!(name.to_ascii_lowercase().as_str(), "self" | "parent" | "static") {
            return Ok(self.resolve_pseudo_class(name).unwrap_or(None));
        }
        let lower = name.to_ascii_lowercase();
        if let Some(class) = self.global.class(&lower) {
            return Ok(Some(class));
        }
        if let Some(decl) = self.global.take_lazy_class(&lower) {
            exec::declare_class(self, &decl)?;
            return Ok(self.global.class(&lower));
        }
        Ok(None)
    }

    fn resolve_pseudo_class(&mut self, name: &str) -> RunResult<Option<Rc<Class>>> {
        let scope_err = |cx: &Self, message: &str| {
            Flow::Fatal(Fatal::new(FatalKind::ScopeError, message.to_owned(), cx.loc()))
        };
        match name.to_ascii_lowercase().as_str() {
            "self" => match self.scope_class() {
                Some(class) => Ok(Some(class)),
                None => Err(scope_err(self, "Cannot access self:: when no class scope is active")),
            },
            "parent" => match self.scope_class() {
                None => Err(scope_err(self, "Cannot access parent:: when no class scope is active")),
                Some(class) => match class.parent.borrow().clone() {
                    Some(parent) => Ok(Some(parent)),
                    None => Err(scope_err(
                        self,
                        "Cannot access parent:: when current class scope has no parent",
                    )),
                },
            },
            "static" => match self.called_class() {
                Some(class) => Ok(Some(class)),
                None => Err(scope_err(self, "Cannot access static:: when no class scope is active")),
            },
            _ => Ok(None),
        }
    }
}
