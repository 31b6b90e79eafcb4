use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    context::Ctx,
    error::RunResult,
    extension::NativeHandler,
    function::PhpFunction,
    location::Loc,
    node::Node,
    value::{Cell, Value},
};

/// A runnable whose evaluation is deferred until an execution context is
/// available, then cached.
///
/// Class constants, property defaults, parameter defaults and static
/// initializers compile into these so forward references (a default
/// mentioning a class declared later in the file) resolve at first use
/// instead of at compile time.
#[derive(Debug)]
pub struct Delayed {
    node: Option<Node>,
    cache: RefCell<Option<Value>>,
}

impl Delayed {
    #[must_use]
    pub fn new(node: Node) -> Self {
        Self {
            node: Some(node),
            cache: RefCell::new(None),
        }
    }

    /// Pre-resolved value, for extension-supplied defaults.
    #[must_use]
    pub fn of_value(value: Value) -> Self {
        Self {
            node: None,
            cache: RefCell::new(Some(value)),
        }
    }

    /// Evaluates on first call, returns the cached value afterwards.
    pub fn resolve(&self, cx: &mut Ctx<'_>) -> RunResult<Value> {
        if let Some(v) = self.cache.borrow().as_ref() {
            return Ok(v.clone());
        }
        let value = match &self.node {
            Some(node) => node.run(cx)?,
            None => Value::Null,
        };
        *self.cache.borrow_mut() = Some(value.clone());
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ClassKind {
    #[strum(serialize = "class")]
    Class,
    #[strum(serialize = "interface")]
    Interface,
    #[strum(serialize = "trait")]
    Trait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// Modifier set for properties and methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberModifiers {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_readonly: bool,
}

/// Modifier set for class declarations themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassModifiers {
    pub is_abstract: bool,
    pub is_final: bool,
}

/// A declared property with its optional delayed default.
#[derive(Debug)]
pub struct Prop {
    pub name: Rc<str>,
    pub modifiers: MemberModifiers,
    pub default: Option<Rc<Delayed>>,
}

/// Body of a method: compiled script code or a native handler.
#[derive(Debug, Clone)]
pub enum MethodBody {
    Php(Rc<PhpFunction>),
    Native(NativeHandler),
}

/// A method entry. Methods are keyed case-insensitively in the class map;
/// `name` keeps the declared spelling for diagnostics.
#[derive(Debug)]
pub struct Method {
    pub name: Rc<str>,
    pub modifiers: MemberModifiers,
    pub body: MethodBody,
}

/// A class, interface or trait record.
///
/// Created during compilation of its declaration; parent and interface
/// references resolve when the declaration runnable executes (which may in
/// turn trigger lazy registration of the parent). Identity is the
/// fully-qualified case-insensitive name.
#[derive(Debug)]
pub struct Class {
    pub name: Rc<str>,
    pub kind: ClassKind,
    pub modifiers: ClassModifiers,
    pub parent_name: Option<Rc<str>>,
    pub parent: RefCell<Option<Rc<Class>>>,
    pub interface_names: Vec<Rc<str>>,
    pub interfaces: RefCell<Vec<Rc<Class>>>,
    /// Instance properties in declaration order.
    pub props: Vec<Prop>,
    /// Methods keyed by lowercase name.
    pub methods: IndexMap<Rc<str>, Rc<Method>, ahash::RandomState>,
    /// Constants keyed by declared (case-sensitive) name.
    pub consts: IndexMap<Rc<str>, Rc<Delayed>, ahash::RandomState>,
    /// Own constructor, when one of the methods qualifies.
    pub constructor: Option<Rc<Method>>,
    /// Static property cells, materialized on first access.
    pub statics: RefCell<IndexMap<Rc<str>, Cell, ahash::RandomState>>,
    statics_ready: RefCell<bool>,
    pub loc: Loc,
}

impl Class {
    /// Plain data constructor; the compiler and extension builders fill the
    /// maps before wrapping in `Rc`.
    #[must_use]
    pub fn new(name: Rc<str>, kind: ClassKind, loc: Loc) -> Self {
        Self {
            name,
            kind,
            modifiers: ClassModifiers::default(),
            parent_name: None,
            parent: RefCell::new(None),
            interface_names: Vec::new(),
            interfaces: RefCell::new(Vec::new()),
            props: Vec::new(),
            methods: IndexMap::default(),
            consts: IndexMap::default(),
            constructor: None,
            statics: RefCell::new(IndexMap::default()),
            statics_ready: RefCell::new(false),
            loc,
        }
    }

    /// Name without any namespace qualification.
    #[must_use]
    pub fn base_name(&self) -> &str {
        match self.name.rfind('\\') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }

    /// Case-insensitive method lookup walking the ancestor chain.
    /// Returns the defining class along with the method so callers can set
    /// the lexical scope correctly.
    #[must_use]
    pub fn find_method(self: &Rc<Self>, lower_name: &str) -> Option<(Rc<Self>, Rc<Method>)> {
        let mut current = self.clone();
        loop {
            if let Some(method) = current.methods.get(lower_name) {
                return Some((current.clone(), method.clone()));
            }
            let parent = current.parent.borrow().clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    /// Constructor lookup: own constructor, else the nearest ancestor's.
    #[must_use]
    pub fn find_constructor(self: &Rc<Self>) -> Option<(Rc<Self>, Rc<Method>)> {
        let mut current = self.clone();
        loop {
            if let Some(ctor) = &current.constructor {
                return Some((current.clone(), ctor.clone()));
            }
            let parent = current.parent.borrow().clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    /// Constant lookup: this class, then ancestors, then implemented
    /// interfaces in declaration order. First hit wins.
    #[must_use]
    pub fn find_constant(self: &Rc<Self>, name: &str) -> Option<Rc<Delayed>> {
        if let Some(c) = self.consts.get(name) {
            return Some(c.clone());
        }
        let parent = self.parent.borrow().clone();
        if let Some(p) = parent
            && let Some(c) = p.find_constant(name)
        {
            return Some(c);
        }
        for iface in self.interfaces.borrow().iter() {
            if let Some(c) = iface.find_constant(name) {
                return Some(c.clone());
            }
        }
        None
    }

    /// `instanceof` test: this class, any ancestor, or any implemented
    /// interface (transitively) matches `other` by identity or by
    /// case-insensitive name.
    #[must_use]
    pub fn instance_of(self: &Rc<Self>, other: &Rc<Self>) -> bool {
        if Rc::ptr_eq(self, other) || self.name.eq_ignore_ascii_case(&other.name) {
            return true;
        }
        let parent = self.parent.borrow().clone();
        if let Some(p) = parent
            && p.instance_of(other)
        {
            return true;
        }
        self.interfaces.borrow().iter().any(|i| i.instance_of(other))
    }

    /// Ancestor chain ordered root first, `self` last — the order in which
    /// property defaults apply during instantiation.
    #[must_use]
    pub fn lineage(self: &Rc<Self>) -> Vec<Rc<Self>> {
        let mut chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(class) = current {
            current = class.parent.borrow().clone();
            chain.push(class);
        }
        chain.reverse();
        chain
    }

    /// Cell for a static property, materializing the class's static table
    /// (including inherited declarations) on first access.
    pub fn static_cell(self: &Rc<Self>, cx: &mut Ctx<'_>, name: &str) -> RunResult<Option<Cell>> {
        self.ensure_statics(cx)?;
        if let Some(cell) = self.statics.borrow().get(name) {
            return Ok(Some(cell.clone()));
        }
        let parent = self.parent.borrow().clone();
        match parent {
            Some(p) => p.static_cell(cx, name),
            None => Ok(None),
        }
    }

    fn ensure_statics(self: &Rc<Self>, cx: &mut Ctx<'_>) -> RunResult<()> {
        if *self.statics_ready.borrow() {
            return Ok(());
        }
        *self.statics_ready.borrow_mut() = true;
        for prop in &self.props {
            if !prop.modifiers.is_static {
                continue;
            }
            let value = match &prop.default {
                Some(delayed) => delayed.resolve(cx)?,
                None => Value::Null,
            };
            self.statics.borrow_mut().insert(prop.name.clone(), Cell::new(value));
        }
        Ok(())
    }
}
