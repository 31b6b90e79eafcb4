use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    class::{Class, Delayed},
    extension::ExtFunction,
    location::Loc,
    node::Node,
    value::{Cell, Value},
};

/// One declared parameter.
#[derive(Debug)]
pub struct Param {
    pub name: Rc<str>,
    pub type_hint: Option<Rc<str>>,
    /// Delayed so defaults may reference constants declared later.
    pub default: Option<Rc<Delayed>>,
    pub by_ref: bool,
    pub variadic: bool,
}

/// A compiled script function: named function, method body, or closure.
///
/// The owning class is a *weak* back-reference — classes own their methods
/// strongly, so a strong pointer here would cycle.
#[derive(Debug)]
pub struct PhpFunction {
    /// Declared name; empty for closures.
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub by_ref_return: bool,
    pub return_type: Option<Rc<str>>,
    pub class: RefCell<Weak<Class>>,
    /// Storage behind `static $x;` — persists across calls within a request.
    pub statics: RefCell<IndexMap<Rc<str>, Cell, ahash::RandomState>>,
    pub loc: Loc,
}

impl PhpFunction {
    #[must_use]
    pub fn owning_class(&self) -> Option<Rc<Class>> {
        self.class.borrow().upgrade()
    }

    pub fn bind_class(&self, class: &Rc<Class>) {
        *self.class.borrow_mut() = Rc::downgrade(class);
    }
}

/// Anything callable through the Global's function table.
#[derive(Debug, Clone)]
pub enum Callable {
    Php(Rc<PhpFunction>),
    Native(ExtFunction),
}

/// One evaluated argument handed to a native function.
///
/// Arguments at by-reference positions arrive as the caller's cell so the
/// native can write through; everything else arrives by value.
#[derive(Debug)]
pub enum ArgSlot {
    Value(Value),
    Cell(Cell),
}

/// Evaluated argument pack for native calls.
#[derive(Debug, Default)]
pub struct Args {
    slots: Vec<ArgSlot>,
}

impl Args {
    #[must_use]
    pub fn new(slots: Vec<ArgSlot>) -> Self {
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Value of the i-th argument (reads through a cell slot).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).map(|slot| match slot {
            ArgSlot::Value(v) => v.clone(),
            ArgSlot::Cell(c) => c.get(),
        })
    }

    /// The caller's cell at a by-reference position, when one was passed.
    #[must_use]
    pub fn cell(&self, index: usize) -> Option<Cell> {
        match self.slots.get(index) {
            Some(ArgSlot::Cell(c)) => Some(c.clone()),
            _ => None,
        }
    }
}
