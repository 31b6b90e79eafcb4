use std::{
    any::Any,
    cell::RefCell,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    class::Class,
    function::PhpFunction,
    value::{Cell, Value},
};

/// Handle to a live object. Copying a value of object type copies the
/// handle, so every holder observes the same property writes.
pub type ObjRef = Rc<RefCell<Instance>>;

/// A live object: its class, its ordered property table, and optional
/// extension-owned state.
///
/// Properties are cells so that `$this->x` and a reference bound to it
/// alias the same slot.
pub struct Instance {
    pub class: Rc<Class>,
    pub props: IndexMap<Rc<str>, Cell, ahash::RandomState>,
    /// Opaque state attached by the runtime or an extension (closures store
    /// their captured environment here).
    pub attached: Option<Box<dyn Any>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field("props", &self.props)
            .field("attached", &self.attached.is_some())
            .finish()
    }
}

impl Instance {
    #[must_use]
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            props: IndexMap::default(),
            attached: None,
        }
    }

    #[must_use]
    pub fn into_ref(self) -> ObjRef {
        Rc::new(RefCell::new(self))
    }

    /// Cell of an existing property.
    #[must_use]
    pub fn prop(&self, name: &str) -> Option<Cell> {
        self.props.get(name).cloned()
    }

    /// Cell of a property, creating it as null when absent (dynamic
    /// property creation on write).
    pub fn prop_or_create(&mut self, name: &str) -> Cell {
        if let Some(cell) = self.props.get(name) {
            return cell.clone();
        }
        let cell = Cell::null();
        self.props.insert(Rc::from(name), cell.clone());
        cell
    }
}

/// Captured environment of an anonymous function.
///
/// Closures are ordinary objects of the built-in `Closure` class with this
/// attached; invoking such an object runs the compiled function with the
/// captured cells rebound in the fresh scope.
#[derive(Debug)]
pub struct ClosureState {
    pub func: Rc<PhpFunction>,
    /// Captured variables: name paired with the cell to rebind. By-value
    /// captures snapshot into a fresh cell at closure creation; by-reference
    /// captures share the defining scope's cell.
    pub captures: Vec<(Rc<str>, Cell)>,
    /// `$this` at the closure's creation site, if any.
    pub this: Option<ObjRef>,
    /// Lexical class scope at the creation site, for `self::` inside the body.
    pub scope: Option<Rc<Class>>,
}

/// Extracts closure state from an object, if it is a closure.
#[must_use]
pub fn closure_state(obj: &ObjRef) -> Option<std::cell::Ref<'_, ClosureState>> {
    let borrow = obj.borrow();
    if borrow.attached.as_ref().is_some_and(|a| a.is::<ClosureState>()) {
        Some(std::cell::Ref::map(borrow, |i| {
            i.attached
                .as_ref()
                .and_then(|a| a.downcast_ref::<ClosureState>())
                .expect("attachment type checked above")
        }))
    } else {
        None
    }
}

/// Builds a value holding some echoed-property view of the object, used by
/// diagnostics when an uncaught throwable surfaces: reads a string property
/// without running any script code.
#[must_use]
pub fn string_prop(obj: &ObjRef, name: &str) -> Option<String> {
    let instance = obj.borrow();
    let cell = instance.props.get(name)?;
    match &*cell.borrow() {
        Value::String(s) => Some(s.to_string_lossy()),
        _ => None,
    }
}

/// Reads an integer property the same way.
#[must_use]
pub fn int_prop(obj: &ObjRef, name: &str) -> Option<i64> {
    let instance = obj.borrow();
    let cell = instance.props.get(name)?;
    match &*cell.borrow() {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}
