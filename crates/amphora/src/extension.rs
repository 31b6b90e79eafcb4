use std::sync::Mutex;

use crate::{
    class::Class,
    context::Ctx,
    error::RunResult,
    function::Args,
    value::Value,
};

/// Signature of a native function or method.
///
/// Plain function pointers keep the process-wide registry `Send + Sync`;
/// everything request-scoped arrives through the context.
pub type NativeHandler = fn(&mut Ctx<'_>, Args) -> RunResult<Value>;

/// Declared shape of one native parameter.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub type_hint: Option<&'static str>,
    pub by_ref: bool,
    pub optional: bool,
}

impl ArgSpec {
    #[must_use]
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            type_hint: None,
            by_ref: false,
            optional: false,
        }
    }

    #[must_use]
    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            type_hint: None,
            by_ref: false,
            optional: true,
        }
    }

    #[must_use]
    pub const fn by_ref(name: &'static str) -> Self {
        Self {
            name,
            type_hint: None,
            by_ref: true,
            optional: false,
        }
    }
}

/// A native function as registered by an extension.
#[derive(Debug, Clone, Copy)]
pub struct ExtFunction {
    pub handler: NativeHandler,
    pub args: &'static [ArgSpec],
}

/// Process-safe constant payload; converted to a `Value` per Global.
#[derive(Debug, Clone, Copy)]
pub enum ConstVal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl ConstVal {
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
            Self::Str(s) => Value::string(s),
        }
    }
}

/// One extension's contribution to the runtime.
///
/// Classes are builder functions rather than built values: per-Global copies
/// may hold `Rc` internals, but the registry itself must stay shareable
/// across threads.
pub struct Ext {
    pub name: &'static str,
    pub version: &'static str,
    pub functions: Vec<(&'static str, ExtFunction)>,
    pub classes: Vec<fn() -> Class>,
    pub constants: Vec<(&'static str, ConstVal)>,
}

struct Registry {
    exts: Vec<Ext>,
    frozen: bool,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    exts: Vec::new(),
    frozen: false,
});

/// Registers an extension with the process-wide catalog.
///
/// Must happen before the first `Global` is constructed; the catalog freezes
/// at that point and late registration is a programming error.
///
/// # Panics
/// Panics if the registry is already frozen.
pub fn register_ext(ext: Ext) {
    let mut registry = REGISTRY.lock().expect("extension registry poisoned");
    assert!(
        !registry.frozen,
        "extension {} registered after the registry was frozen",
        ext.name
    );
    registry.exts.push(ext);
}

/// Freezes the catalog (idempotent) and visits every registered extension.
/// Each new Global copies catalog contents into its own maps through this.
pub(crate) fn freeze_and_visit(mut visit: impl FnMut(&Ext)) {
    let mut registry = REGISTRY.lock().expect("extension registry poisoned");
    registry.frozen = true;
    for ext in &registry.exts {
        visit(ext);
    }
}

/// Names and versions of the registered extensions, frozen or not.
#[must_use]
pub fn loaded_extensions() -> Vec<(&'static str, &'static str)> {
    let registry = REGISTRY.lock().expect("extension registry poisoned");
    registry.exts.iter().map(|e| (e.name, e.version)).collect()
}
