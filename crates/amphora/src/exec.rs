//! Tree-walking evaluator: `Node::run`, the lvalue path, calls,
//! instantiation, includes, and control-signal plumbing.

use std::rc::Rc;

use crate::{
    array::{Array, Key},
    class::{Class, ClassKind, Method, MethodBody},
    context::{Ctx, Frame},
    error::{Fatal, FatalKind, Flow, RequestError, RunResult, Thrown},
    function::{ArgSlot, Args, Callable, PhpFunction},
    global::LoadError,
    node::{
        BinaryOp, CaptureSpec, CastKind, ClassDeclStmt, ClassTarget, FuncDeclStmt, IncludeKind, Node, NodeKind,
        PropName, UnaryOp,
    },
    object::{self, ClosureState, Instance, ObjRef},
    value::{self, Cell, Num, Str, Value, coerce_string, loose_eq, numeric_str, strict_eq, to_num},
};

/// Runs a statement list, polling the deadline before every statement.
pub(crate) fn run_stmts(cx: &mut Ctx<'_>, stmts: &[Node]) -> RunResult<Value> {
    for stmt in stmts {
        cx.tick(stmt.loc())?;
        stmt.run(cx)?;
    }
    Ok(Value::Null)
}

/// Runs a compiled script's top-level statements (shared `Rc` nodes).
pub(crate) fn run_script(cx: &mut Ctx<'_>, stmts: &[Rc<Node>]) -> RunResult<Value> {
    for stmt in stmts {
        cx.tick(stmt.loc())?;
        stmt.run(cx)?;
    }
    Ok(Value::Null)
}

impl Node {
    fn fatal(&self, kind: FatalKind, message: impl Into<String>) -> Flow {
        Flow::Fatal(Fatal::new(kind, message, self.loc.clone()))
    }

    /// Evaluates the node to a value, or yields a control signal.
    pub fn run(&self, cx: &mut Ctx<'_>) -> RunResult<Value> {
        match &self.kind {
            NodeKind::Noop | NodeKind::UseDecl | NodeKind::NamespaceDecl(_) => Ok(Value::Null),
            NodeKind::Literal(v) => Ok(v.clone()),
            NodeKind::InlineHtml(text) => {
                cx.write(text.as_bytes())?;
                Ok(Value::Null)
            }
            NodeKind::Interp(parts) => {
                let mut out = Vec::new();
                for part in parts {
                    let v = part.run(cx)?;
                    out.extend_from_slice(stringify(cx, &v, part.loc())?.as_bytes());
                }
                cx.mem_alloc(out.len())?;
                Ok(Value::String(Rc::new(Str::from_bytes(out))))
            }
            NodeKind::Var(name) => match cx.lookup_var(name) {
                Some(cell) => Ok(cell.get()),
                None => {
                    cx.notice(&format!("Undefined variable: {name}"))?;
                    Ok(Value::Null)
                }
            },
            NodeKind::VarVar(inner) => {
                let name_value = inner.run(cx)?;
                let name = stringify(cx, &name_value, inner.loc())?.to_string_lossy();
                match cx.lookup_var(&name) {
                    Some(cell) => Ok(cell.get()),
                    None => {
                        cx.notice(&format!("Undefined variable: {name}"))?;
                        Ok(Value::Null)
                    }
                }
            }
            NodeKind::ArrayLit(entries) => {
                cx.mem_alloc(entries.len() * 48)?;
                let mut array = Array::new();
                for (key_node, value_node) in entries {
                    match key_node {
                        Some(k) => {
                            let key_value = k.run(cx)?;
                            if matches!(key_value, Value::Array(_) | Value::Object(_)) {
                                cx.warn("Illegal offset type")?;
                                continue;
                            }
                            let value = value_node.run(cx)?;
                            array.set(Key::from_value(&key_value), value);
                        }
                        None => {
                            let value = value_node.run(cx)?;
                            array.append(value);
                        }
                    }
                }
                Ok(Value::Array(array))
            }
            NodeKind::Assign { target, value } => {
                let v = value.run(cx)?;
                assign_into(cx, target, v)
            }
            NodeKind::AssignRef { target, value } => assign_ref(cx, target, value),
            NodeKind::AssignOp { op, target, value } => {
                let current = target.run(cx)?;
                let rhs = value.run(cx)?;
                let result = apply_binary(cx, *op, current, rhs, &self.loc)?;
                assign_into(cx, target, result)
            }
            NodeKind::IncDec { pre, inc, target } => {
                let old = target.run(cx)?;
                let new = step_value(&old, *inc);
                assign_into(cx, target, new.clone())?;
                Ok(if *pre { new } else { old })
            }
            NodeKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    if !lhs.run(cx)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(rhs.run(cx)?.is_truthy()))
                }
                BinaryOp::Or => {
                    if lhs.run(cx)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(rhs.run(cx)?.is_truthy()))
                }
                _ => {
                    let a = lhs.run(cx)?;
                    let b = rhs.run(cx)?;
                    apply_binary(cx, *op, a, b, &self.loc)
                }
            },
            NodeKind::Unary { op, expr } => {
                let v = expr.run(cx)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!v.is_truthy()),
                    UnaryOp::BitNot => Value::Int(!value::to_int(&v)),
                    UnaryOp::Plus => to_num(&v).0.into_value(),
                    UnaryOp::Neg => match to_num(&v).0 {
                        Num::Int(i) => match i.checked_neg() {
                            Some(n) => Value::Int(n),
                            None => Value::Float(-(i as f64)),
                        },
                        Num::Float(f) => Value::Float(-f),
                    },
                })
            }
            NodeKind::Ternary { cond, then, otherwise } => {
                let c = cond.run(cx)?;
                if c.is_truthy() {
                    match then {
                        Some(t) => t.run(cx),
                        // short form keeps the condition's value
                        None => Ok(c),
                    }
                } else {
                    otherwise.run(cx)
                }
            }
            NodeKind::Coalesce { lhs, rhs } => match isset_value(cx, lhs)? {
                Some(v) if !v.is_null() => Ok(v),
                _ => rhs.run(cx),
            },
            NodeKind::Cast { kind, expr } => {
                let v = expr.run(cx)?;
                cast_value(cx, *kind, v, &self.loc)
            }
            NodeKind::Isset(targets) => {
                for target in targets {
                    match isset_value(cx, target)? {
                        Some(v) if !v.is_null() => {}
                        _ => return Ok(Value::Bool(false)),
                    }
                }
                Ok(Value::Bool(true))
            }
            NodeKind::Empty(target) => match isset_value(cx, target)? {
                Some(v) => Ok(Value::Bool(!v.is_truthy())),
                None => Ok(Value::Bool(true)),
            },
            NodeKind::Unset(targets) => {
                for target in targets {
                    unset_target(cx, target)?;
                }
                Ok(Value::Null)
            }
            NodeKind::Index { base, index } => {
                let base_value = base.run(cx)?;
                let key_value = match index {
                    Some(idx) => idx.run(cx)?,
                    None => return Err(self.fatal(FatalKind::BadOperation, "Cannot use [] for reading")),
                };
                match base_value {
                    Value::Array(array) => match array.get(&Key::from_value(&key_value)) {
                        Some(v) => Ok(v.clone()),
                        None => {
                            cx.notice(&format!("Undefined index: {}", Key::from_value(&key_value)))?;
                            Ok(Value::Null)
                        }
                    },
                    Value::String(s) => {
                        let idx = value::to_int(&key_value);
                        let bytes = s.as_bytes();
                        let pos = if idx < 0 { bytes.len() as i64 + idx } else { idx };
                        if pos >= 0 && (pos as usize) < bytes.len() {
                            Ok(Value::String(Rc::new(Str::from_bytes(vec![bytes[pos as usize]]))))
                        } else {
                            cx.notice("Uninitialized string offset")?;
                            Ok(Value::string(""))
                        }
                    }
                    Value::Null => Ok(Value::Null),
                    _ => {
                        cx.warn("Cannot use a scalar value as an array")?;
                        Ok(Value::Null)
                    }
                }
            }
            NodeKind::Prop { base, name } => {
                let base_value = base.run(cx)?;
                let name = prop_name(cx, name)?;
                match base_value {
                    Value::Object(obj) => match obj.borrow().prop(&name) {
                        Some(cell) => Ok(cell.get()),
                        None => {
                            cx.notice(&format!("Undefined property: {}::${name}", obj.borrow().class.name))?;
                            Ok(Value::Null)
                        }
                    },
                    _ => {
                        cx.notice(&format!("Trying to get property '{name}' of non-object"))?;
                        Ok(Value::Null)
                    }
                }
            }
            NodeKind::StaticProp { class, name } => {
                let class = cx.get_class(class)?;
                match class.static_cell(cx, name)? {
                    Some(cell) => Ok(cell.get()),
                    None => Err(self.fatal(
                        FatalKind::BadOperation,
                        format!("Access to undeclared static property: {}::${name}", class.name),
                    )),
                }
            }
            NodeKind::ClassConst { class, name } => {
                let resolved = cx.get_class(class)?;
                match resolved.find_constant(name) {
                    Some(delayed) => delayed.resolve(cx),
                    None => Err(self.fatal(
                        FatalKind::BadOperation,
                        format!("Undefined class constant '{}::{name}'", resolved.name),
                    )),
                }
            }
            NodeKind::ConstFetch(name) => match cx.global.get_constant(name) {
                Some(v) => Ok(v),
                None => {
                    cx.notice(&format!("Use of undefined constant {name} - assumed '{name}'"))?;
                    Ok(Value::string(&**name))
                }
            },
            NodeKind::Call { name, args } => {
                let callable = cx.get_function(name)?;
                call_callable(cx, &callable, args, None, None, None, name)
            }
            NodeKind::CallDynamic { target, args } => {
                let callee = target.run(cx)?;
                match callee {
                    Value::String(name) => {
                        let name = name.to_string_lossy();
                        let callable = cx.get_function(&name)?;
                        call_callable(cx, &callable, args, None, None, None, &name)
                    }
                    Value::Object(obj) => call_object(cx, &obj, args, &self.loc),
                    other => Err(self.fatal(
                        FatalKind::BadOperation,
                        format!("Value of type {} is not callable", other.type_name()),
                    )),
                }
            }
            NodeKind::MethodCall { base, name, args } => {
                let base_value = base.run(cx)?;
                let name = prop_name(cx, name)?;
                match base_value {
                    Value::Object(obj) => {
                        let class = obj.borrow().class.clone();
                        call_method(cx, Some(obj), &class, None, &name, args, &self.loc)
                    }
                    other => Err(self.fatal(
                        FatalKind::BadOperation,
                        format!("Call to a member function {name}() on {}", other.type_name()),
                    )),
                }
            }
            NodeKind::StaticCall { class, name, args } => {
                let forwarding = matches!(
                    class.to_ascii_lowercase().as_str(),
                    "self" | "parent" | "static"
                );
                let resolved = cx.get_class(class)?;
                // a forwarded call keeps the runtime class for `static::`
                let called = if forwarding {
                    cx.called_class().or_else(|| Some(resolved.clone()))
                } else {
                    Some(resolved.clone())
                };
                let this = cx.this().filter(|obj| obj.borrow().class.instance_of(&resolved));
                call_method(cx, this, &resolved, called, name, args, &self.loc)
            }
            NodeKind::New { class, args } => {
                let resolved = resolve_class_target(cx, class, &self.loc)?;
                instantiate(cx, &resolved, args, &self.loc)
            }
            NodeKind::InstanceOf { expr, class } => {
                let v = expr.run(cx)?;
                let Value::Object(obj) = v else {
                    return Ok(Value::Bool(false));
                };
                let target = match class {
                    ClassTarget::Name(name) => cx.get_class_quiet(name)?,
                    ClassTarget::Expr(node) => match node.run(cx)? {
                        Value::String(s) => cx.get_class_quiet(&s.to_string_lossy())?,
                        Value::Object(other) => Some(other.borrow().class.clone()),
                        _ => None,
                    },
                };
                match target {
                    Some(class) => {
                        let own = obj.borrow().class.clone();
                        Ok(Value::Bool(own.instance_of(&class)))
                    }
                    None => Ok(Value::Bool(false)),
                }
            }
            NodeKind::Closure { func, uses } => make_closure(cx, func, uses),
            NodeKind::FuncDecl(decl) => declare_function(cx, decl),
            NodeKind::ClassDecl(decl) => declare_class(cx, decl),
            NodeKind::Block(stmts) => run_stmts(cx, stmts),
            NodeKind::If { cond, then, otherwise } => {
                if cond.run(cx)?.is_truthy() {
                    then.run(cx)?;
                } else if let Some(other) = otherwise {
                    other.run(cx)?;
                }
                Ok(Value::Null)
            }
            NodeKind::While { cond, body } => {
                loop {
                    cx.tick(&self.loc)?;
                    if !cond.run(cx)?.is_truthy() {
                        break;
                    }
                    match run_loop_body(cx, body) {
                        LoopStep::Normal => {}
                        LoopStep::Stop => break,
                        LoopStep::Signal(flow) => return Err(flow),
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::DoWhile { body, cond } => {
                loop {
                    cx.tick(&self.loc)?;
                    match run_loop_body(cx, body) {
                        LoopStep::Normal => {}
                        LoopStep::Stop => break,
                        LoopStep::Signal(flow) => return Err(flow),
                    }
                    if !cond.run(cx)?.is_truthy() {
                        break;
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::For { init, cond, step, body } => {
                for node in init {
                    node.run(cx)?;
                }
                loop {
                    cx.tick(&self.loc)?;
                    let mut keep_going = true;
                    for node in cond {
                        keep_going = node.run(cx)?.is_truthy();
                    }
                    if !keep_going {
                        break;
                    }
                    match run_loop_body(cx, body) {
                        LoopStep::Normal => {}
                        LoopStep::Stop => break,
                        LoopStep::Signal(flow) => return Err(flow),
                    }
                    for node in step {
                        node.run(cx)?;
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::Foreach {
                subject,
                key,
                value,
                by_ref,
                body,
            } => run_foreach(cx, subject, key.as_deref(), value, *by_ref, body, &self.loc),
            NodeKind::Switch { subject, cases } => {
                let needle = subject.run(cx)?;
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        let candidate = test.run(cx)?;
                        if loose_eq(&needle, &candidate) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                if start.is_none() {
                    start = cases.iter().position(|c| c.test.is_none());
                }
                if let Some(start) = start {
                    for case in &cases[start..] {
                        match run_stmts(cx, &case.body) {
                            Ok(_) => {}
                            // continue targets the switch too, like break
                            Err(Flow::Break(1) | Flow::Continue(1)) => return Ok(Value::Null),
                            Err(Flow::Break(n)) => return Err(Flow::Break(n - 1)),
                            Err(Flow::Continue(n)) => return Err(Flow::Continue(n - 1)),
                            Err(flow) => return Err(flow),
                        }
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::Break(n) => Err(Flow::Break(*n)),
            NodeKind::Continue(n) => Err(Flow::Continue(*n)),
            NodeKind::Return(expr) => {
                let v = match expr {
                    Some(node) => node.run(cx)?,
                    None => Value::Null,
                };
                Err(Flow::Return(v))
            }
            NodeKind::Echo(parts) => {
                for part in parts {
                    let v = part.run(cx)?;
                    let s = stringify(cx, &v, part.loc())?;
                    cx.write(s.as_bytes())?;
                }
                Ok(Value::Null)
            }
            NodeKind::Print(expr) => {
                let v = expr.run(cx)?;
                let s = stringify(cx, &v, expr.loc())?;
                cx.write(s.as_bytes())?;
                Ok(Value::Int(1))
            }
            NodeKind::Include { kind, expr } => {
                let path_value = expr.run(cx)?;
                let path = stringify(cx, &path_value, expr.loc())?.to_string_lossy();
                include_file(cx, *kind, &path, &self.loc)
            }
            NodeKind::Try { body, catches, finally } => run_try(cx, body, catches, finally.as_deref()),
            NodeKind::Throw(expr) => {
                let v = expr.run(cx)?;
                if !matches!(v, Value::Object(_)) {
                    return Err(self.fatal(FatalKind::BadOperation, "Can only throw objects"));
                }
                Err(Flow::Throw(Thrown {
                    value: v,
                    loc: self.loc.clone(),
                }))
            }
            NodeKind::GlobalVars(names) => {
                for name in names {
                    let cell = cx.global.global_var_or_create(name);
                    cx.bind_var(name, cell);
                }
                Ok(Value::Null)
            }
            NodeKind::StaticVars(decls) => {
                let func = cx.frame.as_ref().and_then(|f| f.function.clone());
                for (name, init) in decls {
                    let cell = match &func {
                        Some(func) => {
                            let existing = func.statics.borrow().get(&**name).cloned();
                            match existing {
                                Some(cell) => cell,
                                None => {
                                    let initial = match init {
                                        Some(delayed) => delayed.resolve(cx)?,
                                        None => Value::Null,
                                    };
                                    let cell = Cell::new(initial);
                                    func.statics.borrow_mut().insert(name.clone(), cell.clone());
                                    cell
                                }
                            }
                        }
                        // at top level `static` degrades to a plain variable
                        None => match cx.lookup_var(name) {
                            Some(cell) => cell,
                            None => {
                                let initial = match init {
                                    Some(delayed) => delayed.resolve(cx)?,
                                    None => Value::Null,
                                };
                                Cell::new(initial)
                            }
                        },
                    };
                    cx.bind_var(name, cell);
                }
                Ok(Value::Null)
            }
            NodeKind::ConstDecl(decls) => {
                for (name, expr) in decls {
                    let v = expr.run(cx)?;
                    if !cx.global.define_constant(name, v) {
                        cx.notice(&format!("Constant {name} already defined"))?;
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::Exit(expr) => {
                let code = match expr {
                    None => 0,
                    Some(node) => {
                        let v = node.run(cx)?;
                        match &v {
                            Value::String(s) => {
                                cx.write(s.as_bytes())?;
                                0
                            }
                            other => value::to_int(other) as i32,
                        }
                    }
                };
                Err(Flow::Exit(code))
            }
        }
    }

    /// Resolves the node to a cell for writing or aliasing. Only meaningful
    /// for lvalue nodes; everything else is a write-context error.
    pub(crate) fn run_ref(&self, cx: &mut Ctx<'_>) -> RunResult<Cell> {
        match &self.kind {
            NodeKind::Var(name) => Ok(cx.var_or_create(name)),
            NodeKind::VarVar(inner) => {
                let name_value = inner.run(cx)?;
                let name = stringify(cx, &name_value, inner.loc())?.to_string_lossy();
                Ok(cx.var_or_create(&name))
            }
            NodeKind::Prop { base, name } => {
                let name = prop_name(cx, name)?;
                let obj = base_object_for_write(cx, base)?;
                match obj {
                    Some(obj) => Ok(obj.borrow_mut().prop_or_create(&name)),
                    None => {
                        cx.warn(&format!("Attempt to assign property '{name}' of non-object"))?;
                        Ok(Cell::null())
                    }
                }
            }
            NodeKind::StaticProp { class, name } => {
                let class = cx.get_class(class)?;
                match class.static_cell(cx, name)? {
                    Some(cell) => Ok(cell),
                    None => Err(self.fatal(
                        FatalKind::BadOperation,
                        format!("Access to undeclared static property: {}::${name}", class.name),
                    )),
                }
            }
            NodeKind::Index { .. } => {
                // references into array elements are not supported; the
                // caller gets a detached snapshot cell
                cx.warn("References to array elements are not supported; copying value")?;
                let v = self.run(cx)?;
                Ok(Cell::new(v))
            }
            _ => Err(self.fatal(
                FatalKind::BadOperation,
                "Can't use expression result in write context",
            )),
        }
    }
}

enum LoopStep {
    Normal,
    Stop,
    Signal(Flow),
}

fn run_loop_body(cx: &mut Ctx<'_>, body: &Node) -> LoopStep {
    match body.run(cx) {
        Ok(_) => LoopStep::Normal,
        Err(Flow::Break(n)) => {
            if n <= 1 {
                LoopStep::Stop
            } else {
                LoopStep::Signal(Flow::Break(n - 1))
            }
        }
        Err(Flow::Continue(n)) => {
            if n <= 1 {
                LoopStep::Normal
            } else {
                LoopStep::Signal(Flow::Continue(n - 1))
            }
        }
        Err(flow) => LoopStep::Signal(flow),
    }
}

fn prop_name(cx: &mut Ctx<'_>, name: &PropName) -> RunResult<String> {
    match name {
        PropName::Fixed(n) => Ok(n.to_string()),
        PropName::Dynamic(node) => {
            let v = node.run(cx)?;
            Ok(stringify(cx, &v, node.loc())?.to_string_lossy())
        }
    }
}

/// String coercion with the interpreter-level behaviors: arrays convert
/// with a notice, objects try `__toString`, everything else is pure.
pub(crate) fn stringify(cx: &mut Ctx<'_>, v: &Value, loc: &crate::location::Loc) -> RunResult<Rc<Str>> {
    match v {
        Value::Array(_) => {
            cx.notice("Array to string conversion")?;
            Ok(Rc::new(Str::from("Array")))
        }
        Value::Object(obj) => {
            let class = obj.borrow().class.clone();
            if let Some(_found) = class.find_method("__tostring") {
                let result = call_method(cx, Some(obj.clone()), &class, None, "__toString", &[], loc)?;
                match result {
                    Value::String(s) => Ok(s),
                    _ => Err(Flow::Fatal(Fatal::new(
                        FatalKind::BadOperation,
                        format!("Method {}::__toString() must return a string value", class.name),
                        loc.clone(),
                    ))),
                }
            } else {
                coerce_string(v).map_err(|msg| Flow::Fatal(Fatal::new(FatalKind::BadOperation, msg, loc.clone())))
            }
        }
        other => {
            coerce_string(other).map_err(|msg| Flow::Fatal(Fatal::new(FatalKind::BadOperation, msg, loc.clone())))
        }
    }
}

// --- assignment ---------------------------------------------------------

/// Stores `value` into the target lvalue, returning the stored value.
pub(crate) fn assign_into(cx: &mut Ctx<'_>, target: &Node, value: Value) -> RunResult<Value> {
    match &target.kind {
        NodeKind::Index { .. } => assign_index(cx, target, value),
        _ => {
            let cell = target.run_ref(cx)?;
            cell.set(value.clone());
            Ok(value)
        }
    }
}

fn assign_index(cx: &mut Ctx<'_>, target: &Node, value: Value) -> RunResult<Value> {
    // peel the index chain down to the non-index base
    let mut index_nodes: Vec<&Option<Box<Node>>> = Vec::new();
    let mut base = target;
    while let NodeKind::Index { base: b, index } = &base.kind {
        index_nodes.push(index);
        base = b;
    }
    index_nodes.reverse();

    // keys evaluate left to right, before the base is borrowed
    let mut keys: Vec<Option<Value>> = Vec::with_capacity(index_nodes.len());
    for index in index_nodes {
        keys.push(match index {
            Some(node) => {
                let k = node.run(cx)?;
                if matches!(k, Value::Array(_) | Value::Object(_)) {
                    cx.warn("Illegal offset type")?;
                    return Ok(Value::Null);
                }
                Some(k)
            }
            None => None,
        });
    }

    let cell = base.run_ref(cx)?;
    let mut slot = cell.borrow_mut();
    store_nested(cx, &mut slot, &keys, value)
}

fn store_nested(cx: &mut Ctx<'_>, slot: &mut Value, keys: &[Option<Value>], value: Value) -> RunResult<Value> {
    if slot.is_null() {
        *slot = Value::Array(Array::new());
    }
    let Value::Array(array) = slot else {
        cx.warn("Cannot use a scalar value as an array")?;
        return Ok(Value::Null);
    };
    let Some((first, rest)) = keys.split_first() else {
        return Ok(Value::Null);
    };
    let entry = match first {
        Some(k) => array.get_or_insert_null(Key::from_value(k)),
        None => array.append_slot(),
    };
    if rest.is_empty() {
        *entry = value.clone();
        Ok(value)
    } else {
        store_nested(cx, entry, rest, value)
    }
}

fn assign_ref(cx: &mut Ctx<'_>, target: &Node, value: &Node) -> RunResult<Value> {
    if !value.is_lvalue() {
        return Err(Flow::Fatal(Fatal::new(
            FatalKind::BadOperation,
            "Only variables can be assigned by reference",
            value.loc.clone(),
        )));
    }
    let cell = value.run_ref(cx)?;
    match &target.kind {
        NodeKind::Var(name) => cx.bind_var(name, cell.clone()),
        NodeKind::VarVar(inner) => {
            let name_value = inner.run(cx)?;
            let name = stringify(cx, &name_value, inner.loc())?.to_string_lossy();
            cx.bind_var(&name, cell.clone());
        }
        NodeKind::Prop { base, name } => {
            let name = prop_name(cx, name)?;
            match base_object_for_write(cx, base)? {
                Some(obj) => {
                    obj.borrow_mut().props.insert(Rc::from(name.as_str()), cell.clone());
                }
                None => {
                    cx.warn(&format!("Attempt to assign property '{name}' of non-object"))?;
                }
            }
        }
        NodeKind::StaticProp { class, name } => {
            let class = cx.get_class(class)?;
            // materialize, then rebind the slot to the shared cell
            class.static_cell(cx, name)?;
            class.statics.borrow_mut().insert(name.clone(), cell.clone());
        }
        _ => {
            cx.warn("Cannot assign by reference to this target; copying value")?;
            assign_into(cx, target, cell.get())?;
        }
    }
    Ok(cell.get())
}

/// Object behind a property write, auto-vivifying a null lvalue base into
/// a fresh `stdClass` the way property writes traditionally do.
fn base_object_for_write(cx: &mut Ctx<'_>, base: &Node) -> RunResult<Option<ObjRef>> {
    if base.is_lvalue() {
        let cell = base.run_ref(cx)?;
        let current = cell.get();
        match current {
            Value::Object(obj) => Ok(Some(obj)),
            Value::Null => {
                cx.warn("Creating default object from empty value")?;
                let class = cx
                    .get_class_quiet("stdClass")?
                    .ok_or_else(|| Flow::Fatal(Fatal::internal("stdClass not registered", cx.loc())))?;
                let obj = Instance::new(class).into_ref();
                cell.set(Value::Object(obj.clone()));
                Ok(Some(obj))
            }
            _ => Ok(None),
        }
    } else {
        match base.run(cx)? {
            Value::Object(obj) => Ok(Some(obj)),
            _ => Ok(None),
        }
    }
}

fn step_value(old: &Value, inc: bool) -> Value {
    match (old, inc) {
        (Value::Null, true) => Value::Int(1),
        (Value::Null, false) => Value::Null,
        (Value::Bool(_), _) => old.clone(),
        (Value::Int(i), true) => match i.checked_add(1) {
            Some(n) => Value::Int(n),
            None => Value::Float(*i as f64 + 1.0),
        },
        (Value::Int(i), false) => match i.checked_sub(1) {
            Some(n) => Value::Int(n),
            None => Value::Float(*i as f64 - 1.0),
        },
        (Value::Float(f), true) => Value::Float(f + 1.0),
        (Value::Float(f), false) => Value::Float(f - 1.0),
        (Value::String(s), _) => match numeric_str(s.as_bytes()) {
            Some(Num::Int(i)) => step_value(&Value::Int(i), inc),
            Some(Num::Float(f)) => step_value(&Value::Float(f), inc),
            None => old.clone(),
        },
        _ => old.clone(),
    }
}

// --- operators ----------------------------------------------------------

pub(crate) fn apply_binary(
    cx: &mut Ctx<'_>,
    op: BinaryOp,
    a: Value,
    b: Value,
    loc: &crate::location::Loc,
) -> RunResult<Value> {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Add => {
            if let (Value::Array(x), Value::Array(y)) = (&a, &b) {
                return Ok(Value::Array(x.union(y)));
            }
            arith(op, a, b)
        }
        BinaryOp::Sub | BinaryOp::Mul => arith(op, a, b),
        BinaryOp::Div => {
            let y = value::to_float(&b);
            if y == 0.0 {
                cx.warn("Division by zero")?;
                return Ok(Value::Bool(false));
            }
            // checked: i64::MIN / -1 overflows and must promote to float
            if let (Num::Int(x), Num::Int(y)) = (to_num(&a).0, to_num(&b).0)
                && y != 0
                && x.checked_rem(y) == Some(0)
                && let Some(q) = x.checked_div(y)
            {
                return Ok(Value::Int(q));
            }
            Ok(Value::Float(value::to_float(&a) / y))
        }
        BinaryOp::Mod => {
            let y = value::to_int(&b);
            if y == 0 {
                cx.warn("Division by zero")?;
                return Ok(Value::Bool(false));
            }
            Ok(Value::Int(value::to_int(&a).wrapping_rem(y)))
        }
        BinaryOp::Pow => {
            if let (Num::Int(x), Num::Int(y)) = (to_num(&a).0, to_num(&b).0)
                && y >= 0
            {
                if let Ok(exp) = u32::try_from(y)
                    && let Some(n) = x.checked_pow(exp)
                {
                    return Ok(Value::Int(n));
                }
            }
            Ok(Value::Float(value::to_float(&a).powf(value::to_float(&b))))
        }
        BinaryOp::Concat => {
            let left = stringify(cx, &a, loc)?;
            let right = stringify(cx, &b, loc)?;
            cx.mem_alloc(left.len() + right.len())?;
            let mut out = Vec::with_capacity(left.len() + right.len());
            out.extend_from_slice(left.as_bytes());
            out.extend_from_slice(right.as_bytes());
            Ok(Value::String(Rc::new(Str::from_bytes(out))))
        }
        BinaryOp::BitAnd => Ok(Value::Int(value::to_int(&a) & value::to_int(&b))),
        BinaryOp::BitOr => Ok(Value::Int(value::to_int(&a) | value::to_int(&b))),
        BinaryOp::BitXor => Ok(Value::Int(value::to_int(&a) ^ value::to_int(&b))),
        BinaryOp::Shl => {
            let count = value::to_int(&b);
            if count < 0 {
                return Err(arithmetic_error(cx, "Bit shift by negative number", loc));
            }
            Ok(Value::Int(match u32::try_from(count) {
                Ok(c) => value::to_int(&a).checked_shl(c).unwrap_or(0),
                Err(_) => 0,
            }))
        }
        BinaryOp::Shr => {
            let count = value::to_int(&b);
            if count < 0 {
                return Err(arithmetic_error(cx, "Bit shift by negative number", loc));
            }
            Ok(Value::Int(match u32::try_from(count) {
                Ok(c) => value::to_int(&a).checked_shr(c).unwrap_or(0),
                Err(_) => 0,
            }))
        }
        // short-circuit forms are handled by the caller; these are the
        // eager paths used by compound assignment
        BinaryOp::And => Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
        BinaryOp::Xor => Ok(Value::Bool(a.is_truthy() != b.is_truthy())),
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&a, &b))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(&a, &b))),
        BinaryOp::Identical => Ok(Value::Bool(strict_eq(&a, &b))),
        BinaryOp::NotIdentical => Ok(Value::Bool(!strict_eq(&a, &b))),
        BinaryOp::Lt => Ok(Value::Bool(value::compare(&a, &b) == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(value::compare(&a, &b) != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(value::compare(&a, &b) == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(value::compare(&a, &b) != Ordering::Less)),
        BinaryOp::Spaceship => Ok(Value::Int(match value::compare(&a, &b) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        })),
    }
}

/// Builds a thrown `ArithmeticError` without running a constructor; falls
/// back to a fatal if the class is somehow unavailable.
fn arithmetic_error(cx: &mut Ctx<'_>, message: &str, loc: &crate::location::Loc) -> Flow {
    let class = match cx.get_class_quiet("ArithmeticError") {
        Ok(Some(class)) => class,
        _ => return Flow::Fatal(Fatal::new(FatalKind::BadOperation, message.to_owned(), loc.clone())),
    };
    let mut instance = Instance::new(class);
    instance.props.insert(Rc::from("message"), Cell::new(Value::string(message)));
    instance.props.insert(Rc::from("code"), Cell::new(Value::Int(0)));
    instance
        .props
        .insert(Rc::from("file"), Cell::new(Value::string(&*loc.filename)));
    instance
        .props
        .insert(Rc::from("line"), Cell::new(Value::Int(i64::from(loc.line))));
    Flow::Throw(Thrown {
        value: Value::Object(instance.into_ref()),
        loc: loc.clone(),
    })
}

fn arith(op: BinaryOp, a: Value, b: Value) -> RunResult<Value> {
    let (x, y) = (to_num(&a).0, to_num(&b).0);
    Ok(match (x, y) {
        (Num::Int(x), Num::Int(y)) => {
            let checked = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                _ => unreachable!("arith only handles add/sub/mul"),
            };
            match checked {
                Some(n) => Value::Int(n),
                // integer overflow promotes to float
                None => Value::Float(apply_float(op, x as f64, y as f64)),
            }
        }
        (x, y) => Value::Float(apply_float(op, x.to_f64(), y.to_f64())),
    })
}

fn apply_float(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => unreachable!("arith only handles add/sub/mul"),
    }
}

fn cast_value(cx: &mut Ctx<'_>, kind: CastKind, v: Value, loc: &crate::location::Loc) -> RunResult<Value> {
    Ok(match kind {
        CastKind::Int => Value::Int(value::to_int(&v)),
        CastKind::Float => Value::Float(value::to_float(&v)),
        CastKind::Bool => Value::Bool(v.is_truthy()),
        CastKind::String => Value::String(stringify(cx, &v, loc)?),
        CastKind::Array => match v {
            Value::Null => Value::Array(Array::new()),
            Value::Array(_) => v,
            Value::Object(obj) => {
                let mut array = Array::new();
                for (name, cell) in &obj.borrow().props {
                    array.set(Key::from_str_key(Rc::new(Str::from(&**name))), cell.get());
                }
                Value::Array(array)
            }
            scalar => {
                let mut array = Array::new();
                array.append(scalar);
                Value::Array(array)
            }
        },
        CastKind::Object => match v {
            Value::Object(_) => v,
            other => {
                let class = cx
                    .get_class_quiet("stdClass")?
                    .ok_or_else(|| Flow::Fatal(Fatal::internal("stdClass not registered", loc.clone())))?;
                let mut instance = Instance::new(class);
                match other {
                    Value::Array(array) => {
                        for (key, value) in array.iter() {
                            instance.props.insert(Rc::from(key.to_string()), Cell::new(value.clone()));
                        }
                    }
                    Value::Null => {}
                    scalar => {
                        instance.props.insert(Rc::from("scalar"), Cell::new(scalar));
                    }
                }
                Value::Object(instance.into_ref())
            }
        },
    })
}

// --- isset / unset ------------------------------------------------------

/// Evaluates a node the way `isset` does: no undefined notices, `None` when
/// the storage location does not exist.
fn isset_value(cx: &mut Ctx<'_>, node: &Node) -> RunResult<Option<Value>> {
    match &node.kind {
        NodeKind::Var(name) => Ok(cx.lookup_var(name).map(|c| c.get())),
        NodeKind::VarVar(inner) => {
            let name_value = inner.run(cx)?;
            let name = stringify(cx, &name_value, inner.loc())?.to_string_lossy();
            Ok(cx.lookup_var(&name).map(|c| c.get()))
        }
        NodeKind::Index { base, index } => {
            let Some(base_value) = isset_value(cx, base)? else {
                return Ok(None);
            };
            let Some(index) = index else {
                return Ok(None);
            };
            let key_value = index.run(cx)?;
            match base_value {
                Value::Array(array) => Ok(array.get(&Key::from_value(&key_value)).cloned()),
                Value::String(s) => {
                    let idx = value::to_int(&key_value);
                    if idx >= 0 && (idx as usize) < s.len() {
                        Ok(Some(Value::String(Rc::new(Str::from_bytes(vec![
                            s.as_bytes()[idx as usize],
                        ])))))
                    } else {
                        Ok(None)
                    }
                }
                _ => Ok(None),
            }
        }
        NodeKind::Prop { base, name } => {
            let Some(base_value) = isset_value(cx, base)? else {
                return Ok(None);
            };
            let name = prop_name(cx, name)?;
            match base_value {
                Value::Object(obj) => Ok(obj.borrow().prop(&name).map(|c| c.get())),
                _ => Ok(None),
            }
        }
        NodeKind::StaticProp { class, name } => {
            let Some(class) = cx.get_class_quiet(class)? else {
                return Ok(None);
            };
            Ok(class.static_cell(cx, name)?.map(|c| c.get()))
        }
        _ => Ok(Some(node.run(cx)?)),
    }
}

fn unset_target(cx: &mut Ctx<'_>, target: &Node) -> RunResult<()> {
    match &target.kind {
        NodeKind::Var(name) => {
            cx.unset_var(name);
            Ok(())
        }
        NodeKind::VarVar(inner) => {
            let name_value = inner.run(cx)?;
            let name = stringify(cx, &name_value, inner.loc())?.to_string_lossy();
            cx.unset_var(&name);
            Ok(())
        }
        NodeKind::Index { base, index } => {
            let Some(index) = index else {
                return Err(Flow::Fatal(Fatal::new(
                    FatalKind::BadOperation,
                    "Cannot unset [] target",
                    target.loc.clone(),
                )));
            };
            let key_value = index.run(cx)?;
            if !base.is_lvalue() {
                return Ok(());
            }
            let cell = base.run_ref(cx)?;
            let mut slot = cell.borrow_mut();
            if let Value::Array(array) = &mut *slot {
                array.remove(&Key::from_value(&key_value));
            }
            Ok(())
        }
        NodeKind::Prop { base, name } => {
            let name = prop_name(cx, name)?;
            if let Value::Object(obj) = base.run(cx)? {
                obj.borrow_mut().props.shift_remove(name.as_str());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

// --- foreach ------------------------------------------------------------

fn run_foreach(
    cx: &mut Ctx<'_>,
    subject: &Node,
    key: Option<&Node>,
    value: &Node,
    by_ref: bool,
    body: &Node,
    loc: &crate::location::Loc,
) -> RunResult<Value> {
    // by-reference iteration writes each element back through the subject
    let subject_cell = if by_ref && subject.is_lvalue() {
        Some(subject.run_ref(cx)?)
    } else {
        None
    };
    let snapshot: Vec<(Value, Value)> = match subject.run(cx)? {
        Value::Array(array) => array.iter().map(|(k, v)| (k.to_value(), v.clone())).collect(),
        Value::Object(obj) => obj
            .borrow()
            .props
            .iter()
            .map(|(name, cell)| (Value::string(&**name), cell.get()))
            .collect(),
        _ => {
            cx.warn("Invalid argument supplied for foreach()")?;
            return Ok(Value::Null);
        }
    };

    for (k, v) in snapshot {
        cx.tick(loc)?;
        if let Some(key_target) = key {
            assign_into(cx, key_target, k.clone())?;
        }
        assign_into(cx, value, v)?;
        let step = run_loop_body(cx, body);
        // write the (possibly modified) element back for by-ref iteration
        if let Some(cell) = &subject_cell
            && let Some(modified) = isset_value(cx, value)?
        {
            let mut slot = cell.borrow_mut();
            if let Value::Array(array) = &mut *slot {
                array.set(Key::from_value(&k), modified);
            }
        }
        match step {
            LoopStep::Normal => {}
            LoopStep::Stop => break,
            LoopStep::Signal(flow) => return Err(flow),
        }
    }
    Ok(Value::Null)
}

// --- try / catch --------------------------------------------------------

fn run_try(
    cx: &mut Ctx<'_>,
    body: &[Node],
    catches: &[crate::node::CatchClause],
    finally: Option<&[Node]>,
) -> RunResult<Value> {
    let outcome = match run_stmts(cx, body) {
        Err(Flow::Throw(thrown)) => {
            let mut matched = None;
            if let Value::Object(obj) = &thrown.value {
                let class = obj.borrow().class.clone();
                'clauses: for clause in catches {
                    for class_name in &clause.class_names {
                        if let Some(handler_class) = cx.get_class_quiet(class_name)?
                            && class.instance_of(&handler_class)
                        {
                            matched = Some(clause);
                            break 'clauses;
                        }
                    }
                }
            }
            match matched {
                Some(clause) => {
                    cx.var_or_create(&clause.var).set(thrown.value);
                    run_stmts(cx, &clause.body)
                }
                None => Err(Flow::Throw(thrown)),
            }
        }
        other => other,
    };

    if let Some(finally_body) = finally {
        // a signal raised by finally supersedes the protected outcome
        run_stmts(cx, finally_body)?;
    }
    outcome
}

// --- declarations -------------------------------------------------------

/// Executes a function declaration: registers the function eagerly. Shared
/// by program-order execution and lazy resolution; the tombstone flag makes
/// whichever happens second a no-op.
pub(crate) fn declare_function(cx: &mut Ctx<'_>, decl: &Rc<FuncDeclStmt>) -> RunResult<Value> {
    if *decl.executed.borrow() {
        return Ok(Value::Null);
    }
    *decl.executed.borrow_mut() = true;
    cx.global
        .register_function(&decl.name, Callable::Php(decl.func.clone()))
        .map_err(Flow::Fatal)?;
    Ok(Value::Null)
}

/// Executes a class declaration: resolves the parent and interfaces
/// (possibly triggering their own lazy declarations), binds method
/// back-references, registers the class.
pub(crate) fn declare_class(cx: &mut Ctx<'_>, decl: &Rc<ClassDeclStmt>) -> RunResult<Value> {
    if *decl.executed.borrow() {
        return Ok(Value::Null);
    }
    *decl.executed.borrow_mut() = true;

    let class = &decl.class;
    if let Some(parent_name) = &class.parent_name {
        let parent = cx.get_class(parent_name)?;
        *class.parent.borrow_mut() = Some(parent);
    }
    let mut interfaces = Vec::with_capacity(class.interface_names.len());
    for interface_name in &class.interface_names {
        interfaces.push(cx.get_class(interface_name)?);
    }
    *class.interfaces.borrow_mut() = interfaces;

    for method in class.methods.values() {
        if let MethodBody::Php(func) = &method.body {
            func.bind_class(class);
        }
    }

    cx.global.register_class(class.clone()).map_err(Flow::Fatal)?;
    Ok(Value::Null)
}

// --- calls --------------------------------------------------------------

pub(crate) fn call_callable(
    cx: &mut Ctx<'_>,
    callable: &Callable,
    arg_nodes: &[Node],
    this: Option<ObjRef>,
    scope_class: Option<Rc<Class>>,
    called_class: Option<Rc<Class>>,
    display_name: &str,
) -> RunResult<Value> {
    match callable {
        Callable::Php(func) => call_php(
            cx,
            func,
            arg_nodes,
            Vec::new(),
            this,
            scope_class,
            called_class,
            display_name,
        ),
        Callable::Native(ext) => {
            let mut slots = Vec::with_capacity(arg_nodes.len());
            for (i, node) in arg_nodes.iter().enumerate() {
                let by_ref = ext.args.get(i).is_some_and(|spec| spec.by_ref);
                if by_ref && node.is_lvalue() {
                    slots.push(ArgSlot::Cell(node.run_ref(cx)?));
                } else {
                    slots.push(ArgSlot::Value(node.run(cx)?));
                }
            }
            let mut frame = Frame::new(Rc::from(display_name));
            frame.this = this;
            frame.class = scope_class;
            frame.called_class = called_class;
            let mut sub = Ctx {
                global: &mut *cx.global,
                frame: Some(&mut frame),
            };
            (ext.handler)(&mut sub, Args::new(slots))
        }
    }
}

/// Calls a compiled function: binds parameters (with by-reference and
/// variadic handling), pushes a frame, consumes `Return`.
#[expect(clippy::too_many_arguments, reason = "call sites differ in every dimension of scope")]
pub(crate) fn call_php(
    cx: &mut Ctx<'_>,
    func: &Rc<PhpFunction>,
    arg_nodes: &[Node],
    prebound: Vec<(Rc<str>, Cell)>,
    this: Option<ObjRef>,
    scope_class: Option<Rc<Class>>,
    called_class: Option<Rc<Class>>,
    display_name: &str,
) -> RunResult<Value> {
    cx.global
        .meter()
        .check_call_depth(cx.global.call_depth)
        .map_err(|e| Flow::Fatal(e.into_fatal(cx.loc())))?;

    let mut bound: Vec<(Rc<str>, Cell)> = prebound;
    let mut consumed = 0usize;
    for param in &func.params {
        if param.variadic {
            let mut rest = Array::new();
            for node in &arg_nodes[consumed.min(arg_nodes.len())..] {
                rest.append(node.run(cx)?);
            }
            consumed = arg_nodes.len();
            bound.push((param.name.clone(), Cell::new(Value::Array(rest))));
            break;
        }
        match arg_nodes.get(consumed) {
            Some(node) => {
                consumed += 1;
                if param.by_ref && node.is_lvalue() {
                    bound.push((param.name.clone(), node.run_ref(cx)?));
                } else {
                    let v = node.run(cx)?;
                    bound.push((param.name.clone(), Cell::new(v)));
                }
            }
            None => {
                let v = match &param.default {
                    Some(delayed) => delayed.resolve(cx)?,
                    None => {
                        cx.warn(&format!(
                            "Missing argument ${} for {display_name}()",
                            param.name
                        ))?;
                        Value::Null
                    }
                };
                bound.push((param.name.clone(), Cell::new(v)));
            }
        }
    }
    // surplus arguments still evaluate for their side effects
    for node in &arg_nodes[consumed.min(arg_nodes.len())..] {
        node.run(cx)?;
    }

    let mut frame = Frame::new(Rc::from(display_name));
    for (name, cell) in bound {
        frame.vars.insert(name, cell);
    }
    frame.this = this;
    frame.class = scope_class.or_else(|| func.owning_class());
    frame.called_class = called_class;
    frame.function = Some(func.clone());

    cx.global.call_depth += 1;
    let result = {
        let mut sub = Ctx {
            global: &mut *cx.global,
            frame: Some(&mut frame),
        };
        run_stmts(&mut sub, &func.body)
    };
    cx.global.call_depth -= 1;

    match result {
        Ok(_) => Ok(Value::Null),
        Err(Flow::Return(v)) => Ok(v),
        Err(Flow::Break(_) | Flow::Continue(_)) => Err(Flow::Fatal(Fatal::internal(
            "break/continue escaped a function body",
            cx.loc(),
        ))),
        Err(flow) => Err(flow),
    }
}

/// Method dispatch: case-insensitive lookup from `start` up the ancestor
/// chain, then the usual scope wiring for late static binding.
pub(crate) fn call_method(
    cx: &mut Ctx<'_>,
    this: Option<ObjRef>,
    start: &Rc<Class>,
    called_class: Option<Rc<Class>>,
    name: &str,
    arg_nodes: &[Node],
    loc: &crate::location::Loc,
) -> RunResult<Value> {
    let Some((defining, method)) = start.find_method(&name.to_ascii_lowercase()) else {
        return Err(Flow::Fatal(Fatal::new(
            FatalKind::BadOperation,
            format!("Call to undefined method {}::{name}()", start.name),
            loc.clone(),
        )));
    };
    dispatch_method(cx, this, start, called_class, &defining, &method, arg_nodes)
}

fn dispatch_method(
    cx: &mut Ctx<'_>,
    this: Option<ObjRef>,
    start: &Rc<Class>,
    called_class: Option<Rc<Class>>,
    defining: &Rc<Class>,
    method: &Rc<Method>,
    arg_nodes: &[Node],
) -> RunResult<Value> {
    let this = if method.modifiers.is_static { None } else { this };
    let called = called_class.or_else(|| {
        this.as_ref()
            .map(|obj| obj.borrow().class.clone())
            .or_else(|| Some(start.clone()))
    });
    let display = format!("{}::{}", defining.name, method.name);
    match &method.body {
        MethodBody::Php(func) => call_php(
            cx,
            func,
            arg_nodes,
            Vec::new(),
            this,
            Some(defining.clone()),
            called,
            &display,
        ),
        MethodBody::Native(handler) => {
            let mut slots = Vec::with_capacity(arg_nodes.len());
            for node in arg_nodes {
                slots.push(ArgSlot::Value(node.run(cx)?));
            }
            let mut frame = Frame::new(Rc::from(display.as_str()));
            frame.this = this;
            frame.class = Some(defining.clone());
            frame.called_class = called;
            let mut sub = Ctx {
                global: &mut *cx.global,
                frame: Some(&mut frame),
            };
            handler(&mut sub, Args::new(slots))
        }
    }
}

fn call_object(cx: &mut Ctx<'_>, obj: &ObjRef, arg_nodes: &[Node], loc: &crate::location::Loc) -> RunResult<Value> {
    let closure = object::closure_state(obj).map(|state| {
        (
            state.func.clone(),
            state.captures.clone(),
            state.this.clone(),
            state.scope.clone(),
        )
    });
    if let Some((func, captures, this, scope)) = closure {
        let called = this.as_ref().map(|o| o.borrow().class.clone());
        return call_php(cx, &func, arg_nodes, captures, this, scope, called, "{closure}");
    }
    let class = obj.borrow().class.clone();
    if class.find_method("__invoke").is_some() {
        return call_method(cx, Some(obj.clone()), &class, None, "__invoke", arg_nodes, loc);
    }
    Err(Flow::Fatal(Fatal::new(
        FatalKind::BadOperation,
        format!("Object of class {} is not callable", class.name),
        loc.clone(),
    )))
}

fn make_closure(cx: &mut Ctx<'_>, func: &Rc<PhpFunction>, uses: &[CaptureSpec]) -> RunResult<Value> {
    let mut captures = Vec::with_capacity(uses.len());
    for capture in uses {
        let cell = if capture.by_ref {
            cx.var_or_create(&capture.name)
        } else {
            let current = cx
                .lookup_var(&capture.name)
                .map_or(Value::Null, |c| c.get());
            Cell::new(current)
        };
        captures.push((capture.name.clone(), cell));
    }
    let class = cx
        .get_class_quiet("Closure")?
        .ok_or_else(|| Flow::Fatal(Fatal::internal("Closure class not registered", cx.loc())))?;
    let mut instance = Instance::new(class);
    instance.attached = Some(Box::new(ClosureState {
        func: func.clone(),
        captures,
        this: cx.this(),
        scope: cx.scope_class(),
    }));
    Ok(Value::Object(instance.into_ref()))
}

// --- instantiation ------------------------------------------------------

fn resolve_class_target(cx: &mut Ctx<'_>, target: &ClassTarget, loc: &crate::location::Loc) -> RunResult<Rc<Class>> {
    match target {
        ClassTarget::Name(name) => cx.get_class(name),
        ClassTarget::Expr(node) => match node.run(cx)? {
            Value::String(s) => cx.get_class(&s.to_string_lossy()),
            Value::Object(obj) => Ok(obj.borrow().class.clone()),
            other => Err(Flow::Fatal(Fatal::new(
                FatalKind::BadOperation,
                format!("Cannot instantiate from a value of type {}", other.type_name()),
                loc.clone(),
            ))),
        },
    }
}

/// Instantiates a class: ancestor property defaults root to leaf in
/// declaration order, then the constructor.
pub(crate) fn instantiate(
    cx: &mut Ctx<'_>,
    class: &Rc<Class>,
    arg_nodes: &[Node],
    loc: &crate::location::Loc,
) -> RunResult<Value> {
    if class.kind != ClassKind::Class {
        return Err(Flow::Fatal(Fatal::new(
            FatalKind::BadOperation,
            format!("Cannot instantiate {} {}", class.kind, class.name),
            loc.clone(),
        )));
    }
    if class.modifiers.is_abstract {
        return Err(Flow::Fatal(Fatal::new(
            FatalKind::BadOperation,
            format!("Cannot instantiate abstract class {}", class.name),
            loc.clone(),
        )));
    }

    let mut instance = Instance::new(class.clone());
    for ancestor in class.lineage() {
        for prop in &ancestor.props {
            if prop.modifiers.is_static {
                continue;
            }
            let v = match &prop.default {
                Some(delayed) => delayed.resolve(cx)?,
                None => Value::Null,
            };
            instance.props.insert(prop.name.clone(), Cell::new(v));
        }
    }
    cx.mem_alloc(64 + instance.props.len() * 48)?;
    let obj = instance.into_ref();

    if let Some((defining, ctor)) = class.find_constructor() {
        dispatch_method(
            cx,
            Some(obj.clone()),
            class,
            Some(class.clone()),
            &defining,
            &ctor,
            arg_nodes,
        )?;
    }
    Ok(Value::Object(obj))
}

// --- include / require --------------------------------------------------

pub(crate) fn include_file(
    cx: &mut Ctx<'_>,
    kind: IncludeKind,
    path: &str,
    loc: &crate::location::Loc,
) -> RunResult<Value> {
    let loaded = cx.global.load_script(path);
    let (canonical, script) = match loaded {
        Ok(ok) => ok,
        Err(LoadError::Io(e)) => {
            if kind.is_required() {
                return Err(Flow::Fatal(Fatal::new(
                    FatalKind::RequireFailed,
                    format!("{}(): Failed opening required '{path}' ({e})", kind.keyword()),
                    loc.clone(),
                )));
            }
            cx.warn(&format!("{}({path}): failed to open stream: {e}", kind.keyword()))?;
            return Ok(Value::Bool(false));
        }
        Err(LoadError::Script(e)) => return Err(Flow::Fatal(Fatal::from(e))),
    };

    if kind.is_once() && cx.global.was_included(&canonical) {
        return Ok(Value::Bool(true));
    }
    cx.global.mark_included(canonical);
    cx.global.register_lazy(&script);

    match run_script(cx, &script.stmts) {
        Ok(_) => Ok(Value::Int(1)),
        // a top-level return becomes the include expression's value
        Err(Flow::Return(v)) => Ok(v),
        Err(flow) => Err(flow),
    }
}

/// Converts an escaped throwable into the host-facing uncaught error.
#[must_use]
pub(crate) fn uncaught(thrown: Thrown) -> RequestError {
    let (class_name, message) = match &thrown.value {
        Value::Object(obj) => (
            obj.borrow().class.name.to_string(),
            object::string_prop(obj, "message").unwrap_or_default(),
        ),
        other => (other.type_name().to_owned(), String::new()),
    };
    RequestError::Uncaught {
        class_name,
        message,
        loc: thrown.loc,
    }
}
