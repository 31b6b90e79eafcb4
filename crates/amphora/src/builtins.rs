//! The `core` extension: base classes (`stdClass`, `Exception`, `Closure`)
//! and a small set of native functions. These exist to exercise the
//! extension surface the same way external extensions would use it — they
//! register through the process-wide catalog and are copied into every
//! Global at construction.

use std::{rc::Rc, sync::Once};

use indexmap::IndexMap;

use crate::{
    array::Key,
    class::{Class, ClassKind, Delayed, MemberModifiers, Method, MethodBody},
    context::Ctx,
    error::{Fatal, FatalKind, Flow, RunResult},
    extension::{ArgSpec, ConstVal, Ext, ExtFunction, register_ext},
    function::Args,
    location::Loc,
    value::{Str, Value, coerce_string},
};

static INIT: Once = Once::new();

const ARGS_VALUE: [ArgSpec; 1] = [ArgSpec::required("value")];
const ARGS_STRING: [ArgSpec; 1] = [ArgSpec::required("string")];
const ARGS_NAME: [ArgSpec; 1] = [ArgSpec::required("name")];
const ARGS_NAME_VALUE: [ArgSpec; 2] = [ArgSpec::required("name"), ArgSpec::required("value")];
const ARGS_OBJECT_OPT: [ArgSpec; 1] = [ArgSpec::optional("object")];

/// Registers the core extension exactly once per process.
pub(crate) fn ensure_registered() {
    INIT.call_once(|| {
        register_ext(Ext {
            name: "core",
            version: env!("CARGO_PKG_VERSION"),
            functions: vec![
                ("count", ExtFunction { handler: fn_count, args: &ARGS_VALUE }),
                ("strlen", ExtFunction { handler: fn_strlen, args: &ARGS_STRING }),
                ("gettype", ExtFunction { handler: fn_gettype, args: &ARGS_VALUE }),
                ("var_dump", ExtFunction { handler: fn_var_dump, args: &[] }),
                ("define", ExtFunction {
                    handler: fn_define,
                    args: &ARGS_NAME_VALUE,
                }),
                ("defined", ExtFunction { handler: fn_defined, args: &ARGS_NAME }),
                ("function_exists", ExtFunction { handler: fn_function_exists, args: &ARGS_NAME }),
                ("class_exists", ExtFunction { handler: fn_class_exists, args: &ARGS_NAME }),
                ("get_class", ExtFunction { handler: fn_get_class, args: &ARGS_OBJECT_OPT }),
                ("is_array", ExtFunction { handler: fn_is_array, args: &ARGS_VALUE }),
                ("is_string", ExtFunction { handler: fn_is_string, args: &ARGS_VALUE }),
                ("is_int", ExtFunction { handler: fn_is_int, args: &ARGS_VALUE }),
                ("is_float", ExtFunction { handler: fn_is_float, args: &ARGS_VALUE }),
                ("is_bool", ExtFunction { handler: fn_is_bool, args: &ARGS_VALUE }),
                ("is_null", ExtFunction { handler: fn_is_null, args: &ARGS_VALUE }),
                ("is_object", ExtFunction { handler: fn_is_object, args: &ARGS_VALUE }),
                ("is_numeric", ExtFunction { handler: fn_is_numeric, args: &ARGS_VALUE }),
                ("ob_start", ExtFunction { handler: fn_ob_start, args: &[] }),
                ("ob_end_flush", ExtFunction { handler: fn_ob_end_flush, args: &[] }),
                ("ob_end_clean", ExtFunction { handler: fn_ob_end_clean, args: &[] }),
                ("ob_get_clean", ExtFunction { handler: fn_ob_get_clean, args: &[] }),
                ("ob_get_contents", ExtFunction { handler: fn_ob_get_contents, args: &[] }),
                ("ob_get_level", ExtFunction { handler: fn_ob_get_level, args: &[] }),
                ("ini_set", ExtFunction {
                    handler: fn_ini_set,
                    args: &ARGS_NAME_VALUE,
                }),
                ("ini_get", ExtFunction { handler: fn_ini_get, args: &ARGS_NAME }),
            ],
            classes: vec![
                build_std_class,
                build_exception,
                build_arithmetic_error,
                build_runtime_exception,
                build_logic_exception,
                build_closure,
            ],
            constants: vec![
                ("PHP_EOL", ConstVal::Str("\n")),
                ("PHP_INT_MAX", ConstVal::Int(i64::MAX)),
                ("PHP_INT_MIN", ConstVal::Int(i64::MIN)),
                ("PHP_INT_SIZE", ConstVal::Int(8)),
                ("PHP_FLOAT_EPSILON", ConstVal::Float(f64::EPSILON)),
                ("PHP_VERSION", ConstVal::Str("7.3.0")),
                ("DIRECTORY_SEPARATOR", ConstVal::Str("/")),
                ("M_PI", ConstVal::Float(std::f64::consts::PI)),
            ],
        });
    });
}

// --- base classes -------------------------------------------------------

fn build_std_class() -> Class {
    Class::new(Rc::from("stdClass"), ClassKind::Class, Loc::unknown())
}

fn build_closure() -> Class {
    Class::new(Rc::from("Closure"), ClassKind::Class, Loc::unknown())
}

fn native_method(name: &str, handler: crate::extension::NativeHandler) -> (Rc<str>, Rc<Method>) {
    (
        Rc::from(name.to_ascii_lowercase().as_str()),
        Rc::new(Method {
            name: Rc::from(name),
            modifiers: MemberModifiers::default(),
            body: MethodBody::Native(handler),
        }),
    )
}

/// Shared shape of the throwable base classes: message/code/file/line
/// properties plus the accessor methods and constructor.
fn build_throwable(name: &'static str) -> Class {
    let mut class = Class::new(Rc::from(name), ClassKind::Class, Loc::unknown());
    for (name, default) in [
        ("message", Value::string("")),
        ("code", Value::Int(0)),
        ("file", Value::string("")),
        ("line", Value::Int(0)),
    ] {
        class.props.push(crate::class::Prop {
            name: Rc::from(name),
            modifiers: MemberModifiers {
                visibility: crate::class::Visibility::Protected,
                ..MemberModifiers::default()
            },
            default: Some(Rc::new(Delayed::of_value(default))),
        });
    }
    let mut methods: IndexMap<Rc<str>, Rc<Method>, ahash::RandomState> = IndexMap::default();
    for (key, method) in [
        native_method("__construct", exception_construct),
        native_method("getMessage", exception_get_message),
        native_method("getCode", exception_get_code),
        native_method("getFile", exception_get_file),
        native_method("getLine", exception_get_line),
    ] {
        methods.insert(key, method);
    }
    class.constructor = methods.get("__construct").cloned();
    class.methods = methods;
    class
}

fn build_exception() -> Class {
    build_throwable("Exception")
}

/// Standalone like the language's Error branch: `catch (Exception $e)`
/// does not intercept it.
fn build_arithmetic_error() -> Class {
    build_throwable("ArithmeticError")
}

fn build_runtime_exception() -> Class {
    let mut class = Class::new(Rc::from("RuntimeException"), ClassKind::Class, Loc::unknown());
    class.parent_name = Some(Rc::from("Exception"));
    class
}

fn build_logic_exception() -> Class {
    let mut class = Class::new(Rc::from("LogicException"), ClassKind::Class, Loc::unknown());
    class.parent_name = Some(Rc::from("Exception"));
    class
}

fn this_or_fatal(cx: &Ctx<'_>, method: &str) -> RunResult<crate::object::ObjRef> {
    cx.this().ok_or_else(|| {
        Flow::Fatal(Fatal::new(
            FatalKind::ScopeError,
            format!("{method}() called outside object context"),
            cx.loc(),
        ))
    })
}

fn exception_construct(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    let this = this_or_fatal(cx, "Exception::__construct")?;
    let message = match args.get(0) {
        Some(v) => Value::String(coerce_string(&v).map_err(|m| Flow::Fatal(Fatal::new(FatalKind::BadOperation, m, cx.loc())))?),
        None => Value::string(""),
    };
    let code = args.get(1).map_or(Value::Int(0), |v| Value::Int(crate::value::to_int(&v)));
    let loc = cx.loc();
    {
        let mut instance = this.borrow_mut();
        instance.prop_or_create("message").set(message);
        instance.prop_or_create("code").set(code);
        instance
            .prop_or_create("file")
            .set(Value::string(&*loc.filename));
        instance.prop_or_create("line").set(Value::Int(i64::from(loc.line)));
    }
    Ok(Value::Null)
}

fn exception_prop(cx: &mut Ctx<'_>, method: &str, prop: &str) -> RunResult<Value> {
    let this = this_or_fatal(cx, method)?;
    let value = this.borrow().prop(prop).map_or(Value::Null, |cell| cell.get());
    Ok(value)
}

fn exception_get_message(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    exception_prop(cx, "Exception::getMessage", "message")
}

fn exception_get_code(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    exception_prop(cx, "Exception::getCode", "code")
}

fn exception_get_file(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    exception_prop(cx, "Exception::getFile", "file")
}

fn exception_get_line(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    exception_prop(cx, "Exception::getLine", "line")
}

// --- functions ----------------------------------------------------------

fn arg_or_warn(cx: &mut Ctx<'_>, args: &Args, index: usize, func: &str) -> RunResult<Option<Value>> {
    match args.get(index) {
        Some(v) => Ok(Some(v)),
        None => {
            cx.warn(&format!("{func}() expects at least {} parameter(s)", index + 1))?;
            Ok(None)
        }
    }
}

fn fn_count(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "count")? {
        Some(Value::Array(a)) => Ok(Value::Int(a.len() as i64)),
        Some(Value::Null) => Ok(Value::Int(0)),
        Some(_) => Ok(Value::Int(1)),
        None => Ok(Value::Null),
    }
}

fn fn_strlen(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "strlen")? {
        Some(v) => match coerce_string(&v) {
            Ok(s) => Ok(Value::Int(s.len() as i64)),
            Err(_) => {
                cx.warn("strlen() expects parameter 1 to be string")?;
                Ok(Value::Null)
            }
        },
        None => Ok(Value::Null),
    }
}

fn fn_gettype(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "gettype")? {
        Some(v) => Ok(Value::string(v.type_name())),
        None => Ok(Value::Null),
    }
}

fn fn_var_dump(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    for i in 0..args.len() {
        if let Some(v) = args.get(i) {
            dump_value(cx, &v, 0)?;
        }
    }
    Ok(Value::Null)
}

fn dump_value(cx: &mut Ctx<'_>, v: &Value, depth: usize) -> RunResult<()> {
    let indent = "  ".repeat(depth);
    let line = match v {
        Value::Null => format!("{indent}NULL\n"),
        Value::Bool(b) => format!("{indent}bool({b})\n"),
        Value::Int(i) => format!("{indent}int({i})\n"),
        Value::Float(f) => format!("{indent}float({})\n", crate::value::format_float(*f)),
        Value::String(s) => format!("{indent}string({}) \"{}\"\n", s.len(), s.to_string_lossy()),
        Value::Resource(r) => format!("{indent}resource({}) of type ({})\n", r.id, r.kind),
        Value::Array(array) => {
            cx.write(format!("{indent}array({}) {{\n", array.len()).as_bytes())?;
            let entries: Vec<(Key, Value)> = array.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (key, value) in entries {
                let shown = match &key {
                    Key::Int(i) => format!("{indent}  [{i}]=>\n"),
                    Key::Str(s) => format!("{indent}  [\"{s}\"]=>\n"),
                };
                cx.write(shown.as_bytes())?;
                dump_value(cx, &value, depth + 1)?;
            }
            cx.write(format!("{indent}}}\n").as_bytes())?;
            return Ok(());
        }
        Value::Object(obj) => {
            let (class_name, props): (String, Vec<(Rc<str>, Value)>) = {
                let instance = obj.borrow();
                (
                    instance.class.name.to_string(),
                    instance.props.iter().map(|(n, c)| (n.clone(), c.get())).collect(),
                )
            };
            cx.write(format!("{indent}object({class_name}) ({}) {{\n", props.len()).as_bytes())?;
            for (name, value) in props {
                cx.write(format!("{indent}  [\"{name}\"]=>\n").as_bytes())?;
                dump_value(cx, &value, depth + 1)?;
            }
            cx.write(format!("{indent}}}\n").as_bytes())?;
            return Ok(());
        }
    };
    cx.write(line.as_bytes())
}

fn fn_define(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    let Some(name) = arg_or_warn(cx, &args, 0, "define")? else {
        return Ok(Value::Bool(false));
    };
    let Some(value) = arg_or_warn(cx, &args, 1, "define")? else {
        return Ok(Value::Bool(false));
    };
    let name = match coerce_string(&name) {
        Ok(s) => s.to_string_lossy(),
        Err(_) => return Ok(Value::Bool(false)),
    };
    if cx.global.define_constant(&name, value) {
        Ok(Value::Bool(true))
    } else {
        cx.notice(&format!("Constant {name} already defined"))?;
        Ok(Value::Bool(false))
    }
}

fn fn_defined(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "defined")? {
        Some(v) => {
            let name = coerce_string(&v).map(|s| s.to_string_lossy()).unwrap_or_default();
            Ok(Value::Bool(cx.global.constant_defined(&name)))
        }
        None => Ok(Value::Bool(false)),
    }
}

fn fn_function_exists(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "function_exists")? {
        Some(v) => {
            let name = coerce_string(&v).map(|s| s.to_string_lossy()).unwrap_or_default();
            Ok(Value::Bool(cx.global.function_exists(&name.to_ascii_lowercase())))
        }
        None => Ok(Value::Bool(false)),
    }
}

fn fn_class_exists(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "class_exists")? {
        Some(v) => {
            let name = coerce_string(&v).map(|s| s.to_string_lossy()).unwrap_or_default();
            Ok(Value::Bool(cx.global.class_exists(&name.to_ascii_lowercase())))
        }
        None => Ok(Value::Bool(false)),
    }
}

fn fn_get_class(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match args.get(0) {
        Some(Value::Object(obj)) => Ok(Value::string(&*obj.borrow().class.name)),
        Some(_) => {
            cx.warn("get_class() expects parameter 1 to be object")?;
            Ok(Value::Bool(false))
        }
        None => match cx.scope_class() {
            Some(class) => Ok(Value::string(&*class.name)),
            None => {
                cx.warn("get_class() called without object from outside a class")?;
                Ok(Value::Bool(false))
            }
        },
    }
}

fn fn_is_array(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Array(_)))))
}

fn fn_is_string(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::String(_)))))
}

fn fn_is_int(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Int(_)))))
}

fn fn_is_float(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Float(_)))))
}

fn fn_is_bool(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Bool(_)))))
}

fn fn_is_null(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Null))))
}

fn fn_is_object(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args.get(0), Some(Value::Object(_)))))
}

fn fn_is_numeric(_cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    Ok(Value::Bool(match args.get(0) {
        Some(Value::Int(_) | Value::Float(_)) => true,
        Some(Value::String(s)) => crate::value::numeric_str(s.as_bytes()).is_some(),
        _ => false,
    }))
}

// --- output buffer controls ---------------------------------------------

fn output_fatal(cx: &Ctx<'_>, err: std::io::Error) -> Flow {
    Flow::Fatal(Fatal::new(FatalKind::Output, format!("output error: {err}"), cx.loc()))
}

fn fn_ob_start(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    cx.global.append_buffer();
    Ok(Value::Bool(true))
}

fn fn_ob_end_flush(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    let result = cx.global.output_chain().end_flush();
    let flushed = result.map_err(|e| output_fatal(cx, e))?;
    if !flushed {
        cx.notice("ob_end_flush(): failed to delete and flush buffer. No buffer to delete or flush")?;
    }
    Ok(Value::Bool(flushed))
}

fn fn_ob_end_clean(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    let cleaned = cx.global.output_chain().end_clean().is_some();
    if !cleaned {
        cx.notice("ob_end_clean(): failed to delete buffer. No buffer to delete")?;
    }
    Ok(Value::Bool(cleaned))
}

fn fn_ob_get_clean(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    match cx.global.output_chain().end_clean() {
        Some(bytes) => Ok(Value::String(Rc::new(Str::from_bytes(bytes)))),
        None => Ok(Value::Bool(false)),
    }
}

fn fn_ob_get_contents(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    match cx.global.output_chain().top_contents() {
        Some(bytes) => Ok(Value::String(Rc::new(Str::from_bytes(bytes.to_vec())))),
        None => Ok(Value::Bool(false)),
    }
}

fn fn_ob_get_level(cx: &mut Ctx<'_>, _args: Args) -> RunResult<Value> {
    Ok(Value::Int(cx.global.output_chain().depth() as i64))
}

// --- ini ----------------------------------------------------------------

fn fn_ini_set(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    let Some(name) = arg_or_warn(cx, &args, 0, "ini_set")? else {
        return Ok(Value::Bool(false));
    };
    let Some(value) = arg_or_warn(cx, &args, 1, "ini_set")? else {
        return Ok(Value::Bool(false));
    };
    let name = coerce_string(&name).map(|s| s.to_string_lossy()).unwrap_or_default();
    let value = coerce_string(&value).map(|s| s.to_string_lossy()).unwrap_or_default();
    match cx.global.set_local_config(&name, value) {
        Some(old) => Ok(Value::string(old)),
        None => Ok(Value::Bool(false)),
    }
}

fn fn_ini_get(cx: &mut Ctx<'_>, args: Args) -> RunResult<Value> {
    match arg_or_warn(cx, &args, 0, "ini_get")? {
        Some(v) => {
            let name = coerce_string(&v).map(|s| s.to_string_lossy()).unwrap_or_default();
            match cx.global.get_config(&name, "\u{0}") {
                "\u{0}" => Ok(Value::Bool(false)),
                value => Ok(Value::string(value)),
            }
        }
        None => Ok(Value::Bool(false)),
    }
}
