//! A sandboxed, embeddable interpreter for a PHP-family scripting language.
//!
//! The pipeline: [`lexer`] turns source bytes into located items, the
//! compiler turns items into a runnable tree, and a per-request [`Global`]
//! evaluates the tree — tracking the deadline, the memory budget, name
//! registries with lazy resolution, superglobals and the output buffer
//! chain. The only process-wide state is the extension registry, frozen
//! when the first `Global` is built.
//!
//! ```
//! use amphora::{CollectOutput, Global};
//!
//! let (writer, output) = CollectOutput::new();
//! let mut global = Global::new(Box::new(writer));
//! let code = global.run_source("hello.php", b"<?php echo \"hi\";").unwrap();
//! assert_eq!(code, 0);
//! assert_eq!(output.to_string_lossy(), "hi");
//! ```

mod array;
mod builtins;
mod class;
mod compile_class;
mod compile_expr;
mod compile_function;
mod compiler;
mod context;
mod error;
mod exec;
mod extension;
mod function;
mod global;
mod ini;
mod lexer;
mod location;
mod node;
mod object;
mod output;
mod request;
mod resource;
mod stream;
mod token;
mod value;

pub use crate::{
    array::{Array, Key},
    class::{Class, ClassKind, Delayed, MemberModifiers, Method, MethodBody, Prop, Visibility},
    compiler::compile,
    context::{Ctx, Frame},
    error::{CompileError, Fatal, FatalKind, Flow, LexError, RequestError, RunResult, ScriptError, Thrown},
    extension::{ArgSpec, ConstVal, Ext, ExtFunction, NativeHandler, loaded_extensions, register_ext},
    function::{Args, Callable, Param, PhpFunction},
    global::{Global, LoadError},
    ini::IniStore,
    lexer::lex,
    location::Loc,
    node::{Node, NodeKind, Script},
    object::{ClosureState, Instance, ObjRef},
    output::{CollectOutput, CollectedHandle, NoOutput, OutputChain, OutputWriter, StdOutput},
    request::{Request, parse_cookies, parse_query},
    resource::{CancelToken, ResourceError, ResourceLimits, ResourceMeter},
    stream::{FileHandler, PhpStreamHandler, StreamHandler, StreamStat, split_scheme},
    token::{Item, TokenKind},
    value::{Cell, Num, Str, Value, compare, loose_eq, strict_eq},
};
