use std::fmt;

use crate::{location::Loc, value::Value};

/// Result type for everything that executes inside a request.
///
/// The error side is not an ordinary error: it is a control signal. Most
/// signals are consumed by an enclosing construct (loops eat `Break`,
/// functions eat `Return`, `try` eats matching `Throw`); only fatals and
/// uncaught throwables escape all the way to the host.
pub type RunResult<T> = Result<T, Flow>;

/// Non-value outcome of running a node.
///
/// `Throw` is catchable; `Fatal` is not — resource-limit violations and
/// unrecoverable interpreter errors must not be suppressible by script code.
/// `Exit` unwinds everything but maps to a successful request when the code
/// is zero.
#[derive(Debug)]
pub enum Flow {
    /// `return expr;` — consumed by the enclosing function or included file.
    Return(Value),
    /// `break n;` — consumed by the n-th enclosing loop or switch.
    Break(u32),
    /// `continue n;` — consumed by the n-th enclosing loop.
    Continue(u32),
    /// `throw expr;` — consumed by a matching catch clause.
    Throw(Thrown),
    /// `exit(code)` / `die` — unwinds the whole request.
    Exit(i32),
    /// Non-catchable failure: deadline, memory, name resolution, internals.
    Fatal(Fatal),
}

impl From<Fatal> for Flow {
    fn from(f: Fatal) -> Self {
        Self::Fatal(f)
    }
}

/// A value in flight between `throw` and `catch`.
///
/// The payload is always an object (throwing anything else is fatal); the
/// location is where the `throw` executed, used for the uncaught diagnostic.
#[derive(Debug)]
pub struct Thrown {
    pub value: Value,
    pub loc: Loc,
}

/// Classification of fatal runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum FatalKind {
    /// Wall-clock deadline reached.
    Timeout,
    /// Memory meter exhausted.
    OutOfMemory,
    /// External cancellation signal fired.
    Cancelled,
    /// Call stack exceeded the configured depth.
    RecursionDepth,
    /// `f()` where no function `f` is registered (eagerly or lazily).
    UndefinedFunction,
    /// `new C` / `C::x` where no class `C` is registered.
    ClassNotFound,
    /// Second registration of a function name.
    DuplicateFunction,
    /// Second registration of a class name.
    DuplicateClass,
    /// `self::`/`parent::`/`static::` outside a suitable scope.
    ScopeError,
    /// `require` target missing or unreadable.
    RequireFailed,
    /// Lex or compile error surfacing at runtime (include/require).
    Syntax,
    /// Error writing to the output chain.
    Output,
    /// Misuse of a language construct detected at runtime.
    BadOperation,
    /// Interpreter invariant violated; indicates a bug in amphora.
    Internal,
}

/// A non-catchable runtime failure with its diagnostic location.
#[derive(Debug, Clone)]
pub struct Fatal {
    pub kind: FatalKind,
    pub message: String,
    pub loc: Loc,
}

impl Fatal {
    #[must_use]
    pub fn new(kind: FatalKind, message: impl Into<String>, loc: Loc) -> Self {
        Self {
            kind,
            message: message.into(),
            loc,
        }
    }

    pub(crate) fn internal(message: impl Into<String>, loc: Loc) -> Self {
        Self::new(FatalKind::Internal, message, loc)
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.loc)
    }
}

impl std::error::Error for Fatal {}

/// Failure to tokenize a source. Fatal for that source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub loc: Loc,
}

impl LexError {
    #[must_use]
    pub fn new(message: impl Into<String>, loc: Loc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.loc)
    }
}

impl std::error::Error for LexError {}

/// Failure to compile a token stream. Fatal for that source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub loc: Loc,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>, loc: Loc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.loc)
    }
}

impl std::error::Error for CompileError {}

/// Either stage of turning bytes into a runnable tree can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Lex(LexError),
    Compile(CompileError),
}

impl ScriptError {
    #[must_use]
    pub fn loc(&self) -> &Loc {
        match self {
            Self::Lex(e) => &e.loc,
            Self::Compile(e) => &e.loc,
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex(e) => write!(f, "{e}"),
            Self::Compile(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<LexError> for ScriptError {
    fn from(e: LexError) -> Self {
        Self::Lex(e)
    }
}

impl From<CompileError> for ScriptError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<ScriptError> for Fatal {
    fn from(e: ScriptError) -> Self {
        let (message, loc) = match e {
            ScriptError::Lex(e) => (format!("syntax error: {}", e.message), e.loc),
            ScriptError::Compile(e) => (format!("syntax error: {}", e.message), e.loc),
        };
        Self::new(FatalKind::Syntax, message, loc)
    }
}

/// Terminal outcome of a request, as seen by the host.
///
/// `Global::run_file` filters a normal `exit` into success, so everything in
/// this enum represents a genuinely failed request.
#[derive(Debug)]
pub enum RequestError {
    /// The root script (or a required file) failed to lex or compile.
    Script(ScriptError),
    /// A fatal runtime error terminated the request.
    Fatal(Fatal),
    /// A throwable reached the top of the request without being caught.
    Uncaught {
        class_name: String,
        message: String,
        loc: Loc,
    },
}

impl RequestError {
    /// Process exit code for this failure. Always nonzero.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        255
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(e) => write!(f, "{e}"),
            Self::Fatal(e) => write!(f, "Fatal error: {e}"),
            Self::Uncaught {
                class_name,
                message,
                loc,
            } => {
                if message.is_empty() {
                    write!(f, "Fatal error: Uncaught {class_name} in {loc}")
                } else {
                    write!(f, "Fatal error: Uncaught {class_name}: {message} in {loc}")
                }
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl From<ScriptError> for RequestError {
    fn from(e: ScriptError) -> Self {
        Self::Script(e)
    }
}

impl From<Fatal> for RequestError {
    fn from(e: Fatal) -> Self {
        Self::Fatal(e)
    }
}
