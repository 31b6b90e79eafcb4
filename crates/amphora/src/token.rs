use crate::{error::CompileError, location::Loc, node::CastKind};

/// Lexical token kind.
///
/// Single-byte operators and punctuation travel as `Punct`; multi-character
/// operators, keywords and the structured tokens each get a named kind. The
/// lexer also emits `Whitespace`/`Comment` items — the compiler's pull
/// interface filters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::IntoStaticStr)]
pub enum TokenKind {
    /// Literal text outside code tags.
    InlineHtml,
    /// `<?php`
    OpenTag,
    /// `<?=`
    OpenTagEcho,
    /// `?>`
    CloseTag,
    Eof,

    Whitespace,
    Comment,
    /// `/** ... */`
    DocComment,

    /// Bare name: function/class/constant identifier.
    Identifier,
    /// `$name`; the item data excludes the `$`.
    Variable,
    IntLiteral,
    FloatLiteral,
    /// `'...'`; the item data is the raw inner text, escapes unprocessed.
    SingleQuoted,
    /// Literal fragment inside `"..."` or a heredoc body.
    EncapsedText,
    /// `<<<LABEL`; data is the label.
    StartHeredoc,
    /// Closing heredoc label.
    EndHeredoc,
    /// `<<<'LABEL'` opener; body is wholly literal.
    StartNowdoc,
    /// `\` between name segments.
    NsSeparator,
    Cast(CastKind),
    /// Single-byte operator or punctuation.
    Punct(char),

    // multi-character operators
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Spaceship,
    Le,
    Ge,
    Arrow,
    DoubleArrow,
    DoubleColon,
    Coalesce,
    CoalesceEq,
    Pow,
    PowEq,
    Shl,
    ShlEq,
    Shr,
    ShrEq,
    Inc,
    Dec,
    AndAnd,
    OrOr,
    PlusEq,
    MinusEq,
    MulEq,
    DivEq,
    ModEq,
    ConcatEq,
    AndEq,
    OrEq,
    XorEq,
    Ellipsis,

    // keywords (matched case-insensitively)
    KwIf,
    KwElse,
    KwElseif,
    KwWhile,
    KwDo,
    KwFor,
    KwForeach,
    KwAs,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwContinue,
    KwReturn,
    KwFunction,
    KwClass,
    KwInterface,
    KwTrait,
    KwExtends,
    KwImplements,
    KwNew,
    KwEcho,
    KwPrint,
    KwInclude,
    KwIncludeOnce,
    KwRequire,
    KwRequireOnce,
    KwTry,
    KwCatch,
    KwFinally,
    KwThrow,
    KwGlobal,
    KwStatic,
    KwConst,
    KwNamespace,
    KwUse,
    KwPublic,
    KwPrivate,
    KwProtected,
    KwVar,
    KwAbstract,
    KwFinal,
    KwReadonly,
    KwInstanceof,
    KwArray,
    KwIsset,
    KwEmpty,
    KwUnset,
    KwExit,
    KwAnd,
    KwOr,
    KwXor,
}

/// Maps a (case-insensitive) identifier to its keyword kind.
#[must_use]
pub fn keyword_kind(ident: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match ident.to_ascii_lowercase().as_str() {
        "if" => KwIf,
        "else" => KwElse,
        "elseif" => KwElseif,
        "while" => KwWhile,
        "do" => KwDo,
        "for" => KwFor,
        "foreach" => KwForeach,
        "as" => KwAs,
        "switch" => KwSwitch,
        "case" => KwCase,
        "default" => KwDefault,
        "break" => KwBreak,
        "continue" => KwContinue,
        "return" => KwReturn,
        "function" => KwFunction,
        "class" => KwClass,
        "interface" => KwInterface,
        "trait" => KwTrait,
        "extends" => KwExtends,
        "implements" => KwImplements,
        "new" => KwNew,
        "echo" => KwEcho,
        "print" => KwPrint,
        "include" => KwInclude,
        "include_once" => KwIncludeOnce,
        "require" => KwRequire,
        "require_once" => KwRequireOnce,
        "try" => KwTry,
        "catch" => KwCatch,
        "finally" => KwFinally,
        "throw" => KwThrow,
        "global" => KwGlobal,
        "static" => KwStatic,
        "const" => KwConst,
        "namespace" => KwNamespace,
        "use" => KwUse,
        "public" => KwPublic,
        "private" => KwPrivate,
        "protected" => KwProtected,
        "var" => KwVar,
        "abstract" => KwAbstract,
        "final" => KwFinal,
        "readonly" => KwReadonly,
        "instanceof" => KwInstanceof,
        "array" => KwArray,
        "isset" => KwIsset,
        "empty" => KwEmpty,
        "unset" => KwUnset,
        "exit" | "die" => KwExit,
        "and" => KwAnd,
        "or" => KwOr,
        "xor" => KwXor,
        _ => return None,
    })
}

/// A lexical item: kind, raw lexeme, and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Item {
    pub kind: TokenKind,
    pub data: String,
    pub loc: Loc,
}

impl Item {
    #[must_use]
    pub fn new(kind: TokenKind, data: impl Into<String>, loc: Loc) -> Self {
        Self {
            kind,
            data: data.into(),
            loc,
        }
    }

    #[must_use]
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    /// Compile error for an item found where something else was expected.
    #[must_use]
    pub fn unexpected(&self, expected: &str) -> CompileError {
        let found: &'static str = self.kind.into();
        if self.data.is_empty() {
            CompileError::new(format!("unexpected {found}, expecting {expected}"), self.loc.clone())
        } else {
            CompileError::new(
                format!("unexpected '{}' ({found}), expecting {expected}", self.data),
                self.loc.clone(),
            )
        }
    }
}
