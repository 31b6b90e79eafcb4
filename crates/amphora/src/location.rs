use std::{fmt, rc::Rc};

/// A position inside a source file.
///
/// Every token and every runnable node carries one of these. Locations are
/// immutable once assigned; diagnostics render them as `FILE on line N` to
/// match the language's canonical error format.
///
/// The filename is reference-counted so the many thousands of locations
/// produced while lexing a file all share one allocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Loc {
    /// Source file name (or a pseudo-name such as `unknown` before any file runs).
    pub filename: Rc<str>,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number, counted in bytes.
    pub column: u32,
    /// Byte offset from the start of the source.
    pub offset: u32,
}

impl Loc {
    #[must_use]
    pub fn new(filename: Rc<str>, line: u32, column: u32, offset: u32) -> Self {
        Self {
            filename,
            line,
            column,
            offset,
        }
    }

    /// Placeholder location used before any source has been entered.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            filename: Rc::from("unknown"),
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Location of the start of a named source.
    #[must_use]
    pub fn start_of(filename: &str) -> Self {
        Self {
            filename: Rc::from(filename),
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}", self.filename, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_diagnostic_format() {
        let loc = Loc::new(Rc::from("/srv/index.php"), 12, 3, 140);
        assert_eq!(loc.to_string(), "/srv/index.php on line 12");
    }

    #[test]
    fn unknown_starts_at_line_one() {
        let loc = Loc::unknown();
        assert_eq!(loc.line, 1);
        assert_eq!(&*loc.filename, "unknown");
    }
}
