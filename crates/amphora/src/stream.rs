use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Metadata for a stream target.
#[derive(Debug, Clone)]
pub struct StreamStat {
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

/// Resolver for one URL scheme in the Global's handler map.
///
/// `include`/`require` and the file builtins route every path through the
/// handler registered for its scheme; paths without a scheme use `file`.
pub trait StreamHandler {
    /// Opens the target for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read>>;

    fn stat(&self, path: &str) -> io::Result<StreamStat>;

    /// Canonical identity of the target, used by the included-file set so
    /// `require_once` recognizes one file under different spellings.
    fn canonical(&self, path: &str) -> io::Result<String> {
        Ok(path.to_owned())
    }
}

/// Filesystem handler rooted at a directory (`/` by default).
///
/// Relative paths resolve against the root; escaping the root via `..` is
/// not prevented here — sandboxing the filesystem is the embedder's call.
#[derive(Debug)]
pub struct FileHandler {
    root: PathBuf,
}

impl FileHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl StreamHandler for FileHandler {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(self.resolve(path))?))
    }

    fn stat(&self, path: &str) -> io::Result<StreamStat> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(StreamStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok(),
        })
    }

    fn canonical(&self, path: &str) -> io::Result<String> {
        let resolved = fs::canonicalize(self.resolve(path))?;
        Ok(resolved.to_string_lossy().into_owned())
    }
}

/// Built-in pseudo-scheme handler (`php://`).
///
/// Supports `php://stdin` and `php://memory`; other targets report
/// not-found, matching the subset the runtime itself needs.
#[derive(Debug, Default)]
pub struct PhpStreamHandler;

impl StreamHandler for PhpStreamHandler {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read>> {
        match path {
            "stdin" => Ok(Box::new(io::stdin())),
            "memory" => Ok(Box::new(io::Cursor::new(Vec::new()))),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unsupported php:// target: {other}"),
            )),
        }
    }

    fn stat(&self, path: &str) -> io::Result<StreamStat> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot stat php://{path}"),
        ))
    }

    fn canonical(&self, path: &str) -> io::Result<String> {
        Ok(format!("php://{path}"))
    }
}

/// Splits `scheme://rest` into its parts. Single-letter schemes are treated
/// as Windows-style drive letters, i.e. not schemes.
#[must_use]
pub fn split_scheme(path: &str) -> (Option<&str>, &str) {
    if let Some(idx) = path.find("://")
        && idx > 1
    {
        (Some(&path[..idx]), &path[idx + 3..])
    } else {
        (None, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_splitting() {
        assert_eq!(split_scheme("php://stdin"), (Some("php"), "stdin"));
        assert_eq!(split_scheme("/etc/hosts"), (None, "/etc/hosts"));
        assert_eq!(split_scheme("c://x"), (None, "c://x"));
    }
}
