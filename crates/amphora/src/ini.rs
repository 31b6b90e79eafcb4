use ahash::AHashMap;

/// Minimal per-request ini store.
///
/// The original engine consults a process ini file; here the store is scoped
/// to one `Global`, seeded with the defaults the runtime itself reads, and
/// locally overridable (`ini_set` semantics). Values are strings, as in ini
/// files; numeric readers parse on access.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IniStore {
    entries: AHashMap<String, String>,
}

impl Default for IniStore {
    fn default() -> Self {
        let mut entries = AHashMap::new();
        entries.insert("variables_order".to_owned(), "EGPCS".to_owned());
        entries.insert("memory_limit".to_owned(), "32M".to_owned());
        entries.insert("max_execution_time".to_owned(), "30".to_owned());
        entries.insert("display_errors".to_owned(), "1".to_owned());
        Self { entries }
    }
}

impl IniStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Local (request-scoped) override, returning the previous value.
    pub fn set_local(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.to_owned(), value.into())
    }

    /// `memory_limit` in bytes, honoring the K/M/G shorthand. `-1` and
    /// unparseable values mean unlimited.
    #[must_use]
    pub fn memory_limit_bytes(&self) -> Option<usize> {
        parse_byte_shorthand(self.get_or("memory_limit", "32M"))
    }

    /// `max_execution_time` in whole seconds; `0` means unlimited.
    #[must_use]
    pub fn max_execution_seconds(&self) -> Option<u64> {
        match self.get_or("max_execution_time", "30").trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(secs) => Some(secs),
        }
    }
}

/// Parses `16384`, `16K`, `32M`, `1G`. Returns None for `-1`/garbage.
fn parse_byte_shorthand(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('-') {
        return None;
    }
    let (digits, factor) = match text.as_bytes()[text.len() - 1] {
        b'k' | b'K' => (&text[..text.len() - 1], 1024),
        b'm' | b'M' => (&text[..text.len() - 1], 1024 * 1024),
        b'g' | b'G' => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        _ => (text, 1),
    };
    digits.trim().parse::<usize>().ok().map(|n| n * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_present() {
        let ini = IniStore::new();
        assert_eq!(ini.get("variables_order"), Some("EGPCS"));
        assert_eq!(ini.memory_limit_bytes(), Some(32 * 1024 * 1024));
        assert_eq!(ini.max_execution_seconds(), Some(30));
    }

    #[test]
    fn shorthand_parsing() {
        assert_eq!(parse_byte_shorthand("16K"), Some(16 * 1024));
        assert_eq!(parse_byte_shorthand("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_byte_shorthand("12345"), Some(12345));
        assert_eq!(parse_byte_shorthand("-1"), None);
    }

    #[test]
    fn local_override() {
        let mut ini = IniStore::new();
        let old = ini.set_local("max_execution_time", "0");
        assert_eq!(old.as_deref(), Some("30"));
        assert_eq!(ini.max_execution_seconds(), None);
    }
}
