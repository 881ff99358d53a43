//! `${name}` placeholder resolution over two layered property sources.
//!
//! Lookup order: the primary source (usually the raw properties file being
//! loaded), then the process-wide settings. Unknown names resolve to the empty
//! string. A reference back to any key currently being resolved is an error.

use crate::core::properties::Properties;
use crate::error::ConfigError;

const DELIM_START: &str = "${";
const DELIM_STOP: char = '}';

/// Resolves placeholders against a primary source and process-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    primary: Option<&'a Properties>,
    settings: &'a Properties,
}

impl<'a> Resolver<'a> {
    pub fn new(primary: Option<&'a Properties>, settings: &'a Properties) -> Self {
        Self { primary, settings }
    }

    /// Resolve every placeholder in `value`, which is the value of `current_key`.
    pub fn resolve(&self, value: &str, current_key: &str) -> Result<String, ConfigError> {
        let mut resolving = vec![current_key.to_string()];
        self.resolve_within(value.to_string(), &mut resolving)
    }

    /// `resolving` holds the chain of keys whose values are being expanded.
    /// A name is pushed only while its own value is expanded, so the same
    /// name may appear any number of times side by side.
    fn resolve_within(
        &self,
        mut value: String,
        resolving: &mut Vec<String>,
    ) -> Result<String, ConfigError> {
        while let Some((start, stop)) = innermost_placeholder(&value) {
            let name = &value[start + DELIM_START.len()..stop];
            if resolving.iter().any(|key| key == name) {
                return Err(ConfigError::RecursiveReference {
                    variable: name.to_string(),
                });
            }

            let substitute = match self.lookup(name) {
                Some(raw) if raw.contains(DELIM_START) => {
                    resolving.push(name.to_string());
                    let expanded = self.resolve_within(raw.to_string(), resolving);
                    resolving.pop();
                    expanded?
                }
                Some(raw) => raw.to_string(),
                None => String::new(),
            };

            // Rescan the whole value: the splice may reveal new placeholders.
            value.replace_range(start..=stop, &substitute);
        }
        Ok(value)
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        self.primary
            .and_then(|props| props.get(name))
            .or_else(|| self.settings.get(name))
            .map(String::as_str)
    }
}

/// Locate the deepest, left-most placeholder: the first closing delimiter and
/// the closest opening delimiter before it. Returns byte offsets of `$` and `}`.
fn innermost_placeholder(value: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(offset) = value[from..].find(DELIM_STOP) {
        let stop = from + offset;
        if let Some(start) = value[..stop].rfind(DELIM_START) {
            return Some((start, stop));
        }
        from = stop + 1;
    }
    None
}

/// Resolve every entry of `raw`, each against `raw` itself and `settings`.
pub fn resolve_all(raw: &Properties, settings: &Properties) -> Result<Properties, ConfigError> {
    let resolver = Resolver::new(Some(raw), settings);
    raw.iter()
        .map(|(key, value)| Ok((key.clone(), resolver.resolve(value, key)?)))
        .collect()
}
