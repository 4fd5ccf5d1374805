//! Placeholder substitution for manifest templates and path expansion.
//!
//! Manifest templates may contain `@NAME@` placeholders which are replaced
//! before the YAML is parsed. Unknown placeholders are left untouched so that
//! literal `@` characters (e.g. in e-mail addresses) survive.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Regex for matching @NAME@ placeholders
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)@").unwrap());

// Regex for matching $VAR and ${VAR} in configured paths
static ENV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap()
});

/// A map of placeholder names to their replacement text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace every known `@NAME@` placeholder in `input`.
    pub fn apply(&self, input: &str) -> String {
        PLACEHOLDER_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.get(&caps[1])
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Substitutions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Expand `~` and environment variables in a configured path and make it
/// absolute against the current directory.
///
/// Unset variables are left as they are.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = ENV_REGEX.replace_all(path, |caps: &regex::Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    let path = match expanded.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(expanded.as_ref()),
        },
        _ => PathBuf::from(expanded.as_ref()),
    };

    absolute(&path)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_placeholders() {
        let subst = Substitutions::new()
            .with("APP", "deezer")
            .with("APP_ID", "eu.tiliado.NuvolaAppDeezer");

        let result = subst.apply("id: @APP_ID@\ncommand: nuvola-@APP@");
        assert_eq!(result, "id: eu.tiliado.NuvolaAppDeezer\ncommand: nuvola-deezer");
    }

    #[test]
    fn test_unknown_placeholder_preserved() {
        let subst: Substitutions = [("APP", "tidal")].into_iter().collect();
        assert_eq!(subst.apply("@APP@ @BRANCH@"), "tidal @BRANCH@");
        assert_eq!(subst.apply("mail me@example.com"), "mail me@example.com");
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/srv/repo"), PathBuf::from("/srv/repo"));
        assert!(expand_path("relative/dir").is_absolute());
    }

    #[test]
    fn test_expand_path_variables() {
        // PATH is always set in test environments.
        let path = std::env::var("PATH").unwrap();
        if path.starts_with('/') {
            assert_eq!(expand_path("${PATH}"), PathBuf::from(&path));
        }
        assert_eq!(
            expand_path("/srv/$NUFB_SURELY_UNSET_VARIABLE/repo"),
            PathBuf::from("/srv/$NUFB_SURELY_UNSET_VARIABLE/repo")
        );
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/flatpak/repo"), home.join("flatpak/repo"));
            assert_eq!(expand_path("~"), home);
        }
    }
}
