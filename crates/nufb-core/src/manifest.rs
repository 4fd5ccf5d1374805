//! Manifest model: the declarative description of one flatpak build.
//!
//! A manifest has an identity (`id`, or the legacy `app-id`), a branch and an
//! ordered list of modules. Everything else in the document is carried along
//! untouched and ends up in the serialized build descriptor.

use std::fmt;

use serde_yaml::{Mapping, Sequence, Value};

use crate::document::{
    check_list, display_value, ensure_list, ensure_string, string_list, type_error,
};
use crate::{Error, Result};

/// A string defining the application id.
pub const MANIFEST_ID: &str = "id";
/// Legacy spelling of [`MANIFEST_ID`].
pub const MANIFEST_APP_ID: &str = "app-id";
pub const MANIFEST_BRANCH: &str = "branch";
pub const MANIFEST_BRANCH_DEFAULT: &str = "master";
pub const MANIFEST_MODULES: &str = "modules";

pub const MODULE_NAME: &str = "name";
pub const MODULE_BUILD_SYSTEM: &str = "buildsystem";
pub const MODULE_SOURCES: &str = "sources";
pub const MODULE_BUILD_COMMANDS: &str = "build-commands";
pub const MODULE_POST_INSTALL: &str = "post-install";
pub const MODULE_DISABLED: &str = "disabled";
/// Glob patterns of files needed only to build later modules.
pub const MODULE_STAGE_PATTERNS: &str = "stage";
/// Glob patterns of files that must persist into the final artifact.
pub const MODULE_KEEP_PATTERNS: &str = "keep";

pub const SOURCE_TYPE: &str = "type";
pub const SOURCE_PATH: &str = "path";

/// Source types whose `path` refers to a file in the resources directory.
pub const LOCAL_SOURCE_TYPES: &[&str] = &["file", "patch", "archive"];

/// A read-only view of one entry of a module's `sources` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source<'a> {
    /// A bare string: a relative path to a file with more source definitions.
    Path(&'a str),
    /// A record with a `type` tag and an optional local `path`.
    Typed { kind: &'a str, path: Option<&'a str> },
    /// Anything else, ignored by the builder core.
    Other,
}

impl<'a> Source<'a> {
    pub fn from_value(value: &'a Value) -> Self {
        match value {
            Value::String(path) => Source::Path(path),
            Value::Mapping(map) => match map.get(SOURCE_TYPE) {
                Some(Value::String(kind)) => Source::Typed {
                    kind,
                    path: map.get(SOURCE_PATH).and_then(Value::as_str),
                },
                _ => Source::Other,
            },
            _ => Source::Other,
        }
    }

    /// The path of a file to be staged from the resources directory, if any.
    pub fn local_path(&self) -> Option<&'a str> {
        match *self {
            Source::Path(path) => Some(path),
            Source::Typed { kind, path } if LOCAL_SOURCE_TYPES.contains(&kind) => path,
            _ => None,
        }
    }
}

/// One buildable unit of a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    data: Mapping,
}

impl Module {
    /// Create a module with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let mut module = Self::default();
        module.set_name(name);
        module
    }

    pub fn from_mapping(data: Mapping) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Mapping {
        &self.data
    }

    pub fn name(&self) -> Result<&str> {
        ensure_string(&self.data, MODULE_NAME, None)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set(MODULE_NAME, name.into());
    }

    /// Set an arbitrary key of the module.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.data.insert(Value::from(key), value.into());
    }

    pub fn sources(&mut self) -> Result<&mut Sequence> {
        ensure_list(&mut self.data, MODULE_SOURCES)
    }

    /// Typed views of the module's sources. A missing list is empty.
    pub fn source_entries(&self) -> Result<Vec<Source<'_>>> {
        match self.data.get(MODULE_SOURCES) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Sequence(items)) => Ok(items.iter().map(Source::from_value).collect()),
            Some(other) => Err(type_error(MODULE_SOURCES, "sequence", other)),
        }
    }

    pub fn build_commands(&mut self) -> Result<&mut Sequence> {
        ensure_list(&mut self.data, MODULE_BUILD_COMMANDS)
    }

    pub fn post_install(&mut self) -> Result<&mut Sequence> {
        ensure_list(&mut self.data, MODULE_POST_INSTALL)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.data.get(MODULE_DISABLED), Some(Value::Bool(true)))
    }

    pub fn stage_patterns(&self) -> Result<Vec<String>> {
        string_list(&self.data, MODULE_STAGE_PATTERNS)
    }

    pub fn keep_patterns(&self) -> Result<Vec<String>> {
        string_list(&self.data, MODULE_KEEP_PATTERNS)
    }

    /// Check the keys the file-list check appends to.
    pub fn check_step_lists(&self) -> Result<()> {
        check_list(&self.data, MODULE_SOURCES)?;
        check_list(&self.data, MODULE_POST_INSTALL)
    }

    /// Drop the stage and keep patterns.
    pub fn clear_patterns(&mut self) {
        self.data.remove(MODULE_STAGE_PATTERNS);
        self.data.remove(MODULE_KEEP_PATTERNS);
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .data
            .get(MODULE_NAME)
            .map(display_value)
            .unwrap_or_else(|| "None".to_string());
        write!(f, "<Module: name={}>", name)
    }
}

/// A build manifest with eagerly materialized modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    /// Document without its modules; the `modules` key, if it was present,
    /// is kept as a null placeholder to preserve key order.
    data: Mapping,
    modules: Vec<Module>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from a parsed document.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(data) => Self::from_mapping(data),
            other => Err(Error::Validation(format!(
                "manifest must be a mapping, found {}",
                crate::document::type_name(&other)
            ))),
        }
    }

    pub fn from_mapping(mut data: Mapping) -> Result<Self> {
        if data.contains_key(MANIFEST_ID) && data.contains_key(MANIFEST_APP_ID) {
            return Err(Error::Validation(format!(
                "only one of {MANIFEST_ID:?} and {MANIFEST_APP_ID:?} may be present in a manifest"
            )));
        }

        let modules = match data.get_mut(MANIFEST_MODULES) {
            None => Vec::new(),
            Some(value) => match std::mem::take(value) {
                Value::Null => Vec::new(),
                Value::Sequence(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| match item {
                        Value::Mapping(map) => Ok(Module::from_mapping(map)),
                        other => Err(Error::Validation(format!(
                            "module #{index} must be a mapping, found {}",
                            crate::document::type_name(&other)
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?,
                other => return Err(type_error(MANIFEST_MODULES, "sequence", &other)),
            },
        };

        Ok(Self { data, modules })
    }

    /// Raw document, without modules.
    pub fn data(&self) -> &Mapping {
        &self.data
    }

    /// The application id, from `id` or the legacy `app-id`.
    pub fn identity(&self) -> Result<&str> {
        if self.data.contains_key(MANIFEST_ID) {
            ensure_string(&self.data, MANIFEST_ID, None)
        } else if self.data.contains_key(MANIFEST_APP_ID) {
            ensure_string(&self.data, MANIFEST_APP_ID, None)
        } else {
            Err(Error::Validation(format!(
                "neither {MANIFEST_ID:?} nor {MANIFEST_APP_ID:?} is present in the manifest"
            )))
        }
    }

    /// Set the identity under the canonical key and drop the legacy one.
    pub fn set_identity(&mut self, value: impl Into<String>) {
        self.data.insert(Value::from(MANIFEST_ID), Value::String(value.into()));
        self.data.remove(MANIFEST_APP_ID);
    }

    pub fn branch(&self) -> Result<&str> {
        ensure_string(&self.data, MANIFEST_BRANCH, Some(MANIFEST_BRANCH_DEFAULT))
    }

    pub fn set_branch(&mut self, value: impl Into<String>) {
        self.data
            .insert(Value::from(MANIFEST_BRANCH), Value::String(value.into()));
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut Vec<Module> {
        &mut self.modules
    }

    /// First module with the given name. Unnamed modules are skipped.
    pub fn find_module(&self, name: &str) -> Option<&Module> {
        self.modules
            .iter()
            .find(|module| module.name().is_ok_and(|n| n == name))
    }

    /// Insert a module at `position`, or append it when `position` is `None`.
    ///
    /// Negative positions count from the end and out-of-range positions are
    /// clamped.
    pub fn add_module(&mut self, module: Module, position: Option<isize>) {
        let len = self.modules.len() as isize;
        let index = match position {
            None => len,
            Some(pos) if pos < 0 => (len + pos).max(0),
            Some(pos) => pos.min(len),
        };
        self.modules.insert(index as usize, module);
    }

    /// Reassemble the full document.
    pub fn to_value(&self) -> Value {
        let mut data = self.data.clone();
        let modules = self
            .modules
            .iter()
            .map(|module| Value::Mapping(module.data().clone()))
            .collect();
        data.insert(Value::from(MANIFEST_MODULES), Value::Sequence(modules));
        Value::Mapping(data)
    }

    /// Serialize as the JSON build descriptor, with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(&self.to_value())?;
        json.push('\n');
        Ok(json)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .data
            .get(MANIFEST_ID)
            .or_else(|| self.data.get(MANIFEST_APP_ID))
            .map(display_value)
            .unwrap_or_else(|| "None".to_string());
        let branch = self
            .data
            .get(MANIFEST_BRANCH)
            .map(display_value)
            .unwrap_or_else(|| MANIFEST_BRANCH_DEFAULT.to_string());
        write!(f, "<Manifest: id={}, branch={}>", id, branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> Result<Manifest> {
        Manifest::from_value(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = Manifest::new();
        assert!(manifest.modules().is_empty());
        assert_eq!(manifest.branch().unwrap(), "master");
        assert!(manifest.identity().unwrap_err().is_validation());
    }

    #[test]
    fn test_identity_from_either_key() {
        let m = manifest("id: eu.tiliado.Nuvola").unwrap();
        let id = m.identity().unwrap();
        assert_eq!(id, "eu.tiliado.Nuvola");
        // The identity borrows from the document rather than copying it.
        let raw = m.data().get(MANIFEST_ID).and_then(Value::as_str).unwrap();
        assert!(std::ptr::eq(id, raw));

        let m = manifest("app-id: eu.tiliado.NuvolaCdk").unwrap();
        assert_eq!(m.identity().unwrap(), "eu.tiliado.NuvolaCdk");
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let err = manifest("id: aaa\napp-id: bbb").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_identity_wrong_type() {
        let err = manifest("id: 123").unwrap().identity().unwrap_err();
        assert!(matches!(err, Error::Type { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_set_identity_replaces_legacy_key() {
        let mut m = manifest("app-id: old-id").unwrap();
        m.set_identity("my-id");
        assert_eq!(m.identity().unwrap(), "my-id");
        assert!(!m.data().contains_key(MANIFEST_APP_ID));
        assert_eq!(m.data().get(MANIFEST_ID), Some(&Value::from("my-id")));
    }

    #[test]
    fn test_branch() {
        assert_eq!(manifest("branch: stable").unwrap().branch().unwrap(), "stable");
        assert!(manifest("branch: 123").unwrap().branch().is_err());

        let mut m = Manifest::new();
        m.set_branch("stable");
        assert_eq!(m.branch().unwrap(), "stable");
    }

    #[test]
    fn test_display_does_not_coerce_types() {
        assert_eq!(Manifest::new().to_string(), "<Manifest: id=None, branch=master>");
        assert_eq!(
            manifest("id: 3\nbranch: 6").unwrap().to_string(),
            "<Manifest: id=3, branch=6>"
        );
        assert_eq!(
            manifest("id: eu.tiliado.App\nbranch: stable").unwrap().to_string(),
            "<Manifest: id=eu.tiliado.App, branch=stable>"
        );
    }

    #[test]
    fn test_modules_materialized() {
        let m = manifest("modules: [{name: a}, {name: b}]").unwrap();
        assert_eq!(m.modules().len(), 2);
        assert_eq!(m.modules()[1].name().unwrap(), "b");
        // Same slice on every access.
        assert!(std::ptr::eq(m.modules(), m.modules()));
    }

    #[test]
    fn test_modules_must_be_mappings() {
        assert!(manifest("modules: [shared-modules/foo.json]").is_err());
        assert!(manifest("modules: 5").unwrap_err().is_validation());
    }

    #[test]
    fn test_add_module_positions() {
        let module = Module::new("new");

        let mut m = Manifest::new();
        m.add_module(module.clone(), Some(-123));
        assert_eq!(m.modules(), &[module.clone()]);

        let mut m = Manifest::new();
        m.add_module(module.clone(), None);
        assert_eq!(m.modules().len(), 1);

        let mut m = manifest("modules: [{}, {}, {}, {}]").unwrap();
        m.add_module(module.clone(), Some(0));
        assert_eq!(m.modules().len(), 5);
        assert_eq!(m.modules()[0], module);
        m.add_module(module.clone(), Some(-2));
        assert_eq!(m.modules().len(), 6);
        assert_eq!(m.modules()[3], module);
        m.add_module(module.clone(), None);
        assert_eq!(m.modules().len(), 7);
        assert_eq!(m.modules()[6], module);
        m.add_module(module.clone(), Some(100));
        assert_eq!(m.modules()[7], module);
    }

    #[test]
    fn test_find_module() {
        assert!(Manifest::new().find_module("my-module").is_none());

        let m = manifest("modules: [{}, {name: 5}, {name: my-module, size: 10}]").unwrap();
        let found = m.find_module("my-module").unwrap();
        assert_eq!(found.data().get("size"), Some(&Value::from(10)));
        assert!(m.find_module("other").is_none());
    }

    #[test]
    fn test_module_fields() {
        let mut module = Module::default();
        assert!(module.name().is_err());
        module.set_name("my-module");
        assert_eq!(module.name().unwrap(), "my-module");
        assert_eq!(module.to_string(), "<Module: name=my-module>");

        assert!(module.sources().unwrap().is_empty());
        module.build_commands().unwrap().push(Value::from("make"));
        assert_eq!(module.build_commands().unwrap().len(), 1);

        module.set(MODULE_POST_INSTALL, 123);
        assert!(matches!(module.post_install(), Err(Error::Type { .. })));
        assert!(!module.is_disabled());
        module.set(MODULE_DISABLED, true);
        assert!(module.is_disabled());
    }

    #[test]
    fn test_source_local_paths() {
        let m = manifest(
            r#"
modules:
  - name: app
    sources:
      - module.json
      - {type: file, path: a/file.txt}
      - {type: archive, url: "http://example.com/b.tar.gz"}
      - {type: git, path: c}
      - {type: patch, path: fix.patch}
      - 42
"#,
        )
        .unwrap();
        let paths: Vec<_> = m.modules()[0]
            .source_entries()
            .unwrap()
            .iter()
            .filter_map(Source::local_path)
            .collect();
        assert_eq!(paths, vec!["module.json", "a/file.txt", "fix.patch"]);
    }

    #[test]
    fn test_to_json_keeps_key_order() {
        let m = manifest("id: app\nmodules: [{name: a}]\nfinish-args: []").unwrap();
        let json = m.to_json().unwrap();
        assert!(json.ends_with("}\n"));
        let id = json.find("\"id\"").unwrap();
        let modules = json.find("\"modules\"").unwrap();
        let finish = json.find("\"finish-args\"").unwrap();
        assert!(id < modules && modules < finish);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["modules"][0]["name"], "a");
    }
}
