//! Stage/keep bookkeeping.
//!
//! Modules installed early in a manifest often leave behind files that only
//! later modules need (headers, static libraries, build tools). Each module
//! may list such files as `stage` patterns and files that must survive into
//! the final flatpak as `keep` patterns. This pass rewrites the manifest so
//! that after every module a snapshot of `/app` is compared against the
//! patterns, and after the last module only kept files and debug symbols may
//! remain.
//!
//! Patterns prefixed with `@` are informational: they are reported but never
//! fail the check when they match nothing.

use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::manifest::{MODULE_BUILD_SYSTEM, MODULE_SOURCES};
use crate::{Error, Manifest, Module, Result};

/// Name of the synthetic module providing the file-list tool.
pub const FILELIST_MODULE_NAME: &str = "nufb-filelist";
/// Where the file-list tool and its snapshots live inside the sandbox.
pub const FILELIST_DIR: &str = "/app/lib/debug/filelist";
/// Debug symbols are always allowed to stay.
pub const DEBUG_FILES_PATTERN: &str = "/app/lib/debug/*";
/// Destination file name of the generated pattern list.
pub const ALLOWED_FILENAME: &str = "allowed";

const SNAPSHOT_COMMAND: &str = "cd /app/lib/debug/filelist && \
     ./filelist /app $FLATPAK_BUILDER_BUILDDIR/allowed latest > current && \
     mv current latest";

const FINAL_SNAPSHOT_COMMAND: &str = "cd /app/lib/debug/filelist && \
     rm latest && \
     ./filelist /app $FLATPAK_BUILDER_BUILDDIR/allowed /dev/null > latest";

/// Build the module that installs the file-list tool and an empty snapshot.
///
/// `tool_path` is the location of the tool on the host; it is referenced as a
/// `file` source.
pub fn filelist_module(tool_path: &Path) -> Module {
    let mut module = Module::new(FILELIST_MODULE_NAME);
    module.set(MODULE_BUILD_SYSTEM, "simple");
    module.set(
        crate::manifest::MODULE_BUILD_COMMANDS,
        vec![
            format!("test -f {FILELIST_DIR}/filelist || install -Dm755 filelist.py {FILELIST_DIR}/filelist"),
            format!("test -e {FILELIST_DIR}/latest || touch {FILELIST_DIR}/latest"),
        ],
    );

    let mut source = Mapping::new();
    source.insert(Value::from("type"), Value::from("file"));
    source.insert(
        Value::from("path"),
        Value::from(tool_path.to_string_lossy().into_owned()),
    );
    module.set(MODULE_SOURCES, vec![Value::Mapping(source)]);
    module
}

fn allowed_source(patterns: Vec<String>) -> Value {
    let mut source = Mapping::new();
    source.insert(Value::from("type"), Value::from("script"));
    source.insert(Value::from("dest-filename"), Value::from(ALLOWED_FILENAME));
    source.insert(Value::from("commands"), Value::from(patterns));
    Value::Mapping(source)
}

/// Rewrite `manifest` in place, injecting the stage/keep bookkeeping.
///
/// Must run exactly once per manifest: the pattern lists are consumed and the
/// synthetic module is prepended.
pub fn process_stage_keep(manifest: &mut Manifest, tool_path: &Path) -> Result<()> {
    let last_index = match manifest.modules().len() {
        0 => return Err(Error::Validation("manifest has no modules".to_string())),
        len => len - 1,
    };

    if manifest.modules()[last_index].is_disabled() {
        return Err(Error::Validation(format!(
            "the last module {} must not be disabled",
            manifest.modules()[last_index]
        )));
    }

    // Read every pattern list first: a malformed module must leave the
    // manifest untouched.
    let mut patterns = Vec::with_capacity(manifest.modules().len());
    for module in manifest.modules() {
        if module.is_disabled() {
            patterns.push(None);
            continue;
        }
        module.check_step_lists()?;
        patterns.push(Some((module.stage_patterns()?, module.keep_patterns()?)));
    }

    let mut keep_files = vec![DEBUG_FILES_PATTERN.to_string()];

    for (index, (module, lists)) in manifest.modules_mut().iter_mut().zip(patterns).enumerate() {
        let Some((mut stage, keep)) = lists else {
            debug!(module = %module, "skipping disabled module");
            continue;
        };

        module.clear_patterns();
        stage.push(format!("@{DEBUG_FILES_PATTERN}"));
        stage.extend(keep.iter().cloned());
        keep_files.extend(keep);

        let (command, allowed) = if index == last_index {
            (FINAL_SNAPSHOT_COMMAND, keep_files.clone())
        } else {
            (SNAPSHOT_COMMAND, stage)
        };

        debug!(module = %module, patterns = allowed.len(), "injecting file-list check");
        module.post_install()?.push(Value::from(command));
        module.sources()?.push(allowed_source(allowed));
    }

    manifest.add_module(filelist_module(tool_path), Some(0));
    Ok(())
}
