//! Helpers shared by the integration tests
//!
//! Real module libraries are compiled once per test binary from
//! `tests/fixtures/module.rs` with the same `rustc` cargo uses.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX, EXE_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use void_loader::ModuleHandle;

const MODULE_SOURCE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/module.rs");

/// Variants of the fixture module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    /// Reports `1.0.0`, `fixture_revision() == 1`
    First,
    /// Reports `2.0.0`, `fixture_revision() == 2`
    Next,
    /// Reports API version 99
    FutureApi,
    /// No discovery entry points
    Plain,
}

impl Revision {
    fn cfg(self) -> Option<&'static str> {
        match self {
            Revision::First => None,
            Revision::Next => Some("next"),
            Revision::FutureApi => Some("future_api"),
            Revision::Plain => Some("plain"),
        }
    }

    fn dir_name(self) -> &'static str {
        match self {
            Revision::First => "first",
            Revision::Next => "next",
            Revision::FutureApi => "future_api",
            Revision::Plain => "plain",
        }
    }
}

struct Builds {
    dir: tempfile::TempDir,
    built: HashMap<Revision, PathBuf>,
}

static BUILDS: OnceLock<Mutex<Builds>> = OnceLock::new();

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// File name of a module called `name` on this platform
pub fn module_file(name: &str) -> String {
    format!("{}{}", name, DLL_SUFFIX)
}

fn rustc() -> PathBuf {
    if let Some(rustc) = std::env::var_os("RUSTC") {
        return rustc.into();
    }
    if let Some(cargo) = std::env::var_os("CARGO") {
        let sibling = Path::new(&cargo).with_file_name(format!("rustc{}", EXE_SUFFIX));
        if sibling.is_file() {
            return sibling;
        }
    }
    PathBuf::from("rustc")
}

/// Path of the compiled fixture for `revision`
pub fn module_binary(revision: Revision) -> PathBuf {
    let builds = BUILDS.get_or_init(|| {
        Mutex::new(Builds {
            dir: tempfile::tempdir().unwrap(),
            built: HashMap::new(),
        })
    });
    let mut builds = builds.lock();
    if let Some(path) = builds.built.get(&revision) {
        return path.clone();
    }

    let out_dir = builds.dir.path().join(revision.dir_name());
    fs::create_dir_all(&out_dir).unwrap();
    let out = out_dir.join(format!("{}fixture{}", DLL_PREFIX, DLL_SUFFIX));

    let mut command = Command::new(rustc());
    command
        .args(["--crate-type", "cdylib", "--crate-name", "fixture", "--edition", "2021"])
        .args(["-C", "opt-level=0", "-o"])
        .arg(&out)
        .arg(MODULE_SOURCE);
    if let Some(cfg) = revision.cfg() {
        command.args(["--cfg", cfg]);
    }

    let output = command.output().unwrap();
    assert!(
        output.status.success(),
        "building the {:?} module failed:\n{}",
        revision,
        String::from_utf8_lossy(&output.stderr)
    );

    builds.built.insert(revision, out.clone());
    out
}

/// Copy the fixture for `revision` into `dir` as `file_name`
///
/// The copy lands under a temporary name first and is renamed into place, the
/// way a build tool replaces an output.
pub fn install(revision: Revision, dir: &Path, file_name: &str) -> PathBuf {
    let target = dir.join(file_name);
    let partial = dir.join(format!("{}.partial", file_name));
    fs::copy(module_binary(revision), &partial).unwrap();
    fs::rename(&partial, &target).unwrap();
    target
}

/// Value of the fixture's `fixture_revision` export
pub fn revision_of(handle: &ModuleHandle) -> u32 {
    unsafe {
        let revision = handle
            .get::<unsafe extern "C" fn() -> u32>(b"fixture_revision\0")
            .unwrap();
        revision()
    }
}
