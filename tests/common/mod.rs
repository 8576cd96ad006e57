// Shared helpers for integration tests.
//
// Provides a temporary directory with three roots: `src/` holds a manifest
// and the files it packs, `target/` plays the system being deployed to, and
// `target/ws/` is the workspace. Sessions answer prompts from a script and
// run real processes, so fixtures avoid owners and merges.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use myinit_cli::archive;
use myinit_cli::commands::unpack::{Selector, unpack};
use myinit_cli::config::Manifest;
use myinit_cli::error::MyinitError;
use myinit_cli::exec::SystemExecutor;
use myinit_cli::logging::Logger;
use myinit_cli::platform::Identity;
use myinit_cli::prompt::{Gate, ScriptedSource};
use myinit_cli::session::Session;
use myinit_cli::vars::Builtins;

/// A manifest with three shell files and a binary asset. `{Root}` is a
/// builtin pointing at `src/` when packing and at `target/` when unpacking.
pub fn manifest(version: u32) -> String {
    manifest_with(version, "none")
}

/// [`manifest`] with `.profile` carrying the given `expectWhenUnpack`.
pub fn manifest_with(version: u32, profile_expect: &str) -> String {
    r#"id: dots
confVersion: "@VERSION@"
commonVarDict:
  WorkspaceDir: "{Root}/ws/"
  HomeDir: "{Root}/home/"
entries:
  - id: shell/rc
    type: file
    files:
      - {name: .bashrc, archiveDir: shell/, systemDir: "{HomeDir}"}
      - {name: .inputrc, archiveDir: shell/, systemDir: "{HomeDir}"}
  - id: shell/profile
    type: file
    files:
      - {name: .profile, archiveDir: shell/, systemDir: "{HomeDir}", expectWhenUnpack: @EXPECT@}
  - id: assets
    type: file
    files:
      - {name: logo.bin, archiveDir: assets/, systemDir: "{HomeDir}share/"}
"#
    .replace("@VERSION@", &version.to_string())
    .replace("@EXPECT@", profile_expect)
}

/// Bytes that do not decode as UTF-8.
pub const BINARY_V1: &[u8] = &[0x89, b'P', b'N', b'G', 0xff, 0x00, 0x01];
pub const BINARY_V2: &[u8] = &[0x89, b'P', b'N', b'G', 0xff, 0x00, 0x02];

/// Outcome of one unpack run.
pub struct Run {
    pub result: Result<(), MyinitError>,
    pub source: ScriptedSource,
    pub log: Arc<Logger>,
}

impl Run {
    /// Every prompt shown during the run.
    pub fn prompts(&self) -> Vec<String> {
        self.source.prompts()
    }
}

/// An isolated pack/unpack environment backed by a [`tempfile::TempDir`].
pub struct Fixture {
    pub tmp: tempfile::TempDir,
}

impl Fixture {
    /// Create the fixture with version 1 of the manifest and its files.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(tmp.path().join("target")).expect("create target dir");
        let fixture = Self { tmp };
        fixture.write_manifest(&manifest(1));
        fixture.write_source("home/.bashrc", b"alias ll='ls -l'\n");
        fixture.write_source("home/.inputrc", b"set bell-style none\n");
        fixture.write_source("home/.profile", b"export EDITOR=vi\n");
        fixture.write_source("home/share/logo.bin", BINARY_V1);
        fixture
    }

    /// The packing root.
    pub fn src(&self) -> PathBuf {
        self.tmp.path().join("src")
    }

    /// The system being deployed to.
    pub fn target(&self) -> PathBuf {
        self.tmp.path().join("target")
    }

    /// The workspace inside the target.
    pub fn workspace(&self) -> PathBuf {
        self.target().join("ws")
    }

    /// Path of `rel` on the target system.
    pub fn system(&self, rel: &str) -> PathBuf {
        self.target().join(rel)
    }

    /// Replace the manifest in `src/`.
    pub fn write_manifest(&self, text: &str) {
        self.write_source("config.yaml", text.as_bytes());
    }

    /// Write a file below `src/`.
    pub fn write_source(&self, rel: &str, contents: &[u8]) {
        let path = self.src().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create source dir");
        }
        fs::write(path, contents).expect("write source file");
    }

    /// Write a file on the target system.
    pub fn write_system(&self, rel: &str, contents: &[u8]) {
        let path = self.system(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create system dir");
        }
        fs::write(path, contents).expect("write system file");
    }

    /// Read a file from the target system.
    pub fn read_system(&self, rel: &str) -> Vec<u8> {
        fs::read(self.system(rel)).expect("read system file")
    }

    /// Pack `src/config.yaml`.
    pub fn pack(&self) -> Result<PathBuf, MyinitError> {
        self.pack_with(&[], false)
    }

    /// Pack with scripted answers and an explicit dry-run flag.
    pub fn pack_with(&self, answers: &[&str], dry_run: bool) -> Result<PathBuf, MyinitError> {
        let manifest_path = self.src().join("config.yaml");
        let mut manifest = Manifest::load(&manifest_path, builtins(&self.src()))?;
        let (mut session, _, _) = session(answers, dry_run);
        archive::pack(&mut manifest, &manifest_path, &mut session)
    }

    /// Unpack `archive` into the target with scripted answers.
    pub fn unpack(&self, archive: &Path, answers: &[&str]) -> Run {
        self.unpack_with(archive, None, answers, false)
    }

    /// Unpack with a selector and dry-run flag.
    pub fn unpack_with(
        &self,
        archive: &Path,
        selector: Option<&Selector>,
        answers: &[&str],
        dry_run: bool,
    ) -> Run {
        let (mut session, source, log) = session(answers, dry_run);
        let result = unpack(archive, selector, &builtins(&self.target()), &mut session);
        Run {
            result,
            source,
            log,
        }
    }
}

/// Builtins for the current user, with `{Root}` pointing at `root`.
pub fn builtins(root: &Path) -> Builtins {
    Builtins::new(&Identity::detect(), false).with("Root", &root.display().to_string())
}

/// A session that answers from `answers` and runs real processes.
pub fn session(answers: &[&str], dry_run: bool) -> (Session, ScriptedSource, Arc<Logger>) {
    let source = ScriptedSource::new(answers.iter().copied());
    let log = Arc::new(Logger::new(None));
    let session = Session::new(
        Gate::new(Box::new(source.clone())),
        log.clone(),
        Arc::new(SystemExecutor),
        Identity::detect(),
        dry_run,
    );
    (session, source, log)
}
