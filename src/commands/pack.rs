use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::archive;
use crate::cli::{GlobalOpts, PackOpts};
use crate::config::{MANIFEST_MEMBER, Manifest};
use crate::logging::Logger;

/// Run the pack command on `./config.yaml`.
///
/// # Errors
///
/// Returns an error in dry-run mode, or if the manifest is invalid or a
/// tracked file cannot be read.
pub fn run(global: &GlobalOpts, _opts: &PackOpts, log: &Arc<Logger>) -> Result<()> {
    let (mut session, builtins) = super::interactive_session(global, log);

    let manifest_path = Path::new(MANIFEST_MEMBER);
    log.stage("Loading manifest");
    let mut manifest = Manifest::load(manifest_path, builtins)
        .with_context(|| format!("loading {}", manifest_path.display()))?;
    log.info(&format!(
        "{}: {} entries",
        manifest.id,
        manifest.entries.len()
    ));

    log.stage("Packing");
    let out = archive::pack(&mut manifest, manifest_path, &mut session)?;
    log.info(&format!("wrote {}", out.display()));
    Ok(())
}
