pub mod pack;
pub mod unpack;

use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::platform::Identity;
use crate::prompt::Gate;
use crate::session::Session;
use crate::vars::Builtins;

/// Build the interactive session and builtin variables for a command run
/// by the invoking user.
#[must_use]
pub fn interactive_session(global: &GlobalOpts, log: &Arc<Logger>) -> (Session, Builtins) {
    let identity = Identity::detect();
    let builtins = Builtins::new(&identity, global.use_defaults);
    log.debug(&format!(
        "running as {} ({}), group {} ({})",
        identity.user, identity.uid, identity.group, identity.gid
    ));
    let session = Session::new(
        Gate::stdin(),
        log.clone(),
        Arc::new(SystemExecutor),
        identity,
        global.dry_run,
    );
    (session, builtins)
}
