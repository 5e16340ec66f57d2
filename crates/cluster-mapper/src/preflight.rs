// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use tracing::{info, warn};

use crate::error::RunError;

/// Raises the soft open file limit as far as the hard limit allows, and refuses to go on if it
/// still isn't above `required`. Every in-flight probe holds several sockets at once.
pub fn check_fd_limit(required: u64) -> Result<(), RunError> {
    ensure_fd_limit(raise_fd_limit(), required)
}

/// Raises the soft open file limit to the hard limit. `None` when the platform can't tell.
pub fn raise_fd_limit() -> Option<u64> {
    let limit = fdlimit::raise_fd_limit();
    match limit {
        Some(limit) => info!(limit, "Open file descriptor limit"),
        None => warn!("Unable to determine the open file descriptor limit on this platform"),
    }
    limit
}

/// Refuses a known `limit` at or under `required`. An unknown limit is let through.
pub fn ensure_fd_limit(limit: Option<u64>, required: u64) -> Result<(), RunError> {
    match limit {
        Some(limit) if limit <= required => Err(RunError::FdLimitTooLow { limit, required }),
        _ => Ok(()),
    }
}

/// The trace primitive needs raw sockets. Running as root, or through sudo, is a good sign that
/// they are available.
pub fn is_likely_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    euid == 0 || has_sudo_env(|key| std::env::var_os(key).is_some())
}

fn has_sudo_env(is_set: impl Fn(&str) -> bool) -> bool {
    ["SUDO_UID", "SUDO_GID", "SUDO_USER"]
        .into_iter()
        .any(is_set)
}
