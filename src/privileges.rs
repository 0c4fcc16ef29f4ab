//! Privilege drop for the --user/--group options. One-way: there is no
//! escalation back once this returns.

use std::ffi::CString;

use anyhow::{Context, Result, anyhow};
use nix::unistd::{self, Gid, Group, Uid, User};

/// Switch to the named user and/or group. A missing half keeps the
/// current effective id, as the two options are independent. Runs before
/// any file the daemon owns is written.
pub fn drop_privileges(user: Option<&str>, group: Option<&str>) -> Result<()> {
    let gid: Gid = match group {
        Some(name) => {
            Group::from_name(name)
                .with_context(|| format!("looking up group {name:?}"))?
                .ok_or_else(|| anyhow!("unknown group {name:?}"))?
                .gid
        }
        None => unistd::getegid(),
    };

    let resolved_user = match user {
        Some(name) => Some(
            User::from_name(name)
                .with_context(|| format!("looking up user {name:?}"))?
                .ok_or_else(|| anyhow!("unknown user {name:?}"))?,
        ),
        None => None,
    };
    let uid: Uid = resolved_user
        .as_ref()
        .map_or_else(unistd::geteuid, |u| u.uid);

    // Supplementary groups must be set while still privileged.
    if let Some(record) = &resolved_user {
        let name = CString::new(record.name.as_str()).context("user name contains NUL")?;
        unistd::initgroups(&name, gid)
            .with_context(|| format!("initgroups for {:?} failed", record.name))?;
    }
    unistd::setgid(gid).with_context(|| format!("setgid({gid}) failed"))?;
    unistd::setuid(uid).with_context(|| format!("setuid({uid}) failed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_are_reported() {
        // Resolution fails long before any setuid call, so this is safe to
        // run unprivileged.
        let err = drop_privileges(Some("no-such-user-vigild"), None)
            .expect_err("unknown user must fail");
        assert!(err.to_string().contains("no-such-user-vigild"));

        let err = drop_privileges(None, Some("no-such-group-vigild"))
            .expect_err("unknown group must fail");
        assert!(err.to_string().contains("no-such-group-vigild"));
    }
}
