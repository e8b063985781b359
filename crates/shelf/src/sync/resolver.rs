//! Last-write-wins conflict resolution

use crate::models::{Record, versions_match};

/// Which replica a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Outcome of comparing the two copies of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Only one replica has the key; the other adopts it
    NoConflict(Side),
    /// Local copy is strictly newer; overwrite the remote
    KeepLocal,
    /// Remote copy is newer (or wins a tie); overwrite the local
    KeepRemote,
    /// Nothing to do
    Converged,
}

/// Decide which copy of a key survives
///
/// Versions within [`crate::models::VERSION_EPSILON`] of each other are the
/// same version. Identical records at the same version are already
/// converged; differing records at the same version resolve to the remote
/// copy, so every device settles on whatever the server holds.
pub fn resolve<E: Record>(local: Option<&E>, remote: Option<&E>) -> Decision {
    match (local, remote) {
        (None, None) => Decision::Converged,
        (Some(_), None) => Decision::NoConflict(Side::Local),
        (None, Some(_)) => Decision::NoConflict(Side::Remote),
        (Some(local), Some(remote)) => {
            let (lv, rv) = (local.version(), remote.version());
            if versions_match(lv, rv) {
                if local == remote {
                    Decision::Converged
                } else {
                    Decision::KeepRemote
                }
            } else if lv > rv {
                Decision::KeepLocal
            } else {
                Decision::KeepRemote
            }
        }
    }
}
