//! # Peer-Trust Predicate
//!
//! A composable acceptor tree evaluated against every inbound message before
//! it reaches a handler. On this crate's Unix-domain-socket binding, the
//! transport's code-signing introspection is bound to `SO_PEERCRED`: a
//! listener can read the connecting peer's pid/uid/gid but not a code
//! signature, so [`Acceptor::SecRequirement`] and the acceptors that reduce
//! to it compare credentials rather than a signed blob. This substitution is
//! recorded as an Open Question resolution in `DESIGN.md`.

use std::path::PathBuf;

/// The peer credentials obtained from the connection's `SO_PEERCRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: Option<u32>,
    pub uid: u32,
    pub gid: u32,
}

/// Errors from the sandbox-expansion bookmark-resolution step.
///
/// The hook runs on untrusted input ahead of any trust decision, so failure
/// here must never crash — it is folded into a plain acceptor refusal.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("client bookmark could not be resolved: {0}")]
    MalformedBookmark(String),
}

/// The POSIX stand-in for an opaque host `SecRequirement` blob: an allowed
/// peer credential record. Equality compares the full record, which is this
/// binding's analog of "requirements compare as serialized bytes".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecRequirement {
    pub allowed_uid: Option<u32>,
    pub allowed_gid: Option<u32>,
    /// Canonical path the peer's `/proc/<pid>/exe` must equal, the closest
    /// POSIX analog of validating a peer's on-disk code identity.
    pub allowed_exe_path: Option<PathBuf>,
}

impl SecRequirement {
    pub fn uid(uid: u32) -> Self {
        Self {
            allowed_uid: Some(uid),
            allowed_gid: None,
            allowed_exe_path: None,
        }
    }

    pub fn exe_path(path: impl Into<PathBuf>) -> Self {
        Self {
            allowed_uid: None,
            allowed_gid: None,
            allowed_exe_path: Some(path.into()),
        }
    }

    fn is_satisfied_by(&self, peer: &PeerCredentials) -> bool {
        if let Some(uid) = self.allowed_uid {
            if peer.uid != uid {
                return false;
            }
        }
        if let Some(gid) = self.allowed_gid {
            if peer.gid != gid {
                return false;
            }
        }
        if let Some(expected) = &self.allowed_exe_path {
            match peer.pid.and_then(peer_exe_path) {
                Some(actual) => {
                    if &actual != expected {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// A recursive peer-trust predicate, closed under conjunction and
/// disjunction.
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptor {
    Always,
    /// Valid only against a peer connected strictly after the listener was
    /// created — see the data model's note on anonymous peers.
    SameProcess,
    SecRequirement(SecRequirement),
    /// Compiles to a [`SecRequirement`] comparing `uid`, since this binding
    /// has no team-signing concept of its own.
    TeamIdentifier(String),
    /// The peer's `/proc/<pid>/exe` must be a path-prefix descendant of this
    /// bundle path, resolved from `__client_bookmark` via the
    /// sandbox-expansion hook.
    ParentBundle(PathBuf),
    ParentDesignatedRequirement,
    And(Box<Acceptor>, Box<Acceptor>),
    Or(Box<Acceptor>, Box<Acceptor>),
}

impl Acceptor {
    pub fn and(self, other: Acceptor) -> Acceptor {
        if other == Acceptor::Always {
            return self;
        }
        if self == Acceptor::Always {
            return other;
        }
        Acceptor::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Acceptor) -> Acceptor {
        if self == Acceptor::Always || other == Acceptor::Always {
            return Acceptor::Always;
        }
        Acceptor::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates this acceptor against a connection's peer credentials and
    /// the inbound message's raw `__client_bookmark` bytes.
    ///
    /// Bookmark resolution failures refuse the message rather than
    /// propagating — the hook runs on untrusted input before trust has been
    /// established and must fail closed without crashing.
    pub fn accepts(&self, peer: &PeerCredentials, client_bookmark: &[u8]) -> bool {
        match self {
            Acceptor::Always => true,
            Acceptor::SameProcess => peer.pid == Some(std::process::id()),
            Acceptor::SecRequirement(req) => req.is_satisfied_by(peer),
            Acceptor::TeamIdentifier(team_id) => match team_id.parse::<u32>() {
                Ok(uid) => peer.uid == uid,
                Err(_) => false,
            },
            Acceptor::ParentBundle(bundle) => match resolve_bookmark(client_bookmark) {
                Ok(claimed_path) => {
                    claimed_path.starts_with(bundle)
                        && peer
                            .pid
                            .and_then(peer_exe_path)
                            .is_some_and(|exe| exe.starts_with(bundle))
                }
                Err(_) => false,
            },
            Acceptor::ParentDesignatedRequirement => {
                // POSIX stand-in: the peer was spawned by a process running
                // as the same user as this one.
                peer.uid == current_uid()
            }
            Acceptor::And(a, b) => a.accepts(peer, client_bookmark) && b.accepts(peer, client_bookmark),
            Acceptor::Or(a, b) => a.accepts(peer, client_bookmark) || b.accepts(peer, client_bookmark),
        }
    }
}

/// Resolves a `__client_bookmark` blob to a canonical filesystem path.
///
/// The original bookmark format is a host-specific opaque reference; on
/// this binding the bookmark is simply the client's own bundle path encoded
/// as UTF-8, canonicalized the same way `std::fs::canonicalize` would
/// expand a host bookmark.
pub fn resolve_bookmark(bookmark: &[u8]) -> Result<PathBuf, TrustError> {
    let text = std::str::from_utf8(bookmark)
        .map_err(|e| TrustError::MalformedBookmark(e.to_string()))?;
    std::fs::canonicalize(text).map_err(|e| TrustError::MalformedBookmark(e.to_string()))
}

fn peer_exe_path(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe")).ok()
}

fn current_uid() -> u32 {
    // SAFETY: `getuid` takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

/// Reads `SO_PEERCRED`-equivalent credentials off a connected Unix stream.
pub fn peer_credentials(stream: &tokio::net::UnixStream) -> std::io::Result<PeerCredentials> {
    let creds = stream.peer_cred()?;
    Ok(PeerCredentials {
        pid: creds.pid().map(|p| p as u32),
        uid: creds.uid(),
        gid: creds.gid(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_with_always_is_identity() {
        let p = Acceptor::SecRequirement(SecRequirement::uid(501));
        assert_eq!(p.clone().and(Acceptor::Always), p);
        assert_eq!(Acceptor::Always.and(p.clone()), p);
    }

    #[test]
    fn or_with_always_is_always() {
        let p = Acceptor::SecRequirement(SecRequirement::uid(501));
        assert_eq!(p.clone().or(Acceptor::Always), Acceptor::Always);
        assert_eq!(Acceptor::Always.or(p), Acceptor::Always);
    }

    #[test]
    fn sec_requirement_checks_uid() {
        let req = Acceptor::SecRequirement(SecRequirement::uid(501));
        let matching = PeerCredentials { pid: None, uid: 501, gid: 0 };
        let mismatched = PeerCredentials { pid: None, uid: 999, gid: 0 };
        assert!(req.accepts(&matching, b""));
        assert!(!req.accepts(&mismatched, b""));
    }

    #[test]
    fn team_identifier_rejects_non_numeric_id() {
        let acceptor = Acceptor::TeamIdentifier("ZZZZZ".to_string());
        let peer = PeerCredentials { pid: None, uid: 501, gid: 0 };
        assert!(!acceptor.accepts(&peer, b""));
    }

    #[test]
    fn malformed_bookmark_refuses_without_panicking() {
        let acceptor = Acceptor::ParentBundle(PathBuf::from("/opt/app"));
        let peer = PeerCredentials { pid: Some(1), uid: 0, gid: 0 };
        assert!(!acceptor.accepts(&peer, b"\xff\xfe not utf8"));
    }
}
