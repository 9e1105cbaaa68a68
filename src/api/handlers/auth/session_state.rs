//! Explicit session state machine.
//!
//! Every request resolves to exactly one of these states. Anonymous means no
//! valid session row exists; the other three are persisted in the `state`
//! column of the sessions table. Pending and full authentication are
//! mutually exclusive because a session row holds a single state.

use uuid::Uuid;

pub(crate) const KIND_REGISTERED: &str = "registered";
pub(crate) const KIND_PENDING_2FA: &str = "pending_2fa";
pub(crate) const KIND_AUTHENTICATED: &str = "authenticated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// No session cookie, or the cookie does not match a live row.
    Anonymous,
    /// Signup completed; the user is known but not logged in.
    Registered(Uuid),
    /// Password verified; a TOTP code is still outstanding.
    PendingSecondFactor(Uuid),
    /// Fully logged in.
    Authenticated(Uuid),
}

impl SessionState {
    /// The persisted kind string, `None` for `Anonymous` (absence of a row).
    #[must_use]
    pub(crate) fn kind(&self) -> Option<&'static str> {
        match self {
            Self::Anonymous => None,
            Self::Registered(_) => Some(KIND_REGISTERED),
            Self::PendingSecondFactor(_) => Some(KIND_PENDING_2FA),
            Self::Authenticated(_) => Some(KIND_AUTHENTICATED),
        }
    }

    /// Rebuild a state from a persisted row. Unknown kinds map to `None`
    /// rather than guessing.
    #[must_use]
    pub(crate) fn from_row(kind: &str, user_id: Uuid) -> Option<Self> {
        match kind {
            KIND_REGISTERED => Some(Self::Registered(user_id)),
            KIND_PENDING_2FA => Some(Self::PendingSecondFactor(user_id)),
            KIND_AUTHENTICATED => Some(Self::Authenticated(user_id)),
            _ => None,
        }
    }

    #[must_use]
    pub(crate) fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::Registered(id) | Self::PendingSecondFactor(id) | Self::Authenticated(id) => {
                Some(*id)
            }
        }
    }

}
