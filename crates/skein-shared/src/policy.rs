//! Thread access-control policy.
//!
//! Every access decision (reading, annotating, writing, sharing) is a pure
//! function of the four policy fields. The same [`SharingPolicy::shareable`]
//! runs when issuing an invite, when accepting one and when restoring a
//! thread from backup.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Who may read and write a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadType {
    /// Only the initiator.
    Private,
    /// Members read; only the initiator writes or annotates.
    ReadOnly,
    /// Members read and annotate; only the initiator writes.
    Public,
    /// Members read, annotate and write.
    Open,
}

impl ThreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::ReadOnly => "read_only",
            Self::Public => "public",
            Self::Open => "open",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "read_only" => Some(Self::ReadOnly),
            "public" => Some(Self::Public),
            "open" => Some(Self::Open),
            _ => None,
        }
    }
}

/// Who may hand the thread on to others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sharing {
    /// Nobody shares; the initiator may only restore it for itself.
    NotShared,
    /// The initiator and explicitly listed members share.
    InviteOnly,
    /// Any current member shares.
    Shared,
}

impl Sharing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotShared => "not_shared",
            Self::InviteOnly => "invite_only",
            Self::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_shared" => Some(Self::NotShared),
            "invite_only" => Some(Self::InviteOnly),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// The policy fields of a thread, detached from any loaded thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingPolicy {
    pub initiator: UserId,
    pub thread_type: ThreadType,
    pub sharing: Sharing,
    /// Allow-list of addresses. Empty means anyone.
    pub members: Vec<UserId>,
}

impl SharingPolicy {
    /// Whether `addr` passes the member allow-list.
    pub fn is_member(&self, addr: &UserId) -> bool {
        self.members.is_empty() || *addr == self.initiator || self.members.contains(addr)
    }

    /// Listed by name, not merely admitted by an empty allow-list.
    fn is_listed(&self, addr: &UserId) -> bool {
        *addr == self.initiator || self.members.contains(addr)
    }

    pub fn readable(&self, addr: &UserId) -> bool {
        if *addr == self.initiator {
            return true;
        }
        if self.thread_type == ThreadType::Private {
            return false;
        }
        self.is_member(addr)
    }

    /// May add comments, likes, flags and ignores.
    pub fn annotatable(&self, addr: &UserId) -> bool {
        if !self.readable(addr) {
            return false;
        }
        match self.thread_type {
            ThreadType::Public | ThreadType::Open => true,
            ThreadType::Private | ThreadType::ReadOnly => *addr == self.initiator,
        }
    }

    /// May add messages and files.
    pub fn writable(&self, addr: &UserId) -> bool {
        if !self.readable(addr) {
            return false;
        }
        match self.thread_type {
            ThreadType::Open => true,
            _ => *addr == self.initiator,
        }
    }

    /// Whether `requester` may hand this thread to `grantee`.
    pub fn shareable(&self, requester: &UserId, grantee: &UserId) -> bool {
        if self.thread_type == ThreadType::Private {
            return *requester == self.initiator && *grantee == self.initiator;
        }

        let type_ok = match self.thread_type {
            ThreadType::ReadOnly => *requester == self.initiator,
            _ => self.is_member(requester),
        };
        if !type_ok {
            return false;
        }

        let sharing_ok = match self.sharing {
            Sharing::NotShared => *requester == self.initiator && *grantee == self.initiator,
            Sharing::InviteOnly => self.is_listed(requester),
            Sharing::Shared => self.is_member(requester),
        };

        sharing_ok && self.is_member(grantee)
    }

    /// Whether `requester` may widen the allow-list to include `grantee`
    /// before inviting them. Only the initiator ever changes the list.
    pub fn can_extend_members(&self, requester: &UserId) -> bool {
        *requester == self.initiator
            && self.thread_type != ThreadType::Private
            && self.sharing != Sharing::NotShared
    }

    /// Copy with `grantee` appended to a non-empty allow-list.
    pub fn with_member(&self, grantee: UserId) -> Self {
        let mut next = self.clone();
        if !next.members.is_empty() && !next.members.contains(&grantee) {
            next.members.push(grantee);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(b: u8) -> UserId {
        UserId([b; 32])
    }

    fn policy(thread_type: ThreadType, sharing: Sharing, members: Vec<UserId>) -> SharingPolicy {
        SharingPolicy {
            initiator: user(1),
            thread_type,
            sharing,
            members,
        }
    }

    #[test]
    fn test_private_only_initiator() {
        let p = policy(ThreadType::Private, Sharing::Shared, vec![]);
        assert!(p.readable(&user(1)));
        assert!(!p.readable(&user(2)));
        assert!(p.shareable(&user(1), &user(1)));
        assert!(!p.shareable(&user(1), &user(2)));
    }

    #[test]
    fn test_read_only_shared_by_initiator_only() {
        let p = policy(ThreadType::ReadOnly, Sharing::Shared, vec![]);
        assert!(p.shareable(&user(1), &user(2)));
        assert!(!p.shareable(&user(2), &user(3)));
        assert!(p.readable(&user(2)));
        assert!(!p.writable(&user(2)));
        assert!(!p.annotatable(&user(2)));
    }

    #[test]
    fn test_public_members_annotate_not_write() {
        let p = policy(ThreadType::Public, Sharing::Shared, vec![]);
        assert!(p.annotatable(&user(2)));
        assert!(!p.writable(&user(2)));
        assert!(p.writable(&user(1)));
    }

    #[test]
    fn test_open_members_write() {
        let p = policy(ThreadType::Open, Sharing::Shared, vec![user(1), user(2)]);
        assert!(p.writable(&user(2)));
        assert!(!p.readable(&user(3)));
    }

    #[test]
    fn test_not_shared_blocks_everyone_else() {
        let p = policy(ThreadType::Open, Sharing::NotShared, vec![]);
        assert!(p.shareable(&user(1), &user(1)));
        assert!(!p.shareable(&user(1), &user(2)));
        assert!(!p.shareable(&user(2), &user(2)));
    }

    #[test]
    fn test_invite_only_requires_listed_requester() {
        let p = policy(ThreadType::Open, Sharing::InviteOnly, vec![]);
        // empty list admits everyone as a member, but only the initiator is listed
        assert!(p.shareable(&user(1), &user(3)));
        assert!(!p.shareable(&user(2), &user(3)));

        let p = policy(ThreadType::Open, Sharing::InviteOnly, vec![user(1), user(2), user(3)]);
        assert!(p.shareable(&user(2), &user(3)));
    }

    #[test]
    fn test_shared_any_member_reshares() {
        let p = policy(ThreadType::Open, Sharing::Shared, vec![]);
        assert!(p.shareable(&user(2), &user(3)));
    }

    #[test]
    fn test_grantee_must_pass_allow_list() {
        let p = policy(ThreadType::Open, Sharing::InviteOnly, vec![user(1)]);
        assert!(!p.shareable(&user(1), &user(2)));
        assert!(p.can_extend_members(&user(1)));
        assert!(!p.can_extend_members(&user(2)));

        let widened = p.with_member(user(2));
        assert!(widened.shareable(&user(1), &user(2)));
        assert_eq!(widened.members, vec![user(1), user(2)]);
    }

    #[test]
    fn test_with_member_leaves_open_list_alone() {
        let p = policy(ThreadType::Open, Sharing::Shared, vec![]);
        assert!(p.with_member(user(2)).members.is_empty());
    }

    #[test]
    fn test_non_initiator_cannot_gain_share_rights_by_sharing() {
        // a member who is not listed cannot widen the list, so the denial stands
        let p = policy(ThreadType::Open, Sharing::InviteOnly, vec![user(1), user(2)]);
        assert!(!p.shareable(&user(2), &user(4)));
        assert!(!p.can_extend_members(&user(2)));
    }

    #[test]
    fn test_type_and_sharing_string_roundtrip() {
        for t in [ThreadType::Private, ThreadType::ReadOnly, ThreadType::Public, ThreadType::Open] {
            assert_eq!(ThreadType::parse(t.as_str()), Some(t));
        }
        for s in [Sharing::NotShared, Sharing::InviteOnly, Sharing::Shared] {
            assert_eq!(Sharing::parse(s.as_str()), Some(s));
        }
    }
}
