//! GossipSub topic naming.

use skein_shared::{ThreadId, UserId};

const INBOX_PREFIX: &str = "skein:inbox:";

/// What an inbound topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Blocks of one thread.
    Thread(ThreadId),
    /// Invites addressed to one account.
    Inbox(UserId),
    Unknown,
}

impl TopicKind {
    pub fn classify(topic: &str) -> Self {
        if let Some(id) = ThreadId::from_topic(topic) {
            return TopicKind::Thread(id);
        }
        topic
            .strip_prefix(INBOX_PREFIX)
            .and_then(|hex| UserId::from_hex(hex).ok())
            .map(TopicKind::Inbox)
            .unwrap_or(TopicKind::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_topics() {
        let thread = ThreadId([1u8; 32]);
        let user = UserId([2u8; 32]);

        assert_eq!(TopicKind::classify(&thread.to_topic()), TopicKind::Thread(thread));
        assert_eq!(TopicKind::classify(&user.to_inbox_topic()), TopicKind::Inbox(user));
        assert_eq!(TopicKind::classify("chat:general"), TopicKind::Unknown);
        assert_eq!(TopicKind::classify("skein:inbox:zz"), TopicKind::Unknown);
    }
}
