//! Inbound message loop.
//!
//! Each message is handled on its own task. A failing block is logged and
//! dropped; the other threads keep going.

use futures::{stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use skein_net::InboundMessage;

use crate::error::CoreError;
use crate::node::{Inbound, Node};
use crate::thread::Applied;

/// Feed every message from `inbound` into `node` until the stream ends,
/// then wait for the tasks still in flight.
pub async fn run<S>(node: Node, inbound: S)
where
    S: Stream<Item = InboundMessage> + Unpin,
{
    let mut inbound = inbound;
    let mut tasks = JoinSet::new();
    info!("sync loop started");

    loop {
        tokio::select! {
            message = inbound.next() => {
                let Some(message) = message else { break };
                let node = node.clone();
                tasks.spawn(async move { process(&node, message).await });
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "inbound task failed");
                }
            }
        }
    }

    while let Some(done) = tasks.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "inbound task failed");
        }
    }
    info!("sync loop finished");
}

/// Adapt a bounded channel of inbound messages to a stream.
pub fn from_receiver(mut rx: mpsc::Receiver<InboundMessage>) -> impl Stream<Item = InboundMessage> + Unpin {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}

/// Same as [`from_receiver`] for an unbounded channel.
pub fn from_unbounded(mut rx: mpsc::UnboundedReceiver<InboundMessage>) -> impl Stream<Item = InboundMessage> + Unpin {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}

/// Handle one message and log the outcome.
pub async fn process(node: &Node, message: InboundMessage) {
    let topic = message.topic.clone();
    match node.handle_message(message).await {
        Ok(Inbound::Block { thread, id, applied }) => match applied {
            Applied::Duplicate => debug!(thread = %thread, block = %id, "duplicate block"),
            Applied::Merged(merge) => {
                info!(thread = %thread, block = %id, merge = %merge, "block merged")
            }
            _ => debug!(thread = %thread, block = %id, outcome = ?applied, "block received"),
        },
        Ok(Inbound::Invite(id)) => debug!(invite = %id, "invite stored"),
        Ok(Inbound::Ignored) => {}
        Err(CoreError::ThreadNotFound) => debug!(topic = %topic, "block for a thread we do not hold"),
        Err(e) if e.is_retryable() => {
            warn!(topic = %topic, error = %e, "inbound message failed, a later block may carry it")
        }
        Err(e) => warn!(topic = %topic, error = %e, kind = ?e.kind(), "inbound message rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AddThreadConfig;
    use crate::testing::TestPeer;
    use skein_shared::{Sharing, ThreadType};

    #[tokio::test]
    async fn test_bad_message_does_not_stop_the_loop() {
        let peer = TestPeer::new("a").await;
        let thread = peer
            .node
            .add_thread(AddThreadConfig::new("chat", ThreadType::Open, Sharing::Shared))
            .await
            .unwrap();

        let garbage = InboundMessage {
            topic: thread.topic(),
            data: vec![0xff; 7],
        };
        let foreign = InboundMessage {
            topic: "elsewhere".into(),
            data: vec![1, 2, 3],
        };
        run(peer.node.clone(), stream::iter(vec![garbage, foreign])).await;

        assert_eq!(thread.heads().len(), 1);

        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        run(peer.node.clone(), from_receiver(rx)).await;
    }
}
