//! The forwarding loop.
//!
//! Bytes received on one side are written to the other in arrival order.
//! Each side is either live or reconnecting; a reconnect runs in its own
//! task so the other side keeps being serviced, and payloads bound for a
//! reconnecting side are dropped.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Side};
use guri_transport::{Backoff, BackoffPolicy, Chunk, RetryError, Transport, TransportError};
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Leading byte of frames the module needs written in two parts
const SPLIT_MARKER: u8 = 6;

/// Frames longer than this with a leading [`SPLIT_MARKER`] are split
const SPLIT_THRESHOLD: usize = 10;

/// The writes a forwarded payload is broken into.
///
/// A payload starting with byte 6 and longer than 10 bytes goes out as its
/// first byte followed by the remainder; anything else goes out whole.
pub fn split_payload(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let (head, tail) = match payload.first() {
        Some(&SPLIT_MARKER) if payload.len() > SPLIT_THRESHOLD => payload.split_at(1),
        _ => (payload, &payload[payload.len()..]),
    };
    std::iter::once(head).chain((!tail.is_empty()).then_some(tail))
}

type ReconnectTask = JoinHandle<(Box<dyn Transport>, Result<(), RetryError<TransportError>>)>;

enum Link {
    Live(Box<dyn Transport>),
    Reconnecting(ReconnectTask),
    Gone,
}

enum LinkEvent {
    Chunk(Chunk),
    Reconnected(Box<dyn Transport>),
    ReconnectFailed(RetryError<TransportError>),
}

impl Link {
    /// Wait for something to happen on this side. Cancel safe.
    async fn event(&mut self) -> LinkEvent {
        match self {
            Link::Live(transport) => LinkEvent::Chunk(transport.next_chunk().await),
            Link::Reconnecting(task) => match task.await {
                Ok((transport, Ok(()))) => LinkEvent::Reconnected(transport),
                Ok((_, Err(err))) => LinkEvent::ReconnectFailed(err),
                Err(join) => LinkEvent::ReconnectFailed(RetryError::Failed(join.into())),
            },
            Link::Gone => std::future::pending().await,
        }
    }

    async fn shutdown(self, side: Side) {
        match self {
            Link::Live(mut transport) => {
                if let Err(err) = transport.close().await {
                    warn!("Failed to close {} ({}): {}", side, transport.name(), err);
                }
            }
            Link::Reconnecting(task) => task.abort(),
            Link::Gone => {}
        }
    }
}

async fn reconnect(
    mut transport: Box<dyn Transport>,
    policy: BackoffPolicy,
) -> (Box<dyn Transport>, Result<(), RetryError<TransportError>>) {
    if let Err(err) = transport.close().await {
        debug!("Closing {} before reconnect: {}", transport.name(), err);
    }

    let name = transport.name().to_string();
    let mut backoff = Backoff::new(policy);
    let result = backoff
        .until(&name, transport.as_mut(), |transport| transport.connect())
        .await;
    (transport, result)
}

/// Relays bytes between the radio module and the upstream peer
pub struct Forwarder {
    downstream: Link,
    upstream: Link,
    reconnect: bool,
    backoff: BackoffPolicy,
}

impl Forwarder {
    /// Take over two connected transports
    pub fn new(
        downstream: Box<dyn Transport>,
        upstream: Box<dyn Transport>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            downstream: Link::Live(downstream),
            upstream: Link::Live(upstream),
            reconnect: config.reconnect,
            backoff: config.backoff.clone(),
        }
    }

    /// Forward until `shutdown` resolves or a side is lost for good.
    ///
    /// Both transports are closed on return.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Forwarding started");

        let result = loop {
            let (side, event) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                event = self.downstream.event() => (Side::Downstream, event),
                event = self.upstream.event() => (Side::Upstream, event),
            };

            if let Err(err) = self.handle(side, event).await {
                error!("Forwarding stopped: {}", err);
                break Err(err);
            }
        };

        let downstream = std::mem::replace(&mut self.downstream, Link::Gone);
        let upstream = std::mem::replace(&mut self.upstream, Link::Gone);
        downstream.shutdown(Side::Downstream).await;
        upstream.shutdown(Side::Upstream).await;
        result
    }

    fn link_mut(&mut self, side: Side) -> &mut Link {
        match side {
            Side::Downstream => &mut self.downstream,
            Side::Upstream => &mut self.upstream,
        }
    }

    async fn handle(&mut self, side: Side, event: LinkEvent) -> Result<(), BridgeError> {
        match event {
            LinkEvent::Chunk(Chunk::Data(data)) => {
                self.forward(side, &data).await;
                Ok(())
            }
            LinkEvent::Chunk(Chunk::EndOfStream) => {
                info!("{} stream closed", side);
                self.lost(side, None)
            }
            LinkEvent::Chunk(Chunk::Error(err)) => {
                warn!("{} read failed: {}", side, err);
                self.lost(side, Some(err))
            }
            LinkEvent::Reconnected(transport) => {
                info!("{} reconnected ({})", side, transport.name());
                *self.link_mut(side) = Link::Live(transport);
                Ok(())
            }
            LinkEvent::ReconnectFailed(source) => {
                *self.link_mut(side) = Link::Gone;
                Err(BridgeError::ReconnectFailed { side, source })
            }
        }
    }

    async fn forward(&mut self, from: Side, data: &[u8]) {
        let to = from.other();
        debug!("{} -> {}: {} bytes", from, to, data.len());

        match self.link_mut(to) {
            Link::Live(transport) => {
                for part in split_payload(data) {
                    if let Err(err) = transport.write(part, None).await {
                        warn!("Write to {} failed: {}", to, err);
                        break;
                    }
                }
            }
            _ => warn!(
                "Dropping {} bytes from {}: {} is reconnecting",
                data.len(),
                from,
                to
            ),
        }
    }

    fn lost(&mut self, side: Side, err: Option<TransportError>) -> Result<(), BridgeError> {
        if !self.reconnect {
            return Err(match err {
                Some(source) => BridgeError::Transport { side, source },
                None => BridgeError::StreamClosed { side },
            });
        }

        let policy = self.backoff.clone();
        let link = self.link_mut(side);
        if let Link::Live(transport) = std::mem::replace(link, Link::Gone) {
            info!("Reconnecting {} ({})", side, transport.name());
            *link = Link::Reconnecting(tokio::spawn(reconnect(transport, policy)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guri_transport::testing::{MockHandle, MockTransport};
    use guri_transport::RetryLimit;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn parts(payload: &[u8]) -> Vec<Vec<u8>> {
        split_payload(payload).map(<[u8]>::to_vec).collect()
    }

    #[test]
    fn test_split_payload() {
        let long: Vec<u8> = (0..12).map(|i| if i == 0 { 6 } else { i }).collect();
        assert_eq!(parts(&long), vec![vec![6], long[1..].to_vec()]);

        // Exactly ten bytes is not split
        let ten = [6u8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        assert_eq!(parts(&ten), vec![ten.to_vec()]);

        let other = [7u8; 12];
        assert_eq!(parts(&other), vec![other.to_vec()]);
        assert_eq!(parts(&[6]), vec![vec![6]]);
    }

    struct Harness {
        downstream: MockHandle,
        upstream: MockHandle,
        stop: oneshot::Sender<()>,
        task: JoinHandle<Result<(), BridgeError>>,
    }

    async fn start(reconnect: bool, limit: RetryLimit) -> Harness {
        let (mut down, downstream) = MockTransport::new("serial:mock");
        let (mut up, upstream) = MockTransport::new("tcp:mock");
        down.connect().await.unwrap();
        up.connect().await.unwrap();

        let mut config = BridgeConfig::new("/dev/null");
        config.reconnect = reconnect;
        config.backoff = BackoffPolicy {
            initial: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            factor: 2.0,
            limit,
        };

        let (stop, stopped) = oneshot::channel::<()>();
        let forwarder = Forwarder::new(Box::new(down), Box::new(up), &config);
        let task = tokio::spawn(forwarder.run(async {
            let _ = stopped.await;
        }));

        Harness {
            downstream,
            upstream,
            stop,
            task,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_downstream_frame_is_split_upstream() {
        let h = start(true, RetryLimit::Forever).await;
        let frame: Vec<u8> = std::iter::once(6).chain(1..=11).collect();

        assert!(h.downstream.send(&frame));
        assert!(h.upstream.send(b"hello"));
        settle().await;

        assert_eq!(h.upstream.writes(), vec![vec![6], (1..=11).collect::<Vec<u8>>()]);
        assert_eq!(h.downstream.writes(), vec![b"hello".to_vec()]);

        h.stop.send(()).unwrap();
        h.task.await.unwrap().unwrap();
        assert_eq!(h.downstream.closes(), 1);
        assert_eq!(h.upstream.closes(), 1);
    }

    #[tokio::test]
    async fn test_upstream_close_without_reconnect_is_fatal() {
        let h = start(false, RetryLimit::Never).await;

        assert!(h.upstream.end_stream());
        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::StreamClosed { side: Side::Upstream })
        ));

        // Downstream was closed, not read again
        assert!(!h.downstream.send(b"late"));
        assert_eq!(h.upstream.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_other_side_flowing() {
        let h = start(true, RetryLimit::Forever).await;
        h.upstream.fail_connects(2);

        assert!(h.upstream.end_stream());
        settle().await;

        // Upstream is reconnecting; downstream data is dropped, upstream
        // data can't arrive, but the loop still services downstream
        assert!(h.downstream.send(b"dropped"));
        settle().await;
        assert!(h.upstream.writes().is_empty());

        // Two failures: 1s then 2s of backoff
        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(h.upstream.connects(), 2);

        assert!(h.downstream.send(b"after"));
        assert!(h.upstream.send(b"reply"));
        settle().await;
        assert_eq!(h.upstream.writes(), vec![b"after".to_vec()]);
        assert_eq!(h.downstream.writes(), vec![b"reply".to_vec()]);

        h.stop.send(()).unwrap();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_budget_exhausted() {
        let h = start(true, RetryLimit::Retries(1)).await;
        h.downstream.fail_connects(5);

        assert!(h.downstream.end_stream());
        let result = h.task.await.unwrap();

        match result {
            Err(BridgeError::ReconnectFailed {
                side: Side::Downstream,
                source: RetryError::Exhausted { attempts, .. },
            }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(h.upstream.closes(), 1);
    }

    #[tokio::test]
    async fn test_read_error_without_reconnect() {
        let h = start(false, RetryLimit::Never).await;

        assert!(h
            .downstream
            .inject(Chunk::Error(TransportError::Tls("bad record".into()))));
        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::Transport { side: Side::Downstream, .. })
        ));
    }
}
