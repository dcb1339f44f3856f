//! TCP transport: the inbound message loop, best-effort broadcast, and chain sync.

use crate::{
    message::Message,
    peers::{peer_addr, PeerDirectory},
};
use anyhow::{anyhow, bail, Context, Result};
use ledger_core::{chain::ChainStore, Block, BlockOutcome, ChainOutcome, Ledger, RouteOutcome};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task,
    time::timeout,
};
use tracing::{debug, info, warn};

/// Caps applied to every inbound peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundLimits {
    /// Longest accepted line, newline included. Whole-chain replies must fit.
    pub max_line_bytes: usize,
    pub idle_timeout: Duration,
}

impl Default for InboundLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 32 * 1024 * 1024,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// The inbound side of a node: applies peer messages to the ledger and, when a
/// block shows the node has fallen behind, pulls chains from its peers.
pub struct Server<S: ChainStore> {
    ledger: Arc<Ledger<S>>,
    broadcaster: Broadcaster,
    limits: InboundLimits,
}

impl<S: ChainStore> Clone for Server<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            broadcaster: self.broadcaster.clone(),
            limits: self.limits,
        }
    }
}

impl<S: ChainStore + 'static> Server<S> {
    pub fn new(ledger: Arc<Ledger<S>>, broadcaster: Broadcaster) -> Self {
        Self {
            ledger,
            broadcaster,
            limits: InboundLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: InboundLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Accept connections forever, one task per peer connection.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("p2p listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    warn!(%addr, "connection ended with error: {e:#}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            let read = timeout(
                self.limits.idle_timeout,
                read_bounded_line(&mut reader, &mut line, self.limits.max_line_bytes),
            )
            .await
            .map_err(|_| anyhow!("idle for {:?}", self.limits.idle_timeout))??;
            if read == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let msg = match Message::from_line(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(%addr, "dropping malformed message: {e}");
                    continue;
                }
            };
            debug!(%addr, kind = msg.kind(), "message received");
            if let Some(reply) = self.dispatch(msg, addr).await {
                writer.write_all(reply.to_line()?.as_bytes()).await?;
            }
        }
    }

    /// Apply one message to the ledger. Returns the reply to send back, if any.
    pub async fn dispatch(&self, msg: Message, from: SocketAddr) -> Option<Message> {
        let ledger = Arc::clone(&self.ledger);
        // Ledger calls take the state lock and may hash whole chains.
        let result = task::spawn_blocking(move || match msg {
            Message::Block(block) => {
                let index = block.index;
                let outcome = ledger.observe_block(block);
                info!(%from, index, ?outcome, "block from peer");
                let behind = is_ahead_of_tip(&outcome, index, ledger.height());
                (None, behind)
            }
            Message::Tx(tx) if tx.is_coinbase() => {
                warn!(%from, to = %tx.to, "dropping coinbase transaction from peer");
                (None, false)
            }
            Message::Tx(tx) => {
                if ledger.submit_transaction(tx) {
                    info!(%from, "transaction received");
                }
                (None, false)
            }
            Message::Chain(chain) => {
                let outcome = ledger.observe_chain(chain);
                info!(%from, ?outcome, "chain from peer");
                (None, false)
            }
            Message::ChainRequest => (Some(Message::Chain(ledger.current_chain())), false),
        })
        .await;
        match result {
            Ok((reply, behind)) => {
                if behind {
                    info!(%from, "block is ahead of the local tip; requesting peer chains");
                    let ledger = Arc::clone(&self.ledger);
                    let broadcaster = self.broadcaster.clone();
                    tokio::spawn(async move {
                        sync_from_peers(&ledger, &broadcaster).await;
                    });
                }
                reply
            }
            Err(e) => {
                warn!(%from, "message handler failed: {e}");
                None
            }
        }
    }
}

/// A block that could not attach and sits more than one index past the tip
/// means blocks were missed.
fn is_ahead_of_tip(outcome: &BlockOutcome, index: u64, height: u64) -> bool {
    let unattached = matches!(
        outcome,
        BlockOutcome::Forked {
            route: RouteOutcome::Orphan { .. } | RouteOutcome::Started { .. },
            ..
        }
    );
    unattached && height.checked_add(1).is_some_and(|next| index > next)
}

/// Read one line of at most `max` bytes. A longer line is an error.
async fn read_bounded_line<R>(reader: &mut R, line: &mut String, max: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max).unwrap_or(u64::MAX);
    let read = (&mut *reader).take(limit).read_line(line).await?;
    if read >= max && !line.ends_with('\n') {
        bail!("message exceeds {max} bytes");
    }
    Ok(read)
}

/// Sends messages to every peer in the directory, one at a time, each under a
/// bounded timeout. An unreachable peer never stops delivery to the rest.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    peers: PeerDirectory,
    port: u16,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(peers: PeerDirectory, port: u16, timeout: Duration) -> Self {
        Self {
            peers,
            port,
            timeout,
        }
    }

    pub fn peer_addrs(&self) -> Vec<String> {
        self.peers
            .list()
            .iter()
            .map(|p| peer_addr(p, self.port))
            .collect()
    }

    /// Returns the number of peers the message reached.
    pub async fn broadcast(&self, msg: &Message) -> usize {
        let line = match msg.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("cannot encode {} message: {e}", msg.kind());
                return 0;
            }
        };
        let mut delivered = 0;
        for addr in self.peer_addrs() {
            match self.send_line(&addr, &line).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(peer = %addr, "broadcast of {} failed: {e:#}", msg.kind()),
            }
        }
        debug!(kind = msg.kind(), delivered, "broadcast done");
        delivered
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow!("connect timed out"))?
            .with_context(|| format!("connecting to {addr}"))
    }

    async fn send_line(&self, addr: &str, line: &str) -> Result<()> {
        let mut stream = self.connect(addr).await?;
        timeout(self.timeout, async {
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| anyhow!("send timed out"))??;
        Ok(())
    }

    /// Ask one peer for its full chain.
    pub async fn request_chain(&self, addr: &str) -> Result<Vec<Block>> {
        let mut stream = self.connect(addr).await?;
        let request = Message::ChainRequest.to_line()?;
        timeout(self.timeout, stream.write_all(request.as_bytes()))
            .await
            .map_err(|_| anyhow!("send timed out"))??;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("no chain reply in time"))??;
        if read == 0 {
            bail!("peer closed the connection without replying");
        }
        match Message::from_line(&line)? {
            Message::Chain(chain) => Ok(chain),
            other => bail!("expected a chain reply, got {}", other.kind()),
        }
    }
}

/// Offer every peer's chain to the ledger's longest-chain rule.
pub async fn sync_from_peers<S: ChainStore + 'static>(
    ledger: &Arc<Ledger<S>>,
    broadcaster: &Broadcaster,
) -> usize {
    let mut replaced = 0;
    for addr in broadcaster.peer_addrs() {
        let chain = match broadcaster.request_chain(&addr).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(peer = %addr, "chain sync failed: {e:#}");
                continue;
            }
        };
        let ledger = Arc::clone(ledger);
        match task::spawn_blocking(move || ledger.observe_chain(chain)).await {
            Ok(ChainOutcome::Replaced { new_len, .. }) => {
                info!(peer = %addr, new_len, "synced chain from peer");
                replaced += 1;
            }
            Ok(ChainOutcome::Rejected { reason }) => {
                debug!(peer = %addr, "kept local chain: {reason}");
            }
            Err(e) => warn!(peer = %addr, "chain sync task failed: {e}"),
        }
    }
    replaced
}
