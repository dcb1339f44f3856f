use ledger_core::{
    chain::{genesis_block, MemoryStore},
    pow, ConsensusConfig, Ledger, Transaction,
};
use ledger_node::{
    message::Message,
    p2p::{self, Broadcaster, InboundLimits, Server},
    peers::PeerDirectory,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

fn ledger(miner: &str) -> Arc<Ledger<MemoryStore>> {
    let config = ConsensusConfig {
        difficulty: 1,
        fork_lim: 4,
        reward: 10.0,
        miner: miner.to_string(),
    };
    Arc::new(Ledger::open(Arc::new(MemoryStore::new()), config).expect("open ledger"))
}

async fn start_node(ledger: Arc<Ledger<MemoryStore>>) -> SocketAddr {
    start_server(Server::new(ledger, broadcaster(vec![]))).await
}

async fn start_server(server: Server<MemoryStore>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

fn broadcaster(peers: Vec<String>) -> Broadcaster {
    Broadcaster::new(PeerDirectory::Static(peers), 5002, Duration::from_secs(2))
}

async fn closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(
        timeout(Duration::from_secs(5), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn block_message_extends_the_chain() {
    let node = ledger("node-a");
    let addr = start_node(Arc::clone(&node)).await;

    let block = pow::mine(vec![], "0", 1, "peer", 10.0, 1);
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let line = Message::Block(block.clone()).to_line().unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();

    eventually(|| node.height() == 1).await;
    assert_eq!(node.tip(), block);
}

#[tokio::test]
async fn malformed_lines_do_not_close_the_connection() {
    let node = ledger("node-a");
    let addr = start_node(Arc::clone(&node)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"{ this is not json\n").await.unwrap();
    stream
        .write_all(br#"{"type": "gossip", "data": 3}"#)
        .await
        .unwrap();
    stream.write_all(b"\n").await.unwrap();
    let tx = Transaction::new("a", "b", 4.0);
    let line = Message::Tx(tx.clone()).to_line().unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    // A duplicate on the same connection is ignored.
    stream.write_all(line.as_bytes()).await.unwrap();

    eventually(|| !node.pending_transactions().is_empty()).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(node.pending_transactions(), vec![tx]);
    assert_eq!(node.height(), 0);
}

#[tokio::test]
async fn chain_request_is_answered_on_the_same_connection() {
    let node = ledger("node-a");
    node.mine();
    node.mine();
    let addr = start_node(Arc::clone(&node)).await;

    let chain = broadcaster(vec![])
        .request_chain(&addr.to_string())
        .await
        .unwrap();
    assert_eq!(chain, node.current_chain());
    assert_eq!(chain.len(), 3);
}

#[tokio::test]
async fn broadcast_skips_unreachable_peers() {
    // Grab a free port and release it so connecting there fails.
    let dead = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = live.local_addr().unwrap();

    let b = broadcaster(vec![dead.to_string(), live_addr.to_string()]);
    let msg = Message::Tx(Transaction::new("a", "b", 1.0));
    let receiver = tokio::spawn(async move {
        let (stream, _) = live.accept().await.unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await.unwrap();
        Message::from_line(&line).unwrap()
    });

    assert_eq!(b.broadcast(&msg).await, 1);
    assert_eq!(receiver.await.unwrap(), msg);
}

#[tokio::test]
async fn block_broadcast_reaches_a_running_node() {
    let sender = ledger("node-a");
    let receiver = ledger("node-b");
    let addr = start_node(Arc::clone(&receiver)).await;

    let mined = sender.mine();
    let delivered = broadcaster(vec![addr.to_string()])
        .broadcast(&Message::Block(mined.block.clone()))
        .await;
    assert_eq!(delivered, 1);

    eventually(|| receiver.height() == 1).await;
    assert_eq!(receiver.current_chain(), sender.current_chain());
}

#[tokio::test]
async fn startup_sync_adopts_a_longer_peer_chain() {
    let peer = ledger("peer");
    for _ in 0..3 {
        peer.mine();
    }
    let peer_addr = start_node(Arc::clone(&peer)).await;

    let local = ledger("local");
    assert_eq!(local.current_chain(), vec![genesis_block()]);
    let dead = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let b = broadcaster(vec![dead.to_string(), peer_addr.to_string()]);

    assert_eq!(p2p::sync_from_peers(&local, &b).await, 1);
    assert_eq!(local.current_chain(), peer.current_chain());
    // A second round finds nothing longer.
    assert_eq!(p2p::sync_from_peers(&local, &b).await, 0);
}

#[tokio::test]
async fn block_past_the_tip_pulls_the_peer_chain() {
    let peer = ledger("peer");
    for _ in 0..3 {
        peer.mine();
    }
    let peer_addr = start_node(Arc::clone(&peer)).await;

    let local = ledger("local");
    let addr = start_server(Server::new(
        Arc::clone(&local),
        broadcaster(vec![peer_addr.to_string()]),
    ))
    .await;

    let latest = peer.tip();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let line = Message::Block(latest.clone()).to_line().unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();

    eventually(|| local.height() == 3).await;
    assert_eq!(local.current_chain(), peer.current_chain());
    assert_eq!(local.tip(), latest);
}

#[tokio::test]
async fn coinbase_transactions_from_peers_are_dropped() {
    let node = ledger("node-a");
    let addr = start_node(Arc::clone(&node)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let minted = Message::Tx(Transaction::coinbase("mallory", 1_000.0));
    stream
        .write_all(minted.to_line().unwrap().as_bytes())
        .await
        .unwrap();
    let tx = Transaction::new("a", "b", 4.0);
    let line = Message::Tx(tx.clone()).to_line().unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();

    eventually(|| !node.pending_transactions().is_empty()).await;
    assert_eq!(node.pending_transactions(), vec![tx]);
}

#[tokio::test]
async fn oversized_lines_close_the_connection() {
    let node = ledger("node-a");
    let limits = InboundLimits {
        max_line_bytes: 1024,
        idle_timeout: Duration::from_secs(30),
    };
    let server = Server::new(Arc::clone(&node), broadcaster(vec![])).with_limits(limits);
    let addr = start_server(server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[b'x'; 4096]).await.unwrap();
    assert!(closed_by_peer(&mut stream).await);

    // Lines under the cap still work on a fresh connection.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let tx = Transaction::new("a", "b", 4.0);
    stream
        .write_all(Message::Tx(tx.clone()).to_line().unwrap().as_bytes())
        .await
        .unwrap();
    eventually(|| node.pending_transactions() == vec![tx.clone()]).await;
}

#[tokio::test]
async fn idle_connections_are_closed() {
    let node = ledger("node-a");
    let limits = InboundLimits {
        max_line_bytes: 1024,
        idle_timeout: Duration::from_millis(200),
    };
    let addr = start_server(Server::new(node, broadcaster(vec![])).with_limits(limits)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(closed_by_peer(&mut stream).await);
}

#[tokio::test]
async fn broadcast_to_a_stalled_peer_is_bounded() {
    // Accepts connections but never reads from them.
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_addr = stalled.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = stalled.accept().await {
            held.push(stream);
        }
    });

    let b = Broadcaster::new(
        PeerDirectory::Static(vec![stalled_addr.to_string()]),
        5002,
        Duration::from_millis(300),
    );
    let chain: Vec<_> = (0..200_000).map(|_| genesis_block()).collect();
    let delivered = timeout(Duration::from_secs(5), b.broadcast(&Message::Chain(chain)))
        .await
        .expect("broadcast must not hang");
    assert_eq!(delivered, 0);
}
