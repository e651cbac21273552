//! In-process RESP server backed by a [`MemoryStore`]
//!
//! Commands already buffered when a batch starts run as one round trip
//! against the store, the way a pipelined batch reaches a real server. TCP may
//! still split a batch, so tests count round trips on the client side with
//! [`CountingConnection`](crate::CountingConnection). An injected transport
//! failure makes the server hang up on that connection.

use crate::resp::RespCodec;
use futures::{FutureExt, SinkExt, StreamExt};
use redrate::memory::MemoryStore;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::debug;

pub struct TestServer {
    store: MemoryStore,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral local port and start accepting connections
    pub async fn start(store: MemoryStore) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let accept_store = store.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, peer)) = listener.accept().await {
                debug!("Test server accepted {}", peer);
                let store = accept_store.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve(socket, store).await {
                        debug!(error = ?err, "Test server connection closed");
                    }
                });
            }
        });

        Ok(Self { store, addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: TcpStream, store: MemoryStore) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, RespCodec);

    while let Some(first) = framed.next().await {
        let mut cmds = vec![first?];
        while let Some(Some(next)) = framed.next().now_or_never() {
            cmds.push(next?);
        }

        let Ok(replies) = store.execute(&cmds) else {
            debug!("Injected failure, closing connection");
            return Ok(());
        };
        for reply in replies {
            framed.feed(reply).await?;
        }
        SinkExt::<redrate::Value>::flush(&mut framed).await?;
    }
    Ok(())
}
