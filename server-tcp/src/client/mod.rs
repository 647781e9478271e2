use crate::protocol::{self, Request, Response};
use async_trait::async_trait;
use bytes::Bytes;
use carbon::ports::CacheStore;
use futures::{SinkExt, StreamExt};
use shared::{Error, Result, TtlMs};
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Backend store living in a carbon TCP server
///
/// Keys are namespaced as `{namespace}:{key}`. One connection is shared and
/// requests on it are serialized. The server enforces stored TTLs natively.
///
/// A request that does not get its full reply (timeout, I/O error, dropped
/// caller) discards the connection, and the next request dials a new one.
pub struct RemoteStore {
    addr: SocketAddr,
    conn: Mutex<Option<Connection>>,
    namespace: String,
    request_timeout: Duration,
}

impl RemoteStore {
    pub async fn connect(addr: impl ToSocketAddrs, namespace: impl Into<String>) -> Result<Self> {
        let stream = timeout(DEFAULT_REQUEST_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Backend("connect timed out".to_string()))?
            .map_err(|e| Error::Backend(format!("connect failed: {}", e)))?;
        let addr = stream
            .peer_addr()
            .map_err(|e| Error::Backend(format!("connect failed: {}", e)))?;

        Ok(Self {
            addr,
            conn: Mutex::new(Some(framed(stream))),
            namespace: namespace.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub async fn ping(&self) -> Result<()> {
        match self.call(Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected("PING", other)),
        }
    }

    fn format_key(&self, key: &str) -> Bytes {
        Bytes::from(format!("{}:{}", self.namespace, key))
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut slot = self.conn.lock().await;
        // Taken out for the whole exchange: only a completed reply puts it back
        let current = slot.take();

        let exchange = async move {
            let mut conn = match current {
                Some(conn) => conn,
                None => self.reconnect().await?,
            };

            conn.send(request.encode())
                .await
                .map_err(|e| Error::Backend(format!("send failed: {}", e)))?;

            let frame = conn
                .next()
                .await
                .ok_or_else(|| Error::Backend("connection closed by server".to_string()))?
                .map_err(|e| Error::Backend(format!("receive failed: {}", e)))?;

            Ok::<_, Error>((conn, frame.freeze()))
        };

        let (conn, frame) = match timeout(self.request_timeout, exchange).await {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                warn!(addr = %self.addr, error = %err, "dropping connection");
                return Err(err);
            }
            Err(_) => {
                warn!(addr = %self.addr, "request timed out, dropping connection");
                return Err(Error::Backend("request timed out".to_string()));
            }
        };

        *slot = Some(conn);
        Response::decode(frame).map_err(Error::Backend)
    }

    async fn reconnect(&self) -> Result<Connection> {
        debug!(addr = %self.addr, "reconnecting");
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| Error::Backend(format!("connect failed: {}", e)))?;
        Ok(framed(stream))
    }
}

fn framed(stream: TcpStream) -> Connection {
    stream.set_nodelay(true).ok();
    Framed::new(stream, protocol::codec())
}

fn unexpected(command: &str, response: Response) -> Error {
    match response {
        Response::Error { msg } => Error::Backend(msg),
        other => Error::Backend(format!("unexpected {command} response: {other:?}")),
    }
}

#[async_trait]
impl CacheStore for RemoteStore {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        let request = Request::Get {
            key: self.format_key(key),
        };
        match self.call(request).await? {
            Response::Value { value } => Ok(Some(value)),
            Response::NotFound => Ok(None),
            other => Err(unexpected("GET", other)),
        }
    }

    async fn store(&self, key: &str, raw: Bytes, ttl: Option<Duration>) -> Result<()> {
        let request = Request::Put {
            key: self.format_key(key),
            value: raw,
            ttl_ms: ttl.map(|ttl| TtlMs::from(ttl).0).unwrap_or(0),
        };
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected("PUT", other)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let request = Request::Delete {
            key: self.format_key(key),
        };
        match self.call(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected("DELETE", other)),
        }
    }
}

impl Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("addr", &self.addr)
            .field("namespace", &self.namespace)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServedStore, process_connection, serve};
    use carbon::{CacheOperations, TtlOperations, TypedCache};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage_engine::{DashMapStore, MokaStore};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    /// Map store that answers reads of `*slow` keys after a delay
    #[derive(Default)]
    struct SlowReads {
        inner: DashMapStore,
    }

    #[async_trait]
    impl CacheStore for SlowReads {
        async fn load(&self, key: &str) -> Result<Option<Bytes>> {
            if key.ends_with("slow") {
                sleep(Duration::from_millis(200)).await;
            }
            self.inner.load(key).await
        }

        async fn store(&self, key: &str, raw: Bytes, ttl: Option<Duration>) -> Result<()> {
            self.inner.store(key, raw, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    /// Server that hands back the task serving each accepted connection
    async fn start_server_with_handles(
        store: Arc<dyn CacheStore>,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<JoinHandle<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(ServedStore::new(store));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let served = Arc::clone(&served);
                let handle = tokio::spawn(async move {
                    let _ = process_connection(socket, served).await;
                });
                if tx.send(handle).is_err() {
                    break;
                }
            }
        });

        (addr, rx)
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
    }

    fn profile() -> Profile {
        Profile {
            id: 1,
            name: "grace".to_string(),
        }
    }

    async fn start_server(store: Arc<dyn CacheStore>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, store));
        addr
    }

    #[tokio::test]
    async fn test_remote_store_round_trip() {
        let backing = Arc::new(DashMapStore::new());
        let addr = start_server(backing.clone()).await;
        let remote = RemoteStore::connect(addr, "users").await.unwrap();

        remote.ping().await.unwrap();
        remote.store("1", Bytes::from("payload"), None).await.unwrap();
        assert_eq!(remote.load("1").await.unwrap(), Some(Bytes::from("payload")));

        // Namespaced on the server side
        assert!(backing.load("users:1").await.unwrap().is_some());

        remote.delete("1").await.unwrap();
        assert_eq!(remote.load("1").await.unwrap(), None);
        assert!(backing.load("users:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_typed_cache_over_remote_store() {
        let addr = start_server(Arc::new(DashMapStore::new())).await;
        let remote = RemoteStore::connect(addr, "profiles").await.unwrap();
        let cache = TypedCache::<Profile, _>::new(Arc::new(remote));

        cache.set("user:1", profile()).await.unwrap();
        assert_eq!(cache.get("user:1").await.unwrap(), profile());
        assert_eq!(cache.get("user:2").await, Err(Error::missing("user:2")));
    }

    #[tokio::test]
    async fn test_remote_ttl_is_enforced_by_server() {
        let backing = Arc::new(MokaStore::new("remote", Some(100)));
        let addr = start_server(backing.clone()).await;
        let remote = RemoteStore::connect(addr, "sessions").await.unwrap();
        let cache = TypedCache::<Profile, _>::new(Arc::new(remote));

        cache
            .set_with_ttl("user:1", profile(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(cache.get("user:1").await.unwrap(), profile());

        sleep(Duration::from_millis(150)).await;

        assert_eq!(backing.load("sessions:user:1").await.unwrap(), None);
        assert_eq!(cache.get("user:1").await, Err(Error::missing("user:1")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_remote_get_or_fetch_dedups_per_process() {
        let addr = start_server(Arc::new(DashMapStore::new())).await;
        let remote = RemoteStore::connect(addr, "reports").await.unwrap();
        let cache = TypedCache::<Vec<u32>, _>::new(Arc::new(remote));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("daily", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(50)).await;
                        Ok(vec![4, 5, 6])
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(vec![4, 5, 6]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_backend_error_not_a_miss() {
        // Server that hangs up on every connection
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let remote = RemoteStore::connect(addr, "users")
            .await
            .unwrap()
            .with_request_timeout(Duration::from_millis(500));
        let cache = TypedCache::<u64, _>::new(Arc::new(remote));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let result = cache
            .get_or_fetch("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                // Keep the socket open but never answer
                open.push(socket);
            }
        });

        let remote = RemoteStore::connect(addr, "users")
            .await
            .unwrap()
            .with_request_timeout(Duration::from_millis(50));

        assert_eq!(
            remote.load("k").await,
            Err(Error::Backend("request timed out".to_string()))
        );
    }

    #[tokio::test]
    async fn test_timed_out_request_does_not_leak_its_reply() {
        let addr = start_server(Arc::new(SlowReads::default())).await;
        let remote = RemoteStore::connect(addr, "ns")
            .await
            .unwrap()
            .with_request_timeout(Duration::from_millis(50));

        remote.store("slow", Bytes::from("value-of-slow"), None).await.unwrap();
        remote.store("fast", Bytes::from("value-of-fast"), None).await.unwrap();

        assert_eq!(
            remote.load("slow").await,
            Err(Error::Backend("request timed out".to_string()))
        );

        // Give the server time to write the late reply
        sleep(Duration::from_millis(300)).await;

        assert_eq!(
            remote.load("fast").await.unwrap(),
            Some(Bytes::from("value-of-fast"))
        );
        assert_eq!(remote.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_abandoned_request_does_not_leak_its_reply() {
        let addr = start_server(Arc::new(SlowReads::default())).await;
        let remote = RemoteStore::connect(addr, "ns").await.unwrap();

        remote.store("slow", Bytes::from("value-of-slow"), None).await.unwrap();
        remote.store("fast", Bytes::from("value-of-fast"), None).await.unwrap();

        // The caller gives up on its own, well inside the store's request timeout
        let abandoned = tokio::time::timeout(Duration::from_millis(50), remote.load("slow")).await;
        assert!(abandoned.is_err());

        sleep(Duration::from_millis(300)).await;

        assert_eq!(
            remote.load("fast").await.unwrap(),
            Some(Bytes::from("value-of-fast"))
        );
        assert_eq!(
            remote.load("slow").await.unwrap(),
            Some(Bytes::from("value-of-slow"))
        );
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drops_the_connection() {
        let (addr, mut handles) = start_server_with_handles(Arc::new(DashMapStore::new())).await;
        let remote = RemoteStore::connect(addr, "ns").await.unwrap();

        remote.store("k", Bytes::from("v"), None).await.unwrap();

        // Kill the task serving this client, closing its socket
        let first = handles.recv().await.unwrap();
        first.abort();
        let _ = first.await;

        assert!(matches!(remote.ping().await, Err(Error::Backend(_))));

        // Next request dials a fresh connection
        remote.ping().await.unwrap();
        assert_eq!(remote.load("k").await.unwrap(), Some(Bytes::from("v")));
        assert!(handles.recv().await.is_some());
    }
}
