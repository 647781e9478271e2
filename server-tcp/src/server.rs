use crate::protocol::{self, Request, Response};
use bytes::Bytes;
use carbon::ports::CacheStore;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Backend store exposed over TCP
///
/// PUTs that carry no TTL (`ttl_ms == 0`) fall back to `default_ttl`, which is
/// unset unless configured.
#[derive(Clone)]
pub struct ServedStore {
    store: Arc<dyn CacheStore>,
    default_ttl: Option<Duration>,
}

impl ServedStore {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            default_ttl: None,
        }
    }

    pub fn with_default_ttl(mut self, default_ttl: Option<Duration>) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    fn ttl_for(&self, ttl_ms: u64) -> Option<Duration> {
        if ttl_ms > 0 {
            Some(Duration::from_millis(ttl_ms))
        } else {
            self.default_ttl
        }
    }
}

impl From<Arc<dyn CacheStore>> for ServedStore {
    fn from(store: Arc<dyn CacheStore>) -> Self {
        Self::new(store)
    }
}

/// Accept connections forever, serving each on its own task
pub async fn serve(listener: TcpListener, served: impl Into<ServedStore>) -> std::io::Result<()> {
    let served = Arc::new(served.into());
    loop {
        let (socket, addr) = listener.accept().await?;
        let served = Arc::clone(&served);
        tokio::spawn(async move {
            debug!("Connection {addr} accepted.");

            if let Err(err) = process_connection(socket, served).await {
                tracing::warn!("Connection {addr} error: {err:?}");
            }
        });
    }
}

pub async fn process_connection(
    socket: TcpStream,
    served: Arc<ServedStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    socket.set_nodelay(true).ok();

    let mut framed = Framed::new(socket, protocol::codec());

    // Process each frame (message) from the client
    while let Some(frame_result) = framed.next().await {
        let frame = frame_result?;

        let request = match Request::decode(frame.freeze()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to decode request: {}", e);
                let error_resp = Response::Error { msg: e };
                framed.send(error_resp.encode()).await?;
                continue;
            }
        };

        debug!("Received request: {:?}", request);

        let response = handle(&served, request).await;
        framed.send(response.encode()).await?;
    }

    info!("Connection closed by client");
    Ok(())
}

async fn handle(served: &ServedStore, request: Request) -> Response {
    let store = served.store.as_ref();

    match request {
        Request::Ping => Response::Pong,

        Request::Put { key, value, ttl_ms } => {
            let key = match utf8_key(key) {
                Ok(key) => key,
                Err(resp) => return resp,
            };
            match store.store(&key, value, served.ttl_for(ttl_ms)).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    msg: format!("Put failed: {}", e),
                },
            }
        }

        Request::Get { key } => {
            let key = match utf8_key(key) {
                Ok(key) => key,
                Err(resp) => return resp,
            };
            match store.load(&key).await {
                Ok(Some(value)) => Response::Value { value },
                Ok(None) => Response::NotFound,
                Err(e) => Response::Error {
                    msg: format!("Get failed: {}", e),
                },
            }
        }

        Request::Delete { key } => {
            let key = match utf8_key(key) {
                Ok(key) => key,
                Err(resp) => return resp,
            };
            match store.delete(&key).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    msg: format!("Delete failed: {}", e),
                },
            }
        }
    }
}

fn utf8_key(key: Bytes) -> Result<String, Response> {
    String::from_utf8(key.to_vec()).map_err(|e| Response::Error {
        msg: format!("Invalid key UTF-8: {}", e),
    })
}
