//! Server-side RPC endpoint: binds a listening socket, accepts connections,
//! and dispatches each call to a target object on a fresh worker task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::RpcError;
use crate::rpc::codec::{self, ResponseEnvelope};

/// A target object a [`Skeleton`] can dispatch calls to.
///
/// `dispatch` resolves the call by `(method, type_tags)` the way an
/// interface generated at build time would: a `match` over the known
/// methods of the interface, rather than runtime reflection.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Name of the interface this target implements, used only for logging.
    fn interface_name(&self) -> &'static str;

    async fn dispatch(
        &self,
        method: &str,
        type_tags: &[String],
        payload: &[u8],
    ) -> Result<Vec<u8>, RpcError>;

    /// Invoked from the listener on an accept error. Returning `true` (the
    /// default) shuts the skeleton down; returning `false` keeps listening.
    fn listen_error(&self, error: &io::Error) -> bool {
        tracing::error!(interface = self.interface_name(), %error, "accept failed");
        true
    }

    /// Invoked from a service task on any non-EOF failure handling one call.
    fn service_error(&self, error: &RpcError) {
        tracing::warn!(interface = self.interface_name(), %error, "rpc call failed");
    }

    /// Invoked exactly once, after the listener has terminated.
    async fn stopped(&self, cause: Option<RpcError>) {
        tracing::info!(interface = self.interface_name(), ?cause, "skeleton stopped");
    }
}

struct Running {
    stop_tx: oneshot::Sender<()>,
    listener_task: JoinHandle<()>,
}

/// Binds `target` to a listening address and dispatches incoming calls to
/// it. See module docs for the accept/dispatch lifecycle.
pub struct Skeleton<D: Dispatch> {
    target: Arc<D>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl<D: Dispatch> Skeleton<D> {
    pub fn new(target: D) -> Self {
        Skeleton {
            target: Arc::new(target),
            local_addr: std::sync::Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// The address this skeleton is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr mutex poisoned")
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    /// Binds and starts accepting connections. Fails if already running.
    pub async fn start(&self, bind_addr: SocketAddr) -> Result<SocketAddr, RpcError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(RpcError::fatal("skeleton already started"));
        }

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::rpc(format!("bind {bind_addr}: {e}")))?;
        let local_addr = listener.local_addr().map_err(|e| RpcError::rpc(e.to_string()))?;
        *self.local_addr.lock().expect("local_addr mutex poisoned") = Some(local_addr);

        let (stop_tx, stop_rx) = oneshot::channel();
        let target = Arc::clone(&self.target);
        let listener_task = tokio::spawn(Self::listen(listener, target, stop_rx));

        *running = Some(Running { stop_tx, listener_task });
        Ok(local_addr)
    }

    async fn listen(listener: TcpListener, target: Arc<D>, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => {
                        let target = Arc::clone(&target);
                        tokio::spawn(Self::service(socket, target));
                    }
                    Err(error) => {
                        if target.listen_error(&error) {
                            break;
                        }
                    }
                },
            }
        }
        target.stopped(None).await;
    }

    async fn service(mut socket: TcpStream, target: Arc<D>) {
        let call = match codec::read_call(&mut socket).await {
            Ok(call) => call,
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(error) => {
                target.service_error(&RpcError::rpc(error.to_string()));
                return;
            }
        };

        let response = match target.dispatch(&call.method, &call.type_tags, &call.payload).await {
            Ok(bytes) => ResponseEnvelope::Ok(bytes),
            Err(error) => ResponseEnvelope::Err(error),
        };

        if let Err(error) = codec::write_response(&mut socket, &response).await {
            target.service_error(&RpcError::rpc(error.to_string()));
        }
    }

    /// Idempotent. Stops accepting new connections and waits for the
    /// listener task to exit; in-flight service tasks finish on their own.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.stop_tx.send(());
            let _ = running.listener_task.await;
        }
    }
}
