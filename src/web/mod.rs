//! Defines the controller's web interface: the status/long-poll API the
//! browser front-end talks to, plus static file serving for the front-end
//! itself.

mod api;
pub mod interface;
mod ui;
mod util;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::session::Session;

pub use interface::ServerExitReason;

pub struct LiveServer {
    session: Arc<Session>,
}

impl LiveServer {
    pub fn new(session: Arc<Session>) -> Self {
        LiveServer { session }
    }

    /// Accepts connections until a restart is requested. Handler errors are
    /// logged and never tear the loop down.
    pub async fn serve(self, address: SocketAddr) -> anyhow::Result<ServerExitReason> {
        let listener = TcpListener::bind(address).await?;
        self.serve_on(listener).await
    }

    /// Like [`serve`](LiveServer::serve), on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> anyhow::Result<ServerExitReason> {
        let mut restart = self.session.restart_signal();

        loop {
            tokio::select! {
                _ = restart.changed() => {
                    return Ok(ServerExitReason::Restart);
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let io = TokioIo::new(stream);
                    let session = Arc::clone(&self.session);

                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let session = Arc::clone(&session);

                            async move {
                                Ok::<_, Infallible>(api::call(session, req).await)
                            }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            log::error!("Error serving connection: {err}");
                        }
                    });
                }
            }
        }
    }
}
