use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
};
use tokio::net::TcpListener;
use tracing::{Instrument, Span};

use crate::http::{AppState, route};

/// Accept connections on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    tracing::info!(addr = %local, "Roadmap API listening");
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested; no longer accepting connections");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();
        let span = tracing::info_span!("connection", peer = %peer);
        tokio::spawn(
            async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    let span = request_span(&req);
                    async move { Ok::<_, Infallible>(route(&state, req).await) }.instrument(span)
                });
                if let Err(e) = Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await
                {
                    tracing::debug!(error = %e, "Connection closed with error");
                }
            }
            .instrument(span),
        );
    }
}

fn request_span<B>(req: &Request<B>) -> Span {
    tracing::info_span!("request", method = %req.method(), path = %req.uri().path())
}
