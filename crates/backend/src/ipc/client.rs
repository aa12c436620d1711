use std::path::Path;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{net::UnixStream, sync::mpsc, task::JoinHandle};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, warn};

use super::{QueryRequest, RemoteReply, RemoteRpcChannel, RpcError, RpcFrame};
use crate::{actor::DbHandle, domain::query::PeerId};

type FramedStream = Framed<UnixStream, LinesCodec>;

/// Peer-side connection to an authoritative node's [`RpcServer`](crate::server::RpcServer).
///
/// Requests are written in order by a background multiplexer task, which
/// also hands every reply it reads to the receiver returned by `connect`.
#[derive(Clone)]
pub struct RpcClient {
  outbound: mpsc::Sender<RpcFrame>,
}

impl RpcClient {
  pub async fn connect(socket_path: &Path) -> Result<(Self, mpsc::Receiver<RemoteReply>), RpcError> {
    let stream = UnixStream::connect(socket_path).await?;
    let framed = Framed::new(stream, LinesCodec::new());
    let (sink, read_stream) = framed.split();

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let (reply_tx, reply_rx) = mpsc::channel(64);
    tokio::spawn(Self::multiplexer(sink, read_stream, outbound_rx, reply_tx));

    Ok((Self { outbound: outbound_tx }, reply_rx))
  }

  /// Feed replies into the peer actor until either side goes away
  pub fn forward_replies(mut replies: mpsc::Receiver<RemoteReply>, handle: DbHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
      while let Some(reply) = replies.recv().await {
        if handle.remote_reply(reply).await.is_err() {
          debug!("peer actor gone, stopping reply forwarding");
          break;
        }
      }
    })
  }

  async fn multiplexer(
    mut sink: futures::stream::SplitSink<FramedStream, String>,
    mut stream: futures::stream::SplitStream<FramedStream>,
    mut outbound_rx: mpsc::Receiver<RpcFrame>,
    reply_tx: mpsc::Sender<RemoteReply>,
  ) {
    loop {
      tokio::select! {
        Some(frame) = outbound_rx.recv() => {
          let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
              error!("failed to encode request: {e}");
              continue;
            }
          };
          if let Err(e) = sink.send(json).await {
            error!("failed to send request: {e}");
            break;
          }
        }

        result = stream.next() => {
          match result {
            Some(Ok(line)) => match serde_json::from_str::<RpcFrame>(&line) {
              Ok(RpcFrame::Reply(reply)) => {
                if reply_tx.send(reply).await.is_err() {
                  debug!("reply receiver dropped");
                }
              }
              Ok(RpcFrame::Request(request)) => {
                warn!(query = %request.query, "unexpected request from authoritative node");
              }
              Err(e) => {
                error!("failed to parse frame: {e}");
              }
            },
            Some(Err(e)) => {
              error!("connection error: {e}");
              break;
            }
            None => {
              debug!("connection closed");
              break;
            }
          }
        }
      }
    }

    debug!("multiplexer exited");
  }
}

#[async_trait]
impl RemoteRpcChannel for RpcClient {
  async fn send_request(&self, request: QueryRequest) -> Result<(), RpcError> {
    self
      .outbound
      .send(RpcFrame::Request(request))
      .await
      .map_err(|_| RpcError::Connection("connection closed".into()))
  }

  async fn send_reply(&self, _peer: PeerId, _reply: RemoteReply) -> Result<(), RpcError> {
    Err(RpcError::Connection("peer clients do not send replies".into()))
  }
}
