//! Socket pump between a framed TCP stream and a [`PeerConnection`].

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use shardhub_app::ports::PeerConnection;
use shardhub_domain::peer::PeerMessage;

use crate::config::PeerTcpConfig;
use crate::error::PeerTcpError;
use crate::{decode, encode};

/// Wrap `stream` and start its reader and writer tasks.
///
/// The socket closes once either side stops: the peer hangs up, a frame
/// fails to decode, or every handle to the returned connection is dropped.
pub(crate) fn spawn(stream: TcpStream, config: &PeerTcpConfig) -> PeerConnection {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(config.max_frame_bytes));
    let (sink, source) = framed.split();
    let (local, wire) = PeerConnection::pair(config.channel_capacity);
    let closed = CancellationToken::new();

    tokio::spawn(write_frames(sink, wire.receiver, closed.clone(), peer.clone()));
    tokio::spawn(read_frames(source, wire.sender, closed, peer));
    local
}

type FrameSink = futures::stream::SplitSink<Framed<TcpStream, LinesCodec>, String>;
type FrameSource = futures::stream::SplitStream<Framed<TcpStream, LinesCodec>>;

async fn write_frames(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<PeerMessage>,
    closed: CancellationToken,
    peer: String,
) {
    loop {
        let message = tokio::select! {
            () = closed.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let result = match encode(&message) {
            Ok(line) => sink.send(line).await.map_err(PeerTcpError::Codec),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(%peer, error = %err, "peer write failed");
            break;
        }
    }
    let _ = sink.close().await;
    closed.cancel();
}

async fn read_frames(
    mut source: FrameSource,
    inbound: mpsc::Sender<PeerMessage>,
    closed: CancellationToken,
    peer: String,
) {
    loop {
        let line = tokio::select! {
            () = closed.cancelled() => break,
            line = source.next() => line,
        };
        let message = match line {
            None => {
                tracing::debug!(%peer, "peer closed the socket");
                break;
            }
            Some(Err(err)) => {
                tracing::warn!(%peer, error = %PeerTcpError::Codec(err), "peer read failed");
                break;
            }
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => match decode(&line) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(%peer, error = %err, "dropping peer after malformed frame");
                    break;
                }
            },
        };
        if inbound.send(message).await.is_err() {
            break;
        }
    }
    closed.cancel();
}
