//! Request/response between a page context and the background coordinator.

use crate::artwork::ArtworkLookup;
use crate::core::messages::{BackgroundRequest, BackgroundResponse};
use crate::error::{RpcError, ServiceError};
use log::debug;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A request in flight to the background, with the slot for its answer.
/// Fire-and-forget requests carry no reply slot.
#[derive(Debug)]
pub struct RpcEnvelope {
  pub request: BackgroundRequest,
  pub reply: Option<oneshot::Sender<BackgroundResponse>>,
}

impl RpcEnvelope {
  pub fn respond(self, response: BackgroundResponse) {
    if let Some(reply) = self.reply {
      if reply.send(response).is_err() {
        debug!("requester went away before the response");
      }
    }
  }
}

#[derive(Clone, Debug)]
pub struct RpcClient {
  sender: mpsc::Sender<RpcEnvelope>,
  timeout: Duration,
}

impl RpcClient {
  pub fn channel(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<RpcEnvelope>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Self { sender, timeout }, receiver)
  }

  /// Sends `request` and waits for its response, the whole round trip
  /// bounded by the client's timeout.
  pub async fn request(&self, request: BackgroundRequest) -> Result<BackgroundResponse, RpcError> {
    let (reply, response) = oneshot::channel();
    let round_trip = async {
      self
        .sender
        .send(RpcEnvelope {
          request,
          reply: Some(reply),
        })
        .await
        .map_err(|_| RpcError::Disconnected)?;
      response.await.map_err(|_| RpcError::Disconnected)
    };

    tokio::time::timeout(self.timeout, round_trip)
      .await
      .map_err(|_| RpcError::Timeout(self.timeout.as_millis()))?
  }

  pub fn notify(&self, request: BackgroundRequest) -> Result<(), RpcError> {
    self
      .sender
      .try_send(RpcEnvelope {
        request,
        reply: None,
      })
      .map_err(|e| match e {
        mpsc::error::TrySendError::Closed(_) => RpcError::Disconnected,
        mpsc::error::TrySendError::Full(envelope) => {
          RpcError::UnexpectedResponse(format!("queue full, dropped {:?}", envelope.request))
        }
      })
  }

  /// For the `GET_*` storage reads.
  pub async fn value(&self, request: BackgroundRequest) -> Result<Option<String>, RpcError> {
    match self.request(request).await? {
      BackgroundResponse::Value { value } => Ok(value),
      other => Err(RpcError::UnexpectedResponse(format!("{:?}", other))),
    }
  }
}

/// Artwork lookup performed by the background on the page's behalf.
#[derive(Clone, Debug)]
pub struct RpcArtworkLookup {
  client: RpcClient,
}

impl RpcArtworkLookup {
  pub fn new(client: RpcClient) -> Self {
    Self { client }
  }
}

impl ArtworkLookup for RpcArtworkLookup {
  async fn find_artwork(&self, artist: &str, track: &str) -> Result<Option<String>, ServiceError> {
    let response = self
      .client
      .request(BackgroundRequest::FetchAlbumImage {
        artist: artist.to_string(),
        track: track.to_string(),
      })
      .await?;

    match response {
      BackgroundResponse::AlbumImage {
        unauthorized: true, ..
      } => Err(ServiceError::Unauthorized(401)),
      BackgroundResponse::AlbumImage { image_url, .. } => Ok(image_url),
      other => Err(RpcError::UnexpectedResponse(format!("{:?}", other)).into()),
    }
  }
}
