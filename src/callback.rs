//! The redirect target of the authorization flow.

use crate::core::messages::BackgroundRequest;
use crate::error::RpcError;
use crate::infra::rpc::RpcClient;
use log::{error, info};
use reqwest::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
  Code(String),
  /// The user declined, or the authorize page reported an error.
  Denied(String),
  /// Neither a code nor an error: the flow has to start over.
  Restart,
}

/// Reads the authorization result off the redirect URL. An `error`
/// parameter wins over a `code`.
pub fn parse_callback(url: &str) -> CallbackOutcome {
  let Ok(url) = Url::parse(url) else {
    return CallbackOutcome::Restart;
  };

  let mut code = None;
  for (name, value) in url.query_pairs() {
    match name.as_ref() {
      "error" => return CallbackOutcome::Denied(value.into_owned()),
      "code" if !value.is_empty() => code = Some(value.into_owned()),
      _ => {}
    }
  }

  match code {
    Some(code) => CallbackOutcome::Code(code),
    None => CallbackOutcome::Restart,
  }
}

/// Hands the outcome to the background coordinator, which routes a code to
/// a page that holds the verifier.
pub fn forward(outcome: &CallbackOutcome, rpc: &RpcClient) -> Result<(), RpcError> {
  match outcome {
    CallbackOutcome::Code(code) => {
      info!("authorization code received");
      rpc.notify(BackgroundRequest::SpotifyCallback { code: code.clone() })
    }
    CallbackOutcome::Denied(reason) => {
      error!("authorization error: {}", reason);
      Ok(())
    }
    CallbackOutcome::Restart => {
      info!("no code in redirect, restarting authorization");
      rpc.notify(BackgroundRequest::RestartAuthorization)
    }
  }
}
