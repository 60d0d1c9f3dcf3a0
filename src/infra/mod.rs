pub mod host;
pub mod redirect_uri;
pub mod rpc;
pub mod spotify;
pub mod storage;
