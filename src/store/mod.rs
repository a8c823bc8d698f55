mod client;
mod script;

pub use client::StoreClient;
pub use script::{BucketScript, Verdict, TOKEN_BUCKET_SCRIPT};
