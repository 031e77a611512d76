use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends a prepared request. Implemented by the plain client and by
/// decorators such as [`super::ApiKey`] that amend the request first.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;
}
