use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use super::provider::{ProviderResult, RequestSnafu, StatusSnafu};

/// Posts a JSON body and decodes a JSON response, mapping non-success statuses
/// into `ProviderError::Status` with the response body attached.
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    bearer_token: Option<&str>,
    body: &B,
    stage: &'static str,
) -> ProviderResult<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer_token.filter(|token| !token.is_empty()) {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context(RequestSnafu {
        stage,
        url: url.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(url, status = status.as_u16(), stage, "provider returned an error status");
        return StatusSnafu {
            stage,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .fail();
    }

    response.json::<R>().await.context(RequestSnafu {
        stage,
        url: url.to_string(),
    })
}
