//! Documentation endpoints.
//!
//! The embedded renderer is a collaborator outside this crate; these
//! handlers serve the static API notes it would feed, so the public
//! `/doc` surface and the admin `/doc:refresh` action exist either way.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{json_response, ApiResult};

const DOC_INDEX: &str = "\
moon: dynamic data backend

POST a collection definition to /collections:create and use the CRUD
surface it unlocks:

  /{collection}:list | :get | :schema | :create | :update | :destroy
  /{collection}:count | :sum | :avg | :min | :max

Authentication: Authorization: Bearer <jwt or moon_live_ api key>.
Session endpoints: /auth:login, /auth:refresh, /auth:logout, /auth:me.
Admin surfaces: /users:*, /apikeys:*, /collections:create|:update|:destroy.

Full reference: /doc/llms-full.txt
";

const DOC_FULL: &str = include_str!("doc_reference.txt");

fn text_response(body: &'static str) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}

/// `GET /doc`.
pub async fn index() -> Response {
    text_response(DOC_INDEX)
}

/// `GET /doc/llms-full.txt`.
pub async fn llms_full() -> Response {
    text_response(DOC_FULL)
}

/// `POST /doc:refresh`: admin-gated; static content re-serves as-is.
pub async fn refresh() -> ApiResult<Response> {
    Ok(json_response(StatusCode::OK, &json!({ "refreshed": true })))
}
