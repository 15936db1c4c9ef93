//! Plain response constructors.
//!
//! These are stateless helpers returning ready-to-send responses. JSON bodies are encoded
//! with `serde_json` and tagged `application/json;charset=utf-8`.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::ResponseBody;

const JSON_UTF_8: &str = "application/json;charset=utf-8";

/// `200` with `value` encoded as JSON.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Response<ResponseBody> {
    json_with_status(StatusCode::OK, value)
}

pub fn json_with_status<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(bytes) => with_json_body(status, Bytes::from(bytes)),
        Err(e) => {
            error!(cause = %e, "serialize json response error");
            internal_error()
        }
    }
}

pub fn error<T: Serialize + ?Sized>(status: StatusCode, values: &T) -> Response<ResponseBody> {
    json_with_status(status, values)
}

pub fn bad_request<T: Serialize + ?Sized>(values: &T) -> Response<ResponseBody> {
    json_with_status(StatusCode::BAD_REQUEST, values)
}

pub fn not_found<T: Serialize + ?Sized>(values: &T) -> Response<ResponseBody> {
    json_with_status(StatusCode::NOT_FOUND, values)
}

pub fn created<T: Serialize + ?Sized>(values: &T) -> Response<ResponseBody> {
    json_with_status(StatusCode::CREATED, values)
}

pub fn empty(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = status;
    response
}

pub fn no_content() -> Response<ResponseBody> {
    empty(StatusCode::NO_CONTENT)
}

/// An empty response pointing the client at `location`.
///
/// A location that is not a valid header value is a programming error and is answered
/// with [`internal_error`].
pub fn redirect(location: &str, status: StatusCode) -> Response<ResponseBody> {
    match HeaderValue::try_from(location) {
        Ok(value) => {
            let mut response = empty(status);
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(e) => {
            error!(cause = %e, location, "invalid redirect location");
            internal_error()
        }
    }
}

/// The generic `500` answer. Never carries details of the underlying fault.
pub fn internal_error() -> Response<ResponseBody> {
    with_json_body(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from_static(br#"{"error":"Internal error"}"#))
}

fn with_json_body(status: StatusCode, bytes: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::once(bytes));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(JSON_UTF_8));
    response
}
