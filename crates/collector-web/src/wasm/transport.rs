use async_trait::async_trait;
use collector_core::transport::FORM_CONTENT_TYPE;
use collector_core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use gloo_net::http::Request;
use wasm_bindgen::JsValue;
use web_sys::{Blob, BlobPropertyBag};

/// `fetch` for regular calls and `navigator.sendBeacon` for the final beacon.
pub(super) struct WebTransport;

fn request_error(error: impl std::fmt::Display) -> TransportError {
    TransportError::Request {
        message: error.to_string(),
    }
}

fn form_blob(body: &str) -> Option<Blob> {
    let parts = js_sys::Array::of1(&JsValue::from_str(body));
    let options = BlobPropertyBag::new();
    options.set_type(FORM_CONTENT_TYPE);
    Blob::new_with_str_sequence_and_options(&parts, &options).ok()
}

#[async_trait(?Send)]
impl HttpTransport for WebTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => Request::get(&request.url),
            HttpMethod::Post => Request::post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = match request.body {
            Some(body) => builder.body(body).map_err(request_error)?.send().await,
            None => builder.send().await,
        }
        .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;
        Ok(HttpResponse::new(status, body))
    }

    fn send_beacon(&self, request: &HttpRequest) -> bool {
        let Some(navigator) = web_sys::window().map(|window| window.navigator()) else {
            return false;
        };
        let queued = match request.body.as_deref() {
            Some(body) => form_blob(body).map_or(Ok(false), |blob| {
                navigator.send_beacon_with_opt_blob(&request.url, Some(&blob))
            }),
            None => navigator.send_beacon(&request.url),
        };
        queued.unwrap_or(false)
    }
}
