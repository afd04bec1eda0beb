//! What the guard needs to know about the incoming request.

use http::{header, request::Parts, HeaderMap, Method, Request, Uri};
use mime::Mime;

/// Request information consulted when a guard is created.
pub trait RequestContext {
    /// The request method, e.g. `GET`.
    fn method(&self) -> &str;

    /// The request target: path and query.
    fn url(&self) -> String;

    /// Whether the request is a `multipart/form-data` upload.
    fn is_multipart(&self) -> bool;
}

impl<B> RequestContext for Request<B> {
    fn method(&self) -> &str {
        method_str(Request::method(self))
    }

    fn url(&self) -> String {
        target(self.uri())
    }

    fn is_multipart(&self) -> bool {
        is_multipart_form_data(self.headers())
    }
}

impl RequestContext for Parts {
    fn method(&self) -> &str {
        method_str(&self.method)
    }

    fn url(&self) -> String {
        target(&self.uri)
    }

    fn is_multipart(&self) -> bool {
        is_multipart_form_data(&self.headers)
    }
}

fn method_str(method: &Method) -> &str {
    method.as_str()
}

fn target(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| uri.path().to_owned())
}

fn is_multipart_form_data(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Mime>().ok())
        .map_or(false, |mime| {
            mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA
        })
}
