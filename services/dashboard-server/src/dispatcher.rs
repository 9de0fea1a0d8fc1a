//! Per-request dispatch between static files and server rendering

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::assets::{AssetLookup, ResolvedAsset, StaticAssetResolver};
use crate::cache::CachePolicy;
use crate::ssr::SsrHandler;

/// Security headers attached to every static response
pub static STATIC_SECURITY_HEADERS: [(HeaderName, &str); 3] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
];

/// Production entry point: serves built assets, delegates the rest
pub struct RequestDispatcher {
    resolver: StaticAssetResolver,
    policy: CachePolicy,
    ssr: Arc<dyn SsrHandler>,
}

impl RequestDispatcher {
    pub fn new(resolver: StaticAssetResolver, policy: CachePolicy, ssr: Arc<dyn SsrHandler>) -> Self {
        Self {
            resolver,
            policy,
            ssr,
        }
    }

    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path().to_string();

        match self.resolver.resolve(&path).await {
            AssetLookup::Found(asset) => {
                let delivery = delivery_for(request.method(), request.headers(), &asset);
                self.serve_static(&path, asset, delivery).await
            }
            AssetLookup::NotFound => self.delegate(request).await,
            AssetLookup::Fault(e) => {
                error!("Unexpected error resolving {}: {}", path, e);
                status_only(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn serve_static(&self, path: &str, asset: ResolvedAsset, delivery: Delivery) -> Response<Body> {
        let len = asset.metadata.len;

        let mut response = match delivery {
            Delivery::NotModified => {
                debug!("{} not modified", path);
                status_only(StatusCode::NOT_MODIFIED)
            }
            Delivery::Unsatisfiable => {
                debug!("{}: range not satisfiable for {} bytes", path, len);
                let mut response = status_only(StatusCode::RANGE_NOT_SATISFIABLE);
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", len)) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                response
            }
            Delivery::Full | Delivery::Partial { .. } => {
                let opened = match delivery {
                    Delivery::Partial { start, end } => {
                        self.resolver.open_range(&asset, start, end).await
                    }
                    _ => self.resolver.open(&asset).await,
                };
                let body = match opened {
                    Ok(body) => body,
                    Err(e) => {
                        error!("Unexpected error opening {}: {}", asset.path.display(), e);
                        return status_only(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                };

                let mut response = Response::new(body);
                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(content_type_for(path)),
                );
                match delivery {
                    Delivery::Partial { start, end } => {
                        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
                        if let Ok(value) =
                            HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, len))
                        {
                            headers.insert(header::CONTENT_RANGE, value);
                        }
                        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
                    }
                    _ => {
                        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                    }
                }
                response
            }
        };

        let headers = response.headers_mut();
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Ok(value) = HeaderValue::from_str(&asset.etag()) {
            headers.insert(header::ETAG, value);
        }
        if let Some(modified) = asset.metadata.modified {
            if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
                headers.insert(header::LAST_MODIFIED, value);
            }
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(self.policy.cache_control_for(path)),
        );
        for (name, value) in &STATIC_SECURITY_HEADERS {
            headers.insert(name.clone(), HeaderValue::from_static(value));
        }
        response
    }

    async fn delegate(&self, request: Request<Body>) -> Response<Body> {
        match self.ssr.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("{}", e);
                status_only(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// What a static response carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    NotModified,
    Full,
    /// Inclusive byte range
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Conditional headers first, then a single `Range` on GET
fn delivery_for(method: &Method, headers: &HeaderMap, asset: &ResolvedAsset) -> Delivery {
    if is_not_modified(headers, &asset.etag(), asset.metadata.modified) {
        return Delivery::NotModified;
    }
    if method != Method::GET || !if_range_matches(headers, asset.metadata.modified) {
        return Delivery::Full;
    }
    let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Delivery::Full;
    };
    parse_range(range, asset.metadata.len).unwrap_or(Delivery::Full)
}

/// `If-Range` needs a strong validator; only the date form can match ours
fn if_range_matches(headers: &HeaderMap, modified: Option<SystemTime>) -> bool {
    let Some(if_range) = headers.get(header::IF_RANGE) else {
        return true;
    };
    match (if_range.to_str(), modified) {
        (Ok(value), Some(modified)) if !value.starts_with('"') && !value.starts_with("W/") => {
            value == http_date(modified)
        }
        _ => false,
    }
}

/// Parse a single byte range against a body of `len` bytes
///
/// Returns `Partial` or `Unsatisfiable`, or `None` when the header is to be
/// ignored: malformed, another unit, or more than one range.
fn parse_range(value: &str, len: u64) -> Option<Delivery> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (first, last) = spec.trim().split_once('-')?;

    if first.is_empty() {
        let suffix: u64 = last.parse().ok()?;
        if suffix == 0 || len == 0 {
            return Some(Delivery::Unsatisfiable);
        }
        return Some(Delivery::Partial {
            start: len.saturating_sub(suffix),
            end: len - 1,
        });
    }

    let start: u64 = first.parse().ok()?;
    let end = if last.is_empty() {
        None
    } else {
        let end: u64 = last.parse().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };

    if start >= len {
        return Some(Delivery::Unsatisfiable);
    }
    Some(Delivery::Partial {
        start,
        end: end.map_or(len - 1, |end| end.min(len - 1)),
    })
}

/// Response with a status and no body or details
fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn is_not_modified(headers: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH) {
        let Ok(candidates) = if_none_match.to_str() else {
            return false;
        };
        return candidates
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || weak_eq(candidate, etag));
    }

    let (Some(since), Some(modified)) = (headers.get(header::IF_MODIFIED_SINCE), modified) else {
        return false;
    };
    let Some(since) = since
        .to_str()
        .ok()
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
    else {
        return false;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(mtime) => mtime.as_secs() as i64 <= since.timestamp(),
        Err(_) => false,
    }
}

fn weak_eq(a: &str, b: &str) -> bool {
    a.trim_start_matches("W/") == b.trim_start_matches("W/")
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetMetadata, MockAssetFs};
    use crate::error::{DashboardError, Result};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records delegated requests and answers with a marker response
    #[derive(Default)]
    struct RecordingSsr {
        seen: StdMutex<Vec<(String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl SsrHandler for RecordingSsr {
        async fn handle(&self, request: Request<Body>) -> Result<Response<Body>> {
            let cookie = request
                .headers()
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.seen
                .lock()
                .unwrap()
                .push((request.uri().to_string(), cookie));
            if self.fail {
                return Err(DashboardError::Ssr("renderer crashed at line 12".to_string()));
            }
            let mut response = Response::new(Body::from("rendered"));
            response
                .headers_mut()
                .insert("x-rendered-by", HeaderValue::from_static("ssr"));
            Ok(response)
        }
    }

    const MTIME: Duration = Duration::from_secs(784_111_777);

    fn file_metadata(len: u64) -> AssetMetadata {
        AssetMetadata {
            is_dir: false,
            len,
            modified: Some(UNIX_EPOCH + MTIME),
        }
    }

    fn dispatcher(fs: MockAssetFs, ssr: Arc<RecordingSsr>) -> RequestDispatcher {
        RequestDispatcher::new(
            StaticAssetResolver::new("/srv/client", Arc::new(fs)),
            CachePolicy::default(),
            ssr,
        )
    }

    fn serving(len: u64, contents: &'static str) -> MockAssetFs {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata().returning(move |_| Ok(file_metadata(len)));
        fs.expect_open().returning(move |_| Ok(Body::from(contents)));
        fs
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn http_date_formats_imf_fixdate() {
        assert_eq!(
            http_date(UNIX_EPOCH + Duration::from_secs(784_111_777)),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("/assets/app-ab12.js"), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for("/favicon.ICO"), "image/x-icon");
        assert_eq!(content_type_for("/robots"), "application/octet-stream");
    }

    #[test]
    fn parse_single_ranges() {
        let partial = |start, end| Some(Delivery::Partial { start, end });
        assert_eq!(parse_range("bytes=0-4", 10), partial(0, 4));
        assert_eq!(parse_range("bytes=5-", 10), partial(5, 9));
        assert_eq!(parse_range("bytes=-3", 10), partial(7, 9));
        assert_eq!(parse_range("bytes=-30", 10), partial(0, 9));
        assert_eq!(parse_range("bytes=8-100", 10), partial(8, 9));
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range("bytes=10-", 10), Some(Delivery::Unsatisfiable));
        assert_eq!(parse_range("bytes=-0", 10), Some(Delivery::Unsatisfiable));
        assert_eq!(parse_range("bytes=0-", 0), Some(Delivery::Unsatisfiable));
    }

    #[test]
    fn ignored_ranges() {
        assert_eq!(parse_range("bytes=0-1,4-5", 10), None);
        assert_eq!(parse_range("items=0-1", 10), None);
        assert_eq!(parse_range("bytes=5-2", 10), None);
        assert_eq!(parse_range("bytes=a-b", 10), None);
        assert_eq!(parse_range("bytes=-", 10), None);
    }

    #[test]
    fn range_only_applies_to_get_with_matching_if_range() {
        let asset = ResolvedAsset {
            path: "/srv/client/video.webm".into(),
            metadata: file_metadata(10),
        };
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-1"));

        let partial = Delivery::Partial { start: 0, end: 1 };
        assert_eq!(delivery_for(&Method::GET, &headers, &asset), partial);
        assert_eq!(delivery_for(&Method::POST, &headers, &asset), Delivery::Full);

        headers.insert(
            header::IF_RANGE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert_eq!(delivery_for(&Method::GET, &headers, &asset), partial);

        headers.insert(
            header::IF_RANGE,
            HeaderValue::from_static("Mon, 07 Nov 1994 08:49:37 GMT"),
        );
        assert_eq!(delivery_for(&Method::GET, &headers, &asset), Delivery::Full);

        // Weak validators never satisfy If-Range
        headers.insert(header::IF_RANGE, HeaderValue::from_str(&asset.etag()).unwrap());
        assert_eq!(delivery_for(&Method::GET, &headers, &asset), Delivery::Full);
    }

    #[tokio::test]
    async fn range_request_streams_only_that_slice() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata().returning(|_| Ok(file_metadata(12)));
        fs.expect_open().never();
        fs.expect_open_range()
            .withf(|_, start, len| *start == 6 && *len == 5)
            .times(1)
            .returning(|_, _, _| Ok(Body::from("world")));
        let dispatcher = dispatcher(fs, Arc::new(RecordingSsr::default()));

        let request = Request::builder()
            .uri("/greeting.txt")
            .header(header::RANGE, "bytes=6-10")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.handle(request).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 6-10/12");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()["X-Frame-Options"], "DENY");
        assert_eq!(body_string(response).await, "world");
    }

    #[test]
    fn if_none_match_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert!(!is_not_modified(&headers, "W/\"a\"", Some(UNIX_EPOCH + MTIME)));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"x\", W/\"a\""));
        assert!(is_not_modified(&headers, "W/\"a\"", Some(UNIX_EPOCH + MTIME)));
    }

    #[test]
    fn if_modified_since_compares_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        let modified = UNIX_EPOCH + MTIME + Duration::from_millis(500);
        assert!(is_not_modified(&headers, "W/\"a\"", Some(modified)));
        assert!(!is_not_modified(
            &headers,
            "W/\"a\"",
            Some(modified + Duration::from_secs(1))
        ));
        assert!(!is_not_modified(&headers, "W/\"a\"", None));

        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_static("yesterday"));
        assert!(!is_not_modified(&headers, "W/\"a\"", Some(modified)));
    }

    #[tokio::test]
    async fn immutable_asset_is_served_with_static_headers() {
        let ssr = Arc::new(RecordingSsr::default());
        let dispatcher = dispatcher(serving(12, "console.log"), Arc::clone(&ssr));

        let response = dispatcher.handle(get("/assets/app-ab12.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(headers["X-Content-Type-Options"], "nosniff");
        assert_eq!(headers["X-Frame-Options"], "DENY");
        assert_eq!(headers["Referrer-Policy"], "strict-origin-when-cross-origin");
        assert_eq!(headers[header::CONTENT_TYPE], "text/javascript; charset=utf-8");
        assert_eq!(headers[header::CONTENT_LENGTH], "12");
        assert_eq!(headers[header::LAST_MODIFIED], "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(headers.contains_key(header::ETAG));
        assert_eq!(body_string(response).await, "console.log");
        assert!(ssr.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_asset_gets_short_cache() {
        let dispatcher = dispatcher(serving(3, "ico"), Arc::new(RecordingSsr::default()));

        let response = dispatcher.handle(get("/favicon.ico")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=600");
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata().returning(|_| Ok(file_metadata(12)));
        fs.expect_open().never();
        let dispatcher = dispatcher(fs, Arc::new(RecordingSsr::default()));

        let etag = ResolvedAsset {
            path: "/srv/client/assets/app-ab12.js".into(),
            metadata: file_metadata(12),
        }
        .etag();
        let request = Request::builder()
            .uri("/assets/app-ab12.js")
            .header(header::IF_NONE_MATCH, etag.as_str())
            .body(Body::empty())
            .unwrap();

        let response = dispatcher.handle(request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], etag.as_str());
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(response.headers()["X-Frame-Options"], "DENY");
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_delegated_unchanged() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata()
            .returning(|_| Err(io::Error::from(io::ErrorKind::NotFound)));
        let ssr = Arc::new(RecordingSsr::default());
        let dispatcher = dispatcher(fs, Arc::clone(&ssr));

        let request = Request::builder()
            .uri("/dashboard/settings?tab=alerts")
            .header(header::COOKIE, "session=abc")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.handle(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-rendered-by"], "ssr");
        for name in [
            "cache-control",
            "x-content-type-options",
            "x-frame-options",
            "referrer-policy",
        ] {
            assert!(!response.headers().contains_key(name), "{name}");
        }
        assert_eq!(body_string(response).await, "rendered");
        assert_eq!(
            *ssr.seen.lock().unwrap(),
            vec![(
                "/dashboard/settings?tab=alerts".to_string(),
                Some("session=abc".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn directory_is_delegated() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata().returning(|_| {
            Ok(AssetMetadata {
                is_dir: true,
                len: 4096,
                modified: None,
            })
        });
        fs.expect_open().never();
        let ssr = Arc::new(RecordingSsr::default());
        let dispatcher = dispatcher(fs, Arc::clone(&ssr));

        let response = dispatcher.handle(get("/assets/")).await;
        assert_eq!(response.headers()["x-rendered-by"], "ssr");
        assert_eq!(ssr.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn filesystem_fault_is_500_without_delegation() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        let ssr = Arc::new(RecordingSsr::default());
        let dispatcher = dispatcher(fs, Arc::clone(&ssr));

        let response = dispatcher.handle(get("/assets/app-ab12.js")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(response).await.is_empty());
        assert!(ssr.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_500() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata().returning(|_| Ok(file_metadata(1)));
        fs.expect_open()
            .returning(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));
        let dispatcher = dispatcher(fs, Arc::new(RecordingSsr::default()));

        let response = dispatcher.handle(get("/assets/app-ab12.js")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn ssr_failure_is_bad_gateway_without_details() {
        let mut fs = MockAssetFs::new();
        fs.expect_metadata()
            .returning(|_| Err(io::Error::from(io::ErrorKind::NotFound)));
        let ssr = Arc::new(RecordingSsr {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher(fs, ssr);

        let response = dispatcher.handle(get("/dashboard")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!body_string(response).await.contains("line 12"));
    }
}
