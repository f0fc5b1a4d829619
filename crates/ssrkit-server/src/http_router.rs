//! Request routing for the rendering server.
//!
//! The router answers the built-in endpoints (`/_metrics`, `/_info`,
//! `/hmr`, `/assets/*`, `/_render/*`) directly and maps every other `GET`
//! onto a configured page route.

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use futures_util::StreamExt;
use serde_json::Value;
use ssrkit_common::{Location, RequestContext, SsrConfig, SsrError};
use ssrkit_metrics::{MetricsCollector, RenderMetricsCollector};
use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::document::{DocumentComposer, PageSpec};
use crate::hmr::EventBroadcaster;
use crate::render::Renderer;
use crate::runtime::EngineFactory;

pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;
pub type HyperResponse = Response<ResponseBody>;

const RENDER_PREFIX: &str = "/_render/";
const ASSETS_PREFIX: &str = "/assets/";
const HMR_PATH: &str = "/hmr";

/// Supplies the per-request user summary.
///
/// Returning `Some` marks the request as authenticated, which also keeps
/// its markup out of the render cache.
pub trait ContextProvider: Send + Sync {
    fn user_info(&self, headers: &HeaderMap) -> Option<Value>;
}

/// Treats every request as anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousProvider;

impl ContextProvider for AnonymousProvider {
    fn user_info(&self, _headers: &HeaderMap) -> Option<Value> {
        None
    }
}

pub struct SsrRouter<F: EngineFactory> {
    renderer: Arc<Renderer<F>>,
    composer: DocumentComposer,
    config: Arc<SsrConfig>,
    broadcaster: Option<EventBroadcaster>,
    provider: Arc<dyn ContextProvider>,
}

impl<F: EngineFactory> SsrRouter<F> {
    pub fn new(renderer: Arc<Renderer<F>>, composer: DocumentComposer, config: Arc<SsrConfig>) -> Self {
        Self {
            renderer,
            composer,
            config,
            broadcaster: None,
            provider: Arc::new(AnonymousProvider),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: EventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn metrics(&self) -> &Arc<RenderMetricsCollector> {
        self.renderer.metrics()
    }

    pub async fn handle<B>(&self, req: Request<B>) -> HyperResponse
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        tracing::debug!("{} {}", method, path);

        let metrics = self.metrics();
        if method == Method::GET && metrics.is_metrics_path(&path) {
            return match metrics.handle_metrics_request(&path) {
                Ok(value) => json_response(StatusCode::OK, &value),
                Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
        }

        if let Some(fragment) = path.strip_prefix(RENDER_PREFIX) {
            if method != Method::POST {
                return text_response(StatusCode::METHOD_NOT_ALLOWED, "Use POST");
            }
            let fragment = fragment.to_string();
            return self.render_fragment(&fragment, req).await;
        }

        if method != Method::GET && method != Method::HEAD {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        }

        if path == HMR_PATH {
            return self.hmr_stream();
        }
        if let Some(asset) = path.strip_prefix(ASSETS_PREFIX) {
            return self.serve_asset(asset).await;
        }

        let ctx = self.request_context(req.headers(), req.uri());
        self.render_page(&path, &ctx).await
    }

    /// Builds the render context from the request line and headers.
    pub fn request_context(&self, headers: &HeaderMap, uri: &Uri) -> RequestContext {
        let host = header_str(headers, header::HOST)
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.scheme_str())
            .unwrap_or("http");
        let query = uri.query().unwrap_or("");
        let location = Location::from_parts(scheme, host, uri.path(), query, "");

        let lang = resolve_lang(
            query,
            header_str(headers, header::COOKIE),
            header_str(headers, header::ACCEPT_LANGUAGE),
            &self.supported_langs(),
            &self.config.default_lang,
        );

        RequestContext::new(location)
            .with_translations(self.config.translations_for(&lang))
            .with_lang(lang)
            .with_site(self.config.site.clone())
            .with_user(self.provider.user_info(headers))
    }

    fn supported_langs(&self) -> Vec<String> {
        self.config
            .translations
            .as_object()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn render_fragment<B>(&self, fragment: &str, req: Request<B>) -> HyperResponse
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let ctx = self.request_context(req.headers(), req.uri());
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return text_response(StatusCode::BAD_REQUEST, format!("Failed to read body: {}", e))
            }
        };

        let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Default::default())
        } else {
            match serde_json::from_slice(&body) {
                Ok(payload) => payload,
                Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e)),
            }
        };

        match self.renderer.render(fragment, &payload, &ctx).await {
            Ok(markup) => html_response(StatusCode::OK, markup),
            Err(e) => text_response(error_status(&e), e.to_string()),
        }
    }

    async fn render_page(&self, path: &str, ctx: &RequestContext) -> HyperResponse {
        let Some(route) = self.config.route(path) else {
            return text_response(StatusCode::NOT_FOUND, format!("No route for {}", path));
        };

        let mut page = PageSpec::new(route.fragment.clone(), route.props.clone());
        if let Some(title) = &route.title {
            page = page.with_title(title.clone());
        }

        match self.renderer.render(&page.fragment, &page.props, ctx).await {
            Ok(markup) => html_response(StatusCode::OK, self.composer.compose(&page, &markup, ctx)),
            Err(e) => {
                tracing::error!("Page {} failed: {}", path, e);
                let href = &ctx.location.href;
                let body = self.composer.error_page(&page.component, href, &e.to_string());
                html_response(error_status(&e), body)
            }
        }
    }

    fn hmr_stream(&self) -> HyperResponse {
        let broadcaster = match &self.broadcaster {
            Some(b) if self.config.dev => b,
            _ => return text_response(StatusCode::NOT_FOUND, "Live reload is disabled"),
        };

        let session = broadcaster.session();
        tracing::debug!("Live reload client {} connected", session.client_id());
        let frames = session
            .into_stream()
            .map(|message| Ok::<_, Infallible>(Frame::data(Bytes::from(message.to_sse()))));

        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        response
    }

    async fn serve_asset(&self, asset: &str) -> HyperResponse {
        let Some(path) = asset_path(&self.config.client_build_dir, asset) else {
            return text_response(StatusCode::BAD_REQUEST, "Invalid asset path");
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut response = full_response(StatusCode::OK, bytes);
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
                response
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                text_response(StatusCode::NOT_FOUND, "Asset not found")
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read asset")
            }
        }
    }
}

fn error_status(e: &SsrError) -> StatusCode {
    match e {
        SsrError::FragmentNotFound { .. } | SsrError::InvalidFragmentName(_) => StatusCode::NOT_FOUND,
        SsrError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SsrError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SsrError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Picks the request language: `?lang=`, then the `lang` cookie, then
/// `Accept-Language`, then `default`. With an empty `supported` list any
/// well-formed tag is accepted.
pub fn resolve_lang(
    query: &str,
    cookie: Option<&str>,
    accept_language: Option<&str>,
    supported: &[String],
    default: &str,
) -> String {
    let accepts = |tag: &str| -> Option<String> {
        let tag = tag.trim();
        if tag.is_empty() || tag == "*" || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return None;
        }
        if supported.is_empty() {
            return Some(tag.to_string());
        }
        if let Some(exact) = supported.iter().find(|s| s.eq_ignore_ascii_case(tag)) {
            return Some(exact.clone());
        }
        let primary = tag.split(['-', '_']).next().unwrap_or(tag);
        supported.iter().find(|s| s.eq_ignore_ascii_case(primary)).cloned()
    };

    let from_query = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "lang")
        .and_then(|(_, value)| accepts(value));
    if let Some(lang) = from_query {
        return lang;
    }

    let from_cookie = cookie.and_then(|raw| {
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == "lang")
            .and_then(|(_, value)| accepts(value))
    });
    if let Some(lang) = from_cookie {
        return lang;
    }

    let from_header = accept_language.and_then(|raw| {
        let mut ranked: Vec<(f32, &str)> = raw
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let tag = parts.next()?.trim();
                let quality = parts
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .and_then(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                (quality > 0.0).then_some((quality, tag))
            })
            .collect();
        // stable sort keeps header order among equal weights
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.into_iter().find_map(|(_, tag)| accepts(tag))
    });

    from_header.unwrap_or_else(|| default.to_string())
}

/// Resolves an asset path inside `root`, rejecting anything but plain
/// path segments.
fn asset_path(root: &Path, asset: &str) -> Option<PathBuf> {
    let relative = Path::new(asset);
    let clean = !asset.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
    clean.then(|| root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn full_response(status: StatusCode, body: impl Into<Bytes>) -> HyperResponse {
    let mut response = Response::new(Full::new(body.into()).boxed_unsync());
    *response.status_mut() = status;
    response
}

fn typed_response(status: StatusCode, body: impl Into<Bytes>, content_type: &'static str) -> HyperResponse {
    let mut response = full_response(status, body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub fn text_response(status: StatusCode, body: impl Into<String>) -> HyperResponse {
    typed_response(status, body.into(), "text/plain; charset=utf-8")
}

pub fn html_response(status: StatusCode, body: String) -> HyperResponse {
    typed_response(status, body, "text/html; charset=utf-8")
}

pub fn json_response(status: StatusCode, value: &Value) -> HyperResponse {
    typed_response(status, value.to_string(), "application/json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmr::BroadcasterConfig;
    use crate::resource_limits::ResourceLimits;
    use crate::runtime::{BoaEngineFactory, EnginePool, PoolConfig};
    use serde_json::json;
    use ssrkit_common::RouteConfig;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        router: SsrRouter<BoaEngineFactory>,
    }

    struct HeaderUser;

    impl ContextProvider for HeaderUser {
        fn user_info(&self, headers: &HeaderMap) -> Option<Value> {
            header_str(headers, header::AUTHORIZATION).map(|token| json!({"token": token}))
        }
    }

    fn fixture(dev: bool) -> Fixture {
        let root = TempDir::new().unwrap();
        let server_dir = root.path().join("server");
        let client_dir = root.path().join("client");
        fs::create_dir_all(&server_dir).unwrap();
        fs::create_dir_all(&client_dir).unwrap();
        fs::write(
            server_dir.join("Home.js"),
            r#"function Render() {
                var user = typeof USER_INFO === "undefined" ? "anon" : USER_INFO.token;
                return "<p>" + INITIAL_PROPS.id + "|" + LANG + "|" + user + "</p>";
            }"#,
        )
        .unwrap();
        fs::write(server_dir.join("Broken.js"), "function Render() { throw new Error('boom'); }").unwrap();
        fs::write(client_dir.join("Home.js"), "console.log('hydrate')").unwrap();

        let config = SsrConfig {
            dev,
            server_build_dir: server_dir.clone(),
            client_build_dir: client_dir,
            translations: json!({"en": {"hi": "Hi"}, "de": {"hi": "Hallo"}}),
            routes: vec![
                RouteConfig {
                    path: "/".to_string(),
                    fragment: "Home.js".to_string(),
                    title: Some("Home".to_string()),
                    props: json!({"id": 7}),
                },
                RouteConfig {
                    path: "/broken".to_string(),
                    fragment: "Broken.js".to_string(),
                    title: None,
                    props: json!({}),
                },
            ],
            ..Default::default()
        };

        let limits = ResourceLimits::default();
        let pool = EnginePool::new(BoaEngineFactory::new(limits.clone()), PoolConfig { size: 1, max_uses: 50 }).unwrap();
        let renderer = Arc::new(Renderer::new(server_dir, pool, limits));
        let composer = DocumentComposer::new("test", dev);
        let broadcaster = EventBroadcaster::new(BroadcasterConfig {
            throttle: Duration::ZERO,
            ..Default::default()
        });
        let router = SsrRouter::new(renderer, composer, Arc::new(config))
            .with_broadcaster(broadcaster)
            .with_provider(Arc::new(HeaderUser));
        Fixture { _root: root, router }
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::HOST, "example.com")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::HOST, "example.com")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_text(response: HyperResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_render_endpoint_returns_markup() {
        let fixture = fixture(false);
        let response = fixture.router.handle(post("/_render/Home.js", r#"{"id":1}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<p>1|en|anon</p>");
    }

    #[tokio::test]
    async fn test_render_endpoint_errors() {
        let fixture = fixture(false);

        let missing = fixture.router.handle(post("/_render/Nope.js", "{}")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let escape = fixture.router.handle(post("/_render/../secret", "{}")).await;
        assert_eq!(escape.status(), StatusCode::NOT_FOUND);

        let bad_json = fixture.router.handle(post("/_render/Home.js", "{oops")).await;
        assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);

        let wrong_method = fixture.router.handle(get("/_render/Home.js")).await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_page_route_is_composed() {
        let fixture = fixture(false);
        let response = fixture.router.handle(get("/?lang=de")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains(r#"<div id="root"><p>7|de|anon</p></div>"#));
        assert!(html.contains(r#"window.TRANSLATIONS = {"hi":"Hallo"};"#));
        assert!(html.contains("<title>Home</title>"));
    }

    #[tokio::test]
    async fn test_authenticated_user_reaches_script() {
        let fixture = fixture(false);
        let mut request = get("/");
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("t0k"));
        let html = body_text(fixture.router.handle(request).await).await;
        assert!(html.contains("<p>7|en|t0k</p>"));
    }

    #[tokio::test]
    async fn test_failed_page_renders_error_page() {
        let fixture = fixture(true);
        let response = fixture.router.handle(get("/broken")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let html = body_text(response).await;
        assert!(html.contains("Failed to render Broken"));
        assert!(html.contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let fixture = fixture(false);
        let response = fixture.router.handle(get("/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_and_info() {
        let fixture = fixture(false);
        fixture.router.handle(post("/_render/Home.js", r#"{"id":1}"#)).await;

        let metrics: Value = serde_json::from_str(&body_text(fixture.router.handle(get("/_metrics")).await).await).unwrap();
        assert_eq!(metrics["total_renders"], 1);

        let info: Value = serde_json::from_str(&body_text(fixture.router.handle(get("/_info")).await).await).unwrap();
        assert_eq!(info["mode"], "production");
    }

    #[tokio::test]
    async fn test_assets() {
        let fixture = fixture(false);
        let response = fixture.router.handle(get("/assets/Home.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/javascript; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "console.log('hydrate')");

        let traversal = fixture.router.handle(get("/assets/../server/Home.js")).await;
        assert_ne!(traversal.status(), StatusCode::OK);

        let missing = fixture.router.handle(get("/assets/missing.css")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hmr_only_in_dev() {
        let production = fixture(false);
        assert_eq!(production.router.handle(get("/hmr")).await.status(), StatusCode::NOT_FOUND);

        let dev = fixture(true);
        let response = dev.router.handle(get("/hmr")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(
            frame.into_data().unwrap(),
            Bytes::from_static(b"event: connect\ndata: connected\n\n")
        );
    }

    #[test]
    fn test_resolve_lang_precedence() {
        let supported = vec!["en".to_string(), "de".to_string(), "pt-BR".to_string()];

        assert_eq!(resolve_lang("lang=de", Some("lang=en"), Some("en"), &supported, "en"), "de");
        assert_eq!(resolve_lang("", Some("a=1; lang=de"), Some("en"), &supported, "en"), "de");
        assert_eq!(resolve_lang("", None, Some("fr;q=0.9, de;q=0.8"), &supported, "en"), "de");
        assert_eq!(resolve_lang("", None, Some("de-AT"), &supported, "en"), "de");
        assert_eq!(resolve_lang("", None, Some("pt-br"), &supported, "en"), "pt-BR");
        assert_eq!(resolve_lang("lang=xx", None, None, &supported, "en"), "en");
        assert_eq!(resolve_lang("", None, Some("de;q=0"), &supported, "en"), "en");
    }

    #[test]
    fn test_resolve_lang_without_table() {
        assert_eq!(resolve_lang("lang=fr", None, None, &[], "en"), "fr");
        assert_eq!(resolve_lang("lang=<x>", None, None, &[], "en"), "en");
        assert_eq!(resolve_lang("", None, Some("*"), &[], "en"), "en");
    }

    #[test]
    fn test_request_context_uses_forwarded_proto() {
        let fixture = fixture(false);
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("example.com:8443"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let uri: Uri = "/blog?page=2".parse().unwrap();

        let ctx = fixture.router.request_context(&headers, &uri);
        assert_eq!(ctx.location.protocol, "https:");
        assert_eq!(ctx.location.hostname, "example.com");
        assert_eq!(ctx.location.pathname, "/blog");
        assert_eq!(ctx.location.search, "?page=2");
        assert!(!ctx.is_authenticated());
    }
}
