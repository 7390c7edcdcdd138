//! Request dispatch through middleware and registered modules.

use super::context::{HttpContext, ServerContext};
use crate::module::{error_chain, HandlerError, HandlerPanic, HandlerResult};
use crate::modules::http_handler::HttpMessage;
use crate::util::html_escape;
use http::StatusCode;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error};

const NOT_FOUND_HTML: &str = "<html><head><meta charset=\"utf-8\"><title>404 - Not Found</title></head>\
<body><h1>404 - Not Found</h1></body></html>";

/// Run a request through middleware, then through every module's handlers.
///
/// Returns `true` once a callback reports the request handled or fails.
/// A failing callback turns the response into a 500 page, unless the
/// response was already set to 401. Returns `false` when nothing handled
/// the request; the caller then writes a 404.
pub fn dispatch(ctx: &ServerContext, http: &mut HttpContext) -> bool {
    let started = Instant::now();
    let method = http.method();
    debug!(
        correlation_id = %http.correlation_id(),
        remote = %http.remote_addr(),
        method = %method,
        path = %http.path(),
        "Start of request"
    );

    let handled = run_handlers(ctx, http);

    debug!(
        correlation_id = %http.correlation_id(),
        handled,
        elapsed_us = started.elapsed().as_micros() as u64,
        "End of request"
    );
    handled
}

fn run_handlers(ctx: &ServerContext, http: &mut HttpContext) -> bool {
    for middleware in ctx.middleware() {
        match invoke(|| middleware(ctx, http)) {
            Ok(true) => {
                ctx.stats().handled();
                return true;
            },
            Ok(false) => {},
            Err(e) => {
                report_failure(ctx, http, "middleware", &e);
                return true;
            },
        }
    }

    let method = http.method();
    let path = http.path().to_string();

    for module in ctx.modules().snapshot() {
        for entry in module.handlers().matching(&path, &method) {
            debug!(module = module.name(), path = %path, "Invoking handler");
            match invoke(|| (entry.callback)(ctx, http)) {
                Ok(true) => {
                    ctx.stats().handled();
                    return true;
                },
                Ok(false) => {},
                Err(e) => {
                    report_failure(ctx, http, module.name(), &e);
                    return true;
                },
            }
        }
    }

    false
}

/// Call a handler, turning a panic into an error.
fn invoke<F>(callback: F) -> HandlerResult<bool>
where
    F: FnOnce() -> HandlerResult<bool>,
{
    catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(Box::new(HandlerPanic::from_payload(payload.as_ref()))))
}

fn report_failure(ctx: &ServerContext, http: &mut HttpContext, module: &str, failure: &HandlerError) {
    ctx.stats().handler_error();
    let message = format!("Failing module name: {module}\r\n{failure}");
    let trace = error_chain(failure.as_ref());
    error!(
        correlation_id = %http.correlation_id(),
        module,
        error = %failure,
        "Handler failed"
    );

    if http.response().status() == Some(StatusCode::UNAUTHORIZED) {
        return;
    }
    *http.response_mut() = failure_page(&message, &trace);
}

/// The 500 page: escaped message and cause chain.
#[must_use]
pub fn failure_page(message: &str, trace: &str) -> HttpMessage {
    let body = format!(
        "<html><head><meta charset=\"utf-8\"><title>500 - Internal Server Error</title></head>\
<body><h1>500 - Internal Server Error</h1><h2>Message</h2><pre>{}</pre>\
<h2>Stack Trace</h2><pre>{}</pre></body></html>",
        html_escape(message),
        html_escape(trace)
    );
    html_response(StatusCode::INTERNAL_SERVER_ERROR, body)
}

/// Turn the response into the default 404 page.
pub fn not_found(http: &mut HttpContext) {
    error!(
        correlation_id = %http.correlation_id(),
        path = %http.path(),
        "No module generated a response"
    );
    http.respond_html(StatusCode::NOT_FOUND, NOT_FOUND_HTML);
}

/// A minimal HTML page for a protocol-level error.
#[must_use]
pub fn error_page(status: StatusCode, detail: &str) -> HttpMessage {
    let title = format!(
        "{} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let body = format!(
        "<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
<body><h1>{title}</h1><p>{}</p></body></html>",
        html_escape(detail)
    );
    html_response(status, body)
}

fn html_response(status: StatusCode, body: String) -> HttpMessage {
    let mut response = HttpMessage::response(status);
    response
        .headers_mut()
        .insert("Content-Type", "text/html; charset=utf-8");
    response.set_body(body);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::module::{HandlerMap, Verb, WebModule};
    use http::{Method, Uri};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Api {
        handlers: HandlerMap,
    }

    impl WebModule for Api {
        fn name(&self) -> &str {
            "api"
        }

        fn handlers(&self) -> &HandlerMap {
            &self.handlers
        }
    }

    struct Fallback {
        handlers: HandlerMap,
    }

    impl WebModule for Fallback {
        fn name(&self) -> &str {
            "fallback"
        }

        fn handlers(&self) -> &HandlerMap {
            &self.handlers
        }
    }

    fn request(method: Method, target: &'static str) -> HttpContext {
        HttpContext::new(
            HttpMessage::request(method, Uri::from_static(target)),
            "127.0.0.1:4000".parse().unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
        )
    }

    fn body_text(http: HttpContext) -> String {
        http.into_response()
            .take_body()
            .map(|body| body.into_text().unwrap())
            .unwrap_or_default()
    }

    #[test]
    fn test_first_match_wins() {
        let ctx = ServerContext::new(ServerConfig::default());
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));

        let mut api = HandlerMap::new();
        let a = Arc::clone(&a_calls);
        api.add("/echo", Method::GET, move |_, http| {
            a.fetch_add(1, Ordering::SeqCst);
            http.respond_text(StatusCode::OK, "A");
            Ok(true)
        });
        ctx.modules().register(Api { handlers: api });

        let mut fallback = HandlerMap::new();
        let b = Arc::clone(&b_calls);
        fallback.add("*", Verb::Any, move |_, http| {
            b.fetch_add(1, Ordering::SeqCst);
            http.respond_text(StatusCode::OK, "B");
            Ok(true)
        });
        ctx.modules().register(Fallback { handlers: fallback });

        let mut get = request(Method::GET, "/echo");
        assert!(dispatch(&ctx, &mut get));
        assert_eq!(body_text(get), "A");

        let mut post = request(Method::POST, "/other");
        assert!(dispatch(&ctx, &mut post));
        assert_eq!(body_text(post), "B");

        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandled_without_wildcard() {
        let ctx = ServerContext::new(ServerConfig::default());
        let mut api = HandlerMap::new();
        api.add("/echo", Method::GET, |_, _| Ok(true));
        ctx.modules().register(Api { handlers: api });

        let mut http = request(Method::GET, "/missing");
        assert!(!dispatch(&ctx, &mut http));

        not_found(&mut http);
        assert_eq!(http.response().status(), Some(StatusCode::NOT_FOUND));
        assert!(body_text(http).contains("404 - Not Found"));
    }

    #[test]
    fn test_declined_handler_falls_through() {
        let ctx = ServerContext::new(ServerConfig::default());
        let mut api = HandlerMap::new();
        api.add("*", Verb::Any, |_, _| Ok(false));
        api.add("/echo", Verb::Any, |_, http| {
            http.respond_text(StatusCode::OK, "second");
            Ok(true)
        });
        ctx.modules().register(Api { handlers: api });

        let mut http = request(Method::GET, "/echo");
        assert!(dispatch(&ctx, &mut http));
        assert_eq!(body_text(http), "second");
    }

    #[test]
    fn test_error_becomes_escaped_500() {
        let ctx = ServerContext::new(ServerConfig::default());
        let mut api = HandlerMap::new();
        api.add("/fail", Method::GET, |_, _| {
            Err(io::Error::new(io::ErrorKind::Other, "<bad> & worse").into())
        });
        ctx.modules().register(Api { handlers: api });

        let mut fallback = HandlerMap::new();
        fallback.add("*", Verb::Any, |_, _| panic!("must not run"));
        ctx.modules().register(Fallback { handlers: fallback });

        let mut http = request(Method::GET, "/fail");
        assert!(dispatch(&ctx, &mut http));
        assert_eq!(
            http.response().status(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
        let body = body_text(http);
        assert!(body.contains("Failing module name: api"));
        assert!(body.contains("&lt;bad&gt; &amp; worse"));
        assert_eq!(ctx.stats().snapshot().handler_errors, 1);
    }

    #[test]
    fn test_panic_becomes_500() {
        let ctx = ServerContext::new(ServerConfig::default());
        let mut api = HandlerMap::new();
        api.add("*", Verb::Any, |_, _| panic!("kaboom"));
        ctx.modules().register(Api { handlers: api });

        let mut http = request(Method::GET, "/");
        assert!(dispatch(&ctx, &mut http));
        assert!(body_text(http).contains("kaboom"));
    }

    #[test]
    fn test_unauthorized_left_alone() {
        let ctx = ServerContext::new(ServerConfig::default());
        let mut api = HandlerMap::new();
        api.add("*", Verb::Any, |_, http| {
            http.respond_text(StatusCode::UNAUTHORIZED, "login first");
            Err("denied".into())
        });
        ctx.modules().register(Api { handlers: api });

        let mut http = request(Method::GET, "/secret");
        assert!(dispatch(&ctx, &mut http));
        assert_eq!(http.response().status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(body_text(http), "login first");
    }

    #[test]
    fn test_middleware_short_circuits() {
        let ctx = ServerContext::new(ServerConfig::default());
        ctx.add_middleware(Arc::new(
            |_: &ServerContext, http: &mut HttpContext| -> HandlerResult<bool> {
                http.respond_text(StatusCode::FORBIDDEN, "blocked");
                Ok(true)
            },
        ));
        let mut api = HandlerMap::new();
        api.add("*", Verb::Any, |_, _| panic!("must not run"));
        ctx.modules().register(Api { handlers: api });

        let mut http = request(Method::GET, "/");
        assert!(dispatch(&ctx, &mut http));
        assert_eq!(http.response().status(), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_error_page_escapes() {
        let page = error_page(StatusCode::BAD_REQUEST, "<script>");
        assert_eq!(page.status(), Some(StatusCode::BAD_REQUEST));
        assert!(page.body_len() > 0);
    }
}
