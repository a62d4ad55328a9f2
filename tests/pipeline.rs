use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use quire::{
    BufferPool, Exchange, InternalServerError, ParamValue, Pipeline, Request, ResponseWriter,
    Router, http_error,
};
use regex::bytes::Regex;

#[derive(Debug, thiserror::Error)]
#[error("book {0} not found")]
struct BookNotFound(i64);

fn not_found(res: &mut dyn ResponseWriter, _: &Request, err: &anyhow::Error) -> anyhow::Result<bool> {
    match err.downcast_ref::<BookNotFound>() {
        Some(_) => {
            http_error(res, StatusCode::NOT_FOUND, "Not found");
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn send(router: &Router, req: http::Request<Bytes>) -> (StatusCode, HeaderMap, Bytes) {
    let res = router.handle(req).await;
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, body)
}

fn get(uri: &str) -> http::Request<Bytes> {
    http::Request::builder().uri(uri).body(Bytes::new()).unwrap()
}

fn get_if_none_match(uri: &str, etag: &HeaderValue) -> http::Request<Bytes> {
    http::Request::builder()
        .uri(uri)
        .header(IF_NONE_MATCH, etag.clone())
        .body(Bytes::new())
        .unwrap()
}

fn with_body(method: Method, uri: &str, content_type: &str, body: impl Into<Bytes>) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

// ── handlers ──────────────────────────────────────────────────────────────────

async fn show_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let id: i64 = ex.params.parse("id")?;
    write!(ex.response, "<h1>Book {id}</h1>")?;
    Ok(())
}

static FORM_RENDERS: AtomicUsize = AtomicUsize::new(0);

async fn edit_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let token = FORM_RENDERS.fetch_add(1, Ordering::SeqCst);
    write!(
        ex.response,
        r#"<form><input type="hidden" name="csrf_token" value="tok{token}"><input name="title" value="Dune"></form>"#
    )?;
    Ok(())
}

async fn missing_book(ex: &mut Exchange) -> anyhow::Result<()> {
    ex.response.html("<h1>Half a page");
    Err(BookNotFound(404).into())
}

async fn broken_book(ex: &mut Exchange) -> anyhow::Result<()> {
    ex.response.html("<h1>Half a page");
    anyhow::bail!("database went away")
}

async fn create_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let title = ex.params.scalar("title").unwrap_or("untitled").to_owned();
    ex.response.write_status(StatusCode::CREATED);
    ex.response.text(&title);
    Ok(())
}

async fn echo_id(ex: &mut Exchange) -> anyhow::Result<()> {
    match ex.params.get("id") {
        Some(ParamValue::Scalar(id)) => ex.response.text(&format!("id={id}")),
        Some(ParamValue::List(ids)) => ex.response.text(&format!("ids={}", ids.join(","))),
        None => ex.response.text("none"),
    }
    Ok(())
}

async fn tagged(ex: &mut Exchange) -> anyhow::Result<()> {
    let tags = ex.params.list("tags").unwrap_or_default().join(",");
    ex.response.text(&tags);
    Ok(())
}

async fn pinned_etag(ex: &mut Exchange) -> anyhow::Result<()> {
    ex.response.headers_mut().insert(ETAG, HeaderValue::from_static("\"v1\""));
    ex.response.text("pinned");
    Ok(())
}

static IMPORT_INVOKED: AtomicBool = AtomicBool::new(false);

async fn import_books(ex: &mut Exchange) -> anyhow::Result<()> {
    IMPORT_INVOKED.store(true, Ordering::SeqCst);
    ex.response.text(&format!("{} files", ex.uploads.len()));
    Ok(())
}

async fn delete_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let id: i64 = ex.params.parse("id")?;
    ex.response.text(&format!("deleted {id}"));
    Ok(())
}

async fn panicking_book(ex: &mut Exchange) -> anyhow::Result<()> {
    ex.response.html("<h1>Half a page");
    panic!("template index out of bounds");
}

static LARGE_FORM_INVOKED: AtomicBool = AtomicBool::new(false);

async fn large_form(ex: &mut Exchange) -> anyhow::Result<()> {
    LARGE_FORM_INVOKED.store(true, Ordering::SeqCst);
    ex.response.text("accepted");
    Ok(())
}

fn app(pool: BufferPool) -> Router {
    let pipeline = Pipeline::builder()
        .error_handler(not_found)
        .digest_filter(Regex::new(r#"<input type="hidden" name="csrf_token" value="[^"]+">"#).unwrap())
        .multipart_limit(1024)
        .max_body(8 * 1024)
        .buffer_pool(pool)
        .build();

    // no error handlers at all: every failure falls through to the generic 500
    let bare = Pipeline::builder().build();

    Router::new()
        .get("/books/{id}", pipeline.wrap(show_book))
        .get("/books/{id}/edit", pipeline.wrap(edit_book))
        .get("/missing", pipeline.wrap(missing_book))
        .get("/broken", pipeline.wrap(broken_book))
        .get("/bare/broken", bare.wrap(broken_book))
        .post("/books", pipeline.wrap(create_book))
        .post("/echo/{id}", pipeline.wrap(echo_id))
        .get("/tagged", pipeline.wrap(tagged))
        .get("/pinned", pipeline.wrap(pinned_etag))
        .post("/books/import", pipeline.wrap(import_books))
        .delete("/books/{id}", pipeline.wrap(delete_book))
        .get("/panics", pipeline.wrap(panicking_book))
        .post("/books/bulk", pipeline.wrap(large_form))
}

// ── conditional GET ───────────────────────────────────────────────────────────

#[tokio::test]
async fn etag_round_trip_yields_not_modified() {
    let router = app(BufferPool::new());

    let (status, headers, body) = send(&router, get("/books/7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"<h1>Book 7</h1>");
    assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    let etag = headers[ETAG].clone();
    assert_eq!(etag, quire::digest(b"<h1>Book 7</h1>", None).as_str());
    assert!(etag.to_str().unwrap().starts_with("W/\""));

    let (status, _, body) = send(&router, get_if_none_match("/books/7", &etag)).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn stale_validator_gets_the_full_body() {
    let router = app(BufferPool::new());
    let stale = HeaderValue::from_static("W/\"stale\"");

    let (status, headers, body) = send(&router, get_if_none_match("/books/8", &stale)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"<h1>Book 8</h1>");
    assert!(headers.contains_key(ETAG));
}

#[tokio::test]
async fn digest_filter_ignores_one_time_tokens() {
    let router = app(BufferPool::new());

    let (_, first_headers, first_body) = send(&router, get("/books/1/edit")).await;
    let (_, second_headers, second_body) = send(&router, get("/books/1/edit")).await;
    assert_ne!(first_body, second_body);
    assert_eq!(first_headers[ETAG], second_headers[ETAG]);

    let (status, _, body) = send(&router, get_if_none_match("/books/1/edit", &first_headers[ETAG])).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn handler_supplied_etag_is_left_alone() {
    let router = app(BufferPool::new());
    let (status, headers, body) =
        send(&router, get_if_none_match("/pinned", &HeaderValue::from_static("\"v1\""))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[ETAG], "\"v1\"");
    assert_eq!(&body[..], b"pinned");
}

#[tokio::test]
async fn non_get_requests_get_no_etag_but_keep_their_status() {
    let router = app(BufferPool::new());
    let req = with_body(Method::POST, "/books", "application/x-www-form-urlencoded", "title=Emma");

    let (status, headers, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(&body[..], b"Emma");
    assert!(!headers.contains_key(ETAG));
}

// ── error handling ────────────────────────────────────────────────────────────

#[tokio::test]
async fn handled_error_replaces_the_partial_body() {
    let router = app(BufferPool::new());
    let (status, headers, body) = send(&router, get("/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"Not found\n");
    assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
    // a handled error is finalized like a success
    assert!(headers.contains_key(ETAG));
}

#[tokio::test]
async fn unclaimed_error_becomes_generic_500() {
    let router = app(BufferPool::new());
    let (status, headers, body) = send(&router, get("/broken")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
    assert!(!headers.contains_key(ETAG));

    let (status, _, body) = send(&router, get("/bare/broken")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
}

#[tokio::test]
async fn failing_error_handler_becomes_generic_500() {
    let pipeline = Pipeline::builder()
        .error_handler(|_: &mut dyn ResponseWriter, _: &Request, _: &anyhow::Error| -> anyhow::Result<bool> {
            anyhow::bail!("error template missing")
        })
        .error_strategy(InternalServerError)
        .build();
    let router = Router::new().get("/missing", pipeline.wrap(missing_book));

    let (status, _, body) = send(&router, get("/missing")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
}

#[tokio::test]
async fn unparsable_route_param_uses_the_chain() {
    let router = app(BufferPool::new());
    let (status, _, body) = send(&router, get("/books/dune")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
}

// ── parameters ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn json_body_beats_query_beats_route() {
    let router = app(BufferPool::new());
    let req = with_body(Method::POST, "/echo/1?id=2", "application/json", r#"{"id":3}"#);
    let (_, _, body) = send(&router, req).await;
    assert_eq!(&body[..], b"id=3");

    let req = with_body(Method::POST, "/echo/1?id=2", "text/plain", "ignored");
    let (_, _, body) = send(&router, req).await;
    assert_eq!(&body[..], b"id=2");
}

#[tokio::test]
async fn repeated_array_keys_become_lists() {
    let router = app(BufferPool::new());
    let (_, _, body) = send(&router, get("/tagged?tags[]=a&tags[]=b")).await;
    assert_eq!(&body[..], b"a,b");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let router = app(BufferPool::new());
    let req = with_body(Method::POST, "/echo/1", "application/json", "{not json");
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Bad Request\n");
}

#[tokio::test]
async fn oversized_multipart_is_rejected_before_the_handler() {
    let router = app(BufferPool::new());
    let notes = "x".repeat(4096);
    let body = format!(
        "--B\r\nContent-Disposition: form-data; name=\"notes\"\r\n\r\n{notes}\r\n--B--\r\n"
    );
    let req = with_body(Method::POST, "/books/import", "multipart/form-data; boundary=B", body);

    let (status, headers, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Bad Request\n");
    assert!(!headers.contains_key(ETAG));
    assert!(!IMPORT_INVOKED.load(Ordering::SeqCst));
}

#[tokio::test]
async fn oversized_form_is_rejected_before_the_handler() {
    let router = app(BufferPool::new());
    let body = format!("notes={}", "x".repeat(16 * 1024));
    let req = with_body(Method::POST, "/books/bulk", "application/x-www-form-urlencoded", body);

    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Bad Request\n");
    assert!(!LARGE_FORM_INVOKED.load(Ordering::SeqCst));
}

// ── panics ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn panicking_handler_becomes_generic_500() {
    let pool = BufferPool::new();
    let router = app(pool.clone());

    let (status, headers, body) = send(&router, get("/panics")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
    assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(pool.stats().outstanding(), 0);

    // the router keeps serving afterwards
    let (status, _, _) = send(&router, get("/books/1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn panicking_error_handler_becomes_generic_500() {
    let pipeline = Pipeline::builder()
        .error_handler(|_: &mut dyn ResponseWriter, _: &Request, _: &anyhow::Error| -> anyhow::Result<bool> {
            panic!("error page missing")
        })
        .build();
    let router = Router::new().get("/missing", pipeline.wrap(missing_book));

    let (status, _, body) = send(&router, get("/missing")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Internal Server Error\n");
}

// ── buffers ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_request_returns_its_buffer() {
    let pool = BufferPool::new();
    let router = app(pool.clone());
    let before = pool.stats();

    let requests = vec![
        get("/books/1"),
        get("/missing"),
        get("/broken"),
        get("/books/dune"),
        with_body(Method::POST, "/echo/1", "application/json", "{"),
        with_body(Method::POST, "/books", "application/x-www-form-urlencoded", "title=Emma"),
        get("/books/1/edit"),
        get("/panics"),
    ];
    let count = requests.len() as u64;
    for req in requests {
        send(&router, req).await;
    }

    let after = pool.stats();
    assert_eq!(after.acquired - before.acquired, count);
    assert_eq!(after.outstanding(), before.outstanding());
    assert_eq!(after.outstanding(), 0);
}

// ── routing & middleware ──────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_paths_and_methods() {
    let router = app(BufferPool::new());

    let (status, _, body) = send(&router, get("/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"Not found\n");

    let req = with_body(Method::PUT, "/books", "text/plain", "");
    let (status, headers, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[http::header::ALLOW], "POST");
}

#[tokio::test]
async fn form_method_override_reaches_delete_routes() {
    let router = app(BufferPool::new());
    let req = with_body(Method::POST, "/books/5", "application/x-www-form-urlencoded", "_method=DELETE");
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"deleted 5");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let router = app(BufferPool::new());
    let req = http::Request::builder()
        .uri("/books/1")
        .header("x-request-id", "req-42")
        .body(Bytes::new())
        .unwrap();
    let (_, headers, _) = send(&router, req).await;
    assert_eq!(headers["x-request-id"], "req-42");

    let (_, headers, _) = send(&router, get("/books/1")).await;
    assert!(headers.contains_key("x-request-id"));
}
