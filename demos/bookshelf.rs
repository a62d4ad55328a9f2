//! A server-rendered bookshelf: HTML pages with automatic ETags.
//!
//! Run with:
//!   cargo run --example bookshelf
//!   cargo run --example bookshelf -- bookshelf.toml
//!
//! Try:
//!   curl -i http://localhost:3000/books/1
//!   curl -i http://localhost:3000/books/1 -H 'if-none-match: W/"..."'   ← 304
//!   curl -i http://localhost:3000/books/1/edit                           ← token changes, ETag does not
//!   curl -i http://localhost:3000/books/99                               ← 404 from the error handler
//!   curl -i -X POST http://localhost:3000/books -d 'title=Emma&author=Austen&tags[]=classic'
//!   curl -i -X POST http://localhost:3000/books/1 -d '_method=DELETE'

use std::fmt::Write as _;
use std::sync::{LazyLock, Mutex, MutexGuard};

use http::StatusCode;
use http::header::LOCATION;
use http::HeaderValue;
use quire::{
    Exchange, InternalServerError, Pipeline, Request, ResponseWriter, Router, Server, Settings,
    http_error,
};
use tracing_subscriber::EnvFilter;

struct Book {
    id: i64,
    title: String,
    author: String,
    tags: Vec<String>,
}

static SHELF: LazyLock<Mutex<Vec<Book>>> = LazyLock::new(|| {
    Mutex::new(vec![
        Book { id: 1, title: "Dune".into(), author: "Herbert".into(), tags: vec!["sf".into()] },
        Book { id: 2, title: "Middlemarch".into(), author: "Eliot".into(), tags: vec![] },
    ])
});

fn shelf() -> MutexGuard<'static, Vec<Book>> {
    SHELF.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, thiserror::Error)]
#[error("no book with id {0}")]
struct NotFound(i64);

/// Hidden field rendered into every form; left out of the ETag digest.
const CSRF_FILTER: &str = r#"<input type="hidden" name="csrf_token" value="[^"]*">"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut builder = Pipeline::from_settings(&settings)?;
    if settings.etag.digest_filter.is_none() {
        builder = builder.digest_filter(regex::bytes::Regex::new(CSRF_FILTER)?);
    }
    let app = builder
        .error_handler(book_not_found)
        .error_strategy(InternalServerError)
        .build();

    let router = Router::new()
        .get("/books", app.wrap(list_books))
        .post("/books", app.wrap(create_book))
        .get("/books/{id}", app.wrap(show_book))
        .get("/books/{id}/edit", app.wrap(edit_book))
        .delete("/books/{id}", app.wrap(delete_book));

    Server::from_settings(&settings)?.serve(router).await?;
    Ok(())
}

fn book_not_found(res: &mut dyn ResponseWriter, _: &Request, err: &anyhow::Error) -> anyhow::Result<bool> {
    let Some(NotFound(id)) = err.downcast_ref::<NotFound>() else {
        return Ok(false);
    };
    http_error(res, StatusCode::NOT_FOUND, &format!("Book {id} is not on the shelf"));
    Ok(true)
}

// GET /books
async fn list_books(ex: &mut Exchange) -> anyhow::Result<()> {
    let books = shelf();
    write!(ex.response, "<html><body><h1>Bookshelf</h1><ul>")?;
    for book in books.iter() {
        write!(ex.response, r#"<li><a href="/books/{}">{}</a> by {}</li>"#, book.id, book.title, book.author)?;
    }
    write!(ex.response, "</ul></body></html>")?;
    Ok(())
}

// GET /books/{id}
async fn show_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let id: i64 = ex.params.parse("id")?;
    let books = shelf();
    let book = books.iter().find(|b| b.id == id).ok_or(NotFound(id))?;
    write!(
        ex.response,
        "<html><body><h1>{}</h1><p>{}</p><p>{}</p></body></html>",
        book.title,
        book.author,
        book.tags.join(", ")
    )?;
    Ok(())
}

// GET /books/{id}/edit
async fn edit_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let id: i64 = ex.params.parse("id")?;
    let token = uuid::Uuid::new_v4();
    let books = shelf();
    let book = books.iter().find(|b| b.id == id).ok_or(NotFound(id))?;
    write!(
        ex.response,
        r#"<html><body><form method="post" action="/books/{id}">
<input type="hidden" name="csrf_token" value="{token}">
<input name="title" value="{}">
</form></body></html>"#,
        book.title
    )?;
    Ok(())
}

// POST /books
async fn create_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let title = ex.params.scalar("title").unwrap_or("Untitled").to_owned();
    let author = ex.params.scalar("author").unwrap_or("Anonymous").to_owned();
    let tags = ex.params.list("tags").unwrap_or_default().to_vec();

    let id = {
        let mut books = shelf();
        let id = books.iter().map(|b| b.id).max().unwrap_or(0) + 1;
        books.push(Book { id, title, author, tags });
        id
    };

    ex.response.headers_mut().insert(LOCATION, HeaderValue::from_str(&format!("/books/{id}"))?);
    ex.response.write_status(StatusCode::CREATED);
    ex.response.text(&format!("created book {id}"));
    Ok(())
}

// DELETE /books/{id}, or POST with _method=DELETE from an HTML form
async fn delete_book(ex: &mut Exchange) -> anyhow::Result<()> {
    let id: i64 = ex.params.parse("id")?;
    let mut books = shelf();
    let before = books.len();
    books.retain(|b| b.id != id);
    if books.len() == before {
        return Err(NotFound(id).into());
    }
    ex.response.text(&format!("deleted book {id}"));
    Ok(())
}
