//! Library API handlers
//!
//! | version | action        | idempotent as |
//! |---------|---------------|---------------|
//! | v1      | create_book   | `book_v1`     |
//! | v1      | get_books     |               |
//! | v1      | get_book      |               |
//! | v1      | update_book   |               |
//! | v1      | delete_book   |               |
//! | v2      | create_book   | `book_v2`     |
//! | v2      | get_books     |               |
//! | v2      | get_book      |               |
//! | v2      | update_book   |               |
//! | v2      | delete_book   |               |
//! | v2      | create_author | `author`      |
//! | v2      | get_author    |               |
//! | v2      | get_authors   |               |

pub mod library;

pub use library::Library;

use crate::handler::{Handler, HandlerRegistryBuilder, HandlerResult, handler_fn};
use serde_json::Value;
use std::sync::Arc;

/// Register every library operation on `builder`
pub fn register(builder: HandlerRegistryBuilder, library: Arc<Library>) -> HandlerRegistryBuilder {
    builder
        .idempotent("v1", "create_book", "book_v1", op(&library, Library::create_book_v1))
        .route("v1", "get_books", op(&library, Library::get_books_v1))
        .route("v1", "get_book", op(&library, Library::get_book_v1))
        .route("v1", "update_book", op(&library, Library::update_book_v1))
        .route("v1", "delete_book", op(&library, Library::delete_book_v1))
        .idempotent("v2", "create_book", "book_v2", op(&library, Library::create_book_v2))
        .route("v2", "get_books", op(&library, Library::get_books_v2))
        .route("v2", "get_book", op(&library, Library::get_book_v2))
        .route("v2", "update_book", op(&library, Library::update_book_v2))
        .route("v2", "delete_book", op(&library, Library::delete_book_v2))
        .idempotent("v2", "create_author", "author", op(&library, Library::create_author))
        .route("v2", "get_author", op(&library, Library::get_author))
        .route("v2", "get_authors", op(&library, Library::get_authors))
}

fn op(library: &Arc<Library>, operation: fn(&Library, Value) -> HandlerResult) -> impl Handler {
    let library = Arc::clone(library);
    handler_fn(move |payload| {
        let library = Arc::clone(&library);
        async move { operation(&library, payload) }
    })
}
