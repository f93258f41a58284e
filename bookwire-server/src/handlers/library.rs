//! In-memory library repository
//!
//! Holds the books of both API generations and the authors v2 books refer to.
//! Every operation takes the request payload and returns the response data,
//! or a [`HandlerError::Domain`] for expected business failures.

use crate::handler::{HandlerError, HandlerResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const BOOK_NOT_FOUND: &str = "Book not found";
pub const AUTHOR_NOT_FOUND: &str = "Author not found";
pub const DUPLICATE_ISBN: &str = "Book with this ISBN already exists";

#[derive(Debug, Clone, Serialize)]
pub struct BookV1 {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub year: i32,
    pub isbn: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookV2 {
    pub id: u64,
    pub title: String,
    pub author_id: u64,
    pub year: i32,
    pub isbn: String,
    pub pages: Option<u32>,
    pub genre: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub id: u64,
    pub name: String,
    pub birth_year: Option<i32>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct NewBookV1 {
    title: String,
    author: String,
    year: i32,
    isbn: String,
}

#[derive(Debug, Deserialize)]
struct BookUpdate {
    book_id: u64,
    title: Option<String>,
    author: Option<String>,
    year: Option<i32>,
    isbn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookId {
    book_id: u64,
}

#[derive(Debug, Deserialize)]
struct NewBookV2 {
    title: String,
    author_id: u64,
    year: i32,
    isbn: String,
    pages: Option<u32>,
    genre: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookLookupV2 {
    book_id: u64,
    #[serde(default)]
    include_author: bool,
}

#[derive(Debug, Deserialize)]
struct BookReplaceV2 {
    book_id: u64,
    #[serde(flatten)]
    book: NewBookV2,
}

#[derive(Debug, Deserialize)]
struct AuthorId {
    author_id: u64,
}

#[derive(Debug, Default, Deserialize)]
struct GenreFilter {
    genre: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewAuthor {
    name: String,
    birth_year: Option<i32>,
    country: Option<String>,
}

#[derive(Default)]
struct Tables {
    books_v1: BTreeMap<u64, BookV1>,
    books_v2: BTreeMap<u64, BookV2>,
    authors: BTreeMap<u64, Author>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Books and authors
#[derive(Default)]
pub struct Library {
    tables: Mutex<Tables>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_book_v1(&self, payload: Value) -> HandlerResult {
        let new: NewBookV1 = parse(payload)?;
        let mut tables = self.tables.lock();

        if tables.books_v1.values().any(|book| book.isbn == new.isbn) {
            return Err(HandlerError::domain(DUPLICATE_ISBN));
        }

        let id = tables.next_id();
        let book = BookV1 {
            id,
            title: new.title,
            author: new.author,
            year: new.year,
            isbn: new.isbn,
            created_at: Utc::now(),
        };
        tracing::debug!(id, isbn = %book.isbn, "Created v1 book");
        tables.books_v1.insert(id, book.clone());
        to_value(&book)
    }

    pub fn get_books_v1(&self, _payload: Value) -> HandlerResult {
        let tables = self.tables.lock();
        let books: Vec<&BookV1> = tables.books_v1.values().collect();
        to_value(&books)
    }

    pub fn get_book_v1(&self, payload: Value) -> HandlerResult {
        let BookId { book_id } = parse(payload)?;
        let tables = self.tables.lock();
        match tables.books_v1.get(&book_id) {
            Some(book) => to_value(book),
            None => Err(HandlerError::domain(BOOK_NOT_FOUND)),
        }
    }

    pub fn update_book_v1(&self, payload: Value) -> HandlerResult {
        let update: BookUpdate = parse(payload)?;
        let mut tables = self.tables.lock();

        if !tables.books_v1.contains_key(&update.book_id) {
            return Err(HandlerError::domain(BOOK_NOT_FOUND));
        }
        if let Some(isbn) = &update.isbn {
            let taken = tables
                .books_v1
                .values()
                .any(|book| book.id != update.book_id && &book.isbn == isbn);
            if taken {
                return Err(HandlerError::domain(DUPLICATE_ISBN));
            }
        }

        let Some(book) = tables.books_v1.get_mut(&update.book_id) else {
            return Err(HandlerError::domain(BOOK_NOT_FOUND));
        };
        if let Some(title) = update.title {
            book.title = title;
        }
        if let Some(author) = update.author {
            book.author = author;
        }
        if let Some(year) = update.year {
            book.year = year;
        }
        if let Some(isbn) = update.isbn {
            book.isbn = isbn;
        }
        to_value(book)
    }

    pub fn delete_book_v1(&self, payload: Value) -> HandlerResult {
        let BookId { book_id } = parse(payload)?;
        match self.tables.lock().books_v1.remove(&book_id) {
            Some(_) => Ok(json!({"status": "deleted"})),
            None => Err(HandlerError::domain(BOOK_NOT_FOUND)),
        }
    }

    pub fn create_book_v2(&self, payload: Value) -> HandlerResult {
        let new: NewBookV2 = parse(payload)?;
        let mut tables = self.tables.lock();

        if !tables.authors.contains_key(&new.author_id) {
            return Err(HandlerError::domain(AUTHOR_NOT_FOUND));
        }
        if tables.books_v2.values().any(|book| book.isbn == new.isbn) {
            return Err(HandlerError::domain(DUPLICATE_ISBN));
        }

        let id = tables.next_id();
        let book = BookV2 {
            id,
            title: new.title,
            author_id: new.author_id,
            year: new.year,
            isbn: new.isbn,
            pages: new.pages,
            genre: new.genre,
            created_at: Utc::now(),
            updated_at: None,
        };
        tables.books_v2.insert(id, book.clone());
        to_value(&book)
    }

    pub fn get_books_v2(&self, payload: Value) -> HandlerResult {
        let filter: GenreFilter = if payload.is_null() {
            GenreFilter::default()
        } else {
            parse(payload)?
        };
        let tables = self.tables.lock();
        let books: Vec<&BookV2> = tables
            .books_v2
            .values()
            .filter(|book| match filter.genre.as_deref() {
                Some(genre) if !genre.is_empty() => book.genre.as_deref() == Some(genre),
                _ => true,
            })
            .collect();
        to_value(&books)
    }

    /// Fetch one v2 book, optionally with `author: {id, name}` attached
    pub fn get_book_v2(&self, payload: Value) -> HandlerResult {
        let lookup: BookLookupV2 = parse(payload)?;
        let tables = self.tables.lock();
        let Some(book) = tables.books_v2.get(&lookup.book_id) else {
            return Err(HandlerError::domain(BOOK_NOT_FOUND));
        };

        let mut value = to_value(book)?;
        if lookup.include_author {
            if let (Some(author), Some(fields)) =
                (tables.authors.get(&book.author_id), value.as_object_mut())
            {
                fields.insert("author".into(), json!({"id": author.id, "name": author.name}));
            }
        }
        Ok(value)
    }

    /// Replace every field of a v2 book
    pub fn update_book_v2(&self, payload: Value) -> HandlerResult {
        let BookReplaceV2 { book_id, book: new } = parse(payload)?;
        let mut tables = self.tables.lock();

        if !tables.books_v2.contains_key(&book_id) {
            return Err(HandlerError::domain(BOOK_NOT_FOUND));
        }
        if !tables.authors.contains_key(&new.author_id) {
            return Err(HandlerError::domain(AUTHOR_NOT_FOUND));
        }
        let taken = tables
            .books_v2
            .values()
            .any(|book| book.id != book_id && book.isbn == new.isbn);
        if taken {
            return Err(HandlerError::domain(DUPLICATE_ISBN));
        }

        let Some(book) = tables.books_v2.get_mut(&book_id) else {
            return Err(HandlerError::domain(BOOK_NOT_FOUND));
        };
        book.title = new.title;
        book.author_id = new.author_id;
        book.year = new.year;
        book.isbn = new.isbn;
        book.pages = new.pages;
        book.genre = new.genre;
        book.updated_at = Some(Utc::now());
        to_value(book)
    }

    pub fn delete_book_v2(&self, payload: Value) -> HandlerResult {
        let BookId { book_id } = parse(payload)?;
        match self.tables.lock().books_v2.remove(&book_id) {
            Some(_) => Ok(json!({"status": "deleted"})),
            None => Err(HandlerError::domain(BOOK_NOT_FOUND)),
        }
    }

    pub fn create_author(&self, payload: Value) -> HandlerResult {
        let new: NewAuthor = parse(payload)?;
        let mut tables = self.tables.lock();

        let id = tables.next_id();
        let author = Author {
            id,
            name: new.name,
            birth_year: new.birth_year,
            country: new.country,
            created_at: Utc::now(),
        };
        tables.authors.insert(id, author.clone());
        to_value(&author)
    }

    pub fn get_author(&self, payload: Value) -> HandlerResult {
        let AuthorId { author_id } = parse(payload)?;
        let tables = self.tables.lock();
        match tables.authors.get(&author_id) {
            Some(author) => to_value(author),
            None => Err(HandlerError::domain(AUTHOR_NOT_FOUND)),
        }
    }

    pub fn get_authors(&self, _payload: Value) -> HandlerResult {
        let tables = self.tables.lock();
        let authors: Vec<&Author> = tables.authors.values().collect();
        to_value(&authors)
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|err| HandlerError::domain(format!("Invalid payload: {err}")))
}

fn to_value<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|err| HandlerError::Unexpected(err.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dune() -> Value {
        json!({"title": "Dune", "author": "Frank Herbert", "year": 1965, "isbn": "9780441013593"})
    }

    fn domain_message(result: HandlerResult) -> String {
        match result {
            Err(HandlerError::Domain(message)) => message,
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_and_get_book_v1() {
        let library = Library::new();
        let created = library.create_book_v1(dune()).unwrap();
        assert_eq!(created["title"], "Dune");
        assert!(created["created_at"].is_string());

        let id = created["id"].clone();
        let fetched = library.get_book_v1(json!({"book_id": id})).unwrap();
        assert_eq!(fetched, created);

        let all = library.get_books_v1(json!({})).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_isbn_rejected() {
        let library = Library::new();
        library.create_book_v1(dune()).unwrap();
        assert_eq!(
            domain_message(library.create_book_v1(dune())),
            DUPLICATE_ISBN
        );
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let library = Library::new();
        let message = domain_message(library.create_book_v1(json!({"title": "Dune"})));
        assert!(message.contains("author"), "{message}");
    }

    #[test]
    fn test_update_and_delete_book_v1() {
        let library = Library::new();
        let id = library.create_book_v1(dune()).unwrap()["id"].clone();

        let updated = library
            .update_book_v1(json!({"book_id": id, "year": 1966}))
            .unwrap();
        assert_eq!(updated["year"], 1966);
        assert_eq!(updated["title"], "Dune");

        assert_eq!(
            library.delete_book_v1(json!({"book_id": id})).unwrap(),
            json!({"status": "deleted"})
        );
        assert_eq!(
            domain_message(library.get_book_v1(json!({"book_id": id}))),
            BOOK_NOT_FOUND
        );
        assert_eq!(
            domain_message(library.delete_book_v1(json!({"book_id": id}))),
            BOOK_NOT_FOUND
        );
    }

    #[test]
    fn test_create_book_v2_requires_author() {
        let library = Library::new();
        let book = json!({"title": "Dune", "author_id": 99, "year": 1965, "isbn": "1"});
        assert_eq!(
            domain_message(library.create_book_v2(book)),
            AUTHOR_NOT_FOUND
        );

        let author = library
            .create_author(json!({"name": "Frank Herbert", "country": "US"}))
            .unwrap();
        let book = json!({
            "title": "Dune",
            "author_id": author["id"],
            "year": 1965,
            "isbn": "1",
            "genre": "sci-fi"
        });
        let created = library.create_book_v2(book).unwrap();
        assert_eq!(created["genre"], "sci-fi");
        assert!(created["updated_at"].is_null());
    }

    fn herbert_book(library: &Library) -> Value {
        let author_id = library
            .create_author(json!({"name": "Frank Herbert", "country": "US"}))
            .unwrap()["id"]
            .clone();
        library
            .create_book_v2(json!({
                "title": "Dune", "author_id": author_id, "year": 1965,
                "isbn": "9780441013593", "genre": "sci-fi"
            }))
            .unwrap()
    }

    #[test]
    fn test_get_book_v2_with_author() {
        let library = Library::new();
        let book = herbert_book(&library);

        let plain = library.get_book_v2(json!({"book_id": book["id"]})).unwrap();
        assert_eq!(plain, book);

        let expanded = library
            .get_book_v2(json!({"book_id": book["id"], "include_author": true}))
            .unwrap();
        assert_eq!(expanded["author"]["id"], book["author_id"]);
        assert_eq!(expanded["author"]["name"], "Frank Herbert");

        assert_eq!(
            domain_message(library.get_book_v2(json!({"book_id": 999}))),
            BOOK_NOT_FOUND
        );
    }

    #[test]
    fn test_update_book_v2_replaces_fields_and_stamps_updated_at() {
        let library = Library::new();
        let book = herbert_book(&library);

        let updated = library
            .update_book_v2(json!({
                "book_id": book["id"], "title": "Dune Messiah", "author_id": book["author_id"],
                "year": 1969, "isbn": "9780441172696"
            }))
            .unwrap();
        assert_eq!(updated["id"], book["id"]);
        assert_eq!(updated["title"], "Dune Messiah");
        assert!(updated["genre"].is_null());
        assert_eq!(updated["created_at"], book["created_at"]);
        assert!(updated["updated_at"].is_string());

        let unknown_author = json!({
            "book_id": book["id"], "title": "Dune", "author_id": 999,
            "year": 1965, "isbn": "1"
        });
        assert_eq!(
            domain_message(library.update_book_v2(unknown_author)),
            AUTHOR_NOT_FOUND
        );

        let missing_book = json!({
            "book_id": 999, "title": "Dune", "author_id": book["author_id"],
            "year": 1965, "isbn": "1"
        });
        assert_eq!(
            domain_message(library.update_book_v2(missing_book)),
            BOOK_NOT_FOUND
        );

        let message = domain_message(library.update_book_v2(json!({"book_id": book["id"]})));
        assert!(message.starts_with("Invalid payload"), "{message}");
    }

    #[test]
    fn test_delete_book_v2_and_get_author() {
        let library = Library::new();
        let book = herbert_book(&library);

        assert_eq!(
            library.delete_book_v2(json!({"book_id": book["id"]})).unwrap(),
            json!({"status": "deleted"})
        );
        assert_eq!(
            domain_message(library.delete_book_v2(json!({"book_id": book["id"]}))),
            BOOK_NOT_FOUND
        );

        let author = library
            .get_author(json!({"author_id": book["author_id"]}))
            .unwrap();
        assert_eq!(author["name"], "Frank Herbert");
        assert_eq!(
            domain_message(library.get_author(json!({"author_id": 999}))),
            AUTHOR_NOT_FOUND
        );
    }

    #[test]
    fn test_get_books_v2_genre_filter() {
        let library = Library::new();
        let author_id = library.create_author(json!({"name": "A"})).unwrap()["id"].clone();
        for (isbn, genre) in [("1", "sci-fi"), ("2", "fantasy"), ("3", "sci-fi")] {
            library
                .create_book_v2(json!({
                    "title": isbn, "author_id": author_id, "year": 2000,
                    "isbn": isbn, "genre": genre
                }))
                .unwrap();
        }

        let sci_fi = library.get_books_v2(json!({"genre": "sci-fi"})).unwrap();
        assert_eq!(sci_fi.as_array().unwrap().len(), 2);
        let all = library.get_books_v2(json!({})).unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);
        assert_eq!(library.get_authors(json!({})).unwrap().as_array().unwrap().len(), 1);
    }
}
