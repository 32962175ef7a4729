//! Tag listing crawl: session cookies, page model, pagination and entries.
//!
//! - [`Session`] - cookie jar seeded by the first page
//! - [`ListingPage`] - one fetched page with its next page pointer
//! - [`PaginationWalker`] - memoized first page, then `next-page-url` hops
//! - [`extract_entries`] - thumbnails to [`ListingEntry`] values in page order

mod extractor;
mod page;
mod session;
mod walker;

pub use extractor::{Entries, ListingEntry, extract_entries};
pub use page::ListingPage;
pub(crate) use page::compile_static_selector;
pub use session::Session;
pub use walker::PaginationWalker;
