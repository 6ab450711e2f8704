pub mod sqlite;
pub mod store;

pub use sqlite::SqliteListingStore;
pub use store::ListingStore;
