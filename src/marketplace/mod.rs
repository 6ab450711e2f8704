pub mod client;
pub mod sellers;

pub use client::{HttpMarketplaceClient, MarketplaceClient};
pub use sellers::SellerDirectory;
