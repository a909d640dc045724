pub mod fetcher;
pub mod quote;
