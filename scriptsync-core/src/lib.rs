mod client;
pub mod searchspec;

pub use client::{ApiErrorClass, ContentField, Item, Query, RemoteError, RestClient};
pub use reqwest::StatusCode;
