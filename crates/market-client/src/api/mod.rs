//! Typed REST endpoints, implemented as methods on
//! [`MarketClient`](crate::MarketClient).

mod auth;
pub mod endpoints;
mod product;
pub mod types;

pub use types::{
    AiAnswer, AskAiRequest, ImageUpload, ListingForm, MessageResponse, Product, ProductSummary,
    Seller, SignInRequest, SignUpRequest,
};
