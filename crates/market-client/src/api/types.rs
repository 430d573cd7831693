//! Request and response bodies of the REST endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::FormPart;
use crate::session::Profile;

/// Product as listed on the home screen, a category page or a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Full product record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Image URLs.
    #[serde(default, rename = "image", skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// Purchasing date.
    pub date: DateTime<Utc>,
    pub seller: Seller,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProductsResponse {
    #[serde(alias = "results")]
    pub products: Vec<ProductSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListingsResponse {
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProductResponse {
    pub product: Product,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileResponse {
    pub profile: Profile,
}

/// Acknowledgement carrying a human-readable message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiAnswer {
    pub answer: String,
}

/// Context sent along with a question about a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskAiRequest {
    pub title: String,
    pub price: f64,
    pub description: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// In-memory image to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub(crate) fn into_part(self, field: &str) -> FormPart {
        FormPart::file(field, self.file_name, self.mime, self.bytes)
    }
}

/// Fields of a new or edited listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingForm {
    pub name: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub purchasing_date: DateTime<Utc>,
    /// Existing image URL to use as thumbnail; only meaningful on update.
    pub thumbnail: Option<String>,
    pub images: Vec<ImageUpload>,
}

impl ListingForm {
    pub(crate) fn into_parts(self) -> Vec<FormPart> {
        let mut parts = Vec::with_capacity(5 + self.images.len());
        if let Some(thumbnail) = self.thumbnail {
            parts.push(FormPart::text("thumbnail", thumbnail));
        }
        parts.push(FormPart::text("name", self.name));
        parts.push(FormPart::text("description", self.description));
        parts.push(FormPart::text("category", self.category));
        parts.push(FormPart::text("price", self.price.to_string()));
        parts.push(FormPart::text(
            "purchasingDate",
            self.purchasing_date
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ));
        parts.extend(self.images.into_iter().map(|img| img.into_part("images")));
        parts
    }
}
