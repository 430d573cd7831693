use std::io::Write;

use market_client::api::{AiAnswer, Product, ProductSummary};
use market_client::{Profile, RealtimeEvent, RealtimeStatus};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::Result;

pub struct OutputManager {
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn products(&self, products: &[ProductSummary]) -> Result<()> {
        if self.format.is_json() {
            return self.json(products);
        }
        if products.is_empty() {
            return self.line("No products found.");
        }
        let mut out = String::new();
        for product in products {
            out.push_str(&format!(
                "{:<26} {:<32} {:>10.2}  {}\n",
                product.id, product.name, product.price, product.category
            ));
        }
        self.write(&out)
    }

    pub fn listings(&self, products: &[Product]) -> Result<()> {
        if self.format.is_json() {
            return self.json(products);
        }
        if products.is_empty() {
            return self.line("You have no listings.");
        }
        for product in products {
            self.product(product)?;
        }
        Ok(())
    }

    pub fn product(&self, product: &Product) -> Result<()> {
        if self.format.is_json() {
            return self.json(product);
        }
        let mut out = String::new();
        out.push_str(&format!("{} ({})\n", product.name, product.id));
        out.push_str(&format!("  Price: {:.2}\n", product.price));
        out.push_str(&format!("  Category: {}\n", product.category));
        out.push_str(&format!(
            "  Purchased: {}\n",
            product.date.format("%Y-%m-%d")
        ));
        out.push_str(&format!("  Seller: {}\n", product.seller.name));
        if !product.images.is_empty() {
            out.push_str(&format!("  Images: {}\n", product.images.len()));
        }
        if !product.description.is_empty() {
            out.push_str(&format!("\n  {}\n", product.description));
        }
        self.write(&out)
    }

    pub fn profile(&self, profile: &Profile) -> Result<()> {
        if self.format.is_json() {
            return self.json(profile);
        }
        let verified = if profile.verified { "verified" } else { "unverified" };
        self.line(&format!(
            "{} <{}> [{}] ({})",
            profile.name, profile.email, profile.id, verified
        ))
    }

    pub fn answer(&self, answer: &AiAnswer) -> Result<()> {
        if self.format.is_json() {
            return self.json(answer);
        }
        self.line(&answer.answer)
    }

    pub fn status(&self, status: &RealtimeStatus) -> Result<()> {
        if self.format.is_json() {
            return self.json(&serde_json::json!({ "status": status.state }));
        }
        self.line(&format!("* realtime {}", status.state))
    }

    pub fn event(&self, event: &RealtimeEvent) -> Result<()> {
        if self.format.is_json() {
            return self.json(event);
        }
        self.line(&format!("{}: {}", event.name, event.payload))
    }

    pub fn message(&self, message: &str) -> Result<()> {
        if self.format.is_json() {
            return self.json(&serde_json::json!({ "status": "ok", "message": message }));
        }
        self.line(message)
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = match self.format {
            OutputFormat::JsonCompact => serde_json::to_string(value)?,
            _ => serde_json::to_string_pretty(value)?,
        };
        self.line(&text)
    }

    fn line(&self, text: &str) -> Result<()> {
        self.write(&format!("{text}\n"))
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}
