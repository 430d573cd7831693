//! Product endpoints.

use super::endpoints;
use super::types::{
    AiAnswer, AskAiRequest, ListingForm, ListingsResponse, MessageResponse, Product,
    ProductResponse, ProductSummary, ProductsResponse,
};
use crate::client::MarketClient;
use crate::dispatcher::ApiRequest;
use crate::error::Result;

impl MarketClient {
    pub async fn latest_products(&self) -> Result<Vec<ProductSummary>> {
        let response: ProductsResponse = self
            .dispatcher
            .request(ApiRequest::get(endpoints::LATEST_PRODUCTS))
            .await?;
        Ok(response.products)
    }

    /// Products listed by the signed-in user.
    pub async fn listings(&self) -> Result<Vec<Product>> {
        let response: ListingsResponse = self
            .dispatcher
            .request(ApiRequest::get(endpoints::LISTINGS))
            .await?;
        Ok(response.products)
    }

    pub async fn products_by_category(&self, category: &str) -> Result<Vec<ProductSummary>> {
        let response: ProductsResponse = self
            .dispatcher
            .request(ApiRequest::get(endpoints::products_by_category(category)))
            .await?;
        Ok(response.products)
    }

    pub async fn product_detail(&self, id: &str) -> Result<Product> {
        let response: ProductResponse = self
            .dispatcher
            .request(ApiRequest::get(endpoints::product_detail(id)))
            .await?;
        Ok(response.product)
    }

    pub async fn search_products(&self, name: &str) -> Result<Vec<ProductSummary>> {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("name", name)
            .finish();
        let response: ProductsResponse = self
            .dispatcher
            .request(ApiRequest::get(format!("{}?{query}", endpoints::SEARCH)))
            .await?;
        Ok(response.products)
    }

    pub async fn create_listing(&self, form: ListingForm) -> Result<MessageResponse> {
        let request = ApiRequest::post(endpoints::CREATE_LISTING).multipart(form.into_parts());
        self.announce(self.dispatcher.request(request).await)
    }

    pub async fn update_product(&self, id: &str, form: ListingForm) -> Result<MessageResponse> {
        let request = ApiRequest::patch(endpoints::product(id)).multipart(form.into_parts());
        self.announce(self.dispatcher.request(request).await)
    }

    pub async fn delete_product(&self, id: &str) -> Result<MessageResponse> {
        self.announce(
            self.dispatcher
                .request(ApiRequest::delete(endpoints::product(id)))
                .await,
        )
    }

    pub async fn delete_product_image(
        &self,
        product_id: &str,
        image_id: &str,
    ) -> Result<MessageResponse> {
        self.announce(
            self.dispatcher
                .request(ApiRequest::delete(endpoints::product_image(
                    product_id, image_id,
                )))
                .await,
        )
    }

    pub async fn ask_ai(&self, question: AskAiRequest) -> Result<AiAnswer> {
        let request = ApiRequest::post(endpoints::ASK_AI).json_body(&question)?;
        self.dispatcher.request(request).await
    }

    fn announce(&self, result: Result<MessageResponse>) -> Result<MessageResponse> {
        if let Ok(response) = &result {
            if !response.message.is_empty() {
                self.notifier.success(response.message.clone());
            }
        }
        result
    }
}
