use std::sync::Arc;

use market_client::api::AskAiRequest;
use market_client::{FileCredentialStore, MarketClient, Profile};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::output::OutputManager;

pub struct CommandExecutor {
    client: MarketClient,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, format: OutputFormat) -> Result<Self> {
        let credentials = config.credentials_path()?;
        debug!(path = %credentials.display(), "Using credential file");
        let store = Arc::new(FileCredentialStore::new(credentials));
        let client = MarketClient::new(config.client, store)?;
        Ok(Self {
            client,
            output: OutputManager::new(format),
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<()> {
        let profile = self.client.sign_in(email, password).await?;
        self.output.profile(&profile)
    }

    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<()> {
        let response = self.client.sign_up(name, email, password).await?;
        self.output.message(&response.message)
    }

    pub async fn sign_out(&self) -> Result<()> {
        if self.client.restore().await?.is_none() {
            return self.output.message("Not signed in.");
        }
        self.client.sign_out().await?;
        self.output.message("Signed out.")
    }

    pub async fn whoami(&self) -> Result<()> {
        let profile = self.require_session().await?;
        self.output.profile(&profile)
    }

    pub async fn latest(&self) -> Result<()> {
        self.output.products(&self.client.latest_products().await?)
    }

    pub async fn listings(&self) -> Result<()> {
        self.require_session().await?;
        self.output.listings(&self.client.listings().await?)
    }

    pub async fn category(&self, name: &str) -> Result<()> {
        self.output
            .products(&self.client.products_by_category(name).await?)
    }

    pub async fn detail(&self, id: &str) -> Result<()> {
        self.output.product(&self.client.product_detail(id).await?)
    }

    pub async fn search(&self, query: &str) -> Result<()> {
        self.output.products(&self.client.search_products(query).await?)
    }

    pub async fn ask(&self, id: &str, question: &str) -> Result<()> {
        let product = self.client.product_detail(id).await?;
        let answer = self
            .client
            .ask_ai(AskAiRequest {
                title: product.name,
                price: product.price,
                description: product.description,
                question: question.to_string(),
            })
            .await?;
        self.output.answer(&answer)
    }

    /// Print realtime events and connection changes until Ctrl-C.
    pub async fn listen(&self) -> Result<()> {
        self.require_session().await?;

        let mut events = self.client.realtime().subscribe();
        let mut status = self.client.realtime().subscribe_status();
        self.client.connect_realtime()?;
        info!(url = %self.client.realtime().url(), "Listening for realtime events");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    self.output.status(&current)?;
                }
                event = events.recv() => match event {
                    Ok(event) => self.output.event(&event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.client.disconnect_realtime().await;
        Ok(())
    }

    pub async fn finish(self) {
        self.client.shutdown().await;
    }

    async fn require_session(&self) -> Result<Profile> {
        self.client.restore().await?.ok_or(AppError::NotSignedIn)
    }
}
