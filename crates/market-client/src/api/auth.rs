//! Account endpoints and the sign-in lifecycle.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::endpoints;
use super::types::{ImageUpload, MessageResponse, ProfileResponse, SignInRequest, SignUpRequest};
use crate::client::MarketClient;
use crate::credentials::CredentialPair;
use crate::dispatcher::ApiRequest;
use crate::error::{ApiError, Result};
use crate::refresh::TokenPair;
use crate::session::{Profile, SessionUpdate};

#[derive(Debug, Deserialize)]
struct SignInResponse {
    profile: Profile,
    tokens: TokenPair,
}

impl MarketClient {
    /// Sign in with email and password.
    ///
    /// Marks the session pending while the exchange is outstanding. On
    /// success both tokens are persisted and the refresh coordinator leaves
    /// any failed state; on failure the session is reset to logged-out.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Profile> {
        // No exchange may finish on top of the new pair.
        self.coordinator.suspend(SessionUpdate::pending()).await;

        let request = ApiRequest::post(endpoints::SIGN_IN)
            .anonymous()
            .json_body(&SignInRequest {
                email: email.to_string(),
                password: password.to_string(),
            })?;

        let response = match self.dispatcher.request::<SignInResponse>(request).await {
            Ok(response) => response,
            Err(error) => {
                self.session.update(SessionUpdate::signed_out());
                return Err(error);
            }
        };

        let credential = CredentialPair::new(response.tokens.access, response.tokens.refresh);
        self.persist(&credential).await;
        self.session.update(SessionUpdate::signed_in(
            response.profile.clone(),
            credential,
        ));
        self.coordinator.reset();

        info!(user = %response.profile.id, "Signed in");
        Ok(response.profile)
    }

    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<MessageResponse> {
        let request = ApiRequest::post(endpoints::SIGN_UP)
            .anonymous()
            .json_body(&SignUpRequest {
                name: name.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })?;
        self.dispatcher.request(request).await
    }

    /// Invalidate the refresh credential on the server and forget the session.
    ///
    /// Local state is cleared even when the server call fails; its error is
    /// still returned.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<()> {
        let result = match self.session.snapshot().refresh_token() {
            Some(refresh) => {
                let request = ApiRequest::post(endpoints::SIGN_OUT)
                    .json(json!({ "refreshToken": refresh }));
                self.dispatcher.request::<Value>(request).await.map(|_| ())
            }
            None => Ok(()),
        };

        // Refreshing stays off until the next sign-in or restore, so nothing
        // can persist a pair after the store is cleared.
        self.coordinator.suspend(SessionUpdate::signed_out()).await;
        if let Err(error) = self.store.clear().await {
            warn!(error = %error, "Failed to clear stored credentials");
            self.dispatcher.report(&ApiError::from(error));
        }
        self.realtime.disconnect().await;
        self.conversations.clear();

        info!("Signed out");
        result
    }

    /// Resume a stored session.
    ///
    /// Returns `Ok(None)` when nothing is stored. The profile fetch may itself
    /// refresh an expired access credential.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<Option<Profile>> {
        let stored = match self.store.load_pair().await {
            Ok(stored) => stored,
            Err(error) => {
                warn!(error = %error, "Failed to load stored credentials");
                let error = ApiError::from(error);
                self.dispatcher.report(&error);
                return Err(error);
            }
        };
        let Some(credential) = stored else {
            return Ok(None);
        };

        self.coordinator
            .suspend(SessionUpdate {
                profile: None,
                credential: Some(credential),
                pending: true,
            })
            .await;
        self.coordinator.reset();

        match self
            .dispatcher
            .request::<ProfileResponse>(ApiRequest::get(endpoints::PROFILE))
            .await
        {
            Ok(ProfileResponse { profile }) => {
                self.session.update_with(|current| SessionUpdate {
                    profile: Some(profile.clone()),
                    credential: current.credential.clone(),
                    pending: false,
                });
                info!(user = %profile.id, "Session restored");
                Ok(Some(profile))
            }
            Err(error) => {
                self.session.update(SessionUpdate::signed_out());
                Err(error)
            }
        }
    }

    pub async fn fetch_profile(&self) -> Result<Profile> {
        let ProfileResponse { profile } = self
            .dispatcher
            .request(ApiRequest::get(endpoints::PROFILE))
            .await?;
        self.apply_profile(&profile);
        Ok(profile)
    }

    pub async fn update_name(&self, name: &str) -> Result<Profile> {
        let request =
            ApiRequest::patch(endpoints::UPDATE_PROFILE).json(json!({ "name": name }));
        let ProfileResponse { profile } = self.dispatcher.request(request).await?;
        self.apply_profile(&profile);
        self.notifier.success("Name updated successfully.");
        Ok(profile)
    }

    pub async fn update_avatar(&self, avatar: ImageUpload) -> Result<Profile> {
        let request =
            ApiRequest::patch(endpoints::UPDATE_AVATAR).multipart(vec![avatar.into_part("avatar")]);
        let ProfileResponse { profile } = self.dispatcher.request(request).await?;
        self.apply_profile(&profile);
        Ok(profile)
    }

    /// Ask the server to send a new verification link.
    pub async fn resend_verification(&self) -> Result<MessageResponse> {
        let response: MessageResponse = self
            .dispatcher
            .request(ApiRequest::get(endpoints::VERIFY_TOKEN))
            .await?;
        self.notifier.success(response.message.clone());
        Ok(response)
    }

    async fn persist(&self, credential: &CredentialPair) {
        if let Err(error) = self.store.save_pair(credential).await {
            warn!(error = %error, "Failed to persist credentials");
            self.dispatcher.report(&ApiError::from(error));
        }
    }

    fn apply_profile(&self, profile: &Profile) {
        self.session.update_with(|current| SessionUpdate {
            profile: Some(profile.clone()),
            credential: current.credential.clone(),
            pending: false,
        });
    }
}
