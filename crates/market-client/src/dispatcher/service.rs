//! Authenticated request execution.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::request::ApiRequest;
use super::transport::{HttpTransport, Outcome};
use crate::error::{ApiError, Result, generic_status_message};
use crate::notify::Notifier;
use crate::refresh::RefreshCoordinator;
use crate::session::SessionState;

/// Executes [`ApiRequest`]s with the session credential and recovers from
/// one expired access credential per request.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    transport: HttpTransport,
    session: SessionState,
    coordinator: RefreshCoordinator,
    notifier: Notifier,
}

impl RequestDispatcher {
    pub fn new(
        transport: HttpTransport,
        session: SessionState,
        coordinator: RefreshCoordinator,
        notifier: Notifier,
    ) -> Self {
        Self {
            transport,
            session,
            coordinator,
            notifier,
        }
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// Send `req` and decode the response body as `T`.
    ///
    /// Every failure not already reported elsewhere is published once as a
    /// danger notice before it is returned.
    pub async fn request<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T> {
        let result = self
            .execute(req)
            .await
            .and_then(|value| serde_json::from_value(value).map_err(ApiError::from));

        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    /// Publish `error` unless it was already announced.
    pub fn report(&self, error: &ApiError) {
        if !error.is_reported() {
            self.notifier.danger(error.user_message());
        }
    }

    #[instrument(skip(self, req), fields(method = %req.method, path = %req.path))]
    async fn execute(&self, mut req: ApiRequest) -> Result<Value> {
        let session_token = if req.authenticated {
            self.session.access_token()
        } else {
            None
        };

        let message = match self.transport.send(&req, session_token.as_deref()).await? {
            Outcome::Success(value) => return Ok(value),
            Outcome::AuthRejected { message } => message,
        };

        // Only a request that carried a credential can have it refreshed.
        let sent = if req.authenticated {
            req.explicit_bearer().map(str::to_owned).or(session_token)
        } else {
            None
        };
        let Some(sent) = sent else {
            return Err(unauthorized(message));
        };

        debug!("Access credential rejected, recovering");
        let credential = self.coordinator.recover(&sent).await?;
        req.rebind(&credential);

        match self.transport.send(&req, None).await? {
            Outcome::Success(value) => Ok(value),
            Outcome::AuthRejected { message } => {
                warn!("Replayed request rejected again");
                Err(unauthorized(message))
            }
        }
    }
}

fn unauthorized(message: Option<String>) -> ApiError {
    ApiError::Unauthorized {
        message: message.unwrap_or_else(|| generic_status_message(StatusCode::UNAUTHORIZED)),
    }
}
