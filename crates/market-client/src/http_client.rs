//! Construction of the shared `reqwest::Client`.

use std::sync::Once;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{ClientConfig, ProxyConfig};
use crate::error::Result;

/// Install the aws-lc-rs rustls provider for this process, once.
pub fn install_rustls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider was already installed");
        }
    });
}

/// How outgoing requests are routed.
#[derive(Debug)]
enum Route {
    Direct,
    System,
    Via(reqwest::Proxy),
}

fn route(proxy: &ProxyConfig) -> Route {
    if !proxy.enabled {
        return Route::Direct;
    }
    let Some(url) = proxy.url.as_deref() else {
        return if proxy.use_system_proxy {
            Route::System
        } else {
            Route::Direct
        };
    };

    match reqwest::Proxy::all(url) {
        Ok(via) => match (&proxy.username, &proxy.password) {
            (Some(user), Some(pass)) => Route::Via(via.basic_auth(user, pass)),
            _ => Route::Via(via),
        },
        Err(error) => {
            warn!(proxy_url = %url, error = %error, "Ignoring invalid proxy URL");
            Route::Direct
        }
    }
}

/// Route `builder` according to `proxy`.
///
/// A disabled proxy also ignores the environment; an enabled one without a
/// URL falls back to the system settings only when `use_system_proxy` is set.
pub fn apply_proxy_config(
    builder: reqwest::ClientBuilder,
    proxy: &ProxyConfig,
) -> reqwest::ClientBuilder {
    match route(proxy) {
        Route::Direct => builder.no_proxy(),
        Route::System => builder,
        Route::Via(via) => builder.proxy(via),
    }
}

/// Client shared by the dispatcher and the refresh exchange.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("market-client/", env!("CARGO_PKG_VERSION")));

    let timeout = config.request_timeout();
    if timeout > Duration::ZERO {
        builder = builder.timeout(timeout);
    }
    if config.pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
    }

    Ok(apply_proxy_config(builder, &config.proxy).build()?)
}
