use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

const HTTP_CONNECT_TIMEOUT_SECS: u64 = 15;
const HTTP_DEFAULT_TIMEOUT_SECS: u64 = 120;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_DEFAULT_TIMEOUT_SECS))
        .user_agent(concat!("storybook-generator/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Shared client for every provider call; individual requests may set a tighter timeout.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
