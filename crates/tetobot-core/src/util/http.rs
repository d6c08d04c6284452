use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Upper bound for one completion or LINE call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// Only two upstreams are ever called (the completion API and LINE).
const MAX_IDLE_PER_HOST: usize = 8;
const IDLE_TIMEOUT: Duration = Duration::from_secs(55);

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| build_client().expect("Failed to create HTTP client"));

/// Client shared by the completion provider and the LINE channel.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .user_agent(concat!("tetobot/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Get the global HTTP client.
pub fn client() -> &'static Client {
    &HTTP_CLIENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(build_client().is_ok());
        // same instance every time
        assert!(std::ptr::eq(client(), client()));
    }
}
