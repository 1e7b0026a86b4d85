use std::time::Duration;

use reqwest::{Client, Error, redirect};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

pub struct HttpClient;

impl HttpClient {
    pub fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    /// Client tuned for long-running media downloads: no global request
    /// timeout (the downloader enforces its own per-fetch deadline) and
    /// automatic redirects disabled so the redirect chain can be walked
    /// explicitly with a bounded hop count.
    pub fn media() -> Result<Client, Error> {
        Client::builder()
            .user_agent(Self::default_user_agent())
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
    }
}
