use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Invalid weather URL '{0}'")]
    InvalidUrl(String),

    #[error("Weather request failed")]
    Request(#[source] reqwest::Error),

    #[error("Weather service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to decode weather response")]
    Decode(#[source] reqwest::Error),

    #[error("Weather response has no observation for hour {0}")]
    MissingHour(u32),

    #[error("Weather lookup timed out after {0:?}")]
    Timeout(std::time::Duration),
}
