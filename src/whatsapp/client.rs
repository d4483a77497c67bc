use crate::config::WhatsAppConfig;
use crate::error::Error;
use crate::whatsapp::message::OutboundMessage;
use std::time::Duration;
use tracing::{debug, error, info};

/// Posts replies to the WhatsApp Business Cloud API.
pub struct WhatsAppClient {
    client: reqwest::Client,
    access_token: String,
    api_url: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::transport(e.to_string()))?;

        let api_url = format!(
            "https://graph.facebook.com/{}/{}/messages",
            config.api_version, config.phone_number_id
        );

        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            api_url,
        })
    }

    /// Sends one text message. A deadline expiry and a generic request
    /// failure surface as distinct transport errors.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<(), Error> {
        let message = OutboundMessage::text(to, body);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Timeout occurred while sending message");
                    Error::transport_timeout("Request timed out")
                } else {
                    error!("Request failed due to: {}", e);
                    Error::transport("Failed to send message")
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let response_body = response.text().await.unwrap_or_default();

        info!("Status: {}", status);
        info!("Content-type: {}", content_type);
        debug!("Body: {}", response_body);

        if !status.is_success() {
            error!("WhatsApp API responded with status {}: {}", status, response_body);
            return Err(Error::transport(format!(
                "WhatsApp API responded with status {}",
                status
            )));
        }

        Ok(())
    }
}
