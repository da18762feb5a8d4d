use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use vigil_common::crypto::{sign_payload, SIGNATURE_HEADER};

use super::channel::{Notification, Notifier, NotifyError};
use super::settings::NotifierSettings;

#[derive(Debug, Deserialize)]
struct WebhookSettings {
    url: String,
    #[serde(default)]
    secret: String,
}

/// POSTs the notification as JSON. With a secret configured, the body is
/// signed with HMAC-SHA256 and the signature sent in `X-Vigil-Signature`.
pub struct WebhookNotifier {
    name: String,
    url: String,
    secret: Vec<u8>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(name: String, url: String, secret: Vec<u8>, client: Client) -> Self {
        Self {
            name,
            url,
            secret,
            client,
        }
    }

    pub fn from_settings(settings: &NotifierSettings, client: Client) -> Result<Self, NotifyError> {
        let parsed: WebhookSettings = serde_json::from_value(settings.settings.clone())
            .map_err(|e| NotifyError(format!("webhook {}: {e}", settings.name)))?;
        Ok(Self::new(
            settings.name.clone(),
            parsed.url,
            parsed.secret.into_bytes(),
            client,
        ))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(notification).map_err(|e| NotifyError(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if !self.secret.is_empty() {
            request = request.header(SIGNATURE_HEADER, sign_payload(&self.secret, &body));
        }

        request.body(body).send().await?.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use tokio::sync::mpsc;
    use vigil_common::crypto::verify_payload;
    use vigil_common::model::AlertState;

    use crate::alert::testing::epoch;
    use crate::alert::Severity;

    fn notification() -> Notification {
        Notification {
            rule_id: 7,
            org_id: 1,
            rule_name: "high cpu".into(),
            title: "[Alerting] high cpu".into(),
            message: "cpu above 90%".into(),
            state: AlertState::Alerting,
            prev_state: AlertState::Ok,
            severity: Severity::Critical,
            matches: Vec::new(),
            error: None,
            timestamp: epoch(1_000),
        }
    }

    async fn serve(status: StatusCode) -> (String, mpsc::UnboundedReceiver<(HeaderMap, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((headers, body));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), rx)
    }

    #[tokio::test]
    async fn posts_signed_json() {
        let (url, mut rx) = serve(StatusCode::OK).await;
        let n = WebhookNotifier::new("ops".into(), url, b"s3cret".to_vec(), Client::new());

        n.send(&notification()).await.unwrap();

        let (headers, body) = rx.recv().await.unwrap();
        let sig = headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        assert!(verify_payload(b"s3cret", &body, sig));

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["rule_id"], 7);
        assert_eq!(json["state"], "alerting");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn unsigned_without_secret() {
        let (url, mut rx) = serve(StatusCode::OK).await;
        let n = WebhookNotifier::new("ops".into(), url, Vec::new(), Client::new());

        n.send(&notification()).await.unwrap();
        let (headers, _) = rx.recv().await.unwrap();
        assert!(headers.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let (url, _rx) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let n = WebhookNotifier::new("ops".into(), url, Vec::new(), Client::new());
        assert!(n.send(&notification()).await.is_err());
    }
}
