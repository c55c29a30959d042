/*!
Client-side submission relay.

A submission is validated and then pushed through an ordered chain of
transports until one of them takes it:

1. **Proxy** - POST JSON to the proxy relay server, if one is enabled
2. **Direct** - POST JSON to the destination and read its acknowledgment
3. **Fire-and-forget** - resend as a "simple" `text/plain` request without
   looking at the answer
4. **Hidden form** - resend form-encoded without looking at the answer

The last two cannot observe whether the destination accepted the row. They
still count as a success, but the returned [`Delivery`] is marked
[`Confirmation::Assumed`] so the caller can say so.

The chain is strictly sequential: each attempt resolves before the next one
starts, and nothing is cancelled once sent.
*/

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, header};
use serde::Serialize;
use serde_json::Value;

use crate::error::RelayError;
use crate::forward::ConnectionReport;
use crate::settings::RelaySettings;
use crate::submission::Submission;

const SUBMIT_PATH: &str = "/api/submit";
const TEST_PATH: &str = "/api/test-connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Proxy,
    Direct,
    FireAndForget,
    HiddenForm,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Proxy => "proxy",
            Transport::Direct => "direct",
            Transport::FireAndForget => "fire-and-forget",
            Transport::HiddenForm => "hidden form",
        };
        write!(f, "{name}")
    }
}

/// Whether the destination's answer was actually seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// The request went out without error but its answer was not observable
    Assumed,
}

/// Successful hand-off of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub transport: Transport,
    pub confirmation: Confirmation,

    /// Body returned by the proxy or destination, for confirmed deliveries
    pub response: Option<Value>,
}

impl Delivery {
    pub fn is_confirmed(&self) -> bool {
        self.confirmation == Confirmation::Confirmed
    }
}

/// Body sent to the proxy: the submission plus the destination this client
/// is configured for, so the proxy writes to the same sheet.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequest<'a> {
    #[serde(flatten)]
    submission: &'a Submission,

    #[serde(skip_serializing_if = "Option::is_none")]
    script_url: Option<&'a str>,
}

/// Outcome of one confirmed-mode attempt that did not deliver
enum Attempt {
    /// Try the next transport
    Failed(String),
    /// The destination answered and said no; there is nothing to fall back to
    Rejected(String),
}

/// Join a proxy base URL with an API path, accepting a URL that already
/// points at the path.
pub fn proxy_endpoint(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with(path) {
        base.to_string()
    } else {
        format!("{base}{path}")
    }
}

pub struct Relay {
    client: Client,
    timeout: Duration,
}

impl Default for Relay {
    fn default() -> Self {
        Relay::new(Duration::from_secs(30))
    }
}

impl Relay {
    /// # Arguments
    /// * `timeout` - Bound on each confirmed-mode attempt (proxy and direct)
    pub fn new(timeout: Duration) -> Self {
        Relay {
            client: Client::new(),
            timeout,
        }
    }

    /// Deliver a submission using the given settings.
    ///
    /// # Returns
    /// * `Ok(Delivery)` - Which transport took the submission and whether that was confirmed
    /// * `Err(RelayError)` - Validation failure (nothing sent), missing
    ///   configuration, an explicit rejection, or every transport failing
    pub async fn submit(
        &self,
        settings: &RelaySettings,
        submission: &Submission,
    ) -> Result<Delivery, RelayError> {
        submission.validate()?;

        if let Some(proxy) = settings.proxy() {
            match self.via_proxy(proxy, settings.destination(), submission).await {
                Ok(response) => {
                    info!("Submission delivered through proxy");
                    return Ok(Delivery {
                        transport: Transport::Proxy,
                        confirmation: Confirmation::Confirmed,
                        response: Some(response),
                    });
                }
                Err(reason) => warn!("Proxy submission failed: {reason}, trying destination"),
            }
        }

        let destination = settings.destination().ok_or(RelayError::NotConfigured)?;

        match self.direct(destination, submission).await {
            Ok(response) => {
                info!("Submission delivered directly");
                return Ok(Delivery {
                    transport: Transport::Direct,
                    confirmation: Confirmation::Confirmed,
                    response: Some(response),
                });
            }
            Err(Attempt::Rejected(reason)) => return Err(RelayError::Rejected(reason)),
            Err(Attempt::Failed(reason)) => {
                warn!("Direct submission failed: {reason}, sending without acknowledgment")
            }
        }

        if let Err(e) = self.fire_and_forget(destination, submission).await {
            warn!("Fire-and-forget submission failed: {e}, trying form submission");
        } else {
            return Ok(assumed(Transport::FireAndForget));
        }

        match self.hidden_form(destination, submission).await {
            Ok(()) => Ok(assumed(Transport::HiddenForm)),
            Err(e) => Err(RelayError::Exhausted(e.to_string())),
        }
    }

    async fn via_proxy(
        &self,
        proxy: &str,
        destination: Option<&str>,
        submission: &Submission,
    ) -> Result<Value, String> {
        let url = proxy_endpoint(proxy, SUBMIT_PATH);
        debug!("Submitting through proxy {url}");

        let response = self
            .client
            .post(&url)
            .json(&ProxyRequest {
                submission,
                script_url: destination,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("proxy returned {status}"));
        }

        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        if body.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(body)
        } else {
            Err(body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("proxy reported failure")
                .to_string())
        }
    }

    async fn direct(&self, destination: &str, submission: &Submission) -> Result<Value, Attempt> {
        debug!("Submitting directly to {destination}");

        let response = self
            .client
            .post(destination)
            .json(submission)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Attempt::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Attempt::Failed(format!("destination returned {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Attempt::Failed(format!("unreadable acknowledgment: {e}")))?;

        if body.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(body)
        } else {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no success flag in acknowledgment");
            Err(Attempt::Rejected(reason.to_string()))
        }
    }

    /// Send the JSON body as `text/plain` and ignore the answer
    async fn fire_and_forget(
        &self,
        destination: &str,
        submission: &Submission,
    ) -> Result<(), reqwest::Error> {
        // `.json()` keeps an explicit content type and only fills in the body
        self.client
            .post(destination)
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .json(submission)
            .send()
            .await
            .map(|_| ())
    }

    /// Send the fields form-encoded and ignore the answer
    async fn hidden_form(
        &self,
        destination: &str,
        submission: &Submission,
    ) -> Result<(), reqwest::Error> {
        self.client
            .post(destination)
            .form(&submission.form_fields())
            .send()
            .await
            .map(|_| ())
    }

    /// Check that the configured destination answers.
    ///
    /// Goes through the proxy's test endpoint when the proxy is enabled and
    /// reachable, otherwise probes the destination directly.
    pub async fn test_connection(
        &self,
        settings: &RelaySettings,
    ) -> Result<ConnectionReport, RelayError> {
        let destination = settings.destination().ok_or(RelayError::NotConfigured)?;

        if let Some(proxy) = settings.proxy() {
            let url = proxy_endpoint(proxy, TEST_PATH);
            let attempt = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "scriptUrl": destination }))
                .timeout(self.timeout)
                .send()
                .await;

            match attempt {
                Ok(response) if response.status().is_success() => {
                    match response.json::<ConnectionReport>().await {
                        Ok(report) => return Ok(report),
                        Err(e) => warn!("Unreadable proxy test report: {e}, probing directly"),
                    }
                }
                Ok(response) => warn!(
                    "Proxy connection test returned {}, probing directly",
                    response.status()
                ),
                Err(e) => warn!("Proxy unreachable: {e}, probing directly"),
            }
        }

        let response = self
            .client
            .get(destination)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelayError::Exhausted(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok(ConnectionReport {
            success: status.is_success(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            data: serde_json::from_str(&text).unwrap_or(Value::String(text)),
        })
    }
}

fn assumed(transport: Transport) -> Delivery {
    warn!("Submission sent via {transport}; delivery assumed, not confirmed");
    Delivery {
        transport,
        confirmation: Confirmation::Assumed,
        response: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_endpoint_appends_path_once() {
        assert_eq!(
            proxy_endpoint("http://localhost:3000", SUBMIT_PATH),
            "http://localhost:3000/api/submit"
        );
        assert_eq!(
            proxy_endpoint("http://localhost:3000/", SUBMIT_PATH),
            "http://localhost:3000/api/submit"
        );
        assert_eq!(
            proxy_endpoint("https://relay.example/api/submit", SUBMIT_PATH),
            "https://relay.example/api/submit"
        );
    }

    #[tokio::test]
    async fn invalid_submission_never_reaches_the_network() {
        // nothing listens on port 9; any network attempt would fail differently
        let settings = RelaySettings {
            destination_url: Some("http://127.0.0.1:9/exec".to_string()),
            proxy_url: Some("http://127.0.0.1:9".to_string()),
            use_proxy: true,
        };

        let err = Relay::default()
            .submit(&settings, &Submission::new("Jane", "", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = Relay::default()
            .submit(&settings, &Submission::new("Jane", "not-an-email", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");
    }

    #[tokio::test]
    async fn unconfigured_destination_is_reported() {
        let err = Relay::default()
            .submit(
                &RelaySettings::default(),
                &Submission::new("Jane", "jane@x.com", "hi"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotConfigured));
    }
}
