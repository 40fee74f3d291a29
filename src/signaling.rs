//! Out-of-band signaling: session creation and description exchange.
//!
//! Two POST calls against the service, performed before any media flows:
//! session creation (JSON in, JSON out) and description exchange (SDP in,
//! SDP out). Both carry the client identity and secret as headers. This
//! component performs no retries — retry policy belongs to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, VoiceError};

/// Path of the session-creation endpoint, relative to the server URL.
const SESSIONS_PATH: &str = "/v1/realtime/sessions";

/// Path of the description-exchange endpoint, relative to the server URL.
const REALTIME_PATH: &str = "/v1/realtime";

// ── Data model ──────────────────────────────────────────────────────────

/// An ICE server descriptor from the session-creation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    /// One or more server URLs. The wire value may be a single string or a
    /// list; both decode to a list.
    #[serde(deserialize_with = "string_or_seq", default)]
    pub urls: Vec<String>,
    /// Optional username credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// A negotiated session, created once and immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Opaque session identifier.
    pub id: String,
    /// ICE servers offered by the service. Absence of the field yields an
    /// empty list, never a failure.
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// Type tag of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    /// Local offer.
    Offer,
    /// Remote answer.
    Answer,
}

/// A signaling blob: type tag plus opaque protocol text. Write-once per
/// negotiation round.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    /// Offer or answer.
    pub kind: SdpType,
    /// The raw description text.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    /// Create an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

// ── Transport seam ──────────────────────────────────────────────────────

/// One signaling request: URL, content type, client identity headers, body.
#[derive(Debug, Clone)]
pub struct SignalingRequest {
    /// Full request URL.
    pub url: String,
    /// `Content-Type` header value.
    pub content_type: &'static str,
    /// `X-Client-Id` header value.
    pub client_id: String,
    /// `X-Client-Secret` header value.
    pub client_secret: String,
    /// Raw request body.
    pub body: Vec<u8>,
}

/// One signaling response: status code and raw body.
#[derive(Debug, Clone)]
pub struct SignalingResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Request/response capability the exchange runs against.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// POST the request and return the response, whatever its status.
    /// Transport-level failures map to [`VoiceError::Connection`].
    async fn post(&self, request: SignalingRequest) -> Result<SignalingResponse>;
}

/// Reqwest-backed [`SignalingTransport`].
#[derive(Debug, Clone)]
pub struct HttpSignalingTransport {
    client: reqwest::Client,
}

impl HttpSignalingTransport {
    /// Build the transport with rustls TLS.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| VoiceError::connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn post(&self, request: SignalingRequest) -> Result<SignalingResponse> {
        let response = self
            .client
            .post(&request.url)
            .header("Content-Type", request.content_type)
            .header("X-Client-Id", &request.client_id)
            .header("X-Client-Secret", &request.client_secret)
            .body(request.body)
            .send()
            .await
            .map_err(|e| VoiceError::connection(format!("signaling request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| VoiceError::connection(format!("failed to read signaling body: {e}")))?
            .to_vec();
        Ok(SignalingResponse { status, body })
    }
}

// ── Exchange ────────────────────────────────────────────────────────────

/// The two-step out-of-band negotiation against the service.
pub struct SignalingExchange {
    transport: std::sync::Arc<dyn SignalingTransport>,
    client_id: String,
    client_secret: String,
    server_url: String,
}

impl SignalingExchange {
    /// Create an exchange bound to one server and one set of credentials.
    pub fn new(
        transport: std::sync::Arc<dyn SignalingTransport>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(
        &self,
        path: &str,
        content_type: &'static str,
        body: Vec<u8>,
    ) -> SignalingRequest {
        SignalingRequest {
            url: format!("{}{}", self.server_url, path),
            content_type,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            body,
        }
    }

    /// Create a session. Any status other than 200 fails with
    /// [`VoiceError::Signaling`].
    pub async fn create_session(&self) -> Result<Session> {
        let body = serde_json::to_vec(&serde_json::json!({
            "modalities": ["text", "audio"],
        }))?;
        let response = self
            .transport
            .post(self.request(SESSIONS_PATH, "application/json", body))
            .await?;

        if response.status != 200 {
            return Err(VoiceError::signaling(
                response.status,
                String::from_utf8_lossy(&response.body),
            ));
        }

        let session: Session = serde_json::from_slice(&response.body)?;
        tracing::debug!(session_id = %session.id, ice_servers = session.ice_servers.len(),
            "session created");
        Ok(session)
    }

    /// Exchange the local offer for the remote answer. The body is the raw
    /// description text, content-typed as SDP. Both 200 and 201 count as
    /// success, to tolerate either convention.
    pub async fn exchange_description(
        &self,
        local: &SessionDescription,
    ) -> Result<SessionDescription> {
        let response = self
            .transport
            .post(self.request(REALTIME_PATH, "application/sdp", local.sdp.clone().into_bytes()))
            .await?;

        if response.status != 200 && response.status != 201 {
            return Err(VoiceError::signaling(
                response.status,
                String::from_utf8_lossy(&response.body),
            ));
        }

        let sdp = String::from_utf8(response.body)
            .map_err(|e| VoiceError::protocol(format!("answer is not valid UTF-8: {e}")))?;
        Ok(SessionDescription::answer(sdp))
    }
}
