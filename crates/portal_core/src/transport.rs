use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Response};
use shared::protocol::{
    MarkupContext, MarkupResponse, ProducerReply, ProducerRequest, CLOUBER_LANG, CLOUBER_MODE,
    CLOUBER_PORTLET, CLOUBER_STATE, CLOUBER_USER,
};
use tracing::debug;
use url::Url;

use crate::{
    config::ProducerEndpoint,
    error::{ConfigurationError, TransportError},
};

/// Carries one wire request to a producer and returns its reply.
///
/// A reply may itself be a [`ProducerReply::Fault`]; only failures to obtain
/// a reply at all are reported as [`TransportError`].
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    async fn call(&self, request: ProducerRequest) -> Result<ProducerReply, TransportError>;
}

/// Resolves a producer name to the transport that reaches it.
pub trait TransportDirectory: Send + Sync {
    fn transport_for(&self, producer: &str)
        -> Result<Arc<dyn ProducerTransport>, ConfigurationError>;
}

#[derive(Default, Clone)]
pub struct StaticDirectory {
    transports: HashMap<String, Arc<dyn ProducerTransport>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, producer: impl Into<String>, transport: Arc<dyn ProducerTransport>) -> Self {
        self.insert(producer, transport);
        self
    }

    pub fn insert(&mut self, producer: impl Into<String>, transport: Arc<dyn ProducerTransport>) {
        self.transports.insert(producer.into(), transport);
    }

    pub fn contains(&self, producer: &str) -> bool {
        self.transports.contains_key(producer)
    }

    /// One HTTP transport per configured endpoint, sharing a single client.
    pub fn from_endpoints<'a>(
        endpoints: impl IntoIterator<Item = (&'a String, &'a ProducerEndpoint)>,
    ) -> Result<Self, ConfigurationError> {
        let http = Client::new();
        let mut directory = Self::new();
        for (name, endpoint) in endpoints {
            let transport = HttpProducerTransport::with_client(http.clone(), &endpoint.url)?;
            directory.insert(name.clone(), Arc::new(transport));
        }
        Ok(directory)
    }
}

impl TransportDirectory for StaticDirectory {
    fn transport_for(
        &self,
        producer: &str,
    ) -> Result<Arc<dyn ProducerTransport>, ConfigurationError> {
        self.transports
            .get(producer)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownProducer(producer.to_string()))
    }
}

/// Reaches a producer over HTTP.
///
/// Markup fetches for portlets that accept GET use `GET {base}/portlets/{handle}?{query}`
/// with the `CLOUBER_*` headers; every other operation is a JSON `POST {base}/wsrp`.
pub struct HttpProducerTransport {
    http: Client,
    base_url: Url,
}

impl HttpProducerTransport {
    pub fn new(base_url: &str) -> Result<Self, ConfigurationError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ConfigurationError> {
        let trimmed = base_url.trim();
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(ConfigurationError::InvalidProducerUrl {
                url: base_url.to_string(),
                reason: "producer url must start with http:// or https://".to_string(),
            });
        }
        // Joining relative paths needs a trailing slash on the base.
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        let base_url = Url::parse(&normalized).map_err(|err| ConfigurationError::InvalidProducerUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Network(format!("invalid producer path {path}: {err}")))
    }

    async fn post_wsrp(&self, request: &ProducerRequest) -> Result<ProducerReply, TransportError> {
        let url = self.endpoint("wsrp")?;
        debug!(%url, operation = request.operation(), "producer: POST");
        let response = self.http.post(url).json(request).send().await?;
        decode_reply(response).await
    }

    async fn get_markup(&self, request: &ProducerRequest) -> Result<ProducerReply, TransportError> {
        let ProducerRequest::GetMarkup {
            portlet_context,
            runtime_context,
            user_context,
            markup_params,
            ..
        } = request
        else {
            return self.post_wsrp(request).await;
        };

        let mut url = self.endpoint(&format!(
            "portlets/{}",
            urlencode_segment(&portlet_context.portlet_handle)
        ))?;
        let query = runtime_context.query_string.trim_start_matches('?');
        if !query.is_empty() {
            url.set_query(Some(query));
        }
        debug!(%url, "producer: GET markup");

        let mut builder = self
            .http
            .get(url)
            .header(CLOUBER_PORTLET, portlet_context.portlet_handle.as_str())
            .header(CLOUBER_MODE, markup_params.mode.as_str())
            .header(CLOUBER_STATE, markup_params.window_state.as_str());
        if let Some(user_id) = &user_context.user_id {
            builder = builder.header(CLOUBER_USER, user_id.as_str());
        }
        if let Some(locale) = markup_params.locales.first() {
            builder = builder.header(CLOUBER_LANG, locale.as_str());
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return decode_reply(response).await;
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .unwrap_or_else(|| "text/html".to_string());
        let locale = response
            .headers()
            .get(CLOUBER_LANG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let item_string = response.text().await?;

        Ok(ProducerReply::Markup(MarkupResponse {
            markup_context: MarkupContext {
                mime_type,
                item_string,
                locale,
                cache_control: None,
            },
        }))
    }
}

#[async_trait]
impl ProducerTransport for HttpProducerTransport {
    async fn call(&self, request: ProducerRequest) -> Result<ProducerReply, TransportError> {
        match &request {
            ProducerRequest::GetMarkup { use_get: true, .. } => self.get_markup(&request).await,
            _ => self.post_wsrp(&request).await,
        }
    }
}

/// Faults arrive as JSON replies with an error status, so the body is decoded
/// before the status is judged.
async fn decode_reply(response: Response) -> Result<ProducerReply, TransportError> {
    let status = response.status();
    let body = response.text().await?;
    match serde_json::from_str::<ProducerReply>(&body) {
        Ok(reply) => Ok(reply),
        Err(_) if !status.is_success() => Err(TransportError::Status {
            status: status.as_u16(),
            body,
        }),
        Err(err) => Err(TransportError::Decode(err.to_string())),
    }
}

fn urlencode_segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
