use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{protocol::ServiceDescription, OrderedMap};
use tracing::{debug, warn};

use crate::{
    error::{ConfigurationError, PortalError, PortalResult},
    producer_client::{ConsumerIdentity, ProducerClient},
    transport::TransportDirectory,
};

/// Session scoped set of producer clients, one per producer name, created on
/// first reference, together with the catalogs they have described.
pub struct ProducerPool {
    directory: Arc<dyn TransportDirectory>,
    identity: ConsumerIdentity,
    call_timeout: Duration,
    clients: OrderedMap<String, Arc<ProducerClient>>,
    catalogs: HashMap<String, ServiceDescription>,
}

impl ProducerPool {
    pub fn new(
        directory: Arc<dyn TransportDirectory>,
        identity: ConsumerIdentity,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            identity,
            call_timeout,
            clients: OrderedMap::new(),
            catalogs: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    pub fn get(&self, producer: &str) -> Option<Arc<ProducerClient>> {
        self.clients.get(producer).cloned()
    }

    /// Returns the client for `producer`, creating it on first reference.
    pub fn client(&mut self, producer: &str) -> Result<Arc<ProducerClient>, ConfigurationError> {
        if let Some(existing) = self.clients.get(producer) {
            return Ok(Arc::clone(existing));
        }
        let transport = self.directory.transport_for(producer)?;
        let client = Arc::new(ProducerClient::new(
            producer,
            transport,
            self.identity.clone(),
            self.call_timeout,
        ));
        debug!(producer, "producer pool: created client");
        self.clients.put(producer.to_string(), Arc::clone(&client));
        Ok(client)
    }

    pub fn producer_names(&self) -> Vec<String> {
        self.clients.keys()
    }

    pub fn catalog(&self, producer: &str) -> Option<&ServiceDescription> {
        self.catalogs.get(producer)
    }

    /// Describes `producer` unless its catalog is already known. Failed
    /// descriptions are not cached, so the next page load asks again.
    pub async fn ensure_described(
        &mut self,
        producer: &str,
        desired_locales: &[String],
    ) -> PortalResult<ServiceDescription> {
        if let Some(catalog) = self.catalogs.get(producer) {
            return Ok(catalog.clone());
        }
        let client = self.client(producer)?;
        let description = client.describe(desired_locales).await.map_err(|err| {
            warn!(producer, error = %err, "producer pool: describe failed");
            PortalError::Producer(err)
        })?;
        self.catalogs
            .insert(producer.to_string(), description.clone());
        Ok(description)
    }
}
