use std::{ops::Deref, sync::Arc};

use crate::{config::Config, ingress::Ingestor, storage::Storage};

pub struct InnerWebContext {
    pub(crate) config: Config,
    pub(crate) ingestor: Arc<Ingestor>,
    pub(crate) storage: Arc<dyn Storage>,
}

#[derive(Clone)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(config: Config, ingestor: Arc<Ingestor>, storage: Arc<dyn Storage>) -> Self {
        Self(Arc::new(InnerWebContext {
            config,
            ingestor,
            storage,
        }))
    }
}
