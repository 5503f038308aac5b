use std::sync::Arc;

use crate::config::Config;
use crate::database::Database;
use crate::mail::MailSender;
use crate::registry::{cache::RepositoryCache, RegistryClient};

pub struct AppState {
    pub database: Arc<dyn Database>,
    pub registry: RegistryClient,
    pub repositories: Arc<RepositoryCache>,
    pub mailer: Arc<dyn MailSender>,
    pub config: Config,
}

impl AppState {
    pub fn new(database: Arc<dyn Database>, registry: RegistryClient, repositories: Arc<RepositoryCache>, mailer: Arc<dyn MailSender>, config: Config) -> Self
    {
        Self {
            database,
            registry,
            repositories,
            mailer,
            config,
        }
    }
}
