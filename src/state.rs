use std::sync::Arc;

use crate::{
    agents::{CommandSyntaxChecker, SyntaxChecker},
    clients::{
        ChatClient, ChatworkClient, ClientError, GeminiClient, GitHubClient, ModelClient,
        VcsClient,
    },
    config::AppConfig,
    polling::PollingService,
    storage::ObjectStorage,
    store::DocumentStore,
};

/// Outbound collaborators, built once at startup.
#[derive(Clone)]
pub struct Clients {
    /// Extraction and requirement drafting.
    pub model: Arc<dyn ModelClient>,
    /// Design and code generation.
    pub code_model: Arc<dyn ModelClient>,
    pub chat: Arc<dyn ChatClient>,
    pub vcs: Arc<dyn VcsClient>,
    pub checker: Arc<dyn SyntaxChecker>,
}

impl Clients {
    /// Real HTTP clients; missing credentials surface later as
    /// `ClientError::NotConfigured`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ClientError> {
        let timeout = config.http_timeout();
        let model = GeminiClient::new(
            config.gemini_api_key.clone(),
            &config.gemini_model,
            &config.gemini_api_url,
            timeout,
        )?;
        let code_model = GeminiClient::new(
            config.gemini_api_key.clone(),
            &config.gemini_code_model,
            &config.gemini_api_url,
            timeout,
        )?;
        let chat = ChatworkClient::new(
            config.chatwork_api_token.clone(),
            &config.chatwork_api_url,
            timeout,
        )?;
        let vcs = GitHubClient::new(
            config.github_token.clone(),
            config.github_repo.clone(),
            &config.github_api_url,
            timeout,
        )?;

        Ok(Self {
            model: Arc::new(model),
            code_model: Arc::new(code_model),
            chat: Arc::new(chat),
            vcs: Arc::new(vcs),
            checker: Arc::new(CommandSyntaxChecker::new(&config.python_bin, &config.node_bin)),
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub model: Arc<dyn ModelClient>,
    pub code_model: Arc<dyn ModelClient>,
    pub chat: Arc<dyn ChatClient>,
    pub vcs: Arc<dyn VcsClient>,
    pub checker: Arc<dyn SyntaxChecker>,
    pub polling: Arc<PollingService>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        clients: Clients,
    ) -> Self {
        let polling = Arc::new(PollingService::new(
            store.clone(),
            clients.chat.clone(),
            config.polling_interval_seconds,
        ));
        Self {
            config: Arc::new(config),
            store,
            storage,
            model: clients.model,
            code_model: clients.code_model,
            chat: clients.chat,
            vcs: clients.vcs,
            checker: clients.checker,
            polling,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }
}
