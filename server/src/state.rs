use std::sync::Arc;

use crate::{backends::RenderApi, config::Settings, submission::Submitter};

/// Shared by every worker; holds no per-submission state.
pub struct AppState {
    pub submitter: Arc<Submitter>,
    pub renderer: Arc<dyn RenderApi>,
    pub settings: Settings,
}
