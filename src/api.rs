//! Capability API exported by the TRLC extension to dependent extensions.

use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::request::HoverRequest;
use lsp_types::{
    Hover, HoverParams, Position, TextDocumentIdentifier, TextDocumentPositionParams, Url,
    WorkDoneProgressParams,
};
use tracing::debug;

use crate::lsp::LanguageClientSession;

/// Stable identifier dependent extensions use to find the TRLC extension.
pub const PRIMARY_EXTENSION_ID: &str = "trlc.vscode-extension";

/// Version of the [`TrlcApi`] surface.
pub const API_VERSION: u32 = 1;

/// Narrow, stable set of server capabilities offered to other extensions.
///
/// Calls never fail: when the server is unavailable they resolve to `None`.
#[async_trait]
pub trait TrlcApi: Send + Sync {
    /// Hover information for `position` in the document at `uri`.
    async fn hover_details(&self, uri: Url, position: Position) -> Option<Hover>;

    /// Version of the API this object implements.
    fn api_version(&self) -> u32 {
        API_VERSION
    }
}

/// [`TrlcApi`] backed by a language client session.
#[derive(Debug, Clone)]
pub struct SessionFacade {
    session: Arc<LanguageClientSession>,
}

impl SessionFacade {
    /// Wraps `session`.
    pub fn new(session: Arc<LanguageClientSession>) -> Self {
        Self { session }
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<LanguageClientSession> {
        &self.session
    }
}

#[async_trait]
impl TrlcApi for SessionFacade {
    async fn hover_details(&self, uri: Url, position: Position) -> Option<Hover> {
        let params = HoverParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                position,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        };

        match self.session.request::<HoverRequest>(params).await {
            Ok(hover) => hover,
            Err(e) => {
                debug!(%uri, line = position.line, error = %e, "hover unavailable");
                None
            }
        }
    }
}
