use std::sync::Arc;

use tracing::{error, info, warn};

use crate::catalog::MediaCatalog;
use crate::config::Config;
use crate::error::Result;
use crate::model::MediaKind;
use crate::notify::Notifier;
use crate::process::ProcessRunner;
use crate::reconcile::Reconciler;
use crate::transcode::Transcoder;

/// One full synchronization run.
///
/// ```mermaid
/// flowchart LR
///     tv[Reconcile TV] --> movie[Reconcile movies]
///     movie --> infer[Ask catalog to infer scrapers]
///     infer --> report{Any errors?}
///     report -- yes --> notify[Notify]
///     report -- no --> done[Done]
///     notify --> done
/// ```
#[cfg_attr(doc, aquamarine::aquamarine)]
pub struct Orchestrator {
    config: Config,
    catalog: Arc<dyn MediaCatalog>,
    notifier: Arc<dyn Notifier>,
    transcoder: Transcoder,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        catalog: Arc<dyn MediaCatalog>,
        notifier: Arc<dyn Notifier>,
        runner: Arc<dyn ProcessRunner>,
        dry_run: bool,
    ) -> Result<Self> {
        let transcoder = Transcoder::new(&config, runner)?;
        Ok(Self {
            config,
            catalog,
            notifier,
            transcoder,
            dry_run,
        })
    }

    pub fn reconciler(&self, kind: MediaKind) -> Reconciler<'_> {
        Reconciler::new(
            kind,
            &self.config,
            &*self.catalog,
            &self.transcoder,
            &*self.notifier,
            self.dry_run,
        )
    }

    /// Reconciles TV then movies and reports whatever went wrong.
    ///
    /// Returns the collected per-file errors; `Err` only when a pass could not start.
    pub async fn run(&self) -> Result<Vec<String>> {
        if self.dry_run {
            info!("Dry run: nothing will be encoded, moved or registered");
        }

        let mut errors = self.reconciler(MediaKind::Tv).run().await?;
        errors.extend(self.reconciler(MediaKind::Movie).run().await?);

        if let Err(e) = self.catalog.infer_scrapers().await {
            warn!("Failed to infer scrapers: {e}");
        }

        if errors.is_empty() {
            info!("All done");
        } else {
            error!("Errors occurred in the following files:");
            for e in &errors {
                error!("{e}");
            }
            self.notifier
                .notify(&self.config.email.subject, &errors.join("\n"))
                .await;
        }
        Ok(errors)
    }
}
