//! Shared render entrypoint used by CLI and daemon.

use std::path::PathBuf;

use mailsync_core::SyncConfig;

use crate::context::TemplateContext;
use crate::diff::{diff_rendered, FileDiff};
use crate::engine::TemplateEngine;
use crate::error::RenderError;
use crate::writer::{write_config, WriteResult};

/// Result of rendering every config file once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub output_dir: PathBuf,
    pub writes: Vec<WriteResult>,
}

impl RenderReport {
    /// True when at least one file was (or in a dry run would be) written.
    pub fn changed(&self) -> bool {
        self.writes.iter().any(WriteResult::changed)
    }
}

fn engine_for(config: &SyncConfig) -> Result<TemplateEngine, RenderError> {
    TemplateEngine::new(config.templates.template_dir.as_deref())
}

/// Render and write every config file under the configured output directory.
pub fn run(config: &SyncConfig, dry_run: bool) -> Result<RenderReport, RenderError> {
    let output_dir = config.templates.output_dir.clone();
    let ctx = TemplateContext::from_config(config);
    let rendered = engine_for(config)?.render_all(&ctx, &output_dir)?;

    let writes = rendered
        .iter()
        .map(|(path, content)| write_config(path, content, dry_run))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RenderReport { output_dir, writes })
}

/// Render every config file and diff it against the output directory.
pub fn diff(config: &SyncConfig) -> Result<Vec<FileDiff>, RenderError> {
    let output_dir = &config.templates.output_dir;
    let ctx = TemplateContext::from_config(config);
    let rendered = engine_for(config)?.render_all(&ctx, output_dir)?;
    diff_rendered(&rendered, output_dir)
}
