//! Tera rendering engine: [`ConfigFile`] enum and [`TemplateEngine`].
//!
//! | File                         | Consumer                          |
//! |------------------------------|-----------------------------------|
//! | `dovecot/ldap/passdb.conf`   | dovecot LDAP password database    |
//! | `dovecot/extra.conf`         | dovecot include enabling the above|
//! | `sogo/plist_ldap`            | SOGo user source                  |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use crate::context::TemplateContext;
use crate::error::{io_err, RenderError};

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    (
        "dovecot/ldap/passdb.conf.tera",
        include_str!("templates/dovecot/ldap/passdb.conf.tera"),
    ),
    (
        "dovecot/extra.conf.tera",
        include_str!("templates/dovecot/extra.conf.tera"),
    ),
    ("sogo/plist_ldap.tera", include_str!("templates/sogo/plist_ldap.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        tracing::debug!("template override: {name}");
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(
            normalize_template_name(Path::new(name)),
            (*content).to_string(),
        );
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    // Config files are not HTML; the plist template escapes explicitly.
    tera.autoescape_on(vec![]);
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ConfigFile
// ---------------------------------------------------------------------------

/// Every config file rendered for the mail server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFile {
    DovecotPassdb,
    DovecotExtra,
    SogoPlistLdap,
}

impl ConfigFile {
    pub fn all() -> &'static [ConfigFile] {
        &[
            ConfigFile::DovecotPassdb,
            ConfigFile::DovecotExtra,
            ConfigFile::SogoPlistLdap,
        ]
    }

    /// Output path relative to the config output directory.
    pub fn relative_path(&self) -> &'static str {
        match self {
            ConfigFile::DovecotPassdb => "dovecot/ldap/passdb.conf",
            ConfigFile::DovecotExtra => "dovecot/extra.conf",
            ConfigFile::SogoPlistLdap => "sogo/plist_ldap",
        }
    }

    /// Template name; an override dir replaces it by placing a file at the
    /// same relative path.
    pub fn template_name(&self) -> String {
        format!("{}.tera", self.relative_path())
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine for the embedded templates plus optional overrides.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Load embedded templates plus any `.tera` overrides in
    /// `user_template_dir`.
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    pub fn render(&self, ctx: &TemplateContext, file: ConfigFile) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        Ok(self.tera.render(&file.template_name(), &tera_ctx)?)
    }

    /// Render every config file; paths are joined onto `output_dir`.
    pub fn render_all(
        &self,
        ctx: &TemplateContext,
        output_dir: &Path,
    ) -> Result<Vec<(PathBuf, String)>, RenderError> {
        ConfigFile::all()
            .iter()
            .map(|file| Ok((output_dir.join(file.relative_path()), self.render(ctx, *file)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
