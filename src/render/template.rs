// src/render/template.rs

//! Job-script templates.
//!
//! A template is a shell script with `{name}` placeholders. Rendering is
//! strict: every placeholder needs a value, otherwise the batch fails with
//! a template error before anything is written. Shell expansions such as
//! `${JOB_RC}` pass through untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_yaml::Mapping;

use crate::errors::{CycledagError, Result};
use crate::fs::FileSystem;
use crate::render::format::{FormatError, FormatString};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    source: String,
    format: FormatString,
    origin: Option<PathBuf>,
}

impl JobTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let format = FormatString::parse(&source);
        Self {
            source,
            format,
            origin: None,
        }
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let source = fs.read_to_string(path).map_err(|e| {
            CycledagError::template(format!("cannot read job template {path:?}: {e:#}"))
        })?;
        let mut template = Self::new(source);
        template.origin = Some(path.to_path_buf());
        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Every placeholder name the template uses.
    pub fn placeholders(&self) -> BTreeSet<String> {
        self.format.field_names()
    }

    /// Substitute all placeholders from `ns`.
    pub fn render(&self, ns: &Mapping) -> Result<String> {
        self.format.format(ns).map_err(|e| {
            let origin = self
                .origin
                .as_ref()
                .map(|p| format!("{p:?}"))
                .unwrap_or_else(|| "<inline>".to_string());
            match e {
                FormatError::Missing(name) => CycledagError::template(format!(
                    "job template {origin} uses placeholder {{{name}}} but the job has no value for it"
                )),
                other => CycledagError::template(format!("job template {origin}: {other}")),
            }
        })
    }

    /// Recover placeholder values from a script rendered from this template.
    ///
    /// Placeholders used with a format spec come back in their formatted
    /// form. A placeholder that occurs several times must have rendered to
    /// the same text every time.
    pub fn parse_rendered(&self, rendered: &str) -> Result<BTreeMap<String, String>> {
        let mut pattern = String::from("(?s)^");
        let mut names = Vec::new();
        for segment in self.format.segments() {
            match segment {
                Ok(literal) => pattern.push_str(&regex::escape(literal)),
                Err(name) => {
                    pattern.push_str(&format!("(?P<f{}>.*?)", names.len()));
                    names.push(name.to_string());
                }
            }
        }
        pattern.push('$');

        let re = Regex::new(&pattern)
            .map_err(|e| CycledagError::template(format!("cannot build reverse matcher: {e}")))?;
        let caps = re.captures(rendered).ok_or_else(|| {
            CycledagError::template("rendered script does not match the template".to_string())
        })?;

        let mut values = BTreeMap::new();
        for (i, name) in names.into_iter().enumerate() {
            let text = caps
                .name(&format!("f{i}"))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            if let Some(previous) = values.get(&name) {
                if previous != &text {
                    return Err(CycledagError::template(format!(
                        "placeholder {{{name}}} rendered inconsistently: {previous:?} vs {text:?}"
                    )));
                }
                continue;
            }
            values.insert(name, text);
        }
        Ok(values)
    }
}

/// A relative template path is looked up next to the config first, then
/// used as given.
pub fn resolve_template_path(fs: &dyn FileSystem, config_dir: Option<&str>, template: &str) -> PathBuf {
    let path = Path::new(template);
    if path.is_relative() {
        if let Some(dir) = config_dir {
            let candidate = Path::new(dir).join(path);
            if fs.is_file(&candidate) {
                return candidate;
            }
        }
    }
    path.to_path_buf()
}
