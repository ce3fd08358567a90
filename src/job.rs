use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::settings::{default_settings_path, AppSettings};
use crate::watermark::compositor::Compositor;
use crate::watermark::export::{export_batch, BatchInput, ExportOptions, OutputNames};
use crate::watermark::fonts::FontBook;
use crate::watermark::metadata::JpegExifTransplant;
use crate::watermark::model::WatermarkSettings;

/// A batch export described in JSON.
///
/// Relative paths are resolved against the directory holding the job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Application settings file. Defaults to the per-user settings path.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    pub watermark: WatermarkSettings,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct JobEntry {
    pub input: String,
    pub output: Result<PathBuf, String>,
}

impl fmt::Display for JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output {
            Ok(path) => write!(f, "ok     {} -> {}", self.input, path.display()),
            Err(err) => write!(f, "failed {}: {}", self.input, err),
        }
    }
}

#[derive(Debug, Default)]
pub struct JobReport {
    pub entries: Vec<JobEntry>,
}

impl JobReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.output.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

impl BatchJob {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read job {}", path.display()))?;
        let mut job: Self = serde_json::from_str(&content)
            .with_context(|| format!("parse job {}", path.display()))?;
        if let Some(base) = path.parent() {
            job.resolve_relative_to(base);
        }
        Ok(job)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for input in &mut self.inputs {
            resolve(input);
        }
        resolve(&mut self.output_dir);
        if let Some(settings) = self.settings_path.as_mut() {
            resolve(settings);
        }
        if let Some(log) = self.log_file.as_mut() {
            resolve(log);
        }
    }

    pub fn app_settings(&self) -> anyhow::Result<AppSettings> {
        let path = self
            .settings_path
            .clone()
            .unwrap_or_else(default_settings_path);
        AppSettings::load(&path)
    }

    /// Export every input, writing each result to `output_dir` as soon as
    /// it is encoded. Inputs that share a file name get distinct outputs.
    pub fn run(&self, app: &AppSettings) -> anyhow::Result<JobReport> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("create output dir {}", self.output_dir.display()))?;

        let mut compositor = Compositor::new(FontBook::from_settings(app));
        if !compositor.fonts().has_fonts() {
            tracing::warn!("no fonts available; text watermarks will be empty");
        }
        let options = ExportOptions::from_settings(app);
        let inputs = self
            .inputs
            .iter()
            .map(|path| BatchInput::open(path, self.watermark.clone()));

        tracing::info!(
            images = self.inputs.len(),
            output = %self.output_dir.display(),
            "starting batch export"
        );
        let mut names = OutputNames::new();
        let results = export_batch(
            &mut compositor,
            inputs,
            &options,
            &JpegExifTransplant,
            |mut exported| {
                exported.file_name = names.claim(&exported.file_name);
                exported.write_to_dir(&self.output_dir)
            },
        );

        let entries = results
            .into_iter()
            .map(|item| JobEntry {
                input: item.name,
                output: item.result.map_err(|err| format!("{err:#}")),
            })
            .collect();
        Ok(JobReport { entries })
    }
}
