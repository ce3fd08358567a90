use anyhow::{bail, Context};
use std::path::PathBuf;

use watermark_studio::job::BatchJob;
use watermark_studio::logging;

fn main() -> anyhow::Result<()> {
    let job_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: watermark_studio <job.json>")?;

    let job = BatchJob::load(&job_path)?;
    let app = job.app_settings()?;
    logging::init(job.debug || app.debug_logging, job.log_file.clone());

    let report = job.run(&app)?;
    for entry in &report.entries {
        println!("{entry}");
    }
    if report.failed() > 0 {
        bail!(
            "{} of {} images failed",
            report.failed(),
            report.entries.len()
        );
    }
    Ok(())
}
