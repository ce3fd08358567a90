use anyhow::Result;
use image::{Rgba, RgbaImage};
use tempfile::tempdir;
use watermark_studio::job::BatchJob;
use watermark_studio::settings::AppSettings;
use watermark_studio::watermark::export::ExportFormat;
use watermark_studio::watermark::model::WatermarkSettings;


#[test]
fn job_paths_resolve_against_the_job_file() -> Result<()> {
    let dir = tempdir()?;
    let job_path = dir.path().join("job.json");
    std::fs::write(
        &job_path,
        r##"{
            "settings_path": "app.json",
            "watermark": {
                "text": "DRAFT",
                "position": "bottom-right",
                "size": 12,
                "opacity": 0.5,
                "color": "#000",
                "font_family": "Arial",
                "offset_x": 100,
                "offset_y": -100,
                "spacing_x": 100,
                "spacing_y": 100
            },
            "inputs": ["in/a.png", "/abs/b.jpg"],
            "output_dir": "out"
        }"##,
    )?;

    let job = BatchJob::load(&job_path)?;
    assert_eq!(job.inputs[0], dir.path().join("in/a.png"));
    assert_eq!(job.inputs[1], std::path::PathBuf::from("/abs/b.jpg"));
    assert_eq!(job.output_dir, dir.path().join("out"));
    assert_eq!(job.settings_path.as_deref(), Some(dir.path().join("app.json").as_path()));
    assert_eq!(job.watermark.text, "DRAFT");
    assert!(!job.debug);

    // The settings file does not exist yet: defaults apply.
    assert_eq!(job.app_settings()?, AppSettings::default());
    Ok(())
}

#[test]
fn running_a_job_writes_outputs_and_reports_failures() -> Result<()> {
    let dir = tempdir()?;
    let inputs = dir.path().join("in");
    std::fs::create_dir_all(&inputs)?;
    std::fs::write(
        inputs.join("banner.png"),
        block_glyphs::encode_png(&RgbaImage::from_pixel(48, 24, Rgba([0, 0, 0, 255]))),
    )?;
    std::fs::write(inputs.join("photo.jpg"), block_glyphs::encode_jpeg(32, 32))?;
    std::fs::write(inputs.join("notes.jpg"), b"not an image")?;

    let settings = AppSettings {
        export_format: ExportFormat::Auto,
        ..AppSettings::default()
    };
    settings.save(dir.path().join("app.json"))?;

    let job_json = serde_json::json!({
        "settings_path": "app.json",
        "watermark": serde_json::to_value(WatermarkSettings::default())?,
        "inputs": ["in/banner.png", "in/photo.jpg", "in/notes.jpg", "in/missing.png"],
        "output_dir": "out",
    });
    let job_path = dir.path().join("job.json");
    std::fs::write(&job_path, serde_json::to_vec_pretty(&job_json)?)?;

    let job = BatchJob::load(&job_path)?;
    let app = job.app_settings()?;
    let report = job.run(&app)?;

    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 2);

    let out = dir.path().join("out");
    assert!(out.join("watermarked-banner.png").exists());
    assert!(out.join("watermarked-photo.jpg").exists());
    let written = image::open(out.join("watermarked-banner.png"))?;
    assert_eq!((written.width(), written.height()), (48, 24));

    let failure = report.entries[2].to_string();
    assert!(failure.starts_with("failed"), "{failure}");
    assert!(failure.contains("notes.jpg"), "{failure}");
    Ok(())
}

#[test]
fn inputs_sharing_a_name_get_distinct_outputs() -> Result<()> {
    let dir = tempdir()?;
    for (folder, shade) in [("a", 0u8), ("b", 200u8)] {
        let folder = dir.path().join(folder);
        std::fs::create_dir_all(&folder)?;
        let pixels = RgbaImage::from_pixel(16, 16, Rgba([shade, shade, shade, 255]));
        std::fs::write(folder.join("photo.png"), block_glyphs::encode_png(&pixels))?;
    }

    let job = BatchJob {
        settings_path: None,
        watermark: WatermarkSettings::default(),
        inputs: vec![dir.path().join("a/photo.png"), dir.path().join("b/photo.png")],
        output_dir: dir.path().join("out"),
        debug: false,
        log_file: None,
    };
    let report = job.run(&AppSettings::default())?;
    assert_eq!(report.succeeded(), 2);

    let outputs: Vec<_> = report
        .entries
        .iter()
        .map(|entry| entry.output.clone().expect("written"))
        .collect();
    assert_eq!(outputs[0], dir.path().join("out/watermarked-photo.png"));
    assert_eq!(outputs[1], dir.path().join("out/watermarked-photo (1).png"));

    // The dark source must not have been overwritten by the light one.
    let brightness = |path: &std::path::Path| -> Result<u64> {
        let pixels = image::open(path)?.to_rgba8();
        Ok(pixels.pixels().map(|p| p.0[0] as u64).sum())
    };
    assert!(brightness(&outputs[0])? < brightness(&outputs[1])?);
    assert_eq!(std::fs::read_dir(dir.path().join("out"))?.count(), 2);
    Ok(())
}
