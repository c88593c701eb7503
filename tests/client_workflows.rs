//! End-to-end client workflows against a deterministic model runtime

mod common;

use async_trait::async_trait;
use common::{desktop_probe, half_split, init_logging, phone_probe, SplitRuntime, TelemetryRecorder};
use image::{ImageFormat, Rgba};
use imgly_bgremove_client::{
    Background, BatchOptions, Blob, CanvasElement, Client, ClientConfig, Device, ImageElement,
    InputNormalizer, LoadOptions, NormalizedInput, OutputFormat, OutputOptions, PipelineHooks,
    ProgressInfo, ReleaseGuard, RemovalClient, RemovalError, RemovalInput, RemoveOptions,
    TelemetryKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn desktop_client(runtime: Arc<SplitRuntime>, config: ClientConfig) -> Client {
    Client::builder()
        .runtime(runtime)
        .probe(desktop_probe())
        .config(config)
        .build()
        .unwrap()
}

fn png_bytes(image: &image::RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_mask_becomes_alpha_channel() {
    init_logging();
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());

    let result = client
        .remove(RemovalInput::from(half_split(8, 4)), RemoveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.dimensions(), (8, 4));
    assert_eq!(result.image.get_pixel(0, 0)[3], 0);
    assert_eq!(result.image.get_pixel(7, 3)[3], 255);
    // color channels are untouched
    assert_eq!(result.image.get_pixel(7, 3)[1], 90);
}

#[tokio::test]
async fn test_background_color_flattens_alpha() {
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());
    let options = RemoveOptions::default().with_background(Background::parse("#00ff00").unwrap());

    let result = client
        .remove(RemovalInput::from(half_split(6, 2)), options)
        .await
        .unwrap();

    assert!(result.image.pixels().all(|p| p[3] == 255));
    assert_eq!(*result.image.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
}

#[tokio::test]
async fn test_blob_and_file_inputs_decode() {
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());
    let bytes = png_bytes(&half_split(4, 4));

    let from_blob = client
        .remove(
            RemovalInput::from(Blob::new(bytes.clone()).with_mime_type("image/png")),
            RemoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(from_blob.dimensions(), (4, 4));

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("split.png");
    std::fs::write(&path, &bytes).unwrap();

    let from_path = client
        .remove(
            RemovalInput::from(path.to_string_lossy().into_owned()),
            RemoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(from_path.image, from_blob.image);

    let from_element = client
        .remove(
            RemovalInput::Image(ImageElement::new(format!("file://{}", path.display()))),
            RemoveOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(from_element.image, from_blob.image);
}

#[tokio::test]
async fn test_bad_inputs_surface_unchanged() {
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());

    let err = client
        .remove(RemovalInput::Image(ImageElement::default()), RemoveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemovalError::UnsupportedInput("Image element has no source URL.".to_string())
    );

    let err = client
        .remove(
            RemovalInput::from(Blob::new(b"not an image".to_vec())),
            RemoveOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RemovalError::UnsupportedInput(_)));
}

#[tokio::test]
async fn test_canvas_input_and_encoded_output() {
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());
    let canvas = CanvasElement::new(half_split(10, 6));

    let result = client
        .remove(RemovalInput::Canvas(canvas.clone()), RemoveOptions::default())
        .await
        .unwrap();
    // the caller's canvas keeps its pixels
    assert_eq!(canvas.snapshot().get_pixel(0, 0)[3], 255);

    let png = result
        .encode(&OutputOptions {
            format: OutputFormat::Png,
            ..OutputOptions::default()
        })
        .unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded, result.image);
}

#[tokio::test]
async fn test_candidate_fallback_reports_label_and_progress() {
    let runtime = Arc::new(SplitRuntime::failing(&[Device::WebGpu]));
    let client = desktop_client(Arc::clone(&runtime), ClientConfig::default());
    let seen = Arc::new(Mutex::new(Vec::<ProgressInfo>::new()));
    let sink = Arc::clone(&seen);

    client
        .load(LoadOptions::with_progress(Arc::new(move |info| {
            sink.lock().unwrap().push(info);
        })))
        .await
        .unwrap();

    let devices: Vec<Device> = runtime.attempts().into_iter().map(|(d, _)| d).collect();
    assert_eq!(devices, vec![Device::WebGpu, Device::Wasm]);
    assert_eq!(
        client.loaded_model_label().as_deref(),
        Some("WASM q8 (desktop fallback)")
    );

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen
        .iter()
        .filter_map(|info| info.progress)
        .all(|p| (0.0..=100.0).contains(&p)));
}

#[tokio::test]
async fn test_every_candidate_failing() {
    let runtime = Arc::new(SplitRuntime::failing(&[Device::WebGpu, Device::Wasm]));
    let recorder = Arc::new(TelemetryRecorder::default());
    let client = desktop_client(runtime, ClientConfig::default().with_hooks(recorder.clone()));

    let err = client.load(LoadOptions::default()).await.unwrap_err();
    assert_eq!(
        err.message(),
        "Failed to load model bundle: wasm unavailable"
    );
    assert_eq!(
        recorder.kinds(),
        vec![TelemetryKind::LoadStart, TelemetryKind::LoadError]
    );
}

#[tokio::test]
async fn test_explicit_candidates_from_json() {
    let runtime = Arc::new(SplitRuntime::new());
    let config = ClientConfig::from_json_str(
        r#"{
            "model": {
                "candidates": [
                    {"modelId": "acme/matte", "device": "wasm", "dtype": "fp32", "label": "custom"}
                ]
            }
        }"#,
    )
    .unwrap();
    let client = Client::builder()
        .runtime(runtime.clone())
        .probe(phone_probe())
        .config(config)
        .build()
        .unwrap();

    client.load(LoadOptions::default()).await.unwrap();
    assert_eq!(runtime.attempts(), vec![(Device::Wasm, "acme/matte".to_string())]);
    assert_eq!(client.loaded_model_label().as_deref(), Some("custom"));
}

#[tokio::test(start_paused = true)]
async fn test_batch_order_survives_asymmetric_latency() {
    let runtime = Arc::new(SplitRuntime {
        per_column: Some(Duration::from_millis(10)),
        ..SplitRuntime::default()
    });
    let recorder = Arc::new(TelemetryRecorder::default());
    let client = desktop_client(runtime, ClientConfig::default().with_hooks(recorder.clone()));

    // wider images finish later
    let widths = [12_u32, 2, 8, 4, 10, 6];
    let inputs = widths
        .iter()
        .map(|&w| RemovalInput::from(half_split(w, 2)))
        .collect();
    let results = client
        .remove_many(inputs, RemoveOptions::default(), BatchOptions::with_concurrency(3))
        .await
        .unwrap();

    let got: Vec<u32> = results.iter().map(|r| r.width).collect();
    assert_eq!(got, widths.to_vec());

    let kinds = recorder.kinds();
    assert_eq!(kinds.first(), Some(&TelemetryKind::RemoveManyStart));
    assert_eq!(kinds.last(), Some(&TelemetryKind::RemoveManySuccess));
    let removes = kinds
        .iter()
        .filter(|k| **k == TelemetryKind::RemoveSuccess)
        .count();
    assert_eq!(removes, widths.len());
}

#[tokio::test]
async fn test_batch_failure_drops_partial_results() {
    let client = desktop_client(Arc::new(SplitRuntime::new()), ClientConfig::default());
    let inputs = vec![
        RemovalInput::from(half_split(4, 4)),
        RemovalInput::from(Blob::new(Vec::new())),
        RemovalInput::from(half_split(4, 4)),
    ];

    let err = client
        .remove_many(inputs, RemoveOptions::default(), BatchOptions::with_concurrency(2))
        .await
        .unwrap_err();
    assert_eq!(err.message(), "Image input is empty.");
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_still_closes_in_flight_removals() {
    let runtime = Arc::new(SplitRuntime {
        per_column: Some(Duration::from_millis(10)),
        ..SplitRuntime::default()
    });
    let recorder = Arc::new(TelemetryRecorder::default());
    let client = desktop_client(runtime, ClientConfig::default().with_hooks(recorder.clone()));
    let inputs = vec![
        RemovalInput::from(half_split(50, 2)),
        RemovalInput::from(Blob::new(b"garbage".to_vec())),
    ];

    let err = client
        .remove_many(inputs, RemoveOptions::default(), BatchOptions::with_concurrency(2))
        .await
        .unwrap_err();
    assert!(matches!(err, RemovalError::UnsupportedInput(_)));

    let kinds = recorder.kinds();
    let count = |wanted: &[TelemetryKind]| kinds.iter().filter(|k| wanted.contains(k)).count();
    assert_eq!(count(&[TelemetryKind::RemoveStart]), 2);
    assert_eq!(
        count(&[TelemetryKind::RemoveSuccess, TelemetryKind::RemoveError]),
        2
    );
    assert_eq!(kinds.last(), Some(&TelemetryKind::RemoveManyError));
}

/// Normalizer handing out bitmaps with a counted release guard
struct GuardedNormalizer {
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl InputNormalizer for GuardedNormalizer {
    async fn normalize(&self, _input: RemovalInput) -> imgly_bgremove_client::Result<NormalizedInput> {
        let releases = Arc::clone(&self.releases);
        Ok(NormalizedInput::with_release(
            half_split(4, 4),
            ReleaseGuard::new(move || {
                releases.fetch_add(1, Ordering::SeqCst);
            }),
        ))
    }
}

#[tokio::test]
async fn test_preprocess_failure_releases_input_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let client = Client::builder()
        .runtime(Arc::new(SplitRuntime {
            fail_preprocess: true,
            ..SplitRuntime::default()
        }))
        .probe(desktop_probe())
        .normalizer(Arc::new(GuardedNormalizer {
            releases: Arc::clone(&releases),
        }))
        .build()
        .unwrap();

    let err = client
        .remove(RemovalInput::from("ignored.png"), RemoveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemovalError::Inference("Background removal failed: preprocessor exploded".to_string())
    );
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

/// Swaps every input for a fixed bitmap and counts finished results
#[derive(Default)]
struct SwapHooks {
    finished: AtomicUsize,
}

#[async_trait]
impl PipelineHooks for SwapHooks {
    async fn before_process(&self, _input: RemovalInput, _options: &RemoveOptions) -> RemovalInput {
        RemovalInput::from(half_split(3, 3))
    }

    async fn after_process(
        &self,
        result: &imgly_bgremove_client::RemovalResult,
        input: &RemovalInput,
        _options: &RemoveOptions,
    ) {
        assert_eq!(input.kind(), "bitmap");
        assert_eq!(result.dimensions(), (3, 3));
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_hooks_wrap_each_removal() {
    let hooks = Arc::new(SwapHooks::default());
    let client = desktop_client(
        Arc::new(SplitRuntime::new()),
        ClientConfig::default().with_hooks(hooks.clone()),
    );

    let result = client
        .remove(RemovalInput::from("never-fetched.png"), RemoveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.dimensions(), (3, 3));
    assert_eq!(hooks.finished.load(Ordering::SeqCst), 1);
}
