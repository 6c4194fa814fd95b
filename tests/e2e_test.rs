//! End-to-end runs of the OCR and vision workers: submit a job, let a worker
//! pool pick it up, and check the terminal result and the temp workspace.

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use floorplan_pipeline::models::job::{JobId, JobOptions};
use floorplan_pipeline::queue::{QueueEvent, QueueService};
use floorplan_pipeline::services::{
    BlobObjectDetector, ContrastPreprocessor, FloorPlanTextParser, GeometryRoomDetector,
    MemoryCache, ResultCache,
};
use floorplan_pipeline::workers::{
    JobProcessor, OcrWorker, OcrWorkerConfig, VisionWorker, VisionWorkerConfig, WorkerPool,
    WorkerPoolConfig, OCR_QUEUE, VISION_QUEUE,
};

const TERMINAL_WAIT: Duration = Duration::from_secs(30);

fn pool_config() -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
    }
}

fn vision_worker(temp_root: &std::path::Path) -> VisionWorker {
    VisionWorker::new(
        Arc::new(GeometryRoomDetector),
        Arc::new(BlobObjectDetector::new()),
        VisionWorkerConfig {
            temp_root: temp_root.to_path_buf(),
            ..VisionWorkerConfig::default()
        },
    )
}

/// Submit `payload`, run `processor` in a pool until the job's terminal
/// event arrives, then stop the pool.
async fn run_to_terminal<P: JobProcessor>(
    queue: &Arc<QueueService>,
    processor: Arc<P>,
    payload: serde_json::Value,
    options: JobOptions,
) -> (JobId, QueueEvent) {
    let mut events = queue.subscribe();
    let job = queue
        .add_job(processor.queue_name(), payload, options)
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = WorkerPool::new(queue.clone(), processor, pool_config()).spawn(shutdown_rx);
    let terminal = wait_for_terminal(&mut events, job.id, TERMINAL_WAIT).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    (job.id, terminal)
}

#[tokio::test]
async fn test_e2e_vision_rooms_on_single_room_plan() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();

    let (job_id, terminal) = run_to_terminal(
        &queue,
        Arc::new(vision_worker(temp_root.path())),
        vision_payload(&single_room_plan(), "rooms"),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Completed { return_value, .. } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    let detection = &return_value["rooms"];
    assert_eq!(detection["rooms"].as_array().unwrap().len(), 1);
    assert_eq!(detection["walls"].as_array().unwrap().len(), 4);
    assert_eq!(detection["doors"].as_array().unwrap().len(), 0);
    assert_eq!(detection["windows"].as_array().unwrap().len(), 0);
    assert_eq!(return_value["analysisType"], json!("rooms"));
    assert_eq!(return_value["metadata"]["detectionCounts"]["rooms"], json!(1));

    let job = queue.get_job(VISION_QUEUE, job_id).await.unwrap().unwrap();
    assert_eq!(job.progress.progress, 100);
    assert_eq!(job.attempts_made, 0);
    assert_eq!(temp_entries(temp_root.path()), 0);
}

#[tokio::test]
async fn test_e2e_vision_full_analysis_reports_every_category() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();
    let mut progress_events = queue.subscribe();

    let (job_id, terminal) = run_to_terminal(
        &queue,
        Arc::new(vision_worker(temp_root.path())),
        vision_payload(&single_room_plan(), "full"),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Completed { return_value, .. } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    for key in ["edges", "lines", "contours", "rooms", "objects", "combined"] {
        assert!(return_value.get(key).is_some(), "missing {key}");
    }
    assert_eq!(return_value["analysisType"], json!("full"));
    assert_eq!(temp_entries(temp_root.path()), 0);

    let mut stages = Vec::new();
    while let Ok(event) = progress_events.try_recv() {
        if let QueueEvent::Progress { job_id: id, progress, .. } = event {
            if id == job_id {
                stages.push((progress.stage, progress.progress));
            }
        }
    }
    let at = |stage: &str| {
        stages
            .iter()
            .find(|(s, _)| s == stage)
            .map(|(_, p)| *p)
            .unwrap_or_else(|| panic!("no {stage} progress in {stages:?}"))
    };
    assert_eq!(at("objects"), 95);
    assert_eq!(at("combining"), 100);
    assert!(
        stages.windows(2).all(|pair| pair[0].1 <= pair[1].1),
        "stages: {stages:?}"
    );
    let order: Vec<&str> = stages.iter().map(|(stage, _)| stage.as_str()).collect();
    let position = |stage: &str| order.iter().position(|s| *s == stage).unwrap();
    assert!(position("combining") < position("formatting"));
    assert!(position("formatting") < position("completed"));
}

#[tokio::test]
async fn test_e2e_vision_undecodable_image_fails_without_retry() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();

    let (job_id, terminal) = run_to_terminal(
        &queue,
        Arc::new(vision_worker(temp_root.path())),
        json!({ "image": { "bytes": "bm90IGFuIGltYWdl" } }),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Failed { attempts_made, reason, .. } = terminal else {
        panic!("expected failure, got {terminal:?}");
    };
    assert_eq!(attempts_made, 1);
    assert!(reason.starts_with("Validation error"), "reason: {reason}");

    let dead = queue.get_dead_letters(VISION_QUEUE).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].original_job_id, job_id);
    assert_eq!(temp_entries(temp_root.path()), 0);
}

#[tokio::test]
async fn test_e2e_ocr_region_text_is_normalized_and_cached() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();
    let engine = Arc::new(ScriptedOcrEngine::new("  living   room "));
    let cache = Arc::new(MemoryCache::new());
    let worker = OcrWorker::new(
        engine.clone(),
        Arc::new(ContrastPreprocessor),
        Arc::new(FloorPlanTextParser::default()),
        cache.clone(),
        OcrWorkerConfig {
            temp_root: temp_root.path().to_path_buf(),
            ..OcrWorkerConfig::default()
        },
    );

    let (job_id, terminal) = run_to_terminal(
        &queue,
        Arc::new(worker),
        ocr_region_payload(&single_room_plan()),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Completed { return_value, .. } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    let regions = return_value["regions"].as_array().unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0]["label"], json!("title"));
    assert_eq!(
        regions[0]["text"].as_str().unwrap().to_uppercase(),
        "LIVING ROOM"
    );
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

    let cached = cache.get(&format!("{OCR_QUEUE}:{job_id}")).await.unwrap().unwrap();
    assert_eq!(cached["text"], json!("living   room"));
    assert!(cached.get("timestamp").is_some());
    assert_eq!(temp_entries(temp_root.path()), 0);
}

#[tokio::test]
async fn test_e2e_ocr_whole_image_with_structured_output() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();
    let worker = OcrWorker::new(
        Arc::new(ScriptedOcrEngine::new("KITCHEN 12' x 14'\n250 sq ft")),
        Arc::new(ContrastPreprocessor),
        Arc::new(FloorPlanTextParser::default()),
        Arc::new(MemoryCache::new()),
        OcrWorkerConfig {
            temp_root: temp_root.path().to_path_buf(),
            ..OcrWorkerConfig::default()
        },
    );

    let (_, terminal) = run_to_terminal(
        &queue,
        Arc::new(worker),
        json!({
            "image": image_source(&single_room_plan()),
            "settings": { "outputFormat": "structured" },
        }),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Completed { return_value, .. } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    let structured = &return_value["structuredData"];
    assert_eq!(structured["rooms"][0]["name"], json!("kitchen"));
    assert_eq!(structured["dimensions"][0]["widthFt"], json!(12.0));
    assert_eq!(structured["areas"][0]["squareFeet"], json!(250.0));
    assert_eq!(temp_entries(temp_root.path()), 0);
}

#[tokio::test]
async fn test_e2e_ocr_engine_receives_clamped_region_crops() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();
    let engine = Arc::new(RecordingOcrEngine::default());
    let worker = OcrWorker::new(
        engine.clone(),
        Arc::new(ContrastPreprocessor),
        Arc::new(FloorPlanTextParser::default()),
        Arc::new(MemoryCache::new()),
        OcrWorkerConfig {
            temp_root: temp_root.path().to_path_buf(),
            ..OcrWorkerConfig::default()
        },
    );

    let (_, terminal) = run_to_terminal(
        &queue,
        Arc::new(worker),
        json!({
            "image": image_source(&single_room_plan()),
            "settings": {
                "preprocess": false,
                "regions": [
                    { "x": 10, "y": 10, "w": 20, "h": 20, "label": "corner" },
                    { "x": 350, "y": 250, "w": 100, "h": 100, "label": "overhang" },
                    { "x": 500, "y": 10, "w": 10, "h": 10, "label": "outside" },
                ],
            },
        }),
        JobOptions::default(),
    )
    .await;

    let QueueEvent::Completed { return_value, .. } = terminal else {
        panic!("expected completion, got {terminal:?}");
    };
    assert_eq!(return_value["regions"].as_array().unwrap().len(), 3);

    // The region outside the page is never sent to the engine.
    let crops = engine.seen();
    assert_eq!(crops.len(), 2);

    // Top-left outline corner: the plan's (20, 20) lands at (10, 10).
    let corner = &crops[0];
    assert_eq!(corner.dimensions(), (20, 20));
    assert_eq!(corner.get_pixel(0, 0).0, [255]);
    assert_eq!(corner.get_pixel(10, 10).0, [0]);
    assert_eq!(corner.get_pixel(15, 15).0, [255]);

    // Clipped to the page: x 350..400, y 250..300, outline at 376..380.
    let overhang = &crops[1];
    assert_eq!(overhang.dimensions(), (PLAN_WIDTH - 350, PLAN_HEIGHT - 250));
    assert_eq!(overhang.get_pixel(0, 0).0, [255]);
    assert_eq!(overhang.get_pixel(27, 27).0, [0]);
    assert_eq!(overhang.get_pixel(40, 40).0, [255]);
    assert_eq!(temp_entries(temp_root.path()), 0);
}

/// URL whose response never arrives.
async fn serve_hanging_image() -> String {
    let app = axum::Router::new().route(
        "/plan.png",
        axum::routing::get(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "late"
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/plan.png")
}

#[tokio::test]
async fn test_e2e_vision_timeout_leaves_no_temp_files() {
    let queue = test_queue();
    let temp_root = tempfile::tempdir().unwrap();
    let url = serve_hanging_image().await;
    let mut events = queue.subscribe();
    let job = queue
        .add_job(
            VISION_QUEUE,
            json!({ "image": { "url": url }, "settings": { "analysisType": "rooms" } }),
            JobOptions::default()
                .with_attempts(1)
                .with_timeout(Duration::from_millis(1500)),
        )
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = WorkerPool::new(
        queue.clone(),
        Arc::new(vision_worker(temp_root.path())),
        pool_config(),
    )
    .spawn(shutdown_rx);

    // The job workspace exists while the download hangs.
    let created = tokio::time::timeout(Duration::from_secs(1), async {
        while temp_entries(temp_root.path()) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(created.is_ok(), "workspace was never created");

    let terminal = wait_for_terminal(&mut events, job.id, TERMINAL_WAIT).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let QueueEvent::Failed { attempts_made, reason, .. } = terminal else {
        panic!("expected failure, got {terminal:?}");
    };
    assert_eq!(attempts_made, 1);
    assert!(reason.starts_with("Timed out"), "reason: {reason}");
    assert_eq!(temp_entries(temp_root.path()), 0);
    assert_eq!(queue.get_dead_letters(VISION_QUEUE).await.unwrap().len(), 1);
}
