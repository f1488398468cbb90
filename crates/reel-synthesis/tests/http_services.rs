//! HTTP generation clients against mocked services.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reel_models::Coordinates;
use reel_synthesis::{
    FlyoverConfig, GenerationRequest, GenerationService, HttpFlyoverService,
    HttpSynthesisService, ServiceConfig, SynthesisConfig, SynthesisError, TaskHandle, TaskState,
};

fn service_config(server: &MockServer) -> ServiceConfig {
    ServiceConfig {
        base_url: server.uri(),
        api_key: Some("secret".to_string()),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
    }
}

fn synthesis(server: &MockServer) -> HttpSynthesisService {
    HttpSynthesisService::new(SynthesisConfig {
        service: service_config(server),
        model: Some("motion-v2".to_string()),
        clip_duration_secs: 5.0,
    })
    .unwrap()
}

#[tokio::test]
async fn test_submit_sends_base64_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/image-to-video"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            // "abc" in base64
            "image": "YWJj",
            "mime_type": "image/jpeg",
            "model": "motion-v2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "task-42"})))
        .expect(1)
        .mount(&server)
        .await;

    let handle = synthesis(&server)
        .submit(&GenerationRequest::image(b"abc".to_vec(), "image/jpeg", 5.0))
        .await
        .unwrap();
    assert_eq!(handle, TaskHandle("task-42".to_string()));
}

#[tokio::test]
async fn test_poll_maps_vendor_states() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/running"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/done"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "video_url": "https://cdn.example.com/clip.mp4"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": "content policy"
        })))
        .mount(&server)
        .await;

    let service = synthesis(&server);

    let running = service.poll(&TaskHandle("running".into())).await.unwrap();
    assert_eq!(running.state, TaskState::Running);

    let done = service.poll(&TaskHandle("done".into())).await.unwrap();
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(done.output_url.as_deref(), Some("https://cdn.example.com/clip.mp4"));

    let broken = service.poll(&TaskHandle("broken".into())).await.unwrap();
    assert_eq!(broken.state, TaskState::Failed);
    assert_eq!(broken.failure.as_deref(), Some("content policy"));
}

#[tokio::test]
async fn test_succeeded_without_url_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/tasks/t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "succeeded"})))
        .mount(&server)
        .await;

    let err = synthesis(&server).poll(&TaskHandle("t".into())).await.unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/image-to-video"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = synthesis(&server)
        .submit(&GenerationRequest::image(vec![1, 2, 3], "image/png", 5.0))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let rejected = synthesis(&server)
        .submit(&GenerationRequest::location(Coordinates::new(1.0, 2.0).unwrap(), 5.0))
        .await
        .unwrap_err();
    assert!(!rejected.is_retryable());
}

#[tokio::test]
async fn test_download_relative_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 0, 0, 24]))
        .mount(&server)
        .await;

    let bytes = synthesis(&server).download("/files/clip.mp4").await.unwrap();
    assert_eq!(bytes.len(), 4);
}

#[tokio::test]
async fn test_flyover_submits_coordinates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/flyovers"))
        .and(body_partial_json(json!({"lat": 40.0, "lng": -73.5, "altitude": 300})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "fly-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpFlyoverService::new(FlyoverConfig {
        service: service_config(&server),
        clip_duration_secs: 6.0,
        altitude_m: 300,
    })
    .unwrap();

    let handle = service
        .submit(&GenerationRequest::location(Coordinates::new(40.0, -73.5).unwrap(), 6.0))
        .await
        .unwrap();
    assert_eq!(handle.as_str(), "fly-1");
}

#[test]
#[serial]
fn test_config_from_env() {
    std::env::set_var("SYNTHESIS_API_URL", "https://synth.example.com");
    std::env::set_var("SYNTHESIS_CLIP_SECONDS", "4.5");
    std::env::remove_var("SYNTHESIS_API_KEY");

    let config = SynthesisConfig::from_env().unwrap();
    assert_eq!(config.service.base_url, "https://synth.example.com");
    assert!(config.service.api_key.is_none());
    assert!((config.clip_duration_secs - 4.5).abs() < f64::EPSILON);

    std::env::remove_var("SYNTHESIS_API_URL");
    assert!(matches!(
        SynthesisConfig::from_env(),
        Err(SynthesisError::ConfigError(_))
    ));
    std::env::remove_var("SYNTHESIS_CLIP_SECONDS");
}
