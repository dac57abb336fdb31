//! Assertions over the multipart body the adapter sends.

use super::helpers::*;
use crate::stt::interface::{
    SpeakerSample, SttEngine, TranscribeParams, TranscriptionModel,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn captured_body(server: &MockServer) -> String {
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    String::from_utf8_lossy(&requests[0].body).to_string()
}

fn diarized_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "text": "ok",
        "segments": [{"id": "seg_0", "start": 0.0, "end": 1.0, "text": "ok", "speaker": "A"}]
    }))
}

#[tokio::test]
async fn whisper_request_asks_for_both_timestamp_granularities() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "language": "en", "duration": 1.0, "text": "ok",
            "segments": [], "words": []
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let audio = write_fake_audio(&tmp);
    transcriber_for(&server.uri())
        .transcribe(
            &audio,
            &TranscribeParams::default(),
            &test_job(&tmp),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let body = captured_body(&server).await;
    assert!(body.contains(r#"name="model""#));
    assert!(body.contains("whisper-1"));
    assert!(body.contains(r#"name="response_format""#));
    assert!(body.contains("verbose_json"));
    assert!(body.contains(r#"name="timestamp_granularities[]""#));
    assert!(body.contains("\r\nword\r\n") || body.contains("\nword\n"));
    assert!(body.contains("segment"));
    // Bearer auth header, not a form field.
    let requests = server.received_requests().await.unwrap();
    let auth = requests[0].headers.get("authorization").unwrap();
    assert_eq!(auth.to_str().unwrap(), "Bearer sk-test");
}

#[tokio::test]
async fn diarize_request_carries_indexed_speaker_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(diarized_ok())
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let audio = write_fake_audio(&tmp);
    let params = TranscribeParams {
        model: TranscriptionModel::Gpt4oDiarize,
        speaker_references: vec![
            SpeakerSample {
                speaker_label: "A".to_string(),
                start_time: 0.0,
                end_time: 3.0,
                local_audio_path: tmp.path().join("speaker_A.mp3"),
                data_url: "data:audio/mp3;base64,QUFB".to_string(),
            },
            SpeakerSample {
                speaker_label: "B".to_string(),
                start_time: 5.0,
                end_time: 8.0,
                local_audio_path: tmp.path().join("speaker_B.mp3"),
                data_url: "data:audio/mp3;base64,QkJC".to_string(),
            },
        ],
        ..Default::default()
    };

    transcriber_for(&server.uri())
        .transcribe(&audio, &params, &test_job(&tmp), &CancellationToken::new())
        .await
        .unwrap();

    let body = captured_body(&server).await;
    assert!(body.contains(r#"name="chunking_strategy""#));
    // Indexed field names, not PHP-style [] repetition.
    assert!(body.contains(r#"name="known_speaker_names[0]""#));
    assert!(body.contains(r#"name="known_speaker_references[0]""#));
    assert!(body.contains(r#"name="known_speaker_names[1]""#));
    assert!(body.contains(r#"name="known_speaker_references[1]""#));
    assert!(!body.contains(r#"name="known_speaker_names[]""#));
    assert!(body.contains("data:audio/mp3;base64,QUFB"));
    assert!(body.contains("data:audio/mp3;base64,QkJC"));
}

#[tokio::test]
async fn speaker_references_attach_regardless_of_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "language": "en", "duration": 1.0, "text": "ok",
            "segments": [], "words": []
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let audio = write_fake_audio(&tmp);
    let params = TranscribeParams {
        model: TranscriptionModel::Whisper,
        speaker_references: vec![SpeakerSample {
            speaker_label: "A".to_string(),
            start_time: 0.0,
            end_time: 3.0,
            local_audio_path: tmp.path().join("speaker_A.mp3"),
            data_url: "data:audio/mp3;base64,QUFB".to_string(),
        }],
        ..Default::default()
    };

    transcriber_for(&server.uri())
        .transcribe(&audio, &params, &test_job(&tmp), &CancellationToken::new())
        .await
        .unwrap();

    let body = captured_body(&server).await;
    assert!(body.contains(r#"name="known_speaker_names[0]""#));
    assert!(body.contains(r#"name="known_speaker_references[0]""#));
}

#[tokio::test]
async fn language_prompt_and_temperature_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(diarized_ok())
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let audio = write_fake_audio(&tmp);
    let params = TranscribeParams {
        model: TranscriptionModel::Gpt4oDiarize,
        language: Some("yue".to_string()),
        prompt: Some("廣東話會議錄音".to_string()),
        temperature: Some(0.2),
        ..Default::default()
    };

    transcriber_for(&server.uri())
        .transcribe(&audio, &params, &test_job(&tmp), &CancellationToken::new())
        .await
        .unwrap();

    let body = captured_body(&server).await;
    assert!(body.contains(r#"name="language""#));
    assert!(body.contains("yue"));
    assert!(body.contains(r#"name="prompt""#));
    assert!(body.contains("廣東話會議錄音"));
    assert!(body.contains(r#"name="temperature""#));
    assert!(body.contains("0.2"));
}

#[tokio::test]
async fn upload_is_recorded_in_job_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .respond_with(diarized_ok())
        .mount(&server)
        .await;

    let tmp = tempfile::TempDir::new().unwrap();
    let audio = write_fake_audio(&tmp);
    let job = test_job(&tmp);
    let params = TranscribeParams {
        model: TranscriptionModel::Gpt4oDiarize,
        ..Default::default()
    };
    transcriber_for(&server.uri())
        .transcribe(&audio, &params, &job, &CancellationToken::new())
        .await
        .unwrap();

    let log = std::fs::read_to_string(tmp.path().join("transcription.log")).unwrap();
    assert!(log.contains("uploading"));
    assert!(log.contains("bytes"));
    assert!(log.contains("transcription complete"));
    // The credential never reaches the diagnostic log.
    assert!(!log.contains("sk-test"));
}
