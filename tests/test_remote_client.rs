//! Tests for the remote signing client: wire format, classification, retries.

mod common;

use common::{signed_body, FakeTransport, Scripted};
use firmador::assertion::{Assertion, AssertionIssuer};
use firmador::credential::OneTimePassword;
use firmador::remote::{RemoteSignOutcome, RemoteSigningClient, LAYOUT_ERROR_MESSAGE};
use firmador::signatures::{digest, DigestResult};
use firmador::SignerConfig;
use mockito::Matcher;
use std::time::{Duration, Instant};

const TICKETS: &str = "/firma/v2/files/tickets";

fn fixtures() -> (DigestResult, Assertion) {
    let digest = digest(&b"%PDF-1.7 signed ranges"[..]).unwrap();
    let assertion = AssertionIssuer::new("shared-secret").issue("0123456785", true).unwrap();
    (digest, assertion)
}

fn config(base_url: &str) -> SignerConfig {
    SignerConfig::new(base_url, "shared-secret", "api-token-key").with_retry(3, Duration::from_millis(10))
}

#[test]
fn test_http_request_shape() {
    let mut server = mockito::Server::new();
    let (digest, assertion) = fixtures();

    let mock = server
        .mock("POST", TICKETS)
        .match_header("content-type", "application/json")
        .match_header("otp", "123456")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "api_token_key": "api-token-key",
            "token": assertion.token(),
            "hashes": [{"content": digest.to_base64(), "content-type": "application/pdf"}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(signed_body(b"signature"))
        .create();

    let client = RemoteSigningClient::from_config(&config(&server.url())).unwrap();
    let otp = OneTimePassword::new(" 123456\n");
    let outcome = client.send_with_retry(&digest, &assertion, Some(&otp), true);

    mock.assert();
    assert_eq!(
        outcome,
        RemoteSignOutcome::Success {
            signature: b"signature".to_vec()
        }
    );
}

#[test]
fn test_http_unattended_sends_no_otp() {
    let mut server = mockito::Server::new();
    let (digest, assertion) = fixtures();

    let mock = server
        .mock("POST", TICKETS)
        .match_header("otp", Matcher::Missing)
        .with_status(200)
        .with_body(signed_body(b"sig"))
        .create();

    let client = RemoteSigningClient::from_config(&config(&server.url())).unwrap();
    let otp = OneTimePassword::new("123456");
    let outcome = client.send_with_retry(&digest, &assertion, Some(&otp), false);

    mock.assert();
    assert!(outcome.is_success());
}

#[test]
fn test_http_base_url_path_is_replaced() {
    let mut server = mockito::Server::new();
    let (digest, assertion) = fixtures();
    let mock = server.mock("POST", TICKETS).with_status(200).with_body(signed_body(b"sig")).create();

    let base = format!("{}/ignored/path", server.url());
    let client = RemoteSigningClient::from_config(&config(&base)).unwrap();
    assert!(client.send_with_retry(&digest, &assertion, None, false).is_success());
    mock.assert();
}

#[test]
fn test_http_error_statuses_are_not_retried() {
    let mut server = mockito::Server::new();
    let (digest, assertion) = fixtures();

    let mock = server
        .mock("POST", TICKETS)
        .with_status(500)
        .with_body(r#"{"error":"Servicio no disponible"}"#)
        .expect(1)
        .create();

    let client = RemoteSigningClient::from_config(&config(&server.url())).unwrap();
    let outcome = client.send_with_retry(&digest, &assertion, None, false);

    mock.assert();
    assert_eq!(
        outcome,
        RemoteSignOutcome::Retryable {
            message: "500 - Servicio no disponible".to_string()
        }
    );
}

#[test]
fn test_http_unreachable_server() {
    let (digest, assertion) = fixtures();
    let client = RemoteSigningClient::from_config(&config("http://127.0.0.1:1")).unwrap();
    let outcome = client.send_with_retry(&digest, &assertion, None, false);
    assert!(matches!(outcome, RemoteSignOutcome::Terminal { .. }));
}

#[test]
fn test_classification_table() {
    let (digest, assertion) = fixtures();
    let cases = [
        (200, r#"{"hashes":[{"content":"QQ=="}]}"#.to_string(), "success"),
        (200, r#"{"hashes":[]}"#.to_string(), "terminal"),
        (200, r#"{"hashes":[{"content":null}]}"#.to_string(), "terminal"),
        (400, r#"{"error":"El OTP ingresado no es válido"}"#.to_string(), "invalid"),
        (
            412,
            r#"{"error":"ERROR : Verificación de OTP fallido. Por favor vuelve a intentar"}"#.to_string(),
            "invalid",
        ),
        (400, r#"{"error":"RUT no registrado"}"#.to_string(), "terminal"),
        (500, format!(r#"{{"error":"{}"}}"#, LAYOUT_ERROR_MESSAGE), "terminal"),
        (500, r#"{"error":"Timeout HSM"}"#.to_string(), "retryable"),
        (504, "gateway timeout".to_string(), "retryable"),
        (404, "".to_string(), "terminal"),
    ];

    for (status, body, expected) in cases {
        let transport = FakeTransport::respond(status, &body);
        let client = RemoteSigningClient::with_transport(&config("https://firma.example.cl"), transport).unwrap();
        let outcome = client.send_with_retry(&digest, &assertion, None, false);
        let kind = match &outcome {
            RemoteSignOutcome::Success { signature } => {
                assert_eq!(signature, b"A");
                "success"
            },
            RemoteSignOutcome::InvalidPassword { .. } => "invalid",
            RemoteSignOutcome::Retryable { .. } => "retryable",
            RemoteSignOutcome::Terminal { .. } => "terminal",
        };
        assert_eq!(kind, expected, "status {} body {}", status, body);
        assert_eq!(client.transport().attempts(), 1);
    }
}

#[test]
fn test_transport_failure_is_retried_three_times() {
    let (digest, assertion) = fixtures();
    let config = SignerConfig::new("https://firma.example.cl", "shared-secret", "api-token-key");
    let client = RemoteSigningClient::with_transport(&config, FakeTransport::unreachable()).unwrap();

    let started = Instant::now();
    let outcome = client.send_with_retry(&digest, &assertion, None, false);

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(client.transport().attempts(), 3);
    match outcome {
        RemoteSignOutcome::Terminal { message } => assert!(message.contains("connection refused")),
        other => panic!("expected terminal outcome, got {:?}", other),
    }
}

#[test]
fn test_retry_stops_at_first_response() {
    let (digest, assertion) = fixtures();
    let transport = FakeTransport::new(vec![
        Scripted::Fail("connection reset".to_string()),
        Scripted::Respond(200, signed_body(b"late")),
    ]);
    let client = RemoteSigningClient::with_transport(&config("https://firma.example.cl"), transport).unwrap();

    let outcome = client.send_with_retry(&digest, &assertion, None, false);
    assert_eq!(
        outcome,
        RemoteSignOutcome::Success {
            signature: b"late".to_vec()
        }
    );
    assert_eq!(client.transport().attempts(), 2);
}

#[test]
fn test_request_body_and_otp_header() {
    let (digest, assertion) = fixtures();
    let client =
        RemoteSigningClient::with_transport(&config("https://firma.example.cl/x"), FakeTransport::respond(200, "{}"))
            .unwrap();
    let otp = OneTimePassword::new("  987654 ");

    let attended = client.build_request(&digest, &assertion, Some(&otp), true).unwrap();
    assert_eq!(attended.url, "https://firma.example.cl/firma/v2/files/tickets");
    assert_eq!(attended.otp.as_deref(), Some("987654"));
    assert!(!format!("{:?}", attended).contains("987654"));

    let body: serde_json::Value = serde_json::from_str(&attended.body).unwrap();
    assert_eq!(body["api_token_key"], "api-token-key");
    assert_eq!(body["token"], assertion.token());
    assert_eq!(body["hashes"][0]["content"], digest.to_base64());
    assert_eq!(body["hashes"][0]["content-type"], "application/pdf");

    assert!(client.build_request(&digest, &assertion, Some(&otp), false).unwrap().otp.is_none());
    assert!(client.build_request(&digest, &assertion, None, true).unwrap().otp.is_none());
}
