//! ResourceLoader against a local mock server

use std::time::Duration;

use offline_net::{Fetcher, LoaderConfig, NetError, Request, ResourceLoader};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader() -> ResourceLoader {
    ResourceLoader::new(LoaderConfig::default()).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"v":1}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api/data.json", server.uri())).unwrap();
    let response = loader().fetch(Request::get(url)).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.content_type.as_ref().unwrap().subtype(), mime::JSON);
    assert_eq!(response.text().unwrap(), r#"{"v":1}"#);
}

#[tokio::test]
async fn test_fetch_resolves_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.css"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/missing.css", server.uri())).unwrap();
    let response = loader().fetch(Request::get(url)).await.unwrap();

    assert_eq!(response.status.as_u16(), 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_fetch_timeout_maps_to_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
    let request = Request::get(url).timeout(Duration::from_millis(100));
    let err = loader().fetch(request).await.unwrap_err();

    assert!(matches!(err, NetError::Timeout(_)));
}

#[tokio::test]
async fn test_fetch_unreachable_host_is_an_error() {
    // Nothing listens on the discard port of the loopback interface.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let result = loader().fetch(Request::get(url)).await;

    assert!(result.is_err());
}
