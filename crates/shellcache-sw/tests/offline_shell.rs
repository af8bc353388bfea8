//! End-to-end: install from a real HTTP server into SQLite, go offline,
//! keep serving.

use std::sync::Arc;

use http::StatusCode;
use shellcache_net::{LoaderConfig, Request, ResourceLoader};
use shellcache_sw::{
    CacheConfig, CacheStorage, FetchDisposition, ResponseSource, ServiceWorkerContainer,
    SqliteBackend,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGES: &[(&str, &str, &str)] = &[
    ("/", "text/html", "<html>home</html>"),
    ("/index.html", "text/html", "<html>shell</html>"),
    ("/assets/css/main.css", "text/css", "body{}"),
    ("/sa.html", "text/html", "<html>sa</html>"),
];

async fn site() -> MockServer {
    let server = MockServer::start().await;
    for (route, content_type, body) in PAGES {
        Mock::given(method("GET"))
            .and(path(*route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", *content_type)
                    .set_body_string(*body),
            )
            .mount(&server)
            .await;
    }
    server
}

fn config(origin: &str) -> CacheConfig {
    CacheConfig::for_origin(origin).with_manifests(
        &["/", "/index.html", "/assets/css/main.css"],
        &["/sa.html"],
    )
}

fn open_container(store: &std::path::Path) -> ServiceWorkerContainer {
    let backend = SqliteBackend::open(store).unwrap();
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());
    let (container, _events) = ServiceWorkerContainer::new(CacheStorage::new(backend), loader);
    container
}

#[tokio::test]
async fn test_offline_after_install() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("caches.db");

    let server = site().await;
    let origin = server.uri();
    let url = |p: &str| Url::parse(&origin).unwrap().join(p).unwrap();

    let container = open_container(&store);
    container.register(config(&origin)).await.unwrap();

    // Online: cached shell file served, revalidated in the background.
    let outcome = container.handle_fetch(Request::get(url("/assets/css/main.css"))).await;
    let disposition = outcome.disposition.clone().unwrap();
    assert_eq!(disposition.source(), Some(ResponseSource::Cache));
    assert_eq!(disposition.response().unwrap().content_type(), Some("text/css"));
    outcome.settled().await.unwrap();

    // Excluded paths are never intercepted.
    let outcome = container.handle_fetch(Request::get(url("/api/leads"))).await;
    assert!(matches!(outcome.disposition, Some(FetchDisposition::Passthrough)));

    drop(server);

    let outcome = container.handle_fetch(Request::navigate(url("/blog/unseen.html"))).await;
    let disposition = outcome.disposition.unwrap();
    assert_eq!(disposition.source(), Some(ResponseSource::ShellFallback));
    assert_eq!(disposition.response().unwrap().text().unwrap(), "<html>shell</html>");

    let outcome = container.handle_fetch(Request::get(url("/assets/images/hero.webp"))).await;
    let response = outcome.disposition.unwrap().response().cloned().unwrap();
    assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.status_text, "Offline");

    // A fresh process over the same store resumes without the network.
    drop(container);
    let restarted = open_container(&store);
    restarted.resume(config(&origin)).await.unwrap();

    let outcome = restarted.handle_fetch(Request::navigate(url("/sa.html"))).await;
    let disposition = outcome.disposition.unwrap();
    assert_eq!(disposition.source(), Some(ResponseSource::Cache));
    assert_eq!(disposition.response().unwrap().text().unwrap(), "<html>sa</html>");
}
