//! Wire-level contract tests for the Action API client against a mock
//! HTTP server.
//!
//! The client is blocking, so each call runs on the tokio blocking pool
//! while wiremock serves the canned responses.

use std::sync::Arc;

use serde_json::json;
use wikiclerk::ClerkError;
use wikiclerk::wiki::api::{SaveOptions, WikiApi};
use wikiclerk::wiki::http::{Credentials, HttpWiki, HttpWikiConfig};
use wiremock::matchers::{body_string_contains, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn wiki_for(server: &MockServer, credentials: Option<Credentials>) -> Arc<HttpWiki> {
    Arc::new(HttpWiki::new(HttpWikiConfig {
        api_url: format!("{}/w/api.php", server.uri()),
        stream_url: None,
        dbname: "enwiki".to_owned(),
        user_agent: "wikiclerk-test".to_owned(),
        credentials,
    }))
}

fn bot_credentials() -> Option<Credentials> {
    Some(Credentials {
        username: "WikiClerk@clerk".to_owned(),
        password: "secret".to_owned(),
    })
}

/// Run one blocking client call from an async test.
async fn call<T, F>(wiki: &Arc<HttpWiki>, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&HttpWiki) -> T + Send + 'static,
{
    let wiki = Arc::clone(wiki);
    tokio::task::spawn_blocking(move || f(&wiki))
        .await
        .expect("blocking call")
}

#[tokio::test]
async fn page_fetch_parses_content_and_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("action", "query"))
        .and(query_param("titles", "Sample page"))
        .and(query_param("formatversion", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{
                "pageid": 4242,
                "title": "Sample page",
                "revisions": [{"slots": {"main": {"content": "page body"}}}]
            }]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let page = call(&wiki, |w| w.get_page("Sample page"))
        .await
        .expect("page");

    assert!(page.exists);
    assert_eq!(page.title, "Sample page");
    assert_eq!(page.text, "page body");
    assert_eq!(page.id, Some(4242));
}

#[tokio::test]
async fn missing_pages_read_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"pages": [{"title": "Ghost", "missing": true}]}
        })))
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let page = call(&wiki, |w| w.get_page("Ghost")).await.expect("page");

    assert!(!page.exists);
    assert_eq!(page.text, "");
    assert_eq!(page.id, None);
}

#[tokio::test]
async fn api_errors_surface_with_their_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": "maxlag", "info": "Waiting for a database server"}
        })))
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let err = call(&wiki, |w| w.get_page("Any page"))
        .await
        .expect_err("api error");

    match err {
        ClerkError::Api { code, info } => {
            assert_eq!(code, "maxlag");
            assert!(info.contains("database"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn first_save_logs_in_and_carries_the_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("meta", "tokens"))
        .and(query_param("type", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"tokens": {"logintoken": "logintok"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("action=login"))
        .and(body_string_contains("lgname=WikiClerk%40clerk"))
        .and(body_string_contains("lgtoken=logintok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": {"result": "Success"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("meta", "tokens"))
        .and(query_param_is_missing("type"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"tokens": {"csrftoken": "apitoken+\\"}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("action=edit"))
        .and(body_string_contains("token=apitoken%2B%5C"))
        .and(body_string_contains("bot=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "edit": {"result": "Success"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, bot_credentials());
    let options = SaveOptions {
        minor: false,
        bot_flag: true,
    };
    call(&wiki, move |w| {
        w.save_page("Sandbox", "new text", "clerk edit", &options)
    })
    .await
    .expect("save");
}

#[tokio::test]
async fn stale_edit_tokens_are_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("meta", "tokens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"tokens": {"csrftoken": "freshtok"}}
        })))
        .expect(2)
        .mount(&server)
        .await;
    // First edit attempt is rejected; mounted before the success mock so
    // it consumes exactly one request.
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("action=edit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": "badtoken", "info": "Invalid CSRF token."}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("action=edit"))
        .and(body_string_contains("minor=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "edit": {"result": "Success"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let options = SaveOptions {
        minor: true,
        bot_flag: false,
    };
    call(&wiki, move |w| {
        w.save_page("Sandbox", "retried text", "retry edit", &options)
    })
    .await
    .expect("save after token refresh");
}

#[tokio::test]
async fn username_reads_the_logged_in_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("meta", "userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"userinfo": {"id": 7, "name": "WikiClerk"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let name = call(&wiki, |w| w.username()).await.expect("username");
    assert_eq!(name, "WikiClerk");
}

#[tokio::test]
async fn api_query_returns_the_query_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("action", "query"))
        .and(query_param("list", "allusers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"allusers": [{"name": "ClerkBot"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, None);
    let value = call(&wiki, |w| w.api_query(&[("list", "allusers")]))
        .await
        .expect("query");

    assert_eq!(value["allusers"][0]["name"], json!("ClerkBot"));
}

#[tokio::test]
async fn failed_logins_are_hard_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/w/api.php"))
        .and(query_param("type", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"tokens": {"logintoken": "logintok"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/w/api.php"))
        .and(body_string_contains("action=login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": {"result": "Failed", "reason": "Incorrect password"}
        })))
        .mount(&server)
        .await;

    let wiki = wiki_for(&server, bot_credentials());
    let err = call(&wiki, |w| w.username())
        .await
        .expect_err("login must fail");
    assert!(matches!(err, ClerkError::Api { ref code, .. } if code == "login-failed"));
}
