//! Integration tests for the album crawl pipeline.
//!
//! A mock server plays the listing host; downloads go to a recording
//! manager or to the real file downloader, depending on the test.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ripper_core::download::FailureType;
use ripper_core::{
    AlbumRipper, AlbumUrl, CrawlContext, DownloadFailure, DownloadManager, DownloadRequest,
    FileDownloader, GuessPolicy, HttpTimeouts, RateLimiter, ResolutionMode, ResolveStrategy,
    RipError, RipOptions, RetryPolicy, get_gid,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path, path_regex, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

const ALBUM: &str = "https://idol.sankakucomplex.com/?tags=foo";
const SESSION_COOKIE: &str = "_sankakucomplex_session=abc123";

/// Download manager that records requests and fails URLs containing a marker.
#[derive(Default)]
struct RecordingManager {
    requests: Mutex<Vec<DownloadRequest>>,
    fail_markers: HashSet<String>,
}

impl RecordingManager {
    fn failing(markers: &[&str]) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_markers: markers.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadManager for RecordingManager {
    async fn enqueue(&self, request: DownloadRequest) -> Result<PathBuf, DownloadFailure> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_markers.iter().any(|m| request.url.contains(m)) {
            return Err(DownloadFailure::new(
                &request.url,
                "HTTP 404",
                FailureType::Permanent,
            ));
        }
        Ok(PathBuf::from(format!("{}asset", request.filename_prefix)))
    }
}

fn listing_html(post_ids: &[&str], next: Option<&str>) -> String {
    let thumbs: String = post_ids
        .iter()
        .map(|id| {
            format!(
                r#"<span class="thumb blacklisted" id="p{id}"><a href="/post/show/{id}"><img class="preview" src="//c.sankakucomplex.com/data/preview/ab/cd/{id}.jpg"></a></span>"#
            )
        })
        .collect();
    let pagination = next
        .map(|n| format!(r#"<div class="pagination" next-page-url="{n}"></div>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body><div class="content"><div>{thumbs}</div>{pagination}</div></body></html>"#
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html")
}

fn context() -> CrawlContext {
    CrawlContext::new(Arc::new(RateLimiter::disabled()), HttpTimeouts::default()).unwrap()
}

fn ripper_for(server: &MockServer, ctx: CrawlContext, options: RipOptions) -> AlbumRipper {
    AlbumRipper::new(
        AlbumUrl::parse(ALBUM).unwrap(),
        ctx,
        RipOptions {
            base_url: Some(Url::parse(&server.uri()).unwrap()),
            ..options
        },
    )
}

async fn mount_page(server: &MockServer, page: Option<&str>, body: String) {
    let mock = Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("tags", "foo"));
    let mock = match page {
        Some(page) => mock.and(query_param("page", page)),
        None => mock.and(query_param_is_missing("page")),
    };
    mock.respond_with(html(body)).expect(1).mount(server).await;
}

async fn forbid_post_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/post/show/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_two_page_album_in_guess_mode_needs_no_post_pages() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(
        &server,
        None,
        listing_html(&["100", "101"], Some("/?tags=foo&page=2")),
    )
    .await;
    mount_page(&server, Some("2"), listing_html(&["102"], None)).await;
    forbid_post_pages(&server).await;

    let ripper = ripper_for(&server, context(), RipOptions::default());
    let candidates = ripper.collect_candidates().await.unwrap();

    let ids: Vec<&str> = candidates.iter().map(|c| c.post_id.as_str()).collect();
    assert_eq!(ids, ["100", "101", "102"]);
    assert!(
        candidates
            .iter()
            .all(|c| c.mode == ResolutionMode::Guessed)
    );
    assert_eq!(
        candidates[0].url,
        "http://cs.sankakucomplex.com/data/ab/cd/100.jpg?100"
    );
    assert_eq!(ripper.pages_fetched(), 2);
    assert_eq!(ripper.resolver().authoritative_fetches(), 0);
}

#[tokio::test]
async fn test_pagination_stops_after_last_page() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["1"], Some("/?tags=foo&page=2"))).await;
    mount_page(&server, Some("2"), listing_html(&["2"], Some("/?tags=foo&page=3"))).await;
    mount_page(&server, Some("3"), listing_html(&["3"], None)).await;
    // A fourth page exists but nothing points at it.
    Mock::given(method("GET"))
        .and(query_param("page", "4"))
        .respond_with(html(listing_html(&["4"], None)))
        .expect(0)
        .mount(&server)
        .await;

    let manager = RecordingManager::default();
    let ripper = ripper_for(&server, context(), RipOptions::default());
    let summary = ripper.rip(&manager).await.unwrap();

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.downloaded, 3);
    assert_eq!(ripper.pages_fetched(), 3);
}

#[tokio::test]
async fn test_self_referencing_next_pointer_is_not_refetched() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["1"], Some("/?tags=foo&page=2"))).await;
    mount_page(&server, Some("2"), listing_html(&["2"], Some("/?tags=foo&page=2"))).await;

    let ripper = ripper_for(&server, context(), RipOptions::default());
    let candidates = ripper.collect_candidates().await.unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(ripper.pages_fetched(), 2);
}

#[tokio::test]
async fn test_failed_guess_falls_back_to_post_page() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["200"], None)).await;
    Mock::given(method("GET"))
        .and(path("/post/show/200"))
        .respond_with(html(
            r#"<html><body><div id="post-content"><a id="image-link" href="//cs.sankakucomplex.com/data/ef/01/real.png?e=1"><img id="image" src="//cs.sankakucomplex.com/data/sample/real.jpg"></a></div></body></html>"#
                .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let manager = RecordingManager::failing(&["/200.jpg"]);
    let ripper = ripper_for(&server, context(), RipOptions::default());
    let summary = ripper.rip(&manager).await.unwrap();

    let requests = manager.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].url,
        "http://cs.sankakucomplex.com/data/ab/cd/200.jpg?200"
    );
    assert_eq!(
        requests[1].url,
        "http://cs.sankakucomplex.com/data/ef/01/real.png?e=1"
    );
    assert_eq!(requests[1].filename_prefix, "200_");
    assert_eq!(requests[1].post_id, "200");

    assert_eq!(summary.fallbacks, 1);
    assert_eq!(summary.guessed, 1);
    assert_eq!(summary.authoritative, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_fallback_runs_once_when_authoritative_download_also_fails() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["201", "202"], None)).await;
    Mock::given(method("GET"))
        .and(path("/post/show/201"))
        .respond_with(html(
            r#"<div id="post-content"><a id="image-link" href="//cs.sankakucomplex.com/data/gone.png"></a></div>"#
                .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let manager = RecordingManager::failing(&["/201.jpg", "gone.png"]);
    let ripper = ripper_for(&server, context(), RipOptions::default());
    let summary = ripper.rip(&manager).await.unwrap();

    assert_eq!(manager.requests().len(), 3);
    assert_eq!(summary.fallbacks, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(ripper.resolver().authoritative_fetches(), 1);
}

#[tokio::test]
async fn test_guess_first_post_page_fetches_keep_post_page_spacing() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["500", "501", "502"], None)).await;

    let post_fetches: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&post_fetches);
    Mock::given(method("GET"))
        .and(path_regex(r"^/post/show/\d+$"))
        .respond_with(move |_: &wiremock::Request| {
            recorded.lock().unwrap().push(Instant::now());
            html(
                r#"<div id="post-content"><a id="image-link" href="//cs.sankakucomplex.com/data/x/full.png"></a></div>"#
                    .to_string(),
            )
        })
        .expect(3)
        .mount(&server)
        .await;

    let post_interval = Duration::from_millis(300);
    let ctx = CrawlContext::new(
        Arc::new(RateLimiter::new(Duration::from_millis(20))),
        HttpTimeouts::default(),
    )
    .unwrap();
    let manager = RecordingManager::failing(&["sankakucomplex.com"]);
    let ripper = ripper_for(
        &server,
        ctx,
        RipOptions {
            post_page_interval: Some(post_interval),
            ..RipOptions::default()
        },
    );
    let summary = ripper.rip(&manager).await.unwrap();

    assert_eq!(summary.fallbacks, 3);
    assert_eq!(summary.failed, 3);
    let fetched_at = post_fetches.lock().unwrap().clone();
    assert_eq!(fetched_at.len(), 3);
    for pair in fetched_at.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= post_interval,
            "post page fetches only {gap:?} apart under a 20ms limiter"
        );
    }
}

#[tokio::test]
async fn test_session_cookie_from_first_page_is_sent_to_later_pages() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param_is_missing("page"))
        .respond_with(
            html(listing_html(&["1"], Some("/?tags=foo&page=2")))
                .insert_header("set-cookie", format!("{SESSION_COOKIE}; Path=/").as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("page", "2"))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(html(listing_html(&["2"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = context();
    let ripper = ripper_for(&server, ctx.clone(), RipOptions::default());
    let candidates = ripper.collect_candidates().await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert!(ctx.session().is_sealed());
    assert_eq!(ctx.session().get("_sankakucomplex_session").as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_authoritative_strategy_skips_posts_without_asset_link() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_page(&server, None, listing_html(&["300", "301"], None)).await;
    Mock::given(method("GET"))
        .and(path("/post/show/300"))
        .respond_with(html("<html><body><p>deleted</p></body></html>".to_string()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/post/show/301"))
        .respond_with(html(
            r#"<div id="post-content"><img id="image" src="//cs.sankakucomplex.com/data/301.webp"></div>"#
                .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let ripper = ripper_for(
        &server,
        context(),
        RipOptions {
            strategy: ResolveStrategy::Authoritative,
            ..RipOptions::default()
        },
    );
    let candidates = ripper.collect_candidates().await.unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].post_id, "301");
    assert_eq!(candidates[0].mode, ResolutionMode::Authoritative);
    assert_eq!(candidates[0].url, "http://cs.sankakucomplex.com/data/301.webp");
    assert_eq!(ripper.stats().snapshot().skipped, 1);
}

#[tokio::test]
async fn test_listing_fetch_failure_aborts_crawl() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let ripper = ripper_for(&server, context(), RipOptions::default());
    let err = ripper.collect_candidates().await.unwrap_err();

    match err {
        RipError::PageFetch { url, reason } => {
            assert!(url.contains("tags=foo"), "error should carry the page URL: {url}");
            assert!(reason.contains("503"));
        }
        other => panic!("expected PageFetch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_crawl_issues_no_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html(listing_html(&["1"], None)))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = context();
    ctx.cancel();
    let ripper = ripper_for(&server, ctx, RipOptions::default());
    let err = ripper.collect_candidates().await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_file_downloader_end_to_end_with_fallback() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let thumbs = r#"<html><body><div class="content"><div>
        <span class="thumb" id="p400"><a href="/post/show/400"><img src="/data/preview/ab/400.png"></a></span>
        <span class="thumb" id="p401"><a href="/post/show/401"><img src="/data/preview/ab/401.png"></a></span>
        </div></div></body></html>"#;
    mount_page(&server, None, thumbs.to_string()).await;

    Mock::given(method("GET"))
        .and(path("/data/ab/400.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-400".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/ab/401.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let host = Url::parse(&server.uri()).unwrap();
    let authority = format!(
        "{}:{}",
        host.host_str().unwrap(),
        host.port_or_known_default().unwrap()
    );
    Mock::given(method("GET"))
        .and(path("/post/show/401"))
        .respond_with(html(format!(
            r#"<div id="post-content"><a id="image-link" href="//{authority}/data/real/401.png"></a></div>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/real/401.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-401".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    // Keep the mock server's host: no preview-to-full host rewrite.
    let guess = GuessPolicy {
        preview_host_prefix: String::new(),
        ..GuessPolicy::default()
    };
    let limiter = Arc::new(RateLimiter::disabled());
    let ctx = CrawlContext::new(Arc::clone(&limiter), HttpTimeouts::default()).unwrap();
    let ripper = ripper_for(
        &server,
        ctx,
        RipOptions {
            guess,
            ..RipOptions::default()
        },
    );

    let dir = TempDir::new().unwrap();
    let target = dir.path().join(ripper.album().folder_name());
    let downloader = FileDownloader::new(&target, limiter, HttpTimeouts::default())
        .unwrap()
        .with_retry_policy(RetryPolicy::with_max_attempts(1));

    let summary = ripper.rip(&downloader).await.unwrap();

    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.fallbacks, 1);
    assert_eq!(summary.failed, 0);
    assert!(target.ends_with("sankakucomplex_idol_foo"));
    assert_eq!(std::fs::read(target.join("400_400.jpg")).unwrap(), b"jpeg-400");
    assert_eq!(std::fs::read(target.join("401_401.png")).unwrap(), b"png-401");
}

#[test]
fn test_gid_for_valid_and_invalid_album_urls() {
    assert_eq!(
        get_gid("http://idol.sankakucomplex.com/?tags=foo%20bar").unwrap(),
        "idol_foo bar"
    );
    assert_eq!(
        get_gid("https://chan.sankakucomplex.com/post/index?tags=a_b&page=3").unwrap(),
        "chan_a_b"
    );
    for bad in [
        "https://example.com/?tags=foo",
        "https://idol.sankakucomplex.com/post/show/100",
        "ftp://idol.sankakucomplex.com/?tags=foo",
        "not a url",
    ] {
        let err = AlbumUrl::parse(bad).unwrap_err();
        assert!(
            matches!(err, RipError::InvalidUrl { .. }),
            "expected InvalidUrl for {bad}"
        );
    }
}
