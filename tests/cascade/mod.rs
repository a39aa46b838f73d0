use async_trait::async_trait;
use ragsync::cascade::{
    evaluate_post_fetch, evaluate_pre_fetch, parse_retry_after_ms, AdaptiveBackoff, CascadeInputs, HeadProber,
    HeadResult, PostFetchDecision, PreFetchDecision,
};
use std::sync::atomic::{AtomicUsize, Ordering};

struct SequenceProber {
    calls: AtomicUsize,
    responses: Vec<HeadResult>,
}

#[async_trait]
impl HeadProber for SequenceProber {
    async fn head(&self, _url: &str) -> Result<HeadResult, String> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[i.min(self.responses.len() - 1)].clone())
    }
}

fn base_inputs(url: &str) -> CascadeInputs<'_> {
    CascadeInputs {
        url,
        source_sync_complete: true,
        markdown_mirror_configured: false,
        markdown_mirror_has_url: true,
        force_full_sync: false,
        sitemap_lastmod: None,
        stored_lastmod: None,
        stored_etag: None,
    }
}

#[tokio::test]
async fn no_stored_etag_always_fetches_even_on_200() {
    let inputs = base_inputs("https://example.com/first-visit");
    let mut backoff = AdaptiveBackoff::new();
    let prober = SequenceProber {
        calls: AtomicUsize::new(0),
        responses: vec![HeadResult { status: 200, etag: Some("v1".into()), retry_after_ms: None }],
    };
    let decision = evaluate_pre_fetch(&inputs, &mut backoff, &prober).await;
    assert_eq!(decision, PreFetchDecision::Fetch);
}

#[tokio::test]
async fn head_429_retries_once_then_succeeds_on_matching_etag() {
    let mut inputs = base_inputs("https://example.com/");
    inputs.stored_etag = Some("same-etag");
    let mut backoff = AdaptiveBackoff::new();
    let prober = SequenceProber {
        calls: AtomicUsize::new(0),
        responses: vec![
            HeadResult { status: 429, etag: None, retry_after_ms: Some(1) },
            HeadResult { status: 200, etag: Some("same-etag".into()), retry_after_ms: None },
        ],
    };
    let decision = evaluate_pre_fetch(&inputs, &mut backoff, &prober).await;
    assert_eq!(decision, PreFetchDecision::Skip);
}

#[tokio::test]
async fn layer_ordering_sitemap_beats_force_flag_when_not_forced() {
    // sanity: with force_full_sync false and source complete, sitemap layer
    // alone decides without ever touching the prober.
    let mut inputs = base_inputs("https://example.com/");
    inputs.sitemap_lastmod = Some("2024-01-01");
    inputs.stored_lastmod = Some("2024-01-01");
    let mut backoff = AdaptiveBackoff::new();
    let prober = SequenceProber { calls: AtomicUsize::new(0), responses: vec![] };
    let decision = evaluate_pre_fetch(&inputs, &mut backoff, &prober).await;
    assert_eq!(decision, PreFetchDecision::Skip);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn post_fetch_decision_is_order_independent() {
    let stored = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    let new_reordered = vec!["z".to_string(), "x".to_string(), "y".to_string()];
    assert_eq!(evaluate_post_fetch(&new_reordered, &stored), PostFetchDecision::SkipEmbedding);
}

#[test]
fn post_fetch_decision_detects_count_changes() {
    let stored = vec!["x".to_string(), "y".to_string()];
    let new_hashes = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    assert_eq!(evaluate_post_fetch(&new_hashes, &stored), PostFetchDecision::FetchAndEmbed);
}

#[test]
fn parse_retry_after_clamps_to_minimum_on_zero() {
    assert_eq!(parse_retry_after_ms("0", 1000), 1000);
}

#[test]
fn parse_retry_after_accepts_rfc2822_http_date_in_the_future() {
    let future = chrono::Utc::now() + chrono::Duration::seconds(30);
    let header = future.to_rfc2822();
    let ms = parse_retry_after_ms(&header, 1000);
    assert!(ms >= 1000);
}

#[test]
fn parse_retry_after_garbage_falls_back_to_minimum() {
    assert_eq!(parse_retry_after_ms("not-a-date-or-number", 1500), 1500);
}
