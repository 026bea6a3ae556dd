use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::{RetrievalError, Retriever};
use crate::corpus::{CorpusDecoder, CorpusError};
use crate::select::{StreamingTopKSelector, TopKResult};
use crate::types::ScoredCandidate;

/// Streams a corpus from a URL on every query and ranks it as it arrives.
/// The body may be JSON lines or a JSON array; nothing but the working set
/// and one partial record is held.
#[derive(Debug, Clone)]
pub struct RemoteScan {
    client: reqwest::Client,
    url: String,
}

impl RemoteScan {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    /// Bound connecting and every read, but not the whole download: a long
    /// body is fine as long as it keeps moving.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Rank a corpus delivered as a stream of byte chunks.
///
/// The query is validated before the first chunk is polled. Any stream,
/// decode, or selection error aborts the pass.
pub async fn select_from_stream<S, B>(
    query: &[f32],
    k: usize,
    mut chunks: S,
) -> Result<TopKResult, RetrievalError>
where
    S: Stream<Item = Result<B, CorpusError>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut selector = StreamingTopKSelector::new(query, k)?;
    let mut decoder = CorpusDecoder::new();

    while let Some(chunk) = chunks.next().await {
        for entry in decoder.push(chunk?.as_ref())? {
            selector.offer_entry(&entry)?;
        }
    }
    if let Some(entry) = decoder.finish()? {
        selector.offer_entry(&entry)?;
    }

    tracing::debug!(
        format = decoder.format(),
        records = decoder.records_read(),
        kept = selector.len(),
        "corpus stream drained"
    );
    Ok(selector.finish())
}

#[async_trait]
impl Retriever for RemoteScan {
    fn name(&self) -> &str {
        "remote"
    }

    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredCandidate>, RetrievalError> {
        // Reject a bad query before paying for the download.
        StreamingTopKSelector::new(query, k)?;

        let resp = self.client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CorpusError::Unavailable(format!("{}: {e}", self.url)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CorpusError::Unavailable(format!("{}: HTTP {status}", self.url)).into());
        }

        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| CorpusError::Unavailable(e.to_string())));
        let result = select_from_stream(query, k, Box::pin(chunks)).await?;
        Ok(result.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::SelectError;
    use futures::stream;

    fn ok_chunks(chunks: Vec<&'static str>) -> impl Stream<Item = Result<&'static str, CorpusError>> + Unpin {
        stream::iter(chunks.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn ranks_entries_split_across_chunks() {
        let chunks = ok_chunks(vec![
            "{\"line\":\"a\",\"embedding\":[1.0,",
            "0.0]}\n{\"line\":\"b\",\"embedding\":[0.0,1.0]}\n{\"line\":\"c\",",
            "\"embedding\":[0.9,0.1]}",
        ]);
        let r = select_from_stream(&[1.0, 0.0], 2, chunks).await.unwrap();
        assert_eq!(r.labels(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn stream_error_aborts_pass() {
        let chunks = stream::iter(vec![
            Ok("{\"line\":\"a\",\"embedding\":[1.0,0.0]}\n"),
            Err(CorpusError::Unavailable("connection reset".into())),
        ]);
        let err = select_from_stream(&[1.0, 0.0], 2, chunks).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Corpus(CorpusError::Unavailable(_))));
    }

    #[tokio::test]
    async fn corrupt_line_aborts_pass() {
        let chunks = ok_chunks(vec!["{\"line\":\"a\",\"embedding\":[1.0,0.0]}\nnot json\n"]);
        let err = select_from_stream(&[1.0, 0.0], 2, chunks).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Corpus(CorpusError::Corrupted(_))));
    }

    #[tokio::test]
    async fn dimension_mismatch_aborts_pass() {
        let chunks = ok_chunks(vec!["{\"line\":\"a\",\"embedding\":[1.0,0.0,0.0]}\n"]);
        let err = select_from_stream(&[1.0, 0.0], 2, chunks).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Select(SelectError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn empty_query_rejected_before_fetch() {
        // Unroutable URL: reaching the network would fail with Corpus, not Select.
        let scan = RemoteScan::new("http://127.0.0.1:9/corpus.ndjson");
        let err = scan.top_k(&[], 3).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Select(SelectError::InvalidArgument(_))));
    }

    mod http {
        use super::*;
        use crate::retrieval::test_server::serve;
        use axum::Router;
        use axum::body::Body;
        use axum::http::StatusCode;
        use axum::routing::get;

        const NDJSON: &str = concat!(
            r#"{"line":"Save","embedding":[1.0,0.0]}"#, "\n",
            r#"{"line":"Cancel","embedding":[0.0,1.0]}"#, "\n",
            r#"{"line":"Save changes","embedding":[0.9,0.1]}"#, "\n",
        );

        async fn scan_serving(body: &'static str) -> RemoteScan {
            let base = serve(Router::new().route("/corpus", get(move || async move { body }))).await;
            RemoteScan::new(format!("{base}/corpus"))
        }

        fn labels(ranked: &[ScoredCandidate]) -> Vec<&str> {
            ranked.iter().map(|c| c.label.as_str()).collect()
        }

        #[tokio::test]
        async fn ranks_ndjson_body() {
            let scan = scan_serving(NDJSON).await;
            let top = scan.top_k(&[1.0, 0.0], 2).await.unwrap();
            assert_eq!(labels(&top), vec!["Save", "Save changes"]);
        }

        #[tokio::test]
        async fn ranks_json_array_body() {
            let scan = scan_serving(
                r#"[{"line":"Save","embedding":[1.0,0.0]},{"line":"Cancel","embedding":[0.0,1.0]}]"#,
            )
            .await;
            let top = scan.top_k(&[0.0, 1.0], 1).await.unwrap();
            assert_eq!(labels(&top), vec!["Cancel"]);
        }

        #[tokio::test]
        async fn not_found_is_unavailable() {
            let base = serve(Router::new()).await;
            let err = RemoteScan::new(format!("{base}/missing.ndjson")).top_k(&[1.0, 0.0], 2).await.unwrap_err();
            match err {
                RetrievalError::Corpus(CorpusError::Unavailable(msg)) => assert!(msg.contains("404"), "{msg}"),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn server_error_is_unavailable() {
            let base = serve(Router::new().route(
                "/corpus",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            ))
            .await;
            let err = RemoteScan::new(format!("{base}/corpus")).top_k(&[1.0, 0.0], 2).await.unwrap_err();
            assert!(matches!(err, RetrievalError::Corpus(CorpusError::Unavailable(_))));
        }

        #[tokio::test]
        async fn truncated_body_is_corrupted() {
            let scan = scan_serving(concat!(
                r#"{"line":"Save","embedding":[1.0,0.0]}"#, "\n",
                r#"{"line":"Cancel","embed"#,
            ))
            .await;
            let err = scan.top_k(&[1.0, 0.0], 2).await.unwrap_err();
            assert!(matches!(err, RetrievalError::Corpus(CorpusError::Corrupted(_))));

            let scan = scan_serving(r#"[{"line":"Save","embedding":[1.0,0.0]},"#).await;
            let err = scan.top_k(&[1.0, 0.0], 2).await.unwrap_err();
            assert!(matches!(err, RetrievalError::Corpus(CorpusError::Corrupted(_))));
        }

        #[tokio::test]
        async fn body_aborted_mid_stream_is_unavailable() {
            let base = serve(Router::new().route(
                "/corpus",
                get(|| async {
                    Body::from_stream(stream::iter(vec![
                        Ok(r#"{"line":"Save","embedding":[1.0,0.0]}"#),
                        Err(std::io::Error::other("connection reset")),
                    ]))
                }),
            ))
            .await;
            let err = RemoteScan::new(format!("{base}/corpus")).top_k(&[1.0, 0.0], 2).await.unwrap_err();
            assert!(matches!(err, RetrievalError::Corpus(CorpusError::Unavailable(_))));
        }

        #[tokio::test]
        async fn stalled_body_times_out() {
            let base = serve(Router::new().route(
                "/corpus",
                get(|| async {
                    let first = stream::iter(vec![Ok::<_, std::io::Error>(
                        "{\"line\":\"Save\",\"embedding\":[1.0,0.0]}\n",
                    )]);
                    Body::from_stream(first.chain(stream::pending()))
                }),
            ))
            .await;
            let scan = RemoteScan::with_timeout(format!("{base}/corpus"), Duration::from_millis(200)).unwrap();
            let res = tokio::time::timeout(Duration::from_secs(10), scan.top_k(&[1.0, 0.0], 2))
                .await
                .expect("read timeout should end the pass");
            assert!(matches!(res, Err(RetrievalError::Corpus(CorpusError::Unavailable(_)))));
        }
    }
}
