//! Paginated retrieval of one record category.
//!
//! Pages are requested strictly in offset order until a page comes back
//! shorter than [`PAGE_SIZE`]. Each record is decoded on its own, so one
//! malformed item never costs the rest of the page.

use super::client::RemoteClient;
use crate::error::FetchError;
use crate::models::{Category, Record, SessionToken};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Items requested per page.
pub const PAGE_SIZE: usize = 100;

/// Wire format of the `startDate` query parameter.
const START_DATE_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Restrictions applied to transactional categories.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchFilter {
    /// Only records on or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only records whose identity property matches this value.
    pub identity: Option<String>,
}

impl FetchFilter {
    pub fn new(since: Option<DateTime<Utc>>, identity: Option<&str>) -> Self {
        Self {
            since,
            identity: identity.map(str::to_string),
        }
    }
}

/// Format a timestamp the way the API expects in `startDate`.
pub fn format_start_date(since: DateTime<Utc>) -> String {
    since.format(START_DATE_FORMAT).to_string()
}

/// Build the query string of one page request.
///
/// Date and identity restrictions only apply to transactional categories.
pub fn page_query(
    category: Category,
    offset: usize,
    filter: &FetchFilter,
    identity_property: &str,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("offset", offset.to_string()),
        ("limit", PAGE_SIZE.to_string()),
        ("sort", "true".to_string()),
    ];

    if category.is_transactional() {
        if let Some(since) = filter.since.filter(|s| s.timestamp() != 0) {
            query.push(("startDate", format_start_date(since)));
        }
        if let Some(ref identity) = filter.identity {
            query.push(("property", identity_property.to_string()));
            query.push(("search", identity.clone()));
        }
    }

    query
}

/// Decode each item independently, logging and skipping the malformed ones.
fn decode_page<R: Record>(items: Vec<Value>, offset: usize) -> Vec<R> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<R>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    category = %R::CATEGORY,
                    offset,
                    index,
                    error = %e,
                    "Skipping malformed record"
                );
                None
            }
        })
        .collect()
}

impl RemoteClient {
    /// Retrieve every record of `R`'s category.
    ///
    /// An empty first page is a valid empty result. The page size check uses
    /// the raw item count, so skipped records still count toward a full page.
    pub async fn fetch_all<R: Record>(
        &self,
        token: &SessionToken,
        filter: &FetchFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<R>, FetchError> {
        let category = R::CATEGORY;
        let identity_property = self.settings().identity_property.clone();
        let mut records: Vec<R> = Vec::new();
        let mut offset = 0;
        let mut previous_first_id: Option<Value> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled { category });
            }

            let query = page_query(category, offset, filter, &identity_property);
            let items = self
                .fetch_page(category, token, &query, offset, cancel)
                .await?;
            let page_len = items.len();

            // An upstream ignoring `offset` serves the same page forever.
            let first_id = items.first().and_then(|item| item.get("id")).cloned();
            if offset > 0 && first_id.is_some() && first_id == previous_first_id {
                warn!(
                    category = %category,
                    offset,
                    "Page repeats the previous one, stopping pagination"
                );
                break;
            }
            previous_first_id = first_id;

            records.extend(decode_page::<R>(items, offset));
            debug!(
                category = %category,
                offset,
                page_len,
                total = records.len(),
                "Fetched page"
            );

            if page_len < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FuelType, Product, Supply};
    use crate::remote::client::tests::test_client;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_of(start: usize, len: usize) -> Value {
        let data: Vec<Value> = (start..start + len)
            .map(|id| json!({ "id": id, "fuel": "Diesel", "volume": "10.5" }))
            .collect();
        json!({ "success": true, "data": data, "count": len })
    }

    async fn mount_page(server: &MockServer, route: &str, offset: usize, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(query_param("offset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    fn offsets_requested(requests: &[wiremock::Request]) -> Vec<String> {
        requests
            .iter()
            .map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == "offset")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn test_format_start_date() {
        let since = Utc.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_start_date(since), "2026-03-09T07-05-01Z");
    }

    #[test]
    fn test_page_query_transactional() {
        let since = Utc.with_ymd_and_hms(2026, 3, 9, 7, 5, 1).unwrap();
        let filter = FetchFilter::new(Some(since), Some("ACME"));
        let query = page_query(Category::Supplies, 200, &filter, "company");

        assert!(query.contains(&("offset", "200".to_string())));
        assert!(query.contains(&("limit", "100".to_string())));
        assert!(query.contains(&("sort", "true".to_string())));
        assert!(query.contains(&("startDate", "2026-03-09T07-05-01Z".to_string())));
        assert!(query.contains(&("property", "company".to_string())));
        assert!(query.contains(&("search", "ACME".to_string())));
    }

    #[test]
    fn test_page_query_reference_ignores_filter() {
        let filter = FetchFilter::new(Some(Utc::now()), Some("ACME"));
        let query = page_query(Category::Vehicles, 0, &filter, "company");
        assert_eq!(query.len(), 3);
        assert!(query.iter().all(|(k, _)| *k != "startDate" && *k != "search"));
    }

    #[test]
    fn test_page_query_zero_since_omitted() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let filter = FetchFilter::new(Some(epoch), None);
        let query = page_query(Category::ProductSales, 0, &filter, "company");
        assert!(query.iter().all(|(k, _)| *k != "startDate"));
    }

    #[tokio::test]
    async fn test_pagination_stops_on_short_page() {
        let server = MockServer::start().await;
        mount_page(&server, "/supplies", 0, page_of(0, 100)).await;
        mount_page(&server, "/supplies", 100, page_of(100, 100)).await;
        mount_page(&server, "/supplies", 200, page_of(200, 37)).await;

        let records: Vec<Supply> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 237);
        assert_eq!(records[0].id, 0);
        assert_eq!(records[236].id, 236);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(offsets_requested(&requests), vec!["0", "100", "200"]);
    }

    #[tokio::test]
    async fn test_pagination_stops_when_offset_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supplies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_of(0, 100)))
            .mount(&server)
            .await;

        let records: Vec<Supply> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 100);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(offsets_requested(&requests), vec!["0", "100"]);
    }

    #[tokio::test]
    async fn test_empty_first_page_is_empty_result() {
        let server = MockServer::start().await;
        mount_page(&server, "/products", 0, json!({ "success": true, "data": [], "count": 0 }))
            .await;

        let records: Vec<Product> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let server = MockServer::start().await;
        let body = json!({
            "success": true,
            "data": [
                { "id": 1, "name": "Diesel" },
                { "id": 2, "name": "Gasoline" },
                { "id": "not-a-number", "name": "Broken" },
                { "id": 4, "name": "Ethanol" },
                { "id": 5, "name": null },
            ]
        });
        mount_page(&server, "/fuel/types", 0, body).await;

        let records: Vec<FuelType> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        assert_eq!(records[3].name, "");
    }

    #[tokio::test]
    async fn test_malformed_records_still_count_toward_page_size() {
        let server = MockServer::start().await;
        let mut data: Vec<Value> = (0..99).map(|id| json!({ "id": id })).collect();
        data.push(json!("garbage"));
        mount_page(&server, "/products", 0, json!({ "success": true, "data": data })).await;
        mount_page(&server, "/products", 100, page_of(100, 3)).await;

        let records: Vec<Product> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 102);
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_fails_category() {
        let server = MockServer::start().await;
        mount_page(&server, "/vehicles", 0, page_of(0, 100)).await;
        mount_page(&server, "/vehicles", 100, json!({ "success": false, "data": [] })).await;

        let err = test_client(&server)
            .fetch_all::<crate::models::Vehicle>(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Unsuccessful {
                category: Category::Vehicles,
                offset: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_error_status_fails_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supplies"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .fetch_all::<Supply>(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_envelope_fails_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supplies"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .fetch_all::<Supply>(
                &SessionToken::new("tok"),
                &FetchFilter::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Envelope { .. }));
    }

    #[tokio::test]
    async fn test_transactional_filter_reaches_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supplies"))
            .and(query_param("startDate", "2026-01-01T00-00-00Z"))
            .and(query_param("property", "company"))
            .and(query_param("search", "ACME"))
            .and(query_param("sort", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_of(0, 2)))
            .expect(1)
            .mount(&server)
            .await;

        let since = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let records: Vec<Supply> = test_client(&server)
            .fetch_all(
                &SessionToken::new("tok"),
                &FetchFilter::new(Some(since), Some("ACME")),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_stops_before_requesting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supplies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_of(0, 100)))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = test_client(&server)
            .fetch_all::<Supply>(&SessionToken::new("tok"), &FetchFilter::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
