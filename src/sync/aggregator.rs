//! Concurrent fan-out over the record categories.
//!
//! Every category gets its own tokio task. Each task returns a tagged
//! [`CategoryRecords`] which is routed into its own [`RecordSet`] field once
//! all tasks have joined, so the assembled set never depends on which task
//! finished first.

use crate::error::FetchError;
use crate::models::{
    Category, CategoryRecords, Driver, Employee, FuelType, Payload, Product, ProductSale,
    RecordSet, SessionToken, Subject, Supply, Vehicle,
};
use crate::remote::{FetchFilter, RemoteClient};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How category failures are consolidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Any failed category fails the whole set; siblings are cancelled.
    FailFast,
    /// A failed category is logged and left empty.
    Tolerant,
}

/// Runs category fetches concurrently and assembles their results.
#[derive(Debug, Clone)]
pub struct Aggregator {
    client: RemoteClient,
}

impl Aggregator {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    /// Fetch everything one subject's payload needs.
    ///
    /// With `reference` present only the transactional categories are
    /// fetched and the reference snapshot is copied in. Any category failure
    /// aborts the subject.
    pub async fn aggregate(
        &self,
        subject: &Subject,
        token: &SessionToken,
        since: DateTime<Utc>,
        reference: Option<&RecordSet>,
        cancel: &CancellationToken,
    ) -> Result<Payload, FetchError> {
        let fetched_at = Utc::now();
        let filter = FetchFilter::new(Some(since), subject.identity());
        let categories: &[Category] = match reference {
            Some(_) => &Category::TRANSACTIONAL,
            None => &Category::ALL,
        };

        let mut records = self
            .fetch_categories(categories, token, &filter, ErrorPolicy::FailFast, cancel)
            .await?;
        if let Some(reference) = reference {
            records.merge_reference(reference);
        }

        Ok(Payload {
            subject_id: subject.id,
            fetched_at,
            records,
        })
    }

    /// Fetch the reference categories once for the whole run.
    ///
    /// Failed categories are left empty so the run can still deliver the
    /// rest; only cancellation is reported.
    pub async fn fetch_reference(
        &self,
        token: &SessionToken,
        cancel: &CancellationToken,
    ) -> Result<RecordSet, FetchError> {
        info!("Fetching reference data shared by all subjects...");
        self.fetch_categories(
            &Category::REFERENCE,
            token,
            &FetchFilter::default(),
            ErrorPolicy::Tolerant,
            cancel,
        )
        .await
    }

    /// Fan out one task per category, wait for all of them, then
    /// consolidate in category order under `policy`.
    pub async fn fetch_categories(
        &self,
        categories: &[Category],
        token: &SessionToken,
        filter: &FetchFilter,
        policy: ErrorPolicy,
        cancel: &CancellationToken,
    ) -> Result<RecordSet, FetchError> {
        let scope = cancel.child_token();

        let tasks: Vec<(Category, JoinHandle<Result<CategoryRecords, FetchError>>)> = categories
            .iter()
            .map(|&category| {
                let handle = self.spawn_fetch(
                    category,
                    token.clone(),
                    filter.clone(),
                    policy,
                    scope.clone(),
                );
                (category, handle)
            })
            .collect();

        let outcomes = join_all(
            tasks
                .into_iter()
                .map(|(category, handle)| async move { (category, handle.await) }),
        )
        .await;

        let mut records = RecordSet::default();
        let mut failure: Option<FetchError> = None;
        let mut cancelled: Option<FetchError> = None;

        for (category, joined) in outcomes {
            let outcome = joined.unwrap_or_else(|e| {
                Err(FetchError::Task {
                    category,
                    message: e.to_string(),
                })
            });

            match outcome {
                Ok(fetched) => {
                    info!("Successfully fetched {} ({} records).", category, fetched.len());
                    records.insert(fetched);
                }
                Err(e) if e.is_cancelled() => {
                    cancelled.get_or_insert(e);
                }
                Err(e) => match policy {
                    ErrorPolicy::FailFast => {
                        debug!(category = %e.category(), "Aborting aggregation: {}", e);
                        failure.get_or_insert(e);
                    }
                    ErrorPolicy::Tolerant => {
                        warn!("Failed to fetch {}: {}. Continuing without it.", category, e);
                        records.insert(CategoryRecords::empty(category));
                    }
                },
            }
        }

        if let Some(e) = failure.or(cancelled) {
            return Err(e);
        }
        Ok(records)
    }

    fn spawn_fetch(
        &self,
        category: Category,
        token: SessionToken,
        filter: FetchFilter,
        policy: ErrorPolicy,
        scope: CancellationToken,
    ) -> JoinHandle<Result<CategoryRecords, FetchError>> {
        let client = self.client.clone();

        tokio::spawn(async move {
            debug!("Fetching {}...", category);
            let result = fetch_category(&client, category, &token, &filter, &scope).await;

            if let Err(ref e) = result {
                if policy == ErrorPolicy::FailFast && !e.is_cancelled() {
                    debug!("{} failed, cancelling sibling fetches", category);
                    scope.cancel();
                }
            }
            result
        })
    }
}

/// Typed dispatch from a category to its record type.
async fn fetch_category(
    client: &RemoteClient,
    category: Category,
    token: &SessionToken,
    filter: &FetchFilter,
    cancel: &CancellationToken,
) -> Result<CategoryRecords, FetchError> {
    Ok(match category {
        Category::Supplies => {
            CategoryRecords::Supplies(client.fetch_all::<Supply>(token, filter, cancel).await?)
        }
        Category::ProductSales => CategoryRecords::ProductSales(
            client.fetch_all::<ProductSale>(token, filter, cancel).await?,
        ),
        Category::Products => {
            CategoryRecords::Products(client.fetch_all::<Product>(token, filter, cancel).await?)
        }
        Category::FuelTypes => {
            CategoryRecords::FuelTypes(client.fetch_all::<FuelType>(token, filter, cancel).await?)
        }
        Category::Vehicles => {
            CategoryRecords::Vehicles(client.fetch_all::<Vehicle>(token, filter, cancel).await?)
        }
        Category::Drivers => {
            CategoryRecords::Drivers(client.fetch_all::<Driver>(token, filter, cancel).await?)
        }
        Category::Employees => {
            CategoryRecords::Employees(client.fetch_all::<Employee>(token, filter, cancel).await?)
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::remote::client::tests::test_client;
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A page of `len` records valid for any category.
    pub(crate) fn records_body(len: usize, prefix: &str) -> Value {
        let data: Vec<Value> = (0..len)
            .map(|i| {
                json!({
                    "id": i,
                    "name": format!("{}-{}", prefix, i),
                    "plate": format!("ABC{:04}", i),
                    "date": "2026-01-01T10-00-00Z",
                    "active": true
                })
            })
            .collect();
        json!({ "success": true, "data": data, "count": len })
    }

    async fn mount_category(server: &MockServer, category: Category, len: usize, delay_ms: u64) {
        Mock::given(method("GET"))
            .and(path(category.path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(delay_ms))
                    .set_body_json(records_body(len, &category.to_string())),
            )
            .mount(server)
            .await;
    }

    fn subject() -> Subject {
        Subject {
            id: 5,
            login: None,
            password: None,
            identity: Some("ACME".to_string()),
            last_sync: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_aggregate_fills_every_slot() {
        let server = MockServer::start().await;
        for (i, category) in Category::ALL.iter().enumerate() {
            mount_category(&server, *category, i + 1, 0).await;
        }

        let aggregator = Aggregator::new(test_client(&server));
        let payload = aggregator
            .aggregate(
                &subject(),
                &SessionToken::new("tok"),
                Utc::now(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(payload.subject_id, 5);
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(payload.records.count(*category), i + 1, "{}", category);
        }
        assert_eq!(payload.records.fuel_types[0].name, "fuelTypes-0");
    }

    #[tokio::test]
    async fn test_aggregation_is_independent_of_completion_order() {
        let delays_a = [70, 10, 50, 0, 30, 60, 20];
        let delays_b = [0, 60, 10, 70, 20, 30, 50];

        let mut serialized = Vec::new();
        for delays in [delays_a, delays_b] {
            let server = MockServer::start().await;
            for (category, delay) in Category::ALL.iter().zip(delays) {
                mount_category(&server, *category, 3, delay).await;
            }
            let payload = Aggregator::new(test_client(&server))
                .aggregate(
                    &subject(),
                    &SessionToken::new("tok"),
                    Utc::now(),
                    None,
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            serialized.push(serde_json::to_vec(&payload.records).unwrap());
        }

        assert_eq!(serialized[0], serialized[1]);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_and_cancels_siblings() {
        let server = MockServer::start().await;
        for category in Category::ALL {
            if category == Category::Vehicles {
                continue;
            }
            mount_category(&server, category, 2, 5_000).await;
        }
        Mock::given(method("GET"))
            .and(path("/vehicles"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let started = Instant::now();
        let err = Aggregator::new(test_client(&server))
            .aggregate(
                &subject(),
                &SessionToken::new("tok"),
                Utc::now(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category(), Category::Vehicles);
        assert!(matches!(err, FetchError::Status { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_tolerant_reference_fetch_leaves_failed_category_empty() {
        let server = MockServer::start().await;
        for category in Category::REFERENCE {
            if category == Category::Drivers {
                continue;
            }
            mount_category(&server, category, 4, 0).await;
        }
        Mock::given(method("GET"))
            .and(path("/drivers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
            .mount(&server)
            .await;

        let reference = Aggregator::new(test_client(&server))
            .fetch_reference(&SessionToken::new("tok"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(reference.drivers.is_empty());
        assert_eq!(reference.products.len(), 4);
        assert_eq!(reference.employees.len(), 4);
        assert!(reference.supplies.is_empty());
    }

    #[tokio::test]
    async fn test_shared_reference_only_fetches_transactional() {
        let server = MockServer::start().await;
        mount_category(&server, Category::Supplies, 2, 0).await;
        mount_category(&server, Category::ProductSales, 1, 0).await;
        for category in Category::REFERENCE {
            Mock::given(method("GET"))
                .and(path(category.path()))
                .respond_with(ResponseTemplate::new(500))
                .expect(0)
                .mount(&server)
                .await;
        }

        let mut reference = RecordSet::default();
        reference.products = serde_json::from_value(json!([{ "id": 77, "name": "Arla" }])).unwrap();

        let payload = Aggregator::new(test_client(&server))
            .aggregate(
                &subject(),
                &SessionToken::new("tok"),
                Utc::now(),
                Some(&reference),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(payload.records.supplies.len(), 2);
        assert_eq!(payload.records.product_sales.len(), 1);
        assert_eq!(payload.records.products[0].id, 77);
    }

    #[tokio::test]
    async fn test_run_cancellation_is_reported_under_both_policies() {
        let server = MockServer::start().await;
        for category in Category::ALL {
            mount_category(&server, category, 1, 5_000).await;
        }
        let aggregator = Aggregator::new(test_client(&server));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = aggregator
            .fetch_reference(&SessionToken::new("tok"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let err = aggregator
            .aggregate(&subject(), &SessionToken::new("tok"), Utc::now(), None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
