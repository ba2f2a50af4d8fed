//! Data models for the integration job.
//!
//! This module contains the subjects handed to us by the subject source,
//! the seven record categories pulled from the Vestro API, and the
//! aggregated payload forwarded downstream.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A producer/user awaiting integration.
///
/// The downstream application lists producers as
/// `{produtor_id, login, senha, data}`; the English names are accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Stable identifier on the downstream side.
    #[serde(alias = "produtor_id")]
    pub id: i64,
    /// Vestro login, used in per-subject authentication mode.
    #[serde(default)]
    pub login: Option<String>,
    /// Vestro password, used in per-subject authentication mode.
    #[serde(default, alias = "senha", skip_serializing)]
    pub password: Option<String>,
    /// External identity value used to filter transactional records.
    #[serde(default)]
    pub identity: Option<String>,
    /// Last successful synchronization (the checkpoint).
    #[serde(alias = "data")]
    pub last_sync: DateTime<Utc>,
}

impl Subject {
    /// Returns the per-subject credentials if both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.login.as_deref(), self.password.as_deref()) {
            (Some(login), Some(password)) if !login.is_empty() => Some((login, password)),
            _ => None,
        }
    }

    /// Returns the identity filter value, ignoring blank strings.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Opaque bearer credential obtained from the sessions endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(access: impl Into<String>) -> Self {
        Self(access.into())
    }

    /// The raw bearer value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// The seven record categories served by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Supplies,
    ProductSales,
    Products,
    FuelTypes,
    Vehicles,
    Drivers,
    Employees,
}

impl Category {
    /// All categories, in payload order.
    pub const ALL: [Category; 7] = [
        Category::Supplies,
        Category::ProductSales,
        Category::Products,
        Category::FuelTypes,
        Category::Vehicles,
        Category::Drivers,
        Category::Employees,
    ];

    /// Categories filtered by date and identity.
    pub const TRANSACTIONAL: [Category; 2] = [Category::Supplies, Category::ProductSales];

    /// Global reference snapshots.
    pub const REFERENCE: [Category; 5] = [
        Category::Products,
        Category::FuelTypes,
        Category::Vehicles,
        Category::Drivers,
        Category::Employees,
    ];

    /// Endpoint path relative to the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Category::Supplies => "/supplies",
            Category::ProductSales => "/product/sales",
            Category::Products => "/products",
            Category::FuelTypes => "/fuel/types",
            Category::Vehicles => "/vehicles",
            Category::Drivers => "/drivers",
            Category::Employees => "/employees",
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, Category::Supplies | Category::ProductSales)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Supplies => "supplies",
            Category::ProductSales => "productSales",
            Category::Products => "products",
            Category::FuelTypes => "fuelTypes",
            Category::Vehicles => "vehicles",
            Category::Drivers => "drivers",
            Category::Employees => "employees",
        };
        f.write_str(name)
    }
}

/// A record type served by exactly one category endpoint.
pub trait Record: DeserializeOwned + Serialize + Send + 'static {
    const CATEGORY: Category;
}

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A fuel supply (refuelling) event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supply {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fuel: String,
    /// Remote timestamp, kept verbatim (`yyyy-mm-ddThh-mm-ssZ`).
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plate: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mileage: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub employee: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub driver: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub employee_enrollment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub driver_enrollment: String,
}

impl Record for Supply {
    const CATEGORY: Category = Category::Supplies;
}

/// A consolidated product sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSale {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub serial_number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub driver: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub driver_enrollment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plate: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub employee: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub employee_enrollment: String,
}

impl Record for ProductSale {
    const CATEGORY: Category = Category::ProductSales;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
}

impl Record for Product {
    const CATEGORY: Category = Category::Products;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelType {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

impl Record for FuelType {
    const CATEGORY: Category = Category::FuelTypes;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plate: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(rename = "companyName", default, deserialize_with = "null_as_default")]
    pub company: String,
    #[serde(rename = "active", default, deserialize_with = "null_as_default")]
    pub is_active: bool,
}

impl Record for Vehicle {
    const CATEGORY: Category = Category::Vehicles;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enrollment: String,
    #[serde(rename = "active", default, deserialize_with = "null_as_default")]
    pub is_active: bool,
}

impl Record for Driver {
    const CATEGORY: Category = Category::Drivers;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enrollment: String,
    #[serde(rename = "active", default, deserialize_with = "null_as_default")]
    pub is_active: bool,
}

impl Record for Employee {
    const CATEGORY: Category = Category::Employees;
}

/// The records of one category, tagged by kind.
///
/// Each fan-out task returns exactly one variant, which is then routed into
/// its dedicated [`RecordSet`] field.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryRecords {
    Supplies(Vec<Supply>),
    ProductSales(Vec<ProductSale>),
    Products(Vec<Product>),
    FuelTypes(Vec<FuelType>),
    Vehicles(Vec<Vehicle>),
    Drivers(Vec<Driver>),
    Employees(Vec<Employee>),
}

impl CategoryRecords {
    /// An empty sequence of the given category.
    pub fn empty(category: Category) -> Self {
        match category {
            Category::Supplies => CategoryRecords::Supplies(Vec::new()),
            Category::ProductSales => CategoryRecords::ProductSales(Vec::new()),
            Category::Products => CategoryRecords::Products(Vec::new()),
            Category::FuelTypes => CategoryRecords::FuelTypes(Vec::new()),
            Category::Vehicles => CategoryRecords::Vehicles(Vec::new()),
            Category::Drivers => CategoryRecords::Drivers(Vec::new()),
            Category::Employees => CategoryRecords::Employees(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CategoryRecords::Supplies(v) => v.len(),
            CategoryRecords::ProductSales(v) => v.len(),
            CategoryRecords::Products(v) => v.len(),
            CategoryRecords::FuelTypes(v) => v.len(),
            CategoryRecords::Vehicles(v) => v.len(),
            CategoryRecords::Drivers(v) => v.len(),
            CategoryRecords::Employees(v) => v.len(),
        }
    }
}

/// One sequence per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSet {
    pub supplies: Vec<Supply>,
    pub product_sales: Vec<ProductSale>,
    pub products: Vec<Product>,
    pub fuel_types: Vec<FuelType>,
    pub vehicles: Vec<Vehicle>,
    pub drivers: Vec<Driver>,
    pub employees: Vec<Employee>,
}

impl RecordSet {
    /// Moves a category's records into their slot, replacing whatever was there.
    pub fn insert(&mut self, records: CategoryRecords) {
        match records {
            CategoryRecords::Supplies(v) => self.supplies = v,
            CategoryRecords::ProductSales(v) => self.product_sales = v,
            CategoryRecords::Products(v) => self.products = v,
            CategoryRecords::FuelTypes(v) => self.fuel_types = v,
            CategoryRecords::Vehicles(v) => self.vehicles = v,
            CategoryRecords::Drivers(v) => self.drivers = v,
            CategoryRecords::Employees(v) => self.employees = v,
        }
    }

    /// Copies the reference categories from another set.
    pub fn merge_reference(&mut self, reference: &RecordSet) {
        self.products = reference.products.clone();
        self.fuel_types = reference.fuel_types.clone();
        self.vehicles = reference.vehicles.clone();
        self.drivers = reference.drivers.clone();
        self.employees = reference.employees.clone();
    }

    /// Number of records held for a category.
    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::Supplies => self.supplies.len(),
            Category::ProductSales => self.product_sales.len(),
            Category::Products => self.products.len(),
            Category::FuelTypes => self.fuel_types.len(),
            Category::Vehicles => self.vehicles.len(),
            Category::Drivers => self.drivers.len(),
            Category::Employees => self.employees.len(),
        }
    }
}

/// Everything fetched for one subject, ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Producer id, under the key the downstream application reads.
    #[serde(rename = "produtor_id")]
    pub subject_id: i64,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub records: RecordSet,
}

impl Payload {
    /// A payload is empty when it carries no transactional records.
    ///
    /// Reference data alone is never worth a delivery.
    pub fn is_empty(&self) -> bool {
        self.records.supplies.is_empty() && self.records.product_sales.is_empty()
    }
}

/// Step of subject processing at which a subject was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Authenticate,
    Aggregate,
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Authenticate => write!(f, "authenticate"),
            Stage::Aggregate => write!(f, "aggregate"),
            Stage::Deliver => write!(f, "deliver"),
        }
    }
}

/// How one subject's processing ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubjectOutcome {
    /// The payload was accepted downstream.
    Delivered,
    /// No transactional records; nothing was sent.
    Empty,
    /// Processing stopped at `stage`; the run moved on.
    Skipped { stage: Stage, reason: String },
}

/// Result of processing one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject_id: i64,
    /// Checkpoint actually used, after clamping.
    pub since: DateTime<Utc>,
    pub outcome: SubjectOutcome,
    pub supplies: usize,
    pub product_sales: usize,
}

impl SubjectReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, SubjectOutcome::Delivered)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, SubjectOutcome::Skipped { .. })
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub subjects: Vec<SubjectReport>,
}

impl RunSummary {
    pub fn delivered(&self) -> usize {
        self.subjects.iter().filter(|s| s.is_delivered()).count()
    }

    pub fn empty(&self) -> usize {
        self.subjects
            .iter()
            .filter(|s| s.outcome == SubjectOutcome::Empty)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.subjects.iter().filter(|s| s.is_skipped()).count()
    }

    /// Run duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
