use chrono::NaiveDate;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const METERS_PER_MILE: f64 = 1609.34;

/// Number of address lookups kept by [`CachedResolver::new`].
pub const DEFAULT_ADDRESS_CACHE_CAPACITY: u64 = 100;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DistanceError {
    #[error("Distance lookup failed: {0}")]
    Lookup(String),
    #[error("Distance value is missing")]
    MissingDistance,
}

/// Turns a free-form place query into a formatted street address.
pub trait AddressResolver: Send + Sync {
    /// `None` when the provider has no result for the query.
    fn resolve(&self, query: &str) -> Option<String>;
}

/// Driving distance between two addresses, in meters.
pub trait DistanceProvider: Send + Sync {
    fn distance_meters(&self, origin: &str, destination: &str) -> Result<u64, DistanceError>;
}

/// Bounded least-recently-used cache for address lookups. A capacity of zero
/// is bumped to one.
pub fn address_cache(capacity: u64) -> Cache<String, Option<String>> {
    Cache::builder()
        .max_capacity(capacity.max(1))
        .eviction_policy(EvictionPolicy::lru())
        .build()
}

/// Memoizes an [`AddressResolver`] behind an injected LRU cache.
///
/// Misses (`None`) are cached too, so a query the provider cannot resolve is
/// not retried until it falls out of the cache.
pub struct CachedResolver<R> {
    inner: R,
    cache: Cache<String, Option<String>>,
}

impl<R: AddressResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self::with_cache(inner, address_cache(DEFAULT_ADDRESS_CACHE_CAPACITY))
    }

    pub fn with_capacity(inner: R, capacity: u64) -> Self {
        Self::with_cache(inner, address_cache(capacity))
    }

    pub fn with_cache(inner: R, cache: Cache<String, Option<String>>) -> Self {
        Self { inner, cache }
    }

    /// Entries currently held, after pending evictions are applied.
    pub fn cached_len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl<R: AddressResolver> AddressResolver for CachedResolver<R> {
    fn resolve(&self, query: &str) -> Option<String> {
        if let Some(hit) = self.cache.get(query) {
            tracing::debug!(query, "address cache hit");
            return hit;
        }

        let resolved = self.inner.resolve(query);
        self.cache.insert(query.to_string(), resolved.clone());
        resolved
    }
}

/// Convert a distance in meters to whole miles, rounding to the nearest mile.
pub fn meters_to_miles(meters: u64) -> u32 {
    (meters as f64 / METERS_PER_MILE).round() as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub address: String,
}

impl Location {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self { name: name.into(), address: address.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub date: NaiveDate,
    pub start_location_name: String,
    pub start_location_address: String,
    pub end_location_name: String,
    pub end_location_address: String,
    pub total_mileage: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TripLog {
    trips: Vec<Trip>,
}

impl TripLog {
    pub fn new(trips: Vec<Trip>) -> Self {
        Self { trips }
    }

    pub fn push(&mut self, trip: Trip) {
        self.trips.push(trip);
    }

    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    /// Mileage of an already logged trip between the two named locations,
    /// in either direction.
    pub fn known_mileage(&self, start_name: &str, end_name: &str) -> Option<u32> {
        self.trips
            .iter()
            .find(|t| {
                (t.start_location_name == start_name && t.end_location_name == end_name)
                    || (t.start_location_name == end_name && t.end_location_name == start_name)
            })
            .map(|t| t.total_mileage)
    }
}

/// Mileage for a trip, reusing a logged trip between the same locations
/// before asking the distance provider.
pub fn trip_mileage<P: DistanceProvider + ?Sized>(
    log: &TripLog,
    provider: &P,
    start: &Location,
    end: &Location,
) -> Result<u32, DistanceError> {
    if let Some(miles) = log.known_mileage(&start.name, &end.name) {
        tracing::debug!(start = %start.name, end = %end.name, miles, "reusing logged trip mileage");
        return Ok(miles);
    }
    match provider.distance_meters(&start.address, &end.address)? {
        0 => Err(DistanceError::MissingDistance),
        meters => Ok(meters_to_miles(meters)),
    }
}
