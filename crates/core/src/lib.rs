pub mod geo;
pub mod money;
pub mod receipt;

pub use geo::{
    address_cache, meters_to_miles, trip_mileage, AddressResolver, CachedResolver, DistanceError,
    DistanceProvider, Location, Trip, TripLog, DEFAULT_ADDRESS_CACHE_CAPACITY,
};
pub use money::Money;
pub use receipt::ReceiptRecord;
