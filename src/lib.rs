// Client-side core for the lodging and restaurant booking marketplace

pub mod api;
pub mod cache;
pub mod mutator;
pub mod pricing;
pub mod resources;
pub mod schedule;

// Re-export key types for convenience
pub use api::{
    ApiError, ApiRequest, Attachment, ClientConfig, ClientError, HttpResourceApi, PacingConfig,
    RequestPacer, ResourceApi,
};
pub use cache::{
    CacheEntry, CacheSnapshot, CacheStatsReport, InMemoryPartitionCache, OptimisticRecord,
    PartitionCache, PartitionKey,
};
pub use mutator::{
    MutationAttempt, MutationError, MutationPhase, OptimisticMutator, SecondaryUploadError,
};
pub use pricing::{
    calculate_total_nights, calculate_total_price, DateInput, DateRange, PricingError,
    PricingInput,
};
pub use resources::{
    fetch_partition, Addresses, ProfileImages, Resource, ResourceKind, Restaurants, Rooms,
    Services,
};
pub use schedule::{
    availability_badge, is_open_now, is_within_opening_window, AvailabilityBadge, DaySchedule,
    TimeSlot, Weekday, WeeklySchedule,
};
