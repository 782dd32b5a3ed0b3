use crate::model::Ms;

/// Distinct hours configurations kept by the template cache when not configured.
pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 100;
pub const MAX_TEMPLATE_CACHE_SIZE: usize = 10_000;

/// Requests accepted by a single `batch_generate` call.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Rows a single batch sweep may rewrite.
pub const MAX_SWEEP_LIMIT: usize = 10_000;

/// Widest date range `slots_in_range` will walk (inclusive).
pub const MAX_RANGE_DAYS: i64 = 92;

/// Longest hold a caller may place.
pub const MAX_HOLD_TTL_MS: Ms = 24 * 3_600_000;

/// Attempts made at read-side generation before an infrastructure error surfaces.
pub const GENERATION_ATTEMPTS: u32 = 3;

/// Furthest ahead the pre-generator will materialize days.
pub const MAX_PREGENERATE_DAYS: u32 = 366;
