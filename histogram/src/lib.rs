// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Sparse log-linear histograms for recording and merging approximate
//! distributions of real valued samples.
//!
//! Values spanning the magnitude range `[1e-128, 1e128)` of either sign are
//! grouped into deterministic buckets holding two significant decimal
//! digits, so histograms from independent sources merge losslessly by
//! summing bucket counts. Storage is sparse and ordered: memory follows the
//! number of distinct buckets touched, and quantiles, means, and counts
//! above or below a threshold are answered by a single walk. A compact
//! binary serialization with a base64 envelope moves histograms across
//! process and storage boundaries.
//!
//! ```
//! use loghist::Histogram;
//!
//! let mut histogram = Histogram::new();
//! for value in [0.35, 0.5, 1.2, 3.1, 7.4] {
//!     histogram.insert(value, 1);
//! }
//!
//! assert_eq!(histogram.sample_count(), 5);
//! let median = histogram.approx_quantile(&[0.5]).unwrap()[0];
//! assert!(median > 1.0 && median < 1.5);
//!
//! let mut restored = Histogram::new();
//! restored.deserialize_b64(&histogram.serialize_b64()).unwrap();
//! assert_eq!(restored, histogram);
//! ```

mod analytics;
mod bucket;
mod error;
mod histogram;
mod serialize;

pub use analytics::*;
pub use bucket::*;
pub use error::*;
pub use histogram::*;
