// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

/// Possible errors returned by operations on a histogram.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("histogram contains no samples")]
    /// The histogram contains no samples.
    Empty,
    #[error("quantiles must be in ascending order")]
    /// The requested quantiles are not in ascending order.
    UnorderedQuantiles,
    #[error("quantile out of range")]
    /// A requested quantile is outside of the range 0.0 - 1.0 (inclusive)
    InvalidQuantile,
    #[error("malformed serialized histogram")]
    /// The serialized bytes do not describe a histogram.
    Deserialize,
    #[error("subtrahend bucket missing or larger than target count")]
    /// A subtraction would have underflowed a bucket count.
    Underflow,
    #[error("signed count arithmetic overflowed")]
    /// A signed count operation overflowed the i64 range.
    Overflow,
}
